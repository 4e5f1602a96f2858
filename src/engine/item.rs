//! Per-stage runtime state and the worker loop.
//!
//! One [`RuntimeItem`] wraps each stage: the opaque compute module, the
//! stage's inbound queue, its wait/notify control and a staging area for
//! inputs that arrive from more than one upstream producer. Items are
//! wired in a ring — item i's neighbor is item i+1, the last wraps back to
//! item 0 — used for exit propagation and final-output delivery, never for
//! forward data flow.
//!
//! Every stage except stage 0 owns a worker thread running [`worker_loop`]:
//!
//! ```text
//! WAIT_DATA ──poll ok──► RUNNING ──► ROUTING ──┐
//!     ▲                                        │
//!     └────────────────────────────────────────┘
//!     └──exit notified, queue drained──► EXITED
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::Sender;

use crate::engine::notify::StageNotifier;
use crate::engine::queue::BoundedQueue;
use crate::engine::route::{route_outputs, OutputBatch, RoutingTable};
use crate::error::{PipelineError, Result};
use crate::stage::StageModule;
use crate::tensor::Tensor;

/// Reports from worker threads back to the controller.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A stage's `run()` failed; the chain is shutting down.
    StageFailed { stage: usize, message: String },
    /// A worker observed shutdown and left its loop.
    WorkerExited { stage: usize },
}

/// Mutable per-stage state. Touched only by the owning worker thread, or
/// by the caller thread for stage 0, so the mutex is uncontended.
struct WorkState {
    stage: Box<dyn StageModule>,
    /// Per-slot FIFO of inputs delivered by separate upstream batches.
    /// Producers deliver in run order, so the fronts of all slots always
    /// belong to the same run; a later run's tensor on a fast edge queues
    /// behind instead of clobbering a staged earlier one.
    pending: Vec<VecDeque<Tensor>>,
}

/// Runtime wrapper around one stage of the chain.
pub struct RuntimeItem {
    pub(crate) index: usize,
    pub(crate) queue: BoundedQueue<OutputBatch>,
    pub(crate) notifier: StageNotifier,
    work: Mutex<WorkState>,
    name: String,
    num_inputs: usize,
    num_outputs: usize,
}

impl RuntimeItem {
    pub fn new(index: usize, stage: Box<dyn StageModule>, queue_capacity: usize) -> Self {
        let name = stage.name().to_string();
        let num_inputs = stage.num_inputs();
        let num_outputs = stage.num_outputs();
        Self {
            index,
            queue: BoundedQueue::new(queue_capacity),
            notifier: StageNotifier::new(),
            work: Mutex::new(WorkState {
                stage,
                pending: vec![VecDeque::new(); num_inputs],
            }),
            name,
            num_inputs,
            num_outputs,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    fn lock_work(&self) -> MutexGuard<'_, WorkState> {
        self.work.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write directly into an input slot of the wrapped stage. Used for
    /// stage 0, which the caller thread drives.
    pub fn set_stage_input(&self, input_index: usize, tensor: Tensor) -> Result<()> {
        if input_index >= self.num_inputs {
            return Err(PipelineError::InvalidSlot {
                stage: self.index,
                index: input_index,
            });
        }
        self.lock_work()
            .stage
            .set_input(input_index, tensor)
            .map_err(|e| self.retag(e))
    }

    /// Diagnostic read-back of a stage input.
    pub fn get_stage_input(&self, input_index: usize) -> Result<Option<Tensor>> {
        if input_index >= self.num_inputs {
            return Err(PipelineError::InvalidSlot {
                stage: self.index,
                index: input_index,
            });
        }
        Ok(self.lock_work().stage.get_input(input_index))
    }

    /// Resolve a named input on the wrapped stage.
    pub fn resolve_input_name(&self, name: &str) -> Option<usize> {
        self.lock_work().stage.input_index_of(name)
    }

    /// Run the stage on its currently set inputs and collect all outputs.
    /// Used for stage 0, whose inputs the caller sets directly.
    pub fn run_direct(&self) -> Result<Vec<(usize, Tensor)>> {
        let mut work = self.lock_work();
        work.stage.run().map_err(|e| self.fatal(e))?;
        self.collect_outputs(&work)
    }

    /// Stage a received batch. When every input slot has at least one
    /// queued tensor, pop the front of each (the oldest run's set), feed
    /// the stage, run it, and return its outputs for routing; otherwise
    /// keep waiting for the remaining producers.
    pub fn absorb(&self, batch: OutputBatch) -> Result<Option<Vec<(usize, Tensor)>>> {
        let mut work = self.lock_work();
        for (input_index, tensor) in batch.entries {
            if input_index >= self.num_inputs {
                return Err(PipelineError::InvalidSlot {
                    stage: self.index,
                    index: input_index,
                });
            }
            work.pending[input_index].push_back(tensor);
        }
        if work.pending.iter().any(|slot| slot.is_empty()) {
            return Ok(None);
        }

        for input_index in 0..self.num_inputs {
            let tensor = work.pending[input_index]
                .pop_front()
                .ok_or(PipelineError::InvalidSlot {
                    stage: self.index,
                    index: input_index,
                })?;
            work.stage
                .set_input(input_index, tensor)
                .map_err(|e| self.retag(e))?;
        }
        work.stage.run().map_err(|e| self.fatal(e))?;
        self.collect_outputs(&work).map(Some)
    }

    fn collect_outputs(&self, work: &WorkState) -> Result<Vec<(usize, Tensor)>> {
        let mut outputs = Vec::with_capacity(self.num_outputs);
        for output_index in 0..self.num_outputs {
            match work.stage.get_output(output_index) {
                Some(tensor) => outputs.push((output_index, tensor)),
                None => {
                    return Err(PipelineError::StageExecution {
                        stage: self.index,
                        message: format!("no output produced at slot {}", output_index),
                    })
                }
            }
        }
        Ok(outputs)
    }

    /// Tag a stage-local failure with this item's chain index. Stages
    /// don't know their position, so nested execution errors carry a
    /// placeholder index that gets replaced here.
    fn fatal(&self, err: PipelineError) -> PipelineError {
        let message = match err {
            PipelineError::StageExecution { message, .. } => message,
            other => other.to_string(),
        };
        PipelineError::StageExecution {
            stage: self.index,
            message,
        }
    }

    /// Rewrite a stage-local slot error with this item's chain index.
    fn retag(&self, err: PipelineError) -> PipelineError {
        match err {
            PipelineError::InvalidSlot { index, .. } => PipelineError::InvalidSlot {
                stage: self.index,
                index,
            },
            other => self.fatal(other),
        }
    }
}

/// Chain-fatal teardown: latch exit everywhere and unblock every queue.
/// Invoked by a worker that hit a stage execution error, or by the
/// controller when stage 0 itself fails.
pub(crate) fn teardown(items: &[Arc<RuntimeItem>]) {
    for item in items {
        item.queue.close();
        item.notifier.notify_exit();
    }
}

/// The per-stage worker loop (stages 1..N).
///
/// Blocks on the stage's notifier while its inbound queue is empty, stages
/// and runs arriving batches, routes the produced outputs, and on exit
/// drains the queue before propagating the exit notification to the next
/// ring item — the whole chain unwinds from a single notification.
pub fn worker_loop(
    index: usize,
    items: Vec<Arc<RuntimeItem>>,
    table: Arc<RoutingTable>,
    events: Sender<EngineEvent>,
) {
    let item = &items[index];
    let next = &items[(index + 1) % items.len()];
    tracing::debug!("worker for stage {} ('{}') started", index, item.name());

    let mut polled = false;
    loop {
        if !item.notifier.wait(polled) {
            // Exit observed: process what is still buffered, then unwind.
            while let Some(batch) = item.queue.poll() {
                match item.absorb(batch) {
                    Ok(Some(outputs)) => route_outputs(&table, index, &outputs, &items),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!("stage {} failed while draining: {}", index, e);
                        break;
                    }
                }
            }
            break;
        }

        match item.queue.poll() {
            Some(batch) => {
                polled = true;
                match item.absorb(batch) {
                    Ok(Some(outputs)) => route_outputs(&table, index, &outputs, &items),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::error!("stage {} ('{}') failed: {}", index, item.name(), e);
                        let _ = events.send(EngineEvent::StageFailed {
                            stage: index,
                            message: e.to_string(),
                        });
                        teardown(&items);
                        break;
                    }
                }
            }
            None => polled = false,
        }
    }

    next.notifier.notify_exit();
    let _ = events.send(EngineEvent::WorkerExited { stage: index });
    tracing::debug!("worker for stage {} exiting", index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::FnStage;

    fn doubler(index: usize) -> RuntimeItem {
        let stage = FnStage::new("double", 1, 1, |inputs| {
            let out: Vec<f32> = inputs[0].data().iter().map(|v| v * 2.0).collect();
            Ok(vec![Tensor::from_vec(out)])
        });
        RuntimeItem::new(index, Box::new(stage), 4)
    }

    #[test]
    fn test_absorb_runs_when_complete() {
        let item = doubler(1);
        let batch = OutputBatch {
            entries: vec![(0, Tensor::from_vec(vec![3.0]))],
        };
        let outputs = item.absorb(batch).unwrap().unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].1.data(), &[6.0]);
    }

    #[test]
    fn test_absorb_stages_partial_batch() {
        let stage = FnStage::new("pair", 2, 1, |inputs| {
            Ok(vec![Tensor::scalar(
                inputs[0].data()[0] + inputs[1].data()[0],
            )])
        });
        let item = RuntimeItem::new(1, Box::new(stage), 4);

        let first = OutputBatch {
            entries: vec![(0, Tensor::scalar(1.0))],
        };
        assert!(item.absorb(first).unwrap().is_none());

        let second = OutputBatch {
            entries: vec![(1, Tensor::scalar(2.0))],
        };
        let outputs = item.absorb(second).unwrap().unwrap();
        assert_eq!(outputs[0].1.data(), &[3.0]);
    }

    #[test]
    fn test_pending_inputs_pair_in_fifo_order() {
        let stage = FnStage::new("pair", 2, 1, |inputs| {
            Ok(vec![Tensor::scalar(
                inputs[0].data()[0] + inputs[1].data()[0],
            )])
        });
        let item = RuntimeItem::new(1, Box::new(stage), 4);

        // Two arrivals on the fast slot before the slow slot contributes;
        // the second must queue behind, not replace, the first.
        let fast1 = OutputBatch {
            entries: vec![(1, Tensor::scalar(10.0))],
        };
        assert!(item.absorb(fast1).unwrap().is_none());
        let fast2 = OutputBatch {
            entries: vec![(1, Tensor::scalar(20.0))],
        };
        assert!(item.absorb(fast2).unwrap().is_none());

        let slow1 = OutputBatch {
            entries: vec![(0, Tensor::scalar(1.0))],
        };
        let first = item.absorb(slow1).unwrap().unwrap();
        assert_eq!(first[0].1.data(), &[11.0]);

        let slow2 = OutputBatch {
            entries: vec![(0, Tensor::scalar(2.0))],
        };
        let second = item.absorb(slow2).unwrap().unwrap();
        assert_eq!(second[0].1.data(), &[22.0]);
    }

    #[test]
    fn test_absorb_rejects_bad_slot() {
        let item = doubler(2);
        let batch = OutputBatch {
            entries: vec![(9, Tensor::scalar(0.0))],
        };
        let err = item.absorb(batch).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidSlot { stage: 2, index: 9 }
        ));
    }

    struct RejectingStage;

    impl StageModule for RejectingStage {
        fn name(&self) -> &str {
            "rejecting"
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn set_input(&mut self, index: usize, _tensor: Tensor) -> crate::error::Result<()> {
            // Stages report slot errors without knowing their position.
            Err(PipelineError::InvalidSlot { stage: 0, index })
        }
        fn get_input(&self, _index: usize) -> Option<Tensor> {
            None
        }
        fn get_output(&self, _index: usize) -> Option<Tensor> {
            None
        }
        fn run(&mut self) -> crate::error::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_set_input_error_tagged_with_chain_index() {
        let item = RuntimeItem::new(4, Box::new(RejectingStage), 4);
        let batch = OutputBatch {
            entries: vec![(0, Tensor::scalar(1.0))],
        };
        let err = item.absorb(batch).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidSlot { stage: 4, index: 0 }
        ));

        let err = item.set_stage_input(0, Tensor::scalar(1.0)).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidSlot { stage: 4, .. }));
    }

    #[test]
    fn test_run_direct_tags_stage_index() {
        let stage = FnStage::new("boom", 0, 1, |_| {
            Err(PipelineError::StageExecution {
                stage: 0,
                message: "boom".to_string(),
            })
        });
        let item = RuntimeItem::new(3, Box::new(stage), 4);
        let err = item.run_direct().unwrap_err();
        assert!(matches!(err, PipelineError::StageExecution { stage: 3, .. }));
    }
}
