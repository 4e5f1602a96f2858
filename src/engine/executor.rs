//! The pipeline controller.
//!
//! [`PipelineExecutor`] owns the ordered collection of runtime items,
//! spawns one worker per non-first stage, and exposes the chain-level
//! operations: inject input, run stage 0, poll final output, stop.
//!
//! Stage 0 runs on the caller's thread; `run()` returns as soon as stage
//! 0's outputs are enqueued, so the caller can already feed the next input
//! while stages 1..N are still processing the previous one. The only
//! brake is queue capacity: a full downstream queue blocks the push.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver};

use crate::config::{DependencyConfig, ExecutorOptions};
use crate::engine::item::{teardown, worker_loop, EngineEvent, RuntimeItem};
use crate::engine::route::{route_outputs, RoutingTable};
use crate::error::{PipelineError, Result};
use crate::stage::StageModule;
use crate::tensor::Tensor;

/// Pipeline controller for a chain of compute stages.
pub struct PipelineExecutor {
    items: Vec<Arc<RuntimeItem>>,
    table: Arc<RoutingTable>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    events: Receiver<EngineEvent>,
    stopped: AtomicBool,
    /// First reported stage failure, surfaced by `get_output`.
    failure: Mutex<Option<PipelineError>>,
}

impl std::fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("num_stages", &self.items.len())
            .finish_non_exhaustive()
    }
}

impl PipelineExecutor {
    /// Build and start a chain with default options.
    pub fn new(
        modules: Vec<Box<dyn StageModule>>,
        config: DependencyConfig,
    ) -> Result<Self> {
        Self::with_options(modules, config, ExecutorOptions::default())
    }

    /// Build and start a chain.
    ///
    /// Validates the dependency configuration against the stage arities
    /// (errors here, before any thread exists), wires the notification
    /// ring, then spawns one worker thread per stage with index ≥ 1.
    pub fn with_options(
        modules: Vec<Box<dyn StageModule>>,
        config: DependencyConfig,
        options: ExecutorOptions,
    ) -> Result<Self> {
        if options.queue_capacity == 0 {
            return Err(PipelineError::config("queue capacity must be at least 1"));
        }

        let arities: Vec<(usize, usize)> = modules
            .iter()
            .map(|m| (m.num_inputs(), m.num_outputs()))
            .collect();
        let table = Arc::new(RoutingTable::build(&arities, &config)?);

        let items: Vec<Arc<RuntimeItem>> = modules
            .into_iter()
            .enumerate()
            .map(|(i, stage)| Arc::new(RuntimeItem::new(i, stage, options.queue_capacity)))
            .collect();

        let (event_tx, event_rx) = unbounded();
        let mut workers = Vec::with_capacity(items.len().saturating_sub(1));
        for index in 1..items.len() {
            let items = items.clone();
            let table = Arc::clone(&table);
            let events = event_tx.clone();
            workers.push(std::thread::spawn(move || {
                worker_loop(index, items, table, events)
            }));
        }

        tracing::info!(
            "pipeline started: {} stages, {} workers, queue capacity {}",
            items.len(),
            workers.len(),
            options.queue_capacity
        );

        Ok(Self {
            items,
            table,
            workers: Mutex::new(workers),
            events: event_rx,
            stopped: AtomicBool::new(false),
            failure: Mutex::new(None),
        })
    }

    /// Number of stages in the chain.
    pub fn num_stages(&self) -> usize {
        self.items.len()
    }

    /// Input arity of the chain (stage 0's inputs).
    pub fn num_inputs(&self) -> usize {
        self.items[0].num_inputs()
    }

    /// Output arity of the chain (the last stage's outputs).
    pub fn num_outputs(&self) -> usize {
        self.items[self.items.len() - 1].num_outputs()
    }

    /// Write a tensor into stage 0's input slot. No cross-thread
    /// synchronization is involved: stage 0 is driven by the caller only.
    pub fn set_input(&self, input_index: usize, tensor: Tensor) -> Result<()> {
        self.items[0].set_stage_input(input_index, tensor)
    }

    /// Write a tensor into a named input of stage 0.
    pub fn set_input_named(&self, name: &str, tensor: Tensor) -> Result<()> {
        let index = self.items[0]
            .resolve_input_name(name)
            .ok_or_else(|| PipelineError::UnknownInput(name.to_string()))?;
        self.items[0].set_stage_input(index, tensor)
    }

    /// Diagnostic: read the current value of any stage's input slot.
    pub fn get_input(&self, stage_index: usize, input_index: usize) -> Result<Option<Tensor>> {
        let item = self
            .items
            .get(stage_index)
            .ok_or(PipelineError::InvalidSlot {
                stage: stage_index,
                index: input_index,
            })?;
        item.get_stage_input(input_index)
    }

    /// Execute stage 0 synchronously on the calling thread and route its
    /// outputs downstream. Returns once the outputs are enqueued — it does
    /// not wait for the rest of the chain.
    ///
    /// A stage 0 failure is as fatal as any other stage's: the failure is
    /// latched and the rest of the chain is torn down.
    pub fn run(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(PipelineError::Closed);
        }
        if let Some(err) = self.take_failure() {
            return Err(err);
        }

        let outputs = match self.items[0].run_direct() {
            Ok(outputs) => outputs,
            Err(err) => {
                self.latch_failure(&err);
                teardown(&self.items);
                return Err(err);
            }
        };
        route_outputs(&self.table, 0, &outputs, &self.items);
        Ok(())
    }

    /// Poll the chain's final outputs.
    ///
    /// Returns `Ok(Some(tensors))` (ordered by final output slot) when a
    /// batch is available. With `synchronous == false` the call never
    /// blocks and returns `Ok(None)` when nothing is ready. With
    /// `synchronous == true` it blocks until data arrives or the chain
    /// shuts down, in which case it reports the failure or `Closed`.
    pub fn get_output(&self, synchronous: bool) -> Result<Option<Vec<Tensor>>> {
        let sink = &self.items[0];

        loop {
            if let Some(batch) = sink.queue.poll() {
                let tensors = batch.entries.into_iter().map(|(_, t)| t).collect();
                return Ok(Some(tensors));
            }

            if let Some(err) = self.take_failure() {
                return Err(err);
            }
            if self.stopped.load(Ordering::Acquire) || sink.notifier.exit_requested() {
                return Err(PipelineError::Closed);
            }
            if !synchronous {
                return Ok(None);
            }

            // Block until a data-ready or exit notification; re-poll once
            // more after an exit so buffered output is never lost.
            if !sink.notifier.wait(false) {
                if let Some(batch) = sink.queue.poll() {
                    let tensors = batch.entries.into_iter().map(|(_, t)| t).collect();
                    return Ok(Some(tensors));
                }
                if let Some(err) = self.take_failure() {
                    return Err(err);
                }
                return Err(PipelineError::Closed);
            }
        }
    }

    /// Shut the chain down: issue the exit notification at the ring entry,
    /// unblock every queue, and join all workers. Idempotent; buffered
    /// final outputs remain pollable afterwards.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!("stopping pipeline");

        // The exit notification enters the ring at the first worker and
        // propagates around it; closing the queues unblocks any worker
        // stuck on a full push so shutdown time stays bounded.
        let entry = if self.items.len() > 1 { 1 } else { 0 };
        self.items[entry].notifier.notify_exit();
        for item in &self.items {
            item.queue.close();
        }

        let workers = {
            let mut guard = self.workers.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("a pipeline worker panicked during shutdown");
            }
        }
        tracing::info!("pipeline stopped");
    }

    /// Record a stage failure observed on the caller's own thread.
    fn latch_failure(&self, err: &PipelineError) {
        if let PipelineError::StageExecution { stage, message } = err {
            let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
            if failure.is_none() {
                *failure = Some(PipelineError::StageExecution {
                    stage: *stage,
                    message: message.clone(),
                });
            }
        }
    }

    /// First stage failure reported by a worker, if any. Drains the event
    /// channel as a side effect.
    fn take_failure(&self) -> Option<PipelineError> {
        let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        while let Ok(event) = self.events.try_recv() {
            match event {
                EngineEvent::StageFailed { stage, message } => {
                    if failure.is_none() {
                        *failure = Some(PipelineError::StageExecution { stage, message });
                    }
                }
                EngineEvent::WorkerExited { stage } => {
                    tracing::debug!("stage {} worker exited", stage);
                }
            }
        }
        failure.as_ref().map(|err| match err {
            PipelineError::StageExecution { stage, message } => PipelineError::StageExecution {
                stage: *stage,
                message: message.clone(),
            },
            _ => PipelineError::Closed,
        })
    }
}

impl Drop for PipelineExecutor {
    fn drop(&mut self) {
        self.stop();
    }
}
