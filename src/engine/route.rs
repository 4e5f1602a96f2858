//! Dependency-driven output routing.
//!
//! At init the dependency configuration is resolved into a [`RoutingTable`]:
//! for every stage output, the list of concrete targets (a downstream
//! stage's input slot, or a final output slot of the chain). All index
//! validation happens here, so a bad configuration is reported before any
//! thread starts.
//!
//! At run time [`route_outputs`] groups a stage's produced tensors into one
//! batch per target stage, pushes each batch onto the target's inbound
//! queue and signals its notifier. Final outputs are staged per slot until
//! a run's full set is present, then delivered as one slot-ordered batch on
//! the external sink queue (stage 0's inbound queue, unused for data by
//! construction of the chain). Fan-out clones share the tensor payload.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::DependencyConfig;
use crate::engine::item::RuntimeItem;
use crate::error::{PipelineError, Result};
use crate::tensor::Tensor;

/// A batch of tensors travelling over one queue edge.
///
/// On a stage's inbound queue each entry is `(input_slot, tensor)`; on the
/// external sink queue each entry is `(final_output_slot, tensor)`.
#[derive(Debug, Clone)]
pub struct OutputBatch {
    pub entries: Vec<(usize, Tensor)>,
}

impl OutputBatch {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for OutputBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// A resolved consumer of one stage output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Feed input slot `input` of chain stage `stage` (0-based).
    StageInput { stage: usize, input: usize },
    /// Deliver as final output slot `slot` of the chain.
    FinalOutput { slot: usize },
}

/// Per-stage, per-output resolved routing targets, plus the staging area
/// assembling final outputs into complete per-run sets. The targets are
/// read-only after init.
#[derive(Debug)]
pub struct RoutingTable {
    // targets[stage][output_index] -> consumers
    targets: Vec<Vec<Vec<Target>>>,
    num_finals: usize,
    /// Per-final-slot FIFO; the fronts of all slots belong to the oldest
    /// run still missing a contribution.
    finals: Mutex<Vec<VecDeque<Tensor>>>,
}

impl RoutingTable {
    /// Resolve and validate a dependency configuration against the chain's
    /// stage arities (`arities[i]` = `(num_inputs, num_outputs)`).
    pub fn build(arities: &[(usize, usize)], config: &DependencyConfig) -> Result<Self> {
        let n = arities.len();
        if n == 0 {
            return Err(PipelineError::config("pipeline needs at least one stage"));
        }

        let mut targets: Vec<Vec<Vec<Target>>> = arities
            .iter()
            .map(|&(_, outs)| vec![Vec::new(); outs])
            .collect();

        // input_feeds[stage][input] counts producers; every input of every
        // non-first stage must end up fed exactly once.
        let mut input_feeds: Vec<Vec<usize>> =
            arities.iter().map(|&(ins, _)| vec![0; ins]).collect();
        let mut final_slots: Vec<usize> = Vec::new();

        for stage_conf in &config.stages {
            if stage_conf.stage_index == 0 || stage_conf.stage_index > n {
                return Err(PipelineError::config(format!(
                    "dependency entry references stage {} of a {}-stage chain",
                    stage_conf.stage_index, n
                )));
            }
            let producer = stage_conf.stage_index - 1;
            let num_outputs = arities[producer].1;

            for output_conf in &stage_conf.outputs {
                if output_conf.output_index >= num_outputs {
                    return Err(PipelineError::config(format!(
                        "stage {} has {} outputs, output {} configured",
                        producer, num_outputs, output_conf.output_index
                    )));
                }
                let slot_targets = &mut targets[producer][output_conf.output_index];

                for dep in &output_conf.dependents {
                    if dep.stage_index == 0 {
                        if final_slots.contains(&dep.input_index) {
                            return Err(PipelineError::config(format!(
                                "final output slot {} declared twice",
                                dep.input_index
                            )));
                        }
                        final_slots.push(dep.input_index);
                        slot_targets.push(Target::FinalOutput {
                            slot: dep.input_index,
                        });
                        continue;
                    }

                    if dep.stage_index > n {
                        return Err(PipelineError::config(format!(
                            "output {} of stage {} depends on missing stage {}",
                            output_conf.output_index, producer, dep.stage_index
                        )));
                    }
                    let consumer = dep.stage_index - 1;
                    if consumer <= producer {
                        return Err(PipelineError::config(format!(
                            "dependency from stage {} to stage {} flows backwards",
                            producer, consumer
                        )));
                    }
                    if dep.input_index >= arities[consumer].0 {
                        return Err(PipelineError::config(format!(
                            "stage {} has {} inputs, input {} configured",
                            consumer, arities[consumer].0, dep.input_index
                        )));
                    }
                    input_feeds[consumer][dep.input_index] += 1;
                    slot_targets.push(Target::StageInput {
                        stage: consumer,
                        input: dep.input_index,
                    });
                }
            }
        }

        // Last-stage outputs with no declared dependents are implicitly
        // final; elsewhere an unconsumed output is a debug output and is
        // dropped at run time.
        let last = n - 1;
        for (output_index, slot_targets) in targets[last].iter_mut().enumerate() {
            if slot_targets.is_empty() {
                if final_slots.contains(&output_index) {
                    return Err(PipelineError::config(format!(
                        "implicit final output {} collides with a declared final slot",
                        output_index
                    )));
                }
                final_slots.push(output_index);
                slot_targets.push(Target::FinalOutput { slot: output_index });
            }
        }
        for (stage, stage_targets) in targets.iter().enumerate().take(last) {
            for (output_index, slot_targets) in stage_targets.iter().enumerate() {
                if slot_targets.is_empty() {
                    tracing::warn!(
                        "stage {} output {} has no dependents and will be dropped",
                        stage,
                        output_index
                    );
                }
            }
        }

        // Final slots must form a dense 0..k range so a delivered batch is
        // a complete, slot-ordered set.
        let num_finals = final_slots.len();
        for slot in 0..num_finals {
            if !final_slots.contains(&slot) {
                return Err(PipelineError::config(format!(
                    "{} final output slots declared but slot {} is missing",
                    num_finals, slot
                )));
            }
        }

        for (stage, feeds) in input_feeds.iter().enumerate().skip(1) {
            for (input, &count) in feeds.iter().enumerate() {
                if count == 0 {
                    return Err(PipelineError::config(format!(
                        "input {} of stage {} is never fed",
                        input, stage
                    )));
                }
                if count > 1 {
                    return Err(PipelineError::config(format!(
                        "input {} of stage {} is fed by {} outputs",
                        input, stage, count
                    )));
                }
            }
        }

        Ok(Self {
            targets,
            num_finals,
            finals: Mutex::new(vec![VecDeque::new(); num_finals]),
        })
    }

    /// Resolved consumers of one stage output.
    pub fn targets(&self, stage: usize, output_index: usize) -> &[Target] {
        &self.targets[stage][output_index]
    }

    /// Number of final output slots of the chain.
    pub fn num_finals(&self) -> usize {
        self.num_finals
    }

    fn num_stages(&self) -> usize {
        self.targets.len()
    }

    /// Stage final-output tensors per slot; whenever every slot has a
    /// value for the oldest run, deliver that complete set, ordered by
    /// slot, on the sink queue.
    fn stage_finals(&self, entries: Vec<(usize, Tensor)>, sink: &RuntimeItem) {
        if self.num_finals == 0 {
            return;
        }
        let mut staged = self.finals.lock().unwrap_or_else(|e| e.into_inner());
        for (slot, tensor) in entries {
            staged[slot].push_back(tensor);
        }
        while staged.iter().all(|slot| !slot.is_empty()) {
            let mut batch = OutputBatch::new();
            for (slot, queue) in staged.iter_mut().enumerate() {
                if let Some(tensor) = queue.pop_front() {
                    batch.entries.push((slot, tensor));
                }
            }
            if sink.queue.push(batch) {
                sink.notifier.notify();
            }
        }
    }
}

/// Route one `run()`'s outputs to their consumers.
///
/// Pushes exactly one batch per target stage per invocation (exactly-once
/// delivery) and notifies each target so an idle worker wakes up. A full
/// target queue blocks here — this is the chain's backpressure point.
pub fn route_outputs(
    table: &RoutingTable,
    producer: usize,
    outputs: &[(usize, Tensor)],
    items: &[Arc<RuntimeItem>],
) {
    let n = table.num_stages();
    let mut per_stage: Vec<Option<OutputBatch>> = vec![None; n];
    let mut finals: Vec<(usize, Tensor)> = Vec::new();

    for (output_index, tensor) in outputs {
        for target in table.targets(producer, *output_index) {
            match *target {
                Target::StageInput { stage, input } => per_stage[stage]
                    .get_or_insert_with(OutputBatch::new)
                    .entries
                    .push((input, tensor.clone())),
                Target::FinalOutput { slot } => finals.push((slot, tensor.clone())),
            }
        }
    }

    for (stage, batch) in per_stage.into_iter().enumerate() {
        if let Some(batch) = batch {
            if items[stage].queue.push(batch) {
                items[stage].notifier.notify();
            }
        }
    }
    if !finals.is_empty() {
        // The sink queue is stage 0's inbound queue; the caller polls it.
        table.stage_finals(finals, &items[0]);
    }
}
