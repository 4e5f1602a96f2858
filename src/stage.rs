//! Stage abstraction for the pipeline.
//!
//! A stage is an opaque, independently-compiled compute unit. The engine
//! only drives its lifecycle: set inputs, run, read outputs. The actual
//! numeric compute is a collaborator behind the [`StageModule`] trait.
//!
//! [`FnStage`] is a closure-backed implementation for embedding hosts and
//! tests that don't carry a full compiled module.

use crate::error::{PipelineError, Result};
use crate::tensor::Tensor;

/// An opaque compute unit executed by the pipeline.
///
/// `run()` is synchronous; the engine never invokes it concurrently on the
/// same stage. A failing `run()` is fatal to the whole chain — the worker
/// loop does not catch or retry it.
pub trait StageModule: Send {
    /// Human-readable name of this stage.
    fn name(&self) -> &str;

    /// Number of input slots.
    fn num_inputs(&self) -> usize;

    /// Number of output slots.
    fn num_outputs(&self) -> usize;

    /// Write a tensor into an input slot.
    fn set_input(&mut self, index: usize, tensor: Tensor) -> Result<()>;

    /// Read back the current value of an input slot (diagnostic).
    fn get_input(&self, index: usize) -> Option<Tensor>;

    /// Read an output produced by the last `run()`.
    fn get_output(&self, index: usize) -> Option<Tensor>;

    /// Execute the stage's compute on the currently set inputs.
    fn run(&mut self) -> Result<()>;

    /// Resolve an input name to its slot index, if the stage names inputs.
    fn input_index_of(&self, _name: &str) -> Option<usize> {
        None
    }
}

/// Compute callback type for [`FnStage`].
pub type StageFn = Box<dyn FnMut(&[Tensor]) -> Result<Vec<Tensor>> + Send>;

/// A stage backed by a closure.
///
/// Inputs are staged into slots; `run()` requires every slot to be set and
/// expects the closure to return exactly `num_outputs` tensors.
pub struct FnStage {
    name: String,
    inputs: Vec<Option<Tensor>>,
    input_names: Vec<String>,
    outputs: Vec<Option<Tensor>>,
    func: StageFn,
}

impl FnStage {
    /// Create a stage with the given arity and compute closure.
    pub fn new<F>(name: impl Into<String>, num_inputs: usize, num_outputs: usize, func: F) -> Self
    where
        F: FnMut(&[Tensor]) -> Result<Vec<Tensor>> + Send + 'static,
    {
        Self {
            name: name.into(),
            inputs: vec![None; num_inputs],
            input_names: Vec::new(),
            outputs: vec![None; num_outputs],
            func: Box::new(func),
        }
    }

    /// Assign names to the input slots, in order.
    pub fn with_input_names<S: Into<String>>(mut self, names: Vec<S>) -> Self {
        self.input_names = names.into_iter().map(Into::into).collect();
        self
    }
}

impl StageModule for FnStage {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    fn set_input(&mut self, index: usize, tensor: Tensor) -> Result<()> {
        match self.inputs.get_mut(index) {
            Some(slot) => {
                *slot = Some(tensor);
                Ok(())
            }
            None => Err(PipelineError::InvalidSlot { stage: 0, index }),
        }
    }

    fn get_input(&self, index: usize) -> Option<Tensor> {
        self.inputs.get(index)?.clone()
    }

    fn get_output(&self, index: usize) -> Option<Tensor> {
        self.outputs.get(index)?.clone()
    }

    fn run(&mut self) -> Result<()> {
        let mut staged = Vec::with_capacity(self.inputs.len());
        for (i, slot) in self.inputs.iter().enumerate() {
            match slot {
                Some(t) => staged.push(t.clone()),
                None => {
                    return Err(PipelineError::StageExecution {
                        stage: 0,
                        message: format!("input {} not set before run", i),
                    })
                }
            }
        }

        let produced = (self.func)(&staged)?;
        if produced.len() != self.outputs.len() {
            return Err(PipelineError::StageExecution {
                stage: 0,
                message: format!(
                    "stage '{}' produced {} outputs, expected {}",
                    self.name,
                    produced.len(),
                    self.outputs.len()
                ),
            });
        }

        for (slot, tensor) in self.outputs.iter_mut().zip(produced) {
            *slot = Some(tensor);
        }
        Ok(())
    }

    fn input_index_of(&self, name: &str) -> Option<usize> {
        self.input_names.iter().position(|n| n == name)
    }
}
