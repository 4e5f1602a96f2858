//! Dependency configuration for the pipeline chain.
//!
//! Parsing the textual form is a collaborator concern; the structures here
//! are the in-memory contract handed to the engine at init. They mirror the
//! source convention: stage indices are 1-based, and a dependent with
//! `stage_index == 0` designates a final (external) output of the chain,
//! with `input_index` naming the final output slot.
//!
//! The JSON form accepted by [`DependencyConfig::from_json`] follows the
//! same shape, e.g.:
//!
//! ```json
//! {
//!   "stages": [
//!     { "stage_index": 1, "outputs": [
//!       { "output_index": 0, "dependents": [
//!         { "stage_index": 2, "input_index": 0 } ] } ] }
//!   ]
//! }
//! ```

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// A single downstream consumer of a stage output.
///
/// `stage_index` is 1-based; 0 designates the chain's final output, in
/// which case `input_index` is the final output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependent {
    pub stage_index: usize,
    pub input_index: usize,
}

/// Dependents of one output slot of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDependencies {
    pub output_index: usize,
    #[serde(default)]
    pub dependents: Vec<Dependent>,
}

/// Dependency declarations for one stage, identified by 1-based index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDependencies {
    pub stage_index: usize,
    #[serde(default)]
    pub outputs: Vec<OutputDependencies>,
}

/// The full dependency table for a chain.
///
/// Stages without an entry contribute no declared dependents; for the last
/// stage that means every output is implicitly a final output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyConfig {
    #[serde(default)]
    pub stages: Vec<StageDependencies>,
}

impl DependencyConfig {
    /// An empty configuration (linear defaults only).
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `from_stage`'s output `output_index` feeds
    /// `to_stage`'s input `input_index`. Stage indices are 0-based here;
    /// the 1-based source convention is applied internally.
    pub fn depend(
        mut self,
        from_stage: usize,
        output_index: usize,
        to_stage: usize,
        input_index: usize,
    ) -> Self {
        self.push_dependent(
            from_stage,
            output_index,
            Dependent {
                stage_index: to_stage + 1,
                input_index,
            },
        );
        self
    }

    /// Declare that `from_stage`'s output `output_index` is the chain's
    /// final output `slot`.
    pub fn finalize(mut self, from_stage: usize, output_index: usize, slot: usize) -> Self {
        self.push_dependent(
            from_stage,
            output_index,
            Dependent {
                stage_index: 0,
                input_index: slot,
            },
        );
        self
    }

    fn push_dependent(&mut self, from_stage: usize, output_index: usize, dep: Dependent) {
        let key = from_stage + 1;
        let pos = match self.stages.iter().position(|s| s.stage_index == key) {
            Some(p) => p,
            None => {
                self.stages.push(StageDependencies {
                    stage_index: key,
                    outputs: Vec::new(),
                });
                self.stages.len() - 1
            }
        };
        let stage = &mut self.stages[pos];
        match stage
            .outputs
            .iter_mut()
            .find(|o| o.output_index == output_index)
        {
            Some(o) => o.dependents.push(dep),
            None => stage.outputs.push(OutputDependencies {
                output_index,
                dependents: vec![dep],
            }),
        }
    }

    /// Parse a configuration from its JSON form. Malformed structure
    /// (negative or missing indices, wrong types) is a configuration
    /// error, never a panic.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PipelineError::config(format!("invalid dependency config: {e}")))
    }

    /// Serialize to the JSON form.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Declared dependents for a 0-based stage/output pair, if any.
    pub fn dependents_of(&self, stage: usize, output_index: usize) -> &[Dependent] {
        self.stages
            .iter()
            .find(|s| s.stage_index == stage + 1)
            .and_then(|s| s.outputs.iter().find(|o| o.output_index == output_index))
            .map(|o| o.dependents.as_slice())
            .unwrap_or(&[])
    }
}

fn default_queue_capacity() -> usize {
    1024
}

/// Tunables for the executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorOptions {
    /// Capacity of each inter-stage queue. A full queue blocks the
    /// upstream push (backpressure). Must be at least 1.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}
