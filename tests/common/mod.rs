//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

use stagepipe::{FnStage, Result, StageModule, Tensor};
use std::sync::Once;

static TRACING: Once = Once::new();

/// Initialize tracing once for the whole test binary (respects RUST_LOG).
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A 1-in/1-out stage applying `f` element-wise.
pub fn map_stage<F>(name: &str, f: F) -> Box<dyn StageModule>
where
    F: Fn(f32) -> f32 + Send + 'static,
{
    Box::new(FnStage::new(name, 1, 1, move |inputs| {
        let out: Vec<f32> = inputs[0].data().iter().map(|v| f(*v)).collect();
        Ok(vec![Tensor::from_vec(out)])
    }))
}

/// A 2-in/1-out stage combining both inputs element-wise.
pub fn zip_stage<F>(name: &str, f: F) -> Box<dyn StageModule>
where
    F: Fn(f32, f32) -> f32 + Send + 'static,
{
    Box::new(FnStage::new(name, 2, 1, move |inputs| {
        let out: Vec<f32> = inputs[0]
            .data()
            .iter()
            .zip(inputs[1].data())
            .map(|(a, b)| f(*a, *b))
            .collect();
        Ok(vec![Tensor::from_vec(out)])
    }))
}

/// A stage whose `run()` always fails.
pub fn failing_stage(name: &str) -> Box<dyn StageModule> {
    Box::new(FnStage::new(name, 1, 1, |_| -> Result<Vec<Tensor>> {
        Err(stagepipe::PipelineError::StageExecution {
            stage: 0,
            message: "intentional failure".to_string(),
        })
    }))
}
