//! Pipeline Assembly, Classifier, and Pool (C10/C11/C12): everything that
//! turns a classified route into a concrete provider dispatch.

pub mod assembly;
pub mod classifier;
pub mod pool;

pub use assembly::{run_pipeline, PipelineInputs};
pub use pool::{PipelinePool, PoolPick};
