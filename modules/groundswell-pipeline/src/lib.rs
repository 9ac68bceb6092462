pub mod jobs;
pub mod llm;
pub mod pipeline;
pub mod refiller;
pub mod registry;
pub mod stage;
pub mod stages;
pub mod state;
pub mod testing;
pub mod traits;
pub mod worker;

pub use llm::{LlmError, LlmGate};
pub use pipeline::{Pipeline, PipelineDeps, PipelineOptions, PipelineOutcome};
pub use refiller::QueueRefiller;
pub use registry::ClusterRegistry;
pub use stage::{should_stop, Stage, StageOutcome};
pub use state::PipelineState;
