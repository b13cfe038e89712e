pub mod budget;
pub mod checkpoint;
pub mod compaction;
pub mod dispatch;
pub mod error;
pub mod recovery;
pub mod registry;
pub mod runner;
pub mod tools;
pub mod transcript;
pub mod truncate;

pub use budget::{CharEstimator, TokenBudget, TokenEstimator};
pub use checkpoint::{Checkpoint, CheckpointManager};
pub use error::EngineError;
pub use recovery::{resume, RecoverySource};
pub use registry::ToolRegistry;
pub use runner::{LoopState, Outcome, Session, SessionConfig, Termination};
pub use transcript::Transcript;
