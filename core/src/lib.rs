//! # Chainscan Core
//!
//! The pipeline engine behind `chainscan`.
//!
//! * **[`runner`]**: the orchestrator. Groups targets by apex, runs stages in
//!   order and chains produced targets into later stages.
//! * **[`stage`]**: the executor abstraction, the process-backed
//!   [`ShellStage`](stage::ShellStage) and the name lookup registry.
//! * **[`output`]**: persistence of raw stage results.
//! * **[`progress`]**: live table, verbose event lines and the prefixing
//!   line writer.
//! * **[`error`]**: run level error taxonomy.

pub mod error;
pub mod output;
pub mod progress;
pub mod runner;
pub mod stage;

pub use error::{PipelineError, PipelineErrors};
pub use runner::Runner;
