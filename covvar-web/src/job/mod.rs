//! Job lifecycle: model, status tracking, tool invocation, result
//! reconciliation and background execution.

pub mod invoker;
pub mod model;
pub mod reconciler;
pub mod runner;
pub mod status;

pub use invoker::{
    CommandRunner, PipelineFailure, PipelineInvoker, PipelineOutcome, ProcessRunner, RunMode,
    ToolCommand, ToolOutcome,
};
pub use model::{Job, JobOptions, PHASE_COUNT, PhaseSelection, SequenceType, Thresholds};
pub use reconciler::{MANIFEST_FILE_NAME, ResultManifest, ResultReconciler};
pub use runner::{JobHandle, JobRunner};
pub use status::{JobStatus, STATUS_FILE_NAME, StatusRecord, StatusTracker, read_status};
