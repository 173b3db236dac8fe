pub mod batch;
pub mod error;
pub mod orchestrator;
pub mod ports;
pub mod types;

pub use batch::BatchRunner;
pub use error::{DecisionError, DecisionErrorKind};
pub use orchestrator::Orchestrator;
pub use ports::{
    AlternativeRequest, OraclePort, PermissionPort, ProfilePort, Recommendation,
    RecommendationRequest,
};
pub use types::{
    AllocationSummary, DecisionMode, DecisionResult, DecisionStatus, PipelineLimits,
    SelectedTreatment,
};
