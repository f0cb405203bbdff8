//! Error taxonomy for plan ingestion.
//!
//! Stage-level errors ([`MalformedPlanError`], [`StaleSubmissionError`],
//! [`GraphError`]) are separate types so each stage can be used on its
//! own. The coordinator folds them into [`IngestError`], whose variants
//! map one-to-one onto client-fault and server-fault responses.

use thiserror::Error;

use crate::models::CloudPlatform;

/// The raw plan was not a JSON object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("terraform_plan must be a JSON object, found {found}")]
pub struct MalformedPlanError {
    pub found: &'static str,
}

/// The incoming plan does not advance past the latest accepted plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "stale plan: timestamp {incoming} is not newer than latest plan {latest} \
     for component {component_id} in {environment}"
)]
pub struct StaleSubmissionError {
    pub component_id: String,
    pub environment: String,
    pub incoming: String,
    pub latest: String,
}

/// Structural failures while walking a plan's configuration tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("configuration nesting exceeds depth limit of {0}")]
    DepthExceeded(usize),
}

/// Client-fault conflicts the caller can retry after resolving.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConflictError {
    #[error("ambiguous component name '{name}': {matches} components match")]
    AmbiguousComponent { name: String, matches: usize },

    #[error(transparent)]
    Stale(#[from] StaleSubmissionError),

    #[error("platform mismatch: project is '{project}' but uploaded plan is '{plan}'")]
    PlatformMismatch {
        project: CloudPlatform,
        plan: CloudPlatform,
    },
}

/// Every way an ingestion can fail.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Bad or missing input. Never retried.
    #[error("{0}")]
    Validation(String),

    /// Unknown component or project.
    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// The authenticated project does not own the target component.
    #[error("{0}")]
    Forbidden(String),

    /// The pruned projection is still over the index's item size limit.
    #[error("plan too large: projection is {size} bytes, limit is {limit} bytes")]
    Capacity { size: usize, limit: usize },

    /// Artifact or index store failure.
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl From<MalformedPlanError> for IngestError {
    fn from(err: MalformedPlanError) -> Self {
        IngestError::Validation(err.to_string())
    }
}

impl From<StaleSubmissionError> for IngestError {
    fn from(err: StaleSubmissionError) -> Self {
        IngestError::Conflict(ConflictError::Stale(err))
    }
}

impl IngestError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::Validation(_) => "bad_request",
            IngestError::NotFound(_) => "not_found",
            IngestError::Conflict(ConflictError::AmbiguousComponent { .. }) => "ambiguous",
            IngestError::Conflict(ConflictError::Stale(_)) => "stale_plan",
            IngestError::Conflict(ConflictError::PlatformMismatch { .. }) => "platform_mismatch",
            IngestError::Forbidden(_) => "forbidden",
            IngestError::Capacity { .. } => "too_large",
            IngestError::Storage(_) => "internal",
        }
    }

    /// Whether the failure is the caller's fault.
    pub fn is_client_fault(&self) -> bool {
        !matches!(self, IngestError::Storage(_))
    }
}
