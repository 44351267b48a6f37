use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegenError {
    #[error("invalid id '{0}': must be lowercase alphanumeric segments separated by '/'")]
    InvalidId(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("approval not found: {0}")]
    ApprovalNotFound(String),

    #[error("reviewer '{reviewer}' is not eligible to review approval {approval_id}")]
    ReviewerNotEligible {
        reviewer: String,
        approval_id: String,
    },

    #[error("approval {0} has expired")]
    ApprovalExpired(String),

    #[error("approval {id} is already {status}")]
    AlreadyDecided { id: String, status: String },

    #[error("reviewer '{reviewer}' already responded to approval {approval_id}")]
    DuplicateResponse {
        reviewer: String,
        approval_id: String,
    },

    #[error("backup already exists: {0}")]
    BackupExists(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("approval db error: {0}")]
    ApprovalDb(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("upstream call timed out: {0}")]
    Timeout(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RegenError {
    /// Precondition violations the caller should surface rather than retry.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RegenError::InvalidId(_)
                | RegenError::ApprovalNotFound(_)
                | RegenError::ReviewerNotEligible { .. }
                | RegenError::ApprovalExpired(_)
                | RegenError::AlreadyDecided { .. }
                | RegenError::DuplicateResponse { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, RegenError>;
