use crate::config::ValidationError;
use crate::snapshot::SnapshotError;

/// Errors that stop the control plane from starting or serving
#[derive(thiserror::Error, Debug)]
pub enum ControlPlaneError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(#[from] SnapshotError),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
