//! Deployment orchestration errors.

use riser_state_repo::StateRepoError;
use thiserror::Error;

use super::render::RenderError;
use crate::db::DbError;
use crate::reservation::ReservationError;

/// Errors returned by [`super::DeploymentService`].
///
/// Infrastructure variants name the step that failed along with the
/// deployment and stage, and keep the underlying error as their source.
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// A request field is malformed.
    #[error("invalid {field}: {reason}")]
    InvalidRequest { field: &'static str, reason: String },

    /// The name is owned by another app in this namespace.
    #[error("the deployment name \"{name}\" is already reserved by another app in namespace \"{namespace}\"")]
    NameAlreadyReserved { name: String, namespace: String },

    /// No active deployment exists for the name in this stage.
    #[error("deployment \"{name}\" not found in namespace \"{namespace}\" and stage \"{stage}\"")]
    DeploymentNotFound {
        name: String,
        namespace: String,
        stage: String,
    },

    #[error("error ensuring deployment reservation: {0}")]
    Reservation(#[source] DbError),

    #[error("error retrieving deployment \"{name}\" in stage \"{stage}\": {source}")]
    Retrieve {
        name: String,
        stage: String,
        #[source]
        source: DbError,
    },

    #[error("error creating deployment \"{name}\" in stage \"{stage}\": {source}")]
    Create {
        name: String,
        stage: String,
        #[source]
        source: DbError,
    },

    #[error("error incrementing revision for deployment \"{name}\" in stage \"{stage}\": {source}")]
    IncrementRevision {
        name: String,
        stage: String,
        #[source]
        source: DbError,
    },

    #[error("error updating traffic for deployment \"{name}\" in stage \"{stage}\": {source}")]
    UpdateTraffic {
        name: String,
        stage: String,
        #[source]
        source: DbError,
    },

    #[error("error updating status for deployment \"{name}\" in stage \"{stage}\": {source}")]
    UpdateStatus {
        name: String,
        stage: String,
        #[source]
        source: DbError,
    },

    #[error("error deleting deployment \"{name}\" in stage \"{stage}\": {source}")]
    Delete {
        name: String,
        stage: String,
        #[source]
        source: DbError,
    },

    #[error("error rendering resources for deployment \"{name}\" in stage \"{stage}\": {source}")]
    Render {
        name: String,
        stage: String,
        #[source]
        source: RenderError,
    },

    #[error("error committing resources for deployment \"{name}\" in stage \"{stage}\": {source}")]
    Commit {
        name: String,
        stage: String,
        #[source]
        source: StateRepoError,
    },
}

impl DeploymentError {
    /// The caller sent something that cannot succeed as-is.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest { .. }
                | Self::NameAlreadyReserved { .. }
                | Self::DeploymentNotFound { .. }
        )
    }

    /// Another writer won a race; retrying the whole request may succeed.
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Commit { source, .. } => source.is_conflict(),
            Self::Create { source, .. } => source.is_unique_violation(),
            _ => false,
        }
    }
}

impl From<ReservationError> for DeploymentError {
    fn from(err: ReservationError) -> Self {
        match err {
            ReservationError::AlreadyReserved { name, namespace } => {
                Self::NameAlreadyReserved { name, namespace }
            }
            ReservationError::Store(source) => Self::Reservation(source),
        }
    }
}
