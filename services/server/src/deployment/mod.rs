//! Deployment orchestration: the request and record model, rendering to
//! state repository files, and the [`DeploymentService`] tying reservations,
//! record stores and the committer together.

mod error;
mod model;
mod render;
mod service;

pub use error::DeploymentError;
pub use model::{
    validate_name, DeploymentConfig, DeploymentRecord, DeploymentRequest, DeploymentStatus,
    Reservation, RevisionStatus, RolloutStatus, StatusUpdate,
};
pub use render::{
    config_path, resources_dir, DesiredState, ManifestRenderer, RenderError, ResourceRenderer,
    SpecHash,
};
pub use service::{DeployOutcome, DeploymentService};
