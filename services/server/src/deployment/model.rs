//! Deployment domain types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use riser_id::{AppId, DeploymentId, ReservationId, RiserRevision};
use riser_traffic::{PriorState, RecordState, TrafficConfig};
use serde::{Deserialize, Serialize};

use super::error::DeploymentError;

/// Longest accepted deployment name, namespace or stage.
const MAX_NAME_LEN: usize = 63;

// =============================================================================
// Reservation
// =============================================================================

/// Permanent ownership of a deployment name within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: ReservationId,
    pub app_id: AppId,
    pub name: String,
    pub namespace: String,
}

impl Reservation {
    pub fn new(app_id: AppId, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            id: ReservationId::new(),
            app_id,
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

// =============================================================================
// Deployment Record
// =============================================================================

/// Persisted per-stage state of a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub reservation_id: ReservationId,
    /// Deployment name, joined from the reservation.
    pub name: String,
    /// Namespace, joined from the reservation.
    pub namespace: String,
    pub stage: String,
    pub riser_revision: RiserRevision,
    pub traffic: TrafficConfig,
    pub status: Option<DeploymentStatus>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DeploymentRecord {
    /// A new active record for `reservation` in `stage`.
    pub fn new(
        reservation: &Reservation,
        stage: impl Into<String>,
        riser_revision: RiserRevision,
        traffic: TrafficConfig,
    ) -> Self {
        Self {
            id: DeploymentId::new(),
            reservation_id: reservation.id,
            name: reservation.name.clone(),
            namespace: reservation.namespace.clone(),
            stage: stage.into(),
            riser_revision,
            traffic,
            status: None,
            deleted_at: None,
        }
    }

    pub fn state(&self) -> RecordState {
        if self.deleted_at.is_some() {
            RecordState::Deleted
        } else {
            RecordState::Active
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.state().is_deleted()
    }

    /// The view of this record the traffic engine starts from.
    pub fn prior(&self) -> PriorState<'_> {
        PriorState {
            riser_revision: self.riser_revision,
            traffic: &self.traffic,
            state: self.state(),
        }
    }
}

// =============================================================================
// Deployment Status
// =============================================================================

/// Rollout progress reported by the cluster-side agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    /// The highest riser revision the agent has observed.
    pub observed_riser_revision: RiserRevision,
    pub rollout_status: RolloutStatus,
    #[serde(default)]
    pub revisions: Vec<RevisionStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RolloutStatus {
    InProgress,
    Complete,
    Failed,
}

/// Status of a single revision in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionStatus {
    pub riser_revision: RiserRevision,
    pub revision_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_image: Option<String>,
    pub ready: bool,
}

/// Result of a conditional status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUpdate {
    /// The status was stored.
    Updated,

    /// The stored status had observed a newer revision; nothing changed.
    NotApplied,
}

impl StatusUpdate {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Updated)
    }
}

// =============================================================================
// Deployment Request
// =============================================================================

/// Application configuration published to the state repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    /// Container image reference, including its tag or digest.
    pub image: String,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

/// A request to roll out `config` as deployment `name` in `stage`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRequest {
    pub app_id: AppId,
    pub name: String,
    pub namespace: String,
    pub stage: String,
    #[serde(default)]
    pub manual_rollout: bool,
    #[serde(flatten)]
    pub config: DeploymentConfig,
}

impl DeploymentRequest {
    /// Check the fields that end up in repository paths and resource names.
    pub fn validate(&self) -> Result<(), DeploymentError> {
        validate_name("name", &self.name)?;
        validate_name("namespace", &self.namespace)?;
        validate_name("stage", &self.stage)?;
        if self.config.image.trim().is_empty() {
            return Err(DeploymentError::InvalidRequest {
                field: "image",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Names are DNS labels: lowercase alphanumerics and `-`, starting with a
/// letter and not ending with `-`.
pub fn validate_name(field: &'static str, value: &str) -> Result<(), DeploymentError> {
    let invalid = |reason: &str| DeploymentError::InvalidRequest {
        field,
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(invalid("must be at most 63 characters"));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid(
            "must contain only lowercase letters, digits and '-'",
        ));
    }
    if !value.starts_with(|c: char| c.is_ascii_lowercase()) || value.ends_with('-') {
        return Err(invalid("must start with a letter and not end with '-'"));
    }
    Ok(())
}
