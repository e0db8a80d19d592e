//! Deployment orchestration.

use std::sync::Arc;

use riser_id::RiserRevision;
use riser_state_repo::{CommitOutcome, Committer, DryRunCommit, DryRunCommitter, ResourceFile};
use riser_traffic::{compute_next_state, next_traffic, NextState, RolloutRequest, TrafficConfig};
use tracing::{info, instrument, warn};

use super::error::DeploymentError;
use super::model::{
    DeploymentRecord, DeploymentRequest, DeploymentStatus, Reservation, StatusUpdate,
};
use super::render::{DesiredState, ResourceRenderer};
use crate::db::DbError;
use crate::reservation::ReservationManager;
use crate::store::{DeploymentStore, ReservationStore};

/// Result of [`DeploymentService::deploy`].
#[derive(Debug, Clone)]
pub struct DeployOutcome {
    /// The revision that was rolled out; [`RiserRevision::DRY_RUN`] for dry runs.
    pub riser_revision: RiserRevision,
    pub traffic: TrafficConfig,
    pub commit: CommitOutcome,
    /// For dry runs, the commit that would have been published.
    pub dry_run_commits: Vec<DryRunCommit>,
}

/// Coordinates reservations, record stores, rendering and the committer.
///
/// A deploy runs: reserve name, load record, compute next state, persist,
/// render, commit. The persist steps are individually atomic but not
/// transactional as a group; a failure after the revision increment leaves
/// the increment in place.
pub struct DeploymentService {
    reservations: ReservationManager,
    deployments: Arc<dyn DeploymentStore>,
    renderer: Arc<dyn ResourceRenderer>,
    committer: Arc<dyn Committer>,
}

impl DeploymentService {
    pub fn new(
        reservations: Arc<dyn ReservationStore>,
        deployments: Arc<dyn DeploymentStore>,
        renderer: Arc<dyn ResourceRenderer>,
        committer: Arc<dyn Committer>,
    ) -> Self {
        Self {
            reservations: ReservationManager::new(reservations),
            deployments,
            renderer,
            committer,
        }
    }

    /// Roll out `request`. Dry runs compute and render everything but make no
    /// store mutations (not even the name reservation) and publish nothing.
    #[instrument(
        skip(self, request),
        fields(
            name = %request.name,
            namespace = %request.namespace,
            stage = %request.stage
        )
    )]
    pub async fn deploy(
        &self,
        request: &DeploymentRequest,
        dry_run: bool,
    ) -> Result<DeployOutcome, DeploymentError> {
        request.validate()?;
        let (name, stage) = (request.name.as_str(), request.stage.as_str());

        let reservation = if dry_run {
            self.reservations
                .check_reservation(request.app_id, name, &request.namespace)
                .await?
        } else {
            self.reservations
                .ensure_reservation(request.app_id, name, &request.namespace)
                .await?
        };

        let record = self
            .deployments
            .get_by_reservation(reservation.id, stage)
            .await
            .map_err(|source| DeploymentError::Retrieve {
                name: name.to_string(),
                stage: stage.to_string(),
                source,
            })?;

        let next = compute_next_state(
            RolloutRequest {
                name,
                manual_rollout: request.manual_rollout,
                dry_run,
            },
            record.as_ref().map(DeploymentRecord::prior),
        );

        let (riser_revision, traffic) = if dry_run {
            (next.riser_revision, next.traffic)
        } else {
            self.persist(&reservation, request, record.as_ref(), next)
                .await?
        };

        let files = self
            .renderer
            .render(&DesiredState {
                reservation: &reservation,
                stage,
                riser_revision,
                traffic: &traffic,
                config: &request.config,
            })
            .map_err(|source| DeploymentError::Render {
                name: name.to_string(),
                stage: stage.to_string(),
                source,
            })?;

        let message = format!("Updating resources for \"{name}\" in stage \"{stage}\"");
        let (commit, dry_run_commits) = if dry_run {
            let preview = DryRunCommitter::new();
            let commit = self.dispatch(&preview, name, stage, &message, files).await?;
            (commit, preview.take_commits())
        } else {
            let commit = self
                .dispatch(self.committer.as_ref(), name, stage, &message, files)
                .await?;
            (commit, Vec::new())
        };

        info!(
            riser_revision = %riser_revision,
            commit = commit.hash().unwrap_or("none"),
            "Deployment rolled out"
        );

        Ok(DeployOutcome {
            riser_revision,
            traffic,
            commit,
            dry_run_commits,
        })
    }

    /// Remove a deployment from a stage.
    ///
    /// The removal is committed before the record is soft deleted, so a
    /// failed commit leaves the deployment intact and the delete retryable.
    #[instrument(skip(self))]
    pub async fn delete(
        &self,
        name: &str,
        namespace: &str,
        stage: &str,
    ) -> Result<CommitOutcome, DeploymentError> {
        let record = self.find_active(name, namespace, stage).await?;

        let files = self.renderer.render_removal(name, namespace, stage);
        let message = format!("Deleting resources for \"{name}\" in stage \"{stage}\"");
        let commit = self
            .dispatch(self.committer.as_ref(), name, stage, &message, files)
            .await?;

        self.deployments
            .soft_delete(record.id)
            .await
            .map_err(|source| DeploymentError::Delete {
                name: name.to_string(),
                stage: stage.to_string(),
                source,
            })?;

        info!(deployment_id = %record.id, "Deployment deleted");
        Ok(commit)
    }

    /// Record a status report unless a newer one is already stored.
    #[instrument(
        skip(self, status),
        fields(observed_riser_revision = %status.observed_riser_revision)
    )]
    pub async fn update_status(
        &self,
        name: &str,
        namespace: &str,
        stage: &str,
        status: &DeploymentStatus,
    ) -> Result<StatusUpdate, DeploymentError> {
        let record = self.find_active(name, namespace, stage).await?;

        let update = self
            .deployments
            .update_status(record.id, status)
            .await
            .map_err(|source| DeploymentError::UpdateStatus {
                name: name.to_string(),
                stage: stage.to_string(),
                source,
            })?;

        if !update.is_applied() {
            info!("Ignored status for an older revision");
        }
        Ok(update)
    }

    /// Check that the record store is reachable.
    pub async fn health_check(&self) -> Result<(), DbError> {
        self.deployments.health_check().await
    }

    /// Write the next state. Returns the authoritative revision and traffic.
    async fn persist(
        &self,
        reservation: &Reservation,
        request: &DeploymentRequest,
        record: Option<&DeploymentRecord>,
        next: NextState,
    ) -> Result<(RiserRevision, TrafficConfig), DeploymentError> {
        let (name, namespace, stage) = (
            request.name.as_str(),
            request.namespace.as_str(),
            request.stage.as_str(),
        );

        let record = match record {
            Some(record) if !record.is_deleted() => record,
            _ => {
                let fresh = DeploymentRecord::new(
                    reservation,
                    stage,
                    next.riser_revision,
                    next.traffic.clone(),
                );
                self.deployments.create(&fresh).await.map_err(|source| {
                    DeploymentError::Create {
                        name: name.to_string(),
                        stage: stage.to_string(),
                        source,
                    }
                })?;
                return Ok((next.riser_revision, next.traffic));
            }
        };

        let riser_revision = self
            .deployments
            .increment_revision(name, namespace, stage)
            .await
            .map_err(|source| DeploymentError::IncrementRevision {
                name: name.to_string(),
                stage: stage.to_string(),
                source,
            })?;

        // A concurrent deploy may have advanced the counter since the record
        // was read; the split must name the revision the store handed out.
        let traffic = if riser_revision == next.riser_revision {
            next.traffic
        } else {
            warn!(
                expected = %next.riser_revision,
                actual = %riser_revision,
                "Revision advanced concurrently, recomputing traffic"
            );
            next_traffic(
                name,
                request.manual_rollout,
                Some(record.prior()),
                riser_revision,
            )
        };

        self.deployments
            .update_traffic(name, namespace, stage, &traffic)
            .await
            .map_err(|source| DeploymentError::UpdateTraffic {
                name: name.to_string(),
                stage: stage.to_string(),
                source,
            })?;

        Ok((riser_revision, traffic))
    }

    async fn find_active(
        &self,
        name: &str,
        namespace: &str,
        stage: &str,
    ) -> Result<DeploymentRecord, DeploymentError> {
        let not_found = || DeploymentError::DeploymentNotFound {
            name: name.to_string(),
            namespace: namespace.to_string(),
            stage: stage.to_string(),
        };
        let retrieve = |source: DbError| DeploymentError::Retrieve {
            name: name.to_string(),
            stage: stage.to_string(),
            source,
        };

        let reservation = self
            .reservations
            .find(name, namespace)
            .await
            .map_err(retrieve)?
            .ok_or_else(not_found)?;

        self.deployments
            .get_by_reservation(reservation.id, stage)
            .await
            .map_err(retrieve)?
            .filter(|record| !record.is_deleted())
            .ok_or_else(not_found)
    }

    async fn dispatch(
        &self,
        committer: &dyn Committer,
        name: &str,
        stage: &str,
        message: &str,
        files: Vec<ResourceFile>,
    ) -> Result<CommitOutcome, DeploymentError> {
        committer
            .commit(message, files)
            .await
            .map_err(|source| DeploymentError::Commit {
                name: name.to_string(),
                stage: stage.to_string(),
                source,
            })
    }
}
