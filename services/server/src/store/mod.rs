//! Record store contracts.
//!
//! The orchestrator talks to persistence through these traits so it can run
//! against Postgres ([`crate::db`]) in production and [`MemoryStore`] in
//! tests. Implementations must make every single method atomic; no method
//! spans more than one row change.

mod memory;

pub use memory::{MemoryStore, StoreOp};

use async_trait::async_trait;
use riser_id::{DeploymentId, ReservationId, RiserRevision};
use riser_traffic::TrafficConfig;

use crate::db::DbError;
use crate::deployment::{DeploymentRecord, DeploymentStatus, Reservation, StatusUpdate};

/// Storage for deployment name reservations.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn get_by_name(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Reservation>, DbError>;

    /// Insert a reservation. A reservation for the same `(name, namespace)`
    /// fails with [`DbError::UniqueViolation`].
    async fn create(&self, reservation: &Reservation) -> Result<(), DbError>;
}

/// Storage for per-stage deployment records.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// The record for `reservation_id` in `stage`, including soft-deleted ones.
    async fn get_by_reservation(
        &self,
        reservation_id: ReservationId,
        stage: &str,
    ) -> Result<Option<DeploymentRecord>, DbError>;

    /// Insert `record`, or revive a soft-deleted record for the same
    /// reservation and stage with the new revision and traffic and no status.
    ///
    /// Returns the id of the stored record, which is the existing id when a
    /// record was revived. An active record for the same reservation and
    /// stage fails with [`DbError::UniqueViolation`].
    async fn create(&self, record: &DeploymentRecord) -> Result<DeploymentId, DbError>;

    /// Atomically advance the revision counter of an active record and
    /// return the new value.
    async fn increment_revision(
        &self,
        name: &str,
        namespace: &str,
        stage: &str,
    ) -> Result<RiserRevision, DbError>;

    /// Move the revision counter back to `riser_revision` if it is ahead.
    async fn rollback_revision(
        &self,
        name: &str,
        namespace: &str,
        stage: &str,
        riser_revision: RiserRevision,
    ) -> Result<(), DbError>;

    /// Replace the traffic config of an active record.
    async fn update_traffic(
        &self,
        name: &str,
        namespace: &str,
        stage: &str,
        traffic: &TrafficConfig,
    ) -> Result<(), DbError>;

    /// Store `status` unless the stored status has observed a newer revision.
    async fn update_status(
        &self,
        id: DeploymentId,
        status: &DeploymentStatus,
    ) -> Result<StatusUpdate, DbError>;

    /// Mark an active record deleted.
    async fn soft_delete(&self, id: DeploymentId) -> Result<(), DbError>;

    /// Check that the store is reachable.
    async fn health_check(&self) -> Result<(), DbError>;
}
