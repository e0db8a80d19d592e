//! In-memory record stores for testing.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use riser_id::{DeploymentId, ReservationId, RiserRevision};
use riser_traffic::TrafficConfig;

use super::{DeploymentStore, ReservationStore};
use crate::db::DbError;
use crate::deployment::{DeploymentRecord, DeploymentStatus, Reservation, StatusUpdate};

/// A store operation, for call accounting and failure injection.
///
/// Only mutations are recorded; `HealthCheck` exists for failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    CreateReservation,
    CreateDeployment,
    IncrementRevision,
    RollbackRevision,
    UpdateTraffic,
    UpdateStatus,
    SoftDelete,
    HealthCheck,
}

/// Reservation and deployment store backed by hash maps.
///
/// Each method holds the relevant write lock for its whole read-modify-write,
/// giving the same per-call atomicity as the Postgres store. Successful
/// mutations are recorded so tests can assert which store calls a request
/// made. Data is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    reservations: RwLock<HashMap<(String, String), Reservation>>,
    deployments: RwLock<HashMap<DeploymentId, DeploymentRecord>>,
    ops: Mutex<Vec<StoreOp>>,
    fail_next: Mutex<HashSet<StoreOp>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with [`DbError::Unavailable`].
    pub fn fail_next(&self, op: StoreOp) {
        self.fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(op);
    }

    /// Successful mutations, in call order.
    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn op_count(&self, op: StoreOp) -> usize {
        self.ops().into_iter().filter(|o| *o == op).count()
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations
            .read()
            .map(|r| r.len())
            .unwrap_or_default()
    }

    fn begin(&self, op: StoreOp) -> Result<(), DbError> {
        let injected = self
            .fail_next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&op);
        if injected {
            return Err(DbError::Unavailable(format!("injected failure for {op:?}")));
        }
        Ok(())
    }

    fn record(&self, op: StoreOp) {
        self.ops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(op);
    }

    fn reservations(
        &self,
    ) -> Result<RwLockReadGuard<'_, HashMap<(String, String), Reservation>>, DbError> {
        self.reservations.read().map_err(|_| poisoned())
    }

    fn deployments_mut(
        &self,
    ) -> Result<RwLockWriteGuard<'_, HashMap<DeploymentId, DeploymentRecord>>, DbError> {
        self.deployments.write().map_err(|_| poisoned())
    }

    /// Apply `f` to the active record for `(name, namespace, stage)`.
    fn with_active<T>(
        &self,
        name: &str,
        namespace: &str,
        stage: &str,
        f: impl FnOnce(&mut DeploymentRecord) -> T,
    ) -> Result<T, DbError> {
        let reservation_id = self
            .reservations()?
            .get(&(name.to_string(), namespace.to_string()))
            .map(|r| r.id);

        let not_found = || DbError::NotFound {
            entity: "deployment",
            key: format!("{name}.{namespace} in {stage}"),
        };
        let reservation_id = reservation_id.ok_or_else(not_found)?;

        let mut deployments = self.deployments_mut()?;
        let record = deployments
            .values_mut()
            .find(|d| d.reservation_id == reservation_id && d.stage == stage && !d.is_deleted())
            .ok_or_else(not_found)?;
        Ok(f(record))
    }
}

fn poisoned() -> DbError {
    DbError::Unavailable("lock poisoned".to_string())
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn get_by_name(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Reservation>, DbError> {
        Ok(self
            .reservations()?
            .get(&(name.to_string(), namespace.to_string()))
            .cloned())
    }

    async fn create(&self, reservation: &Reservation) -> Result<(), DbError> {
        self.begin(StoreOp::CreateReservation)?;
        let mut reservations = self.reservations.write().map_err(|_| poisoned())?;

        let key = (reservation.name.clone(), reservation.namespace.clone());
        if reservations.contains_key(&key) {
            return Err(DbError::UniqueViolation {
                entity: "deployment reservation",
                key: format!("{}.{}", reservation.name, reservation.namespace),
            });
        }
        reservations.insert(key, reservation.clone());
        drop(reservations);

        self.record(StoreOp::CreateReservation);
        Ok(())
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn get_by_reservation(
        &self,
        reservation_id: ReservationId,
        stage: &str,
    ) -> Result<Option<DeploymentRecord>, DbError> {
        let deployments = self.deployments.read().map_err(|_| poisoned())?;
        Ok(deployments
            .values()
            .find(|d| d.reservation_id == reservation_id && d.stage == stage)
            .cloned())
    }

    async fn create(&self, record: &DeploymentRecord) -> Result<DeploymentId, DbError> {
        self.begin(StoreOp::CreateDeployment)?;
        let mut deployments = self.deployments_mut()?;

        let existing = deployments
            .values()
            .find(|d| d.reservation_id == record.reservation_id && d.stage == record.stage)
            .map(|d| (d.id, d.is_deleted()));

        let id = match existing {
            Some((_, false)) => {
                return Err(DbError::UniqueViolation {
                    entity: "deployment",
                    key: format!("{} in {}", record.name, record.stage),
                });
            }
            Some((id, true)) => {
                if let Some(existing) = deployments.get_mut(&id) {
                    existing.riser_revision = record.riser_revision;
                    existing.traffic = record.traffic.clone();
                    existing.status = None;
                    existing.deleted_at = None;
                }
                id
            }
            None => {
                let mut stored = record.clone();
                stored.deleted_at = None;
                deployments.insert(stored.id, stored);
                record.id
            }
        };
        drop(deployments);

        self.record(StoreOp::CreateDeployment);
        Ok(id)
    }

    async fn increment_revision(
        &self,
        name: &str,
        namespace: &str,
        stage: &str,
    ) -> Result<RiserRevision, DbError> {
        self.begin(StoreOp::IncrementRevision)?;
        let revision = self.with_active(name, namespace, stage, |record| {
            record.riser_revision = record.riser_revision.next();
            record.riser_revision
        })?;
        self.record(StoreOp::IncrementRevision);
        Ok(revision)
    }

    async fn rollback_revision(
        &self,
        name: &str,
        namespace: &str,
        stage: &str,
        riser_revision: RiserRevision,
    ) -> Result<(), DbError> {
        self.begin(StoreOp::RollbackRevision)?;
        self.with_active(name, namespace, stage, |record| {
            if record.riser_revision > riser_revision {
                record.riser_revision = riser_revision;
            }
        })?;
        self.record(StoreOp::RollbackRevision);
        Ok(())
    }

    async fn update_traffic(
        &self,
        name: &str,
        namespace: &str,
        stage: &str,
        traffic: &TrafficConfig,
    ) -> Result<(), DbError> {
        self.begin(StoreOp::UpdateTraffic)?;
        self.with_active(name, namespace, stage, |record| {
            record.traffic = traffic.clone();
        })?;
        self.record(StoreOp::UpdateTraffic);
        Ok(())
    }

    async fn update_status(
        &self,
        id: DeploymentId,
        status: &DeploymentStatus,
    ) -> Result<StatusUpdate, DbError> {
        self.begin(StoreOp::UpdateStatus)?;
        let mut deployments = self.deployments_mut()?;
        let record = deployments.get_mut(&id).ok_or_else(|| DbError::NotFound {
            entity: "deployment",
            key: id.to_string(),
        })?;

        let stale = record
            .status
            .as_ref()
            .is_some_and(|s| status.observed_riser_revision < s.observed_riser_revision);
        if stale {
            return Ok(StatusUpdate::NotApplied);
        }
        record.status = Some(status.clone());
        drop(deployments);

        self.record(StoreOp::UpdateStatus);
        Ok(StatusUpdate::Updated)
    }

    async fn soft_delete(&self, id: DeploymentId) -> Result<(), DbError> {
        self.begin(StoreOp::SoftDelete)?;
        let mut deployments = self.deployments_mut()?;
        match deployments.get_mut(&id) {
            Some(record) if !record.is_deleted() => record.deleted_at = Some(Utc::now()),
            _ => {
                return Err(DbError::NotFound {
                    entity: "deployment",
                    key: id.to_string(),
                })
            }
        }
        drop(deployments);

        self.record(StoreOp::SoftDelete);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DbError> {
        self.begin(StoreOp::HealthCheck)
    }
}

#[cfg(test)]
mod tests {
    use riser_id::AppId;
    use riser_traffic::TrafficRule;

    use super::*;
    use crate::deployment::RolloutStatus;

    async fn seeded(revision: i64) -> (MemoryStore, Reservation, DeploymentId) {
        let store = MemoryStore::new();
        let reservation = Reservation::new(AppId::new(), "myapp", "apps");
        ReservationStore::create(&store, &reservation).await.unwrap();
        let rev = RiserRevision::new(revision);
        let record = DeploymentRecord::new(
            &reservation,
            "dev",
            rev,
            TrafficConfig::full_cutover("myapp", rev),
        );
        let id = DeploymentStore::create(&store, &record).await.unwrap();
        (store, reservation, id)
    }

    fn status(observed: i64) -> DeploymentStatus {
        DeploymentStatus {
            observed_riser_revision: RiserRevision::new(observed),
            rollout_status: RolloutStatus::Complete,
            revisions: vec![],
        }
    }

    #[tokio::test]
    async fn test_increment_is_sequential() {
        let (store, _, _) = seeded(1).await;
        assert_eq!(
            store.increment_revision("myapp", "apps", "dev").await.unwrap(),
            RiserRevision::new(2)
        );
        assert_eq!(
            store.increment_revision("myapp", "apps", "dev").await.unwrap(),
            RiserRevision::new(3)
        );
    }

    #[tokio::test]
    async fn test_increment_unknown_deployment_is_not_found() {
        let (store, _, _) = seeded(1).await;
        let err = store
            .increment_revision("myapp", "apps", "prod")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rollback_only_moves_backwards() {
        let (store, reservation, _) = seeded(5).await;
        store
            .rollback_revision("myapp", "apps", "dev", RiserRevision::new(4))
            .await
            .unwrap();
        store
            .rollback_revision("myapp", "apps", "dev", RiserRevision::new(9))
            .await
            .unwrap();

        let record = store
            .get_by_reservation(reservation.id, "dev")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.riser_revision, RiserRevision::new(4));
    }

    #[tokio::test]
    async fn test_status_updates_reject_older_observations() {
        let (store, _, id) = seeded(3).await;

        assert_eq!(
            store.update_status(id, &status(3)).await.unwrap(),
            StatusUpdate::Updated
        );
        assert_eq!(
            store.update_status(id, &status(2)).await.unwrap(),
            StatusUpdate::NotApplied
        );
        assert_eq!(
            store.update_status(id, &status(3)).await.unwrap(),
            StatusUpdate::Updated
        );
        assert_eq!(store.op_count(StoreOp::UpdateStatus), 2);
    }

    #[tokio::test]
    async fn test_create_over_active_record_conflicts() {
        let (store, reservation, _) = seeded(1).await;
        let duplicate = DeploymentRecord::new(
            &reservation,
            "dev",
            RiserRevision::INITIAL,
            TrafficConfig::full_cutover("myapp", RiserRevision::INITIAL),
        );
        let err = DeploymentStore::create(&store, &duplicate).await.unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_create_revives_soft_deleted_record() {
        let (store, reservation, id) = seeded(7).await;
        store.update_status(id, &status(7)).await.unwrap();
        store.soft_delete(id).await.unwrap();

        let fresh = DeploymentRecord::new(
            &reservation,
            "dev",
            RiserRevision::INITIAL,
            TrafficConfig::new(vec![TrafficRule::new("myapp", RiserRevision::INITIAL, 100)]),
        );
        let revived_id = DeploymentStore::create(&store, &fresh).await.unwrap();
        assert_eq!(revived_id, id);

        let record = store
            .get_by_reservation(reservation.id, "dev")
            .await
            .unwrap()
            .unwrap();
        assert!(!record.is_deleted());
        assert_eq!(record.riser_revision, RiserRevision::INITIAL);
        assert_eq!(record.status, None);
    }

    #[tokio::test]
    async fn test_soft_delete_twice_is_not_found() {
        let (store, _, id) = seeded(1).await;
        store.soft_delete(id).await.unwrap();
        assert!(store.soft_delete(id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let (store, _, _) = seeded(1).await;
        store.fail_next(StoreOp::UpdateTraffic);
        let traffic = TrafficConfig::full_cutover("myapp", RiserRevision::new(2));

        assert!(matches!(
            store.update_traffic("myapp", "apps", "dev", &traffic).await,
            Err(DbError::Unavailable(_))
        ));
        assert!(store
            .update_traffic("myapp", "apps", "dev", &traffic)
            .await
            .is_ok());
        assert_eq!(store.op_count(StoreOp::UpdateTraffic), 1);
    }
}
