//! Postgres storage for deployment records.
//!
//! Every method is a single statement, so each call is atomic on its own.
//! Status updates use a conditional `UPDATE` on `status_observed_revision`
//! instead of a read-modify-write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use riser_id::{DeploymentId, ReservationId, RiserRevision};
use riser_traffic::TrafficConfig;
use sqlx::{postgres::PgPool, postgres::PgRow, types::Json, Row};
use tracing::debug;

use super::DbError;
use crate::deployment::{DeploymentRecord, DeploymentStatus, StatusUpdate};
use crate::store::DeploymentStore;

const ENTITY: &str = "deployment";

struct DeploymentRow {
    id: String,
    reservation_id: String,
    name: String,
    namespace: String,
    stage: String,
    riser_revision: i64,
    traffic: Json<TrafficConfig>,
    status: Option<Json<DeploymentStatus>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for DeploymentRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            reservation_id: row.try_get("reservation_id")?,
            name: row.try_get("name")?,
            namespace: row.try_get("namespace")?,
            stage: row.try_get("stage")?,
            riser_revision: row.try_get("riser_revision")?,
            traffic: row.try_get("traffic")?,
            status: row.try_get("status")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

impl TryFrom<DeploymentRow> for DeploymentRecord {
    type Error = DbError;

    fn try_from(row: DeploymentRow) -> Result<Self, Self::Error> {
        let invalid = |e: riser_id::IdError| DbError::InvalidRow {
            entity: ENTITY,
            reason: e.to_string(),
        };
        Ok(Self {
            id: DeploymentId::parse(&row.id).map_err(invalid)?,
            reservation_id: ReservationId::parse(&row.reservation_id).map_err(invalid)?,
            name: row.name,
            namespace: row.namespace,
            stage: row.stage,
            riser_revision: RiserRevision::new(row.riser_revision),
            traffic: row.traffic.0,
            status: row.status.map(|s| s.0),
            deleted_at: row.deleted_at,
        })
    }
}

/// Deployment store handle.
#[derive(Clone)]
pub struct PgDeploymentStore {
    pool: PgPool,
}

impl PgDeploymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn not_found_active(name: &str, namespace: &str, stage: &str) -> DbError {
    DbError::NotFound {
        entity: ENTITY,
        key: format!("{name}.{namespace} in {stage}"),
    }
}

#[async_trait]
impl DeploymentStore for PgDeploymentStore {
    async fn get_by_reservation(
        &self,
        reservation_id: ReservationId,
        stage: &str,
    ) -> Result<Option<DeploymentRecord>, DbError> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            SELECT d.id, d.reservation_id, r.name, r.namespace, d.stage,
                   d.riser_revision, d.traffic, d.status, d.deleted_at
            FROM deployments d
            JOIN deployment_reservations r ON r.id = d.reservation_id
            WHERE d.reservation_id = $1 AND d.stage = $2
            "#,
        )
        .bind(reservation_id.to_string())
        .bind(stage)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        row.map(DeploymentRecord::try_from).transpose()
    }

    async fn create(&self, record: &DeploymentRecord) -> Result<DeploymentId, DbError> {
        // A soft-deleted row is revived in place; an active one is left alone
        // and the missing RETURNING row reports the conflict.
        let id: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO deployments (id, reservation_id, stage, riser_revision, traffic)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (reservation_id, stage) DO UPDATE
            SET riser_revision = EXCLUDED.riser_revision,
                traffic = EXCLUDED.traffic,
                status = NULL,
                status_observed_revision = NULL,
                deleted_at = NULL,
                updated_at = now()
            WHERE deployments.deleted_at IS NOT NULL
            RETURNING id
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.reservation_id.to_string())
        .bind(&record.stage)
        .bind(record.riser_revision.value())
        .bind(Json(&record.traffic))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| DbError::from_query(ENTITY, record.name.as_str(), e))?;

        let id = id.ok_or_else(|| DbError::UniqueViolation {
            entity: ENTITY,
            key: format!("{} in {}", record.name, record.stage),
        })?;
        DeploymentId::parse(&id).map_err(|e| DbError::InvalidRow {
            entity: ENTITY,
            reason: e.to_string(),
        })
    }

    async fn increment_revision(
        &self,
        name: &str,
        namespace: &str,
        stage: &str,
    ) -> Result<RiserRevision, DbError> {
        let revision: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE deployments d
            SET riser_revision = d.riser_revision + 1, updated_at = now()
            FROM deployment_reservations r
            WHERE r.id = d.reservation_id
              AND r.name = $1 AND r.namespace = $2 AND d.stage = $3
              AND d.deleted_at IS NULL
            RETURNING d.riser_revision
            "#,
        )
        .bind(name)
        .bind(namespace)
        .bind(stage)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        revision
            .map(RiserRevision::new)
            .ok_or_else(|| not_found_active(name, namespace, stage))
    }

    async fn rollback_revision(
        &self,
        name: &str,
        namespace: &str,
        stage: &str,
        riser_revision: RiserRevision,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE deployments d
            SET riser_revision = LEAST(d.riser_revision, $4), updated_at = now()
            FROM deployment_reservations r
            WHERE r.id = d.reservation_id
              AND r.name = $1 AND r.namespace = $2 AND d.stage = $3
              AND d.deleted_at IS NULL
            "#,
        )
        .bind(name)
        .bind(namespace)
        .bind(stage)
        .bind(riser_revision.value())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            return Err(not_found_active(name, namespace, stage));
        }
        Ok(())
    }

    async fn update_traffic(
        &self,
        name: &str,
        namespace: &str,
        stage: &str,
        traffic: &TrafficConfig,
    ) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE deployments d
            SET traffic = $4, updated_at = now()
            FROM deployment_reservations r
            WHERE r.id = d.reservation_id
              AND r.name = $1 AND r.namespace = $2 AND d.stage = $3
              AND d.deleted_at IS NULL
            "#,
        )
        .bind(name)
        .bind(namespace)
        .bind(stage)
        .bind(Json(traffic))
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            return Err(not_found_active(name, namespace, stage));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: DeploymentId,
        status: &DeploymentStatus,
    ) -> Result<StatusUpdate, DbError> {
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET status = $2, status_observed_revision = $3, updated_at = now()
            WHERE id = $1
              AND (status_observed_revision IS NULL OR status_observed_revision <= $3)
            "#,
        )
        .bind(id.to_string())
        .bind(Json(status))
        .bind(status.observed_riser_revision.value())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        if result.rows_affected() > 0 {
            return Ok(StatusUpdate::Updated);
        }

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM deployments WHERE id = $1)")
                .bind(id.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(DbError::Query)?;
        if !exists {
            return Err(DbError::NotFound {
                entity: ENTITY,
                key: id.to_string(),
            });
        }

        debug!(
            deployment_id = %id,
            observed = %status.observed_riser_revision,
            "Stale status not applied"
        );
        Ok(StatusUpdate::NotApplied)
    }

    async fn soft_delete(&self, id: DeploymentId) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET deleted_at = now(), updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(DbError::Query)?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound {
                entity: ENTITY,
                key: id.to_string(),
            });
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DbError::Query)?;
        Ok(())
    }
}
