//! Postgres storage for deployment reservations.

use async_trait::async_trait;
use riser_id::{AppId, ReservationId};
use sqlx::{postgres::PgPool, postgres::PgRow, Row};

use super::DbError;
use crate::deployment::Reservation;
use crate::store::ReservationStore;

struct ReservationRow {
    id: String,
    app_id: String,
    name: String,
    namespace: String,
}

impl<'r> sqlx::FromRow<'r, PgRow> for ReservationRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            app_id: row.try_get("app_id")?,
            name: row.try_get("name")?,
            namespace: row.try_get("namespace")?,
        })
    }
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = DbError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let invalid = |e: riser_id::IdError| DbError::InvalidRow {
            entity: "deployment reservation",
            reason: e.to_string(),
        };
        Ok(Self {
            id: ReservationId::parse(&row.id).map_err(invalid)?,
            app_id: AppId::parse(&row.app_id).map_err(invalid)?,
            name: row.name,
            namespace: row.namespace,
        })
    }
}

/// Reservation store handle.
#[derive(Clone)]
pub struct PgReservationStore {
    pool: PgPool,
}

impl PgReservationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn get_by_name(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Reservation>, DbError> {
        let row = sqlx::query_as::<_, ReservationRow>(
            r#"
            SELECT id, app_id, name, namespace
            FROM deployment_reservations
            WHERE name = $1 AND namespace = $2
            "#,
        )
        .bind(name)
        .bind(namespace)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::Query)?;

        row.map(Reservation::try_from).transpose()
    }

    async fn create(&self, reservation: &Reservation) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO deployment_reservations (id, app_id, name, namespace)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(reservation.id.to_string())
        .bind(reservation.app_id.to_string())
        .bind(&reservation.name)
        .bind(&reservation.namespace)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            DbError::from_query(
                "deployment reservation",
                format!("{}.{}", reservation.name, reservation.namespace),
                e,
            )
        })?;
        Ok(())
    }
}
