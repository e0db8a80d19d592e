//! Deployment name reservations.
//!
//! A reservation gives one app permanent ownership of a deployment name in a
//! namespace. It is created lazily by the first deployment and never removed,
//! so deleting a deployment does not free its name for other apps.

use std::sync::Arc;

use riser_id::AppId;
use thiserror::Error;
use tracing::{debug, info};

use crate::db::DbError;
use crate::deployment::Reservation;
use crate::store::ReservationStore;

#[derive(Debug, Error)]
pub enum ReservationError {
    /// The name belongs to a different app.
    #[error("the deployment name \"{name}\" is already reserved by another app in namespace \"{namespace}\"")]
    AlreadyReserved { name: String, namespace: String },

    #[error(transparent)]
    Store(#[from] DbError),
}

/// Creates and checks reservations.
#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn ReservationStore>,
}

impl ReservationManager {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    /// Return the reservation for `(name, namespace)` owned by `app_id`,
    /// creating it when the name is free.
    pub async fn ensure_reservation(
        &self,
        app_id: AppId,
        name: &str,
        namespace: &str,
    ) -> Result<Reservation, ReservationError> {
        if let Some(existing) = self.store.get_by_name(name, namespace).await? {
            return owned_by(existing, app_id);
        }

        let reservation = Reservation::new(app_id, name, namespace);
        match self.store.create(&reservation).await {
            Ok(()) => {
                info!(
                    reservation_id = %reservation.id,
                    app_id = %app_id,
                    name = %name,
                    namespace = %namespace,
                    "Reserved deployment name"
                );
                Ok(reservation)
            }
            Err(e) if e.is_unique_violation() => {
                // Lost the race to a concurrent first deployment.
                debug!(
                    name = %name,
                    namespace = %namespace,
                    "Reservation created concurrently, re-reading"
                );
                let winner = self.store.get_by_name(name, namespace).await?.ok_or(
                    DbError::NotFound {
                        entity: "deployment reservation",
                        key: format!("{name}.{namespace}"),
                    },
                )?;
                owned_by(winner, app_id)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`Self::ensure_reservation`] but never writes: a free name yields
    /// an unsaved reservation. Used by dry runs.
    pub async fn check_reservation(
        &self,
        app_id: AppId,
        name: &str,
        namespace: &str,
    ) -> Result<Reservation, ReservationError> {
        match self.store.get_by_name(name, namespace).await? {
            Some(existing) => owned_by(existing, app_id),
            None => Ok(Reservation::new(app_id, name, namespace)),
        }
    }

    /// Look up a reservation without creating one.
    pub async fn find(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Reservation>, DbError> {
        self.store.get_by_name(name, namespace).await
    }
}

fn owned_by(reservation: Reservation, app_id: AppId) -> Result<Reservation, ReservationError> {
    if reservation.app_id == app_id {
        Ok(reservation)
    } else {
        Err(ReservationError::AlreadyReserved {
            name: reservation.name,
            namespace: reservation.namespace,
        })
    }
}
