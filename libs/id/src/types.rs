//! Typed ID definitions for riser resources.

use crate::define_id;

// =============================================================================
// Ownership
// =============================================================================

define_id!(AppId, "app");
define_id!(ReservationId, "rsv");

// =============================================================================
// Deployments
// =============================================================================

define_id!(DeploymentId, "dep");

// =============================================================================
// Requests
// =============================================================================

define_id!(RequestId, "req");

// =============================================================================
// Riser Revision
// =============================================================================

/// Per-deployment rollout counter.
///
/// A freshly created deployment is at [`RiserRevision::INITIAL`]; every
/// rollout afterwards advances it by exactly one. Dry runs never allocate a
/// revision and report [`RiserRevision::DRY_RUN`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RiserRevision(i64);

impl RiserRevision {
    /// Revision placeholder returned by dry runs.
    pub const DRY_RUN: Self = Self(0);

    /// The revision of a newly created deployment.
    pub const INITIAL: Self = Self(1);

    /// Creates a revision from a raw counter value.
    #[must_use]
    pub const fn new(revision: i64) -> Self {
        Self(revision)
    }

    /// Returns the underlying counter value.
    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Returns the revision that follows this one.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Derives the revision name for a deployment, `{deployment}-{revision}`.
    #[must_use]
    pub fn revision_name(&self, deployment_name: &str) -> String {
        format!("{deployment_name}-{}", self.0)
    }
}

impl std::fmt::Display for RiserRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for RiserRevision {
    fn from(revision: i64) -> Self {
        Self(revision)
    }
}

impl From<RiserRevision> for i64 {
    fn from(revision: RiserRevision) -> Self {
        revision.0
    }
}

impl serde::Serialize for RiserRevision {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for RiserRevision {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let revision = i64::deserialize(deserializer)?;
        Ok(Self(revision))
    }
}

// =============================================================================
// Tests
// =============================================================================
