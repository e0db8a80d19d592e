//! Revision and traffic decisions for riser deployments.
//!
//! Given a rollout request and the previously persisted state of a
//! deployment, this crate decides which riser revision comes next and how
//! live traffic is split across revisions.
//!
//! - **Fresh deployment**: no prior record, or the prior record was soft
//!   deleted. History is ignored and the new revision takes all traffic.
//! - **Full cutover**: the new revision replaces every existing rule.
//! - **Manual rollout**: the new revision is staged at 0% in front of the
//!   existing rules, pending an explicit promotion.
//!
//! # Invariants
//!
//! - Every function here is pure and deterministic
//! - Percentages of a traffic config sum to 100
//! - A riser revision appears at most once in a traffic config
//! - Revision names are always `{deployment}-{revision}`

use riser_id::RiserRevision;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Traffic config validation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrafficError {
    /// Percentages do not add up to 100.
    #[error("traffic percentages must sum to 100, got {total}")]
    PercentSum { total: u32 },

    /// A single rule carries more than 100 percent.
    #[error("revision {revision} has percent {percent} (max 100)")]
    PercentOutOfRange { revision: RiserRevision, percent: u8 },

    /// The same riser revision is routed twice.
    #[error("revision {0} appears more than once")]
    DuplicateRevision(RiserRevision),
}

/// A single traffic rule: a share of live traffic routed to one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficRule {
    pub riser_revision: RiserRevision,
    pub revision_name: String,
    pub percent: u8,
}

impl TrafficRule {
    /// Builds a rule for `deployment_name`, deriving the revision name.
    pub fn new(deployment_name: &str, riser_revision: RiserRevision, percent: u8) -> Self {
        Self {
            riser_revision,
            revision_name: riser_revision.revision_name(deployment_name),
            percent,
        }
    }
}

/// Ordered traffic rules for a deployment in one stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrafficConfig(Vec<TrafficRule>);

impl TrafficConfig {
    /// Wraps rules as-is. Use [`TrafficConfig::validate`] to check them.
    pub fn new(rules: Vec<TrafficRule>) -> Self {
        Self(rules)
    }

    /// All traffic to a single revision.
    pub fn full_cutover(deployment_name: &str, riser_revision: RiserRevision) -> Self {
        Self(vec![TrafficRule::new(deployment_name, riser_revision, 100)])
    }

    pub fn rules(&self) -> &[TrafficRule] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum of all percentages.
    pub fn total_percent(&self) -> u32 {
        self.0.iter().map(|rule| u32::from(rule.percent)).sum()
    }

    /// Look up the rule for a revision.
    pub fn rule_for(&self, riser_revision: RiserRevision) -> Option<&TrafficRule> {
        self.0
            .iter()
            .find(|rule| rule.riser_revision == riser_revision)
    }

    /// Check the config invariants.
    pub fn validate(&self) -> Result<(), TrafficError> {
        let mut seen = Vec::with_capacity(self.0.len());
        for rule in &self.0 {
            if rule.percent > 100 {
                return Err(TrafficError::PercentOutOfRange {
                    revision: rule.riser_revision,
                    percent: rule.percent,
                });
            }
            if seen.contains(&rule.riser_revision) {
                return Err(TrafficError::DuplicateRevision(rule.riser_revision));
            }
            seen.push(rule.riser_revision);
        }

        let total = self.total_percent();
        if total != 100 {
            return Err(TrafficError::PercentSum { total });
        }
        Ok(())
    }

    /// Stage a new revision at 0% in front of the current rules.
    ///
    /// Rules that are already at 0% are dropped first: a canary that never
    /// received traffic is discarded instead of accumulating.
    fn stage(&self, deployment_name: &str, riser_revision: RiserRevision) -> Self {
        let mut rules = Vec::with_capacity(self.0.len() + 1);
        rules.push(TrafficRule::new(deployment_name, riser_revision, 0));
        rules.extend(
            self.0
                .iter()
                .filter(|rule| rule.percent != 0 && rule.riser_revision != riser_revision)
                .cloned(),
        );
        Self(rules)
    }
}

impl<'a> IntoIterator for &'a TrafficConfig {
    type Item = &'a TrafficRule;
    type IntoIter = std::slice::Iter<'a, TrafficRule>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Lifecycle state of a persisted deployment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    /// The deployment is live; its rollout history applies.
    Active,

    /// The deployment was soft deleted; its rollout history is void.
    Deleted,
}

impl RecordState {
    pub fn is_deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// The persisted state a rollout starts from.
#[derive(Debug, Clone, Copy)]
pub struct PriorState<'a> {
    pub riser_revision: RiserRevision,
    pub traffic: &'a TrafficConfig,
    pub state: RecordState,
}

/// The traffic-relevant part of a deployment request.
#[derive(Debug, Clone, Copy)]
pub struct RolloutRequest<'a> {
    /// Deployment name; revision names are derived from it.
    pub name: &'a str,

    /// Stage the new revision at 0% instead of cutting over.
    pub manual_rollout: bool,

    /// Compute without allocating a revision.
    pub dry_run: bool,
}

/// How the next revision relates to the persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevisionPlan {
    /// Start from a clean slate (no record, or a soft-deleted one).
    Fresh,

    /// Advance an active record from its current revision.
    Advance { current: RiserRevision },
}

impl RevisionPlan {
    /// Classify the prior state.
    pub fn for_prior(prior: Option<PriorState<'_>>) -> Self {
        match prior {
            Some(prior) if !prior.state.is_deleted() => Self::Advance {
                current: prior.riser_revision,
            },
            _ => Self::Fresh,
        }
    }

    /// The revision this plan leads to when a revision is allocated.
    pub fn next_revision(&self) -> RiserRevision {
        match self {
            Self::Fresh => RiserRevision::INITIAL,
            Self::Advance { current } => current.next(),
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }
}

/// Result of [`compute_next_state`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextState {
    pub plan: RevisionPlan,
    pub riser_revision: RiserRevision,
    pub traffic: TrafficConfig,
}

/// Decide the next revision and traffic split.
///
/// Dry runs report [`RiserRevision::DRY_RUN`] but still compute the traffic
/// the request would produce.
pub fn compute_next_state(request: RolloutRequest<'_>, prior: Option<PriorState<'_>>) -> NextState {
    let plan = RevisionPlan::for_prior(prior);
    let riser_revision = if request.dry_run {
        RiserRevision::DRY_RUN
    } else {
        plan.next_revision()
    };

    NextState {
        plan,
        riser_revision,
        traffic: next_traffic(request.name, request.manual_rollout, prior, riser_revision),
    }
}

/// Traffic for `riser_revision` given the prior state.
///
/// Exposed separately so callers holding an authoritative revision (for
/// example one returned by an atomic store increment) can recompute the split
/// for it.
pub fn next_traffic(
    name: &str,
    manual_rollout: bool,
    prior: Option<PriorState<'_>>,
    riser_revision: RiserRevision,
) -> TrafficConfig {
    match (RevisionPlan::for_prior(prior), prior) {
        (RevisionPlan::Advance { .. }, Some(prior)) if manual_rollout => {
            prior.traffic.stage(name, riser_revision)
        }
        _ => TrafficConfig::full_cutover(name, riser_revision),
    }
}
