//! # riser-id
//!
//! Typed identifiers for riser resources.
//!
//! Resource IDs use a prefixed format: `{prefix}_{ulid}`, for example
//! `rsv_01HV4Z2WQXKJNM8GPQY6VBKC3D` or `dep_01HV4Z3MXNKPQR9HSTZ7WCLD4E`.
//! The prefix keeps IDs of different resource types from being mixed up, the
//! ULID keeps them unique and time-ordered.
//!
//! Riser revisions are not ULIDs: they are a per-deployment counter that
//! starts at 1 and is bumped once per rollout. See [`RiserRevision`].

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
