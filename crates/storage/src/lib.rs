//! paraf-storage: storage contract for the procurement approval service.
//!
//! Defines the record types, the [`ParafStorage`] trait with its snapshot
//! (transaction) semantics, the in-memory reference backend
//! [`MemoryStore`], and a [`conformance`] suite any backend must pass.

pub mod conformance;
mod error;
mod memory;
mod record;
mod traits;

pub use error::StorageError;
pub use memory::{MemorySnapshot, MemoryStore};
pub use record::{
    now_iso8601, LetterRecord, LetterStatus, LogAction, LogRecord, RoleRecord, RouteSnapshot,
    RouteStep, RuleRecord, StepKind, StepRecord, UnitRecord, UserRecord,
};
pub use traits::{LetterQuery, ParafStorage};
