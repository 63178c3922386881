//! Procurement approval engine.
//!
//! Domain logic over a [`paraf_storage::ParafStorage`] backend: the approval
//! rule repository and matcher, the letter state machine, the submission and
//! decision executors, and read-side projections. Each mutating operation
//! runs inside one storage snapshot and either commits fully or leaves no
//! trace.

pub mod decide;
pub mod directory;
pub mod error;
pub mod machine;
pub mod progress;
pub mod rules;
pub mod submit;

pub use decide::decide;
pub use directory::{create_role, create_unit, create_user, RoleDraft, UnitDraft, UserDraft};
pub use error::{storage_err, EngineError, FieldIssue};
pub use machine::{apply_decision, apply_resubmission, Decision, Transition};
pub use progress::{
    dashboard, derive_approver, history, letter_view, list, project, ApproverView, DashboardView,
    LetterView, LogView, PageRequest, Pagination, ProgressView,
};
pub use rules::{
    coverage_gaps, create_rule, delete_rule, match_rule, update_rule, update_rule_steps,
    CoverageGap, RuleDraft, StepDraft, StepRebind,
};
pub use submit::{resubmit, submit, LetterDraft, RevisionDraft};
