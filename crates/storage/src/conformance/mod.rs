//! Conformance test suite for `ParafStorage` implementations.
//!
//! This module provides a backend-agnostic test suite that any `ParafStorage`
//! implementation can run to verify correctness. The suite covers:
//!
//! - **Initialization**: letter and directory creation, duplicate detection
//! - **Snapshot isolation**: uncommitted writes invisible, committed writes visible
//! - **Atomic commit**: all-or-nothing semantics for multi-record snapshots
//! - **Version validation / OCC**: optimistic concurrency conflict detection
//! - **Log coupling**: approval log entries tied to their letter, seq assignment
//! - **Concurrency**: real racing snapshots with exactly-one-winner semantics
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty storage instance for each test:
//!
//! ```ignore
//! use paraf_storage::conformance::{run_conformance_suite, ConformanceReport};
//!
//! #[tokio::test]
//! async fn sql_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_sql_storage().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod commit;
mod concurrent;
mod init;
mod logs;
mod snapshot;
mod version;

use std::fmt;
use std::future::Future;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::record::{
    LetterRecord, LetterStatus, LogAction, LogRecord, RoleRecord, RouteSnapshot, RouteStep,
    RuleRecord, StepKind, StepRecord, UnitRecord, UserRecord,
};
use crate::ParafStorage;

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "init", "snapshot", "commit").
    pub category: String,
    /// Test name (e.g. "insert_letter_commits_at_version_0").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a storage backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// storage instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: ParafStorage,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(init::run_init_tests(&factory).await);
    results.extend(snapshot::run_snapshot_tests(&factory).await);
    results.extend(commit::run_commit_tests(&factory).await);
    results.extend(version::run_version_tests(&factory).await);
    results.extend(logs::run_log_tests(&factory).await);
    results.extend(concurrent::run_concurrent_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers: record constructors with sensible defaults ──────────────────────

fn make_route() -> RouteSnapshot {
    RouteSnapshot {
        rule_id: Uuid::new_v4(),
        rule_name: "test-rule".to_string(),
        steps: StepKind::all()
            .iter()
            .map(|kind| RouteStep {
                step_type: *kind,
                role_id: Uuid::new_v4(),
            })
            .collect(),
    }
}

fn make_letter(number: &str) -> LetterRecord {
    LetterRecord {
        id: Uuid::new_v4(),
        letter_number: number.to_string(),
        letter_about: "test letter".to_string(),
        nominal: Decimal::new(25_000_000, 0),
        incoming_letter_date: "2025-01-01".to_string(),
        unit_id: Uuid::new_v4(),
        letter_file: "test.pdf".to_string(),
        status: LetterStatus::PendingReview,
        current_step: StepKind::Review,
        route: make_route(),
        created_by: Uuid::new_v4(),
        created_at: "2025-01-01T00:00:00Z".to_string(),
        updated_at: "2025-01-01T00:00:00Z".to_string(),
        version: 0,
    }
}

fn make_log(letter_id: Uuid, actor_id: Uuid, action: LogAction) -> LogRecord {
    LogRecord {
        id: Uuid::new_v4(),
        letter_id,
        seq: 0,
        action,
        actor_id,
        comment: None,
        timestamp: "2025-01-01T00:00:30Z".to_string(),
    }
}

fn make_rule(name: &str, min: i64, max: Option<i64>) -> RuleRecord {
    RuleRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        min_amount: Decimal::from(min),
        max_amount: max.map(Decimal::from),
        steps: StepKind::all()
            .iter()
            .map(|kind| StepRecord {
                id: Uuid::new_v4(),
                step_order: kind.order(),
                step_type: *kind,
                role_id: Uuid::new_v4(),
            })
            .collect(),
        created_at: "2025-01-01T00:00:00Z".to_string(),
        updated_at: "2025-01-01T00:00:00Z".to_string(),
    }
}

fn make_unit(name: &str) -> UnitRecord {
    UnitRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        created_at: "2025-01-01T00:00:00Z".to_string(),
    }
}

fn make_role(name: &str) -> RoleRecord {
    RoleRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        created_at: "2025-01-01T00:00:00Z".to_string(),
    }
}

fn make_user(name: &str, role_id: Uuid, unit_id: Uuid) -> UserRecord {
    UserRecord {
        id: Uuid::new_v4(),
        name: name.to_string(),
        role_id,
        unit_id,
        created_at: "2025-01-01T00:00:00Z".to_string(),
    }
}
