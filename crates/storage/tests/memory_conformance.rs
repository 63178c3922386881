//! Runs the backend-agnostic conformance suite against `MemoryStore`.
//!
//! The memory backend is the semantic reference; it must pass every test so
//! that a SQL backend implementing the same trait has a pinned-down target.

use paraf_storage::conformance::run_conformance_suite;
use paraf_storage::MemoryStore;

#[tokio::test]
async fn memory_store_passes_conformance_suite() {
    let report = run_conformance_suite(|| async { MemoryStore::new() }).await;
    assert_eq!(report.failed, 0, "{report}");
    assert!(report.total > 0, "suite ran no tests");
}
