//! Approval rule repository: validation, matching, and CRUD executors.
//!
//! A rule binds a nominal-amount range `[min_amount, max_amount]` (both
//! bounds inclusive, `None` max = unbounded above) to exactly three ordered
//! steps CREATE(1) -> REVIEW(2) -> APPROVE(3), each step bound to a role by
//! id. Ranges across the repository must not overlap; overlap is rejected
//! at save time inside the same snapshot that writes the rule, so no race
//! can introduce ambiguous coverage. Coverage gaps are legal at save time
//! and surface as `NoMatchingRule` when a letter's amount falls into one.

use paraf_storage::{
    now_iso8601, ParafStorage, RuleRecord, StepKind, StepRecord,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{storage_err, EngineError, FieldIssue};

/// Input for creating or replacing a rule. Amounts arrive as decimal
/// strings on the wire.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDraft {
    pub name: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub min_amount: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub max_amount: Option<Decimal>,
    pub steps: Vec<StepDraft>,
}

/// One step of a rule draft.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDraft {
    pub step_order: u8,
    pub step_type: StepKind,
    pub role_id: Uuid,
}

/// Role rebinding for one step, used by the step-update operation.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRebind {
    pub step_order: u8,
    pub role_id: Uuid,
}

/// Structural validation of a rule draft: step cardinality and kinds,
/// canonical ordering, and a well-formed amount range.
pub fn validate_draft(draft: &RuleDraft) -> Result<(), EngineError> {
    let mut issues = Vec::new();

    if draft.name.trim().is_empty() {
        issues.push(FieldIssue::new("name", "must not be empty"));
    }
    if draft.min_amount < Decimal::ZERO {
        issues.push(FieldIssue::new("minAmount", "must not be negative"));
    }
    // Amounts are whole currency units; fractional bounds would leave the
    // coverage arithmetic (max + 1 adjacency, gap scan) undefined.
    if !draft.min_amount.fract().is_zero() {
        issues.push(FieldIssue::new("minAmount", "must be a whole amount"));
    }
    if let Some(max) = draft.max_amount {
        if max < draft.min_amount {
            issues.push(FieldIssue::new(
                "maxAmount",
                "must be greater than or equal to minAmount",
            ));
        }
        if !max.fract().is_zero() {
            issues.push(FieldIssue::new("maxAmount", "must be a whole amount"));
        }
    }

    if draft.steps.len() != 3 {
        issues.push(FieldIssue::new(
            "steps",
            format!("expected exactly 3 steps, got {}", draft.steps.len()),
        ));
    } else {
        // Each step kind appears exactly once, at its canonical order.
        for kind in StepKind::all() {
            match draft.steps.iter().filter(|s| s.step_type == kind).count() {
                1 => {
                    let step = draft
                        .steps
                        .iter()
                        .find(|s| s.step_type == kind)
                        .expect("counted above");
                    if step.step_order != kind.order() {
                        issues.push(FieldIssue::new(
                            "steps",
                            format!(
                                "step {kind} must have order {}, got {}",
                                kind.order(),
                                step.step_order
                            ),
                        ));
                    }
                }
                n => issues.push(FieldIssue::new(
                    "steps",
                    format!("step {kind} must appear exactly once, got {n}"),
                )),
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(EngineError::Validation(issues))
    }
}

/// Whether two inclusive ranges share at least one point.
///
/// A shared boundary point counts as overlap: two rules may not both claim
/// the same amount.
pub fn ranges_overlap(
    a_min: Decimal,
    a_max: Option<Decimal>,
    b_min: Decimal,
    b_max: Option<Decimal>,
) -> bool {
    let a_before_b = matches!(a_max, Some(max) if max < b_min);
    let b_before_a = matches!(b_max, Some(max) if max < a_min);
    !(a_before_b || b_before_a)
}

/// Reject a candidate range that overlaps any existing rule's range.
///
/// `exclude` skips the rule being updated so it does not collide with its
/// own stored range.
pub fn check_no_overlap(
    existing: &[RuleRecord],
    min_amount: Decimal,
    max_amount: Option<Decimal>,
    exclude: Option<Uuid>,
) -> Result<(), EngineError> {
    let colliding: Vec<String> = existing
        .iter()
        .filter(|r| Some(r.id) != exclude)
        .filter(|r| ranges_overlap(r.min_amount, r.max_amount, min_amount, max_amount))
        .map(|r| r.name.clone())
        .collect();
    if colliding.is_empty() {
        Ok(())
    } else {
        Err(EngineError::AmbiguousRule {
            nominal: min_amount,
            rule_names: colliding,
        })
    }
}

/// Select the single rule whose range contains `nominal`.
///
/// Overlap is validated at save time, but a backend seeded out-of-band
/// could still hold ambiguous coverage, so matching re-checks and fails
/// loudly rather than silently picking one.
pub fn match_rule(rules: &[RuleRecord], nominal: Decimal) -> Result<&RuleRecord, EngineError> {
    let matching: Vec<&RuleRecord> = rules
        .iter()
        .filter(|r| {
            nominal >= r.min_amount && r.max_amount.map(|max| nominal <= max).unwrap_or(true)
        })
        .collect();
    match matching.as_slice() {
        [] => Err(EngineError::NoMatchingRule { nominal }),
        [rule] => Ok(rule),
        many => Err(EngineError::AmbiguousRule {
            nominal,
            rule_names: many.iter().map(|r| r.name.clone()).collect(),
        }),
    }
}

/// An uncovered span of the amount domain. `None` end = unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageGap {
    pub from: Decimal,
    pub to: Option<Decimal>,
}

/// Scan a non-overlapping rule set for coverage gaps over `[0, +inf)`.
///
/// Gap bounds are reported inclusive. Whole-unit amounts are an enforced
/// invariant, not an assumption: [`validate_draft`] rejects fractional
/// bounds and submission rejects fractional nominals, so the unit-step
/// cursor is exact.
pub fn coverage_gaps(rules: &[RuleRecord]) -> Vec<CoverageGap> {
    let mut sorted: Vec<&RuleRecord> = rules.iter().collect();
    sorted.sort_by(|a, b| a.min_amount.cmp(&b.min_amount));

    let mut gaps = Vec::new();
    let mut cursor = Decimal::ZERO;
    for rule in sorted {
        if rule.min_amount > cursor {
            gaps.push(CoverageGap {
                from: cursor,
                to: Some(rule.min_amount - Decimal::ONE),
            });
        }
        match rule.max_amount {
            Some(max) => cursor = max + Decimal::ONE,
            None => return gaps, // unbounded rule covers the rest
        }
    }
    gaps.push(CoverageGap {
        from: cursor,
        to: None,
    });
    gaps
}

fn build_record(id: Uuid, draft: &RuleDraft, created_at: String) -> RuleRecord {
    RuleRecord {
        id,
        name: draft.name.trim().to_string(),
        min_amount: draft.min_amount,
        max_amount: draft.max_amount,
        steps: draft
            .steps
            .iter()
            .map(|s| StepRecord {
                id: Uuid::new_v4(),
                step_order: s.step_order,
                step_type: s.step_type,
                role_id: s.role_id,
            })
            .collect(),
        created_at,
        updated_at: now_iso8601(),
    }
}

async fn check_roles_exist<S: ParafStorage>(
    storage: &S,
    steps: &[StepDraft],
) -> Result<(), EngineError> {
    for step in steps {
        storage.get_role(step.role_id).await.map_err(storage_err)?;
    }
    Ok(())
}

/// Create a rule: structural validation, role existence, then an overlap
/// check and insert inside one snapshot.
pub async fn create_rule<S: ParafStorage>(
    storage: &S,
    draft: RuleDraft,
) -> Result<RuleRecord, EngineError> {
    validate_draft(&draft)?;
    check_roles_exist(storage, &draft.steps).await?;

    let mut snap = storage.begin_snapshot().await.map_err(storage_err)?;
    let staged = async {
        let existing = storage
            .list_rules_in(&mut snap)
            .await
            .map_err(storage_err)?;
        check_no_overlap(&existing, draft.min_amount, draft.max_amount, None)?;
        let record = build_record(Uuid::new_v4(), &draft, now_iso8601());
        storage
            .insert_rule(&mut snap, record.clone())
            .await
            .map_err(storage_err)?;
        Ok::<RuleRecord, EngineError>(record)
    }
    .await;

    match staged {
        Ok(record) => {
            storage.commit_snapshot(snap).await.map_err(storage_err)?;
            tracing::info!(rule_id = %record.id, name = %record.name, "rule created");
            Ok(record)
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            Err(e)
        }
    }
}

/// Replace a rule wholesale, revalidating the range against all other rules.
pub async fn update_rule<S: ParafStorage>(
    storage: &S,
    rule_id: Uuid,
    draft: RuleDraft,
) -> Result<RuleRecord, EngineError> {
    validate_draft(&draft)?;
    check_roles_exist(storage, &draft.steps).await?;

    let mut snap = storage.begin_snapshot().await.map_err(storage_err)?;
    let staged = async {
        let existing = storage
            .list_rules_in(&mut snap)
            .await
            .map_err(storage_err)?;
        let current = existing
            .iter()
            .find(|r| r.id == rule_id)
            .ok_or(EngineError::NotFound {
                kind: "rule",
                id: rule_id,
            })?;
        check_no_overlap(&existing, draft.min_amount, draft.max_amount, Some(rule_id))?;
        let mut record = build_record(rule_id, &draft, current.created_at.clone());
        // Step identities survive a rule edit; only bindings change.
        for (step, current_step) in record.steps.iter_mut().zip(current.steps.iter()) {
            step.id = current_step.id;
        }
        storage
            .update_rule(&mut snap, record.clone())
            .await
            .map_err(storage_err)?;
        Ok::<RuleRecord, EngineError>(record)
    }
    .await;

    match staged {
        Ok(record) => {
            storage.commit_snapshot(snap).await.map_err(storage_err)?;
            tracing::info!(rule_id = %record.id, "rule updated");
            Ok(record)
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            Err(e)
        }
    }
}

/// Rebind the roles of a rule's three steps without touching the range.
pub async fn update_rule_steps<S: ParafStorage>(
    storage: &S,
    rule_id: Uuid,
    rebinds: Vec<StepRebind>,
) -> Result<RuleRecord, EngineError> {
    if rebinds.len() != 3 {
        return Err(EngineError::validation(
            "steps",
            format!("expected exactly 3 steps, got {}", rebinds.len()),
        ));
    }
    let mut orders: Vec<u8> = rebinds.iter().map(|r| r.step_order).collect();
    orders.sort_unstable();
    if orders != vec![1, 2, 3] {
        return Err(EngineError::validation(
            "steps",
            "step orders must be exactly 1, 2, 3",
        ));
    }
    for rebind in &rebinds {
        storage.get_role(rebind.role_id).await.map_err(storage_err)?;
    }

    let mut snap = storage.begin_snapshot().await.map_err(storage_err)?;
    let staged = async {
        let existing = storage
            .list_rules_in(&mut snap)
            .await
            .map_err(storage_err)?;
        let mut record = existing
            .into_iter()
            .find(|r| r.id == rule_id)
            .ok_or(EngineError::NotFound {
                kind: "rule",
                id: rule_id,
            })?;
        for step in record.steps.iter_mut() {
            let rebind = rebinds
                .iter()
                .find(|r| r.step_order == step.step_order)
                .expect("orders validated as 1..3");
            step.role_id = rebind.role_id;
        }
        record.updated_at = now_iso8601();
        storage
            .update_rule(&mut snap, record.clone())
            .await
            .map_err(storage_err)?;
        Ok::<RuleRecord, EngineError>(record)
    }
    .await;

    match staged {
        Ok(record) => {
            storage.commit_snapshot(snap).await.map_err(storage_err)?;
            tracing::info!(rule_id = %record.id, "rule steps rebound");
            Ok(record)
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            Err(e)
        }
    }
}

/// Delete a rule. In-flight letters carry route snapshots, so deletion only
/// changes what future submissions can match.
pub async fn delete_rule<S: ParafStorage>(storage: &S, rule_id: Uuid) -> Result<(), EngineError> {
    let mut snap = storage.begin_snapshot().await.map_err(storage_err)?;
    match storage.delete_rule(&mut snap, rule_id).await {
        Ok(()) => {
            storage.commit_snapshot(snap).await.map_err(storage_err)?;
            tracing::info!(%rule_id, "rule deleted");
            Ok(())
        }
        Err(e) => {
            let _ = storage.abort_snapshot(snap).await;
            Err(storage_err(e))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paraf_storage::MemoryStore;

    fn draft(name: &str, min: i64, max: Option<i64>, roles: [Uuid; 3]) -> RuleDraft {
        RuleDraft {
            name: name.to_string(),
            min_amount: Decimal::from(min),
            max_amount: max.map(Decimal::from),
            steps: StepKind::all()
                .iter()
                .zip(roles)
                .map(|(kind, role_id)| StepDraft {
                    step_order: kind.order(),
                    step_type: *kind,
                    role_id,
                })
                .collect(),
        }
    }

    fn record(name: &str, min: i64, max: Option<i64>) -> RuleRecord {
        build_record(
            Uuid::new_v4(),
            &draft(name, min, max, [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()]),
            now_iso8601(),
        )
    }

    async fn seed_roles(storage: &MemoryStore) -> [Uuid; 3] {
        let mut snap = storage.begin_snapshot().await.unwrap();
        let mut ids = [Uuid::nil(); 3];
        for (i, name) in ["Staf", "Manajer", "GM"].iter().enumerate() {
            let role = paraf_storage::RoleRecord {
                id: Uuid::new_v4(),
                name: name.to_string(),
                created_at: now_iso8601(),
            };
            ids[i] = role.id;
            storage.insert_role(&mut snap, role).await.unwrap();
        }
        storage.commit_snapshot(snap).await.unwrap();
        ids
    }

    #[test]
    fn draft_with_duplicate_step_kind_rejected() {
        let roles = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let mut d = draft("bad", 0, Some(10), roles);
        d.steps[1].step_type = StepKind::Create;
        let err = validate_draft(&d).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn draft_with_noncanonical_order_rejected() {
        let roles = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let mut d = draft("bad", 0, Some(10), roles);
        d.steps[0].step_order = 3;
        d.steps[2].step_order = 1;
        assert!(validate_draft(&d).is_err());
    }

    #[test]
    fn fractional_bounds_rejected() {
        let roles = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let mut d = draft("pecahan", 0, Some(100), roles);
        d.min_amount = Decimal::new(5, 1); // 0.5
        d.max_amount = Some(Decimal::new(1005, 1)); // 100.5
        let err = validate_draft(&d).unwrap_err();
        let EngineError::Validation(issues) = err else {
            panic!("expected validation error");
        };
        assert!(issues.iter().any(|i| i.field == "minAmount"));
        assert!(issues.iter().any(|i| i.field == "maxAmount"));
    }

    #[test]
    fn draft_with_inverted_range_rejected() {
        let roles = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let d = draft("bad", 100, Some(50), roles);
        let err = validate_draft(&d).unwrap_err();
        match err {
            EngineError::Validation(issues) => {
                assert!(issues.iter().any(|i| i.field == "maxAmount"));
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[test]
    fn shared_boundary_point_counts_as_overlap() {
        assert!(ranges_overlap(
            Decimal::ZERO,
            Some(Decimal::from(50)),
            Decimal::from(50),
            None,
        ));
        assert!(!ranges_overlap(
            Decimal::ZERO,
            Some(Decimal::from(50)),
            Decimal::from(51),
            None,
        ));
    }

    #[test]
    fn unbounded_ranges_always_overlap() {
        assert!(ranges_overlap(Decimal::ZERO, None, Decimal::from(1_000_000), None));
    }

    #[test]
    fn match_selects_single_containing_rule() {
        let rules = vec![
            record("kecil", 0, Some(50_000_000)),
            record("besar", 50_000_001, None),
        ];
        let hit = match_rule(&rules, Decimal::from(10_000_000)).unwrap();
        assert_eq!(hit.name, "kecil");
        let hit = match_rule(&rules, Decimal::from(50_000_001)).unwrap();
        assert_eq!(hit.name, "besar");
    }

    #[test]
    fn match_bounds_are_inclusive() {
        let rules = vec![record("kecil", 10, Some(50_000_000))];
        assert!(match_rule(&rules, Decimal::from(10)).is_ok());
        assert!(match_rule(&rules, Decimal::from(50_000_000)).is_ok());
        assert!(matches!(
            match_rule(&rules, Decimal::from(9)).unwrap_err(),
            EngineError::NoMatchingRule { .. }
        ));
    }

    #[test]
    fn match_never_picks_silently_from_overlap() {
        let rules = vec![
            record("a", 0, Some(100)),
            record("b", 50, Some(200)),
        ];
        let err = match_rule(&rules, Decimal::from(75)).unwrap_err();
        match err {
            EngineError::AmbiguousRule { rule_names, .. } => {
                assert_eq!(rule_names.len(), 2);
            }
            other => panic!("expected AmbiguousRule, got {other:?}"),
        }
    }

    #[test]
    fn gap_scan_reports_uncovered_spans() {
        let rules = vec![
            record("kecil", 0, Some(100)),
            record("besar", 201, Some(300)),
        ];
        let gaps = coverage_gaps(&rules);
        assert_eq!(
            gaps,
            vec![
                CoverageGap {
                    from: Decimal::from(101),
                    to: Some(Decimal::from(200)),
                },
                CoverageGap {
                    from: Decimal::from(301),
                    to: None,
                },
            ]
        );
    }

    #[test]
    fn gap_scan_with_unbounded_tail_is_gapless() {
        let rules = vec![
            record("kecil", 0, Some(100)),
            record("besar", 101, None),
        ];
        assert!(coverage_gaps(&rules).is_empty());
    }

    #[tokio::test]
    async fn create_rule_rejects_overlap_and_commits_nothing() {
        let storage = MemoryStore::new();
        let roles = seed_roles(&storage).await;
        create_rule(&storage, draft("kecil", 0, Some(50_000_000), roles))
            .await
            .unwrap();

        // Shared boundary point: overlap.
        let err = create_rule(&storage, draft("besar", 50_000_000, None, roles))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AmbiguousRule { .. }));

        let (rules, total) = storage.list_rules(0, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rules[0].name, "kecil");
    }

    #[tokio::test]
    async fn create_rule_requires_existing_roles() {
        let storage = MemoryStore::new();
        let phantom = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        let err = create_rule(&storage, draft("kecil", 0, None, phantom))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "role", .. }));
    }

    #[tokio::test]
    async fn update_rule_may_keep_its_own_range() {
        let storage = MemoryStore::new();
        let roles = seed_roles(&storage).await;
        let rule = create_rule(&storage, draft("kecil", 0, Some(50), roles))
            .await
            .unwrap();
        // Same range, new name: must not collide with itself.
        let updated = update_rule(&storage, rule.id, draft("kecil-v2", 0, Some(50), roles))
            .await
            .unwrap();
        assert_eq!(updated.name, "kecil-v2");
        assert_eq!(updated.steps[0].id, rule.steps[0].id);
    }

    #[tokio::test]
    async fn update_rule_steps_rebinds_roles_in_place() {
        let storage = MemoryStore::new();
        let roles = seed_roles(&storage).await;
        let rule = create_rule(&storage, draft("kecil", 0, None, roles))
            .await
            .unwrap();

        // Swap the REVIEW and APPROVE roles.
        let rebound = update_rule_steps(
            &storage,
            rule.id,
            vec![
                StepRebind {
                    step_order: 1,
                    role_id: roles[0],
                },
                StepRebind {
                    step_order: 2,
                    role_id: roles[2],
                },
                StepRebind {
                    step_order: 3,
                    role_id: roles[1],
                },
            ],
        )
        .await
        .unwrap();
        assert_eq!(rebound.steps[1].role_id, roles[2]);
        assert_eq!(rebound.steps[2].role_id, roles[1]);
        assert_eq!(rebound.min_amount, rule.min_amount);
    }

    #[tokio::test]
    async fn delete_missing_rule_is_not_found() {
        let storage = MemoryStore::new();
        let err = delete_rule(&storage, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { kind: "rule", .. }));
    }
}
