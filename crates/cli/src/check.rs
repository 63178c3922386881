//! `paraf check` -- offline analysis of a seed/rules file.
//!
//! Validates each rule's structure, detects pairwise amount-range overlaps
//! (shared boundary points included), and scans the non-overlapping rules
//! for coverage gaps over `[0, +inf)`. Structural errors and overlaps are
//! fatal (exit 1); gaps are legal at save time and report as warnings.

use std::collections::HashMap;
use std::path::Path;
use std::process;

use paraf_core::rules::{coverage_gaps, ranges_overlap, validate_draft, RuleDraft, StepDraft};
use paraf_storage::{now_iso8601, RuleRecord, StepRecord};
use serde::Serialize;
use uuid::Uuid;

use crate::seed::{self, SeedFile};
use crate::{report_error, OutputFormat};

#[derive(Debug, Default, Serialize)]
struct CheckReport {
    rules: usize,
    errors: Vec<String>,
    overlaps: Vec<String>,
    gaps: Vec<String>,
}

pub(crate) fn cmd_check(file: &Path, output: OutputFormat, quiet: bool) {
    let seed_file = match seed::parse(file) {
        Ok(f) => f,
        Err(msg) => {
            report_error(&msg, output, quiet);
            process::exit(1);
        }
    };

    let report = analyze(&seed_file);

    if !quiet {
        match output {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).unwrap_or_default()
                );
            }
            OutputFormat::Text => {
                println!("{} rule(s) checked", report.rules);
                for err in &report.errors {
                    println!("  error: {}", err);
                }
                for overlap in &report.overlaps {
                    println!("  overlap: {}", overlap);
                }
                for gap in &report.gaps {
                    println!("  warning: uncovered amounts {}", gap);
                }
                if report.errors.is_empty() && report.overlaps.is_empty() {
                    println!("ok");
                }
            }
        }
    }

    if !report.errors.is_empty() || !report.overlaps.is_empty() {
        process::exit(1);
    }
}

fn analyze(file: &SeedFile) -> CheckReport {
    let mut report = CheckReport {
        rules: file.rules.len(),
        ..CheckReport::default()
    };

    // Role names act as local labels; checking needs ids, not real roles.
    let mut role_ids: HashMap<&str, Uuid> = HashMap::new();
    for role in &file.roles {
        role_ids.insert(role.name.as_str(), Uuid::new_v4());
    }

    let mut valid: Vec<RuleRecord> = Vec::new();
    for rule in &file.rules {
        let mut steps = Vec::with_capacity(rule.steps.len());
        let mut missing_role = false;
        for step in &rule.steps {
            match role_ids.get(step.role.as_str()) {
                Some(role_id) => steps.push(StepDraft {
                    step_order: step.step_order,
                    step_type: step.step_type,
                    role_id: *role_id,
                }),
                None => {
                    report
                        .errors
                        .push(format!("rule '{}': unknown role '{}'", rule.name, step.role));
                    missing_role = true;
                }
            }
        }
        if missing_role {
            continue;
        }
        let draft = RuleDraft {
            name: rule.name.clone(),
            min_amount: rule.min_amount,
            max_amount: rule.max_amount,
            steps,
        };
        match validate_draft(&draft) {
            Ok(()) => valid.push(RuleRecord {
                id: Uuid::new_v4(),
                name: draft.name,
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
                created_at: now_iso8601(),
                updated_at: now_iso8601(),
            }),
            Err(e) => report.errors.push(format!("rule '{}': {}", rule.name, e)),
        }
    }

    for (i, a) in valid.iter().enumerate() {
        for b in valid.iter().skip(i + 1) {
            if ranges_overlap(a.min_amount, a.max_amount, b.min_amount, b.max_amount) {
                report
                    .overlaps
                    .push(format!("'{}' and '{}' share amounts", a.name, b.name));
            }
        }
    }

    // Gap scan only makes sense over a non-overlapping set.
    if report.overlaps.is_empty() {
        for gap in coverage_gaps(&valid) {
            report.gaps.push(match gap.to {
                Some(to) => format!("[{}, {}]", gap.from, to),
                None => format!("[{}, +inf)", gap.from),
            });
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(rules_json: &str) -> SeedFile {
        let json = format!(
            r#"{{"roles": [{{"name": "Staf"}}, {{"name": "Manajer"}}, {{"name": "GM"}}], "rules": {}}}"#,
            rules_json
        );
        serde_json::from_str(&json).unwrap()
    }

    fn rule_json(name: &str, min: &str, max: Option<&str>) -> String {
        let max = match max {
            Some(m) => format!("\"{}\"", m),
            None => "null".to_string(),
        };
        format!(
            r#"{{"name": "{}", "minAmount": "{}", "maxAmount": {}, "steps": [
                {{"stepOrder": 1, "stepType": "CREATE", "role": "Staf"}},
                {{"stepOrder": 2, "stepType": "REVIEW", "role": "Manajer"}},
                {{"stepOrder": 3, "stepType": "APPROVE", "role": "GM"}}
            ]}}"#,
            name, min, max
        )
    }

    #[test]
    fn clean_file_reports_no_errors() {
        let file = seed(&format!(
            "[{}, {}]",
            rule_json("kecil", "0", Some("50000000")),
            rule_json("besar", "50000001", None)
        ));
        let report = analyze(&file);
        assert!(report.errors.is_empty());
        assert!(report.overlaps.is_empty());
        assert!(report.gaps.is_empty());
    }

    #[test]
    fn shared_boundary_reports_overlap() {
        let file = seed(&format!(
            "[{}, {}]",
            rule_json("a", "0", Some("100")),
            rule_json("b", "100", None)
        ));
        let report = analyze(&file);
        assert_eq!(report.overlaps.len(), 1);
        assert!(report.overlaps[0].contains("'a'"));
    }

    #[test]
    fn uncovered_span_reports_gap() {
        let file = seed(&format!("[{}]", rule_json("kecil", "10", Some("100"))));
        let report = analyze(&file);
        assert!(report.errors.is_empty());
        assert_eq!(report.gaps, vec!["[0, 9]", "[101, +inf)"]);
    }

    #[test]
    fn unknown_role_is_a_structural_error() {
        let file: SeedFile = serde_json::from_str(
            r#"{"rules": [{"name": "x", "minAmount": "0", "maxAmount": null, "steps": [
                {"stepOrder": 1, "stepType": "CREATE", "role": "Ghost"},
                {"stepOrder": 2, "stepType": "REVIEW", "role": "Ghost"},
                {"stepOrder": 3, "stepType": "APPROVE", "role": "Ghost"}
            ]}]}"#,
        )
        .unwrap();
        let report = analyze(&file);
        assert!(!report.errors.is_empty());
    }
}
