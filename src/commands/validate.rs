use anyhow::{Result, bail};
use chrono::Utc;
use finclusion::engine::{
    ForecastConfig, IntegrityAudit, RecordRow, RecordStore, audit_rows, extract_series, fit_trend,
    forecast::{ACCESS_INDICATOR, USAGE_INDICATOR},
};
use tracing::{info, warn};

use crate::cli::ValidateArgs;
use crate::commands::ingest::malformed_indicator_codes;
use crate::commands::load_stored_rows;
use crate::model::{CheckSummary, MANIFEST_VERSION, QualityCheck, ValidationReport, ViolationEntry};
use crate::util::{
    default_db_path, manifest_dir, now_utc_string, utc_compact_string, write_json_pretty,
};

const DETAIL_LIMIT: usize = 5;

pub fn run(args: ValidateArgs) -> Result<()> {
    let started_ts = Utc::now();
    let run_id = format!("validate-{}", utc_compact_string(started_ts));
    let report_path = args.report_path.clone().unwrap_or_else(|| {
        manifest_dir(&args.cache_root).join(format!(
            "validation_report_{}.json",
            utc_compact_string(started_ts)
        ))
    });
    let db_path = default_db_path(&args.cache_root, args.db_path.as_ref());

    let rows = load_stored_rows(&db_path)?;
    let audit = audit_rows(&rows);
    let checks = build_checks(&rows, &audit)?;
    let summary = summarize_checks(&checks);

    for check in &checks {
        match check.result.as_str() {
            "pass" => info!(check_id = %check.check_id, name = %check.name, "check passed"),
            result => warn!(
                check_id = %check.check_id,
                name = %check.name,
                result = %result,
                detail = %check.detail.as_deref().unwrap_or_default(),
                "check did not pass"
            ),
        }
    }

    let status = if summary.failed > 0 {
        "failed"
    } else if summary.warning > 0 {
        "passed_with_warnings"
    } else {
        "passed"
    };

    let report = ValidationReport {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        generated_at: now_utc_string(),
        db_path: db_path.display().to_string(),
        status: status.to_string(),
        summary: summary.clone(),
        checks,
        violations: audit
            .violations
            .iter()
            .map(|violation| ViolationEntry {
                kind: violation.kind().to_string(),
                message: violation.to_string(),
            })
            .collect(),
        findings: audit.findings,
    };
    write_json_pretty(&report_path, &report)?;

    info!(
        run_id = %run_id,
        status,
        passed = summary.passed,
        failed = summary.failed,
        warning = summary.warning,
        records = audit.valid_records,
        report = %report_path.display(),
        "validation completed"
    );

    if summary.failed > 0 {
        bail!(
            "validation failed: {} check(s) failed, {} integrity violation(s); see {}",
            summary.failed,
            report.violations.len(),
            report_path.display()
        );
    }
    Ok(())
}

pub(crate) fn build_checks(
    rows: &[RecordRow],
    audit: &IntegrityAudit,
) -> Result<Vec<QualityCheck>> {
    let violations_of = |kind: &str| {
        audit
            .violations
            .iter()
            .filter(|violation| violation.kind() == kind)
            .map(ToString::to_string)
            .collect::<Vec<String>>()
    };
    let findings_of = |code: &str| {
        audit
            .findings
            .iter()
            .filter(|finding| finding.code == code)
            .map(|finding| finding.message.clone())
            .collect::<Vec<String>>()
    };

    let mut checks = vec![
        hard_check(
            "Q-001",
            "Records are well-formed with unique ids",
            &violations_of("schema_violation"),
        ),
        hard_check(
            "Q-002",
            "Impact links resolve to event parents",
            &violations_of("dangling_impact_link"),
        ),
        hard_check(
            "Q-003",
            "Indicator codes are upper snake case",
            &malformed_indicator_codes(rows)?,
        ),
        soft_check(
            "Q-004",
            "Impact-link indicators have observations or targets",
            &findings_of("unobserved_related_indicator"),
        ),
        soft_check(
            "Q-005",
            "Impact links carry quantitative estimates",
            &findings_of("missing_impact_estimate"),
        ),
        soft_check(
            "Q-006",
            "Percentage observations lie within [0, 100]",
            &findings_of("out_of_range_value"),
        ),
        soft_check(
            "Q-007",
            "At most one national observation per indicator-year",
            &findings_of("duplicate_year_observations"),
        ),
    ];

    let headline_problems = if audit.is_valid() {
        match RecordStore::from_rows(rows) {
            Ok(store) => headline_series_problems(&store),
            Err(error) => vec![error.to_string()],
        }
    } else {
        vec!["record table has integrity violations".to_string()]
    };
    checks.push(soft_check(
        "Q-008",
        "Headline indicators have a fittable trend",
        &headline_problems,
    ));

    Ok(checks)
}

fn headline_series_problems(store: &RecordStore) -> Vec<String> {
    let fallbacks = ForecastConfig::default().fallback_indicators;
    let mut problems = Vec::new();

    for code in [ACCESS_INDICATOR, USAGE_INDICATOR] {
        let fitted = extract_series(store, code).or_else(|error| match fallbacks.get(code) {
            Some(fallback) => extract_series(store, fallback),
            None => Err(error),
        });
        if let Err(error) = fitted.and_then(|series| fit_trend(&series)) {
            problems.push(error.to_string());
        }
    }
    problems
}

fn hard_check(check_id: &str, name: &str, problems: &[String]) -> QualityCheck {
    quality_check(check_id, name, problems, "failed")
}

fn soft_check(check_id: &str, name: &str, problems: &[String]) -> QualityCheck {
    quality_check(check_id, name, problems, "warning")
}

fn quality_check(
    check_id: &str,
    name: &str,
    problems: &[String],
    on_problem: &str,
) -> QualityCheck {
    let (result, detail) = if problems.is_empty() {
        ("pass", None)
    } else {
        let mut detail = problems
            .iter()
            .take(DETAIL_LIMIT)
            .cloned()
            .collect::<Vec<String>>()
            .join("; ");
        if problems.len() > DETAIL_LIMIT {
            detail.push_str(&format!(" (+{} more)", problems.len() - DETAIL_LIMIT));
        }
        (on_problem, Some(detail))
    };

    QualityCheck {
        check_id: check_id.to_string(),
        name: name.to_string(),
        result: result.to_string(),
        detail,
    }
}

fn summarize_checks(checks: &[QualityCheck]) -> CheckSummary {
    let mut summary = CheckSummary {
        total_checks: checks.len(),
        ..CheckSummary::default()
    };
    for check in checks {
        match check.result.as_str() {
            "pass" => summary.passed += 1,
            "failed" => summary.failed += 1,
            _ => summary.warning += 1,
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rows() -> Vec<RecordRow> {
        serde_json::from_str(include_str!("../../data/sample_records.json"))
            .expect("sample dataset should parse")
    }

    fn result_of<'a>(checks: &'a [QualityCheck], check_id: &str) -> &'a str {
        checks
            .iter()
            .find(|check| check.check_id == check_id)
            .map(|check| check.result.as_str())
            .expect("check should exist")
    }

    #[test]
    fn sample_dataset_has_no_failed_checks() {
        let rows = sample_rows();
        let checks = build_checks(&rows, &audit_rows(&rows)).expect("checks should build");
        let summary = summarize_checks(&checks);

        assert_eq!(summary.total_checks, 8);
        assert_eq!(summary.failed, 0);
        assert_eq!(result_of(&checks, "Q-008"), "pass");
        // REC_0004 and REC_0007 both fall in 2024.
        assert_eq!(result_of(&checks, "Q-007"), "warning");
    }

    #[test]
    fn dangling_link_and_bad_code_fail_hard_checks() {
        let mut rows = sample_rows();
        if let Some(link) = rows.iter_mut().find(|row| row.record_id == "IMP_0001") {
            link.parent_id = Some("EVT_DOES_NOT_EXIST".to_string());
        }
        if let Some(observation) = rows.iter_mut().find(|row| row.record_id == "REC_0008") {
            observation.indicator_code = Some("acc_mm_account".to_string());
        }

        let checks = build_checks(&rows, &audit_rows(&rows)).expect("checks should build");
        assert_eq!(result_of(&checks, "Q-001"), "pass");
        assert_eq!(result_of(&checks, "Q-002"), "failed");
        assert_eq!(result_of(&checks, "Q-003"), "failed");
        assert_eq!(result_of(&checks, "Q-008"), "warning");
        assert_eq!(summarize_checks(&checks).failed, 2);
    }

    #[test]
    fn long_problem_lists_are_truncated() {
        let problems = (0..8).map(|index| format!("p{index}")).collect::<Vec<String>>();
        let check = soft_check("Q-999", "example", &problems);
        assert_eq!(check.result, "warning");
        assert_eq!(
            check.detail.as_deref(),
            Some("p0; p1; p2; p3; p4 (+3 more)")
        );
    }
}
