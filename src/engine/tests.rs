use super::*;

const ACCESS: &str = "ACC_OWNERSHIP";
const USAGE: &str = "USG_DIGITAL_PAY";

fn observation(id: &str, code: &str, date: &str, value: f64) -> RecordRow {
    RecordRow {
        record_id: id.to_string(),
        record_type: "observation".to_string(),
        pillar: Some("ACCESS".to_string()),
        indicator: Some("Account Ownership Rate".to_string()),
        indicator_code: Some(code.to_string()),
        observation_date: Some(date.to_string()),
        value_numeric: Some(value),
        value_type: Some("percentage".to_string()),
        unit: Some("%".to_string()),
        confidence: Some("high".to_string()),
        ..RecordRow::default()
    }
}

fn event(id: &str, date: &str) -> RecordRow {
    RecordRow {
        record_id: id.to_string(),
        record_type: "event".to_string(),
        category: Some("product_launch".to_string()),
        indicator: Some("Mobile money launch".to_string()),
        observation_date: Some(date.to_string()),
        value_text: Some("Launched".to_string()),
        confidence: Some("high".to_string()),
        ..RecordRow::default()
    }
}

fn impact_link(
    id: &str,
    parent: &str,
    indicator: &str,
    estimate: f64,
    lag_months: i64,
    evidence: &str,
) -> RecordRow {
    RecordRow {
        record_id: id.to_string(),
        record_type: "impact_link".to_string(),
        parent_id: Some(parent.to_string()),
        related_indicator: Some(indicator.to_string()),
        relationship_type: Some("direct".to_string()),
        impact_direction: Some("increase".to_string()),
        impact_magnitude: Some("medium".to_string()),
        impact_estimate: Some(estimate),
        lag_months: Some(lag_months),
        evidence_basis: Some(evidence.to_string()),
        observation_date: Some("2020-01-01".to_string()),
        ..RecordRow::default()
    }
}

fn access_history() -> Vec<RecordRow> {
    vec![
        observation("REC_0001", ACCESS, "2011-12-31", 14.0),
        observation("REC_0002", ACCESS, "2014-12-31", 22.0),
        observation("REC_0003", ACCESS, "2017-12-31", 35.0),
        observation("REC_0004", ACCESS, "2021-12-31", 46.0),
        observation("REC_0005", ACCESS, "2024-11-29", 49.0),
    ]
}

fn store_with(extra: Vec<RecordRow>) -> RecordStore {
    let mut rows = access_history();
    rows.extend(extra);
    RecordStore::from_rows(&rows).expect("fixture store should be valid")
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn lagged_effect_lands_in_effective_year_and_persists() {
    let store = store_with(vec![
        event("EVT_0001", "2024-05-11"),
        impact_link("IMP_0001", "EVT_0001", ACCESS, 10.0, 24, "literature"),
    ]);

    let result = forecast(&store, ACCESS, &[2025, 2026, 2027], &ForecastConfig::default())
        .expect("forecast should succeed");

    assert_eq!(
        result.rows.iter().map(|row| row.year).collect::<Vec<i32>>(),
        vec![2025, 2026, 2027]
    );
    let [y2025, y2026, y2027] = &result.rows[..] else {
        panic!("expected three rows");
    };
    assert!(close(y2025.value_adjusted, y2025.value_baseline));
    assert!(close(y2026.value_adjusted, y2026.value_baseline + 10.0));
    assert!(close(y2027.value_adjusted, y2027.value_baseline + 10.0));
    assert!(y2025.value_baseline > 49.0 && y2027.value_baseline < 70.0);
    assert_eq!(result.last_historical_year, 2024);
    assert_eq!(result.impact_rows_applied, 1);
}

#[test]
fn dangling_parent_is_rejected_at_store_construction() {
    let mut rows = access_history();
    rows.push(impact_link(
        "IMP_0009",
        "EVT_DOES_NOT_EXIST",
        ACCESS,
        5.0,
        12,
        "literature",
    ));

    let error = RecordStore::from_rows(&rows).expect_err("dangling link must fail");
    match error {
        EngineError::DanglingImpactLink {
            impact_link_id,
            parent_id,
            ..
        } => {
            assert_eq!(impact_link_id, "IMP_0009");
            assert_eq!(parent_id, "EVT_DOES_NOT_EXIST");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn parent_that_is_not_an_event_is_dangling() {
    let mut rows = access_history();
    rows.push(impact_link("IMP_0001", "REC_0001", ACCESS, 5.0, 0, "literature"));

    let error = RecordStore::from_rows(&rows).expect_err("observation parent must fail");
    assert_eq!(error.kind(), "dangling_impact_link");
    assert!(error.to_string().contains("not an event"));
}

#[test]
fn duplicate_record_ids_violate_schema() {
    let mut rows = access_history();
    rows.push(observation("REC_0001", ACCESS, "2025-01-01", 50.0));

    let error = RecordStore::from_rows(&rows).expect_err("duplicate id must fail");
    assert_eq!(
        error,
        EngineError::SchemaViolation {
            record_id: "REC_0001".to_string(),
            reason: "duplicate record_id".to_string(),
        }
    );
}

#[test]
fn event_with_pillar_violates_schema() {
    let mut bad_event = event("EVT_0001", "2022-01-01");
    bad_event.pillar = Some("ACCESS".to_string());

    let error = RecordStore::from_rows(&[bad_event]).expect_err("event pillar must fail");
    assert_eq!(error.kind(), "schema_violation");
    assert!(error.is_integrity_error());
}

#[test]
fn impact_link_requires_direction_and_non_negative_values() {
    let mut no_direction = impact_link("IMP_0001", "EVT_0001", ACCESS, 5.0, 0, "literature");
    no_direction.impact_direction = None;
    let negative_estimate = impact_link("IMP_0002", "EVT_0001", ACCESS, -5.0, 0, "literature");
    let negative_lag = impact_link("IMP_0003", "EVT_0001", ACCESS, 5.0, -3, "literature");

    for row in [no_direction, negative_estimate, negative_lag] {
        let rows = vec![event("EVT_0001", "2022-01-01"), row];
        let error = RecordStore::from_rows(&rows).expect_err("row must be rejected");
        assert_eq!(error.kind(), "schema_violation", "{error}");
    }
}

#[test]
fn effective_year_counts_completed_years_only() {
    let date = chrono::NaiveDate::from_ymd_opt(2024, 10, 1).expect("valid date");
    assert_eq!(effective_year(date, 0), 2024);
    assert_eq!(effective_year(date, 6), 2024);
    assert_eq!(effective_year(date, 11), 2024);
    assert_eq!(effective_year(date, 12), 2025);
    assert_eq!(effective_year(date, 23), 2025);
    assert_eq!(effective_year(date, 36), 2027);
}

#[test]
fn impact_rows_never_land_before_their_event() {
    let mut extra = vec![
        event("EVT_0001", "2019-03-01"),
        event("EVT_0002", "2023-12-31"),
    ];
    for (index, lag) in [0_i64, 5, 12, 18, 30, 47].into_iter().enumerate() {
        let parent = if index % 2 == 0 { "EVT_0001" } else { "EVT_0002" };
        extra.push(impact_link(
            &format!("IMP_{index:04}"),
            parent,
            ACCESS,
            1.0,
            lag,
            "estimated",
        ));
    }
    let store = store_with(extra);

    let rows = build_impact_matrix(&store).expect("matrix should build");
    assert_eq!(rows.len(), 6);
    for row in &rows {
        let event_year = chrono::Datelike::year(&row.event_date);
        assert!(row.effective_year >= event_year, "{row:?}");
    }
}

#[test]
fn event_date_comes_from_parent_not_link_row() {
    let mut link = impact_link("IMP_0001", "EVT_0001", ACCESS, 4.0, 0, "literature");
    link.observation_date = Some("1999-01-01".to_string());
    let store = store_with(vec![event("EVT_0001", "2022-07-01"), link]);

    let rows = build_impact_matrix(&store).expect("matrix should build");
    assert_eq!(rows[0].effective_year, 2022);
    assert_eq!(rows[0].event_id, "EVT_0001");
}

#[test]
fn decrease_direction_produces_negative_delta() {
    let mut link = impact_link("IMP_0001", "EVT_0001", ACCESS, 3.0, 0, "literature");
    link.impact_direction = Some("decrease".to_string());
    let store = store_with(vec![event("EVT_0001", "2025-02-01"), link]);

    let rows = build_impact_matrix(&store).expect("matrix should build");
    assert!(close(rows[0].signed_effect, -3.0));

    let result = forecast(&store, ACCESS, &[2025], &ForecastConfig::default())
        .expect("forecast should succeed");
    assert!(close(
        result.rows[0].value_adjusted,
        result.rows[0].value_baseline - 3.0
    ));
}

#[test]
fn cumulative_effect_is_monotonic_for_positive_effects() {
    let store = store_with(vec![
        event("EVT_0001", "2024-03-01"),
        event("EVT_0002", "2025-06-01"),
        impact_link("IMP_0001", "EVT_0001", ACCESS, 2.0, 12, "literature"),
        impact_link("IMP_0002", "EVT_0002", ACCESS, 1.5, 0, "expert_judgment"),
        impact_link("IMP_0003", "EVT_0002", ACCESS, 0.5, 36, "estimated"),
    ]);

    let result = forecast(
        &store,
        ACCESS,
        &[2025, 2026, 2027, 2028, 2029],
        &ForecastConfig::default(),
    )
    .expect("forecast should succeed");

    let effects = result
        .rows
        .iter()
        .map(|row| row.value_adjusted - row.value_baseline)
        .collect::<Vec<f64>>();
    assert!(effects.windows(2).all(|pair| pair[1] >= pair[0] - 1e-12));
    assert!(close(effects[0], 3.5));
    assert!(close(effects[3], 4.0));
}

fn rate_history(code: &str) -> Vec<RecordRow> {
    [(2019, 80.0), (2021, 95.0), (2024, 118.0)]
        .into_iter()
        .enumerate()
        .map(|(index, (year, value))| {
            let mut row = observation(
                &format!("REC_RATE_{index}"),
                code,
                &format!("{year}-12-31"),
                value,
            );
            row.value_type = Some("rate".to_string());
            row.unit = Some("per 100k adults".to_string());
            row
        })
        .collect()
}

fn assert_row_is_bounded(row: &ForecastRow, range: ValueRange, context: &str) {
    for value in [
        row.value_baseline,
        row.value_adjusted,
        row.scenario_optimistic,
        row.scenario_pessimistic,
        row.ci_lower,
        row.ci_upper,
    ] {
        assert!(value.is_finite(), "{context}: {row:?}");
    }
    for value in [
        row.value_adjusted,
        row.scenario_optimistic,
        row.scenario_pessimistic,
        row.ci_lower,
        row.ci_upper,
    ] {
        assert!(range.contains(value), "{context}: {row:?}");
    }
    assert!(row.scenario_pessimistic <= row.value_adjusted, "{context}: {row:?}");
    assert!(row.value_adjusted <= row.scenario_optimistic, "{context}: {row:?}");
    assert!(row.ci_lower <= row.value_adjusted, "{context}: {row:?}");
    assert!(row.value_adjusted <= row.ci_upper, "{context}: {row:?}");
}

#[test]
fn extreme_effects_stay_clamped_and_ordered() {
    const RATE: &str = "ACC_ATM_DENSITY";
    let cases = [
        ("increase", vec![1.0e6]),
        ("decrease", vec![1.0e6]),
        ("increase", vec![0.0]),
        ("decrease", vec![75.0]),
        ("increase", vec![250.0]),
        ("increase", vec![1.0e308, 1.0e308]),
        ("decrease", vec![1.0e308, 1.0e308, 1.0e308]),
        ("increase", vec![f64::MAX, f64::MAX, 1.0]),
    ];

    for (code, history) in [(ACCESS, access_history()), (RATE, rate_history(RATE))] {
        for (direction, estimates) in &cases {
            let mut rows = history.clone();
            rows.push(event("EVT_0001", "2024-01-15"));
            for (index, estimate) in estimates.iter().enumerate() {
                let mut link = impact_link(
                    &format!("IMP_{index:04}"),
                    "EVT_0001",
                    code,
                    *estimate,
                    12 * index as i64,
                    "estimated",
                );
                link.impact_direction = Some(direction.to_string());
                rows.push(link);
            }
            let store = RecordStore::from_rows(&rows).expect("fixture store should be valid");

            for fraction in [0.0, 0.5, 1.0] {
                let config = ForecastConfig {
                    scenario_fraction: fraction,
                    ..ForecastConfig::default()
                };
                let result = forecast(&store, code, &[2025, 2026, 2030, 2060], &config)
                    .expect("forecast should succeed");

                let context = format!("{code} {direction} {estimates:?} fraction={fraction}");
                for row in &result.rows {
                    assert_row_is_bounded(row, result.value_range, &context);
                    if fraction == 0.0 {
                        assert_eq!(row.scenario_optimistic, row.value_adjusted, "{context}");
                        assert_eq!(row.scenario_pessimistic, row.value_adjusted, "{context}");
                    }
                }
                if estimates[0] >= 1.0e6 && code == ACCESS {
                    assert!(!result.range_warnings.is_empty(), "{context}");
                }
            }
        }
    }
}

#[test]
fn overflowing_uncertain_effects_with_zero_fraction_keep_scenarios_in_range() {
    let store = store_with(vec![
        event("EVT_0001", "2024-03-01"),
        impact_link("IMP_0001", "EVT_0001", ACCESS, 1.0e308, 0, "expert_judgment"),
        impact_link("IMP_0002", "EVT_0001", ACCESS, 1.0e308, 0, "estimated"),
    ]);
    let config = ForecastConfig {
        scenario_fraction: 0.0,
        ..ForecastConfig::default()
    };

    let result = forecast(&store, ACCESS, &[2026], &config).expect("forecast should succeed");
    let row = &result.rows[0];
    assert_eq!(row.value_adjusted, 100.0);
    assert_eq!(row.scenario_optimistic, 100.0);
    assert_eq!(row.scenario_pessimistic, 100.0);
}

#[test]
fn overflowing_effects_on_rate_indicator_saturate_at_finite_maximum() {
    let mut rows = rate_history("ACC_ATM_DENSITY");
    rows.push(event("EVT_0001", "2024-03-01"));
    rows.push(impact_link("IMP_0001", "EVT_0001", "ACC_ATM_DENSITY", 1.0e308, 0, "estimated"));
    rows.push(impact_link("IMP_0002", "EVT_0001", "ACC_ATM_DENSITY", 1.0e308, 0, "estimated"));
    let store = RecordStore::from_rows(&rows).expect("store should be valid");

    let result = forecast(&store, "ACC_ATM_DENSITY", &[2026], &ForecastConfig::default())
        .expect("forecast should succeed");
    let row = &result.rows[0];
    assert_eq!(result.value_range, ValueRange::NON_NEGATIVE);
    assert_eq!(row.value_adjusted, f64::MAX);
    assert_eq!(row.ci_upper, f64::MAX);
    assert_eq!(row.scenario_optimistic, f64::MAX);
    assert!(row.scenario_pessimistic.is_finite());
    assert!(row.scenario_pessimistic <= row.value_adjusted);
}

#[test]
fn nan_is_clamped_to_range_floor() {
    assert_eq!(ValueRange::PERCENTAGE.clamp(f64::NAN), 0.0);
    assert_eq!(ValueRange::NON_NEGATIVE.clamp(f64::INFINITY), f64::MAX);
}

#[test]
fn last_value_trend_projects_flat_with_collapsed_interval() {
    let store = store_with(vec![
        event("EVT_0001", "2024-05-11"),
        impact_link("IMP_0001", "EVT_0001", ACCESS, 10.0, 24, "literature"),
    ]);
    let config = ForecastConfig {
        trend_method: TrendMethod::Last,
        ..ForecastConfig::default()
    };

    let result = forecast(&store, ACCESS, &[2025, 2026], &config).expect("forecast should succeed");
    let [y2025, y2026] = &result.rows[..] else {
        panic!("expected two rows");
    };
    assert_eq!(y2025.value_baseline, 49.0);
    assert_eq!(y2026.value_baseline, 49.0);
    assert!(close(y2025.value_adjusted, 49.0));
    assert!(close(y2026.value_adjusted, 59.0));
    for row in &result.rows {
        assert_eq!(row.ci_lower, row.value_adjusted);
        assert_eq!(row.ci_upper, row.value_adjusted);
    }
}

#[test]
fn landed_effects_are_prefix_sums_of_year_buckets() {
    let store = store_with(vec![
        event("EVT_0001", "2024-01-01"),
        impact_link("IMP_0001", "EVT_0001", ACCESS, 2.0, 0, "literature"),
        impact_link("IMP_0002", "EVT_0001", ACCESS, 3.0, 12, "expert_judgment"),
        impact_link("IMP_0003", "EVT_0001", ACCESS, 1.0, 36, "estimated"),
    ]);
    let rows = build_impact_matrix(&store).expect("matrix should build");
    let by_year = effects_by_year(&rows, ACCESS);
    assert_eq!(by_year.keys().copied().collect::<Vec<i32>>(), vec![2024, 2025, 2027]);

    let in_2023 = landed_effects(&by_year, 2023);
    assert_eq!(in_2023, YearEffects::default());
    let in_2026 = landed_effects(&by_year, 2026);
    assert!(close(in_2026.signed_effect, 5.0));
    assert!(close(in_2026.uncertain_magnitude, 3.0));
    assert_eq!(in_2026.link_count, 2);
    let in_2030 = landed_effects(&by_year, 2030);
    assert!(close(in_2030.signed_effect, 6.0));
    assert!(close(in_2030.uncertain_magnitude, 4.0));
}

#[test]
fn association_totals_match_year_bucketed_effects() {
    let store = store_with(vec![
        event("EVT_0001", "2021-01-01"),
        event("EVT_0002", "2024-09-01"),
        impact_link("IMP_0001", "EVT_0001", ACCESS, 4.0, 0, "literature"),
        impact_link("IMP_0002", "EVT_0001", ACCESS, 2.0, 30, "expert_judgment"),
        impact_link("IMP_0003", "EVT_0002", ACCESS, 1.0, 6, "literature"),
        impact_link("IMP_0004", "EVT_0002", USAGE, 3.0, 18, "literature"),
    ]);
    let rows = build_impact_matrix(&store).expect("matrix should build");
    let matrix = build_event_indicator_association_matrix(&rows);

    for indicator in [ACCESS, USAGE] {
        let timed_total = effects_by_year(&rows, indicator)
            .values()
            .map(|effects| effects.signed_effect)
            .sum::<f64>();
        let association_total = matrix
            .iter()
            .filter(|((_, code), _)| code == indicator)
            .map(|(_, cell)| cell.total_effect)
            .sum::<f64>();
        assert!(close(timed_total, association_total), "{indicator}");
    }

    let cell = matrix
        .get(&("EVT_0001".to_string(), ACCESS.to_string()))
        .expect("cell should exist");
    assert!(close(cell.total_effect, 6.0));
    assert_eq!(cell.link_count, 2);

    let entries = association_entries(&matrix);
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].event_id, "EVT_0001");
}

#[test]
fn forecast_is_idempotent() {
    let store = store_with(vec![
        event("EVT_0001", "2024-05-11"),
        impact_link("IMP_0001", "EVT_0001", ACCESS, 6.0, 12, "expert_judgment"),
    ]);
    let config = ForecastConfig::default();

    let first = forecast(&store, ACCESS, &[2027, 2025, 2026], &config).expect("first run");
    let second = forecast(&store, ACCESS, &[2025, 2026, 2027], &config).expect("second run");
    assert_eq!(first, second);
}

#[test]
fn scenario_spread_comes_from_non_literature_effects() {
    let store = store_with(vec![
        event("EVT_0001", "2025-01-01"),
        impact_link("IMP_0001", "EVT_0001", ACCESS, 4.0, 0, "literature"),
        impact_link("IMP_0002", "EVT_0001", ACCESS, 3.0, 12, "expert_judgment"),
    ]);

    let result = forecast(&store, ACCESS, &[2025, 2026], &ForecastConfig::default())
        .expect("forecast should succeed");
    let y2025 = &result.rows[0];
    let y2026 = &result.rows[1];
    assert!(close(y2025.scenario_optimistic, y2025.value_adjusted));
    assert!(close(y2025.scenario_pessimistic, y2025.value_adjusted));
    assert!(close(y2026.scenario_optimistic, y2026.value_adjusted + 1.5));
    assert!(close(y2026.scenario_pessimistic, y2026.value_adjusted - 1.5));

    let wider = ForecastConfig {
        scenario_fraction: 1.0,
        ..ForecastConfig::default()
    };
    let result = forecast(&store, ACCESS, &[2026], &wider).expect("forecast should succeed");
    assert!(close(
        result.rows[0].scenario_optimistic - result.rows[0].value_adjusted,
        3.0
    ));
}

#[test]
fn interval_widens_away_from_history() {
    let store = store_with(Vec::new());
    let result = forecast(
        &store,
        ACCESS,
        &[2025, 2027, 2029],
        &ForecastConfig {
            confidence_level: 0.8,
            ..ForecastConfig::default()
        },
    )
    .expect("forecast should succeed");

    let widths = result
        .rows
        .iter()
        .map(|row| row.ci_upper - row.ci_lower)
        .collect::<Vec<f64>>();
    assert!(widths[0] > 0.0);
    assert!(widths[1] > widths[0]);
    assert!(widths[2] > widths[1]);
}

#[test]
fn two_point_history_collapses_interval() {
    let store = RecordStore::from_rows(&[
        observation("REC_0001", USAGE, "2021-12-31", 18.0),
        observation("REC_0002", USAGE, "2024-12-31", 35.0),
    ])
    .expect("store should be valid");

    let result = forecast(&store, USAGE, &[2025], &ForecastConfig::default())
        .expect("forecast should succeed");
    let row = &result.rows[0];
    assert!(close(row.ci_lower, row.value_adjusted));
    assert!(close(row.ci_upper, row.value_adjusted));
}

#[test]
fn forecasting_into_history_is_rejected() {
    let store = store_with(Vec::new());
    let error = forecast(&store, ACCESS, &[2025, 2024], &ForecastConfig::default())
        .expect_err("2024 is historical");
    assert_eq!(
        error,
        EngineError::InvalidForecastYear {
            indicator_code: ACCESS.to_string(),
            year: 2024,
            last_historical_year: 2024,
        }
    );
}

#[test]
fn missing_and_sparse_indicators_fail_per_indicator() {
    let mut rows = access_history();
    rows.push(observation("REC_0100", USAGE, "2024-12-31", 35.0));
    let store = RecordStore::from_rows(&rows).expect("store should be valid");
    let config = ForecastConfig::default();

    let missing = forecast(&store, "ACC_MM_ACCOUNT", &[2025], &config).expect_err("no data");
    assert_eq!(missing.kind(), "missing_indicator");

    let sparse = forecast(&store, USAGE, &[2025], &config).expect_err("one year only");
    assert_eq!(sparse.kind(), "insufficient_data");
}

#[test]
fn invalid_config_is_rejected() {
    let store = store_with(Vec::new());
    let config = ForecastConfig {
        confidence_level: 1.0,
        ..ForecastConfig::default()
    };
    let error = forecast(&store, ACCESS, &[2025], &config).expect_err("level must be < 1");
    assert_eq!(error.kind(), "invalid_config");
}

#[test]
fn events_can_be_switched_off() {
    let store = store_with(vec![
        event("EVT_0001", "2024-05-11"),
        impact_link("IMP_0001", "EVT_0001", ACCESS, 8.0, 0, "estimated"),
    ]);
    let config = ForecastConfig {
        apply_events: false,
        ..ForecastConfig::default()
    };

    let result = forecast(&store, ACCESS, &[2025, 2026], &config).expect("forecast");
    for row in &result.rows {
        assert!(close(row.value_adjusted, row.value_baseline));
        assert!(close(row.scenario_optimistic, row.value_adjusted));
    }
    assert_eq!(result.impact_rows_applied, 0);
}

#[test]
fn series_resolution_prefers_confidence_then_collection_date() {
    let mut medium = observation("REC_0100", ACCESS, "2024-06-30", 47.0);
    medium.confidence = Some("medium".to_string());
    medium.collection_date = Some("2025-06-01".to_string());

    let mut early_high = observation("REC_0101", ACCESS, "2021-03-31", 44.0);
    early_high.collection_date = Some("2022-01-01".to_string());
    let mut late_high = observation("REC_0102", ACCESS, "2021-09-30", 45.5);
    late_high.collection_date = Some("2023-01-01".to_string());

    let mut urban = observation("REC_0103", ACCESS, "2017-12-31", 61.0);
    urban.location = Some("urban".to_string());

    let store = store_with(vec![medium, early_high, late_high, urban]);
    let series = extract_series(&store, ACCESS).expect("series should exist");

    let points = series
        .points
        .iter()
        .map(|point| (point.year, point.value))
        .collect::<Vec<(i32, f64)>>();
    assert_eq!(
        points,
        vec![
            (2011, 14.0),
            (2014, 22.0),
            (2017, 35.0),
            (2021, 45.5),
            (2024, 49.0),
        ]
    );

    let cells = series::duplicate_year_cells(&store);
    assert_eq!(cells.len(), 2);
    let chosen = cells
        .iter()
        .map(|cell| cell.chosen_record_id.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(chosen, vec!["REC_0102", "REC_0005"]);
}

#[test]
fn enrichment_correction_wins_exact_ties() {
    let base = RecordStore::from_rows(&access_history()).expect("base store");
    let correction = observation("REC_ENR_001", ACCESS, "2024-12-31", 49.4);

    let enriched = base.extend(&[correction]).expect("enrichment should apply");
    let series = extract_series(&enriched, ACCESS).expect("series");
    assert_eq!(series.points.last().map(|point| point.value), Some(49.4));
}

#[test]
fn batch_collects_failures_and_uses_fallback_series() {
    let mut rows = access_history();
    rows.push(observation("REC_0200", "USG_ACTIVE_RATE", "2022-12-31", 20.0));
    rows.push(observation("REC_0201", "USG_ACTIVE_RATE", "2024-12-31", 30.0));
    rows.push(observation("REC_0202", "ACC_MM_ACCOUNT", "2024-12-31", 9.5));
    let store = RecordStore::from_rows(&rows).expect("store should be valid");

    let codes = [ACCESS, USAGE, "ACC_MM_ACCOUNT", "ACC_UNKNOWN"]
        .iter()
        .map(|code| code.to_string())
        .collect::<Vec<String>>();
    let batch = forecast_batch(&store, &codes, &[2025, 2026], &ForecastConfig::default())
        .expect("batch should run");

    assert_eq!(batch.forecasts.len(), 2);
    let usage = &batch.forecasts[1];
    assert_eq!(usage.indicator_code, USAGE);
    assert_eq!(usage.source_indicator, "USG_ACTIVE_RATE");
    assert!(close(usage.rows[0].value_baseline, 35.0));

    let failures = batch
        .failures
        .iter()
        .map(|failure| (failure.indicator_code.as_str(), failure.kind))
        .collect::<Vec<(&str, &str)>>();
    assert_eq!(
        failures,
        vec![
            ("ACC_MM_ACCOUNT", "insufficient_data"),
            ("ACC_UNKNOWN", "missing_indicator"),
        ]
    );
}

#[test]
fn target_progress_uses_matching_forecast_year() {
    let target = RecordRow {
        record_id: "TGT_0001".to_string(),
        record_type: "target".to_string(),
        pillar: Some("ACCESS".to_string()),
        indicator_code: Some(ACCESS.to_string()),
        observation_date: Some("2026-12-31".to_string()),
        value_numeric: Some(70.0),
        ..RecordRow::default()
    };
    let store = store_with(vec![target]);
    let result = forecast(&store, ACCESS, &[2025, 2026, 2027], &ForecastConfig::default())
        .expect("forecast should succeed");

    let progress = target_progress(&store, &result);
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0].forecast_year, 2026);
    assert!(close(
        progress[0].progress_adjusted,
        result.rows[1].value_adjusted / 70.0
    ));
    assert!(progress[0].progress_adjusted <= 1.0);
}

#[test]
fn audit_reports_every_violation_and_soft_finding() {
    let mut rows = access_history();
    rows.push(observation("REC_0001", ACCESS, "2025-01-01", 50.0));
    rows.push(event("EVT_0001", "2023-01-01"));
    rows.push(impact_link("IMP_0001", "EVT_MISSING", ACCESS, 1.0, 0, "literature"));
    rows.push(impact_link("IMP_0002", "EVT_0001", "USG_WAGES", 1.0, 0, "literature"));
    let mut no_estimate = impact_link("IMP_0003", "EVT_0001", ACCESS, 0.0, 0, "estimated");
    no_estimate.impact_estimate = None;
    rows.push(no_estimate);
    rows.push(observation("REC_0300", ACCESS, "2020-12-31", 140.0));

    let audit = audit_rows(&rows);
    assert!(!audit.is_valid());
    let kinds = audit
        .violations
        .iter()
        .map(EngineError::kind)
        .collect::<Vec<&str>>();
    assert_eq!(kinds, vec!["schema_violation", "dangling_impact_link"]);

    let codes = audit
        .findings
        .iter()
        .map(|finding| finding.code)
        .collect::<Vec<&str>>();
    assert!(codes.contains(&"unobserved_related_indicator"));
    assert!(codes.contains(&"missing_impact_estimate"));
    assert!(codes.contains(&"out_of_range_value"));
}

#[test]
fn enrichment_verification_reports_coverage_changes() {
    let base_rows = access_history();
    let before = RecordStore::from_rows(&base_rows).expect("base store");
    let enrichment = vec![
        observation("REC_ENR_002_2021", USAGE, "2021-12-31", 18.0),
        observation("REC_ENR_002_2024", USAGE, "2024-12-31", 35.0),
        observation("REC_ENR_010", ACCESS, "2022-12-31", 47.0),
        event("EVT_ENR_001", "2024-06-01"),
        impact_link("IMP_ENR_001", "EVT_ENR_001", USAGE, 5.0, 12, "literature"),
    ];
    let after = before.clone().extend(&enrichment).expect("enrichment applies");

    let report = verify_enrichment(&before, &after);
    assert_eq!(report.indicators_added, vec![USAGE.to_string()]);
    assert_eq!(
        report.years_expanded_for_existing_indicators.get(ACCESS),
        Some(&vec![2022])
    );
    assert_eq!(report.record_type_counts_before.get("event"), Some(&0));
    assert_eq!(report.record_type_counts_after.get("impact_link"), Some(&1));
    assert!(report.parent_id_links_valid);
    assert_eq!(before.len(), 5);
    assert_eq!(after.len(), 10);
}

#[test]
fn events_timeline_is_sorted_by_date() {
    let store = store_with(vec![
        event("EVT_0002", "2023-02-01"),
        event("EVT_0001", "2021-05-01"),
    ]);
    let timeline = store.events_timeline();
    let ids = timeline
        .iter()
        .map(|event| event.event_id.as_str())
        .collect::<Vec<&str>>();
    assert_eq!(ids, vec!["EVT_0001", "EVT_0002"]);
}

#[test]
fn non_percentage_indicator_is_not_capped_at_100() {
    let mut rows = Vec::new();
    for (index, (year, value)) in [(2019, 80.0), (2021, 95.0), (2024, 118.0)]
        .into_iter()
        .enumerate()
    {
        let mut row = observation(
            &format!("REC_ATM_{index}"),
            "ACC_ATM_DENSITY",
            &format!("{year}-12-31"),
            value,
        );
        row.value_type = Some("rate".to_string());
        row.unit = Some("per 100k adults".to_string());
        rows.push(row);
    }
    let store = RecordStore::from_rows(&rows).expect("store should be valid");

    let result = forecast(&store, "ACC_ATM_DENSITY", &[2027], &ForecastConfig::default())
        .expect("forecast should succeed");
    assert!(result.rows[0].value_adjusted > 100.0);
    assert!(result.range_warnings.is_empty());
}

#[test]
fn out_of_range_warning_maps_to_error_kind() {
    let warning = OutOfRangeValue {
        indicator_code: ACCESS.to_string(),
        year: 2030,
        stage: "value_adjusted",
        value: 104.2,
        min: 0.0,
        max: 100.0,
    };
    let error = EngineError::from(warning);
    assert_eq!(error.kind(), "out_of_range_value");
    assert!(!error.is_integrity_error());
    assert!(error.to_string().contains("2030"));
}

#[test]
fn store_can_be_shared_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<RecordStore>();

    let store = store_with(vec![
        event("EVT_0001", "2024-05-11"),
        impact_link("IMP_0001", "EVT_0001", ACCESS, 10.0, 24, "literature"),
    ]);
    let config = ForecastConfig::default();
    let sequential = forecast(&store, ACCESS, &[2025, 2026], &config).expect("forecast");

    let threaded = std::thread::scope(|scope| {
        scope
            .spawn(|| forecast(&store, ACCESS, &[2025, 2026], &config))
            .join()
            .expect("thread should not panic")
    })
    .expect("forecast");
    assert_eq!(sequential, threaded);
}

#[test]
fn sample_dataset_forecasts_access_and_usage() {
    let rows: Vec<RecordRow> =
        serde_json::from_str(include_str!("../../data/sample_records.json"))
            .expect("sample dataset should parse");
    let store = RecordStore::from_rows(&rows).expect("sample dataset should validate");

    let codes = vec![ACCESS.to_string(), USAGE.to_string()];
    let batch = forecast_batch(&store, &codes, &[2025, 2026, 2027], &ForecastConfig::default())
        .expect("batch should run");

    assert!(batch.failures.is_empty(), "{:?}", batch.failures);
    assert_eq!(batch.forecasts.len(), 2);
    for result in &batch.forecasts {
        assert_eq!(result.rows.len(), 3);
        assert!(result.impact_rows_applied > 0);
    }
}

#[test]
fn sample_enrichment_replaces_usage_fallback() {
    let base_rows: Vec<RecordRow> =
        serde_json::from_str(include_str!("../../data/sample_records.json"))
            .expect("sample dataset should parse");
    let enrichment_rows: Vec<RecordRow> =
        serde_json::from_str(include_str!("../../data/sample_enrichment.json"))
            .expect("sample enrichment should parse");
    let before = RecordStore::from_rows(&base_rows).expect("base should validate");
    let after = before
        .clone()
        .extend(&enrichment_rows)
        .expect("enrichment should validate");

    let report = verify_enrichment(&before, &after);
    assert!(report.parent_id_links_valid);
    assert!(report.indicators_added.contains(&USAGE.to_string()));
    assert_eq!(
        report.years_expanded_for_existing_indicators.get(ACCESS),
        Some(&vec![2011])
    );

    let codes = vec![USAGE.to_string()];
    let batch = forecast_batch(&after, &codes, &[2025, 2026, 2027], &ForecastConfig::default())
        .expect("batch should run");
    assert_eq!(batch.forecasts[0].source_indicator, USAGE);
}
