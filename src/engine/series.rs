//! Series Extractor.
//!
//! Resolution policy when several national observations share an
//! (indicator_code, year) cell: the highest confidence tier wins
//! (high > medium > low > estimated > unspecified); ties go to the latest
//! `collection_date` (a missing date loses); remaining ties go to the record
//! appended last, so enrichment corrections override the base table.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use super::error::EngineError;
use super::record::{Confidence, Measurement, Record};
use super::store::RecordStore;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub year: i32,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorSeries {
    pub indicator_code: String,
    pub points: Vec<SeriesPoint>,
}

impl IndicatorSeries {
    pub fn last_year(&self) -> Option<i32> {
        self.points.last().map(|point| point.year)
    }

    pub fn distinct_years(&self) -> usize {
        self.points.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateYearCell {
    pub indicator_code: String,
    pub year: i32,
    pub candidate_record_ids: Vec<String>,
    pub chosen_record_id: String,
}

type Candidate<'a> = (&'a Record, &'a Measurement);
type RankKey = (Option<Confidence>, Option<NaiveDate>, usize);

pub fn extract_series(
    store: &RecordStore,
    indicator_code: &str,
) -> Result<IndicatorSeries, EngineError> {
    let cells = group_cells(store, Some(indicator_code));
    let points = cells
        .get(indicator_code)
        .map(|years| {
            years
                .iter()
                .filter_map(|(year, candidates)| {
                    choose(store, candidates).map(|(_, measurement)| SeriesPoint {
                        year: *year,
                        value: measurement.value_numeric,
                    })
                })
                .collect::<Vec<SeriesPoint>>()
        })
        .unwrap_or_default();

    if points.is_empty() {
        return Err(EngineError::MissingIndicator {
            indicator_code: indicator_code.to_string(),
        });
    }

    Ok(IndicatorSeries {
        indicator_code: indicator_code.to_string(),
        points,
    })
}

/// Cells where the resolution policy had to pick between observations.
pub fn duplicate_year_cells(store: &RecordStore) -> Vec<DuplicateYearCell> {
    let mut out = Vec::new();
    for (code, years) in group_cells(store, None) {
        for (year, candidates) in years {
            if candidates.len() < 2 {
                continue;
            }
            let Some((chosen, _)) = choose(store, &candidates) else {
                continue;
            };
            out.push(DuplicateYearCell {
                indicator_code: code.clone(),
                year,
                candidate_record_ids: candidates
                    .iter()
                    .map(|(record, _)| record.record_id.clone())
                    .collect(),
                chosen_record_id: chosen.record_id.clone(),
            });
        }
    }
    out
}

fn group_cells<'a>(
    store: &'a RecordStore,
    only: Option<&str>,
) -> BTreeMap<String, BTreeMap<i32, Vec<Candidate<'a>>>> {
    let mut cells = BTreeMap::<String, BTreeMap<i32, Vec<Candidate<'a>>>>::new();
    for (record, measurement) in store.observations() {
        if only.is_some_and(|code| code != measurement.indicator_code) {
            continue;
        }
        if !measurement.is_national_aggregate() {
            continue;
        }
        cells
            .entry(measurement.indicator_code.clone())
            .or_default()
            .entry(measurement.year())
            .or_default()
            .push((record, measurement));
    }
    cells
}

fn choose<'a>(store: &RecordStore, candidates: &[Candidate<'a>]) -> Option<Candidate<'a>> {
    candidates
        .iter()
        .copied()
        .max_by_key(|(record, _)| rank_key(store, record))
}

fn rank_key(store: &RecordStore, record: &Record) -> RankKey {
    (
        record.provenance.confidence,
        record.provenance.collection_date,
        store.position(&record.record_id).unwrap_or(0),
    )
}
