//! Unified Record Store.
//!
//! Built once from a record table, optionally extended with an enrichment
//! batch, then read-only. Construction fails on the first schema or linkage
//! violation; [`audit_rows`] collects every problem for reporting instead.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use super::error::EngineError;
use super::record::{
    EventDetails, ImpactLinkDetails, Measurement, Record, RecordKind, RecordRow, RecordType,
    TargetDetails,
};
use super::series::duplicate_year_cells;

#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<Record>,
    index: HashMap<String, usize>,
}

impl RecordStore {
    pub fn from_rows(rows: &[RecordRow]) -> Result<Self, EngineError> {
        let records = rows
            .iter()
            .map(Record::try_from)
            .collect::<Result<Vec<Record>, EngineError>>()?;
        Self::from_records(records)
    }

    pub fn from_records(records: Vec<Record>) -> Result<Self, EngineError> {
        let index = build_index(&records)?;
        let store = Self { records, index };
        if let Some(error) = store.link_violations().into_iter().next() {
            return Err(error);
        }
        Ok(store)
    }

    /// Appends an enrichment batch. Existing records are left untouched and
    /// the combined table is re-validated.
    pub fn extend(self, rows: &[RecordRow]) -> Result<Self, EngineError> {
        let mut records = self.records;
        for row in rows {
            records.push(Record::try_from(row)?);
        }
        Self::from_records(records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn get(&self, record_id: &str) -> Option<&Record> {
        self.index
            .get(record_id)
            .and_then(|position| self.records.get(*position))
    }

    /// Insertion position; later enrichment rows have larger positions.
    pub fn position(&self, record_id: &str) -> Option<usize> {
        self.index.get(record_id).copied()
    }

    pub fn observations(&self) -> impl Iterator<Item = (&Record, &Measurement)> {
        self.records.iter().filter_map(|record| match &record.kind {
            RecordKind::Observation(measurement) => Some((record, measurement)),
            _ => None,
        })
    }

    pub fn events(&self) -> impl Iterator<Item = (&Record, &EventDetails)> {
        self.records.iter().filter_map(|record| match &record.kind {
            RecordKind::Event(event) => Some((record, event)),
            _ => None,
        })
    }

    pub fn impact_links(&self) -> impl Iterator<Item = (&Record, &ImpactLinkDetails)> {
        self.records.iter().filter_map(|record| match &record.kind {
            RecordKind::ImpactLink(link) => Some((record, link)),
            _ => None,
        })
    }

    pub fn targets(&self) -> impl Iterator<Item = (&Record, &TargetDetails)> {
        self.records.iter().filter_map(|record| match &record.kind {
            RecordKind::Target(target) => Some((record, target)),
            _ => None,
        })
    }

    pub fn resolve_event(
        &self,
        impact_link_id: &str,
        parent_id: &str,
    ) -> Result<(&Record, &EventDetails), EngineError> {
        let dangling = |reason: String| EngineError::DanglingImpactLink {
            impact_link_id: impact_link_id.to_string(),
            parent_id: parent_id.to_string(),
            reason,
        };

        let parent = self
            .get(parent_id)
            .ok_or_else(|| dangling("no record with this id".to_string()))?;
        match &parent.kind {
            RecordKind::Event(event) => Ok((parent, event)),
            _ => Err(dangling(format!(
                "parent is a {} record, not an event",
                parent.record_type().as_str()
            ))),
        }
    }

    pub fn indicator_codes(&self) -> BTreeSet<String> {
        let observed = self
            .observations()
            .map(|(_, measurement)| measurement.indicator_code.clone());
        let targeted = self
            .targets()
            .map(|(_, target)| target.indicator_code.clone());
        observed.chain(targeted).collect()
    }

    /// Percentage unless every observation of the indicator says otherwise.
    pub fn is_percentage_indicator(&self, indicator_code: &str) -> bool {
        let declarations = self
            .observations()
            .filter(|(_, measurement)| measurement.indicator_code == indicator_code)
            .map(|(_, measurement)| measurement.declares_percentage())
            .collect::<Vec<Option<bool>>>();
        declarations.is_empty() || !declarations.iter().all(|value| *value == Some(false))
    }

    pub fn record_type_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = RecordType::ALL
            .iter()
            .map(|record_type| (record_type.as_str().to_string(), 0_usize))
            .collect::<BTreeMap<String, usize>>();
        for record in &self.records {
            *counts
                .entry(record.record_type().as_str().to_string())
                .or_default() += 1;
        }
        counts
    }

    /// Years with at least one observation, per indicator.
    pub fn temporal_coverage(&self) -> BTreeMap<String, Vec<i32>> {
        let mut coverage = BTreeMap::<String, BTreeSet<i32>>::new();
        for (_, measurement) in self.observations() {
            coverage
                .entry(measurement.indicator_code.clone())
                .or_default()
                .insert(measurement.year());
        }
        coverage
            .into_iter()
            .map(|(code, years)| (code, years.into_iter().collect()))
            .collect()
    }

    pub fn events_timeline(&self) -> Vec<TimelineEvent> {
        let mut timeline = self
            .events()
            .map(|(record, event)| TimelineEvent {
                event_id: record.record_id.clone(),
                event_date: event.event_date,
                category: event.category.clone(),
                name: event.name.clone(),
                status: event.status.clone(),
            })
            .collect::<Vec<TimelineEvent>>();
        timeline.sort_by(|a, b| {
            a.event_date
                .cmp(&b.event_date)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        timeline
    }

    /// Non-fatal observations about the table's content.
    pub fn soft_findings(&self) -> Vec<Finding> {
        let mut findings = Vec::new();
        let known_codes = self.indicator_codes();

        for (record, link) in self.impact_links() {
            if !known_codes.contains(&link.related_indicator) {
                findings.push(Finding {
                    code: "unobserved_related_indicator",
                    record_id: Some(record.record_id.clone()),
                    indicator_code: Some(link.related_indicator.clone()),
                    message: format!(
                        "impact link targets '{}' which has no observation or target records",
                        link.related_indicator
                    ),
                });
            }
            if link.impact_estimate.is_none() {
                findings.push(Finding {
                    code: "missing_impact_estimate",
                    record_id: Some(record.record_id.clone()),
                    indicator_code: Some(link.related_indicator.clone()),
                    message: "impact link has no quantitative estimate; counted as 0 pp"
                        .to_string(),
                });
            }
        }

        for (record, measurement) in self.observations() {
            if !self.is_percentage_indicator(&measurement.indicator_code) {
                continue;
            }
            let value = measurement.value_numeric;
            if !(0.0..=100.0).contains(&value) {
                findings.push(Finding {
                    code: "out_of_range_value",
                    record_id: Some(record.record_id.clone()),
                    indicator_code: Some(measurement.indicator_code.clone()),
                    message: format!("percentage observation {value} is outside [0, 100]"),
                });
            }
        }

        for cell in duplicate_year_cells(self) {
            findings.push(Finding {
                code: "duplicate_year_observations",
                record_id: Some(cell.chosen_record_id.clone()),
                indicator_code: Some(cell.indicator_code.clone()),
                message: format!(
                    "{} observations in {}; kept '{}' (highest confidence, then latest collection_date, then last appended), dropped {:?}",
                    cell.candidate_record_ids.len(),
                    cell.year,
                    cell.chosen_record_id,
                    cell.candidate_record_ids
                        .iter()
                        .filter(|id| **id != cell.chosen_record_id)
                        .collect::<Vec<&String>>()
                ),
            });
        }

        findings
    }

    fn link_violations(&self) -> Vec<EngineError> {
        self.impact_links()
            .filter_map(|(record, link)| {
                self.resolve_event(&record.record_id, &link.parent_id).err()
            })
            .collect()
    }
}

fn build_index(records: &[Record]) -> Result<HashMap<String, usize>, EngineError> {
    let mut index = HashMap::with_capacity(records.len());
    for (position, record) in records.iter().enumerate() {
        if index.insert(record.record_id.clone(), position).is_some() {
            return Err(EngineError::schema(&record.record_id, "duplicate record_id"));
        }
    }
    Ok(index)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub code: &'static str,
    pub record_id: Option<String>,
    pub indicator_code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineEvent {
    pub event_id: String,
    pub event_date: NaiveDate,
    pub category: Option<String>,
    pub name: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct IntegrityAudit {
    pub violations: Vec<EngineError>,
    pub findings: Vec<Finding>,
    pub valid_records: usize,
}

impl IntegrityAudit {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Checks a record table without stopping at the first problem.
pub fn audit_rows(rows: &[RecordRow]) -> IntegrityAudit {
    let mut violations = Vec::new();
    let mut records = Vec::with_capacity(rows.len());
    let mut seen = HashSet::new();

    for row in rows {
        match Record::try_from(row) {
            Ok(record) => {
                if !seen.insert(record.record_id.clone()) {
                    violations.push(EngineError::schema(&record.record_id, "duplicate record_id"));
                    continue;
                }
                records.push(record);
            }
            Err(error) => violations.push(error),
        }
    }

    let valid_records = records.len();
    let index = records
        .iter()
        .enumerate()
        .map(|(position, record)| (record.record_id.clone(), position))
        .collect::<HashMap<String, usize>>();
    let store = RecordStore { records, index };
    violations.extend(store.link_violations());

    IntegrityAudit {
        violations,
        findings: store.soft_findings(),
        valid_records,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EnrichmentVerification {
    pub record_type_counts_before: BTreeMap<String, usize>,
    pub record_type_counts_after: BTreeMap<String, usize>,
    pub temporal_coverage_before: BTreeMap<String, Vec<i32>>,
    pub temporal_coverage_after: BTreeMap<String, Vec<i32>>,
    pub indicators_added: Vec<String>,
    pub years_expanded_for_existing_indicators: BTreeMap<String, Vec<i32>>,
    pub event_ids: Vec<String>,
    pub impact_parent_ids: Vec<String>,
    pub parent_id_links_valid: bool,
}

pub fn verify_enrichment(before: &RecordStore, after: &RecordStore) -> EnrichmentVerification {
    let coverage_before = before.temporal_coverage();
    let coverage_after = after.temporal_coverage();

    let indicators_added = coverage_after
        .keys()
        .filter(|code| !coverage_before.contains_key(*code))
        .cloned()
        .collect::<Vec<String>>();

    let mut years_expanded = BTreeMap::new();
    for (code, years_before) in &coverage_before {
        let Some(years_after) = coverage_after.get(code) else {
            continue;
        };
        let added = years_after
            .iter()
            .filter(|year| !years_before.contains(year))
            .copied()
            .collect::<Vec<i32>>();
        if !added.is_empty() {
            years_expanded.insert(code.clone(), added);
        }
    }

    let event_ids = after
        .events()
        .map(|(record, _)| record.record_id.clone())
        .collect::<BTreeSet<String>>();
    let impact_parent_ids = after
        .impact_links()
        .map(|(_, link)| link.parent_id.clone())
        .collect::<BTreeSet<String>>();
    let parent_id_links_valid = impact_parent_ids.is_subset(&event_ids);

    EnrichmentVerification {
        record_type_counts_before: before.record_type_counts(),
        record_type_counts_after: after.record_type_counts(),
        temporal_coverage_before: coverage_before,
        temporal_coverage_after: coverage_after,
        indicators_added,
        years_expanded_for_existing_indicators: years_expanded,
        event_ids: event_ids.into_iter().collect(),
        impact_parent_ids: impact_parent_ids.into_iter().collect(),
        parent_id_links_valid,
    }
}
