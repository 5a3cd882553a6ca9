use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use super::error::EngineError;
use super::record::{
    Confidence, EvidenceBasis, ImpactDirection, ImpactMagnitude, RelationshipType,
};
use super::store::RecordStore;

/// One impact link resolved against its parent event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImpactRow {
    pub impact_link_id: String,
    pub event_id: String,
    pub event_date: NaiveDate,
    pub related_indicator: String,
    pub effective_year: i32,
    pub signed_effect: f64,
    pub lag_months: u32,
    pub impact_direction: ImpactDirection,
    pub impact_magnitude: Option<ImpactMagnitude>,
    pub relationship_type: Option<RelationshipType>,
    pub evidence_basis: Option<EvidenceBasis>,
    pub confidence: Option<Confidence>,
}

impl ImpactRow {
    /// Missing evidence counts as not literature-backed.
    pub fn is_literature_backed(&self) -> bool {
        matches!(self.evidence_basis, Some(EvidenceBasis::Literature))
    }
}

/// Lag is counted in completed years only: a 6-month lag keeps the effect in
/// the event's own calendar year.
pub fn effective_year(event_date: NaiveDate, lag_months: u32) -> i32 {
    let whole_years = i32::try_from(lag_months / 12).unwrap_or(i32::MAX);
    event_date.year().saturating_add(whole_years)
}

pub fn build_impact_matrix(store: &RecordStore) -> Result<Vec<ImpactRow>, EngineError> {
    let mut rows = Vec::new();
    for (record, link) in store.impact_links() {
        let (event_record, event) = store.resolve_event(&record.record_id, &link.parent_id)?;
        rows.push(ImpactRow {
            impact_link_id: record.record_id.clone(),
            event_id: event_record.record_id.clone(),
            event_date: event.event_date,
            related_indicator: link.related_indicator.clone(),
            effective_year: effective_year(event.event_date, link.lag_months),
            signed_effect: link.signed_effect(),
            lag_months: link.lag_months,
            impact_direction: link.impact_direction,
            impact_magnitude: link.impact_magnitude,
            relationship_type: link.relationship_type.clone(),
            evidence_basis: link.evidence_basis.clone(),
            confidence: record.provenance.confidence,
        });
    }
    Ok(rows)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AssociationCell {
    pub total_effect: f64,
    pub link_count: usize,
}

/// (event_id, indicator_code) -> summed signed effect, ignoring timing.
/// Several links between the same pair add up; they are never deduplicated.
pub type AssociationMatrix = BTreeMap<(String, String), AssociationCell>;

pub fn build_event_indicator_association_matrix(rows: &[ImpactRow]) -> AssociationMatrix {
    let mut matrix = AssociationMatrix::new();
    for row in rows {
        let cell = matrix
            .entry((row.event_id.clone(), row.related_indicator.clone()))
            .or_default();
        cell.total_effect += row.signed_effect;
        cell.link_count += 1;
    }
    matrix
}

/// Flattened association cell for tabular output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssociationEntry {
    pub event_id: String,
    pub indicator_code: String,
    pub effect: f64,
    pub link_count: usize,
}

pub fn association_entries(matrix: &AssociationMatrix) -> Vec<AssociationEntry> {
    matrix
        .iter()
        .map(|((event_id, indicator_code), cell)| AssociationEntry {
            event_id: event_id.clone(),
            indicator_code: indicator_code.clone(),
            effect: cell.total_effect,
            link_count: cell.link_count,
        })
        .collect()
}

/// Effects landing in one effective year. `uncertain_magnitude` sums the
/// absolute size of links that are not literature-backed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct YearEffects {
    pub signed_effect: f64,
    pub uncertain_magnitude: f64,
    pub link_count: usize,
}

impl YearEffects {
    fn add_row(&mut self, row: &ImpactRow) {
        self.signed_effect = saturating_sum(self.signed_effect, row.signed_effect);
        if !row.is_literature_backed() {
            self.uncertain_magnitude =
                saturating_sum(self.uncertain_magnitude, row.signed_effect.abs());
        }
        self.link_count += 1;
    }

    pub fn accumulate(self, other: YearEffects) -> YearEffects {
        YearEffects {
            signed_effect: saturating_sum(self.signed_effect, other.signed_effect),
            uncertain_magnitude: saturating_sum(
                self.uncertain_magnitude,
                other.uncertain_magnitude,
            ),
            link_count: self.link_count + other.link_count,
        }
    }
}

/// Finite addition: overflow saturates at `±f64::MAX`.
pub fn saturating_sum(a: f64, b: f64) -> f64 {
    (a + b).clamp(f64::MIN, f64::MAX)
}

/// Effects for one indicator bucketed by effective year.
pub fn effects_by_year(rows: &[ImpactRow], indicator_code: &str) -> BTreeMap<i32, YearEffects> {
    let mut by_year = BTreeMap::<i32, YearEffects>::new();
    for row in rows.iter().filter(|row| row.related_indicator == indicator_code) {
        by_year.entry(row.effective_year).or_default().add_row(row);
    }
    by_year
}

/// Everything landed on or before `year`. Effects are level shifts, so a
/// year's total is the prefix sum over all earlier buckets.
pub fn landed_effects(by_year: &BTreeMap<i32, YearEffects>, year: i32) -> YearEffects {
    by_year
        .range(..=year)
        .fold(YearEffects::default(), |total, (_, effects)| {
            total.accumulate(*effects)
        })
}
