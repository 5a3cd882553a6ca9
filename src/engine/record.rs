//! Unified record schema.
//!
//! [`RecordRow`] is the flat, loosely typed row exchanged with loaders and
//! exporters. [`Record`] is the validated form: one variant per record type,
//! each carrying only the fields that type requires.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};

use super::error::EngineError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordRow {
    pub record_id: String,
    pub record_type: String,
    pub category: Option<String>,
    pub pillar: Option<String>,
    pub indicator: Option<String>,
    pub indicator_code: Option<String>,
    pub value_numeric: Option<f64>,
    pub value_text: Option<String>,
    pub value_type: Option<String>,
    pub unit: Option<String>,
    pub observation_date: Option<String>,
    pub source_name: Option<String>,
    pub source_type: Option<String>,
    pub source_url: Option<String>,
    pub confidence: Option<String>,
    pub parent_id: Option<String>,
    pub related_indicator: Option<String>,
    pub relationship_type: Option<String>,
    pub impact_direction: Option<String>,
    pub impact_magnitude: Option<String>,
    pub impact_estimate: Option<f64>,
    pub lag_months: Option<i64>,
    pub evidence_basis: Option<String>,
    pub comparable_country: Option<String>,
    pub location: Option<String>,
    pub gender: Option<String>,
    pub original_text: Option<String>,
    pub collected_by: Option<String>,
    pub collection_date: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Observation,
    Event,
    ImpactLink,
    Target,
}

impl RecordType {
    pub const ALL: [RecordType; 4] = [
        RecordType::Observation,
        RecordType::Event,
        RecordType::ImpactLink,
        RecordType::Target,
    ];

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "observation" => Some(Self::Observation),
            "event" => Some(Self::Event),
            "impact_link" => Some(Self::ImpactLink),
            "target" => Some(Self::Target),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Observation => "observation",
            Self::Event => "event",
            Self::ImpactLink => "impact_link",
            Self::Target => "target",
        }
    }
}

/// Source confidence tier. Ordered so that `High` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Estimated,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "estimated" => Some(Self::Estimated),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactDirection {
    Increase,
    Decrease,
}

impl ImpactDirection {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "increase" => Some(Self::Increase),
            "decrease" => Some(Self::Decrease),
            _ => None,
        }
    }

    pub fn sign(self) -> f64 {
        match self {
            Self::Increase => 1.0,
            Self::Decrease => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImpactMagnitude {
    Low,
    Medium,
    High,
}

impl ImpactMagnitude {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipType {
    Direct,
    Enabling,
    Indirect,
    Other(String),
}

impl RelationshipType {
    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "direct" => Self::Direct,
            "enabling" => Self::Enabling,
            "indirect" => Self::Indirect,
            _ => Self::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Direct => "direct",
            Self::Enabling => "enabling",
            Self::Indirect => "indirect",
            Self::Other(value) => value,
        }
    }
}

impl Serialize for RelationshipType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvidenceBasis {
    Literature,
    ExpertJudgment,
    Estimated,
    Other(String),
}

impl EvidenceBasis {
    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "literature" => Self::Literature,
            "expert_judgment" | "expert judgment" => Self::ExpertJudgment,
            "estimated" => Self::Estimated,
            _ => Self::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Literature => "literature",
            Self::ExpertJudgment => "expert_judgment",
            Self::Estimated => "estimated",
            Self::Other(value) => value,
        }
    }
}

impl Serialize for EvidenceBasis {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Provenance {
    pub source_name: Option<String>,
    pub source_type: Option<String>,
    pub source_url: Option<String>,
    pub confidence: Option<Confidence>,
    pub original_text: Option<String>,
    pub collected_by: Option<String>,
    pub collection_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub pillar: Option<String>,
    pub indicator: Option<String>,
    pub indicator_code: String,
    pub observation_date: NaiveDate,
    pub value_numeric: f64,
    pub value_type: Option<String>,
    pub unit: Option<String>,
    pub location: Option<String>,
    pub gender: Option<String>,
}

impl Measurement {
    pub fn year(&self) -> i32 {
        self.observation_date.year()
    }

    /// National, all-gender rows. Empty location/gender count as aggregate.
    pub fn is_national_aggregate(&self) -> bool {
        let location_ok = self
            .location
            .as_deref()
            .map(|value| value.eq_ignore_ascii_case("national"))
            .unwrap_or(true);
        let gender_ok = self
            .gender
            .as_deref()
            .map(|value| value.eq_ignore_ascii_case("all"))
            .unwrap_or(true);
        location_ok && gender_ok
    }

    /// `None` when the row does not say either way.
    pub fn declares_percentage(&self) -> Option<bool> {
        let by_type = self
            .value_type
            .as_deref()
            .map(|value| value.eq_ignore_ascii_case("percentage"));
        let by_unit = self.unit.as_deref().map(|value| value.trim() == "%");
        match (by_type, by_unit) {
            (None, None) => None,
            (Some(a), Some(b)) => Some(a || b),
            (Some(a), None) | (None, Some(a)) => Some(a),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventDetails {
    pub name: Option<String>,
    pub category: Option<String>,
    pub event_date: NaiveDate,
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImpactLinkDetails {
    pub parent_id: String,
    pub pillar: Option<String>,
    pub description: Option<String>,
    pub related_indicator: String,
    pub relationship_type: Option<RelationshipType>,
    pub impact_direction: ImpactDirection,
    pub impact_magnitude: Option<ImpactMagnitude>,
    pub impact_estimate: Option<f64>,
    pub lag_months: u32,
    pub evidence_basis: Option<EvidenceBasis>,
    pub comparable_country: Option<String>,
    /// Informational only; timing always comes from the parent event.
    pub observation_date: NaiveDate,
}

impl ImpactLinkDetails {
    /// Percentage-point delta with the direction applied.
    pub fn signed_effect(&self) -> f64 {
        self.impact_direction.sign() * self.impact_estimate.unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TargetDetails {
    pub pillar: Option<String>,
    pub indicator: Option<String>,
    pub indicator_code: String,
    pub target_date: Option<NaiveDate>,
    pub value_numeric: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordKind {
    Observation(Measurement),
    Event(EventDetails),
    ImpactLink(ImpactLinkDetails),
    Target(TargetDetails),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub record_id: String,
    pub provenance: Provenance,
    pub kind: RecordKind,
}

impl Record {
    pub fn record_type(&self) -> RecordType {
        match self.kind {
            RecordKind::Observation(_) => RecordType::Observation,
            RecordKind::Event(_) => RecordType::Event,
            RecordKind::ImpactLink(_) => RecordType::ImpactLink,
            RecordKind::Target(_) => RecordType::Target,
        }
    }
}

impl TryFrom<&RecordRow> for Record {
    type Error = EngineError;

    fn try_from(row: &RecordRow) -> Result<Self, Self::Error> {
        let record_id = row.record_id.trim();
        if record_id.is_empty() {
            return Err(EngineError::schema("<missing>", "record_id is empty"));
        }

        let record_type = RecordType::parse(&row.record_type).ok_or_else(|| {
            EngineError::schema(
                record_id,
                format!("unknown record_type '{}'", row.record_type),
            )
        })?;

        let provenance = parse_provenance(record_id, row)?;
        let kind = match record_type {
            RecordType::Observation => {
                RecordKind::Observation(parse_measurement(record_id, row)?)
            }
            RecordType::Event => RecordKind::Event(parse_event(record_id, row)?),
            RecordType::ImpactLink => RecordKind::ImpactLink(parse_impact_link(record_id, row)?),
            RecordType::Target => RecordKind::Target(parse_target(record_id, row)?),
        };

        Ok(Record {
            record_id: record_id.to_string(),
            provenance,
            kind,
        })
    }
}

/// Accepts `YYYY-MM-DD` optionally followed by a time component.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

fn present(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn owned(value: &Option<String>) -> Option<String> {
    present(value).map(ToOwned::to_owned)
}

fn required<'a>(
    record_id: &str,
    field: &str,
    value: &'a Option<String>,
) -> Result<&'a str, EngineError> {
    present(value).ok_or_else(|| EngineError::schema(record_id, format!("{field} is required")))
}

fn required_date(record_id: &str, value: &Option<String>) -> Result<NaiveDate, EngineError> {
    let raw = required(record_id, "observation_date", value)?;
    parse_date(raw).ok_or_else(|| {
        EngineError::schema(record_id, format!("observation_date '{raw}' is not a date"))
    })
}

fn optional_date(
    record_id: &str,
    field: &str,
    value: &Option<String>,
) -> Result<Option<NaiveDate>, EngineError> {
    match present(value) {
        Some(raw) => parse_date(raw).map(Some).ok_or_else(|| {
            EngineError::schema(record_id, format!("{field} '{raw}' is not a date"))
        }),
        None => Ok(None),
    }
}

fn required_value(record_id: &str, value: Option<f64>) -> Result<f64, EngineError> {
    match value {
        Some(number) if number.is_finite() => Ok(number),
        Some(_) => Err(EngineError::schema(record_id, "value_numeric is not finite")),
        None => Err(EngineError::schema(record_id, "value_numeric is required")),
    }
}

fn parse_provenance(record_id: &str, row: &RecordRow) -> Result<Provenance, EngineError> {
    let confidence = match present(&row.confidence) {
        Some(raw) => Some(Confidence::parse(raw).ok_or_else(|| {
            EngineError::schema(record_id, format!("unknown confidence '{raw}'"))
        })?),
        None => None,
    };

    Ok(Provenance {
        source_name: owned(&row.source_name),
        source_type: owned(&row.source_type),
        source_url: owned(&row.source_url),
        confidence,
        original_text: owned(&row.original_text),
        collected_by: owned(&row.collected_by),
        collection_date: optional_date(record_id, "collection_date", &row.collection_date)?,
        notes: owned(&row.notes),
    })
}

fn parse_measurement(record_id: &str, row: &RecordRow) -> Result<Measurement, EngineError> {
    Ok(Measurement {
        pillar: owned(&row.pillar),
        indicator: owned(&row.indicator),
        indicator_code: required(record_id, "indicator_code", &row.indicator_code)?.to_string(),
        observation_date: required_date(record_id, &row.observation_date)?,
        value_numeric: required_value(record_id, row.value_numeric)?,
        value_type: owned(&row.value_type),
        unit: owned(&row.unit),
        location: owned(&row.location),
        gender: owned(&row.gender),
    })
}

fn parse_event(record_id: &str, row: &RecordRow) -> Result<EventDetails, EngineError> {
    if let Some(pillar) = present(&row.pillar) {
        return Err(EngineError::schema(
            record_id,
            format!("event records must not carry a pillar (found '{pillar}')"),
        ));
    }

    Ok(EventDetails {
        name: owned(&row.indicator),
        category: owned(&row.category),
        event_date: required_date(record_id, &row.observation_date)?,
        status: owned(&row.value_text),
    })
}

fn parse_impact_link(record_id: &str, row: &RecordRow) -> Result<ImpactLinkDetails, EngineError> {
    let direction_raw = required(record_id, "impact_direction", &row.impact_direction)?;
    let impact_direction = ImpactDirection::parse(direction_raw).ok_or_else(|| {
        EngineError::schema(
            record_id,
            format!("unknown impact_direction '{direction_raw}'"),
        )
    })?;

    let impact_magnitude = match present(&row.impact_magnitude) {
        Some(raw) => Some(ImpactMagnitude::parse(raw).ok_or_else(|| {
            EngineError::schema(record_id, format!("unknown impact_magnitude '{raw}'"))
        })?),
        None => None,
    };

    let impact_estimate = match row.impact_estimate {
        Some(value) if !value.is_finite() => {
            return Err(EngineError::schema(record_id, "impact_estimate is not finite"));
        }
        Some(value) if value < 0.0 => {
            return Err(EngineError::schema(
                record_id,
                format!("impact_estimate {value} is negative; use impact_direction for sign"),
            ));
        }
        other => other,
    };

    let lag_months = match row.lag_months {
        Some(value) => u32::try_from(value).map_err(|_| {
            EngineError::schema(record_id, format!("lag_months {value} is out of range"))
        })?,
        None => 0,
    };

    Ok(ImpactLinkDetails {
        parent_id: required(record_id, "parent_id", &row.parent_id)?.to_string(),
        pillar: owned(&row.pillar),
        description: owned(&row.indicator),
        related_indicator: required(record_id, "related_indicator", &row.related_indicator)?
            .to_string(),
        relationship_type: present(&row.relationship_type).map(RelationshipType::parse),
        impact_direction,
        impact_magnitude,
        impact_estimate,
        lag_months,
        evidence_basis: present(&row.evidence_basis).map(EvidenceBasis::parse),
        comparable_country: owned(&row.comparable_country),
        observation_date: required_date(record_id, &row.observation_date)?,
    })
}

fn parse_target(record_id: &str, row: &RecordRow) -> Result<TargetDetails, EngineError> {
    Ok(TargetDetails {
        pillar: owned(&row.pillar),
        indicator: owned(&row.indicator),
        indicator_code: required(record_id, "indicator_code", &row.indicator_code)?.to_string(),
        target_date: optional_date(record_id, "observation_date", &row.observation_date)?,
        value_numeric: required_value(record_id, row.value_numeric)?,
    })
}
