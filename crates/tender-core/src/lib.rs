//! Canonical tender model and construction classifier.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod classify;

pub use classify::{categorize, classify, is_construction_text, Classification, CONSTRUCTION_KEYWORDS};

pub const CRATE_NAME: &str = "tender-core";
pub const DEFAULT_CURRENCY: &str = "AUD";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseLabelError {
    #[error("unknown tender status `{0}`")]
    Status(String),
    #[error("unknown category `{0}`")]
    Category(String),
}

/// Lifecycle state that decides which date field is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenderStatus {
    Open,
    Awarded,
}

impl TenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenderStatus::Open => "open",
            TenderStatus::Awarded => "awarded",
        }
    }
}

impl fmt::Display for TenderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TenderStatus {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(TenderStatus::Open),
            "awarded" => Ok(TenderStatus::Awarded),
            other => Err(ParseLabelError::Status(other.to_string())),
        }
    }
}

/// Fixed project taxonomy. Variant order mirrors classification priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Defence")]
    Defence,
    #[serde(rename = "Airports & Aviation")]
    AirportsAviation,
    #[serde(rename = "Hospitals & Healthcare")]
    HospitalsHealthcare,
    #[serde(rename = "Schools & Education")]
    SchoolsEducation,
    #[serde(rename = "Roads & Highways")]
    RoadsHighways,
    #[serde(rename = "Bridges & Tunnels")]
    BridgesTunnels,
    #[serde(rename = "Drainage & Water")]
    DrainageWater,
    #[serde(rename = "Landscaping & Parks")]
    LandscapingParks,
    #[serde(rename = "Rail")]
    Rail,
    #[serde(rename = "Buildings & Facilities")]
    BuildingsFacilities,
    #[serde(rename = "Civil & Infrastructure")]
    CivilInfrastructure,
    #[serde(rename = "Council Services")]
    CouncilServices,
    #[serde(rename = "General Construction")]
    #[default]
    GeneralConstruction,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::Defence,
        Category::AirportsAviation,
        Category::HospitalsHealthcare,
        Category::SchoolsEducation,
        Category::RoadsHighways,
        Category::BridgesTunnels,
        Category::DrainageWater,
        Category::LandscapingParks,
        Category::Rail,
        Category::BuildingsFacilities,
        Category::CivilInfrastructure,
        Category::CouncilServices,
        Category::GeneralConstruction,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Category::Defence => "Defence",
            Category::AirportsAviation => "Airports & Aviation",
            Category::HospitalsHealthcare => "Hospitals & Healthcare",
            Category::SchoolsEducation => "Schools & Education",
            Category::RoadsHighways => "Roads & Highways",
            Category::BridgesTunnels => "Bridges & Tunnels",
            Category::DrainageWater => "Drainage & Water",
            Category::LandscapingParks => "Landscaping & Parks",
            Category::Rail => "Rail",
            Category::BuildingsFacilities => "Buildings & Facilities",
            Category::CivilInfrastructure => "Civil & Infrastructure",
            Category::CouncilServices => "Council Services",
            Category::GeneralConstruction => "General Construction",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = ParseLabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.label().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| ParseLabelError::Category(trimmed.to_string()))
    }
}

/// Extracted upstream fields, before classification. Handoff contract from
/// adapters into the ingest step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenderDraft {
    pub id: String,
    pub title: String,
    pub description: String,
    pub buyer_name: Option<String>,
    pub supplier_name: Option<String>,
    pub value_amount: Option<f64>,
    pub value_currency: Option<String>,
    pub date_signed: Option<DateTime<Utc>>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub closing_date: Option<DateTime<Utc>>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub status: TenderStatus,
    pub external_reference_id: Option<String>,
    pub external_url: Option<String>,
}

impl TenderDraft {
    pub fn new(id: impl Into<String>, status: TenderStatus) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            description: String::new(),
            buyer_name: None,
            supplier_name: None,
            value_amount: None,
            value_currency: None,
            date_signed: None,
            period_start: None,
            period_end: None,
            closing_date: None,
            state: None,
            locality: None,
            status,
            external_reference_id: None,
            external_url: None,
        }
    }

    pub fn classify(&self) -> Classification {
        classify(&self.title, &self.description)
    }

    /// Attach the classifier output and source label. `is_construction` and
    /// `category` are only ever set here.
    pub fn into_record(self, source: &str, classification: Classification) -> TenderRecord {
        TenderRecord {
            id: self.id,
            title: self.title,
            description: self.description,
            buyer_name: self.buyer_name,
            supplier_name: self.supplier_name,
            value_amount: self.value_amount,
            value_currency: self
                .value_currency
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            date_signed: self.date_signed,
            period_start: self.period_start,
            period_end: self.period_end,
            closing_date: self.closing_date,
            state: self.state,
            locality: self.locality,
            source: source.to_string(),
            category: classification.category,
            is_construction: classification.is_construction,
            tender_status: self.status,
            external_reference_id: self.external_reference_id,
            external_url: self.external_url,
        }
    }
}

/// Canonical persisted row, one per upstream identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenderRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub buyer_name: Option<String>,
    pub supplier_name: Option<String>,
    pub value_amount: Option<f64>,
    pub value_currency: String,
    pub date_signed: Option<DateTime<Utc>>,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub closing_date: Option<DateTime<Utc>>,
    pub state: Option<String>,
    pub locality: Option<String>,
    pub source: String,
    pub category: Category,
    pub is_construction: bool,
    pub tender_status: TenderStatus,
    pub external_reference_id: Option<String>,
    pub external_url: Option<String>,
}

impl TenderRecord {
    /// Date that drives ordering for this record's status.
    pub fn primary_date(&self) -> Option<DateTime<Utc>> {
        match self.tender_status {
            TenderStatus::Open => self.closing_date,
            TenderStatus::Awarded => self.date_signed,
        }
    }
}
