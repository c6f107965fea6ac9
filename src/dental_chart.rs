// src/dental_chart.rs
//
// Universal numbering: 1..=16 upper arch, 17..=32 lower arch.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TEETH: i16 = 32;
pub const DEFAULT_CONDITION: &str = "sound";

pub const CONDITIONS: &[&str] = &[
    "sound",
    "healthy",
    "caries",
    "partial_erupted",
    "unerupted",
    "impacted_visible",
    "anomaly",
    "decayed",
    "missing",
    "filled",
    "restored",
    "root_canal",
    "gingival_recession",
    "implant",
    "fluorosis",
    "crowns",
    "bridges",
    "sealants",
    "fissures",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ToothHistoryEntry {
    pub tooth_history_id: Uuid,
    pub appointment_id: Option<Uuid>,
    pub tooth_location: i16,
    pub tooth_condition: String,
    pub tooth_history: String,
    pub history_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub service_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToothState {
    pub tooth_location: i16,
    pub region: String,
    pub condition: String,
    pub last_recorded: Option<NaiveDate>,
    pub history_count: usize,
}

pub fn is_valid_location(location: i16) -> bool {
    (1..=TEETH).contains(&location)
}

pub fn is_known_condition(condition: &str) -> bool {
    CONDITIONS.contains(&condition)
}

/// Quadrant label as seen on the chart, e.g. "Upper Left".
pub fn tooth_region(location: i16) -> String {
    let upper = location <= 16;
    let left = location <= 8 || (25..=32).contains(&location);
    format!(
        "{} {}",
        if upper { "Upper" } else { "Lower" },
        if left { "Left" } else { "Right" }
    )
}

impl ToothHistoryEntry {
    /// Same-day records order by when they were written.
    fn sort_key(&self) -> (NaiveDate, DateTime<Utc>) {
        (self.history_date, self.created_at)
    }
}

pub fn sort_history(entries: &mut [ToothHistoryEntry], order: SortOrder) {
    match order {
        SortOrder::Desc => entries.sort_by(|a, b| b.sort_key().cmp(&a.sort_key())),
        SortOrder::Asc => entries.sort_by(|a, b| a.sort_key().cmp(&b.sort_key())),
    }
}

/// One state per tooth; the latest record wins, untouched teeth stay sound.
pub fn build_chart(entries: &[ToothHistoryEntry]) -> Vec<ToothState> {
    (1..=TEETH)
        .map(|location| {
            let records: Vec<&ToothHistoryEntry> = entries
                .iter()
                .filter(|e| e.tooth_location == location)
                .collect();
            let latest = records.iter().max_by_key(|e| e.sort_key());
            ToothState {
                tooth_location: location,
                region: tooth_region(location),
                condition: latest
                    .map(|e| e.tooth_condition.clone())
                    .unwrap_or_else(|| DEFAULT_CONDITION.to_string()),
                last_recorded: latest.map(|e| e.history_date),
                history_count: records.len(),
            }
        })
        .collect()
}
