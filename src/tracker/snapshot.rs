use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time view of the accounting window. Field names follow what the sync endpoint and
/// the popup expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(rename = "sessionDuration")]
    pub session_duration_ms: u64,
    pub tab_switches: u32,
    #[serde(rename = "activeTime")]
    pub active_time_ms: u64,
    #[serde(rename = "idleTime")]
    pub idle_time_ms: u64,
    pub top_sites: Vec<TopSite>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopSite {
    #[serde(rename = "url")]
    pub domain: String,
    #[serde(rename = "timeSpent")]
    pub time_spent_ms: u64,
    #[serde(rename = "visits")]
    pub visit_count: u32,
}
