//! Wire and document-store shapes shared across components (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle marker for a [`DatasourceConfig`]. Transitions form a DAG:
/// `Ready -> Dispatched -> InProgress -> {Done|Failed|Retry}`, `Retry -> Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ConfigState {
    Failed = -1,
    Ready = 0,
    Dispatched = 1,
    InProgress = 2,
    Done = 3,
    Retry = 101,
}

// Plain int mapping (spec's state is a bare int, not a tagged enum on the wire).
mod state_repr {
    use super::ConfigState;
    use serde::de::{self, Deserializer};
    use serde::ser::Serializer;
    use serde::{Deserialize, Serialize};

    impl Serialize for ConfigState {
        fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
            (*self as i32).serialize(s)
        }
    }

    impl<'de> Deserialize<'de> for ConfigState {
        fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
            let v = i32::deserialize(d)?;
            ConfigState::from_i32(v).ok_or_else(|| de::Error::custom(format!("invalid state {v}")))
        }
    }
}

impl ConfigState {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            -1 => Some(ConfigState::Failed),
            0 => Some(ConfigState::Ready),
            1 => Some(ConfigState::Dispatched),
            2 => Some(ConfigState::InProgress),
            3 => Some(ConfigState::Done),
            101 => Some(ConfigState::Retry),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdditionalParams {
    #[serde(default)]
    pub index_api_url: String,
    #[serde(default)]
    pub index_postdata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestParams {
    pub api_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub cookies: HashMap<String, String>,
    #[serde(default)]
    pub postdata: HashMap<String, String>,
    #[serde(default)]
    pub additional: AdditionalParams,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UrlRule {
    pub url_path: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub postdata: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListPageRule {
    pub list_data: String,
    pub url_rule: UrlRule,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParseRule {
    pub list_page: ListPageRule,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schedule {
    #[serde(rename = "type", default)]
    pub schedule_type: String,
    #[serde(default)]
    pub interval_seconds: u64,
}

/// The unit of crawl work (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasourceConfig {
    pub id: String,
    pub state: ConfigState,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub social_index_url: String,
    #[serde(default)]
    pub need_headers: bool,
    pub request_params: RequestParams,
    /// `[start, step]`.
    pub pagination: [i64; 2],
    pub parse_rule: ParseRule,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub distributed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub insert_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub round: i64,
}

/// The on-wire copy of a [`DatasourceConfig`] published to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: String,
    pub timestamp: f64,
    #[serde(flatten)]
    pub config: DatasourceConfig,
}

impl Task {
    pub fn from_config(config: DatasourceConfig, now: DateTime<Utc>) -> Self {
        Task {
            id: config.id.clone(),
            timestamp: now.timestamp() as f64,
            config,
        }
    }
}

/// Document in collection `list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListIndexEntry {
    pub id: String,
    pub path: String,
    pub datasource_id: String,
    pub round: i64,
    pub page_cursor: i64,
    pub fetched_at: DateTime<Utc>,
}

/// In-memory per-run accounting for a [`crate::worker::spiders::list_spider::ListSpider`] run.
#[derive(Debug, Clone, Default)]
pub struct CrawlStatistic {
    pub total: u64,
    pub success: u64,
    pub fail: Vec<i64>,
    pub last_fail: i64,
    pub last_resp_body: Option<String>,
    pub stop_reason: String,
}

impl CrawlStatistic {
    pub fn new() -> Self {
        CrawlStatistic {
            total: 0,
            success: 0,
            fail: Vec::new(),
            last_fail: -1,
            last_resp_body: None,
            stop_reason: String::new(),
        }
    }
}
