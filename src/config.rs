//! Configuration management (spec §6, §10.3).
//!
//! `DSPIDER_ENV` (default `dev`; unknown values fall back to `dev`) selects `config/{env}.yaml`,
//! falling back to `config/{env}.json` when the YAML file is absent. Environment variables of
//! the form `DSPIDER__SECTION__KEY` overlay the file, so secrets never need to live in the
//! committed config file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MongoConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub db_name: String,
}

impl MongoConfig {
    pub fn uri(&self) -> String {
        if self.username.is_empty() {
            format!("mongodb://{}:{}", self.host, self.port)
        } else {
            format!(
                "mongodb://{}:{}@{}:{}",
                self.username, self.password, self.host, self.port
            )
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RabbitmqConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_guest")]
    pub username: String,
    #[serde(default = "default_guest")]
    pub password: String,
    #[serde(default = "default_vhost")]
    pub virtual_host: String,
}

fn default_guest() -> String {
    "guest".to_string()
}

fn default_vhost() -> String {
    "/".to_string()
}

impl RabbitmqConfig {
    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}{}",
            self.username, self.password, self.host, self.port, self.virtual_host
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MinioConfig {
    pub host: String,
    pub port: u16,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl MinioConfig {
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MasterConfig {
    #[serde(default = "default_task_queue")]
    pub task_queue: String,
    #[serde(default)]
    pub exchange_name: String,
    #[serde(default)]
    pub routing_key: String,
    #[serde(default = "default_batch_size")]
    pub task_batch_size: i64,
    #[serde(default = "default_polling_interval")]
    pub polling_interval: u64,
}

fn default_task_queue() -> String {
    "task_queue".to_string()
}

fn default_batch_size() -> i64 {
    100
}

fn default_polling_interval() -> u64 {
    5
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            task_queue: default_task_queue(),
            exchange_name: String::new(),
            routing_key: String::new(),
            task_batch_size: default_batch_size(),
            polling_interval: default_polling_interval(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    #[serde(default = "default_task_queue")]
    pub task_queue: String,
    #[serde(default)]
    pub result_exchange: String,
    #[serde(default)]
    pub result_routing_key: String,
    #[serde(default = "default_prefetch")]
    pub prefetch_count: u16,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_prefetch() -> u16 {
    1
}

fn default_timeout() -> u64 {
    300
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            task_queue: default_task_queue(),
            result_exchange: String::new(),
            result_routing_key: String::new(),
            prefetch_count: default_prefetch(),
            timeout: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CookieRefresherConfig {
    #[serde(default = "default_cookie_interval")]
    pub update_interval_seconds: u64,
    #[serde(default = "default_cookie_queue")]
    pub task_queue: String,
}

fn default_cookie_interval() -> u64 {
    3600
}

fn default_cookie_queue() -> String {
    "cookie_tasks".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub mongodb: MongoConfig,
    pub rabbitmq: RabbitmqConfig,
    pub minio: MinioConfig,
    #[serde(default)]
    pub master: MasterConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub cookie_refresher: CookieRefresherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resolves `DSPIDER_ENV` (default/fallback `dev`) and loads `config/{env}.yaml` or
/// `config/{env}.json` from `config_dir`.
pub fn resolve_env() -> String {
    match std::env::var("DSPIDER_ENV") {
        Ok(v) if v == "dev" || v == "test" || v == "prod" => v,
        _ => "dev".to_string(),
    }
}

pub fn load_settings(config_dir: &Path) -> Result<Settings, ConfigError> {
    let env = resolve_env();
    let yaml_path = config_dir.join(format!("{env}.yaml"));
    let json_path = config_dir.join(format!("{env}.json"));

    let raw = if yaml_path.exists() {
        let text = std::fs::read_to_string(&yaml_path)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        serde_yaml::from_str::<serde_json::Value>(&text).map_err(|e| ConfigError::Parse(e.to_string()))?
    } else if json_path.exists() {
        let text = std::fs::read_to_string(&json_path)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?
    } else {
        return Err(ConfigError::MissingFile(env));
    };

    let overlaid = apply_env_overlay(raw);
    serde_json::from_value(overlaid).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Applies `DSPIDER__SECTION__KEY` environment overrides on top of the loaded file.
fn apply_env_overlay(mut raw: serde_json::Value) -> serde_json::Value {
    let prefix = "DSPIDER__";
    let overrides: HashMap<String, String> = std::env::vars()
        .filter(|(k, _)| k.starts_with(prefix))
        .collect();

    for (key, value) in overrides {
        let path: Vec<String> = key[prefix.len()..]
            .split("__")
            .map(|s| s.to_lowercase())
            .collect();
        set_path(&mut raw, &path, serde_json::Value::String(value));
    }
    raw
}

fn set_path(value: &mut serde_json::Value, path: &[String], new_value: serde_json::Value) {
    if path.is_empty() {
        return;
    }
    if !value.is_object() {
        *value = serde_json::Value::Object(Default::default());
    }
    let map = value.as_object_mut().unwrap();
    if path.len() == 1 {
        map.insert(path[0].clone(), new_value);
        return;
    }
    let entry = map
        .entry(path[0].clone())
        .or_insert_with(|| serde_json::Value::Object(Default::default()));
    set_path(entry, &path[1..], new_value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // DSPIDER_ENV is process-global; serialize tests that touch it.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn unknown_env_falls_back_to_dev() {
        let _guard = ENV_MUTEX.lock().unwrap();
        std::env::set_var("DSPIDER_ENV", "staging");
        assert_eq!(resolve_env(), "dev");
        std::env::remove_var("DSPIDER_ENV");
    }

    #[test]
    fn overlay_sets_nested_path() {
        let mut raw = serde_json::json!({"mongodb": {"host": "localhost"}});
        let path = vec!["mongodb".to_string(), "host".to_string()];
        set_path(&mut raw, &path, serde_json::Value::String("mongo.internal".to_string()));
        assert_eq!(raw["mongodb"]["host"], "mongo.internal");
    }
}
