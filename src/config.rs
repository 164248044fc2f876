use std::env;
use std::net::SocketAddr;

use tracing::warn;

use crate::inference::device::{DevicePreference, Precision};

pub const DEFAULT_MODEL_ID: &str = "Qwen/Qwen2.5-3B-Instruct";

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub model_id: String,
    pub revision: String,
    pub device: DevicePreference,
    /// `None` picks f16 on accelerators and f32 on CPU.
    pub precision: Option<Precision>,
    pub hf_token: Option<String>,
    pub seed: Option<u64>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: "main".to_string(),
            device: DevicePreference::Auto,
            precision: None,
            hf_token: None,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub model: ModelSettings,
    pub preload_model: bool,
}

impl AppConfig {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick up `.env`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ModelSettings::default();

        let model = ModelSettings {
            model_id: non_empty(lookup("MODEL_ID")).unwrap_or(defaults.model_id),
            revision: non_empty(lookup("MODEL_REVISION")).unwrap_or(defaults.revision),
            device: non_empty(lookup("MODEL_DEVICE"))
                .map(|raw| {
                    raw.parse().unwrap_or_else(|err| {
                        warn!(value = raw.as_str(), "{err}, using auto");
                        DevicePreference::Auto
                    })
                })
                .unwrap_or(DevicePreference::Auto),
            precision: non_empty(lookup("MODEL_DTYPE")).and_then(|raw| {
                raw.parse()
                    .map_err(|err| warn!(value = raw.as_str(), "{err}, picking per device"))
                    .ok()
            }),
            hf_token: non_empty(lookup("HF_TOKEN")),
            seed: parse_or_warn(&lookup, "GENERATION_SEED"),
        };

        Self {
            host: non_empty(lookup("HOST")).unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or_warn(&lookup, "PORT").unwrap_or(3000),
            model,
            preload_model: parse_flag(lookup("PRELOAD_MODEL")),
        }
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or_warn<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = non_empty(lookup(key))?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = raw.as_str(), "unparseable value, using default");
            None
        }
    }
}

fn parse_flag(value: Option<String>) -> bool {
    matches!(
        non_empty(value).map(|v| v.to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}
