//! Application configuration.
//!
//! Built once at startup from the environment and passed as a parameter to
//! every component that needs paths or endpoints; there is no process-wide
//! config cache and no hot reload.

use std::env;
use std::path::PathBuf;

use cdp_connector::ConnectorConfig;
use vision_backends::BackendConfig;

use crate::cli::run::RunMode;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding run logs, lock files, and the scheduler pid file.
    pub logs_dir: PathBuf,
    /// Operator identity recorded in log rows.
    pub user_id: String,
    /// Base URL override for the remote parser backend.
    pub vision_api_url: Option<String>,
    /// Credentials for the hosted vision-language model.
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            logs_dir: env::var("FLOWPILOT_LOGS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./logs")),
            user_id: env::var("FLOWPILOT_USER").unwrap_or_else(|_| "local".to_string()),
            vision_api_url: non_empty(env::var("FLOWPILOT_VISION_URL").ok()),
            openai_api_key: non_empty(env::var("OPENAI_API_KEY").ok()),
            openai_model: non_empty(env::var("FLOWPILOT_OPENAI_MODEL").ok()),
        }
    }

    /// Connector settings for one run. Manual mode keeps the browser
    /// visible; the other modes inherit the environment's headless default.
    pub fn connector_config(&self, mode: RunMode) -> ConnectorConfig {
        let mut cfg = ConnectorConfig::default();
        if mode == RunMode::Manual {
            cfg.headless = false;
        }
        cfg
    }

    /// Backend construction settings, with the flow's own `vision_api_url`
    /// taking precedence over the environment.
    pub fn backend_config(&self, flow_api_url: Option<&str>) -> BackendConfig {
        BackendConfig {
            api_url: flow_api_url
                .map(str::to_string)
                .or_else(|| self.vision_api_url.clone()),
            api_key: self.openai_api_key.clone(),
            model: self.openai_model.clone(),
            ocr_language: None,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
