use std::time::Duration;

use tracing::info;

use crate::engine::EngineSettings;
use crate::scheduler::AutoAdvanceConfig;
use crate::utils::error::CommonError;
use crate::EngineError;

const DEFAULT_INTERVAL_SECS: u64 = 30;
const DEFAULT_EXCLUDED_TEAMS: &str = "FAT1,FAT2";
const DEFAULT_LOG_FILE: &str = "debug.log";

/// Everything read from the environment at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Only required when running against Postgres.
    pub database_url: Option<String>,
    pub auto_advance: AutoAdvanceConfig,
    pub excluded_teams: Vec<String>,
    /// Where release builds write their error log.
    pub log_file: String,
}

impl Settings {
    /// Reads the settings from the process environment.
    ///
    /// In debug builds a `.env` file is loaded first.
    pub fn from_env() -> Result<Self, EngineError> {
        // Load the .env file only in the development environment (bypassed with the --release flag)
        #[cfg(debug_assertions)]
        dotenv::dotenv().ok();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = match lookup("AUTO_ADVANCE_ENABLED") {
            Some(value) => parse_bool("AUTO_ADVANCE_ENABLED", &value)?,
            None => false,
        };

        let interval_secs = match lookup("AUTO_ADVANCE_INTERVAL_SECS") {
            Some(value) => value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(CommonError::InvalidConfig {
                    key: "AUTO_ADVANCE_INTERVAL_SECS".to_string(),
                    value,
                })?,
            None => DEFAULT_INTERVAL_SECS,
        };

        let excluded_teams = lookup("EXCLUDED_TEAMS")
            .unwrap_or_else(|| DEFAULT_EXCLUDED_TEAMS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();

        Ok(Self {
            database_url: lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()),
            auto_advance: AutoAdvanceConfig {
                enabled,
                interval: Duration::from_secs(interval_secs),
            },
            excluded_teams,
            log_file: lookup("LOG_FILE").unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
        })
    }

    pub fn database_url(&self) -> Result<&str, EngineError> {
        let url = self
            .database_url
            .as_deref()
            .ok_or(CommonError::MissingConfig("DATABASE_URL".to_string()))?;
        info!("Successfully loaded database URL");
        Ok(url)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            excluded_teams: self.excluded_teams.clone(),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, EngineError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(CommonError::InvalidConfig {
            key: key.to_string(),
            value: value.to_string(),
        }
        .into()),
    }
}
