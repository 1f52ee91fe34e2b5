use crate::errors::{AppError, AppResult};
use crate::pagination::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = "config.json";
const ENV_DATA_DIR: &str = "NOTE_SHELF_DATA_DIR";
const ENV_DEFAULT_PAGE_SIZE: &str = "NOTE_SHELF_DEFAULT_PAGE_SIZE";
const ENV_LOG_FILTER: &str = "NOTE_SHELF_LOG";
const ENV_LOG_JSON: &str = "NOTE_SHELF_LOG_JSON";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub database_file: String,
    pub default_page_size: u32,
    pub log_filter: String,
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database_file: "notes.sqlite".to_string(),
            default_page_size: DEFAULT_PAGE_SIZE,
            log_filter: "info".to_string(),
            log_json: true,
        }
    }
}

impl AppConfig {
    /// Defaults, then `<dataDir>/config.json`, then environment overrides.
    pub fn load() -> AppResult<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::load_from(&env)
    }

    pub fn load_from(env: &HashMap<String, String>) -> AppResult<Self> {
        let mut config = Self::default();
        if let Some(dir) = env.get(ENV_DATA_DIR).filter(|value| !value.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }

        let file_path = config.data_dir.join(CONFIG_FILE_NAME);
        if file_path.is_file() {
            config = config.merge_file(&file_path)?;
        }

        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_file)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    fn merge_file(self, path: &Path) -> AppResult<Self> {
        let raw = fs::read_to_string(path)?;
        let update: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|error| AppError::Validation(format!("{}: {}", path.display(), error)))?;
        let mut merged = serde_json::to_value(self)?;
        merge_json(&mut merged, update);
        serde_json::from_value(merged)
            .map_err(|error| AppError::Validation(format!("{}: {}", path.display(), error)))
    }

    fn apply_env(&mut self, env: &HashMap<String, String>) -> AppResult<()> {
        if let Some(dir) = env.get(ENV_DATA_DIR).filter(|value| !value.trim().is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(raw) = env.get(ENV_DEFAULT_PAGE_SIZE) {
            self.default_page_size = raw.trim().parse::<u32>().map_err(|_| {
                AppError::Validation(format!("{ENV_DEFAULT_PAGE_SIZE} must be a positive integer, got '{raw}'"))
            })?;
        }
        if let Some(filter) = env.get(ENV_LOG_FILTER).filter(|value| !value.trim().is_empty()) {
            self.log_filter = filter.trim().to_string();
        }
        if let Some(raw) = env.get(ENV_LOG_JSON) {
            self.log_json = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(AppError::Validation(format!(
                        "{ENV_LOG_JSON} must be true or false, got '{other}'"
                    )))
                }
            };
        }
        Ok(())
    }

    fn validate(&self) -> AppResult<()> {
        if self.database_file.trim().is_empty() {
            return Err(AppError::Validation("databaseFile must not be empty".to_string()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.default_page_size) {
            return Err(AppError::Validation(format!(
                "defaultPageSize must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.default_page_size
            )));
        }
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(unix)]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".note-shelf");
        }
    }

    #[cfg(windows)]
    {
        if let Ok(home) = std::env::var("USERPROFILE") {
            return PathBuf::from(home).join(".note-shelf");
        }
    }

    std::env::current_dir()
        .map(|cwd| cwd.join(".note-shelf"))
        .unwrap_or_else(|_| PathBuf::from(".note-shelf"))
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}
