//! Configuration file loading.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// `dvbpool.toml` contents. Every field has a default so a missing or
/// partial file works.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub devices: DevicesSection,
    #[serde(default)]
    pub tuning: TuningSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct DatabaseSection {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DevicesSection {
    /// Root of the adapter device tree watched for hot-plug events.
    pub root: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TuningSection {
    /// Priority subtracted from an LNB whose dish would have to move.
    pub dish_move_penalty: i32,
    /// Priority bonus for hardware our other subscriptions already
    /// hold.
    pub resource_reuse_bonus: i32,
    /// Whether tuning may rotate dishes at all.
    pub may_move_dish: bool,
}

impl Default for TuningSection {
    fn default() -> Self {
        Self {
            dish_move_penalty: 0,
            resource_reuse_bonus: 0,
            may_move_dish: true,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

pub fn load_config(path: &Path) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Explicit path, else `dvbpool.toml` next to the working directory if
/// it exists.
pub fn default_config_path(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let default_path = PathBuf::from("dvbpool.toml");
        default_path.exists().then_some(default_path)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: ConfigFile = toml::from_str(
            r#"
            [tuning]
            dish_move_penalty = 10
            resource_reuse_bonus = 2
            may_move_dish = false
            "#,
        )
        .unwrap();
        assert_eq!(config.tuning.dish_move_penalty, 10);
        assert_eq!(config.tuning.resource_reuse_bonus, 2);
        assert!(!config.tuning.may_move_dish);
        assert!(config.database.path.is_none());
    }

    #[test]
    fn empty_file_is_valid() {
        let config: ConfigFile = toml::from_str("").unwrap();
        assert!(config.tuning.may_move_dish);
    }
}
