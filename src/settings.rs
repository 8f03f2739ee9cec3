use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Default for Theme {
    fn default() -> Self {
        Theme::Light
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DateFormat {
    /// "5 minutes ago"
    Relative,
    /// "Monday, March 3, 2025, 02:15 PM"
    Full,
    /// "Mar 3, 02:15 PM"
    Short,
}

impl Default for DateFormat {
    fn default() -> Self {
        DateFormat::Short
    }
}

/// User-facing dashboard settings.
///
/// Field names and the string-typed numeric fields mirror the server's
/// settings payload, so the same struct round-trips through
/// `GET`/`POST /api/settings` unchanged.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub theme: Theme,
    pub compact: bool,
    pub animations: bool,
    pub email_notify: bool,
    pub browser_notify: bool,
    pub sound: bool,
    /// Rows per rendered table page. Kept as a string on the wire.
    pub page_size: String,
    /// Auto-refresh interval in seconds; "0" disables. String on the wire.
    pub auto_refresh: String,
    pub date_format: DateFormat,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            compact: false,
            animations: true,
            email_notify: true,
            browser_notify: false,
            sound: false,
            page_size: "25".to_string(),
            auto_refresh: "60".to_string(),
            date_format: DateFormat::Short,
        }
    }
}

impl UserSettings {
    /// Parsed page size; falls back to 25 on garbage input.
    pub fn page_size(&self) -> usize {
        self.page_size.trim().parse().unwrap_or(25)
    }

    /// Parsed auto-refresh interval in seconds; falls back to 60 on garbage
    /// input. Zero disables the refresh timer.
    pub fn auto_refresh_secs(&self) -> u64 {
        self.auto_refresh.trim().parse::<u64>().unwrap_or(60)
    }
}

fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("voxwatch").join("settings.toml"))
}

/// Load settings from disk, falling back to defaults when the file is
/// missing or unreadable. A corrupt file is logged, never fatal.
pub fn load_settings() -> UserSettings {
    load_settings_from(settings_path())
}

fn load_settings_from(path: Option<PathBuf>) -> UserSettings {
    let Some(path) = path else {
        return UserSettings::default();
    };
    match std::fs::read_to_string(&path) {
        Ok(raw) => match toml::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Ignoring corrupt settings file {:?}: {}", path, e);
                UserSettings::default()
            }
        },
        Err(_) => UserSettings::default(),
    }
}

/// Persist settings to the user config dir.
pub fn save_settings(settings: &UserSettings) -> Result<()> {
    let path = settings_path().context("no config directory available")?;
    save_settings_to(settings, &path)
}

fn save_settings_to(settings: &UserSettings, path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw = toml::to_string_pretty(settings)?;
    std::fs::write(path, raw).with_context(|| format!("writing settings to {:?}", path))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_server_defaults() {
        let s = UserSettings::default();
        assert_eq!(s.theme, Theme::Light);
        assert_eq!(s.page_size(), 25);
        assert_eq!(s.auto_refresh_secs(), 60);
        assert_eq!(s.date_format, DateFormat::Short);
    }

    #[test]
    fn test_garbage_numeric_strings_fall_back() {
        let s = UserSettings {
            page_size: "lots".to_string(),
            auto_refresh: "".to_string(),
            ..Default::default()
        };
        assert_eq!(s.page_size(), 25);
        assert_eq!(s.auto_refresh_secs(), 60);
    }

    #[test]
    fn test_zero_auto_refresh_disables() {
        let s = UserSettings {
            auto_refresh: "0".to_string(),
            ..Default::default()
        };
        assert_eq!(s.auto_refresh_secs(), 0);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");

        let mut s = UserSettings::default();
        s.theme = Theme::Dark;
        s.page_size = "50".to_string();
        s.date_format = DateFormat::Relative;

        save_settings_to(&s, &path).unwrap();
        let loaded = load_settings_from(Some(path));
        assert_eq!(loaded, s);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let loaded = load_settings_from(Some(path));
        assert_eq!(loaded, UserSettings::default());
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let json = serde_json::to_value(UserSettings::default()).unwrap();
        assert!(json.get("pageSize").is_some());
        assert!(json.get("emailNotify").is_some());
        assert!(json.get("dateFormat").is_some());
    }
}
