use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compositor::scheduler::Debounce;

pub const CONFIG_FILENAME: &str = "config.toml";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub background: Background,
    pub debounce: DebounceDelays,
    pub screen: Screen,
    pub apply: Apply,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| e.into()),
            Err(e) => {
                warn!("Couldn't read config file: {}", e);
                Err(e.into())
            }
        }
    }

    /// A missing config file isn't an error, but a broken one is.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if !path.as_ref().exists() {
            warn!(
                "Config file '{}' doesn't exist, using defaults",
                path.as_ref().display()
            );
            return Ok(Self::default());
        }

        Self::load(path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Background {
    /// A `file://` uri or an absolute path.
    pub uri: String,
    pub default_path: PathBuf,
}

impl Default for Background {
    fn default() -> Self {
        let default_path = PathBuf::from("/usr/share/backgrounds/default_background.jpg");

        Self {
            uri: format!("file://{}", default_path.display()),
            default_path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceDelays {
    pub short_ms: u64,
    pub long_ms: u64,
}

impl Default for DebounceDelays {
    fn default() -> Self {
        Self {
            short_ms: 1000,
            long_ms: 5000,
        }
    }
}

impl From<DebounceDelays> for Debounce {
    fn from(delays: DebounceDelays) -> Self {
        Self {
            short: Duration::from_millis(delays.short_ms),
            long: Duration::from_millis(delays.long_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Screen {
    /// Used if the display server reports a zero sized screen.
    pub fallback_width: u32,
    pub fallback_height: u32,
    /// Screen resizes to something smaller than this in both directions are ignored.
    pub min_width: u32,
    pub min_height: u32,
}

impl Default for Screen {
    fn default() -> Self {
        Self {
            fallback_width: 1024,
            fallback_height: 768,
            min_width: 480,
            min_height: 640,
        }
    }
}

impl Screen {
    pub fn accepts(&self, width: u32, height: u32) -> bool {
        !(width < self.min_width && height < self.min_height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Apply {
    pub program: PathBuf,
    pub set_args: Vec<String>,
    pub list_args: Vec<String>,
}

impl Default for Apply {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/usr/bin/dde_wloutput"),
            set_args: vec![String::from("set")],
            list_args: vec![String::from("list")],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [background]
            uri = "file:///home/user/wall.png"

            [debounce]
            long_ms = 3000
            "#,
        )
        .unwrap();

        assert_eq!(config.background.uri, "file:///home/user/wall.png");
        assert_eq!(
            config.background.default_path,
            Background::default().default_path
        );
        assert_eq!(
            Debounce::from(config.debounce),
            Debounce {
                short: Duration::from_secs(1),
                long: Duration::from_secs(3),
            }
        );
        assert_eq!(config.apply, Apply::default());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join(CONFIG_FILENAME)).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_broken_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILENAME);
        std::fs::write(&path, "[screen]\nmin_width = \"wide\"").unwrap();

        assert!(Config::load_or_default(path).is_err());
    }

    #[test]
    fn test_screen_filter() {
        let screen = Screen::default();
        assert!(!screen.accepts(320, 240));
        assert!(screen.accepts(1920, 1080));
        // only one side has to be big enough
        assert!(screen.accepts(400, 800));
    }
}
