use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::form::DEFAULT_DURATION_TEXT;
use crate::platform::{BackendKind, DEFAULT_TIMED_OUTPUT_PATH};

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub form: FormDefaults,
    pub device: DeviceSettings,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FormDefaults {
    pub duration_text: String,
    pub pattern_text: String,
    pub repeat: bool,
}

impl Default for FormDefaults {
    fn default() -> Self {
        Self {
            duration_text: DEFAULT_DURATION_TEXT.to_string(),
            pattern_text: String::new(),
            repeat: false,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceSettings {
    pub backend: BackendKind,
    pub timed_output_path: PathBuf,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::Auto,
            timed_output_path: PathBuf::from(DEFAULT_TIMED_OUTPUT_PATH),
        }
    }
}

pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config file {}", path.display()))?;
    parse_config_text(&content)
}

pub fn parse_config_text(content: &str) -> Result<AppConfig> {
    let raw = serde_json::from_str::<ConfigFile>(content).map_err(|err| {
        let line = err.line();
        let column = err.column();
        anyhow::anyhow!("invalid JSON at line {line}, column {column}: {err}")
    })?;

    if raw.version != 1 {
        bail!(
            "unsupported config version {}; expected version 1",
            raw.version
        );
    }

    let timed_output_path = raw
        .device
        .timed_output_path
        .unwrap_or_else(|| DEFAULT_TIMED_OUTPUT_PATH.to_string());
    if timed_output_path.trim().is_empty() {
        bail!("device.timed_output_path must not be empty");
    }

    Ok(AppConfig {
        form: FormDefaults {
            duration_text: raw.form.duration_text,
            pattern_text: raw.form.pattern_text,
            repeat: raw.form.repeat,
        },
        device: DeviceSettings {
            backend: raw.device.backend.to_kind(),
            timed_output_path: PathBuf::from(timed_output_path),
        },
    })
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    version: u32,
    #[serde(default)]
    form: FormFile,
    #[serde(default)]
    device: DeviceFile,
}

#[derive(Debug, Deserialize)]
struct FormFile {
    #[serde(default = "default_duration_text")]
    duration_text: String,
    #[serde(default)]
    pattern_text: String,
    #[serde(default)]
    repeat: bool,
}

impl Default for FormFile {
    fn default() -> Self {
        Self {
            duration_text: default_duration_text(),
            pattern_text: String::new(),
            repeat: false,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct DeviceFile {
    #[serde(default)]
    backend: BackendToken,
    #[serde(default)]
    timed_output_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
enum BackendToken {
    #[default]
    Auto,
    Simulated,
    TimedOutput,
}

impl BackendToken {
    fn to_kind(&self) -> BackendKind {
        match self {
            BackendToken::Auto => BackendKind::Auto,
            BackendToken::Simulated => BackendKind::Simulated,
            BackendToken::TimedOutput => BackendKind::TimedOutput,
        }
    }
}

fn default_duration_text() -> String {
    DEFAULT_DURATION_TEXT.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let json = r#"
{
  "version": 1,
  "form": {
    "duration_text": "750",
    "pattern_text": "0, 300, 200, 300",
    "repeat": true
  },
  "device": {
    "backend": "timed-output",
    "timed_output_path": "/tmp/vibrator/enable"
  }
}
"#;
        let config = parse_config_text(json).expect("valid config");
        assert_eq!(config.form.duration_text, "750");
        assert_eq!(config.form.pattern_text, "0, 300, 200, 300");
        assert!(config.form.repeat);
        assert_eq!(config.device.backend, BackendKind::TimedOutput);
        assert_eq!(
            config.device.timed_output_path,
            PathBuf::from("/tmp/vibrator/enable")
        );
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config = parse_config_text(r#"{ "version": 1 }"#).expect("valid config");
        assert_eq!(config.form, FormDefaults::default());
        assert_eq!(config.device, DeviceSettings::default());
    }

    #[test]
    fn partial_form_keeps_default_duration() {
        let config = parse_config_text(r#"{ "version": 1, "form": { "repeat": true } }"#)
            .expect("valid config");
        assert_eq!(config.form.duration_text, "500");
        assert!(config.form.repeat);
    }

    #[test]
    fn rejects_unknown_version() {
        let err = parse_config_text(r#"{ "version": 2 }"#).expect_err("version 2 should fail");
        assert!(err.to_string().contains("unsupported config version 2"));
    }

    #[test]
    fn malformed_json_reports_position() {
        let err = parse_config_text("{ \"version\": ").expect_err("malformed json");
        assert!(err.to_string().contains("invalid JSON at line 1"));
    }

    #[test]
    fn rejects_unknown_backend() {
        let err = parse_config_text(r#"{ "version": 1, "device": { "backend": "laser" } }"#)
            .expect_err("unknown backend");
        assert!(err.to_string().contains("invalid JSON"));
    }

    #[test]
    fn rejects_blank_timed_output_path() {
        let err = parse_config_text(
            r#"{ "version": 1, "device": { "timed_output_path": "  " } }"#,
        )
        .expect_err("blank path");
        assert!(err.to_string().contains("timed_output_path"));
    }
}
