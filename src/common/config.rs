//! Configuration file handling

use serde::Deserialize;
use std::path::PathBuf;

use super::paths::config_path;
use super::Result;
use crate::session::BreakpointKind;

/// Main configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Debuggee and protocol settings
    #[serde(default)]
    pub debugger: DebuggerConfig,

    /// Breakpoint kinds, in lookup order. The first entry is the default kind.
    #[serde(default = "default_breakpoint_kinds")]
    pub breakpoint_kinds: Vec<BreakpointKind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeouts: Timeouts::default(),
            debugger: DebuggerConfig::default(),
            breakpoint_kinds: default_breakpoint_kinds(),
        }
    }
}

fn default_breakpoint_kinds() -> Vec<BreakpointKind> {
    vec![
        BreakpointKind::new("python-line", &["py", "pyw"], true),
        BreakpointKind::new("django-line", &["html", "htm", "djhtml"], false),
        BreakpointKind::new("jinja2-line", &["j2", "jinja", "jinja2"], false),
    ]
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Upper bound for the debuggee to connect and complete the handshake
    #[serde(default = "default_connect")]
    pub connect_secs: u64,

    /// Timeout for request/response commands (evaluate, frame loads)
    #[serde(default = "default_request")]
    pub request_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect(),
            request_secs: default_request(),
        }
    }
}

fn default_connect() -> u64 {
    60
}
fn default_request() -> u64 {
    30
}

/// Debuggee and protocol settings
#[derive(Debug, Deserialize)]
pub struct DebuggerConfig {
    /// Python interpreter used to launch the debuggee
    #[serde(default = "default_python")]
    pub python: String,

    /// Path to pydevd.py; if unset, `pydevd` must be importable by the interpreter
    #[serde(default)]
    pub pydevd: Option<PathBuf>,

    /// Address the debugger listens on / connects to
    #[serde(default = "default_host")]
    pub host: String,

    /// Semver requirement the remote pydevd version should satisfy
    #[serde(default)]
    pub expected_version: Option<String>,

    /// Step into only project code
    #[serde(default)]
    pub step_into_my_code: bool,

    /// Ask pydevd to expose function return values as variables
    #[serde(default)]
    pub show_return_values: bool,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            pydevd: None,
            host: default_host(),
            expected_version: None,
            step_into_my_code: false,
            show_return_values: false,
        }
    }
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    super::Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    }
                })?;
                return Self::parse(&content);
            }
        }
        Ok(Self::default())
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        if config.breakpoint_kinds.is_empty() {
            return Err(super::Error::Config(
                "breakpoint_kinds must contain at least one entry".to_string(),
            ));
        }
        if let Some(req) = &config.debugger.expected_version {
            semver::VersionReq::parse(req).map_err(|e| {
                super::Error::Config(format!("invalid expected_version '{}': {}", req, e))
            })?;
        }
        Ok(config)
    }

    /// Resolve the Python interpreter
    ///
    /// Absolute or relative paths are taken as-is; bare names are searched on PATH.
    pub fn python_interpreter(&self) -> Result<PathBuf> {
        let python = &self.debugger.python;
        if python.contains(std::path::MAIN_SEPARATOR) || python.contains('/') {
            return Ok(PathBuf::from(python));
        }
        which::which(python).map_err(|_| super::Error::interpreter_not_found(python))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.timeouts.connect_secs, 60);
        assert_eq!(config.timeouts.request_secs, 30);
        assert_eq!(config.debugger.host, "127.0.0.1");
        assert_eq!(config.breakpoint_kinds[0].id, "python-line");
        assert_eq!(config.breakpoint_kinds.len(), 3);
    }

    #[test]
    fn test_custom_breakpoint_kinds() {
        let config = Config::parse(
            r#"
            [timeouts]
            connect_secs = 15

            [[breakpoint_kinds]]
            id = "python-line"
            extensions = ["py"]
            supports_thread_suspend = true

            [[breakpoint_kinds]]
            id = "mako-line"
            extensions = ["mako"]
            "#,
        )
        .unwrap();
        assert_eq!(config.timeouts.connect_secs, 15);
        assert_eq!(config.breakpoint_kinds.len(), 2);
        assert!(!config.breakpoint_kinds[1].supports_thread_suspend);
    }

    #[test]
    fn test_empty_kind_table_rejected() {
        assert!(matches!(
            Config::parse("breakpoint_kinds = []"),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_bad_version_requirement_rejected() {
        let err = Config::parse("[debugger]\nexpected_version = \"not a version\"").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
