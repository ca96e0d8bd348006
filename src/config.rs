use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, SweepError};

pub const ALL_OUTPUT_LAYOUTS_ENV: &str = "LAYOUT_SWEEP_ALL_OUTPUT_LAYOUTS";
pub const ALL_INPUT_LAYOUTS_ENV: &str = "LAYOUT_SWEEP_ALL_INPUT_LAYOUTS";
pub const TELEMETRY_ENV: &str = "LAYOUT_SWEEP_TELEMETRY";

/// Switches that select which layout sweep a comparison runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugOptions {
    pub test_all_output_layouts: bool,
    pub test_all_input_layouts: bool,
    /// Passes the backend should skip, e.g. `constant_folding`.
    pub disabled_passes: Vec<String>,
}

impl DebugOptions {
    pub fn disable_pass(&mut self, pass: impl Into<String>) {
        let pass = pass.into();
        if !self.disabled_passes.contains(&pass) {
            self.disabled_passes.push(pass);
        }
    }

    pub fn is_pass_disabled(&self, pass: &str) -> bool {
        self.disabled_passes.iter().any(|p| p == pass)
    }
}

/// Harness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub debug_options: DebugOptions,
    /// JSONL file receiving one event per comparison.
    pub telemetry_path: Option<PathBuf>,
}

impl Default for HarnessConfig {
    /// Constant folding is disabled so that computations built from constants still
    /// exercise the execution path under test.
    fn default() -> Self {
        let mut debug_options = DebugOptions::default();
        debug_options.disable_pass("constant_folding");
        Self {
            debug_options,
            telemetry_path: None,
        }
    }
}

impl HarnessConfig {
    pub fn from_json_str(payload: &str) -> Result<Self> {
        serde_json::from_str(payload).map_err(|err| SweepError::InvalidArgument {
            op: "config.from_json",
            msg: format!("invalid harness config: {err}"),
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let payload = std::fs::read_to_string(path).map_err(|err| SweepError::InvalidArgument {
            op: "config.from_json_file",
            msg: format!("failed to read {}: {err}", path.display()),
        })?;
        Self::from_json_str(&payload)
    }

    /// Defaults overridden by the `LAYOUT_SWEEP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ALL_OUTPUT_LAYOUTS_ENV) {
            self.debug_options.test_all_output_layouts = parse_flag(ALL_OUTPUT_LAYOUTS_ENV, &value)?;
        }
        if let Some(value) = lookup(ALL_INPUT_LAYOUTS_ENV) {
            self.debug_options.test_all_input_layouts = parse_flag(ALL_INPUT_LAYOUTS_ENV, &value)?;
        }
        if let Some(value) = lookup(TELEMETRY_ENV) {
            if !value.trim().is_empty() {
                self.telemetry_path = Some(PathBuf::from(value));
            }
        }
        Ok(self)
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(SweepError::InvalidArgument {
            op: "config.env",
            msg: format!("{key}: expected a boolean, got {other:?}"),
        }),
    }
}
