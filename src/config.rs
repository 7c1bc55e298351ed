//! Configuration Module
//!
//! Provides TOML-based configuration for pcap-metrics.
//! Configuration is optional - CLI arguments can override file settings.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::analyzer::AnalyzerConfig;
use crate::decoder::ByteAccounting;
use crate::export::OutputFormat;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Generates a default configuration file content
    pub fn generate_default() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(file) = &self.output.file {
            if file.trim().is_empty() {
                anyhow::bail!("output.file must not be empty when set");
            }
        }
        if self.output.chart && self.output.file.is_some() {
            anyhow::bail!("output.chart cannot be combined with output.file");
        }
        Ok(())
    }

    /// Pipeline settings derived from the `[capture]` section.
    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig {
            max_frames: self.capture.max_frames,
            byte_accounting: self.capture.byte_accounting,
            include_ipv6: self.capture.include_ipv6,
        }
    }
}

/// Capture-reading configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Maximum frames to read (0 = unlimited)
    pub max_frames: usize,
    /// Frame size accounting ("captured" or "wire")
    pub byte_accounting: ByteAccounting,
    /// Count IPv6 frames as IP records
    pub include_ipv6: bool,
}

/// Output-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format (text, json, jsonl)
    #[serde(with = "output_format_serde")]
    pub format: OutputFormat,
    /// Output file path (None = stdout)
    pub file: Option<String>,
    /// Enable verbose logging
    pub verbose: bool,
    /// Open the terminal chart view after the report
    pub chart: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Text,
            file: None,
            verbose: false,
            chart: false,
        }
    }
}

/// Custom serde implementation for OutputFormat
mod output_format_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(format: &OutputFormat, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OutputFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
