use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::assess::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::policy::{ThreatLevel, ThreatPolicyTable};

const DEFAULT_API_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    api: Option<ApiConfigFile>,
    detector: Option<DetectorConfigFile>,
    policy: Option<PolicyConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
    max_body_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    model_path: Option<PathBuf>,
    input_size: Option<u32>,
    iou_threshold: Option<f32>,
    confidence_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyConfigFile {
    table_path: Option<PathBuf>,
    overrides: Option<HashMap<String, ThreatLevel>>,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_addr: String,
    pub max_body_bytes: usize,
    pub detector: DetectorSettings,
    pub policy: PolicySettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub model_path: Option<PathBuf>,
    pub input_size: u32,
    pub iou_threshold: f32,
    pub confidence_threshold: f32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            model_path: None,
            input_size: DEFAULT_INPUT_SIZE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PolicySettings {
    pub table_path: Option<PathBuf>,
    pub overrides: HashMap<String, ThreatLevel>,
}

impl PolicySettings {
    /// Canonical table (or the configured file), with overrides applied.
    pub fn build_table(&self) -> Result<ThreatPolicyTable> {
        let base = match &self.table_path {
            Some(path) => ThreatPolicyTable::from_path(path)?,
            None => ThreatPolicyTable::default(),
        };
        Ok(base.with_overrides(&self.overrides))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_file(ServiceConfigFile::default())
    }
}

impl ServiceConfig {
    /// Load from `FRAME_THREAT_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from an explicit config path, falling back to `FRAME_THREAT_CONFIG`.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("FRAME_THREAT_CONFIG").ok().map(PathBuf::from);
        let config_path = path.map(Path::to_path_buf).or(env_path);
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(path)?,
            None => ServiceConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let api = file.api.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let policy = file.policy.unwrap_or_default();
        Self {
            api_addr: api.addr.unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            max_body_bytes: api.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            detector: DetectorSettings {
                model_path: detector.model_path,
                input_size: detector.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                iou_threshold: detector.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                confidence_threshold: detector
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            },
            policy: PolicySettings {
                table_path: policy.table_path,
                overrides: policy.overrides.unwrap_or_default(),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("FRAME_THREAT_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(path) = std::env::var("FRAME_THREAT_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(threshold) = std::env::var("FRAME_THREAT_CONFIDENCE") {
            self.detector.confidence_threshold = threshold.trim().parse().map_err(|_| {
                anyhow!("FRAME_THREAT_CONFIDENCE must be a number between 0 and 1")
            })?;
        }
        if let Ok(path) = std::env::var("FRAME_THREAT_POLICY") {
            if !path.trim().is_empty() {
                self.policy.table_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(overrides) = std::env::var("FRAME_THREAT_POLICY_OVERRIDES") {
            for entry in split_csv(&overrides) {
                let (label, level) = entry.split_once('=').ok_or_else(|| {
                    anyhow!(
                        "FRAME_THREAT_POLICY_OVERRIDES entry '{}' must be label=LEVEL",
                        entry
                    )
                })?;
                let level = level
                    .trim()
                    .parse::<ThreatLevel>()
                    .with_context(|| format!("FRAME_THREAT_POLICY_OVERRIDES entry '{}'", entry))?;
                self.policy.overrides.insert(label.trim().to_string(), level);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let threshold = self.detector.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!(
                "detector.confidence_threshold must be within [0, 1], got {}",
                threshold
            ));
        }
        let iou = self.detector.iou_threshold;
        if !(0.0..=1.0).contains(&iou) {
            return Err(anyhow!(
                "detector.iou_threshold must be within [0, 1], got {}",
                iou
            ));
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            return Err(anyhow!(
                "detector.input_size must be a positive multiple of 32, got {}",
                self.detector.input_size
            ));
        }
        if self.max_body_bytes == 0 {
            return Err(anyhow!("api.max_body_bytes must be greater than zero"));
        }
        if self.policy.overrides.keys().any(|label| label.is_empty()) {
            return Err(anyhow!("policy.overrides contains an empty label"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.api_addr, "127.0.0.1:8000");
        assert_eq!(cfg.detector.confidence_threshold, 0.5);
        assert_eq!(cfg.detector.input_size, 640);
        assert!(cfg.detector.model_path.is_none());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut cfg = ServiceConfig::default();
        cfg.detector.confidence_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn split_csv_skips_blanks() {
        assert_eq!(split_csv(" a=SAFE, ,b=DANGER,"), vec!["a=SAFE", "b=DANGER"]);
    }
}
