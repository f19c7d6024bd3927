use crate::earn::paths::EarnPaths;
use crate::error::EarnError;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub sp_url: String,
    pub tips_url: String,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            sp_url: "https://www.spglobal.com/spdji/en/search/?query=index+earnings&activeTab=all"
                .to_string(),
            tips_url: "https://fred.stlouisfed.org/series/DFII10".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    pub source_prefix: String,
    pub source_ext: String,
    pub real_rate_file: String,
    #[serde(default = "default_snapshot_prefix")]
    pub snapshot_prefix: String,
}

fn default_snapshot_prefix() -> String {
    "sp-500-eps-est".to_string()
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            source_prefix: "sp-500-eps".to_string(),
            source_ext: "xlsx".to_string(),
            real_rate_file: "DFII10.xlsx".to_string(),
            snapshot_prefix: default_snapshot_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ArchiveConfig {
    pub real_rate_file: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EarnConfig {
    pub sources: SourcesConfig,
    pub input: InputConfig,
    pub archive: ArchiveConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PartialEarnConfig {
    sources: Option<SourcesConfig>,
    input: Option<InputConfig>,
    archive: Option<ArchiveConfig>,
}

fn env_or_bool(var: &str, fallback: bool) -> bool {
    match env::var(var) {
        Ok(v) => match v.trim() {
            "1" | "true" | "TRUE" | "yes" | "on" => true,
            "0" | "false" | "FALSE" | "no" | "off" => false,
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

fn env_or_string(var: &str, fallback: &str) -> String {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => fallback.to_string(),
    }
}

fn validate(cfg: &EarnConfig) -> Result<()> {
    if cfg.input.source_prefix.trim().is_empty() {
        return Err(EarnError::InvalidConfig("source prefix cannot be empty".into()).into());
    }
    let ext = cfg.input.source_ext.trim();
    if ext.is_empty() || ext.starts_with('.') {
        return Err(EarnError::InvalidConfig(
            "source extension must be non-empty and given without a leading dot".into(),
        )
        .into());
    }
    if cfg.input.snapshot_prefix.trim().is_empty() {
        return Err(EarnError::InvalidConfig("snapshot prefix cannot be empty".into()).into());
    }
    if cfg.input.real_rate_file.starts_with(&cfg.input.source_prefix) {
        return Err(EarnError::InvalidConfig(
            "real rate file must not match the source prefix".into(),
        )
        .into());
    }
    Ok(())
}

fn resolve_config_path(paths: &EarnPaths) -> PathBuf {
    if let Ok(custom) = env::var("EARN_PRICE_CONFIG_PATH") {
        let trimmed = custom.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    paths.home.join("earn-price.toml")
}

fn merge_file_config(base: &mut EarnConfig, paths: &EarnPaths) -> Result<()> {
    let path = resolve_config_path(paths);
    if !path.exists() {
        return Ok(());
    }

    let raw = fs::read_to_string(&path)?;
    let parsed: PartialEarnConfig = toml::from_str(&raw)
        .map_err(|err| anyhow!("failed to parse config {}: {err}", path.display()))?;
    if let Some(sources) = parsed.sources {
        base.sources = sources;
    }
    if let Some(input) = parsed.input {
        base.input = input;
    }
    if let Some(archive) = parsed.archive {
        base.archive = archive;
    }
    Ok(())
}

pub fn load_config(paths: &EarnPaths) -> Result<EarnConfig> {
    let mut cfg = EarnConfig::default();
    merge_file_config(&mut cfg, paths)?;

    cfg.sources.sp_url = env_or_string("EARN_PRICE_SP_SOURCE_URL", &cfg.sources.sp_url);
    cfg.sources.tips_url = env_or_string("EARN_PRICE_TIPS_SOURCE_URL", &cfg.sources.tips_url);
    cfg.input.source_prefix = env_or_string("EARN_PRICE_SOURCE_PREFIX", &cfg.input.source_prefix);
    cfg.input.source_ext = env_or_string("EARN_PRICE_SOURCE_EXT", &cfg.input.source_ext);
    cfg.input.real_rate_file =
        env_or_string("EARN_PRICE_REAL_RATE_FILE", &cfg.input.real_rate_file);
    cfg.archive.real_rate_file =
        env_or_bool("EARN_PRICE_ARCHIVE_REAL_RATE", cfg.archive.real_rate_file);

    validate(&cfg)?;
    Ok(cfg)
}

impl EarnConfig {
    /// True when `name` is a source workbook by prefix and extension.
    pub fn matches_source(&self, name: &str) -> bool {
        let Some((stem, ext)) = name.rsplit_once('.') else {
            return false;
        };
        stem.starts_with(&self.input.source_prefix) && ext.eq_ignore_ascii_case(&self.input.source_ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_pattern_needs_prefix_and_extension() {
        let cfg = EarnConfig::default();
        assert!(cfg.matches_source("sp-500-eps-est 2024-05-15.xlsx"));
        assert!(cfg.matches_source("sp-500-eps-est 2024-05-15.XLSX"));
        assert!(!cfg.matches_source("sp-500-eps-est 2024-05-15.csv"));
        assert!(!cfg.matches_source("DFII10.xlsx"));
        assert!(!cfg.matches_source("sp-500-eps-est"));
    }

    #[test]
    fn toml_sections_replace_defaults() {
        let raw = r#"
[input]
source_prefix = "eps-est"
source_ext = "xlsm"
real_rate_file = "rates.xlsx"

[archive]
real_rate_file = true
"#;
        let parsed: PartialEarnConfig = toml::from_str(raw).expect("parse");
        let input = parsed.input.expect("input section");
        assert_eq!(input.source_prefix, "eps-est");
        assert_eq!(input.snapshot_prefix, "sp-500-eps-est");
        assert!(parsed.archive.expect("archive section").real_rate_file);
        assert!(parsed.sources.is_none());
    }

    #[test]
    fn validation_rejects_dotted_extension() {
        let mut cfg = EarnConfig::default();
        cfg.input.source_ext = ".xlsx".into();
        assert!(validate(&cfg).is_err());
        assert!(validate(&EarnConfig::default()).is_ok());
    }
}
