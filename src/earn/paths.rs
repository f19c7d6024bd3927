use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

pub const LEDGER_FILE: &str = "record_dict.json";
pub const BACKUP_LEDGER_FILE: &str = "backup_record_dict.json";
pub const HISTORICAL_FILE: &str = "sp500_pe_df_actuals.csv";
pub const BACKUP_HISTORICAL_FILE: &str = "backup_pe_df_actuals.csv";
pub const INDUSTRY_FILE: &str = "sp500_ind_df.csv";
pub const BACKUP_INDUSTRY_FILE: &str = "backup_ind_df.csv";
pub const LOCK_FILE: &str = "update.lock";

#[derive(Debug, Clone)]
pub struct EarnPaths {
    pub home: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub projections_dir: PathBuf,
    pub backup_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl EarnPaths {
    /// Layout rooted at `home` with every directory at its default place.
    pub fn under(home: &Path) -> Self {
        let output_dir = home.join("output_dir");
        Self {
            home: home.to_path_buf(),
            input_dir: home.join("input_dir"),
            projections_dir: output_dir.join("estimates"),
            output_dir,
            backup_dir: home.join("backup_dir"),
            archive_dir: home.join("archive_dir"),
            logs_dir: home.join("logs"),
        }
    }

    pub fn ledger_file(&self) -> PathBuf {
        self.home.join(LEDGER_FILE)
    }

    pub fn backup_ledger_file(&self) -> PathBuf {
        self.backup_dir.join(BACKUP_LEDGER_FILE)
    }

    pub fn historical_file(&self) -> PathBuf {
        self.output_dir.join(HISTORICAL_FILE)
    }

    pub fn backup_historical_file(&self) -> PathBuf {
        self.backup_dir.join(BACKUP_HISTORICAL_FILE)
    }

    pub fn industry_file(&self) -> PathBuf {
        self.output_dir.join(INDUSTRY_FILE)
    }

    pub fn backup_industry_file(&self) -> PathBuf {
        self.backup_dir.join(BACKUP_INDUSTRY_FILE)
    }

    pub fn lock_file(&self) -> PathBuf {
        self.home.join(LOCK_FILE)
    }
}

fn env_or_default_path(var: &str, fallback: PathBuf) -> PathBuf {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => PathBuf::from(v.trim()),
        _ => fallback,
    }
}

pub fn resolve_paths() -> Result<EarnPaths> {
    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let home = env_or_default_path("EARN_PRICE_HOME", cwd.join("input_output"));
    let defaults = EarnPaths::under(&home);

    let output_dir = env_or_default_path("EARN_PRICE_OUTPUT_DIR", defaults.output_dir);
    Ok(EarnPaths {
        input_dir: env_or_default_path("EARN_PRICE_INPUT_DIR", defaults.input_dir),
        projections_dir: output_dir.join("estimates"),
        output_dir,
        backup_dir: env_or_default_path("EARN_PRICE_BACKUP_DIR", defaults.backup_dir),
        archive_dir: env_or_default_path("EARN_PRICE_ARCHIVE_DIR", defaults.archive_dir),
        logs_dir: env_or_default_path("EARN_PRICE_LOGS_DIR", defaults.logs_dir),
        home,
    })
}
