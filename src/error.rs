use thiserror::Error;

#[derive(Debug, Error)]
pub enum EarnError {
    #[error("another update run holds the lock: {0}")]
    Locked(String),
    #[error("no recognizable capture date in file name: {name}")]
    UnparseableDate { name: String },
    #[error("{file}: incoming row for {period} has no capture date; aborting before any write")]
    MissingCaptureDate { file: String, period: String },
    #[error("ledger is inconsistent: {0}")]
    LedgerCorrupt(String),
    #[error("failed to extract {file}: {reason}")]
    Extraction { file: String, reason: String },
    #[error("config invalid: {0}")]
    InvalidConfig(String),
}

impl EarnError {
    pub fn code(&self) -> EarnErrorCode {
        match self {
            Self::Locked(_) => EarnErrorCode::E001Locked,
            Self::MissingCaptureDate { .. } => EarnErrorCode::E002MissingCaptureDate,
            Self::LedgerCorrupt(_) => EarnErrorCode::E003LedgerCorrupt,
            Self::UnparseableDate { .. } => EarnErrorCode::E004UnparseableDate,
            Self::Extraction { .. } => EarnErrorCode::E005ExtractionFailed,
            Self::InvalidConfig(_) => EarnErrorCode::E006ConfigInvalid,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EarnErrorCode {
    E001Locked,
    E002MissingCaptureDate,
    E003LedgerCorrupt,
    E004UnparseableDate,
    E005ExtractionFailed,
    E006ConfigInvalid,
}

impl EarnErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001Locked => "E001_LOCKED",
            Self::E002MissingCaptureDate => "E002_MISSING_CAPTURE_DATE",
            Self::E003LedgerCorrupt => "E003_LEDGER_CORRUPT",
            Self::E004UnparseableDate => "E004_UNPARSEABLE_DATE",
            Self::E005ExtractionFailed => "E005_EXTRACTION_FAILED",
            Self::E006ConfigInvalid => "E006_CONFIG_INVALID",
        }
    }
}

/// Stable code for an error chain, if any link is an [`EarnError`].
pub fn code_of(err: &anyhow::Error) -> Option<EarnErrorCode> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<EarnError>())
        .map(EarnError::code)
}
