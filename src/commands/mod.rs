pub mod restore;
pub mod status;
pub mod update;
pub mod verify;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CommandReport {
    pub command: String,
    pub ok: bool,
    pub details: Vec<String>,
    /// Conditions an operator should see that do not fail the command.
    pub warnings: Vec<String>,
    pub issues: Vec<String>,
}

impl CommandReport {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ok: true,
            details: Vec::new(),
            warnings: Vec::new(),
            issues: Vec::new(),
        }
    }

    pub fn detail(&mut self, text: impl Into<String>) {
        self.details.push(text.into());
    }

    pub fn warn(&mut self, text: impl Into<String>) {
        self.warnings.push(text.into());
    }

    pub fn issue(&mut self, text: impl Into<String>) {
        self.ok = false;
        self.issues.push(text.into());
    }
}

#[cfg(test)]
mod tests {
    use super::CommandReport;

    #[test]
    fn warnings_do_not_fail_a_report() {
        let mut report = CommandReport::new("update");
        report.warn("not read: sp-500-eps-est latest.xlsx");
        assert!(report.ok);
        report.issue("ledger drift");
        assert!(!report.ok);
    }
}
