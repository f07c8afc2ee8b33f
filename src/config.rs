// ⚙️ Pipeline Configuration - Rules as Data
// Sentinels, scaling factors and policy switches, loadable from JSON

use crate::error::PipelineError;
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ============================================================================
// POLICIES
// ============================================================================

/// What to do when one household id is reported by both panels in a year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep both rows (they double-count downstream) and report a warning
    #[default]
    Retain,

    /// Fail reconciliation for the year
    Reject,
}

/// What to do with a hierarchy node that opened a rule but got no children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmptyRulePolicy {
    /// Drop the rule; the node is treated as a leaf
    #[default]
    Prune,

    /// Keep the rule with no children; it aggregates to zero
    ReportZero,
}

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Flag values that null out their paired value column
    pub suppression_codes: Vec<String>,

    /// Publication-status value marking a record as publishable
    pub publishable_flag: String,

    /// Diary costs cover two weeks; this scales them to the Interview basis
    pub diary_annualization: f64,

    /// Trailing characters stripped from a flagged variable's name
    pub panel_suffixes: Vec<char>,

    pub duplicate_policy: DuplicatePolicy,

    pub empty_rule_policy: EmptyRulePolicy,

    /// Source label of the Interview household file in the variable dictionary
    pub interview_label: String,

    /// Source label of the Diary household file in the variable dictionary
    pub diary_label: String,

    /// Source labels of the category-cost files
    pub interview_cost_label: String,
    pub diary_cost_label: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            suppression_codes: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            publishable_flag: "2".to_string(),
            diary_annualization: 13.0,
            panel_suffixes: vec!['I', 'D'],
            duplicate_policy: DuplicatePolicy::Retain,
            empty_rule_policy: EmptyRulePolicy::Prune,
            interview_label: "FMLI".to_string(),
            diary_label: "FMLD".to_string(),
            interview_cost_label: "MTBI".to_string(),
            diary_cost_label: "EXPD".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file; missing keys take defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: PipelineConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !(self.diary_annualization > 0.0) {
            return Err(PipelineError::InvalidConfig {
                reason: format!(
                    "diary_annualization must be positive, got {}",
                    self.diary_annualization
                ),
            });
        }
        if self.suppression_codes.is_empty() {
            return Err(PipelineError::InvalidConfig {
                reason: "suppression_codes must not be empty".to_string(),
            });
        }
        if self.publishable_flag.trim().is_empty() {
            return Err(PipelineError::InvalidConfig {
                reason: "publishable_flag must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn is_suppressed(&self, flag: &str) -> bool {
        let flag = flag.trim();
        self.suppression_codes.iter().any(|c| c == flag)
    }

    pub fn is_publishable(&self, status: &str) -> bool {
        status.trim() == self.publishable_flag
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert!(config.is_suppressed("A"));
        assert!(config.is_suppressed(" C "));
        assert!(!config.is_suppressed("D"));
        assert!(config.is_publishable("2"));
        assert!(!config.is_publishable("1"));
        assert_eq!(config.diary_annualization, 13.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"duplicate_policy": "reject", "empty_rule_policy": "report_zero"}}"#
        )
        .unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.empty_rule_policy, EmptyRulePolicy::ReportZero);
        assert_eq!(config.publishable_flag, "2");
    }

    #[test]
    fn test_invalid_annualization_rejected() {
        let config = PipelineConfig {
            diary_annualization: 0.0,
            ..PipelineConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig { .. })
        ));
    }
}
