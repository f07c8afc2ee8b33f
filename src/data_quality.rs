// ✅ Data Quality Engine - anomalies that never stop a year
// Collects hierarchy warnings, cross-panel duplicates, join drops and coded
// values outside the year's code dictionary into one report.

use crate::dictionary::CodeDictionary;
use crate::hierarchy::HierarchyWarning;
use crate::weights::HouseholdTable;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// QUALITY REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // Output is knowingly distorted (double counting)
    Warning,  // Input looks corrupt but was worked around
    Info,     // Expected loss, recorded for the audit trail
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub field: String,
    pub issue: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityReport {
    pub year: i32,
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    pub fn summary(&self) -> String {
        format!(
            "Year {}: {} issues ({} critical, {} warnings)",
            self.year,
            self.issues.len(),
            self.count(Severity::Critical),
            self.count(Severity::Warning)
        )
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_critical_issues(&self) -> bool {
        self.count(Severity::Critical) > 0
    }
}

// ============================================================================
// DATA QUALITY ENGINE
// ============================================================================

pub struct DataQualityEngine {
    year: i32,

    /// Cap on distinct invalid values listed per variable
    max_examples: usize,
}

impl DataQualityEngine {
    pub fn new(year: i32) -> Self {
        DataQualityEngine {
            year,
            max_examples: 5,
        }
    }

    pub fn report(
        &self,
        hierarchy_warnings: &[HierarchyWarning],
        duplicate_ids: &[String],
        dropped_cost_rows: usize,
        households: &HouseholdTable,
        codes: &CodeDictionary,
    ) -> QualityReport {
        let mut issues: Vec<QualityIssue> = hierarchy_warnings
            .iter()
            .map(|w| self.hierarchy_issue(w))
            .collect();

        if !duplicate_ids.is_empty() {
            issues.push(QualityIssue {
                severity: Severity::Critical,
                field: "NEWID".to_string(),
                issue: format!(
                    "{} household id(s) reported by both panels (e.g. {})",
                    duplicate_ids.len(),
                    duplicate_ids[0]
                ),
                recommendation: "Set duplicate_policy to reject, or confirm the ids".to_string(),
            });
        }

        if dropped_cost_rows > 0 {
            issues.push(QualityIssue {
                severity: Severity::Info,
                field: "NEWID".to_string(),
                issue: format!("{} cost rows had no matching household", dropped_cost_rows),
                recommendation: "Expected when publication filters excluded the household"
                    .to_string(),
            });
        }

        issues.extend(self.validate_codes(households, codes));

        for issue in issues.iter().filter(|i| i.severity != Severity::Info) {
            warn!("year {}: {}: {}", self.year, issue.field, issue.issue);
        }

        QualityReport {
            year: self.year,
            issues,
        }
    }

    fn hierarchy_issue(&self, warning: &HierarchyWarning) -> QualityIssue {
        let recommendation = match warning {
            HierarchyWarning::NumericParent { .. } => "Check the level column of the grouping file",
            HierarchyWarning::EmptyParent { .. } => "Check for a missing or misleveled child row",
            HierarchyWarning::Orphan { .. } => "Check for a skipped level in the grouping file",
            HierarchyWarning::DuplicateCode { .. } => {
                "Codes must be unique within one year's grouping"
            }
        };
        QualityIssue {
            severity: Severity::Warning,
            field: warning.code().to_string(),
            issue: warning.describe(),
            recommendation: recommendation.to_string(),
        }
    }

    /// Coded household fields whose value is not in the code dictionary
    pub fn validate_codes(
        &self,
        households: &HouseholdTable,
        codes: &CodeDictionary,
    ) -> Vec<QualityIssue> {
        let mut invalid: BTreeMap<&str, (usize, Vec<String>)> = BTreeMap::new();

        for variable in codes.coded_variables() {
            if !households.has_column(variable) {
                continue;
            }
            for record in &households.records {
                let Some(value) = households.field(record, variable) else {
                    continue;
                };
                if codes.permits(variable, value) {
                    continue;
                }
                let entry = invalid.entry(variable).or_default();
                entry.0 += 1;
                if entry.1.len() < self.max_examples && !entry.1.iter().any(|v| v == value) {
                    entry.1.push(value.to_string());
                }
            }
        }

        invalid
            .into_iter()
            .map(|(variable, (count, examples))| QualityIssue {
                severity: Severity::Warning,
                field: variable.to_string(),
                issue: format!("{} values not in code dictionary: {}", count, examples.join(", ")),
                recommendation: "Check the code dictionary year range".to_string(),
            })
            .collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
