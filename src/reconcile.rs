// 🔗 Panel Reconciler - two sub-surveys, one household table, one cost table
//
// Interview and Diary households share only part of their columns; the unified
// table keeps the shared ones. Category costs from both panels are projected
// onto (household, source, category, cost) and stacked.

use crate::config::{DuplicatePolicy, PipelineConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::table::{parse_number, RecordTable};
use crate::weights::{HouseholdTable, Panel, HOUSEHOLD_ID};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const CATEGORY_CODE: &str = "UCC";
pub const COST: &str = "COST";
pub const INTERVIEW_REF_YEAR: &str = "REF_YR";
pub const INTERVIEW_PUB_FLAG: &str = "PUBFLAG";
pub const DIARY_PUB_FLAG: &str = "PUB_FLAG";

// ============================================================================
// EXPENDITURES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpenditureRecord {
    pub household_id: String,
    pub source: Panel,
    pub category_code: String,
    pub cost: f64,
}

impl ExpenditureRecord {
    pub fn new(household_id: &str, source: Panel, category_code: &str, cost: f64) -> Self {
        ExpenditureRecord {
            household_id: household_id.to_string(),
            source,
            category_code: category_code.to_string(),
            cost,
        }
    }
}

/// Publishable Interview costs for the processing year, as reported
pub fn interview_expenditures(
    table: &RecordTable,
    year: i32,
    config: &PipelineConfig,
) -> PipelineResult<Vec<ExpenditureRecord>> {
    require(
        table,
        "Interview expenditures",
        &[HOUSEHOLD_ID, CATEGORY_CODE, COST, INTERVIEW_REF_YEAR, INTERVIEW_PUB_FLAG],
    )?;

    let year_text = year.to_string();
    let records: Vec<ExpenditureRecord> = table
        .rows()
        .filter(|row| row.get(INTERVIEW_REF_YEAR) == Some(year_text.as_str()))
        .filter(|row| row.get(INTERVIEW_PUB_FLAG).is_some_and(|f| config.is_publishable(f)))
        .filter_map(|row| {
            Some(ExpenditureRecord {
                household_id: row.get(HOUSEHOLD_ID)?.to_string(),
                source: Panel::Interview,
                category_code: row.get(CATEGORY_CODE)?.to_string(),
                cost: row.number(COST),
            })
        })
        .collect();

    info!("Interview expenditures: kept {} of {} rows", records.len(), table.len());
    Ok(records)
}

/// Publishable Diary costs, annualized from the two-week diary window
pub fn diary_expenditures(
    table: &RecordTable,
    config: &PipelineConfig,
) -> PipelineResult<Vec<ExpenditureRecord>> {
    require(table, "Diary expenditures", &[HOUSEHOLD_ID, CATEGORY_CODE, COST, DIARY_PUB_FLAG])?;

    let records: Vec<ExpenditureRecord> = table
        .rows()
        .filter(|row| row.get(DIARY_PUB_FLAG).is_some_and(|f| config.is_publishable(f)))
        .filter_map(|row| {
            Some(ExpenditureRecord {
                household_id: row.get(HOUSEHOLD_ID)?.to_string(),
                source: Panel::Diary,
                category_code: row.get(CATEGORY_CODE)?.to_string(),
                cost: parse_number(row.get(COST)) * config.diary_annualization,
            })
        })
        .collect();

    info!("Diary expenditures: kept {} of {} rows", records.len(), table.len());
    Ok(records)
}

fn require(table: &RecordTable, label: &str, columns: &[&str]) -> PipelineResult<()> {
    match columns.iter().find(|c| !table.has_column(c)) {
        Some(missing) => Err(PipelineError::MissingColumn {
            table: label.to_string(),
            column: missing.to_string(),
        }),
        None => Ok(()),
    }
}

// ============================================================================
// RECONCILIATION
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciledPanels {
    pub households: HouseholdTable,
    pub expenditures: Vec<ExpenditureRecord>,

    /// Columns present in only one panel, dropped from the unified table
    pub dropped_columns: Vec<String>,

    /// Household ids reported by both panels (kept twice under Retain)
    pub duplicate_ids: Vec<String>,
}

pub struct PanelReconciler {
    year: i32,
    duplicate_policy: DuplicatePolicy,
}

impl PanelReconciler {
    pub fn new(year: i32, duplicate_policy: DuplicatePolicy) -> Self {
        PanelReconciler {
            year,
            duplicate_policy,
        }
    }

    /// Stack Interview then Diary households on their shared columns
    pub fn merge_households(
        &self,
        interview: &HouseholdTable,
        diary: &HouseholdTable,
    ) -> PipelineResult<(HouseholdTable, Vec<String>, Vec<String>)> {
        let diary_columns: HashSet<&str> = diary.columns.iter().map(String::as_str).collect();
        let interview_columns: HashSet<&str> =
            interview.columns.iter().map(String::as_str).collect();

        let common: Vec<String> = interview
            .columns
            .iter()
            .filter(|c| diary_columns.contains(c.as_str()))
            .cloned()
            .collect();

        let mut dropped: Vec<String> = interview
            .columns
            .iter()
            .filter(|c| !diary_columns.contains(c.as_str()))
            .chain(diary.columns.iter().filter(|c| !interview_columns.contains(c.as_str())))
            .cloned()
            .collect();
        dropped.sort();
        dropped.dedup();

        let interview_ids: HashSet<&str> =
            interview.records.iter().map(|r| r.newid.as_str()).collect();
        let mut duplicates: Vec<String> = diary
            .records
            .iter()
            .filter(|r| interview_ids.contains(r.newid.as_str()))
            .map(|r| r.newid.clone())
            .collect();
        duplicates.sort();
        duplicates.dedup();

        if !duplicates.is_empty() {
            match self.duplicate_policy {
                DuplicatePolicy::Reject => {
                    return Err(PipelineError::DuplicateHousehold {
                        year: self.year,
                        count: duplicates.len(),
                        first: duplicates[0].clone(),
                    });
                }
                DuplicatePolicy::Retain => {
                    warn!(
                        "year {}: {} household id(s) in both panels will double-count",
                        self.year,
                        duplicates.len()
                    );
                }
            }
        }

        let mut unified = interview.project(&common);
        unified.records.extend(diary.project(&common).records);

        info!(
            "year {}: unified {} households on {} shared columns ({} panel-only dropped)",
            self.year,
            unified.len(),
            common.len(),
            dropped.len()
        );
        Ok((unified, dropped, duplicates))
    }

    /// Stack Interview then Diary category costs
    pub fn merge_expenditures(
        &self,
        interview: Vec<ExpenditureRecord>,
        diary: Vec<ExpenditureRecord>,
    ) -> Vec<ExpenditureRecord> {
        let mut unified = interview;
        unified.extend(diary);
        unified
    }

    pub fn reconcile(
        &self,
        interview_households: &HouseholdTable,
        diary_households: &HouseholdTable,
        interview_costs: Vec<ExpenditureRecord>,
        diary_costs: Vec<ExpenditureRecord>,
    ) -> PipelineResult<ReconciledPanels> {
        let (households, dropped_columns, duplicate_ids) =
            self.merge_households(interview_households, diary_households)?;
        let expenditures = self.merge_expenditures(interview_costs, diary_costs);

        Ok(ReconciledPanels {
            households,
            expenditures,
            dropped_columns,
            duplicate_ids,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::{HouseholdRecord, Replicates};

    fn household(newid: &str, source: Panel, fields: &[&str]) -> HouseholdRecord {
        HouseholdRecord {
            newid: newid.to_string(),
            source,
            scope: 3,
            raw_weights: Replicates::splat(4.0),
            weights: Replicates::splat(1.0),
            fields: fields.iter().map(|f| Some(f.to_string())).collect(),
        }
    }

    fn panels() -> (HouseholdTable, HouseholdTable) {
        let interview = HouseholdTable {
            columns: vec!["NEWID".into(), "REGION".into(), "QINTRVMO".into()],
            records: vec![household("1001012", Panel::Interview, &["1001012", "1", "02"])],
        };
        let diary = HouseholdTable {
            columns: vec!["NEWID".into(), "WEEKI".into(), "REGION".into()],
            records: vec![household("2001011", Panel::Diary, &["2001011", "1", "4"])],
        };
        (interview, diary)
    }

    #[test]
    fn test_households_keep_shared_columns() {
        let (interview, diary) = panels();
        let reconciler = PanelReconciler::new(2018, DuplicatePolicy::Retain);
        let (unified, dropped, duplicates) =
            reconciler.merge_households(&interview, &diary).unwrap();

        assert_eq!(unified.columns, vec!["NEWID", "REGION"]);
        assert_eq!(unified.len(), 2);
        assert_eq!(unified.field(&unified.records[1], "REGION"), Some("4"));
        assert_eq!(unified.records[1].source, Panel::Diary);
        assert_eq!(dropped, vec!["QINTRVMO", "WEEKI"]);
        assert!(duplicates.is_empty());
    }

    #[test]
    fn test_duplicate_ids_retained_by_default() {
        let (interview, mut diary) = panels();
        diary.records[0].newid = "1001012".to_string();

        let reconciler = PanelReconciler::new(2018, DuplicatePolicy::Retain);
        let (unified, _, duplicates) = reconciler.merge_households(&interview, &diary).unwrap();
        assert_eq!(unified.len(), 2);
        assert_eq!(duplicates, vec!["1001012"]);
    }

    #[test]
    fn test_duplicate_ids_rejected_when_configured() {
        let (interview, mut diary) = panels();
        diary.records[0].newid = "1001012".to_string();

        let reconciler = PanelReconciler::new(2018, DuplicatePolicy::Reject);
        let err = reconciler.merge_households(&interview, &diary).unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateHousehold { count: 1, .. }));
    }

    #[test]
    fn test_interview_expenditures_filter_year_and_publication() {
        let config = PipelineConfig::default();
        let mtbi = RecordTable::from_rows(
            &["NEWID", "UCC", "COST", "REF_YR", "PUBFLAG"],
            &[
                &["1001012", "020510", "25.5", "2018", "2"],
                &["1001012", "020610", "10", "2017", "2"],
                &["1001012", "020110", "8", "2018", "1"],
            ],
        );

        let records = interview_expenditures(&mtbi, 2018, &config).unwrap();
        assert_eq!(
            records,
            vec![ExpenditureRecord::new("1001012", Panel::Interview, "020510", 25.5)]
        );
    }

    #[test]
    fn test_diary_expenditures_are_annualized() {
        let config = PipelineConfig::default();
        let expd = RecordTable::from_rows(
            &["NEWID", "UCC", "COST", "PUB_FLAG"],
            &[
                &["2001011", "020510", "2", "2"],
                &["2001011", "020610", "n/a", "2"],
                &["2001011", "020110", "5", "1"],
            ],
        );

        let records = diary_expenditures(&expd, &config).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].cost, 26.0);
        assert_eq!(records[1].cost, 0.0);
        assert!(records.iter().all(|r| r.source == Panel::Diary));
    }

    #[test]
    fn test_expenditure_merge_stacks_panels() {
        let reconciler = PanelReconciler::new(2018, DuplicatePolicy::Retain);
        let merged = reconciler.merge_expenditures(
            vec![ExpenditureRecord::new("1", Panel::Interview, "A", 1.0)],
            vec![ExpenditureRecord::new("2", Panel::Diary, "A", 13.0)],
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].source, Panel::Diary);
    }

    #[test]
    fn test_missing_cost_column_is_reported() {
        let config = PipelineConfig::default();
        let expd = RecordTable::from_rows(&["NEWID", "UCC", "PUB_FLAG"], &[&["1", "A", "2"]]);
        let err = diary_expenditures(&expd, &config).unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { ref column, .. } if column == "COST"));
    }
}
