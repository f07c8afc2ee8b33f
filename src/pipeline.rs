// 🏭 Year Pipeline - one processing year, components in dependency order
//
// The caller owns a SurveyArchive (every year's raw inputs plus the
// dictionaries). Each run builds a YearContext from it and owns its tables
// exclusively, so years can run in parallel.

use crate::aggregate::{AggregatedCostTable, AggregationEngine, AggregationStats};
use crate::config::PipelineConfig;
use crate::data_quality::{DataQualityEngine, QualityReport};
use crate::dictionary::{CodeDictionary, CodeEntry, VariableDictionary};
use crate::error::{PipelineError, PipelineResult};
use crate::flags::{FlagMapping, FlagResolution, FlagResolver};
use crate::hierarchy::{CategoryNode, CompiledHierarchy, HierarchyCompiler};
use crate::reconcile::{
    diary_expenditures, interview_expenditures, ExpenditureRecord, PanelReconciler,
};
use crate::table::RecordTable;
use crate::weights::{HouseholdTable, Panel, WeightNormalizer};
use log::{error, info};
use rayon::prelude::*;
use std::collections::BTreeMap;

// ============================================================================
// INPUTS
// ============================================================================

/// Raw tables for one processing year
#[derive(Debug, Clone, Default)]
pub struct YearInputs {
    pub interview_households: RecordTable,
    pub diary_households: RecordTable,
    pub interview_costs: RecordTable,
    pub diary_costs: RecordTable,
    pub hierarchy: Vec<CategoryNode>,
}

/// Multi-year store owned by the caller
#[derive(Debug, Clone, Default)]
pub struct SurveyArchive {
    years: BTreeMap<i32, YearInputs>,
    pub variables: VariableDictionary,
    pub codes: Vec<CodeEntry>,
}

impl SurveyArchive {
    pub fn new(variables: VariableDictionary, codes: Vec<CodeEntry>) -> Self {
        SurveyArchive {
            years: BTreeMap::new(),
            variables,
            codes,
        }
    }

    pub fn insert_year(&mut self, year: i32, inputs: YearInputs) {
        self.years.insert(year, inputs);
    }

    pub fn year(&self, year: i32) -> Option<&YearInputs> {
        self.years.get(&year)
    }

    pub fn years(&self) -> Vec<i32> {
        self.years.keys().copied().collect()
    }
}

/// Everything one year's run may read besides its raw tables
pub struct YearContext<'a> {
    pub year: i32,
    pub config: &'a PipelineConfig,
    pub variables: VariableDictionary,
    pub codes: CodeDictionary,
}

impl<'a> YearContext<'a> {
    pub fn new(archive: &SurveyArchive, year: i32, config: &'a PipelineConfig) -> Self {
        YearContext {
            year,
            config,
            variables: archive.variables.for_year(year),
            codes: CodeDictionary::for_year(&archive.codes, year),
        }
    }

    fn flag_mapping(&self, source: &str) -> FlagMapping {
        FlagMapping::from_dictionary(&self.variables, source, self.year)
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

#[derive(Debug, Clone)]
pub struct YearOutput {
    pub year: i32,
    pub households: HouseholdTable,
    pub expenditures: Vec<ExpenditureRecord>,
    pub hierarchy: CompiledHierarchy,
    pub aggregated: AggregatedCostTable,
    pub stats: AggregationStats,
    pub flag_resolutions: Vec<FlagResolution>,
    pub dropped_columns: Vec<String>,
    pub quality: QualityReport,
}

// ============================================================================
// RUNNER
// ============================================================================

pub fn run_year(
    archive: &SurveyArchive,
    year: i32,
    config: &PipelineConfig,
) -> PipelineResult<YearOutput> {
    let inputs = archive.year(year).ok_or(PipelineError::MissingYear { year })?;
    let ctx = YearContext::new(archive, year, config);
    info!("Processing year {}", year);

    // 1. Hierarchy
    let hierarchy =
        HierarchyCompiler::with_policy(config.empty_rule_policy).compile(&inputs.hierarchy);
    info!(
        "year {}: compiled {} rules from {} nodes",
        year,
        hierarchy.rule_count(),
        hierarchy.nodes.len()
    );

    // 2. Flags
    let resolver = FlagResolver::new(config);
    let mut flag_resolutions = Vec::new();
    let mut resolve = |table: &RecordTable, label: &str| {
        let mut table = table.clone();
        flag_resolutions.push(resolver.resolve(&mut table, &ctx.flag_mapping(label)));
        table
    };
    let fmli = resolve(&inputs.interview_households, &config.interview_label);
    let fmld = resolve(&inputs.diary_households, &config.diary_label);
    let mtbi = resolve(&inputs.interview_costs, &config.interview_cost_label);
    let expd = resolve(&inputs.diary_costs, &config.diary_cost_label);

    // 3. Weights
    let normalizer = WeightNormalizer::new(year);
    let interview = normalizer.normalize(&fmli, Panel::Interview)?;
    let diary = normalizer.normalize(&fmld, Panel::Diary)?;

    // 4. Reconciliation
    let reconciled = PanelReconciler::new(year, config.duplicate_policy).reconcile(
        &interview,
        &diary,
        interview_expenditures(&mtbi, year, config)?,
        diary_expenditures(&expd, config)?,
    )?;

    // 5. Aggregation
    let (aggregated, stats) = AggregationEngine::new(year, &hierarchy)
        .aggregate(&reconciled.households, &reconciled.expenditures)?;

    let quality = DataQualityEngine::new(year).report(
        &hierarchy.warnings,
        &reconciled.duplicate_ids,
        stats.dropped_rows,
        &reconciled.households,
        &ctx.codes,
    );
    info!("{}", quality.summary());

    Ok(YearOutput {
        year,
        households: reconciled.households,
        expenditures: reconciled.expenditures,
        hierarchy,
        aggregated,
        stats,
        flag_resolutions,
        dropped_columns: reconciled.dropped_columns,
        quality,
    })
}

/// Run every requested year in parallel; a failed year never stops the others
pub fn run_years(
    archive: &SurveyArchive,
    years: &[i32],
    config: &PipelineConfig,
) -> BTreeMap<i32, PipelineResult<YearOutput>> {
    years
        .par_iter()
        .map(|&year| {
            let result = run_year(archive, year, config);
            if let Err(e) = &result {
                error!("year {} rejected: {}", year, e);
            }
            (year, result)
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DuplicatePolicy;
    use crate::dictionary::VariableEntry;
    use crate::hierarchy::SourcePanel;
    use crate::weights::{raw_weight_column, Replicates, REPLICATE_COUNT};

    /// Household rows sharing one raw weight on every replicate
    fn household_table(extra: &[&str], rows: &[&[&str]], weight: &str) -> RecordTable {
        let mut columns: Vec<String> = extra.iter().map(|c| c.to_string()).collect();
        columns.extend((0..REPLICATE_COUNT).map(raw_weight_column));
        let mut table = RecordTable::new(columns);
        for prefix in rows {
            let mut cells: Vec<Option<String>> =
                prefix.iter().map(|c| Some(c.to_string())).collect();
            cells.extend(std::iter::repeat(Some(weight.to_string())).take(REPLICATE_COUNT));
            table.push_row(cells);
        }
        table
    }

    fn node(code: &str, level: u32) -> CategoryNode {
        CategoryNode::new(code, level, code, SourcePanel::Integrated)
    }

    fn archive() -> SurveyArchive {
        let variables = VariableDictionary::new(vec![VariableEntry {
            variable_name: "INCOME".to_string(),
            flag_name: Some("INCOME_".to_string()),
            source: "FMLI".to_string(),
            first_year: 2010,
            last_year: None,
        }]);
        let mut archive = SurveyArchive::new(variables, Vec::new());

        archive.insert_year(
            2018,
            YearInputs {
                interview_households: household_table(
                    &["NEWID", "QINTRVMO", "QINTRVYR", "REGION", "INCOME", "INCOME_"],
                    &[
                        &["1001012", "06", "2018", "1", "52000", "A"],
                        &["1001022", "02", "2019", "3", "41000", ""],
                    ],
                    "12",
                ),
                diary_households: household_table(&["NEWID", "REGION"], &[&["2001011", "4"]], "12"),
                interview_costs: RecordTable::from_rows(
                    &["NEWID", "UCC", "COST", "REF_YR", "PUBFLAG"],
                    &[
                        &["1001012", "A", "10", "2018", "2"],
                        &["1001012", "B", "5", "2018", "2"],
                        &["1001022", "A", "6", "2018", "2"],
                        &["1001022", "B", "99", "2017", "2"],
                    ],
                ),
                diary_costs: RecordTable::from_rows(
                    &["NEWID", "UCC", "COST", "PUB_FLAG"],
                    &[&["2001011", "B", "1", "2"], &["9999999", "A", "1", "2"]],
                ),
                hierarchy: vec![node("ROOT", 1), node("A", 2), node("B", 2)],
            },
        );
        archive
    }

    #[test]
    fn test_run_year_end_to_end() {
        let config = PipelineConfig::default();
        let output = run_year(&archive(), 2018, &config).unwrap();

        // Shared columns only: ids, region and the raw weights
        assert_eq!(output.households.columns[..2], ["NEWID", "REGION"]);
        assert_eq!(output.households.columns.len(), 2 + REPLICATE_COUNT);
        assert!(!output.households.has_column("INCOME"));
        assert!(!output.households.has_column("INCOME_"));
        assert_eq!(output.households.len(), 3);
        assert_eq!(output.expenditures.len(), 5);
        assert_eq!(output.stats.dropped_rows, 1);

        // 1001012: scope 3 → weight 3, costs 10 + 5
        assert_eq!(output.aggregated.value("1001012", "ROOT"), Some(Replicates::splat(45.0)));
        // 1001022: interviewed Feb of next year → scope 2 → weight 2, cost 6
        assert_eq!(output.aggregated.value("1001022", "ROOT"), Some(Replicates::splat(12.0)));
        // 2001011: diary weight 3, cost 1 × 13
        assert_eq!(output.aggregated.value("2001011", "ROOT"), Some(Replicates::splat(39.0)));

        assert!(output.aggregated.sum_violations(&output.hierarchy).is_empty());
        assert_eq!(output.flag_resolutions[0].nulled_cells, 1);
    }

    #[test]
    fn test_unknown_year_is_reported() {
        let config = PipelineConfig::default();
        assert!(matches!(
            run_year(&archive(), 1999, &config),
            Err(PipelineError::MissingYear { year: 1999 })
        ));
    }

    #[test]
    fn test_failed_year_does_not_stop_others() {
        let config = PipelineConfig::default();
        let mut archive = archive();
        let mut broken = archive.year(2018).unwrap().clone();
        broken.interview_costs = RecordTable::from_rows(
            &["NEWID", "UCC", "COST", "REF_YR", "PUBFLAG"],
            &[&["1001012", "A", "10", "2019", "2"]],
        );
        broken.hierarchy.push(node("EXTRA", 1));
        broken.hierarchy.push(node("NOWHERE", 2));
        archive.insert_year(2019, broken);

        let results = run_years(&archive, &[2018, 2019], &config);
        assert!(results[&2018].is_ok());
        assert!(matches!(
            results[&2019],
            Err(PipelineError::UnresolvedCategory { ref code, .. }) if code == "NOWHERE"
        ));
    }

    #[test]
    fn test_duplicate_policy_reject_fails_year() {
        let config = PipelineConfig {
            duplicate_policy: DuplicatePolicy::Reject,
            ..PipelineConfig::default()
        };
        let mut archive = archive();
        let mut inputs = archive.year(2018).unwrap().clone();
        inputs.diary_households = household_table(&["NEWID", "REGION"], &[&["1001012", "4"]], "12");
        archive.insert_year(2018, inputs);

        assert!(matches!(
            run_year(&archive, 2018, &config),
            Err(PipelineError::DuplicateHousehold { .. })
        ));
    }
}
