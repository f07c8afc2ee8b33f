// 🚩 Flag Resolver - suppressed or imputed values become nulls
//
// Survey value columns travel with a companion flag column. When the flag
// carries a suppression code the value is not publishable as reported, so the
// resolved column holds a null. Flag columns are dropped afterwards.

use crate::config::PipelineConfig;
use crate::dictionary::VariableDictionary;
use crate::table::RecordTable;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagPair {
    pub variable: String,
    pub flag: String,
}

/// (variable, flag) pairs that apply to one source label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagMapping {
    pub source: String,
    pub pairs: Vec<FlagPair>,
}

impl FlagMapping {
    pub fn new(source: &str, pairs: &[(&str, &str)]) -> Self {
        FlagMapping {
            source: source.to_string(),
            pairs: pairs
                .iter()
                .map(|(v, f)| FlagPair {
                    variable: v.to_string(),
                    flag: f.to_string(),
                })
                .collect(),
        }
    }

    /// Build the mapping from the variable dictionary for a processing year
    pub fn from_dictionary(dictionary: &VariableDictionary, source: &str, year: i32) -> Self {
        FlagMapping {
            source: source.to_string(),
            pairs: dictionary
                .flag_pairs(source, year)
                .into_iter()
                .map(|(variable, flag)| FlagPair { variable, flag })
                .collect(),
        }
    }
}

/// Summary of one resolution pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagResolution {
    /// (source variable, resolved column) pairs that were applied
    pub resolved: Vec<(String, String)>,
    pub nulled_cells: usize,
    pub dropped_flags: Vec<String>,
}

pub struct FlagResolver<'a> {
    config: &'a PipelineConfig,
}

impl<'a> FlagResolver<'a> {
    pub fn new(config: &'a PipelineConfig) -> Self {
        FlagResolver { config }
    }

    /// Name of the resolved column: the variable minus a trailing panel suffix
    pub fn resolved_name(&self, variable: &str) -> String {
        match variable.char_indices().last() {
            Some((idx, c)) if idx > 0 && self.config.panel_suffixes.contains(&c) => {
                variable[..idx].to_string()
            }
            _ => variable.to_string(),
        }
    }

    /// Resolve every applicable pair in place, then drop the flag columns
    pub fn resolve(&self, table: &mut RecordTable, mapping: &FlagMapping) -> FlagResolution {
        let mut outcome = FlagResolution::default();

        let applicable: Vec<&FlagPair> = mapping
            .pairs
            .iter()
            .filter(|p| table.has_column(&p.variable) && table.has_column(&p.flag))
            .collect();

        for pair in &applicable {
            let (Some(values), Some(flags)) = (
                table.column_values(&pair.variable),
                table.column_values(&pair.flag),
            ) else {
                continue;
            };

            let resolved: Vec<_> = values
                .into_iter()
                .zip(flags)
                .map(|(value, flag)| match flag {
                    Some(f) if self.config.is_suppressed(&f) => {
                        outcome.nulled_cells += 1;
                        None
                    }
                    _ => value,
                })
                .collect();

            let target = self.resolved_name(&pair.variable);
            debug!("{}: {} flagged by {} → {}", mapping.source, pair.variable, pair.flag, target);
            table.set_column(&target, resolved);
            outcome.resolved.push((pair.variable.clone(), target));
        }

        // A flag column can guard several variables
        let mut seen = HashSet::new();
        let flag_columns: Vec<&str> = applicable
            .iter()
            .map(|p| p.flag.as_str())
            .filter(|f| seen.insert(*f))
            .collect();
        table.drop_columns(&flag_columns);
        outcome.dropped_flags = flag_columns.iter().map(|f| f.to_string()).collect();

        info!(
            "{}: resolved {} flagged variables, nulled {} cells",
            mapping.source,
            outcome.resolved.len(),
            outcome.nulled_cells
        );
        outcome
    }
}

// ============================================================================
// TESTS
// ============================================================================
