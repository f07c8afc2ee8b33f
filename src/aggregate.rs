// 🧮 Aggregation Engine - weighted costs summed up the category tree
//
// Steps:
//   1. join category costs to households on the household id
//   2. weight each cost by all 45 replicate weights
//   3. pivot per household per leaf category (unreported categories read as 0)
//   4. walk sum rules deepest level first, parent = Σ children
//
// Invariant after a successful run, for every household, node and replicate:
//   value(node) == own(node) + Σ value(child)
// where own(node) is a cost reported directly on a code that also has children.

use crate::error::{PipelineError, PipelineResult};
use crate::hierarchy::{CompiledHierarchy, SumRule};
use crate::reconcile::ExpenditureRecord;
use crate::weights::{HouseholdRecord, HouseholdTable, Replicates};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

// ============================================================================
// LEAF PIVOT
// ============================================================================

/// Weighted leaf costs per household, zero-filled over the pivot's columns
#[derive(Debug, Clone, Default)]
pub struct LeafPivot {
    /// Every leaf code reported by at least one joined household
    columns: BTreeSet<String>,
    rows: HashMap<String, HashMap<String, Replicates>>,
    pub joined_rows: usize,
    pub dropped_rows: usize,
}

impl LeafPivot {
    /// Inner join of costs to households, weighted per replicate
    pub fn build(households: &HouseholdTable, expenditures: &[ExpenditureRecord]) -> LeafPivot {
        let mut by_id: HashMap<&str, Vec<&HouseholdRecord>> = HashMap::new();
        for record in &households.records {
            by_id.entry(record.newid.as_str()).or_default().push(record);
        }

        let mut pivot = LeafPivot::default();
        for exp in expenditures {
            let Some(matches) = by_id.get(exp.household_id.as_str()) else {
                pivot.dropped_rows += 1;
                continue;
            };
            // A household listed twice joins twice
            for household in matches {
                let weighted = household.weights.scale(exp.cost);
                *pivot
                    .rows
                    .entry(exp.household_id.clone())
                    .or_default()
                    .entry(exp.category_code.clone())
                    .or_default() += weighted;
                pivot.joined_rows += 1;
            }
            pivot.columns.insert(exp.category_code.clone());
        }

        if pivot.dropped_rows > 0 {
            debug!("join: dropped {} cost rows without a household", pivot.dropped_rows);
        }
        pivot
    }

    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    pub fn has_column(&self, code: &str) -> bool {
        self.columns.contains(code)
    }

    /// Weighted cost of a leaf for a household; zero when the household
    /// reported nothing there, None when no household reported the code
    pub fn value(&self, household_id: &str, code: &str) -> Option<Replicates> {
        if !self.columns.contains(code) {
            return None;
        }
        Some(
            self.rows
                .get(household_id)
                .and_then(|r| r.get(code))
                .copied()
                .unwrap_or(Replicates::ZERO),
        )
    }

    fn household_row(&self, household_id: &str) -> Option<&HashMap<String, Replicates>> {
        self.rows.get(household_id)
    }
}

// ============================================================================
// AGGREGATED TABLE
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedCostRecord {
    pub household_id: String,
    pub category_code: String,
    pub values: Replicates,
}

/// Household × node table; cells never computed read as zero
#[derive(Debug, Clone, Default)]
pub struct AggregatedCostTable {
    pub year: i32,
    households: Vec<String>,

    /// Leaf columns then rule codes, deepest rules first
    codes: Vec<String>,
    values: BTreeMap<String, HashMap<String, Replicates>>,

    /// Costs reported directly on codes that are also rule parents
    own_costs: HashMap<String, HashMap<String, Replicates>>,
}

impl AggregatedCostTable {
    pub fn households(&self) -> &[String] {
        &self.households
    }

    pub fn codes(&self) -> &[String] {
        &self.codes
    }

    pub fn value(&self, household_id: &str, code: &str) -> Option<Replicates> {
        if !self.codes.iter().any(|c| c == code) {
            return None;
        }
        Some(
            self.values
                .get(household_id)
                .and_then(|v| v.get(code))
                .copied()
                .unwrap_or(Replicates::ZERO),
        )
    }

    /// Every household × node, zero cells included
    pub fn records(&self) -> impl Iterator<Item = AggregatedCostRecord> + '_ {
        self.households.iter().flat_map(move |hh| {
            let row = self.values.get(hh);
            self.codes.iter().map(move |code| AggregatedCostRecord {
                household_id: hh.clone(),
                category_code: code.clone(),
                values: row.and_then(|r| r.get(code)).copied().unwrap_or(Replicates::ZERO),
            })
        })
    }

    /// Weighted population total of one node, per replicate
    pub fn total(&self, code: &str) -> Replicates {
        let mut total = Replicates::ZERO;
        for row in self.values.values() {
            if let Some(v) = row.get(code) {
                total += *v;
            }
        }
        total
    }

    /// Cost a household reported on the code itself, before any children
    pub fn own_cost(&self, household_id: &str, code: &str) -> Replicates {
        self.own_costs
            .get(household_id)
            .and_then(|r| r.get(code))
            .copied()
            .unwrap_or(Replicates::ZERO)
    }

    /// (household, parent) cells where the parent differs from its own cost
    /// plus its children's sum
    pub fn sum_violations(&self, hierarchy: &CompiledHierarchy) -> Vec<(String, String)> {
        let mut violations = Vec::new();
        for hh in &self.households {
            for rule in hierarchy.rules.values() {
                let mut expected = self.own_cost(hh, &rule.parent_code);
                for child in &rule.child_codes {
                    expected += self.value(hh, child).unwrap_or(Replicates::ZERO);
                }
                if self.value(hh, &rule.parent_code) != Some(expected) {
                    violations.push((hh.clone(), rule.parent_code.clone()));
                }
            }
        }
        violations
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregationStats {
    pub households: usize,
    pub leaf_codes: usize,
    pub rules_applied: usize,
    pub joined_rows: usize,
    pub dropped_rows: usize,
    pub self_reported_parents: usize,
}

// ============================================================================
// AGGREGATION ENGINE
// ============================================================================

pub struct AggregationEngine<'a> {
    year: i32,
    hierarchy: &'a CompiledHierarchy,
}

impl<'a> AggregationEngine<'a> {
    pub fn new(year: i32, hierarchy: &'a CompiledHierarchy) -> Self {
        AggregationEngine { year, hierarchy }
    }

    /// Check every rule's children resolve before any household is summed
    ///
    /// A child resolves when it is a pivot column or a rule already computed
    /// at a deeper level.
    pub fn resolve_order(&self, pivot: &LeafPivot) -> PipelineResult<Vec<&'a SumRule>> {
        let rules = self.hierarchy.rules_deepest_first();
        let mut resolvable: HashSet<&str> = pivot.columns().iter().map(String::as_str).collect();

        let mut start = 0;
        while start < rules.len() {
            let level = rules[start].level;
            let end = rules[start..]
                .iter()
                .position(|r| r.level != level)
                .map_or(rules.len(), |p| start + p);

            // A level only sees what deeper levels produced
            for rule in &rules[start..end] {
                if let Some(missing) = rule
                    .child_codes
                    .iter()
                    .find(|c| !resolvable.contains(c.as_str()))
                {
                    return Err(PipelineError::UnresolvedCategory {
                        year: self.year,
                        parent: rule.parent_code.clone(),
                        code: missing.clone(),
                    });
                }
            }
            for rule in &rules[start..end] {
                resolvable.insert(rule.parent_code.as_str());
            }
            start = end;
        }

        Ok(rules)
    }

    pub fn aggregate(
        &self,
        households: &HouseholdTable,
        expenditures: &[ExpenditureRecord],
    ) -> PipelineResult<(AggregatedCostTable, AggregationStats)> {
        let pivot = LeafPivot::build(households, expenditures);
        let rules = self.resolve_order(&pivot)?;

        let mut ids: Vec<String> = households.records.iter().map(|r| r.newid.clone()).collect();
        ids.sort();
        ids.dedup();

        // Households share nothing, so each tree is summed independently
        let values: BTreeMap<String, HashMap<String, Replicates>> = ids
            .par_iter()
            .map(|hh| (hh.clone(), sum_household(pivot.household_row(hh), &rules)))
            .collect();

        let mut codes: Vec<String> = pivot.columns().iter().cloned().collect();
        let mut self_reported = Vec::new();
        for rule in &rules {
            if pivot.has_column(&rule.parent_code) {
                warn!(
                    "year {}: cost reported on {} is added to the sum of its children",
                    self.year, rule.parent_code
                );
                self_reported.push(rule.parent_code.as_str());
            } else {
                codes.push(rule.parent_code.clone());
            }
        }

        let mut own_costs: HashMap<String, HashMap<String, Replicates>> = HashMap::new();
        for hh in &ids {
            for code in &self_reported {
                if let Some(v) = pivot.household_row(hh).and_then(|r| r.get(*code)) {
                    own_costs
                        .entry(hh.clone())
                        .or_default()
                        .insert(code.to_string(), *v);
                }
            }
        }

        let stats = AggregationStats {
            households: ids.len(),
            leaf_codes: pivot.columns().len(),
            rules_applied: rules.len(),
            joined_rows: pivot.joined_rows,
            dropped_rows: pivot.dropped_rows,
            self_reported_parents: self_reported.len(),
        };
        info!(
            "year {}: aggregated {} households over {} leaves and {} rules",
            self.year, stats.households, stats.leaf_codes, stats.rules_applied
        );

        Ok((
            AggregatedCostTable {
                year: self.year,
                households: ids,
                codes,
                values,
                own_costs,
            },
            stats,
        ))
    }
}

/// Bottom-up sums for one household; rules arrive deepest level first.
/// A parent's own reported cost, if any, is part of its total.
fn sum_household(
    leaves: Option<&HashMap<String, Replicates>>,
    rules: &[&SumRule],
) -> HashMap<String, Replicates> {
    let mut values = leaves.cloned().unwrap_or_default();
    for rule in rules {
        let mut total = values.get(&rule.parent_code).copied().unwrap_or(Replicates::ZERO);
        for child in &rule.child_codes {
            if let Some(v) = values.get(child) {
                total += *v;
            }
        }
        values.insert(rule.parent_code.clone(), total);
    }
    values
}

// ============================================================================
// TESTS
// ============================================================================
