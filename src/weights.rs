// ⚖️ Weight Normalizer - scope-adjusted replicate weights
//
// Each household carries 44 replicate weights plus a final weight. A household
// only speaks for the months of the processing year its record covers, so
// every weight is scaled by scope / 12.

use crate::error::{PipelineError, PipelineResult};
use crate::table::{parse_number, Cell, RecordTable};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign};

pub const REPLICATE_COUNT: usize = 45;

/// Index of the final weight within a replicate array
pub const FINAL_WEIGHT: usize = REPLICATE_COUNT - 1;

pub const HOUSEHOLD_ID: &str = "NEWID";
pub const INTERVIEW_MONTH: &str = "QINTRVMO";
pub const INTERVIEW_YEAR: &str = "QINTRVYR";

/// Raw weight column for a replicate index (WTREP01..WTREP44, FINLWT21)
pub fn raw_weight_column(i: usize) -> String {
    if i == FINAL_WEIGHT {
        "FINLWT21".to_string()
    } else {
        format!("WTREP{:02}", i + 1)
    }
}

/// Derived weight column for a replicate index (REPWT1..REPWT45)
pub fn scaled_weight_column(i: usize) -> String {
    format!("REPWT{}", i + 1)
}

/// Weighted-cost column for a replicate index (RCOST1..RCOST45)
pub fn weighted_cost_column(i: usize) -> String {
    format!("RCOST{}", i + 1)
}

// ============================================================================
// PANEL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Panel {
    Interview,
    Diary,
}

impl Panel {
    pub fn code(&self) -> &'static str {
        match self {
            Panel::Interview => "I",
            Panel::Diary => "D",
        }
    }
}

impl fmt::Display for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Panel::Interview => write!(f, "Interview"),
            Panel::Diary => write!(f, "Diary"),
        }
    }
}

// ============================================================================
// REPLICATES
// ============================================================================

/// One value per replicate weight; the last slot belongs to the final weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Replicates(pub [f64; REPLICATE_COUNT]);

impl Replicates {
    pub const ZERO: Replicates = Replicates([0.0; REPLICATE_COUNT]);

    pub fn splat(value: f64) -> Self {
        Replicates([value; REPLICATE_COUNT])
    }

    pub fn final_weight(&self) -> f64 {
        self.0[FINAL_WEIGHT]
    }

    pub fn scale(&self, factor: f64) -> Replicates {
        let mut out = *self;
        for v in out.0.iter_mut() {
            *v *= factor;
        }
        out
    }

    /// Apply the scope adjustment: value * scope / 12
    pub fn scoped(&self, scope: u8) -> Replicates {
        let mut out = *self;
        for v in out.0.iter_mut() {
            *v = *v * scope as f64 / 12.0;
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.0.iter()
    }
}

impl Default for Replicates {
    fn default() -> Self {
        Replicates::ZERO
    }
}

impl Add for Replicates {
    type Output = Replicates;

    fn add(mut self, rhs: Replicates) -> Replicates {
        self += rhs;
        self
    }
}

impl AddAssign for Replicates {
    fn add_assign(&mut self, rhs: Replicates) {
        for (a, b) in self.0.iter_mut().zip(rhs.0.iter()) {
            *a += *b;
        }
    }
}

// ============================================================================
// SCOPE
// ============================================================================

/// Months of the processing year an Interview record speaks for
///
/// Interviews held in Q1 of the processing year only cover the months before
/// the interview; interviews held in Q1 of the following year still cover the
/// tail of the processing year.
pub fn interview_scope(month: Option<&str>, interview_year: Option<&str>, year: i32) -> u8 {
    let month = month.and_then(|m| m.trim().parse::<u32>().ok());
    let interview_year = interview_year.and_then(|y| y.trim().parse::<i32>().ok());

    match (month, interview_year) {
        (Some(m @ 1..=3), Some(y)) if y == year => (m - 1) as u8,
        (Some(m @ 1..=3), Some(y)) if y == year + 1 => (4 - m) as u8,
        _ => 3,
    }
}

// ============================================================================
// HOUSEHOLDS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct HouseholdRecord {
    pub newid: String,
    pub source: Panel,
    pub scope: u8,
    pub raw_weights: Replicates,
    pub weights: Replicates,

    /// Raw survey fields, aligned with the owning table's columns
    pub fields: Vec<Cell>,
}

/// Weight-normalized households with their raw survey columns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HouseholdTable {
    pub columns: Vec<String>,
    pub records: Vec<HouseholdRecord>,
}

impl HouseholdTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Trimmed, non-empty field value of a record
    pub fn field<'a>(&self, record: &'a HouseholdRecord, column: &str) -> Option<&'a str> {
        let idx = self.columns.iter().position(|c| c == column)?;
        record
            .fields
            .get(idx)?
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Keep only the named columns, in the given order
    pub fn project(&self, columns: &[String]) -> HouseholdTable {
        let positions: Vec<Option<usize>> = columns
            .iter()
            .map(|c| self.columns.iter().position(|own| own == c))
            .collect();

        let records = self
            .records
            .iter()
            .map(|r| HouseholdRecord {
                fields: positions
                    .iter()
                    .map(|p| p.and_then(|i| r.fields.get(i).cloned().flatten()))
                    .collect(),
                ..r.clone()
            })
            .collect();

        HouseholdTable {
            columns: columns.to_vec(),
            records,
        }
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

pub struct WeightNormalizer {
    year: i32,
}

impl WeightNormalizer {
    pub fn new(year: i32) -> Self {
        WeightNormalizer { year }
    }

    /// Scope and scale every household of one panel
    pub fn normalize(&self, table: &RecordTable, panel: Panel) -> PipelineResult<HouseholdTable> {
        let label = format!("{} households", panel);
        require_column(table, HOUSEHOLD_ID, &label)?;
        if panel == Panel::Interview {
            require_column(table, INTERVIEW_MONTH, &label)?;
            require_column(table, INTERVIEW_YEAR, &label)?;
        }

        let weight_columns: Vec<String> = (0..REPLICATE_COUNT).map(raw_weight_column).collect();
        for column in weight_columns.iter().filter(|c| !table.has_column(c)) {
            warn!("{}: weight column {} missing, reading as zero", label, column);
        }

        let mut records = Vec::with_capacity(table.len());
        for row in table.rows() {
            let Some(newid) = row.get(HOUSEHOLD_ID) else {
                warn!("{}: row without {} skipped", label, HOUSEHOLD_ID);
                continue;
            };

            let scope = match panel {
                Panel::Diary => 3,
                Panel::Interview => {
                    interview_scope(row.get(INTERVIEW_MONTH), row.get(INTERVIEW_YEAR), self.year)
                }
            };

            let mut raw = Replicates::ZERO;
            for (i, column) in weight_columns.iter().enumerate() {
                raw.0[i] = parse_number(row.get(column));
            }

            records.push(HouseholdRecord {
                newid: newid.to_string(),
                source: panel,
                scope,
                raw_weights: raw,
                weights: raw.scoped(scope),
                fields: row.cells().to_vec(),
            });
        }

        info!("{}: normalized {} weights for {} households", label, REPLICATE_COUNT, records.len());

        Ok(HouseholdTable {
            columns: table.columns().to_vec(),
            records,
        })
    }
}

fn require_column(table: &RecordTable, column: &str, label: &str) -> PipelineResult<()> {
    if table.has_column(column) {
        Ok(())
    } else {
        Err(PipelineError::MissingColumn {
            table: label.to_string(),
            column: column.to_string(),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn weight_header() -> Vec<String> {
        (0..REPLICATE_COUNT).map(raw_weight_column).collect()
    }

    fn households(extra: &[&str], rows: &[Vec<String>]) -> RecordTable {
        let mut columns: Vec<String> = extra.iter().map(|c| c.to_string()).collect();
        columns.extend(weight_header());
        let mut table = RecordTable::new(columns);
        for row in rows {
            table.push_row(row.iter().map(|v| Some(v.clone())).collect());
        }
        table
    }

    fn row(prefix: &[&str], weight: &str) -> Vec<String> {
        let mut cells: Vec<String> = prefix.iter().map(|c| c.to_string()).collect();
        cells.extend(std::iter::repeat(weight.to_string()).take(REPLICATE_COUNT));
        cells
    }

    #[test]
    fn test_column_names() {
        assert_eq!(raw_weight_column(0), "WTREP01");
        assert_eq!(raw_weight_column(43), "WTREP44");
        assert_eq!(raw_weight_column(44), "FINLWT21");
        assert_eq!(scaled_weight_column(44), "REPWT45");
        assert_eq!(weighted_cost_column(0), "RCOST1");
    }

    #[test]
    fn test_interview_scope_rules() {
        assert_eq!(interview_scope(Some("01"), Some("2018"), 2018), 0);
        assert_eq!(interview_scope(Some("03"), Some("2018"), 2018), 2);
        assert_eq!(interview_scope(Some("1"), Some("2019"), 2018), 3);
        assert_eq!(interview_scope(Some("02"), Some("2019"), 2018), 2);
        assert_eq!(interview_scope(Some("03"), Some("2019"), 2018), 1);
        assert_eq!(interview_scope(Some("07"), Some("2018"), 2018), 3);
        assert_eq!(interview_scope(None, Some("2018"), 2018), 3);
    }

    #[test]
    fn test_diary_weights_scale_to_quarter() {
        let table = households(&["NEWID"], &[row(&["2001011"], "12")]);
        let normalized = WeightNormalizer::new(2018).normalize(&table, Panel::Diary).unwrap();

        let record = &normalized.records[0];
        assert_eq!(record.scope, 3);
        assert_eq!(record.source, Panel::Diary);
        assert!(record.weights.iter().all(|w| *w == 3.0));
        assert_eq!(record.raw_weights.final_weight(), 12.0);
    }

    #[test]
    fn test_interview_scope_applied_to_weights() {
        let table = households(
            &["NEWID", "QINTRVMO", "QINTRVYR"],
            &[row(&["1001012", "02", "2018"], "1200"), row(&["1001013", "08", "2018"], "1200")],
        );
        let normalized = WeightNormalizer::new(2018).normalize(&table, Panel::Interview).unwrap();

        assert_eq!(normalized.records[0].scope, 1);
        assert_eq!(normalized.records[0].weights.final_weight(), 100.0);
        assert_eq!(normalized.records[1].scope, 3);
        assert_eq!(normalized.records[1].weights.0[0], 300.0);
    }

    #[test]
    fn test_non_numeric_weight_reads_as_zero() {
        let table = households(&["NEWID"], &[row(&["2001011"], ".")]);
        let normalized = WeightNormalizer::new(2018).normalize(&table, Panel::Diary).unwrap();
        assert_eq!(normalized.records[0].weights, Replicates::ZERO);
    }

    #[test]
    fn test_interview_requires_month_column() {
        let table = households(&["NEWID"], &[row(&["1001012"], "1")]);
        let err = WeightNormalizer::new(2018)
            .normalize(&table, Panel::Interview)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingColumn { .. }));
    }

    #[test]
    fn test_project_keeps_typed_fields() {
        let table = households(&["NEWID", "REGION"], &[row(&["2001011", "3"], "12")]);
        let normalized = WeightNormalizer::new(2018).normalize(&table, Panel::Diary).unwrap();
        let projected = normalized.project(&["REGION".to_string(), "NEWID".to_string()]);

        assert_eq!(projected.columns, vec!["REGION", "NEWID"]);
        assert_eq!(projected.field(&projected.records[0], "REGION"), Some("3"));
        assert_eq!(projected.records[0].scope, 3);
    }

    proptest! {
        #[test]
        fn prop_scope_is_bounded(month in 0u32..15, offset in -2i32..3) {
            let year = 2018;
            let scope = interview_scope(
                Some(format!("{:02}", month).as_str()),
                Some((year + offset).to_string().as_str()),
                year,
            );
            prop_assert!(scope <= 3);
        }
    }
}
