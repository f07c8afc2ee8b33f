// 📤 CSV Export - a year's unified tables and aggregated costs
// Writers take any io::Write so the layout can be checked in memory.

use crate::aggregate::AggregatedCostTable;
use crate::pipeline::YearOutput;
use crate::reconcile::{ExpenditureRecord, CATEGORY_CODE, COST};
use crate::weights::{
    scaled_weight_column, weighted_cost_column, HouseholdTable, HOUSEHOLD_ID, REPLICATE_COUNT,
};
use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SOURCE: &str = "SOURCE";
pub const SCOPE: &str = "SCOPE";

/// Raw columns, then SOURCE, SCOPE and the derived REPWT1..REPWT45
pub fn write_households<W: Write>(
    wtr: &mut csv::Writer<W>,
    table: &HouseholdTable,
) -> Result<usize> {
    let mut header: Vec<String> = table.columns.clone();
    header.push(SOURCE.to_string());
    header.push(SCOPE.to_string());
    header.extend((0..REPLICATE_COUNT).map(scaled_weight_column));
    wtr.write_record(&header)?;

    for record in &table.records {
        let mut row: Vec<String> = record
            .fields
            .iter()
            .map(|c| c.clone().unwrap_or_default())
            .collect();
        row.resize(table.columns.len(), String::new());
        row.push(record.source.code().to_string());
        row.push(record.scope.to_string());
        row.extend(record.weights.iter().map(|w| w.to_string()));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(table.len())
}

pub fn write_expenditures<W: Write>(
    wtr: &mut csv::Writer<W>,
    expenditures: &[ExpenditureRecord],
) -> Result<usize> {
    wtr.write_record([HOUSEHOLD_ID, SOURCE, CATEGORY_CODE, COST])?;
    for e in expenditures {
        wtr.write_record([
            e.household_id.as_str(),
            e.source.code(),
            e.category_code.as_str(),
            e.cost.to_string().as_str(),
        ])?;
    }
    wtr.flush()?;
    Ok(expenditures.len())
}

/// NEWID, UCC, RCOST1..RCOST45; all-zero rows are left out when `skip_zero`
pub fn write_aggregated<W: Write>(
    wtr: &mut csv::Writer<W>,
    table: &AggregatedCostTable,
    skip_zero: bool,
) -> Result<usize> {
    let mut header = vec![HOUSEHOLD_ID.to_string(), CATEGORY_CODE.to_string()];
    header.extend((0..REPLICATE_COUNT).map(weighted_cost_column));
    wtr.write_record(&header)?;

    let mut written = 0;
    for record in table.records() {
        if skip_zero && record.values.iter().all(|v| *v == 0.0) {
            continue;
        }
        let mut row = vec![record.household_id, record.category_code];
        row.extend(record.values.iter().map(|v| v.to_string()));
        wtr.write_record(&row)?;
        written += 1;
    }

    wtr.flush()?;
    Ok(written)
}

fn create_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
    csv::Writer::from_path(path).with_context(|| format!("Failed to create CSV file: {:?}", path))
}

/// Write `<year>_households.csv`, `<year>_expenditures.csv` and
/// `<year>_aggregated.csv` into `out_dir`, returning the paths written
pub fn export_year(out_dir: &Path, output: &YearOutput, skip_zero: bool) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", out_dir))?;

    let households = out_dir.join(format!("{}_households.csv", output.year));
    let n = write_households(&mut create_writer(&households)?, &output.households)?;
    info!("Wrote {} households to {:?}", n, households);

    let expenditures = out_dir.join(format!("{}_expenditures.csv", output.year));
    let n = write_expenditures(&mut create_writer(&expenditures)?, &output.expenditures)?;
    info!("Wrote {} expenditures to {:?}", n, expenditures);

    let aggregated = out_dir.join(format!("{}_aggregated.csv", output.year));
    let n = write_aggregated(&mut create_writer(&aggregated)?, &output.aggregated, skip_zero)?;
    info!("Wrote {} aggregated rows to {:?}", n, aggregated);

    Ok(vec![households, expenditures, aggregated])
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregationEngine;
    use crate::hierarchy::{CategoryNode, HierarchyCompiler, SourcePanel};
    use crate::weights::{HouseholdRecord, Panel, Replicates};

    fn households() -> HouseholdTable {
        let record = |id: &str, weight: f64| HouseholdRecord {
            newid: id.to_string(),
            source: Panel::Diary,
            scope: 3,
            raw_weights: Replicates::splat(weight * 4.0),
            weights: Replicates::splat(weight),
            fields: vec![Some(id.to_string()), None],
        };
        HouseholdTable {
            columns: vec!["NEWID".to_string(), "REGION".to_string()],
            records: vec![record("2001011", 2.0), record("2001021", 1.0)],
        }
    }

    fn into_string(wtr: csv::Writer<Vec<u8>>) -> String {
        String::from_utf8(wtr.into_inner().ok().expect("flush")).unwrap()
    }

    #[test]
    fn test_household_layout() {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        assert_eq!(write_households(&mut wtr, &households()).unwrap(), 2);

        let text = into_string(wtr);
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("NEWID,REGION,SOURCE,SCOPE,REPWT1,"));
        assert!(header.ends_with(",REPWT45"));
        assert!(lines.next().unwrap().starts_with("2001011,,D,3,2,"));
    }

    #[test]
    fn test_expenditure_layout() {
        let mut wtr = csv::Writer::from_writer(Vec::new());
        let records = [ExpenditureRecord::new("2001011", Panel::Diary, "190112", 26.0)];
        write_expenditures(&mut wtr, &records).unwrap();
        assert_eq!(into_string(wtr), "NEWID,SOURCE,UCC,COST\n2001011,D,190112,26\n");
    }

    #[test]
    fn test_aggregated_skip_zero() {
        let hierarchy = HierarchyCompiler::new().compile(&[
            CategoryNode::new("FOOD", 1, "Food", SourcePanel::Title),
            CategoryNode::new("190112", 2, "Dinner", SourcePanel::Diary),
        ]);
        let (table, _) = AggregationEngine::new(2018, &hierarchy)
            .aggregate(
                &households(),
                &[ExpenditureRecord::new("2001011", Panel::Diary, "190112", 5.0)],
            )
            .unwrap();

        let mut dense = csv::Writer::from_writer(Vec::new());
        assert_eq!(write_aggregated(&mut dense, &table, false).unwrap(), 4);

        let mut sparse = csv::Writer::from_writer(Vec::new());
        assert_eq!(write_aggregated(&mut sparse, &table, true).unwrap(), 2);

        let text = into_string(sparse);
        assert!(text.lines().next().unwrap().ends_with(",RCOST45"));
        assert!(text.lines().all(|l| !l.starts_with("2001021")));
        assert!(text.contains("2001011,FOOD,10,"));
    }
}
