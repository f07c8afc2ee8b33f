// 📂 Survey Loaders - materialize a year's inputs from a local directory
//
// Layout:
//   <data>/<year>/fmli*.csv, fmld*.csv, mtbi*.csv, expd*.csv  (quarterly files)
//   <data>/<year>/hg.txt                                      (fixed-width grouping)
//   <data>/variables.csv, <data>/codes.csv                    (dictionaries)

use crate::dictionary::{CodeEntry, VariableDictionary, VariableEntry};
use crate::hierarchy::{CategoryNode, SourcePanel};
use crate::pipeline::{SurveyArchive, YearInputs};
use crate::table::RecordTable;
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const GROUPING_FILE: &str = "hg.txt";
pub const VARIABLES_FILE: &str = "variables.csv";
pub const CODES_FILE: &str = "codes.csv";

// ============================================================================
// FILE KINDS
// ============================================================================

/// Survey file type, named by the first four characters of the file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    InterviewHouseholds, // fmli
    DiaryHouseholds,     // fmld
    InterviewCosts,      // mtbi
    DiaryCosts,          // expd
}

impl FileKind {
    pub const ALL: [FileKind; 4] = [
        FileKind::InterviewHouseholds,
        FileKind::DiaryHouseholds,
        FileKind::InterviewCosts,
        FileKind::DiaryCosts,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            FileKind::InterviewHouseholds => "fmli",
            FileKind::DiaryHouseholds => "fmld",
            FileKind::InterviewCosts => "mtbi",
            FileKind::DiaryCosts => "expd",
        }
    }

    /// Files of other types (memi, itbi, ntax, ...) are not read
    pub fn detect(file_path: &Path) -> Option<FileKind> {
        let filename = file_path.file_name()?.to_str()?.to_lowercase();
        let is_csv = file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        if !is_csv {
            return None;
        }
        FileKind::ALL
            .into_iter()
            .find(|kind| filename.starts_with(kind.prefix()))
    }
}

// ============================================================================
// CSV TABLES
// ============================================================================

/// Read one CSV file as text cells; headers are upper-cased, empty cells are null
pub fn load_table(csv_path: &Path) -> Result<RecordTable> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file: {:?}", csv_path))?;

    let headers = rdr
        .headers()
        .with_context(|| format!("Failed to read header of {:?}", csv_path))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let mut table = RecordTable::new(headers);

    for result in rdr.records() {
        let record = result.with_context(|| format!("Failed to read record in {:?}", csv_path))?;
        table.push_row(
            record
                .iter()
                .map(|v| if v.trim().is_empty() { None } else { Some(v.to_string()) })
                .collect(),
        );
    }

    table.uppercase_columns();
    debug!("Loaded {} rows from {:?}", table.len(), csv_path);
    Ok(table)
}

/// Concatenate every file of one kind in a year directory, in file-name order
pub fn load_panel_files(year_dir: &Path, kind: FileKind) -> Result<RecordTable> {
    let mut paths: Vec<PathBuf> = fs::read_dir(year_dir)
        .with_context(|| format!("Failed to read directory: {:?}", year_dir))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| FileKind::detect(path) == Some(kind))
        .collect();
    paths.sort();

    if paths.is_empty() {
        return Err(anyhow!(
            "No {} files found in {:?}",
            kind.prefix(),
            year_dir
        ));
    }

    let mut table = RecordTable::default();
    for path in &paths {
        table = table.concat(load_table(path)?);
    }
    info!(
        "{}: {} rows from {} file(s)",
        kind.prefix(),
        table.len(),
        paths.len()
    );
    Ok(table)
}

// ============================================================================
// HIERARCHICAL GROUPING (fixed width)
// ============================================================================

const LINENUM: (usize, usize) = (0, 3);
const LEVEL: (usize, usize) = (3, 6);
const TITLE: (usize, usize) = (6, 69);
const CODE: (usize, usize) = (69, 75);
const SURVEY: (usize, usize) = (82, 85);
const FACTOR: (usize, usize) = (85, 88);
const GROUP: (usize, usize) = (88, 95);

fn slice(line: &str, (start, end): (usize, usize)) -> &str {
    let end = end.min(line.len());
    if start >= end {
        return "";
    }
    line.get(start..end).unwrap_or("").trim()
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Parse grouping text into nodes in file order.
///
/// Lines with linenum 2 continue the previous title. Lines that are blank or
/// carry no level or code are skipped with a warning.
pub fn parse_grouping(text: &str) -> Vec<CategoryNode> {
    let mut nodes: Vec<CategoryNode> = Vec::new();

    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let line_number = i + 1;

        match slice(line, LINENUM).parse::<u32>() {
            Ok(2) => {
                let continuation = slice(line, TITLE);
                match nodes.last_mut() {
                    Some(previous) if !continuation.is_empty() => {
                        previous.label.push(' ');
                        previous.label.push_str(continuation);
                    }
                    Some(_) => {}
                    None => warn!(
                        "grouping line {}: continuation with no preceding row",
                        line_number
                    ),
                }
                continue;
            }
            Ok(1) => {}
            _ => {
                warn!("grouping line {}: unreadable line number, skipped", line_number);
                continue;
            }
        }

        let Ok(level) = slice(line, LEVEL).parse::<u32>() else {
            warn!("grouping line {}: unreadable level, skipped", line_number);
            continue;
        };
        let code = slice(line, CODE);
        if code.is_empty() {
            warn!("grouping line {}: no category code, skipped", line_number);
            continue;
        }

        let survey = slice(line, SURVEY);
        let source_panel = SourcePanel::from_code(survey).unwrap_or_else(|| {
            warn!(
                "grouping line {}: unknown survey `{}` for {}, read as title",
                line_number, survey, code
            );
            SourcePanel::Title
        });

        let mut node = CategoryNode::new(code, level, slice(line, TITLE), source_panel);
        node.factor = non_empty(slice(line, FACTOR));
        node.group = non_empty(slice(line, GROUP));
        nodes.push(node);
    }

    nodes
}

pub fn load_grouping(path: &Path) -> Result<Vec<CategoryNode>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read grouping file: {:?}", path))?;
    Ok(parse_grouping(&text))
}

// ============================================================================
// DICTIONARIES
// ============================================================================

#[derive(Debug, Deserialize)]
struct VariableRow {
    #[serde(rename = "Variable Name")]
    variable_name: String,

    #[serde(rename = "Flag name", default)]
    flag_name: Option<String>,

    #[serde(rename = "File")]
    file: String,

    #[serde(rename = "First year")]
    first_year: String,

    #[serde(rename = "Last year", default)]
    last_year: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CodeRow {
    #[serde(rename = "Variable Name")]
    variable_name: String,

    #[serde(rename = "Code value")]
    code_value: String,

    #[serde(rename = "Code description", default)]
    description: Option<String>,

    #[serde(rename = "First year")]
    first_year: String,

    #[serde(rename = "Last year", default)]
    last_year: Option<String>,
}

/// Spreadsheet exports write years as "2013" or "2013.0"
fn parse_year(value: &str) -> Option<i32> {
    let value = value.trim();
    value
        .parse::<i32>()
        .ok()
        .or_else(|| value.parse::<f64>().ok().filter(|v| v.fract() == 0.0).map(|v| v as i32))
}

fn optional(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

pub fn load_variable_dictionary(csv_path: &Path) -> Result<VariableDictionary> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open variable dictionary: {:?}", csv_path))?;

    let mut entries = Vec::new();
    for (i, result) in rdr.deserialize().enumerate() {
        let row: VariableRow = result.context("Failed to deserialize variable dictionary row")?;
        let Some(first_year) = parse_year(&row.first_year) else {
            warn!("variables row {}: unreadable first year, skipped", i + 1);
            continue;
        };
        entries.push(VariableEntry {
            variable_name: row.variable_name.trim().to_uppercase(),
            flag_name: optional(row.flag_name).map(|f| f.to_uppercase()),
            source: row.file.trim().to_uppercase(),
            first_year,
            last_year: optional(row.last_year).and_then(|y| parse_year(&y)),
        });
    }

    info!("Loaded {} variable dictionary entries", entries.len());
    Ok(VariableDictionary::new(entries))
}

pub fn load_code_dictionary(csv_path: &Path) -> Result<Vec<CodeEntry>> {
    let mut rdr = csv::Reader::from_path(csv_path)
        .with_context(|| format!("Failed to open code dictionary: {:?}", csv_path))?;

    let mut entries = Vec::new();
    for (i, result) in rdr.deserialize().enumerate() {
        let row: CodeRow = result.context("Failed to deserialize code dictionary row")?;
        let Some(first_year) = parse_year(&row.first_year) else {
            warn!("codes row {}: unreadable first year, skipped", i + 1);
            continue;
        };
        entries.push(CodeEntry {
            variable_name: row.variable_name.trim().to_uppercase(),
            code_value: row.code_value.trim().to_string(),
            description: optional(row.description).unwrap_or_default(),
            first_year,
            last_year: optional(row.last_year).and_then(|y| parse_year(&y)),
        });
    }

    info!("Loaded {} code dictionary entries", entries.len());
    Ok(entries)
}

// ============================================================================
// ARCHIVE
// ============================================================================

pub fn load_year(data_dir: &Path, year: i32) -> Result<YearInputs> {
    let year_dir = data_dir.join(year.to_string());
    if !year_dir.is_dir() {
        return Err(anyhow!("Year directory not found: {:?}", year_dir));
    }

    Ok(YearInputs {
        interview_households: load_panel_files(&year_dir, FileKind::InterviewHouseholds)?,
        diary_households: load_panel_files(&year_dir, FileKind::DiaryHouseholds)?,
        interview_costs: load_panel_files(&year_dir, FileKind::InterviewCosts)?,
        diary_costs: load_panel_files(&year_dir, FileKind::DiaryCosts)?,
        hierarchy: load_grouping(&year_dir.join(GROUPING_FILE))?,
    })
}

/// Load the dictionaries and every requested year.
///
/// A year that fails to load is logged and left out; the pipeline later
/// reports it as missing.
pub fn load_archive(data_dir: &Path, years: &[i32]) -> Result<SurveyArchive> {
    let variables = load_variable_dictionary(&data_dir.join(VARIABLES_FILE))?;
    let codes = load_code_dictionary(&data_dir.join(CODES_FILE))?;
    let mut archive = SurveyArchive::new(variables, codes);

    for &year in years {
        match load_year(data_dir, year) {
            Ok(inputs) => archive.insert_year(year, inputs),
            Err(e) => warn!("year {} not loaded: {:#}", year, e),
        }
    }
    Ok(archive)
}

// ============================================================================
// TESTS
// ============================================================================
