// 📋 Record Tables - raw survey files as named columns of nullable cells
//
// Every survey file arrives untyped (all cells text). Columns are addressed by
// name; a None cell is a null.

use std::collections::HashMap;

pub type Cell = Option<String>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
    index: HashMap<String, usize>,
}

impl RecordTable {
    pub fn new(columns: Vec<String>) -> Self {
        let index = build_index(&columns);
        RecordTable {
            columns,
            rows: Vec::new(),
            index,
        }
    }

    /// Build a table from string literals; empty strings become nulls
    pub fn from_rows(columns: &[&str], rows: &[&[&str]]) -> Self {
        let mut table = RecordTable::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            table.push_row(
                row.iter()
                    .map(|v| if v.is_empty() { None } else { Some(v.to_string()) })
                    .collect(),
            );
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Append a row; short rows are padded with nulls, long rows truncated
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    pub fn rows(&self) -> impl Iterator<Item = RowRef<'_>> {
        self.rows.iter().map(move |cells| RowRef { table: self, cells })
    }

    pub fn row(&self, i: usize) -> Option<RowRef<'_>> {
        self.rows.get(i).map(|cells| RowRef { table: self, cells })
    }

    /// Values of one column, in row order
    pub fn column_values(&self, name: &str) -> Option<Vec<Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| r[idx].clone()).collect())
    }

    /// Replace a column's values, appending the column when it is new
    pub fn set_column(&mut self, name: &str, values: Vec<Cell>) {
        debug_assert_eq!(values.len(), self.rows.len());
        let idx = match self.column_index(name) {
            Some(idx) => idx,
            None => {
                self.columns.push(name.to_string());
                self.index.insert(name.to_string(), self.columns.len() - 1);
                for row in &mut self.rows {
                    row.push(None);
                }
                self.columns.len() - 1
            }
        };
        for (row, value) in self.rows.iter_mut().zip(values) {
            row[idx] = value;
        }
    }

    /// Remove the named columns; names not present are ignored
    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !names.contains(&self.columns[i].as_str()))
            .collect();
        if keep.len() == self.columns.len() {
            return;
        }
        self.columns = keep.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            let kept: Vec<Cell> = keep.iter().map(|&i| row[i].take()).collect();
            *row = kept;
        }
        self.index = build_index(&self.columns);
    }

    /// Keep only rows matching the predicate
    pub fn retain<F>(&mut self, mut predicate: F)
    where
        F: FnMut(RowRef<'_>) -> bool,
    {
        let columns = self.columns.clone();
        let index = self.index.clone();
        let probe = RecordTable {
            columns,
            rows: Vec::new(),
            index,
        };
        self.rows.retain(|cells| predicate(RowRef { table: &probe, cells }));
    }

    /// Row-wise concatenation; columns are unioned, missing cells are null
    pub fn concat(mut self, other: RecordTable) -> RecordTable {
        for column in other.columns() {
            if !self.has_column(column) {
                let nulls = vec![None; self.rows.len()];
                self.set_column(column, nulls);
            }
        }
        for row in other.rows() {
            let cells = self
                .columns
                .iter()
                .map(|c| row.get(c).map(str::to_string))
                .collect();
            self.rows.push(cells);
        }
        self
    }

    /// Upper-case every column name (survey files are inconsistent about case)
    pub fn uppercase_columns(&mut self) {
        for column in &mut self.columns {
            *column = column.to_uppercase();
        }
        self.index = build_index(&self.columns);
    }
}

fn build_index(columns: &[String]) -> HashMap<String, usize> {
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| (c.clone(), i))
        .collect()
}

/// Borrowed view of one row
#[derive(Debug, Clone, Copy)]
pub struct RowRef<'a> {
    table: &'a RecordTable,
    cells: &'a [Cell],
}

impl<'a> RowRef<'a> {
    /// Trimmed, non-empty value of a column
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let idx = self.table.column_index(column)?;
        self.cells[idx]
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    pub fn cells(&self) -> &'a [Cell] {
        self.cells
    }

    /// Numeric value of a column; missing or malformed values read as zero
    pub fn number(&self, column: &str) -> f64 {
        parse_number(self.get(column))
    }
}

/// Survey convention: a missing or non-numeric field contributes nothing
pub fn parse_number(value: Option<&str>) -> f64 {
    value
        .and_then(|v| v.trim().trim_matches('"').parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

// ============================================================================
// TESTS
// ============================================================================
