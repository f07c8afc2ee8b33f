// 📖 Survey Dictionaries - which variables and codes are valid in which year
//
// Both dictionaries share one contract: an entry is in scope for a processing
// year when first_year <= year <= last_year, a missing last_year meaning
// "still current".

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Inclusive year range; an open end runs to the current calendar year
pub fn year_in_scope(year: i32, first_year: i32, last_year: Option<i32>) -> bool {
    let last = last_year.unwrap_or_else(|| Utc::now().year());
    first_year <= year && year <= last
}

// ============================================================================
// VARIABLE DICTIONARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableEntry {
    pub variable_name: String,
    pub flag_name: Option<String>,

    /// File label the variable belongs to (FMLI, FMLD, MTBI, ...)
    pub source: String,

    pub first_year: i32,
    pub last_year: Option<i32>,
}

impl VariableEntry {
    pub fn in_scope(&self, year: i32) -> bool {
        year_in_scope(year, self.first_year, self.last_year)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableDictionary {
    entries: Vec<VariableEntry>,
}

impl VariableDictionary {
    pub fn new(entries: Vec<VariableEntry>) -> Self {
        VariableDictionary { entries }
    }

    pub fn entries(&self) -> &[VariableEntry] {
        &self.entries
    }

    /// Entries valid for a processing year
    pub fn for_year(&self, year: i32) -> VariableDictionary {
        VariableDictionary {
            entries: self
                .entries
                .iter()
                .filter(|e| e.in_scope(year))
                .cloned()
                .collect(),
        }
    }

    /// Distinct (variable, flag) pairs for one source label, in dictionary order
    pub fn flag_pairs(&self, source: &str, year: i32) -> Vec<(String, String)> {
        let mut seen = BTreeSet::new();
        self.entries
            .iter()
            .filter(|e| e.source.eq_ignore_ascii_case(source) && e.in_scope(year))
            .filter_map(|e| {
                let flag = e.flag_name.as_ref()?;
                let pair = (e.variable_name.clone(), flag.clone());
                seen.insert(pair.clone()).then_some(pair)
            })
            .collect()
    }
}

// ============================================================================
// CODE DICTIONARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEntry {
    pub variable_name: String,
    pub code_value: String,
    pub description: String,
    pub first_year: i32,
    pub last_year: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct CodeDictionary {
    /// variable → code value → description
    codes: BTreeMap<String, BTreeMap<String, String>>,
}

impl CodeDictionary {
    /// Keep only the entries valid for the processing year
    pub fn for_year(entries: &[CodeEntry], year: i32) -> CodeDictionary {
        let mut codes: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for entry in entries
            .iter()
            .filter(|e| year_in_scope(year, e.first_year, e.last_year))
        {
            codes
                .entry(entry.variable_name.clone())
                .or_default()
                .insert(entry.code_value.trim().to_string(), entry.description.clone());
        }
        CodeDictionary { codes }
    }

    pub fn is_coded(&self, variable: &str) -> bool {
        self.codes.contains_key(variable)
    }

    pub fn coded_variables(&self) -> impl Iterator<Item = &str> {
        self.codes.keys().map(String::as_str)
    }

    /// Label for a coded value
    pub fn describe(&self, variable: &str, value: &str) -> Option<&str> {
        self.codes
            .get(variable)?
            .get(value.trim())
            .map(String::as_str)
    }

    /// True when the variable is not coded, or the value is one of its codes
    pub fn permits(&self, variable: &str, value: &str) -> bool {
        match self.codes.get(variable) {
            Some(values) => values.contains_key(value.trim()),
            None => true,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn var(
        name: &str,
        flag: Option<&str>,
        source: &str,
        first: i32,
        last: Option<i32>,
    ) -> VariableEntry {
        VariableEntry {
            variable_name: name.to_string(),
            flag_name: flag.map(str::to_string),
            source: source.to_string(),
            first_year: first,
            last_year: last,
        }
    }

    #[test]
    fn test_year_scope_bounds() {
        assert!(year_in_scope(2018, 2018, Some(2018)));
        assert!(!year_in_scope(2017, 2018, Some(2020)));
        assert!(!year_in_scope(2021, 2018, Some(2020)));
        // Open-ended entries stay valid through the current year
        assert!(year_in_scope(Utc::now().year(), 1990, None));
    }

    #[test]
    fn test_flag_pairs_scoped_by_source_and_year() {
        let dict = VariableDictionary::new(vec![
            var("FINCBTXI", Some("FINCBTXI_"), "FMLI", 2013, None),
            var("FINCBTXI", Some("FINCBTXI_"), "FMLI", 2013, None),
            var("OLDVARI", Some("OLDVARI_"), "FMLI", 2000, Some(2010)),
            var("AGE_REF", Some("AGE_REF_"), "FMLD", 2000, None),
            var("NEWID", None, "FMLI", 2000, None),
        ]);

        let pairs = dict.flag_pairs("fmli", 2018);
        assert_eq!(pairs, vec![("FINCBTXI".to_string(), "FINCBTXI_".to_string())]);
        assert_eq!(dict.for_year(2005).entries().len(), 3);
    }

    #[test]
    fn test_code_dictionary_describe_and_permits() {
        let entries = vec![
            CodeEntry {
                variable_name: "BLS_URBN".to_string(),
                code_value: "1".to_string(),
                description: "Urban".to_string(),
                first_year: 2000,
                last_year: None,
            },
            CodeEntry {
                variable_name: "BLS_URBN".to_string(),
                code_value: "2".to_string(),
                description: "Rural".to_string(),
                first_year: 2000,
                last_year: None,
            },
            CodeEntry {
                variable_name: "POPSIZE".to_string(),
                code_value: "9".to_string(),
                description: "Retired code".to_string(),
                first_year: 1990,
                last_year: Some(1999),
            },
        ];
        let codes = CodeDictionary::for_year(&entries, 2018);

        assert_eq!(codes.describe("BLS_URBN", "2"), Some("Rural"));
        assert!(codes.permits("BLS_URBN", " 1 "));
        assert!(!codes.permits("BLS_URBN", "3"));
        assert!(!codes.is_coded("POPSIZE"));
        assert!(codes.permits("POPSIZE", "9"));
    }
}
