// CEX PUMD - Core Library
// Interprets Consumer Expenditure public-use micro-data one processing year at a time

pub mod error;
pub mod config;
pub mod logging;
pub mod table;
pub mod dictionary;
pub mod hierarchy;       // Grouping file → sum rules
pub mod flags;           // Suppression flags → nulls
pub mod weights;         // Replicate weights × months in scope
pub mod reconcile;       // Interview + Diary → one population
pub mod aggregate;       // Leaf costs → every hierarchy node
pub mod data_quality;
pub mod pipeline;
pub mod loader;
pub mod db;
pub mod export;

// Re-export commonly used types
pub use error::{PipelineError, PipelineResult};
pub use config::{DuplicatePolicy, EmptyRulePolicy, PipelineConfig};
pub use logging::{default_log_level, init_logging};
pub use table::{parse_number, Cell, RecordTable};
pub use dictionary::{CodeDictionary, CodeEntry, VariableDictionary, VariableEntry};
pub use hierarchy::{
    CategoryNode, CompiledHierarchy, HierarchyCompiler, HierarchyWarning, SourcePanel, SumRule,
};
pub use flags::{FlagMapping, FlagResolution, FlagResolver};
pub use weights::{
    interview_scope, HouseholdRecord, HouseholdTable, Panel, Replicates, WeightNormalizer,
    REPLICATE_COUNT,
};
pub use reconcile::{
    diary_expenditures, interview_expenditures, ExpenditureRecord, PanelReconciler,
    ReconciledPanels,
};
pub use aggregate::{
    AggregatedCostRecord, AggregatedCostTable, AggregationEngine, AggregationStats, LeafPivot,
};
pub use data_quality::{DataQualityEngine, QualityIssue, QualityReport, Severity};
pub use pipeline::{run_year, run_years, SurveyArchive, YearContext, YearInputs, YearOutput};
pub use loader::{load_archive, load_grouping, load_year, FileKind};
pub use db::{get_runs, record_year, setup_database, RunSummary};
pub use export::export_year;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
