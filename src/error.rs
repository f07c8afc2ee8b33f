// 🚨 Pipeline Errors - the failures a caller can tell apart
//
// Anomalies never show up here: they are logged and collected in the
// QualityReport. Only conditions that reject a whole processing year do.

/// Fatal, year-scoped failures raised by the interpretation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("year {year}: rule '{parent}' references category '{code}' which resolves to no value at any level")]
    UnresolvedCategory {
        year: i32,
        parent: String,
        code: String,
    },

    #[error("year {year}: {count} household id(s) reported by both panels, first '{first}'")]
    DuplicateHousehold {
        year: i32,
        count: usize,
        first: String,
    },

    #[error("year {year}: no inputs loaded")]
    MissingYear { year: i32 },

    #[error("{table}: required column '{column}' is missing")]
    MissingColumn { table: String, column: String },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
