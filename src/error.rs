use std::path::PathBuf;

use arrow::datatypes::DataType;
use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    // -- cut construction --
    #[error("cannot parse '{expression}': unexpected {token}")]
    Parse { token: String, expression: String },
    #[error("unsupported operator '{operator}'{context}")]
    UnsupportedOperator { operator: String, context: String },
    #[error("modulus must be a positive integer, got '{0}'")]
    InvalidModulus(String),
    #[error("invalid operand for '{operator}': {reason}")]
    InvalidOperand { operator: String, reason: String },

    // -- evaluation and schema --
    #[error("column '{column}' not found, available: [{available}]")]
    MissingColumn { column: String, available: String },
    #[error("cuts only support scalar (per-jet) columns, '{column}' has type {data_type:?}")]
    NotScalarColumn { column: String, data_type: DataType },
    #[error("cannot compare column '{column}' of type {data_type:?} with {operand}")]
    TypeMismatch {
        column: String,
        data_type: DataType,
        operand: String,
    },
    #[error("group '{group}' has {actual} rows but '{primary}' has {expected}")]
    GroupAlignment {
        group: String,
        primary: String,
        expected: usize,
        actual: usize,
    },
    #[error("group '{0}' not found")]
    MissingGroup(String),
    #[error("group '{group}' in {} does not match the schema of the first source", source_path.display())]
    SchemaMismatch { group: String, source_path: PathBuf },

    // -- writer --
    #[error("shape mismatch in group '{group}': {reason}")]
    ShapeMismatch { group: String, reason: String },
    #[error("writer has already been closed")]
    WriterClosed,
    #[error("closed {} with only {written} of {declared} rows written to '{group}'", path.display())]
    IncompleteWrite {
        path: PathBuf,
        group: String,
        written: usize,
        declared: usize,
    },

    // -- labels --
    #[error("label '{0}' not found")]
    UnknownLabel(String),
    #[error("no labels with category '{0}' found")]
    UnknownCategory(String),
    #[error("duplicate label definition: {0}")]
    DuplicateLabel(String),
    #[error("{unlabelled} of {rows} rows match no label")]
    Unlabelled { unlabelled: usize, rows: usize },
    #[error("a labels column needs every row labelled, enable require_labels")]
    LabelsNotRequired,
    #[error("column '{0}' already exists")]
    DuplicateColumn(String),

    // -- transform and sources --
    #[error("cannot rename '{old}' to '{new}' in group '{group}': both exist")]
    RenameConflict {
        group: String,
        old: String,
        new: String,
    },
    #[error("unknown float function '{0}'")]
    UnknownFunction(String),
    #[error("no sources matched '{0}'")]
    NoSources(String),
    #[error("invalid source weights: {0}")]
    InvalidWeights(String),

    // -- collaborators --
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Arrow(#[from] ArrowError),
    #[error(transparent)]
    Parquet(#[from] ParquetError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),
    #[error(transparent)]
    Glob(#[from] glob::GlobError),
}

impl Error {
    pub(crate) fn parse(token: impl Into<String>, expression: impl Into<String>) -> Self {
        Error::Parse {
            token: token.into(),
            expression: expression.into(),
        }
    }

    pub(crate) fn shape(group: &str, reason: impl Into<String>) -> Self {
        Error::ShapeMismatch {
            group: group.to_string(),
            reason: reason.into(),
        }
    }
}
