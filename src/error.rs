//! Error types of the filter engine.

use thiserror::Error;

/// Result type alias using the engine's error type.
pub type Result<T> = std::result::Result<T, FilterError>;

/// Top level error of every filter operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
}

impl FilterError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        FilterError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, FilterError::Validation(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, FilterError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, FilterError::NotFound { .. })
    }
}

/// User-correctable problems found while building filters and conditions.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("a filter must have at least one condition")]
    EmptyConditions,

    #[error("duplicated condition (kind {kind}) on \"{target}\"")]
    DuplicateCondition { kind: u8, target: String },

    #[error("unknown operator id {0}")]
    UnknownOperator(u8),

    #[error("unknown condition kind {0}")]
    UnknownConditionKind(u8),

    #[error("operator \"{operator}\" cannot be used on field \"{field}\"")]
    OperatorNotAllowed { operator: &'static str, field: String },

    #[error("operator \"{operator}\" cannot be used on the sub-field \"{field}\"")]
    SubpartNotAllowed { operator: &'static str, field: String },

    #[error(
        "field \"{field}\" only supports full-value matching; \
         operator \"{operator}\" matches partially"
    )]
    PartialMatchNotAllowed { operator: &'static str, field: String },

    #[error("invalid value {value} for field \"{field}\": expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: &'static str,
    },

    #[error("operator \"{operator}\" expects {expected} value(s), got {found}")]
    WrongValueCount {
        operator: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("operand \"{operand}\" is not supported by field \"{field}\"")]
    OperandNotSupported { operand: String, field: String },

    #[error("unknown date range \"{0}\"")]
    UnknownDateRange(String),

    #[error("date range on \"{0}\" needs at least a start or an end")]
    MissingDateBound(String),

    #[error("field \"{field}\" is not a date field")]
    NotADateField { field: String },

    #[error("field \"{field}\" is too deep (maximum depth: {max})")]
    FieldTooDeep { field: String, max: usize },

    #[error("\"{field}\" cannot be followed: it is not a foreign key")]
    NotAForeignKey { field: String },

    #[error("\"{target}\" targets \"{found}\" which is not compatible with \"{expected}\"")]
    IncompatibleRecordType {
        target: String,
        expected: String,
        found: String,
    },

    #[error("{kind} \"{id}\" is disabled")]
    Disabled { kind: &'static str, id: String },

    #[error("the filter \"{filter}\" would reference itself through \"{via}\"")]
    Cycle { filter: String, via: String },

    #[error("sub-filter \"{subfilter}\" cannot be used: {reason}")]
    PrivateSubfilter { subfilter: String, reason: String },

    #[error("a private filter must have an owner")]
    MissingOwner,

    #[error("filter \"{0}\" has no usable condition left")]
    NoEffectiveCondition(String),

    #[error("invalid condition payload: {0}")]
    InvalidPayload(String),
}

/// State-based refusals: the operation is valid in itself but the current
/// state of the filter graph forbids it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConflictError {
    #[error("filter \"{filter}\" is used as sub-filter by: {}", dependents.join(", "))]
    ReferencedBy {
        filter: String,
        dependents: Vec<String>,
    },

    #[error("filter \"{0}\" is not custom and cannot be deleted")]
    NotDeletable(String),

    #[error(
        "filter \"{filter}\" cannot change its visibility \
         because \"{dependent}\" uses it: {reason}"
    )]
    VisibilityBreaksDependent {
        filter: String,
        dependent: String,
        reason: String,
    },

    #[error("a filter with id \"{0}\" already exists")]
    AlreadyExists(String),
}

impl From<serde_json::Error> for FilterError {
    fn from(e: serde_json::Error) -> Self {
        FilterError::Validation(ValidationError::InvalidPayload(e.to_string()))
    }
}
