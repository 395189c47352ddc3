//! Generic entity filters: stored, composable record predicates compiled
//! into SQL or evaluated in memory, plus a quick-search query builder.

pub mod condition;
pub mod config;
pub mod date_range;
pub mod error;
pub mod filter;
pub mod lexer;
pub mod operands;
pub mod operators;
pub mod record;
pub mod schema;
pub mod searcher;
pub mod sql_compiler;
pub mod token;
pub mod users;
pub mod value;

pub use condition::{Condition, ConditionKind, RelationTarget, StoredCondition};
pub use config::EngineConfig;
pub use error::{ConflictError, FilterError, Result, ValidationError};
pub use filter::{EntityFilter, FilterPayload, FilterStore, Permission};
pub use operands::EvalContext;
pub use operators::{OperatorId, OperatorRegistry};
pub use searcher::{Cell, SearchConfigItem, Searcher};
pub use sql_compiler::{CompileResult, Optimization, SqlCompiler};
