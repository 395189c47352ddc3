//! SQL compiler that turns entity filters into sea-query predicates.
//!
//! Every condition reaching another table (foreign-key sub-fields,
//! relations, properties, custom fields, sub-filters) compiles into its own
//! correlated subquery with a fresh alias. No join is ever shared between
//! two conditions, so "has a relation of type A" AND "has a relation of
//! type B" never requires a single relation row to be both.

use crate::condition::{custom_field_alive, Condition, RelationTarget};
use crate::config::EngineConfig;
use crate::date_range::ResolvedRange;
use crate::error::{Result, ValidationError};
use crate::filter::{EntityFilter, FilterStore};
use crate::operands::EvalContext;
use crate::operators::{Operator, OperatorId};
use crate::schema::{CustomFieldId, CustomFieldType, FieldDescriptor, FieldKind, RecordType};
use crate::value::FieldValue;
use sea_query::{
    Asterisk, ColumnRef, Expr, Iden, IntoColumnRef, PostgresQueryBuilder, Query,
    QueryStatementWriter, SelectStatement, SimpleExpr, Value,
};
use std::fmt::Write;
use tracing::{debug, warn};

pub(crate) const ID_COLUMN: &str = "id";

/// Table aliases: the filtered table, then one per subquery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableAlias {
    Base,
    Sub(usize),
}

impl Iden for TableAlias {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = match self {
            TableAlias::Base => write!(s, "base"),
            TableAlias::Sub(idx) => write!(s, "sub_{}", idx),
        };
    }
}

/// Table identifier wrapper
#[derive(Debug, Clone)]
pub struct TableName(pub String);

impl Iden for TableName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = write!(s, "{}", self.0);
    }
}

/// Column identifier wrapper
#[derive(Debug, Clone)]
pub struct ColumnName(pub String);

impl Iden for ColumnName {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        let _ = write!(s, "{}", self.0);
    }
}

pub(crate) fn column(alias: TableAlias, name: &str) -> ColumnRef {
    (alias, ColumnName(name.to_string())).into_column_ref()
}

/// Fresh aliases for the subqueries of one compilation.
#[derive(Debug, Default)]
pub(crate) struct Aliases {
    last: usize,
}

impl Aliases {
    pub(crate) fn next(&mut self) -> TableAlias {
        self.last += 1;
        TableAlias::Sub(self.last)
    }
}

/// `SELECT 1 FROM <table> AS <alias>`
pub(crate) fn select_one(table: String, alias: TableAlias) -> SelectStatement {
    let mut select = Query::select();
    select.expr(Expr::val(1)).from_as(TableName(table), alias);
    select
}

/// Wrap `leaf`, a predicate on the last record type of `hops`, into nested
/// `EXISTS` subqueries following the foreign keys from `from`.
pub(crate) fn follow_foreign_keys(
    config: &EngineConfig,
    from: TableAlias,
    hops: &[(&FieldDescriptor, &RecordType)],
    aliases: &mut Aliases,
    leaf: impl FnOnce(TableAlias) -> SimpleExpr,
) -> SimpleExpr {
    let chain: Vec<TableAlias> = hops.iter().map(|_| aliases.next()).collect();
    let Some(last) = chain.last() else {
        return leaf(from);
    };

    let mut predicate = leaf(*last);
    for (i, (fk, target)) in hops.iter().enumerate().rev() {
        let parent = if i == 0 { from } else { chain[i - 1] };
        let mut sub = select_one(config.record_table(&target.id), chain[i]);
        sub.and_where(Expr::col(column(chain[i], ID_COLUMN)).equals(column(parent, &fk.column())))
            .and_where(predicate);
        predicate = Expr::exists(sub);
    }
    predicate
}

/// Represents an optimization applied during compilation
#[derive(Debug, Clone, PartialEq)]
pub enum Optimization {
    OrToIn { field: String, value_count: usize },
}

/// Predicate of a filter, with what happened while building it.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub predicate: SimpleExpr,
    pub optimizations: Vec<Optimization>,
    /// `filter:condition` of the conditions ignored because what they
    /// refer to no longer exists
    pub dropped: Vec<String>,
}

/// Result of SQL compilation with optimization information
#[derive(Debug)]
pub struct CompileResult {
    pub sql: String,
    pub optimizations: Vec<Optimization>,
    pub dropped: Vec<String>,
}

/// State of one compilation.
struct Session<'c> {
    ctx: &'c EvalContext,
    aliases: Aliases,
    visiting: Vec<String>,
    optimizations: Vec<Optimization>,
    dropped: Vec<String>,
}

/// SQL Compiler that converts entity filters to SQL queries
pub struct SqlCompiler<'a> {
    config: &'a EngineConfig,
    store: &'a FilterStore<'a>,
}

impl<'a> SqlCompiler<'a> {
    pub fn new(config: &'a EngineConfig, store: &'a FilterStore<'a>) -> Self {
        Self { config, store }
    }

    /// Compile a filter into a predicate on the `base` alias.
    pub fn compile(&self, filter: &EntityFilter, ctx: &EvalContext) -> Result<CompiledFilter> {
        let mut session = Session {
            ctx,
            aliases: Aliases::default(),
            visiting: Vec::new(),
            optimizations: Vec::new(),
            dropped: Vec::new(),
        };
        let predicate = self.filter_predicate(filter, TableAlias::Base, &mut session)?;

        Ok(CompiledFilter {
            predicate,
            optimizations: session.optimizations,
            dropped: session.dropped,
        })
    }

    pub fn compile_by_id(&self, id: &str, ctx: &EvalContext) -> Result<CompiledFilter> {
        self.compile(self.store.get(id)?, ctx)
    }

    /// Compile a filter into a complete PostgreSQL `SELECT` over its table.
    pub fn compile_sql(&self, filter: &EntityFilter, ctx: &EvalContext) -> Result<CompileResult> {
        let compiled = self.compile(filter, ctx)?;

        let mut select = Query::select();
        select
            .column(Asterisk)
            .from_as(TableName(self.config.record_table(&filter.record_type)), TableAlias::Base)
            .and_where(compiled.predicate);

        let sql = select.to_string(PostgresQueryBuilder);
        debug!(filter = %filter.id, %sql, "filter compiled");

        Ok(CompileResult {
            sql,
            optimizations: compiled.optimizations,
            dropped: compiled.dropped,
        })
    }

    fn filter_predicate(
        &self,
        filter: &EntityFilter,
        alias: TableAlias,
        session: &mut Session<'_>,
    ) -> Result<SimpleExpr> {
        if session.visiting.iter().any(|id| id == &filter.id) {
            return Err(ValidationError::Cycle {
                filter: filter.id.clone(),
                via: session.visiting.last().cloned().unwrap_or_default(),
            }
            .into());
        }
        session.visiting.push(filter.id.clone());
        debug!(
            filter = %filter.id,
            conditions = filter.conditions.len(),
            use_or = filter.use_or,
            "compiling filter"
        );

        let mut predicates = Vec::with_capacity(filter.conditions.len());
        for condition in &filter.conditions {
            match self.condition_predicate(filter, condition, alias, session)? {
                Some(predicate) => predicates.push(predicate),
                None => {
                    warn!(
                        filter = %filter.id,
                        kind = %condition.kind(),
                        name = %condition.name(),
                        "condition refers to something that no longer exists; dropped"
                    );
                    session.dropped.push(format!("{}:{}", filter.id, condition.name()));
                }
            }
        }
        session.visiting.pop();

        let combined = if filter.use_or {
            predicates.into_iter().reduce(|acc, expr| acc.or(expr))
        } else {
            self.combine_conditions_with_and(predicates)
        };
        combined.ok_or_else(|| ValidationError::NoEffectiveCondition(filter.id.clone()).into())
    }

    /// Combine multiple conditions with AND
    fn combine_conditions_with_and(&self, conditions: Vec<SimpleExpr>) -> Option<SimpleExpr> {
        conditions.into_iter().reduce(|acc, expr| acc.and(expr))
    }

    /// `Ok(None)` when the condition refers to something gone since the
    /// filter was built.
    fn condition_predicate(
        &self,
        filter: &EntityFilter,
        condition: &Condition,
        alias: TableAlias,
        session: &mut Session<'_>,
    ) -> Result<Option<SimpleExpr>> {
        let schema = self.store.schema();
        let registry = self.store.registry();
        let layout = &self.config.store_layout;
        let ctx = session.ctx;

        let predicate = match condition {
            Condition::Field { field, operator, values } => {
                let Ok(path) = schema.resolve_path(&filter.record_type, field, usize::MAX) else {
                    return Ok(None);
                };
                let op = registry.operator(*operator);
                let values = ctx.resolve(values);

                if !path.is_subfield() {
                    let col = column(alias, &path.field.column());
                    self.leaf_predicate(field, op, path.field, &col, &values, false, session)
                } else if is_noop(op, &values) {
                    Expr::val(true).into()
                } else {
                    // NOT EXISTS for exclude operators: a missing related
                    // record is "different" too
                    let mut aliases = std::mem::take(&mut session.aliases);
                    let leaf = |last| {
                        let col = column(last, &path.field.column());
                        self.leaf_predicate(field, op, path.field, &col, &values, true, session)
                    };
                    let exists =
                        follow_foreign_keys(self.config, alias, &path.hops, &mut aliases, leaf);
                    session.aliases = aliases;
                    if op.exclude {
                        exists.not()
                    } else {
                        exists
                    }
                }
            }
            Condition::DateField { field, range } => {
                let Ok(path) = schema.resolve_path(&filter.record_type, field, usize::MAX) else {
                    return Ok(None);
                };
                let date_only = path.field.kind == FieldKind::Date;
                let (hops, aliases) = (&path.hops, &mut session.aliases);
                if path.is_subfield() && range.resolve(ctx) == ResolvedRange::Empty {
                    // a missing related record has an empty date too
                    follow_foreign_keys(self.config, alias, hops, aliases, |last| {
                        Expr::col(column(last, &path.field.column())).is_not_null()
                    })
                    .not()
                } else {
                    follow_foreign_keys(self.config, alias, hops, aliases, |last| {
                        range.build_predicate(&column(last, &path.field.column()), date_only, ctx)
                    })
                }
            }
            Condition::CustomField {
                custom_field,
                operator,
                values,
                ..
            } => {
                if !custom_field_alive(schema, *custom_field) {
                    return Ok(None);
                }
                let cf = schema.custom_field(*custom_field)?;
                let op = registry.operator(*operator);
                let values = ctx.resolve(values);
                if is_noop(op, &values) {
                    return Ok(Some(Expr::val(true).into()));
                }

                let sub_alias = session.aliases.next();
                let mut sub =
                    custom_value_rows(self.config, cf.field_type, *custom_field, alias, sub_alias);
                let label = cf.id.to_string();
                let col = column(sub_alias, "value");
                let field = cf.as_field();

                let is_empty = matches!(values.first(), Some(FieldValue::Bool(true)));
                if op.id == OperatorId::IsEmpty && is_empty {
                    // no row at all is empty too
                    let not_empty = [FieldValue::Bool(false)];
                    sub.and_where(op.build_positive_predicate(&col, &field, &not_empty, ctx));
                    Expr::exists(sub).not()
                } else {
                    let leaf =
                        self.leaf_predicate(&label, op, &field, &col, &values, true, session);
                    sub.and_where(leaf);
                    has_or_not(!op.exclude, Expr::exists(sub))
                }
            }
            Condition::DateCustomField { custom_field, range } => {
                if !custom_field_alive(schema, *custom_field) {
                    return Ok(None);
                }
                let cf = schema.custom_field(*custom_field)?;
                let sub_alias = session.aliases.next();
                let mut sub =
                    custom_value_rows(self.config, cf.field_type, *custom_field, alias, sub_alias);

                match range.resolve(ctx) {
                    ResolvedRange::Empty => Expr::exists(sub).not(),
                    ResolvedRange::NotEmpty => Expr::exists(sub),
                    ResolvedRange::Between { .. } => {
                        let date_only = cf.field_type == CustomFieldType::Date;
                        let value = column(sub_alias, "value");
                        sub.and_where(range.build_predicate(&value, date_only, ctx));
                        Expr::exists(sub)
                    }
                }
            }
            Condition::Relation {
                relation_type,
                has,
                target,
            } => {
                if schema.relation_type(relation_type).is_err() {
                    return Ok(None);
                }
                let rel = session.aliases.next();
                let mut sub = relation_rows(self.config, relation_type, alias, rel);
                match target {
                    RelationTarget::Any => {}
                    RelationTarget::Entity(id) => {
                        sub.and_where(
                            Expr::col(column(rel, "object_entity_id")).eq(Value::from(*id)),
                        );
                    }
                    RelationTarget::RecordType(ct) => {
                        let entity = session.aliases.next();
                        let mut typed = select_one(layout.entity_table.clone(), entity);
                        typed
                            .and_where(
                                Expr::col(column(entity, ID_COLUMN))
                                    .equals(column(rel, "object_entity_id")),
                            )
                            .and_where(Expr::col(column(entity, "entity_type")).eq(ct.as_str()));
                        sub.and_where(Expr::exists(typed));
                    }
                }
                has_or_not(*has, Expr::exists(sub))
            }
            Condition::RelationSubfilter {
                relation_type,
                has,
                filter: sub_id,
            } => {
                let Ok(sub_filter) = self.store.get(sub_id) else {
                    return Ok(None);
                };
                if schema.relation_type(relation_type).is_err() {
                    return Ok(None);
                }
                let rel = session.aliases.next();
                let mut sub = relation_rows(self.config, relation_type, alias, rel);
                let matching = self.subfilter_ids(sub_filter, session)?;
                sub.and_where(Expr::col(column(rel, "object_entity_id")).in_subquery(matching));
                has_or_not(*has, Expr::exists(sub))
            }
            Condition::Property { property_type, has } => {
                if schema.property_type(property_type).is_err() {
                    return Ok(None);
                }
                let prop = session.aliases.next();
                let mut sub = select_one(layout.property_table.clone(), prop);
                sub.and_where(
                    Expr::col(column(prop, "creme_entity_id")).equals(column(alias, ID_COLUMN)),
                )
                .and_where(Expr::col(column(prop, "type_id")).eq(property_type.as_str()));
                has_or_not(*has, Expr::exists(sub))
            }
            Condition::Subfilter { filter: sub_id } => {
                let Ok(sub_filter) = self.store.get(sub_id) else {
                    return Ok(None);
                };
                let matching = self.subfilter_ids(sub_filter, session)?;
                Expr::col(column(alias, ID_COLUMN)).in_subquery(matching)
            }
        };

        Ok(Some(predicate))
    }

    /// Predicate of a field operator on `col`, turning long OR-ed
    /// equalities into an `IN` list.
    #[allow(clippy::too_many_arguments)]
    fn leaf_predicate(
        &self,
        label: &str,
        op: &Operator,
        field: &FieldDescriptor,
        col: &ColumnRef,
        values: &[FieldValue],
        positive: bool,
        session: &mut Session<'_>,
    ) -> SimpleExpr {
        let threshold = self.config.optimization.max_or_conditions_for_in;
        let splits_days = field.kind == FieldKind::DateTime
            && values.iter().any(|v| matches!(v, FieldValue::Date(_)));

        if op.id == OperatorId::Equals
            && values.len() >= threshold
            && threshold > 1
            && !splits_days
        {
            session.optimizations.push(Optimization::OrToIn {
                field: label.to_string(),
                value_count: values.len(),
            });
            return Expr::col(col.clone()).is_in(values.iter().map(FieldValue::to_sql_value));
        }

        if positive {
            op.build_positive_predicate(col, field, values, session.ctx)
        } else {
            op.build_predicate(col, field, values, session.ctx)
        }
    }

    /// `SELECT <sub>.id FROM <table> AS <sub> WHERE <sub-filter>`
    fn subfilter_ids(
        &self,
        sub_filter: &EntityFilter,
        session: &mut Session<'_>,
    ) -> Result<SelectStatement> {
        let sub_alias = session.aliases.next();
        let predicate = self.filter_predicate(sub_filter, sub_alias, session)?;

        let mut select = Query::select();
        select
            .column(column(sub_alias, ID_COLUMN))
            .from_as(TableName(self.config.record_table(&sub_filter.record_type)), sub_alias)
            .and_where(predicate);
        Ok(select)
    }
}

/// Relations of a type whose subject is the record at `subject`.
pub(crate) fn relation_rows(
    config: &EngineConfig,
    relation_type: &str,
    subject: TableAlias,
    rel: TableAlias,
) -> SelectStatement {
    let mut sub = select_one(config.store_layout.relation_table.clone(), rel);
    sub.and_where(Expr::col(column(rel, "subject_entity_id")).equals(column(subject, ID_COLUMN)))
        .and_where(Expr::col(column(rel, "type_id")).eq(relation_type));
    sub
}

/// Values of a custom field for the record at `owner`.
pub(crate) fn custom_value_rows(
    config: &EngineConfig,
    field_type: CustomFieldType,
    custom_field: CustomFieldId,
    owner: TableAlias,
    sub_alias: TableAlias,
) -> SelectStatement {
    let mut sub = select_one(config.custom_field_table(field_type.value_table()), sub_alias);
    sub.and_where(Expr::col(column(sub_alias, "entity_id")).equals(column(owner, ID_COLUMN)))
        .and_where(Expr::col(column(sub_alias, "custom_field_id")).eq(custom_field));
    sub
}

/// Operators other than "current year" match everything without values.
fn is_noop(op: &Operator, values: &[FieldValue]) -> bool {
    values.is_empty() && op.id != OperatorId::CurrentYear
}

fn has_or_not(has: bool, exists: SimpleExpr) -> SimpleExpr {
    if has {
        exists
    } else {
        exists.not()
    }
}
