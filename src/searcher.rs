//! Quick search over the configured cells of a record type.
//!
//! Every term of the search string must be found in at least one cell:
//! the predicate is an AND across terms of an OR across cells.

use crate::config::EngineConfig;
use crate::error::Result;
use crate::lexer::terms;
use crate::operands::EvalContext;
use crate::operators::{OperatorId, OperatorRegistry};
use crate::schema::{CustomFieldId, CustomFieldType, FieldDescriptor, FieldKind, Schema};
use crate::sql_compiler::{
    column, custom_value_rows, follow_foreign_keys, relation_rows, select_one, Aliases, TableAlias,
    TableName, ID_COLUMN,
};
use crate::users::{Directory, UserId};
use crate::value::FieldValue;
use sea_query::{Asterisk, Expr, PostgresQueryBuilder, Query, QueryStatementWriter, SimpleExpr};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Column of the entity table holding the text summary of a record.
pub const SEARCH_TEXT_COLUMN: &str = "header_filter_search_field";

/// Something displayed for a record, which a search may look into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum Cell {
    RegularField(String),
    CustomField(CustomFieldId),
    Relation(String),
    /// Computed on display; never searchable
    FunctionField(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfigItem {
    pub record_type: String,
    /// A user or a team; `None` for the default item of the type
    #[serde(default)]
    pub user: Option<UserId>,
    pub cells: Vec<Cell>,
    #[serde(default)]
    pub disabled: bool,
}

impl SearchConfigItem {
    pub fn new(record_type: &str, cells: Vec<Cell>) -> Self {
        Self {
            record_type: record_type.to_string(),
            user: None,
            cells,
            disabled: false,
        }
    }

    pub fn for_user(mut self, user: UserId) -> Self {
        self.user = Some(user);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

pub struct Searcher<'a> {
    schema: &'a Schema,
    directory: &'a Directory,
    config: &'a EngineConfig,
    registry: OperatorRegistry,
    items: Vec<SearchConfigItem>,
}

impl<'a> Searcher<'a> {
    pub fn new(schema: &'a Schema, directory: &'a Directory, config: &'a EngineConfig) -> Self {
        Self {
            schema,
            directory,
            config,
            registry: OperatorRegistry::new(config.case_sensitivity),
            items: Vec::new(),
        }
    }

    pub fn add_item(&mut self, item: SearchConfigItem) -> &mut Self {
        self.items.push(item);
        self
    }

    /// Cells searched for `user`: their own item, then one of their teams',
    /// then the default item, then every visible text field. `None` when the
    /// applicable item is disabled.
    pub fn cells(&self, record_type: &str, user: Option<UserId>) -> Result<Option<Vec<Cell>>> {
        let rtype = self.schema.record_type(record_type)?;
        let of_type = |owner: Option<UserId>| {
            self.items
                .iter()
                .find(|item| item.record_type == record_type && item.user == owner)
        };

        let item = user
            .and_then(|u| {
                of_type(Some(u)).or_else(|| {
                    self.directory
                        .teams_of(u)
                        .find_map(|team| of_type(Some(team.id)))
                })
            })
            .or_else(|| of_type(None));

        match item {
            Some(item) if item.disabled => Ok(None),
            Some(item) => Ok(Some(item.cells.clone())),
            None => Ok(Some(
                rtype
                    .fields
                    .iter()
                    .filter(|f| f.is_text() && !f.hidden)
                    .map(|f| Cell::RegularField(f.name.clone()))
                    .collect(),
            )),
        }
    }

    /// Predicate on the `base` alias matching the records of `record_type`
    /// that contain every term of `query`.
    ///
    /// Returns `Ok(None)` when the type cannot be searched, which is not the
    /// same as a search without results.
    pub fn search(
        &self,
        record_type: &str,
        query: &str,
        user: Option<UserId>,
    ) -> Result<Option<SimpleExpr>> {
        let Some(cells) = self.cells(record_type, user)? else {
            debug!(record_type, "search disabled");
            return Ok(None);
        };
        let cells: Vec<Cell> = cells
            .into_iter()
            .filter(|cell| self.is_searchable(record_type, cell))
            .collect();
        if cells.is_empty() {
            debug!(record_type, "no searchable cell");
            return Ok(None);
        }

        let mut aliases = Aliases::default();
        let mut predicates = Vec::new();
        for term in terms(query) {
            let matches: Vec<SimpleExpr> = cells
                .iter()
                .filter_map(|cell| self.cell_predicate(record_type, cell, term, &mut aliases))
                .collect();
            trace!(record_type, term, cells = matches.len(), "search term");

            predicates.push(
                matches
                    .into_iter()
                    .reduce(|acc, expr| acc.or(expr))
                    .unwrap_or_else(|| Expr::val(false).into()),
            );
        }

        Ok(Some(
            predicates
                .into_iter()
                .reduce(|acc, expr| acc.and(expr))
                .unwrap_or_else(|| Expr::val(true).into()),
        ))
    }

    /// The search as a complete PostgreSQL `SELECT`.
    pub fn search_sql(
        &self,
        record_type: &str,
        query: &str,
        user: Option<UserId>,
    ) -> Result<Option<String>> {
        let Some(predicate) = self.search(record_type, query, user)? else {
            return Ok(None);
        };

        let mut select = Query::select();
        select
            .column(Asterisk)
            .from_as(TableName(self.config.record_table(record_type)), TableAlias::Base)
            .and_where(predicate);
        Ok(Some(select.to_string(PostgresQueryBuilder)))
    }

    fn is_searchable(&self, record_type: &str, cell: &Cell) -> bool {
        match cell {
            Cell::RegularField(path) => {
                match self.schema.resolve_path(record_type, path, self.config.max_field_depth) {
                    Ok(resolved) => resolved.field.is_text() && !resolved.field.hidden,
                    Err(err) => {
                        warn!(record_type, path = %path, error = %err, "search cell ignored");
                        false
                    }
                }
            }
            Cell::CustomField(id) => self.schema.custom_field(*id).map_or(false, |cf| {
                !cf.is_deleted
                    && cf.record_type == record_type
                    && matches!(
                        cf.field_type,
                        CustomFieldType::String | CustomFieldType::Enum | CustomFieldType::MultiEnum
                    )
            }),
            Cell::Relation(rtype) => self.schema.relation_type(rtype).is_ok(),
            Cell::FunctionField(_) => false,
        }
    }

    /// `None` when the cell cannot contain the term at all.
    fn cell_predicate(
        &self,
        record_type: &str,
        cell: &Cell,
        term: &str,
        aliases: &mut Aliases,
    ) -> Option<SimpleExpr> {
        let icontains = self.registry.operator(OperatorId::IContains);
        let ctx = EvalContext::now();
        let value = [FieldValue::text(term)];

        match cell {
            Cell::RegularField(path) => {
                let resolved = self
                    .schema
                    .resolve_path(record_type, path, self.config.max_field_depth)
                    .ok()?;
                let hops = &resolved.hops;
                Some(follow_foreign_keys(self.config, TableAlias::Base, hops, aliases, |last| {
                    icontains.build_positive_predicate(
                        &column(last, &resolved.field.column()),
                        resolved.field,
                        &value,
                        &ctx,
                    )
                }))
            }
            Cell::CustomField(id) => {
                let cf = self.schema.custom_field(*id).ok()?;
                let sub_alias = aliases.next();
                let mut sub =
                    custom_value_rows(self.config, cf.field_type, *id, TableAlias::Base, sub_alias);
                let value_column = column(sub_alias, "value");

                if cf.field_type.is_enum() {
                    // enum values are matched on their label first
                    let needle = term.to_lowercase();
                    let ids: Vec<u64> = self
                        .schema
                        .enum_values_of(*id)
                        .filter(|v| v.value.to_lowercase().contains(&needle))
                        .map(|v| v.id)
                        .collect();
                    if ids.is_empty() {
                        return None;
                    }
                    sub.and_where(Expr::col(value_column).is_in(ids));
                } else {
                    let field = cf.as_field();
                    sub.and_where(
                        icontains.build_positive_predicate(&value_column, &field, &value, &ctx),
                    );
                }
                Some(Expr::exists(sub))
            }
            Cell::Relation(rtype) => {
                let rel = aliases.next();
                let object = aliases.next();
                let text_field = FieldDescriptor::new(SEARCH_TEXT_COLUMN, "", FieldKind::String);

                let mut entity = select_one(self.config.store_layout.entity_table.clone(), object);
                entity
                    .and_where(
                        Expr::col(column(object, ID_COLUMN))
                            .equals(column(rel, "object_entity_id")),
                    )
                    .and_where(icontains.build_positive_predicate(
                        &column(object, SEARCH_TEXT_COLUMN),
                        &text_field,
                        &value,
                        &ctx,
                    ));

                let mut sub = relation_rows(self.config, rtype, TableAlias::Base, rel);
                sub.and_where(Expr::exists(entity));
                Some(Expr::exists(sub))
            }
            Cell::FunctionField(_) => None,
        }
    }
}
