//! Conditions: the atomic tests a filter is made of.
//!
//! A [`Condition`] is built (and validated) from its stored form
//! `(kind, name, value)`, and encoded back to it with
//! [`Condition::to_stored`]. Kind ids are persisted and must never change.

use crate::date_range::DateRange;
use crate::error::{FilterError, Result, ValidationError};
use crate::filter::{accept_filter, EntityFilter};
use crate::operands::{ConditionValue, EvalContext};
use crate::operators::{OperatorId, OperatorRegistry};
use crate::record::{Record, RecordId, RecordSource};
use crate::schema::{CustomFieldId, Schema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;
use std::fmt;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConditionKind {
    Subfilter = 1,
    Field = 5,
    DateField = 6,
    Relation = 10,
    RelationSubfilter = 11,
    Property = 15,
    CustomField = 20,
    DateCustomField = 21,
}

impl ConditionKind {
    pub const ALL: [ConditionKind; 8] = [
        ConditionKind::Subfilter,
        ConditionKind::Field,
        ConditionKind::DateField,
        ConditionKind::Relation,
        ConditionKind::RelationSubfilter,
        ConditionKind::Property,
        ConditionKind::CustomField,
        ConditionKind::DateCustomField,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ConditionKind {
    type Error = ValidationError;

    fn try_from(id: u8) -> std::result::Result<Self, Self::Error> {
        ConditionKind::ALL
            .iter()
            .copied()
            .find(|k| k.as_u8() == id)
            .ok_or(ValidationError::UnknownConditionKind(id))
    }
}

impl fmt::Display for ConditionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Persisted layout of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredCondition {
    /// Raw kind id; unknown ids are reported when the condition is built
    pub kind: u8,
    pub name: String,
    #[serde(default)]
    pub value: Json,
}

impl StoredCondition {
    pub fn new(kind: ConditionKind, name: impl Into<String>, value: Json) -> Self {
        Self {
            kind: kind.as_u8(),
            name: name.into(),
            value,
        }
    }
}

/// Object side of a RELATION condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationTarget {
    Any,
    /// One specific record
    Entity(RecordId),
    /// Any record of a type
    RecordType(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Field {
        field: String,
        operator: OperatorId,
        values: Vec<ConditionValue>,
    },
    DateField {
        field: String,
        range: DateRange,
    },
    CustomField {
        custom_field: CustomFieldId,
        /// Side table of the custom field's type
        rname: String,
        operator: OperatorId,
        values: Vec<ConditionValue>,
    },
    DateCustomField {
        custom_field: CustomFieldId,
        range: DateRange,
    },
    Relation {
        relation_type: String,
        has: bool,
        target: RelationTarget,
    },
    RelationSubfilter {
        relation_type: String,
        has: bool,
        filter: String,
    },
    Property {
        property_type: String,
        has: bool,
    },
    Subfilter {
        filter: String,
    },
}

/// What building a condition needs to know.
pub struct BuildContext<'a> {
    pub schema: &'a Schema,
    pub registry: &'a OperatorRegistry,
    /// Existing filters, for sub-filter references
    pub filters: &'a BTreeMap<String, EntityFilter>,
    /// Record type of the filter the condition belongs to
    pub record_type: &'a str,
    pub max_depth: usize,
}

/// What in-memory evaluation needs to know.
pub struct EvalEnv<'a> {
    pub schema: &'a Schema,
    pub registry: &'a OperatorRegistry,
    pub filters: &'a BTreeMap<String, EntityFilter>,
    pub source: &'a dyn RecordSource,
    pub ctx: &'a EvalContext,
}

#[derive(Deserialize)]
struct OperatorPayload {
    operator: u8,
    #[serde(default)]
    values: Vec<Json>,
}

#[derive(Deserialize)]
struct RelationPayload {
    has: bool,
    #[serde(default)]
    entity_id: Option<RecordId>,
    #[serde(default)]
    ct: Option<String>,
}

#[derive(Deserialize)]
struct SubfilterPayload {
    has: bool,
    filter_id: String,
}

fn incompatible(target: &str, expected: &[String], found: &str) -> FilterError {
    ValidationError::IncompatibleRecordType {
        target: target.to_string(),
        expected: expected.join(", "),
        found: found.to_string(),
    }
    .into()
}

impl Condition {
    /// Condition on a regular field, possibly reached through foreign keys.
    pub fn field(
        ctx: &BuildContext<'_>,
        field: &str,
        operator: u8,
        values: &[Json],
    ) -> Result<Condition> {
        let path = ctx.schema.resolve_path(ctx.record_type, field, ctx.max_depth)?;
        let op = ctx
            .registry
            .get(operator)
            .ok_or(ValidationError::UnknownOperator(operator))?;
        let values = op.validate_values(path.field, values, path.is_subfield())?;

        Ok(Condition::Field {
            field: field.to_string(),
            operator: op.id,
            values,
        })
    }

    pub fn date_field(ctx: &BuildContext<'_>, field: &str, range: DateRange) -> Result<Condition> {
        let path = ctx.schema.resolve_path(ctx.record_type, field, ctx.max_depth)?;
        if !path.field.is_date() {
            return Err(ValidationError::NotADateField {
                field: field.to_string(),
            }
            .into());
        }
        Ok(Condition::DateField {
            field: field.to_string(),
            range,
        })
    }

    pub fn custom_field(
        ctx: &BuildContext<'_>,
        custom_field: CustomFieldId,
        operator: u8,
        values: &[Json],
    ) -> Result<Condition> {
        let cf = usable_custom_field(ctx, custom_field)?;
        let op = ctx
            .registry
            .get(operator)
            .ok_or(ValidationError::UnknownOperator(operator))?;
        let values = op.validate_values(&cf.as_field(), values, false)?;

        Ok(Condition::CustomField {
            custom_field,
            rname: cf.field_type.value_table().to_string(),
            operator: op.id,
            values,
        })
    }

    pub fn date_custom_field(
        ctx: &BuildContext<'_>,
        custom_field: CustomFieldId,
        range: DateRange,
    ) -> Result<Condition> {
        let cf = usable_custom_field(ctx, custom_field)?;
        if !cf.field_type.is_date() {
            return Err(ValidationError::NotADateField {
                field: cf.name.clone(),
            }
            .into());
        }
        Ok(Condition::DateCustomField { custom_field, range })
    }

    pub fn relation(
        ctx: &BuildContext<'_>,
        relation_type: &str,
        has: bool,
        target: RelationTarget,
    ) -> Result<Condition> {
        let rtype = ctx.schema.relation_type(relation_type)?;
        if !rtype.enabled {
            return Err(disabled("relation type", relation_type));
        }
        if !rtype.accepts_subject(ctx.schema, ctx.record_type) {
            return Err(incompatible(relation_type, &rtype.subject_types, ctx.record_type));
        }
        if let RelationTarget::RecordType(ct) = &target {
            ctx.schema.record_type(ct)?;
            if !rtype.accepts_object(ctx.schema, ct) {
                return Err(incompatible(relation_type, &rtype.object_types, ct));
            }
        }

        Ok(Condition::Relation {
            relation_type: relation_type.to_string(),
            has,
            target,
        })
    }

    pub fn relation_subfilter(
        ctx: &BuildContext<'_>,
        relation_type: &str,
        has: bool,
        filter: &str,
    ) -> Result<Condition> {
        let rtype = ctx.schema.relation_type(relation_type)?;
        if !rtype.enabled {
            return Err(disabled("relation type", relation_type));
        }
        if !rtype.accepts_subject(ctx.schema, ctx.record_type) {
            return Err(incompatible(relation_type, &rtype.subject_types, ctx.record_type));
        }
        let sub = ctx
            .filters
            .get(filter)
            .ok_or_else(|| FilterError::not_found("filter", filter))?;
        if !rtype.accepts_object(ctx.schema, &sub.record_type) {
            return Err(incompatible(filter, &rtype.object_types, &sub.record_type));
        }

        Ok(Condition::RelationSubfilter {
            relation_type: relation_type.to_string(),
            has,
            filter: filter.to_string(),
        })
    }

    pub fn property(ctx: &BuildContext<'_>, property_type: &str, has: bool) -> Result<Condition> {
        let ptype = ctx.schema.property_type(property_type)?;
        if !ptype.enabled {
            return Err(disabled("property type", property_type));
        }
        let compatible = ptype.subject_types.is_empty()
            || ptype
                .subject_types
                .iter()
                .any(|t| ctx.schema.is_assignable(ctx.record_type, t));
        if !compatible {
            return Err(incompatible(property_type, &ptype.subject_types, ctx.record_type));
        }

        Ok(Condition::Property {
            property_type: property_type.to_string(),
            has,
        })
    }

    pub fn subfilter(ctx: &BuildContext<'_>, filter: &str) -> Result<Condition> {
        let sub = ctx
            .filters
            .get(filter)
            .ok_or_else(|| FilterError::not_found("filter", filter))?;
        if !ctx.schema.is_assignable(ctx.record_type, &sub.record_type) {
            return Err(incompatible(filter, &[sub.record_type.clone()], ctx.record_type));
        }
        Ok(Condition::Subfilter {
            filter: filter.to_string(),
        })
    }

    /// Decode and validate a stored condition.
    pub fn from_stored(ctx: &BuildContext<'_>, stored: &StoredCondition) -> Result<Condition> {
        let kind = ConditionKind::try_from(stored.kind)?;
        let name = stored.name.as_str();

        match kind {
            ConditionKind::Field => {
                let payload: OperatorPayload = serde_json::from_value(stored.value.clone())?;
                Condition::field(ctx, name, payload.operator, &payload.values)
            }
            ConditionKind::DateField => {
                Condition::date_field(ctx, name, DateRange::from_json(name, &stored.value)?)
            }
            ConditionKind::CustomField => {
                let payload: OperatorPayload = serde_json::from_value(stored.value.clone())?;
                let custom_field = parse_custom_field_id(name)?;
                Condition::custom_field(ctx, custom_field, payload.operator, &payload.values)
            }
            ConditionKind::DateCustomField => Condition::date_custom_field(
                ctx,
                parse_custom_field_id(name)?,
                DateRange::from_json(name, &stored.value)?,
            ),
            ConditionKind::Relation => {
                let payload: RelationPayload = serde_json::from_value(stored.value.clone())?;
                let target = match (payload.entity_id, payload.ct) {
                    (Some(id), _) => RelationTarget::Entity(id),
                    (None, Some(ct)) => RelationTarget::RecordType(ct),
                    (None, None) => RelationTarget::Any,
                };
                Condition::relation(ctx, name, payload.has, target)
            }
            ConditionKind::RelationSubfilter => {
                let payload: SubfilterPayload = serde_json::from_value(stored.value.clone())?;
                Condition::relation_subfilter(ctx, name, payload.has, &payload.filter_id)
            }
            ConditionKind::Property => {
                let has: bool = serde_json::from_value(stored.value.clone())?;
                Condition::property(ctx, name, has)
            }
            ConditionKind::Subfilter => Condition::subfilter(ctx, name),
        }
    }

    pub fn to_stored(&self) -> StoredCondition {
        let values_json = |values: &[ConditionValue]| -> Json {
            Json::Array(values.iter().map(ConditionValue::to_json).collect())
        };

        let value = match self {
            Condition::Field { operator, values, .. } => json!({
                "operator": operator.as_u8(),
                "values": values_json(values),
            }),
            Condition::CustomField {
                rname,
                operator,
                values,
                ..
            } => json!({
                "operator": operator.as_u8(),
                "rname": rname,
                "values": values_json(values),
            }),
            Condition::DateField { range, .. } | Condition::DateCustomField { range, .. } => {
                range.to_json()
            }
            Condition::Relation { has, target, .. } => {
                let mut map = Map::new();
                map.insert("has".into(), json!(has));
                match target {
                    RelationTarget::Any => {}
                    RelationTarget::Entity(id) => {
                        map.insert("entity_id".into(), json!(id));
                    }
                    RelationTarget::RecordType(ct) => {
                        map.insert("ct".into(), json!(ct));
                    }
                }
                Json::Object(map)
            }
            Condition::RelationSubfilter { has, filter, .. } => json!({
                "has": has,
                "filter_id": filter,
            }),
            Condition::Property { has, .. } => json!(has),
            Condition::Subfilter { .. } => Json::Null,
        };

        StoredCondition::new(self.kind(), self.name(), value)
    }

    pub fn kind(&self) -> ConditionKind {
        match self {
            Condition::Field { .. } => ConditionKind::Field,
            Condition::DateField { .. } => ConditionKind::DateField,
            Condition::CustomField { .. } => ConditionKind::CustomField,
            Condition::DateCustomField { .. } => ConditionKind::DateCustomField,
            Condition::Relation { .. } => ConditionKind::Relation,
            Condition::RelationSubfilter { .. } => ConditionKind::RelationSubfilter,
            Condition::Property { .. } => ConditionKind::Property,
            Condition::Subfilter { .. } => ConditionKind::Subfilter,
        }
    }

    /// Target of the condition: field path, custom field id, relation or
    /// property type id, or sub-filter id.
    pub fn name(&self) -> String {
        match self {
            Condition::Field { field, .. } | Condition::DateField { field, .. } => field.clone(),
            Condition::CustomField { custom_field, .. }
            | Condition::DateCustomField { custom_field, .. } => custom_field.to_string(),
            Condition::Relation { relation_type, .. }
            | Condition::RelationSubfilter { relation_type, .. } => relation_type.clone(),
            Condition::Property { property_type, .. } => property_type.clone(),
            Condition::Subfilter { filter } => filter.clone(),
        }
    }

    /// Conditions of a filter are unique on this key.
    pub fn key(&self) -> (ConditionKind, String) {
        (self.kind(), self.name())
    }

    /// Id of the filter this condition references, if any.
    pub fn subfilter_id(&self) -> Option<&str> {
        match self {
            Condition::Subfilter { filter } | Condition::RelationSubfilter { filter, .. } => {
                Some(filter)
            }
            _ => None,
        }
    }

    pub fn describe(&self, ctx: &BuildContext<'_>) -> String {
        let filter_name = |id: &str| {
            ctx.filters
                .get(id)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| id.to_string())
        };
        let custom_field_name = |id: &CustomFieldId| {
            ctx.schema
                .custom_field(*id)
                .map(|cf| cf.name.clone())
                .unwrap_or_else(|_| id.to_string())
        };
        let relation_label = |id: &str| {
            ctx.schema
                .relation_type(id)
                .map(|r| r.label.clone())
                .unwrap_or_else(|_| id.to_string())
        };
        let field_label = |path: &str| {
            ctx.schema
                .resolve_path(ctx.record_type, path, usize::MAX)
                .map(|p| p.label())
                .unwrap_or_else(|_| path.to_string())
        };
        let has_verb = |has: &bool| if *has { "Has" } else { "Does not have" };

        match self {
            Condition::Field { field, operator, values } => {
                ctx.registry.operator(*operator).describe(&field_label(field), values)
            }
            Condition::DateField { field, range } => range.describe(&field_label(field)),
            Condition::CustomField {
                custom_field,
                operator,
                values,
                ..
            } => ctx
                .registry
                .operator(*operator)
                .describe(&custom_field_name(custom_field), values),
            Condition::DateCustomField { custom_field, range } => {
                range.describe(&custom_field_name(custom_field))
            }
            Condition::Relation {
                relation_type,
                has,
                target,
            } => {
                let base = format!(
                    "{} the relationship «{}»",
                    has_verb(has),
                    relation_label(relation_type)
                );
                match target {
                    RelationTarget::Any => base,
                    RelationTarget::Entity(id) => format!("{} with «#{}»", base, id),
                    RelationTarget::RecordType(ct) => {
                        let label = ctx
                            .schema
                            .record_type(ct)
                            .map(|t| t.label.clone())
                            .unwrap_or_else(|_| ct.clone());
                        format!("{} with «{}»", base, label)
                    }
                }
            }
            Condition::RelationSubfilter {
                relation_type,
                has,
                filter,
            } => format!(
                "{} the relationship «{}» to «results of the filter {}»",
                has_verb(has),
                relation_label(relation_type),
                filter_name(filter)
            ),
            Condition::Property { property_type, has } => {
                let text = ctx
                    .schema
                    .property_type(property_type)
                    .map(|p| p.text.clone())
                    .unwrap_or_else(|_| property_type.clone());
                format!("{} the property «{}»", has_verb(has), text)
            }
            Condition::Subfilter { filter } => {
                format!("Records are accepted by the filter «{}»", filter_name(filter))
            }
        }
    }

    /// Evaluate the condition on an in-memory record. `Ok(None)` means the
    /// condition refers to something that no longer exists and is ignored.
    pub(crate) fn accept(
        &self,
        record_type: &str,
        record: &Record,
        env: &EvalEnv<'_>,
        visiting: &mut Vec<String>,
    ) -> Result<Option<bool>> {
        let accepted = match self {
            Condition::Field { field, operator, values } => {
                if env.schema.resolve_path(record_type, field, usize::MAX).is_err() {
                    return Ok(None);
                }
                let actual = record.lookup(field, env.source);
                env.registry
                    .operator(*operator)
                    .accept(&actual, &env.ctx.resolve(values), env.ctx)
            }
            Condition::DateField { field, range } => {
                if env.schema.resolve_path(record_type, field, usize::MAX).is_err() {
                    return Ok(None);
                }
                range.accept(&record.lookup(field, env.source), env.ctx)
            }
            Condition::CustomField {
                custom_field,
                operator,
                values,
                ..
            } => {
                if !custom_field_alive(env.schema, *custom_field) {
                    return Ok(None);
                }
                env.registry
                    .operator(*operator)
                    .accept(&record.custom(*custom_field), &env.ctx.resolve(values), env.ctx)
            }
            Condition::DateCustomField { custom_field, range } => {
                if !custom_field_alive(env.schema, *custom_field) {
                    return Ok(None);
                }
                range.accept(&record.custom(*custom_field), env.ctx)
            }
            Condition::Relation {
                relation_type,
                has,
                target,
            } => {
                if env.schema.relation_type(relation_type).is_err() {
                    return Ok(None);
                }
                let found = record.related(relation_type).any(|object| match target {
                    RelationTarget::Any => true,
                    RelationTarget::Entity(id) => object == *id,
                    RelationTarget::RecordType(ct) => env
                        .source
                        .record(object)
                        .map_or(false, |r| &r.record_type == ct),
                });
                found == *has
            }
            Condition::RelationSubfilter {
                relation_type,
                has,
                filter,
            } => {
                let Some(sub) = env.filters.get(filter) else {
                    return Ok(None);
                };
                if env.schema.relation_type(relation_type).is_err() {
                    return Ok(None);
                }
                let mut found = false;
                for object in record.related(relation_type) {
                    // the store only looks into the sub-filter's table
                    let Some(object) = env
                        .source
                        .record(object)
                        .filter(|o| env.schema.is_assignable(&o.record_type, &sub.record_type))
                    else {
                        continue;
                    };
                    if accept_filter(sub, object, env, visiting)? {
                        found = true;
                        break;
                    }
                }
                found == *has
            }
            Condition::Property { property_type, has } => {
                if env.schema.property_type(property_type).is_err() {
                    return Ok(None);
                }
                record.properties.contains(property_type) == *has
            }
            Condition::Subfilter { filter } => {
                let Some(sub) = env.filters.get(filter) else {
                    return Ok(None);
                };
                accept_filter(sub, record, env, visiting)?
            }
        };

        trace!(
            kind = %self.kind(),
            name = %self.name(),
            record = record.id,
            accepted,
            "condition evaluated"
        );
        Ok(Some(accepted))
    }
}

fn usable_custom_field<'a>(
    ctx: &BuildContext<'a>,
    id: CustomFieldId,
) -> Result<&'a crate::schema::CustomField> {
    let cf = ctx.schema.custom_field(id)?;
    if cf.is_deleted {
        return Err(FilterError::not_found("custom field", id));
    }
    if !ctx.schema.is_assignable(ctx.record_type, &cf.record_type) {
        return Err(incompatible(&cf.name, &[cf.record_type.clone()], ctx.record_type));
    }
    Ok(cf)
}

fn disabled(kind: &'static str, id: &str) -> FilterError {
    ValidationError::Disabled {
        kind,
        id: id.to_string(),
    }
    .into()
}

pub(crate) fn custom_field_alive(schema: &Schema, id: CustomFieldId) -> bool {
    schema.custom_field(id).map_or(false, |cf| !cf.is_deleted)
}

fn parse_custom_field_id(name: &str) -> Result<CustomFieldId> {
    name.parse().map_err(|_| {
        ValidationError::InvalidPayload(format!("\"{}\" is not a custom field id", name)).into()
    })
}
