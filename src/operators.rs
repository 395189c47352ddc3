//! The operator registry: the closed set of comparison operators usable in
//! field and custom-field conditions.
//!
//! Every operator knows how to
//!
//! * check that it applies to a field and parse the raw values given for it
//!   ([`Operator::validate_values`]),
//! * build the store predicate for a column ([`Operator::build_predicate`]),
//! * evaluate itself on an in-memory value ([`Operator::accept`]),
//! * describe itself ([`Operator::describe`]).
//!
//! Operator ids are persisted inside stored conditions and must never change.

use crate::config::CaseSensitivity;
use crate::error::{Result, ValidationError};
use crate::operands::{ConditionValue, EvalContext, Operand};
use crate::schema::{FieldDescriptor, FieldKind, FieldType, TypeTag};
use crate::value::{parse_date, parse_datetime, FieldValue};
use chrono::{NaiveDate, NaiveTime};
use sea_query::{ColumnRef, Expr, Func, SimpleExpr};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum OperatorId {
    Equals = 1,
    IEquals = 2,
    EqualsNot = 3,
    IEqualsNot = 4,
    Contains = 5,
    IContains = 6,
    ContainsNot = 7,
    IContainsNot = 8,
    Gt = 9,
    Gte = 10,
    Lt = 11,
    Lte = 12,
    StartsWith = 13,
    IStartsWith = 14,
    StartsWithNot = 15,
    IStartsWithNot = 16,
    EndsWith = 17,
    IEndsWith = 18,
    EndsWithNot = 19,
    IEndsWithNot = 20,
    IsEmpty = 21,
    Range = 22,
    CurrentYear = 23,
    CurrentYearPlus = 24,
    CurrentYearMinus = 25,
}

impl OperatorId {
    pub const ALL: [OperatorId; 25] = [
        OperatorId::Equals,
        OperatorId::IEquals,
        OperatorId::EqualsNot,
        OperatorId::IEqualsNot,
        OperatorId::Contains,
        OperatorId::IContains,
        OperatorId::ContainsNot,
        OperatorId::IContainsNot,
        OperatorId::Gt,
        OperatorId::Gte,
        OperatorId::Lt,
        OperatorId::Lte,
        OperatorId::StartsWith,
        OperatorId::IStartsWith,
        OperatorId::StartsWithNot,
        OperatorId::IStartsWithNot,
        OperatorId::EndsWith,
        OperatorId::IEndsWith,
        OperatorId::EndsWithNot,
        OperatorId::IEndsWithNot,
        OperatorId::IsEmpty,
        OperatorId::Range,
        OperatorId::CurrentYear,
        OperatorId::CurrentYearPlus,
        OperatorId::CurrentYearMinus,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for OperatorId {
    type Error = ValidationError;

    fn try_from(id: u8) -> std::result::Result<Self, Self::Error> {
        OperatorId::ALL
            .iter()
            .copied()
            .find(|op| op.as_u8() == id)
            .ok_or(ValidationError::UnknownOperator(id))
    }
}

impl From<OperatorId> for u8 {
    fn from(id: OperatorId) -> u8 {
        id.as_u8()
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Positive form of the comparison; `exclude` operators negate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Matching {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    IsEmpty,
    Range,
    /// Current year plus a signed multiplier of the given offset
    CurrentYear(i32),
}

/// One entry of `allowed_field_types`: a type, optionally only in its
/// nullable (`__null`) variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowedType {
    pub field_type: FieldType,
    pub null_only: bool,
}

const fn any(field_type: FieldType) -> AllowedType {
    AllowedType {
        field_type,
        null_only: false,
    }
}

const fn null(field_type: FieldType) -> AllowedType {
    AllowedType {
        field_type,
        null_only: true,
    }
}

const ALL_TYPES: &[AllowedType] = &[
    any(FieldType::String),
    any(FieldType::Enum),
    any(FieldType::Number),
    any(FieldType::Date),
    any(FieldType::Boolean),
    any(FieldType::Fk),
    any(FieldType::User),
    any(FieldType::Year),
];
const STRING_TYPES: &[AllowedType] = &[any(FieldType::String)];
const ORDERED_TYPES: &[AllowedType] = &[
    any(FieldType::Number),
    any(FieldType::Date),
    any(FieldType::Year),
];
const EMPTY_TYPES: &[AllowedType] = &[
    any(FieldType::String),
    null(FieldType::Fk),
    null(FieldType::User),
    null(FieldType::Enum),
    null(FieldType::Boolean),
    null(FieldType::Number),
    null(FieldType::Date),
    null(FieldType::Year),
];
const RANGE_TYPES: &[AllowedType] = &[any(FieldType::Number), any(FieldType::Date)];
const YEAR_TYPES: &[AllowedType] = &[any(FieldType::Date), any(FieldType::Year)];

#[derive(Debug, Clone)]
pub struct Operator {
    pub id: OperatorId,
    pub name: &'static str,
    /// Store lookup template, `{}` being the field path
    pub key_pattern: &'static str,
    pub allowed_field_types: &'static [AllowedType],
    /// Whether the operator keeps its meaning on a sub-field reached
    /// through a foreign key (`image__name`)
    pub accept_subpart: bool,
    /// Whether the predicate is negated
    pub exclude: bool,
    /// `I*` operators ignore case whatever the store does
    pub case_insensitive: bool,
    verb: &'static str,
    matching: Matching,
    case: CaseSensitivity,
}

impl Operator {
    fn new(id: OperatorId, case: CaseSensitivity) -> Self {
        use OperatorId::*;

        let (name, verb, key_pattern, allowed, matching) = match id {
            Equals => ("EQUALS", "equals", "{}__exact", ALL_TYPES, Matching::Equals),
            IEquals => (
                "IEQUALS",
                "equals (case insensitive)",
                "{}__iexact",
                STRING_TYPES,
                Matching::Equals,
            ),
            EqualsNot => (
                "EQUALS_NOT",
                "is different from",
                "{}__exact",
                ALL_TYPES,
                Matching::Equals,
            ),
            IEqualsNot => (
                "IEQUALS_NOT",
                "is different from (case insensitive)",
                "{}__iexact",
                STRING_TYPES,
                Matching::Equals,
            ),
            Contains => ("CONTAINS", "contains", "{}__contains", STRING_TYPES, Matching::Contains),
            IContains => (
                "ICONTAINS",
                "contains (case insensitive)",
                "{}__icontains",
                STRING_TYPES,
                Matching::Contains,
            ),
            ContainsNot => (
                "CONTAINS_NOT",
                "does not contain",
                "{}__contains",
                STRING_TYPES,
                Matching::Contains,
            ),
            IContainsNot => (
                "ICONTAINS_NOT",
                "does not contain (case insensitive)",
                "{}__icontains",
                STRING_TYPES,
                Matching::Contains,
            ),
            Gt => ("GT", "is greater than", "{}__gt", ORDERED_TYPES, Matching::Gt),
            Gte => ("GTE", "is greater than or equal to", "{}__gte", ORDERED_TYPES, Matching::Gte),
            Lt => ("LT", "is lesser than", "{}__lt", ORDERED_TYPES, Matching::Lt),
            Lte => ("LTE", "is lesser than or equal to", "{}__lte", ORDERED_TYPES, Matching::Lte),
            StartsWith => (
                "STARTSWITH",
                "starts with",
                "{}__startswith",
                STRING_TYPES,
                Matching::StartsWith,
            ),
            IStartsWith => (
                "ISTARTSWITH",
                "starts with (case insensitive)",
                "{}__istartswith",
                STRING_TYPES,
                Matching::StartsWith,
            ),
            StartsWithNot => (
                "STARTSWITH_NOT",
                "does not start with",
                "{}__startswith",
                STRING_TYPES,
                Matching::StartsWith,
            ),
            IStartsWithNot => (
                "ISTARTSWITH_NOT",
                "does not start with (case insensitive)",
                "{}__istartswith",
                STRING_TYPES,
                Matching::StartsWith,
            ),
            EndsWith => ("ENDSWITH", "ends with", "{}__endswith", STRING_TYPES, Matching::EndsWith),
            IEndsWith => (
                "IENDSWITH",
                "ends with (case insensitive)",
                "{}__iendswith",
                STRING_TYPES,
                Matching::EndsWith,
            ),
            EndsWithNot => (
                "ENDSWITH_NOT",
                "does not end with",
                "{}__endswith",
                STRING_TYPES,
                Matching::EndsWith,
            ),
            IEndsWithNot => (
                "IENDSWITH_NOT",
                "does not end with (case insensitive)",
                "{}__iendswith",
                STRING_TYPES,
                Matching::EndsWith,
            ),
            IsEmpty => ("ISEMPTY", "is empty", "{}__isnull", EMPTY_TYPES, Matching::IsEmpty),
            Range => ("RANGE", "is between", "{}__range", RANGE_TYPES, Matching::Range),
            CurrentYear => (
                "CURRENTYEAR",
                "is in the current year",
                "{}__year",
                YEAR_TYPES,
                Matching::CurrentYear(0),
            ),
            CurrentYearPlus => (
                "CURRENTYEAR_PLUS",
                "is in the current year +",
                "{}__year",
                YEAR_TYPES,
                Matching::CurrentYear(1),
            ),
            CurrentYearMinus => (
                "CURRENTYEAR_MINUS",
                "is in the current year -",
                "{}__year",
                YEAR_TYPES,
                Matching::CurrentYear(-1),
            ),
        };

        Operator {
            id,
            name,
            key_pattern,
            allowed_field_types: allowed,
            accept_subpart: id != IsEmpty,
            exclude: matches!(
                id,
                EqualsNot
                    | IEqualsNot
                    | ContainsNot
                    | IContainsNot
                    | StartsWithNot
                    | IStartsWithNot
                    | EndsWithNot
                    | IEndsWithNot
            ),
            case_insensitive: matches!(
                id,
                IEquals
                    | IEqualsNot
                    | IContains
                    | IContainsNot
                    | IStartsWith
                    | IStartsWithNot
                    | IEndsWith
                    | IEndsWithNot
            ),
            verb,
            matching,
            case,
        }
    }

    /// Lookup key of the operator for a field path (`name__icontains`).
    pub fn lookup_key(&self, field: &str) -> String {
        self.key_pattern.replace("{}", field)
    }

    /// Contains/starts-with/ends-with style operators only look at a part
    /// of the value.
    pub fn matches_partially(&self) -> bool {
        matches!(
            self.matching,
            Matching::Contains | Matching::StartsWith | Matching::EndsWith
        )
    }

    pub fn is_allowed_for(&self, tag: TypeTag) -> bool {
        self.allowed_field_types
            .iter()
            .any(|a| a.field_type == tag.field_type && (!a.null_only || tag.nullable))
    }

    /// Check the operator against the field, then parse `raw` values into
    /// typed condition values.
    pub fn validate_values(
        &self,
        field: &FieldDescriptor,
        raw: &[Json],
        is_subfield: bool,
    ) -> Result<Vec<ConditionValue>> {
        if !self.is_allowed_for(field.type_tag()) {
            return Err(ValidationError::OperatorNotAllowed {
                operator: self.name,
                field: field.name.clone(),
            }
            .into());
        }
        if is_subfield && !self.accept_subpart {
            return Err(ValidationError::SubpartNotAllowed {
                operator: self.name,
                field: field.name.clone(),
            }
            .into());
        }
        if field.exact_match && self.matches_partially() {
            return Err(ValidationError::PartialMatchNotAllowed {
                operator: self.name,
                field: field.name.clone(),
            }
            .into());
        }

        let raw = flatten(raw);
        match self.matching {
            Matching::IsEmpty => {
                self.expect_count(&raw, 1)?;
                let flag = parse_bool(raw[0]).ok_or_else(|| invalid(field, raw[0], "a boolean"))?;
                Ok(vec![FieldValue::Bool(flag).into()])
            }
            Matching::CurrentYear(0) => Ok(Vec::new()),
            Matching::CurrentYear(_) => {
                self.expect_count(&raw, 1)?;
                let offset = parse_int(raw[0])
                    .filter(|n| (0..=MAX_YEAR_OFFSET).contains(n))
                    .ok_or_else(|| invalid(field, raw[0], "an integer between 0 and 9999"))?;
                Ok(vec![FieldValue::Int(offset).into()])
            }
            Matching::Range => {
                self.expect_count(&raw, 2)?;
                raw.iter()
                    .map(|v| parse_literal(field, v).map(ConditionValue::Literal))
                    .collect()
            }
            _ => {
                if raw.is_empty() {
                    return Err(ValidationError::WrongValueCount {
                        operator: self.name,
                        expected: 1,
                        found: 0,
                    }
                    .into());
                }
                raw.iter().map(|v| parse_value(field, v)).collect()
            }
        }
    }

    fn expect_count(&self, raw: &[&Json], expected: usize) -> Result<()> {
        if raw.len() != expected {
            return Err(ValidationError::WrongValueCount {
                operator: self.name,
                expected,
                found: raw.len(),
            }
            .into());
        }
        Ok(())
    }

    /// Store predicate for `column`. Several values are OR-ed; no value at
    /// all gives a predicate matching everything.
    pub fn build_predicate(
        &self,
        column: &ColumnRef,
        field: &FieldDescriptor,
        values: &[FieldValue],
        ctx: &EvalContext,
    ) -> SimpleExpr {
        if values.is_empty() && !matches!(self.matching, Matching::CurrentYear(0)) {
            return Expr::val(true).into();
        }

        let positive = self.build_positive_predicate(column, field, values, ctx);
        if !self.exclude {
            return positive;
        }

        // NULL is "different from" anything, as in `accept()`
        let negated = positive.not();
        if field.nullable {
            negated.or(Expr::col(column.clone()).is_null())
        } else {
            negated
        }
    }

    /// The predicate without the negation of `exclude` operators, for
    /// callers that negate a whole subquery instead.
    pub(crate) fn build_positive_predicate(
        &self,
        column: &ColumnRef,
        field: &FieldDescriptor,
        values: &[FieldValue],
        ctx: &EvalContext,
    ) -> SimpleExpr {
        let col = || Expr::col(column.clone());
        let lowered = || Expr::expr(Func::lower(Expr::col(column.clone())));

        match self.matching {
            Matching::Equals => any_of(values.iter().map(|v| {
                if self.case_insensitive {
                    lowered().eq(lower_text(v))
                } else {
                    let (low, high) = bounds(field, v);
                    if low == high {
                        col().eq(low.to_sql_value())
                    } else {
                        col().between(low.to_sql_value(), high.to_sql_value())
                    }
                }
            })),
            Matching::Contains | Matching::StartsWith | Matching::EndsWith => {
                any_of(values.iter().map(|v| {
                    let text = text_of(v);
                    let escaped = escape_like(&if self.case_insensitive {
                        text.to_lowercase()
                    } else {
                        text
                    });
                    let pattern = match self.matching {
                        Matching::Contains => format!("%{}%", escaped),
                        Matching::StartsWith => format!("{}%", escaped),
                        _ => format!("%{}", escaped),
                    };
                    if self.case_insensitive {
                        lowered().like(pattern)
                    } else {
                        col().like(pattern)
                    }
                }))
            }
            Matching::Gt => {
                any_of(values.iter().map(|v| col().gt(bounds(field, v).1.to_sql_value())))
            }
            Matching::Gte => {
                any_of(values.iter().map(|v| col().gte(bounds(field, v).0.to_sql_value())))
            }
            Matching::Lt => {
                any_of(values.iter().map(|v| col().lt(bounds(field, v).0.to_sql_value())))
            }
            Matching::Lte => {
                any_of(values.iter().map(|v| col().lte(bounds(field, v).1.to_sql_value())))
            }
            Matching::IsEmpty => {
                let empty = matches!(values.first(), Some(FieldValue::Bool(true)));
                match (empty, field.is_text()) {
                    (true, true) => col().is_null().or(col().eq("")),
                    (true, false) => col().is_null(),
                    (false, true) => col().is_not_null().and(col().ne("")),
                    (false, false) => col().is_not_null(),
                }
            }
            Matching::Range => match values {
                [start, end] => col()
                    .gte(bounds(field, start).0.to_sql_value())
                    .and(col().lte(bounds(field, end).1.to_sql_value())),
                _ => Expr::val(true).into(),
            },
            Matching::CurrentYear(_) => {
                let year = self.target_year(values, ctx);
                if field.is_date() {
                    let (first, last) = year_bounds(year);
                    col()
                        .gte(bounds(field, &FieldValue::Date(first)).0.to_sql_value())
                        .and(col().lte(bounds(field, &FieldValue::Date(last)).1.to_sql_value()))
                } else {
                    col().eq(i64::from(year))
                }
            }
        }
    }

    /// In-memory evaluation, with the same semantics as the predicate.
    pub fn accept(&self, actual: &FieldValue, values: &[FieldValue], ctx: &EvalContext) -> bool {
        if values.is_empty() && !matches!(self.matching, Matching::CurrentYear(0)) {
            return true;
        }

        let positive = self.accept_positive(actual, values, ctx);
        if self.exclude {
            !positive
        } else {
            positive
        }
    }

    fn accept_positive(
        &self,
        actual: &FieldValue,
        values: &[FieldValue],
        ctx: &EvalContext,
    ) -> bool {
        let ordering = |v: &FieldValue| actual.compare(v);

        match self.matching {
            Matching::Equals => {
                let case_sensitive = !self.case_insensitive && self.case.equal;
                values.iter().any(|v| actual.equals(v, case_sensitive))
            }
            Matching::Contains | Matching::StartsWith | Matching::EndsWith => {
                let Some(text) = actual.as_str() else {
                    return false;
                };
                let case_sensitive = !self.case_insensitive && self.case.like;
                let text = if case_sensitive { text.to_string() } else { text.to_lowercase() };

                values.iter().any(|v| {
                    let needle = if case_sensitive {
                        text_of(v)
                    } else {
                        text_of(v).to_lowercase()
                    };
                    match self.matching {
                        Matching::Contains => text.contains(&needle),
                        Matching::StartsWith => text.starts_with(&needle),
                        _ => text.ends_with(&needle),
                    }
                })
            }
            Matching::Gt => values.iter().any(|v| ordering(v) == Some(Ordering::Greater)),
            Matching::Gte => values
                .iter()
                .any(|v| matches!(ordering(v), Some(Ordering::Greater | Ordering::Equal))),
            Matching::Lt => values.iter().any(|v| ordering(v) == Some(Ordering::Less)),
            Matching::Lte => values
                .iter()
                .any(|v| matches!(ordering(v), Some(Ordering::Less | Ordering::Equal))),
            Matching::IsEmpty => {
                let empty = matches!(values.first(), Some(FieldValue::Bool(true)));
                actual.is_empty() == empty
            }
            Matching::Range => match values {
                [start, end] => {
                    matches!(actual.compare(start), Some(Ordering::Greater | Ordering::Equal))
                        && matches!(actual.compare(end), Some(Ordering::Less | Ordering::Equal))
                }
                _ => true,
            },
            Matching::CurrentYear(_) => actual.year() == Some(self.target_year(values, ctx)),
        }
    }

    /// Year compared by the year operators, computed from the evaluation
    /// context so a stored condition follows the calendar.
    fn target_year(&self, values: &[FieldValue], ctx: &EvalContext) -> i32 {
        let offset = match (self.matching, values.first()) {
            (Matching::CurrentYear(sign), Some(FieldValue::Int(n))) => {
                i32::try_from(*n).unwrap_or(i32::MAX).saturating_mul(sign)
            }
            _ => 0,
        };
        ctx.current_year().saturating_add(offset)
    }

    /// Human readable description of a condition using this operator.
    pub fn describe(&self, field_label: &str, values: &[ConditionValue]) -> String {
        let quoted: Vec<String> = values.iter().map(|v| format!("«{}»", v.describe())).collect();

        match self.matching {
            Matching::IsEmpty => match values.first() {
                Some(ConditionValue::Literal(FieldValue::Bool(false))) => {
                    format!("«{}» is not empty", field_label)
                }
                _ => format!("«{}» is empty", field_label),
            },
            Matching::Range if quoted.len() == 2 => {
                format!("«{}» is between {} and {}", field_label, quoted[0], quoted[1])
            }
            Matching::CurrentYear(0) => format!("«{}» {}", field_label, self.verb),
            Matching::CurrentYear(_) => {
                let offset = values.first().map(|v| v.describe()).unwrap_or_default();
                format!("«{}» {} {}", field_label, self.verb, offset)
            }
            _ => format!("«{}» {} {}", field_label, self.verb, quoted.join(" or ")),
        }
    }
}

/// The fixed catalog of operators, built once with the store's case
/// sensitivity.
#[derive(Debug, Clone)]
pub struct OperatorRegistry {
    operators: Vec<Operator>,
    case: CaseSensitivity,
}

impl OperatorRegistry {
    pub fn new(case: CaseSensitivity) -> Self {
        Self {
            operators: OperatorId::ALL
                .iter()
                .map(|id| Operator::new(*id, case))
                .collect(),
            case,
        }
    }

    pub fn case_sensitivity(&self) -> CaseSensitivity {
        self.case
    }

    /// Operator by persisted id.
    pub fn get(&self, id: u8) -> Option<&Operator> {
        self.operators.iter().find(|op| op.id.as_u8() == id)
    }

    pub fn operator(&self, id: OperatorId) -> &Operator {
        // `ALL` is in id order, ids start at 1
        &self.operators[usize::from(id.as_u8()) - 1]
    }

    /// Operators usable on a field of the given type.
    pub fn for_type(&self, tag: TypeTag) -> impl Iterator<Item = &Operator> {
        self.operators.iter().filter(move |op| op.is_allowed_for(tag))
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::new(CaseSensitivity::default())
    }
}

fn any_of(predicates: impl Iterator<Item = SimpleExpr>) -> SimpleExpr {
    predicates
        .reduce(|acc, p| acc.or(p))
        .unwrap_or_else(|| Expr::val(true).into())
}

/// Lowest and highest store values equal to `v` on `field`: a date compared
/// with a datetime column spans the whole day.
fn bounds(field: &FieldDescriptor, v: &FieldValue) -> (FieldValue, FieldValue) {
    match (&field.kind, v) {
        (FieldKind::DateTime, FieldValue::Date(d)) => (
            FieldValue::DateTime(d.and_time(NaiveTime::MIN)),
            FieldValue::DateTime(end_of_day(*d)),
        ),
        _ => (v.clone(), v.clone()),
    }
}

/// Largest offset of the "current year plus/minus" operators.
pub const MAX_YEAR_OFFSET: i64 = 9999;

pub(crate) fn end_of_day(d: NaiveDate) -> chrono::NaiveDateTime {
    d.and_hms_micro_opt(23, 59, 59, 999_999)
        .unwrap_or_else(|| d.and_time(NaiveTime::MIN))
}

pub(crate) fn year_bounds(year: i32) -> (NaiveDate, NaiveDate) {
    let first = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN);
    let last = NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(NaiveDate::MAX);
    (first, last)
}

fn text_of(v: &FieldValue) -> String {
    match v {
        FieldValue::Text(s) => s.clone(),
        other => other.to_json().to_string(),
    }
}

fn lower_text(v: &FieldValue) -> sea_query::Value {
    sea_query::Value::from(text_of(v).to_lowercase())
}

pub(crate) fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `[[a, b]]` and `[a, b]` are both accepted for ranges.
fn flatten(raw: &[Json]) -> Vec<&Json> {
    let mut flat = Vec::new();
    for v in raw {
        match v {
            Json::Array(items) => flat.extend(items.iter()),
            other => flat.push(other),
        }
    }
    flat
}

fn invalid(
    field: &FieldDescriptor,
    raw: &Json,
    expected: &'static str,
) -> crate::error::FilterError {
    ValidationError::InvalidValue {
        field: field.name.clone(),
        value: raw.to_string(),
        expected,
    }
    .into()
}

fn parse_bool(raw: &Json) -> Option<bool> {
    match raw {
        Json::Bool(b) => Some(*b),
        Json::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        Json::Number(n) => n.as_i64().map(|n| n != 0),
        _ => None,
    }
}

fn parse_int(raw: &Json) -> Option<i64> {
    match raw {
        Json::Number(n) => n.as_i64(),
        Json::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A value or an operand placeholder.
fn parse_value(field: &FieldDescriptor, raw: &Json) -> Result<ConditionValue> {
    if let Json::String(s) = raw {
        if let Some(operand) = Operand::parse(s) {
            if field.supports_operands() {
                return Ok(ConditionValue::Operand(operand));
            }
            if !field.is_text() {
                return Err(ValidationError::OperandNotSupported {
                    operand: s.clone(),
                    field: field.name.clone(),
                }
                .into());
            }
        }
    }
    parse_literal(field, raw).map(ConditionValue::Literal)
}

/// Type-check a raw literal against the field.
pub(crate) fn parse_literal(field: &FieldDescriptor, raw: &Json) -> Result<FieldValue> {
    let parsed = match &field.kind {
        FieldKind::String | FieldKind::Text | FieldKind::Choices => match raw {
            Json::String(s) => Some(FieldValue::Text(s.clone())),
            Json::Number(n) => Some(FieldValue::Text(n.to_string())),
            _ => None,
        },
        FieldKind::Integer | FieldKind::Year => parse_int(raw).map(FieldValue::Int),
        FieldKind::Decimal => match raw {
            Json::Number(n) => n.as_f64(),
            Json::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .map(FieldValue::Decimal),
        FieldKind::Boolean => parse_bool(raw).map(FieldValue::Bool),
        FieldKind::Date => raw.as_str().and_then(parse_date).map(FieldValue::Date),
        FieldKind::DateTime => raw.as_str().and_then(|s| {
            // a bare date keeps day granularity
            parse_date(s)
                .map(FieldValue::Date)
                .or_else(|| parse_datetime(s).map(FieldValue::DateTime))
        }),
        FieldKind::ForeignKey(_) | FieldKind::User | FieldKind::EnumValue => parse_int(raw)
            .and_then(|id| u64::try_from(id).ok())
            .map(FieldValue::Ref),
    };

    parsed.ok_or_else(|| {
        let expected = match &field.kind {
            FieldKind::String | FieldKind::Text | FieldKind::Choices => "a string",
            FieldKind::Integer | FieldKind::Year => "an integer",
            FieldKind::Decimal => "a number",
            FieldKind::Boolean => "a boolean",
            FieldKind::Date => "a date (YYYY-MM-DD)",
            FieldKind::DateTime => "a date (YYYY-MM-DD[THH:MM:SS])",
            FieldKind::ForeignKey(_) | FieldKind::User | FieldKind::EnumValue => "an id",
        };
        invalid(field, raw, expected)
    })
}
