//! Date ranges used by DATE_FIELD and DATE_CUSTOM_FIELD conditions.
//!
//! A range is either one of the named relative ranges (resolved against the
//! evaluation context's clock, so a stored "current_month" condition follows
//! the calendar) or custom bounds with an optional start and/or end.

use crate::error::{Result, ValidationError};
use crate::operands::EvalContext;
use crate::operators::end_of_day;
use crate::value::{parse_date, FieldValue, DATE_FORMAT};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use sea_query::{ColumnRef, Expr, SimpleExpr};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamedRange {
    PreviousYear,
    CurrentYear,
    NextYear,
    PreviousQuarter,
    CurrentQuarter,
    NextQuarter,
    PreviousMonth,
    CurrentMonth,
    NextMonth,
    Yesterday,
    Today,
    Tomorrow,
    InPast,
    InFuture,
    Empty,
    NotEmpty,
}

impl NamedRange {
    pub const ALL: [NamedRange; 16] = [
        NamedRange::PreviousYear,
        NamedRange::CurrentYear,
        NamedRange::NextYear,
        NamedRange::PreviousQuarter,
        NamedRange::CurrentQuarter,
        NamedRange::NextQuarter,
        NamedRange::PreviousMonth,
        NamedRange::CurrentMonth,
        NamedRange::NextMonth,
        NamedRange::Yesterday,
        NamedRange::Today,
        NamedRange::Tomorrow,
        NamedRange::InPast,
        NamedRange::InFuture,
        NamedRange::Empty,
        NamedRange::NotEmpty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NamedRange::PreviousYear => "previous_year",
            NamedRange::CurrentYear => "current_year",
            NamedRange::NextYear => "next_year",
            NamedRange::PreviousQuarter => "previous_quarter",
            NamedRange::CurrentQuarter => "current_quarter",
            NamedRange::NextQuarter => "next_quarter",
            NamedRange::PreviousMonth => "previous_month",
            NamedRange::CurrentMonth => "current_month",
            NamedRange::NextMonth => "next_month",
            NamedRange::Yesterday => "yesterday",
            NamedRange::Today => "today",
            NamedRange::Tomorrow => "tomorrow",
            NamedRange::InPast => "in_past",
            NamedRange::InFuture => "in_future",
            NamedRange::Empty => "empty",
            NamedRange::NotEmpty => "not_empty",
        }
    }

    pub fn parse(name: &str) -> Result<NamedRange> {
        NamedRange::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == name)
            .ok_or_else(|| ValidationError::UnknownDateRange(name.to_string()).into())
    }

    fn verbose(&self) -> &'static str {
        match self {
            NamedRange::PreviousYear => "is in the previous year",
            NamedRange::CurrentYear => "is in the current year",
            NamedRange::NextYear => "is in the next year",
            NamedRange::PreviousQuarter => "is in the previous quarter",
            NamedRange::CurrentQuarter => "is in the current quarter",
            NamedRange::NextQuarter => "is in the next quarter",
            NamedRange::PreviousMonth => "is in the previous month",
            NamedRange::CurrentMonth => "is in the current month",
            NamedRange::NextMonth => "is in the next month",
            NamedRange::Yesterday => "is yesterday",
            NamedRange::Today => "is today",
            NamedRange::Tomorrow => "is tomorrow",
            NamedRange::InPast => "is in the past",
            NamedRange::InFuture => "is in the future",
            NamedRange::Empty => "is empty",
            NamedRange::NotEmpty => "is not empty",
        }
    }
}

/// Absolute form of a range at a given instant; bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedRange {
    Between {
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    },
    Empty,
    NotEmpty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRange {
    Named(NamedRange),
    Custom {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

impl DateRange {
    /// Build a range from a name and/or bounds, as submitted by a payload.
    /// A name wins over bounds.
    pub fn new(
        field: &str,
        name: Option<&str>,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<DateRange> {
        match name.filter(|n| !n.is_empty()) {
            Some(name) => Ok(DateRange::Named(NamedRange::parse(name)?)),
            None if start.is_none() && end.is_none() => {
                Err(ValidationError::MissingDateBound(field.to_string()).into())
            }
            None => Ok(DateRange::Custom { start, end }),
        }
    }

    /// Stored payload: `{"name": ...}` or `{"start": ..., "end": ...}`.
    pub fn to_json(&self) -> Json {
        match self {
            DateRange::Named(named) => json!({ "name": named.as_str() }),
            DateRange::Custom { start, end } => {
                let mut map = Map::new();
                if let Some(start) = start {
                    map.insert("start".into(), json!(start.format(DATE_FORMAT).to_string()));
                }
                if let Some(end) = end {
                    map.insert("end".into(), json!(end.format(DATE_FORMAT).to_string()));
                }
                Json::Object(map)
            }
        }
    }

    pub fn from_json(field: &str, value: &Json) -> Result<DateRange> {
        let obj = value.as_object().ok_or_else(|| {
            let message = format!("date range of \"{}\" must be an object", field);
            ValidationError::InvalidPayload(message)
        })?;

        let bound = |key: &str| -> Result<Option<NaiveDate>> {
            match obj.get(key) {
                None | Some(Json::Null) => Ok(None),
                Some(Json::String(s)) if s.is_empty() => Ok(None),
                Some(Json::String(s)) => parse_date(s).map(Some).ok_or_else(|| {
                    ValidationError::InvalidValue {
                        field: field.to_string(),
                        value: s.clone(),
                        expected: "a date (YYYY-MM-DD)",
                    }
                    .into()
                }),
                Some(other) => Err(ValidationError::InvalidValue {
                    field: field.to_string(),
                    value: other.to_string(),
                    expected: "a date (YYYY-MM-DD)",
                }
                .into()),
            }
        };

        DateRange::new(
            field,
            obj.get("name").and_then(Json::as_str),
            bound("start")?,
            bound("end")?,
        )
    }

    pub fn resolve(&self, ctx: &EvalContext) -> ResolvedRange {
        let (start, end) = match self {
            DateRange::Custom { start, end } => (*start, *end),
            DateRange::Named(named) => {
                let today = ctx.today();
                match named {
                    NamedRange::Empty => return ResolvedRange::Empty,
                    NamedRange::NotEmpty => return ResolvedRange::NotEmpty,
                    NamedRange::InPast => {
                        return ResolvedRange::Between {
                            start: None,
                            end: Some(ctx.now),
                        }
                    }
                    NamedRange::InFuture => {
                        return ResolvedRange::Between {
                            start: Some(ctx.now),
                            end: None,
                        }
                    }
                    NamedRange::Yesterday => day(today - Duration::days(1)),
                    NamedRange::Today => day(today),
                    NamedRange::Tomorrow => day(today + Duration::days(1)),
                    NamedRange::PreviousYear => year(today.year() - 1),
                    NamedRange::CurrentYear => year(today.year()),
                    NamedRange::NextYear => year(today.year() + 1),
                    NamedRange::PreviousMonth => months(today, -1, 1),
                    NamedRange::CurrentMonth => months(today, 0, 1),
                    NamedRange::NextMonth => months(today, 1, 1),
                    NamedRange::PreviousQuarter => quarter(today, -1),
                    NamedRange::CurrentQuarter => quarter(today, 0),
                    NamedRange::NextQuarter => quarter(today, 1),
                }
            }
        };

        ResolvedRange::Between {
            start: start.map(|d| d.and_time(NaiveTime::MIN)),
            end: end.map(end_of_day),
        }
    }

    /// Predicate on `column`; `date_only` columns compare on the date part
    /// of the bounds.
    pub fn build_predicate(
        &self,
        column: &ColumnRef,
        date_only: bool,
        ctx: &EvalContext,
    ) -> SimpleExpr {
        let col = || Expr::col(column.clone());
        let bound = |dt: NaiveDateTime| {
            if date_only {
                FieldValue::Date(dt.date()).to_sql_value()
            } else {
                FieldValue::DateTime(dt).to_sql_value()
            }
        };

        match self.resolve(ctx) {
            ResolvedRange::Empty => col().is_null(),
            ResolvedRange::NotEmpty => col().is_not_null(),
            ResolvedRange::Between { start, end } => match (start, end) {
                (Some(s), Some(e)) => col().gte(bound(s)).and(col().lte(bound(e))),
                (Some(s), None) => col().gte(bound(s)),
                (None, Some(e)) => col().lte(bound(e)),
                (None, None) => Expr::val(true).into(),
            },
        }
    }

    pub fn accept(&self, actual: &FieldValue, ctx: &EvalContext) -> bool {
        let after = |bound: NaiveDateTime| match actual {
            FieldValue::Date(d) => *d >= bound.date(),
            other => matches!(
                other.compare(&FieldValue::DateTime(bound)),
                Some(Ordering::Greater | Ordering::Equal)
            ),
        };
        let before = |bound: NaiveDateTime| match actual {
            FieldValue::Date(d) => *d <= bound.date(),
            other => matches!(
                other.compare(&FieldValue::DateTime(bound)),
                Some(Ordering::Less | Ordering::Equal)
            ),
        };

        match self.resolve(ctx) {
            ResolvedRange::Empty => actual.is_empty(),
            ResolvedRange::NotEmpty => !actual.is_empty(),
            ResolvedRange::Between { .. } if actual.is_empty() => false,
            ResolvedRange::Between { start, end } => {
                start.map_or(true, after) && end.map_or(true, before)
            }
        }
    }

    pub fn describe(&self, field_label: &str) -> String {
        match self {
            DateRange::Named(named) => format!("«{}» {}", field_label, named.verbose()),
            DateRange::Custom { start, end } => {
                let fmt = |d: &NaiveDate| d.format(DATE_FORMAT).to_string();
                match (start, end) {
                    (Some(s), Some(e)) => {
                        format!("«{}» is between «{}» and «{}»", field_label, fmt(s), fmt(e))
                    }
                    (Some(s), None) => format!("«{}» starts «{}»", field_label, fmt(s)),
                    (None, Some(e)) => format!("«{}» ends «{}»", field_label, fmt(e)),
                    (None, None) => format!("«{}»", field_label),
                }
            }
        }
    }
}

fn day(d: NaiveDate) -> (Option<NaiveDate>, Option<NaiveDate>) {
    (Some(d), Some(d))
}

fn year(y: i32) -> (Option<NaiveDate>, Option<NaiveDate>) {
    (NaiveDate::from_ymd_opt(y, 1, 1), NaiveDate::from_ymd_opt(y, 12, 31))
}

/// First day of the month `offset` months away from `today`, to the last
/// day of the `span`-th month from there.
fn months(today: NaiveDate, offset: i32, span: i32) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let first = first_of_month(today, offset);
    let last = first_of_month(today, offset + span).and_then(|d| d.pred_opt());
    (first, last)
}

fn quarter(today: NaiveDate, offset: i32) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let in_quarter = (today.month0() % 3) as i32;
    months(today, offset * 3 - in_quarter, 3)
}

fn first_of_month(today: NaiveDate, offset: i32) -> Option<NaiveDate> {
    let index = today.year() * 12 + today.month0() as i32 + offset;
    let month0 = u32::try_from(index.rem_euclid(12)).ok()?;
    NaiveDate::from_ymd_opt(index.div_euclid(12), month0 + 1, 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::parse_datetime;
    use sea_query::{
        Alias, Asterisk, IntoColumnRef, PostgresQueryBuilder, Query, QueryStatementWriter,
    };

    fn ctx() -> EvalContext {
        EvalContext::new(parse_datetime("2024-02-15T09:30:00").unwrap())
    }

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    fn bounds(range: DateRange) -> (NaiveDate, NaiveDate) {
        match range.resolve(&ctx()) {
            ResolvedRange::Between {
                start: Some(s),
                end: Some(e),
            } => (s.date(), e.date()),
            other => panic!("unexpected range {:?}", other),
        }
    }

    #[test]
    fn test_named_ranges_resolve_against_context() {
        assert_eq!(
            bounds(DateRange::Named(NamedRange::CurrentYear)),
            (date("2024-01-01"), date("2024-12-31"))
        );
        assert_eq!(
            bounds(DateRange::Named(NamedRange::PreviousMonth)),
            (date("2024-01-01"), date("2024-01-31"))
        );
        assert_eq!(
            bounds(DateRange::Named(NamedRange::CurrentMonth)),
            (date("2024-02-01"), date("2024-02-29"))
        );
        assert_eq!(
            bounds(DateRange::Named(NamedRange::PreviousQuarter)),
            (date("2023-10-01"), date("2023-12-31"))
        );
        assert_eq!(
            bounds(DateRange::Named(NamedRange::NextQuarter)),
            (date("2024-04-01"), date("2024-06-30"))
        );
        assert_eq!(
            bounds(DateRange::Named(NamedRange::Yesterday)),
            (date("2024-02-14"), date("2024-02-14"))
        );
    }

    #[test]
    fn test_custom_range_needs_a_bound() {
        let err = DateRange::new("birthday", None, None, None).unwrap_err();
        assert_eq!(
            err,
            crate::error::FilterError::from(ValidationError::MissingDateBound("birthday".into()))
        );
        assert!(DateRange::new("birthday", None, Some(date("2000-01-01")), None).is_ok());
        assert!(DateRange::new("birthday", Some("someday"), None, None)
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_json_round_trip() {
        let custom = DateRange::Custom {
            start: None,
            end: Some(date("2010-06-21")),
        };
        assert_eq!(custom.to_json(), json!({"end": "2010-06-21"}));
        assert_eq!(DateRange::from_json("birthday", &custom.to_json()).unwrap(), custom);

        let named = DateRange::Named(NamedRange::NextMonth);
        assert_eq!(DateRange::from_json("birthday", &named.to_json()).unwrap(), named);
        assert!(DateRange::from_json("birthday", &json!({})).is_err());
    }

    #[test]
    fn test_accept_bounds_are_inclusive() {
        let range = DateRange::Custom {
            start: Some(date("2024-01-01")),
            end: Some(date("2024-01-31")),
        };
        assert!(range.accept(&FieldValue::Date(date("2024-01-01")), &ctx()));
        assert!(range.accept(&FieldValue::Date(date("2024-01-31")), &ctx()));
        assert!(!range.accept(&FieldValue::Date(date("2024-02-01")), &ctx()));
        let late = parse_datetime("2024-01-31T23:00:00").unwrap();
        assert!(range.accept(&FieldValue::DateTime(late), &ctx()));
        assert!(!range.accept(&FieldValue::Null, &ctx()));
    }

    #[test]
    fn test_empty_ranges() {
        let empty = DateRange::Named(NamedRange::Empty);
        assert!(empty.accept(&FieldValue::Null, &ctx()));
        assert!(!empty.accept(&FieldValue::Date(date("2024-01-01")), &ctx()));
        let not_empty = DateRange::Named(NamedRange::NotEmpty);
        assert!(not_empty.accept(&FieldValue::Date(date("2024-01-01")), &ctx()));
    }

    #[test]
    fn test_in_past_and_future() {
        let past = DateRange::Named(NamedRange::InPast);
        let future = DateRange::Named(NamedRange::InFuture);
        let earlier = FieldValue::DateTime(parse_datetime("2024-02-15T08:00:00").unwrap());
        assert!(past.accept(&earlier, &ctx()));
        assert!(!future.accept(&earlier, &ctx()));
    }

    #[test]
    fn test_predicate_on_date_column() {
        let column = (Alias::new("base"), Alias::new("birthday")).into_column_ref();
        let predicate =
            DateRange::Named(NamedRange::CurrentYear).build_predicate(&column, true, &ctx());
        let sql = Query::select()
            .column(Asterisk)
            .from_as(Alias::new("t"), Alias::new("base"))
            .and_where(predicate)
            .to_string(PostgresQueryBuilder);
        assert!(sql.contains(r#""base"."birthday" >= '2024-01-01'"#), "{}", sql);
        assert!(sql.contains(r#""base"."birthday" <= '2024-12-31'"#), "{}", sql);
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            DateRange::Named(NamedRange::Today).describe("Birthday"),
            "«Birthday» is today"
        );
        let range = DateRange::Custom {
            start: Some(date("2024-01-01")),
            end: None,
        };
        assert_eq!(range.describe("Birthday"), "«Birthday» starts «2024-01-01»");
    }
}
