//! Operand placeholders and the evaluation context that resolves them.

use crate::users::{Directory, UserId};
use crate::value::FieldValue;
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime};
use serde_json::Value as Json;

/// Placeholder values resolved when a filter is evaluated, not when it is
/// written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    CurrentUser,
}

impl Operand {
    pub const CURRENT_USER: &'static str = "__currentuser__";

    pub fn parse(raw: &str) -> Option<Operand> {
        match raw {
            Self::CURRENT_USER => Some(Operand::CurrentUser),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operand::CurrentUser => Self::CURRENT_USER,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Operand::CurrentUser => "Current user",
        }
    }
}

/// A value of a condition: either a literal or an operand.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    Literal(FieldValue),
    Operand(Operand),
}

impl ConditionValue {
    pub fn to_json(&self) -> Json {
        match self {
            ConditionValue::Literal(v) => v.to_json(),
            ConditionValue::Operand(op) => Json::String(op.as_str().to_string()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ConditionValue::Literal(FieldValue::Text(s)) => s.clone(),
            ConditionValue::Literal(v) => v.to_json().to_string(),
            ConditionValue::Operand(op) => op.describe().to_string(),
        }
    }
}

impl From<FieldValue> for ConditionValue {
    fn from(v: FieldValue) -> Self {
        ConditionValue::Literal(v)
    }
}

/// Everything a filter evaluation depends on besides the filter and the
/// records: the clock and the current user.
#[derive(Debug, Clone, PartialEq)]
pub struct EvalContext {
    pub now: NaiveDateTime,
    pub user: Option<UserId>,
    /// Ids `__currentuser__` expands to (the user and their teams)
    pub user_ids: Vec<UserId>,
}

impl EvalContext {
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now,
            user: None,
            user_ids: Vec::new(),
        }
    }

    /// Context at the local wall clock time.
    pub fn now() -> Self {
        Self::new(Local::now().naive_local())
    }

    pub fn with_user(mut self, directory: &Directory, user: UserId) -> Self {
        self.user = Some(user);
        self.user_ids = std::iter::once(user)
            .chain(directory.teams_of(user).map(|t| t.id))
            .collect();
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }

    pub fn current_year(&self) -> i32 {
        self.now.date().year()
    }

    /// Replace operands by the literal values they stand for. An operand
    /// with nothing to resolve to (no current user) contributes no value.
    pub fn resolve(&self, values: &[ConditionValue]) -> Vec<FieldValue> {
        let mut resolved = Vec::with_capacity(values.len());
        for value in values {
            match value {
                ConditionValue::Literal(v) => resolved.push(v.clone()),
                ConditionValue::Operand(Operand::CurrentUser) => resolved.extend(
                    self.user_ids
                        .iter()
                        .map(|id| FieldValue::Ref(u64::from(*id))),
                ),
            }
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::User;
    use crate::value::parse_datetime;

    #[test]
    fn test_current_user_expands_to_teams() {
        let mut directory = Directory::new();
        directory
            .add(User::new(1, "misato"))
            .add(User::team(10, "operations", &[1]));

        let ctx = EvalContext::new(parse_datetime("2024-05-01T10:00:00").unwrap())
            .with_user(&directory, 1);
        let values = ctx.resolve(&[ConditionValue::Operand(Operand::CurrentUser)]);
        assert_eq!(values, vec![FieldValue::Ref(1), FieldValue::Ref(10)]);
        assert_eq!(ctx.current_year(), 2024);
    }

    #[test]
    fn test_operand_without_user_resolves_to_nothing() {
        let ctx = EvalContext::now();
        let values = ctx.resolve(&[
            ConditionValue::Operand(Operand::CurrentUser),
            ConditionValue::Literal(FieldValue::Ref(3)),
        ]);
        assert_eq!(values, vec![FieldValue::Ref(3)]);
    }

    #[test]
    fn test_parse_operand() {
        assert_eq!(Operand::parse("__currentuser__"), Some(Operand::CurrentUser));
        assert_eq!(Operand::parse("currentuser"), None);
    }
}
