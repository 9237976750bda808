//! Fetch queries and equality scope filters.

use crate::error::{Result, SyncError};
use crate::types::{Record, CREATED_AT_FIELD};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Equality filter scoping a fetch or a change channel to one column value.
///
/// Text form is `column=eq.value`, the syntax realtime channels accept.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeFilter {
    pub column: String,
    pub value: Value,
}

impl ChangeFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Check whether a record passes this filter.
    pub fn matches(&self, record: &Record) -> bool {
        record.field_equals(&self.column, &self.value)
    }
}

impl fmt::Display for ChangeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Value::String(s) => write!(f, "{}=eq.{}", self.column, s),
            other => write!(f, "{}=eq.{}", self.column, other),
        }
    }
}

impl FromStr for ChangeFilter {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        let (column, rest) = s
            .split_once('=')
            .ok_or_else(|| SyncError::InvalidFilter(s.to_string()))?;
        let value = rest
            .strip_prefix("eq.")
            .ok_or_else(|| SyncError::InvalidFilter(s.to_string()))?;

        if column.is_empty() {
            return Err(SyncError::InvalidFilter(s.to_string()));
        }

        Ok(Self::eq(column, value))
    }
}

/// One bulk load request against a resource.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchQuery {
    pub resource: String,
    pub order_by: String,
    pub descending: bool,
    pub filter: Option<ChangeFilter>,
}

impl FetchQuery {
    /// All rows of `resource`, newest first.
    pub fn newest_first(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            order_by: CREATED_AT_FIELD.to_string(),
            descending: true,
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: Option<ChangeFilter>) -> Self {
        self.filter = filter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_display_and_parse() {
        let filter = ChangeFilter::eq("user_id", "u-1");
        assert_eq!(filter.to_string(), "user_id=eq.u-1");

        let parsed: ChangeFilter = "user_id=eq.u-1".parse().unwrap();
        assert_eq!(parsed, filter);
    }

    #[test]
    fn test_filter_parse_errors() {
        assert!("user_id".parse::<ChangeFilter>().is_err());
        assert!("user_id=neq.1".parse::<ChangeFilter>().is_err());
        assert!("=eq.1".parse::<ChangeFilter>().is_err());
    }

    #[test]
    fn test_parsed_filter_matches_numeric_column() {
        let filter: ChangeFilter = "user_id=eq.42".parse().unwrap();
        let record = Record::with_id(1).with("user_id", json!(42));
        assert!(filter.matches(&record));

        let other = Record::with_id(2).with("user_id", json!(7));
        assert!(!filter.matches(&other));
    }

    #[test]
    fn test_newest_first() {
        let query = FetchQuery::newest_first("sites");
        assert_eq!(query.order_by, "created_at");
        assert!(query.descending);
        assert!(query.filter.is_none());
    }
}
