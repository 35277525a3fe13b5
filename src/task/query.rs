//! Keyword queries over executions and tasks

use crate::error::{ReplicationError, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// Columns a query keyword can match on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Id,
    ExecutionId,
    VendorType,
    VendorId,
    Status,
    Trigger,
}

impl Keyword {
    /// Accepts both `ExecutionID` and `execution_id` spellings
    pub fn parse(key: &str) -> Result<Self> {
        let normalized: String = key
            .chars()
            .filter(|c| *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "id" => Ok(Keyword::Id),
            "executionid" => Ok(Keyword::ExecutionId),
            "vendortype" => Ok(Keyword::VendorType),
            "vendorid" => Ok(Keyword::VendorId),
            "status" => Ok(Keyword::Status),
            "trigger" => Ok(Keyword::Trigger),
            _ => Err(ReplicationError::Validation(format!(
                "unsupported query keyword: {}",
                key
            ))),
        }
    }
}

/// Filter plus pagination. A page size of zero returns everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub keywords: BTreeMap<String, Value>,
    pub page_number: u64,
    pub page_size: u64,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keyword(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keywords.insert(key.into(), value.into());
        self
    }

    /// `page_number` starts at 1
    pub fn with_page(mut self, page_number: u64, page_size: u64) -> Self {
        self.page_number = page_number;
        self.page_size = page_size;
        self
    }

    /// The same filter without pagination, used for counting
    pub fn without_page(&self) -> Self {
        Self {
            keywords: self.keywords.clone(),
            page_number: 0,
            page_size: 0,
        }
    }

    /// Parsed keywords, rejecting unknown ones
    pub fn conditions(&self) -> Result<Vec<(Keyword, &Value)>> {
        self.keywords
            .iter()
            .map(|(key, value)| Ok((Keyword::parse(key)?, value)))
            .collect()
    }

    /// Applies the page window to an already ordered list
    pub fn paginate<T>(&self, items: Vec<T>) -> Vec<T> {
        if self.page_size == 0 {
            return items;
        }
        let page = self.page_number.max(1) - 1;
        let skip = (page * self.page_size) as usize;
        items
            .into_iter()
            .skip(skip)
            .take(self.page_size as usize)
            .collect()
    }
}

/// Compares an integer column with a keyword value given as number or string
pub fn matches_int(actual: i64, expected: &Value) -> bool {
    match expected {
        Value::Number(n) => n.as_i64() == Some(actual),
        Value::String(s) => s.parse::<i64>().ok() == Some(actual),
        _ => false,
    }
}

/// Compares a string column with a keyword value
pub fn matches_str(actual: &str, expected: &Value) -> bool {
    match expected {
        Value::String(s) => s == actual,
        Value::Number(n) => n.to_string() == actual,
        _ => false,
    }
}
