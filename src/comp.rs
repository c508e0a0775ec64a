//! Comparable Sale Records
//!
//! One record per NDJSON line emitted by the import worker. The record keeps
//! the JSON object exactly as received so that its hash commits to the
//! worker's values, including integer prices beyond `f64` precision and
//! fields of unexpected types.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{LedgerError, Result};

/// Keys every record must carry; their value types are the worker's concern
pub const REQUIRED_FIELDS: [&str; 2] = ["address", "sale_price_usd"];

/// A comparable-sale row as streamed by the import worker
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CompRecord {
    fields: Map<String, Value>,
}

impl CompRecord {
    pub fn new(address: impl Into<String>, sale_price_usd: impl Into<Value>) -> Self {
        let mut fields = Map::new();
        fields.insert("address".to_string(), Value::String(address.into()));
        fields.insert("sale_price_usd".to_string(), sale_price_usd.into());
        Self { fields }
    }

    /// Accept any JSON object that carries the required keys
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(LedgerError::InvalidInput(
                "Record is not a JSON object".to_string(),
            ));
        };
        if let Some(missing) = REQUIRED_FIELDS.iter().find(|k| !fields.contains_key(**k)) {
            return Err(LedgerError::missing_field(missing));
        }
        Ok(Self { fields })
    }

    /// Parse one NDJSON line
    pub fn from_json_line(line: &[u8]) -> Result<Self> {
        Self::from_value(serde_json::from_slice(line)?)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn address(&self) -> Option<&str> {
        self.str_field("address")
    }

    pub fn source_table(&self) -> Option<&str> {
        self.str_field("source_table")
    }

    pub fn source_file(&self) -> Option<&str> {
        self.str_field("source_file")
    }

    /// Source label used for per-source counts in ledger summaries
    pub fn source_label(&self) -> Option<&str> {
        self.source_table().or(self.source_file())
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

impl TryFrom<Value> for CompRecord {
    type Error = LedgerError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_value(value)
    }
}
