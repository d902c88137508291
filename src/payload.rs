use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::query::fields_param;

/// Result set queried on the portal: one row per sequencing run.
pub const RESULT_TYPE: &str = "read_run";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Tsv,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Tsv => "tsv",
            OutputFormat::Json => "json",
        }
    }

    /// File extension used for default output names.
    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tsv" => Ok(OutputFormat::Tsv),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unsupported format '{other}' (expected tsv or json)")),
        }
    }
}

/// Form body for the portal search endpoint.
///
/// Serializes to exactly the keys `result`, `query`, `fields`, `format` and `limit`.
/// A limit of 0 is sent as `"0"`, which the portal treats as unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RequestPayload {
    result: &'static str,
    query: String,
    fields: String,
    format: OutputFormat,
    #[serde(serialize_with = "limit_as_string")]
    limit: u64,
}

fn limit_as_string<S: Serializer>(limit: &u64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&limit.to_string())
}

impl RequestPayload {
    pub fn new(query: impl Into<String>, format: OutputFormat, limit: u64) -> Self {
        Self {
            result: RESULT_TYPE,
            query: query.into(),
            fields: fields_param(),
            format,
            limit,
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Key/value pairs in form order; mostly useful for logging and tests.
    pub fn to_form(&self) -> Vec<(&'static str, String)> {
        vec![
            ("result", self.result.to_string()),
            ("query", self.query.clone()),
            ("fields", self.fields.clone()),
            ("format", self.format.to_string()),
            ("limit", self.limit.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_payload_keys_exact() {
        let payload = RequestPayload::new(
            "tax_eq(9606) AND library_strategy=\"WGS\"",
            OutputFormat::Json,
            25,
        );
        let value = serde_json::to_value(&payload).unwrap();
        let obj = value.as_object().unwrap();

        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["fields", "format", "limit", "query", "result"]);

        assert_eq!(obj["result"], "read_run");
        assert_eq!(obj["format"], "json");
        assert_eq!(obj["limit"], Value::String("25".to_string()));
    }

    #[test]
    fn test_zero_limit_is_sent() {
        let payload = RequestPayload::new("q", OutputFormat::Tsv, 0);
        let form = payload.to_form();
        assert!(form.contains(&("limit", "0".to_string())));

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["limit"], "0");
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("TSV".parse::<OutputFormat>().unwrap(), OutputFormat::Tsv);
        assert_eq!(" json ".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}
