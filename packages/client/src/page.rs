//! Response body parsing.

use govdata_indicator_models::RawRecord;
use serde_json::Value;

use crate::ClientError;

/// One page of records as returned by the upstream API.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiPage {
    /// Raw records on this page.
    pub records: Vec<RawRecord>,
    /// Total records available upstream.
    pub total: u64,
    /// Records on this page as reported upstream.
    pub count: u64,
    /// Offset echoed by upstream.
    pub offset: u64,
    /// Limit echoed by upstream.
    pub limit: u64,
}

impl ApiPage {
    /// Builds a page from a decoded response body.
    ///
    /// Missing `records` becomes an empty list. Missing or unparseable
    /// `total`, `count`, `offset` and `limit` become 0; upstream sometimes
    /// sends these as strings, which are accepted.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidResponse`] if the body is not a JSON
    /// object or `records` is present but not an array.
    pub fn from_json(body: Value) -> Result<Self, ClientError> {
        let mut obj = match body {
            Value::Object(obj) => obj,
            other => {
                return Err(ClientError::InvalidResponse(format!(
                    "expected a JSON object, got {}",
                    type_name(&other)
                )));
            }
        };

        let records = match obj.remove("records") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(records)) => records,
            Some(other) => {
                return Err(ClientError::InvalidResponse(format!(
                    "`records` is {}, expected an array",
                    type_name(&other)
                )));
            }
        };

        Ok(Self {
            records,
            total: numeric_field(obj.get("total")),
            count: numeric_field(obj.get("count")),
            offset: numeric_field(obj.get("offset")),
            limit: numeric_field(obj.get("limit")),
        })
    }
}

fn numeric_field(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(truncate))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn truncate(f: f64) -> u64 {
    f as u64
}

const fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_complete_body() {
        let page = ApiPage::from_json(json!({
            "records": [{ "a": 1 }, { "a": 2 }],
            "total": 10,
            "count": 2,
            "offset": "4",
            "limit": "2",
        }))
        .unwrap();

        assert_eq!(page.records.len(), 2);
        assert_eq!(page.total, 10);
        assert_eq!(page.count, 2);
        assert_eq!(page.offset, 4);
        assert_eq!(page.limit, 2);
    }

    #[test]
    fn missing_fields_default_to_empty_and_zero() {
        let page = ApiPage::from_json(json!({ "status": "ok" })).unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.total, 0);
        assert_eq!(page.count, 0);
        assert_eq!(page.offset, 0);
        assert_eq!(page.limit, 0);
    }

    #[test]
    fn garbage_numeric_fields_default_to_zero() {
        let page = ApiPage::from_json(json!({ "total": "lots", "count": -3 })).unwrap();
        assert_eq!(page.total, 0);
        assert_eq!(page.count, 0);
    }

    #[test]
    fn rejects_non_object_body() {
        let err = ApiPage::from_json(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }

    #[test]
    fn rejects_non_array_records() {
        let err = ApiPage::from_json(json!({ "records": "nope" })).unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }
}
