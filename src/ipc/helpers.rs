use chrono::{Local, NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::ledger::LedgerError;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }
}

impl From<LedgerError> for HandlerErr {
    fn from(e: LedgerError) -> Self {
        if let LedgerError::Storage(inner) = &e {
            tracing::error!(error = %inner, "storage failure");
        }
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

impl From<rusqlite::Error> for HandlerErr {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::from(e).into()
    }
}

/// Runs `f` against the open workspace database and wraps the outcome in
/// the response envelope.
pub fn with_db(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn parse_date(key: &str, raw: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| HandlerErr {
        code: "bad_params",
        message: format!("{} must be YYYY-MM-DD", key),
        details: Some(json!({ "value": raw })),
    })
}

pub fn get_required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    parse_date(key, &get_required_str(params, key)?)
}

pub fn get_optional_date(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<NaiveDate>, HandlerErr> {
    get_optional_str(params, key)
        .map(|raw| parse_date(key, &raw))
        .transpose()
}

/// Deserializes the whole params object into a typed request body.
pub fn parse_params<T: DeserializeOwned>(params: &serde_json::Value) -> Result<T, HandlerErr> {
    serde_json::from_value(params.clone()).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

/// Deserializes the array at `params[key]`, rejecting it when it is larger
/// than the configured bulk cap. A row that does not decode becomes
/// `T::default()` in its slot, so the ledger reports it as a blank row at the
/// same index instead of failing the batch.
pub fn parse_rows<T: DeserializeOwned + Default>(
    params: &serde_json::Value,
    key: &str,
    max_rows: usize,
) -> Result<Vec<T>, HandlerErr> {
    let Some(raw) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    if raw.len() > max_rows {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("too many rows in {}", key),
            details: Some(json!({ "rows": raw.len(), "maxRows": max_rows })),
        });
    }
    Ok(raw
        .iter()
        .enumerate()
        .map(|(index, v)| {
            serde_json::from_value(v.clone()).unwrap_or_else(|e| {
                tracing::debug!(key, index, error = %e, "row did not decode");
                T::default()
            })
        })
        .collect())
}

pub fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, HandlerErr> {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })
}

/// Local wall clock; the ledger itself never reads it.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Row {
        #[serde(default)]
        code: String,
    }

    #[test]
    fn undecodable_rows_keep_their_slot() {
        let params = json!({ "rows": [{ "code": "A" }, 7, { "code": false }, {}] });
        let rows: Vec<Row> = parse_rows(&params, "rows", 10).ok().expect("rows");
        assert_eq!(
            rows,
            vec![
                Row { code: "A".into() },
                Row::default(),
                Row::default(),
                Row::default()
            ]
        );
    }

    #[test]
    fn row_cap_rejects_whole_batch() {
        let params = json!({ "rows": [{}, {}, {}] });
        let err = parse_rows::<Row>(&params, "rows", 2).err().expect("over cap");
        assert_eq!(err.code, "bad_params");
        assert_eq!(err.details, Some(json!({ "rows": 3, "maxRows": 2 })));
        assert!(parse_rows::<Row>(&json!({}), "rows", 2).is_err());
    }
}
