use crate::ipc::helpers::{
    get_optional_date, get_required_date, get_required_str, now, to_json, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::attendance::{self, CheckInPolicy};
use rusqlite::Connection;
use serde_json::json;

fn check_in(
    conn: &Connection,
    params: &serde_json::Value,
    policy: &CheckInPolicy,
) -> Result<serde_json::Value, HandlerErr> {
    let code = get_required_str(params, "studentCode")?;
    let record = attendance::check_in(conn, &code, now(), policy)?;
    Ok(json!({ "record": to_json(&record)? }))
}

fn disable_day(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cycle_id = get_required_str(params, "cycleId")?;
    let date = get_required_date(params, "date")?;
    let count = attendance::disable_day(conn, &cycle_id, date)?;
    Ok(json!({ "date": date, "disabled": count }))
}

fn close_day(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cycle_id = get_required_str(params, "cycleId")?;
    let date = get_optional_date(params, "date")?;
    let report = attendance::close_day(conn, &cycle_id, date, now())?;
    to_json(&report)
}

fn list_day(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cycle_id = get_required_str(params, "cycleId")?;
    let date = get_optional_date(params, "date")?.unwrap_or_else(|| now().date());
    let entries = attendance::list_day(conn, &cycle_id, date)?;
    Ok(json!({ "date": date, "entries": to_json(&entries)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    match req.method.as_str() {
        "attendance.checkIn" => {
            let policy = state.config.check_in_policy();
            Some(with_db(state, req, |conn| check_in(conn, p, &policy)))
        }
        "attendance.disableDay" => Some(with_db(state, req, |conn| disable_day(conn, p))),
        "attendance.closeDay" => Some(with_db(state, req, |conn| close_day(conn, p))),
        "attendance.listDay" => Some(with_db(state, req, |conn| list_day(conn, p))),
        _ => None,
    }
}
