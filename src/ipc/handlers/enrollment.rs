use crate::ipc::helpers::{
    get_optional_str, get_required_str, now, parse_rows, to_json, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::enrollment::{self, EnrollRequest};
use rusqlite::Connection;
use serde_json::json;

fn enroll_one(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let code = get_required_str(params, "studentCode")?;
    let cycle_id = get_required_str(params, "cycleId")?;
    let enrollment = enrollment::enroll_one(conn, &code, &cycle_id, now())?;
    Ok(json!({ "enrollment": to_json(&enrollment)? }))
}

fn enroll_bulk(
    conn: &Connection,
    params: &serde_json::Value,
    max_rows: usize,
) -> Result<serde_json::Value, HandlerErr> {
    let entries: Vec<EnrollRequest> = parse_rows(params, "entries", max_rows)?;
    let report = enrollment::enroll_bulk(conn, &entries, now())?;
    Ok(json!({
        "inserted": report.inserted_count(),
        "omitted": report.omitted_count(),
        "enrollments": to_json(&report.inserted)?,
        "omissions": to_json(&report.omitted)?,
    }))
}

fn transfer(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let code = get_required_str(params, "studentCode")?;
    let to_cycle_id = get_required_str(params, "toCycleId")?;
    let from_cycle_id = get_optional_str(params, "fromCycleId");
    let enrollment =
        enrollment::transfer_cycle(conn, &code, from_cycle_id.as_deref(), &to_cycle_id, now())?;
    Ok(json!({ "enrollment": to_json(&enrollment)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    match req.method.as_str() {
        "enrollment.enrollOne" => Some(with_db(state, req, |conn| enroll_one(conn, p))),
        "enrollment.enrollBulk" => {
            let max_rows = state.config.bulk.max_rows;
            Some(with_db(state, req, |conn| enroll_bulk(conn, p, max_rows)))
        }
        "enrollment.transfer" => Some(with_db(state, req, |conn| transfer(conn, p))),
        _ => None,
    }
}
