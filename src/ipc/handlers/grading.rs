use crate::ipc::helpers::{get_required_str, parse_params, parse_rows, to_json, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::grading::{self, GradeEntry, GradeReport, NewExam, SheetRow};
use rusqlite::Connection;
use serde_json::json;

fn exams_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let new: NewExam = parse_params(params)?;
    let exam = grading::create_exam(conn, new)?;
    Ok(json!({ "exam": to_json(&exam)? }))
}

fn exams_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cycle_id = get_required_str(params, "cycleId")?;
    let exams = grading::list_exams(conn, &cycle_id)?;
    Ok(json!({ "exams": to_json(&exams)? }))
}

fn report_json(report: &GradeReport) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "inserted": report.inserted,
        "dropped": report.dropped.len(),
        "droppedRows": to_json(&report.dropped)?,
        "ranking": to_json(&report.ranking)?,
    }))
}

fn grades_set(
    conn: &Connection,
    params: &serde_json::Value,
    max_rows: usize,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let entries: Vec<GradeEntry> = parse_rows(params, "grades", max_rows)?;
    let report = grading::set_grades(conn, &exam_id, &entries)?;
    report_json(&report)
}

fn grades_import(
    conn: &Connection,
    params: &serde_json::Value,
    max_rows: usize,
) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let rows: Vec<SheetRow> = parse_rows(params, "rows", max_rows)?;
    let report = grading::import_rows(conn, &exam_id, &rows)?;
    report_json(&report)
}

fn grades_merit(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let exam_id = get_required_str(params, "examId")?;
    let exam = grading::find_exam(conn, &exam_id)?;
    let rows = grading::merit_list(conn, &exam.id)?;
    Ok(json!({ "exam": to_json(&exam)?, "rows": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    let max_rows = state.config.bulk.max_rows;
    match req.method.as_str() {
        "exams.create" => Some(with_db(state, req, |conn| exams_create(conn, p))),
        "exams.list" => Some(with_db(state, req, |conn| exams_list(conn, p))),
        "grades.set" => Some(with_db(state, req, |conn| grades_set(conn, p, max_rows))),
        "grades.import" => Some(with_db(state, req, |conn| grades_import(conn, p, max_rows))),
        "grades.merit" => Some(with_db(state, req, |conn| grades_merit(conn, p))),
        _ => None,
    }
}
