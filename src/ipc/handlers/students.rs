use crate::ipc::helpers::{get_required_str, now, parse_params, to_json, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ledger::students::{self, NewStudent, StudentPatch};
use crate::ledger::{attendance, directory, grading};
use rusqlite::Connection;
use serde_json::json;

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
    photo_placeholder: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let new: NewStudent = parse_params(params)?;
    let student = students::create_student(conn, new, photo_placeholder, now())?;
    Ok(json!({ "student": to_json(&student)? }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let student = directory::find_student_by_code(conn, &code)?;
    let latest = directory::latest_enrollment(conn, &student.id)?;
    let active = directory::find_active_enrollment(conn, &student.id, now().date())?;
    Ok(json!({
        "student": to_json(&student)?,
        "displayName": student.display_name(),
        "latestEnrollment": to_json(&latest)?,
        "activeEnrollment": to_json(&active)?,
    }))
}

fn students_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let patch: StudentPatch = parse_params(params)?;
    let student = students::update_student(conn, &code, patch, now())?;
    Ok(json!({ "student": to_json(&student)? }))
}

fn students_attendance(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let records = attendance::student_history(conn, &code)?;
    Ok(json!({ "records": to_json(&records)? }))
}

fn students_grades(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let code = get_required_str(params, "code")?;
    let grades = grading::student_grades(conn, &code)?;
    Ok(json!({ "grades": to_json(&grades)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let p = &req.params;
    match req.method.as_str() {
        "students.create" => {
            let placeholder = state.config.photo_placeholder.clone();
            Some(with_db(state, req, |conn| students_create(conn, p, &placeholder)))
        }
        "students.get" => Some(with_db(state, req, |conn| students_get(conn, p))),
        "students.update" => Some(with_db(state, req, |conn| students_update(conn, p))),
        "students.attendance" => Some(with_db(state, req, |conn| students_attendance(conn, p))),
        "students.grades" => Some(with_db(state, req, |conn| students_grades(conn, p))),
        _ => None,
    }
}
