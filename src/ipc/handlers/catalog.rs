use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_required_str, now, parse_params, to_json, with_db,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::ledger::catalog::{
    self, CoursePatch, CyclePatch, MaterialUpsert, NewCourse, NewCycle, NewSchedule, SchedulePatch,
};
use crate::ledger::directory;
use rusqlite::Connection;
use serde_json::json;

fn cycles_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cycles = catalog::list_cycles(conn)?;
    Ok(json!({ "cycles": to_json(&cycles)? }))
}

fn cycles_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let new: NewCycle = parse_params(params)?;
    let cycle = catalog::create_cycle(conn, new)?;
    Ok(json!({ "cycle": to_json(&cycle)? }))
}

fn cycles_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cycle_id = get_required_str(params, "cycleId")?;
    let patch: CyclePatch = parse_params(params)?;
    let cycle = catalog::update_cycle(conn, &cycle_id, patch)?;
    Ok(json!({ "cycle": to_json(&cycle)? }))
}

fn cycles_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cycle_id = get_required_str(params, "cycleId")?;
    catalog::delete_cycle(conn, &cycle_id)?;
    Ok(json!({ "ok": true }))
}

fn cycles_active_on(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = get_optional_date(params, "date")?.unwrap_or_else(|| now().date());
    let cycles = directory::find_cycles_active_on(conn, date)?;
    Ok(json!({ "date": date, "cycles": to_json(&cycles)? }))
}

fn cycles_roster(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cycle_id = get_required_str(params, "cycleId")?;
    let cycle = directory::find_cycle(conn, &cycle_id)?;
    let roster = directory::cycle_roster(conn, &cycle.id)?;
    Ok(json!({ "cycle": to_json(&cycle)?, "students": to_json(&roster)? }))
}

fn cycles_current_roster(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = get_optional_date(params, "date")?.unwrap_or_else(|| now().date());
    let Some(cycle) = directory::find_cycles_active_on(conn, date)?.into_iter().next() else {
        return Ok(json!({ "date": date, "cycle": null, "students": [] }));
    };
    let roster = directory::cycle_roster(conn, &cycle.id)?;
    Ok(json!({ "date": date, "cycle": to_json(&cycle)?, "students": to_json(&roster)? }))
}

fn courses_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cycle_id = get_optional_str(params, "cycleId");
    let courses = catalog::list_courses(conn, cycle_id.as_deref())?;
    Ok(json!({ "courses": to_json(&courses)? }))
}

fn courses_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let new: NewCourse = parse_params(params)?;
    let course = catalog::create_course(conn, new)?;
    Ok(json!({ "course": to_json(&course)? }))
}

fn courses_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let patch: CoursePatch = parse_params(params)?;
    let course = catalog::update_course(conn, &course_id, patch)?;
    Ok(json!({ "course": to_json(&course)? }))
}

fn courses_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    catalog::delete_course(conn, &course_id)?;
    Ok(json!({ "ok": true }))
}

fn schedules_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let cycle_id = get_optional_str(params, "cycleId");
    let schedules = catalog::list_schedules(conn, cycle_id.as_deref())?;
    Ok(json!({ "schedules": to_json(&schedules)? }))
}

fn schedules_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let new: NewSchedule = parse_params(params)?;
    let schedule = catalog::create_schedule(conn, new)?;
    Ok(json!({ "schedule": to_json(&schedule)? }))
}

fn schedules_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let schedule_id = get_required_str(params, "scheduleId")?;
    let patch: SchedulePatch = parse_params(params)?;
    let schedule = catalog::update_schedule(conn, &schedule_id, patch)?;
    Ok(json!({ "schedule": to_json(&schedule)? }))
}

fn schedules_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let schedule_id = get_required_str(params, "scheduleId")?;
    catalog::delete_schedule(conn, &schedule_id)?;
    Ok(json!({ "ok": true }))
}

fn materials_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let materials = catalog::list_materials(conn, &course_id)?;
    Ok(json!({ "materials": to_json(&materials)? }))
}

fn materials_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let upsert: MaterialUpsert = parse_params(params)?;
    let material = catalog::upsert_material(conn, &course_id, upsert)?;
    Ok(json!({ "material": to_json(&material)? }))
}

type CatalogOp = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

fn route(method: &str) -> Option<CatalogOp> {
    let op: CatalogOp = match method {
        "cycles.list" => cycles_list,
        "cycles.create" => cycles_create,
        "cycles.update" => cycles_update,
        "cycles.delete" => cycles_delete,
        "cycles.activeOn" => cycles_active_on,
        "cycles.roster" => cycles_roster,
        "cycles.currentRoster" => cycles_current_roster,
        "courses.list" => courses_list,
        "courses.create" => courses_create,
        "courses.update" => courses_update,
        "courses.delete" => courses_delete,
        "schedules.list" => schedules_list,
        "schedules.create" => schedules_create,
        "schedules.update" => schedules_update,
        "schedules.delete" => schedules_delete,
        "materials.list" => materials_list,
        "materials.upsert" => materials_upsert,
        _ => return None,
    };
    Some(op)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let op = route(req.method.as_str())?;
    Some(with_db(state, req, |conn| op(conn, &req.params)))
}
