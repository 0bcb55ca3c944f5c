//! Cycle, course, schedule and material records.
//!
//! Updates take patch structs: a field left out, or sent blank, keeps its
//! stored value.

use super::directory;
use super::{LedgerError, LedgerResult};
use super::model::{Cycle, CYCLE_COLUMNS};
use super::{non_blank, require_non_blank};
use chrono::{Months, NaiveDate, NaiveTime};
use rusqlite::{Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSummary {
    #[serde(flatten)]
    pub cycle: Cycle,
    pub duration_months: i64,
}

impl From<Cycle> for CycleSummary {
    fn from(cycle: Cycle) -> Self {
        Self {
            duration_months: cycle.duration_months(),
            cycle,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCycle {
    pub name: String,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub duration_months: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CyclePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub duration_months: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub cycle_id: String,
    pub cycle_name: String,
    pub name: String,
    pub teacher: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCourse {
    pub cycle_id: String,
    pub name: String,
    pub teacher: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoursePatch {
    #[serde(default)]
    pub cycle_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub teacher: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub course_id: String,
    pub course_name: String,
    pub cycle_id: String,
    pub cycle_name: String,
    pub weekday: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSchedule {
    pub course_id: String,
    pub weekday: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePatch {
    #[serde(default)]
    pub weekday: Option<String>,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Material {
    pub id: String,
    pub course_id: String,
    pub week: i64,
    pub name: String,
    pub file_url: Option<String>,
    pub drive_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialUpsert {
    pub week: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub drive_url: Option<String>,
}

fn end_from_duration(start: NaiveDate, months: u32) -> LedgerResult<NaiveDate> {
    start
        .checked_add_months(Months::new(months))
        .ok_or_else(|| LedgerError::InvalidInput("durationMonths is out of range".into()))
}

fn check_range(start: NaiveDate, end: NaiveDate) -> LedgerResult<()> {
    if end < start {
        return Err(LedgerError::InvalidInput(format!(
            "cycle ends ({end}) before it starts ({start})"
        )));
    }
    Ok(())
}

pub fn list_cycles(conn: &Connection) -> LedgerResult<Vec<CycleSummary>> {
    let sql = format!("SELECT {CYCLE_COLUMNS} FROM cycles ORDER BY start_date, name");
    let mut stmt = conn.prepare(&sql)?;
    let cycles = stmt
        .query_map([], Cycle::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cycles.into_iter().map(CycleSummary::from).collect())
}

pub fn create_cycle(conn: &Connection, new: NewCycle) -> LedgerResult<CycleSummary> {
    let name = require_non_blank(&new.name, "name")?;
    let end_date = match (new.end_date, new.duration_months) {
        (Some(end), _) => end,
        (None, Some(months)) => end_from_duration(new.start_date, months)?,
        (None, None) => {
            return Err(LedgerError::InvalidInput(
                "endDate or durationMonths is required".into(),
            ))
        }
    };
    check_range(new.start_date, end_date)?;

    let cycle = Cycle {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        start_date: new.start_date,
        end_date,
    };
    conn.execute(
        "INSERT INTO cycles(id, name, start_date, end_date) VALUES(?, ?, ?, ?)",
        (&cycle.id, &cycle.name, cycle.start_date, cycle.end_date),
    )?;
    tracing::info!(cycle = %cycle.id, start = %cycle.start_date, end = %cycle.end_date, "created cycle");
    Ok(cycle.into())
}

pub fn update_cycle(conn: &Connection, cycle_id: &str, patch: CyclePatch) -> LedgerResult<CycleSummary> {
    let current = directory::find_cycle(conn, cycle_id)?;
    let start_date = patch.start_date.unwrap_or(current.start_date);
    let end_date = match (patch.end_date, patch.start_date, patch.duration_months) {
        (Some(end), _, _) => end,
        (None, Some(start), Some(months)) => end_from_duration(start, months)?,
        _ => current.end_date,
    };
    check_range(start_date, end_date)?;

    let cycle = Cycle {
        name: non_blank(patch.name).unwrap_or(current.name),
        start_date,
        end_date,
        id: current.id,
    };
    conn.execute(
        "UPDATE cycles SET name = ?, start_date = ?, end_date = ? WHERE id = ?",
        (&cycle.name, cycle.start_date, cycle.end_date, &cycle.id),
    )?;
    tracing::info!(cycle = %cycle.id, "updated cycle");
    Ok(cycle.into())
}

/// Deletes a cycle with everything hanging off it, children first.
pub fn delete_cycle(conn: &Connection, cycle_id: &str) -> LedgerResult<()> {
    let cycle = directory::find_cycle(conn, cycle_id)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM grades WHERE exam_id IN (SELECT id FROM exams WHERE cycle_id = ?)",
        [&cycle.id],
    )?;
    tx.execute("DELETE FROM exams WHERE cycle_id = ?", [&cycle.id])?;
    tx.execute("DELETE FROM attendance WHERE cycle_id = ?", [&cycle.id])?;
    tx.execute("DELETE FROM enrollments WHERE cycle_id = ?", [&cycle.id])?;
    tx.execute(
        "DELETE FROM course_materials WHERE course_id IN (SELECT id FROM courses WHERE cycle_id = ?)",
        [&cycle.id],
    )?;
    tx.execute(
        "DELETE FROM course_schedules WHERE course_id IN (SELECT id FROM courses WHERE cycle_id = ?)",
        [&cycle.id],
    )?;
    tx.execute("DELETE FROM courses WHERE cycle_id = ?", [&cycle.id])?;
    tx.execute("DELETE FROM cycles WHERE id = ?", [&cycle.id])?;
    tx.commit()?;
    tracing::info!(cycle = %cycle.id, "deleted cycle");
    Ok(())
}

const COURSE_SELECT: &str = "SELECT c.id, c.cycle_id, cy.name, c.name, c.teacher
     FROM courses c
     JOIN cycles cy ON cy.id = c.cycle_id";

fn course_from_row(r: &Row<'_>) -> rusqlite::Result<Course> {
    Ok(Course {
        id: r.get(0)?,
        cycle_id: r.get(1)?,
        cycle_name: r.get(2)?,
        name: r.get(3)?,
        teacher: r.get(4)?,
    })
}

pub fn find_course(conn: &Connection, course_id: &str) -> LedgerResult<Course> {
    let sql = format!("{COURSE_SELECT} WHERE c.id = ?");
    conn.query_row(&sql, [course_id], course_from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("course", course_id))
}

pub fn list_courses(conn: &Connection, cycle_id: Option<&str>) -> LedgerResult<Vec<Course>> {
    let sql = format!(
        "{COURSE_SELECT} WHERE (?1 IS NULL OR c.cycle_id = ?1) ORDER BY cy.start_date, c.name"
    );
    let mut stmt = conn.prepare(&sql)?;
    let courses = stmt
        .query_map([cycle_id], course_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(courses)
}

pub fn create_course(conn: &Connection, new: NewCourse) -> LedgerResult<Course> {
    let cycle = directory::find_cycle(conn, require_non_blank(&new.cycle_id, "cycleId")?)?;
    let name = require_non_blank(&new.name, "name")?;
    let teacher = require_non_blank(&new.teacher, "teacher")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, cycle_id, name, teacher) VALUES(?, ?, ?, ?)",
        (&id, &cycle.id, name, teacher),
    )?;
    tracing::info!(course = %id, cycle = %cycle.id, "created course");
    find_course(conn, &id)
}

pub fn update_course(conn: &Connection, course_id: &str, patch: CoursePatch) -> LedgerResult<Course> {
    let current = find_course(conn, course_id)?;
    let cycle_id = match non_blank(patch.cycle_id) {
        Some(id) => directory::find_cycle(conn, &id)?.id,
        None => current.cycle_id,
    };
    conn.execute(
        "UPDATE courses SET cycle_id = ?, name = ?, teacher = ? WHERE id = ?",
        (
            &cycle_id,
            non_blank(patch.name).unwrap_or(current.name),
            non_blank(patch.teacher).unwrap_or(current.teacher),
            &current.id,
        ),
    )?;
    find_course(conn, &current.id)
}

pub fn delete_course(conn: &Connection, course_id: &str) -> LedgerResult<()> {
    let course = find_course(conn, course_id)?;
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM course_materials WHERE course_id = ?", [&course.id])?;
    tx.execute("DELETE FROM course_schedules WHERE course_id = ?", [&course.id])?;
    tx.execute("DELETE FROM courses WHERE id = ?", [&course.id])?;
    tx.commit()?;
    tracing::info!(course = %course.id, "deleted course");
    Ok(())
}

const SCHEDULE_SELECT: &str =
    "SELECT s.id, s.course_id, c.name, c.cycle_id, cy.name, s.weekday, s.start_time, s.end_time
     FROM course_schedules s
     JOIN courses c ON c.id = s.course_id
     JOIN cycles cy ON cy.id = c.cycle_id";

fn schedule_from_row(r: &Row<'_>) -> rusqlite::Result<Schedule> {
    Ok(Schedule {
        id: r.get(0)?,
        course_id: r.get(1)?,
        course_name: r.get(2)?,
        cycle_id: r.get(3)?,
        cycle_name: r.get(4)?,
        weekday: r.get(5)?,
        start_time: r.get(6)?,
        end_time: r.get(7)?,
    })
}

fn find_schedule(conn: &Connection, schedule_id: &str) -> LedgerResult<Schedule> {
    let sql = format!("{SCHEDULE_SELECT} WHERE s.id = ?");
    conn.query_row(&sql, [schedule_id], schedule_from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("schedule", schedule_id))
}

fn check_slot(start: NaiveTime, end: NaiveTime) -> LedgerResult<()> {
    if end <= start {
        return Err(LedgerError::InvalidInput(
            "schedule must end after it starts".into(),
        ));
    }
    Ok(())
}

pub fn list_schedules(conn: &Connection, cycle_id: Option<&str>) -> LedgerResult<Vec<Schedule>> {
    let sql = format!(
        "{SCHEDULE_SELECT} WHERE (?1 IS NULL OR c.cycle_id = ?1) ORDER BY s.weekday, s.start_time"
    );
    let mut stmt = conn.prepare(&sql)?;
    let schedules = stmt
        .query_map([cycle_id], schedule_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(schedules)
}

pub fn create_schedule(conn: &Connection, new: NewSchedule) -> LedgerResult<Schedule> {
    let course = find_course(conn, require_non_blank(&new.course_id, "courseId")?)?;
    let weekday = require_non_blank(&new.weekday, "weekday")?;
    check_slot(new.start_time, new.end_time)?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO course_schedules(id, course_id, weekday, start_time, end_time)
         VALUES(?, ?, ?, ?, ?)",
        (&id, &course.id, weekday, new.start_time, new.end_time),
    )?;
    find_schedule(conn, &id)
}

pub fn update_schedule(
    conn: &Connection,
    schedule_id: &str,
    patch: SchedulePatch,
) -> LedgerResult<Schedule> {
    let current = find_schedule(conn, schedule_id)?;
    let start_time = patch.start_time.unwrap_or(current.start_time);
    let end_time = patch.end_time.unwrap_or(current.end_time);
    check_slot(start_time, end_time)?;
    conn.execute(
        "UPDATE course_schedules SET weekday = ?, start_time = ?, end_time = ? WHERE id = ?",
        (
            non_blank(patch.weekday).unwrap_or(current.weekday),
            start_time,
            end_time,
            &current.id,
        ),
    )?;
    find_schedule(conn, &current.id)
}

pub fn delete_schedule(conn: &Connection, schedule_id: &str) -> LedgerResult<()> {
    let removed = conn.execute("DELETE FROM course_schedules WHERE id = ?", [schedule_id])?;
    if removed == 0 {
        return Err(LedgerError::not_found("schedule", schedule_id));
    }
    Ok(())
}

fn material_from_row(r: &Row<'_>) -> rusqlite::Result<Material> {
    Ok(Material {
        id: r.get(0)?,
        course_id: r.get(1)?,
        week: r.get(2)?,
        name: r.get(3)?,
        file_url: r.get(4)?,
        drive_url: r.get(5)?,
    })
}

const MATERIAL_COLUMNS: &str = "id, course_id, week, name, file_url, drive_url";

pub fn list_materials(conn: &Connection, course_id: &str) -> LedgerResult<Vec<Material>> {
    let course = find_course(conn, course_id)?;
    let sql = format!(
        "SELECT {MATERIAL_COLUMNS} FROM course_materials WHERE course_id = ? ORDER BY week"
    );
    let mut stmt = conn.prepare(&sql)?;
    let materials = stmt
        .query_map([&course.id], material_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(materials)
}

/// One material per (course, week): creates it, or patches the existing one.
pub fn upsert_material(
    conn: &Connection,
    course_id: &str,
    upsert: MaterialUpsert,
) -> LedgerResult<Material> {
    let course = find_course(conn, course_id)?;
    if upsert.week < 1 {
        return Err(LedgerError::InvalidInput("week must be >= 1".into()));
    }
    let sql = format!(
        "SELECT {MATERIAL_COLUMNS} FROM course_materials WHERE course_id = ? AND week = ?"
    );
    let existing = conn
        .query_row(&sql, (&course.id, upsert.week), material_from_row)
        .optional()?;

    let material = match existing {
        Some(current) => Material {
            name: non_blank(upsert.name).unwrap_or(current.name),
            file_url: upsert.file_url.or(current.file_url),
            drive_url: upsert.drive_url.or(current.drive_url),
            ..current
        },
        None => Material {
            id: Uuid::new_v4().to_string(),
            course_id: course.id.clone(),
            week: upsert.week,
            name: non_blank(upsert.name)
                .ok_or_else(|| LedgerError::InvalidInput("name must not be empty".into()))?,
            file_url: upsert.file_url,
            drive_url: upsert.drive_url,
        },
    };
    conn.execute(
        "INSERT INTO course_materials(id, course_id, week, name, file_url, drive_url)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(course_id, week) DO UPDATE SET
           name = excluded.name,
           file_url = excluded.file_url,
           drive_url = excluded.drive_url",
        (
            &material.id,
            &material.course_id,
            material.week,
            &material.name,
            &material.file_url,
            &material.drive_url,
        ),
    )?;
    tracing::info!(course = %course.id, week = material.week, "saved material");
    Ok(material)
}
