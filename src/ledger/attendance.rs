//! Daily attendance per (student, cycle, day).
//!
//! A day moves from "no record" to exactly one of the statuses and stays
//! there. `Disabled` rows are administrative: they are written once per
//! enrolled student, may be duplicated, and never count as the day's real
//! attendance.

use super::directory;
use super::error::{Conflict, LedgerError, LedgerResult};
use super::model::{AttendanceRecord, AttendanceStatus, ATTENDANCE_COLUMNS};
use super::require_non_blank;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{Connection, OptionalExtension};
use serde::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

pub const NO_RECORD: &str = "NoRecord";
const DISABLED_NOTE: &str = "Day disabled by administration";

/// How a check-in is classified. Without a cut-off every check-in is
/// `Present`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckInPolicy {
    pub late_after: Option<NaiveTime>,
}

impl CheckInPolicy {
    fn status_at(&self, time: NaiveTime) -> AttendanceStatus {
        match self.late_after {
            Some(cutoff) if time > cutoff => AttendanceStatus::Late,
            _ => AttendanceStatus::Present,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseDayReport {
    pub date: NaiveDate,
    pub marked: usize,
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayEntry {
    pub student_id: String,
    pub student_code: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(serialize_with = "serialize_day_status")]
    pub status: Option<AttendanceStatus>,
    pub notes: Option<String>,
}

fn serialize_day_status<S: Serializer>(
    status: &Option<AttendanceStatus>,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.serialize_str(status.map_or(NO_RECORD, AttendanceStatus::as_str))
}

fn insert_record(
    conn: &Connection,
    student_id: &str,
    cycle_id: &str,
    recorded_at: NaiveDateTime,
    status: AttendanceStatus,
    notes: Option<String>,
) -> LedgerResult<AttendanceRecord> {
    let record = AttendanceRecord {
        id: Uuid::new_v4().to_string(),
        student_id: student_id.to_string(),
        cycle_id: cycle_id.to_string(),
        recorded_at,
        status,
        notes,
    };
    conn.execute(
        "INSERT INTO attendance(id, student_id, cycle_id, recorded_at, day, status, notes)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &record.id,
            &record.student_id,
            &record.cycle_id,
            record.recorded_at,
            record.recorded_at.date(),
            record.status,
            &record.notes,
        ),
    )?;
    Ok(record)
}

fn day_is_disabled(conn: &Connection, cycle_id: &str, day: NaiveDate) -> LedgerResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM attendance WHERE cycle_id = ? AND day = ? AND status = ? LIMIT 1",
            (cycle_id, day, AttendanceStatus::Disabled),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Records today's arrival for the student in the cycle of their most
/// recent enrollment.
pub fn check_in(
    conn: &Connection,
    student_code: &str,
    now: NaiveDateTime,
    policy: &CheckInPolicy,
) -> LedgerResult<AttendanceRecord> {
    let student_code = require_non_blank(student_code, "studentCode")?;
    let student = directory::find_student_by_code(conn, student_code)?;
    let enrollment = directory::latest_enrollment(conn, &student.id)?.ok_or_else(|| {
        LedgerError::InvalidState(format!("student {} has no enrollment", student.code))
    })?;

    let existing: Option<AttendanceStatus> = conn
        .query_row(
            "SELECT status FROM attendance
             WHERE student_id = ? AND cycle_id = ? AND day = ? AND status <> ?
             ORDER BY recorded_at, rowid
             LIMIT 1",
            (
                &student.id,
                &enrollment.cycle_id,
                now.date(),
                AttendanceStatus::Disabled,
            ),
            |r| r.get(0),
        )
        .optional()?;
    if let Some(status) = existing {
        return Err(Conflict::AlreadyMarked { status }.into());
    }

    let status = policy.status_at(now.time());
    let record = insert_record(conn, &student.id, &enrollment.cycle_id, now, status, None)?;
    tracing::info!(
        student = %student.code,
        cycle = %enrollment.cycle_id,
        %status,
        "checked in"
    );
    Ok(record)
}

/// Marks `date` inert for the whole cycle by writing one `Disabled` row per
/// enrolled student. Repeated calls write repeated rows.
pub fn disable_day(conn: &Connection, cycle_id: &str, date: NaiveDate) -> LedgerResult<usize> {
    let cycle = directory::find_cycle(conn, cycle_id)?;
    let student_ids = directory::enrolled_student_ids(conn, &cycle.id)?;
    let stamp = date.and_time(NaiveTime::MIN);

    let tx = conn.unchecked_transaction()?;
    for student_id in &student_ids {
        insert_record(
            &tx,
            student_id,
            &cycle.id,
            stamp,
            AttendanceStatus::Disabled,
            Some(DISABLED_NOTE.to_string()),
        )?;
    }
    tx.commit()?;

    tracing::info!(cycle = %cycle.id, %date, count = student_ids.len(), "disabled day");
    Ok(student_ids.len())
}

/// End-of-day sweep: every enrolled student without any record for the day
/// gets an `Absent` row. Running it again finds those rows and marks nobody.
pub fn close_day(
    conn: &Connection,
    cycle_id: &str,
    date: Option<NaiveDate>,
    now: NaiveDateTime,
) -> LedgerResult<CloseDayReport> {
    let cycle = directory::find_cycle(conn, cycle_id)?;
    let day = date.unwrap_or_else(|| now.date());

    if day_is_disabled(conn, &cycle.id, day)? {
        tracing::info!(cycle = %cycle.id, %day, "day is disabled, closure skipped");
        return Ok(CloseDayReport {
            date: day,
            marked: 0,
            disabled: true,
        });
    }

    let enrolled = directory::enrolled_student_ids(conn, &cycle.id)?;
    let mut stmt = conn.prepare(
        "SELECT DISTINCT student_id FROM attendance WHERE cycle_id = ? AND day = ?",
    )?;
    let recorded = stmt
        .query_map((&cycle.id, day), |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    let absent: Vec<&String> = enrolled.iter().filter(|id| !recorded.contains(*id)).collect();

    let stamp = if day == now.date() {
        now
    } else {
        day.and_hms_opt(23, 59, 59)
            .unwrap_or_else(|| day.and_time(NaiveTime::MIN))
    };
    let note = format!("Day closed {day}");

    let tx = conn.unchecked_transaction()?;
    for student_id in &absent {
        insert_record(
            &tx,
            student_id,
            &cycle.id,
            stamp,
            AttendanceStatus::Absent,
            Some(note.clone()),
        )?;
    }
    tx.commit()?;

    tracing::info!(cycle = %cycle.id, %day, marked = absent.len(), "closed day");
    Ok(CloseDayReport {
        date: day,
        marked: absent.len(),
        disabled: false,
    })
}

/// The day's status for every enrolled student. A real record is shown in
/// preference to a `Disabled` row.
pub fn list_day(conn: &Connection, cycle_id: &str, date: NaiveDate) -> LedgerResult<Vec<DayEntry>> {
    let cycle = directory::find_cycle(conn, cycle_id)?;
    let roster = directory::cycle_roster(conn, &cycle.id)?;

    let mut stmt = conn.prepare(
        "SELECT student_id, status, notes FROM attendance
         WHERE cycle_id = ? AND day = ?
         ORDER BY recorded_at, rowid",
    )?;
    let rows = stmt
        .query_map((&cycle.id, date), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, AttendanceStatus>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut by_student: HashMap<String, (AttendanceStatus, Option<String>)> = HashMap::new();
    for (student_id, status, notes) in rows {
        let keep_existing = matches!(
            by_student.get(&student_id),
            Some((s, _)) if *s != AttendanceStatus::Disabled
        );
        if !keep_existing {
            by_student.insert(student_id, (status, notes));
        }
    }

    Ok(roster
        .into_iter()
        .map(|entry| {
            let mark = by_student.remove(&entry.student.id);
            DayEntry {
                status: mark.as_ref().map(|(s, _)| *s),
                notes: mark.and_then(|(_, n)| n),
                student_id: entry.student.id,
                student_code: entry.student.code,
                first_name: entry.student.first_name,
                last_name: entry.student.last_name,
            }
        })
        .collect())
}

/// All of a student's records, newest first.
pub fn student_history(conn: &Connection, student_code: &str) -> LedgerResult<Vec<AttendanceRecord>> {
    let student = directory::find_student_by_code(conn, require_non_blank(student_code, "code")?)?;
    let sql = format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance
         WHERE student_id = ?
         ORDER BY recorded_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let records = stmt
        .query_map([&student.id], AttendanceRecord::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}
