//! Read-only lookups shared by the enrollment, attendance and grading code.

use super::error::{LedgerError, LedgerResult};
use super::model::{Cycle, Enrollment, Student, CYCLE_COLUMNS, ENROLLMENT_COLUMNS, STUDENT_COLUMNS};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    #[serde(flatten)]
    pub student: Student,
    pub registered_at: NaiveDateTime,
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn distinct<'a>(keys: impl IntoIterator<Item = &'a str>) -> Vec<Value> {
    keys.into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|k| Value::Text(k.to_string()))
        .collect()
}

pub fn find_student_by_code(conn: &Connection, code: &str) -> LedgerResult<Student> {
    let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE code = ?");
    conn.query_row(&sql, [code], Student::from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("student", code))
}

/// Resolves many codes with a single `IN` query. Unknown codes are simply
/// absent from the returned map.
pub fn find_students_by_codes<'a>(
    conn: &Connection,
    codes: impl IntoIterator<Item = &'a str>,
) -> LedgerResult<HashMap<String, Student>> {
    let keys = distinct(codes);
    if keys.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT {STUDENT_COLUMNS} FROM students WHERE code IN ({})",
        placeholders(keys.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let students = stmt
        .query_map(params_from_iter(keys.iter()), Student::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    tracing::debug!(requested = keys.len(), found = students.len(), "resolved student codes");
    Ok(students.into_iter().map(|s| (s.code.clone(), s)).collect())
}

pub fn find_cycle(conn: &Connection, cycle_id: &str) -> LedgerResult<Cycle> {
    let sql = format!("SELECT {CYCLE_COLUMNS} FROM cycles WHERE id = ?");
    conn.query_row(&sql, [cycle_id], Cycle::from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("cycle", cycle_id))
}

pub fn find_cycles_by_ids<'a>(
    conn: &Connection,
    ids: impl IntoIterator<Item = &'a str>,
) -> LedgerResult<HashMap<String, Cycle>> {
    let keys = distinct(ids);
    if keys.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT {CYCLE_COLUMNS} FROM cycles WHERE id IN ({})",
        placeholders(keys.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let cycles = stmt
        .query_map(params_from_iter(keys.iter()), Cycle::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cycles.into_iter().map(|c| (c.id.clone(), c)).collect())
}

/// Every cycle whose range contains `date`, earliest start first. Overlapping
/// cycles are possible; callers that need one take the first.
pub fn find_cycles_active_on(conn: &Connection, date: NaiveDate) -> LedgerResult<Vec<Cycle>> {
    let sql = format!(
        "SELECT {CYCLE_COLUMNS} FROM cycles
         WHERE start_date <= ?1 AND end_date >= ?1
         ORDER BY start_date, rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let cycles = stmt
        .query_map([date], Cycle::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    if cycles.len() > 1 {
        tracing::warn!(
            %date,
            matches = cycles.len(),
            "more than one cycle active on date, using the earliest"
        );
    }
    Ok(cycles)
}

/// The student's enrollment in a cycle whose range contains `as_of`.
pub fn find_active_enrollment(
    conn: &Connection,
    student_id: &str,
    as_of: NaiveDate,
) -> LedgerResult<Option<Enrollment>> {
    let sql = "SELECT e.id, e.student_id, e.cycle_id, e.registered_at
         FROM enrollments e
         JOIN cycles c ON c.id = e.cycle_id
         WHERE e.student_id = ?1 AND c.start_date <= ?2 AND c.end_date >= ?2
         ORDER BY e.registered_at DESC, e.rowid DESC
         LIMIT 1";
    Ok(conn
        .query_row(sql, (student_id, as_of), Enrollment::from_row)
        .optional()?)
}

/// Cycles active on `as_of` that each of the given students is enrolled in.
pub(crate) fn active_enrollment_cycles<'a>(
    conn: &Connection,
    student_ids: impl IntoIterator<Item = &'a str>,
    as_of: NaiveDate,
) -> LedgerResult<HashMap<String, Vec<Cycle>>> {
    let keys = distinct(student_ids);
    if keys.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT e.student_id, c.id, c.name, c.start_date, c.end_date
         FROM enrollments e
         JOIN cycles c ON c.id = e.cycle_id
         WHERE c.start_date <= ? AND c.end_date >= ? AND e.student_id IN ({})
         ORDER BY c.start_date, c.rowid",
        placeholders(keys.len())
    );
    let date = Value::Text(as_of.to_string());
    let mut bind = vec![date.clone(), date];
    bind.extend(keys);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(bind.iter()), |r| {
            Ok((
                r.get::<_, String>(0)?,
                Cycle {
                    id: r.get(1)?,
                    name: r.get(2)?,
                    start_date: r.get(3)?,
                    end_date: r.get(4)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut out: HashMap<String, Vec<Cycle>> = HashMap::new();
    for (student_id, cycle) in rows {
        out.entry(student_id).or_default().push(cycle);
    }
    Ok(out)
}

/// Most recently registered enrollment, regardless of cycle dates.
pub fn latest_enrollment(conn: &Connection, student_id: &str) -> LedgerResult<Option<Enrollment>> {
    let sql = format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments
         WHERE student_id = ?
         ORDER BY registered_at DESC, rowid DESC
         LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, [student_id], Enrollment::from_row)
        .optional()?)
}

pub(crate) fn enrollment_exists(
    conn: &Connection,
    student_id: &str,
    cycle_id: &str,
) -> LedgerResult<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE student_id = ? AND cycle_id = ?",
            (student_id, cycle_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

/// Ids of every student enrolled in the cycle, in registration order.
pub(crate) fn enrolled_student_ids(conn: &Connection, cycle_id: &str) -> LedgerResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM enrollments WHERE cycle_id = ? ORDER BY registered_at, rowid",
    )?;
    let ids = stmt
        .query_map([cycle_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Enrolled students of a cycle, by last name then first name.
pub fn cycle_roster(conn: &Connection, cycle_id: &str) -> LedgerResult<Vec<RosterEntry>> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.code, s.first_name, s.last_name, s.email, s.phone, s.photo_ref,
                e.registered_at
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.cycle_id = ?
         ORDER BY s.last_name, s.first_name, s.code",
    )?;
    let roster = stmt
        .query_map([cycle_id], |r| {
            Ok(RosterEntry {
                student: Student::from_row(r)?,
                registered_at: r.get(7)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(roster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::{at, day, enroll_at, seed_cycle, seed_student, test_conn};
    use pretty_assertions::assert_eq;

    #[test]
    fn unknown_code_is_not_found() {
        let conn = test_conn();
        let err = find_student_by_code(&conn, "nobody").expect_err("missing");
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn batch_lookup_skips_unknown_codes() {
        let conn = test_conn();
        seed_student(&conn, "S1", "Quispe", "Ana");
        seed_student(&conn, "S2", "Rojas", "Luis");
        let found = find_students_by_codes(&conn, ["S1", "S2", "S9", "S1"]).expect("lookup");
        let mut codes: Vec<_> = found.keys().cloned().collect();
        codes.sort();
        assert_eq!(codes, vec!["S1".to_string(), "S2".to_string()]);
    }

    #[test]
    fn active_on_returns_every_match_in_start_order() {
        let conn = test_conn();
        let later = seed_cycle(&conn, "Summer B", "2026-02-01", "2026-04-30");
        let earlier = seed_cycle(&conn, "Summer A", "2026-01-05", "2026-03-15");
        seed_cycle(&conn, "Autumn", "2026-05-01", "2026-08-31");

        let active = find_cycles_active_on(&conn, day("2026-03-01")).expect("active");
        let ids: Vec<_> = active.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec![earlier, later]);
        assert!(find_cycles_active_on(&conn, day("2027-01-01"))
            .expect("none")
            .is_empty());
    }

    #[test]
    fn active_enrollment_follows_cycle_dates() {
        let conn = test_conn();
        let student = seed_student(&conn, "S1", "Quispe", "Ana");
        let past = seed_cycle(&conn, "2025-II", "2025-08-01", "2025-12-15");
        let current = seed_cycle(&conn, "2026-I", "2026-03-01", "2026-07-31");
        enroll_at(&conn, &student.id, &past, at("2025-07-20 09:00:00"));
        enroll_at(&conn, &student.id, &current, at("2026-02-20 09:00:00"));

        let active = find_active_enrollment(&conn, &student.id, day("2026-04-10"))
            .expect("query")
            .expect("active enrollment");
        assert_eq!(active.cycle_id, current);
        assert!(find_active_enrollment(&conn, &student.id, day("2026-01-10"))
            .expect("query")
            .is_none());
    }

    #[test]
    fn latest_enrollment_orders_by_registration() {
        let conn = test_conn();
        let student = seed_student(&conn, "S1", "Quispe", "Ana");
        let a = seed_cycle(&conn, "A", "2026-03-01", "2026-07-31");
        let b = seed_cycle(&conn, "B", "2025-03-01", "2025-07-31");
        enroll_at(&conn, &student.id, &a, at("2026-02-01 08:00:00"));
        enroll_at(&conn, &student.id, &b, at("2026-02-03 08:00:00"));

        let latest = latest_enrollment(&conn, &student.id)
            .expect("query")
            .expect("some");
        assert_eq!(latest.cycle_id, b);
    }

    #[test]
    fn roster_is_sorted_by_name() {
        let conn = test_conn();
        let cycle = seed_cycle(&conn, "2026-I", "2026-03-01", "2026-07-31");
        for (code, last, first) in [("S1", "Rojas", "Luis"), ("S2", "Apaza", "Rosa"), ("S3", "Rojas", "Ana")] {
            let s = seed_student(&conn, code, last, first);
            enroll_at(&conn, &s.id, &cycle, at("2026-02-01 08:00:00"));
        }
        let names: Vec<_> = cycle_roster(&conn, &cycle)
            .expect("roster")
            .into_iter()
            .map(|e| e.student.display_name())
            .collect();
        assert_eq!(names, vec!["Apaza, Rosa", "Rojas, Ana", "Rojas, Luis"]);
    }
}
