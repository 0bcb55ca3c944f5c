use super::directory;
use super::error::{is_unique_violation, Conflict, LedgerError, LedgerResult};
use super::model::{Cycle, Enrollment};
use super::require_non_blank;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use uuid::Uuid;

/// One bulk row. Missing fields decode as blank and the row is omitted as
/// invalid input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollRequest {
    #[serde(default)]
    pub student_code: String,
    #[serde(default)]
    pub cycle_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OmitReason {
    InvalidInput,
    UnknownStudent,
    UnknownCycle,
    AlreadyEnrolled,
    ActiveEnrollment { cycle_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Omission {
    pub index: usize,
    pub student_code: String,
    pub cycle_id: String,
    pub reason: OmitReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEnrollReport {
    pub inserted: Vec<Enrollment>,
    pub omitted: Vec<Omission>,
}

impl BulkEnrollReport {
    pub fn inserted_count(&self) -> usize {
        self.inserted.len()
    }

    pub fn omitted_count(&self) -> usize {
        self.omitted.len()
    }
}

fn insert_enrollment(
    conn: &Connection,
    student_id: &str,
    cycle_id: &str,
    now: NaiveDateTime,
) -> LedgerResult<Enrollment> {
    let enrollment = Enrollment {
        id: Uuid::new_v4().to_string(),
        student_id: student_id.to_string(),
        cycle_id: cycle_id.to_string(),
        registered_at: now,
    };
    conn.execute(
        "INSERT INTO enrollments(id, student_id, cycle_id, registered_at) VALUES(?, ?, ?, ?)",
        (
            &enrollment.id,
            &enrollment.student_id,
            &enrollment.cycle_id,
            enrollment.registered_at,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::from(Conflict::AlreadyEnrolled {
                cycle_id: cycle_id.to_string(),
            })
        } else {
            LedgerError::from(e)
        }
    })?;
    Ok(enrollment)
}

/// First cycle in `active` (cycles the student is enrolled in and that are
/// running today) whose range overlaps `target`.
fn overlapping<'a>(active: &'a [Cycle], target: &Cycle) -> Option<&'a Cycle> {
    active.iter().find(|c| c.id != target.id && c.overlaps(target))
}

pub fn enroll_one(
    conn: &Connection,
    student_code: &str,
    cycle_id: &str,
    now: NaiveDateTime,
) -> LedgerResult<Enrollment> {
    let student_code = require_non_blank(student_code, "studentCode")?;
    let cycle_id = require_non_blank(cycle_id, "cycleId")?;

    let student = directory::find_student_by_code(conn, student_code)?;
    let target = directory::find_cycle(conn, cycle_id)?;

    if directory::enrollment_exists(conn, &student.id, &target.id)? {
        return Err(Conflict::AlreadyEnrolled {
            cycle_id: target.id,
        }
        .into());
    }

    let active = directory::active_enrollment_cycles(conn, [student.id.as_str()], now.date())?
        .remove(&student.id)
        .unwrap_or_default();
    if let Some(c) = overlapping(&active, &target) {
        return Err(Conflict::ActiveEnrollment {
            cycle_id: c.id.clone(),
            cycle_name: c.name.clone(),
        }
        .into());
    }

    let enrollment = insert_enrollment(conn, &student.id, &target.id, now)?;
    tracing::info!(
        student = %student.code,
        cycle = %target.id,
        "enrolled student"
    );
    Ok(enrollment)
}

fn existing_pairs<'a>(
    conn: &Connection,
    student_ids: impl IntoIterator<Item = &'a str>,
) -> LedgerResult<HashSet<(String, String)>> {
    let keys: Vec<Value> = student_ids
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|k| Value::Text(k.to_string()))
        .collect();
    if keys.is_empty() {
        return Ok(HashSet::new());
    }
    let sql = format!(
        "SELECT student_id, cycle_id FROM enrollments WHERE student_id IN ({})",
        vec!["?"; keys.len()].join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let pairs = stmt
        .query_map(params_from_iter(keys.iter()), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(pairs)
}

/// Best-effort batch enrollment. Rows that cannot be enrolled are omitted
/// and reported; only storage failures abort the batch.
pub fn enroll_bulk(
    conn: &Connection,
    entries: &[EnrollRequest],
    now: NaiveDateTime,
) -> LedgerResult<BulkEnrollReport> {
    let today: NaiveDate = now.date();
    let students = directory::find_students_by_codes(
        conn,
        entries.iter().map(|e| e.student_code.trim()),
    )?;
    let cycles = directory::find_cycles_by_ids(conn, entries.iter().map(|e| e.cycle_id.trim()))?;
    let student_ids: Vec<&str> = students.values().map(|s| s.id.as_str()).collect();
    let mut pairs = existing_pairs(conn, student_ids.iter().copied())?;
    let mut active: HashMap<String, Vec<Cycle>> =
        directory::active_enrollment_cycles(conn, student_ids.iter().copied(), today)?;

    let mut report = BulkEnrollReport::default();
    let tx = conn.unchecked_transaction()?;
    for (index, entry) in entries.iter().enumerate() {
        let code = entry.student_code.trim();
        let cycle_id = entry.cycle_id.trim();
        let omit = |reason: OmitReason| Omission {
            index,
            student_code: code.to_string(),
            cycle_id: cycle_id.to_string(),
            reason,
        };

        if code.is_empty() || cycle_id.is_empty() {
            report.omitted.push(omit(OmitReason::InvalidInput));
            continue;
        }
        let Some(student) = students.get(code) else {
            report.omitted.push(omit(OmitReason::UnknownStudent));
            continue;
        };
        let Some(target) = cycles.get(cycle_id) else {
            report.omitted.push(omit(OmitReason::UnknownCycle));
            continue;
        };
        let pair = (student.id.clone(), target.id.clone());
        if pairs.contains(&pair) {
            report.omitted.push(omit(OmitReason::AlreadyEnrolled));
            continue;
        }
        let running = active.get(&student.id).map(Vec::as_slice).unwrap_or(&[]);
        if let Some(c) = overlapping(running, target) {
            report.omitted.push(omit(OmitReason::ActiveEnrollment {
                cycle_id: c.id.clone(),
            }));
            continue;
        }

        match insert_enrollment(&tx, &student.id, &target.id, now) {
            Ok(enrollment) => {
                pairs.insert(pair);
                if target.is_active_on(today) {
                    active
                        .entry(student.id.clone())
                        .or_default()
                        .push(target.clone());
                }
                report.inserted.push(enrollment);
            }
            Err(LedgerError::Conflict(_)) => {
                report.omitted.push(omit(OmitReason::AlreadyEnrolled));
            }
            Err(e) => return Err(e),
        }
    }
    tx.commit()?;

    if !report.omitted.is_empty() {
        tracing::warn!(omitted = report.omitted_count(), "bulk enrollment omitted rows");
    }
    tracing::info!(
        inserted = report.inserted_count(),
        omitted = report.omitted_count(),
        "bulk enrollment finished"
    );
    Ok(report)
}

/// Moves a student into `to_cycle_id`, first dropping the enrollment in
/// `from_cycle_id` when one is named. The whole sequence is one transaction:
/// a conflict on the destination leaves the source enrollment in place.
pub fn transfer_cycle(
    conn: &Connection,
    student_code: &str,
    from_cycle_id: Option<&str>,
    to_cycle_id: &str,
    now: NaiveDateTime,
) -> LedgerResult<Enrollment> {
    let student_code = require_non_blank(student_code, "studentCode")?;
    let to_cycle_id = require_non_blank(to_cycle_id, "toCycleId")?;
    let from_cycle_id = from_cycle_id.map(str::trim).filter(|s| !s.is_empty());

    let student = directory::find_student_by_code(conn, student_code)?;
    let target = directory::find_cycle(conn, to_cycle_id)?;

    let tx = conn.unchecked_transaction()?;
    if let Some(from) = from_cycle_id {
        let removed = tx.execute(
            "DELETE FROM enrollments WHERE student_id = ? AND cycle_id = ?",
            (&student.id, from),
        )?;
        tracing::debug!(student = %student.code, from, removed, "dropped source enrollment");
    }
    // Checked after the delete so a same-cycle transfer is not blocked by
    // its own source row.
    if directory::enrollment_exists(&tx, &student.id, &target.id)? {
        return Err(Conflict::AlreadyEnrolled {
            cycle_id: target.id,
        }
        .into());
    }
    let enrollment = insert_enrollment(&tx, &student.id, &target.id, now)?;
    tx.commit()?;

    tracing::info!(
        student = %student.code,
        from = from_cycle_id.unwrap_or("-"),
        to = %target.id,
        "transferred student"
    );
    Ok(enrollment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::testing::{at, enroll_at, seed_cycle, seed_student, test_conn};
    use pretty_assertions::assert_eq;

    fn count_enrollments(conn: &Connection, student_id: &str) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM enrollments WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )
        .expect("count")
    }

    #[test]
    fn second_enrollment_in_simultaneous_cycle_conflicts() {
        let conn = test_conn();
        seed_student(&conn, "S1", "Quispe", "Ana");
        let morning = seed_cycle(&conn, "2026-I Morning", "2026-03-01", "2026-07-31");
        let evening = seed_cycle(&conn, "2026-I Evening", "2026-04-01", "2026-08-31");
        let now = at("2026-04-15 10:00:00");

        enroll_one(&conn, "S1", &morning, now).expect("first enrollment");
        let err = enroll_one(&conn, "S1", &evening, now).expect_err("second enrollment");
        match err {
            LedgerError::Conflict(Conflict::ActiveEnrollment { cycle_id, cycle_name }) => {
                assert_eq!(cycle_id, morning);
                assert_eq!(cycle_name, "2026-I Morning");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn duplicate_pair_rejected_by_storage_maps_to_conflict() {
        let conn = test_conn();
        let student = seed_student(&conn, "S1", "Quispe", "Ana");
        let cycle = seed_cycle(&conn, "2026-I", "2026-03-01", "2026-07-31");
        let now = at("2026-03-02 08:00:00");

        insert_enrollment(&conn, &student.id, &cycle, now).expect("first insert");
        let err = insert_enrollment(&conn, &student.id, &cycle, now).expect_err("same pair");
        match err {
            LedgerError::Conflict(Conflict::AlreadyEnrolled { cycle_id }) => {
                assert_eq!(cycle_id, cycle)
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(count_enrollments(&conn, &student.id), 1);
    }

    #[test]
    fn bulk_rows_with_missing_fields_are_omitted() {
        let conn = test_conn();
        let student = seed_student(&conn, "S1", "Quispe", "Ana");
        seed_student(&conn, "S2", "Mamani", "Luis");
        let cycle = seed_cycle(&conn, "2026-I", "2026-03-01", "2026-07-31");
        let entries = vec![
            EnrollRequest {
                student_code: "S1".into(),
                cycle_id: cycle.clone(),
            },
            EnrollRequest {
                student_code: "S2".into(),
                ..EnrollRequest::default()
            },
        ];
        let report = enroll_bulk(&conn, &entries, at("2026-03-02 08:00:00")).expect("bulk");
        assert_eq!(report.inserted_count(), 1);
        assert_eq!(
            report.omitted,
            vec![Omission {
                index: 1,
                student_code: "S2".into(),
                cycle_id: String::new(),
                reason: OmitReason::InvalidInput,
            }]
        );
        assert_eq!(count_enrollments(&conn, &student.id), 1);
    }

    #[test]
    fn enrolling_into_next_term_is_allowed() {
        let conn = test_conn();
        let student = seed_student(&conn, "S1", "Quispe", "Ana");
        let current = seed_cycle(&conn, "2026-I", "2026-03-01", "2026-07-31");
        let next = seed_cycle(&conn, "2026-II", "2026-08-15", "2026-12-20");
        let now = at("2026-07-20 10:00:00");

        enroll_one(&conn, "S1", &current, now).expect("current");
        enroll_one(&conn, "S1", &next, now).expect("next term");
        assert_eq!(count_enrollments(&conn, &student.id), 2);
    }

    #[test]
    fn same_cycle_twice_conflicts() {
        let conn = test_conn();
        seed_student(&conn, "S1", "Quispe", "Ana");
        let cycle = seed_cycle(&conn, "2026-II", "2026-08-15", "2026-12-20");
        let now = at("2026-07-20 10:00:00");
        enroll_one(&conn, "S1", &cycle, now).expect("first");
        let err = enroll_one(&conn, "S1", &cycle, now).expect_err("duplicate");
        assert!(matches!(
            err,
            LedgerError::Conflict(Conflict::AlreadyEnrolled { .. })
        ));
    }

    #[test]
    fn enroll_one_reports_missing_parents() {
        let conn = test_conn();
        let cycle = seed_cycle(&conn, "2026-I", "2026-03-01", "2026-07-31");
        seed_student(&conn, "S1", "Quispe", "Ana");
        let now = at("2026-04-15 10:00:00");

        let err = enroll_one(&conn, "S404", &cycle, now).expect_err("student");
        assert!(matches!(err, LedgerError::NotFound { entity: "student", .. }));
        let err = enroll_one(&conn, "S1", "no-such-cycle", now).expect_err("cycle");
        assert!(matches!(err, LedgerError::NotFound { entity: "cycle", .. }));
        let err = enroll_one(&conn, "  ", &cycle, now).expect_err("blank");
        assert_eq!(err.code(), "bad_params");
    }

    #[test]
    fn bulk_omits_unknown_students_without_failing() {
        let conn = test_conn();
        let cycle = seed_cycle(&conn, "2026-I", "2026-03-01", "2026-07-31");
        for (code, last) in [("S1", "Apaza"), ("S2", "Mamani"), ("S3", "Rojas")] {
            seed_student(&conn, code, last, "X");
        }
        let entries: Vec<EnrollRequest> = ["S1", "S2", "GHOST-1", "S3", "GHOST-2"]
            .into_iter()
            .map(|code| EnrollRequest {
                student_code: code.to_string(),
                cycle_id: cycle.clone(),
            })
            .collect();

        let report = enroll_bulk(&conn, &entries, at("2026-03-02 08:00:00")).expect("bulk");
        assert_eq!(report.inserted_count(), 3);
        assert_eq!(report.omitted_count(), 2);
        let omitted: Vec<_> = report.omitted.iter().map(|o| o.index).collect();
        assert_eq!(omitted, vec![2, 4]);
        assert!(report
            .omitted
            .iter()
            .all(|o| o.reason == OmitReason::UnknownStudent));
    }

    #[test]
    fn bulk_respects_active_enrollments_inside_the_batch() {
        let conn = test_conn();
        let student = seed_student(&conn, "S1", "Quispe", "Ana");
        let a = seed_cycle(&conn, "A", "2026-03-01", "2026-07-31");
        let b = seed_cycle(&conn, "B", "2026-03-15", "2026-06-30");
        let entries = vec![
            EnrollRequest {
                student_code: "S1".into(),
                cycle_id: a.clone(),
            },
            EnrollRequest {
                student_code: "S1".into(),
                cycle_id: b.clone(),
            },
            EnrollRequest {
                student_code: "S1".into(),
                cycle_id: a.clone(),
            },
            EnrollRequest {
                student_code: "S1".into(),
                cycle_id: "missing".into(),
            },
        ];

        let report = enroll_bulk(&conn, &entries, at("2026-04-01 08:00:00")).expect("bulk");
        assert_eq!(report.inserted_count(), 1);
        let reasons: Vec<_> = report.omitted.iter().map(|o| o.reason.clone()).collect();
        assert_eq!(
            reasons,
            vec![
                OmitReason::ActiveEnrollment { cycle_id: a.clone() },
                OmitReason::AlreadyEnrolled,
                OmitReason::UnknownCycle,
            ]
        );
        assert_eq!(count_enrollments(&conn, &student.id), 1);
    }

    #[test]
    fn transfer_twice_conflicts_on_second_call() {
        let conn = test_conn();
        let student = seed_student(&conn, "S1", "Quispe", "Ana");
        let old = seed_cycle(&conn, "Old", "2026-03-01", "2026-07-31");
        let new = seed_cycle(&conn, "New", "2026-03-01", "2026-07-31");
        enroll_at(&conn, &student.id, &old, at("2026-02-20 08:00:00"));
        let now = at("2026-04-01 08:00:00");

        let moved = transfer_cycle(&conn, "S1", Some(&old), &new, now).expect("first transfer");
        assert_eq!(moved.cycle_id, new);

        let err = transfer_cycle(&conn, "S1", Some(&old), &new, now).expect_err("second");
        assert!(matches!(
            err,
            LedgerError::Conflict(Conflict::AlreadyEnrolled { .. })
        ));
        assert!(!directory::enrollment_exists(&conn, &student.id, &old).expect("old"));
        assert!(directory::enrollment_exists(&conn, &student.id, &new).expect("new"));
        assert_eq!(count_enrollments(&conn, &student.id), 1);
    }

    #[test]
    fn same_cycle_transfer_reinserts() {
        let conn = test_conn();
        let student = seed_student(&conn, "S1", "Quispe", "Ana");
        let cycle = seed_cycle(&conn, "2026-I", "2026-03-01", "2026-07-31");
        enroll_at(&conn, &student.id, &cycle, at("2026-02-20 08:00:00"));

        let now = at("2026-04-01 08:00:00");
        let e = transfer_cycle(&conn, "S1", Some(&cycle), &cycle, now).expect("no-op transfer");
        assert_eq!(e.registered_at, now);
        assert_eq!(count_enrollments(&conn, &student.id), 1);
    }

    #[test]
    fn failed_transfer_keeps_source_enrollment() {
        let conn = test_conn();
        let student = seed_student(&conn, "S1", "Quispe", "Ana");
        let old = seed_cycle(&conn, "Old", "2026-03-01", "2026-07-31");
        let new = seed_cycle(&conn, "New", "2026-08-01", "2026-12-20");
        enroll_at(&conn, &student.id, &old, at("2026-02-20 08:00:00"));
        enroll_at(&conn, &student.id, &new, at("2026-02-21 08:00:00"));

        transfer_cycle(&conn, "S1", Some(&old), &new, at("2026-04-01 08:00:00"))
            .expect_err("destination taken");
        assert!(directory::enrollment_exists(&conn, &student.id, &old).expect("old kept"));
    }

    #[test]
    fn transfer_requires_known_destination() {
        let conn = test_conn();
        seed_student(&conn, "S1", "Quispe", "Ana");
        let err = transfer_cycle(&conn, "S1", None, "nowhere", at("2026-04-01 08:00:00"))
            .expect_err("unknown cycle");
        assert!(matches!(err, LedgerError::NotFound { entity: "cycle", .. }));
    }
}
