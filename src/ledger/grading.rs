//! Exam grades and their ranking.
//!
//! Grades of an exam are always replaced as a whole: manual entry and
//! spreadsheet import share the same rank-then-replace path.

use super::directory;
use super::{LedgerError, LedgerResult};
use super::model::{Exam, Grade, EXAM_COLUMNS};
use super::require_non_blank;
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use uuid::Uuid;

/// A manually entered grade. Fields that are missing or of the wrong shape
/// are dropped per row rather than failing the whole set.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    #[serde(default)]
    pub student_code: String,
    #[serde(default)]
    pub score: Option<ScoreCell>,
}

/// A score cell as it comes out of a decoded sheet or a request row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScoreCell {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl ScoreCell {
    fn value(&self) -> Result<f64, DropReason> {
        let v = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| DropReason::NonNumericScore)?,
            Self::Other(_) => return Err(DropReason::NonNumericScore),
        };
        if v.is_finite() {
            // -0.0 and 0.0 are the same score.
            Ok(v + 0.0)
        } else {
            Err(DropReason::NonFiniteScore)
        }
    }
}

/// Checks one input row, returning `(index, code, score)` or the drop that
/// explains why it was skipped.
fn usable_row(
    index: usize,
    code: Option<&str>,
    score: Option<&ScoreCell>,
) -> Result<(usize, String, f64), DroppedRow> {
    let code = code.map(str::trim).filter(|c| !c.is_empty());
    let skip = |reason| DroppedRow {
        index,
        student_code: code.map(str::to_string),
        reason,
    };
    let Some(code) = code else {
        return Err(skip(DropReason::BlankCode));
    };
    let score = score
        .ok_or(DropReason::MissingScore)
        .and_then(ScoreCell::value)
        .map_err(skip)?;
    Ok((index, code.to_string(), score))
}

/// One data row of a decoded sheet, header already removed.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetRow {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub score: Option<ScoreCell>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    BlankCode,
    MissingScore,
    NonNumericScore,
    NonFiniteScore,
    UnknownStudent,
    DuplicateCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedRow {
    pub index: usize,
    pub student_code: Option<String>,
    pub reason: DropReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeReport {
    pub inserted: usize,
    pub dropped: Vec<DroppedRow>,
    pub ranking: Vec<Grade>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewExam {
    pub cycle_id: String,
    pub week: i64,
    pub exam_type: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub question_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeritRow {
    pub rank: i64,
    pub score: f64,
    pub student_code: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentGrade {
    pub exam_id: String,
    pub exam_type: String,
    pub week: i64,
    pub date: NaiveDate,
    pub score: f64,
    pub rank: i64,
}

/// Stable sort by score, highest first, then 1-based positions. Equal scores
/// keep their input order and still get distinct ranks.
pub fn rank_scores<T>(mut rows: Vec<(T, f64)>) -> Vec<(T, f64, i64)> {
    rows.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    rows.into_iter()
        .enumerate()
        .map(|(i, (item, score))| (item, score, i as i64 + 1))
        .collect()
}

pub fn find_exam(conn: &Connection, exam_id: &str) -> LedgerResult<Exam> {
    let sql = format!("SELECT {EXAM_COLUMNS} FROM exams WHERE id = ?");
    conn.query_row(&sql, [exam_id], Exam::from_row)
        .optional()?
        .ok_or_else(|| LedgerError::not_found("exam", exam_id))
}

pub fn create_exam(conn: &Connection, new: NewExam) -> LedgerResult<Exam> {
    let cycle = directory::find_cycle(conn, require_non_blank(&new.cycle_id, "cycleId")?)?;
    let exam_type = require_non_blank(&new.exam_type, "examType")?;
    if new.week < 1 {
        return Err(LedgerError::InvalidInput("week must be >= 1".into()));
    }
    if matches!(new.question_count, Some(n) if n < 0) {
        return Err(LedgerError::InvalidInput(
            "questionCount must not be negative".into(),
        ));
    }
    let exam = Exam {
        id: Uuid::new_v4().to_string(),
        cycle_id: cycle.id,
        week: new.week,
        exam_type: exam_type.to_string(),
        date: new.date,
        question_count: new.question_count,
    };
    conn.execute(
        "INSERT INTO exams(id, cycle_id, week, exam_type, date, question_count)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &exam.id,
            &exam.cycle_id,
            exam.week,
            &exam.exam_type,
            exam.date,
            exam.question_count,
        ),
    )?;
    tracing::info!(exam = %exam.id, cycle = %exam.cycle_id, week = exam.week, "created exam");
    Ok(exam)
}

pub fn list_exams(conn: &Connection, cycle_id: &str) -> LedgerResult<Vec<Exam>> {
    let cycle = directory::find_cycle(conn, cycle_id)?;
    let sql = format!(
        "SELECT {EXAM_COLUMNS} FROM exams WHERE cycle_id = ? ORDER BY date DESC, week DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let exams = stmt
        .query_map([&cycle.id], Exam::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(exams)
}

/// `entries` carries the caller's row index so drops can point back at the
/// original input.
fn replace_grades(
    conn: &Connection,
    exam: &Exam,
    entries: Vec<(usize, String, f64)>,
    mut dropped: Vec<DroppedRow>,
) -> LedgerResult<GradeReport> {
    let students =
        directory::find_students_by_codes(conn, entries.iter().map(|(_, code, _)| code.as_str()))?;

    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(entries.len());
    for (index, code, score) in entries {
        let reason = if !students.contains_key(&code) {
            Some(DropReason::UnknownStudent)
        } else if !seen.insert(code.clone()) {
            Some(DropReason::DuplicateCode)
        } else {
            None
        };
        match (reason, students.get(&code)) {
            (None, Some(student)) => kept.push((student, score)),
            (reason, _) => dropped.push(DroppedRow {
                index,
                student_code: Some(code),
                reason: reason.unwrap_or(DropReason::UnknownStudent),
            }),
        }
    }
    dropped.sort_by_key(|d| d.index);

    let ranking: Vec<Grade> = rank_scores(kept)
        .into_iter()
        .map(|(student, score, rank)| Grade {
            exam_id: exam.id.clone(),
            student_id: student.id.clone(),
            student_code: student.code.clone(),
            score,
            rank,
        })
        .collect();

    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM grades WHERE exam_id = ?", [&exam.id])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO grades(id, exam_id, student_id, score, rank) VALUES(?, ?, ?, ?, ?)",
        )?;
        for g in &ranking {
            stmt.execute((
                Uuid::new_v4().to_string(),
                &g.exam_id,
                &g.student_id,
                g.score,
                g.rank,
            ))?;
        }
    }
    tx.commit()?;

    if !dropped.is_empty() {
        tracing::warn!(exam = %exam.id, dropped = dropped.len(), "grade rows dropped");
    }
    tracing::info!(exam = %exam.id, inserted = ranking.len(), "replaced exam grades");
    Ok(GradeReport {
        inserted: ranking.len(),
        dropped,
        ranking,
    })
}

/// Replaces every grade of the exam with `entries`. An empty list clears
/// the exam.
pub fn set_grades(
    conn: &Connection,
    exam_id: &str,
    entries: &[GradeEntry],
) -> LedgerResult<GradeReport> {
    let exam = find_exam(conn, require_non_blank(exam_id, "examId")?)?;
    let (rows, dropped): (Vec<_>, Vec<_>) = entries
        .iter()
        .enumerate()
        .map(|(index, e)| usable_row(index, Some(e.student_code.as_str()), e.score.as_ref()))
        .partition(Result::is_ok);
    let rows = rows.into_iter().flatten().collect();
    let dropped = dropped.into_iter().filter_map(Result::err).collect();
    replace_grades(conn, &exam, rows, dropped)
}

/// Same replacement as [`set_grades`], fed from sheet rows. A sheet without
/// a single usable row is rejected and leaves existing grades untouched.
pub fn import_rows(conn: &Connection, exam_id: &str, rows: &[SheetRow]) -> LedgerResult<GradeReport> {
    let exam = find_exam(conn, require_non_blank(exam_id, "examId")?)?;
    let (usable, dropped): (Vec<_>, Vec<_>) = rows
        .iter()
        .enumerate()
        .map(|(index, row)| usable_row(index, row.code.as_deref(), row.score.as_ref()))
        .partition(Result::is_ok);
    let usable: Vec<_> = usable.into_iter().flatten().collect();
    let dropped = dropped.into_iter().filter_map(Result::err).collect();
    if usable.is_empty() {
        return Err(LedgerError::InvalidInput(
            "sheet has no rows with a student code and numeric score".into(),
        ));
    }
    replace_grades(conn, &exam, usable, dropped)
}

/// Grades of an exam in rank order, with the names a merit report prints.
pub fn merit_list(conn: &Connection, exam_id: &str) -> LedgerResult<Vec<MeritRow>> {
    let exam = find_exam(conn, exam_id)?;
    let mut stmt = conn.prepare(
        "SELECT g.rank, g.score, s.code, s.first_name, s.last_name
         FROM grades g
         JOIN students s ON s.id = g.student_id
         WHERE g.exam_id = ?
         ORDER BY g.rank",
    )?;
    let rows = stmt
        .query_map([&exam.id], |r| {
            Ok(MeritRow {
                rank: r.get(0)?,
                score: r.get(1)?,
                student_code: r.get(2)?,
                first_name: r.get(3)?,
                last_name: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// A student's grades across exams, newest exam first.
pub fn student_grades(conn: &Connection, student_code: &str) -> LedgerResult<Vec<StudentGrade>> {
    let student = directory::find_student_by_code(conn, require_non_blank(student_code, "code")?)?;
    let mut stmt = conn.prepare(
        "SELECT e.id, e.exam_type, e.week, e.date, g.score, g.rank
         FROM grades g
         JOIN exams e ON e.id = g.exam_id
         WHERE g.student_id = ?
         ORDER BY e.date DESC, e.week DESC",
    )?;
    let rows = stmt
        .query_map([&student.id], |r| {
            Ok(StudentGrade {
                exam_id: r.get(0)?,
                exam_type: r.get(1)?,
                week: r.get(2)?,
                date: r.get(3)?,
                score: r.get(4)?,
                rank: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
