use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub(crate) const CYCLE_COLUMNS: &str = "id, name, start_date, end_date";
pub(crate) const STUDENT_COLUMNS: &str =
    "id, code, first_name, last_name, email, phone, photo_ref";
pub(crate) const ENROLLMENT_COLUMNS: &str = "id, student_id, cycle_id, registered_at";
pub(crate) const ATTENDANCE_COLUMNS: &str = "id, student_id, cycle_id, recorded_at, status, notes";
pub(crate) const EXAM_COLUMNS: &str = "id, cycle_id, week, exam_type, date, question_count";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Cycle {
    pub(crate) fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            name: r.get(1)?,
            start_date: r.get(2)?,
            end_date: r.get(3)?,
        })
    }

    /// Both ends are inclusive.
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn overlaps(&self, other: &Cycle) -> bool {
        self.start_date <= other.end_date && other.start_date <= self.end_date
    }

    /// Length rounded to 30-day months, as shown in cycle listings.
    pub fn duration_months(&self) -> i64 {
        let days = (self.end_date - self.start_date).num_days();
        (days as f64 / 30.0).round() as i64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub code: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub photo_ref: Option<String>,
}

impl Student {
    pub(crate) fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            code: r.get(1)?,
            first_name: r.get(2)?,
            last_name: r.get(3)?,
            email: r.get(4)?,
            phone: r.get(5)?,
            photo_ref: r.get(6)?,
        })
    }

    pub fn display_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrollment {
    pub id: String,
    pub student_id: String,
    pub cycle_id: String,
    pub registered_at: NaiveDateTime,
}

impl Enrollment {
    pub(crate) fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            student_id: r.get(1)?,
            cycle_id: r.get(2)?,
            registered_at: r.get(3)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    Present,
    Late,
    Absent,
    Disabled,
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Late => "Late",
            Self::Absent => "Absent",
            Self::Disabled => "Disabled",
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Present" => Ok(Self::Present),
            "Late" => Ok(Self::Late),
            "Absent" => Ok(Self::Absent),
            "Disabled" => Ok(Self::Disabled),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

impl ToSql for AttendanceStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AttendanceStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub cycle_id: String,
    pub recorded_at: NaiveDateTime,
    pub status: AttendanceStatus,
    pub notes: Option<String>,
}

impl AttendanceRecord {
    pub(crate) fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            student_id: r.get(1)?,
            cycle_id: r.get(2)?,
            recorded_at: r.get(3)?,
            status: r.get(4)?,
            notes: r.get(5)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: String,
    pub cycle_id: String,
    pub week: i64,
    pub exam_type: String,
    pub date: NaiveDate,
    pub question_count: Option<i64>,
}

impl Exam {
    pub(crate) fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: r.get(0)?,
            cycle_id: r.get(1)?,
            week: r.get(2)?,
            exam_type: r.get(3)?,
            date: r.get(4)?,
            question_count: r.get(5)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Grade {
    pub exam_id: String,
    pub student_id: String,
    pub student_code: String,
    pub score: f64,
    pub rank: i64,
}
