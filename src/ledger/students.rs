//! Student records. The code is assigned once and never changes.

use super::directory;
use super::error::{is_unique_violation, Conflict, LedgerError, LedgerResult};
use super::model::{Student, STUDENT_COLUMNS};
use super::{non_blank, require_non_blank};
use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStudent {
    pub code: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub photo_ref: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentPatch {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub photo_ref: Option<String>,
}

fn email_owner(conn: &Connection, email: &str) -> LedgerResult<Option<String>> {
    Ok(conn
        .query_row("SELECT code FROM students WHERE email = ?", [email], |r| {
            r.get(0)
        })
        .optional()?)
}

fn duplicate(entity: &'static str, key: &str) -> LedgerError {
    Conflict::Duplicate {
        entity,
        key: key.to_string(),
    }
    .into()
}

/// Registers a student. A missing photo falls back to `photo_placeholder`.
pub fn create_student(
    conn: &Connection,
    new: NewStudent,
    photo_placeholder: &str,
    now: NaiveDateTime,
) -> LedgerResult<Student> {
    let code = require_non_blank(&new.code, "code")?;
    let email = require_non_blank(&new.email, "email")?;
    if !email.contains('@') {
        return Err(LedgerError::InvalidInput(format!("invalid email: {email}")));
    }
    let student = Student {
        id: Uuid::new_v4().to_string(),
        code: code.to_string(),
        first_name: require_non_blank(&new.first_name, "firstName")?.to_string(),
        last_name: require_non_blank(&new.last_name, "lastName")?.to_string(),
        email: email.to_string(),
        phone: non_blank(new.phone),
        photo_ref: Some(non_blank(new.photo_ref).unwrap_or_else(|| photo_placeholder.to_string())),
    };

    let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE code = ?");
    if conn
        .query_row(&sql, [&student.code], Student::from_row)
        .optional()?
        .is_some()
    {
        return Err(duplicate("student code", &student.code));
    }
    if email_owner(conn, &student.email)?.is_some() {
        return Err(duplicate("student email", &student.email));
    }

    conn.execute(
        "INSERT INTO students(id, code, first_name, last_name, email, phone, photo_ref, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student.id,
            &student.code,
            &student.first_name,
            &student.last_name,
            &student.email,
            &student.phone,
            &student.photo_ref,
            now,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            duplicate("student", &student.code)
        } else {
            e.into()
        }
    })?;
    tracing::info!(student = %student.code, "registered student");
    Ok(student)
}

pub fn update_student(
    conn: &Connection,
    code: &str,
    patch: StudentPatch,
    now: NaiveDateTime,
) -> LedgerResult<Student> {
    let current = directory::find_student_by_code(conn, require_non_blank(code, "code")?)?;
    let email = match non_blank(patch.email) {
        Some(email) if email != current.email => {
            if !email.contains('@') {
                return Err(LedgerError::InvalidInput(format!("invalid email: {email}")));
            }
            if email_owner(conn, &email)?.is_some() {
                return Err(duplicate("student email", &email));
            }
            email
        }
        _ => current.email.clone(),
    };
    let student = Student {
        first_name: non_blank(patch.first_name).unwrap_or(current.first_name),
        last_name: non_blank(patch.last_name).unwrap_or(current.last_name),
        email,
        phone: non_blank(patch.phone).or(current.phone),
        photo_ref: non_blank(patch.photo_ref).or(current.photo_ref),
        ..current
    };
    conn.execute(
        "UPDATE students
         SET first_name = ?, last_name = ?, email = ?, phone = ?, photo_ref = ?, updated_at = ?
         WHERE id = ?",
        (
            &student.first_name,
            &student.last_name,
            &student.email,
            &student.phone,
            &student.photo_ref,
            now,
            &student.id,
        ),
    )?;
    tracing::info!(student = %student.code, "updated student");
    Ok(student)
}
