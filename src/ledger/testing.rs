use crate::db;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use uuid::Uuid;

use super::model::Student;

pub fn test_conn() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    db::init_schema(&conn).expect("init schema");
    conn
}

pub fn day(s: &str) -> NaiveDate {
    s.parse().expect("date literal")
}

pub fn at(s: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").expect("timestamp literal")
}

pub fn seed_cycle(conn: &Connection, name: &str, start: &str, end: &str) -> String {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO cycles(id, name, start_date, end_date) VALUES(?, ?, ?, ?)",
        (&id, name, day(start), day(end)),
    )
    .expect("insert cycle");
    id
}

pub fn seed_student(conn: &Connection, code: &str, last: &str, first: &str) -> Student {
    let student = Student {
        id: Uuid::new_v4().to_string(),
        code: code.to_string(),
        first_name: first.to_string(),
        last_name: last.to_string(),
        email: format!("{}@school.test", code.to_ascii_lowercase()),
        phone: None,
        photo_ref: None,
    };
    conn.execute(
        "INSERT INTO students(id, code, first_name, last_name, email) VALUES(?, ?, ?, ?, ?)",
        (
            &student.id,
            &student.code,
            &student.first_name,
            &student.last_name,
            &student.email,
        ),
    )
    .expect("insert student");
    student
}

pub fn enroll_at(conn: &Connection, student_id: &str, cycle_id: &str, registered_at: NaiveDateTime) {
    conn.execute(
        "INSERT INTO enrollments(id, student_id, cycle_id, registered_at) VALUES(?, ?, ?, ?)",
        (Uuid::new_v4().to_string(), student_id, cycle_id, registered_at),
    )
    .expect("insert enrollment");
}

pub fn seed_exam(conn: &Connection, cycle_id: &str, date: &str) -> String {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO exams(id, cycle_id, week, exam_type, date) VALUES(?, ?, 3, 'Weekly', ?)",
        (&id, cycle_id, day(date)),
    )
    .expect("insert exam");
    id
}
