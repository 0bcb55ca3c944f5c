use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "ledger.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cycles(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            CHECK(end_date >= start_date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cycles_range ON cycles(start_date, end_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            cycle_id TEXT NOT NULL,
            name TEXT NOT NULL,
            teacher TEXT NOT NULL,
            FOREIGN KEY(cycle_id) REFERENCES cycles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_cycle ON courses(cycle_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_schedules(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            weekday TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_schedules_course ON course_schedules(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_materials(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            week INTEGER NOT NULL,
            name TEXT NOT NULL,
            file_url TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            UNIQUE(course_id, week)
        )",
        [],
    )?;
    // Older workspaces predate the drive link column.
    ensure_course_materials_drive_url(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            code TEXT NOT NULL UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            phone TEXT,
            photo_ref TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    // UNIQUE(student_id, cycle_id) backs the enrollment manager's in-memory
    // checks; violations surface as Conflict.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            cycle_id TEXT NOT NULL,
            registered_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(cycle_id) REFERENCES cycles(id),
            UNIQUE(student_id, cycle_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_cycle ON enrollments(cycle_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_student_registered
         ON enrollments(student_id, registered_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            cycle_id TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            day TEXT NOT NULL,
            status TEXT NOT NULL,
            notes TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(cycle_id) REFERENCES cycles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_cycle_day ON attendance(cycle_id, day)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student_day
         ON attendance(student_id, cycle_id, day)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS exams(
            id TEXT PRIMARY KEY,
            cycle_id TEXT NOT NULL,
            week INTEGER NOT NULL,
            exam_type TEXT NOT NULL,
            date TEXT NOT NULL,
            question_count INTEGER,
            FOREIGN KEY(cycle_id) REFERENCES cycles(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_exams_cycle ON exams(cycle_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            id TEXT PRIMARY KEY,
            exam_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            score REAL NOT NULL,
            rank INTEGER NOT NULL,
            FOREIGN KEY(exam_id) REFERENCES exams(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(exam_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_exam_rank ON grades(exam_id, rank)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_student ON grades(student_id)",
        [],
    )?;

    Ok(())
}

fn ensure_course_materials_drive_url(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "course_materials", "drive_url")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE course_materials ADD COLUMN drive_url TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
