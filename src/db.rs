use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::Path;
use uuid::Uuid;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("school.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_levels(
            id TEXT PRIMARY KEY,
            number INTEGER NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_classes(
            id TEXT PRIMARY KEY,
            grade_level_id TEXT NOT NULL,
            letter TEXT NOT NULL,
            FOREIGN KEY(grade_level_id) REFERENCES grade_levels(id),
            UNIQUE(grade_level_id, letter)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_school_classes_grade ON school_classes(grade_level_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rooms(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            password_sha256 TEXT NOT NULL,
            must_change_password INTEGER NOT NULL DEFAULT 1,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_last_name ON teachers(last_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_groups(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(class_id) REFERENCES school_classes(id),
            UNIQUE(class_id, name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_class_groups_class ON class_groups(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_subjects(
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            PRIMARY KEY(class_id, name),
            FOREIGN KEY(class_id) REFERENCES school_classes(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule_lessons(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            weekday INTEGER NOT NULL,
            lesson_number INTEGER NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT,
            room_id TEXT,
            group_id TEXT,
            created_at TEXT,
            FOREIGN KEY(class_id) REFERENCES school_classes(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(room_id) REFERENCES rooms(id),
            FOREIGN KEY(group_id) REFERENCES class_groups(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_lessons_class ON schedule_lessons(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_lessons_teacher ON schedule_lessons(teacher_id)",
        [],
    )?;
    // A slot is unique per class; grouped lessons share the slot but must
    // differ by group. NULL group rows need their own index because SQLite
    // treats NULLs as distinct in a plain UNIQUE constraint.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_schedule_slot_no_group
         ON schedule_lessons(class_id, weekday, lesson_number)
         WHERE group_id IS NULL",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_schedule_slot_with_group
         ON schedule_lessons(class_id, weekday, lesson_number, group_id)
         WHERE group_id IS NOT NULL",
        [],
    )?;

    Ok(())
}

pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn get_or_create_by_name(conn: &Connection, table: &str, name: &str) -> anyhow::Result<String> {
    let select = format!("SELECT id FROM {} WHERE name = ?", table);
    if let Some(id) = conn
        .query_row(&select, [name], |r| r.get::<_, String>(0))
        .optional()?
    {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    let insert = format!("INSERT INTO {}(id, name) VALUES(?, ?)", table);
    match conn.execute(&insert, (&id, name)) {
        Ok(_) => Ok(id),
        // Lost a race with an identical insert; the row exists now.
        Err(e) if is_unique_violation(&e) => Ok(conn.query_row(&select, [name], |r| r.get(0))?),
        Err(e) => Err(e.into()),
    }
}

pub fn get_or_create_subject(conn: &Connection, name: &str) -> anyhow::Result<String> {
    get_or_create_by_name(conn, "subjects", name)
}

pub fn get_or_create_room(conn: &Connection, name: &str) -> anyhow::Result<String> {
    get_or_create_by_name(conn, "rooms", name)
}

pub fn get_or_create_grade_level(conn: &Connection, number: i64) -> anyhow::Result<String> {
    if let Some(id) = conn
        .query_row(
            "SELECT id FROM grade_levels WHERE number = ?",
            [number],
            |r| r.get::<_, String>(0),
        )
        .optional()?
    {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO grade_levels(id, number) VALUES(?, ?)",
        (&id, number),
    ) {
        Ok(_) => Ok(id),
        Err(e) if is_unique_violation(&e) => Ok(conn.query_row(
            "SELECT id FROM grade_levels WHERE number = ?",
            [number],
            |r| r.get(0),
        )?),
        Err(e) => Err(e.into()),
    }
}

pub fn get_or_create_class(
    conn: &Connection,
    grade_level_id: &str,
    letter: &str,
) -> anyhow::Result<String> {
    if let Some(id) = conn
        .query_row(
            "SELECT id FROM school_classes WHERE grade_level_id = ? AND letter = ?",
            (grade_level_id, letter),
            |r| r.get::<_, String>(0),
        )
        .optional()?
    {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO school_classes(id, grade_level_id, letter) VALUES(?, ?, ?)",
        (&id, grade_level_id, letter),
    ) {
        Ok(_) => Ok(id),
        Err(e) if is_unique_violation(&e) => Ok(conn.query_row(
            "SELECT id FROM school_classes WHERE grade_level_id = ? AND letter = ?",
            (grade_level_id, letter),
            |r| r.get(0),
        )?),
        Err(e) => Err(e.into()),
    }
}

pub fn get_or_create_class_group(
    conn: &Connection,
    class_id: &str,
    name: &str,
) -> anyhow::Result<String> {
    if let Some(id) = conn
        .query_row(
            "SELECT id FROM class_groups WHERE class_id = ? AND name = ?",
            (class_id, name),
            |r| r.get::<_, String>(0),
        )
        .optional()?
    {
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO class_groups(id, class_id, name) VALUES(?, ?, ?)",
        (&id, class_id, name),
    ) {
        Ok(_) => Ok(id),
        Err(e) if is_unique_violation(&e) => Ok(conn.query_row(
            "SELECT id FROM class_groups WHERE class_id = ? AND name = ?",
            (class_id, name),
            |r| r.get(0),
        )?),
        Err(e) => Err(e.into()),
    }
}

/// Creates a teacher account with a generated one-time password. The
/// cleartext is never stored; only its SHA-256 digest lands in the row, and
/// `must_change_password` forces a reset on first login.
pub fn create_teacher(
    conn: &Connection,
    last_name: &str,
    first_name: &str,
) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    let password = Uuid::new_v4().simple().to_string();
    let digest = format!("{:x}", Sha256::digest(password.as_bytes()));
    conn.execute(
        "INSERT INTO teachers(id, last_name, first_name, password_sha256, must_change_password, created_at)
         VALUES(?, ?, ?, ?, 1, ?)",
        (
            &id,
            last_name,
            first_name,
            &digest,
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(id)
}
