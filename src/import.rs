use std::collections::{HashMap, HashSet};

use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db;
use crate::timetable::{normalize, parse_class_label, ClassLesson};

/// Per-entity directives confirmed by the reviewer. The IPC boundary
/// decodes the wire payload into these before the executor runs.
#[derive(Debug, Clone)]
pub enum ClassDecision {
    Create,
    Link(String),
}

#[derive(Debug, Clone)]
pub enum RoomDecision {
    Create { name: Option<String> },
    Link(String),
}

#[derive(Debug, Clone)]
pub enum TeacherDecision {
    Create {
        first_name: Option<String>,
        last_name: Option<String>,
    },
    Link(String),
    Skip,
}

#[derive(Debug, Default)]
pub struct ImportMappings {
    /// Keyed by the excel-side class name as parsed.
    pub classes: HashMap<String, ClassDecision>,
    /// Keyed by the excel-side teacher display name.
    pub teachers: HashMap<String, TeacherDecision>,
    /// Keyed by the excel-side room name.
    pub rooms: HashMap<String, RoomDecision>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub created: i64,
    pub skipped: i64,
    pub errors: Vec<String>,
}

pub const MAX_REPORTED_ERRORS: usize = 20;

enum TeacherTarget {
    Linked(String),
    Skipped,
}

/// Outcome of consulting the confirmed teacher mapping. Only `NotMapped`
/// falls through to the directory surname cache; an explicit skip must not.
enum TeacherResolution {
    Resolved(String),
    ExplicitlySkipped,
    NotMapped,
}

/// Every cache of one import run. Constructed once per execute call and
/// discarded at the end; nothing here outlives the request.
struct ImportContext<'a> {
    conn: &'a Connection,
    class_ids: HashMap<String, String>,
    room_ids: HashMap<String, String>,
    teacher_targets: HashMap<String, TeacherTarget>,
    db_rooms: HashMap<String, String>,
    db_teachers_by_surname: HashMap<String, String>,
    group_pairs: HashMap<String, (String, String)>,
    class_subjects_seen: HashSet<(String, String)>,
    subject_ids: HashMap<String, String>,
}

impl<'a> ImportContext<'a> {
    fn new(conn: &'a Connection, mappings: &ImportMappings) -> anyhow::Result<Self> {
        let mut class_ids = HashMap::new();
        for (excel_name, decision) in &mappings.classes {
            match decision {
                ClassDecision::Link(id) => {
                    class_ids.insert(excel_name.to_lowercase(), id.clone());
                }
                ClassDecision::Create => {
                    // A label that cannot be split into grade digits plus a
                    // letter creates nothing; the rows fall out as skipped.
                    let Some((number, letter)) = parse_class_label(excel_name) else {
                        continue;
                    };
                    let grade_id = db::get_or_create_grade_level(conn, number)?;
                    let class_id = db::get_or_create_class(conn, &grade_id, &letter)?;
                    class_ids.insert(excel_name.to_lowercase(), class_id);
                }
            }
        }

        let mut room_ids = HashMap::new();
        for (excel_name, decision) in &mappings.rooms {
            match decision {
                RoomDecision::Link(id) => {
                    room_ids.insert(normalize(excel_name), id.clone());
                }
                RoomDecision::Create { name } => {
                    let room_name = name
                        .as_deref()
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .unwrap_or(excel_name.trim());
                    let id = db::get_or_create_room(conn, room_name)?;
                    room_ids.insert(normalize(excel_name), id);
                }
            }
        }

        let mut teacher_targets = HashMap::new();
        for (excel_name, decision) in &mappings.teachers {
            match decision {
                TeacherDecision::Link(id) => {
                    teacher_targets.insert(excel_name.clone(), TeacherTarget::Linked(id.clone()));
                }
                TeacherDecision::Skip => {
                    teacher_targets.insert(excel_name.clone(), TeacherTarget::Skipped);
                }
                TeacherDecision::Create {
                    first_name,
                    last_name,
                } => {
                    let mut first = first_name.as_deref().unwrap_or("").trim().to_string();
                    let mut last = last_name.as_deref().unwrap_or("").trim().to_string();
                    if first.is_empty() && last.is_empty() {
                        let mut parts = excel_name.split_whitespace();
                        last = parts.next().unwrap_or(excel_name.as_str()).to_string();
                        first = parts.next().unwrap_or("Н/А").to_string();
                    } else if first.is_empty() {
                        first = "Н/А".to_string();
                    } else if last.is_empty() {
                        last = std::mem::take(&mut first);
                        first = "Н/А".to_string();
                    }
                    let id = db::create_teacher(conn, &last, &first)?;
                    teacher_targets.insert(excel_name.clone(), TeacherTarget::Linked(id));
                }
            }
        }

        // Fallback caches let entities that already existed in the
        // directory (and so were never flagged as missing) resolve without
        // an explicit mapping. Loaded after the creates above so fresh rows
        // are visible too.
        let mut db_rooms = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT id, name FROM rooms")?;
            let rows = stmt.query_map([], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, name) = row?;
                db_rooms.insert(normalize(&name), id);
            }
        }

        let mut db_teachers_by_surname = HashMap::new();
        {
            let mut stmt = conn.prepare("SELECT id, last_name FROM teachers ORDER BY rowid")?;
            let rows = stmt.query_map([], |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (id, last_name) = row?;
                // First match wins for duplicate surnames.
                db_teachers_by_surname
                    .entry(last_name.to_lowercase())
                    .or_insert(id);
            }
        }

        Ok(ImportContext {
            conn,
            class_ids,
            room_ids,
            teacher_targets,
            db_rooms,
            db_teachers_by_surname,
            group_pairs: HashMap::new(),
            class_subjects_seen: HashSet::new(),
            subject_ids: HashMap::new(),
        })
    }

    fn resolve_class(&self, excel_name: &str) -> anyhow::Result<Option<String>> {
        if let Some(id) = self.class_ids.get(&excel_name.to_lowercase()) {
            return Ok(Some(id.clone()));
        }
        // Not in the confirmed mappings; best-effort directory lookup by
        // parsed grade number and letter.
        let Some((number, letter)) = parse_class_label(excel_name) else {
            return Ok(None);
        };
        Ok(self
            .conn
            .query_row(
                "SELECT c.id FROM school_classes c
                 JOIN grade_levels g ON g.id = c.grade_level_id
                 WHERE g.number = ? AND c.letter = ?",
                (number, &letter),
                |r| r.get(0),
            )
            .optional()?)
    }

    fn resolve_room(&self, raw: Option<&str>) -> Option<String> {
        let raw = raw?;
        for part in raw.split(',') {
            let norm = normalize(part);
            if let Some(id) = self.room_ids.get(&norm) {
                return Some(id.clone());
            }
            if let Some(id) = self.db_rooms.get(&norm) {
                return Some(id.clone());
            }
        }
        None
    }

    fn teacher_resolution(&self, excel_name: &str) -> TeacherResolution {
        match self.teacher_targets.get(excel_name) {
            Some(TeacherTarget::Linked(id)) => TeacherResolution::Resolved(id.clone()),
            Some(TeacherTarget::Skipped) => TeacherResolution::ExplicitlySkipped,
            None => TeacherResolution::NotMapped,
        }
    }

    fn resolve_teacher(&self, name: Option<&str>) -> Option<String> {
        let name = name?;
        match self.teacher_resolution(name) {
            TeacherResolution::Resolved(id) => Some(id),
            TeacherResolution::ExplicitlySkipped => None,
            TeacherResolution::NotMapped => {
                let surname = name.split_whitespace().next().unwrap_or("").to_lowercase();
                self.db_teachers_by_surname.get(&surname).cloned()
            }
        }
    }

    fn subject_id(&mut self, name: &str) -> anyhow::Result<String> {
        if let Some(id) = self.subject_ids.get(name) {
            return Ok(id.clone());
        }
        let id = db::get_or_create_subject(self.conn, name)?;
        self.subject_ids.insert(name.to_string(), id.clone());
        Ok(id)
    }

    /// The group pair of a subdivided class, created on first use and
    /// cached for the rest of the run.
    fn class_groups(&mut self, class_id: &str) -> anyhow::Result<(String, String)> {
        if let Some(pair) = self.group_pairs.get(class_id) {
            return Ok(pair.clone());
        }
        let g1 = db::get_or_create_class_group(self.conn, class_id, "Группа 1")?;
        let g2 = db::get_or_create_class_group(self.conn, class_id, "Группа 2")?;
        self.group_pairs
            .insert(class_id.to_string(), (g1.clone(), g2.clone()));
        Ok((g1, g2))
    }

    /// Registers the subject among the class's offered subjects. A UNIQUE
    /// violation means a concurrent identical insert won; anything else is
    /// a real failure.
    fn ensure_class_subject(&mut self, class_id: &str, name: &str) -> anyhow::Result<()> {
        let key = (class_id.to_string(), name.to_lowercase());
        if !self.class_subjects_seen.insert(key) {
            return Ok(());
        }
        match self.conn.execute(
            "INSERT INTO class_subjects(class_id, name) VALUES(?, ?)",
            (class_id, name),
        ) {
            Ok(_) => Ok(()),
            Err(e) if db::is_unique_violation(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn insert_schedule_row(
    conn: &Connection,
    class_id: &str,
    weekday: i64,
    period: i64,
    subject_id: &str,
    teacher_id: Option<&str>,
    room_id: Option<&str>,
    group_id: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schedule_lessons(
            id, class_id, weekday, lesson_number, subject_id, teacher_id, room_id, group_id, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            class_id,
            weekday,
            period,
            subject_id,
            teacher_id,
            room_id,
            group_id,
            chrono::Utc::now().to_rfc3339(),
        ),
    )?;
    Ok(())
}

fn push_error(errors: &mut Vec<String>, message: String) {
    if errors.len() < MAX_REPORTED_ERRORS {
        errors.push(message);
    }
}

/// Materializes schedule rows from the reviewed lesson list. Row-level
/// failures never abort the run: unresolvable classes and blank subjects
/// count as skipped, slot conflicts append a capped error string. The run
/// is deliberately not one top-level transaction; rows committed before a
/// failure stay committed.
pub fn execute_import(
    conn: &Connection,
    lessons: &[ClassLesson],
    mappings: &ImportMappings,
    replace_existing: bool,
) -> anyhow::Result<ImportResult> {
    if replace_existing {
        conn.execute("DELETE FROM schedule_lessons", [])?;
    }

    let mut ctx = ImportContext::new(conn, mappings)?;

    let mut created = 0i64;
    let mut skipped = 0i64;
    let mut errors: Vec<String> = Vec::new();

    for lesson in lessons {
        let Some(class_id) = ctx.resolve_class(&lesson.class_name)? else {
            skipped += 1;
            continue;
        };

        let subject_name = lesson.subject_name.trim();
        if subject_name.is_empty() {
            skipped += 1;
            continue;
        }

        let subject_id = ctx.subject_id(subject_name)?;
        let room_id = ctx.resolve_room(lesson.room_name.as_deref());
        let teacher_id = ctx.resolve_teacher(lesson.teacher_name.as_deref());

        let subject2 = lesson
            .subject2_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let mut group1_id = None;
        let mut group2_id = None;
        if subject2.is_some() {
            let (g1, g2) = ctx.class_groups(&class_id)?;
            group1_id = Some(g1);
            group2_id = Some(g2);
        }

        match insert_schedule_row(
            conn,
            &class_id,
            lesson.weekday,
            lesson.period,
            &subject_id,
            teacher_id.as_deref(),
            room_id.as_deref(),
            group1_id.as_deref(),
        ) {
            Ok(()) => created += 1,
            Err(e) if db::is_unique_violation(&e) => {
                push_error(
                    &mut errors,
                    format!(
                        "{} {}/{} {}: slot already scheduled",
                        lesson.class_name, lesson.weekday, lesson.period, subject_name
                    ),
                );
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        ctx.ensure_class_subject(&class_id, subject_name)?;

        if let (Some(subject2_name), Some(group2_id)) = (subject2, group2_id) {
            let subject2_id = ctx.subject_id(subject2_name)?;
            let room2_id = ctx.resolve_room(lesson.room2_name.as_deref());
            let teacher2_id = ctx.resolve_teacher(lesson.teacher2_name.as_deref());
            match insert_schedule_row(
                conn,
                &class_id,
                lesson.weekday,
                lesson.period,
                &subject2_id,
                teacher2_id.as_deref(),
                room2_id.as_deref(),
                Some(&group2_id),
            ) {
                Ok(()) => created += 1,
                Err(e) if db::is_unique_violation(&e) => {
                    push_error(
                        &mut errors,
                        format!(
                            "{} group2 {}/{}: slot already scheduled",
                            lesson.class_name, lesson.weekday, lesson.period
                        ),
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
            ctx.ensure_class_subject(&class_id, subject2_name)?;
        }
    }

    Ok(ImportResult {
        created,
        skipped,
        errors,
    })
}
