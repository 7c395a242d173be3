use std::collections::{BTreeMap, BTreeSet, HashMap};

use rusqlite::Connection;
use serde::Serialize;

use crate::timetable::{normalize, ClassLesson, TeacherLesson};

/// Fills `teacher_name`/`teacher2_name` on the class lessons by joining
/// against the teacher timetable on (weekday, period, room fragment).
/// First writer wins on duplicate keys: when two teachers share a
/// multi-room cell with inconsistent data the earlier column keeps the slot.
pub fn match_teachers(class_lessons: &mut [ClassLesson], teacher_lessons: &[TeacherLesson]) {
    let mut index: HashMap<(i64, i64, String), &str> = HashMap::new();
    for tl in teacher_lessons {
        let Some(room) = tl.room_name.as_deref() else {
            continue;
        };
        for part in room.split(',') {
            index
                .entry((tl.weekday, tl.period, normalize(part)))
                .or_insert(tl.teacher_name.as_str());
        }
    }

    for lesson in class_lessons.iter_mut() {
        if let Some(room) = lesson.room_name.clone() {
            for part in room.split(',') {
                if let Some(name) = index.get(&(lesson.weekday, lesson.period, normalize(part))) {
                    lesson.teacher_name = Some(name.to_string());
                    break;
                }
            }
        }
        // The secondary room is already a single peeled-off segment.
        if let Some(room2) = lesson.room2_name.clone() {
            if let Some(name) = index.get(&(lesson.weekday, lesson.period, normalize(&room2))) {
                lesson.teacher2_name = Some(name.to_string());
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingTeacher {
    pub name: String,
    pub similar: Vec<DirectoryEntry>,
}

/// Result of diffing the parsed timetable against the persisted directory.
/// Purely descriptive; the human-reviewed mapping step consumes it.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeReport {
    pub missing_classes: Vec<String>,
    pub missing_teachers: Vec<MissingTeacher>,
    pub missing_rooms: Vec<String>,
    pub db_classes: Vec<DirectoryEntry>,
    pub db_teachers: Vec<DirectoryEntry>,
    pub db_rooms: Vec<DirectoryEntry>,
}

fn class_key(number: i64, letter: &str) -> String {
    format!("{}{}", number, letter.to_lowercase())
}

fn surname_of(display_name: &str) -> String {
    display_name
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase()
}

/// Shared-prefix surname heuristic: catches transliteration/typo variants
/// ("Смирнова" vs "Смирнов") for human confirmation. Not edit distance.
fn surnames_similar(a: &str, b: &str) -> bool {
    let min_len = a.chars().count().min(b.chars().count()).min(4);
    min_len >= 2 && a.chars().take(min_len).eq(b.chars().take(min_len))
}

pub fn analyze(
    conn: &Connection,
    class_lessons: &[ClassLesson],
    teacher_header_names: &[String],
) -> anyhow::Result<AnalyzeReport> {
    let excel_classes: BTreeSet<&str> = class_lessons
        .iter()
        .map(|l| l.class_name.as_str())
        .collect();

    let mut excel_rooms = BTreeSet::new();
    for l in class_lessons {
        for raw in [l.room_name.as_deref(), l.room2_name.as_deref()]
            .into_iter()
            .flatten()
        {
            for part in raw.split(',') {
                let part = part.trim();
                if !part.is_empty() {
                    excel_rooms.insert(part.to_string());
                }
            }
        }
    }

    // Teacher identity comes from the teacher-timetable header plus
    // whatever the matcher attached, independent of room-match success.
    let mut excel_teachers: BTreeSet<String> = teacher_header_names.iter().cloned().collect();
    for l in class_lessons {
        if let Some(t) = &l.teacher_name {
            excel_teachers.insert(t.clone());
        }
        if let Some(t) = &l.teacher2_name {
            excel_teachers.insert(t.clone());
        }
    }

    let mut db_classes = Vec::new();
    let mut class_index: HashMap<String, String> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT c.id, g.number, c.letter
             FROM school_classes c
             JOIN grade_levels g ON g.id = c.grade_level_id
             ORDER BY g.number, c.letter",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (id, number, letter) = row?;
            class_index.insert(class_key(number, &letter), id.clone());
            db_classes.push(DirectoryEntry {
                id,
                name: format!("{}-{}", number, letter),
            });
        }
    }

    let mut db_teachers = Vec::new();
    let mut teachers_by_surname: BTreeMap<String, Vec<DirectoryEntry>> = BTreeMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT id, last_name, first_name FROM teachers ORDER BY last_name, first_name",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (id, last, first) = row?;
            let entry = DirectoryEntry {
                id,
                name: format!("{} {}", last, first),
            };
            teachers_by_surname
                .entry(last.to_lowercase())
                .or_default()
                .push(entry.clone());
            db_teachers.push(entry);
        }
    }

    let mut db_rooms = Vec::new();
    let mut room_index: BTreeSet<String> = BTreeSet::new();
    {
        let mut stmt = conn.prepare("SELECT id, name FROM rooms ORDER BY name")?;
        let rows = stmt.query_map([], |r| {
            Ok(DirectoryEntry {
                id: r.get(0)?,
                name: r.get(1)?,
            })
        })?;
        for row in rows {
            let entry = row?;
            room_index.insert(normalize(&entry.name));
            db_rooms.push(entry);
        }
    }

    let missing_classes: Vec<String> = excel_classes
        .iter()
        .filter(|name| {
            let normalized: String = name
                .to_lowercase()
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect();
            !class_index.contains_key(&normalized)
        })
        .map(|s| s.to_string())
        .collect();

    let mut missing_teachers = Vec::new();
    for name in &excel_teachers {
        let excel_surname = surname_of(name);
        if teachers_by_surname.contains_key(&excel_surname) {
            continue;
        }
        let mut similar = Vec::new();
        for (db_surname, entries) in &teachers_by_surname {
            if surnames_similar(&excel_surname, db_surname) {
                similar.extend(entries.iter().cloned());
            }
        }
        missing_teachers.push(MissingTeacher {
            name: name.clone(),
            similar,
        });
    }

    let missing_rooms: Vec<String> = excel_rooms
        .iter()
        .filter(|name| !room_index.contains(&normalize(name)))
        .cloned()
        .collect();

    Ok(AnalyzeReport {
        missing_classes,
        missing_teachers,
        missing_rooms,
        db_classes,
        db_teachers,
        db_rooms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn lesson(weekday: i64, period: i64, room: Option<&str>, room2: Option<&str>) -> ClassLesson {
        ClassLesson {
            class_name: "5А".to_string(),
            weekday,
            period,
            subject_name: "Математика".to_string(),
            subject2_name: None,
            room_name: room.map(|s| s.to_string()),
            room2_name: room2.map(|s| s.to_string()),
            teacher_name: None,
            teacher2_name: None,
        }
    }

    fn teacher_lesson(name: &str, weekday: i64, period: i64, room: Option<&str>) -> TeacherLesson {
        TeacherLesson {
            teacher_name: name.to_string(),
            weekday,
            period,
            subject_name: "Математика".to_string(),
            room_name: room.map(|s| s.to_string()),
        }
    }

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn matcher_assigns_teacher_by_room_and_slot() {
        let mut lessons = vec![lesson(1, 1, Some("201"), None)];
        let teachers = vec![teacher_lesson("Иванова А.П.", 1, 1, Some("201"))];
        match_teachers(&mut lessons, &teachers);
        assert_eq!(lessons[0].teacher_name.as_deref(), Some("Иванова А.П."));
        assert!(lessons[0].teacher2_name.is_none());
    }

    #[test]
    fn matcher_first_writer_wins_on_duplicate_fragments() {
        let mut lessons = vec![lesson(1, 1, Some("201"), None)];
        let teachers = vec![
            teacher_lesson("Иванова А.П.", 1, 1, Some("201, 202")),
            teacher_lesson("Петров С.С.", 1, 1, Some("201")),
        ];
        match_teachers(&mut lessons, &teachers);
        assert_eq!(lessons[0].teacher_name.as_deref(), Some("Иванова А.П."));
    }

    #[test]
    fn matcher_takes_first_fragment_hit_in_split_order() {
        let mut lessons = vec![lesson(2, 3, Some("каб. 10, 11"), None)];
        let teachers = vec![
            teacher_lesson("Сидорова Е.В.", 2, 3, Some("11")),
            teacher_lesson("Иванова А.П.", 2, 3, Some("КАБ. 10")),
        ];
        match_teachers(&mut lessons, &teachers);
        // "каб. 10" is the first fragment of the class-side room.
        assert_eq!(lessons[0].teacher_name.as_deref(), Some("Иванова А.П."));
    }

    #[test]
    fn matcher_resolves_secondary_room_without_splitting() {
        let mut lessons = vec![lesson(1, 2, Some("303"), Some("103"))];
        let teachers = vec![
            teacher_lesson("Иванова А.П.", 1, 2, Some("303")),
            teacher_lesson("Петров С.С.", 1, 2, Some("103")),
        ];
        match_teachers(&mut lessons, &teachers);
        assert_eq!(lessons[0].teacher_name.as_deref(), Some("Иванова А.П."));
        assert_eq!(lessons[0].teacher2_name.as_deref(), Some("Петров С.С."));
    }

    #[test]
    fn matcher_ignores_slots_from_other_periods() {
        let mut lessons = vec![lesson(1, 1, Some("201"), None)];
        let teachers = vec![teacher_lesson("Иванова А.П.", 1, 2, Some("201"))];
        match_teachers(&mut lessons, &teachers);
        assert!(lessons[0].teacher_name.is_none());
    }

    #[test]
    fn analyze_reports_missing_entities_against_empty_directory() {
        let conn = test_conn();
        let lessons = vec![lesson(1, 1, Some("201"), None)];
        let report = analyze(&conn, &lessons, &[]).expect("analyze");
        assert_eq!(report.missing_classes, vec!["5А"]);
        assert_eq!(report.missing_rooms, vec!["201"]);
        assert!(report.missing_teachers.is_empty());
        assert!(report.db_classes.is_empty());
    }

    #[test]
    fn analyze_matches_class_by_normalized_grade_and_letter() {
        let conn = test_conn();
        let grade = db::get_or_create_grade_level(&conn, 5).unwrap();
        db::get_or_create_class(&conn, &grade, "А").unwrap();
        let lessons = vec![lesson(1, 1, None, None)];
        let report = analyze(&conn, &lessons, &[]).expect("analyze");
        assert!(report.missing_classes.is_empty());
        assert_eq!(report.db_classes.len(), 1);
        assert_eq!(report.db_classes[0].name, "5-А");
    }

    #[test]
    fn analyze_splits_comma_joined_rooms() {
        let conn = test_conn();
        db::get_or_create_room(&conn, "303").unwrap();
        let mut l = lesson(1, 1, Some("303, 103"), None);
        l.subject2_name = Some("Труд 2".to_string());
        let report = analyze(&conn, &[l], &[]).expect("analyze");
        assert_eq!(report.missing_rooms, vec!["103"]);
    }

    #[test]
    fn analyze_suggests_surname_prefix_matches() {
        let conn = test_conn();
        db::create_teacher(&conn, "Смирнов", "Виктор").unwrap();
        db::create_teacher(&conn, "Кузнецова", "Анна").unwrap();
        let report = analyze(
            &conn,
            &[],
            &["Смирнова Е.В.".to_string(), "Петров С.С.".to_string()],
        )
        .expect("analyze");

        assert_eq!(report.missing_teachers.len(), 2);
        let smirnova = report
            .missing_teachers
            .iter()
            .find(|t| t.name == "Смирнова Е.В.")
            .expect("smirnova reported");
        assert_eq!(smirnova.similar.len(), 1);
        assert_eq!(smirnova.similar[0].name, "Смирнов Виктор");

        let petrov = report
            .missing_teachers
            .iter()
            .find(|t| t.name == "Петров С.С.")
            .expect("petrov reported");
        assert!(petrov.similar.is_empty());
    }

    #[test]
    fn analyze_accepts_exact_surname_match() {
        let conn = test_conn();
        db::create_teacher(&conn, "Иванова", "Анна").unwrap();
        let report = analyze(&conn, &[], &["Иванова А.П.".to_string()]).expect("analyze");
        assert!(report.missing_teachers.is_empty());
        assert_eq!(report.db_teachers.len(), 1);
        assert_eq!(report.db_teachers[0].name, "Иванова Анна");
    }

    #[test]
    fn analyze_includes_matched_teacher_names_from_lessons() {
        let conn = test_conn();
        let mut l = lesson(1, 1, Some("201"), None);
        l.teacher_name = Some("Новикова И.И.".to_string());
        let report = analyze(&conn, &[l], &[]).expect("analyze");
        assert_eq!(report.missing_teachers.len(), 1);
        assert_eq!(report.missing_teachers[0].name, "Новикова И.И.");
    }
}
