use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use serde::{Deserialize, Serialize};

/// One cell of the class-centric timetable, normalized. `subject2_name` is
/// only set for a genuine group split (two parallel lessons in one slot);
/// teacher names stay empty until `reconcile::match_teachers` runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassLesson {
    pub class_name: String,
    pub weekday: i64,
    pub period: i64,
    pub subject_name: String,
    #[serde(default)]
    pub subject2_name: Option<String>,
    #[serde(default)]
    pub room_name: Option<String>,
    #[serde(default)]
    pub room2_name: Option<String>,
    #[serde(default)]
    pub teacher_name: Option<String>,
    #[serde(default)]
    pub teacher2_name: Option<String>,
}

/// One cell of the teacher-centric timetable. The room may be a
/// comma-joined pair when the teacher covers two groups at once.
#[derive(Debug, Clone)]
pub struct TeacherLesson {
    pub teacher_name: String,
    pub weekday: i64,
    pub period: i64,
    pub subject_name: String,
    pub room_name: Option<String>,
}

pub struct TeacherSheet {
    pub lessons: Vec<TeacherLesson>,
    /// Distinct teacher display names from the header, in column order.
    pub teacher_names: Vec<String>,
}

// Header token marking the room column of the preceding class/teacher block.
const ROOM_MARKER: &str = "каб";

pub fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn weekday_of(label: &str) -> Option<i64> {
    match label {
        "понедельник" => Some(1),
        "вторник" => Some(2),
        "среда" => Some(3),
        "четверг" => Some(4),
        "пятница" => Some(5),
        _ => None,
    }
}

/// Parses '5а' or '11 Б' into (grade number, uppercased letter).
pub fn parse_class_label(raw: &str) -> Option<(i64, String)> {
    let raw = raw.trim();
    let digits: String = raw.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    let number = digits.parse::<i64>().ok()?;
    let letter = raw[digits.len()..].trim().to_uppercase();
    Some((number, letter))
}

fn cell_to_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.trim().to_string(),
        // Period cells come back as floats; render 1.0 as "1" so they
        // survive integer parsing.
        Data::Float(f) => {
            if (f.floor() - f).abs() < f64::EPSILON {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::Empty | Data::Error(_) => String::new(),
        Data::DateTime(s) => s.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

/// Reads the first worksheet into a dense grid at absolute coordinates
/// (row 0 = spreadsheet row 1), padding any leading unused rows/columns so
/// layout detection can index columns the way the sheet shows them.
fn read_first_sheet(bytes: &[u8]) -> anyhow::Result<Vec<Vec<String>>> {
    let mut workbook = Xlsx::new(Cursor::new(bytes))?;
    let Some(range) = workbook.worksheet_range_at(0) else {
        anyhow::bail!("workbook has no sheets");
    };
    let range = range?;
    let Some((start_row, start_col)) = range.start() else {
        return Ok(Vec::new());
    };
    let width = start_col as usize + range.width();
    let mut grid = vec![vec![String::new(); width]; start_row as usize + range.height()];
    for (r, row) in range.rows().enumerate() {
        for (c, cell) in row.iter().enumerate() {
            grid[start_row as usize + r][start_col as usize + c] = cell_to_string(cell);
        }
    }
    Ok(grid)
}

struct ClassColumns {
    name: String,
    subj_col: usize,
    subj2_col: Option<usize>,
    room_col: usize,
}

struct TeacherColumns {
    name: String,
    subj_col: usize,
    room_col: usize,
}

fn cell<'a>(row: &'a [String], idx: usize) -> &'a str {
    row.get(idx).map(String::as_str).unwrap_or("")
}

fn is_room_marker(row: &[String], idx: usize) -> bool {
    normalize(cell(row, idx)) == ROOM_MARKER
}

/// Scans the header for per-class blocks. A populated cell followed by
/// "каб" is a 2-wide block (subject, room); followed by a gap and then
/// "каб" it is a 3-wide block (subject A, subject B, room).
fn detect_class_columns(header: &[String]) -> Vec<ClassColumns> {
    let mut cols = Vec::new();
    let mut i = 2; // col 0 = weekday, col 1 = period
    while i < header.len() {
        let val = cell(header, i);
        if val.is_empty() || normalize(val) == ROOM_MARKER {
            i += 1;
            continue;
        }
        if !cell(header, i + 1).is_empty() && is_room_marker(header, i + 1) {
            cols.push(ClassColumns {
                name: val.to_string(),
                subj_col: i,
                subj2_col: None,
                room_col: i + 1,
            });
            i += 2;
        } else if cell(header, i + 1).is_empty()
            && !cell(header, i + 2).is_empty()
            && is_room_marker(header, i + 2)
        {
            cols.push(ClassColumns {
                name: val.to_string(),
                subj_col: i,
                subj2_col: Some(i + 1),
                room_col: i + 2,
            });
            i += 3;
        } else {
            i += 1;
        }
    }
    cols
}

fn detect_teacher_columns(header: &[String]) -> Vec<TeacherColumns> {
    let mut cols = Vec::new();
    let mut i = 2;
    while i < header.len() {
        let val = cell(header, i);
        if val.is_empty() || normalize(val) == ROOM_MARKER {
            i += 1;
            continue;
        }
        if !cell(header, i + 1).is_empty() && is_room_marker(header, i + 1) {
            cols.push(TeacherColumns {
                name: val.to_string(),
                subj_col: i,
                room_col: i + 1,
            });
            i += 2;
        } else {
            i += 1;
        }
    }
    cols
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Walks day/period rows, yielding (weekday, period, row) for rows that
/// carry a parseable period under an already-seen day label. Rows before
/// the first day label and rows with stray non-numeric period cells are
/// spreadsheet noise, dropped without error.
fn day_period_rows(grid: &[Vec<String>]) -> Vec<(i64, i64, &Vec<String>)> {
    let mut out = Vec::new();
    let mut current_day: Option<i64> = None;
    for row in grid.iter().skip(1) {
        if let Some(day) = weekday_of(&normalize(cell(row, 0))) {
            current_day = Some(day);
        }
        let Some(day) = current_day else {
            continue;
        };
        let Ok(period) = cell(row, 1).trim().parse::<i64>() else {
            continue;
        };
        out.push((day, period, row));
    }
    out
}

pub fn extract_class_lessons(grid: &[Vec<String>]) -> Vec<ClassLesson> {
    let Some(header) = grid.first() else {
        return Vec::new();
    };
    let class_cols = detect_class_columns(header);

    let mut lessons = Vec::new();
    for (weekday, period, row) in day_period_rows(grid) {
        for cls in &class_cols {
            let Some(subject) = non_empty(cell(row, cls.subj_col)) else {
                continue;
            };
            let mut subject2 = cls.subj2_col.and_then(|c| non_empty(cell(row, c)));
            // Same subject in both group cells means the class is not split.
            if subject2
                .as_deref()
                .is_some_and(|s2| normalize(s2) == normalize(&subject))
            {
                subject2 = None;
            }

            let room = non_empty(cell(row, cls.room_col));
            let mut room1 = room.clone();
            let mut room2 = None;
            if subject2.is_some() {
                if let Some(raw) = room.as_deref() {
                    if let Some((a, b)) = raw.split_once(',') {
                        room1 = non_empty(a);
                        room2 = non_empty(b);
                    }
                }
            }

            lessons.push(ClassLesson {
                class_name: cls.name.clone(),
                weekday,
                period,
                subject_name: subject,
                subject2_name: subject2,
                room_name: room1,
                room2_name: room2,
                teacher_name: None,
                teacher2_name: None,
            });
        }
    }
    lessons
}

pub fn extract_teacher_lessons(grid: &[Vec<String>]) -> TeacherSheet {
    let Some(header) = grid.first() else {
        return TeacherSheet {
            lessons: Vec::new(),
            teacher_names: Vec::new(),
        };
    };
    let teacher_cols = detect_teacher_columns(header);
    let teacher_names = teacher_cols.iter().map(|t| t.name.clone()).collect();

    let mut lessons = Vec::new();
    for (weekday, period, row) in day_period_rows(grid) {
        for t in &teacher_cols {
            let Some(subject) = non_empty(cell(row, t.subj_col)) else {
                continue;
            };
            lessons.push(TeacherLesson {
                teacher_name: t.name.clone(),
                weekday,
                period,
                subject_name: subject,
                room_name: non_empty(cell(row, t.room_col)),
            });
        }
    }
    TeacherSheet {
        lessons,
        teacher_names,
    }
}

pub fn parse_classes_file(bytes: &[u8]) -> anyhow::Result<Vec<ClassLesson>> {
    Ok(extract_class_lessons(&read_first_sheet(bytes)?))
}

pub fn parse_teachers_file(bytes: &[u8]) -> anyhow::Result<TeacherSheet> {
    Ok(extract_teacher_lessons(&read_first_sheet(bytes)?))
}
