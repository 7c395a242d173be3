use std::collections::HashMap;

use serde_json::{json, Value};

use crate::import::{
    execute_import, ClassDecision, ImportMappings, RoomDecision, TeacherDecision,
};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::reconcile;
use crate::timetable::{self, ClassLesson};

fn get_required_str(params: &Value, key: &str) -> Result<String, String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing {}", key))
}

/// Decodes the wire mapping payloads into typed decisions. The UI sends a
/// bare id string to link, `null` to create, or a tagged object; everything
/// is resolved here so the executor only ever sees the typed form.
fn parse_class_mappings(v: Option<&Value>) -> Result<HashMap<String, ClassDecision>, String> {
    let mut out = HashMap::new();
    let Some(v) = v else {
        return Ok(out);
    };
    let Some(obj) = v.as_object() else {
        return Err("classMappings must be an object".to_string());
    };
    for (excel_name, val) in obj {
        let decision = if val.is_null() {
            ClassDecision::Create
        } else if let Some(id) = val.as_str() {
            ClassDecision::Link(id.to_string())
        } else {
            return Err(format!(
                "classMappings[{}] must be null or an id string",
                excel_name
            ));
        };
        out.insert(excel_name.clone(), decision);
    }
    Ok(out)
}

fn parse_room_mappings(v: Option<&Value>) -> Result<HashMap<String, RoomDecision>, String> {
    let mut out = HashMap::new();
    let Some(v) = v else {
        return Ok(out);
    };
    let Some(obj) = v.as_object() else {
        return Err("roomMappings must be an object".to_string());
    };
    for (excel_name, val) in obj {
        let decision = if val.is_null() {
            RoomDecision::Create { name: None }
        } else if let Some(id) = val.as_str() {
            RoomDecision::Link(id.to_string())
        } else if let Some(mapping) = val.as_object() {
            match mapping.get("action").and_then(|a| a.as_str()) {
                Some("create") => RoomDecision::Create {
                    name: mapping
                        .get("name")
                        .and_then(|n| n.as_str())
                        .map(|s| s.to_string())
                        .filter(|s| !s.trim().is_empty()),
                },
                Some("link") => {
                    let Some(id) = mapping.get("id").and_then(|i| i.as_str()) else {
                        return Err(format!("roomMappings[{}] link needs an id", excel_name));
                    };
                    RoomDecision::Link(id.to_string())
                }
                _ => {
                    return Err(format!(
                        "roomMappings[{}] action must be create or link",
                        excel_name
                    ))
                }
            }
        } else {
            return Err(format!(
                "roomMappings[{}] must be null, an id string or an action object",
                excel_name
            ));
        };
        out.insert(excel_name.clone(), decision);
    }
    Ok(out)
}

fn parse_teacher_mappings(v: Option<&Value>) -> Result<HashMap<String, TeacherDecision>, String> {
    let mut out = HashMap::new();
    let Some(v) = v else {
        return Ok(out);
    };
    let Some(obj) = v.as_object() else {
        return Err("teacherMappings must be an object".to_string());
    };
    for (excel_name, val) in obj {
        let Some(mapping) = val.as_object() else {
            return Err(format!("teacherMappings[{}] must be an object", excel_name));
        };
        let decision = match mapping.get("action").and_then(|a| a.as_str()) {
            Some("create") => TeacherDecision::Create {
                first_name: mapping
                    .get("firstName")
                    .and_then(|n| n.as_str())
                    .map(|s| s.to_string()),
                last_name: mapping
                    .get("lastName")
                    .and_then(|n| n.as_str())
                    .map(|s| s.to_string()),
            },
            // A link without an id means "no teacher", same as skip.
            Some("link") => match mapping.get("id").and_then(|i| i.as_str()) {
                Some(id) => TeacherDecision::Link(id.to_string()),
                None => TeacherDecision::Skip,
            },
            _ => TeacherDecision::Skip,
        };
        out.insert(excel_name.clone(), decision);
    }
    Ok(out)
}

fn handle_import_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let classes_path = match get_required_str(&req.params, "classesPath") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let teachers_path = match get_required_str(&req.params, "teachersPath") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };

    let classes_bytes = match std::fs::read(&classes_path) {
        Ok(b) => b,
        Err(e) => {
            return err(
                &req.id,
                "parse_failed",
                e.to_string(),
                Some(json!({ "path": classes_path })),
            )
        }
    };
    let teachers_bytes = match std::fs::read(&teachers_path) {
        Ok(b) => b,
        Err(e) => {
            return err(
                &req.id,
                "parse_failed",
                e.to_string(),
                Some(json!({ "path": teachers_path })),
            )
        }
    };

    let mut class_lessons = match timetable::parse_classes_file(&classes_bytes) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "parse_failed",
                e.to_string(),
                Some(json!({ "path": classes_path })),
            )
        }
    };
    let teacher_sheet = match timetable::parse_teachers_file(&teachers_bytes) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "parse_failed",
                e.to_string(),
                Some(json!({ "path": teachers_path })),
            )
        }
    };

    reconcile::match_teachers(&mut class_lessons, &teacher_sheet.lessons);

    let report = match reconcile::analyze(conn, &class_lessons, &teacher_sheet.teacher_names) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let with_teacher = class_lessons
        .iter()
        .filter(|l| l.teacher_name.is_some())
        .count();

    ok(
        &req.id,
        json!({
            "missingClasses": report.missing_classes,
            "missingTeachers": report.missing_teachers,
            "missingRooms": report.missing_rooms,
            "dbClasses": report.db_classes,
            "dbTeachers": report.db_teachers,
            "dbRooms": report.db_rooms,
            "parsedLessons": class_lessons,
            "stats": {
                "totalLessons": class_lessons.len(),
                "withTeacher": with_teacher
            }
        }),
    )
}

fn handle_import_apply(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let lessons: Vec<ClassLesson> = match req.params.get("lessons") {
        Some(v) => match serde_json::from_value(v.clone()) {
            Ok(v) => v,
            Err(e) => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("invalid lessons: {}", e),
                    None,
                )
            }
        },
        None => return err(&req.id, "bad_params", "missing lessons", None),
    };

    let classes = match parse_class_mappings(req.params.get("classMappings")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let teachers = match parse_teacher_mappings(req.params.get("teacherMappings")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let rooms = match parse_room_mappings(req.params.get("roomMappings")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let replace_existing = req
        .params
        .get("replaceExisting")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let mappings = ImportMappings {
        classes,
        teachers,
        rooms,
    };

    match execute_import(conn, &lessons, &mappings, replace_existing) {
        Ok(result) => ok(
            &req.id,
            json!({
                "created": result.created,
                "skipped": result.skipped,
                "errors": result.errors
            }),
        ),
        Err(e) => err(&req.id, "import_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.importPreview" => Some(handle_import_preview(state, req)),
        "schedule.importApply" => Some(handle_import_apply(state, req)),
        _ => None,
    }
}
