use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::params_from_iter;
use serde_json::json;

fn handle_schedule_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "lessons": [] }));
    };

    let class_id = req
        .params
        .get("classId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let mut sql = String::from(
        "SELECT l.id, l.class_id, g.number, c.letter, l.weekday, l.lesson_number,
                s.name, l.teacher_id, t.last_name, t.first_name,
                l.room_id, r.name, l.group_id, cg.name
         FROM schedule_lessons l
         JOIN school_classes c ON c.id = l.class_id
         JOIN grade_levels g ON g.id = c.grade_level_id
         JOIN subjects s ON s.id = l.subject_id
         LEFT JOIN teachers t ON t.id = l.teacher_id
         LEFT JOIN rooms r ON r.id = l.room_id
         LEFT JOIN class_groups cg ON cg.id = l.group_id ",
    );
    let mut params: Vec<&dyn rusqlite::ToSql> = Vec::new();
    if let Some(cid) = class_id.as_ref() {
        sql.push_str("WHERE l.class_id = ? ");
        params.push(cid);
    }
    sql.push_str("ORDER BY g.number, c.letter, l.weekday, l.lesson_number");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(params_from_iter(params), |row| {
            let id: String = row.get(0)?;
            let class_id: String = row.get(1)?;
            let number: i64 = row.get(2)?;
            let letter: String = row.get(3)?;
            let weekday: i64 = row.get(4)?;
            let lesson_number: i64 = row.get(5)?;
            let subject: String = row.get(6)?;
            let teacher_id: Option<String> = row.get(7)?;
            let teacher_last: Option<String> = row.get(8)?;
            let teacher_first: Option<String> = row.get(9)?;
            let room_id: Option<String> = row.get(10)?;
            let room_name: Option<String> = row.get(11)?;
            let group_id: Option<String> = row.get(12)?;
            let group_name: Option<String> = row.get(13)?;
            let teacher_name = teacher_last
                .map(|last| format!("{} {}", last, teacher_first.unwrap_or_default()));
            Ok(json!({
                "id": id,
                "classId": class_id,
                "className": format!("{}-{}", number, letter),
                "weekday": weekday,
                "lessonNumber": lesson_number,
                "subjectName": subject,
                "teacherId": teacher_id,
                "teacherName": teacher_name,
                "roomId": room_id,
                "roomName": room_name,
                "groupId": group_id,
                "groupName": group_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(lessons) => ok(&req.id, json!({ "lessons": lessons })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_schedule_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match conn.execute("DELETE FROM schedule_lessons", []) {
        Ok(deleted) => ok(&req.id, json!({ "deleted": deleted })),
        Err(e) => err(&req.id, "db_delete_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.list" => Some(handle_schedule_list(state, req)),
        "schedule.clear" => Some(handle_schedule_clear(state, req)),
        _ => None,
    }
}
