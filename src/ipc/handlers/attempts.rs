use std::time::Instant;

use rusqlite::Connection;
use serde_json::json;

use crate::attempts::{self, AnswerMap, AttemptError};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn attempt_err(req: &Request, e: AttemptError) -> serde_json::Value {
    let details = match &e {
        AttemptError::LimitReached { allowed } => Some(json!({ "attemptsAllowed": allowed })),
        _ => None,
    };
    err(&req.id, e.code(), e.to_string(), details)
}

/// Writes any autosave whose quiet window has elapsed. Driven by request
/// traffic; failures are dropped, the next edit re-stages the answers.
pub fn pump(state: &mut AppState) {
    let Some(conn) = state.db.as_ref() else {
        return;
    };
    if let Some(((_, item_id, user_id), answers)) = state.autosave.take_if_due(Instant::now()) {
        let _ = attempts::autosave(conn, &item_id, &user_id, &answers);
    }
}

fn write_pending(state: &mut AppState) {
    let Some(conn) = state.db.as_ref() else {
        return;
    };
    if let Some(((_, item_id, user_id), answers)) = state.autosave.flush() {
        let _ = attempts::autosave(conn, &item_id, &user_id, &answers);
    }
}

fn handle_start(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let item_id = match required_str(req, "itemId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match attempts::start(conn, &item_id, &user_id) {
        Ok(attempt) => ok(&req.id, json!({ "attempt": attempt })),
        Err(e) => attempt_err(req, e),
    }
}

fn handle_retake(state: &mut AppState, req: &Request) -> serde_json::Value {
    let item_id = match required_str(req, "itemId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // Answers staged for the superseded attempt must not land on the new one.
    write_pending(state);
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match attempts::retake(conn, &item_id, &user_id) {
        Ok(attempt) => ok(&req.id, json!({ "attempt": attempt })),
        Err(e) => attempt_err(req, e),
    }
}

fn handle_autosave(state: &mut AppState, req: &Request) -> serde_json::Value {
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let item_id = match required_str(req, "itemId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let answers: AnswerMap = match req.params.get("answers") {
        Some(raw) => match serde_json::from_value(raw.clone()) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "bad_params", format!("answers {}", e), None),
        },
        None => return err(&req.id, "bad_params", "missing answers", None),
    };
    let flush = req
        .params
        .get("flush")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if flush {
        // Unload path: write now, and never fail the caller. A refused write
        // is reported, not errored, so navigation is never blocked. Answers
        // still staged for another quiz or user are written first, not dropped.
        write_pending(state);
        let Some(conn) = state.db.as_ref() else {
            return ok(&req.id, json!({ "written": false, "reason": "no_workspace" }));
        };
        return match attempts::autosave(conn, &item_id, &user_id, &answers) {
            Ok(_) => ok(&req.id, json!({ "written": true })),
            Err(e) => ok(&req.id, json!({ "written": false, "reason": e.code() })),
        };
    }

    let displaced = state
        .autosave
        .note_edit(&course_id, &item_id, &user_id, answers, Instant::now());
    if let Some(((_, prev_item, prev_user), prev_answers)) = displaced {
        if let Ok(conn) = db_conn(state, req) {
            let _ = attempts::autosave(conn, &prev_item, &prev_user, &prev_answers);
        }
    }
    ok(&req.id, json!({ "written": false, "debounced": true }))
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let item_id = match required_str(req, "itemId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    // The answers being graded must include the last edits, debounced or not.
    write_pending(state);
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    match attempts::submit(conn, &item_id, &user_id) {
        Ok(result) => ok(
            &req.id,
            json!({
                "attempt": result.attempt,
                "questions": result.questions,
                "summary": result.summary,
            }),
        ),
        Err(e) => attempt_err(req, e),
    }
}

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let item_id = match required_str(req, "itemId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match attempts::summary(conn, &item_id, &user_id) {
        Ok(summary) => ok(&req.id, json!({ "summary": summary })),
        Err(e) => attempt_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attempts.start" => Some(handle_start(state, req)),
        "attempts.retake" => Some(handle_retake(state, req)),
        "attempts.autosave" => Some(handle_autosave(state, req)),
        "attempts.submit" => Some(handle_submit(state, req)),
        "attempts.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
