use std::path::PathBuf;

use rusqlite::Connection;
use serde_json::{json, Value as JsonValue};

use crate::db::SqliteStore;
use crate::draft::ItemPayload;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::publish::{can_publish, publish_blockers};
use crate::reconcile::{self, ReconcileError, SaveMode};
use crate::session::BuilderSession;
use crate::store::CourseStore;
use crate::uploads::PreviewHandle;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, JsonValue> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, JsonValue> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn parse_opt_string(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.to_string();
            Ok(Some(s))
        }
    }
}

fn parse_string_array(v: Option<&JsonValue>, key: &str) -> Result<Vec<String>, String> {
    let Some(raw) = v else {
        return Err(format!("missing {}", key));
    };
    let arr = raw
        .as_array()
        .ok_or_else(|| format!("{} must be array of strings", key))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let s = item
            .as_str()
            .ok_or_else(|| format!("{} must be array of strings", key))?
            .to_string();
        out.push(s);
    }
    Ok(out)
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, String> {
    if raw.len() % 2 != 0 {
        return Err("hex string must have even length".to_string());
    }
    let mut out = Vec::with_capacity(raw.len() / 2);
    let bytes = raw.as_bytes();
    for pair in bytes.chunks(2) {
        let hi = (pair[0] as char).to_digit(16).ok_or("invalid hex digit")?;
        let lo = (pair[1] as char).to_digit(16).ok_or("invalid hex digit")?;
        out.push(((hi << 4) | lo) as u8);
    }
    Ok(out)
}

fn session_mut<'a>(state: &'a mut AppState, req: &Request) -> Result<&'a mut BuilderSession, JsonValue> {
    state
        .session
        .as_mut()
        .ok_or_else(|| err(&req.id, "no_session", "open a course builder session first", None))
}

fn flags(session: &BuilderSession) -> JsonValue {
    json!({
        "isDirty": session.is_dirty(),
        "canPublish": can_publish(&session.draft),
        "needsRepublish": session.tracker.needs_republish(),
    })
}

fn state_json(session: &BuilderSession) -> JsonValue {
    let draft = serde_json::to_value(&session.draft).unwrap_or_else(|_| json!({}));
    let blockers = publish_blockers(&session.draft);
    json!({
        "draft": draft,
        "pendingUploads": session.queue.ids(),
        "deletedTopicIds": session.buffers.topics,
        "deletedItemIds": session.buffers.items,
        "publishBlockers": blockers,
        "flags": flags(session),
    })
}

fn reconcile_err_response(req: &Request, e: ReconcileError) -> JsonValue {
    let details = match &e {
        ReconcileError::Validation(blockers) => Some(json!({ "blockers": blockers })),
        ReconcileError::Upload { upload_id, .. } => Some(json!({ "uploadId": upload_id })),
        _ => None,
    };
    err(&req.id, e.code(), e.to_string(), details)
}

fn handle_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match parse_opt_string(req.params.get("courseId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("courseId {}", m), None),
    };

    let session = match course_id {
        Some(course_id) => {
            let store = SqliteStore::new(conn);
            match store.load_course(&course_id) {
                Ok(record) => BuilderSession::from_record(record),
                Err(e) => return err(&req.id, e.code(), e.to_string(), None),
            }
        }
        None => BuilderSession::new(),
    };

    // Any previously open session is discarded, previews and all.
    if let Some(mut old) = state.session.take() {
        old.queue.clear();
    }
    let session = state.session.insert(session);
    ok(&req.id, state_json(session))
}

fn handle_state(state: &mut AppState, req: &Request) -> serde_json::Value {
    match session_mut(state, req) {
        Ok(session) => ok(&req.id, state_json(session)),
        Err(e) => e,
    }
}

fn handle_discard(state: &mut AppState, req: &Request) -> serde_json::Value {
    match state.session.take() {
        Some(mut session) => {
            if session.reconciling {
                state.session = Some(session);
                return err(
                    &req.id,
                    "save_in_progress",
                    "finish saving before discarding the session",
                    None,
                );
            }
            session.queue.clear();
            ok(&req.id, json!({ "discarded": true }))
        }
        None => ok(&req.id, json!({ "discarded": false })),
    }
}

fn handle_course_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let params = &req.params;
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if let Some(v) = params.get("title").and_then(|v| v.as_str()) {
        session.draft.title = v.to_string();
    }
    if let Some(v) = params.get("slug").and_then(|v| v.as_str()) {
        session.draft.slug = v.to_string();
    }
    if let Some(v) = params.get("summary").and_then(|v| v.as_str()) {
        session.draft.summary = v.to_string();
    }
    if let Some(v) = params.get("descriptionHtml").and_then(|v| v.as_str()) {
        session.draft.description_html = v.to_string();
    }
    session.after_mutation();
    ok(&req.id, flags(session))
}

fn handle_members_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let member_ids = match parse_string_array(req.params.get("memberIds"), "memberIds") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    session.draft.member_ids = member_ids.into_iter().collect();
    session.after_mutation();
    ok(&req.id, flags(session))
}

fn media_slot<'a>(
    session: &'a mut BuilderSession,
    slot: &str,
) -> Option<&'a mut crate::draft::MediaSlot> {
    match slot {
        "featureImage" => Some(&mut session.draft.feature_image),
        "introVideo" => Some(&mut session.draft.intro_video),
        _ => None,
    }
}

fn handle_media_stage(state: &mut AppState, req: &Request) -> serde_json::Value {
    let slot_name = match required_str(req, "slot") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let upload_id = match required_str(req, "uploadId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if !session.queue.contains(&upload_id) {
        return err(&req.id, "not_found", "upload is not queued", None);
    }
    let Some(slot) = media_slot(session, &slot_name) else {
        return err(&req.id, "bad_params", "slot must be one of: featureImage, introVideo", None);
    };
    slot.stage_replace(upload_id);
    session.tracker.note_mutation(session.draft.status);
    ok(&req.id, flags(session))
}

fn handle_media_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let slot_name = match required_str(req, "slot") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let Some(slot) = media_slot(session, &slot_name) else {
        return err(&req.id, "bad_params", "slot must be one of: featureImage, introVideo", None);
    };
    slot.stage_remove();
    session.tracker.note_mutation(session.draft.status);
    ok(&req.id, flags(session))
}

fn handle_uploads_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let upload_id = match required_str(req, "uploadId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let bytes_hex = match required_str(req, "bytesHex") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let bytes = match decode_hex(&bytes_hex) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("bytesHex {}", m), None),
    };
    let preview = match parse_opt_string(req.params.get("previewPath")) {
        Ok(v) => v.map(|p| PreviewHandle::new(PathBuf::from(p))),
        Err(m) => return err(&req.id, "bad_params", format!("previewPath {}", m), None),
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    session.queue.register(&upload_id, bytes, preview);
    // No prune here: the content edit that references this id arrives next.
    session.tracker.note_mutation(session.draft.status);
    ok(&req.id, flags(session))
}

fn handle_topics_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let summary = match parse_opt_string(req.params.get("summary")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("summary {}", m), None),
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let topic_id = session.ids.next("topic");
    session.draft.add_topic(topic_id.clone(), title, summary);
    session.after_mutation();
    ok(
        &req.id,
        json!({ "topicId": topic_id.as_str(), "flags": flags(session) }),
    )
}

fn handle_topics_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let topic_id = match required_str(req, "topicId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let params = &req.params;
    let title = params
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let summary = if params.get("summary").is_some() {
        match parse_opt_string(params.get("summary")) {
            Ok(v) => Some(v),
            Err(m) => return err(&req.id, "bad_params", format!("summary {}", m), None),
        }
    } else {
        None
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if !session.draft.update_topic(&topic_id, title, summary) {
        return err(&req.id, "not_found", "topic not found in draft", None);
    }
    session.after_mutation();
    ok(&req.id, flags(session))
}

fn handle_topics_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let topic_id = match required_str(req, "topicId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let BuilderSession { draft, buffers, .. } = session;
    if !draft.delete_topic(&topic_id, buffers) {
        return err(&req.id, "not_found", "topic not found in draft", None);
    }
    session.after_mutation();
    ok(&req.id, flags(session))
}

fn handle_topics_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let order = match parse_string_array(req.params.get("order"), "order") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if let Err(m) = session.draft.reorder_topics(&order) {
        return err(&req.id, "bad_params", m, None);
    }
    session.after_mutation();
    ok(&req.id, flags(session))
}

fn parse_payload(req: &Request, key: &str) -> Result<Option<ItemPayload>, JsonValue> {
    match req.params.get(key) {
        None => Ok(None),
        Some(raw) => serde_json::from_value::<ItemPayload>(raw.clone())
            .map(Some)
            .map_err(|e| err(&req.id, "bad_params", format!("{} {}", key, e), None)),
    }
}

fn handle_items_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let topic_id = match required_str(req, "topicId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let payload = match parse_payload(req, "payload") {
        Ok(Some(p)) => p,
        Ok(None) => return err(&req.id, "bad_params", "missing payload", None),
        Err(e) => return e,
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let item_id = session.ids.next("item");
    if !session.draft.add_item(&topic_id, item_id.clone(), title, payload) {
        return err(&req.id, "not_found", "topic not found in draft", None);
    }
    session.after_mutation();
    ok(
        &req.id,
        json!({ "itemId": item_id.as_str(), "flags": flags(session) }),
    )
}

fn handle_items_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let item_id = match required_str(req, "itemId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = req
        .params
        .get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());
    let payload = match parse_payload(req, "payload") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if !session.draft.update_item(&item_id, title, payload) {
        return err(&req.id, "not_found", "item not found in draft", None);
    }
    session.after_mutation();
    ok(&req.id, flags(session))
}

fn handle_items_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let item_id = match required_str(req, "itemId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    let BuilderSession { draft, buffers, .. } = session;
    if !draft.delete_item(&item_id, buffers) {
        return err(&req.id, "not_found", "item not found in draft", None);
    }
    session.after_mutation();
    ok(&req.id, flags(session))
}

fn handle_items_reorder(state: &mut AppState, req: &Request) -> serde_json::Value {
    let topic_id = match required_str(req, "topicId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let order = match parse_string_array(req.params.get("order"), "order") {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if let Err(m) = session.draft.reorder_items(&topic_id, &order) {
        return err(&req.id, "bad_params", m, None);
    }
    session.after_mutation();
    ok(&req.id, flags(session))
}

fn handle_items_move(state: &mut AppState, req: &Request) -> serde_json::Value {
    let item_id = match required_str(req, "itemId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let to_topic_id = match required_str(req, "toTopicId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let index = req
        .params
        .get("index")
        .and_then(|v| v.as_u64())
        .unwrap_or(u64::MAX) as usize;
    let session = match session_mut(state, req) {
        Ok(s) => s,
        Err(e) => return e,
    };
    if let Err(m) = session.draft.move_item(&item_id, &to_topic_id, index) {
        return err(&req.id, "not_found", m, None);
    }
    session.after_mutation();
    ok(&req.id, flags(session))
}

fn handle_save(state: &mut AppState, req: &Request, mode: SaveMode) -> serde_json::Value {
    let AppState { db, session, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(session) = session.as_mut() else {
        return err(&req.id, "no_session", "open a course builder session first", None);
    };
    let mut store = SqliteStore::new(conn);
    match reconcile::save(session, mode, &mut store) {
        Ok(outcome) => ok(
            &req.id,
            json!({
                "courseId": outcome.course_id,
                "status": outcome.status.as_str(),
                "needsRepublish": outcome.needs_republish,
                "state": state_json(session),
            }),
        ),
        Err(e) => reconcile_err_response(req, e),
    }
}

fn handle_save_draft(state: &mut AppState, req: &Request) -> serde_json::Value {
    let confirm_unpublish = req
        .params
        .get("confirmUnpublish")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    handle_save(state, req, SaveMode::Draft { confirm_unpublish })
}

fn handle_publish(state: &mut AppState, req: &Request) -> serde_json::Value {
    handle_save(state, req, SaveMode::Publish)
}

fn handle_courses_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let course_id = match required_str(req, "courseId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let store = SqliteStore::new(conn);
    match store.load_course(&course_id) {
        Ok(record) => {
            let topics: Vec<JsonValue> = record
                .topics
                .iter()
                .map(|t| {
                    json!({
                        "id": t.id,
                        "title": t.title,
                        "summary": t.summary,
                        "position": t.position,
                        "items": t.items.iter().map(|i| json!({
                            "id": i.id,
                            "title": i.title,
                            "position": i.position,
                            "kind": i.payload.kind(),
                            "payload": serde_json::to_value(&i.payload).unwrap_or_else(|_| json!({})),
                        })).collect::<Vec<_>>(),
                    })
                })
                .collect();
            ok(
                &req.id,
                json!({
                    "course": {
                        "id": record.id,
                        "title": record.title,
                        "slug": record.slug,
                        "status": record.status.as_str(),
                        "summary": record.summary,
                        "descriptionHtml": record.description_html,
                        "featureImageRef": record.feature_image_ref,
                        "introVideoRef": record.intro_video_ref,
                        "memberIds": record.member_ids,
                        "topics": topics,
                    }
                }),
            )
        }
        Err(e) => err(&req.id, e.code(), e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "builder.open" => Some(handle_open(state, req)),
        "builder.state" => Some(handle_state(state, req)),
        "builder.discard" => Some(handle_discard(state, req)),
        "builder.course.update" => Some(handle_course_update(state, req)),
        "builder.members.set" => Some(handle_members_set(state, req)),
        "builder.media.stage" => Some(handle_media_stage(state, req)),
        "builder.media.remove" => Some(handle_media_remove(state, req)),
        "builder.uploads.register" => Some(handle_uploads_register(state, req)),
        "builder.topics.add" => Some(handle_topics_add(state, req)),
        "builder.topics.update" => Some(handle_topics_update(state, req)),
        "builder.topics.delete" => Some(handle_topics_delete(state, req)),
        "builder.topics.reorder" => Some(handle_topics_reorder(state, req)),
        "builder.items.add" => Some(handle_items_add(state, req)),
        "builder.items.update" => Some(handle_items_update(state, req)),
        "builder.items.delete" => Some(handle_items_delete(state, req)),
        "builder.items.reorder" => Some(handle_items_reorder(state, req)),
        "builder.items.move" => Some(handle_items_move(state, req)),
        "builder.saveDraft" => Some(handle_save_draft(state, req)),
        "builder.publish" => Some(handle_publish(state, req)),
        "courses.open" => Some(handle_courses_open(state, req)),
        _ => None,
    }
}
