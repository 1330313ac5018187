use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    // The daemon is request-driven; any autosave past its quiet window is
    // written before the next method runs.
    handlers::attempts::pump(state);

    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::builder::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::attempts::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
