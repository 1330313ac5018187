use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::attempts::AutosaveDebouncer;
use crate::session::BuilderSession;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// At most one course editing session is open at a time.
    pub session: Option<BuilderSession>,
    pub autosave: AutosaveDebouncer,
}

impl AppState {
    pub fn new() -> AppState {
        AppState {
            workspace: None,
            db: None,
            session: None,
            autosave: AutosaveDebouncer::new(),
        }
    }
}

impl Default for AppState {
    fn default() -> AppState {
        AppState::new()
    }
}
