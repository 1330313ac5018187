mod attempts;
mod db;
mod draft;
mod ids;
mod ipc;
mod publish;
mod reconcile;
mod session;
mod snapshot;
mod store;
mod uploads;

use std::io::{self, BufRead, Write};

use serde_json::json;

fn emit(stdout: &mut io::Stdout, resp: &serde_json::Value) {
    let line = serde_json::to_string(resp).unwrap_or_else(|_| "{\"ok\":false}".to_string());
    let _ = writeln!(stdout, "{}", line);
    let _ = stdout.flush();
}

fn main() {
    let mut state = ipc::AppState::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            // No request id to echo back, so the error stands alone.
            Err(e) => json!({
                "ok": false,
                "error": { "code": "bad_json", "message": e.to_string() },
            }),
        };
        emit(&mut stdout, &resp);
    }
}
