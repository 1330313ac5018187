use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db::now_ts;
use crate::draft::{ItemPayload, QuizQuestion, QuizSettings};

pub const STATUS_IN_PROGRESS: &str = "in_progress";
pub const STATUS_SUBMITTED: &str = "submitted";

/// Quiet window for coalescing rapid answer edits before a write.
pub const AUTOSAVE_QUIET: Duration = Duration::from_millis(650);

pub type AnswerMap = BTreeMap<String, String>;

#[derive(Debug)]
pub enum AttemptError {
    /// The submitted-attempt ceiling is exhausted. A distinct signal: the UI
    /// disables retry from this, not from a generic failure.
    LimitReached { allowed: u32 },
    /// start while an attempt is already open.
    AttemptInProgress,
    /// autosave/submit with nothing open.
    NoAttemptInProgress,
    NotQuiz(String),
    NotFound(String),
    Backend(String),
}

impl AttemptError {
    pub fn code(&self) -> &'static str {
        match self {
            AttemptError::LimitReached { .. } => "attempts_exhausted",
            AttemptError::AttemptInProgress => "attempt_in_progress",
            AttemptError::NoAttemptInProgress => "no_attempt_in_progress",
            AttemptError::NotQuiz(_) => "not_a_quiz",
            AttemptError::NotFound(_) => "not_found",
            AttemptError::Backend(_) => "db_query_failed",
        }
    }
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptError::LimitReached { allowed } => {
                write!(f, "attempt limit reached ({} allowed)", allowed)
            }
            AttemptError::AttemptInProgress => write!(f, "an attempt is already in progress"),
            AttemptError::NoAttemptInProgress => write!(f, "no attempt in progress"),
            AttemptError::NotQuiz(id) => write!(f, "item {} is not a quiz", id),
            AttemptError::NotFound(m) => write!(f, "not found: {}", m),
            AttemptError::Backend(m) => write!(f, "{}", m),
        }
    }
}

impl std::error::Error for AttemptError {}

fn db_err(e: rusqlite::Error) -> AttemptError {
    AttemptError::Backend(e.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptRow {
    pub id: String,
    pub attempt_number: i64,
    pub status: String,
    pub answers: AnswerMap,
    pub started_at: String,
    pub submitted_at: Option<String>,
    pub score_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub correct: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttemptSummary {
    pub attempts_used: i64,
    pub attempts_allowed: u32,
    pub best_score_percent: Option<f64>,
    pub passed: bool,
    pub passed_at: Option<String>,
    pub can_retake: bool,
}

#[derive(Debug, Serialize)]
pub struct SubmitResult {
    pub attempt: AttemptRow,
    pub questions: Vec<QuestionResult>,
    pub summary: AttemptSummary,
}

struct QuizItem {
    course_id: String,
    questions: Vec<QuizQuestion>,
    settings: QuizSettings,
}

fn load_quiz(conn: &Connection, item_id: &str) -> Result<QuizItem, AttemptError> {
    let row = conn
        .query_row(
            "SELECT t.course_id, i.payload_json
             FROM items i JOIN topics t ON i.topic_id = t.id
             WHERE i.id = ?",
            [item_id],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(db_err)?
        .ok_or_else(|| AttemptError::NotFound(format!("item {}", item_id)))?;
    let payload: ItemPayload =
        serde_json::from_str(&row.1).map_err(|e| AttemptError::Backend(e.to_string()))?;
    match payload {
        ItemPayload::Quiz { questions, settings } => Ok(QuizItem {
            course_id: row.0,
            questions,
            settings,
        }),
        ItemPayload::Lesson { .. } => Err(AttemptError::NotQuiz(item_id.to_string())),
    }
}

fn in_progress_attempt(
    conn: &Connection,
    item_id: &str,
    user_id: &str,
) -> Result<Option<AttemptRow>, AttemptError> {
    conn.query_row(
        "SELECT id, attempt_number, status, answers_json, started_at, submitted_at, score_percent
         FROM quiz_attempts
         WHERE item_id = ? AND user_id = ? AND status = ?
         ORDER BY attempt_number DESC LIMIT 1",
        params![item_id, user_id, STATUS_IN_PROGRESS],
        row_to_attempt,
    )
    .optional()
    .map_err(db_err)
}

fn row_to_attempt(r: &rusqlite::Row<'_>) -> rusqlite::Result<AttemptRow> {
    let answers_json: String = r.get(3)?;
    Ok(AttemptRow {
        id: r.get(0)?,
        attempt_number: r.get(1)?,
        status: r.get(2)?,
        answers: serde_json::from_str(&answers_json).unwrap_or_default(),
        started_at: r.get(4)?,
        submitted_at: r.get(5)?,
        score_percent: r.get(6)?,
    })
}

fn submitted_count(conn: &Connection, item_id: &str, user_id: &str) -> Result<i64, AttemptError> {
    conn.query_row(
        "SELECT COUNT(*) FROM quiz_attempts WHERE item_id = ? AND user_id = ? AND status = ?",
        params![item_id, user_id, STATUS_SUBMITTED],
        |r| r.get(0),
    )
    .map_err(db_err)
}

fn create_attempt(
    conn: &Connection,
    quiz: &QuizItem,
    item_id: &str,
    user_id: &str,
    attempt_number: i64,
) -> Result<AttemptRow, AttemptError> {
    let id = Uuid::new_v4().to_string();
    let started_at = now_ts();
    conn.execute(
        "INSERT INTO quiz_attempts(id, course_id, item_id, user_id, attempt_number, status, answers_json, started_at)
         VALUES(?, ?, ?, ?, ?, ?, '{}', ?)",
        params![id, quiz.course_id, item_id, user_id, attempt_number, STATUS_IN_PROGRESS, started_at],
    )
    .map_err(db_err)?;
    Ok(AttemptRow {
        id,
        attempt_number,
        status: STATUS_IN_PROGRESS.to_string(),
        answers: AnswerMap::new(),
        started_at,
        submitted_at: None,
        score_percent: None,
    })
}

fn check_ceiling(quiz: &QuizItem, used: i64) -> Result<(), AttemptError> {
    let allowed = quiz.settings.attempts_allowed;
    if allowed > 0 && used >= allowed as i64 {
        return Err(AttemptError::LimitReached { allowed });
    }
    Ok(())
}

/// Begins attempt #(submitted_count + 1). Refused while another attempt is
/// open or when the ceiling is exhausted.
pub fn start(conn: &Connection, item_id: &str, user_id: &str) -> Result<AttemptRow, AttemptError> {
    let quiz = load_quiz(conn, item_id)?;
    if in_progress_attempt(conn, item_id, user_id)?.is_some() {
        return Err(AttemptError::AttemptInProgress);
    }
    let used = submitted_count(conn, item_id, user_id)?;
    check_ceiling(&quiz, used)?;
    create_attempt(conn, &quiz, item_id, user_id, used + 1)
}

/// Like `start`, but supersedes whatever attempt was current: a stale open
/// attempt is discarded rather than resumed.
pub fn retake(conn: &Connection, item_id: &str, user_id: &str) -> Result<AttemptRow, AttemptError> {
    let quiz = load_quiz(conn, item_id)?;
    let used = submitted_count(conn, item_id, user_id)?;
    check_ceiling(&quiz, used)?;
    if let Some(open) = in_progress_attempt(conn, item_id, user_id)? {
        conn.execute("DELETE FROM quiz_attempts WHERE id = ?", [open.id])
            .map_err(db_err)?;
    }
    create_attempt(conn, &quiz, item_id, user_id, used + 1)
}

/// Persists the current answers of the open attempt. Valid only while
/// in progress; a submitted attempt is terminal and never mutated.
pub fn autosave(
    conn: &Connection,
    item_id: &str,
    user_id: &str,
    answers: &AnswerMap,
) -> Result<AttemptRow, AttemptError> {
    let Some(mut open) = in_progress_attempt(conn, item_id, user_id)? else {
        return Err(AttemptError::NoAttemptInProgress);
    };
    let answers_json =
        serde_json::to_string(answers).map_err(|e| AttemptError::Backend(e.to_string()))?;
    conn.execute(
        "UPDATE quiz_attempts SET answers_json = ? WHERE id = ?",
        params![answers_json, open.id],
    )
    .map_err(db_err)?;
    open.answers = answers.clone();
    Ok(open)
}

/// Scores and closes the open attempt. Terminal: a new attempt (if the
/// ceiling allows) is a new row, never a reopening.
pub fn submit(conn: &Connection, item_id: &str, user_id: &str) -> Result<SubmitResult, AttemptError> {
    let quiz = load_quiz(conn, item_id)?;
    let Some(mut open) = in_progress_attempt(conn, item_id, user_id)? else {
        return Err(AttemptError::NoAttemptInProgress);
    };

    let mut questions = Vec::with_capacity(quiz.questions.len());
    let mut correct = 0usize;
    for q in &quiz.questions {
        let chosen_right = open.answers.get(&q.id).map(|a| a == &q.correct_option).unwrap_or(false);
        if chosen_right {
            correct += 1;
        }
        questions.push(QuestionResult {
            question_id: q.id.clone(),
            correct: chosen_right,
        });
    }
    let total = quiz.questions.len().max(1);
    let score_percent = 100.0 * correct as f64 / total as f64;

    let submitted_at = now_ts();
    conn.execute(
        "UPDATE quiz_attempts SET status = ?, submitted_at = ?, score_percent = ? WHERE id = ?",
        params![STATUS_SUBMITTED, submitted_at, score_percent, open.id],
    )
    .map_err(db_err)?;
    open.status = STATUS_SUBMITTED.to_string();
    open.submitted_at = Some(submitted_at);
    open.score_percent = Some(score_percent);

    let summary = summarize(conn, item_id, user_id, &quiz)?;
    Ok(SubmitResult {
        attempt: open,
        questions,
        summary,
    })
}

pub fn summary(conn: &Connection, item_id: &str, user_id: &str) -> Result<AttemptSummary, AttemptError> {
    let quiz = load_quiz(conn, item_id)?;
    summarize(conn, item_id, user_id, &quiz)
}

fn summarize(
    conn: &Connection,
    item_id: &str,
    user_id: &str,
    quiz: &QuizItem,
) -> Result<AttemptSummary, AttemptError> {
    let used = submitted_count(conn, item_id, user_id)?;
    let best_score_percent: Option<f64> = conn
        .query_row(
            "SELECT MAX(score_percent) FROM quiz_attempts
             WHERE item_id = ? AND user_id = ? AND status = ?",
            params![item_id, user_id, STATUS_SUBMITTED],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    let passed_at: Option<String> = conn
        .query_row(
            "SELECT MIN(submitted_at) FROM quiz_attempts
             WHERE item_id = ? AND user_id = ? AND status = ? AND score_percent >= ?",
            params![item_id, user_id, STATUS_SUBMITTED, quiz.settings.passing_percent],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    let allowed = quiz.settings.attempts_allowed;
    Ok(AttemptSummary {
        attempts_used: used,
        attempts_allowed: allowed,
        best_score_percent,
        passed: passed_at.is_some(),
        passed_at,
        can_retake: allowed == 0 || used < allowed as i64,
    })
}

/// (course, item, user) a pending autosave belongs to.
pub type AutosaveKey = (String, String, String);

/// Coalesces rapid answer edits into one write per quiet window, keyed by
/// (course, item, user). Switching to a different quiz or a different user
/// flushes the prior key's pending write immediately so one learner's staged
/// answers are never overwritten by another's.
#[derive(Debug, Default)]
pub struct AutosaveDebouncer {
    key: Option<AutosaveKey>,
    pending: Option<AnswerMap>,
    last_edit: Option<Instant>,
}

/// A write the caller should perform now.
pub type FlushPayload = (AutosaveKey, AnswerMap);

impl AutosaveDebouncer {
    pub fn new() -> AutosaveDebouncer {
        AutosaveDebouncer::default()
    }

    /// Records an edit. If the edit targets a different quiz or user than the
    /// one currently pending, the prior key's answers are returned for an
    /// immediate flush.
    pub fn note_edit(
        &mut self,
        course_id: &str,
        item_id: &str,
        user_id: &str,
        answers: AnswerMap,
        now: Instant,
    ) -> Option<FlushPayload> {
        let key = (course_id.to_string(), item_id.to_string(), user_id.to_string());
        let mut displaced = None;
        if self.key.as_ref().is_some_and(|k| *k != key) {
            displaced = self.flush();
        }
        self.key = Some(key);
        self.pending = Some(answers);
        self.last_edit = Some(now);
        displaced
    }

    /// Returns the pending write once the quiet window has elapsed.
    pub fn take_if_due(&mut self, now: Instant) -> Option<FlushPayload> {
        let last = self.last_edit?;
        if now.duration_since(last) < AUTOSAVE_QUIET {
            return None;
        }
        self.flush()
    }

    /// Unconditional flush, for tab hide / navigation away. Never fails and
    /// never blocks; with nothing pending it is a no-op.
    pub fn flush(&mut self) -> Option<FlushPayload> {
        self.last_edit = None;
        let key = self.key.clone()?;
        let answers = self.pending.take()?;
        Some((key, answers))
    }
}
