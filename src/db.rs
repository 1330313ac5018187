use std::path::Path;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::draft::ItemPayload;
use crate::publish::CourseStatus;
use crate::store::{
    AssetStore, CourseFields, CourseRecord, CourseStore, ItemFields, ItemRecord, MediaKind,
    StoreError, TopicFields, TopicRecord,
};

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("coursebuilder.sqlite3");
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            slug TEXT NOT NULL,
            status TEXT NOT NULL,
            summary TEXT NOT NULL DEFAULT '',
            description_html TEXT NOT NULL DEFAULT '',
            feature_image_ref TEXT,
            intro_video_ref TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_members(
            course_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            PRIMARY KEY(course_id, user_id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_members_course ON course_members(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS topics(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            title TEXT NOT NULL,
            summary TEXT,
            sort_order INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_topics_course_sort ON topics(course_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS items(
            id TEXT PRIMARY KEY,
            topic_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            title TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            payload_json TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(topic_id) REFERENCES topics(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_items_topic_sort ON items(topic_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assets(
            ref TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL,
            bytes BLOB NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assets_owner ON assets(owner_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS quiz_attempts(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            item_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            attempt_number INTEGER NOT NULL,
            status TEXT NOT NULL,
            answers_json TEXT NOT NULL DEFAULT '{}',
            started_at TEXT NOT NULL,
            submitted_at TEXT,
            FOREIGN KEY(item_id) REFERENCES items(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_quiz_attempts_item_user ON quiz_attempts(item_id, user_id)",
        [],
    )?;

    // Existing workspaces may predate stored scores. Add if needed.
    ensure_attempts_score_column(conn)?;

    Ok(())
}

fn ensure_attempts_score_column(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "quiz_attempts", "score_percent")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE quiz_attempts ADD COLUMN score_percent REAL", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn now_ts() -> String {
    Utc::now().to_rfc3339()
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// SQLite-backed implementation of both collaborator interfaces, over the
/// open workspace connection.
pub struct SqliteStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteStore<'a> {
    pub fn new(conn: &'a Connection) -> SqliteStore<'a> {
        SqliteStore { conn }
    }

    fn course_exists(&self, course_id: &str) -> Result<(), StoreError> {
        self.conn
            .query_row("SELECT 1 FROM courses WHERE id = ?", [course_id], |_r| Ok(()))
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("course {}", course_id)))
    }

    fn topic_exists(&self, topic_id: &str) -> Result<(), StoreError> {
        self.conn
            .query_row("SELECT 1 FROM topics WHERE id = ?", [topic_id], |_r| Ok(()))
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("topic {}", topic_id)))
    }

    fn items_for_topic(&self, topic_id: &str) -> Result<Vec<ItemRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, sort_order, payload_json
                 FROM items
                 WHERE topic_id = ?
                 ORDER BY sort_order, id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([topic_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        let mut items = Vec::with_capacity(rows.len());
        for (id, title, position, payload_json) in rows {
            let payload: ItemPayload = serde_json::from_str(&payload_json)
                .map_err(|e| StoreError::Backend(format!("item {} payload: {}", id, e)))?;
            items.push(ItemRecord {
                id,
                title,
                position,
                payload,
            });
        }
        Ok(items)
    }
}

impl CourseStore for SqliteStore<'_> {
    fn create_course(&mut self, fields: &CourseFields) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let ts = now_ts();
        self.conn
            .execute(
                "INSERT INTO courses(id, title, slug, status, summary, description_html, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    fields.title,
                    fields.slug,
                    fields.status.as_str(),
                    fields.summary,
                    fields.description_html,
                    ts,
                    ts
                ],
            )
            .map_err(db_err)?;
        Ok(id)
    }

    fn update_course(&mut self, course_id: &str, fields: &CourseFields) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE courses
                 SET title = ?, slug = ?, status = ?, summary = ?, description_html = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    fields.title,
                    fields.slug,
                    fields.status.as_str(),
                    fields.summary,
                    fields.description_html,
                    now_ts(),
                    course_id
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("course {}", course_id)));
        }
        Ok(())
    }

    fn load_course(&self, course_id: &str) -> Result<CourseRecord, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, title, slug, status, summary, description_html, feature_image_ref, intro_video_ref
                 FROM courses WHERE id = ?",
                [course_id],
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                        r.get::<_, String>(5)?,
                        r.get::<_, Option<String>>(6)?,
                        r.get::<_, Option<String>>(7)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("course {}", course_id)))?;

        let status = CourseStatus::parse(&row.3)
            .ok_or_else(|| StoreError::Backend(format!("course {} has status {}", course_id, row.3)))?;

        let mut stmt = self
            .conn
            .prepare("SELECT user_id FROM course_members WHERE course_id = ? ORDER BY user_id")
            .map_err(db_err)?;
        let member_ids = stmt
            .query_map([course_id], |r| r.get::<_, String>(0))
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, title, summary, sort_order
                 FROM topics
                 WHERE course_id = ?
                 ORDER BY sort_order, id",
            )
            .map_err(db_err)?;
        let topic_rows = stmt
            .query_map([course_id], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, i64>(3)?,
                ))
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut topics = Vec::with_capacity(topic_rows.len());
        for (id, title, summary, position) in topic_rows {
            let items = self.items_for_topic(&id)?;
            topics.push(TopicRecord {
                id,
                title,
                summary,
                position,
                items,
            });
        }

        Ok(CourseRecord {
            id: row.0,
            title: row.1,
            slug: row.2,
            status,
            summary: row.4,
            description_html: row.5,
            feature_image_ref: row.6,
            intro_video_ref: row.7,
            member_ids,
            topics,
        })
    }

    fn set_course_media(
        &mut self,
        course_id: &str,
        kind: MediaKind,
        stable_ref: Option<String>,
    ) -> Result<(), StoreError> {
        let sql = match kind {
            MediaKind::FeatureImage => {
                "UPDATE courses SET feature_image_ref = ?, updated_at = ? WHERE id = ?"
            }
            MediaKind::IntroVideo => {
                "UPDATE courses SET intro_video_ref = ?, updated_at = ? WHERE id = ?"
            }
        };
        let changed = self
            .conn
            .execute(sql, params![stable_ref, now_ts(), course_id])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("course {}", course_id)));
        }
        Ok(())
    }

    fn replace_members(&mut self, course_id: &str, member_ids: &[String]) -> Result<(), StoreError> {
        self.course_exists(course_id)?;
        self.conn
            .execute("DELETE FROM course_members WHERE course_id = ?", [course_id])
            .map_err(db_err)?;
        let mut stmt = self
            .conn
            .prepare("INSERT INTO course_members(course_id, user_id) VALUES(?, ?)")
            .map_err(db_err)?;
        for user_id in member_ids {
            stmt.execute(params![course_id, user_id]).map_err(db_err)?;
        }
        Ok(())
    }

    fn create_topic(&mut self, course_id: &str, fields: &TopicFields) -> Result<String, StoreError> {
        self.course_exists(course_id)?;
        let id = Uuid::new_v4().to_string();
        let ts = now_ts();
        self.conn
            .execute(
                "INSERT INTO topics(id, course_id, title, summary, sort_order, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                params![id, course_id, fields.title, fields.summary, fields.position, ts, ts],
            )
            .map_err(db_err)?;
        Ok(id)
    }

    fn update_topic(&mut self, topic_id: &str, fields: &TopicFields) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute(
                "UPDATE topics SET title = ?, summary = ?, sort_order = ?, updated_at = ? WHERE id = ?",
                params![fields.title, fields.summary, fields.position, now_ts(), topic_id],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("topic {}", topic_id)));
        }
        Ok(())
    }

    fn delete_topic(&mut self, topic_id: &str) -> Result<(), StoreError> {
        // Items first; the schema has no ON DELETE CASCADE.
        self.conn
            .execute("DELETE FROM items WHERE topic_id = ?", [topic_id])
            .map_err(db_err)?;
        let changed = self
            .conn
            .execute("DELETE FROM topics WHERE id = ?", [topic_id])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("topic {}", topic_id)));
        }
        Ok(())
    }

    fn reorder_topics(&mut self, course_id: &str, ordered_ids: &[String]) -> Result<(), StoreError> {
        for (i, id) in ordered_ids.iter().enumerate() {
            let changed = self
                .conn
                .execute(
                    "UPDATE topics SET sort_order = ? WHERE id = ? AND course_id = ?",
                    params![i as i64, id, course_id],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("topic {}", id)));
            }
        }
        Ok(())
    }

    fn create_item(&mut self, topic_id: &str, fields: &ItemFields) -> Result<String, StoreError> {
        self.topic_exists(topic_id)?;
        let id = Uuid::new_v4().to_string();
        let ts = now_ts();
        let payload_json = serde_json::to_string(&fields.payload)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        self.conn
            .execute(
                "INSERT INTO items(id, topic_id, kind, title, sort_order, payload_json, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    topic_id,
                    fields.payload.kind(),
                    fields.title,
                    fields.position,
                    payload_json,
                    ts,
                    ts
                ],
            )
            .map_err(db_err)?;
        Ok(id)
    }

    fn update_item(&mut self, item_id: &str, fields: &ItemFields) -> Result<(), StoreError> {
        let payload_json = serde_json::to_string(&fields.payload)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let changed = self
            .conn
            .execute(
                "UPDATE items SET kind = ?, title = ?, sort_order = ?, payload_json = ?, updated_at = ?
                 WHERE id = ?",
                params![
                    fields.payload.kind(),
                    fields.title,
                    fields.position,
                    payload_json,
                    now_ts(),
                    item_id
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("item {}", item_id)));
        }
        Ok(())
    }

    fn delete_item(&mut self, item_id: &str) -> Result<(), StoreError> {
        let changed = self
            .conn
            .execute("DELETE FROM items WHERE id = ?", [item_id])
            .map_err(db_err)?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("item {}", item_id)));
        }
        Ok(())
    }

    fn reorder_items(&mut self, topic_id: &str, ordered_ids: &[String]) -> Result<(), StoreError> {
        for (i, id) in ordered_ids.iter().enumerate() {
            let changed = self
                .conn
                .execute(
                    "UPDATE items SET sort_order = ? WHERE id = ? AND topic_id = ?",
                    params![i as i64, id, topic_id],
                )
                .map_err(db_err)?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("item {}", id)));
            }
        }
        Ok(())
    }
}

impl AssetStore for SqliteStore<'_> {
    fn upload_binary(&mut self, owner_id: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let stable_ref = format!("asset://{:x}", hasher.finalize());
        // Content-addressed, so a retried upload is a no-op.
        self.conn
            .execute(
                "INSERT OR IGNORE INTO assets(ref, owner_id, bytes, created_at) VALUES(?, ?, ?, ?)",
                params![stable_ref, owner_id, bytes, now_ts()],
            )
            .map_err(db_err)?;
        Ok(stable_ref)
    }

    fn delete_binary(&mut self, stable_ref: &str) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM assets WHERE ref = ?", [stable_ref])
            .map_err(db_err)?;
        Ok(())
    }
}
