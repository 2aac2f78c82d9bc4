mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use lina_shared::{ChatMessage, MessageStatus, Role};

#[derive(Clone, Debug)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub salt: String,
}

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub access_token: String,
    pub refresh_token: String,
    pub user_id: String,
    pub expires_at: i64,
}

const MESSAGE_COLUMNS: &str = "id, user_id, role, content, idempotency_key, created";

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        schema::create_tables(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }
}

// Users
impl Db {
    /// Insert a user. Returns `false` when the email is already taken.
    pub fn create_user(&self, user: &UserRow) -> Result<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (id, email, password_hash, salt, created)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user.id, user.email, user.password_hash, user.salt, Utc::now().timestamp()],
        )?;
        Ok(inserted == 1)
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT id, email, password_hash, salt FROM users WHERE email = ?1",
                params![email],
                |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        email: row.get(1)?,
                        password_hash: row.get(2)?,
                        salt: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn user_email(&self, user_id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let email = conn
            .query_row(
                "SELECT email FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(email)
    }
}

// Sessions
impl Db {
    pub fn insert_session(&self, session: &SessionRow) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (access_token, refresh_token, user_id, expires_at, created)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.access_token,
                session.refresh_token,
                session.user_id,
                session.expires_at,
                Utc::now().timestamp()
            ],
        )?;
        Ok(())
    }

    /// Look up `(user_id, expires_at)` for an access token.
    pub fn find_session(&self, access_token: &str) -> Result<Option<(String, i64)>> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                "SELECT user_id, expires_at FROM sessions WHERE access_token = ?1",
                params![access_token],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(found)
    }

    /// Redeem `refresh_token` and return the owning user id. The refresh
    /// token can only be redeemed once; the access token it was issued with
    /// stays valid until its own expiry.
    pub fn redeem_refresh_token(&self, refresh_token: &str) -> Result<Option<String>> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let user_id: Option<String> = tx
            .query_row(
                "SELECT user_id FROM sessions WHERE refresh_token = ?1",
                params![refresh_token],
                |row| row.get(0),
            )
            .optional()?;
        if user_id.is_some() {
            tx.execute(
                "UPDATE sessions SET refresh_token = NULL WHERE refresh_token = ?1",
                params![refresh_token],
            )?;
        }
        tx.commit()?;
        Ok(user_id)
    }

    /// Remove sessions that expired before `cutoff`. Returns the number removed.
    pub fn purge_sessions(&self, cutoff: i64) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM sessions WHERE expires_at < ?1", params![cutoff])?)
    }
}

// Messages
impl Db {
    /// Store a user message under `idempotency_key`, or return the copy that is
    /// already stored under that key.
    pub fn upsert_user_message(
        &self,
        user_id: &str,
        content: &str,
        idempotency_key: &str,
    ) -> Result<ChatMessage> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO messages (id, user_id, role, content, idempotency_key, created)
             VALUES (?1, ?2, 'user', ?3, ?4, ?5)",
            params![
                uuid::Uuid::new_v4().to_string(),
                user_id,
                content,
                idempotency_key,
                Utc::now().timestamp_millis()
            ],
        )?;

        let message = conn.query_row(
            &format!(
                "SELECT {} FROM messages WHERE user_id = ?1 AND idempotency_key = ?2",
                MESSAGE_COLUMNS
            ),
            params![user_id, idempotency_key],
            message_from_row,
        )?;
        Ok(message)
    }

    pub fn insert_assistant_message(
        &self,
        user_id: &str,
        content: &str,
        reply_to: &str,
    ) -> Result<ChatMessage> {
        let conn = self.lock()?;
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO messages (id, user_id, role, content, reply_to, created)
             VALUES (?1, ?2, 'assistant', ?3, ?4, ?5)",
            params![id, user_id, content, reply_to, Utc::now().timestamp_millis()],
        )?;

        let message = conn.query_row(
            &format!("SELECT {} FROM messages WHERE id = ?1", MESSAGE_COLUMNS),
            params![id],
            message_from_row,
        )?;
        Ok(message)
    }

    pub fn find_reply(&self, user_message_id: &str) -> Result<Option<ChatMessage>> {
        let conn = self.lock()?;
        let reply = conn
            .query_row(
                &format!(
                    "SELECT {} FROM messages WHERE reply_to = ?1 AND role = 'assistant'
                     ORDER BY seq ASC LIMIT 1",
                    MESSAGE_COLUMNS
                ),
                params![user_message_id],
                message_from_row,
            )
            .optional()?;
        Ok(reply)
    }

    /// A page of history, oldest first. Offset 0 is the newest page.
    pub fn list_messages(&self, user_id: &str, limit: u32, offset: u32) -> Result<Vec<ChatMessage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE user_id = ?1
             ORDER BY seq DESC LIMIT ?2 OFFSET ?3",
            MESSAGE_COLUMNS
        ))?;

        let mut messages = stmt
            .query_map(params![user_id, limit, offset], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        messages.reverse();
        Ok(messages)
    }

    pub fn count_messages(&self, user_id: &str) -> Result<i64> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?)
    }
}

fn message_from_row(row: &rusqlite::Row) -> rusqlite::Result<ChatMessage> {
    let role_str: String = row.get(2)?;
    let role = role_str.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, e.into())
    })?;
    let created: i64 = row.get(5)?;

    Ok(ChatMessage {
        id: row.get(0)?,
        local_id: row.get(4)?,
        user_id: row.get(1)?,
        role,
        content: row.get(3)?,
        created_at: DateTime::from_timestamp_millis(created).unwrap_or_default(),
        status: MessageStatus::Sent,
    })
}
