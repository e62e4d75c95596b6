use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// An authenticated session: created on sign-in, destroyed on sign-out.
///
/// Passed explicitly to whatever needs the current user; there is no global
/// current-user state anywhere in the crate.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub token: String,
    pub started_at: u64,
}

/// Authentication seam. Account storage and credential checks live behind
/// this trait; the chat core only ever sees [`Session`] values.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register a new account; returns the new user identifier.
    async fn sign_up(&self, email: &str, password: &str) -> Result<String>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    /// Sign in via an external provider identity, creating the account on
    /// first use. Returns the session and whether the account was created.
    async fn sign_in_federated(&self, provider: &str, subject: &str) -> Result<(Session, bool)>;

    async fn sign_out(&self, session: &Session) -> Result<()>;

    /// Resume the session persisted by a previous process, if any.
    async fn resume(&self) -> Result<Option<Session>>;
}

/// SQLite-backed identity provider: salted SHA-256 password digests plus a
/// single persisted session per data directory.
pub struct LocalIdentity {
    conn: Mutex<Connection>,
}

impl LocalIdentity {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let conn = Connection::open(dir.join("accounts.db"))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                user_id TEXT PRIMARY KEY,
                email TEXT UNIQUE,
                password_salt TEXT,
                password_digest TEXT,
                provider TEXT,
                subject TEXT,
                UNIQUE (provider, subject)
            );
            CREATE TABLE IF NOT EXISTS session (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                token TEXT NOT NULL,
                user_id TEXT NOT NULL,
                started_at INTEGER NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn digest(salt: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Persist the session row so a later process can resume it.
    fn open_session(conn: &Connection, user_id: &str) -> Result<Session> {
        let session = Session {
            user_id: user_id.to_string(),
            token: Uuid::new_v4().to_string(),
            started_at: unix_now(),
        };
        conn.execute(
            "INSERT INTO session (id, token, user_id, started_at) VALUES (1, ?1, ?2, ?3)
             ON CONFLICT (id) DO UPDATE SET
                 token = excluded.token,
                 user_id = excluded.user_id,
                 started_at = excluded.started_at",
            params![session.token, session.user_id, session.started_at],
        )?;
        Ok(session)
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl IdentityProvider for LocalIdentity {
    async fn sign_up(&self, email: &str, password: &str) -> Result<String> {
        let conn = self.conn.lock();

        let taken: Option<String> = conn
            .query_row(
                "SELECT user_id FROM accounts WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(CoreError::EmailTaken);
        }

        let user_id = Uuid::new_v4().to_string();
        let salt = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO accounts (user_id, email, password_salt, password_digest)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, email, salt, Self::digest(&salt, password)],
        )?;
        Ok(user_id)
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let conn = self.conn.lock();

        let account: Option<(String, String, String)> = conn
            .query_row(
                "SELECT user_id, password_salt, password_digest FROM accounts WHERE email = ?1",
                params![email],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        // Unknown email and wrong password are indistinguishable on purpose
        let (user_id, salt, digest) = account.ok_or(CoreError::InvalidCredentials)?;
        if Self::digest(&salt, password) != digest {
            return Err(CoreError::InvalidCredentials);
        }

        Self::open_session(&conn, &user_id)
    }

    async fn sign_in_federated(&self, provider: &str, subject: &str) -> Result<(Session, bool)> {
        let conn = self.conn.lock();

        let existing: Option<String> = conn
            .query_row(
                "SELECT user_id FROM accounts WHERE provider = ?1 AND subject = ?2",
                params![provider, subject],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(user_id) => Ok((Self::open_session(&conn, &user_id)?, false)),
            None => {
                let user_id = Uuid::new_v4().to_string();
                conn.execute(
                    "INSERT INTO accounts (user_id, provider, subject) VALUES (?1, ?2, ?3)",
                    params![user_id, provider, subject],
                )?;
                Ok((Self::open_session(&conn, &user_id)?, true))
            }
        }
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM session WHERE token = ?1",
            params![session.token],
        )?;
        Ok(())
    }

    async fn resume(&self) -> Result<Option<Session>> {
        let conn = self.conn.lock();
        let session = conn
            .query_row(
                "SELECT token, user_id, started_at FROM session WHERE id = 1",
                [],
                |row| {
                    Ok(Session {
                        token: row.get(0)?,
                        user_id: row.get(1)?,
                        started_at: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }
}
