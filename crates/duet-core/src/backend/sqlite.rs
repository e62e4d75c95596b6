use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use super::watch::{DocumentChange, DocumentWatch, WatcherRegistry};
use super::{DocumentStore, WriteBatch, WriteOp};
use crate::error::{CoreError, Result};

/// SQLite-backed [`DocumentStore`].
///
/// Documents are JSON bodies keyed by (collection, id). Batches run inside
/// one SQLite transaction, which is what collapses the historical
/// message-append-plus-two-index-writes window into a single commit.
/// Subscriptions are in-process: committed writes are pushed to the watcher
/// registry after the transaction lands.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    watchers: Arc<WatcherRegistry>,
}

impl SqliteStore {
    /// Open (or create) the store under `dir`.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let conn = Connection::open(dir.join("documents.db"))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            watchers: WatcherRegistry::new(),
        })
    }

    #[cfg(test)]
    pub(crate) fn watchers(&self) -> &Arc<WatcherRegistry> {
        &self.watchers
    }
}

fn read_body(conn: &Connection, collection: &str, id: &str) -> Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

fn write_body(conn: &Connection, collection: &str, id: &str, body: &Value) -> Result<()> {
    conn.execute(
        "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3)
         ON CONFLICT (collection, id) DO UPDATE SET body = excluded.body",
        params![collection, id, body.to_string()],
    )?;
    Ok(())
}

/// Append `value` to an array field, creating document and field on demand.
/// Returns the post-append body for watcher notification.
fn append_in_place(
    conn: &Connection,
    collection: &str,
    id: &str,
    field: &str,
    value: Value,
) -> Result<Value> {
    let mut body = read_body(conn, collection, id)?
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

    let shape_error = || CoreError::UnexpectedShape {
        collection: collection.to_string(),
        id: id.to_string(),
    };

    let object = body.as_object_mut().ok_or_else(shape_error)?;
    let entry = object
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    entry.as_array_mut().ok_or_else(shape_error)?.push(value);

    write_body(conn, collection, id, &body)?;
    Ok(body)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get_raw(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        read_body(&conn, collection, id)
    }

    async fn set_raw(&self, collection: &str, id: &str, body: Value) -> Result<()> {
        {
            let conn = self.conn.lock();
            write_body(&conn, collection, id, &body)?;
        }
        self.watchers.notify(&DocumentChange {
            collection: collection.to_string(),
            id: id.to_string(),
            body: Some(body),
        });
        Ok(())
    }

    async fn find_by_field(
        &self,
        collection: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<Value>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT body FROM documents
             WHERE collection = ?1 AND json_extract(body, '$.' || ?2) = ?3",
        )?;
        let rows = stmt.query_map(params![collection, field, value], |row| {
            row.get::<_, String>(0)
        })?;

        let mut bodies = Vec::new();
        for raw in rows {
            bodies.push(serde_json::from_str(&raw?)?);
        }
        Ok(bodies)
    }

    async fn list(&self, collection: &str) -> Result<Vec<Value>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT body FROM documents WHERE collection = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![collection], |row| row.get::<_, String>(0))?;

        let mut bodies = Vec::new();
        for raw in rows {
            bodies.push(serde_json::from_str(&raw?)?);
        }
        Ok(bodies)
    }

    async fn append_to_array(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        let body = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let body = append_in_place(&tx, collection, id, field, value)?;
            tx.commit()?;
            body
        };
        self.watchers.notify(&DocumentChange {
            collection: collection.to_string(),
            id: id.to_string(),
            body: Some(body),
        });
        Ok(())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let changes = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let mut changes = Vec::new();
            for op in batch.into_ops() {
                match op {
                    WriteOp::Set { collection, id, body } => {
                        write_body(&tx, &collection, &id, &body)?;
                        changes.push(DocumentChange {
                            collection,
                            id,
                            body: Some(body),
                        });
                    }
                    WriteOp::Append {
                        collection,
                        id,
                        field,
                        value,
                    } => {
                        let body = append_in_place(&tx, &collection, &id, &field, value)?;
                        changes.push(DocumentChange {
                            collection,
                            id,
                            body: Some(body),
                        });
                    }
                }
            }
            tx.commit()?;
            changes
        };

        for change in &changes {
            self.watchers.notify(change);
        }
        Ok(())
    }

    async fn watch(&self, collection: &str, id: &str) -> Result<DocumentWatch> {
        // Snapshot and registration happen under the connection lock, so a
        // concurrent commit is delivered either in the snapshot or as a
        // change, never lost between the two.
        let conn = self.conn.lock();
        let initial = read_body(&conn, collection, id)?;
        let watch = self.watchers.register(
            collection,
            id,
            DocumentChange {
                collection: collection.to_string(),
                id: id.to_string(),
                body: initial,
            },
        );
        drop(conn);
        Ok(watch)
    }
}
