use super::{PersistenceError, RunPersistence, RunStatusRecord};
use crate::checkpoint::Checkpoint;
use crate::run::RunContext;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};

/// SQLite-backed store. Documents are kept as JSON text next to the columns
/// used for lookup and ordering.
pub struct SqliteRunStore {
    db_path: PathBuf,
}

impl SqliteRunStore {
    pub fn open(db_path: &Path) -> Result<Self, PersistenceError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| PersistenceError::Io {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn ensure_schema(&self) -> Result<(), PersistenceError> {
        let connection = self.connect()?;
        connection
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS run_states (
                    run_id TEXT PRIMARY KEY,
                    state TEXT NOT NULL,
                    updated_at INTEGER NOT NULL,
                    body TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS run_contexts (
                    run_id TEXT PRIMARY KEY,
                    body TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS checkpoints (
                    run_id TEXT NOT NULL,
                    checkpoint_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    sequence INTEGER NOT NULL,
                    size_bytes INTEGER NOT NULL,
                    body TEXT NOT NULL,
                    PRIMARY KEY (run_id, checkpoint_id)
                );

                CREATE INDEX IF NOT EXISTS idx_checkpoints_run_created
                    ON checkpoints(run_id, created_at DESC, sequence DESC);
                ",
            )
            .map_err(|source| PersistenceError::Sql { source })
    }

    fn connect(&self) -> Result<Connection, PersistenceError> {
        let connection =
            Connection::open(&self.db_path).map_err(|source| PersistenceError::Open {
                path: self.db_path.display().to_string(),
                source,
            })?;
        connection
            .execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|source| PersistenceError::Sql { source })?;
        Ok(connection)
    }

    fn encode<T: serde::Serialize>(&self, value: &T) -> Result<String, PersistenceError> {
        serde_json::to_string(value).map_err(|source| PersistenceError::Json {
            path: self.db_path.display().to_string(),
            source,
        })
    }

    fn decode<T: serde::de::DeserializeOwned>(&self, raw: &str) -> Result<T, PersistenceError> {
        serde_json::from_str(raw).map_err(|source| PersistenceError::Json {
            path: self.db_path.display().to_string(),
            source,
        })
    }
}

impl RunPersistence for SqliteRunStore {
    fn create_checkpoint(
        &self,
        run_id: &str,
        checkpoint: &Checkpoint,
    ) -> Result<(), PersistenceError> {
        let body = self.encode(checkpoint)?;
        let mut connection = self.connect()?;
        let tx = connection
            .transaction()
            .map_err(|source| PersistenceError::Sql { source })?;
        tx.execute(
            "
            INSERT INTO checkpoints (run_id, checkpoint_id, created_at, sequence, size_bytes, body)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(run_id, checkpoint_id) DO UPDATE SET
                created_at = excluded.created_at,
                sequence = excluded.sequence,
                size_bytes = excluded.size_bytes,
                body = excluded.body
            ",
            params![
                run_id,
                checkpoint.id,
                checkpoint.created_at,
                checkpoint.sequence as i64,
                checkpoint.size_bytes as i64,
                body
            ],
        )
        .map_err(|source| PersistenceError::Sql { source })?;
        tx.commit()
            .map_err(|source| PersistenceError::Sql { source })
    }

    fn list_checkpoints(&self, run_id: &str) -> Result<Vec<Checkpoint>, PersistenceError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(
                "
                SELECT body FROM checkpoints
                WHERE run_id = ?1
                ORDER BY created_at DESC, sequence DESC
                ",
            )
            .map_err(|source| PersistenceError::Sql { source })?;
        let rows = statement
            .query_map(params![run_id], |row| row.get::<_, String>(0))
            .map_err(|source| PersistenceError::Sql { source })?;

        let mut out = Vec::new();
        for row in rows {
            let raw = row.map_err(|source| PersistenceError::Sql { source })?;
            out.push(self.decode(&raw)?);
        }
        Ok(out)
    }

    fn delete_checkpoint(
        &self,
        run_id: &str,
        checkpoint_id: &str,
    ) -> Result<bool, PersistenceError> {
        let connection = self.connect()?;
        let removed = connection
            .execute(
                "DELETE FROM checkpoints WHERE run_id = ?1 AND checkpoint_id = ?2",
                params![run_id, checkpoint_id],
            )
            .map_err(|source| PersistenceError::Sql { source })?;
        Ok(removed > 0)
    }

    fn update_run_state(&self, record: &RunStatusRecord) -> Result<(), PersistenceError> {
        let body = self.encode(record)?;
        let connection = self.connect()?;
        connection
            .execute(
                "
                INSERT INTO run_states (run_id, state, updated_at, body)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(run_id) DO UPDATE SET
                    state = excluded.state,
                    updated_at = excluded.updated_at,
                    body = excluded.body
                ",
                params![record.run_id, record.state.as_str(), record.updated_at, body],
            )
            .map_err(|source| PersistenceError::Sql { source })?;
        Ok(())
    }

    fn load_run_state(&self, run_id: &str) -> Result<Option<RunStatusRecord>, PersistenceError> {
        let connection = self.connect()?;
        let raw = connection
            .query_row(
                "SELECT body FROM run_states WHERE run_id = ?1",
                params![run_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|source| PersistenceError::Sql { source })?;
        raw.map(|raw| self.decode(&raw)).transpose()
    }

    fn update_context(&self, run_id: &str, context: &RunContext) -> Result<(), PersistenceError> {
        let body = self.encode(context)?;
        let connection = self.connect()?;
        connection
            .execute(
                "
                INSERT INTO run_contexts (run_id, body) VALUES (?1, ?2)
                ON CONFLICT(run_id) DO UPDATE SET body = excluded.body
                ",
                params![run_id, body],
            )
            .map_err(|source| PersistenceError::Sql { source })?;
        Ok(())
    }

    fn load_context(&self, run_id: &str) -> Result<Option<RunContext>, PersistenceError> {
        let connection = self.connect()?;
        let raw = connection
            .query_row(
                "SELECT body FROM run_contexts WHERE run_id = ?1",
                params![run_id],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map_err(|source| PersistenceError::Sql { source })?;
        raw.map(|raw| self.decode(&raw)).transpose()
    }
}
