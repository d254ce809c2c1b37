//! SQLite backend for multipart checkpoints.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags};

use super::backend::CheckpointBackend;
use super::entry::{Checkpoint, CheckpointKey};
use super::error::CheckpointError;
use crate::types::CompletedPart;

const TABLE_NAME: &str = "multipart_uploads";
const KEY_UPLOAD_ID: &str = "STORE-KEY-UPLOAD-ID";
const KEY_UPLOADED_SIZE: &str = "STORE-KEY-UPLOADED-SIZE";
const KEY_PARTS: &str = "STORE-KEY-PARTS";
const KEY_PART_SIZE: &str = "STORE-KEY-PART-SIZE";

/// SQLite-based checkpoint backend.
///
/// Each checkpoint lives in its own database file `<dir>/<stem>.db`, where
/// the stem is derived from the checkpoint key. Deleting a checkpoint removes
/// the file.
pub struct SqliteCheckpointStore {
    /// Directory holding the per-upload databases.
    dir: PathBuf,
}

impl SqliteCheckpointStore {
    /// Open a checkpoint store rooted at `dir`, creating the directory.
    ///
    /// # Arguments
    /// * `dir` - Directory for the per-upload database files
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
        let dir: PathBuf = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the databases.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Database file used for a key.
    pub fn db_path(&self, key: &CheckpointKey) -> PathBuf {
        self.dir.join(format!("{}.db", key.file_stem()))
    }

    fn connect(path: &Path) -> Result<Connection, CheckpointError> {
        let conn: Connection = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    key TEXT PRIMARY KEY NOT NULL,
                    value BLOB NOT NULL
                )",
                TABLE_NAME
            ),
            [],
        )?;
        Ok(conn)
    }

    fn read_values(path: &Path) -> Result<HashMap<String, Vec<u8>>, CheckpointError> {
        let conn: Connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let mut stmt = conn.prepare(&format!("SELECT key, value FROM {}", TABLE_NAME))?;
        let rows = stmt.query_map([], |row| {
            let key: String = row.get(0)?;
            let value: Vec<u8> = row.get(1)?;
            Ok((key, value))
        })?;

        let mut values: HashMap<String, Vec<u8>> = HashMap::new();
        for row in rows {
            let (key, value) = row?;
            values.insert(key, value);
        }
        Ok(values)
    }
}

#[async_trait::async_trait]
impl CheckpointBackend for SqliteCheckpointStore {
    async fn load(&self, key: &CheckpointKey) -> Result<Option<Checkpoint>, CheckpointError> {
        let path: PathBuf = self.db_path(key);
        if !path.exists() {
            return Ok(None);
        }

        let values: HashMap<String, Vec<u8>> = Self::read_values(&path)?;

        let upload_id: String = match values.get(KEY_UPLOAD_ID) {
            Some(bytes) if !bytes.is_empty() => String::from_utf8_lossy(bytes).into_owned(),
            _ => return Ok(None),
        };

        let parts: Vec<CompletedPart> = match values.get(KEY_PARTS) {
            Some(bytes) => serde_json::from_slice(bytes)?,
            None => Vec::new(),
        };

        let uploaded_size: u64 = parse_u64(values.get(KEY_UPLOADED_SIZE), KEY_UPLOADED_SIZE)?;
        let part_size: u64 = parse_u64(values.get(KEY_PART_SIZE), KEY_PART_SIZE)?;

        let listed_size: u64 = parts.iter().map(|p| p.size).sum();
        if listed_size != uploaded_size {
            return Err(CheckpointError::InvalidEntry(format!(
                "uploaded size {} does not match the sum of part sizes {}",
                uploaded_size, listed_size
            )));
        }

        Ok(Some(Checkpoint {
            upload_id,
            uploaded_size,
            part_size,
            parts,
        }))
    }

    async fn save(
        &self,
        key: &CheckpointKey,
        checkpoint: &Checkpoint,
    ) -> Result<(), CheckpointError> {
        let parts_json: Vec<u8> = serde_json::to_vec(&checkpoint.parts)?;
        let mut conn: Connection = Self::connect(&self.db_path(key))?;

        let tx = conn.transaction()?;
        {
            let sql: String = format!(
                "INSERT OR REPLACE INTO {} (key, value) VALUES (?, ?)",
                TABLE_NAME
            );
            let mut stmt = tx.prepare(&sql)?;
            stmt.execute(params![KEY_UPLOAD_ID, checkpoint.upload_id.as_bytes()])?;
            stmt.execute(params![
                KEY_UPLOADED_SIZE,
                checkpoint.uploaded_size.to_string().as_bytes()
            ])?;
            stmt.execute(params![KEY_PARTS, parts_json])?;
            stmt.execute(params![
                KEY_PART_SIZE,
                checkpoint.part_size.to_string().as_bytes()
            ])?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn delete(&self, key: &CheckpointKey) -> Result<(), CheckpointError> {
        let path: PathBuf = self.db_path(key);
        for file in [path.clone(), path.with_extension("db-journal")] {
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn parse_u64(value: Option<&Vec<u8>>, name: &str) -> Result<u64, CheckpointError> {
    match value {
        None => Ok(0),
        Some(bytes) => String::from_utf8_lossy(bytes)
            .trim()
            .parse::<u64>()
            .map_err(|e| CheckpointError::InvalidEntry(format!("{}: {}", name, e))),
    }
}
