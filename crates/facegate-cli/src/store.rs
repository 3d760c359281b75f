use facegate_core::image_io;
use facegate_core::EnrolledIdentity;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
}

/// The kiosk database: enrolled users, settings and the access log.
///
/// Users and settings are read-only here; enrollment belongs to the kiosk
/// application. The schema matches the kiosk's own tables so an existing
/// database can be opened in place.
#[derive(Clone)]
pub struct KioskStore {
    conn: Connection,
}

/// One access-log entry.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AccessRecord {
    pub work_id: String,
    /// Display name, if the work id is enrolled.
    pub name: Option<String>,
    pub access_time: String,
    pub passed: bool,
}

impl KioskStore {
    /// Open (or create) the database at the given path.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let conn = Connection::open(db_path).await?;

        // Failed checks for unknown work ids are logged too, so foreign keys stay off.
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     name TEXT NOT NULL,
                     gender TEXT NOT NULL,
                     work_id TEXT UNIQUE NOT NULL,
                     face_image_path TEXT NOT NULL,
                     avatar_path TEXT NOT NULL,
                     is_admin BOOLEAN DEFAULT 0,
                     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                 );
                 CREATE TABLE IF NOT EXISTS access_logs (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     work_id TEXT NOT NULL,
                     access_time TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                     access_result BOOLEAN NOT NULL,
                     FOREIGN KEY (work_id) REFERENCES users(work_id)
                 );
                 CREATE TABLE IF NOT EXISTS settings (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     key TEXT UNIQUE NOT NULL,
                     value TEXT,
                     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                     updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                 );",
            )?;
            Ok(())
        })
        .await?;

        tracing::debug!(path = %db_path.display(), "kiosk database opened");
        Ok(Self { conn })
    }

    /// Every enrolled user, in enrollment order.
    pub async fn gallery(&self) -> Result<Vec<EnrolledIdentity>, StoreError> {
        let rows: Vec<(String, String, String)> = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT work_id, name, face_image_path FROM users ORDER BY id")?;
                let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;

        Ok(rows.into_iter().map(identity_from_row).collect())
    }

    pub async fn identity(&self, work_id: &str) -> Result<Option<EnrolledIdentity>, StoreError> {
        let work_id = work_id.to_string();
        let row: Option<(String, String, String)> = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT work_id, name, face_image_path FROM users WHERE work_id = ?1",
                )?;
                let mut rows =
                    stmt.query_map([&work_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?;
                Ok(rows.next().transpose()?)
            })
            .await?;

        Ok(row.map(identity_from_row))
    }

    /// Raw value of a setting, if present.
    pub async fn setting(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT value FROM settings WHERE key = ?1")?;
                let mut rows = stmt.query_map([&key], |row| row.get::<_, Option<String>>(0))?;
                Ok(rows.next().transpose()?.flatten())
            })
            .await
            .map_err(StoreError::from)
    }

    /// Append an access-log entry.
    pub async fn log_access(&self, work_id: &str, passed: bool) -> Result<(), StoreError> {
        let work_id = work_id.to_string();
        let access_time = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO access_logs (work_id, access_time, access_result)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![work_id, access_time, passed],
                )?;
                Ok(())
            })
            .await?;
        tracing::info!(passed, "access logged");
        Ok(())
    }

    /// Most recent access-log entries, newest first.
    pub async fn recent_access(&self, limit: usize) -> Result<Vec<AccessRecord>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT al.work_id, u.name, al.access_time, al.access_result
                     FROM access_logs al LEFT JOIN users u ON al.work_id = u.work_id
                     ORDER BY al.access_time DESC, al.id DESC
                     LIMIT ?1",
                )?;
                let rows = stmt.query_map([limit], |row| {
                    Ok(AccessRecord {
                        work_id: row.get(0)?,
                        name: row.get(1)?,
                        access_time: row.get(2)?,
                        passed: row.get(3)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await
            .map_err(StoreError::from)
    }

    #[cfg(test)]
    pub(crate) async fn add_user(
        &self,
        work_id: &str,
        name: &str,
        face_image_path: &str,
    ) -> Result<(), StoreError> {
        let (work_id, name) = (work_id.to_string(), name.to_string());
        let path = face_image_path.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (name, gender, work_id, face_image_path, avatar_path)
                     VALUES (?1, 'U', ?2, ?3, '')",
                    rusqlite::params![name, work_id, path],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

/// Stored image paths may be `file://` URIs.
fn identity_from_row((work_id, name, face_image_path): (String, String, String)) -> EnrolledIdentity {
    EnrolledIdentity {
        key: work_id,
        display_name: name,
        image_path: image_io::resolve_path(&face_image_path),
    }
}
