//! SQLite-backed persistent cache for the picture library.
//!
//! This module provides the `CacheStore` struct which owns:
//! - Folder, file and metadata rows written by the synchronizer
//! - Location rows written by the read path once an address is resolved
//! - The write lock shared by every handle onto the same database
//!
//! Each thread holds its own handle (its own connection) onto the same file.
//! Reads never take the write lock; every write statement or write
//! transaction does.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use directories::ProjectDirs;
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info, trace, warn};

use super::schema;
use crate::error::{Result, StoreError};
use crate::models::{coordinate_key, ImageMeta, Pic};

const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA temp_store = MEMORY;
    PRAGMA foreign_keys = ON;
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const PIC_COLUMNS: &str = "
    fname, file_id, last_modified, orientation, exif_datetime, f_number,
    exposure_time, iso, focal_length, make, model, lens, rating, latitude,
    longitude, width, height, is_portrait, location, title, caption, tags,
    displayed_count, last_displayed
";

/// Serializes writes across every handle onto one database.
pub type WriteLock = Arc<Mutex<()>>;

/// Handle onto the cache database.
pub struct CacheStore {
    conn: Connection,
    path: PathBuf,
    write_lock: WriteLock,
}

/// Stored state of a folder row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FolderState {
    pub last_modified: f64,
    pub missing: bool,
}

/// Identity of a file row: (folder, basename, extension) plus its mtime.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub folder: String,
    pub basename: String,
    pub extension: String,
    pub last_modified: f64,
}

impl FileRecord {
    /// Splits `path` into folder, basename and extension.
    ///
    /// Returns `None` for paths without a parent, stem or extension.
    pub fn from_path(path: &Path, last_modified: f64) -> Option<Self> {
        let folder = path.parent()?.to_string_lossy().into_owned();
        let basename = path.file_stem()?.to_string_lossy().into_owned();
        let extension = path.extension()?.to_string_lossy().into_owned();
        Some(Self {
            folder,
            basename,
            extension,
            last_modified,
        })
    }
}

/// Row counts for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub folders: i64,
    pub missing_folders: i64,
    pub files: i64,
    pub meta: i64,
    pub locations: i64,
}

impl CacheStore {
    /// Returns the default database path based on XDG directories.
    pub fn default_db_path() -> anyhow::Result<PathBuf> {
        use anyhow::Context;

        let proj_dirs = ProjectDirs::from("", "", "picdeck")
            .context("Failed to determine project directories")?;
        let data_dir = proj_dirs.data_dir();
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        Ok(data_dir.join("cache.sqlite"))
    }

    /// Opens or creates the database at `path` and brings its schema up to
    /// date.
    ///
    /// Fails with [`StoreError::Corrupt`] if the file is not a usable
    /// database and with [`StoreError::SchemaTooNew`] if it was written by a
    /// newer build.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut conn = Self::connect(path)?;
        let found = schema::create_or_migrate(&mut conn).map_err(|e| match e {
            StoreError::Sqlite(source) => StoreError::Corrupt {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;

        info!(
            "Opened cache store at {:?} (schema version {})",
            path, found
        );
        Ok(Self {
            conn,
            path: path.to_path_buf(),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Opens another connection onto the same database, sharing the write
    /// lock. Intended for handing to a second thread.
    pub fn open_handle(&self) -> Result<Self> {
        let conn = Self::connect(&self.path)?;
        Ok(Self {
            conn,
            path: self.path.clone(),
            write_lock: Arc::clone(&self.write_lock),
        })
    }

    fn connect(path: &Path) -> Result<Connection> {
        let corrupt = |source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        };
        let conn = Connection::open(path).map_err(corrupt)?;
        conn.execute_batch(PRAGMAS).map_err(corrupt)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> Result<Option<i64>> {
        schema::stored_version(&self.conn)
    }

    /// Runs `f` while holding the write lock.
    fn write<T>(
        &self,
        what: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let start = Instant::now();
        let _guard = self.write_lock.lock();
        let waited = start.elapsed();
        let result = f(&self.conn)?;
        trace!(
            what,
            waited_ms = waited.as_millis() as u64,
            held_ms = (start.elapsed() - waited).as_millis() as u64,
            "cache write"
        );
        Ok(result)
    }

    // =========================================================================
    // Synchronizer reads
    // =========================================================================

    /// Returns the stored state for a folder, if it has a row.
    pub fn folder_state(&self, name: &str) -> Result<Option<FolderState>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT last_modified, missing FROM folder WHERE name = ?1")?;
        let state = stmt
            .query_row(params![name], |row| {
                Ok(FolderState {
                    last_modified: row.get(0)?,
                    missing: row.get::<_, i64>(1)? != 0,
                })
            })
            .optional()?;
        Ok(state)
    }

    /// Returns true if a row exists for the file with a timestamp at least
    /// as new as `record.last_modified`.
    pub fn is_file_current(&self, record: &FileRecord) -> Result<bool> {
        let mut stmt = self.conn.prepare_cached(
            "
            SELECT 1 FROM file
                INNER JOIN folder ON folder.id = file.folder_id
            WHERE folder.name = ?1 AND file.basename = ?2 AND file.extension = ?3
                AND file.last_modified >= ?4
            ",
        )?;
        let found: Option<i64> = stmt
            .query_row(
                params![
                    record.folder,
                    record.basename,
                    record.extension,
                    record.last_modified
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All folder rows as `(id, name)`.
    pub fn folders(&self) -> Result<Vec<(i64, String)>> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM folder ORDER BY name")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Files visible through the read view (folder not missing) as
    /// `(id, full path)`.
    pub fn visible_files(&self) -> Result<Vec<(i64, String)>> {
        let mut stmt = self.conn.prepare("SELECT file_id, fname FROM all_data")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // =========================================================================
    // Synchronizer writes
    // =========================================================================

    /// Inserts or updates one file together with its folder and metadata, as
    /// a single transaction.
    ///
    /// With `existing_id` the file row is updated in place so its id stays
    /// stable. Returns the file id.
    pub fn upsert_file(
        &self,
        record: &FileRecord,
        meta: &ImageMeta,
        existing_id: Option<i64>,
    ) -> Result<i64> {
        let exif_datetime = meta.exif_datetime.unwrap_or(record.last_modified);

        self.write("upsert_file", |conn| {
            let tx = conn.unchecked_transaction()?;

            tx.execute(
                "INSERT OR IGNORE INTO folder (name) VALUES (?1)",
                params![record.folder],
            )?;
            tx.execute(
                "UPDATE folder SET missing = 0 WHERE name = ?1 AND missing != 0",
                params![record.folder],
            )?;

            let file_id: i64 = match existing_id {
                Some(id) => {
                    tx.execute(
                        "
                        UPDATE file SET
                            folder_id = (SELECT id FROM folder WHERE name = ?1),
                            basename = ?2, extension = ?3, last_modified = ?4
                        WHERE id = ?5
                        ",
                        params![
                            record.folder,
                            record.basename,
                            record.extension,
                            record.last_modified,
                            id
                        ],
                    )?;
                    id
                }
                None => tx.query_row(
                    "
                    INSERT INTO file (folder_id, basename, extension, last_modified)
                    VALUES ((SELECT id FROM folder WHERE name = ?1), ?2, ?3, ?4)
                    ON CONFLICT(folder_id, basename, extension) DO UPDATE SET
                        last_modified = excluded.last_modified
                    RETURNING id
                    ",
                    params![
                        record.folder,
                        record.basename,
                        record.extension,
                        record.last_modified
                    ],
                    |row| row.get(0),
                )?,
            };

            tx.execute(
                "
                INSERT OR REPLACE INTO meta (
                    file_id, orientation, exif_datetime, f_number, exposure_time,
                    iso, focal_length, make, model, lens, rating, latitude,
                    longitude, width, height, title, caption, tags
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                ",
                params![
                    file_id,
                    meta.orientation.unwrap_or(1),
                    exif_datetime,
                    meta.f_number,
                    meta.exposure_time,
                    meta.iso,
                    meta.focal_length,
                    meta.make,
                    meta.model,
                    meta.lens,
                    meta.rating,
                    meta.latitude,
                    meta.longitude,
                    meta.width,
                    meta.height,
                    meta.title,
                    meta.caption,
                    meta.tags,
                ],
            )?;

            tx.commit()?;
            Ok(file_id)
        })
    }

    /// Stamps each folder's modification time and clears its missing flag,
    /// creating rows for folders that hold no images yet.
    ///
    /// Returns the number of rows that actually changed.
    pub fn finalize_folders(&self, folders: &[(String, f64)]) -> Result<usize> {
        if folders.is_empty() {
            return Ok(0);
        }

        self.write("finalize_folders", |conn| {
            let tx = conn.unchecked_transaction()?;
            let mut changed = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "
                    INSERT INTO folder (name, last_modified, missing) VALUES (?1, ?2, 0)
                    ON CONFLICT(name) DO UPDATE SET
                        last_modified = excluded.last_modified, missing = 0
                    WHERE folder.last_modified != excluded.last_modified
                        OR folder.missing != 0
                    ",
                )?;
                for (name, modified) in folders {
                    changed += stmt.execute(params![name, modified])?;
                }
            }
            tx.commit()?;
            Ok(changed)
        })
    }

    /// Flags folders as missing. Folders already flagged are left alone.
    pub fn mark_folders_missing(&self, ids: &[i64]) -> Result<usize> {
        self.execute_for_ids(
            "mark_folders_missing",
            "UPDATE folder SET missing = 1 WHERE id = ?1 AND missing = 0",
            ids,
        )
    }

    /// Deletes folders. Their files and metadata go with them.
    pub fn delete_folders(&self, ids: &[i64]) -> Result<usize> {
        self.execute_for_ids("delete_folders", "DELETE FROM folder WHERE id = ?1", ids)
    }

    /// Deletes files. Their metadata goes with them.
    pub fn delete_files(&self, ids: &[i64]) -> Result<usize> {
        self.execute_for_ids("delete_files", "DELETE FROM file WHERE id = ?1", ids)
    }

    fn execute_for_ids(&self, what: &'static str, sql: &str, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.write(what, |conn| {
            let tx = conn.unchecked_transaction()?;
            let mut changed = 0;
            {
                let mut stmt = tx.prepare_cached(sql)?;
                for id in ids {
                    changed += stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
            Ok(changed)
        })
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Runs a single-column id query against the read view.
    ///
    /// `NULL` values come back as `None`; the portrait query uses them as
    /// placeholder slots.
    pub fn query_ids(&self, sql: &str, values: &[Value]) -> Result<Vec<Option<i64>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let ids = stmt
            .query_map(params_from_iter(values.iter()), |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Reads one file through the view. Returns `None` if the id is unknown
    /// or its folder is flagged missing.
    pub fn get_pic(&self, file_id: i64) -> Result<Option<Pic>> {
        let sql = format!("SELECT {} FROM all_data WHERE file_id = ?1", PIC_COLUMNS);
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let pic = stmt.query_row(params![file_id], pic_from_row).optional()?;
        Ok(pic)
    }

    /// Bumps the display counter for a file.
    pub fn record_display(&self, file_id: i64, when: f64) -> Result<()> {
        self.write("record_display", |conn| {
            conn.execute(
                "
                UPDATE file SET displayed_count = displayed_count + 1, last_displayed = ?1
                WHERE id = ?2
                ",
                params![when, file_id],
            )
        })?;
        Ok(())
    }

    /// Stores a resolved address for a rounded coordinate pair.
    pub fn upsert_location(&self, latitude: f64, longitude: f64, description: &str) -> Result<()> {
        self.write("upsert_location", |conn| {
            conn.execute(
                "
                INSERT INTO location (latitude, longitude, description) VALUES (?1, ?2, ?3)
                ON CONFLICT(latitude, longitude) DO UPDATE SET description = excluded.description
                ",
                params![
                    coordinate_key(latitude),
                    coordinate_key(longitude),
                    description
                ],
            )
        })?;
        Ok(())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Folds the WAL back into the main database without blocking readers.
    pub fn checkpoint(&self) -> Result<()> {
        self.write("checkpoint", |conn| {
            conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))
        })?;
        Ok(())
    }

    /// Final checkpoint, then closes the connection.
    pub fn close(self) -> Result<()> {
        {
            let _guard = self.write_lock.lock();
            if let Err(e) = self
                .conn
                .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            {
                warn!("Final checkpoint failed: {}", e);
            }
        }
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
        debug!("Closed cache store handle at {:?}", self.path);
        Ok(())
    }

    /// Gets row counts for debugging.
    pub fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<i64> { Ok(self.conn.query_row(sql, [], |r| r.get(0))?) };
        Ok(StoreStats {
            folders: count("SELECT COUNT(*) FROM folder")?,
            missing_folders: count("SELECT COUNT(*) FROM folder WHERE missing != 0")?,
            files: count("SELECT COUNT(*) FROM file")?,
            meta: count("SELECT COUNT(*) FROM meta")?,
            locations: count("SELECT COUNT(*) FROM location")?,
        })
    }
}

fn pic_from_row(row: &Row<'_>) -> rusqlite::Result<Pic> {
    Ok(Pic {
        path: PathBuf::from(row.get::<_, String>(0)?),
        file_id: row.get(1)?,
        last_modified: row.get(2)?,
        orientation: row.get::<_, Option<i64>>(3)?.unwrap_or(1),
        exif_datetime: row.get(4)?,
        f_number: row.get(5)?,
        exposure_time: row.get(6)?,
        iso: row.get(7)?,
        focal_length: row.get(8)?,
        make: row.get(9)?,
        model: row.get(10)?,
        lens: row.get(11)?,
        rating: row.get(12)?,
        latitude: row.get(13)?,
        longitude: row.get(14)?,
        width: row.get(15)?,
        height: row.get(16)?,
        is_portrait: row.get::<_, i64>(17)? != 0,
        location: row.get(18)?,
        title: row.get(19)?,
        caption: row.get(20)?,
        tags: row.get(21)?,
        displayed_count: row.get(22)?,
        last_displayed: row.get(23)?,
    })
}

/// Seconds since the Unix epoch, with sub-second precision.
pub fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// On-disk modification time of `path` in epoch seconds.
pub fn modified_seconds(path: &Path) -> std::io::Result<f64> {
    Ok(epoch_seconds(std::fs::metadata(path)?.modified()?))
}
