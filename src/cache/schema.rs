//! Schema creation and in-place migration for the cache database.
//!
//! Version history:
//! - 1: folder, file, meta, location tables and the `all_data` view.
//! - 2: `folder.missing` flag; the view hides files in missing folders.
//! - 3: display statistics on `file` (`displayed_count`, `last_displayed`).
//!
//! Migrations only ever add columns with defaults and rebuild the view, so
//! existing rows survive every step.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Result, StoreError};

/// Schema version this build reads and writes.
pub const SCHEMA_VERSION: i64 = 3;

/// Tables as they were at version 1. Later columns arrive through migrations.
const BASE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS folder (
        id INTEGER NOT NULL PRIMARY KEY,
        name TEXT UNIQUE NOT NULL,
        last_modified REAL DEFAULT 0 NOT NULL
    );

    CREATE TABLE IF NOT EXISTS file (
        id INTEGER NOT NULL PRIMARY KEY,
        folder_id INTEGER NOT NULL
            REFERENCES folder(id) ON DELETE CASCADE,
        basename TEXT NOT NULL,
        extension TEXT NOT NULL,
        last_modified REAL DEFAULT 0 NOT NULL,
        UNIQUE(folder_id, basename, extension)
    );

    CREATE INDEX IF NOT EXISTS idx_file_folder ON file(folder_id);

    CREATE TABLE IF NOT EXISTS meta (
        file_id INTEGER NOT NULL PRIMARY KEY
            REFERENCES file(id) ON DELETE CASCADE,
        orientation INTEGER DEFAULT 1 NOT NULL,
        exif_datetime REAL,
        f_number REAL,
        exposure_time TEXT,
        iso REAL,
        focal_length TEXT,
        make TEXT,
        model TEXT,
        lens TEXT,
        rating INTEGER,
        latitude REAL,
        longitude REAL,
        width INTEGER,
        height INTEGER,
        title TEXT,
        caption TEXT,
        tags TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_meta_exif_datetime ON meta(exif_datetime);

    -- Keyed by coordinates scaled by 10^4 so nearby photos share one row
    CREATE TABLE IF NOT EXISTS location (
        id INTEGER NOT NULL PRIMARY KEY,
        latitude INTEGER NOT NULL,
        longitude INTEGER NOT NULL,
        description TEXT,
        UNIQUE(latitude, longitude)
    );

    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    );
";

const VIEW_V1: &str = "
    CREATE VIEW all_data AS
    SELECT
        folder.name || '/' || file.basename || '.' || file.extension AS fname,
        file.id AS file_id,
        file.last_modified,
        meta.orientation, meta.exif_datetime, meta.f_number, meta.exposure_time,
        meta.iso, meta.focal_length, meta.make, meta.model, meta.lens, meta.rating,
        meta.latitude, meta.longitude, meta.width, meta.height,
        meta.title, meta.caption, meta.tags,
        COALESCE(meta.height > meta.width, 0) AS is_portrait,
        location.description AS location
    FROM file
        INNER JOIN folder ON folder.id = file.folder_id
        LEFT JOIN meta ON meta.file_id = file.id
        LEFT JOIN location
            ON location.latitude = CAST(ROUND(meta.latitude * 10000) AS INTEGER)
            AND location.longitude = CAST(ROUND(meta.longitude * 10000) AS INTEGER)
";

const VIEW_V2: &str = "
    CREATE VIEW all_data AS
    SELECT
        folder.name || '/' || file.basename || '.' || file.extension AS fname,
        file.id AS file_id,
        file.last_modified,
        meta.orientation, meta.exif_datetime, meta.f_number, meta.exposure_time,
        meta.iso, meta.focal_length, meta.make, meta.model, meta.lens, meta.rating,
        meta.latitude, meta.longitude, meta.width, meta.height,
        meta.title, meta.caption, meta.tags,
        COALESCE(meta.height > meta.width, 0) AS is_portrait,
        location.description AS location
    FROM file
        INNER JOIN folder ON folder.id = file.folder_id
        LEFT JOIN meta ON meta.file_id = file.id
        LEFT JOIN location
            ON location.latitude = CAST(ROUND(meta.latitude * 10000) AS INTEGER)
            AND location.longitude = CAST(ROUND(meta.longitude * 10000) AS INTEGER)
    WHERE folder.missing = 0
";

const VIEW_V3: &str = "
    CREATE VIEW all_data AS
    SELECT
        folder.name || '/' || file.basename || '.' || file.extension AS fname,
        file.id AS file_id,
        file.last_modified,
        meta.orientation, meta.exif_datetime, meta.f_number, meta.exposure_time,
        meta.iso, meta.focal_length, meta.make, meta.model, meta.lens, meta.rating,
        meta.latitude, meta.longitude, meta.width, meta.height,
        meta.title, meta.caption, meta.tags,
        COALESCE(meta.height > meta.width, 0) AS is_portrait,
        location.description AS location,
        file.displayed_count,
        file.last_displayed
    FROM file
        INNER JOIN folder ON folder.id = file.folder_id
        LEFT JOIN meta ON meta.file_id = file.id
        LEFT JOIN location
            ON location.latitude = CAST(ROUND(meta.latitude * 10000) AS INTEGER)
            AND location.longitude = CAST(ROUND(meta.longitude * 10000) AS INTEGER)
    WHERE folder.missing = 0
";

/// One additive step from `version - 1` to `version`.
struct Migration {
    version: i64,
    sql: &'static str,
    view: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 2,
        sql: "ALTER TABLE folder ADD COLUMN missing INTEGER DEFAULT 0 NOT NULL;",
        view: VIEW_V2,
    },
    Migration {
        version: 3,
        sql: "
            ALTER TABLE file ADD COLUMN displayed_count INTEGER DEFAULT 0 NOT NULL;
            ALTER TABLE file ADD COLUMN last_displayed REAL DEFAULT 0 NOT NULL;
        ",
        view: VIEW_V3,
    },
];

/// Creates the version-1 schema if absent, then migrates up to
/// [`SCHEMA_VERSION`].
///
/// A database with no version row is treated as version 1. Returns the
/// version found before migrating.
pub fn create_or_migrate(conn: &mut Connection) -> Result<i64> {
    let fresh = !table_exists(conn, "folder")?;

    conn.execute_batch(BASE_TABLES)?;
    if fresh {
        conn.execute_batch(VIEW_V1)?;
    }

    let found = stored_version(conn)?.unwrap_or(1);
    if found > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    if found < SCHEMA_VERSION {
        let tx = conn.transaction()?;
        for step in MIGRATIONS.iter().filter(|m| m.version > found) {
            debug!("Migrating cache schema to version {}", step.version);
            tx.execute_batch(step.sql)?;
            tx.execute_batch("DROP VIEW IF EXISTS all_data;")?;
            tx.execute_batch(step.view)?;
        }
        tx.execute("DELETE FROM schema_version", [])?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            params![SCHEMA_VERSION],
        )?;
        tx.commit()?;

        if fresh {
            info!("Created cache schema version {}", SCHEMA_VERSION);
        } else {
            info!(
                "Migrated cache schema from version {} to {}",
                found, SCHEMA_VERSION
            );
        }
    }

    Ok(found)
}

/// Reads the stored schema version, if any.
pub fn stored_version(conn: &Connection) -> Result<Option<i64>> {
    let version = conn
        .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
        .optional()?;
    Ok(version)
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}
