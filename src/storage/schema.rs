//! Database schema definitions.

use rusqlite::{Connection, Result};

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the family-tree database.
pub const SCHEMA_SQL: &str = r"
    -- Text fields use NOT NULL DEFAULT '' so absent Gramps text is stored as empty.
    CREATE TABLE IF NOT EXISTS places (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gramps_id TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL DEFAULT '',
        latitude REAL,
        longitude REAL
    );

    CREATE TABLE IF NOT EXISTS persons (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gramps_id TEXT NOT NULL UNIQUE,
        first_name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        gender TEXT NOT NULL DEFAULT 'U',
        birth_date TEXT,
        death_date TEXT,
        is_deceased INTEGER NOT NULL DEFAULT 0,
        gramps_last_updated TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        CHECK (gender IN ('M', 'F', 'U'))
    );
    CREATE INDEX IF NOT EXISTS idx_persons_last_name ON persons(last_name);
    CREATE INDEX IF NOT EXISTS idx_persons_updated_at ON persons(updated_at);

    CREATE TABLE IF NOT EXISTS families (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gramps_id TEXT NOT NULL UNIQUE,
        father_id INTEGER REFERENCES persons(id) ON DELETE SET NULL,
        mother_id INTEGER REFERENCES persons(id) ON DELETE SET NULL
    );
    CREATE INDEX IF NOT EXISTS idx_families_father ON families(father_id);
    CREATE INDEX IF NOT EXISTS idx_families_mother ON families(mother_id);

    -- Child order is data: rows are replaced in full on every import.
    CREATE TABLE IF NOT EXISTS family_children (
        family_id INTEGER NOT NULL REFERENCES families(id) ON DELETE CASCADE,
        child_id INTEGER NOT NULL REFERENCES persons(id) ON DELETE CASCADE,
        position INTEGER NOT NULL DEFAULT 0,
        UNIQUE (family_id, child_id)
    );
    CREATE INDEX IF NOT EXISTS idx_family_children_child ON family_children(child_id);

    CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gramps_id TEXT NOT NULL UNIQUE,
        event_type TEXT NOT NULL DEFAULT 'unknown',
        date TEXT,
        place_id INTEGER REFERENCES places(id) ON DELETE SET NULL,
        description TEXT NOT NULL DEFAULT '',
        person_id INTEGER REFERENCES persons(id) ON DELETE CASCADE,
        family_id INTEGER REFERENCES families(id) ON DELETE CASCADE
    );
    CREATE INDEX IF NOT EXISTS idx_events_person ON events(person_id);
    CREATE INDEX IF NOT EXISTS idx_events_family ON events(family_id);

    CREATE TABLE IF NOT EXISTS notes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gramps_id TEXT NOT NULL UNIQUE,
        text TEXT NOT NULL DEFAULT '',
        person_id INTEGER REFERENCES persons(id) ON DELETE CASCADE,
        family_id INTEGER REFERENCES families(id) ON DELETE CASCADE,
        event_id INTEGER REFERENCES events(id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS media (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        gramps_id TEXT NOT NULL UNIQUE,
        file_path TEXT NOT NULL DEFAULT '',
        mime_type TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS person_media (
        person_id INTEGER NOT NULL REFERENCES persons(id) ON DELETE CASCADE,
        media_id INTEGER NOT NULL REFERENCES media(id) ON DELETE CASCADE,
        position INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (person_id, media_id)
    );

    CREATE TABLE IF NOT EXISTS import_batches (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        source_path TEXT NOT NULL,
        imported_at TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        summary_json TEXT,
        error TEXT,
        CHECK (status IN ('pending', 'completed', 'failed'))
    );

    CREATE TABLE IF NOT EXISTS metadata (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

/// Apply the schema to the database.
///
/// This uses `execute_batch` to run the entire DDL script.
/// It is idempotent because all statements use `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails or pragmas cannot be set.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;

    // Set journal mode to WAL for concurrency
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // Enable foreign keys
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(())
}
