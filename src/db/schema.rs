//! Database schema definitions

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::types::{LaurelError, Result};

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new ledger schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!(
            "Migrating ledger schema from v{} to v{}",
            current_version, SCHEMA_VERSION
        );
        migrate_schema(conn, current_version)?;
    } else {
        info!("Ledger schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )
    .map_err(|e| {
        LaurelError::Database(format!("Failed to create schema_version table: {}", e))
    })?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| LaurelError::Database(format!("Failed to read schema_version: {}", e)))?;

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| LaurelError::Database(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| LaurelError::Database(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(USERS_SCHEMA)
        .map_err(|e| LaurelError::Database(format!("Failed to create user tables: {}", e)))?;

    conn.execute_batch(TITLES_SCHEMA)
        .map_err(|e| LaurelError::Database(format!("Failed to create title tables: {}", e)))?;

    conn.execute_batch(MISSIONS_SCHEMA)
        .map_err(|e| LaurelError::Database(format!("Failed to create mission tables: {}", e)))?;

    conn.execute_batch(LEDGER_SCHEMA)
        .map_err(|e| LaurelError::Database(format!("Failed to create ledger tables: {}", e)))?;

    conn.execute_batch(ENVELOPES_SCHEMA)
        .map_err(|e| LaurelError::Database(format!("Failed to create envelope tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| LaurelError::Database(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

fn migrate_schema(conn: &Connection, from_version: i32) -> Result<()> {
    // v1 is the first released schema; later steps are matched on from_version
    info!("No migration steps registered from v{}", from_version);
    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

const USERS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT,
    experience INTEGER NOT NULL DEFAULT 0 CHECK (experience >= 0),
    level INTEGER NOT NULL DEFAULT 1 CHECK (level >= 1),
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);

CREATE TABLE IF NOT EXISTS wallets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL UNIQUE REFERENCES users(id),
    amount INTEGER NOT NULL DEFAULT 0 CHECK (amount >= 0)
);
"#;

const TITLES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS titles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    cost INTEGER CHECK (cost IS NULL OR cost > 0)
);

CREATE TABLE IF NOT EXISTS title_requirements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title_id INTEGER NOT NULL REFERENCES titles(id),
    action_key TEXT NOT NULL,
    goal INTEGER NOT NULL CHECK (goal > 0)
);

CREATE TABLE IF NOT EXISTS title_progress (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    requirement_id INTEGER NOT NULL REFERENCES title_requirements(id),
    progress INTEGER NOT NULL DEFAULT 0 CHECK (progress >= 0),
    completed INTEGER NOT NULL DEFAULT 0,
    UNIQUE (user_id, requirement_id)
);

CREATE TABLE IF NOT EXISTS user_titles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    title_id INTEGER NOT NULL REFERENCES titles(id),
    acquired_at TEXT NOT NULL,
    UNIQUE (user_id, title_id)
);

CREATE TABLE IF NOT EXISTS level_titles (
    level INTEGER PRIMARY KEY CHECK (level >= 1),
    title_id INTEGER NOT NULL REFERENCES titles(id)
);
"#;

const MISSIONS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS missions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    for_all INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'active',
    coins INTEGER NOT NULL DEFAULT 0 CHECK (coins >= 0),
    experience INTEGER NOT NULL DEFAULT 0 CHECK (experience >= 0)
);

CREATE TABLE IF NOT EXISTS mission_requirements (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    mission_id INTEGER NOT NULL REFERENCES missions(id),
    action_key TEXT NOT NULL,
    goal INTEGER NOT NULL CHECK (goal > 0)
);

CREATE TABLE IF NOT EXISTS mission_progress (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    requirement_id INTEGER NOT NULL REFERENCES mission_requirements(id),
    progress INTEGER NOT NULL DEFAULT 0 CHECK (progress >= 0),
    completed INTEGER NOT NULL DEFAULT 0,
    UNIQUE (user_id, requirement_id)
);

CREATE TABLE IF NOT EXISTS mission_assignments (
    user_id INTEGER NOT NULL REFERENCES users(id),
    mission_id INTEGER NOT NULL REFERENCES missions(id),
    PRIMARY KEY (user_id, mission_id)
);

CREATE TABLE IF NOT EXISTS user_missions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    mission_id INTEGER NOT NULL REFERENCES missions(id),
    completed INTEGER NOT NULL DEFAULT 0,
    last_completed_at TEXT,
    UNIQUE (user_id, mission_id)
);

CREATE TABLE IF NOT EXISTS mission_title_rewards (
    mission_id INTEGER NOT NULL REFERENCES missions(id),
    title_id INTEGER NOT NULL REFERENCES titles(id),
    PRIMARY KEY (mission_id, title_id)
);
"#;

const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transaction_types (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);

INSERT OR IGNORE INTO transaction_types (id, name) VALUES
    (1, 'mission_reward'),
    (2, 'title_purchase'),
    (3, 'level_bonus');

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    amount INTEGER NOT NULL,
    description TEXT NOT NULL,
    user_id INTEGER NOT NULL REFERENCES users(id),
    transaction_type_id INTEGER NOT NULL REFERENCES transaction_types(id),
    reference TEXT UNIQUE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS experience_grants (
    reference TEXT PRIMARY KEY,
    user_id INTEGER NOT NULL REFERENCES users(id),
    amount INTEGER NOT NULL CHECK (amount > 0),
    level_before INTEGER NOT NULL,
    level_after INTEGER NOT NULL,
    granted_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS notifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    data TEXT NOT NULL,
    read_at TEXT,
    user_id INTEGER NOT NULL REFERENCES users(id),
    dedupe_key TEXT UNIQUE,
    created_at TEXT NOT NULL
);
"#;

const ENVELOPES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS processed_envelopes (
    idempotency_key TEXT PRIMARY KEY,
    event_type TEXT NOT NULL,
    processed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dead_letters (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    idempotency_key TEXT,
    event_type TEXT,
    payload TEXT NOT NULL,
    reason TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    dead_at TEXT NOT NULL
);
"#;

const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_title_requirements_action_key ON title_requirements(action_key);
CREATE INDEX IF NOT EXISTS idx_title_requirements_title ON title_requirements(title_id);
CREATE INDEX IF NOT EXISTS idx_mission_requirements_action_key ON mission_requirements(action_key);
CREATE INDEX IF NOT EXISTS idx_mission_requirements_mission ON mission_requirements(mission_id);
CREATE INDEX IF NOT EXISTS idx_transactions_user ON transactions(user_id);
CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_dead_letters_dead_at ON dead_letters(dead_at DESC);
"#;
