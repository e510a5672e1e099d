//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Insights, escalation tracking and audit trail
    r#"
    -- ============================================
    -- Directory data (owned by admin tooling, read here)
    -- ============================================

    CREATE TABLE IF NOT EXISTS users (
        id               TEXT PRIMARY KEY,
        name             TEXT NOT NULL,
        email            TEXT,
        slack_user_id    TEXT,
        is_active        INTEGER NOT NULL DEFAULT 1
    );

    -- ============================================
    -- Insights (written by detectors)
    -- ============================================

    CREATE TABLE IF NOT EXISTS insights (
        id                  TEXT PRIMARY KEY,
        user_id             TEXT NOT NULL REFERENCES users(id),
        project_key         TEXT,
        insight_type        TEXT NOT NULL,      -- 'stale_pr', 'budget_alert', ...
        severity            TEXT NOT NULL,      -- 'info', 'warning', 'critical'
        title               TEXT NOT NULL,
        description         TEXT NOT NULL,
        metadata            JSON,
        created_at          DATETIME NOT NULL,

        -- Lifecycle (terminal, set once)
        dismissed_at        DATETIME,
        acted_on_at         DATETIME,

        -- Escalation tracking
        escalation_level    INTEGER NOT NULL DEFAULT 0 CHECK (escalation_level BETWEEN 0 AND 3),
        escalation_count    INTEGER NOT NULL DEFAULT 0,
        last_escalated_at   DATETIME,

        -- Digest delivery (set once per channel)
        delivered_via_slack DATETIME,
        delivered_via_email DATETIME
    );

    CREATE INDEX IF NOT EXISTS idx_insights_active
        ON insights(insight_type, created_at)
        WHERE dismissed_at IS NULL AND acted_on_at IS NULL;
    CREATE INDEX IF NOT EXISTS idx_insights_user ON insights(user_id);

    -- ============================================
    -- Escalation configuration
    -- ============================================

    CREATE TABLE IF NOT EXISTS escalation_preferences (
        user_id                  TEXT PRIMARY KEY REFERENCES users(id),
        enable_auto_escalation   INTEGER NOT NULL DEFAULT 0,
        dm_enabled               INTEGER NOT NULL DEFAULT 1,
        channel_enabled          INTEGER NOT NULL DEFAULT 1,
        external_comment_enabled INTEGER NOT NULL DEFAULT 1,
        dm_threshold_days        INTEGER NOT NULL DEFAULT 3,
        channel_threshold_days   INTEGER NOT NULL DEFAULT 5,
        critical_threshold_days  INTEGER NOT NULL DEFAULT 7,
        updated_at               DATETIME
    );

    CREATE TABLE IF NOT EXISTS project_channel_allowlist (
        project_key      TEXT NOT NULL,
        channel_id       TEXT NOT NULL,
        created_at       DATETIME NOT NULL,

        PRIMARY KEY (project_key, channel_id)
    );

    -- ============================================
    -- Audit trail (append-only)
    -- ============================================

    CREATE TABLE IF NOT EXISTS escalation_history (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        insight_id       TEXT NOT NULL REFERENCES insights(id),
        escalation_type  TEXT NOT NULL,      -- 'dm', 'channel', 'external_comment'
        escalation_level INTEGER NOT NULL,
        target           TEXT,
        message          TEXT,
        success          INTEGER NOT NULL,
        error_message    TEXT,
        created_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_escalation_history_insight
        ON escalation_history(insight_id, id);

    CREATE TRIGGER IF NOT EXISTS escalation_history_no_update
    BEFORE UPDATE ON escalation_history
    BEGIN
        SELECT RAISE(ABORT, 'escalation_history is append-only');
    END;

    CREATE TRIGGER IF NOT EXISTS escalation_history_no_delete
    BEFORE DELETE ON escalation_history
    BEGIN
        SELECT RAISE(ABORT, 'escalation_history is append-only');
    END;
    "#,
    // Version 2: Notification preferences for the daily brief
    r#"
    CREATE TABLE IF NOT EXISTS notification_preferences (
        user_id              TEXT PRIMARY KEY REFERENCES users(id),
        daily_brief_enabled  INTEGER NOT NULL DEFAULT 1,
        slack_enabled        INTEGER NOT NULL DEFAULT 1,
        email_enabled        INTEGER NOT NULL DEFAULT 0
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
