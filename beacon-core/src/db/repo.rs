//! Database repository layer
//!
//! Provides query and insert operations for all entity types.

use crate::error::{Error, Result};
use crate::types::*;
use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// Naive timestamp layouts written by other tools (SQLite `datetime('now')`, ORMs).
const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// Parse a stored timestamp into UTC.
///
/// RFC 3339 values keep their offset; naive values are taken to be UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    // ============================================
    // User operations
    // ============================================

    /// Insert or update a user
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO users (id, name, email, slack_user_id, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                slack_user_id = excluded.slack_user_id,
                is_active = excluded.is_active
            "#,
            params![
                user.id,
                user.name,
                user.email,
                user.slack_user_id,
                user.is_active,
            ],
        )?;
        Ok(())
    }

    /// Get a user by ID
    pub fn get_user(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT * FROM users WHERE id = ?", [id], Self::row_to_user)
            .optional()
            .map_err(Error::from)
    }

    /// List users that should receive notifications
    pub fn list_active_users(&self) -> Result<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM users WHERE is_active = 1 ORDER BY id")?;
        let users = stmt
            .query_map([], Self::row_to_user)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get("id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            slack_user_id: row.get("slack_user_id")?,
            is_active: row.get("is_active")?,
        })
    }

    // ============================================
    // Insight operations
    // ============================================

    /// Insert a new insight (detector entry point)
    pub fn insert_insight(&self, insight: &Insight) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO insights (id, user_id, project_key, insight_type, severity, title,
                                  description, metadata, created_at, dismissed_at, acted_on_at,
                                  escalation_level, escalation_count, last_escalated_at,
                                  delivered_via_slack, delivered_via_email)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            "#,
            params![
                insight.id,
                insight.user_id,
                insight.project_key,
                insight.insight_type.as_str(),
                insight.severity.as_str(),
                insight.title,
                insight.description,
                insight.metadata.to_string(),
                insight.created_at.to_rfc3339(),
                insight.dismissed_at.map(|t| t.to_rfc3339()),
                insight.acted_on_at.map(|t| t.to_rfc3339()),
                insight.escalation_level.min(MAX_ESCALATION_LEVEL),
                insight.escalation_count,
                insight.last_escalated_at.map(|t| t.to_rfc3339()),
                insight.delivered_via_slack.map(|t| t.to_rfc3339()),
                insight.delivered_via_email.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Get an insight by ID
    pub fn get_insight(&self, id: &str) -> Result<Option<Insight>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM insights WHERE id = ?",
            [id],
            Self::row_to_insight,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List active insights (neither dismissed nor acted on), oldest first.
    ///
    /// An empty `types` slice means every type.
    pub fn list_active_insights(&self, types: &[InsightType]) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            "SELECT * FROM insights WHERE dismissed_at IS NULL AND acted_on_at IS NULL",
        );
        if !types.is_empty() {
            sql.push_str(&format!(
                " AND insight_type IN ({})",
                placeholders(types.len())
            ));
        }
        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let insights = stmt
            .query_map(
                params_from_iter(types.iter().map(|t| t.as_str())),
                Self::row_to_insight,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(insights)
    }

    /// List a user's active, never-escalated insights that no digest has
    /// delivered yet, newest first, leaving out `exclude_types`.
    pub fn list_undelivered_insights(
        &self,
        user_id: &str,
        exclude_types: &[InsightType],
    ) -> Result<Vec<Insight>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            r#"
            SELECT * FROM insights
            WHERE user_id = ?
              AND dismissed_at IS NULL
              AND acted_on_at IS NULL
              AND delivered_via_slack IS NULL
              AND delivered_via_email IS NULL
              AND escalation_level = 0
            "#,
        );
        if !exclude_types.is_empty() {
            sql.push_str(&format!(
                " AND insight_type NOT IN ({})",
                placeholders(exclude_types.len())
            ));
        }
        sql.push_str(" ORDER BY created_at DESC, id ASC");

        let params = std::iter::once(user_id).chain(exclude_types.iter().map(|t| t.as_str()));

        let mut stmt = conn.prepare(&sql)?;
        let insights = stmt
            .query_map(params_from_iter(params), Self::row_to_insight)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(insights)
    }

    /// Record an escalation pass on an insight.
    ///
    /// Increments `escalation_count` and sets level and timestamp in one
    /// statement. The stored level never decreases and never exceeds 3.
    pub fn update_escalation_tracking(
        &self,
        insight_id: &str,
        level: u8,
        escalated_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"
            UPDATE insights SET
                escalation_level = MIN(?4, MAX(escalation_level, ?2)),
                escalation_count = escalation_count + 1,
                last_escalated_at = ?3
            WHERE id = ?1
            "#,
            params![
                insight_id,
                level,
                escalated_at.to_rfc3339(),
                MAX_ESCALATION_LEVEL
            ],
        )?;

        if changed == 0 {
            return Err(Error::InsightNotFound(insight_id.to_string()));
        }
        Ok(())
    }

    /// Stamp digest delivery on insights that have not been delivered via
    /// `channel` yet. Returns how many rows changed.
    pub fn mark_delivered(
        &self,
        insight_ids: &[String],
        channel: DigestChannel,
        delivered_at: DateTime<Utc>,
    ) -> Result<usize> {
        let column = match channel {
            DigestChannel::Slack => "delivered_via_slack",
            DigestChannel::Email => "delivered_via_email",
        };
        let sql = format!(
            "UPDATE insights SET {column} = ?1 WHERE id = ?2 AND {column} IS NULL"
        );

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            let stamp = delivered_at.to_rfc3339();
            for id in insight_ids {
                changed += stmt.execute(params![stamp, id])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    /// Dismiss an insight. Returns false if it was already closed or missing.
    pub fn dismiss_insight(&self, insight_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE insights SET dismissed_at = ?2
             WHERE id = ?1 AND dismissed_at IS NULL AND acted_on_at IS NULL",
            params![insight_id, at.to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    /// Record that a remediation action was taken. Returns false if the
    /// insight was already closed or missing.
    pub fn mark_acted_on(&self, insight_id: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE insights SET acted_on_at = ?2
             WHERE id = ?1 AND dismissed_at IS NULL AND acted_on_at IS NULL",
            params![insight_id, at.to_rfc3339()],
        )?;
        Ok(changed > 0)
    }

    fn row_to_insight(row: &Row) -> rusqlite::Result<Insight> {
        let type_idx = row.as_ref().column_index("insight_type")?;
        let type_str: String = row.get(type_idx)?;
        let insight_type = type_str
            .parse::<InsightType>()
            .map_err(|e| conversion_error(type_idx, e))?;

        let severity_str: String = row.get("severity")?;

        let created_idx = row.as_ref().column_index("created_at")?;
        let created_at_str: String = row.get(created_idx)?;
        let created_at = parse_timestamp(&created_at_str).ok_or_else(|| {
            conversion_error(created_idx, format!("invalid created_at: {}", created_at_str))
        })?;

        let metadata_str: Option<String> = row.get("metadata")?;
        let level: i64 = row.get("escalation_level")?;
        let count: i64 = row.get("escalation_count")?;

        Ok(Insight {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            project_key: row.get("project_key")?,
            insight_type,
            severity: severity_str.parse().unwrap_or(Severity::Info),
            title: row.get("title")?,
            description: row.get("description")?,
            metadata: metadata_str
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::json!({})),
            created_at,
            dismissed_at: optional_timestamp(row, "dismissed_at")?,
            acted_on_at: optional_timestamp(row, "acted_on_at")?,
            escalation_level: level.clamp(0, MAX_ESCALATION_LEVEL as i64) as u8,
            escalation_count: count.max(0) as u32,
            last_escalated_at: optional_timestamp(row, "last_escalated_at")?,
            delivered_via_slack: optional_timestamp(row, "delivered_via_slack")?,
            delivered_via_email: optional_timestamp(row, "delivered_via_email")?,
        })
    }

    // ============================================
    // Escalation preference operations
    // ============================================

    /// Insert or update a user's escalation preferences
    pub fn upsert_escalation_preferences(&self, prefs: &EscalationPreferences) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO escalation_preferences (user_id, enable_auto_escalation, dm_enabled,
                                                channel_enabled, external_comment_enabled,
                                                dm_threshold_days, channel_threshold_days,
                                                critical_threshold_days, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(user_id) DO UPDATE SET
                enable_auto_escalation = excluded.enable_auto_escalation,
                dm_enabled = excluded.dm_enabled,
                channel_enabled = excluded.channel_enabled,
                external_comment_enabled = excluded.external_comment_enabled,
                dm_threshold_days = excluded.dm_threshold_days,
                channel_threshold_days = excluded.channel_threshold_days,
                critical_threshold_days = excluded.critical_threshold_days,
                updated_at = excluded.updated_at
            "#,
            params![
                prefs.user_id,
                prefs.enable_auto_escalation,
                prefs.dm_enabled,
                prefs.channel_enabled,
                prefs.external_comment_enabled,
                prefs.dm_threshold_days,
                prefs.channel_threshold_days,
                prefs.critical_threshold_days,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Get a user's escalation preferences. `None` means escalation is off.
    pub fn get_escalation_preferences(&self, user_id: &str) -> Result<Option<EscalationPreferences>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM escalation_preferences WHERE user_id = ?",
            [user_id],
            |row| {
                Ok(EscalationPreferences {
                    user_id: row.get("user_id")?,
                    enable_auto_escalation: row.get("enable_auto_escalation")?,
                    dm_enabled: row.get("dm_enabled")?,
                    channel_enabled: row.get("channel_enabled")?,
                    external_comment_enabled: row.get("external_comment_enabled")?,
                    dm_threshold_days: row.get("dm_threshold_days")?,
                    channel_threshold_days: row.get("channel_threshold_days")?,
                    critical_threshold_days: row.get("critical_threshold_days")?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    // ============================================
    // Notification preference operations
    // ============================================

    /// Insert or update a user's notification preferences
    pub fn upsert_notification_preferences(&self, prefs: &NotificationPreferences) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO notification_preferences (user_id, daily_brief_enabled, slack_enabled, email_enabled)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                daily_brief_enabled = excluded.daily_brief_enabled,
                slack_enabled = excluded.slack_enabled,
                email_enabled = excluded.email_enabled
            "#,
            params![
                prefs.user_id,
                prefs.daily_brief_enabled,
                prefs.slack_enabled,
                prefs.email_enabled,
            ],
        )?;
        Ok(())
    }

    /// Get a user's notification preferences, if a row exists
    pub fn get_notification_preferences(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreferences>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM notification_preferences WHERE user_id = ?",
            [user_id],
            |row| {
                Ok(NotificationPreferences {
                    user_id: row.get("user_id")?,
                    daily_brief_enabled: row.get("daily_brief_enabled")?,
                    slack_enabled: row.get("slack_enabled")?,
                    email_enabled: row.get("email_enabled")?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    // ============================================
    // Channel allow-list operations
    // ============================================

    /// Allow-list a channel as internal-only for a project
    pub fn add_safe_channel(&self, project_key: &str, channel_id: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO project_channel_allowlist (project_key, channel_id, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(project_key, channel_id) DO NOTHING
            "#,
            params![project_key, channel_id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Remove a channel from a project's allow-list. Returns true if it was present.
    pub fn remove_safe_channel(&self, project_key: &str, channel_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "DELETE FROM project_channel_allowlist WHERE project_key = ?1 AND channel_id = ?2",
            params![project_key, channel_id],
        )?;
        Ok(changed > 0)
    }

    /// Channels allow-listed for one project, in the order they were added
    pub fn list_safe_channels(&self, project_key: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT channel_id FROM project_channel_allowlist
             WHERE project_key = ? ORDER BY created_at ASC, rowid ASC",
        )?;
        let channels = stmt
            .query_map([project_key], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(channels)
    }

    /// Every project's allow-list, keyed by project
    pub fn list_all_safe_channels(&self) -> Result<HashMap<String, Vec<String>>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT project_key, channel_id FROM project_channel_allowlist
             ORDER BY project_key, created_at ASC, rowid ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut by_project: HashMap<String, Vec<String>> = HashMap::new();
        for row in rows {
            let (project, channel) = row?;
            by_project.entry(project).or_default().push(channel);
        }
        Ok(by_project)
    }

    // ============================================
    // Escalation history operations
    // ============================================

    /// Append an audit row. Returns the new row ID.
    pub fn insert_escalation_record(&self, record: &EscalationRecord) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO escalation_history (insight_id, escalation_type, escalation_level,
                                            target, message, success, error_message, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                record.insight_id,
                record.escalation_type.as_str(),
                record.escalation_level,
                record.target,
                record.message,
                record.success,
                record.error_message,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Audit rows for one insight in insertion order
    pub fn get_escalation_history(&self, insight_id: &str) -> Result<Vec<EscalationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT * FROM escalation_history WHERE insight_id = ? ORDER BY id ASC")?;
        let records = stmt
            .query_map([insight_id], Self::row_to_escalation_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Most recent audit rows across all insights, newest first
    pub fn list_recent_escalation_history(&self, limit: usize) -> Result<Vec<EscalationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM escalation_history ORDER BY id DESC LIMIT ?")?;
        let records = stmt
            .query_map([limit as i64], Self::row_to_escalation_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Total number of audit rows
    pub fn count_escalation_history(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM escalation_history", [], |r| r.get(0))?;
        Ok(count)
    }

    fn row_to_escalation_record(row: &Row) -> rusqlite::Result<EscalationRecord> {
        let type_idx = row.as_ref().column_index("escalation_type")?;
        let type_str: String = row.get(type_idx)?;
        let escalation_type = type_str
            .parse::<EscalationType>()
            .map_err(|e| conversion_error(type_idx, e))?;
        let level: i64 = row.get("escalation_level")?;

        Ok(EscalationRecord {
            id: row.get("id")?,
            insight_id: row.get("insight_id")?,
            escalation_type,
            escalation_level: level.clamp(0, MAX_ESCALATION_LEVEL as i64) as u8,
            target: row.get("target")?,
            message: row.get("message")?,
            success: row.get("success")?,
            error_message: row.get("error_message")?,
            created_at: optional_timestamp(row, "created_at")?.unwrap_or_else(Utc::now),
        })
    }
}

fn optional_timestamp(row: &Row, column: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let value: Option<String> = row.get(column)?;
    Ok(value.as_deref().and_then(parse_timestamp))
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}
