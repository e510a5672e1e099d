//! Repository traits consumed by the escalation and brief passes
//!
//! The passes depend on these traits rather than on [`crate::Database`]
//! directly, so each collaborator can be swapped out in tests. `Database`
//! implements all of them.

use crate::error::Result;
use crate::types::*;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Lifecycle queries and tracking updates over insights
pub trait InsightStore {
    /// Active insights of the given types (all types when empty), oldest first
    fn list_active_insights(&self, types: &[InsightType]) -> Result<Vec<Insight>>;

    /// A user's active, never-delivered insights, newest first
    fn list_undelivered_insights(
        &self,
        user_id: &str,
        exclude_types: &[InsightType],
    ) -> Result<Vec<Insight>>;

    /// Increment the escalation count and record level and time in one write
    fn update_escalation_tracking(
        &self,
        insight_id: &str,
        level: u8,
        escalated_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Stamp digest delivery once per channel; returns the number of rows changed
    fn mark_delivered(
        &self,
        insight_ids: &[String],
        channel: DigestChannel,
        delivered_at: DateTime<Utc>,
    ) -> Result<usize>;
}

/// Append-only record of escalation attempts
pub trait AuditTrail {
    fn record_attempt(&self, record: &EscalationRecord) -> Result<i64>;

    fn history_for(&self, insight_id: &str) -> Result<Vec<EscalationRecord>>;
}

/// Per-user escalation and notification settings
pub trait PreferenceStore {
    /// `None` means the user never opted in
    fn escalation_preferences(&self, user_id: &str) -> Result<Option<EscalationPreferences>>;

    /// Stored preferences, or [`NotificationPreferences::defaults_for`] when absent
    fn notification_preferences(&self, user_id: &str) -> Result<NotificationPreferences>;
}

/// Read-only user directory
pub trait UserDirectory {
    fn user(&self, user_id: &str) -> Result<Option<User>>;

    fn active_users(&self) -> Result<Vec<User>>;
}

/// Read-only view of the per-project internal channel allow-lists
pub trait ChannelAllowlist {
    fn safe_channels(&self, project_key: &str) -> Result<Vec<String>>;

    fn all_safe_channels(&self) -> Result<HashMap<String, Vec<String>>>;
}

/// Everything the escalation pass reads and writes
pub trait EscalationStore:
    InsightStore + AuditTrail + PreferenceStore + UserDirectory + ChannelAllowlist
{
}

impl<T> EscalationStore for T where
    T: InsightStore + AuditTrail + PreferenceStore + UserDirectory + ChannelAllowlist + ?Sized
{
}

/// Everything the daily brief pass reads and writes
pub trait BriefStore: InsightStore + PreferenceStore + UserDirectory {}

impl<T> BriefStore for T where T: InsightStore + PreferenceStore + UserDirectory + ?Sized {}
