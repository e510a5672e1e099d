//! Store trait implementations backed by SQLite

use super::Database;
use crate::error::Result;
use crate::store::*;
use crate::types::*;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

impl InsightStore for Database {
    fn list_active_insights(&self, types: &[InsightType]) -> Result<Vec<Insight>> {
        Database::list_active_insights(self, types)
    }

    fn list_undelivered_insights(
        &self,
        user_id: &str,
        exclude_types: &[InsightType],
    ) -> Result<Vec<Insight>> {
        Database::list_undelivered_insights(self, user_id, exclude_types)
    }

    fn update_escalation_tracking(
        &self,
        insight_id: &str,
        level: u8,
        escalated_at: DateTime<Utc>,
    ) -> Result<()> {
        Database::update_escalation_tracking(self, insight_id, level, escalated_at)
    }

    fn mark_delivered(
        &self,
        insight_ids: &[String],
        channel: DigestChannel,
        delivered_at: DateTime<Utc>,
    ) -> Result<usize> {
        Database::mark_delivered(self, insight_ids, channel, delivered_at)
    }
}

impl AuditTrail for Database {
    fn record_attempt(&self, record: &EscalationRecord) -> Result<i64> {
        self.insert_escalation_record(record)
    }

    fn history_for(&self, insight_id: &str) -> Result<Vec<EscalationRecord>> {
        self.get_escalation_history(insight_id)
    }
}

impl PreferenceStore for Database {
    fn escalation_preferences(&self, user_id: &str) -> Result<Option<EscalationPreferences>> {
        self.get_escalation_preferences(user_id)
    }

    fn notification_preferences(&self, user_id: &str) -> Result<NotificationPreferences> {
        Ok(self
            .get_notification_preferences(user_id)?
            .unwrap_or_else(|| NotificationPreferences::defaults_for(user_id)))
    }
}

impl UserDirectory for Database {
    fn user(&self, user_id: &str) -> Result<Option<User>> {
        self.get_user(user_id)
    }

    fn active_users(&self) -> Result<Vec<User>> {
        self.list_active_users()
    }
}

impl ChannelAllowlist for Database {
    fn safe_channels(&self, project_key: &str) -> Result<Vec<String>> {
        self.list_safe_channels(project_key)
    }

    fn all_safe_channels(&self) -> Result<HashMap<String, Vec<String>>> {
        self.list_all_safe_channels()
    }
}
