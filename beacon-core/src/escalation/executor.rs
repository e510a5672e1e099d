//! Escalation dispatch
//!
//! Runs the sub-actions for a target level (DM, channel post, external
//! comment), writes one audit row per sub-action and then advances the
//! insight's tracking fields.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::notify::Notifiers;
use crate::safety::ChannelSafetyValidator;
use crate::store::{AuditTrail, ChannelAllowlist, InsightStore};
use crate::types::*;

use super::message::{escalation_message, MessageFormat};

pub const REASON_NO_DM_HANDLE: &str = "no DM handle";
pub const REASON_NO_SAFE_CHANNELS: &str = "no safe channels configured";
pub const REASON_NO_EXTERNAL_REFERENCE: &str = "no external reference";

/// Sub-action tallies from one [`EscalationExecutor::execute`] call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionCounts {
    pub dm: usize,
    pub channel: usize,
    pub external_comment: usize,
    /// Sub-actions that were gated or whose delivery failed
    pub failed: usize,
}

impl ExecutionCounts {
    fn tally(&mut self, escalation_type: EscalationType, success: bool) {
        if !success {
            self.failed += 1;
            return;
        }
        match escalation_type {
            EscalationType::Dm => self.dm += 1,
            EscalationType::Channel => self.channel += 1,
            EscalationType::ExternalComment => self.external_comment += 1,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.dm + self.channel + self.external_comment
    }

    /// Sub-actions that produced an audit row
    pub fn attempted(&self) -> usize {
        self.succeeded() + self.failed
    }
}

/// Result of one sub-action before it is written to the audit trail
struct Attempt {
    target: Option<String>,
    message: Option<String>,
    error: Option<String>,
}

impl Attempt {
    fn gated(target: Option<String>, reason: &str) -> Self {
        Self {
            target,
            message: None,
            error: Some(reason.to_string()),
        }
    }

    fn sent(target: &str, message: String, result: Result<()>) -> Self {
        Self {
            target: Some(target.to_string()),
            message: Some(message),
            error: result.err().map(|e| e.to_string()),
        }
    }
}

/// Dispatches escalations through the notification capabilities
pub struct EscalationExecutor<'a, S: ?Sized> {
    store: &'a S,
    safety: ChannelSafetyValidator<'a, S>,
    notifiers: &'a Notifiers,
}

impl<'a, S> EscalationExecutor<'a, S>
where
    S: InsightStore + AuditTrail + ChannelAllowlist + ?Sized,
{
    pub fn new(store: &'a S, notifiers: &'a Notifiers) -> Self {
        Self {
            store,
            safety: ChannelSafetyValidator::new(store),
            notifiers,
        }
    }

    /// Channel safety validator used for channel posts
    pub fn safety(&self) -> &ChannelSafetyValidator<'a, S> {
        &self.safety
    }

    /// Run every enabled sub-action up to `target_level`.
    ///
    /// Delivery failures become failed audit rows. Storage failures are
    /// returned. Tracking advances to `target_level` whatever the sub-action
    /// outcomes were, as long as at least one sub-action was attempted.
    /// When every sub-action is switched off nothing is written.
    pub fn execute(
        &self,
        insight: &Insight,
        target_level: u8,
        prefs: &EscalationPreferences,
        user: Option<&User>,
        now: DateTime<Utc>,
    ) -> Result<ExecutionCounts> {
        let target_level = target_level.min(MAX_ESCALATION_LEVEL);
        let age_days = insight.age_days(now);
        let mut counts = ExecutionCounts::default();

        if target_level >= EscalationType::Dm.level() && prefs.dm_enabled {
            let attempt = self.send_dm(insight, user, age_days, target_level);
            self.record(insight, EscalationType::Dm, target_level, attempt, now, &mut counts)?;
        }

        if target_level >= EscalationType::Channel.level() && prefs.channel_enabled {
            let attempt = self.post_to_channel(insight, age_days, target_level);
            self.record(insight, EscalationType::Channel, target_level, attempt, now, &mut counts)?;
        }

        if target_level >= EscalationType::ExternalComment.level() && prefs.external_comment_enabled
        {
            let attempt = self.comment_externally(insight, age_days, target_level);
            self.record(
                insight,
                EscalationType::ExternalComment,
                target_level,
                attempt,
                now,
                &mut counts,
            )?;
        }

        if counts.attempted() == 0 {
            tracing::debug!(
                insight_id = %insight.id,
                level = target_level,
                "No sub-action enabled, tracking left unchanged"
            );
            return Ok(counts);
        }

        self.store
            .update_escalation_tracking(&insight.id, target_level, now)?;

        tracing::info!(
            insight_id = %insight.id,
            level = target_level,
            succeeded = counts.succeeded(),
            failed = counts.failed,
            "Escalated insight"
        );

        Ok(counts)
    }

    fn send_dm(&self, insight: &Insight, user: Option<&User>, age_days: i64, level: u8) -> Attempt {
        let Some(handle) = user.and_then(User::dm_handle) else {
            return Attempt::gated(None, REASON_NO_DM_HANDLE);
        };
        let text = escalation_message(insight, age_days, level, MessageFormat::Slack);
        let result = self.notifiers.direct.send_direct_message(handle, &text);
        Attempt::sent(handle, text, result)
    }

    fn post_to_channel(&self, insight: &Insight, age_days: i64, level: u8) -> Attempt {
        let Some(project) = insight.resolved_project_key() else {
            return Attempt::gated(None, REASON_NO_SAFE_CHANNELS);
        };
        let channels = self.safety.safe_channels_for_project(project);
        let Some(channel) = channels
            .iter()
            .find(|channel| self.safety.is_safe(channel, Some(project)))
        else {
            return Attempt::gated(None, REASON_NO_SAFE_CHANNELS);
        };
        let text = escalation_message(insight, age_days, level, MessageFormat::Slack);
        let result = self.notifiers.channel.post_to_channel(channel, &text);
        Attempt::sent(channel, text, result)
    }

    fn comment_externally(&self, insight: &Insight, age_days: i64, level: u8) -> Attempt {
        let Some(url) = insight.external_reference() else {
            return Attempt::gated(None, REASON_NO_EXTERNAL_REFERENCE);
        };
        let text = escalation_message(insight, age_days, level, MessageFormat::Markdown);
        let result = self.notifiers.external.comment_on_external_item(url, &text);
        Attempt::sent(url, text, result)
    }

    fn record(
        &self,
        insight: &Insight,
        escalation_type: EscalationType,
        level: u8,
        attempt: Attempt,
        now: DateTime<Utc>,
        counts: &mut ExecutionCounts,
    ) -> Result<()> {
        let success = attempt.error.is_none();
        if let Some(error) = &attempt.error {
            tracing::warn!(
                insight_id = %insight.id,
                escalation_type = %escalation_type,
                target = ?attempt.target,
                error = %error,
                "Escalation sub-action failed"
            );
        }

        self.store.record_attempt(&EscalationRecord {
            id: 0,
            insight_id: insight.id.clone(),
            escalation_type,
            escalation_level: level,
            target: attempt.target,
            message: attempt.message,
            success,
            error_message: attempt.error,
            created_at: now,
        })?;

        counts.tally(escalation_type, success);
        Ok(())
    }
}
