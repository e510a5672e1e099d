//! Daily brief generation and delivery
//!
//! Once a day every active user gets one digest of their undelivered
//! insights, via Slack and/or email depending on their preferences.
//! Insights that made it into a delivered brief are marked so they are
//! never sent again.

mod format;

pub use format::{escape_html, SeverityCounts};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::config::BriefConfig;
use crate::error::Result;
use crate::notify::Notifiers;
use crate::store::BriefStore;
use crate::types::{DigestChannel, Insight, NotificationPreferences, Severity, User};

/// Maximum number of insights listed in one brief
pub const MAX_BRIEF_ITEMS: usize = 5;

/// A rendered brief for one user
#[derive(Debug, Clone)]
pub struct BriefContent {
    pub user_id: String,
    pub date: NaiveDate,
    /// Insights included, most severe first
    pub items: Vec<Insight>,
    /// Totals before truncation
    pub counts: SeverityCounts,
    pub text: String,
    pub slack: String,
    pub html: String,
    pub has_content: bool,
}

impl BriefContent {
    pub fn item_ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.id.clone()).collect()
    }
}

/// Build the brief for `user` from their pending insights.
///
/// Keeps the top [`MAX_BRIEF_ITEMS`]: critical, then warning, then info, input
/// order preserved within a severity.
pub fn generate_brief(user: &User, insights: &[Insight], date: NaiveDate) -> BriefContent {
    let mut counts = SeverityCounts::default();
    for insight in insights {
        counts.add(insight.severity);
    }

    let items: Vec<Insight> = [Severity::Critical, Severity::Warning, Severity::Info]
        .iter()
        .flat_map(|severity| insights.iter().filter(move |i| i.severity == *severity))
        .take(MAX_BRIEF_ITEMS)
        .cloned()
        .collect();

    BriefContent {
        user_id: user.id.clone(),
        date,
        text: format::render_text(&user.name, date, &items, &counts),
        slack: format::render_slack(date, &items, &counts),
        html: format::render_html(&user.name, date, &items, &counts),
        has_content: !items.is_empty(),
        items,
        counts,
    }
}

/// Which channels a brief actually reached
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct BriefDelivery {
    pub slack: bool,
    pub email: bool,
    /// Delivery failures, one per failed channel
    pub errors: Vec<String>,
}

impl BriefDelivery {
    pub fn any(&self) -> bool {
        self.slack || self.email
    }
}

/// Statistics for one brief pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct BriefRunStats {
    pub users_processed: usize,
    /// Users with the brief disabled or nothing pending
    pub users_skipped: usize,
    pub sent_via_slack: usize,
    pub sent_via_email: usize,
    pub insights_delivered: usize,
    pub errors: Vec<String>,
}

/// Generates and delivers daily briefs
pub struct BriefGenerator<'a, S: ?Sized> {
    store: &'a S,
    notifiers: &'a Notifiers,
    config: &'a BriefConfig,
}

impl<'a, S: BriefStore + ?Sized> BriefGenerator<'a, S> {
    pub fn new(store: &'a S, notifiers: &'a Notifiers, config: &'a BriefConfig) -> Self {
        Self {
            store,
            notifiers,
            config,
        }
    }

    /// Email subject line for a brief dated `date`
    pub fn subject(&self, date: NaiveDate) -> String {
        format!("{} - {}", self.config.subject_prefix, date.format("%Y-%m-%d"))
    }

    /// Send `brief` through every channel the user enabled and can receive.
    ///
    /// Channels are independent: a failure on one never blocks the other.
    pub fn deliver_brief(
        &self,
        user: &User,
        brief: &BriefContent,
        prefs: &NotificationPreferences,
    ) -> BriefDelivery {
        let mut delivery = BriefDelivery::default();
        if !prefs.daily_brief_enabled || !brief.has_content {
            return delivery;
        }

        if prefs.slack_enabled {
            if let Some(handle) = user.dm_handle() {
                match self.notifiers.direct.send_direct_message(handle, &brief.slack) {
                    Ok(()) => delivery.slack = true,
                    Err(e) => {
                        tracing::warn!(user_id = %user.id, error = %e, "Slack brief delivery failed");
                        delivery.errors.push(format!("{}: slack: {}", user.id, e));
                    }
                }
            }
        }

        if prefs.email_enabled {
            if let Some(address) = user.email_address() {
                let subject = self.subject(brief.date);
                match self
                    .notifiers
                    .email
                    .send_email(address, &subject, &brief.html, &brief.text)
                {
                    Ok(()) => delivery.email = true,
                    Err(e) => {
                        tracing::warn!(user_id = %user.id, error = %e, "Email brief delivery failed");
                        delivery.errors.push(format!("{}: email: {}", user.id, e));
                    }
                }
            }
        }

        delivery
    }

    /// Mark the brief's insights delivered on each channel that succeeded.
    ///
    /// Returns the number of rows changed; repeating the call changes none.
    pub fn mark_delivered(
        &self,
        brief: &BriefContent,
        delivery: &BriefDelivery,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let ids = brief.item_ids();
        let mut changed = 0;
        if delivery.slack {
            changed += self
                .store
                .mark_delivered(&ids, DigestChannel::Slack, now)?;
        }
        if delivery.email {
            changed += self
                .store
                .mark_delivered(&ids, DigestChannel::Email, now)?;
        }
        Ok(changed)
    }

    /// Generate and deliver briefs for every active user.
    ///
    /// Per-user failures are collected; only failing to list users is fatal.
    pub fn send_all_briefs(&self, now: DateTime<Utc>) -> Result<BriefRunStats> {
        let users = self.store.active_users()?;
        let mut stats = BriefRunStats::default();

        tracing::info!(users = users.len(), "Starting daily brief pass");

        for user in &users {
            stats.users_processed += 1;
            if let Err(e) = self.send_user_brief(user, now, &mut stats) {
                tracing::error!(user_id = %user.id, error = %e, "Failed to send daily brief");
                stats.errors.push(format!("{}: {}", user.id, e));
            }
        }

        tracing::info!(
            processed = stats.users_processed,
            skipped = stats.users_skipped,
            slack = stats.sent_via_slack,
            email = stats.sent_via_email,
            delivered = stats.insights_delivered,
            errors = stats.errors.len(),
            "Daily brief pass complete"
        );

        Ok(stats)
    }

    fn send_user_brief(
        &self,
        user: &User,
        now: DateTime<Utc>,
        stats: &mut BriefRunStats,
    ) -> Result<()> {
        let prefs = self.store.notification_preferences(&user.id)?;
        if !prefs.daily_brief_enabled {
            stats.users_skipped += 1;
            return Ok(());
        }

        let pending = self
            .store
            .list_undelivered_insights(&user.id, &self.config.exclude_types)?;
        let brief = generate_brief(user, &pending, now.date_naive());
        if !brief.has_content {
            stats.users_skipped += 1;
            return Ok(());
        }

        let delivery = self.deliver_brief(user, &brief, &prefs);
        stats.errors.extend(delivery.errors.iter().cloned());
        if delivery.slack {
            stats.sent_via_slack += 1;
        }
        if delivery.email {
            stats.sent_via_email += 1;
        }

        if delivery.any() {
            self.mark_delivered(&brief, &delivery, now)?;
            stats.insights_delivered += brief.items.len();
            tracing::debug!(
                user_id = %user.id,
                items = brief.items.len(),
                slack = delivery.slack,
                email = delivery.email,
                "Delivered daily brief"
            );
        }

        Ok(())
    }
}
