//! Escalation run coordinator
//!
//! One batch pass: fetch active insights, decide, dispatch, and collect
//! statistics. A failure on one insight never stops the pass.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::EscalationConfig;
use crate::error::Result;
use crate::notify::Notifiers;
use crate::store::EscalationStore;
use crate::types::{Insight, InsightType};

use super::executor::{EscalationExecutor, ExecutionCounts};
use super::policy::{should_escalate, Decision, SkipReason};

/// Statistics for one escalation pass
#[derive(Debug, Default, Clone, Serialize)]
pub struct EscalationRunStats {
    /// Active insights examined
    pub total_checked: usize,
    /// Insights the executor ran for
    pub escalations_performed: usize,
    /// Successful DMs
    pub dm: usize,
    /// Successful channel posts
    pub channel: usize,
    /// Successful external comments
    pub external_comment: usize,
    /// Sub-actions that were gated or failed delivery
    pub failed_actions: usize,
    /// Skipped insights per reason
    pub skipped: BTreeMap<SkipReason, usize>,
    /// Per-insight errors (insight ID, error message)
    pub errors: Vec<(String, String)>,
}

impl EscalationRunStats {
    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }

    fn add_counts(&mut self, counts: &ExecutionCounts) {
        self.escalations_performed += 1;
        self.dm += counts.dm;
        self.channel += counts.channel;
        self.external_comment += counts.external_comment;
        self.failed_actions += counts.failed;
    }
}

/// Dry-run view of one insight's decision
#[derive(Debug, Clone, Serialize)]
pub struct EscalationPreview {
    pub insight_id: String,
    pub user_id: String,
    pub insight_type: InsightType,
    pub title: String,
    pub age_days: i64,
    pub current_level: u8,
    pub decision: Decision,
}

/// What happened to one insight in a pass
enum InsightOutcome {
    Escalated(ExecutionCounts),
    Skipped(SkipReason),
}

/// Coordinates escalation passes over the insight store
pub struct EscalationCoordinator<'a, S: ?Sized> {
    store: &'a S,
    executor: EscalationExecutor<'a, S>,
    insight_types: Vec<InsightType>,
}

impl<'a, S: EscalationStore + ?Sized> EscalationCoordinator<'a, S> {
    pub fn new(store: &'a S, notifiers: &'a Notifiers, config: &EscalationConfig) -> Self {
        Self {
            store,
            executor: EscalationExecutor::new(store, notifiers),
            insight_types: config.insight_types.clone(),
        }
    }

    /// Run one escalation pass at `now`
    pub fn run(&self, now: DateTime<Utc>) -> Result<EscalationRunStats> {
        self.run_with_progress(now, |_, _, _| {})
    }

    /// Run one pass, calling `on_progress(index, total, insight_id)` before
    /// each insight.
    ///
    /// Only a failure to list active insights is returned as an error.
    pub fn run_with_progress<F>(&self, now: DateTime<Utc>, mut on_progress: F) -> Result<EscalationRunStats>
    where
        F: FnMut(usize, usize, &str),
    {
        // Allow-lists may have changed since the last pass
        self.executor.safety().invalidate_cache();

        let insights = self.store.list_active_insights(&self.insight_types)?;
        let total = insights.len();
        let mut stats = EscalationRunStats::default();

        tracing::info!(total, types = ?self.insight_types, "Starting escalation pass");

        for (i, insight) in insights.iter().enumerate() {
            on_progress(i, total, &insight.id);
            stats.total_checked += 1;

            match self.process_insight(insight, now) {
                Ok(InsightOutcome::Escalated(counts)) => stats.add_counts(&counts),
                Ok(InsightOutcome::Skipped(reason)) => {
                    tracing::debug!(insight_id = %insight.id, %reason, "Skipped insight");
                    *stats.skipped.entry(reason).or_default() += 1;
                }
                Err(e) => {
                    tracing::error!(insight_id = %insight.id, error = %e, "Failed to process insight");
                    stats.errors.push((insight.id.clone(), e.to_string()));
                }
            }
        }

        tracing::info!(
            checked = stats.total_checked,
            escalated = stats.escalations_performed,
            skipped = stats.skipped_total(),
            errors = stats.errors.len(),
            "Escalation pass complete"
        );

        Ok(stats)
    }

    /// Decisions for every eligible insight without side effects
    pub fn preview(&self, now: DateTime<Utc>) -> Result<Vec<EscalationPreview>> {
        let insights = self.store.list_active_insights(&self.insight_types)?;
        insights
            .iter()
            .map(|insight| {
                let prefs = self.store.escalation_preferences(&insight.user_id)?;
                Ok(EscalationPreview {
                    insight_id: insight.id.clone(),
                    user_id: insight.user_id.clone(),
                    insight_type: insight.insight_type,
                    title: insight.title.clone(),
                    age_days: insight.age_days(now),
                    current_level: insight.escalation_level,
                    decision: should_escalate(insight, prefs.as_ref(), now),
                })
            })
            .collect()
    }

    fn process_insight(&self, insight: &Insight, now: DateTime<Utc>) -> Result<InsightOutcome> {
        let prefs = self.store.escalation_preferences(&insight.user_id)?;

        match should_escalate(insight, prefs.as_ref(), now) {
            Decision::Skip { reason } => Ok(InsightOutcome::Skipped(reason)),
            Decision::Escalate { target_level } => {
                // `should_escalate` only escalates when prefs exist
                let Some(prefs) = prefs else {
                    return Ok(InsightOutcome::Skipped(SkipReason::NoPreferences));
                };
                let user = self.store.user(&insight.user_id)?;
                let counts =
                    self.executor
                        .execute(insight, target_level, &prefs, user.as_ref(), now)?;
                if counts.attempted() == 0 {
                    return Ok(InsightOutcome::Skipped(SkipReason::NoChannelsEnabled));
                }
                Ok(InsightOutcome::Escalated(counts))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::notify::RecordingNotifier;
    use crate::types::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn setup() -> (Database, Notifiers) {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        for id in ["u1", "u2"] {
            db.upsert_user(&User {
                id: id.to_string(),
                name: id.to_string(),
                email: None,
                slack_user_id: Some(format!("U-{}", id)),
                is_active: true,
            })
            .unwrap();
        }
        let mut prefs = EscalationPreferences::new("u1");
        prefs.enable_auto_escalation = true;
        db.upsert_escalation_preferences(&prefs).unwrap();

        let notifiers = Notifiers::uniform(Arc::new(RecordingNotifier::new()));
        (db, notifiers)
    }

    fn insert(db: &Database, user: &str, insight_type: InsightType, age: i64) -> Insight {
        let insight = Insight::new(
            user,
            insight_type,
            Severity::Warning,
            "t",
            "d",
            Utc::now() - Duration::days(age),
        );
        db.insert_insight(&insight).unwrap();
        insight
    }

    #[test]
    fn test_run_collects_escalations_and_skips() {
        let (db, notifiers) = setup();
        insert(&db, "u1", InsightType::StalePr, 4);
        insert(&db, "u1", InsightType::StalePr, 1);
        insert(&db, "u2", InsightType::StalePr, 9);
        insert(&db, "u1", InsightType::BudgetAlert, 9);

        let coordinator =
            EscalationCoordinator::new(&db, &notifiers, &EscalationConfig::default());
        let stats = coordinator.run(Utc::now()).unwrap();

        assert_eq!(stats.total_checked, 3);
        assert_eq!(stats.escalations_performed, 1);
        assert_eq!(stats.dm, 1);
        assert_eq!(stats.skipped[&SkipReason::NotYetDue], 1);
        assert_eq!(stats.skipped[&SkipReason::NoPreferences], 1);
        assert!(stats.errors.is_empty());
    }

    #[test]
    fn test_empty_type_filter_means_all_types() {
        let (db, notifiers) = setup();
        insert(&db, "u1", InsightType::StalePr, 4);
        insert(&db, "u1", InsightType::BudgetAlert, 4);

        let config = EscalationConfig {
            insight_types: Vec::new(),
        };
        let coordinator = EscalationCoordinator::new(&db, &notifiers, &config);
        let stats = coordinator.run(Utc::now()).unwrap();
        assert_eq!(stats.total_checked, 2);
        assert_eq!(stats.escalations_performed, 2);
    }

    #[test]
    fn test_progress_callback_sees_every_insight() {
        let (db, notifiers) = setup();
        let a = insert(&db, "u1", InsightType::StalePr, 6);
        let b = insert(&db, "u1", InsightType::StalePr, 5);

        let coordinator =
            EscalationCoordinator::new(&db, &notifiers, &EscalationConfig::default());
        let mut seen = Vec::new();
        coordinator
            .run_with_progress(Utc::now(), |i, total, id| {
                seen.push((i, total, id.to_string()))
            })
            .unwrap();

        assert_eq!(seen, vec![(0, 2, a.id), (1, 2, b.id)]);
    }

    #[test]
    fn test_preview_has_no_side_effects() {
        let (db, notifiers) = setup();
        let insight = insert(&db, "u1", InsightType::StalePr, 5);

        let coordinator =
            EscalationCoordinator::new(&db, &notifiers, &EscalationConfig::default());
        let preview = coordinator.preview(Utc::now()).unwrap();

        assert_eq!(preview.len(), 1);
        assert_eq!(preview[0].decision, Decision::Escalate { target_level: 2 });
        assert_eq!(db.count_escalation_history().unwrap(), 0);
        let stored = db.get_insight(&insight.id).unwrap().unwrap();
        assert_eq!(stored.escalation_count, 0);
    }

    #[test]
    fn test_all_channels_disabled_is_skipped_not_escalated() {
        let (db, notifiers) = setup();
        let mut prefs = EscalationPreferences::new("u1");
        prefs.enable_auto_escalation = true;
        prefs.dm_enabled = false;
        prefs.channel_enabled = false;
        prefs.external_comment_enabled = false;
        db.upsert_escalation_preferences(&prefs).unwrap();
        let insight = insert(&db, "u1", InsightType::StalePr, 8);

        let coordinator =
            EscalationCoordinator::new(&db, &notifiers, &EscalationConfig::default());
        let stats = coordinator.run(Utc::now()).unwrap();
        assert_eq!(stats.escalations_performed, 0);
        assert_eq!(stats.skipped[&SkipReason::NoChannelsEnabled], 1);
        assert_eq!(db.count_escalation_history().unwrap(), 0);

        let stored = db.get_insight(&insight.id).unwrap().unwrap();
        assert_eq!(stored.escalation_level, 0);
        assert_eq!(stored.escalation_count, 0);

        // Turning DM back on escalates on the next pass
        prefs.dm_enabled = true;
        db.upsert_escalation_preferences(&prefs).unwrap();
        let stats = coordinator.run(Utc::now()).unwrap();
        assert_eq!(stats.escalations_performed, 1);
        assert_eq!(stats.dm, 1);
    }

    #[test]
    fn test_stats_serialize_skip_reasons_by_name() {
        let mut stats = EscalationRunStats::default();
        stats.skipped.insert(SkipReason::RateLimited, 2);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["skipped"]["rate_limited"], 2);
    }
}
