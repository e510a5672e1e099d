//! Integration tests for the escalation and daily brief passes
//!
//! These tests run the passes against a file-backed database and the
//! in-memory notifier to verify the end-to-end flow: decision, dispatch,
//! audit trail and tracking updates.

use beacon_core::brief::BriefGenerator;
use beacon_core::config::{BriefConfig, EscalationConfig};
use beacon_core::escalation::{determine_level, EscalationCoordinator, SkipReason};
use beacon_core::notify::{Capability, Notifiers, RecordingNotifier};
use beacon_core::types::*;
use beacon_core::{ChannelSafetyValidator, Database};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    db: Database,
    recorder: Arc<RecordingNotifier>,
    notifiers: Notifiers,
}

impl Harness {
    fn new() -> Self {
        beacon_core::logging::init_test();

        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("beacon.db")).unwrap();
        db.migrate().unwrap();

        db.upsert_user(&User {
            id: "u1".to_string(),
            name: "Sam Rivera".to_string(),
            email: Some("sam@example.com".to_string()),
            slack_user_id: Some("U123".to_string()),
            is_active: true,
        })
        .unwrap();
        let mut prefs = EscalationPreferences::new("u1");
        prefs.enable_auto_escalation = true;
        db.upsert_escalation_preferences(&prefs).unwrap();

        let recorder = Arc::new(RecordingNotifier::new());
        let notifiers = Notifiers::uniform(recorder.clone());
        Self {
            _dir: dir,
            db,
            recorder,
            notifiers,
        }
    }

    fn stale_pr(&self, created_at: DateTime<Utc>, project: &str) -> Insight {
        let mut insight = Insight::new(
            "u1",
            InsightType::StalePr,
            Severity::Warning,
            "PR #42 waiting on review",
            "No reviewer activity",
            created_at,
        );
        insight.project_key = Some(project.to_string());
        insight.metadata = serde_json::json!({"pr_url": "https://github.com/acme/app/pull/42"});
        self.db.insert_insight(&insight).unwrap();
        insight
    }

    fn coordinator(&self) -> EscalationCoordinator<'_, Database> {
        EscalationCoordinator::new(&self.db, &self.notifiers, &EscalationConfig::default())
    }

    fn history_types(&self, insight_id: &str) -> Vec<(EscalationType, bool)> {
        self.db
            .get_escalation_history(insight_id)
            .unwrap()
            .iter()
            .map(|r| (r.escalation_type, r.success))
            .collect()
    }
}

// ============================================
// Escalation properties
// ============================================

#[test]
fn test_happy_path_dm() {
    let h = Harness::new();
    let now = Utc::now();
    let insight = h.stale_pr(now - Duration::days(3), "ACME");

    let stats = h.coordinator().run(now).unwrap();
    assert_eq!(stats.escalations_performed, 1);
    assert_eq!(stats.dm, 1);

    let dms = h.recorder.sent_via(Capability::DirectMessage);
    assert_eq!(dms.len(), 1);
    assert_eq!(dms[0].target, "U123");
    assert!(dms[0].text.starts_with("*URGENT*"));
    assert!(dms[0].text.contains("open for 3 days"));
    assert!(dms[0].text.contains("Level 1/3"));

    assert_eq!(h.history_types(&insight.id), vec![(EscalationType::Dm, true)]);
    let stored = h.db.get_insight(&insight.id).unwrap().unwrap();
    assert_eq!(stored.escalation_level, 1);
    assert_eq!(stored.escalation_count, 1);
    assert_eq!(
        stored.last_escalated_at.map(|t| t.timestamp()),
        Some(now.timestamp())
    );
}

#[test]
fn test_cumulative_escalation_at_level_three() {
    let h = Harness::new();
    h.db.add_safe_channel("ACME", "C-acme-internal").unwrap();
    let now = Utc::now();
    let insight = h.stale_pr(now - Duration::days(9), "ACME");

    let stats = h.coordinator().run(now).unwrap();
    assert_eq!((stats.dm, stats.channel, stats.external_comment), (1, 1, 1));

    assert_eq!(
        h.history_types(&insight.id),
        vec![
            (EscalationType::Dm, true),
            (EscalationType::Channel, true),
            (EscalationType::ExternalComment, true),
        ]
    );
    let sent: Vec<_> = h.recorder.sent().into_iter().map(|n| n.capability).collect();
    assert_eq!(
        sent,
        vec![
            Capability::DirectMessage,
            Capability::ChannelPost,
            Capability::ExternalComment
        ]
    );
    assert_eq!(
        h.db.get_insight(&insight.id).unwrap().unwrap().escalation_level,
        3
    );
}

#[test]
fn test_missing_channel_config_fails_closed() {
    let h = Harness::new();
    // Allow-listed for another project only
    h.db.add_safe_channel("CORE", "C-core-internal").unwrap();
    let now = Utc::now();
    let insight = h.stale_pr(now - Duration::days(5), "ACME");

    let stats = h.coordinator().run(now).unwrap();
    assert_eq!(stats.dm, 1);
    assert_eq!(stats.channel, 0);
    assert_eq!(stats.failed_actions, 1);
    assert!(h.recorder.sent_via(Capability::ChannelPost).is_empty());

    let history = h.db.get_escalation_history(&insight.id).unwrap();
    assert_eq!(history.len(), 2);
    assert!(!history[1].success);
    assert_eq!(
        history[1].error_message.as_deref(),
        Some("no safe channels configured")
    );
    assert!(history[1].message.is_none());

    let stored = h.db.get_insight(&insight.id).unwrap().unwrap();
    assert_eq!(stored.escalation_level, 2);
}

#[test]
fn test_channel_safety_is_explicit_and_project_scoped() {
    let h = Harness::new();
    h.db.add_safe_channel("ACME", "C-acme").unwrap();
    h.db.add_safe_channel("CORE", "C-core").unwrap();

    let validator = ChannelSafetyValidator::new(&h.db);
    assert!(validator.is_safe("C-acme", Some("ACME")));
    assert!(!validator.is_safe("C-core", Some("ACME")));
    assert!(!validator.is_safe("C-client-shared", Some("ACME")));
    assert!(!validator.is_safe("C-acme", Some("UNCONFIGURED")));
    assert!(validator.is_safe("C-core", None));
    assert!(!validator.is_safe("", None));

    // Cached global view does not see new rows until invalidated
    h.db.add_safe_channel("NEW", "C-new").unwrap();
    assert!(!validator.is_safe("C-new", None));
    validator.invalidate_cache();
    assert!(validator.is_safe("C-new", None));
}

#[test]
fn test_partial_failure_keeps_other_actions_and_tracking() {
    let h = Harness::new();
    h.db.add_safe_channel("ACME", "C-acme-internal").unwrap();
    h.recorder.fail(Capability::ChannelPost);
    let now = Utc::now();
    let insight = h.stale_pr(now - Duration::days(6), "ACME");

    let stats = h.coordinator().run(now).unwrap();
    assert!(stats.errors.is_empty());
    assert_eq!(stats.dm, 1);
    assert_eq!(stats.failed_actions, 1);

    assert_eq!(
        h.history_types(&insight.id),
        vec![(EscalationType::Dm, true), (EscalationType::Channel, false)]
    );
    let stored = h.db.get_insight(&insight.id).unwrap().unwrap();
    assert_eq!(stored.escalation_level, 2);
    assert_eq!(stored.escalation_count, 1);
}

#[test]
fn test_immediate_rerun_produces_no_new_audit_rows() {
    let h = Harness::new();
    let now = Utc::now();
    let insight = h.stale_pr(now - Duration::days(4), "ACME");

    h.coordinator().run(now).unwrap();
    let second = h.coordinator().run(now + Duration::minutes(5)).unwrap();

    assert_eq!(second.escalations_performed, 0);
    assert_eq!(second.skipped_total(), 1);
    assert_eq!(h.db.get_escalation_history(&insight.id).unwrap().len(), 1);
    assert_eq!(h.recorder.sent().len(), 1);
}

#[test]
fn test_rate_limit_holds_back_next_level_for_24_hours() {
    let h = Harness::new();
    let t0 = Utc::now();
    // Age 4 days 23 hours at t0: level 1 now, level 2 due an hour later
    let insight = h.stale_pr(t0 - Duration::days(5) + Duration::hours(1), "ACME");

    let first = h.coordinator().run(t0).unwrap();
    assert_eq!(first.escalations_performed, 1);

    let blocked = h.coordinator().run(t0 + Duration::hours(2)).unwrap();
    assert_eq!(blocked.skipped[&SkipReason::RateLimited], 1);

    let later = h.coordinator().run(t0 + Duration::hours(25)).unwrap();
    assert_eq!(later.escalations_performed, 1);

    let history = h.db.get_escalation_history(&insight.id).unwrap();
    let levels: Vec<_> = history.iter().map(|r| r.escalation_level).collect();
    // Level 2 has no safe channel configured, so its pass writes DM + channel rows
    assert_eq!(levels, vec![1, 2, 2]);
}

#[test]
fn test_level_never_decreases() {
    let h = Harness::new();
    let now = Utc::now();
    let insight = h.stale_pr(now - Duration::days(8), "ACME");

    h.coordinator().run(now).unwrap();
    assert_eq!(h.db.get_insight(&insight.id).unwrap().unwrap().escalation_level, 3);

    // Thresholds raised afterwards: target drops to 1 but stored level stays
    let mut prefs = h.db.get_escalation_preferences("u1").unwrap().unwrap();
    prefs.dm_threshold_days = 1;
    prefs.channel_threshold_days = 20;
    prefs.critical_threshold_days = 30;
    h.db.upsert_escalation_preferences(&prefs).unwrap();

    let stats = h.coordinator().run(now + Duration::days(2)).unwrap();
    assert_eq!(stats.skipped[&SkipReason::AlreadyAtLevel], 1);

    h.db.update_escalation_tracking(&insight.id, 1, now + Duration::days(3))
        .unwrap();
    assert_eq!(h.db.get_insight(&insight.id).unwrap().unwrap().escalation_level, 3);
}

#[test]
fn test_threshold_boundaries_with_default_preferences() {
    let prefs = EscalationPreferences::new("u1");
    let levels: Vec<u8> = [2, 3, 4, 5, 6, 7, 100]
        .iter()
        .map(|age| determine_level(*age, &prefs))
        .collect();
    assert_eq!(levels, vec![0, 1, 1, 2, 2, 3, 3]);
}

#[test]
fn test_closed_and_opted_out_insights_are_left_alone() {
    let h = Harness::new();
    let now = Utc::now();
    let dismissed = h.stale_pr(now - Duration::days(9), "ACME");
    h.db.dismiss_insight(&dismissed.id, now).unwrap();

    h.db.upsert_user(&User {
        id: "u2".to_string(),
        name: "Opted Out".to_string(),
        email: None,
        slack_user_id: Some("U999".to_string()),
        is_active: true,
    })
    .unwrap();
    h.db.upsert_escalation_preferences(&EscalationPreferences::new("u2"))
        .unwrap();
    let mut other = Insight::new(
        "u2",
        InsightType::StalePr,
        Severity::Critical,
        "PR #7",
        "stale",
        now - Duration::days(9),
    );
    other.project_key = Some("ACME".to_string());
    h.db.insert_insight(&other).unwrap();

    let stats = h.coordinator().run(now).unwrap();
    assert_eq!(stats.total_checked, 1);
    assert_eq!(stats.skipped[&SkipReason::Disabled], 1);
    assert!(h.recorder.sent().is_empty());
}

#[test]
fn test_naive_timestamps_written_by_other_tools() {
    let h = Harness::new();
    let created = (Utc::now() - Duration::days(4))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    h.db.connection()
        .execute(
            "INSERT INTO insights (id, user_id, project_key, insight_type, severity, title, description, created_at)
             VALUES ('legacy-1', 'u1', 'ACME', 'stale_pr', 'info', 'Old PR', 'd', ?1)",
            [created],
        )
        .unwrap();

    let stats = h.coordinator().run(Utc::now()).unwrap();
    assert_eq!(stats.dm, 1);
    let dm = &h.recorder.sent_via(Capability::DirectMessage)[0];
    assert!(dm.text.starts_with("*REMINDER*"));
    assert!(dm.text.contains("open for 4 days"));
}

// ============================================
// Daily brief
// ============================================

#[test]
fn test_digest_truncation_and_delivery_marking() {
    let h = Harness::new();
    let now = Utc::now();

    let specs = [
        (Severity::Info, "i1"),
        (Severity::Critical, "c1"),
        (Severity::Warning, "w1"),
        (Severity::Info, "i2"),
        (Severity::Critical, "c2"),
        (Severity::Info, "i3"),
        (Severity::Warning, "w2"),
        (Severity::Info, "i4"),
    ];
    // Newest first in the store, so insert i1 as the newest
    let mut ids = std::collections::HashMap::new();
    for (n, (severity, title)) in specs.iter().enumerate() {
        let insight = Insight::new(
            "u1",
            InsightType::BudgetAlert,
            *severity,
            *title,
            "details",
            now - Duration::minutes(n as i64),
        );
        h.db.insert_insight(&insight).unwrap();
        ids.insert(*title, insight.id);
    }

    let config = BriefConfig::default();
    let generator = BriefGenerator::new(&h.db, &h.notifiers, &config);
    let stats = generator.send_all_briefs(now).unwrap();
    assert_eq!(stats.sent_via_slack, 1);
    assert_eq!(stats.insights_delivered, 5);

    let slack = &h.recorder.sent_via(Capability::DirectMessage)[0].text;
    let positions: Vec<_> = ["c1", "c2", "w1", "w2", "i1"]
        .iter()
        .map(|t| slack.find(&format!("]* {}\n", t)).unwrap())
        .collect();
    assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", slack);
    assert!(slack.contains("8 pending insights: 2 critical, 2 warning, 4 info"));

    for (title, delivered) in [("c1", true), ("i1", true), ("i2", false), ("i4", false)] {
        let stored = h.db.get_insight(&ids[title]).unwrap().unwrap();
        assert_eq!(stored.delivered_via_slack.is_some(), delivered, "{}", title);
    }
}

#[test]
fn test_brief_skips_insights_already_escalated() {
    let h = Harness::new();
    let now = Utc::now();

    let escalated = Insight::new(
        "u1",
        InsightType::BudgetAlert,
        Severity::Warning,
        "ACME at 90% of budget",
        "Hours nearly used",
        now - Duration::days(4),
    );
    h.db.insert_insight(&escalated).unwrap();

    let config = EscalationConfig {
        insight_types: vec![InsightType::BudgetAlert],
    };
    let stats = EscalationCoordinator::new(&h.db, &h.notifiers, &config)
        .run(now)
        .unwrap();
    assert_eq!(stats.escalations_performed, 1);

    let brief_config = BriefConfig::default();
    let generator = BriefGenerator::new(&h.db, &h.notifiers, &brief_config);
    let stats = generator.send_all_briefs(now).unwrap();
    assert_eq!(stats.insights_delivered, 0);
    assert_eq!(stats.users_skipped, 1);

    let stored = h.db.get_insight(&escalated.id).unwrap().unwrap();
    assert_eq!(stored.escalation_level, 1);
    assert!(stored.delivered_via_slack.is_none());
}
