//! Escalation decision logic
//!
//! Pure functions: no I/O, the current time is always passed in.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::types::{EscalationPreferences, EscalationType, Insight, MAX_ESCALATION_LEVEL};

/// Minimum time between two escalation attempts on one insight
pub const RATE_LIMIT_HOURS: i64 = 24;

/// Why an insight was left alone in a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The owner has no escalation preferences row
    NoPreferences,
    /// The owner has not opted in to auto-escalation
    Disabled,
    /// Younger than every threshold
    NotYetDue,
    /// Already escalated to the level its age calls for
    AlreadyAtLevel,
    /// Escalated less than 24 hours ago
    RateLimited,
    /// Every sub-action up to the due level is switched off
    NoChannelsEnabled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoPreferences => "no_preferences",
            SkipReason::Disabled => "disabled",
            SkipReason::NotYetDue => "not_yet_due",
            SkipReason::AlreadyAtLevel => "already_at_level",
            SkipReason::RateLimited => "rate_limited",
            SkipReason::NoChannelsEnabled => "no_channels_enabled",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of [`should_escalate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Escalate { target_level: u8 },
    Skip { reason: SkipReason },
}

impl Decision {
    fn skip(reason: SkipReason) -> Self {
        Decision::Skip { reason }
    }
}

/// Level an insight of `age_days` should be at.
///
/// Thresholds are checked highest first, so equal thresholds resolve to the
/// highest matching level.
pub fn determine_level(age_days: i64, prefs: &EscalationPreferences) -> u8 {
    if age_days >= prefs.critical_threshold_days {
        3
    } else if age_days >= prefs.channel_threshold_days {
        2
    } else if age_days >= prefs.dm_threshold_days {
        1
    } else {
        0
    }
}

/// Decide whether to escalate `insight` at `now`.
///
/// Skip reasons are checked in declaration order of [`SkipReason`].
pub fn should_escalate(
    insight: &Insight,
    prefs: Option<&EscalationPreferences>,
    now: DateTime<Utc>,
) -> Decision {
    let Some(prefs) = prefs else {
        return Decision::skip(SkipReason::NoPreferences);
    };
    if !prefs.enable_auto_escalation {
        return Decision::skip(SkipReason::Disabled);
    }

    let target_level = determine_level(insight.age_days(now), prefs).min(MAX_ESCALATION_LEVEL);
    if target_level == 0 {
        return Decision::skip(SkipReason::NotYetDue);
    }
    if target_level <= insight.escalation_level {
        return Decision::skip(SkipReason::AlreadyAtLevel);
    }
    if is_rate_limited(insight.last_escalated_at, now) {
        return Decision::skip(SkipReason::RateLimited);
    }
    if !has_enabled_action(prefs, target_level) {
        return Decision::skip(SkipReason::NoChannelsEnabled);
    }

    Decision::Escalate { target_level }
}

/// Whether any sub-action at or below `level` is switched on
pub fn has_enabled_action(prefs: &EscalationPreferences, level: u8) -> bool {
    [
        (EscalationType::Dm, prefs.dm_enabled),
        (EscalationType::Channel, prefs.channel_enabled),
        (EscalationType::ExternalComment, prefs.external_comment_enabled),
    ]
    .into_iter()
    .any(|(escalation_type, enabled)| enabled && escalation_type.level() <= level)
}

fn is_rate_limited(last_escalated_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    last_escalated_at
        .is_some_and(|last| now.signed_duration_since(last) < Duration::hours(RATE_LIMIT_HOURS))
}
