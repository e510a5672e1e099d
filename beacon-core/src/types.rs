//! Core domain types for beacon
//!
//! These types mirror the persisted data model. Every entity refers to its
//! neighbours by ID only; joins happen in the repository layer.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Insight** | A detected condition (stale PR, budget alert) that needs human attention |
//! | **Escalation level** | Cumulative notification intensity, 0 (none) to 3 (DM + channel + external comment) |
//! | **Escalation preferences** | Per-user opt-in, channel toggles and day thresholds |
//! | **Escalation record** | One audit row per escalation attempt, successful or not |
//! | **Safe channel** | A channel explicitly allow-listed as internal-only for a project |
//! | **Brief** | The once-daily digest of a user's pending insights |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest escalation level. Level semantics are cumulative.
pub const MAX_ESCALATION_LEVEL: u8 = 3;

// ============================================
// Insight
// ============================================

/// Kind of condition an insight describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightType {
    /// Pull request waiting on review for too long
    StalePr,
    /// Project nearing or over its hour budget
    BudgetAlert,
    /// Team members with no logged time
    MissingTimeEntries,
    /// Unusual activity pattern
    Anomaly,
}

impl InsightType {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::StalePr => "stale_pr",
            InsightType::BudgetAlert => "budget_alert",
            InsightType::MissingTimeEntries => "missing_time_entries",
            InsightType::Anomaly => "anomaly",
        }
    }

    /// Returns a human-friendly name
    pub fn display_name(&self) -> &'static str {
        match self {
            InsightType::StalePr => "Stale pull request",
            InsightType::BudgetAlert => "Budget alert",
            InsightType::MissingTimeEntries => "Missing time entries",
            InsightType::Anomaly => "Anomaly",
        }
    }
}

impl std::fmt::Display for InsightType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InsightType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stale_pr" => Ok(InsightType::StalePr),
            "budget_alert" => Ok(InsightType::BudgetAlert),
            "missing_time_entries" => Ok(InsightType::MissingTimeEntries),
            "anomaly" => Ok(InsightType::Anomaly),
            _ => Err(format!("unknown insight type: {}", s)),
        }
    }
}

/// How urgent an insight is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    /// Label placed at the top of escalation messages
    pub fn urgency_label(&self) -> &'static str {
        match self {
            Severity::Info => "REMINDER",
            Severity::Warning => "URGENT",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {}", s)),
        }
    }
}

/// Metadata keys checked, in order, for the external item to comment on.
pub const EXTERNAL_REFERENCE_KEYS: &[&str] = &["pr_url", "external_url"];

/// A detected condition tracked for escalation and digest delivery.
///
/// Detection fields are written once by the detector. Lifecycle and tracking
/// fields are the only ones this crate mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    /// Opaque unique identifier
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Project this insight belongs to, if any
    pub project_key: Option<String>,
    pub insight_type: InsightType,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    /// Detector-specific data (e.g. `pr_url`, `project_key`)
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,

    /// Terminal: user dismissed the insight
    pub dismissed_at: Option<DateTime<Utc>>,
    /// Terminal: a remediation action was taken
    pub acted_on_at: Option<DateTime<Utc>>,

    /// Current escalation level (0..=3), never decreases
    pub escalation_level: u8,
    /// Number of escalation passes that acted on this insight
    pub escalation_count: u32,
    /// Last escalation attempt, drives the 24h rate limit
    pub last_escalated_at: Option<DateTime<Utc>>,

    /// Set once when the daily brief reached the user via Slack
    pub delivered_via_slack: Option<DateTime<Utc>>,
    /// Set once when the daily brief reached the user via email
    pub delivered_via_email: Option<DateTime<Utc>>,
}

impl Insight {
    /// Create a fresh, active insight with no tracking state.
    pub fn new(
        user_id: impl Into<String>,
        insight_type: InsightType,
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            project_key: None,
            insight_type,
            severity,
            title: title.into(),
            description: description.into(),
            metadata: serde_json::json!({}),
            created_at,
            dismissed_at: None,
            acted_on_at: None,
            escalation_level: 0,
            escalation_count: 0,
            last_escalated_at: None,
            delivered_via_slack: None,
            delivered_via_email: None,
        }
    }

    /// An insight is active until it is dismissed or acted on.
    pub fn is_active(&self) -> bool {
        self.dismissed_at.is_none() && self.acted_on_at.is_none()
    }

    /// Whole days elapsed since creation, never negative.
    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created_at).num_days().max(0)
    }

    /// Project key from the column, falling back to `metadata.project_key`.
    pub fn resolved_project_key(&self) -> Option<&str> {
        self.project_key
            .as_deref()
            .and_then(non_blank)
            .or_else(|| {
                self.metadata
                    .get("project_key")
                    .and_then(|v| v.as_str())
                    .and_then(non_blank)
            })
    }

    /// URL of the external item (PR, ticket) this insight is about.
    pub fn external_reference(&self) -> Option<&str> {
        EXTERNAL_REFERENCE_KEYS
            .iter()
            .filter_map(|key| self.metadata.get(*key).and_then(|v| v.as_str()))
            .map(str::trim)
            .find(|url| !url.is_empty())
    }
}

fn non_blank(value: &str) -> Option<&str> {
    Some(value.trim()).filter(|value| !value.is_empty())
}

// ============================================
// Escalation preferences
// ============================================

/// Per-user escalation settings. A missing row means escalation is off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPreferences {
    pub user_id: String,
    /// Opt-in switch for the whole feature
    pub enable_auto_escalation: bool,
    pub dm_enabled: bool,
    pub channel_enabled: bool,
    pub external_comment_enabled: bool,
    /// Age in days at which a DM is sent (level 1)
    pub dm_threshold_days: i64,
    /// Age in days at which a team channel post is added (level 2)
    pub channel_threshold_days: i64,
    /// Age in days at which an external comment is added (level 3)
    pub critical_threshold_days: i64,
}

impl EscalationPreferences {
    /// Defaults used when a row is created: channels on, feature off.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            enable_auto_escalation: false,
            dm_enabled: true,
            channel_enabled: true,
            external_comment_enabled: true,
            dm_threshold_days: 3,
            channel_threshold_days: 5,
            critical_threshold_days: 7,
        }
    }
}

// ============================================
// Escalation history
// ============================================

/// Which notification capability an escalation sub-action used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationType {
    /// Direct message to the insight owner (level 1)
    Dm,
    /// Post to an allow-listed team channel (level 2)
    Channel,
    /// Comment on the external item, e.g. the pull request (level 3)
    ExternalComment,
}

impl EscalationType {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationType::Dm => "dm",
            EscalationType::Channel => "channel",
            EscalationType::ExternalComment => "external_comment",
        }
    }

    /// The level at which this action is first executed
    pub fn level(&self) -> u8 {
        match self {
            EscalationType::Dm => 1,
            EscalationType::Channel => 2,
            EscalationType::ExternalComment => 3,
        }
    }
}

impl std::fmt::Display for EscalationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EscalationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dm" => Ok(EscalationType::Dm),
            "channel" => Ok(EscalationType::Channel),
            "external_comment" => Ok(EscalationType::ExternalComment),
            _ => Err(format!("unknown escalation type: {}", s)),
        }
    }
}

/// One audit row: a single escalation sub-action attempt.
///
/// Rows are append-only. `id` is 0 until the row has been inserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub id: i64,
    pub insight_id: String,
    pub escalation_type: EscalationType,
    /// Target level of the pass that produced this attempt
    pub escalation_level: u8,
    /// User handle, channel ID, or external item URL
    pub target: Option<String>,
    /// Message body sent; None when the attempt was gated before sending
    pub message: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ============================================
// Users and notification preferences
// ============================================

/// Directory record for an insight owner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    /// Slack member ID used as the DM handle
    pub slack_user_id: Option<String>,
    pub is_active: bool,
}

impl User {
    /// DM handle, ignoring blank values
    pub fn dm_handle(&self) -> Option<&str> {
        self.slack_user_id
            .as_deref()
            .map(str::trim)
            .filter(|handle| !handle.is_empty())
    }

    /// Email address, ignoring blank values
    pub fn email_address(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
    }
}

/// Per-user notification category and channel toggles
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub user_id: String,
    /// Category toggle for the daily brief
    pub daily_brief_enabled: bool,
    pub slack_enabled: bool,
    pub email_enabled: bool,
}

impl NotificationPreferences {
    /// Defaults applied when the user has no row: brief on, Slack only.
    pub fn defaults_for(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            daily_brief_enabled: true,
            slack_enabled: true,
            email_enabled: false,
        }
    }
}

/// Channel a daily brief can be delivered through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DigestChannel {
    Slack,
    Email,
}

impl DigestChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestChannel::Slack => "slack",
            DigestChannel::Email => "email",
        }
    }
}

impl std::fmt::Display for DigestChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
