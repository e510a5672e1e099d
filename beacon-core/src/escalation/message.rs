//! Escalation message templates

use crate::types::{Insight, MAX_ESCALATION_LEVEL};

/// Markup flavour of the rendered message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageFormat {
    /// Slack mrkdwn, for DMs and channel posts
    Slack,
    /// GitHub-flavoured Markdown, for external comments
    Markdown,
}

/// Render the escalation message for `insight` at `level`.
///
/// Both formats carry the urgency label, age, title, description and a
/// `Level N/3` marker.
pub fn escalation_message(
    insight: &Insight,
    age_days: i64,
    level: u8,
    format: MessageFormat,
) -> String {
    let label = insight.severity.urgency_label();
    let days = if age_days == 1 { "day" } else { "days" };
    let level_marker = format!("Level {}/{}", level, MAX_ESCALATION_LEVEL);

    match format {
        MessageFormat::Slack => format!(
            "*{label}*: {kind} open for {age_days} {days}\n*{title}*\n{description}\n_{level_marker}_",
            kind = insight.insight_type.display_name(),
            title = insight.title,
            description = insight.description,
        ),
        MessageFormat::Markdown => format!(
            "**{label}**: {kind} open for {age_days} {days}\n\n### {title}\n\n{description}\n\n_{level_marker} automated escalation_",
            kind = insight.insight_type.display_name(),
            title = insight.title,
            description = insight.description,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InsightType, Severity};
    use chrono::Utc;

    fn insight(severity: Severity) -> Insight {
        Insight::new(
            "u1",
            InsightType::StalePr,
            severity,
            "PR #42 needs review",
            "Opened by sam, no reviewers assigned",
            Utc::now(),
        )
    }

    #[test]
    fn test_urgency_label_follows_severity() {
        for (severity, label) in [
            (Severity::Info, "*REMINDER*"),
            (Severity::Warning, "*URGENT*"),
            (Severity::Critical, "*CRITICAL*"),
        ] {
            let text = escalation_message(&insight(severity), 4, 1, MessageFormat::Slack);
            assert!(text.starts_with(label), "{}", text);
        }
    }

    #[test]
    fn test_message_carries_all_fields() {
        let text = escalation_message(&insight(Severity::Warning), 5, 2, MessageFormat::Slack);
        assert!(text.contains("open for 5 days"));
        assert!(text.contains("PR #42 needs review"));
        assert!(text.contains("no reviewers assigned"));
        assert!(text.contains("Level 2/3"));

        let md = escalation_message(&insight(Severity::Critical), 1, 3, MessageFormat::Markdown);
        assert!(md.starts_with("**CRITICAL**"));
        assert!(md.contains("open for 1 day\n"));
        assert!(md.contains("### PR #42 needs review"));
        assert!(md.contains("Level 3/3"));
    }
}
