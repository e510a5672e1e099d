//! Brief rendering for plain text, Slack mrkdwn and HTML

use chrono::NaiveDate;

use crate::types::{Insight, Severity};

/// Per-severity totals of the untruncated input
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

impl SeverityCounts {
    pub fn total(&self) -> usize {
        self.critical + self.warning + self.info
    }

    pub(crate) fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::Warning => self.warning += 1,
            Severity::Info => self.info += 1,
        }
    }
}

fn tag(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "CRITICAL",
        Severity::Warning => "WARNING",
        Severity::Info => "INFO",
    }
}

fn headline(date: NaiveDate) -> String {
    date.format("%A, %B %-d, %Y").to_string()
}

fn summary(counts: &SeverityCounts) -> String {
    let noun = if counts.total() == 1 { "insight" } else { "insights" };
    format!(
        "{} pending {}: {} critical, {} warning, {} info",
        counts.total(),
        noun,
        counts.critical,
        counts.warning,
        counts.info
    )
}

fn overflow(counts: &SeverityCounts, shown: usize) -> Option<String> {
    let hidden = counts.total().saturating_sub(shown);
    (hidden > 0).then(|| format!("...and {} more", hidden))
}

pub(crate) fn render_text(
    name: &str,
    date: NaiveDate,
    items: &[Insight],
    counts: &SeverityCounts,
) -> String {
    let mut out = format!("Daily Brief for {} - {}\n{}\n", name, headline(date), summary(counts));
    for insight in items {
        out.push_str(&format!(
            "\n[{}] {}\n  {}\n",
            tag(insight.severity),
            insight.title,
            insight.description
        ));
    }
    if let Some(more) = overflow(counts, items.len()) {
        out.push_str(&format!("\n{}\n", more));
    }
    out
}

pub(crate) fn render_slack(date: NaiveDate, items: &[Insight], counts: &SeverityCounts) -> String {
    let mut out = format!("*Daily Brief* - {}\n_{}_\n", headline(date), summary(counts));
    for insight in items {
        out.push_str(&format!(
            "\n- *[{}]* {}\n    {}",
            tag(insight.severity),
            insight.title,
            insight.description
        ));
    }
    if let Some(more) = overflow(counts, items.len()) {
        out.push_str(&format!("\n\n_{}_", more));
    }
    out
}

pub(crate) fn render_html(
    name: &str,
    date: NaiveDate,
    items: &[Insight],
    counts: &SeverityCounts,
) -> String {
    let mut out = String::new();
    out.push_str("<html><body>\n");
    out.push_str(&format!(
        "<h2>Daily Brief for {}</h2>\n<p>{}</p>\n<p>{}</p>\n<ul>\n",
        escape_html(name),
        escape_html(&headline(date)),
        escape_html(&summary(counts))
    ));
    for insight in items {
        out.push_str(&format!(
            "<li><strong>[{}]</strong> {}<br/>{}</li>\n",
            tag(insight.severity),
            escape_html(&insight.title),
            escape_html(&insight.description)
        ));
    }
    out.push_str("</ul>\n");
    if let Some(more) = overflow(counts, items.len()) {
        out.push_str(&format!("<p><em>{}</em></p>\n", escape_html(&more)));
    }
    out.push_str("</body></html>\n");
    out
}

/// Escape text for inclusion in HTML element content or attributes
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<script>alert("x & 'y'")</script>"#),
            "&lt;script&gt;alert(&quot;x &amp; &#39;y&#39;&quot;)&lt;/script&gt;"
        );
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_summary_pluralizes() {
        let mut counts = SeverityCounts::default();
        counts.add(Severity::Info);
        assert_eq!(summary(&counts), "1 pending insight: 0 critical, 0 warning, 1 info");
        counts.add(Severity::Critical);
        assert!(summary(&counts).starts_with("2 pending insights"));
    }

    #[test]
    fn test_headline_format() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        assert_eq!(headline(date), "Monday, March 4, 2024");
    }
}
