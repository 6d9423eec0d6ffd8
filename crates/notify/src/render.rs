//! Alert presentation. Severity branding, HTML layout and escaping live
//! here so the detection side only hands over structured facts.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::dispatcher::Alert;

/// Alert severity. Only risk levels that notify have a severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// Structured facts about a detected risk event.
#[derive(Debug, Clone)]
pub struct CrisisNotice {
    pub severity: Severity,
    pub incident_id: Uuid,
    /// Provider conversation id, if the payload carried one.
    pub conversation_id: Option<String>,
    pub trigger: Option<String>,
    pub reasons: Vec<String>,
    /// Soft language combined with planning words reached high severity.
    pub escalated: bool,
    pub detected_at: DateTime<Utc>,
}

/// Render a crisis notice into a deliverable alert.
pub fn crisis_alert(notice: &CrisisNotice, recipient: &str) -> Alert {
    let subject = match notice.severity {
        Severity::High => "⚠️ CRISIS DETECTED in Ray Session (HIGH RISK)".to_owned(),
        Severity::Medium => "Elevated risk detected in Ray Session (MEDIUM)".to_owned(),
    };
    let (heading, color) = match notice.severity {
        Severity::High => ("Crisis Alert", "#b91c1c"),
        Severity::Medium => ("Risk Alert", "#b45309"),
    };

    let trigger = notice.trigger.as_deref().unwrap_or("(none)");
    let conversation = notice.conversation_id.as_deref().unwrap_or("(unknown)");
    let time = notice.detected_at.format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let path = if notice.escalated {
        "distress language combined with planning language"
    } else if notice.severity == Severity::High {
        "explicit crisis phrase"
    } else {
        "multiple distress phrases"
    };

    let reasons_html: String = notice
        .reasons
        .iter()
        .map(|r| format!("<li>{}</li>", escape_html(r)))
        .collect();

    let body_html = format!(
        "<h1 style=\"color:{color}\">{heading}</h1>\
         <p><strong>Severity:</strong> {severity}</p>\
         <p><strong>Detected by:</strong> {path}</p>\
         <p><strong>Trigger phrase:</strong> {trigger}</p>\
         <p><strong>Conversation ID:</strong> {conversation}</p>\
         <p><strong>Incident ID:</strong> {incident}</p>\
         <p><strong>Time:</strong> {time}</p>\
         <ul>{reasons_html}</ul>\
         <hr />\
         <p>Please review the transcript in the conversation provider dashboard immediately.</p>",
        severity = notice.severity.as_str().to_uppercase(),
        trigger = escape_html(trigger),
        conversation = escape_html(conversation),
        incident = notice.incident_id,
    );

    let body_text = format!(
        "{heading}\n\
         Severity: {severity}\n\
         Detected by: {path}\n\
         Trigger phrase: {trigger}\n\
         Conversation ID: {conversation}\n\
         Incident ID: {incident}\n\
         Time: {time}\n\
         Reasons: {reasons}\n\n\
         Please review the transcript in the conversation provider dashboard immediately.",
        severity = notice.severity.as_str().to_uppercase(),
        incident = notice.incident_id,
        reasons = notice.reasons.join(", "),
    );

    Alert {
        subject,
        body_html,
        body_text,
        recipient: recipient.to_owned(),
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
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
