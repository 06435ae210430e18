//! Digest formatting: roll an ordered slice of events up into a single
//! message body. Stateless and deterministic; the encoding is chosen by the
//! subscription's aggregation method.

use std::collections::HashMap;

use arxiv_messaging_core::{
    AggregationMethod, Event, EventType, format_date, format_full, format_hour_minute,
};

/// Plain digests show at most this many events per type group.
const PLAIN_GROUP_LIMIT: usize = 5;

/// Boundary for the pre-built multipart/mixed digest. The email provider
/// recognizes the embedded `Content-Type: multipart/mixed` header and forwards
/// the whole document as the raw message.
const MIME_BOUNDARY: &str = "===============arxiv-messaging-digest==";

/// Format `events` for `user_id` with the requested method. Empty input
/// produces an empty string, which callers treat as "nothing to deliver".
pub fn render(user_id: &str, events: &[Event], method: AggregationMethod) -> String {
    if events.is_empty() {
        return String::new();
    }
    match method {
        AggregationMethod::Plain => render_plain(user_id, events),
        AggregationMethod::Mime => render_mime(user_id, events),
        AggregationMethod::Html => render_html(user_id, events),
    }
}

/// Group by event type, preserving the order types are first seen.
fn group_by_type(events: &[Event]) -> Vec<(EventType, Vec<&Event>)> {
    let mut groups: Vec<(EventType, Vec<&Event>)> = Vec::new();
    for event in events {
        match groups.iter_mut().find(|(t, _)| *t == event.event_type) {
            Some((_, group)) => group.push(event),
            None => groups.push((event.event_type, vec![event])),
        }
    }
    groups
}

fn period_line(events: &[Event]) -> String {
    format!(
        "Period: {} to {}",
        format_date(events[0].timestamp),
        format_date(events[events.len() - 1].timestamp)
    )
}

fn metadata_json(metadata: &HashMap<String, serde_json::Value>) -> String {
    serde_json::to_string(metadata).unwrap_or_else(|_| "{}".to_string())
}

fn render_plain(user_id: &str, events: &[Event]) -> String {
    let mut parts = vec![
        format!("Event Summary for User {user_id}"),
        period_line(events),
        format!("Total Events: {}", events.len()),
        "-".repeat(50),
    ];

    for (event_type, group) in group_by_type(events) {
        parts.push(String::new());
        parts.push(format!("{} ({} events):", event_type.as_str(), group.len()));
        parts.push("-".repeat(30));

        let start = group.len().saturating_sub(PLAIN_GROUP_LIMIT);
        for event in &group[start..] {
            parts.push(format!(
                "\u{2022} {} - {}",
                format_hour_minute(event.timestamp),
                event.message
            ));
        }
        if group.len() > PLAIN_GROUP_LIMIT {
            parts.push(format!("... and {} more", group.len() - PLAIN_GROUP_LIMIT));
        }
    }

    parts.join("\n")
}

fn push_mime_part(out: &mut String, filename: &str, content: &str) {
    out.push_str(&format!("--{MIME_BOUNDARY}\n"));
    out.push_str("Content-Type: text/plain; charset=\"utf-8\"\n");
    out.push_str("MIME-Version: 1.0\n");
    out.push_str("Content-Transfer-Encoding: 8bit\n");
    out.push_str(&format!(
        "Content-Disposition: inline; filename=\"{filename}\"\n\n"
    ));
    out.push_str(content);
    out.push('\n');
}

fn render_mime(user_id: &str, events: &[Event]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{MIME_BOUNDARY}\"\n"
    ));
    out.push_str("MIME-Version: 1.0\n");
    out.push_str(&format!("Subject: Event Summary for User {user_id}\n"));
    out.push_str("From: arXiv Messaging System\n");
    out.push_str(&format!("To: {user_id}\n\n"));

    let summary = format!(
        "Event Summary for User {user_id}\n{}\nTotal Events: {}\n{}\n\n",
        period_line(events),
        events.len(),
        "=".repeat(50)
    );
    push_mime_part(&mut out, "summary.txt", &summary);

    for (event_type, group) in group_by_type(events) {
        let mut content = format!(
            "{} Events ({} total)\n{}\n\n",
            event_type.as_str(),
            group.len(),
            "=".repeat(40)
        );
        for event in group {
            content.push_str(&format!(
                "Event ID: {}\nTimestamp: {}\nSender: {}\nSubject: {}\nMessage: {}\nMetadata: {}\n{}\n\n",
                event.event_id,
                format_full(event.timestamp),
                event.sender,
                event.subject,
                event.message,
                metadata_json(&event.metadata),
                "-".repeat(30)
            ));
        }
        let filename = format!("{}_events.txt", event_type.as_str());
        push_mime_part(&mut out, &filename, &content);
    }

    out.push_str(&format!("--{MIME_BOUNDARY}--\n"));
    out
}

/// Minimal HTML escaping for interpolated values.
fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            other => out.push(other),
        }
    }
    out
}

fn render_html(user_id: &str, events: &[Event]) -> String {
    let mut lines = vec![
        "<!DOCTYPE html>".to_string(),
        "<html><head>".to_string(),
        "<title>Event Summary</title>".to_string(),
        "<style>".to_string(),
        "body { font-family: Arial, sans-serif; margin: 20px; }".to_string(),
        "h1 { color: #333; border-bottom: 2px solid #ddd; }".to_string(),
        "h2 { color: #666; margin-top: 30px; }".to_string(),
        ".summary { background: #f5f5f5; padding: 15px; border-radius: 5px; margin-bottom: 20px; }"
            .to_string(),
        "table { border-collapse: collapse; width: 100%; margin-bottom: 30px; }".to_string(),
        "th, td { border: 1px solid #ddd; padding: 8px; text-align: left; }".to_string(),
        "th { background-color: #f2f2f2; font-weight: bold; }".to_string(),
        "tr:nth-child(even) { background-color: #f9f9f9; }".to_string(),
        ".timestamp { white-space: nowrap; }".to_string(),
        ".message { max-width: 300px; word-wrap: break-word; }".to_string(),
        "</style>".to_string(),
        "</head><body>".to_string(),
        format!("<h1>Event Summary for User {}</h1>", escape_html(user_id)),
        "<div class='summary'>".to_string(),
        format!(
            "<strong>Period:</strong> {} to {}<br>",
            format_date(events[0].timestamp),
            format_date(events[events.len() - 1].timestamp)
        ),
        format!("<strong>Total Events:</strong> {}", events.len()),
        "</div>".to_string(),
    ];

    for (event_type, group) in group_by_type(events) {
        lines.push(format!(
            "<h2>{} Events ({} total)</h2>",
            escape_html(event_type.as_str()),
            group.len()
        ));
        lines.push("<table>".to_string());
        lines.push("<tr>".to_string());
        lines.push("<th>Timestamp</th>".to_string());
        lines.push("<th>Event ID</th>".to_string());
        lines.push("<th>Sender</th>".to_string());
        lines.push("<th>Subject</th>".to_string());
        lines.push("<th>Message</th>".to_string());
        lines.push("<th>Metadata</th>".to_string());
        lines.push("</tr>".to_string());

        for event in group {
            lines.push("<tr>".to_string());
            lines.push(format!(
                "<td class='timestamp'>{}</td>",
                escape_html(&format_full(event.timestamp))
            ));
            lines.push(format!("<td>{}</td>", escape_html(&event.event_id)));
            lines.push(format!("<td>{}</td>", escape_html(&event.sender)));
            lines.push(format!("<td>{}</td>", escape_html(&event.subject)));
            lines.push(format!(
                "<td class='message'>{}</td>",
                escape_html(&event.message)
            ));
            lines.push(format!(
                "<td>{}</td>",
                escape_html(&metadata_json(&event.metadata))
            ));
            lines.push("</tr>".to_string());
        }
        lines.push("</table>".to_string());
    }

    lines.push("</body></html>".to_string());
    lines.join("\n")
}
