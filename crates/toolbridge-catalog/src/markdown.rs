//! Markdown rendering of the catalog document.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Render the catalog as a Markdown table.
pub(crate) fn render(generated_at: DateTime<Utc>, tools: &[Value]) -> String {
    let mut lines = vec![
        "# Tool Catalog".to_string(),
        String::new(),
        format!("Generated: {}", generated_at.to_rfc3339()),
        String::new(),
        "| Tool Name | Description | Input Parameters | Origin | Sandbox Status | Last Updated |"
            .to_string(),
        "| --- | --- | --- | --- | --- | --- |".to_string(),
    ];

    for entry in tools {
        let params = entry
            .get("input_summary")
            .and_then(Value::as_object)
            .map(|summary| {
                summary
                    .iter()
                    .map(|(key, value)| match value.as_str() {
                        Some(t) if !t.is_empty() => format!("{}:{}", escape(key), escape(t)),
                        _ => escape(key),
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();

        lines.push(format!(
            "| {} | {} | {} | {} | {} | {} |",
            escape(field(entry, "name")),
            escape(field(entry, "description")),
            if params.is_empty() { "-".to_string() } else { params },
            escape(field(entry, "origin")),
            escape(field(entry, "sandbox_status")),
            escape(field(entry, "last_updated")),
        ));
    }

    lines.join("\n")
}

fn field<'a>(entry: &'a Value, key: &str) -> &'a str {
    entry.get(key).and_then(Value::as_str).unwrap_or("")
}

fn escape(value: &str) -> String {
    value.replace('|', "\\|")
}
