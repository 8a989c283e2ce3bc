// src/formatting.rs

use crate::core::{token_pattern, LogEvent, MessageFormatter};
use chrono::{FixedOffset, Offset, Utc};
use regex::Captures;
use std::fmt::Write;

pub const DEFAULT_OUTPUT_TEMPLATE: &str = "[{Level:u3}] {Message}{NewLine}{Exception}";
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %:z";

/// Renders events through an output template such as
/// `"{Timestamp:%H:%M:%S} [{Level:u3}] {Message}{NewLine}{Exception}"`.
///
/// Recognised tokens are `Timestamp`, `Level`, `Message`, `NewLine`,
/// `Exception`, `Properties` and any property carried by the event.
/// Anything else is copied to the output unchanged.
#[derive(Debug, Clone)]
pub struct TemplateFormatter {
    output_template: String,
    timestamp_format: String,
    offset: FixedOffset,
}

impl TemplateFormatter {
    pub fn new(output_template: impl Into<String>) -> Self {
        Self {
            output_template: output_template.into(),
            timestamp_format: DEFAULT_TIMESTAMP_FORMAT.to_string(),
            offset: Utc.fix(),
        }
    }

    /// Sets the strftime pattern used when `{Timestamp}` has no format of its own.
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = format.into();
        self
    }

    /// Renders timestamps in the given UTC offset instead of UTC.
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    fn render_token(&self, event: &LogEvent, name: &str, format: Option<&str>) -> Option<String> {
        let rendered = match name {
            "Timestamp" => {
                let local = event.timestamp.with_timezone(&self.offset);
                let mut out = String::new();
                // chrono reports malformed strftime patterns as a fmt error
                if write!(out, "{}", local.format(format.unwrap_or(&self.timestamp_format))).is_err() {
                    out = local.to_rfc3339();
                }
                out
            }
            "Level" => format_level(event, format),
            "Message" => event.render_message(),
            "NewLine" => "\n".to_string(),
            "Exception" => event.exception.clone().unwrap_or_default(),
            "Properties" => format_properties(event),
            other => event.properties.get(other)?.clone(),
        };
        Some(rendered)
    }
}

impl Default for TemplateFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_TEMPLATE)
    }
}

impl MessageFormatter for TemplateFormatter {
    fn format(&self, event: &LogEvent) -> String {
        token_pattern()
            .replace_all(&self.output_template, |caps: &Captures| {
                let format = caps.get(2).map(|m| m.as_str());
                self.render_token(event, &caps[1], format)
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

fn format_level(event: &LogEvent, format: Option<&str>) -> String {
    match format {
        Some("u3") => event.level.short_name().to_string(),
        Some("w3") => event.level.short_name().to_lowercase(),
        Some("u") => event.level.as_str().to_uppercase(),
        Some("w") => event.level.as_str().to_lowercase(),
        _ => event.level.as_str().to_string(),
    }
}

fn format_properties(event: &LogEvent) -> String {
    let pairs: Vec<String> = event
        .properties
        .iter()
        .map(|(name, value)| format!("{}: \"{}\"", name, value))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}
