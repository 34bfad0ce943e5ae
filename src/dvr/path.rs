use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::request::StreamRequest;

const DEFAULT_FILENAME: &str = "[stream].[timestamp].flv";

/// Makes sure the template names a file, not just a directory.
pub fn normalize_template(template: &str) -> String {
    let lower = template.to_ascii_lowercase();
    if lower.ends_with(".flv") || lower.ends_with(".mp4") {
        return template.to_string();
    }
    format!("{}/{}", template.trim_end_matches('/'), DEFAULT_FILENAME)
}

/// Resolves stream and time placeholders in a path template, e.g.
/// `/data/[vhost]/[app]/[stream]/[2006]/[01]/[02]/[15].[04].[05].[999].flv`.
pub fn build_path(template: &str, request: &StreamRequest, now: DateTime<Local>) -> PathBuf {
    let path = normalize_template(template)
        .replace("[vhost]", &request.vhost)
        .replace("[app]", &request.app)
        .replace("[stream]", &request.stream)
        .replace("[timestamp]", &now.timestamp_millis().to_string())
        .replace("[2006]", &now.format("%Y").to_string())
        .replace("[01]", &now.format("%m").to_string())
        .replace("[02]", &now.format("%d").to_string())
        .replace("[15]", &now.format("%H").to_string())
        .replace("[04]", &now.format("%M").to_string())
        .replace("[05]", &now.format("%S").to_string())
        .replace("[999]", &now.format("%3f").to_string());
    PathBuf::from(path)
}
