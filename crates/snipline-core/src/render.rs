//! Rendering of promoted snippets into header + source artifacts.
//!
//! The header is a comment block framed by rule lines and followed by one
//! blank line. `hasher::normalize` strips exactly that block, so a rendered
//! artifact hashes the same as the snippet it was rendered from.

use std::path::{Path, PathBuf};

use snipline_state::PromotionRecord;

use crate::domain::Result;
use crate::hasher::{self, HEADER_RULE_CHAR};

const RULE_WIDTH: usize = 55;
const BANNER: &str = "Staged Snippet — PROMOTED TO PRODUCTION";
const TIMESTAMP: &str = "%Y-%m-%dT%H:%M:%SZ";
const FILE_TIMESTAMP: &str = "%Y%m%dT%H%M%S";

/// The header block for a promotion, including the trailing blank line.
pub fn render_header(record: &PromotionRecord) -> String {
    let prefix = record.language.comment_prefix();
    let rule: String = std::iter::repeat(HEADER_RULE_CHAR).take(RULE_WIDTH).collect();
    let fields = [
        ("staging_id", record.staging_id.to_string()),
        ("language", record.language.to_string()),
        (
            "engine",
            format!("{} ({})", record.engine_name, record.engine_code),
        ),
        (
            "slot",
            format!("{} (position {})", record.address(), record.position),
        ),
        ("label", record.label.clone()),
        ("code_hash", record.content_hash.short()),
        ("created", record.created_at.format(TIMESTAMP).to_string()),
        ("promoted", record.promoted_at.format(TIMESTAMP).to_string()),
        ("spec_time", format!("{:.4}s", record.spec_time_secs)),
        ("spec_result", record.spec_result.to_string()),
    ];

    let mut out = format!("{prefix} {rule}\n{prefix}  {BANNER}\n");
    for (name, value) in fields {
        let key = format!("{name}:");
        out.push_str(&format!("{prefix}  {key:<13}{value}\n"));
    }
    out.push_str(&format!("{prefix} {rule}\n\n"));
    out
}

/// Header followed by the normalized source and a final newline.
pub fn render_artifact(record: &PromotionRecord, source: &str) -> String {
    let mut out = render_header(record);
    out.push_str(&hasher::normalize(source));
    out.push('\n');
    out
}

/// `<address>_<staging_id>_<YYYYMMDDTHHMMSS><ext>`
pub fn artifact_file_name(record: &PromotionRecord) -> String {
    format!(
        "{}_{}_{}{}",
        record.address(),
        record.staging_id,
        record.promoted_at.format(FILE_TIMESTAMP),
        record.language.extension()
    )
}

/// Where an artifact lives under `snippets_dir`.
pub fn artifact_path(snippets_dir: &Path, record: &PromotionRecord) -> PathBuf {
    snippets_dir
        .join(record.language.as_str())
        .join(artifact_file_name(record))
}

/// Render and write an artifact, creating directories as needed.
pub fn write_artifact(
    snippets_dir: &Path,
    record: &PromotionRecord,
    source: &str,
) -> Result<PathBuf> {
    let path = artifact_path(snippets_dir, record);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, render_artifact(record, source))?;
    Ok(path)
}
