//! Content hashing of snippet source.
//!
//! The fingerprint is SHA-256 over `language || 0x00 || normalize(source)`.
//! Normalization only removes what transport or promotion may add: a UTF-8
//! BOM, CR line endings, a promotion header block and trailing newlines.

use snipline_state::{ContentHash, Language};

use crate::domain::{PipelineError, Result};

/// Character used for the rule lines framing a promotion header.
pub const HEADER_RULE_CHAR: char = '═';

/// Normalize source text before hashing.
pub fn normalize(source: &str) -> String {
    let text = source.strip_prefix('\u{feff}').unwrap_or(source);
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let body = strip_promotion_header(&text);
    body.trim_end_matches('\n').to_string()
}

/// Hash already-decoded source.
pub fn hash(language: Language, source: &str) -> ContentHash {
    let normalized = normalize(source);
    let mut buf = Vec::with_capacity(language.as_str().len() + 1 + normalized.len());
    buf.extend_from_slice(language.as_str().as_bytes());
    buf.push(0);
    buf.extend_from_slice(normalized.as_bytes());
    ContentHash::from_bytes(&buf)
}

/// Hash raw bytes, rejecting input that is not UTF-8.
pub fn hash_bytes(language: Language, bytes: &[u8]) -> Result<ContentHash> {
    let source = std::str::from_utf8(bytes)
        .map_err(|e| PipelineError::InvalidInput(format!("source is not valid UTF-8: {e}")))?;
    Ok(hash(language, source))
}

/// Intake checks: non-blank and free of NUL bytes.
pub fn validate_source(source: &str) -> Result<()> {
    if source.trim().is_empty() {
        return Err(PipelineError::InvalidInput("source is empty".into()));
    }
    if source.contains('\0') {
        return Err(PipelineError::InvalidInput(
            "source contains NUL bytes".into(),
        ));
    }
    Ok(())
}

/// Intake checks for a slot label. Labels are rendered into a one-line
/// comment, so they must be non-blank and single-line.
pub fn validate_label(label: &str) -> Result<()> {
    if label.trim().is_empty() {
        return Err(PipelineError::InvalidInput("label is empty".into()));
    }
    if let Some(c) = label
        .chars()
        .find(|c| c.is_control() || matches!(c, '\u{2028}' | '\u{2029}'))
    {
        return Err(PipelineError::InvalidInput(format!(
            "label contains control character {:?}",
            c
        )));
    }
    Ok(())
}

/// A comment line made only of rule characters, e.g. `// ═══…`.
fn is_rule_line(line: &str) -> bool {
    let trimmed = line.trim();
    let rest = trimmed
        .strip_prefix("//")
        .or_else(|| trimmed.strip_prefix('#'));
    match rest {
        Some(rest) => {
            let rest = rest.trim();
            rest.chars().count() >= 3 && rest.chars().all(|c| c == HEADER_RULE_CHAR)
        }
        None => false,
    }
}

/// Drop a leading header block (rule line .. rule line) and the single
/// blank separator line that follows it.
fn strip_promotion_header(text: &str) -> &str {
    let mut lines = text.split_inclusive('\n');
    match lines.next() {
        Some(first) if is_rule_line(first) => {}
        _ => return text,
    }

    let mut offset = text.split_inclusive('\n').next().map_or(0, str::len);
    for line in lines {
        offset += line.len();
        if is_rule_line(line) {
            let rest = &text[offset..];
            return rest.strip_prefix('\n').unwrap_or(rest);
        }
    }
    // Unterminated block: treat it as ordinary source.
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    const FACT: &str = "#include <stdio.h>\nint main(void) { printf(\"3628800\\n\"); return 0; }\n";

    #[test]
    fn hash_is_stable() {
        assert_eq!(hash(Language::C, FACT), hash(Language::C, FACT));
    }

    #[test]
    fn hash_ignores_transport_noise() {
        let crlf = FACT.replace('\n', "\r\n");
        let bom = format!("\u{feff}{FACT}");
        let trailing = format!("{FACT}\n\n\n");
        let base = hash(Language::C, FACT);
        assert_eq!(hash(Language::C, &crlf), base);
        assert_eq!(hash(Language::C, &bom), base);
        assert_eq!(hash(Language::C, &trailing), base);
    }

    #[test]
    fn hash_ignores_injected_header() {
        let rule = "═".repeat(55);
        let header = format!(
            "// {rule}\n//  Staged Snippet — PROMOTED TO PRODUCTION\n//  label:       Factorial\n// {rule}\n\n"
        );
        let with_header = format!("{header}{FACT}");
        assert_eq!(hash(Language::C, &with_header), hash(Language::C, FACT));
    }

    #[test]
    fn hash_keeps_semantic_whitespace() {
        let indented = FACT.replace("int main", "  int main");
        assert_ne!(hash(Language::C, &indented), hash(Language::C, FACT));
        assert_ne!(
            hash(Language::Python, "print(1)\nprint(2)"),
            hash(Language::Python, "print(2)\nprint(1)")
        );
    }

    #[test]
    fn hash_is_language_scoped() {
        assert_ne!(hash(Language::C, FACT), hash(Language::Cpp, FACT));
    }

    #[test]
    fn one_character_change_changes_hash() {
        let changed = FACT.replace("3628800", "3628801");
        assert_ne!(hash(Language::C, &changed), hash(Language::C, FACT));
    }

    #[test]
    fn unterminated_header_is_kept() {
        let text = format!("# {}\nprint(1)\n", "═".repeat(10));
        assert_eq!(normalize(&text), text.trim_end_matches('\n'));
    }

    #[test]
    fn hash_bytes_rejects_invalid_utf8() {
        let err = hash_bytes(Language::C, &[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[test]
    fn validate_label_rejects_line_breaks_and_controls() {
        assert!(validate_label("Factorial").is_ok());
        assert!(validate_label("fact 10 (iterative)").is_ok());
        for bad in ["", "  ", "Fact\nimport os", "Fact\r", "a\tb", "a\u{1b}[2J", "a\u{2028}b"] {
            assert!(
                matches!(validate_label(bad), Err(PipelineError::InvalidInput(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn validate_rejects_blank_and_nul() {
        assert!(validate_source("   \n\t").is_err());
        assert!(validate_source("int x;\0").is_err());
        assert!(validate_source("int x;").is_ok());
    }
}
