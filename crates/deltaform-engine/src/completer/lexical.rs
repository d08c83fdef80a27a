//! Phase L: lexical normalization.
//!
//! Character-level cleanup that never alters structural token count or
//! nesting, and never reaches inside string literals. Steps produced
//! here carry confidence >= 0.9.

use deltaform_core::repair::{RepairPhase, RepairStep};

/// Result of the lexical pass.
pub(crate) struct LexicalOutcome {
    pub text: String,
    pub steps: Vec<RepairStep>,
}

/// Normalize the fragment: replace Unicode whitespace outside strings
/// with ASCII space, then trim trailing whitespace (unless the fragment
/// ends inside an open string, where the whitespace is content).
pub(crate) fn normalize(input: &str) -> LexicalOutcome {
    let mut text = String::with_capacity(input.len());
    let mut steps = Vec::new();

    let mut in_string = false;
    let mut escape = false;
    let mut normalized = 0usize;
    let mut first_norm = 0usize;
    let mut last_norm = 0usize;

    for (pos, ch) in input.char_indices() {
        if in_string {
            text.push(ch);
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if ch == '"' {
            in_string = true;
            text.push(ch);
            continue;
        }
        // JSON insignificant whitespace is space, tab, LF, CR. Any other
        // Unicode whitespace outside a string is invalid JSON; fold it to
        // a plain space.
        if ch.is_whitespace() && !matches!(ch, ' ' | '\t' | '\n' | '\r') {
            if normalized == 0 {
                first_norm = pos;
            }
            last_norm = pos + ch.len_utf8();
            normalized += 1;
            text.push(' ');
            continue;
        }
        text.push(ch);
    }

    if normalized > 0 {
        steps.push(RepairStep::new(
            RepairPhase::Lexical,
            "normalize-whitespace",
            format!("normalized {normalized} non-ASCII whitespace character(s)"),
            first_norm..last_norm,
            0.9,
        ));
    }

    if !in_string {
        let keep = text.trim_end_matches([' ', '\t', '\n', '\r']).len();
        if keep < text.len() {
            let removed = text.len() - keep;
            steps.push(RepairStep::new(
                RepairPhase::Lexical,
                "trim-whitespace",
                format!("trimmed {removed} trailing whitespace byte(s)"),
                keep..text.len(),
                0.95,
            ));
            text.truncate(keep);
        }
    }

    LexicalOutcome { text, steps }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_clean_input_through() {
        let out = normalize(r#"{"a": 1}"#);
        assert_eq!(out.text, r#"{"a": 1}"#);
        assert!(out.steps.is_empty());
    }

    #[test]
    fn trims_trailing_whitespace() {
        let out = normalize("{\"a\": 1}  \n");
        assert_eq!(out.text, r#"{"a": 1}"#);
        assert_eq!(out.steps.len(), 1);
        assert_eq!(out.steps[0].op, "trim-whitespace");
        assert!(out.steps[0].confidence >= 0.9);
    }

    #[test]
    fn normalizes_unicode_whitespace_outside_strings() {
        let out = normalize("{\u{00a0}\"a\":\u{2028}1}");
        assert_eq!(out.text, "{ \"a\": 1}");
        assert_eq!(out.steps.len(), 1);
        assert_eq!(out.steps[0].op, "normalize-whitespace");
    }

    #[test]
    fn leaves_string_contents_alone() {
        let input = "{\"a\": \"x\u{00a0}y  \"}";
        let out = normalize(input);
        assert_eq!(out.text, input);
        assert!(out.steps.is_empty());
    }

    #[test]
    fn does_not_trim_inside_open_string() {
        let input = r#"{"a": "hello   "#;
        let out = normalize(input);
        assert_eq!(out.text, input);
        assert!(out.steps.is_empty());
    }

    #[test]
    fn escaped_quote_does_not_end_string() {
        let input = r#"{"a": "x\"y"}   "#;
        let out = normalize(input);
        assert_eq!(out.text, r#"{"a": "x\"y"}"#);
        assert_eq!(out.steps.len(), 1);
    }
}
