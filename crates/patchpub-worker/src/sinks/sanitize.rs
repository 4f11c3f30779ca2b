//! Attribute-safe text for the descriptor document

use regex::Regex;
use std::sync::LazyLock;

static LINE_BREAKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\r\n]+").expect("valid line break regex"));

static ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^&(?:amp|lt|gt|quot|apos|#[0-9]+|#[xX][0-9A-Fa-f]+);").expect("valid entity regex")
});

static TRUNCATED_ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^&(?:lt|gt)").expect("valid truncated entity regex"));

/// Make free text safe to embed in a double-quoted XML attribute.
///
/// Line breaks collapse to a single space, double quotes become single
/// quotes, raw `<` and `>` are escaped, `&lt`/`&gt` missing their semicolon
/// are completed, and any other `&` that does not start an entity is escaped.
/// Applying it twice gives the same result as applying it once.
pub fn sanitize_markup(text: &str) -> String {
    let flattened = LINE_BREAKS.replace_all(text, " ");
    let mut out = String::with_capacity(flattened.len());
    let mut rest: &str = &flattened;

    while let Some(ch) = rest.chars().next() {
        match ch {
            '"' => {
                out.push('\'');
                rest = &rest[1..];
            },
            '<' => {
                out.push_str("&lt;");
                rest = &rest[1..];
            },
            '>' => {
                out.push_str("&gt;");
                rest = &rest[1..];
            },
            '&' => {
                if let Some(entity) = ENTITY.find(rest) {
                    out.push_str(entity.as_str());
                    rest = &rest[entity.end()..];
                } else if let Some(truncated) = TRUNCATED_ENTITY.find(rest) {
                    out.push_str(truncated.as_str());
                    out.push(';');
                    rest = &rest[truncated.end()..];
                } else {
                    out.push_str("&amp;");
                    rest = &rest[1..];
                }
            },
            _ => {
                out.push(ch);
                rest = &rest[ch.len_utf8()..];
            },
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_breaks_collapse() {
        assert_eq!(sanitize_markup("fix\r\n\r\ncrash\nnow"), "fix crash now");
    }

    #[test]
    fn test_quotes_and_brackets() {
        assert_eq!(
            sanitize_markup(r#"use "safe" mode for <b> & more"#),
            "use 'safe' mode for &lt;b&gt; &amp; more"
        );
    }

    #[test]
    fn test_truncated_entities_are_completed() {
        assert_eq!(sanitize_markup("a &lt b &gt c"), "a &lt; b &gt; c");
        assert_eq!(sanitize_markup("x&ltz"), "x&lt;z");
    }

    #[test]
    fn test_existing_entities_are_kept() {
        assert_eq!(sanitize_markup("&amp; &#39; &#x2F; &quot;"), "&amp; &#39; &#x2F; &quot;");
    }

    #[test]
    fn test_idempotent() {
        let samples = [
            "plain",
            "R&D <release>\n\"notes\" &lt &gt; &amp",
            "&&&;;; <<>> \r\r\n\"\"",
            "Ünïcödé & ümlauts <ok>",
            "&ltx&gtx&#12",
        ];
        for sample in samples {
            let once = sanitize_markup(sample);
            assert_eq!(sanitize_markup(&once), once, "not idempotent for {sample:?}");
        }
    }
}
