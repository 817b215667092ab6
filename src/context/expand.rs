//! `{name}` interpolation used by statement expansion and variable names.

use tracing::warn;

/// Replaces every balanced `{…}` segment with `lookup(inner)`, expanding
/// nested segments first. An unmatched `{` leaves the rest of the text as is.
pub(crate) fn expand_with(statement: &str, lookup: &mut dyn FnMut(&str) -> String) -> String {
    let bytes = statement.as_bytes();
    let mut out = String::with_capacity(statement.len());
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        let Some(close) = matching_brace(bytes, i) else {
            warn!(statement = %statement, offset = i, "unmatched '{{' left unexpanded");
            break;
        };
        out.push_str(&statement[start..i]);
        let inner = expand_with(&statement[i + 1..close], lookup);
        out.push_str(&lookup(&inner));
        i = close + 1;
        start = i;
    }

    out.push_str(&statement[start..]);
    out
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, b) in bytes[open..].iter().enumerate() {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> String {
        match name {
            "id" => "3".to_string(),
            "agent3" => "ready".to_string(),
            other => format!("<{other}>"),
        }
    }

    #[test]
    fn test_plain_text_untouched() {
        assert_eq!(expand_with("no braces", &mut lookup), "no braces");
    }

    #[test]
    fn test_simple_expansion() {
        assert_eq!(expand_with("id={id}!", &mut lookup), "id=3!");
    }

    #[test]
    fn test_nested_expansion() {
        assert_eq!(expand_with("state: {agent{id}}", &mut lookup), "state: ready");
    }

    #[test]
    fn test_unmatched_brace() {
        assert_eq!(expand_with("a {id} {oops", &mut lookup), "a 3 {oops");
        assert_eq!(expand_with("closing } only", &mut lookup), "closing } only");
    }
}
