//! Expansion of printed values
//!
//! Used when variable objects are turned off: locals arrive as printed text
//! (`{x = 1, next = 0x0, pts = {{x = 1}, {x = 2}}}`) and are split into
//! children here.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedChild {
    pub name: String,
    /// Printed value of the child
    pub value: String,
    /// Expression that evaluates to the child
    pub expression: String,
    pub compound: bool,
}

/// Whether printed text is an aggregate the host can expand
pub fn is_compound(text: &str) -> bool {
    text.trim_start().starts_with('{')
}

/// Split an aggregate's printed text into its children
///
/// Scalars yield no children.
pub fn expand(expression: &str, text: &str) -> Vec<ExpandedChild> {
    let text = text.trim();
    let Some(inner) = text.strip_prefix('{').and_then(|t| t.strip_suffix('}')) else {
        return Vec::new();
    };

    split_top_level(inner)
        .into_iter()
        .enumerate()
        .filter(|(_, part)| !part.is_empty())
        .map(|(index, part)| {
            let (name, value) = match split_assignment(part) {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => (format!("[{index}]"), part.to_string()),
            };
            let expression = if name.starts_with('[') {
                format!("{expression}{name}")
            } else {
                format!("{expression}.{name}")
            };
            ExpandedChild {
                compound: is_compound(&value),
                name,
                value,
                expression,
            }
        })
        .collect()
}

/// Split on commas that are not nested, quoted or inside a `<...>` marker
fn split_top_level(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'"' | b'\'') => i = closing_quote(bytes, i, quote),
            b'<' => {
                if let Some(end) = marker_end(bytes, i) {
                    i = end;
                }
            }
            b'{' | b'(' | b'[' => depth += 1,
            b'}' | b')' | b']' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(text[start..].trim());
    parts
}

/// Index of the quote closing the one at `open`, or the last byte when
/// unterminated
fn closing_quote(bytes: &[u8], open: usize, quote: u8) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 1,
            b if b == quote => return i,
            _ => {}
        }
        i += 1;
    }
    bytes.len() - 1
}

/// Index of the `>` closing a marker such as `<repeats 16 times>` or a
/// template argument list
///
/// `None` when the `<` is a comparison: an `=` or a brace comes before any
/// closing `>`.
fn marker_end(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'<' => depth += 1,
            b'>' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            b'=' | b'{' | b'}' => return None,
            _ => {}
        }
    }
    None
}

/// `name = value` at the top level of one element
fn split_assignment(part: &str) -> Option<(&str, &str)> {
    let (name, value) = part.split_once(" = ")?;
    let name = name.trim();
    let simple = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '[' | ']' | ':' | '<' | '>' | ' '));
    simple.then_some((name, value.trim()))
}
