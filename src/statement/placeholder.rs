//! Placeholder scanning for prepared statements.
//!
//! Recognizes positional `?` and named `:name` markers outside quoted text
//! and comments. Positional markers are named `"0"`, `"1"`, ... in order.

/// One placeholder occurrence in the query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub name: String,
    /// Byte offset of the marker in the original text
    pub offset: usize,
    /// Byte length of the marker, including the `:` prefix
    pub len: usize,
}

/// Result of scanning a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedQuery {
    pub placeholders: Vec<Placeholder>,
    /// The query with every marker replaced by `?`
    pub rewritten: String,
}

pub fn scan(sql: &str) -> ScannedQuery {
    let bytes = sql.as_bytes();
    let mut placeholders = Vec::new();
    let mut positional = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_past(bytes, i + 1, |b, _| b == quote);
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = skip_past(bytes, i + 2, |b, _| b == b'\n');
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                // the closing `*/` cannot reuse the opening `*`
                let body = i + 2;
                i = skip_past(bytes, body, |b, at| b == b'/' && at > body && bytes[at - 1] == b'*');
            }
            b'?' => {
                placeholders.push(Placeholder {
                    name: positional.to_string(),
                    offset: i,
                    len: 1,
                });
                positional += 1;
                i += 1;
            }
            b':' if is_name_start(bytes.get(i + 1)) && (i == 0 || bytes[i - 1] != b':') => {
                let end = (i + 1..bytes.len())
                    .find(|&j| !(bytes[j].is_ascii_alphanumeric() || bytes[j] == b'_'))
                    .unwrap_or(bytes.len());
                placeholders.push(Placeholder {
                    name: sql[i + 1..end].to_string(),
                    offset: i,
                    len: end - i,
                });
                i = end;
            }
            _ => i += 1,
        }
    }

    let mut rewritten = String::with_capacity(sql.len());
    let mut last = 0;
    for placeholder in &placeholders {
        rewritten.push_str(&sql[last..placeholder.offset]);
        rewritten.push('?');
        last = placeholder.offset + placeholder.len;
    }
    rewritten.push_str(&sql[last..]);

    ScannedQuery {
        placeholders,
        rewritten,
    }
}

/// Index just past the first byte at or after `from` matching `end`.
fn skip_past(bytes: &[u8], from: usize, end: impl Fn(u8, usize) -> bool) -> usize {
    (from..bytes.len())
        .find(|&j| end(bytes[j], j))
        .map_or(bytes.len(), |j| j + 1)
}

fn is_name_start(byte: Option<&u8>) -> bool {
    matches!(byte, Some(b) if b.is_ascii_alphabetic() || *b == b'_')
}
