use serde_json::Value;

/// Give up backing off after this many characters. A prefix that needs
/// more than this is malformed, not merely incomplete.
const MAX_BACKOFF_CHARS: usize = 64;

/// Parse a possibly-truncated JSON document into its best current value.
///
/// Closes whatever is still open and backs off over trailing tokens that
/// cannot be completed (dangling keys, trailing commas, half-written
/// escapes) until the prefix parses.
pub fn parse_partial_json(text: &str) -> Option<Value> {
    let mut prefix = text.trim();
    let mut dropped = 0;

    while !prefix.is_empty() && dropped <= MAX_BACKOFF_CHARS {
        if let Some(closed) = close_open_scopes(prefix) {
            if let Ok(value) = serde_json::from_str(&closed) {
                return Some(value);
            }
        }
        prefix = drop_last_char(prefix).trim_end();
        dropped += 1;
    }

    None
}

/// Append the quotes and brackets needed to close `prefix`. Returns `None`
/// when the prefix ends mid-escape or has mismatched brackets.
fn close_open_scopes(prefix: &str) -> Option<String> {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for c in prefix.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                if closers.pop() != Some(c) {
                    return None;
                }
            }
            _ => {}
        }
    }

    if escaped {
        return None;
    }

    let mut out = String::with_capacity(prefix.len() + closers.len() + 1);
    out.push_str(prefix);
    if in_string {
        out.push('"');
    }
    out.extend(closers.iter().rev());
    Some(out)
}

fn drop_last_char(s: &str) -> &str {
    match s.char_indices().next_back() {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Accumulates streamed text and yields a new partial value each time the
/// parse result changes.
#[derive(Debug, Default)]
pub struct PartialObjectParser {
    buffer: String,
    last: Option<Value>,
}

impl PartialObjectParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a text delta. Returns the new partial value, or `None` if the
    /// delta did not change what can be parsed.
    pub fn push(&mut self, delta: &str) -> Option<Value> {
        if delta.is_empty() {
            return None;
        }
        self.buffer.push_str(delta);
        let value = parse_partial_json(&self.buffer)?;
        if self.last.as_ref() == Some(&value) {
            return None;
        }
        self.last = Some(value.clone());
        Some(value)
    }

    /// Strict parse of everything received so far.
    pub fn finish(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(self.buffer.trim())
    }

    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}
