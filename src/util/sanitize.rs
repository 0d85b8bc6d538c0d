//! Log sanitization: strip CR/LF, redact secret-shaped
//! `key=value` pairs, truncate to a bounded length.

const DEFAULT_MAX_LEN: usize = 1000;
const REDACTED_KEYS: &[&str] = &[
    "password",
    "token",
    "secret",
    "apikey",
    "api_key",
    "authorization",
    "bearer",
];

/// Sanitize `s` for safe inclusion in a log line: strip CR/LF, redact
/// `(password|token|secret|apikey|api_key|authorization|bearer)=...`
/// assignments (case-insensitive key, up to the next whitespace), then
/// truncate to `max_len` characters.
pub fn sanitize_for_log(s: &str, max_len: usize) -> String {
    let no_newlines: String = s.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    let redacted = redact_assignments(&no_newlines);
    truncate_chars(&redacted, max_len)
}

/// [`sanitize_for_log`] with the default 1000-character cap.
pub fn sanitize_for_log_default(s: &str) -> String {
    sanitize_for_log(s, DEFAULT_MAX_LEN)
}

fn redact_assignments(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if let Some((key_len, matched)) = matches_redacted_key(&s[i..]) {
            out.push_str(matched);
            // Skip whitespace before an optional separator (=, :), then any
            // whitespace after it — "key=val", "key: val" and "key : val"
            // all land the cursor on the first character of the value.
            let mut j = i + key_len;
            j += whitespace_len(&s[j..]);
            if s[j..].starts_with(['=', ':']) {
                j += s[j..].chars().next().map(char::len_utf8).unwrap_or(0);
                j += whitespace_len(&s[j..]);
            }
            // "Authorization: Bearer <token>" — skip the scheme word itself
            // so the token, not the literal "Bearer", is what gets redacted.
            let scheme_len = word_len(&s[j..]);
            if scheme_len > 0 && s[j..j + scheme_len].eq_ignore_ascii_case("bearer") {
                j += scheme_len;
                j += whitespace_len(&s[j..]);
            }
            let value_len = word_len(&s[j..]);
            if value_len > 0 {
                out.push_str("=<redacted>");
                i = j + value_len;
                continue;
            }
            i += key_len;
            continue;
        }
        let ch = s[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

fn whitespace_len(s: &str) -> usize {
    s.chars().take_while(|c| c.is_whitespace()).map(char::len_utf8).sum()
}

fn word_len(s: &str) -> usize {
    s.chars().take_while(|c| !c.is_whitespace()).map(char::len_utf8).sum()
}

/// Returns `Some((byte_len, matched_text))` when `s` starts with one of the
/// redacted keys (case-insensitive).
fn matches_redacted_key(s: &str) -> Option<(usize, &str)> {
    for key in REDACTED_KEYS {
        if s.len() >= key.len() && s[..key.len()].eq_ignore_ascii_case(key) {
            return Some((key.len(), &s[..key.len()]));
        }
    }
    None
}

fn truncate_chars(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        s.chars().take(max_len).collect()
    }
}
