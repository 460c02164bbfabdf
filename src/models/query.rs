//! URL query-string encoding used by the cookie payload and share links.
//!
//! Escaping follows the form-encoding rules: ASCII letters, digits and
//! `-_.~` pass through, a space becomes `+`, and every other byte is `%XX`
//! with upper-case hex.

use std::collections::BTreeMap;

/// Escapes `s` for use as a query key or value.
pub fn escape(s: &str) -> String {
    urlencoding::encode(s).replace("%20", "+")
}

/// Reverses [`escape`]. `+` decodes to a space. Returns `None` on a `%` not
/// followed by two hex digits. Invalid UTF-8 is replaced.
pub fn unescape(s: &str) -> Option<String> {
    let mut rest = s;
    while let Some(at) = rest.find('%') {
        let digits = rest.as_bytes().get(at + 1..at + 3)?;
        if !digits.iter().all(u8::is_ascii_hexdigit) {
            return None;
        }
        rest = &rest[at + 3..];
    }
    let spaced = s.replace('+', " ");
    Some(String::from_utf8_lossy(&urlencoding::decode_binary(spaced.as_bytes())).into_owned())
}

/// Multi-valued query parameters, kept sorted by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Values(BTreeMap<String, Vec<String>>);

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every value of `key` with `value`.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.0.insert(key.to_string(), vec![value.into()]);
    }

    pub fn add(&mut self, key: &str, value: impl Into<String>) {
        self.0.entry(key.to_string()).or_default().push(value.into());
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) {
        self.0.remove(key);
    }

    /// `k=v` pairs joined with `&`, sorted by key, values in insertion order.
    pub fn encode(&self) -> String {
        let mut pairs = Vec::new();
        for (k, vs) in &self.0 {
            let k = escape(k);
            for v in vs {
                pairs.push(format!("{}={}", k, escape(v)));
            }
        }
        pairs.join("&")
    }

    /// Parses a query string, skipping any pair that cannot be decoded or
    /// that contains a `;`.
    pub fn parse(query: &str) -> Self {
        let mut values = Values::new();
        for pair in query.split('&') {
            if pair.is_empty() || pair.contains(';') {
                continue;
            }
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            let (Some(k), Some(v)) = (unescape(k), unescape(v)) else {
                continue;
            };
            values.add(&k, v);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_like_form_encoding() {
        assert_eq!(escape("Alice Smith"), "Alice+Smith");
        assert_eq!(escape("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(escape("a/b?c=d&e+f"), "a%2Fb%3Fc%3Dd%26e%2Bf");
        assert_eq!(escape("é"), "%C3%A9");
        assert_eq!(escape("50%"), "50%25");
    }

    #[test]
    fn unescape_rejects_bad_percent() {
        assert_eq!(unescape("Alice+Smith").as_deref(), Some("Alice Smith"));
        assert_eq!(unescape("a%2fb").as_deref(), Some("a/b"));
        assert_eq!(unescape("%C3%A9").as_deref(), Some("é"));
        assert_eq!(unescape("100%"), None);
        assert_eq!(unescape("%zz"), None);
        assert_eq!(unescape("%4"), None);
        assert_eq!(unescape("%ff").as_deref(), Some("\u{fffd}"));
        assert_eq!(unescape("%2B+%25").as_deref(), Some("+ %"));
    }

    #[test]
    fn encode_sorts_keys() {
        let mut v = Values::new();
        v.set("uid", "bob");
        v.set("adm", "false");
        v.set("name", "Bob B");
        v.add("name", "again");
        assert_eq!(v.encode(), "adm=false&name=Bob+B&name=again&uid=bob");
    }

    #[test]
    fn parse_is_lenient() {
        let v = Values::parse("a=1&a=2&bad=%zz&semi=x;y&&flag&b=two+words");
        assert_eq!(v.get("a"), Some("1"));
        assert_eq!(v.get("b"), Some("two words"));
        assert_eq!(v.get("flag"), Some(""));
        assert!(!v.contains("bad"));
        assert!(!v.contains("semi"));
    }
}
