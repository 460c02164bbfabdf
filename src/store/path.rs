//! Lexical handling of slash-separated keys, shared by the key-value store's
//! callers and the blob store.

/// Shortest equivalent of `path`: repeated slashes collapse, `.` elements
/// drop, and `..` consumes the preceding element. A `..` that would climb
/// above a relative root is kept; one above `/` is dropped. An empty result
/// is `.`.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();

    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            other => parts.push(other),
        }
    }

    let joined = parts.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Joins the non-empty elements with `/` and cleans the result. Returns an
/// empty string when every element is empty.
pub fn join(elems: &[&str]) -> String {
    let nonempty: Vec<&str> = elems.iter().copied().filter(|e| !e.is_empty()).collect();
    if nonempty.is_empty() {
        return String::new();
    }
    clean(&nonempty.join("/"))
}
