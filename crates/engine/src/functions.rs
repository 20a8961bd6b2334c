//! Built-in matcher functions.

use std::collections::HashMap;
use std::sync::RwLock;

use regex::Regex;

/// Functions callable from a matcher besides role lookups (`g`, `g2`, ...).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Builtin {
    /// `keyMatch(path, pattern)`: `*` matches any suffix.
    KeyMatch,
    /// `keyMatch2(path, pattern)`: `:name` matches one segment, `*` any suffix.
    KeyMatch2,
    /// `regexMatch(value, pattern)`.
    RegexMatch,
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Self> {
        match name {
            "keyMatch" => Some(Builtin::KeyMatch),
            "keyMatch2" => Some(Builtin::KeyMatch2),
            "regexMatch" => Some(Builtin::RegexMatch),
            _ => None,
        }
    }

    pub fn arity(&self) -> usize {
        2
    }
}

/// `/foo/*` matches `/foo/bar`; without `*` the keys must be equal.
pub fn key_match(key: &str, pattern: &str) -> bool {
    match pattern.find('*') {
        Some(star) => key.starts_with(&pattern[..star]),
        None => key == pattern,
    }
}

/// Translate a keyMatch2 pattern into an anchored regular expression.
pub fn key_match2_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            ':' => {
                while chars
                    .peek()
                    .is_some_and(|n| n.is_alphanumeric() || *n == '_')
                {
                    chars.next();
                }
                out.push_str("[^/]+");
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

/// Compiled-pattern cache shared by every evaluation of one matcher.
///
/// Only successfully compiled patterns are cached.
#[derive(Debug, Default)]
pub struct RegexCache {
    inner: RwLock<HashMap<String, Regex>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_match(&self, pattern: &str, value: &str) -> Result<bool, regex::Error> {
        if let Ok(map) = self.inner.read() {
            if let Some(re) = map.get(pattern) {
                return Ok(re.is_match(value));
            }
        }

        let re = Regex::new(pattern)?;
        let matched = re.is_match(value);
        if let Ok(mut map) = self.inner.write() {
            map.insert(pattern.to_string(), re);
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_match_handles_wildcard_suffix() {
        assert!(key_match("/foo/bar", "/foo/*"));
        assert!(key_match("/foo", "/foo"));
        assert!(!key_match("/bar/foo", "/foo/*"));
        assert!(!key_match("/foo/bar", "/foo"));
    }

    #[test]
    fn key_match2_binds_single_segments() {
        let cache = RegexCache::new();
        let re = key_match2_regex("/resource/:id/edit");
        assert!(cache.is_match(&re, "/resource/42/edit").unwrap());
        assert!(!cache.is_match(&re, "/resource/4/2/edit").unwrap());

        let re = key_match2_regex("/files/*");
        assert!(cache.is_match(&re, "/files/a/b.txt").unwrap());
    }

    #[test]
    fn invalid_patterns_surface_errors() {
        let cache = RegexCache::new();
        assert!(cache.is_match("(", "x").is_err());
    }
}
