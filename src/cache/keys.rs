//! Derived key layout.
//!
//! A cached value lives at its own key; its companions are derived from it:
//!
//! | record        | key            |
//! |---------------|----------------|
//! | value         | `key`          |
//! | metadata      | `meta:{key}`   |
//! | stale marker  | `stale:{key}`  |
//! | tag members   | `tag:{tag}`    |

const META_PREFIX: &str = "meta:";
const STALE_PREFIX: &str = "stale:";
const TAG_PREFIX: &str = "tag:";
const CONTENT_PREFIX: &str = "content:";

pub fn meta_key(key: &str) -> String {
    format!("{META_PREFIX}{key}")
}

pub fn stale_key(key: &str) -> String {
    format!("{STALE_PREFIX}{key}")
}

pub fn tag_key(tag: &str) -> String {
    format!("{TAG_PREFIX}{tag}")
}

/// Cache key for a content item served by the read path.
pub fn content_key(id: &str) -> String {
    format!("{CONTENT_PREFIX}{id}")
}

/// Redis-style glob match supporting `*` (any run) and `?` (one character).
///
/// Backtracks over the most recent `*` only, so the match is linear in
/// practice for the short key patterns used here.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut resume = 0usize;

    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some(p);
                resume = t;
                p += 1;
            }
            Some('?') => {
                p += 1;
                t += 1;
            }
            Some(c) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some(star_at) => {
                    p = star_at + 1;
                    resume += 1;
                    t = resume;
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_keys_share_the_base_key() {
        assert_eq!(meta_key("content:5"), "meta:content:5");
        assert_eq!(stale_key("content:5"), "stale:content:5");
        assert_eq!(tag_key("news"), "tag:news");
        assert_eq!(content_key("5"), "content:5");
    }

    #[test]
    fn glob_literal_and_wildcards() {
        assert!(glob_match("content:5", "content:5"));
        assert!(!glob_match("content:5", "content:50"));
        assert!(glob_match("content:*", "content:50"));
        assert!(glob_match("content:*", "content:"));
        assert!(glob_match("*", ""));
        assert!(glob_match("c?ntent:*", "content:1"));
        assert!(!glob_match("c?ntent:*", "cntent:1"));
        assert!(glob_match("*:5", "meta:content:5"));
        assert!(!glob_match("meta:*", "content:5"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(!glob_match("a*b*c", "axxbyy"));
    }
}
