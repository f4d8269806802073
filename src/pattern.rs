//! Glob patterns over event keys
//!
//! Pattern subscriptions take a POSIX-style glob rooted at a subsystem
//! (`wfos` + `*.filter?` → `wfos.*.filter?`). The glob is compiled once
//! into a regex for client-side matching and can be rendered as Redis
//! `PSUBSCRIBE` patterns, which lack alternation groups.
//!
//! | glob      | meaning                              |
//! |-----------|--------------------------------------|
//! | `*`       | any run of characters (dots included) |
//! | `?`       | exactly one character                |
//! | `[abc]`   | character class, `[!a]` / `[^a]` negates |
//! | `{a,b}`   | alternation                          |
//! | `\x`      | literal `x`                          |

use crate::error::{EventError, Result};
use crate::types::{EventKey, Subsystem, KEY_SEPARATOR};
use regex::Regex;
use std::fmt;

/// A compiled glob over canonical key strings
#[derive(Debug, Clone)]
pub struct KeyPattern {
    subsystem: Option<Subsystem>,
    glob: String,
    regex: Regex,
}

impl KeyPattern {
    /// Pattern rooted at a subsystem: matches `<subsystem>.<pattern>`
    pub fn new(subsystem: Subsystem, pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(EventError::Parse("Key pattern must not be empty".to_string()));
        }
        let glob = format!("{}{}{}", subsystem, KEY_SEPARATOR, pattern);
        Self::compile(Some(subsystem), glob)
    }

    /// Pattern matching every key of every subsystem
    pub fn all() -> Self {
        Self {
            subsystem: None,
            glob: "*".to_string(),
            regex: Regex::new("^.*$").expect("static regex"),
        }
    }

    fn compile(subsystem: Option<Subsystem>, glob: String) -> Result<Self> {
        let source = glob_to_regex(&glob)?;
        let regex = Regex::new(&source)
            .map_err(|e| EventError::Parse(format!("Invalid key pattern '{}': {}", glob, e)))?;
        Ok(Self {
            subsystem,
            glob,
            regex,
        })
    }

    /// Root subsystem, `None` for [`KeyPattern::all`]
    pub fn subsystem(&self) -> Option<Subsystem> {
        self.subsystem
    }

    /// Full glob including the subsystem root
    pub fn glob(&self) -> &str {
        &self.glob
    }

    pub fn matches(&self, key: &EventKey) -> bool {
        self.matches_str(&key.to_string())
    }

    pub fn matches_str(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    /// Redis glob patterns equivalent to this pattern
    ///
    /// Redis globs have no `{a,b}` groups, so each alternative becomes
    /// its own pattern; `[!x]` is rewritten to Redis' `[^x]`.
    pub fn redis_patterns(&self) -> Vec<String> {
        expand_braces(&self.glob)
            .into_iter()
            .map(|g| negation_to_caret(&g))
            .collect()
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.glob)
    }
}

fn parse_error(glob: &str, reason: &str) -> EventError {
    EventError::Parse(format!("Invalid key pattern '{}': {}", glob, reason))
}

/// Translate a glob into an anchored regex
fn glob_to_regex(glob: &str) -> Result<String> {
    let mut out = String::with_capacity(glob.len() * 2 + 2);
    out.push('^');
    let mut chars = glob.chars().peekable();
    let mut depth = 0usize;

    while let Some(c) = chars.next() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                out.push('[');
                if matches!(chars.peek(), Some('!') | Some('^')) {
                    chars.next();
                    out.push('^');
                }
                let mut first = true;
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        ']' if !first => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                            None => return Err(parse_error(glob, "dangling escape")),
                        },
                        '-' => out.push('-'),
                        c @ ('[' | ']' | '^' | '&' | '~') => {
                            out.push('\\');
                            out.push(c);
                        }
                        c => out.push(c),
                    }
                    first = false;
                }
                if !closed {
                    return Err(parse_error(glob, "unclosed character class"));
                }
                out.push(']');
            }
            '{' => {
                depth += 1;
                out.push_str("(?:");
            }
            '}' if depth > 0 => {
                depth -= 1;
                out.push(')');
            }
            ',' if depth > 0 => out.push('|'),
            '\\' => match chars.next() {
                Some(escaped) => out.push_str(&regex::escape(&escaped.to_string())),
                None => return Err(parse_error(glob, "dangling escape")),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
    }

    if depth != 0 {
        return Err(parse_error(glob, "unclosed alternation group"));
    }
    out.push('$');
    Ok(out)
}

/// Expand the first top-level `{a,b}` group, recursively
fn expand_braces(glob: &str) -> Vec<String> {
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    let mut in_class = false;
    let mut open = None;

    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '{' if !in_class => {
                open = Some(i);
                break;
            }
            _ => {}
        }
        i += 1;
    }

    let Some(start) = open else {
        return vec![glob.to_string()];
    };

    // Find the matching close brace and the top-level commas inside
    let mut depth = 0usize;
    let mut splits = vec![start];
    let mut end = None;
    let mut j = start;
    while j < chars.len() {
        match chars[j] {
            '\\' => j += 1,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = Some(j);
                    break;
                }
            }
            ',' if depth == 1 => splits.push(j),
            _ => {}
        }
        j += 1;
    }

    let Some(end) = end else {
        return vec![glob.to_string()];
    };
    splits.push(end);

    let head: String = chars[..start].iter().collect();
    let tail: String = chars[end + 1..].iter().collect();
    splits
        .windows(2)
        .flat_map(|w| {
            let alt: String = chars[w[0] + 1..w[1]].iter().collect();
            expand_braces(&format!("{}{}{}", head, alt, tail))
        })
        .collect()
}

/// Rewrite `[!x]` class negation to the `[^x]` form Redis understands
fn negation_to_caret(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len());
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '[' => {
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> EventKey {
        EventKey::parse(s).unwrap()
    }

    #[test]
    fn test_subsystem_star() {
        let pattern = KeyPattern::new(Subsystem::Wfos, "*").unwrap();
        assert_eq!(pattern.glob(), "wfos.*");
        assert!(pattern.matches(&key("wfos.red.detector.filterWheel")));
        assert!(pattern.matches(&key("wfos.blue.camera.shutter")));
        assert!(!pattern.matches(&key("tcs.pointing.demand")));
    }

    #[test]
    fn test_event_name_patterns() {
        let move_any = KeyPattern::new(Subsystem::Csw, "*.move*").unwrap();
        let single = KeyPattern::new(Subsystem::Csw, "*.?ove*").unwrap();
        let by_component = KeyPattern::new(Subsystem::Csw, "test_prefix.*").unwrap();

        assert!(move_any.matches(&key("csw.prefix.move")));
        assert!(move_any.matches(&key("csw.prefix.movement")));
        assert!(move_any.matches(&key("csw.test_prefix.move")));
        assert!(!move_any.matches(&key("csw.prefix.cove")));

        assert!(single.matches(&key("csw.prefix.move")));
        assert!(single.matches(&key("csw.prefix.cove")));
        assert!(!single.matches(&key("csw.prefix.temperature")));

        assert!(by_component.matches(&key("csw.test_prefix.move")));
        assert!(!by_component.matches(&key("csw.prefix.move")));
    }

    #[test]
    fn test_character_classes() {
        let pattern = KeyPattern::new(Subsystem::Tcs, "mount.axis[12]").unwrap();
        assert!(pattern.matches(&key("tcs.mount.axis1")));
        assert!(pattern.matches(&key("tcs.mount.axis2")));
        assert!(!pattern.matches(&key("tcs.mount.axis3")));

        let negated = KeyPattern::new(Subsystem::Tcs, "mount.axis[!1]").unwrap();
        assert!(!negated.matches(&key("tcs.mount.axis1")));
        assert!(negated.matches(&key("tcs.mount.axis2")));

        let range = KeyPattern::new(Subsystem::Tcs, "mount.axis[a-c]").unwrap();
        assert!(range.matches(&key("tcs.mount.axisb")));
        assert!(!range.matches(&key("tcs.mount.axisd")));
    }

    #[test]
    fn test_alternation() {
        let pattern = KeyPattern::new(Subsystem::Wfos, "{red,blue}.*").unwrap();
        assert!(pattern.matches(&key("wfos.red.detector.temp")));
        assert!(pattern.matches(&key("wfos.blue.camera.temp")));
        assert!(!pattern.matches(&key("wfos.green.camera.temp")));
    }

    #[test]
    fn test_literal_dot_is_not_a_wildcard() {
        let pattern = KeyPattern::new(Subsystem::Tcs, "a.b").unwrap();
        assert!(pattern.matches_str("tcs.a.b"));
        assert!(!pattern.matches_str("tcs.aXb"));
    }

    #[test]
    fn test_all() {
        let pattern = KeyPattern::all();
        assert!(pattern.subsystem().is_none());
        assert!(pattern.matches(&key("tcs.pointing.demand")));
        assert!(pattern.matches(&key("iris.det.exposureStart")));
        assert_eq!(pattern.redis_patterns(), vec!["*".to_string()]);
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(KeyPattern::new(Subsystem::Tcs, "").is_err());
        assert!(KeyPattern::new(Subsystem::Tcs, "axis[12").is_err());
        assert!(KeyPattern::new(Subsystem::Tcs, "{red,blue").is_err());
        assert!(KeyPattern::new(Subsystem::Tcs, "trailing\\").is_err());
    }

    #[test]
    fn test_redis_patterns() {
        let plain = KeyPattern::new(Subsystem::Wfos, "*").unwrap();
        assert_eq!(plain.redis_patterns(), vec!["wfos.*".to_string()]);

        let alt = KeyPattern::new(Subsystem::Wfos, "{red,blue}.det[!x]").unwrap();
        assert_eq!(
            alt.redis_patterns(),
            vec!["wfos.red.det[^x]".to_string(), "wfos.blue.det[^x]".to_string()]
        );

        let nested = KeyPattern::new(Subsystem::Wfos, "{a,b{1,2}}").unwrap();
        assert_eq!(
            nested.redis_patterns(),
            vec!["wfos.a".to_string(), "wfos.b1".to_string(), "wfos.b2".to_string()]
        );
    }
}
