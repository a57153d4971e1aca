//! Address pattern compilation and matching
//!
//! OSC subscription patterns are glob-like:
//! ```text
//! /synth/*/gain          any run of characters (including '/')
//! /synth/voice?/gain     exactly one character
//! /synth/[0-9]/gain      character class, [!...] negates
//! /synth/{lead,bass}     literal alternatives
//! ```
//!
//! A pattern always has to match the whole address. A `[` or `{` without
//! its closing bracket is taken as a literal character.

use std::hash::{Hash, Hasher};

use tracing::warn;

/// A compiled subscription pattern.
///
/// Two patterns are equal when their source text is equal.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Option<regex_lite::Regex>,
}

impl Pattern {
    /// Compile a pattern string. Never fails: malformed syntax degrades to
    /// literal characters.
    pub fn compile(source: &str) -> Self {
        let translated = translate(source);
        let regex = match regex_lite::Regex::new(&translated) {
            Ok(regex) => Some(regex),
            Err(e) => {
                warn!(
                    "pattern {:?} does not compile ({}), matching it literally",
                    source, e
                );
                None
            }
        };

        Self {
            source: source.to_string(),
            regex,
        }
    }

    /// Check if a concrete address matches this pattern
    pub fn matches(&self, address: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(address),
            None => address == self.source,
        }
    }

    /// Get the source text of the pattern
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// True if the pattern contains no glob syntax
    pub fn is_literal(&self) -> bool {
        !self
            .source
            .chars()
            .any(|c| matches!(c, '?' | '*' | '[' | '{'))
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl Hash for Pattern {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl From<&str> for Pattern {
    fn from(s: &str) -> Self {
        Pattern::compile(s)
    }
}

/// Translate OSC glob syntax into an anchored regular expression
fn translate(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len() * 2 + 8);
    out.push_str("^(?s:");

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '?' => out.push('.'),
            '*' => out.push_str(".*"),
            '[' => match find_close(&chars, i + 1, ']') {
                Some(end) if is_class(&chars[i + 1..end]) => {
                    push_class(&mut out, &chars[i + 1..end]);
                    i = end;
                }
                _ => push_literal(&mut out, '['),
            },
            '{' => match find_close(&chars, i + 1, '}') {
                Some(end) => {
                    let body: String = chars[i + 1..end].iter().collect();
                    let alternatives: Vec<String> =
                        body.split(',').map(regex_lite::escape).collect();
                    out.push_str("(?:");
                    out.push_str(&alternatives.join("|"));
                    out.push(')');
                    i = end;
                }
                None => push_literal(&mut out, '{'),
            },
            c => push_literal(&mut out, c),
        }
        i += 1;
    }

    out.push_str(")$");
    out
}

fn find_close(chars: &[char], from: usize, close: char) -> Option<usize> {
    chars[from..]
        .iter()
        .position(|&c| c == close)
        .map(|offset| from + offset)
}

/// A class needs at least one member after the optional `!`, and every
/// range must run upwards
fn is_class(body: &[char]) -> bool {
    let members = match body.split_first() {
        Some(('!', rest)) => rest,
        _ => body,
    };
    !members.is_empty() && members.windows(3).all(|w| w[1] != '-' || w[0] <= w[2])
}

fn push_class(out: &mut String, body: &[char]) {
    out.push('[');
    let body = match body.split_first() {
        Some(('!', rest)) => {
            out.push('^');
            rest
        }
        _ => body,
    };
    for (idx, &c) in body.iter().enumerate() {
        match c {
            '\\' | '[' => {
                out.push('\\');
                out.push(c);
            }
            // a leading '^' would otherwise turn into a negation
            '^' if idx == 0 => out.push_str("\\^"),
            _ => out.push(c),
        }
    }
    out.push(']');
}

fn push_literal(out: &mut String, c: char) {
    let mut buf = [0u8; 4];
    out.push_str(&regex_lite::escape(c.encode_utf8(&mut buf)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        let pattern = Pattern::compile("/test/message");
        assert!(pattern.matches("/test/message"));
        assert!(!pattern.matches("/test/other"));
        assert!(!pattern.matches("/test"));
        assert!(!pattern.matches("/test/message/more"));
        assert!(pattern.is_literal());
    }

    #[test]
    fn test_single_char_wildcard() {
        let pattern = Pattern::compile("/x/?");
        assert!(pattern.matches("/x/a"));
        assert!(pattern.matches("/x/1"));
        assert!(!pattern.matches("/x/"));
        assert!(!pattern.matches("/x/ab"));
    }

    #[test]
    fn test_star_matches_empty_suffix() {
        let pattern = Pattern::compile("/x/*");
        assert!(pattern.matches("/x/"));
        assert!(pattern.matches("/x/abc"));
        assert!(pattern.matches("/x/a/b"));
        assert!(!pattern.matches("/y/abc"));
    }

    #[test]
    fn test_character_class() {
        let pattern = Pattern::compile("/test/[abc]");
        assert!(pattern.matches("/test/a"));
        assert!(pattern.matches("/test/c"));
        assert!(!pattern.matches("/test/d"));
        assert!(!pattern.matches("/test/ab"));

        let range = Pattern::compile("/ch/[0-9]");
        assert!(range.matches("/ch/7"));
        assert!(!range.matches("/ch/x"));
    }

    #[test]
    fn test_negated_class() {
        let pattern = Pattern::compile("/test/[!abc]");
        assert!(!pattern.matches("/test/a"));
        assert!(!pattern.matches("/test/b"));
        assert!(pattern.matches("/test/d"));
        assert!(pattern.matches("/test/x"));
        assert!(!pattern.matches("/test/"));
    }

    #[test]
    fn test_alternatives_are_literal() {
        let pattern = Pattern::compile("/test/{foo,bar}");
        assert!(pattern.matches("/test/foo"));
        assert!(pattern.matches("/test/bar"));
        assert!(!pattern.matches("/test/baz"));
        assert!(!pattern.matches("/test/fo"));
        assert!(!pattern.matches("/test/foobar"));

        let globby = Pattern::compile("/test/{a*,b}");
        assert!(globby.matches("/test/a*"));
        assert!(!globby.matches("/test/abc"));
    }

    #[test]
    fn test_complex_pattern() {
        let pattern = Pattern::compile("/osc/*/[0-9]?/{enable,disable}");
        assert!(pattern.matches("/osc/channel/12/enable"));
        assert!(pattern.matches("/osc/track/5a/disable"));
        assert!(!pattern.matches("/osc/channel/12/toggle"));
    }

    #[test]
    fn test_unterminated_brackets_are_literal() {
        let class = Pattern::compile("/test/[abc");
        assert!(class.matches("/test/[abc"));
        assert!(!class.matches("/test/a"));

        let alt = Pattern::compile("/test/{foo");
        assert!(alt.matches("/test/{foo"));
        assert!(!alt.matches("/test/foo"));
    }

    #[test]
    fn test_metacharacters_are_escaped() {
        let pattern = Pattern::compile("/a.b/(c)+");
        assert!(pattern.matches("/a.b/(c)+"));
        assert!(!pattern.matches("/axb/cc"));
    }

    #[test]
    fn test_empty_class_is_literal() {
        let pattern = Pattern::compile("/x/[]");
        assert!(pattern.matches("/x/[]"));
    }

    #[test]
    fn test_bad_class_keeps_other_globs() {
        let bare_negation = Pattern::compile("/x/[!]/*");
        assert!(bare_negation.matches("/x/[!]/a"));
        assert!(bare_negation.matches("/x/[!]/b/c"));
        assert!(!bare_negation.matches("/x/b/a"));

        let reversed = Pattern::compile("/ch/[9-0]/?");
        assert!(reversed.matches("/ch/[9-0]/a"));
        assert!(!reversed.matches("/ch/5/a"));
    }

    #[test]
    fn test_recompilation_is_deterministic() {
        let addresses = ["/x/", "/x/a", "/x/ab", "/y", "/osc/1/enable"];
        for source in ["/x/*", "/x/?", "/x/[!a]", "/{x,y}", "/osc/[0-9]/*"] {
            let first = Pattern::compile(source);
            let second = Pattern::compile(source);
            for address in addresses {
                assert_eq!(first.matches(address), second.matches(address));
            }
        }
    }

    #[test]
    fn test_hash_by_source() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(Pattern::compile("/test/*"));
        set.insert(Pattern::compile("/test/*"));
        set.insert(Pattern::compile("/test/?"));
        assert_eq!(set.len(), 2);
    }
}
