//! Glob-style pattern matching used by every resource filter
//!
//! Supported syntax:
//! - `*` matches any run of characters except `/`
//! - `**` matches any run of characters including `/`; `**/` also matches nothing
//! - `?` matches exactly one character except `/`
//! - `[abc]`, `[a-z]`, `[!a-z]` / `[^a-z]` character classes
//! - `{a,b}` alternatives, which may contain any of the above
//! - `\x` matches `x` literally
//!
//! Patterns are compiled once into an anchored regular expression.

use crate::error::{ReplicationError, Result};
use regex::Regex;

/// A compiled glob pattern
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut translator = Translator::new(pattern);
        let body = translator.translate()?;
        let regex = Regex::new(&format!("^{}$", body))
            .map_err(|e| ReplicationError::invalid_pattern(pattern, e.to_string()))?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        self.regex.is_match(candidate)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern matches exactly one literal string
    pub fn is_literal(&self) -> bool {
        !self
            .source
            .chars()
            .any(|c| matches!(c, '*' | '?' | '[' | '{' | '\\'))
    }
}

/// Matches `candidate` against `pattern` without keeping the compiled form
pub fn matches(pattern: &str, candidate: &str) -> Result<bool> {
    Ok(Pattern::new(pattern)?.matches(candidate))
}

/// The exact paths a pattern can match, when it names them explicitly.
///
/// `library/hello` gives `["library/hello"]` and `{library/a,test/b}` gives
/// both names. Any other wildcard, or nested alternatives, gives `None`.
pub fn specific_paths(pattern: &str) -> Option<Vec<String>> {
    if pattern.is_empty() {
        return None;
    }
    let is_plain = |s: &str| {
        !s.chars()
            .any(|c| matches!(c, '*' | '?' | '[' | ']' | '{' | '}' | ',' | '\\'))
    };
    if is_plain(pattern) {
        return Some(vec![pattern.to_string()]);
    }
    let inner = pattern.strip_prefix('{')?.strip_suffix('}')?;
    let paths: Vec<String> = inner.split(',').map(str::to_string).collect();
    paths
        .iter()
        .all(|path| !path.is_empty() && is_plain(path))
        .then_some(paths)
}

struct Translator<'a> {
    pattern: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Translator<'a> {
    fn new(pattern: &'a str) -> Self {
        Self {
            pattern,
            chars: pattern.chars().collect(),
            pos: 0,
        }
    }

    fn translate(&mut self) -> Result<String> {
        // at depth 0 a stray ',' or '}' is a literal, so this consumes everything
        self.sequence(0)
    }

    fn invalid(&self, reason: &str) -> ReplicationError {
        ReplicationError::invalid_pattern(self.pattern, reason)
    }

    /// Translates until the end of input, or until a `,`/`}` that closes the
    /// enclosing alternative when `depth > 0`
    fn sequence(&mut self, depth: usize) -> Result<String> {
        let mut out = String::new();
        while let Some(&c) = self.chars.get(self.pos) {
            match c {
                '}' | ',' if depth > 0 => return Ok(out),
                '*' => {
                    if self.chars.get(self.pos + 1) == Some(&'*') {
                        self.pos += 2;
                        if self.chars.get(self.pos) == Some(&'/') {
                            self.pos += 1;
                            out.push_str("(?:.*/)?");
                        } else {
                            out.push_str(".*");
                        }
                    } else {
                        self.pos += 1;
                        out.push_str("[^/]*");
                    }
                }
                '?' => {
                    self.pos += 1;
                    out.push_str("[^/]");
                }
                '[' => out.push_str(&self.class()?),
                '{' => out.push_str(&self.alternatives(depth)?),
                '\\' => {
                    let escaped = self
                        .chars
                        .get(self.pos + 1)
                        .ok_or_else(|| self.invalid("trailing escape character"))?;
                    out.push_str(&regex::escape(&escaped.to_string()));
                    self.pos += 2;
                }
                _ => {
                    out.push_str(&regex::escape(&c.to_string()));
                    self.pos += 1;
                }
            }
        }
        Ok(out)
    }

    fn class(&mut self) -> Result<String> {
        // skip '['
        self.pos += 1;
        let mut out = String::from("[");
        let negated = matches!(self.chars.get(self.pos), Some('!') | Some('^'));
        if negated {
            out.push('^');
            self.pos += 1;
        }
        let mut members = 0;
        loop {
            let c = *self
                .chars
                .get(self.pos)
                .ok_or_else(|| self.invalid("unclosed character class"))?;
            self.pos += 1;
            match c {
                ']' if members > 0 => break,
                ']' => return Err(self.invalid("empty character class")),
                '\\' => {
                    let escaped = *self
                        .chars
                        .get(self.pos)
                        .ok_or_else(|| self.invalid("unclosed character class"))?;
                    self.pos += 1;
                    if !escaped.is_alphanumeric() {
                        out.push('\\');
                    }
                    out.push(escaped);
                }
                '-' if members > 0 && self.chars.get(self.pos) != Some(&']') => out.push('-'),
                '[' | '&' | '~' | '^' | '-' => {
                    out.push('\\');
                    out.push(c);
                }
                _ => out.push(c),
            }
            members += 1;
        }
        // a negated class never matches the separator
        if negated {
            out.push('/');
        }
        out.push(']');
        Ok(out)
    }

    fn alternatives(&mut self, depth: usize) -> Result<String> {
        // skip '{'
        self.pos += 1;
        let mut branches = Vec::new();
        loop {
            branches.push(self.sequence(depth + 1)?);
            match self.chars.get(self.pos) {
                Some(',') => self.pos += 1,
                Some('}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(self.invalid("unclosed alternatives")),
            }
        }
        Ok(format!("(?:{})", branches.join("|")))
    }
}
