//! Glob pattern compilation and segment matching
//!
//! A pattern is split on `/` into segments:
//!
//! - `**` matches zero or more directories (consecutive ones collapse)
//! - a segment with `*`, `?` or `[...]` is a wildcard matched per name
//! - anything else is a literal name, looked up directly without listing
//!
//! Within a wildcard segment:
//! - `*` matches zero or more characters
//! - `?` matches exactly one character
//! - `[abc]`, `[a-z]` match one character from the set or range
//! - `[!abc]` matches one character not in the set
//!
//! An unterminated `[` is taken literally.

use crate::error::{FsError, Result};
use crate::path::PurePath;
use std::ffi::{OsStr, OsString};

/// Case sensitivity used when the caller does not choose one
#[must_use]
pub fn default_case_sensitive() -> bool {
    !cfg!(windows)
}

/// Check if a string contains glob metacharacters (`*`, `?`, `[`)
#[must_use]
pub fn contains_glob(s: &str) -> bool {
    s.contains('*') || s.contains('?') || s.contains('[')
}

/// One `/`-separated piece of a compiled pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Exact name
    Literal(OsString),
    /// Name pattern with wildcards
    Wildcard(NamePattern),
    /// `**`: this directory and every directory below it
    Recursive,
}

/// A compiled relative glob pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
    recursive: usize,
}

impl Pattern {
    /// Compile `pattern`
    ///
    /// # Errors
    ///
    /// Returns `InvalidPattern` for an empty or absolute pattern, or when
    /// `**` is mixed with other characters inside one segment.
    pub fn new(pattern: &str, case_sensitive: bool) -> Result<Self> {
        if pattern.is_empty() {
            return Err(FsError::invalid_pattern(pattern, "empty pattern"));
        }
        if pattern.starts_with(std::path::is_separator) {
            return Err(FsError::invalid_pattern(
                pattern,
                "non-relative patterns are unsupported",
            ));
        }
        if pattern.contains('\0') {
            return Err(FsError::invalid_pattern(pattern, "pattern contains a NUL byte"));
        }

        let mut segments = Vec::new();
        for part in pattern.split(std::path::is_separator) {
            if part.is_empty() || part == "." {
                continue;
            }
            if part == "**" {
                // Consecutive globstars collapse to one
                if segments.last() != Some(&Segment::Recursive) {
                    segments.push(Segment::Recursive);
                }
            } else if part.contains("**") {
                return Err(FsError::invalid_pattern(
                    pattern,
                    "'**' can only be an entire path component",
                ));
            } else if contains_glob(part) {
                segments.push(Segment::Wildcard(NamePattern::new(part, case_sensitive)));
            } else {
                segments.push(Segment::Literal(OsString::from(part)));
            }
        }

        if segments.is_empty() {
            return Err(FsError::invalid_pattern(pattern, "pattern selects nothing"));
        }
        let recursive = segments
            .iter()
            .filter(|segment| **segment == Segment::Recursive)
            .count();

        Ok(Self {
            source: pattern.to_string(),
            segments,
            recursive,
        })
    }

    /// The pattern as written
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Compiled segments in order
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; a compiled pattern has at least one segment
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Number of `**` segments
    #[must_use]
    pub fn recursive_segments(&self) -> usize {
        self.recursive
    }

    /// Whether the pattern has no wildcard at all
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Char(char),
    AnyChar,
    AnySeq,
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ClassItem {
    Single(char),
    Range(char, char),
}

/// Wildcard pattern for a single path segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePattern {
    source: String,
    tokens: Vec<Token>,
    case_sensitive: bool,
}

impl NamePattern {
    /// Compile a single-segment pattern
    #[must_use]
    pub fn new(pattern: &str, case_sensitive: bool) -> Self {
        let chars: Vec<char> = pattern.chars().collect();
        let mut tokens = Vec::with_capacity(chars.len());
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '*' => {
                    // Skip consecutive stars
                    if tokens.last() != Some(&Token::AnySeq) {
                        tokens.push(Token::AnySeq);
                    }
                    i += 1;
                }
                '?' => {
                    tokens.push(Token::AnyChar);
                    i += 1;
                }
                '[' => match parse_class(&chars, i + 1) {
                    Some((token, next)) => {
                        tokens.push(token);
                        i = next;
                    }
                    None => {
                        tokens.push(Token::Char('['));
                        i += 1;
                    }
                },
                c => {
                    tokens.push(Token::Char(c));
                    i += 1;
                }
            }
        }
        Self {
            source: pattern.to_string(),
            tokens,
            case_sensitive,
        }
    }

    /// The segment as written
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether names starting with `.` may match
    #[must_use]
    pub fn matches_hidden(&self) -> bool {
        self.source.starts_with('.')
    }

    /// Match a whole name; non-UTF-8 names are compared lossily
    #[must_use]
    pub fn matches(&self, name: &OsStr) -> bool {
        let name = name.to_string_lossy();
        let input: Vec<char> = name.chars().collect();
        self.match_chars(&input)
    }

    /// Iterative wildcard match, backtracking only to the most recent `*`
    fn match_chars(&self, input: &[char]) -> bool {
        let tokens = &self.tokens;
        let (mut ti, mut ii) = (0, 0);
        let mut star: Option<(usize, usize)> = None;

        while ii < input.len() {
            match tokens.get(ti) {
                Some(Token::AnySeq) => {
                    star = Some((ti, ii));
                    ti += 1;
                }
                Some(token) if self.token_matches(token, input[ii]) => {
                    ti += 1;
                    ii += 1;
                }
                _ => match star {
                    Some((star_ti, star_ii)) => {
                        ti = star_ti + 1;
                        ii = star_ii + 1;
                        star = Some((star_ti, star_ii + 1));
                    }
                    None => return false,
                },
            }
        }
        tokens[ti..].iter().all(|token| *token == Token::AnySeq)
    }

    fn token_matches(&self, token: &Token, c: char) -> bool {
        match token {
            Token::Char(expected) => self.chars_equal(*expected, c),
            Token::AnyChar => true,
            Token::AnySeq => false,
            Token::Class { negated, items } => {
                let hit = items.iter().any(|item| self.class_item_matches(item, c));
                hit != *negated
            }
        }
    }

    fn chars_equal(&self, a: char, b: char) -> bool {
        if self.case_sensitive {
            a == b
        } else {
            a == b || a.to_lowercase().eq(b.to_lowercase())
        }
    }

    fn class_item_matches(&self, item: &ClassItem, c: char) -> bool {
        let in_item = |c: char| match item {
            ClassItem::Single(expected) => *expected == c,
            ClassItem::Range(lo, hi) => (*lo..=*hi).contains(&c),
        };
        if in_item(c) {
            return true;
        }
        !self.case_sensitive
            && (c.to_lowercase().any(in_item) || c.to_uppercase().any(in_item))
    }
}

/// Parse a bracket expression starting just after `[`
///
/// Returns the token and the index after the closing `]`, or `None` when
/// there is no closing bracket.
fn parse_class(chars: &[char], start: usize) -> Option<(Token, usize)> {
    let mut i = start;
    let negated = matches!(chars.get(i), Some('!' | '^'));
    if negated {
        i += 1;
    }

    let mut items = Vec::new();
    let mut first = true;
    while i < chars.len() {
        let c = chars[i];
        // A `]` right after the opening (or after `!`) is a literal member
        if c == ']' && !first {
            return Some((Token::Class { negated, items }, i + 1));
        }
        first = false;
        if chars.get(i + 1) == Some(&'-') && chars.get(i + 2).is_some_and(|&hi| hi != ']') {
            items.push(ClassItem::Range(c, chars[i + 2]));
            i += 3;
        } else {
            items.push(ClassItem::Single(c));
            i += 1;
        }
    }
    None
}

/// Right-anchored match of a whole path against `pattern`
///
/// Backs `PureOps::matches`. `**` here behaves like `*` for one segment.
pub(crate) fn match_path(path: &PurePath, pattern: &str, case_sensitive: bool) -> Result<bool> {
    use crate::path::PureOps;

    let pieces: Vec<&str> = pattern
        .split(std::path::is_separator)
        .filter(|piece| !piece.is_empty() && *piece != ".")
        .collect();
    if pieces.is_empty() {
        return Err(FsError::invalid_pattern(pattern, "empty pattern"));
    }

    let anchored = pattern.starts_with(std::path::is_separator);
    let segments = path.segments();
    if anchored && !path.has_root() {
        return Ok(false);
    }
    if (anchored && pieces.len() != segments.len()) || pieces.len() > segments.len() {
        return Ok(false);
    }

    let tail = &segments[segments.len() - pieces.len()..];
    Ok(pieces.iter().zip(tail).all(|(piece, name)| {
        let piece = if *piece == "**" { "*" } else { piece };
        NamePattern::new(piece, case_sensitive).matches(name)
    }))
}
