//! Path globs used by ignore rules, classification rules and
//! auto-remediation resource filters.
//!
//! Syntax, applied to dotted paths:
//! - `*` matches any run of characters inside one segment,
//! - `?` matches one character inside one segment,
//! - a `**` segment matches zero or more whole segments.
//!
//! A glob matches a path when it matches the path itself or one of its
//! ancestors, so `k8s_pod.status` also covers `k8s_pod.status.hostIP`.
//!
//! Keys containing dots are matched in their escaped form: the label key
//! `app.kubernetes.io/name` is addressed as `labels.app\.kubernetes\.io/name`,
//! and `labels.app` does not cover it.

use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

use crate::error::PolicyConfigError;

use super::path::DiffPath;

/// How specific a glob is. Higher sorts as more specific.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    /// Segments containing no wildcard.
    pub literal_segments: usize,
    /// Non-wildcard characters, separators excluded.
    pub literal_chars: usize,
}

/// A compiled path glob.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "String")]
pub struct PathGlob {
    pattern: String,
    regex: Regex,
    specificity: Specificity,
}

/// An ordered collection of globs.
#[derive(Debug, Clone, Default)]
pub struct GlobSet {
    globs: Vec<PathGlob>,
}

impl PathGlob {
    /// Compiles a glob.
    ///
    /// # Errors
    ///
    /// Returns an error if the pattern is empty or has an empty segment.
    pub fn new(pattern: &str) -> Result<Self, PolicyConfigError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(PolicyConfigError::invalid_glob(pattern, "pattern is empty"));
        }

        let segments = split_segments(pattern);
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PolicyConfigError::invalid_glob(
                pattern,
                "pattern contains an empty segment",
            ));
        }

        let regex = Regex::new(&translate(&segments))
            .map_err(|e| PolicyConfigError::invalid_glob(pattern, e.to_string()))?;

        let specificity = Specificity {
            literal_segments: segments
                .iter()
                .filter(|s| !tokens(s).any(|t| matches!(t, Token::Star | Token::Any)))
                .count(),
            literal_chars: segments
                .iter()
                .copied()
                .flat_map(tokens)
                .filter(|t| matches!(t, Token::Literal(_) | Token::Escaped(_)))
                .count(),
        };

        Ok(Self {
            pattern: pattern.to_string(),
            regex,
            specificity,
        })
    }

    /// Returns true if the glob covers the dotted path.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }

    /// Returns true if the glob covers the path.
    #[must_use]
    pub fn matches_path(&self, path: &DiffPath) -> bool {
        self.matches(&path.glob_key())
    }

    /// Returns the source pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the specificity of this glob.
    #[must_use]
    pub const fn specificity(&self) -> Specificity {
        self.specificity
    }
}

/// One character of a pattern segment.
#[derive(Debug, Clone, Copy)]
enum Token {
    Star,
    Any,
    Literal(char),
    /// A backslash-escaped character.
    Escaped(char),
}

/// Any character of one escaped segment.
const SEGMENT_CHAR: &str = r"(?:[^.\\]|\\.)";

fn tokens(segment: &str) -> impl Iterator<Item = Token> + '_ {
    let mut chars = segment.chars();
    std::iter::from_fn(move || {
        let token = match chars.next()? {
            '*' => Token::Star,
            '?' => Token::Any,
            '\\' => chars.next().map_or(Token::Literal('\\'), Token::Escaped),
            other => Token::Literal(other),
        };
        Some(token)
    })
}

/// Splits a pattern on dots not preceded by a backslash.
fn split_segments(pattern: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, ch) in pattern.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '.' => {
                segments.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&pattern[start..]);
    segments
}

fn push_literal(body: &mut String, ch: char) {
    body.push_str(&regex::escape(ch.encode_utf8(&mut [0; 4])));
}

/// Builds the anchored regex for a split pattern.
fn translate(segments: &[&str]) -> String {
    let mut body = String::from("^");
    let mut pending_dot = false;

    for (i, segment) in segments.iter().enumerate() {
        if *segment == "**" {
            if i + 1 == segments.len() {
                if !pending_dot {
                    body.push_str(".*");
                }
                break;
            }
            if pending_dot {
                body.push_str(r"\.");
                pending_dot = false;
            }
            body.push_str(&format!(r"(?:{SEGMENT_CHAR}+\.)*"));
            continue;
        }

        if pending_dot {
            body.push_str(r"\.");
        }
        for token in tokens(segment) {
            match token {
                Token::Star => {
                    body.push_str(SEGMENT_CHAR);
                    body.push('*');
                }
                Token::Any => body.push_str(SEGMENT_CHAR),
                Token::Literal(ch) => push_literal(&mut body, ch),
                Token::Escaped(ch) => {
                    if matches!(ch, '.' | '\\') {
                        push_literal(&mut body, '\\');
                    }
                    push_literal(&mut body, ch);
                }
            }
        }
        pending_dot = true;
    }

    body.push_str(r"(?:\..*)?$");
    body
}

impl TryFrom<String> for PathGlob {
    type Error = PolicyConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl PartialEq for PathGlob {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for PathGlob {}

impl Serialize for PathGlob {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.pattern)
    }
}

impl fmt::Display for PathGlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pattern)
    }
}

impl GlobSet {
    /// Creates a glob set from compiled globs.
    #[must_use]
    pub const fn new(globs: Vec<PathGlob>) -> Self {
        Self { globs }
    }

    /// Compiles a glob set from patterns.
    ///
    /// # Errors
    ///
    /// Returns the first pattern that fails to compile.
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self, PolicyConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let globs = patterns
            .into_iter()
            .map(|p| PathGlob::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { globs })
    }

    /// Returns true if any glob covers the dotted path.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.globs.iter().any(|g| g.matches(path))
    }

    /// Returns true if any glob covers the path.
    #[must_use]
    pub fn matches_path(&self, path: &DiffPath) -> bool {
        !self.globs.is_empty() && self.matches(&path.glob_key())
    }

    /// Returns true if the set has no globs.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.globs.is_empty()
    }

    /// Returns the number of globs.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.globs.len()
    }

    /// Iterates over the globs in declaration order.
    pub fn iter(&self) -> std::slice::Iter<'_, PathGlob> {
        self.globs.iter()
    }
}

impl FromIterator<PathGlob> for GlobSet {
    fn from_iter<T: IntoIterator<Item = PathGlob>>(iter: T) -> Self {
        Self {
            globs: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glob(pattern: &str) -> PathGlob {
        PathGlob::new(pattern).unwrap()
    }

    #[test]
    fn test_literal_glob_covers_descendants() {
        let g = glob("aws_security_group.ingress");
        assert!(g.matches("aws_security_group.ingress"));
        assert!(g.matches("aws_security_group.ingress.0.cidr_blocks"));
        assert!(!g.matches("aws_security_group.ingress_rules"));
        assert!(!g.matches("aws_security_group"));
    }

    #[test]
    fn test_star_stays_within_segment() {
        let g = glob("*.last_modified");
        assert!(g.matches("aws_s3_bucket.last_modified"));
        assert!(!g.matches("aws_s3_bucket.meta.last_modified"));

        let prefix = glob("*.provider_*");
        assert!(prefix.matches("aws_instance.provider_meta"));
        assert!(!prefix.matches("aws_instance.tags"));
    }

    #[test]
    fn test_double_star_spans_segments() {
        let g = glob("k8s_deployment.**.image");
        assert!(g.matches("k8s_deployment.image"));
        assert!(g.matches("k8s_deployment.spec.template.spec.containers.0.image"));
        assert!(!g.matches("k8s_service.spec.image"));

        let any = glob("**");
        assert!(any.matches("anything.at.all"));
    }

    #[test]
    fn test_single_star_matches_everything_by_prefix() {
        let g = glob("*");
        assert!(g.matches("k8s_deployment.app"));
        assert!(g.matches("aws_instance.web"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let g = glob("k8s_deployment.metadata.labels.app+name");
        assert!(g.matches("k8s_deployment.metadata.labels.app+name"));
        assert!(!g.matches("k8s_deployment.metadata.labels.appname"));
    }

    #[test]
    fn test_dotted_keys_need_escaped_patterns() {
        let label = DiffPath::root("k8s_deployment")
            .child("metadata")
            .child("labels")
            .child("app.kubernetes.io/name");

        assert!(!glob("k8s_deployment.metadata.labels.app").matches_path(&label));
        assert!(!glob("k8s_deployment.metadata.labels.*.io").matches_path(&label));
        assert!(glob("k8s_deployment.metadata.labels.*").matches_path(&label));
        assert!(
            glob(r"k8s_deployment.metadata.labels.app\.kubernetes\.io/name").matches_path(&label)
        );
        assert!(glob(r"**.app\.kubernetes\.io/*").matches_path(&label));

        let plain = DiffPath::root("k8s_deployment")
            .child("metadata")
            .child("labels")
            .child("app");
        assert!(glob("k8s_deployment.metadata.labels.app").matches_path(&plain));
    }

    #[test]
    fn test_escaped_dot_counts_as_one_segment() {
        assert!(PathGlob::new(r"labels.app\.kubernetes\.io/name").is_ok());
        let escaped = glob(r"labels.app\.io");
        let wildcard = glob("labels.*");
        assert!(escaped.specificity() > wildcard.specificity());
    }

    #[test]
    fn test_question_mark() {
        let g = glob("k8s_pod.status.host??");
        assert!(g.matches("k8s_pod.status.hostIP"));
        assert!(!g.matches("k8s_pod.status.hostname"));
    }

    #[test]
    fn test_invalid_globs_rejected() {
        assert!(PathGlob::new("").is_err());
        assert!(PathGlob::new("a..b").is_err());
        assert!(PathGlob::new(".a").is_err());
        assert!(PathGlob::new("a.").is_err());
    }

    #[test]
    fn test_specificity_ordering() {
        let broad = glob("k8s_deployment.*");
        let narrow = glob("k8s_deployment.spec.replicas");
        assert!(narrow.specificity() > broad.specificity());
    }

    #[test]
    fn test_glob_set_matches_any() {
        let set = GlobSet::from_patterns(["aws_instance.tags", "k8s_pod.status.hostIP"]).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.matches("k8s_pod.status.hostIP"));
        assert!(!set.matches("k8s_pod.status.phase"));
    }

    #[test]
    fn test_deserialize_from_string() {
        let parsed: PathGlob = serde_yaml::from_str("\"k8s_pod.status\"").unwrap();
        assert_eq!(parsed.pattern(), "k8s_pod.status");
        assert!(serde_yaml::from_str::<PathGlob>("\"a..b\"").is_err());
    }
}
