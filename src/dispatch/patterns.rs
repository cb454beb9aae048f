//! Ordered regex → handler table.

use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};

use crate::mail::Email;

/// One row of the table.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pattern: String,
    regex: Regex,
    handler: PathBuf,
}

impl PatternRule {
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn handler(&self) -> &Path {
        &self.handler
    }
}

/// Patterns in configuration order. Matching is case-insensitive and
/// unanchored; the first rule that matches wins.
#[derive(Debug, Clone, Default)]
pub struct PatternTable {
    rules: Vec<PatternRule>,
}

impl PatternTable {
    /// Compile `(pattern, handler)` pairs, keeping their order.
    pub fn new<I, P, H>(entries: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (P, H)>,
        P: Into<String>,
        H: Into<PathBuf>,
    {
        let rules = entries
            .into_iter()
            .map(|(pattern, handler)| {
                let pattern = pattern.into();
                let regex = RegexBuilder::new(&pattern).case_insensitive(true).build()?;
                Ok(PatternRule {
                    pattern,
                    regex,
                    handler: handler.into(),
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { rules })
    }

    /// The first rule whose pattern occurs in the subject or body.
    pub fn select(&self, email: &Email) -> Option<&PatternRule> {
        self.rules.iter().find(|rule| email.matches(&rule.regex))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(subject: &str, body: &str) -> Email {
        Email::new(
            Some("alice@example.com".into()),
            vec!["me@example.com".to_string()],
            subject,
            body,
        )
    }

    fn table() -> PatternTable {
        PatternTable::new([
            ("^send ", "/scripts/sendfile"),
            ("torrent", "/scripts/torrent"),
            ("send", "/scripts/catchall"),
        ])
        .unwrap()
    }

    #[test]
    fn first_match_in_table_order_wins() {
        let table = table();
        let rule = table.select(&email("send notes.txt", "")).unwrap();
        assert_eq!(rule.handler(), Path::new("/scripts/sendfile"));

        let rule = table.select(&email("please", "the torrent list, send it")).unwrap();
        assert_eq!(rule.handler(), Path::new("/scripts/torrent"));
    }

    #[test]
    fn matching_is_case_insensitive() {
        let table = table();
        let rule = table.select(&email("TORRENT status", "")).unwrap();
        assert_eq!(rule.pattern(), "torrent");
    }

    #[test]
    fn body_is_searched_unanchored() {
        let table = table();
        let rule = table.select(&email("hello", "could you SEND it")).unwrap();
        assert_eq!(rule.handler(), Path::new("/scripts/catchall"));
    }

    #[test]
    fn no_match_selects_nothing() {
        assert!(table().select(&email("lunch?", "noon works")).is_none());
        assert!(PatternTable::default().select(&email("send", "")).is_none());
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        assert!(PatternTable::new([("(unclosed", "/x")]).is_err());
    }

    #[test]
    fn order_is_preserved() {
        let table = table();
        assert_eq!(table.len(), 3);
        let patterns: Vec<&str> = table.rules.iter().map(PatternRule::pattern).collect();
        assert_eq!(patterns, vec!["^send ", "torrent", "send"]);
    }
}
