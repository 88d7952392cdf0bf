use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Predicate shared by every gold fact, and the only one a query can match.
pub const GOLD_PREDICATE: &str = "is associated with";

/// Source label stamped on generated facts.
pub const SYNTHETIC_SOURCE: &str = "synthetic";

/// Timestamp layout used for `Fact::ts`.
pub const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A subject/predicate/object triple with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub ts: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub source: String,
}

impl Fact {
    pub fn new(
        subject: impl Into<String>,
        predicate: impl Into<String>,
        object: impl Into<String>,
        ts: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            object: object.into(),
            ts: ts.into(),
            tags: Vec::new(),
            source: SYNTHETIC_SOURCE.into(),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Build the fact a canonical template query asserts, e.g.
    /// `"gold.entity.3 is associated with gold.topic.3"`.
    ///
    /// Returns `None` when the query has fewer than three tokens.
    pub fn from_query(query: &str, ts: impl Into<String>) -> Option<Self> {
        let tokens: Vec<&str> = query.split_whitespace().collect();
        if tokens.len() < 3 {
            return None;
        }
        let subject = tokens[0];
        let object = tokens[tokens.len() - 1].trim_end_matches('.');
        let predicate = tokens[1..tokens.len() - 1].join(" ");
        Some(Self::new(subject, predicate, object, ts))
    }

    /// `"subject predicate object."`
    pub fn sentence(&self) -> String {
        format!("{} {} {}.", self.subject, self.predicate, self.object)
    }

    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.ts, TS_FORMAT).ok()
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn is_gold(&self) -> bool {
        self.has_tag("gold")
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.predicate, self.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_sentence_and_display() {
        let fact = Fact::new("a", "uses", "b", "2023-01-02T00:00:00");
        assert_eq!(fact.sentence(), "a uses b.");
        assert_eq!(fact.to_string(), "a uses b");
    }

    #[test]
    fn test_timestamp_parses() {
        let fact = Fact::new("a", "uses", "b", "2024-07-15T00:00:00");
        let ts = fact.timestamp().unwrap();
        assert_eq!(ts.year(), 2024);
        assert_eq!(ts.month(), 7);
        assert_eq!(ts.day(), 15);
        assert_eq!(ts.hour(), 0);

        let bad = Fact::new("a", "uses", "b", "yesterday");
        assert!(bad.timestamp().is_none());
    }

    #[test]
    fn test_from_query() {
        let fact = Fact::from_query(
            "gold.entity.4 is associated with gold.topic.4.",
            "2024-06-01T00:00:00",
        )
        .unwrap();
        assert_eq!(fact.subject, "gold.entity.4");
        assert_eq!(fact.predicate, GOLD_PREDICATE);
        assert_eq!(fact.object, "gold.topic.4");

        assert!(Fact::from_query("too short", "").is_none());
        assert!(Fact::from_query("", "").is_none());
    }

    #[test]
    fn test_serde_shape() {
        let fact = Fact::new("s", "p", "o", "2024-06-01T00:00:00").with_tags(&["gold"]);
        let json = serde_json::to_value(&fact).unwrap();
        assert_eq!(json["subject"], "s");
        assert_eq!(json["ts"], "2024-06-01T00:00:00");
        assert_eq!(json["tags"][0], "gold");
        assert_eq!(json["source"], "synthetic");

        let back: Fact = serde_json::from_value(json).unwrap();
        assert_eq!(back, fact);
        assert!(back.is_gold());
    }
}
