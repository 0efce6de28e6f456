//! Alert message templates
//!
//! A template is the shape of an alert message: literal text that must be
//! found verbatim, and variable parts (counts, day deltas, names) that may
//! change from one cycle to the next while the alert stays the same.
//! Rendering gives the message stored in the alert table; the pattern
//! recognizes every message the same condition may have produced.

use regex::Regex;

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),

    /// Non-negative number, any value matches
    Count(u64),

    /// Free text, any non-empty value matches
    Text(String),

    /// Day delta rendered as `1 day` or `N days`
    Days(i64),
}

/// Days wording: singular for exactly one
pub fn plural_days(days: i64) -> String {
    if days == 1 {
        "1 day".to_string()
    } else {
        format!("{} days", days)
    }
}

const COUNT_PATTERN: &str = r"\d+";
const TEXT_PATTERN: &str = r".+?";
const DAYS_PATTERN: &str = r"(?:1 day|(?:0|[2-9]|[1-9]\d+) days)";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageTemplate {
    segments: Vec<Segment>,
}

impl MessageTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn literal(mut self, text: impl Into<String>) -> Self {
        self.segments.push(Segment::Literal(text.into()));
        self
    }

    pub fn count(mut self, value: u64) -> Self {
        self.segments.push(Segment::Count(value));
        self
    }

    pub fn text(mut self, value: impl Into<String>) -> Self {
        self.segments.push(Segment::Text(value.into()));
        self
    }

    pub fn days(mut self, days: i64) -> Self {
        self.segments.push(Segment::Days(days));
        self
    }

    /// Continue with the segments of another template
    pub fn append(mut self, other: MessageTemplate) -> Self {
        self.segments.extend(other.segments);
        self
    }

    pub fn render(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) | Segment::Text(text) => text.clone(),
                Segment::Count(value) => value.to_string(),
                Segment::Days(days) => plural_days(*days),
            })
            .collect()
    }

    /// Anchored pattern matching every rendering of this template
    pub fn pattern(&self) -> Result<Regex, regex::Error> {
        let body: String = self
            .segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => regex::escape(text),
                Segment::Count(_) => COUNT_PATTERN.to_string(),
                Segment::Text(_) => TEXT_PATTERN.to_string(),
                Segment::Days(_) => DAYS_PATTERN.to_string(),
            })
            .collect();

        Regex::new(&format!("^{}$", body))
    }
}
