//! Suppression of known-benign error noise.
//!
//! Browser extensions and aborted network requests produce a steady stream of
//! errors that say nothing about the health of GoalFlow. [`NoiseFilter`]
//! recognises them by message so they can be dropped from logs, both for
//! server-side events and for errors reported by UI clients.

use std::fmt;

use tracing::{
    Event, Level, Metadata,
    field::{Field, Visit},
};
use tracing_subscriber::layer::{Context, Filter};

/// Message fragments that are never worth reporting.
pub const BENIGN_PATTERNS: &[&str] = &[
    "Extension context invalidated",
    "ResizeObserver loop",
    "Failed to fetch",
    "NetworkError when attempting to fetch resource",
    "Load failed",
    "The user aborted a request",
    "message port closed",
    "Could not establish connection. Receiving end does not exist",
];

/// Case-insensitive substring matcher over a fixed pattern list.
#[derive(Debug, Clone)]
pub struct NoiseFilter {
    patterns: Vec<String>,
}

impl NoiseFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| p.as_ref().trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect();
        Self { patterns }
    }

    /// Returns true when `message` contains one of the benign patterns.
    pub fn is_benign(&self, message: &str) -> bool {
        let message = message.to_lowercase();
        self.patterns.iter().any(|p| message.contains(p.as_str()))
    }
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self::new(BENIGN_PATTERNS)
    }
}

/// Collects the `message` and `error` fields of an event.
#[derive(Default)]
struct MessageVisitor {
    text: String,
}

impl MessageVisitor {
    fn push(&mut self, field: &Field, value: &str) {
        if matches!(field.name(), "message" | "error") {
            if !self.text.is_empty() {
                self.text.push(' ');
            }
            self.text.push_str(value);
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(field, value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.push(field, &format!("{value:?}"));
    }
}

// Only WARN and ERROR events are candidates for suppression; everything else
// passes untouched.
impl<S> Filter<S> for NoiseFilter {
    fn enabled(&self, _meta: &Metadata<'_>, _cx: &Context<'_, S>) -> bool {
        true
    }

    fn event_enabled(&self, event: &Event<'_>, _cx: &Context<'_, S>) -> bool {
        if *event.metadata().level() > Level::WARN {
            return true;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        !self.is_benign(&visitor.text)
    }
}
