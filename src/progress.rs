//! Short in-app activity log shown in the footer, next to the `tracing` output.

use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

const CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Info,
    Http,
    Poll,
    Resolve,
    Error,
}

impl Kind {
    pub fn tag(self) -> &'static str {
        match self {
            Kind::Info => "info",
            Kind::Http => "http",
            Kind::Poll => "poll",
            Kind::Resolve => "cite",
            Kind::Error => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub at: DateTime<Local>,
    pub kind: Kind,
    pub text: String,
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}", self.at.format("%H:%M:%S"), self.kind.tag(), self.text)
    }
}

/// Bounded buffer; the oldest line goes when a new one arrives at capacity.
#[derive(Debug)]
pub struct ActivityLog {
    entries: VecDeque<Entry>,
    capacity: usize,
}

impl ActivityLog {
    pub fn with_capacity(capacity: usize) -> Self {
        ActivityLog {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, kind: Kind, text: String) {
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Entry {
            at: Local::now(),
            kind,
            text,
        });
    }

    /// The last `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Entry> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

static ACTIVITY: Lazy<Mutex<ActivityLog>> = Lazy::new(|| Mutex::new(ActivityLog::with_capacity(CAPACITY)));

pub fn log<T: Into<String>>(line: T) {
    log_with(Kind::Info, line);
}

pub fn log_with<T: Into<String>>(kind: Kind, line: T) {
    if let Ok(mut activity) = ACTIVITY.lock() {
        activity.push(kind, line.into());
    }
}

pub fn recent(n: usize) -> Vec<Entry> {
    ACTIVITY
        .lock()
        .map(|activity| activity.recent(n))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_lines() {
        let mut activity = ActivityLog::with_capacity(3);
        for i in 0..5 {
            activity.push(Kind::Poll, format!("tick {}", i));
        }
        let texts: Vec<String> = activity.recent(10).into_iter().map(|e| e.text).collect();
        assert_eq!(texts, vec!["tick 2", "tick 3", "tick 4"]);
        assert_eq!(activity.recent(1)[0].text, "tick 4");
    }

    #[test]
    fn entries_render_with_their_tag() {
        let mut activity = ActivityLog::with_capacity(2);
        activity.push(Kind::Resolve, "resolved 2 citations".to_string());
        let line = activity.recent(1)[0].to_string();
        assert!(line.ends_with("[cite] resolved 2 citations"));
    }
}
