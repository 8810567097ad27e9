//! Bounded record of the most recent scans in one session.

use std::collections::VecDeque;

use serde::Serialize;
use time::OffsetDateTime;

use crate::predictor::PredictionResult;

pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScanEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub url: String,
    pub label: bool,
    pub confidence: f64,
}

/// Ring buffer of scans, newest first. Lives only as long as its owner.
#[derive(Clone, Debug)]
pub struct ScanHistory {
    capacity: usize,
    entries: VecDeque<ScanEntry>,
}

impl Default for ScanHistory {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl ScanHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records a scan, evicting the oldest entry when full.
    pub fn push(&mut self, entry: ScanEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_back();
        }
        self.entries.push_front(entry);
    }

    pub fn record(&mut self, url: &str, result: &PredictionResult, timestamp: OffsetDateTime) {
        self.push(ScanEntry {
            timestamp,
            url: url.to_string(),
            label: result.label,
            confidence: result.confidence,
        });
    }

    /// Entries from newest to oldest.
    pub fn iter(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn entry(index: i64) -> ScanEntry {
        ScanEntry {
            timestamp: OffsetDateTime::UNIX_EPOCH + Duration::seconds(index),
            url: format!("https://site{index}.example/"),
            label: index % 2 == 0,
            confidence: 0.5,
        }
    }

    #[test]
    fn keeps_the_ten_most_recent_newest_first() {
        let mut history = ScanHistory::default();
        for index in 0..15 {
            history.push(entry(index));
        }
        assert_eq!(history.len(), DEFAULT_HISTORY_CAPACITY);
        let urls: Vec<_> = history.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls.first(), Some(&"https://site14.example/"));
        assert_eq!(urls.last(), Some(&"https://site5.example/"));
    }

    #[test]
    fn zero_capacity_records_nothing() {
        let mut history = ScanHistory::with_capacity(0);
        history.push(entry(1));
        assert!(history.is_empty());
    }

    #[test]
    fn entries_serialize_with_rfc3339_timestamps() {
        let json = serde_json::to_value(entry(0)).unwrap();
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00Z");
    }
}
