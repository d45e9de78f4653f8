//! Per-field change counting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::row::Row;

// =============================================================================
// Counter
// =============================================================================

/// Named integer slots, read as 0 until first touched.
///
/// Slots keep the order in which they were first observed.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    allow_negative: bool,
    index: HashMap<String, usize>,
    slots: Vec<(String, i64)>,
}

impl Counter {
    /// Counter whose slots may go below zero.
    pub fn new() -> Self {
        Self::with_negative(true)
    }

    /// Counter that clamps slots at zero unless `allow_negative`.
    pub fn with_negative(allow_negative: bool) -> Self {
        Self {
            allow_negative,
            index: HashMap::new(),
            slots: Vec::new(),
        }
    }

    pub fn plus(&mut self, slot: &str, n: i64) {
        let i = match self.index.get(slot) {
            Some(&i) => i,
            None => {
                self.slots.push((slot.to_string(), 0));
                self.index.insert(slot.to_string(), self.slots.len() - 1);
                self.slots.len() - 1
            }
        };

        let value = &mut self.slots[i].1;
        *value += n;
        if !self.allow_negative && *value < 0 {
            *value = 0;
        }
    }

    pub fn minus(&mut self, slot: &str, n: i64) {
        self.plus(slot, -n);
    }

    pub fn get(&self, slot: &str) -> i64 {
        self.index.get(slot).map(|&i| self.slots[i].1).unwrap_or(0)
    }

    /// Slots in first-observed order
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.slots.iter().map(|(name, n)| (name.as_str(), *n))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Change statistics of one pipeline run.
#[derive(Debug, Clone)]
pub struct Statistics {
    changes: Counter,
    rows_changed: usize,
    rows_processed: usize,
    rows_written: usize,
    started_at: DateTime<Utc>,
}

impl Default for Statistics {
    fn default() -> Self {
        Self::new()
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self {
            changes: Counter::new(),
            rows_changed: 0,
            rows_processed: 0,
            rows_written: 0,
            started_at: Utc::now(),
        }
    }

    /// Count every origin field whose current value differs.
    pub fn process(&mut self, row: &Row) {
        self.rows_processed += 1;

        let mut changed = false;
        for (field, original) in row.origin() {
            if row.fields().get(field) != Some(original) {
                changed = true;
                self.changes.plus(field, 1);
            }
        }

        if changed {
            self.rows_changed += 1;
        }
    }

    pub fn record_written(&mut self) {
        self.rows_written += 1;
    }

    pub fn changes(&self) -> &Counter {
        &self.changes
    }

    pub fn rows_changed(&self) -> usize {
        self.rows_changed
    }

    pub fn rows_processed(&self) -> usize {
        self.rows_processed
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    /// Final report: fields ordered by ascending count, ties by first
    /// observation.
    pub fn finish(&self) -> StatisticsReport {
        let mut fields: Vec<(String, i64)> = self
            .changes
            .iter()
            .map(|(name, n)| (name.to_string(), n))
            .collect();
        fields.sort_by_key(|(_, n)| *n);

        StatisticsReport {
            rows_changed: self.rows_changed,
            rows_processed: self.rows_processed,
            rows_written: self.rows_written,
            fields,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Snapshot of a finished run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsReport {
    pub rows_changed: usize,
    pub rows_processed: usize,
    pub rows_written: usize,
    /// (field, changed rows) in report order
    pub fields: Vec<(String, i64)>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StatisticsReport {
    /// Changed-row count of `field`, 0 if it never changed
    pub fn changes(&self, field: &str) -> i64 {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }
}

impl fmt::Display for StatisticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Finished, modified {} rows.", self.rows_changed)?;
        for (field, n) in &self.fields {
            write!(f, "\n{:6} {}", n, field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => Row::new(map),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_counter_clamps_when_negative_disallowed() {
        let mut counter = Counter::with_negative(false);
        counter.plus("x", 15);
        counter.minus("x", 20);
        assert_eq!(counter.get("x"), 0);

        let mut counter = Counter::new();
        counter.plus("x", 15);
        counter.minus("x", 20);
        assert_eq!(counter.get("x"), -5);
    }

    #[test]
    fn test_counter_defaults_to_zero() {
        let counter = Counter::new();
        assert_eq!(counter.get("never"), 0);
        assert!(counter.is_empty());
    }

    #[test]
    fn test_report_sorted_by_count_then_first_seen() {
        let mut stats = Statistics::new();
        for changed in [["A", "B", "C"], ["A", "C", ""], ["A", "C", ""]] {
            let mut r = row(json!({"A": 0, "B": 0, "C": 0}));
            for field in changed.iter().filter(|f| !f.is_empty()) {
                r.set(field, 1);
            }
            stats.process(&r);
        }

        let report = stats.finish();
        assert_eq!(
            report.fields,
            vec![("B".to_string(), 1), ("A".to_string(), 3), ("C".to_string(), 3)]
        );
        assert_eq!(report.rows_changed, 3);
        assert_eq!(report.changes("C"), 3);
        assert_eq!(report.changes("Z"), 0);
    }

    #[test]
    fn test_unchanged_and_new_fields() {
        let mut stats = Statistics::new();

        let unchanged = row(json!({"A": 1}));
        stats.process(&unchanged);

        // Fields missing from origin are not counted per field
        let mut added = row(json!({"A": 1}));
        added.set("New", 5);
        stats.process(&added);

        assert_eq!(stats.rows_processed(), 2);
        assert_eq!(stats.rows_changed(), 0);
        assert!(stats.changes().is_empty());
    }

    #[test]
    fn test_report_display() {
        let mut stats = Statistics::new();
        let mut r = row(json!({"Price": 10}));
        r.set("Price", 12);
        stats.process(&r);
        stats.record_written();

        let report = stats.finish();
        assert_eq!(report.rows_written, 1);
        assert_eq!(report.to_string(), "Finished, modified 1 rows.\n     1 Price");
    }
}
