//! Process-wide auto-increment counters.
//!
//! The engine has no identity columns the adapter can rely on, so insert
//! values for auto-increment attributes come from here: one counter per
//! (table, column), incremented inside a single critical section so two
//! concurrent inserts can never observe the same value.
//!
//! The registry is neither crash-durable nor cross-process: a second
//! adapter process against the same table will issue colliding values.
//! Counters are seeded from a `SELECT MAX` probe at table-creation time.

use std::collections::HashMap;
use std::sync::Mutex;

/// Per-(table, column) monotonic counters.
#[derive(Debug, Default)]
pub struct AutoIncrementRegistry {
    counters: Mutex<HashMap<(String, String), i64>>,
}

impl AutoIncrementRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next value for (table, column), strictly greater than
    /// every value issued before it in this process.
    pub fn next_value(&self, table: &str, column: &str) -> i64 {
        let mut counters = self.counters.lock().expect("auto-increment lock poisoned");
        let counter = counters
            .entry((table.to_string(), column.to_string()))
            .or_insert(0);
        *counter += 1;
        *counter
    }

    /// Seed a counter with the highest value observed in existing data.
    ///
    /// Seeding never lowers a counter, so the strict-monotonicity
    /// guarantee holds even if a probe races an insert.
    pub fn seed(&self, table: &str, column: &str, observed_max: i64) {
        let mut counters = self.counters.lock().expect("auto-increment lock poisoned");
        let counter = counters
            .entry((table.to_string(), column.to_string()))
            .or_insert(0);
        if observed_max > *counter {
            *counter = observed_max;
        }
    }

    /// Drop all counters for a table (used when the table is dropped).
    pub fn reset(&self, table: &str) {
        let mut counters = self.counters.lock().expect("auto-increment lock poisoned");
        counters.retain(|(t, _), _| t != table);
    }
}
