use std::collections::BTreeMap;
use std::fmt;

/// Deterministic counters and gauges for the tile engine.
///
/// Each tile cache owns one of these; the frame driver merges them for its
/// periodic status line. Sorted maps keep snapshots and log output stable.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metrics {
    counters: BTreeMap<&'static str, u64>,
    gauges: BTreeMap<&'static str, i64>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn inc(&mut self, name: &'static str) {
        self.add(name, 1);
    }

    pub fn add(&mut self, name: &'static str, by: u64) {
        *self.counters.entry(name).or_insert(0) += by;
    }

    pub fn gauge(&self, name: &str) -> Option<i64> {
        self.gauges.get(name).copied()
    }

    pub fn set_gauge(&mut self, name: &'static str, value: i64) {
        self.gauges.insert(name, value);
    }

    /// Fold `other` into `self`: counters add up, gauges add up too (they
    /// count resident things, which are disjoint across caches).
    pub fn merge(&mut self, other: &Metrics) {
        for (name, v) in &other.counters {
            self.add(name, *v);
        }
        for (name, v) in &other.gauges {
            *self.gauges.entry(name).or_insert(0) += v;
        }
    }

    pub fn clear(&mut self) {
        self.counters.clear();
        self.gauges.clear();
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, v) in &self.counters {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{name}={v}")?;
            first = false;
        }
        for (name, v) in &self.gauges {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{name}={v}")?;
            first = false;
        }
        Ok(())
    }
}
