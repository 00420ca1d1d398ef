//! Hub activity counters.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Named activity counters of a running hub (challenges issued, verdicts,
/// store failures and so on).
///
/// Names are fixed at construction. Bumping a name that was not declared
/// is a programming error; it is logged at debug level and dropped.
pub struct HubCounters {
    counters: BTreeMap<&'static str, AtomicU64>,
}

impl HubCounters {
    pub fn new(names: &[&'static str]) -> Self {
        Self {
            counters: names.iter().map(|&name| (name, AtomicU64::new(0))).collect(),
        }
    }

    pub fn increment(&self, name: &str) {
        match self.counters.get(name) {
            Some(counter) => {
                counter.fetch_add(1, Ordering::Relaxed);
            }
            None => tracing::debug!(counter = name, "undeclared counter"),
        }
    }

    pub fn get(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Current values, ordered by name.
    pub fn snapshot(&self) -> BTreeMap<&'static str, u64> {
        self.counters
            .iter()
            .map(|(&name, value)| (name, value.load(Ordering::Relaxed)))
            .collect()
    }

    /// One-line `name=value` summary of the non-zero counters.
    pub fn summary(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for HubCounters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.snapshot().into_iter().filter(|(_, v)| *v > 0) {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{name}={value}")?;
            first = false;
        }
        if first {
            f.write_str("idle")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undeclared_names_are_dropped() {
        let counters = HubCounters::new(&["challenges_issued", "verifications_trusted"]);
        counters.increment("challenges_issued");
        counters.increment("challenges_issued");
        counters.increment("typo");
        assert_eq!(counters.get("challenges_issued"), 2);
        assert_eq!(counters.get("verifications_trusted"), 0);
        assert_eq!(counters.get("typo"), 0);
        assert_eq!(counters.snapshot().len(), 2);
    }

    #[test]
    fn summary_lists_active_counters_by_name() {
        let counters = HubCounters::new(&["store_errors", "challenges_issued", "rate_limited"]);
        assert_eq!(counters.summary(), "idle");
        counters.increment("store_errors");
        counters.increment("challenges_issued");
        assert_eq!(counters.summary(), "challenges_issued=1 store_errors=1");
    }
}
