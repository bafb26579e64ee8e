// timing.rs — Per-location wall-clock accounting
//
// Active only when `detailed_timing` is set; otherwise every probe is a
// single branch. Keys are source locations rendered as strings so the
// report aggregates all work attributed to one model position.

use std::fmt::Write;
use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct TimingRegistry {
    enabled: bool,
    entries: FxHashMap<String, TimingEntry>,
}

#[derive(Debug, Clone, Copy, Default)]
struct TimingEntry {
    total: Duration,
    count: u64,
}

impl TimingRegistry {
    pub fn new(enabled: bool) -> Self {
        TimingRegistry {
            enabled,
            entries: FxHashMap::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run `f`, attributing its wall-clock time to `key` when enabled.
    pub fn time<R>(&mut self, key: &dyn Fn() -> String, f: impl FnOnce() -> R) -> R {
        if !self.enabled {
            return f();
        }
        let start = Instant::now();
        let out = f();
        self.record(key(), start.elapsed());
        out
    }

    pub fn record(&mut self, key: String, elapsed: Duration) {
        if !self.enabled {
            return;
        }
        let entry = self.entries.entry(key).or_default();
        entry.total += elapsed;
        entry.count += 1;
    }

    /// Render a report, most expensive location first. Ties and float noise
    /// are broken by key so the output is deterministic.
    pub fn report(&self) -> String {
        let mut rows: Vec<(&String, &TimingEntry)> = self.entries.iter().collect();
        rows.sort_by(|a, b| b.1.total.cmp(&a.1.total).then_with(|| a.0.cmp(b.0)));
        let mut buf = String::new();
        for (key, entry) in rows {
            let _ = writeln!(
                buf,
                "{:>10.3}ms  {:>8}x  {}",
                entry.total.as_secs_f64() * 1000.0,
                entry.count,
                key
            );
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_registry_records_nothing() {
        let mut t = TimingRegistry::new(false);
        let v = t.time(&|| "a".to_string(), || 42);
        assert_eq!(v, 42);
        assert!(t.report().is_empty());
    }

    #[test]
    fn enabled_registry_aggregates_by_key() {
        let mut t = TimingRegistry::new(true);
        for _ in 0..3 {
            t.record("m.tn:1.1".to_string(), Duration::from_millis(1));
        }
        t.record("m.tn:2.1".to_string(), Duration::from_millis(10));
        let report = t.report();
        let first = report.lines().next().unwrap();
        assert!(first.contains("m.tn:2.1"));
        assert!(report.contains("3x"));
    }
}
