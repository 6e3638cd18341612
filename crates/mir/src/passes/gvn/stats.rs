/// Counts of the checks seen and removed by the rewrite phase.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CheckStats {
    pub null_checks: u32,
    pub null_checks_eliminated: u32,
    pub range_checks: u32,
    pub range_checks_eliminated: u32,
    /// Stores of a value the location was already known to hold.
    pub redundant_stores: u32,
}

/// Accumulates `CheckStats` while enabled.
///
/// Discovery may process a block several times, so only the single
/// rewrite pass is counted.
#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    enabled: bool,
    stats: CheckStats,
}

impl StatsCollector {
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn stats(&self) -> CheckStats {
        self.stats
    }

    fn bump(&mut self, counter: impl FnOnce(&mut CheckStats) -> &mut u32) {
        if self.enabled {
            *counter(&mut self.stats) += 1;
        }
    }

    pub fn record_null_check(&mut self) {
        self.bump(|s| &mut s.null_checks);
    }

    pub fn record_null_check_eliminated(&mut self) {
        self.bump(|s| &mut s.null_checks_eliminated);
    }

    pub fn record_range_check(&mut self) {
        self.bump(|s| &mut s.range_checks);
    }

    pub fn record_range_check_eliminated(&mut self) {
        self.bump(|s| &mut s.range_checks_eliminated);
    }

    pub fn record_redundant_store(&mut self) {
        self.bump(|s| &mut s.redundant_stores);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_collector_counts_nothing() {
        let mut collector = StatsCollector::default();
        collector.record_null_check();
        collector.record_redundant_store();
        assert_eq!(collector.stats(), CheckStats::default());

        collector.enable();
        collector.record_null_check();
        collector.record_null_check_eliminated();
        collector.record_range_check();
        assert_eq!(
            collector.stats(),
            CheckStats {
                null_checks: 1,
                null_checks_eliminated: 1,
                range_checks: 1,
                ..CheckStats::default()
            }
        );
    }
}
