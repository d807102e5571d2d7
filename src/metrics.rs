//! Engine counters with Prometheus text exposition

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub rounds_started: AtomicU64,
    pub rounds_crashed: AtomicU64,
    pub rounds_aborted: AtomicU64,
    pub instant_busts: AtomicU64,
    pub bets_placed: AtomicU64,
    pub bets_rejected: AtomicU64,
    pub cash_outs: AtomicU64,
    pub auto_cash_outs: AtomicU64,
    pub bets_lost: AtomicU64,
    pub refunds: AtomicU64,
    pub persistence_failures: AtomicU64,
    pub tick_restarts: AtomicU64,
    pub snapshots_published: AtomicU64,
    pub observers_connected: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn observer_connected(&self) -> u64 {
        self.observers_connected.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn observer_disconnected(&self) -> u64 {
        self.observers_connected.fetch_sub(1, Ordering::SeqCst).saturating_sub(1)
    }

    pub fn to_prometheus_format(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 13] = [
            ("rounds_started_total", "Rounds that entered RUNNING", &self.rounds_started),
            ("rounds_crashed_total", "Rounds that reached their crash point", &self.rounds_crashed),
            ("rounds_aborted_total", "Rounds aborted before RUNNING", &self.rounds_aborted),
            ("instant_busts_total", "Rounds with a 1.00 crash point", &self.instant_busts),
            ("bets_placed_total", "Accepted bets", &self.bets_placed),
            ("bets_rejected_total", "Rejected bet or cash-out requests", &self.bets_rejected),
            ("cash_outs_total", "Bets cashed out", &self.cash_outs),
            ("auto_cash_outs_total", "Bets cashed out by auto target", &self.auto_cash_outs),
            ("bets_lost_total", "Bets settled as lost", &self.bets_lost),
            ("refunds_total", "Stakes refunded after an aborted round", &self.refunds),
            ("persistence_failures_total", "Store calls that exhausted retries", &self.persistence_failures),
            ("tick_restarts_total", "Phase cycle restarts after a failed or panicked engine step", &self.tick_restarts),
            ("snapshots_published_total", "Snapshots pushed to observers", &self.snapshots_published),
        ];

        let mut output = String::new();
        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP crash_engine_{name} {help}\n\
                 # TYPE crash_engine_{name} counter\n\
                 crash_engine_{name} {}\n\n",
                value.load(Ordering::Relaxed)
            ));
        }

        output.push_str(&format!(
            "# HELP crash_engine_observers_connected Connected WebSocket observers\n\
             # TYPE crash_engine_observers_connected gauge\n\
             crash_engine_observers_connected {}\n",
            self.observers_connected.load(Ordering::SeqCst)
        ));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_output() {
        let metrics = EngineMetrics::new();
        EngineMetrics::incr(&metrics.bets_placed);
        EngineMetrics::add(&metrics.bets_lost, 3);
        metrics.observer_connected();

        let text = metrics.to_prometheus_format();
        assert!(text.contains("crash_engine_bets_placed_total 1"));
        assert!(text.contains("crash_engine_bets_lost_total 3"));
        assert!(text.contains("# TYPE crash_engine_observers_connected gauge"));
        assert!(text.contains("crash_engine_observers_connected 1"));
    }

    #[test]
    fn test_observer_gauge_does_not_underflow_display() {
        let metrics = EngineMetrics::new();
        assert_eq!(metrics.observer_connected(), 1);
        assert_eq!(metrics.observer_disconnected(), 0);
    }
}
