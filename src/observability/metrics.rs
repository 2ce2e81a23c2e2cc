use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics registry for the application.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Inbound decisions fetched
    pub decisions_received: AtomicU64,
    pub decisions_malformed: AtomicU64,

    /// Decision applier outcomes
    pub decisions_applied: AtomicU64,
    pub decisions_compensated: AtomicU64,
    pub compensation_failures: AtomicU64,

    /// Outbox bookkeeping
    pub outbox_recorded: AtomicU64,
    pub outbox_duplicates: AtomicU64,
    pub outbox_mark_failures: AtomicU64,

    /// Broker publishes
    pub publish_attempts: AtomicU64,
    pub publish_failures: AtomicU64,

    /// Notification outcomes
    pub notifications_delivered: AtomicU64,
    pub notifications_duplicate: AtomicU64,
    pub notifications_malformed: AtomicU64,
    pub notify_transient: AtomicU64,
    pub notify_permanent: AtomicU64,

    /// Dead-letter writes
    pub dead_lettered: AtomicU64,
    pub dead_letter_errors: AtomicU64,

    /// Finalize latency buckets
    pub latency_under_5ms: AtomicU64,
    pub latency_5_50ms: AtomicU64,
    pub latency_50_500ms: AtomicU64,
    pub latency_over_500ms: AtomicU64,
}

#[inline]
fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl MetricsRegistry {
    /// Create a new metrics registry.
    pub fn new() -> Self {
        MetricsRegistry::default()
    }

    pub fn record_decision_received(&self, malformed: bool) {
        incr(&self.decisions_received);
        if malformed {
            incr(&self.decisions_malformed);
        }
    }

    /// Record an applier run. `compensation_ok` is `None` when no
    /// compensation was needed.
    pub fn record_apply(&self, compensation_ok: Option<bool>) {
        match compensation_ok {
            None => incr(&self.decisions_applied),
            Some(ok) => {
                incr(&self.decisions_compensated);
                if !ok {
                    incr(&self.compensation_failures);
                }
            }
        }
    }

    pub fn record_outbox_insert(&self, duplicate: bool) {
        if duplicate {
            incr(&self.outbox_duplicates);
        } else {
            incr(&self.outbox_recorded);
        }
    }

    pub fn record_mark_failure(&self) {
        incr(&self.outbox_mark_failures);
    }

    pub fn record_publish_attempt(&self, success: bool) {
        incr(&self.publish_attempts);
        if !success {
            incr(&self.publish_failures);
        }
    }

    pub fn record_notification_delivered(&self) {
        incr(&self.notifications_delivered);
    }

    pub fn record_notification_duplicate(&self) {
        incr(&self.notifications_duplicate);
    }

    pub fn record_notification_malformed(&self) {
        incr(&self.notifications_malformed);
    }

    pub fn record_notify_failure(&self, transient: bool) {
        if transient {
            incr(&self.notify_transient);
        } else {
            incr(&self.notify_permanent);
        }
    }

    pub fn record_dead_letter(&self, success: bool) {
        if success {
            incr(&self.dead_lettered);
        } else {
            incr(&self.dead_letter_errors);
        }
    }

    /// Record finalize latency.
    pub fn record_latency(&self, start: Instant) {
        let millis = start.elapsed().as_millis() as u64;

        if millis < 5 {
            incr(&self.latency_under_5ms);
        } else if millis < 50 {
            incr(&self.latency_5_50ms);
        } else if millis < 500 {
            incr(&self.latency_50_500ms);
        } else {
            incr(&self.latency_over_500ms);
        }
    }

    /// Export metrics in Prometheus format.
    pub fn to_prometheus(&self) -> String {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);

        format!(
            r#"# HELP riskfin_decisions_received_total Inbound decisions fetched
# TYPE riskfin_decisions_received_total counter
riskfin_decisions_received_total {}

# HELP riskfin_decisions_malformed_total Inbound decisions skipped as malformed
# TYPE riskfin_decisions_malformed_total counter
riskfin_decisions_malformed_total {}

# HELP riskfin_decisions_applied Decision writes by path
# TYPE riskfin_decisions_applied counter
riskfin_decisions_applied{{path="primary"}} {}
riskfin_decisions_applied{{path="compensated"}} {}

# HELP riskfin_compensation_failures_total Compensating writes that failed
# TYPE riskfin_compensation_failures_total counter
riskfin_compensation_failures_total {}

# HELP riskfin_outbox_inserts Outbox inserts by outcome
# TYPE riskfin_outbox_inserts counter
riskfin_outbox_inserts{{outcome="recorded"}} {}
riskfin_outbox_inserts{{outcome="duplicate"}} {}

# HELP riskfin_outbox_mark_failures_total Publish acknowledgements that failed
# TYPE riskfin_outbox_mark_failures_total counter
riskfin_outbox_mark_failures_total {}

# HELP riskfin_publish_attempts_total Broker publish attempts
# TYPE riskfin_publish_attempts_total counter
riskfin_publish_attempts_total {}

# HELP riskfin_publish_failures_total Broker publish attempts that failed
# TYPE riskfin_publish_failures_total counter
riskfin_publish_failures_total {}

# HELP riskfin_notifications Notification dispatch outcomes
# TYPE riskfin_notifications counter
riskfin_notifications{{outcome="delivered"}} {}
riskfin_notifications{{outcome="duplicate"}} {}
riskfin_notifications{{outcome="malformed"}} {}
riskfin_notifications{{outcome="transient"}} {}
riskfin_notifications{{outcome="permanent"}} {}

# HELP riskfin_dead_letters Dead-letter writes by outcome
# TYPE riskfin_dead_letters counter
riskfin_dead_letters{{outcome="written"}} {}
riskfin_dead_letters{{outcome="error"}} {}

# HELP riskfin_finalize_latency Finalize runs by latency range
# TYPE riskfin_finalize_latency counter
riskfin_finalize_latency{{range="lt_5ms"}} {}
riskfin_finalize_latency{{range="5_50ms"}} {}
riskfin_finalize_latency{{range="50_500ms"}} {}
riskfin_finalize_latency{{range="gte_500ms"}} {}
"#,
            load(&self.decisions_received),
            load(&self.decisions_malformed),
            load(&self.decisions_applied),
            load(&self.decisions_compensated),
            load(&self.compensation_failures),
            load(&self.outbox_recorded),
            load(&self.outbox_duplicates),
            load(&self.outbox_mark_failures),
            load(&self.publish_attempts),
            load(&self.publish_failures),
            load(&self.notifications_delivered),
            load(&self.notifications_duplicate),
            load(&self.notifications_malformed),
            load(&self.notify_transient),
            load(&self.notify_permanent),
            load(&self.dead_lettered),
            load(&self.dead_letter_errors),
            load(&self.latency_under_5ms),
            load(&self.latency_5_50ms),
            load(&self.latency_50_500ms),
            load(&self.latency_over_500ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_apply_paths() {
        let metrics = MetricsRegistry::new();

        metrics.record_apply(None);
        metrics.record_apply(Some(true));
        metrics.record_apply(Some(false));

        assert_eq!(metrics.decisions_applied.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.decisions_compensated.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.compensation_failures.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_record_latency() {
        let metrics = MetricsRegistry::new();

        metrics.record_latency(Instant::now());

        assert!(metrics.latency_under_5ms.load(Ordering::Relaxed) >= 1);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = MetricsRegistry::new();
        metrics.record_notify_failure(true);
        metrics.record_dead_letter(true);

        let output = metrics.to_prometheus();

        assert!(output.contains("riskfin_notifications{outcome=\"transient\"} 1"));
        assert!(output.contains("riskfin_dead_letters{outcome=\"written\"} 1"));
        assert!(output.contains("riskfin_publish_attempts_total 0"));
    }

    #[test]
    fn test_latency_ranges_are_disjoint() {
        let metrics = MetricsRegistry::new();
        metrics.record_latency(Instant::now());
        metrics.record_latency(Instant::now());

        let output = metrics.to_prometheus();

        assert!(output.contains("riskfin_finalize_latency{range=\"lt_5ms\"} 2"));
        assert!(output.contains("riskfin_finalize_latency{range=\"5_50ms\"} 0"));
        assert!(output.contains("riskfin_finalize_latency{range=\"gte_500ms\"} 0"));
        assert!(!output.contains("le=\""));
    }
}
