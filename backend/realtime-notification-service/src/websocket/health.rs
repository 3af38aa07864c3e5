/// Periodic liveness sweep over the connection pool
///
/// Per connection, each sweep:
/// 1. idle longer than 2× the interval: terminate and remove, whatever the
///    channel reports about itself;
/// 2. idle for at least half an interval: flag inactive;
/// 3. flagged inactive: send a ping. A pong (or any inbound frame) restores
///    the flag and refreshes activity. A ping that cannot be sent removes the
///    connection immediately.
///
/// A peer that answers each probe is probed again on every sweep and stays
/// below the termination threshold even when sweeps run late.
///
/// This is the only path that reclaims connections whose closure was never
/// reported (abrupt network loss).
use super::pool::ConnectionPool;
use crate::metrics;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Outcome of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub terminated: usize,
    pub probed: usize,
    pub probe_failures: usize,
}

#[derive(Clone)]
pub struct HealthMonitor {
    pool: ConnectionPool,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(pool: ConnectionPool, interval: Duration) -> Self {
        Self { pool, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one sweep over a snapshot of the pool
    pub fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let unresponsive_after = self.interval * 2;
        let probe_after = self.interval / 2;
        let mut report = SweepReport::default();

        for connection in self.pool.snapshot() {
            report.checked += 1;
            let idle = now.saturating_duration_since(connection.last_activity());

            if idle > unresponsive_after {
                warn!(
                    connection_id = %connection.id(),
                    idle_ms = idle.as_millis() as u64,
                    "terminating unresponsive connection"
                );
                if self.pool.terminate(connection.id()).is_some() {
                    report.terminated += 1;
                    metrics::record_health_termination();
                }
                continue;
            }

            if idle >= probe_after {
                connection.set_active(false);
            }

            if !connection.is_active() {
                match connection.channel().ping() {
                    Ok(()) => {
                        connection.record_ping();
                        report.probed += 1;
                    }
                    Err(e) => {
                        debug!(connection_id = %connection.id(), error = %e, "liveness probe failed");
                        self.pool.remove(connection.id());
                        report.probe_failures += 1;
                    }
                }
            }
        }

        if report.terminated > 0 || report.probe_failures > 0 {
            info!(
                checked = report.checked,
                terminated = report.terminated,
                probe_failures = report.probe_failures,
                "health sweep reclaimed connections"
            );
        }
        report
    }

    /// Run sweeps on a fixed interval until aborted
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep();
            }
        })
    }
}

impl ConnectionPool {
    /// Start the health monitor; it is stopped by [`ConnectionPool::shutdown`].
    /// Starting it again replaces the previous monitor.
    pub fn start_health_monitor(&self, interval: Duration) -> HealthMonitor {
        let monitor = HealthMonitor::new(self.clone(), interval);
        let handle = monitor.clone().spawn();
        if let Some(previous) = self
            .inner
            .health_task
            .lock()
            .replace(handle.abort_handle())
        {
            previous.abort();
        }
        info!(interval_secs = interval.as_secs(), "health monitor started");
        monitor
    }
}

#[cfg(test)]
mod tests {
    use super::super::channel::{channel_pair, ChannelEndpoint, ChannelEvent, Outbound};
    use super::super::metadata::ConnectionMetadata;
    use super::*;

    const INTERVAL: Duration = Duration::from_secs(30);

    fn register(pool: &ConnectionPool, id: &str) -> ChannelEndpoint {
        let (channel, endpoint) = channel_pair();
        endpoint.mark_open();
        pool.add(channel, ConnectionMetadata::new(id).with_subscriber(1)).unwrap();
        endpoint
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_connection_is_left_alone() {
        let pool = ConnectionPool::new();
        let mut endpoint = register(&pool, "c1");
        let monitor = HealthMonitor::new(pool.clone(), INTERVAL);

        let report = monitor.sweep();

        assert_eq!(report, SweepReport { checked: 1, ..Default::default() });
        assert!(endpoint.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_is_probed_and_restored_by_pong() {
        let pool = ConnectionPool::new();
        let mut endpoint = register(&pool, "c1");
        let monitor = HealthMonitor::new(pool.clone(), INTERVAL);

        tokio::time::advance(INTERVAL).await;
        let report = monitor.sweep();

        assert_eq!(report.probed, 1);
        assert_eq!(endpoint.try_recv(), Some(Outbound::Ping));
        let conn = pool.get("c1").unwrap();
        assert!(!conn.is_active());
        assert!(conn.last_ping().is_some());

        endpoint.report(ChannelEvent::Pong);
        settle().await;

        assert!(conn.is_active());
        assert_eq!(pool.connection_count(), 1);

        // Activity was refreshed, so the next sweep leaves it alone.
        let report = monitor.sweep();
        assert_eq!(report.probed, 0);
        assert_eq!(report.terminated, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_pong_and_late_sweep_keep_connection() {
        let pool = ConnectionPool::new();
        let mut endpoint = register(&pool, "c1");
        let monitor = HealthMonitor::new(pool.clone(), INTERVAL);
        let pong_delay = Duration::from_millis(1);

        for (sweep, late_by) in [(1, Duration::ZERO), (2, Duration::ZERO), (3, Duration::from_millis(2))] {
            tokio::time::advance(INTERVAL - pong_delay + late_by).await;
            let report = monitor.sweep();
            assert_eq!(report.terminated, 0, "sweep {sweep} terminated a responsive peer");
            assert_eq!(report.probed, 1, "sweep {sweep} did not probe");
            assert_eq!(endpoint.try_recv(), Some(Outbound::Ping));

            tokio::time::advance(pong_delay).await;
            endpoint.report(ChannelEvent::Pong);
            settle().await;
        }

        let conn = pool.get("c1").unwrap();
        assert!(conn.is_active());
        assert_eq!(pool.connection_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_connection_removed_once() {
        let pool = ConnectionPool::new();
        let mut endpoint = register(&pool, "c1");
        let monitor = HealthMonitor::new(pool.clone(), INTERVAL);

        tokio::time::advance(INTERVAL * 2 + Duration::from_secs(1)).await;
        let report = monitor.sweep();

        assert_eq!(report.terminated, 1);
        assert_eq!(pool.connection_count(), 0);
        assert!(pool.get_by_subscriber(1).is_empty());
        assert_eq!(endpoint.try_recv(), Some(Outbound::Terminate));

        let again = monitor.sweep();
        assert_eq!(again.terminated, 0);
        assert_eq!(again.checked, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_send_failure_removes_connection() {
        let pool = ConnectionPool::new();
        let endpoint = register(&pool, "c1");
        let monitor = HealthMonitor::new(pool.clone(), INTERVAL);

        drop(endpoint);
        tokio::time::advance(INTERVAL).await;
        // The listener may already have reaped it; either way it must be gone.
        monitor.sweep();
        settle().await;

        assert_eq!(pool.connection_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_on_closed_handle() {
        let pool = ConnectionPool::new();
        let (channel, endpoint) = channel_pair();
        endpoint.mark_open();
        let conn = pool.add(channel, ConnectionMetadata::new("c1")).unwrap();
        let monitor = HealthMonitor::new(pool.clone(), INTERVAL);

        conn.channel().close(1000, "gone");
        tokio::time::advance(INTERVAL).await;
        let report = monitor.sweep();

        assert_eq!(report.probe_failures, 1);
        assert!(pool.get("c1").is_none());
        drop(endpoint);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_monitor_sweeps_and_stops_on_shutdown() {
        let pool = ConnectionPool::new();
        let mut endpoint = register(&pool, "c1");
        pool.start_health_monitor(INTERVAL);

        tokio::time::sleep(INTERVAL * 3 + Duration::from_secs(1)).await;
        settle().await;

        assert_eq!(pool.connection_count(), 0);
        let mut saw_terminate = false;
        while let Some(command) = endpoint.try_recv() {
            saw_terminate |= command == Outbound::Terminate;
        }
        assert!(saw_terminate);

        pool.shutdown();
        assert!(pool.inner.health_task.lock().is_none());
    }
}
