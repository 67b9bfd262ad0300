//! The analytics collector: accumulation, statistics, batch flushing.
//!
//! Mutation is confined to a single `parking_lot::Mutex` around the
//! collector state; nothing async happens while it is held. Flushing is
//! single-flight: concurrent callers serialize on a `tokio::sync::Mutex`
//! and drain whatever is pending when their turn comes, so at most one
//! exporter invocation is in flight at any time.

use crate::config::AnalyticsConfig;
use crate::error::{AnalyticsError, Result};
use crate::event::{AnalyticsSnapshot, SessionStats, ToolCallEvent, ToolStats};
use crate::exporter::Exporter;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Running totals for one tool (or one session's totals).
///
/// `count`, `error_count` and `total_ms` are lifetime-exact; only the
/// percentile window is bounded.
#[derive(Debug, Default)]
struct ToolAccumulator {
    count: u64,
    error_count: u64,
    total_ms: u64,
    recent_durations: VecDeque<u64>,
    last_called_at: i64,
}

impl ToolAccumulator {
    fn observe(&mut self, event: &ToolCallEvent, window: usize) {
        self.count += 1;
        if !event.success {
            self.error_count += 1;
        }
        self.total_ms += event.duration_ms;
        self.last_called_at = event.timestamp;
        self.recent_durations.push_back(event.duration_ms);
        while self.recent_durations.len() > window {
            self.recent_durations.pop_front();
        }
    }

    fn stats(&self) -> ToolStats {
        let mut window: Vec<u64> = self.recent_durations.iter().copied().collect();
        window.sort_unstable();
        let count = self.count.max(1);
        ToolStats {
            count: self.count,
            error_count: self.error_count,
            error_rate: self.error_count as f64 / count as f64,
            p50_ms: percentile(&window, 50.0),
            p95_ms: percentile(&window, 95.0),
            p99_ms: percentile(&window, 99.0),
            avg_ms: self.total_ms as f64 / count as f64,
            last_called_at: self.last_called_at,
        }
    }
}

#[derive(Debug, Default)]
struct SessionAccumulator {
    totals: ToolAccumulator,
    tools: HashMap<String, ToolAccumulator>,
}

/// Linear interpolation between the two closest ranks of a sorted window.
fn percentile(sorted: &[u64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0] as f64,
        n => {
            let rank = (p / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let weight = rank - lo as f64;
            sorted[lo] as f64 * (1.0 - weight) + sorted[hi] as f64 * weight
        }
    }
}

struct CollectorState {
    started_at: Instant,
    total_calls: u64,
    total_errors: u64,
    /// Ring buffer of recent events, oldest dropped on overflow.
    events: VecDeque<ToolCallEvent>,
    /// Events not yet handed to the exporter.
    pending: VecDeque<ToolCallEvent>,
    tools: HashMap<String, ToolAccumulator>,
    sessions: HashMap<String, SessionAccumulator>,
}

impl CollectorState {
    fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_calls: 0,
            total_errors: 0,
            events: VecDeque::new(),
            pending: VecDeque::new(),
            tools: HashMap::new(),
            sessions: HashMap::new(),
        }
    }
}

/// Handler for errors raised by timer-driven flushes.
pub type FlushErrorCallback = dyn Fn(&AnalyticsError) + Send + Sync;

/// Collects tool-call events, aggregates statistics and streams batches to
/// an [`Exporter`].
pub struct AnalyticsCollector {
    config: AnalyticsConfig,
    exporter: Arc<dyn Exporter>,
    state: Mutex<CollectorState>,
    /// Single-flight guard for [`AnalyticsCollector::flush`].
    flush_gate: tokio::sync::Mutex<()>,
    flush_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown: CancellationToken,
    on_flush_error: Arc<FlushErrorCallback>,
}

impl AnalyticsCollector {
    /// Create a collector and, unless `flush_interval_ms` is zero, start the
    /// periodic flush task.
    pub fn new(config: AnalyticsConfig, exporter: Arc<dyn Exporter>) -> Arc<Self> {
        Self::with_flush_error_callback(
            config,
            exporter,
            Arc::new(|e| tracing::warn!(error = %e, "periodic analytics flush failed")),
        )
    }

    /// Like [`AnalyticsCollector::new`] with a custom handler for errors
    /// raised by timer-driven flushes.
    pub fn with_flush_error_callback(
        config: AnalyticsConfig,
        exporter: Arc<dyn Exporter>,
        on_flush_error: Arc<FlushErrorCallback>,
    ) -> Arc<Self> {
        let collector = Arc::new(Self {
            config,
            exporter,
            state: Mutex::new(CollectorState::new()),
            flush_gate: tokio::sync::Mutex::new(()),
            flush_task: Mutex::new(None),
            shutdown: CancellationToken::new(),
            on_flush_error,
        });

        if let Some(interval) = collector.config.flush_interval() {
            let task = tokio::spawn(flush_loop(
                Arc::downgrade(&collector),
                interval,
                collector.shutdown.clone(),
            ));
            *collector.flush_task.lock() = Some(task);
        }

        collector
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Record one event: update totals, per-tool and per-session
    /// accumulators, the ring buffer and the pending export queue.
    pub fn record(&self, mut event: ToolCallEvent) {
        for (key, value) in &self.config.metadata {
            event
                .metadata
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        let window = self.config.effective_tool_window_size();
        let mut state = self.state.lock();

        state.total_calls += 1;
        if !event.success {
            state.total_errors += 1;
        }

        state
            .tools
            .entry(event.tool_name.clone())
            .or_default()
            .observe(&event, window);

        if let Some(session_id) = &event.session_id {
            let session = state.sessions.entry(session_id.clone()).or_default();
            session.totals.observe(&event, window);
            session
                .tools
                .entry(event.tool_name.clone())
                .or_default()
                .observe(&event, window);
        }

        state.events.push_back(event.clone());
        while state.events.len() > self.config.max_buffer_size {
            state.events.pop_front();
        }

        state.pending.push_back(event);
    }

    pub fn tool_stats(&self, tool_name: &str) -> Option<ToolStats> {
        let state = self.state.lock();
        state.tools.get(tool_name).map(ToolAccumulator::stats)
    }

    pub fn session_stats(&self, session_id: &str) -> Option<SessionStats> {
        let state = self.state.lock();
        state.sessions.get(session_id).map(session_stats)
    }

    /// Up to `k` sessions ordered by call count, ties broken by the most
    /// recent activity.
    pub fn top_sessions(&self, k: usize) -> Vec<(String, SessionStats)> {
        let state = self.state.lock();
        let mut sessions: Vec<_> = state
            .sessions
            .iter()
            .map(|(id, acc)| (id.clone(), session_stats(acc)))
            .collect();
        sessions.sort_by(|(_, a), (_, b)| {
            b.totals
                .count
                .cmp(&a.totals.count)
                .then(b.totals.last_called_at.cmp(&a.totals.last_called_at))
        });
        sessions.truncate(k);
        sessions
    }

    pub fn snapshot(&self) -> AnalyticsSnapshot {
        let state = self.state.lock();
        AnalyticsSnapshot {
            total_calls: state.total_calls,
            total_errors: state.total_errors,
            error_rate: state.total_errors as f64 / state.total_calls.max(1) as f64,
            uptime_ms: state.started_at.elapsed().as_millis() as u64,
            tools: state
                .tools
                .iter()
                .map(|(name, acc)| (name.clone(), acc.stats()))
                .collect(),
            sessions: state
                .sessions
                .iter()
                .map(|(id, acc)| (id.clone(), session_stats(acc)))
                .collect(),
        }
    }

    /// Copy of the ring buffer, oldest first. Debugging aid only.
    pub fn recent_events(&self) -> Vec<ToolCallEvent> {
        self.state.lock().events.iter().cloned().collect()
    }

    /// Number of events awaiting export.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Drain the pending queue through the exporter.
    ///
    /// If a flush is already in progress the caller waits for it and then
    /// drains whatever remains (usually nothing). On exporter failure the
    /// unsent batch is pushed back to the front of the queue, preserving
    /// order relative to newly recorded events, and the error propagates.
    pub async fn flush(&self) -> Result<()> {
        let _gate = self.flush_gate.lock().await;
        loop {
            let batch: Vec<ToolCallEvent> = {
                let mut state = self.state.lock();
                if state.pending.is_empty() {
                    return Ok(());
                }
                state.pending.drain(..).collect()
            };

            if let Err(e) = self.exporter.export(&batch).await {
                let mut state = self.state.lock();
                for event in batch.into_iter().rev() {
                    state.pending.push_front(event);
                }
                return Err(e);
            }
        }
    }

    /// Clear all state: buffer, pending queue, accumulators, totals.
    pub fn reset(&self) {
        *self.state.lock() = CollectorState::new();
    }

    /// Stop the flush timer and flush once.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        let task = self.flush_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.flush().await
    }
}

fn session_stats(acc: &SessionAccumulator) -> SessionStats {
    SessionStats {
        totals: acc.totals.stats(),
        tools: acc
            .tools
            .iter()
            .map(|(name, tool)| (name.clone(), tool.stats()))
            .collect(),
    }
}

async fn flush_loop(
    collector: Weak<AnalyticsCollector>,
    interval: std::time::Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; skip it.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(collector) = collector.upgrade() else {
                    return;
                };
                if let Err(e) = collector.flush().await {
                    (collector.on_flush_error)(&e);
                }
            }
            () = shutdown.cancelled() => {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn event(tool: &str, session: Option<&str>, duration_ms: u64, success: bool) -> ToolCallEvent {
        ToolCallEvent {
            tool_name: tool.to_string(),
            session_id: session.map(str::to_string),
            timestamp: ToolCallEvent::now_ms(),
            duration_ms,
            success,
            error_message: (!success).then(|| "boom".to_string()),
            error_code: None,
            input_size: 2,
            output_size: 4,
            metadata: Default::default(),
        }
    }

    /// Exporter that can be told to fail the next N batches.
    struct FlakyExporter {
        fail_next: Mutex<usize>,
        batches: Mutex<Vec<Vec<ToolCallEvent>>>,
    }

    impl FlakyExporter {
        fn new(fail_next: usize) -> Arc<Self> {
            Arc::new(Self {
                fail_next: Mutex::new(fail_next),
                batches: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Exporter for FlakyExporter {
        async fn export(&self, batch: &[ToolCallEvent]) -> Result<()> {
            {
                let mut remaining = self.fail_next.lock();
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(AnalyticsError::Export("transient".to_string()));
                }
            }
            self.batches.lock().push(batch.to_vec());
            Ok(())
        }
    }

    fn collector_without_timer(
        window: usize,
        exporter: Arc<dyn Exporter>,
    ) -> Arc<AnalyticsCollector> {
        let config = AnalyticsConfig {
            flush_interval_ms: 0,
            tool_window_size: window,
            ..AnalyticsConfig::default()
        };
        AnalyticsCollector::new(config, exporter)
    }

    #[tokio::test]
    async fn percentile_window_is_bounded_while_totals_stay_exact() {
        let collector = collector_without_timer(3, FlakyExporter::new(0));
        for duration in [10, 20, 30, 40, 50] {
            collector.record(event("search", None, duration, true));
        }

        let stats = collector.tool_stats("search").expect("stats");
        assert_eq!(stats.count, 5);
        assert_eq!(stats.avg_ms, 30.0);
        // Retained window is {30, 40, 50}.
        assert_eq!(stats.p50_ms, 40.0);
        assert!((stats.p99_ms - 49.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn single_value_window_returns_itself() {
        let collector = collector_without_timer(16, FlakyExporter::new(0));
        collector.record(event("one", None, 42, true));
        let stats = collector.tool_stats("one").expect("stats");
        assert_eq!(stats.p50_ms, 42.0);
        assert_eq!(stats.p95_ms, 42.0);
    }

    #[tokio::test]
    async fn snapshot_totals_are_sums_over_tools() {
        let collector = collector_without_timer(8, FlakyExporter::new(0));
        collector.record(event("a", Some("s1"), 10, true));
        collector.record(event("a", Some("s1"), 20, false));
        collector.record(event("b", Some("s2"), 30, true));

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_calls, 3);
        assert_eq!(snapshot.total_errors, 1);
        let call_sum: u64 = snapshot.tools.values().map(|t| t.count).sum();
        let error_sum: u64 = snapshot.tools.values().map(|t| t.error_count).sum();
        assert_eq!(snapshot.total_calls, call_sum);
        assert_eq!(snapshot.total_errors, error_sum);
        assert_eq!(snapshot.sessions.len(), 2);
    }

    #[tokio::test]
    async fn session_stats_nest_a_per_tool_breakdown() {
        let collector = collector_without_timer(8, FlakyExporter::new(0));
        collector.record(event("a", Some("s1"), 10, true));
        collector.record(event("b", Some("s1"), 30, false));

        let stats = collector.session_stats("s1").expect("session stats");
        assert_eq!(stats.totals.count, 2);
        assert_eq!(stats.totals.error_count, 1);
        assert_eq!(stats.tools.len(), 2);
        assert_eq!(stats.tools["b"].error_count, 1);
    }

    #[tokio::test]
    async fn top_sessions_orders_by_count_then_recency() {
        let collector = collector_without_timer(8, FlakyExporter::new(0));
        collector.record(event("a", Some("busy"), 1, true));
        collector.record(event("a", Some("busy"), 1, true));
        let mut older = event("a", Some("older"), 1, true);
        older.timestamp -= 10_000;
        collector.record(older);
        collector.record(event("a", Some("newer"), 1, true));

        let top = collector.top_sessions(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, "busy");
        assert_eq!(top[1].0, "newer");
    }

    #[tokio::test]
    async fn ring_buffer_drops_oldest_on_overflow() {
        let config = AnalyticsConfig {
            flush_interval_ms: 0,
            max_buffer_size: 2,
            ..AnalyticsConfig::default()
        };
        let collector = AnalyticsCollector::new(config, FlakyExporter::new(0));
        collector.record(event("a", None, 1, true));
        collector.record(event("b", None, 1, true));
        collector.record(event("c", None, 1, true));

        let recent = collector.recent_events();
        let names: Vec<_> = recent.iter().map(|e| e.tool_name.as_str()).collect();
        assert_eq!(names, ["b", "c"]);
    }

    #[tokio::test]
    async fn failed_batch_is_requeued_and_redelivered_in_order() {
        let exporter = FlakyExporter::new(1);
        let collector = collector_without_timer(8, exporter.clone());
        collector.record(event("a", None, 1, true));
        collector.record(event("b", None, 1, true));

        let err = collector.flush().await;
        assert!(err.is_err());
        assert_eq!(collector.pending_len(), 2);

        collector.flush().await.expect("second flush succeeds");
        let batches = exporter.batches.lock();
        assert_eq!(batches.len(), 1);
        let names: Vec<_> = batches[0].iter().map(|e| e.tool_name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[tokio::test]
    async fn repeated_flush_without_new_events_is_a_noop() {
        let exporter = FlakyExporter::new(0);
        let collector = collector_without_timer(8, exporter.clone());
        collector.record(event("a", None, 1, true));

        collector.flush().await.expect("flush");
        collector.flush().await.expect("flush again");
        assert_eq!(exporter.batches.lock().len(), 1);
    }

    #[tokio::test]
    async fn config_metadata_is_stamped_without_clobbering_event_keys() {
        let config = AnalyticsConfig {
            flush_interval_ms: 0,
            metadata: HashMap::from([
                ("env".to_string(), "test".to_string()),
                ("region".to_string(), "default".to_string()),
            ]),
            ..AnalyticsConfig::default()
        };
        let collector = AnalyticsCollector::new(config, FlakyExporter::new(0));
        let mut ev = event("a", None, 1, true);
        ev.metadata
            .insert("region".to_string(), "local".to_string());
        collector.record(ev);

        let recent = collector.recent_events();
        assert_eq!(recent[0].metadata["env"], "test");
        assert_eq!(recent[0].metadata["region"], "local");
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let collector = collector_without_timer(8, FlakyExporter::new(0));
        collector.record(event("a", Some("s"), 1, true));
        collector.reset();

        let snapshot = collector.snapshot();
        assert_eq!(snapshot.total_calls, 0);
        assert!(snapshot.tools.is_empty());
        assert!(snapshot.sessions.is_empty());
        assert_eq!(collector.pending_len(), 0);
        assert!(collector.recent_events().is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_the_timer_and_flushes_once() {
        let exporter = FlakyExporter::new(0);
        let config = AnalyticsConfig {
            flush_interval_ms: 60_000,
            ..AnalyticsConfig::default()
        };
        let collector = AnalyticsCollector::new(config, exporter.clone());
        collector.record(event("a", None, 1, true));

        collector.shutdown().await.expect("shutdown");
        assert_eq!(exporter.batches.lock().len(), 1);
        assert_eq!(collector.pending_len(), 0);
    }
}
