//! Process-wide counters, exposed through `/health` and the Prometheus
//! text-exposition endpoint. Mostly plain atomics: there is no
//! label-cardinality concern at this scale. Per-verb operation latency is the
//! one place a small fixed-size histogram earns its keep, since "is
//! submit_frame getting slow" is a real operational question the snapshot
//! alone can't answer.

use std::sync::atomic::{AtomicU64, Ordering};

/// Verbs that get their own op-duration histogram in `/metrics`. Fixed set,
/// indexed by position rather than a `HashMap<String, _>`, so recording a
/// sample never allocates or takes a lock.
pub const TRACKED_VERBS: &[&str] = &[
    "hello",
    "resync",
    "get_frame",
    "create_public_and_submit",
    "join_random",
    "join_by_id",
    "join_room",
    "submit_frame",
];

#[derive(Debug, Default)]
struct OpHistogram {
    count: AtomicU64,
    sum_ms: AtomicU64,
    max_ms: AtomicU64,
}

impl OpHistogram {
    fn record(&self, elapsed_ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        self.max_ms.fetch_max(elapsed_ms, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub rooms_created: AtomicU64,
    pub rooms_completed: AtomicU64,
    pub frames_committed: AtomicU64,
    pub rate_limit_rejections: AtomicU64,
    pub persistence_errors: AtomicU64,
    pub backups_run: AtomicU64,
    pub evictions: AtomicU64,
    pub unknown_verb_frames: AtomicU64,
    pub malformed_frames: AtomicU64,
    pub room_id_collisions: AtomicU64,
    op_durations: [OpHistogram; TRACKED_VERBS.len()],
}

impl Metrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Records one operation's wall-clock latency against its verb's
    /// histogram. Unrecognized verbs are dropped silently; `route` only ever
    /// passes verbs out of [`TRACKED_VERBS`].
    pub fn record_op_duration(&self, verb: &str, elapsed_ms: u64) {
        if let Some(index) = TRACKED_VERBS.iter().position(|v| *v == verb) {
            self.op_durations[index].record(elapsed_ms);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            rooms_created: self.rooms_created.load(Ordering::Relaxed),
            rooms_completed: self.rooms_completed.load(Ordering::Relaxed),
            frames_committed: self.frames_committed.load(Ordering::Relaxed),
            rate_limit_rejections: self.rate_limit_rejections.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
            backups_run: self.backups_run.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            unknown_verb_frames: self.unknown_verb_frames.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            room_id_collisions: self.room_id_collisions.load(Ordering::Relaxed),
        }
    }

    /// Renders the Prometheus text-exposition format. Every metric is
    /// prefixed `frameyard_`; names and labels only ever contain
    /// `[A-Za-z0-9_]`, which holds trivially here since they're all literals.
    #[must_use]
    pub fn render_prometheus(
        &self,
        cached_rooms: u64,
        indexed_rooms: u64,
        quarantined_rooms: u64,
        dirty_rooms: u64,
        rss_bytes: u64,
    ) -> String {
        let s = self.snapshot();
        let mut out = String::new();
        let mut gauge = |name: &str, help: &str, value: u64| {
            out.push_str(&format!("# HELP frameyard_{name} {help}\n"));
            out.push_str(&format!("# TYPE frameyard_{name} gauge\n"));
            out.push_str(&format!("frameyard_{name} {value}\n"));
        };
        let mut counter = |name: &str, help: &str, value: u64| {
            out.push_str(&format!("# HELP frameyard_{name} {help}\n"));
            out.push_str(&format!("# TYPE frameyard_{name} counter\n"));
            out.push_str(&format!("frameyard_{name} {value}\n"));
        };

        counter("connections_total", "Total websocket connections accepted", s.connections_total);
        gauge("connections_active", "Currently open websocket connections", s.connections_active);
        counter("rooms_created_total", "Rooms created", s.rooms_created);
        counter("rooms_completed_total", "Rooms that reached all 60 frames committed", s.rooms_completed);
        counter("frames_committed_total", "Frames committed across all rooms", s.frames_committed);
        counter("rate_limit_rejections_total", "Requests rejected by the rate limiter", s.rate_limit_rejections);
        counter("persistence_errors_total", "Errors encountered writing or reading room state", s.persistence_errors);
        counter("backups_run_total", "Incremental backup cycles executed", s.backups_run);
        counter("evictions_total", "Rooms evicted from the in-memory cache", s.evictions);
        counter("unknown_verb_frames_total", "Inbound frames with an unrecognized verb", s.unknown_verb_frames);
        counter("malformed_frames_total", "Inbound frames with a recognized verb but invalid data", s.malformed_frames);
        counter("room_id_collisions_total", "Room-id mint attempts that collided with an existing room", s.room_id_collisions);
        gauge("rooms_cached", "Rooms currently held in the in-memory cache", cached_rooms);
        gauge("rooms_indexed", "Rooms present in the on-disk index", indexed_rooms);
        gauge("rooms_quarantined", "Rooms currently quarantined", quarantined_rooms);
        gauge("rooms_dirty", "Rooms saved since the last incremental backup", dirty_rooms);
        gauge("memory_rss_bytes", "Resident set size of the server process in bytes", rss_bytes);

        for (verb, hist) in TRACKED_VERBS.iter().zip(self.op_durations.iter()) {
            let count = hist.count.load(Ordering::Relaxed);
            let sum_ms = hist.sum_ms.load(Ordering::Relaxed);
            let max_ms = hist.max_ms.load(Ordering::Relaxed);
            out.push_str(&format!(
                "# HELP frameyard_op_duration_ms_sum Sum of op latency in milliseconds, by verb\n\
                 # TYPE frameyard_op_duration_ms_sum counter\n\
                 frameyard_op_duration_ms_sum{{verb=\"{verb}\"}} {sum_ms}\n\
                 # HELP frameyard_op_duration_ms_count Count of ops observed, by verb\n\
                 # TYPE frameyard_op_duration_ms_count counter\n\
                 frameyard_op_duration_ms_count{{verb=\"{verb}\"}} {count}\n\
                 # HELP frameyard_op_duration_ms_max Max observed op latency in milliseconds, by verb\n\
                 # TYPE frameyard_op_duration_ms_max gauge\n\
                 frameyard_op_duration_ms_max{{verb=\"{verb}\"}} {max_ms}\n"
            ));
        }

        out
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub rooms_created: u64,
    pub rooms_completed: u64,
    pub frames_committed: u64,
    pub rate_limit_rejections: u64,
    pub persistence_errors: u64,
    pub backups_run: u64,
    pub evictions: u64,
    pub unknown_verb_frames: u64,
    pub malformed_frames: u64,
    pub room_id_collisions: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_open_and_close_tracks_active_count() {
        let metrics = Metrics::new();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_total, 2);
        assert_eq!(snapshot.connections_active, 1);
    }

    #[test]
    fn prometheus_render_includes_prefixed_metric_names() {
        let metrics = Metrics::new();
        metrics.rooms_created.fetch_add(3, Ordering::Relaxed);
        let text = metrics.render_prometheus(1, 2, 0, 4, 1024);
        assert!(text.contains("frameyard_rooms_created_total 3"));
        assert!(text.contains("frameyard_rooms_cached 1"));
        assert!(text.contains("frameyard_rooms_dirty 4"));
        assert!(text.contains("frameyard_memory_rss_bytes 1024"));
    }

    #[test]
    fn op_duration_histogram_tracks_count_sum_and_max_per_verb() {
        let metrics = Metrics::new();
        metrics.record_op_duration("submit_frame", 10);
        metrics.record_op_duration("submit_frame", 40);
        metrics.record_op_duration("join_random", 5);

        let text = metrics.render_prometheus(0, 0, 0, 0, 0);
        assert!(text.contains("frameyard_op_duration_ms_count{verb=\"submit_frame\"} 2"));
        assert!(text.contains("frameyard_op_duration_ms_sum{verb=\"submit_frame\"} 50"));
        assert!(text.contains("frameyard_op_duration_ms_max{verb=\"submit_frame\"} 40"));
        assert!(text.contains("frameyard_op_duration_ms_count{verb=\"join_random\"} 1"));
    }

    #[test]
    fn unrecognized_verb_is_ignored_rather_than_panicking() {
        let metrics = Metrics::new();
        metrics.record_op_duration("not_a_real_verb", 99);
        let text = metrics.render_prometheus(0, 0, 0, 0, 0);
        assert!(!text.contains("not_a_real_verb"));
    }
}
