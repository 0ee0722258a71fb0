//! Prometheus-compatible metrics endpoint
//!
//! Exposes scheduler and physics counters in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::net::protocol::CollisionEvent;

/// Speeds are stored as integer micro-units per tick
const SPEED_SCALE: f64 = 1_000_000.0;

/// Metrics registry for the game server
#[derive(Debug)]
pub struct Metrics {
    // Games
    pub games_created: AtomicU64,
    pub games_active: AtomicU64,
    pub games_finished: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,

    // Scheduler outcomes
    pub tick_count: AtomicU64,
    pub ticks_skipped: AtomicU64,
    pub ticks_failed: AtomicU64,
    pub broadcasts: AtomicU64,

    // Collision events by kind
    pub paddle_hits: AtomicU64,
    pub wall_hits: AtomicU64,
    pub misses: AtomicU64,
    pub tunneling: AtomicU64,
    pub ball_resets: AtomicU64,

    highest_speed: AtomicU64,
    start_time: Instant,

    // Rolling tick times for percentile calculation
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            games_created: AtomicU64::new(0),
            games_active: AtomicU64::new(0),
            games_finished: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            ticks_failed: AtomicU64::new(0),
            broadcasts: AtomicU64::new(0),
            paddle_hits: AtomicU64::new(0),
            wall_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            tunneling: AtomicU64::new(0),
            ball_resets: AtomicU64::new(0),
            highest_speed: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(1000)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);
        while history.len() > 1000 {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us.store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us.store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us.store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    pub fn record_event(&self, event: &CollisionEvent) {
        let counter = match event {
            CollisionEvent::PaddleHit { .. } => &self.paddle_hits,
            CollisionEvent::WallHit { .. } => &self.wall_hits,
            CollisionEvent::Miss { .. } => &self.misses,
            CollisionEvent::Tunneling { .. } => &self.tunneling,
            CollisionEvent::BallReset { .. } => &self.ball_resets,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// High-water mark, never decreases
    pub fn record_speed(&self, speed: f64) {
        if speed.is_finite() && speed > 0.0 {
            self.highest_speed
                .fetch_max((speed * SPEED_SCALE) as u64, Ordering::Relaxed);
        }
    }

    pub fn highest_speed(&self) -> f64 {
        self.highest_speed.load(Ordering::Relaxed) as f64 / SPEED_SCALE
    }

    pub fn game_started(&self) {
        self.games_created.fetch_add(1, Ordering::Relaxed);
        self.games_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn game_ended(&self) {
        self.games_finished.fetch_add(1, Ordering::Relaxed);
        // Saturating: a game torn down before start was never counted
        let _ = self
            .games_active
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("polygon_pong_games_created_total", "Games started since boot", "counter",
            self.games_created.load(Ordering::Relaxed));
        metric!("polygon_pong_games_active", "Games currently running", "gauge",
            self.games_active.load(Ordering::Relaxed));
        metric!("polygon_pong_games_finished_total", "Games terminated since boot", "counter",
            self.games_finished.load(Ordering::Relaxed));

        metric!("polygon_pong_tick_time_microseconds", "Last tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("polygon_pong_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("polygon_pong_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("polygon_pong_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));

        metric!("polygon_pong_ticks_total", "Ticks simulated", "counter",
            self.tick_count.load(Ordering::Relaxed));
        metric!("polygon_pong_ticks_skipped_total", "Ticks skipped on lock contention", "counter",
            self.ticks_skipped.load(Ordering::Relaxed));
        metric!("polygon_pong_ticks_failed_total", "Ticks aborted with an error", "counter",
            self.ticks_failed.load(Ordering::Relaxed));
        metric!("polygon_pong_broadcasts_total", "State updates published", "counter",
            self.broadcasts.load(Ordering::Relaxed));

        output.push_str("# HELP polygon_pong_collisions_total Collision events by kind\n");
        output.push_str("# TYPE polygon_pong_collisions_total counter\n");
        for (kind, counter) in [
            ("paddle_hit", &self.paddle_hits),
            ("wall_hit", &self.wall_hits),
            ("miss", &self.misses),
            ("tunneling", &self.tunneling),
            ("ball_reset", &self.ball_resets),
        ] {
            output.push_str(&format!(
                "polygon_pong_collisions_total{{kind=\"{}\"}} {}\n",
                kind,
                counter.load(Ordering::Relaxed)
            ));
        }

        metric!("polygon_pong_highest_ball_speed", "Highest recorded ball speed (units per tick)", "gauge",
            self.highest_speed());
        metric!("polygon_pong_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics (alternative for direct API access)
    pub fn to_json(&self) -> String {
        format!(r#"{{
  "games": {{
    "created": {},
    "active": {},
    "finished": {}
  }},
  "performance": {{
    "tick_time_us": {},
    "tick_time_p95_us": {},
    "tick_time_p99_us": {},
    "tick_time_max_us": {},
    "tick_count": {},
    "skipped": {},
    "failed": {},
    "broadcasts": {}
  }},
  "collisions": {{
    "paddle_hit": {},
    "wall_hit": {},
    "miss": {},
    "tunneling": {},
    "ball_reset": {}
  }},
  "highest_speed": {},
  "uptime_seconds": {}
}}"#,
            self.games_created.load(Ordering::Relaxed),
            self.games_active.load(Ordering::Relaxed),
            self.games_finished.load(Ordering::Relaxed),
            self.tick_time_us.load(Ordering::Relaxed),
            self.tick_time_p95_us.load(Ordering::Relaxed),
            self.tick_time_p99_us.load(Ordering::Relaxed),
            self.tick_time_max_us.load(Ordering::Relaxed),
            self.tick_count.load(Ordering::Relaxed),
            self.ticks_skipped.load(Ordering::Relaxed),
            self.ticks_failed.load(Ordering::Relaxed),
            self.broadcasts.load(Ordering::Relaxed),
            self.paddle_hits.load(Ordering::Relaxed),
            self.wall_hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
            self.tunneling.load(Ordering::Relaxed),
            self.ball_resets.load(Ordering::Relaxed),
            self.highest_speed(),
            self.uptime_seconds(),
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = respond(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}

fn respond(metrics: &Metrics, request: &str) -> String {
    let (content_type, body) = if request.starts_with("GET /metrics/json") || request.starts_with("GET /json") {
        ("application/json", metrics.to_json())
    } else if request.starts_with("GET /metrics") {
        ("text/plain; version=0.0.4", metrics.to_prometheus())
    } else if request.starts_with("GET /health") || request.starts_with("GET / ") {
        ("text/plain", "OK".to_string())
    } else {
        return "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
    };

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_tick_time() {
        let metrics = Metrics::new();
        for i in 0..100 {
            metrics.record_tick_time(Duration::from_micros(100 + i * 10));
        }

        assert_eq!(metrics.tick_count.load(Ordering::Relaxed), 100);
        assert!(metrics.tick_time_p95_us.load(Ordering::Relaxed) >= 1000);
        assert_eq!(metrics.tick_time_max_us.load(Ordering::Relaxed), 1090);
    }

    #[test]
    fn test_record_event_by_kind() {
        let metrics = Metrics::new();
        metrics.record_event(&CollisionEvent::WallHit { ball: 0, side: 1, speed: 0.01 });
        metrics.record_event(&CollisionEvent::WallHit { ball: 0, side: 2, speed: 0.01 });
        metrics.record_event(&CollisionEvent::Tunneling { ball: 0, side: 2 });

        assert_eq!(metrics.wall_hits.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.tunneling.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.paddle_hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_highest_speed_is_monotonic() {
        let metrics = Metrics::new();
        metrics.record_speed(0.012);
        metrics.record_speed(0.006);
        metrics.record_speed(f64::NAN);
        assert!((metrics.highest_speed() - 0.012).abs() < 1e-6);
    }

    #[test]
    fn test_game_counters() {
        let metrics = Metrics::new();
        metrics.game_started();
        metrics.game_started();
        metrics.game_ended();
        metrics.game_ended();
        metrics.game_ended();
        assert_eq!(metrics.games_active.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.games_finished.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.ticks_skipped.store(7, Ordering::Relaxed);
        metrics.record_event(&CollisionEvent::BallReset { ball: 0 });

        let output = metrics.to_prometheus();

        assert!(output.contains("polygon_pong_ticks_skipped_total 7"));
        assert!(output.contains("polygon_pong_collisions_total{kind=\"ball_reset\"} 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_json_is_valid() {
        let metrics = Metrics::new();
        metrics.broadcasts.store(3, Ordering::Relaxed);

        let value: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(value["performance"]["broadcasts"], 3);
        assert_eq!(value["collisions"]["miss"], 0);
    }

    #[test]
    fn test_respond_routes() {
        let metrics = Metrics::new();
        assert!(respond(&metrics, "GET /metrics HTTP/1.1").contains("polygon_pong_ticks_total"));
        assert!(respond(&metrics, "GET /metrics/json HTTP/1.1").contains("application/json"));
        assert!(respond(&metrics, "GET /health HTTP/1.1").ends_with("OK"));
        assert!(respond(&metrics, "GET /nope HTTP/1.1").starts_with("HTTP/1.1 404"));
    }
}
