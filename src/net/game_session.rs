//! Update scheduler
//!
//! Runs one locked simulation tick per game: load the stored state, step the
//! physics, persist, then publish collision events right away and state
//! updates at a rate that rises as balls approach the boundary. One
//! cooperative task per game drives the ticks at a fixed cadence.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::game::constants::{broadcast, defaults, inverse_lerp};
use crate::game::engine::GameEngine;
use crate::game::match_result::{determine_result, finish, MatchEndReason};
use crate::game::state::{GameId, GameState};
use crate::metrics::Metrics;
use crate::net::ports::{GameLock, Publisher, StateStore, StoreError};
use crate::net::protocol::{BoardSnapshot, ErrorKind, ServerMessage, StateSnapshot};

/// Failure of a locked tick or command; reported to clients, never fatal to the loop
#[derive(Debug, Error)]
pub enum TickError {
    #[error("game state not found")]
    StateNotFound,
    #[error("game state corrupted: {0}")]
    StateCorruption(String),
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
    #[error("failed to encode game state: {0}")]
    Encode(String),
    #[error("game lock still busy after {0} attempts")]
    LockTimeout(u32),
}

impl TickError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TickError::StateNotFound => ErrorKind::StateNotFound,
            TickError::StateCorruption(_) => ErrorKind::StateCorruption,
            _ => ErrorKind::Internal,
        }
    }
}

/// Outcome of one scheduled tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickStatus {
    /// Another tick holds the game lock
    Skipped,
    Updated { broadcast: bool, events: usize },
    GameOver { winner: Option<usize> },
    Failed(ErrorKind),
}

/// Why a game loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    GameOver { winner: Option<usize> },
    Shutdown,
    StateLost,
}

/// State broadcast interval in seconds for the ball furthest from the centre
///
/// Slow (`MAX_INTERVAL`) inside the safe radius, fast (`MIN_INTERVAL`) at the
/// boundary, linear in between.
pub fn broadcast_interval(highest_distance: f64) -> f64 {
    let t = inverse_lerp(
        broadcast::INNER_SAFE_RADIUS,
        broadcast::OUTER_BOUNDARY_RADIUS,
        highest_distance,
    );
    broadcast::MAX_INTERVAL + (broadcast::MIN_INTERVAL - broadcast::MAX_INTERVAL) * t
}

pub struct UpdateScheduler<S, L, P> {
    store: Arc<S>,
    lock: Arc<L>,
    publisher: Arc<P>,
    metrics: Arc<Metrics>,
    tick_rate: u32,
}

impl<S, L, P> Clone for UpdateScheduler<S, L, P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            lock: self.lock.clone(),
            publisher: self.publisher.clone(),
            metrics: self.metrics.clone(),
            tick_rate: self.tick_rate,
        }
    }
}

impl<S, L, P> UpdateScheduler<S, L, P>
where
    S: StateStore,
    L: GameLock,
    P: Publisher,
{
    pub fn new(store: Arc<S>, lock: Arc<L>, publisher: Arc<P>, metrics: Arc<Metrics>, tick_rate: u32) -> Self {
        Self {
            store,
            lock,
            publisher,
            metrics,
            tick_rate: tick_rate.max(1),
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    /// Seconds of game time per tick
    pub fn dt(&self) -> f64 {
        1.0 / self.tick_rate as f64
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Persist the initial state and announce the board
    pub async fn initialize(&self, engine: &GameEngine, state: &GameState) -> Result<(), TickError> {
        let blob = state.to_bytes().map_err(|e| TickError::Encode(e.to_string()))?;
        self.store.set(state.game_id, blob).await?;
        self.publish(state.game_id, ServerMessage::Board(BoardSnapshot::from_polygon(engine.polygon())))
            .await;
        self.publish(state.game_id, ServerMessage::StateUpdate(StateSnapshot::from_game_state(state)))
            .await;
        Ok(())
    }

    /// Run one tick under the game lock
    pub async fn run_tick(&self, game_id: GameId, engine: &mut GameEngine) -> TickStatus {
        let started = Instant::now();

        match self.lock.acquire(game_id).await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Game {} is locked by another tick, skipping", game_id);
                self.metrics.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                return TickStatus::Skipped;
            }
            Err(e) => {
                warn!("Failed to acquire lock for game {}: {}", game_id, e);
                self.metrics.ticks_failed.fetch_add(1, Ordering::Relaxed);
                return TickStatus::Failed(ErrorKind::Internal);
            }
        }

        let result = self.locked_tick(game_id, engine).await;
        self.release(game_id).await;

        match result {
            Ok(status) => {
                self.metrics.record_tick_time(started.elapsed());
                status
            }
            Err(err) => {
                warn!("Tick for game {} failed: {}", game_id, err);
                self.metrics.ticks_failed.fetch_add(1, Ordering::Relaxed);
                let kind = err.kind();
                self.publish(
                    game_id,
                    ServerMessage::Error {
                        kind,
                        message: err.to_string(),
                    },
                )
                .await;
                TickStatus::Failed(kind)
            }
        }
    }

    async fn locked_tick(&self, game_id: GameId, engine: &mut GameEngine) -> Result<TickStatus, TickError> {
        let mut state = self.load(game_id).await?;
        if state.is_over() {
            return Ok(TickStatus::GameOver { winner: state.winner });
        }
        if state.geometry_seed != engine.geometry_seed() {
            warn!("Game {} board seed changed, rebuilding geometry", game_id);
            *engine = GameEngine::for_state(&state, engine.dt())
                .map_err(|e| TickError::StateCorruption(e.to_string()))?;
        }

        let outcome = engine.tick(&mut state);

        let interval = broadcast_interval(outcome.highest_distance);
        let send_state = outcome.game_over.is_some() || state.elapsed - state.last_broadcast >= interval;
        if send_state {
            state.last_broadcast = state.elapsed;
        }

        let blob = state.to_bytes().map_err(|e| TickError::Encode(e.to_string()))?;
        self.store.set(game_id, blob).await?;

        for event in &outcome.events {
            self.metrics.record_event(event);
            self.publish(game_id, ServerMessage::Collision(event.clone())).await;
        }
        self.metrics.record_speed(state.combo.highest_recorded_speed);

        if send_state {
            self.metrics.broadcasts.fetch_add(1, Ordering::Relaxed);
            self.publish(game_id, ServerMessage::StateUpdate(StateSnapshot::from_game_state(&state)))
                .await;
        }

        if let Some(reason) = outcome.game_over {
            self.publish(
                game_id,
                ServerMessage::GameOver {
                    reason,
                    result: determine_result(&state),
                },
            )
            .await;
            return Ok(TickStatus::GameOver { winner: state.winner });
        }

        Ok(TickStatus::Updated {
            broadcast: send_state,
            events: outcome.events.len(),
        })
    }

    /// Move a paddle in the stored state, waiting out a running tick
    pub async fn move_paddle(&self, game_id: GameId, paddle: usize, position: f64) -> Result<bool, TickError> {
        self.apply_command(game_id, |state| state.move_paddle(paddle, position))
            .await
    }

    /// Mark a paddle inactive; its side then behaves like an undefended goal
    pub async fn deactivate_paddle(&self, game_id: GameId, paddle: usize) -> Result<bool, TickError> {
        self.apply_command(game_id, |state| state.deactivate_paddle(paddle))
            .await
    }

    async fn apply_command<F>(&self, game_id: GameId, apply: F) -> Result<bool, TickError>
    where
        F: FnOnce(&mut GameState) -> bool + Send,
    {
        self.acquire_with_retry(game_id).await?;
        let result = self.apply_locked(game_id, apply).await;
        self.release(game_id).await;
        result
    }

    /// Wait out a running tick, giving up after a bounded number of attempts
    async fn acquire_with_retry(&self, game_id: GameId) -> Result<(), TickError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            if self.lock.acquire(game_id).await? {
                return Ok(());
            }
            if attempts >= defaults::COMMAND_LOCK_ATTEMPTS {
                return Err(TickError::LockTimeout(attempts));
            }
            tokio::time::sleep(Duration::from_millis(defaults::COMMAND_RETRY_DELAY_MS)).await;
        }
    }

    async fn apply_locked<F>(&self, game_id: GameId, apply: F) -> Result<bool, TickError>
    where
        F: FnOnce(&mut GameState) -> bool + Send,
    {
        let mut state = self.load(game_id).await?;
        // A finished game is only waiting for teardown
        if state.is_over() || !apply(&mut state) {
            return Ok(false);
        }
        let blob = state.to_bytes().map_err(|e| TickError::Encode(e.to_string()))?;
        self.store.set(game_id, blob).await?;
        Ok(true)
    }

    /// Spawn the fixed-cadence loop for one game
    pub fn spawn_game_loop(
        &self,
        game_id: GameId,
        mut engine: GameEngine,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<LoopExit> {
        let scheduler = self.clone();

        tokio::spawn(async move {
            let tick_rate = scheduler.tick_rate;
            let mut ticker = interval(Duration::from_micros(1_000_000 / tick_rate as u64));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            info!("Game loop for {} started at {} Hz", game_id, tick_rate);

            let stats_every = tick_rate as u64 * 30;
            let mut ticks: u64 = 0;
            let mut skipped: u64 = 0;
            let mut failed: u64 = 0;
            let mut broadcasts: u64 = 0;

            let exit = loop {
                if *shutdown.borrow() {
                    break LoopExit::Shutdown;
                }

                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break LoopExit::Shutdown;
                        }
                    }
                    _ = ticker.tick() => {
                        match scheduler.run_tick(game_id, &mut engine).await {
                            TickStatus::GameOver { winner } => break LoopExit::GameOver { winner },
                            TickStatus::Failed(ErrorKind::StateNotFound) => break LoopExit::StateLost,
                            TickStatus::Failed(_) => failed += 1,
                            TickStatus::Skipped => skipped += 1,
                            TickStatus::Updated { broadcast, .. } => {
                                if broadcast {
                                    broadcasts += 1;
                                }
                            }
                        }

                        ticks += 1;
                        if ticks % stats_every == 0 {
                            info!(
                                "Game {}: {} ticks, {} broadcasts, {} skipped, {} failed",
                                game_id, ticks, broadcasts, skipped, failed
                            );
                        }
                    }
                }
            };

            scheduler.terminate(game_id, exit).await;
            info!("Game loop for {} stopped: {:?}", game_id, exit);
            exit
        })
    }

    /// Release every per-game resource held in the ports
    ///
    /// Runs under the game lock so a command in flight cannot write the state
    /// back after it is deleted. A game stopped by shutdown is announced as
    /// cancelled before its channel closes.
    pub async fn terminate(&self, game_id: GameId, exit: LoopExit) {
        let locked = match self.acquire_with_retry(game_id).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Tearing down game {} without its lock: {}", game_id, e);
                false
            }
        };

        if exit == LoopExit::Shutdown {
            self.announce_cancelled(game_id).await;
        }
        if let Err(e) = self.store.delete(game_id).await {
            warn!("Failed to delete state of game {}: {}", game_id, e);
        }
        if let Err(e) = self.publisher.close(game_id).await {
            warn!("Failed to close channel of game {}: {}", game_id, e);
        }
        if locked {
            self.release(game_id).await;
        }
        self.metrics.game_ended();
    }

    async fn announce_cancelled(&self, game_id: GameId) {
        let mut state = match self.load(game_id).await {
            Ok(state) => state,
            Err(e) => {
                debug!("No final state for cancelled game {}: {}", game_id, e);
                return;
            }
        };
        if state.is_over() {
            return;
        }
        finish(&mut state, MatchEndReason::Cancelled);
        self.publish(
            game_id,
            ServerMessage::GameOver {
                reason: MatchEndReason::Cancelled,
                result: determine_result(&state),
            },
        )
        .await;
    }

    async fn load(&self, game_id: GameId) -> Result<GameState, TickError> {
        let blob = self.store.get(game_id).await?.ok_or(TickError::StateNotFound)?;
        GameState::from_bytes(&blob).map_err(|e| TickError::StateCorruption(e.to_string()))
    }

    async fn release(&self, game_id: GameId) {
        if let Err(e) = self.lock.release(game_id).await {
            warn!("Failed to release lock for game {}: {}", game_id, e);
        }
    }

    async fn publish(&self, game_id: GameId, message: ServerMessage) {
        if let Err(e) = self.publisher.broadcast(game_id, message).await {
            warn!("Failed to publish to game {}: {}", game_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameSettings;
    use crate::game::constants::physics;
    use crate::game::geometry::Polygon;
    use crate::game::state::Ball;
    use crate::game::systems::bounce::BallPhysics;
    use crate::net::memory::{ChannelPublisher, MemoryLock, MemoryStore};
    use crate::util::vec2::Vec2;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tokio::sync::broadcast::Receiver;
    use uuid::Uuid;

    type TestScheduler = UpdateScheduler<MemoryStore, MemoryLock, ChannelPublisher>;

    struct Harness {
        scheduler: TestScheduler,
        store: Arc<MemoryStore>,
        lock: Arc<MemoryLock>,
        publisher: Arc<ChannelPublisher>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let lock = Arc::new(MemoryLock::new());
        let publisher = Arc::new(ChannelPublisher::new());
        let scheduler = UpdateScheduler::new(
            store.clone(),
            lock.clone(),
            publisher.clone(),
            Arc::new(Metrics::new()),
            physics::TICK_RATE,
        );
        Harness {
            scheduler,
            store,
            lock,
            publisher,
        }
    }

    fn engine_for(settings: &GameSettings) -> GameEngine {
        let seed = 11;
        let mut geometry_rng = StdRng::seed_from_u64(seed);
        let polygon = Polygon::build(settings.num_sides, settings.num_paddles, settings.game_mode, &mut geometry_rng)
            .unwrap();
        GameEngine::new(polygon, BallPhysics::default(), StdRng::seed_from_u64(3), seed, physics::DT)
    }

    /// Stored game with its ball parked at `position`
    async fn stored_game(h: &Harness, settings: GameSettings, position: Vec2, velocity: Vec2) -> (GameId, GameEngine) {
        let mut engine = engine_for(&settings);
        let game_id = Uuid::new_v4();
        let mut state = engine.new_state(game_id, settings);
        state.balls[0] = Ball::new(position, velocity, state.dimensions.ball_size);
        state.movement[0] = state.measure_ball(engine.polygon(), 0);
        h.store.set(game_id, state.to_bytes().unwrap()).await.unwrap();
        (game_id, engine)
    }

    fn stored_state(h: &Harness, game_id: GameId) -> GameState {
        GameState::from_bytes(&h.store.snapshot(game_id).unwrap()).unwrap()
    }

    fn drain(rx: &mut Receiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[test]
    fn test_broadcast_interval_curve() {
        assert!((broadcast_interval(0.0) - 0.1).abs() < 1e-12);
        assert!((broadcast_interval(0.4) - 0.1).abs() < 1e-12);
        assert!((broadcast_interval(0.85) - 0.016).abs() < 1e-12);
        assert!((broadcast_interval(1.3) - 0.016).abs() < 1e-12);
        assert!((broadcast_interval(0.625) - 0.058).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_tick_persists_and_throttles_near_centre() {
        let h = harness();
        let (game_id, mut engine) =
            stored_game(&h, GameSettings::default(), Vec2::ZERO, Vec2::new(0.001, 0.0)).await;

        let mut broadcasts = 0;
        for _ in 0..10 {
            match h.scheduler.run_tick(game_id, &mut engine).await {
                TickStatus::Updated { broadcast, .. } => {
                    if broadcast {
                        broadcasts += 1;
                    }
                }
                other => panic!("unexpected status {:?}", other),
            }
        }

        let state = stored_state(&h, game_id);
        assert_eq!(state.tick, 10);
        assert_eq!(broadcasts, 1);
        assert!(state.last_broadcast > 0.0);
        assert!(!h.lock.is_held(game_id));
    }

    #[tokio::test]
    async fn test_broadcasts_every_tick_near_boundary() {
        let h = harness();
        let (game_id, mut engine) =
            stored_game(&h, GameSettings::default(), Vec2::new(0.7, 0.7), Vec2::ZERO).await;
        let mut rx = h.publisher.subscribe(game_id);

        for _ in 0..3 {
            let status = h.scheduler.run_tick(game_id, &mut engine).await;
            assert_eq!(status, TickStatus::Updated { broadcast: true, events: 0 });
        }

        let updates = drain(&mut rx)
            .into_iter()
            .filter(|m| matches!(m, ServerMessage::StateUpdate(_)))
            .count();
        assert_eq!(updates, 3);
        assert_eq!(h.scheduler.metrics().broadcasts.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn test_lock_contention_skips_tick() {
        let h = harness();
        let (game_id, mut engine) =
            stored_game(&h, GameSettings::default(), Vec2::ZERO, Vec2::new(0.001, 0.0)).await;

        assert!(h.lock.acquire(game_id).await.unwrap());
        assert_eq!(h.scheduler.run_tick(game_id, &mut engine).await, TickStatus::Skipped);
        assert_eq!(stored_state(&h, game_id).tick, 0);
        assert_eq!(h.scheduler.metrics().ticks_skipped.load(Ordering::Relaxed), 1);

        h.lock.release(game_id).await.unwrap();
        assert!(matches!(
            h.scheduler.run_tick(game_id, &mut engine).await,
            TickStatus::Updated { .. }
        ));
    }

    #[tokio::test]
    async fn test_corrupt_state_reports_error_and_releases_lock() {
        let h = harness();
        let settings = GameSettings::default();
        let mut engine = engine_for(&settings);
        let game_id = Uuid::new_v4();
        h.store.set(game_id, vec![0xff, 0x01, 0x02]).await.unwrap();
        let mut rx = h.publisher.subscribe(game_id);

        let status = h.scheduler.run_tick(game_id, &mut engine).await;
        assert_eq!(status, TickStatus::Failed(ErrorKind::StateCorruption));
        assert!(!h.lock.is_held(game_id));
        assert_eq!(h.store.snapshot(game_id), Some(vec![0xff, 0x01, 0x02]));

        match rx.try_recv().unwrap() {
            ServerMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::StateCorruption),
            other => panic!("expected error message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_state_reports_not_found() {
        let h = harness();
        let mut engine = engine_for(&GameSettings::default());
        let game_id = Uuid::new_v4();
        let mut rx = h.publisher.subscribe(game_id);

        let status = h.scheduler.run_tick(game_id, &mut engine).await;
        assert_eq!(status, TickStatus::Failed(ErrorKind::StateNotFound));
        assert!(!h.lock.is_held(game_id));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerMessage::Error { kind: ErrorKind::StateNotFound, .. }
        ));
    }

    #[tokio::test]
    async fn test_time_limit_publishes_game_over() {
        let h = harness();
        let settings = GameSettings {
            time_limit: Some(0.01),
            ..Default::default()
        };
        let (game_id, mut engine) = stored_game(&h, settings, Vec2::ZERO, Vec2::new(0.001, 0.0)).await;
        let mut rx = h.publisher.subscribe(game_id);

        let status = h.scheduler.run_tick(game_id, &mut engine).await;
        assert_eq!(status, TickStatus::GameOver { winner: None });
        assert!(stored_state(&h, game_id).is_over());

        let messages = drain(&mut rx);
        assert!(messages.iter().any(|m| matches!(
            m,
            ServerMessage::GameOver {
                reason: MatchEndReason::TimeLimit,
                ..
            }
        )));

        // Further ticks report the terminal state without simulating
        let status = h.scheduler.run_tick(game_id, &mut engine).await;
        assert_eq!(status, TickStatus::GameOver { winner: None });
        assert_eq!(stored_state(&h, game_id).tick, 1);
    }

    #[tokio::test]
    async fn test_collision_events_published_immediately() {
        let h = harness();
        // Heading straight for the top paddle, close enough to hit this tick
        let (game_id, mut engine) =
            stored_game(&h, GameSettings::default(), Vec2::new(0.0, 0.95), Vec2::new(0.0, 0.02)).await;
        let mut rx = h.publisher.subscribe(game_id);

        let status = h.scheduler.run_tick(game_id, &mut engine).await;
        match status {
            TickStatus::Updated { events, .. } => assert!(events >= 1),
            other => panic!("unexpected status {:?}", other),
        }

        let messages = drain(&mut rx);
        assert!(matches!(messages.first(), Some(ServerMessage::Collision(_))));
        assert!(h.scheduler.metrics().paddle_hits.load(Ordering::Relaxed) >= 1);
    }

    #[tokio::test]
    async fn test_initialize_announces_board() {
        let h = harness();
        let settings = GameSettings::default();
        let mut engine = engine_for(&settings);
        let state = engine.new_state(Uuid::new_v4(), settings);
        let mut rx = h.publisher.subscribe(state.game_id);

        h.scheduler.initialize(&engine, &state).await.unwrap();

        assert!(h.store.contains(state.game_id));
        match rx.try_recv().unwrap() {
            ServerMessage::Board(board) => assert_eq!(board.vertices.len(), 4),
            other => panic!("expected board, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_move_paddle_command() {
        let h = harness();
        let (game_id, _engine) =
            stored_game(&h, GameSettings::default(), Vec2::ZERO, Vec2::new(0.001, 0.0)).await;

        assert!(h.scheduler.move_paddle(game_id, 0, 0.2).await.unwrap());
        assert!((stored_state(&h, game_id).paddles[0].position - 0.2).abs() < 1e-12);
        assert!(!h.scheduler.move_paddle(game_id, 9, 0.2).await.unwrap());

        assert!(h.scheduler.deactivate_paddle(game_id, 1).await.unwrap());
        assert!(!stored_state(&h, game_id).paddles[1].active);
        assert!(!h.lock.is_held(game_id));
    }

    #[tokio::test]
    async fn test_command_gives_up_on_held_lock() {
        let h = harness();
        let (game_id, _engine) =
            stored_game(&h, GameSettings::default(), Vec2::ZERO, Vec2::new(0.001, 0.0)).await;

        assert!(h.lock.acquire(game_id).await.unwrap());
        let result = h.scheduler.move_paddle(game_id, 0, 0.2).await;
        assert!(matches!(result, Err(TickError::LockTimeout(_))));
    }

    #[tokio::test]
    async fn test_loop_stops_on_game_over_and_cleans_up() {
        let h = harness();
        let settings = GameSettings {
            time_limit: Some(0.05),
            ..Default::default()
        };
        let (game_id, engine) = stored_game(&h, settings, Vec2::ZERO, Vec2::new(0.001, 0.0)).await;
        let (_tx, rx) = watch::channel(false);

        let mut messages = h.publisher.subscribe(game_id);
        let exit = h.scheduler.spawn_game_loop(game_id, engine, rx).await.unwrap();

        assert_eq!(exit, LoopExit::GameOver { winner: None });
        assert!(!h.store.contains(game_id));
        assert!(!h.lock.is_held(game_id));
        assert_eq!(h.publisher.channel_count(), 0);

        let mut game_over = 0;
        loop {
            match messages.recv().await {
                Ok(ServerMessage::GameOver { reason, .. }) => {
                    assert_eq!(reason, MatchEndReason::TimeLimit);
                    game_over += 1;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
        assert_eq!(game_over, 1);
    }

    #[tokio::test]
    async fn test_loop_stops_on_shutdown() {
        let h = harness();
        let (game_id, engine) =
            stored_game(&h, GameSettings::default(), Vec2::ZERO, Vec2::new(0.001, 0.0)).await;
        let (tx, rx) = watch::channel(false);

        let mut messages = h.publisher.subscribe(game_id);
        let handle = h.scheduler.spawn_game_loop(game_id, engine, rx);
        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(true).unwrap();

        assert_eq!(handle.await.unwrap(), LoopExit::Shutdown);
        assert!(h.store.is_empty());
        assert_eq!(h.publisher.channel_count(), 0);

        let mut cancelled = None;
        while let Ok(message) = messages.recv().await {
            if let ServerMessage::GameOver { reason, result } = message {
                cancelled = Some((reason, result));
            }
        }
        let (reason, result) = cancelled.expect("cancelled game announces its result");
        assert_eq!(reason, MatchEndReason::Cancelled);
        assert_eq!(result.rankings.len(), 2);
        assert_eq!(result.rankings[0].rank, 1);
    }

    #[tokio::test]
    async fn test_commands_refused_after_game_over() {
        let h = harness();
        let (game_id, _engine) =
            stored_game(&h, GameSettings::default(), Vec2::ZERO, Vec2::new(0.001, 0.0)).await;
        let mut state = stored_state(&h, game_id);
        finish(&mut state, MatchEndReason::TimeLimit);
        let blob = state.to_bytes().unwrap();
        h.store.set(game_id, blob.clone()).await.unwrap();

        assert!(!h.scheduler.move_paddle(game_id, 0, 0.2).await.unwrap());
        assert!(!h.scheduler.deactivate_paddle(game_id, 1).await.unwrap());
        assert_eq!(h.store.snapshot(game_id), Some(blob));
        assert!(!h.lock.is_held(game_id));
    }

    #[tokio::test]
    async fn test_command_after_teardown_cannot_restore_state() {
        let h = harness();
        let (game_id, _engine) =
            stored_game(&h, GameSettings::default(), Vec2::ZERO, Vec2::new(0.001, 0.0)).await;

        h.scheduler
            .terminate(game_id, LoopExit::GameOver { winner: None })
            .await;

        assert!(matches!(
            h.scheduler.move_paddle(game_id, 0, 0.2).await,
            Err(TickError::StateNotFound)
        ));
        assert!(!h.store.contains(game_id));
        assert!(!h.lock.is_held(game_id));
    }

    #[tokio::test]
    async fn test_terminate_never_releases_a_foreign_lock() {
        let h = harness();
        let (game_id, _engine) =
            stored_game(&h, GameSettings::default(), Vec2::ZERO, Vec2::new(0.001, 0.0)).await;
        assert!(h.lock.acquire(game_id).await.unwrap());

        h.scheduler
            .terminate(game_id, LoopExit::GameOver { winner: None })
            .await;

        assert!(h.lock.is_held(game_id));
        assert!(!h.store.contains(game_id));
    }

    #[tokio::test]
    async fn test_terminate_waits_for_running_command() {
        let h = harness();
        let (game_id, _engine) =
            stored_game(&h, GameSettings::default(), Vec2::ZERO, Vec2::new(0.001, 0.0)).await;
        assert!(h.lock.acquire(game_id).await.unwrap());

        let scheduler = h.scheduler.clone();
        let teardown = tokio::spawn(async move {
            scheduler
                .terminate(game_id, LoopExit::GameOver { winner: None })
                .await
        });

        // Teardown must not touch the state while the lock is held
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(h.store.contains(game_id));
        h.lock.release(game_id).await.unwrap();

        teardown.await.unwrap();
        assert!(!h.store.contains(game_id));
        assert!(!h.lock.is_held(game_id));
    }

    #[tokio::test]
    async fn test_loop_stops_when_state_vanishes() {
        let h = harness();
        let engine = engine_for(&GameSettings::default());
        let (_tx, rx) = watch::channel(false);

        let exit = h.scheduler.spawn_game_loop(Uuid::new_v4(), engine, rx).await.unwrap();
        assert_eq!(exit, LoopExit::StateLost);
    }
}
