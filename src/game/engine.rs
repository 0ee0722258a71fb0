//! Physics tick
//!
//! `GameEngine` owns the cached board geometry and the bounce model for one
//! game and advances a `GameState` by one tick: movement tracking, candidate
//! selection, resolution and the end-of-match check. Balls are processed in
//! index order.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::warn;

use crate::config::GameSettings;
use crate::game::geometry::{GeometryError, Polygon};
use crate::game::match_result::{self, MatchEndReason};
use crate::game::state::{GameId, GameState};
use crate::game::systems::bounce::BallPhysics;
use crate::game::systems::collision::{self, Resolution, TickEvents};
use crate::game::systems::{candidate, movement};
use crate::net::protocol::CollisionEvent;

/// Result of one physics tick
#[derive(Debug, Clone, Default)]
pub struct TickOutcome {
    pub events: TickEvents,
    /// Largest ball distance from the centre after the tick
    pub highest_distance: f64,
    pub game_over: Option<MatchEndReason>,
}

pub struct GameEngine {
    polygon: Polygon,
    physics: BallPhysics,
    rng: StdRng,
    geometry_seed: u64,
    dt: f64,
}

impl GameEngine {
    pub fn new(polygon: Polygon, physics: BallPhysics, rng: StdRng, geometry_seed: u64, dt: f64) -> Self {
        Self {
            polygon,
            physics,
            rng,
            geometry_seed,
            dt,
        }
    }

    /// Build the board for a game; the same seed always yields the same board
    pub fn for_settings(settings: &GameSettings, geometry_seed: u64, dt: f64) -> Result<Self, GeometryError> {
        let mut geometry_rng = StdRng::seed_from_u64(geometry_seed);
        let polygon = Polygon::build(
            settings.num_sides,
            settings.num_paddles,
            settings.game_mode,
            &mut geometry_rng,
        )?;
        Ok(Self::new(
            polygon,
            BallPhysics::default(),
            StdRng::from_entropy(),
            geometry_seed,
            dt,
        ))
    }

    /// Rebuild the engine for a persisted state
    pub fn for_state(state: &GameState, dt: f64) -> Result<Self, GeometryError> {
        Self::for_settings(&state.settings, state.geometry_seed, dt)
    }

    pub fn polygon(&self) -> &Polygon {
        &self.polygon
    }

    pub fn physics(&self) -> &BallPhysics {
        &self.physics
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn geometry_seed(&self) -> u64 {
        self.geometry_seed
    }

    /// Fresh state with balls served from the centre
    pub fn new_state(&mut self, game_id: GameId, settings: GameSettings) -> GameState {
        GameState::new(game_id, settings, &self.polygon, self.geometry_seed, &mut self.rng)
    }

    /// Advance the game by one tick
    pub fn tick(&mut self, state: &mut GameState) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if state.is_over() {
            outcome.highest_distance = state.highest_distance();
            return outcome;
        }

        state.tick += 1;
        state.elapsed += self.dt;
        state.combo.decay(state.elapsed);
        self.repair_history(state);

        for ball_index in 0..state.balls.len() {
            if let Some(reason) = self.step_ball(state, ball_index, &mut outcome.events) {
                outcome.game_over = Some(reason);
                break;
            }
        }

        if outcome.game_over.is_none() {
            if let Some(reason) = match_result::check_match_end(state) {
                match_result::finish(state, reason);
                outcome.game_over = Some(reason);
            }
        }

        outcome.highest_distance = state.highest_distance();
        outcome
    }

    /// Move one ball and resolve its collision. Returns a reason if the game ended.
    fn step_ball(&mut self, state: &mut GameState, ball_index: usize, events: &mut TickEvents) -> Option<MatchEndReason> {
        let velocity = state.balls[ball_index].velocity;
        state.balls[ball_index].position += velocity;

        let ball = state.balls[ball_index];
        let observations = movement::track(&self.polygon, &ball, &mut state.movement[ball_index]);
        let selected = candidate::select(&self.polygon, &state.dimensions, &ball, &observations)
            .filter(|c| c.needs_resolution());

        match selected {
            Some(found) => {
                let resolution = collision::resolve(
                    &self.polygon,
                    &self.physics,
                    state,
                    ball_index,
                    &found,
                    &mut self.rng,
                    events,
                );
                match resolution {
                    Resolution::PaddleHit | Resolution::WallHit => {
                        // New position and velocity are the baseline for the next tick
                        state.movement[ball_index] = state.measure_ball(&self.polygon, ball_index);
                    }
                    Resolution::Miss => {
                        if let Some(reason) = match_result::check_match_end(state) {
                            match_result::finish(state, reason);
                            return Some(reason);
                        }
                    }
                    Resolution::Reset => {}
                }
            }
            None if !self.polygon.contains(state.balls[ball_index].position) => {
                warn!(
                    "Game {}: ball {} left the board undetected at {:?}, resetting",
                    state.game_id, ball_index, state.balls[ball_index].position
                );
                state.reset_ball(&self.polygon, ball_index, &mut self.rng);
                events.push(CollisionEvent::BallReset { ball: ball_index });
            }
            None => {}
        }

        let speed = state.balls[ball_index].speed();
        state.combo.record_speed(speed);
        None
    }

    /// Re-measure histories that do not match the board or ball count
    fn repair_history(&self, state: &mut GameState) {
        let sides = self.polygon.side_count();
        state.movement.resize(state.balls.len(), Vec::new());
        for ball_index in 0..state.balls.len() {
            if state.movement[ball_index].len() != sides {
                state.movement[ball_index] = state.measure_ball(&self.polygon, ball_index);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::constants::physics;
    use crate::game::geometry::GameMode;
    use crate::game::state::{Ball, GamePhase};
    use crate::util::vec2::Vec2;
    use uuid::Uuid;

    fn engine_for(settings: &GameSettings) -> GameEngine {
        let mut geometry_rng = StdRng::seed_from_u64(1);
        let polygon = Polygon::build(
            settings.num_sides,
            settings.num_paddles,
            settings.game_mode,
            &mut geometry_rng,
        )
        .unwrap();
        GameEngine::new(polygon, BallPhysics::default(), StdRng::seed_from_u64(2), 1, physics::DT)
    }

    fn square_game() -> (GameEngine, GameState) {
        let settings = GameSettings::default();
        let mut engine = engine_for(&settings);
        let state = engine.new_state(Uuid::new_v4(), settings);
        (engine, state)
    }

    fn place(engine: &GameEngine, state: &mut GameState, position: Vec2, velocity: Vec2) {
        state.balls[0] = Ball::new(position, velocity, state.dimensions.ball_size);
        state.movement[0] = state.measure_ball(engine.polygon(), 0);
    }

    #[test]
    fn test_paddle_scenario() {
        let (mut engine, mut state) = square_game();
        place(&engine, &mut state, Vec2::ZERO, Vec2::new(0.0, 0.05));

        let mut hit = None;
        for _ in 0..40 {
            let outcome = engine.tick(&mut state);
            // A 0.05 step can skip the contact band, so a tunneling event may come first
            hit = outcome
                .events
                .into_iter()
                .find(|e| matches!(e, CollisionEvent::PaddleHit { .. }));
            if hit.is_some() {
                break;
            }
        }

        match hit {
            Some(CollisionEvent::PaddleHit { side, offset, .. }) => {
                assert_eq!(side, 3);
                assert!(offset.abs() < 1e-9);
            }
            other => panic!("expected paddle hit, got {:?}", other),
        }
        let ball = state.balls[0];
        assert!(ball.velocity.y < 0.0);
        assert!(ball.speed() > 0.05);
    }

    #[test]
    fn test_miss_scenario() {
        let (mut engine, mut state) = square_game();
        state.combo.register_hit(state.elapsed);
        // Heading for the top side far from the centred paddle
        place(&engine, &mut state, Vec2::new(0.8, 0.0), Vec2::new(0.0, 0.05));

        let mut missed = false;
        for _ in 0..40 {
            let outcome = engine.tick(&mut state);
            if outcome.events.iter().any(|e| matches!(e, CollisionEvent::Miss { .. })) {
                missed = true;
                break;
            }
        }

        assert!(missed);
        assert_eq!(state.scores, vec![1, 0]);
        assert_eq!(state.combo.hit_combo, 0);
        assert_eq!(state.balls[0].position, Vec2::ZERO);
        assert!((state.balls[0].speed() - 0.006).abs() < 1e-12);
    }

    #[test]
    fn test_tunneling_scenario() {
        let (mut engine, mut state) = square_game();
        // Fast enough to cross the whole board in one tick
        place(&engine, &mut state, Vec2::new(0.0, 0.9), Vec2::new(0.0, 2.5));
        let outcome = engine.tick(&mut state);

        assert!(matches!(outcome.events[0], CollisionEvent::Tunneling { side: 3, .. }));
        assert!(matches!(outcome.events[1], CollisionEvent::PaddleHit { side: 3, .. }));
        assert!(engine.polygon().contains(state.balls[0].position));
    }

    #[test]
    fn test_winning_score_ends_game() {
        let settings = GameSettings {
            winning_score: 1,
            ..Default::default()
        };
        let mut engine = engine_for(&settings);
        let mut state = engine.new_state(Uuid::new_v4(), settings);
        place(&engine, &mut state, Vec2::new(0.8, 0.92), Vec2::new(0.0, 0.05));

        let outcome = engine.tick(&mut state);
        assert_eq!(outcome.game_over, Some(MatchEndReason::ScoreReached));
        assert_eq!(state.phase, GamePhase::GameOver);
        assert_eq!(state.winner, Some(0));

        // Terminal states do not advance
        let tick = state.tick;
        let outcome = engine.tick(&mut state);
        assert!(outcome.events.is_empty());
        assert_eq!(state.tick, tick);
    }

    #[test]
    fn test_time_limit_ends_game() {
        let settings = GameSettings {
            time_limit: Some(0.05),
            ..Default::default()
        };
        let mut engine = engine_for(&settings);
        let mut state = engine.new_state(Uuid::new_v4(), settings);
        let mut reason = None;
        for _ in 0..10 {
            if let Some(r) = engine.tick(&mut state).game_over {
                reason = Some(r);
                break;
            }
        }
        assert_eq!(reason, Some(MatchEndReason::TimeLimit));
        assert_eq!(state.winner, None);
    }

    #[test]
    fn test_combo_times_out_on_game_clock() {
        let (mut engine, mut state) = square_game();
        place(&engine, &mut state, Vec2::ZERO, Vec2::new(0.001, 0.0));
        state.combo.register_hit(0.0);
        for _ in 0..89 {
            engine.tick(&mut state);
        }
        assert_eq!(state.combo.hit_combo, 1);
        for _ in 0..2 {
            engine.tick(&mut state);
        }
        assert_eq!(state.combo.hit_combo, 0);
    }

    #[test]
    fn test_balls_stay_inside_for_every_mode() {
        for mode in [
            GameMode::Regular,
            GameMode::Classic,
            GameMode::Irregular,
            GameMode::Crazy,
            GameMode::Star,
        ] {
            let settings = GameSettings {
                num_sides: 7,
                num_paddles: 3,
                max_players: 3,
                game_mode: mode,
                num_balls: 3,
                winning_score: 10_000,
                ..Default::default()
            };
            let mut engine = engine_for(&settings);
            let mut state = engine.new_state(Uuid::new_v4(), settings);
            for _ in 0..3000 {
                engine.tick(&mut state);
                for ball in &state.balls {
                    assert!(ball.position.is_finite());
                    assert!(ball.position.max_abs() < 1.5, "{:?} ball escaped to {:?}", mode, ball.position);
                }
            }
        }
    }

    #[test]
    fn test_engine_rebuilds_same_board() {
        let settings = GameSettings {
            num_sides: 6,
            num_paddles: 3,
            max_players: 3,
            game_mode: GameMode::Crazy,
            ..Default::default()
        };
        let a = GameEngine::for_settings(&settings, 77, physics::DT).unwrap();
        let mut b = GameEngine::for_settings(&settings, 77, physics::DT).unwrap();
        assert_eq!(a.polygon(), b.polygon());

        let state = b.new_state(Uuid::new_v4(), settings);
        let c = GameEngine::for_state(&state, physics::DT).unwrap();
        assert_eq!(c.polygon(), a.polygon());
    }

    #[test]
    fn test_highest_distance_reported() {
        let (mut engine, mut state) = square_game();
        place(&engine, &mut state, Vec2::new(0.3, 0.4), Vec2::ZERO);
        let outcome = engine.tick(&mut state);
        assert!((outcome.highest_distance - 0.5).abs() < 1e-9);
    }
}
