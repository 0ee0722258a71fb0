//! Game state definitions and structures
//!
//! Contains the balls, paddles, scores, combo tracking and per-side movement
//! history that make up one game. The whole struct is what the state store
//! persists between ticks.

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::GameSettings;
use crate::game::constants::{collision, combo, defaults, physics};
use crate::game::geometry::Polygon;
use crate::util::vec2::Vec2;

/// Unique game identifier
pub type GameId = Uuid;

/// Ball state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ball {
    pub position: Vec2,
    /// Board units per tick
    pub velocity: Vec2,
    /// Collision radius
    pub size: f64,
}

impl Ball {
    pub fn new(position: Vec2, velocity: Vec2, size: f64) -> Self {
        Self {
            position,
            velocity,
            size,
        }
    }

    /// Ball at the centre heading in a random direction
    pub fn serve<R: Rng + ?Sized>(size: f64, speed: f64, rng: &mut R) -> Self {
        let angle = rng.gen_range(0.0..std::f64::consts::TAU);
        Self::new(Vec2::ZERO, Vec2::from_angle(angle) * speed, size)
    }

    #[inline]
    pub fn speed(&self) -> f64 {
        self.velocity.length()
    }

    #[inline]
    pub fn distance_from_center(&self) -> f64 {
        self.position.length()
    }
}

/// Paddle on one active side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Paddle {
    pub side_index: usize,
    /// Paddle centre along its side, 0..1
    pub position: f64,
    pub active: bool,
}

impl Paddle {
    pub fn new(side_index: usize) -> Self {
        Self {
            side_index,
            position: 0.5,
            active: true,
        }
    }

    /// Move the paddle, keeping it fully on its side
    pub fn set_position(&mut self, position: f64, half_width: f64) {
        let half = half_width.clamp(0.0, 0.5);
        let position = if position.is_finite() { position } else { 0.5 };
        self.position = position.clamp(half, 1.0 - half);
    }
}

/// Sizes shared by every paddle and ball of a game
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GameDimensions {
    /// Full paddle width as a fraction of its side
    pub paddle_width: f64,
    /// Inward depth of the paddle surface
    pub paddle_thickness: f64,
    pub ball_size: f64,
}

impl Default for GameDimensions {
    fn default() -> Self {
        Self {
            paddle_width: defaults::PADDLE_WIDTH,
            paddle_thickness: defaults::PADDLE_THICKNESS,
            ball_size: defaults::BALL_SIZE,
        }
    }
}

impl GameDimensions {
    pub fn from_settings(settings: &GameSettings) -> Self {
        Self {
            paddle_width: defaults::PADDLE_WIDTH * settings.paddle_size,
            paddle_thickness: defaults::PADDLE_THICKNESS,
            ball_size: defaults::BALL_SIZE * settings.ball_size,
        }
    }

    #[inline]
    pub fn half_width(&self) -> f64 {
        self.paddle_width / 2.0
    }
}

/// Last observed relation between one ball and one side
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MovementRecord {
    /// Absolute distance to the side line
    pub distance: f64,
    /// Positive inside the board
    pub signed_distance: f64,
    /// Velocity · inward normal, negative when approaching
    pub dot_product: f64,
    pub in_deadzone: bool,
}

impl MovementRecord {
    /// Measure a ball against a side
    pub fn measure(polygon: &Polygon, side: usize, ball: &Ball) -> Self {
        let signed_distance = polygon.signed_distance(side, ball.position);
        let distance = signed_distance.abs();
        Self {
            distance,
            signed_distance,
            dot_product: ball.velocity.dot(polygon.normal(side)),
            in_deadzone: distance > collision::DEADZONE_DISTANCE,
        }
    }
}

/// Consecutive paddle returns and speed high-water mark
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComboState {
    pub hit_combo: u32,
    /// Game clock of the last paddle hit
    pub last_hit_time: f64,
    /// Seconds without a hit before the combo resets
    pub combo_timeout: f64,
    /// Never decreases
    pub highest_recorded_speed: f64,
}

impl Default for ComboState {
    fn default() -> Self {
        Self {
            hit_combo: 0,
            last_hit_time: 0.0,
            combo_timeout: combo::TIMEOUT,
            highest_recorded_speed: 0.0,
        }
    }
}

impl ComboState {
    /// Reset the combo once `now` is past the timeout. Returns true if it reset.
    pub fn decay(&mut self, now: f64) -> bool {
        if self.hit_combo > 0 && now - self.last_hit_time > self.combo_timeout {
            self.hit_combo = 0;
            return true;
        }
        false
    }

    pub fn register_hit(&mut self, now: f64) {
        self.hit_combo += 1;
        self.last_hit_time = now;
    }

    pub fn reset(&mut self) {
        self.hit_combo = 0;
    }

    pub fn record_speed(&mut self, speed: f64) {
        if speed.is_finite() && speed > self.highest_recorded_speed {
            self.highest_recorded_speed = speed;
        }
    }
}

/// Game phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GamePhase {
    #[default]
    Playing,
    GameOver,
}

/// Complete game state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub game_id: GameId,
    pub settings: GameSettings,
    /// Seed the board was built from; any worker can rebuild it
    pub geometry_seed: u64,
    pub phase: GamePhase,
    pub balls: Vec<Ball>,
    /// One per active side, in ascending side order
    pub paddles: Vec<Paddle>,
    /// One per paddle
    pub scores: Vec<u32>,
    pub dimensions: GameDimensions,
    pub combo: ComboState,
    /// `movement[ball][side]`
    pub movement: Vec<Vec<MovementRecord>>,
    pub tick: u64,
    /// Game clock in seconds
    pub elapsed: f64,
    /// Game clock of the last state broadcast
    pub last_broadcast: f64,
    /// Paddle index of the winner
    pub winner: Option<usize>,
}

impl GameState {
    pub fn new<R: Rng + ?Sized>(
        game_id: GameId,
        settings: GameSettings,
        polygon: &Polygon,
        geometry_seed: u64,
        rng: &mut R,
    ) -> Self {
        let dimensions = GameDimensions::from_settings(&settings);
        let serve_speed = physics::BASE_BALL_SPEED * settings.ball_speed;
        let balls: Vec<Ball> = (0..settings.num_balls.max(1))
            .map(|_| Ball::serve(dimensions.ball_size, serve_speed, rng))
            .collect();
        let paddles: Vec<Paddle> = polygon.active_sides.iter().map(|&s| Paddle::new(s)).collect();
        let scores = vec![0; paddles.len()];

        let mut state = Self {
            game_id,
            settings,
            geometry_seed,
            phase: GamePhase::Playing,
            balls,
            paddles,
            scores,
            dimensions,
            combo: ComboState::default(),
            movement: Vec::new(),
            tick: 0,
            elapsed: 0.0,
            last_broadcast: 0.0,
            winner: None,
        };
        state.movement = (0..state.balls.len())
            .map(|i| state.measure_ball(polygon, i))
            .collect();
        state
    }

    /// Fresh movement records for one ball against every side
    pub fn measure_ball(&self, polygon: &Polygon, ball_index: usize) -> Vec<MovementRecord> {
        let ball = &self.balls[ball_index];
        (0..polygon.side_count())
            .map(|side| MovementRecord::measure(polygon, side, ball))
            .collect()
    }

    /// Serve a ball from the centre again and re-initialise its history
    pub fn reset_ball<R: Rng + ?Sized>(&mut self, polygon: &Polygon, ball_index: usize, rng: &mut R) {
        let speed = physics::BASE_BALL_SPEED * self.settings.ball_speed;
        self.balls[ball_index] = Ball::serve(self.dimensions.ball_size, speed, rng);
        self.movement[ball_index] = self.measure_ball(polygon, ball_index);
    }

    pub fn paddle_index_for_side(&self, side: usize) -> Option<usize> {
        self.paddles.iter().position(|p| p.side_index == side)
    }

    /// Move a paddle by paddle index. Returns false for an unknown index.
    pub fn move_paddle(&mut self, paddle_index: usize, position: f64) -> bool {
        let half = self.dimensions.half_width();
        match self.paddles.get_mut(paddle_index) {
            Some(paddle) => {
                paddle.set_position(position, half);
                true
            }
            None => false,
        }
    }

    pub fn deactivate_paddle(&mut self, paddle_index: usize) -> bool {
        match self.paddles.get_mut(paddle_index) {
            Some(paddle) => {
                paddle.active = false;
                true
            }
            None => false,
        }
    }

    pub fn active_paddle_count(&self) -> usize {
        self.paddles.iter().filter(|p| p.active).count()
    }

    /// Largest ball distance from the centre
    pub fn highest_distance(&self) -> f64 {
        self.balls
            .iter()
            .map(Ball::distance_from_center)
            .fold(0.0, f64::max)
    }

    #[inline]
    pub fn is_over(&self) -> bool {
        self.phase == GamePhase::GameOver
    }

    /// Serialize for the state store
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::error::EncodeError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
    }

    /// Deserialize a state store blob
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::error::DecodeError> {
        let (state, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(state)
    }
}
