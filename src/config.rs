use serde::{Deserialize, Serialize};

use crate::game::constants::{defaults, physics};
use crate::game::geometry::GameMode;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Simulation ticks per second for every game loop
    pub tick_rate: u32,
    /// Maximum number of concurrent games
    pub max_games: usize,
    /// Port for the metrics endpoint (0 disables it)
    pub metrics_port: u16,
    /// Number of self-playing demo games started by the binary
    pub demo_games: usize,
    /// Board shape used for demo games
    pub demo_mode: GameMode,
    /// Side count used for demo games
    pub demo_sides: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_rate: physics::TICK_RATE,
            max_games: 100,
            metrics_port: 9090,
            demo_games: 1,
            demo_mode: GameMode::Regular,
            demo_sides: defaults::NUM_SIDES,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(rate) = std::env::var("TICK_RATE") {
            if let Ok(parsed) = rate.parse::<u32>() {
                if (1..=240).contains(&parsed) {
                    config.tick_rate = parsed;
                } else {
                    tracing::warn!("TICK_RATE must be 1-240, using default");
                }
            } else {
                tracing::warn!("Invalid TICK_RATE '{}', using default", rate);
            }
        }

        if let Ok(max_games) = std::env::var("MAX_GAMES") {
            if let Ok(parsed) = max_games.parse::<usize>() {
                if parsed > 0 && parsed <= 10000 {
                    config.max_games = parsed;
                } else {
                    tracing::warn!("MAX_GAMES must be 1-10000, using default");
                }
            } else {
                tracing::warn!("Invalid MAX_GAMES '{}', using default", max_games);
            }
        }

        if let Ok(port) = std::env::var("METRICS_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                config.metrics_port = parsed;
            } else {
                tracing::warn!("Invalid METRICS_PORT '{}', using default", port);
            }
        }

        if let Ok(demo) = std::env::var("DEMO_GAMES") {
            if let Ok(parsed) = demo.parse::<usize>() {
                config.demo_games = parsed;
            } else {
                tracing::warn!("Invalid DEMO_GAMES '{}', using default", demo);
            }
        }

        if let Ok(mode) = std::env::var("DEMO_MODE") {
            match mode.parse::<GameMode>() {
                Ok(parsed) => config.demo_mode = parsed,
                Err(e) => tracing::warn!("{}, using default", e),
            }
        }

        if let Ok(sides) = std::env::var("DEMO_SIDES") {
            if let Ok(parsed) = sides.parse::<usize>() {
                if parsed >= 3 {
                    config.demo_sides = parsed;
                } else {
                    tracing::warn!("DEMO_SIDES must be at least 3, using default");
                }
            } else {
                tracing::warn!("Invalid DEMO_SIDES '{}', using default", sides);
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        if self.max_games == 0 {
            return Err("max_games must be at least 1".to_string());
        }
        if self.demo_games > self.max_games {
            return Err("demo_games cannot exceed max_games".to_string());
        }
        Ok(())
    }

    /// Seconds of game time advanced per tick
    pub fn tick_dt(&self) -> f64 {
        1.0 / self.tick_rate.max(1) as f64
    }
}

/// Setup-time configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::InvalidConfiguration(msg.into())
}

/// Per-game configuration inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSettings {
    pub num_sides: usize,
    pub num_paddles: usize,
    pub game_mode: GameMode,
    pub min_players: usize,
    pub max_players: usize,
    pub winning_score: u32,
    /// Game clock limit in seconds
    pub time_limit: Option<f64>,
    /// Ball size multiplier
    pub ball_size: f64,
    /// Ball speed multiplier
    pub ball_speed: f64,
    /// Paddle width multiplier
    pub paddle_size: f64,
    /// Carried for clients; power-ups have no effect on the engine
    pub power_ups_enabled: bool,
    pub num_balls: usize,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            num_sides: defaults::NUM_SIDES,
            num_paddles: defaults::NUM_PADDLES,
            game_mode: GameMode::Regular,
            min_players: defaults::NUM_PADDLES,
            max_players: defaults::NUM_PADDLES,
            winning_score: defaults::WINNING_SCORE,
            time_limit: None,
            ball_size: 1.0,
            ball_speed: 1.0,
            paddle_size: 1.0,
            power_ups_enabled: false,
            num_balls: defaults::NUM_BALLS,
        }
    }
}

impl GameSettings {
    /// Side count actually built (classic boards are always rectangles)
    pub fn effective_sides(&self) -> usize {
        match self.game_mode {
            GameMode::Classic => 4,
            _ => self.num_sides,
        }
    }

    /// Reject every combination that cannot produce a playable game
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sides = self.effective_sides();
        if sides < 3 {
            return Err(invalid(format!("num_sides must be at least 3, got {}", sides)));
        }
        if self.num_paddles == 0 {
            return Err(invalid("num_paddles must be at least 1"));
        }
        if self.num_paddles > sides {
            return Err(invalid(format!(
                "num_paddles ({}) cannot exceed num_sides ({})",
                self.num_paddles, sides
            )));
        }
        if self.min_players == 0 || self.min_players > self.max_players {
            return Err(invalid("min_players must be between 1 and max_players"));
        }
        if self.max_players > self.num_paddles {
            return Err(invalid("max_players cannot exceed num_paddles"));
        }
        if self.winning_score == 0 {
            return Err(invalid("winning_score must be at least 1"));
        }
        if let Some(limit) = self.time_limit {
            if !(limit.is_finite() && limit > 0.0) {
                return Err(invalid("time_limit must be positive"));
            }
        }
        for (name, value) in [
            ("ball_size", self.ball_size),
            ("ball_speed", self.ball_speed),
            ("paddle_size", self.paddle_size),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(format!("{} must be positive", name)));
            }
        }
        if defaults::PADDLE_WIDTH * self.paddle_size >= 1.0 {
            return Err(invalid("paddle_size makes paddles wider than their side"));
        }
        if self.num_balls == 0 {
            return Err(invalid("num_balls must be at least 1"));
        }
        Ok(())
    }
}
