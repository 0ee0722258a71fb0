use hashbrown::HashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{ConfigError, GameSettings};
use crate::game::engine::GameEngine;
use crate::game::geometry::GeometryError;
use crate::game::state::GameId;

pub type PlayerId = Uuid;

/// Room state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Waiting for players
    Waiting,
    /// Loop running
    Playing,
    /// Shutdown requested, waiting for the loop to clean up
    Closing,
}

/// A game and the players seated at its paddles
pub struct GameRoom {
    pub id: GameId,
    pub settings: GameSettings,
    pub state: RoomState,
    /// Player → paddle index
    players: HashMap<PlayerId, usize>,
    capacity: usize,
    /// Present until the game starts; the loop owns it afterwards
    engine: Option<GameEngine>,
    shutdown: Option<watch::Sender<bool>>,
    reaper: Option<JoinHandle<()>>,
}

impl GameRoom {
    /// Validate settings and build the board
    pub fn new(settings: GameSettings, geometry_seed: u64, dt: f64) -> Result<Self, RoomError> {
        settings.validate()?;
        let engine = GameEngine::for_settings(&settings, geometry_seed, dt)?;
        let capacity = settings.max_players.min(engine.polygon().active_sides.len());

        Ok(Self {
            id: Uuid::new_v4(),
            settings,
            state: RoomState::Waiting,
            players: HashMap::new(),
            capacity,
            engine: Some(engine),
            shutdown: None,
            reaper: None,
        })
    }

    pub fn id(&self) -> GameId {
        self.id
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn ready_to_start(&self) -> bool {
        self.state == RoomState::Waiting && self.players.len() >= self.settings.min_players
    }

    pub fn paddle_of(&self, player_id: PlayerId) -> Option<usize> {
        self.players.get(&player_id).copied()
    }

    /// Board before the game starts
    pub fn engine(&self) -> Option<&GameEngine> {
        self.engine.as_ref()
    }

    /// Seat a player at the lowest free paddle
    pub fn add_player(&mut self, player_id: PlayerId) -> Result<usize, RoomError> {
        if self.state != RoomState::Waiting {
            return Err(RoomError::GameInProgress);
        }
        if self.players.contains_key(&player_id) {
            return Err(RoomError::AlreadyJoined);
        }
        if self.is_full() {
            return Err(RoomError::RoomFull);
        }

        let paddle = (0..self.capacity)
            .find(|i| !self.players.values().any(|p| p == i))
            .ok_or(RoomError::RoomFull)?;
        self.players.insert(player_id, paddle);
        Ok(paddle)
    }

    pub fn remove_player(&mut self, player_id: PlayerId) -> Option<usize> {
        self.players.remove(&player_id)
    }

    /// Paddles with a player seated, ascending
    pub fn seated_paddles(&self) -> Vec<usize> {
        let mut paddles: Vec<usize> = self.players.values().copied().collect();
        paddles.sort_unstable();
        paddles
    }

    pub fn player_ids(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    /// Hand the engine to the game loop
    pub fn begin(&mut self) -> Result<GameEngine, RoomError> {
        if self.state != RoomState::Waiting {
            return Err(RoomError::GameInProgress);
        }
        if self.players.len() < self.settings.min_players {
            return Err(RoomError::NotEnoughPlayers);
        }
        let engine = self.engine.take().ok_or(RoomError::GameInProgress)?;
        self.state = RoomState::Playing;
        Ok(engine)
    }

    pub(crate) fn attach_loop(&mut self, shutdown: watch::Sender<bool>, reaper: JoinHandle<()>) {
        self.shutdown = Some(shutdown);
        self.reaper = Some(reaper);
    }

    /// Signal the loop to stop; returns the task that finishes its cleanup
    pub(crate) fn close(&mut self) -> Option<JoinHandle<()>> {
        self.state = RoomState::Closing;
        if let Some(shutdown) = &self.shutdown {
            let _ = shutdown.send(true);
        }
        self.reaper.take()
    }
}

/// Room errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RoomError {
    #[error("Room is full")]
    RoomFull,
    #[error("Game already in progress")]
    GameInProgress,
    #[error("Not enough players")]
    NotEnoughPlayers,
    #[error("Player already joined")]
    AlreadyJoined,
    #[error(transparent)]
    InvalidSettings(#[from] ConfigError),
    #[error("Invalid board: {0}")]
    Geometry(#[from] GeometryError),
}
