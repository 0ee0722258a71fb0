use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::GameSettings;
use crate::game::geometry::GameMode;
use crate::game::state::GameId;
use crate::lobby::room::{GameRoom, PlayerId, RoomError, RoomState};
use crate::net::game_session::{TickError, UpdateScheduler};
use crate::net::ports::{GameLock, Publisher, StateStore};
use crate::net::protocol::ClientMessage;

#[derive(Default)]
struct Rooms {
    games: HashMap<GameId, GameRoom>,
    players: HashMap<PlayerId, GameId>,
}

impl Rooms {
    fn remove_game(&mut self, game_id: GameId) -> Option<GameRoom> {
        let room = self.games.remove(&game_id)?;
        for player_id in room.player_ids() {
            self.players.remove(&player_id);
        }
        Some(room)
    }
}

/// Registry of running games keyed by game id
///
/// Owns the lifecycle: a game is created waiting, starts once enough players
/// joined, and is removed when its loop stops.
pub struct GameRegistry<S, L, P> {
    scheduler: UpdateScheduler<S, L, P>,
    rooms: Arc<RwLock<Rooms>>,
    max_games: usize,
}

/// Seat assigned on join
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seat {
    pub game_id: GameId,
    pub paddle: usize,
    pub side: usize,
    pub started: bool,
}

/// Game information for listing
#[derive(Debug, Clone)]
pub struct GameInfo {
    pub id: GameId,
    pub mode: GameMode,
    pub num_sides: usize,
    pub player_count: usize,
    pub max_players: usize,
    pub state: RoomState,
}

impl<S, L, P> GameRegistry<S, L, P>
where
    S: StateStore,
    L: GameLock,
    P: Publisher,
{
    pub fn new(scheduler: UpdateScheduler<S, L, P>, max_games: usize) -> Self {
        Self {
            scheduler,
            rooms: Arc::new(RwLock::new(Rooms::default())),
            max_games,
        }
    }

    pub fn scheduler(&self) -> &UpdateScheduler<S, L, P> {
        &self.scheduler
    }

    /// Create a waiting game; invalid settings never produce a game
    pub fn create_game(&self, settings: GameSettings) -> Result<GameId, ManagerError> {
        let mut rooms = self.rooms.write();
        if rooms.games.len() >= self.max_games {
            return Err(ManagerError::TooManyGames);
        }

        let room = GameRoom::new(settings, rand::random(), self.scheduler.dt())?;
        let id = room.id();
        info!(
            "Game {} created: {} mode, {} sides, {} paddles",
            id,
            room.settings.game_mode.as_str(),
            room.settings.effective_sides(),
            room.settings.num_paddles
        );
        rooms.games.insert(id, room);
        Ok(id)
    }

    /// Waiting game with the same settings and a free seat, or a new one
    pub fn find_or_create_game(&self, settings: GameSettings) -> Result<GameId, ManagerError> {
        {
            let rooms = self.rooms.read();
            let open = rooms
                .games
                .values()
                .find(|r| r.state == RoomState::Waiting && !r.is_full() && r.settings == settings);
            if let Some(room) = open {
                return Ok(room.id());
            }
        }
        self.create_game(settings)
    }

    /// Seat a player; the game starts once `min_players` are seated
    pub async fn join_game(&self, game_id: GameId, player_id: PlayerId) -> Result<Seat, ManagerError> {
        let (paddle, side, ready) = {
            let mut rooms = self.rooms.write();
            if rooms.players.contains_key(&player_id) {
                return Err(ManagerError::AlreadyInGame);
            }
            let room = rooms.games.get_mut(&game_id).ok_or(ManagerError::GameNotFound)?;
            let paddle = room.add_player(player_id)?;
            let side = room
                .engine()
                .and_then(|e| e.polygon().active_sides.get(paddle).copied())
                .unwrap_or(paddle);
            let ready = room.ready_to_start();
            rooms.players.insert(player_id, game_id);
            (paddle, side, ready)
        };

        info!("Player {} joined game {} on side {}", player_id, game_id, side);

        if ready {
            self.start_game(game_id).await?;
        }

        Ok(Seat {
            game_id,
            paddle,
            side,
            started: ready,
        })
    }

    /// Persist the initial state and spawn the loop
    pub async fn start_game(&self, game_id: GameId) -> Result<(), ManagerError> {
        let (mut engine, settings, seated) = {
            let mut rooms = self.rooms.write();
            let room = rooms.games.get_mut(&game_id).ok_or(ManagerError::GameNotFound)?;
            (room.begin()?, room.settings.clone(), room.seated_paddles())
        };

        // Nobody can claim a paddle once the game runs, so empty seats are goals
        let mut state = engine.new_state(game_id, settings);
        for paddle in 0..state.paddles.len() {
            if !seated.contains(&paddle) {
                state.deactivate_paddle(paddle);
            }
        }
        if let Err(e) = self.scheduler.initialize(&engine, &state).await {
            warn!("Failed to start game {}: {}", game_id, e);
            self.rooms.write().remove_game(game_id);
            return Err(e.into());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = self.scheduler.spawn_game_loop(game_id, engine, shutdown_rx);
        self.scheduler.metrics().game_started();

        let rooms = self.rooms.clone();
        let reaper = tokio::spawn(async move {
            match handle.await {
                Ok(exit) => info!("Game {} finished: {:?}", game_id, exit),
                Err(e) => warn!("Game loop {} aborted: {}", game_id, e),
            }
            rooms.write().remove_game(game_id);
        });

        // The room is gone already if the loop finished first
        if let Some(room) = self.rooms.write().games.get_mut(&game_id) {
            room.attach_loop(shutdown_tx, reaper);
        }

        info!("Game {} started", game_id);
        Ok(())
    }

    /// Remove a player; a started game keeps running with the paddle inactive
    pub async fn leave_game(&self, player_id: PlayerId) -> Result<(), ManagerError> {
        let (game_id, paddle, playing) = {
            let mut rooms = self.rooms.write();
            let game_id = rooms.players.remove(&player_id).ok_or(ManagerError::NotInGame)?;
            let Some(room) = rooms.games.get_mut(&game_id) else {
                return Ok(());
            };
            let paddle = room.remove_player(player_id);
            let playing = room.state == RoomState::Playing;
            if room.is_empty() && room.state == RoomState::Waiting {
                rooms.remove_game(game_id);
                info!("Game {} removed before start", game_id);
            }
            (game_id, paddle, playing)
        };

        info!("Player {} left game {}", player_id, game_id);

        if let (Some(paddle), true) = (paddle, playing) {
            // The next tick ends the game once no paddle is active
            self.scheduler.deactivate_paddle(game_id, paddle).await?;
        }
        Ok(())
    }

    pub async fn handle_client_message(&self, player_id: PlayerId, message: ClientMessage) -> Result<(), ManagerError> {
        match message {
            ClientMessage::MovePaddle { position } => {
                let (game_id, paddle) = self.seat_of(player_id)?;
                self.scheduler.move_paddle(game_id, paddle, position).await?;
                Ok(())
            }
            ClientMessage::Leave => self.leave_game(player_id).await,
        }
    }

    fn seat_of(&self, player_id: PlayerId) -> Result<(GameId, usize), ManagerError> {
        let rooms = self.rooms.read();
        let game_id = *rooms.players.get(&player_id).ok_or(ManagerError::NotInGame)?;
        let room = rooms.games.get(&game_id).ok_or(ManagerError::GameNotFound)?;
        if room.state != RoomState::Playing {
            return Err(ManagerError::NotStarted);
        }
        let paddle = room.paddle_of(player_id).ok_or(ManagerError::NotInGame)?;
        Ok((game_id, paddle))
    }

    /// Stop one game; waits for its loop to release resources
    pub async fn end_game(&self, game_id: GameId) -> Result<(), ManagerError> {
        let reaper = {
            let mut rooms = self.rooms.write();
            let room = rooms.games.get_mut(&game_id).ok_or(ManagerError::GameNotFound)?;
            if room.state == RoomState::Waiting {
                rooms.remove_game(game_id);
                return Ok(());
            }
            room.close()
        };
        if let Some(reaper) = reaper {
            let _ = reaper.await;
        }
        Ok(())
    }

    /// Stop every loop and wait for cleanup
    pub async fn shutdown_all(&self) {
        let reapers: Vec<_> = {
            let mut rooms = self.rooms.write();
            let waiting: Vec<GameId> = rooms
                .games
                .values()
                .filter(|r| r.state == RoomState::Waiting)
                .map(|r| r.id())
                .collect();
            for id in waiting {
                rooms.remove_game(id);
            }
            rooms.games.values_mut().filter_map(|r| r.close()).collect()
        };

        info!("Stopping {} game loops", reapers.len());
        for reaper in reapers {
            let _ = reaper.await;
        }
        let mut rooms = self.rooms.write();
        rooms.games.clear();
        rooms.players.clear();
    }

    pub fn game_count(&self) -> usize {
        self.rooms.read().games.len()
    }

    pub fn total_player_count(&self) -> usize {
        self.rooms.read().players.len()
    }

    pub fn player_game(&self, player_id: PlayerId) -> Option<GameId> {
        self.rooms.read().players.get(&player_id).copied()
    }

    pub fn game_state(&self, game_id: GameId) -> Option<RoomState> {
        self.rooms.read().games.get(&game_id).map(|r| r.state)
    }

    pub fn list_games(&self) -> Vec<GameInfo> {
        self.rooms
            .read()
            .games
            .values()
            .map(|room| GameInfo {
                id: room.id(),
                mode: room.settings.game_mode,
                num_sides: room.settings.effective_sides(),
                player_count: room.player_count(),
                max_players: room.capacity(),
                state: room.state,
            })
            .collect()
    }
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Too many games")]
    TooManyGames,
    #[error("Game not found")]
    GameNotFound,
    #[error("Already in a game")]
    AlreadyInGame,
    #[error("Not in a game")]
    NotInGame,
    #[error("Game has not started")]
    NotStarted,
    #[error("Room error: {0}")]
    Room(#[from] RoomError),
    #[error("Game state error: {0}")]
    Tick(#[from] TickError),
}
