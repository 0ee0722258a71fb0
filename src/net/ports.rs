//! Collaborator contracts of the update scheduler
//!
//! The scheduler never talks to storage or clients directly. A deployment plugs in
//! a shared store, a distributed lock and a pub/sub fan-out; `net::memory` provides
//! in-process versions of all three.

use std::future::Future;

use thiserror::Error;

use crate::game::state::GameId;
use crate::net::protocol::ServerMessage;

/// Backend failure of a port
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Serialized game state storage. Blobs are opaque to the store.
pub trait StateStore: Send + Sync + 'static {
    fn get(&self, game_id: GameId) -> impl Future<Output = Result<Option<Vec<u8>>, StoreError>> + Send;

    fn set(&self, game_id: GameId, blob: Vec<u8>) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn delete(&self, game_id: GameId) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Per-game mutual exclusion
///
/// `acquire` never waits: `Ok(false)` means another tick holds the game.
pub trait GameLock: Send + Sync + 'static {
    fn acquire(&self, game_id: GameId) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn release(&self, game_id: GameId) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Fan-out of server messages to every subscriber of a game
pub trait Publisher: Send + Sync + 'static {
    fn broadcast(
        &self,
        game_id: GameId,
        message: ServerMessage,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Drop the game's channel; subscribers see it end after pending messages
    fn close(&self, game_id: GameId) -> impl Future<Output = Result<(), StoreError>> + Send;
}
