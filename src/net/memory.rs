//! In-process port implementations
//!
//! Used by the binary when running standalone and by the scheduler tests.

use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use crate::game::state::GameId;
use crate::net::ports::{GameLock, Publisher, StateStore, StoreError};
use crate::net::protocol::ServerMessage;

/// Lease after which a held lock is considered abandoned
const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(5);

/// Messages buffered per subscriber before slow receivers start lagging
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Default)]
pub struct MemoryStore {
    states: RwLock<HashMap<GameId, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }

    pub fn contains(&self, game_id: GameId) -> bool {
        self.states.read().contains_key(&game_id)
    }

    /// Raw blob access without going through the async port
    pub fn snapshot(&self, game_id: GameId) -> Option<Vec<u8>> {
        self.states.read().get(&game_id).cloned()
    }
}

impl StateStore for MemoryStore {
    async fn get(&self, game_id: GameId) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.states.read().get(&game_id).cloned())
    }

    async fn set(&self, game_id: GameId, blob: Vec<u8>) -> Result<(), StoreError> {
        self.states.write().insert(game_id, blob);
        Ok(())
    }

    async fn delete(&self, game_id: GameId) -> Result<(), StoreError> {
        self.states.write().remove(&game_id);
        Ok(())
    }
}

/// Try-acquire lock table with lease expiry
#[derive(Debug)]
pub struct MemoryLock {
    held: Mutex<HashMap<GameId, Instant>>,
    ttl: Duration,
}

impl Default for MemoryLock {
    fn default() -> Self {
        Self::with_ttl(DEFAULT_LOCK_TTL)
    }
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn is_held(&self, game_id: GameId) -> bool {
        self.held
            .lock()
            .get(&game_id)
            .is_some_and(|since| since.elapsed() < self.ttl)
    }

    fn try_acquire(&self, game_id: GameId) -> bool {
        let mut held = self.held.lock();
        let now = Instant::now();
        match held.get(&game_id) {
            Some(since) if now.duration_since(*since) < self.ttl => false,
            Some(_) => {
                debug!("Lock lease on game {} expired, taking over", game_id);
                held.insert(game_id, now);
                true
            }
            None => {
                held.insert(game_id, now);
                true
            }
        }
    }
}

impl GameLock for MemoryLock {
    async fn acquire(&self, game_id: GameId) -> Result<bool, StoreError> {
        Ok(self.try_acquire(game_id))
    }

    async fn release(&self, game_id: GameId) -> Result<(), StoreError> {
        self.held.lock().remove(&game_id);
        Ok(())
    }
}

/// Broadcast channel per game
#[derive(Debug, Default)]
pub struct ChannelPublisher {
    channels: RwLock<HashMap<GameId, broadcast::Sender<ServerMessage>>>,
}

impl ChannelPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to every message published for a game from now on
    pub fn subscribe(&self, game_id: GameId) -> broadcast::Receiver<ServerMessage> {
        if let Some(sender) = self.channels.read().get(&game_id) {
            return sender.subscribe();
        }
        self.channels
            .write()
            .entry(game_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Games with an open channel
    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    pub fn subscriber_count(&self, game_id: GameId) -> usize {
        self.channels
            .read()
            .get(&game_id)
            .map_or(0, |sender| sender.receiver_count())
    }
}

impl Publisher for ChannelPublisher {
    async fn broadcast(&self, game_id: GameId, message: ServerMessage) -> Result<(), StoreError> {
        let sender = self.channels.read().get(&game_id).cloned();
        if let Some(sender) = sender {
            // No receivers is not a failure, the game just has no audience yet
            if sender.send(message).is_err() {
                debug!("No subscribers for game {}", game_id);
            }
        }
        Ok(())
    }

    async fn close(&self, game_id: GameId) -> Result<(), StoreError> {
        if self.channels.write().remove(&game_id).is_some() {
            debug!("Closed channel of game {}", game_id);
        }
        Ok(())
    }
}
