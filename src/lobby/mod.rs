//! Game registry
//!
//! Tracks waiting and running games, seats players at paddles and owns each
//! game's loop from start to cleanup.

pub mod manager;
pub mod room;
