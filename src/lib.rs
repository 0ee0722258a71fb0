//! Polygon Pong Server Library
//!
//! Authoritative ball physics for Pong played on regular and irregular
//! polygons, with one paddle per player side and walls everywhere else.
//!
//! - `game` - board geometry, movement tracking, collision resolution, bounce and combo
//! - `net` - update scheduler, storage/lock/publish ports and the wire protocol
//! - `lobby` - registry of games keyed by id

pub mod config;
pub mod game;
pub mod lobby;
pub mod metrics;
pub mod net;
pub mod util;
