pub mod game_session;
pub mod memory;
pub mod ports;
pub mod protocol;
