pub mod constants;
pub mod engine;
pub mod geometry;
pub mod match_result;
pub mod state;
pub mod systems;
