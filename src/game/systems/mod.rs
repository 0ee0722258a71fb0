pub mod bounce;
pub mod candidate;
pub mod collision;
pub mod movement;
