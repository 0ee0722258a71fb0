use serde::{Deserialize, Serialize};

use crate::game::geometry::{GameMode, Polygon};
use crate::game::match_result::{MatchEndReason, MatchResult};
use crate::game::state::{GameState, Paddle};
use crate::util::vec2::Vec2;

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Move own paddle to a relative position along its side
    MovePaddle { position: f64 },
    /// Leave the game; the paddle is deactivated
    Leave,
}

/// Messages from server to all clients of a game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    /// Board geometry, sent once when the game starts
    Board(BoardSnapshot),
    /// Throttled state update
    StateUpdate(StateSnapshot),
    /// Collision outcome, sent immediately
    Collision(CollisionEvent),
    /// Tick failed
    Error { kind: ErrorKind, message: String },
    /// Terminal state reached, with the final rankings
    GameOver { reason: MatchEndReason, result: MatchResult },
}

/// Error categories reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    StateNotFound,
    StateCorruption,
    Internal,
}

/// Collision outcomes of one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollisionEvent {
    PaddleHit {
        ball: usize,
        side: usize,
        paddle: usize,
        /// Normalized hit position in [-1, 1]
        offset: f64,
        edge_hit: bool,
        speed: f64,
        combo: u32,
    },
    WallHit {
        ball: usize,
        side: usize,
        speed: f64,
    },
    Miss {
        ball: usize,
        side: usize,
        /// Paddle index of the side that failed to return the ball
        paddle: Option<usize>,
        scores: Vec<u32>,
    },
    /// Ball crossed a side between two ticks and was pulled back
    Tunneling {
        ball: usize,
        side: usize,
    },
    /// Ball re-served from the centre without scoring
    BallReset { ball: usize },
}

impl CollisionEvent {
    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            CollisionEvent::PaddleHit { .. } => "paddle",
            CollisionEvent::WallHit { .. } => "wall",
            CollisionEvent::Miss { .. } => "miss",
            CollisionEvent::Tunneling { .. } => "tunneling",
            CollisionEvent::BallReset { .. } => "reset",
        }
    }
}

/// Board geometry for rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub mode: GameMode,
    pub vertices: Vec<Vec2>,
    pub normals: Vec<Vec2>,
    pub active_sides: Vec<usize>,
}

impl BoardSnapshot {
    pub fn from_polygon(polygon: &Polygon) -> Self {
        Self {
            mode: polygon.mode,
            vertices: polygon.vertices.clone(),
            normals: polygon.side_normals.iter().map(|n| n.normal).collect(),
            active_sides: polygon.active_sides.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BallSnapshot {
    pub position: Vec2,
    pub velocity: Vec2,
    pub size: f64,
}

/// Client view of one game
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub tick: u64,
    pub elapsed: f64,
    pub balls: Vec<BallSnapshot>,
    pub paddles: Vec<Paddle>,
    pub scores: Vec<u32>,
    pub paddle_width: f64,
    pub hit_combo: u32,
    pub highest_speed: f64,
}

impl StateSnapshot {
    pub fn from_game_state(state: &GameState) -> Self {
        Self {
            tick: state.tick,
            elapsed: state.elapsed,
            balls: state
                .balls
                .iter()
                .map(|b| BallSnapshot {
                    position: b.position,
                    velocity: b.velocity,
                    size: b.size,
                })
                .collect(),
            paddles: state.paddles.clone(),
            scores: state.scores.clone(),
            paddle_width: state.dimensions.paddle_width,
            hit_combo: state.combo.hit_combo,
            highest_speed: state.combo.highest_recorded_speed,
        }
    }
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

/// Encode a message as JSON for text clients
pub fn encode_json<T: Serialize>(message: &T) -> Result<String, EncodeError> {
    serde_json::to_string(message).map_err(|e| EncodeError(e.to_string()))
}

#[derive(Debug, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameSettings;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    #[test]
    fn test_client_message_move() {
        let msg = ClientMessage::MovePaddle { position: 0.25 };
        let encoded = encode(&msg).unwrap();
        let decoded: ClientMessage = decode(&encoded).unwrap();
        match decoded {
            ClientMessage::MovePaddle { position } => assert_eq!(position, 0.25),
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_server_message_collision() {
        let msg = ServerMessage::Collision(CollisionEvent::Miss {
            ball: 0,
            side: 3,
            paddle: Some(1),
            scores: vec![1, 0],
        });
        let encoded = encode(&msg).unwrap();
        let decoded: ServerMessage = decode(&encoded).unwrap();
        match decoded {
            ServerMessage::Collision(CollisionEvent::Miss { side, scores, .. }) => {
                assert_eq!(side, 3);
                assert_eq!(scores, vec![1, 0]);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_snapshot_from_state() {
        let mut rng = StdRng::seed_from_u64(1);
        let polygon = Polygon::build(5, 3, GameMode::Star, &mut rng).unwrap();
        let settings = GameSettings {
            num_sides: 5,
            num_paddles: 3,
            max_players: 3,
            ..Default::default()
        };
        let state = GameState::new(Uuid::new_v4(), settings, &polygon, 1, &mut rng);
        let snapshot = StateSnapshot::from_game_state(&state);
        assert_eq!(snapshot.paddles.len(), 3);
        assert_eq!(snapshot.scores, vec![0, 0, 0]);

        let board = BoardSnapshot::from_polygon(&polygon);
        assert_eq!(board.vertices.len(), 5);
        assert_eq!(board.normals.len(), 5);
    }

    #[test]
    fn test_json_encoding() {
        let msg = ServerMessage::Error {
            kind: ErrorKind::StateCorruption,
            message: "bad blob".into(),
        };
        let json = encode_json(&msg).unwrap();
        assert!(json.contains("StateCorruption"));
        assert!(json.contains("bad blob"));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<ServerMessage, _> = decode(&[0xff, 0xff, 0xff, 0xff, 0x01]);
        assert!(result.is_err());
    }
}
