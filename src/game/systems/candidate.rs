//! Collision candidate selection
//!
//! Picks, per ball and tick, the single side that needs resolution: the
//! earliest tunneled side if any, otherwise the nearest approaching side.

use crate::game::geometry::Polygon;
use crate::game::state::{Ball, GameDimensions};
use crate::game::systems::movement::{MovementKind, SideMovement};

/// Side proposed for resolution this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionCandidate {
    pub side: usize,
    pub kind: MovementKind,
    /// Relative position of the closest point along the side
    pub relative_position: f64,
    /// Gap left before the ball touches the side surface
    pub remaining_distance: f64,
    /// Fraction of the tick's displacement at the crossing (tunneling only)
    pub crossing: f64,
}

impl CollisionCandidate {
    pub fn needs_resolution(&self) -> bool {
        self.kind == MovementKind::Tunneling || self.remaining_distance <= 0.0
    }
}

/// Gap between the ball surface and the side surface
pub fn remaining_distance(polygon: &Polygon, dims: &GameDimensions, side: usize, ball: &Ball, signed_distance: f64) -> f64 {
    let surface = if polygon.is_player_side(side) {
        dims.paddle_thickness
    } else {
        0.0
    };
    signed_distance - ball.size - surface
}

/// Projection lies on the segment, extended by the ball radius at both ends
fn within_reach(polygon: &Polygon, side: usize, t: f64, radius: f64) -> bool {
    let length = polygon.side_length(side);
    let slack = if length > 0.0 { radius / length } else { 0.0 };
    t >= -slack && t <= 1.0 + slack
}

/// Choose the side a ball must be resolved against, if any
pub fn select(
    polygon: &Polygon,
    dims: &GameDimensions,
    ball: &Ball,
    observations: &[SideMovement],
) -> Option<CollisionCandidate> {
    let mut tunneled: Option<CollisionCandidate> = None;
    let mut nearest: Option<CollisionCandidate> = None;

    for obs in observations {
        match obs.kind {
            MovementKind::Tunneling => {
                let crossing = obs.crossing_fraction();
                let point = ball.position - ball.velocity * (1.0 - crossing);
                let t = polygon.projection(obs.side, point);
                if !within_reach(polygon, obs.side, t, ball.size) {
                    continue;
                }
                if tunneled.map_or(true, |c| crossing < c.crossing) {
                    let relative_position = t.clamp(0.0, 1.0);
                    tunneled = Some(CollisionCandidate {
                        side: obs.side,
                        kind: obs.kind,
                        relative_position,
                        remaining_distance: remaining_distance(
                            polygon,
                            dims,
                            obs.side,
                            ball,
                            obs.current.signed_distance,
                        ),
                        crossing,
                    });
                }
            }
            MovementKind::Approaching => {
                // Behind the line only happens on concave boards, never a hit
                if obs.current.signed_distance <= 0.0 {
                    continue;
                }
                let t = polygon.projection(obs.side, ball.position);
                if !within_reach(polygon, obs.side, t, ball.size) {
                    continue;
                }
                let remaining =
                    remaining_distance(polygon, dims, obs.side, ball, obs.current.signed_distance);
                if nearest.map_or(true, |c| remaining < c.remaining_distance) {
                    let relative_position = t.clamp(0.0, 1.0);
                    nearest = Some(CollisionCandidate {
                        side: obs.side,
                        kind: obs.kind,
                        relative_position,
                        remaining_distance: remaining,
                        crossing: 1.0,
                    });
                }
            }
            MovementKind::Parallel | MovementKind::MovingAway => {}
        }
    }

    tunneled.or(nearest)
}
