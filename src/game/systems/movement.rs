//! Movement tracking
//!
//! Compares each ball's relation to every side against the previous tick to
//! tell approaching, receding and parallel motion apart, and to catch balls
//! that crossed a side line between two discrete ticks.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::game::constants::collision::PARALLEL_EPSILON;
use crate::game::geometry::Polygon;
use crate::game::state::{Ball, MovementRecord};

/// How a ball moves relative to one side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementKind {
    Parallel,
    Approaching,
    MovingAway,
    /// Side line crossed since the last tick without being resolved
    Tunneling,
}

/// One side's observation for the current tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SideMovement {
    pub side: usize,
    pub kind: MovementKind,
    pub current: MovementRecord,
    /// Record from the previous tick
    pub previous: MovementRecord,
}

impl SideMovement {
    /// Fraction of this tick's displacement at which the side line was crossed
    pub fn crossing_fraction(&self) -> f64 {
        let before = self.previous.signed_distance;
        let after = self.current.signed_distance;
        let span = before - after;
        if span <= 0.0 {
            return 1.0;
        }
        (before / span).clamp(0.0, 1.0)
    }
}

/// Classify the transition between two records of the same side
pub fn classify(previous: &MovementRecord, current: &MovementRecord) -> MovementKind {
    let was_approaching = previous.dot_product <= -PARALLEL_EPSILON;
    let crossed = previous.signed_distance > 0.0 && current.signed_distance <= 0.0;
    if was_approaching && crossed {
        return MovementKind::Tunneling;
    }

    let dot = current.dot_product;
    if dot.abs() < PARALLEL_EPSILON {
        MovementKind::Parallel
    } else if dot < 0.0 {
        MovementKind::Approaching
    } else {
        MovementKind::MovingAway
    }
}

/// Observe a ball against every side and update its stored history
///
/// Records of tunneling sides are left untouched so the resolver still sees
/// the pre-crossing state.
pub fn track(polygon: &Polygon, ball: &Ball, records: &mut [MovementRecord]) -> SmallVec<[SideMovement; 8]> {
    let mut observations = SmallVec::new();

    for (side, stored) in records.iter_mut().enumerate().take(polygon.side_count()) {
        let current = MovementRecord::measure(polygon, side, ball);
        let previous = *stored;
        let kind = classify(&previous, &current);
        if kind != MovementKind::Tunneling {
            *stored = current;
        }
        observations.push(SideMovement {
            side,
            kind,
            current,
            previous,
        });
    }

    observations
}
