//! Collision resolution
//!
//! Each candidate ends in exactly one outcome per tick: paddle hit, wall hit,
//! miss, or (for tunneling with no recoverable crossing) a plain reset.
//! Paddle and wall hits reposition the ball just inside the surface before
//! the bounce is computed.

use rand::Rng;
use smallvec::SmallVec;
use tracing::{info, warn};

use crate::game::constants::collision::{
    EDGE_HIT_BUFFER, EDGE_HIT_MARGIN, POSITION_BUFFER, TUNNEL_BACKTRACK_FACTOR,
};
use crate::game::geometry::Polygon;
use crate::game::state::GameState;
use crate::game::systems::bounce::BallPhysics;
use crate::game::systems::candidate::CollisionCandidate;
use crate::game::systems::movement::MovementKind;
use crate::net::protocol::CollisionEvent;
use crate::util::vec2::Vec2;

/// Events produced during one tick
pub type TickEvents = SmallVec<[CollisionEvent; 4]>;

/// Terminal outcome of a resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    PaddleHit,
    WallHit,
    Miss,
    Reset,
}

/// Where the ball met a paddle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaddleContact {
    pub paddle: usize,
    pub relative_position: f64,
    /// Normalized offset from the paddle centre in [-1, 1]
    pub offset: f64,
    pub edge_hit: bool,
}

/// Reconstructed side crossing of a tunneled ball
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossing {
    pub side: usize,
    pub point: Vec2,
    pub relative_position: f64,
}

/// Resolve a candidate for one ball
pub fn resolve<R: Rng + ?Sized>(
    polygon: &Polygon,
    physics: &BallPhysics,
    state: &mut GameState,
    ball_index: usize,
    candidate: &CollisionCandidate,
    rng: &mut R,
    events: &mut TickEvents,
) -> Resolution {
    if candidate.kind != MovementKind::Tunneling {
        return resolve_side(polygon, physics, state, ball_index, candidate.side, false, rng, events);
    }

    events.push(CollisionEvent::Tunneling {
        ball: ball_index,
        side: candidate.side,
    });

    let ball = state.balls[ball_index];
    match find_crossing(polygon, ball.position, ball.velocity) {
        Some(crossing) => {
            state.balls[ball_index].position = crossing.point;
            resolve_side(polygon, physics, state, ball_index, crossing.side, true, rng, events)
        }
        None => {
            warn!(
                "Game {}: no crossing found for tunneled ball {} at {:?}, resetting",
                state.game_id, ball_index, ball.position
            );
            state.reset_ball(polygon, ball_index, rng);
            events.push(CollisionEvent::BallReset { ball: ball_index });
            Resolution::Reset
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve_side<R: Rng + ?Sized>(
    polygon: &Polygon,
    physics: &BallPhysics,
    state: &mut GameState,
    ball_index: usize,
    side: usize,
    tunneling: bool,
    rng: &mut R,
    events: &mut TickEvents,
) -> Resolution {
    if !polygon.is_player_side(side) {
        resolve_wall(polygon, physics, state, ball_index, side, events);
        return Resolution::WallHit;
    }

    let position = state.balls[ball_index].position;
    match paddle_contact(polygon, state, side, position, tunneling) {
        Some(contact) => {
            resolve_paddle(polygon, physics, state, ball_index, side, &contact, rng, events);
            Resolution::PaddleHit
        }
        None => {
            resolve_miss(polygon, state, ball_index, side, rng, events);
            Resolution::Miss
        }
    }
}

/// Paddle under the ball, if the side's paddle is active and in range
///
/// Tunneled balls get an extra ball radius of tolerance.
pub fn paddle_contact(
    polygon: &Polygon,
    state: &GameState,
    side: usize,
    position: Vec2,
    tunneling: bool,
) -> Option<PaddleContact> {
    let paddle_index = state.paddle_index_for_side(side)?;
    let paddle = &state.paddles[paddle_index];
    if !paddle.active {
        return None;
    }

    let half = state.dimensions.half_width();
    let relative_position = polygon.relative_position(side, position);
    let delta = relative_position - paddle.position;

    let mut reach = half;
    if tunneling {
        let length = polygon.side_length(side);
        if length > 0.0 {
            reach += state.dimensions.ball_size / length;
        }
    }
    if delta.abs() > reach {
        return None;
    }

    let offset = if half > 0.0 { (delta / half).clamp(-1.0, 1.0) } else { 0.0 };
    Some(PaddleContact {
        paddle: paddle_index,
        relative_position,
        offset,
        edge_hit: offset.abs() >= 1.0 - EDGE_HIT_MARGIN,
    })
}

/// Reposition in front of the paddle and bounce with offset steering
#[allow(clippy::too_many_arguments)]
pub fn resolve_paddle<R: Rng + ?Sized>(
    polygon: &Polygon,
    physics: &BallPhysics,
    state: &mut GameState,
    ball_index: usize,
    side: usize,
    contact: &PaddleContact,
    rng: &mut R,
    events: &mut TickEvents,
) {
    let normal = polygon.normal(side);
    let dims = state.dimensions;
    let mut gap = dims.paddle_thickness + dims.ball_size + POSITION_BUFFER;
    if contact.edge_hit {
        gap += EDGE_HIT_BUFFER;
    }
    let surface = polygon.point_on_side(side, contact.relative_position);

    let combo = state.combo.hit_combo;
    let multiplier = physics.paddle_multiplier(state.settings.ball_speed);
    let ball = &mut state.balls[ball_index];
    ball.position = settle_inside(polygon, surface + normal * gap);
    ball.velocity = physics.paddle_bounce(ball.velocity, normal, contact.offset, multiplier, combo, rng);
    let speed = ball.speed();

    state.combo.register_hit(state.elapsed);
    state.combo.record_speed(speed);

    events.push(CollisionEvent::PaddleHit {
        ball: ball_index,
        side,
        paddle: contact.paddle,
        offset: contact.offset,
        edge_hit: contact.edge_hit,
        speed,
        combo: state.combo.hit_combo,
    });
}

/// Reposition in front of the wall and reflect
pub fn resolve_wall(
    polygon: &Polygon,
    physics: &BallPhysics,
    state: &mut GameState,
    ball_index: usize,
    side: usize,
    events: &mut TickEvents,
) {
    let normal = polygon.normal(side);
    let gap = state.dimensions.ball_size + POSITION_BUFFER;
    let ball = &mut state.balls[ball_index];
    let t = polygon.relative_position(side, ball.position);
    ball.position = settle_inside(polygon, polygon.point_on_side(side, t) + normal * gap);
    ball.velocity = physics.wall_bounce(ball.velocity, normal);
    let speed = ball.speed();

    state.combo.record_speed(speed);
    events.push(CollisionEvent::WallHit {
        ball: ball_index,
        side,
        speed,
    });
}

/// Every other paddle scores, the combo resets and the ball is served again
pub fn resolve_miss<R: Rng + ?Sized>(
    polygon: &Polygon,
    state: &mut GameState,
    ball_index: usize,
    side: usize,
    rng: &mut R,
    events: &mut TickEvents,
) {
    let missed = state.paddle_index_for_side(side);
    for (i, score) in state.scores.iter_mut().enumerate() {
        if Some(i) != missed {
            *score += 1;
        }
    }
    state.combo.reset();
    state.reset_ball(polygon, ball_index, rng);

    info!(
        "Game {}: ball {} missed on side {}, scores {:?}",
        state.game_id, ball_index, side, state.scores
    );
    events.push(CollisionEvent::Miss {
        ball: ball_index,
        side,
        paddle: missed,
        scores: state.scores.clone(),
    });
}

/// Pull a repositioned ball toward the centroid until it is on the board
///
/// Only needed next to corners sharper than 90 degrees, where the offset
/// along one side's normal can cross the neighbouring side.
fn settle_inside(polygon: &Polygon, position: Vec2) -> Vec2 {
    if polygon.contains(position) {
        return position;
    }
    let center = polygon.centroid();
    let mut settled = position;
    for _ in 0..SETTLE_STEPS {
        settled = settled.lerp(center, 0.1);
        if polygon.contains(settled) {
            break;
        }
    }
    settled
}

const SETTLE_STEPS: usize = 16;

/// Walk back along the velocity to find where the ball left the board
///
/// The walk starts far enough behind the previous position to clear the whole board, and
/// every side whose line separates that point from the current position is a
/// crossing. The one closest to the previous tick's position wins.
pub fn find_crossing(polygon: &Polygon, position: Vec2, velocity: Vec2) -> Option<Crossing> {
    let direction = velocity.normalize();
    if direction.is_zero(f64::EPSILON) {
        return None;
    }
    let step = polygon.diameter() * TUNNEL_BACKTRACK_FACTOR + velocity.length();
    let back = position - direction * step;
    let previous = position - velocity;

    let mut best: Option<(f64, Crossing)> = None;
    for side in 0..polygon.side_count() {
        let before = polygon.signed_distance(side, back);
        let after = polygon.signed_distance(side, position);
        if !(before > 0.0 && after <= 0.0) {
            continue;
        }
        let fraction = before / (before - after);
        let point = back.lerp(position, fraction);
        let t = polygon.projection(side, point);
        if !(0.0..=1.0).contains(&t) {
            continue;
        }
        let distance = point.distance_to(previous);
        if best.map_or(true, |(d, _)| distance < d) {
            best = Some((
                distance,
                Crossing {
                    side,
                    point: polygon.point_on_side(side, t),
                    relative_position: t,
                },
            ));
        }
    }

    best.map(|(_, crossing)| crossing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameSettings;
    use crate::game::constants::physics;
    use crate::game::geometry::GameMode;
    use crate::game::state::Ball;
    use crate::game::systems::candidate;
    use crate::game::systems::movement::track;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use uuid::Uuid;

    struct Fixture {
        polygon: Polygon,
        state: GameState,
        physics: BallPhysics,
        rng: StdRng,
    }

    fn fixture() -> Fixture {
        let mut rng = StdRng::seed_from_u64(42);
        let polygon = Polygon::build(4, 2, GameMode::Regular, &mut rng).unwrap();
        let state = GameState::new(Uuid::new_v4(), GameSettings::default(), &polygon, 42, &mut rng);
        Fixture {
            polygon,
            state,
            physics: BallPhysics::default(),
            rng,
        }
    }

    /// Place the ball, advance one tick and resolve whatever is selected
    fn run(f: &mut Fixture, position: Vec2, velocity: Vec2) -> (Option<Resolution>, TickEvents) {
        f.state.balls[0] = Ball::new(position, velocity, f.state.dimensions.ball_size);
        f.state.movement[0] = f.state.measure_ball(&f.polygon, 0);
        f.state.balls[0].position += velocity;
        let ball = f.state.balls[0];
        let observations = track(&f.polygon, &ball, &mut f.state.movement[0]);
        let mut events = TickEvents::new();
        let outcome = candidate::select(&f.polygon, &f.state.dimensions, &ball, &observations)
            .filter(|c| c.needs_resolution())
            .map(|c| resolve(&f.polygon, &f.physics, &mut f.state, 0, &c, &mut f.rng, &mut events));
        (outcome, events)
    }

    #[test]
    fn test_centre_paddle_hit() {
        let mut f = fixture();
        let (outcome, events) = run(&mut f, Vec2::new(0.0, 0.92), Vec2::new(0.0, 0.05));
        assert_eq!(outcome, Some(Resolution::PaddleHit));
        let ball = f.state.balls[0];
        assert!(ball.velocity.y < 0.0);
        assert!(ball.speed() > 0.05);
        // Sits on the paddle surface plus the buffer
        assert!((ball.position.y - (1.0 - 0.02 - 0.02 - 0.001)).abs() < 1e-9);
        match &events[0] {
            CollisionEvent::PaddleHit { offset, edge_hit, combo, paddle, .. } => {
                assert!(offset.abs() < 1e-9);
                assert!(!edge_hit);
                assert_eq!(*combo, 1);
                assert_eq!(*paddle, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(f.state.combo.hit_combo, 1);
    }

    #[test]
    fn test_edge_hit_gets_extra_buffer() {
        let mut f = fixture();
        // Paddle 1 covers x in [-0.3, 0.3] on the top side
        let (outcome, events) = run(&mut f, Vec2::new(-0.29, 0.92), Vec2::new(0.0, 0.05));
        assert_eq!(outcome, Some(Resolution::PaddleHit));
        match &events[0] {
            CollisionEvent::PaddleHit { offset, edge_hit, .. } => {
                assert!(*edge_hit);
                assert!(*offset > 0.9);
            }
            other => panic!("unexpected event {:?}", other),
        }
        let y = f.state.balls[0].position.y;
        assert!((y - (1.0 - 0.02 - 0.02 - 0.001 - 0.002)).abs() < 1e-9);
    }

    #[test]
    fn test_wall_hit() {
        let mut f = fixture();
        // Side 2 (right) is a wall
        let (outcome, events) = run(&mut f, Vec2::new(0.95, 0.0), Vec2::new(0.04, 0.01));
        assert_eq!(outcome, Some(Resolution::WallHit));
        let ball = f.state.balls[0];
        assert!(ball.velocity.x < 0.0);
        assert!((ball.position.x - (1.0 - 0.02 - 0.001)).abs() < 1e-9);
        assert!(matches!(events[0], CollisionEvent::WallHit { side: 2, .. }));
        assert_eq!(f.state.combo.hit_combo, 0);
    }

    #[test]
    fn test_miss_scores_every_other_paddle() {
        let mut f = fixture();
        f.state.combo.register_hit(0.0);
        // Far outside the top paddle
        let (outcome, events) = run(&mut f, Vec2::new(0.8, 0.92), Vec2::new(0.0, 0.05));
        assert_eq!(outcome, Some(Resolution::Miss));
        assert_eq!(f.state.scores, vec![1, 0]);
        assert_eq!(f.state.combo.hit_combo, 0);
        let ball = f.state.balls[0];
        assert_eq!(ball.position, Vec2::ZERO);
        assert!((ball.speed() - physics::BASE_BALL_SPEED).abs() < 1e-12);
        assert!(matches!(events[0], CollisionEvent::Miss { side: 3, paddle: Some(1), .. }));
    }

    #[test]
    fn test_inactive_paddle_is_a_miss() {
        let mut f = fixture();
        f.state.deactivate_paddle(0);
        let (outcome, _) = run(&mut f, Vec2::new(0.0, -0.92), Vec2::new(0.0, -0.05));
        assert_eq!(outcome, Some(Resolution::Miss));
        assert_eq!(f.state.scores, vec![0, 1]);
    }

    #[test]
    fn test_tunneling_recovered_onto_paddle() {
        let mut f = fixture();
        // Crosses the whole top region and beyond within a single tick
        let (outcome, events) = run(&mut f, Vec2::new(0.05, 0.9), Vec2::new(0.0, 2.5));
        assert_eq!(outcome, Some(Resolution::PaddleHit));
        assert!(matches!(events[0], CollisionEvent::Tunneling { side: 3, .. }));
        assert!(matches!(events[1], CollisionEvent::PaddleHit { side: 3, .. }));
        let ball = f.state.balls[0];
        assert!(f.polygon.contains(ball.position));
        assert!(ball.velocity.y < 0.0);
    }

    #[test]
    fn test_find_crossing_on_segment() {
        let f = fixture();
        let crossing = find_crossing(&f.polygon, Vec2::new(0.2, 1.4), Vec2::new(0.0, 0.6)).unwrap();
        assert_eq!(crossing.side, 3);
        assert!((0.0..=1.0).contains(&crossing.relative_position));
        assert!((crossing.point.y - 1.0).abs() < 1e-9);
        assert!((crossing.point.x - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_find_crossing_without_velocity() {
        let f = fixture();
        assert!(find_crossing(&f.polygon, Vec2::new(0.0, 1.2), Vec2::ZERO).is_none());
    }

    #[test]
    fn test_unrecoverable_tunneling_resets_ball() {
        let mut f = fixture();
        f.state.balls[0] = Ball::new(Vec2::new(0.0, 1.3), Vec2::ZERO, 0.02);
        let c = CollisionCandidate {
            side: 3,
            kind: MovementKind::Tunneling,
            relative_position: 0.5,
            remaining_distance: -0.3,
            crossing: 0.5,
        };
        let mut events = TickEvents::new();
        let outcome = resolve(&f.polygon, &f.physics, &mut f.state, 0, &c, &mut f.rng, &mut events);
        assert_eq!(outcome, Resolution::Reset);
        assert_eq!(f.state.balls[0].position, Vec2::ZERO);
        assert_eq!(f.state.scores, vec![0, 0]);
        assert!(matches!(events[1], CollisionEvent::BallReset { ball: 0 }));
    }
}
