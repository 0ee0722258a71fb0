//! Bounce physics
//!
//! Reflection off a surface normal, offset-dependent deflection for paddle
//! hits and the speed model (paddle multiplier, edge boost, combo and a
//! logarithmic velocity boost).

use std::f64::consts::PI;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::game::constants::{bounce, combo, physics};
use crate::util::vec2::Vec2;

/// Tunable bounce response
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BounceTuning {
    pub speed_multiplier: f64,
    pub angle_factor: f64,
    pub max_jitter: f64,
    pub jitter_speed_scale: f64,
    pub edge_boost: f64,
    pub velocity_boost: f64,
    pub combo_step: f64,
    pub curve_cap: f64,
    pub curve_speed_factor: f64,
    pub max_bounce_angle: f64,
    pub min_speed: f64,
    pub max_speed: f64,
}

impl Default for BounceTuning {
    fn default() -> Self {
        Self {
            speed_multiplier: bounce::DEFAULT_SPEED_MULTIPLIER,
            angle_factor: bounce::ANGLE_FACTOR,
            max_jitter: bounce::MAX_JITTER,
            jitter_speed_scale: bounce::JITTER_SPEED_SCALE,
            edge_boost: bounce::EDGE_BOOST,
            velocity_boost: bounce::VELOCITY_BOOST,
            combo_step: combo::STEP,
            curve_cap: bounce::CURVE_CAP,
            curve_speed_factor: bounce::CURVE_SPEED_FACTOR,
            max_bounce_angle: bounce::MAX_BOUNCE_ANGLE,
            min_speed: physics::MIN_SPEED,
            max_speed: physics::MAX_SPEED,
        }
    }
}

/// Ball response to paddles and walls
#[derive(Debug, Clone, Default)]
pub struct BallPhysics {
    tuning: BounceTuning,
}

impl BallPhysics {
    /// Paddle speed multiplier for a game's ball speed setting
    pub fn paddle_multiplier(&self, ball_speed: f64) -> f64 {
        self.tuning.speed_multiplier * ball_speed
    }

    /// Deflection in radians for a paddle offset
    pub fn angle_modulation<R: Rng + ?Sized>(&self, offset: f64, speed: f64, rng: &mut R) -> f64 {
        let offset = offset.clamp(-1.0, 1.0);
        let t = &self.tuning;
        let base = offset * PI * t.angle_factor * (1.0 + offset.abs().sqrt());
        let jitter = rng.gen_range(-1.0..=1.0) * speed * t.jitter_speed_scale * (1.0 - offset.abs());
        base + jitter.clamp(-t.max_jitter, t.max_jitter)
    }

    /// Outgoing speed before the curve nudge
    pub fn scaled_speed(&self, speed: f64, offset: f64, speed_multiplier: f64, hit_combo: u32) -> f64 {
        let t = &self.tuning;
        let edge = 1.0 + t.edge_boost * offset.abs().min(1.0);
        let combo = 1.0 + t.combo_step * hit_combo as f64;
        let boost = 1.0 + t.velocity_boost * (speed + 1.0).ln();
        let scaled = speed * speed_multiplier * edge * combo * boost;
        if scaled.is_finite() {
            scaled.clamp(t.min_speed, t.max_speed)
        } else {
            t.max_speed
        }
    }

    /// Bounce off a paddle
    ///
    /// `offset` is the normalized hit position in [-1, 1] and `hit_combo` the
    /// combo count before this hit.
    pub fn paddle_bounce<R: Rng + ?Sized>(
        &self,
        velocity: Vec2,
        normal: Vec2,
        offset: f64,
        speed_multiplier: f64,
        hit_combo: u32,
        rng: &mut R,
    ) -> Vec2 {
        let speed = velocity.length();
        let offset = offset.clamp(-1.0, 1.0);
        let angle = self.angle_modulation(offset, speed, rng);
        let direction = self.outgoing_direction(velocity, normal).rotate(angle);
        let direction = clamp_to_normal(direction, normal, self.tuning.max_bounce_angle);
        let new_speed = self.scaled_speed(speed, offset, speed_multiplier, hit_combo);

        let curve = offset * self.tuning.curve_cap.min(speed * self.tuning.curve_speed_factor);
        let bounced = direction * new_speed + normal.perpendicular() * curve;
        self.enforce_speed_limits(bounced, normal)
    }

    /// Bounce off a wall: plain reflection with the speed model at offset 0
    pub fn wall_bounce(&self, velocity: Vec2, normal: Vec2) -> Vec2 {
        let speed = velocity.length();
        let direction = clamp_to_normal(
            self.outgoing_direction(velocity, normal),
            normal,
            self.tuning.max_bounce_angle,
        );
        let new_speed = self.scaled_speed(speed, 0.0, 1.0, 0);
        self.enforce_speed_limits(direction * new_speed, normal)
    }

    fn outgoing_direction(&self, velocity: Vec2, normal: Vec2) -> Vec2 {
        let reflected = velocity.reflect(normal);
        if reflected.is_zero(f64::EPSILON) {
            normal
        } else {
            reflected.normalize()
        }
    }

    fn enforce_speed_limits(&self, velocity: Vec2, normal: Vec2) -> Vec2 {
        let speed = velocity.length();
        if !speed.is_finite() || speed == 0.0 {
            return normal * self.tuning.min_speed;
        }
        if speed < self.tuning.min_speed {
            return velocity.with_length(self.tuning.min_speed);
        }
        if speed > self.tuning.max_speed {
            return velocity.with_length(self.tuning.max_speed);
        }
        velocity
    }
}

/// Keep a direction within `max_angle` of the normal so it leaves the surface
fn clamp_to_normal(direction: Vec2, normal: Vec2, max_angle: f64) -> Vec2 {
    let angle = normal.angle_to(direction);
    if angle.abs() <= max_angle {
        direction
    } else {
        normal.rotate(max_angle.copysign(angle))
    }
}
