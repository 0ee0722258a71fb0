/// Simulation cadence
pub mod physics {
    /// Default scheduler tick rate in Hz
    pub const TICK_RATE: u32 = 60;
    /// Delta time per tick in seconds
    pub const DT: f64 = 1.0 / TICK_RATE as f64;
    /// Tick duration in milliseconds
    pub const TICK_DURATION_MS: u64 = 1000 / TICK_RATE as u64;
    /// Minimum ball speed (board units per tick)
    pub const MIN_SPEED: f64 = 0.004;
    /// Maximum ball speed (board units per tick); long combos saturate here
    pub const MAX_SPEED: f64 = 0.08;
    /// Ball speed after a reset (board units per tick)
    pub const BASE_BALL_SPEED: f64 = 0.006;
}

/// Bounce response tuning
pub mod bounce {
    /// Default paddle speed multiplier per hit
    pub const DEFAULT_SPEED_MULTIPLIER: f64 = 1.08;
    /// Angle modulation factor: offset * PI * ANGLE_FACTOR * (1 + sqrt(|offset|))
    pub const ANGLE_FACTOR: f64 = 0.4;
    /// Cap for random jitter in radians
    pub const MAX_JITTER: f64 = 0.2;
    /// Jitter scale relative to the current speed
    pub const JITTER_SPEED_SCALE: f64 = 5.0;
    /// Edge boost: 1 + EDGE_BOOST * |offset|
    pub const EDGE_BOOST: f64 = 0.2;
    /// Velocity boost: 1 + VELOCITY_BOOST * ln(speed + 1)
    pub const VELOCITY_BOOST: f64 = 0.1;
    /// Upper bound for the tangential curve nudge
    pub const CURVE_CAP: f64 = 0.001;
    /// Curve nudge relative to the current speed
    pub const CURVE_SPEED_FACTOR: f64 = 0.0001;
    /// Outgoing direction never leans further than this from the surface normal
    pub const MAX_BOUNCE_ANGLE: f64 = 1.3;
}

/// Combo tracking
pub mod combo {
    /// Combo multiplier step per consecutive hit
    pub const STEP: f64 = 0.08;
    /// Seconds without a paddle hit before the combo resets
    pub const TIMEOUT: f64 = 1.5;
}

/// Collision detection and resolution
pub mod collision {
    /// Dot products below this magnitude count as parallel motion
    pub const PARALLEL_EPSILON: f64 = 1e-10;
    /// Gap left between the ball and the surface after repositioning
    pub const POSITION_BUFFER: f64 = 0.001;
    /// Additional gap applied on edge hits
    pub const EDGE_HIT_BUFFER: f64 = 0.002;
    /// |offset| within this distance of 1 is an edge hit
    pub const EDGE_HIT_MARGIN: f64 = 0.1;
    /// Distance from a side beyond which the ball is in that side's deadzone
    pub const DEADZONE_DISTANCE: f64 = 0.35;
    /// Backward walk length relative to the polygon diameter
    pub const TUNNEL_BACKTRACK_FACTOR: f64 = 1.5;
}

/// Broadcast throttling
pub mod broadcast {
    /// Interval when a ball is at or past the outer boundary (seconds)
    pub const MIN_INTERVAL: f64 = 0.016;
    /// Interval when every ball is inside the safe zone (seconds)
    pub const MAX_INTERVAL: f64 = 0.1;
    /// Distance from center that bounds the inner safe zone
    pub const INNER_SAFE_RADIUS: f64 = 0.4;
    /// Distance from center treated as the outer boundary
    pub const OUTER_BOUNDARY_RADIUS: f64 = 0.85;
}

/// Board construction
pub mod geometry {
    /// Inward-normal orientation tolerance
    pub const NORMAL_EPSILON: f64 = 1e-10;
    /// Sides shorter than this are degenerate
    pub const DEGENERATE_SIDE_LENGTH: f64 = 1e-10;
    /// Classic board aspect ratio (width / height)
    pub const CLASSIC_ASPECT: f64 = 16.0 / 9.0;
    /// Crazy-mode jitter bound as a fraction of half the vertex spacing
    pub const CRAZY_JITTER_FRACTION: f64 = 0.3;
    pub const IRREGULAR_AMPLITUDE: f64 = 0.25;
    pub const CRAZY_AMPLITUDE: f64 = 0.35;
    /// Star inner radius: STAR_INNER_BASE - STAR_INNER_DEFORMATION * deformation
    pub const STAR_INNER_BASE: f64 = 0.8;
    pub const STAR_INNER_DEFORMATION: f64 = 0.3;
}

/// Per-game defaults for configuration inputs
pub mod defaults {
    pub const NUM_SIDES: usize = 4;
    pub const NUM_PADDLES: usize = 2;
    pub const NUM_BALLS: usize = 1;
    pub const WINNING_SCORE: u32 = 11;
    /// Full paddle width as a fraction of its side
    pub const PADDLE_WIDTH: f64 = 0.3;
    /// Inward depth of the paddle surface from the side line
    pub const PADDLE_THICKNESS: f64 = 0.02;
    pub const BALL_SIZE: f64 = 0.02;
    /// Attempts for commands that must wait out a running tick
    pub const COMMAND_LOCK_ATTEMPTS: u32 = 20;
    pub const COMMAND_RETRY_DELAY_MS: u64 = 2;
}

/// Linear falloff helper used by the broadcast scheduler
pub fn inverse_lerp(a: f64, b: f64, value: f64) -> f64 {
    if (b - a).abs() < f64::EPSILON {
        return 0.0;
    }
    ((value - a) / (b - a)).clamp(0.0, 1.0)
}
