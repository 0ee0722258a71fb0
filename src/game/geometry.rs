//! Board geometry builder
//!
//! Builds the N-sided board for every game mode: vertex placement, per-side
//! ratio curves, inward normals, unit-square normalisation and the mapping of
//! paddles onto sides.

use std::f64::consts::{PI, TAU};
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::game::constants::geometry::*;
use crate::util::vec2::Vec2;

/// Board shape family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GameMode {
    /// Vertices evenly spaced on the unit circle
    #[default]
    Regular,
    /// Fixed 16:9 rectangle regardless of the requested side count
    Classic,
    /// Gently stretched polygon, deformation grows as player density drops
    Irregular,
    /// Lobed polygon with jittered corners where players meet walls
    Crazy,
    /// Alternating outer and inner vertices
    Star,
}

impl GameMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GameMode::Regular => "regular",
            GameMode::Classic => "classic",
            GameMode::Irregular => "irregular",
            GameMode::Crazy => "crazy",
            GameMode::Star => "star",
        }
    }

}

impl FromStr for GameMode {
    type Err = GeometryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "regular" => Ok(GameMode::Regular),
            "classic" => Ok(GameMode::Classic),
            "irregular" => Ok(GameMode::Irregular),
            "crazy" => Ok(GameMode::Crazy),
            "star" => Ok(GameMode::Star),
            other => Err(GeometryError::UnknownMode(other.to_string())),
        }
    }
}

/// Inward unit normal of one side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SideNormal {
    pub normal: Vec2,
    pub is_player: bool,
}

/// Board construction errors (fatal at game creation)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeometryError {
    #[error("A board needs at least 3 sides, got {0}")]
    TooFewSides(usize),
    #[error("{paddles} paddles do not fit on {sides} sides")]
    TooManyPaddles { paddles: usize, sides: usize },
    #[error("Unknown game mode: {0}")]
    UnknownMode(String),
}

/// The game board
///
/// Side `i` runs from `vertices[i]` to `vertices[i + 1]` (wrapping). Normals
/// point toward the centroid and the largest absolute coordinate is 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub mode: GameMode,
    pub num_sides: usize,
    pub vertices: Vec<Vec2>,
    pub side_normals: Vec<SideNormal>,
    /// Sorted side indices hosting a paddle
    pub active_sides: Vec<usize>,
    /// Factor applied to the raw vertices during normalisation
    pub scale: f64,
}

impl Polygon {
    /// Build a board for the given configuration
    ///
    /// `rng` only matters for crazy mode, which jitters corners at the
    /// boundaries between player and wall runs.
    pub fn build<R: Rng + ?Sized>(
        num_sides: usize,
        num_paddles: usize,
        mode: GameMode,
        rng: &mut R,
    ) -> Result<Self, GeometryError> {
        let sides = if mode == GameMode::Classic { 4 } else { num_sides };
        if sides < 3 {
            return Err(GeometryError::TooFewSides(sides));
        }

        let active_sides = assign_active_sides(sides, num_paddles)?;
        let is_player: Vec<bool> = (0..sides).map(|i| active_sides.contains(&i)).collect();

        let raw = match mode {
            GameMode::Classic => classic_vertices(),
            _ => radial_vertices(sides, num_paddles, mode, &is_player, rng),
        };

        let (vertices, scale) = normalize_vertices(raw);
        let side_normals = compute_side_normals(&vertices, &is_player);

        Ok(Self {
            mode,
            num_sides: sides,
            vertices,
            side_normals,
            active_sides,
            scale,
        })
    }

    #[inline]
    pub fn side_count(&self) -> usize {
        self.num_sides
    }

    /// Start and end vertex of a side
    #[inline]
    pub fn side(&self, side: usize) -> (Vec2, Vec2) {
        let n = self.vertices.len();
        (self.vertices[side % n], self.vertices[(side + 1) % n])
    }

    #[inline]
    pub fn normal(&self, side: usize) -> Vec2 {
        self.side_normals[side].normal
    }

    #[inline]
    pub fn is_player_side(&self, side: usize) -> bool {
        self.side_normals[side].is_player
    }

    /// Index into `active_sides` (and paddles/scores) for a side
    pub fn paddle_index(&self, side: usize) -> Option<usize> {
        self.active_sides.iter().position(|&s| s == side)
    }

    pub fn side_length(&self, side: usize) -> f64 {
        let (a, b) = self.side(side);
        a.distance_to(b)
    }

    pub fn centroid(&self) -> Vec2 {
        centroid(&self.vertices)
    }

    /// Largest distance between any two vertices
    pub fn diameter(&self) -> f64 {
        let mut max = 0.0_f64;
        for (i, a) in self.vertices.iter().enumerate() {
            for b in &self.vertices[i + 1..] {
                max = max.max(a.distance_to(*b));
            }
        }
        max
    }

    /// Signed distance from the side's line, positive on the inner side
    #[inline]
    pub fn signed_distance(&self, side: usize, point: Vec2) -> f64 {
        let (a, _) = self.side(side);
        (point - a).dot(self.normal(side))
    }

    /// Unclamped projection of a point onto a side (0 at its start vertex, 1 at its end)
    pub fn projection(&self, side: usize, point: Vec2) -> f64 {
        let (a, b) = self.side(side);
        let edge = b - a;
        let len_sq = edge.length_sq();
        if len_sq < DEGENERATE_SIDE_LENGTH * DEGENERATE_SIDE_LENGTH {
            return 0.5;
        }
        (point - a).dot(edge) / len_sq
    }

    /// Projection clamped to the side segment
    pub fn relative_position(&self, side: usize, point: Vec2) -> f64 {
        self.projection(side, point).clamp(0.0, 1.0)
    }

    /// Point on a side at a relative position
    pub fn point_on_side(&self, side: usize, t: f64) -> Vec2 {
        let (a, b) = self.side(side);
        a.lerp(b, t)
    }

    /// Even-odd point containment, valid for concave boards too
    pub fn contains(&self, point: Vec2) -> bool {
        let n = self.vertices.len();
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let (vi, vj) = (self.vertices[i], self.vertices[j]);
            if (vi.y > point.y) != (vj.y > point.y)
                && point.x < (vj.x - vi.x) * (point.y - vi.y) / (vj.y - vi.y) + vi.x
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Map paddles onto sides
///
/// Two players sit on opposite sides, sparse player counts are spaced evenly,
/// dense counts take alternating sides first and fill the gaps clockwise.
pub fn assign_active_sides(num_sides: usize, num_paddles: usize) -> Result<Vec<usize>, GeometryError> {
    if num_sides < 3 {
        return Err(GeometryError::TooFewSides(num_sides));
    }
    if num_paddles > num_sides {
        return Err(GeometryError::TooManyPaddles {
            paddles: num_paddles,
            sides: num_sides,
        });
    }

    let n = num_sides;
    let mut sides: Vec<usize> = match num_paddles {
        0 => Vec::new(),
        2 => vec![1 % n, (1 + n / 2) % n],
        p if p <= n / 2 => (0..p).map(|k| (1 + k * n / p) % n).collect(),
        p => {
            let mut taken = vec![false; n];
            let mut placed = 0;
            for i in (0..n).step_by(2) {
                if placed == p {
                    break;
                }
                taken[i] = true;
                placed += 1;
            }
            // Clockwise is descending index: vertices advance counter-clockwise
            for i in (0..n).rev() {
                if placed == p {
                    break;
                }
                if !taken[i] {
                    taken[i] = true;
                    placed += 1;
                }
            }
            (0..n).filter(|&i| taken[i]).collect()
        }
    };

    sides.sort_unstable();
    sides.dedup();
    Ok(sides)
}

/// Per-vertex radial scale for each board shape
///
/// `angles` are the unjittered vertex angles; vertex `i` opens side `i`.
pub fn side_ratios(mode: GameMode, angles: &[f64], num_paddles: usize) -> Vec<f64> {
    let n = angles.len();
    let density = if n == 0 { 1.0 } else { num_paddles as f64 / n as f64 };
    let deformation = (1.0 - density).clamp(0.0, 1.0);

    match mode {
        GameMode::Regular | GameMode::Classic => smooth_ratios(&vec![1.0; n]),
        GameMode::Irregular => angles
            .iter()
            .map(|theta| 1.0 + IRREGULAR_AMPLITUDE * deformation * (2.0 * theta).cos())
            .collect(),
        GameMode::Crazy => angles
            .iter()
            .map(|theta| 1.0 + CRAZY_AMPLITUDE * deformation * (3.0 * theta).cos())
            .collect(),
        GameMode::Star => {
            let inner = STAR_INNER_BASE - STAR_INNER_DEFORMATION * deformation;
            (0..n).map(|i| if i % 2 == 0 { 1.0 } else { inner }).collect()
        }
    }
}

/// Circular `(prev + 2·self + next) / 4` pass
pub fn smooth_ratios(ratios: &[f64]) -> Vec<f64> {
    let n = ratios.len();
    (0..n)
        .map(|i| {
            let prev = ratios[(i + n - 1) % n];
            let next = ratios[(i + 1) % n];
            (prev + 2.0 * ratios[i] + next) / 4.0
        })
        .collect()
}

/// Inward unit normal for every side
///
/// Zero-length sides fall back to `(1, 0)`.
pub fn compute_side_normals(vertices: &[Vec2], is_player: &[bool]) -> Vec<SideNormal> {
    let n = vertices.len();
    let center = centroid(vertices);

    (0..n)
        .map(|i| {
            let a = vertices[i];
            let b = vertices[(i + 1) % n];
            let (dir, len) = (b - a).normalize_with_length();
            let is_player = is_player.get(i).copied().unwrap_or(false);

            if len < DEGENERATE_SIDE_LENGTH {
                warn!("Degenerate side {} (length {:e}), using default normal", i, len);
                return SideNormal {
                    normal: Vec2::UNIT_X,
                    is_player,
                };
            }

            let mut normal = dir.perpendicular();
            let mid = (a + b) * 0.5;
            if normal.dot(center - mid) < NORMAL_EPSILON {
                normal = -normal;
            }
            SideNormal { normal, is_player }
        })
        .collect()
}

/// Rescale so the largest absolute coordinate is exactly 1
pub fn normalize_vertices(vertices: Vec<Vec2>) -> (Vec<Vec2>, f64) {
    let max = vertices.iter().map(Vec2::max_abs).fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return (vertices, 1.0);
    }
    let scale = 1.0 / max;
    (vertices.into_iter().map(|v| v * scale).collect(), scale)
}

fn centroid(vertices: &[Vec2]) -> Vec2 {
    if vertices.is_empty() {
        return Vec2::ZERO;
    }
    let sum = vertices.iter().fold(Vec2::ZERO, |acc, v| acc + *v);
    sum * (1.0 / vertices.len() as f64)
}

/// Rotation that centres the last side on +y
fn base_rotation(num_sides: usize) -> f64 {
    PI / 2.0 + PI / num_sides as f64
}

fn classic_vertices() -> Vec<Vec2> {
    let half_w = 1.0;
    let half_h = half_w / CLASSIC_ASPECT;
    // top, left, bottom, right
    vec![
        Vec2::new(half_w, half_h),
        Vec2::new(-half_w, half_h),
        Vec2::new(-half_w, -half_h),
        Vec2::new(half_w, -half_h),
    ]
}

fn radial_vertices<R: Rng + ?Sized>(
    num_sides: usize,
    num_paddles: usize,
    mode: GameMode,
    is_player: &[bool],
    rng: &mut R,
) -> Vec<Vec2> {
    let step = TAU / num_sides as f64;
    let offset = base_rotation(num_sides);
    let mut angles: Vec<f64> = (0..num_sides).map(|i| offset + i as f64 * step).collect();
    let ratios = side_ratios(mode, &angles, num_paddles);

    if mode == GameMode::Crazy {
        let max_jitter = CRAZY_JITTER_FRACTION * step / 2.0;
        for i in 0..num_sides {
            let closing = is_player[(i + num_sides - 1) % num_sides];
            if closing != is_player[i] && max_jitter > 0.0 {
                angles[i] += rng.gen_range(-max_jitter..=max_jitter);
            }
        }
    }

    angles
        .iter()
        .zip(&ratios)
        .map(|(theta, r)| Vec2::from_angle(*theta) * *r)
        .collect()
}
