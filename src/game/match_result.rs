//! Match result and ranking system
//!
//! Decides when a game is over and computes the final rankings.

use serde::{Deserialize, Serialize};

use crate::game::state::{GamePhase, GameState};

/// Final standings sent with the game over message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    /// Paddle index of the winner
    pub winner: Option<usize>,
    pub rankings: Vec<PaddleRanking>,
    pub match_duration: f64,
    pub total_points: u32,
}

/// Paddle ranking in match results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaddleRanking {
    pub paddle: usize,
    pub side: usize,
    pub rank: u32,
    pub score: u32,
    pub active: bool,
}

/// Reason why match ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchEndReason {
    /// A paddle reached the winning score
    ScoreReached,
    /// Game clock reached the time limit
    TimeLimit,
    /// Every player left
    PlayersLeft,
    /// Stopped by the server
    Cancelled,
}

/// Highest score wins, ties go to the lowest paddle index, nobody wins at zero
pub fn winner_by_score(scores: &[u32]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }
    best.filter(|&(_, s)| s > 0).map(|(i, _)| i)
}

/// Determine match result from game state
pub fn determine_result(state: &GameState) -> MatchResult {
    let mut rankings: Vec<PaddleRanking> = state
        .paddles
        .iter()
        .enumerate()
        .map(|(i, p)| PaddleRanking {
            paddle: i,
            side: p.side_index,
            rank: 0,
            score: state.scores.get(i).copied().unwrap_or(0),
            active: p.active,
        })
        .collect();

    // Sort by: score (desc), paddle index (asc)
    rankings.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.paddle.cmp(&b.paddle)));

    for (i, ranking) in rankings.iter_mut().enumerate() {
        ranking.rank = (i + 1) as u32;
    }

    MatchResult {
        winner: state.winner.or_else(|| winner_by_score(&state.scores)),
        total_points: rankings.iter().map(|r| r.score).sum(),
        rankings,
        match_duration: state.elapsed,
    }
}

/// Check if match should end
pub fn check_match_end(state: &GameState) -> Option<MatchEndReason> {
    if state.phase != GamePhase::Playing {
        return None;
    }

    if state.scores.iter().any(|&s| s >= state.settings.winning_score) {
        return Some(MatchEndReason::ScoreReached);
    }

    if let Some(limit) = state.settings.time_limit {
        if state.elapsed >= limit {
            return Some(MatchEndReason::TimeLimit);
        }
    }

    if state.active_paddle_count() == 0 {
        return Some(MatchEndReason::PlayersLeft);
    }

    None
}

/// Move the state to game over and record the winner
pub fn finish(state: &mut GameState, reason: MatchEndReason) -> Option<usize> {
    state.phase = GamePhase::GameOver;
    state.winner = winner_by_score(&state.scores);
    tracing::info!(
        "Game {} over ({:?}), winner: {:?}, scores: {:?}",
        state.game_id,
        reason,
        state.winner,
        state.scores
    );
    state.winner
}
