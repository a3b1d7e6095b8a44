//! Computer player: searches the side to move of a `Game` and decides
//! between playing the best move and claiming a draw.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::config::EngineConfig;
use crate::engine::game::Game;
use crate::engine::movegen;
use crate::engine::types::{DrawReason, Move};

use super::search::{Search, SearchParams, SearchResult};
use super::tt::TranspositionTable;

/// What the computer wants to do on its turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerAction {
    Move(Move),
    /// Claim a draw, after playing `mv` if given.
    ClaimDraw {
        reason: DrawReason,
        mv: Option<Move>,
    },
    /// The side to move has no legal moves.
    NoMoves,
}

/// A search-backed player that keeps its transposition table between moves.
pub struct ComputerPlayer {
    tt: TranspositionTable,
    params: SearchParams,
    stop: Arc<AtomicBool>,
}

impl ComputerPlayer {
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_params(config.hash_log2, config.search_params())
    }

    pub fn with_params(hash_log2: u32, params: SearchParams) -> Self {
        ComputerPlayer {
            tt: TranspositionTable::new(hash_log2),
            params,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn params(&self) -> SearchParams {
        self.params
    }

    pub fn set_params(&mut self, params: SearchParams) {
        self.params = params;
    }

    /// Setting the returned flag aborts the running search; the move from
    /// the last completed iteration is used.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn clear_tt(&mut self) {
        self.tt.clear();
    }

    /// Search the current position of `game`.
    ///
    /// A lone legal move is returned without searching unless playing it
    /// would allow a draw claim, in which case its score matters.
    pub fn search(&mut self, game: &Game) -> SearchResult {
        self.stop.store(false, Ordering::Relaxed);
        self.tt.next_generation();

        let pos = game.position();
        let moves = movegen::legal_moves(pos);
        if moves.len() == 1 && draw_claim(game, moves.get(0)).is_none() {
            let mv = moves.get(0);
            return SearchResult {
                best_move: Some(mv),
                pv: vec![mv],
                ..SearchResult::default()
            };
        }

        let hashes = game.position_hashes();
        let history = &hashes[..hashes.len().saturating_sub(1)];
        let mut search = Search::new(pos, history, &mut self.tt, self.params);
        search.set_stop_flag(Arc::clone(&self.stop));
        search.iterative_deepening(&moves)
    }

    /// Decide what to do in the current position of `game`.
    pub fn choose(&mut self, game: &Game) -> PlayerAction {
        let result = self.search(game);
        self.choose_from(game, &result)
    }

    /// Turn a finished search of `game` into an action: play the best move,
    /// or claim a draw when the search sees no advantage.
    pub fn choose_from(&self, game: &Game, result: &SearchResult) -> PlayerAction {
        let Some(mv) = result.best_move else {
            info!(fen = %game.to_fen(), "no legal moves");
            return PlayerAction::NoMoves;
        };
        info!(
            mv = %mv,
            score = result.score,
            depth = result.depth,
            nodes = result.nodes,
            elapsed_ms = result.elapsed_ms,
            "computer move"
        );
        if result.score <= 0
            && let Some((reason, claim_mv)) = draw_claim(game, mv)
        {
            info!(reason = reason.as_str(), "claiming draw");
            return PlayerAction::ClaimDraw {
                reason,
                mv: claim_mv,
            };
        }
        PlayerAction::Move(mv)
    }
}

/// A draw the side to move could claim now, or else together with `mv`.
fn draw_claim(game: &Game, mv: Move) -> Option<(DrawReason, Option<Move>)> {
    const CLAIMABLE: [DrawReason; 2] = [DrawReason::FiftyMoveRule, DrawReason::ThreefoldRepetition];
    for reason in CLAIMABLE {
        if game.can_claim_draw(reason, None) {
            return Some((reason, None));
        }
    }
    CLAIMABLE
        .into_iter()
        .find(|&reason| game.can_claim_draw(reason, Some(mv)))
        .map(|reason| (reason, Some(mv)))
}
