//! Iterative-deepening principal variation search.
//!
//! The tree search is NegaScout over pseudo-legal moves: an illegal move is
//! refuted one ply later by the king capture it allows. On top of that sit
//! the usual selectivity tools:
//!   - transposition table cutoffs (null windows only)
//!   - razoring, reverse futility and futility pruning near the leaves
//!   - null-move pruning
//!   - internal iterative deepening when no hash move is known
//!   - late move reductions and late move pruning
//!   - check and recapture extensions
//!   - quiescence search over captures (and checks on its first ply)
//!
//! Scores are centipawns from the side to move. A mate delivered `n` plies
//! below the root scores `MATE0 - n`.
//!
//! Running out of time or nodes aborts the search with `StopSearch`, which
//! unwinds every frame through `?` after the frame has restored the board.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::debug;

use crate::engine::attacks;
use crate::engine::board::Position;
use crate::engine::movegen::{self, MAX_MOVES, MoveList};
use crate::engine::types::{Bitboard, Color, Move, PieceType, Square};

use super::evaluation::{eval_relative, piece_value};
use super::heuristics::{History, KillerTable, MAX_KILLER_PLY};
use super::tt::{Bound, TranspositionTable};

/// Score of a side that captures the king right now.
pub const MATE0: i32 = 32000;

/// Placeholder for "static evaluation not computed yet".
pub const UNKNOWN_SCORE: i32 = -32767;

/// Beyond this ply the search returns the static evaluation.
const MAX_SEARCH_PLY: i32 = MAX_KILLER_PLY as i32 - 2;

/// Poll the clock and the stop flag every this many nodes.
const NODES_BETWEEN_CHECKS: u64 = 4096;

const HASH_MOVE_SCORE: i32 = 10_000;
const RAZOR_MARGIN: i32 = 250;
const DELTA_MARGIN: i32 = 200;
/// Quiescence plies on which a checking move puts the opponent in check.
const QS_CHECK_PLIES: i32 = 4;

const PAWN_VALUE: i32 = piece_value(PieceType::Pawn);
const KING_VALUE: i32 = piece_value(PieceType::King);

/// True for scores that encode a forced mate.
#[inline]
pub fn is_mate_score(score: i32) -> bool {
    score.abs() > MATE0 - 1000
}

#[inline]
fn normal_bound(score: i32) -> bool {
    score.abs() <= MATE0 / 2
}

/// The search was interrupted by its time, node or stop limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("search stopped")]
pub struct StopSearch;

/// Limits and tunables for one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    /// Deepest iteration to run.
    pub max_depth: i32,
    /// Do not start a new iteration after this many milliseconds.
    pub min_time_ms: Option<u64>,
    /// Hard limit while the best move is in doubt.
    pub max_time_ms: Option<u64>,
    pub max_nodes: Option<u64>,
    /// Late move pruning only runs in iterations at least this deep.
    pub lmp_min_depth: i32,
    /// Half-width of the root aspiration window.
    pub aspiration_window: i32,
}

impl SearchParams {
    /// Fixed-depth search with no time or node limit.
    pub fn depth(max_depth: i32) -> Self {
        SearchParams {
            max_depth,
            ..Self::default()
        }
    }
}

impl Default for SearchParams {
    fn default() -> Self {
        SearchParams {
            max_depth: 64,
            min_time_ms: None,
            max_time_ms: None,
            max_nodes: None,
            lmp_min_depth: 5,
            aspiration_window: 20,
        }
    }
}

/// Outcome of an iterative-deepening search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    /// `None` only when the root has no legal moves.
    pub best_move: Option<Move>,
    pub score: i32,
    pub pv: Vec<Move>,
    /// Deepest fully completed iteration.
    pub depth: i32,
    pub nodes: u64,
    pub elapsed_ms: u64,
}

#[derive(Clone, Copy, Debug)]
struct RootMove {
    mv: Move,
    score: i32,
    nodes: u64,
}

// =========================================================================
// Draw rules
// =========================================================================

/// The side to move may claim a draw under the fifty-move rule.
#[inline]
pub fn can_claim_draw_50(pos: &Position) -> bool {
    pos.halfmove_clock() >= 100
}

/// Has `pos` occurred often enough to be treated as a repetition draw?
///
/// `history` holds the hashes of the positions before `pos`, oldest first.
/// Entries at index `first_new` or later were reached inside the current
/// search; a single repeat of one of those is enough, since the side that
/// steered into it could repeat again. Older entries need two repeats.
pub fn can_claim_draw_rep(pos: &Position, history: &[u64], first_new: usize) -> bool {
    let len = history.len();
    if len < 4 {
        return false;
    }
    let key = pos.zobrist_hash();
    let oldest = len.saturating_sub(pos.halfmove_clock() as usize);
    let mut reps = 0;
    for i in (oldest..=len - 4).rev().step_by(2) {
        if history[i] == key {
            reps += 1;
            if i >= first_new {
                reps += 1;
                break;
            }
        }
    }
    reps >= 2
}

// =========================================================================
// Static exchange evaluation
// =========================================================================

/// Material balance of the capture sequence on `mv.to` started by `mv`,
/// with both sides always recapturing with their cheapest piece and
/// stopping when continuing would lose material.
pub fn see(pos: &Position, mv: Move) -> i32 {
    let Some((us, mover)) = pos.piece_at(mv.from) else {
        return 0;
    };
    let target = mv.to;
    let mut occ = pos.all_occupied();
    let mut gains = [0i32; 32];

    if movegen::is_en_passant(pos, mv) {
        gains[0] = PAWN_VALUE;
        occ.clear(Square::from_file_rank(target.file(), mv.from.rank()));
    } else if let Some((_, victim)) = pos.piece_at(target) {
        if victim == PieceType::King {
            return KING_VALUE;
        }
        gains[0] = piece_value(victim);
    }

    let mut on_square = piece_value(mover);
    if let Some(promo) = mv.promotion {
        gains[0] += piece_value(promo) - PAWN_VALUE;
        on_square = piece_value(promo);
    }
    occ.clear(mv.from);

    let mut side = !us;
    let mut n = 1;
    while n < gains.len() {
        let Some((from, value)) = least_valuable_attacker(pos, target, side, occ) else {
            break;
        };
        gains[n] = on_square;
        n += 1;
        if on_square == KING_VALUE {
            break;
        }
        on_square = value;
        occ.clear(from);
        side = !side;
    }

    let mut score = 0;
    for &gain in gains[1..n].iter().rev() {
        score = (gain - score).max(0);
    }
    gains[0] - score
}

/// Cheapest piece of `side` in `occ` attacking `sq`, sliders seen through
/// pieces already removed from `occ`.
fn least_valuable_attacker(
    pos: &Position,
    sq: Square,
    side: Color,
    occ: Bitboard,
) -> Option<(Square, i32)> {
    let t = attacks::tables();
    let diag = t.bishop_attacks(sq, occ);
    let line = t.rook_attacks(sq, occ);
    let candidates = [
        (PieceType::Pawn, t.pawn_attacks(!side, sq)),
        (PieceType::Knight, t.knight_attacks(sq)),
        (PieceType::Bishop, diag),
        (PieceType::Rook, line),
        (PieceType::Queen, diag | line),
        (PieceType::King, t.king_attacks(sq)),
    ];
    candidates.into_iter().find_map(|(pt, reach)| {
        (reach & pos.bb(side, pt) & occ)
            .lsb()
            .map(|from| (from, piece_value(pt)))
    })
}

fn capture_values(pos: &Position, mv: Move) -> (i32, i32) {
    let attacker = pos.piece_at(mv.from).map_or(0, |(_, pt)| piece_value(pt));
    let victim = pos.piece_at(mv.to).map_or(0, |(_, pt)| piece_value(pt));
    (attacker, victim)
}

/// Sign of `see`, skipping the exchange when the victim outweighs the attacker.
pub fn sign_see(pos: &Position, mv: Move) -> i32 {
    let (attacker, victim) = capture_values(pos, mv);
    if attacker < victim {
        return 1;
    }
    see(pos, mv).signum()
}

/// Does `mv` lose material by exchange?
pub fn neg_see(pos: &Position, mv: Move) -> bool {
    let (attacker, victim) = capture_values(pos, mv);
    if victim >= attacker {
        return false;
    }
    see(pos, mv) < 0
}

/// A pawn move to the sixth rank or beyond (from its own side) with no
/// enemy pawn ahead of it on its own or an adjacent file.
pub fn passed_pawn_push(pos: &Position, mv: Move) -> bool {
    const FILE_A: u64 = 0x0101_0101_0101_0101;
    let Some((us, PieceType::Pawn)) = pos.piece_at(mv.from) else {
        return false;
    };
    let file = mv.to.file();
    let rank = mv.to.rank() as u32;
    let mut files = FILE_A << file;
    if file > 0 {
        files |= FILE_A << (file - 1);
    }
    if file < 7 {
        files |= FILE_A << (file + 1);
    }
    let ahead = match us {
        Color::White if rank >= 7 => 0,
        Color::White => !0u64 << (8 * (rank + 1)),
        Color::Black => (1u64 << (8 * rank)) - 1,
    };
    if (Bitboard(files & ahead) & pos.bb(!us, PieceType::Pawn)).is_not_empty() {
        return false;
    }
    match us {
        Color::White => rank >= 5,
        Color::Black => rank <= 2,
    }
}

/// Move `hash_move` to the front of `moves` if it is there.
fn select_hash_move(moves: &mut MoveList, hash_move: Option<Move>) -> bool {
    let Some(hm) = hash_move else {
        return false;
    };
    let Some(idx) = moves.iter().position(|m| m == hm) else {
        return false;
    };
    moves.swap(0, idx);
    moves.as_mut_slice()[0].score = HASH_MOVE_SCORE;
    true
}

// =========================================================================
// Search
// =========================================================================

/// State of one search: a private board, the shared table and the
/// move-ordering memory.
pub struct Search<'a> {
    pos: Position,
    tt: &'a mut TranspositionTable,
    killers: KillerTable,
    history: History,
    params: SearchParams,
    /// Hashes of the positions on the path to the current node, root's
    /// predecessors included.
    hash_list: Vec<u64>,
    /// Index of the first `hash_list` entry reached inside this search.
    first_new: usize,
    allow_null: Vec<bool>,
    nodes: u64,
    next_check: u64,
    start: Instant,
    need_more_time: bool,
    /// Depth of the running iteration.
    nominal_depth: i32,
    /// Static evaluation handed to the next quiescence call at depth 0.
    q0_eval: i32,
    stop: Option<Arc<AtomicBool>>,
}

impl<'a> Search<'a> {
    /// `history` holds the hashes of the game positions before `pos`.
    pub fn new(
        pos: &Position,
        history: &[u64],
        tt: &'a mut TranspositionTable,
        params: SearchParams,
    ) -> Self {
        Search {
            pos: pos.clone(),
            tt,
            killers: KillerTable::new(),
            history: History::new(),
            params,
            hash_list: history.to_vec(),
            first_new: history.len(),
            allow_null: vec![true; MAX_KILLER_PLY],
            nodes: 0,
            next_check: NODES_BETWEEN_CHECKS,
            start: Instant::now(),
            need_more_time: false,
            nominal_depth: 0,
            q0_eval: UNKNOWN_SCORE,
            stop: None,
        }
    }

    /// Soft and hard time budgets in milliseconds. The soft budget ends
    /// the search while the first root move is still best; the hard one
    /// applies once another move is being considered.
    pub fn time_limit(&mut self, min_ms: Option<u64>, max_ms: Option<u64>) {
        self.params.min_time_ms = min_ms;
        self.params.max_time_ms = max_ms;
    }

    pub fn set_max_nodes(&mut self, max_nodes: Option<u64>) {
        self.params.max_nodes = max_nodes;
    }

    /// Abort as soon as `flag` becomes true.
    pub fn set_stop_flag(&mut self, flag: Arc<AtomicBool>) {
        self.stop = Some(flag);
    }

    pub fn nodes(&self) -> u64 {
        self.nodes
    }

    fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn poll(&mut self) -> Result<(), StopSearch> {
        if self.nodes < self.next_check {
            return Ok(());
        }
        self.next_check = self.nodes + NODES_BETWEEN_CHECKS;
        if let Some(flag) = &self.stop
            && flag.load(Ordering::Relaxed)
        {
            return Err(StopSearch);
        }
        let limit = if self.need_more_time {
            self.params.max_time_ms.or(self.params.min_time_ms)
        } else {
            self.params.min_time_ms.or(self.params.max_time_ms)
        };
        if let Some(limit) = limit
            && self.elapsed_ms() >= limit
        {
            return Err(StopSearch);
        }
        if let Some(max) = self.params.max_nodes
            && self.nodes >= max
        {
            return Err(StopSearch);
        }
        Ok(())
    }

    /// Search `root_moves` (legal moves of the root) with increasing depth
    /// until a limit is reached. An interrupted iteration is discarded.
    pub fn iterative_deepening(&mut self, root_moves: &MoveList) -> SearchResult {
        self.start = Instant::now();
        self.nodes = 0;
        self.next_check = NODES_BETWEEN_CHECKS;
        if root_moves.is_empty() {
            return SearchResult::default();
        }

        let root_pos = self.pos.clone();
        let mut ordered = root_moves.clone();
        self.score_move_list(&mut ordered, 0, 0);
        let mut root: Vec<RootMove> = ordered
            .as_slice()
            .iter()
            .map(|sm| RootMove {
                mv: sm.mv,
                score: sm.score,
                nodes: 0,
            })
            .collect();
        root.sort_by(|a, b| b.score.cmp(&a.score));
        if let Some(hm) = self
            .tt
            .peek(root_pos.zobrist_hash())
            .and_then(|e| e.best_move())
            && let Some(idx) = root.iter().position(|r| r.mv == hm)
        {
            root[..=idx].rotate_right(1);
        }

        let mut result = SearchResult {
            best_move: Some(root[0].mv),
            pv: vec![root[0].mv],
            ..SearchResult::default()
        };

        for depth in 1..=self.params.max_depth.max(1) {
            self.nominal_depth = depth;
            let Ok(score) = self.search_root(&mut root, depth, depth == 1, result.score) else {
                debug!(depth, nodes = self.nodes, "search stopped mid-iteration");
                break;
            };
            let best = root[0].mv;
            let elapsed_ms = self.elapsed_ms();
            result.best_move = Some(best);
            result.score = score;
            result.depth = depth;
            result.pv = self.tt.extract_pv(&root_pos, best, MAX_SEARCH_PLY as usize);
            debug!(
                depth,
                score,
                nodes = self.nodes,
                best = %best,
                elapsed_ms,
                "iteration complete"
            );

            if let Some(limit) = self.params.min_time_ms.or(self.params.max_time_ms)
                && elapsed_ms >= limit
            {
                break;
            }
            if let Some(max) = self.params.max_nodes
                && self.nodes >= max
            {
                break;
            }
            if is_mate_score(score) && depth >= MATE0 - score.abs() {
                break;
            }
        }

        result.nodes = self.nodes;
        result.elapsed_ms = self.elapsed_ms();
        result
    }

    /// One root iteration. On return `root[0]` holds the best move and the
    /// rest are ordered by the effort spent on them.
    fn search_root(
        &mut self,
        root: &mut [RootMove],
        depth: i32,
        first: bool,
        prev_score: i32,
    ) -> Result<i32, StopSearch> {
        let delta = if is_mate_score(prev_score) || !normal_bound(prev_score) {
            1000
        } else {
            self.params.aspiration_window
        };
        let mut alpha = if first {
            -MATE0
        } else {
            (prev_score - delta).max(-MATE0)
        };

        for mi in 0..root.len() {
            self.need_more_time = mi > 0;
            let mv = root[mi].mv;
            let mut beta = if mi > 0 {
                alpha + 1
            } else if first {
                MATE0
            } else {
                (prev_score + delta).min(MATE0)
            };
            let nodes_before = self.nodes;
            let gives_check = movegen::gives_check(&self.pos, mv);
            let lmr = if depth >= 3
                && mi >= 3
                && !movegen::is_capture(&self.pos, mv)
                && mv.promotion.is_none()
                && !gives_check
                && !passed_pawn_push(&self.pos, mv)
            {
                1
            } else {
                0
            };

            let mut score = self.search_root_move(mv, alpha, beta, depth - 1 - lmr, gives_check)?;
            if lmr > 0 && score > alpha {
                score = self.search_root_move(mv, alpha, beta, depth - 1, gives_check)?;
            }
            let mut retry = delta * 2;
            loop {
                if score >= beta && beta < MATE0 {
                    beta = (score + retry).min(MATE0);
                    retry = MATE0 * 2;
                    if mi > 0 {
                        self.need_more_time = true;
                    }
                } else if mi == 0 && score <= alpha && alpha > -MATE0 {
                    alpha = -MATE0;
                    self.need_more_time = true;
                } else {
                    break;
                }
                score = self.search_root_move(mv, alpha, beta, depth - 1, gives_check)?;
            }

            root[mi].score = score;
            root[mi].nodes = self.nodes - nodes_before;
            if mi == 0 || score > alpha {
                alpha = score;
                root[..=mi].rotate_right(1);
            }
        }

        root[1..].sort_by(|a, b| b.nodes.cmp(&a.nodes));
        Ok(root[0].score)
    }

    fn search_root_move(
        &mut self,
        mv: Move,
        alpha: i32,
        beta: i32,
        depth: i32,
        gives_check: bool,
    ) -> Result<i32, StopSearch> {
        self.hash_list.push(self.pos.zobrist_hash());
        let undo = self.pos.make_move(mv);
        let result = self.negascout(-beta, -alpha, 1, depth, None, gives_check);
        self.pos.unmake_move(mv, &undo);
        self.hash_list.pop();
        Ok(-result?)
    }

    /// Side to move has a piece besides pawns and at least one pawn.
    fn has_pieces_and_pawns(&self) -> bool {
        let us = self.pos.side_to_move();
        let pawns = self.pos.pawn_material(us);
        self.pos.material(us) > pawns && pawns > 0
    }

    fn static_eval(&self, cached: i32) -> i32 {
        if cached == UNKNOWN_SCORE {
            eval_relative(&self.pos)
        } else {
            cached
        }
    }

    /// Score the moves in `start..` for ordering.
    ///
    /// Captures and promotions rank by exchange sign, then victim, then
    /// cheapest attacker. Quiet moves get a killer bonus or their history.
    fn score_move_list(&self, moves: &mut MoveList, ply: usize, start: usize) {
        for sm in &mut moves.as_mut_slice()[start..] {
            let mv = sm.mv;
            let mut score = 0;
            if self.pos.piece_at(mv.to).is_some() || mv.promotion.is_some() {
                let (attacker, victim) = capture_values(&self.pos, mv);
                score = victim / 10 * 1000 - attacker / 10;
                score += match sign_see(&self.pos, mv) {
                    s if s > 0 => 2_000_000,
                    0 => 1_000_000,
                    _ => -1_000_000,
                };
                score *= 100;
            }
            let ks = self.killers.killer_score(ply, mv);
            score += if ks > 0 {
                ks + 50
            } else {
                self.history.score(&self.pos, mv)
            };
            sm.score = score;
        }
    }

    fn score_mvv_lva(&self, moves: &mut MoveList) {
        for sm in moves.as_mut_slice() {
            let (attacker, victim) = capture_values(&self.pos, sm.mv);
            sm.score = victim * 10_000 - attacker;
        }
    }

    fn negascout(
        &mut self,
        mut alpha: i32,
        beta: i32,
        ply: i32,
        depth: i32,
        recapture_sq: Option<Square>,
        in_check: bool,
    ) -> Result<i32, StopSearch> {
        self.nodes += 1;
        self.poll()?;

        if can_claim_draw_50(&self.pos) {
            if movegen::can_take_king(&self.pos) {
                return Ok(MATE0 - ply);
            }
            if in_check {
                let mut moves = movegen::check_evasions(&self.pos);
                movegen::remove_illegal(&mut self.pos, &mut moves);
                if moves.is_empty() {
                    return Ok(-(MATE0 - (ply + 1)));
                }
            }
            return Ok(0);
        }
        if can_claim_draw_rep(&self.pos, &self.hash_list, self.first_new) {
            return Ok(0);
        }
        if ply >= MAX_SEARCH_PLY {
            return Ok(eval_relative(&self.pos));
        }

        let key = self.pos.zobrist_hash();
        let mut eval = UNKNOWN_SCORE;
        let mut hash_move = None;
        if let Some(ent) = self.tt.probe(key) {
            let score = ent.score(ply);
            eval = ent.eval as i32;
            hash_move = ent.best_move();
            let ent_depth = ent.depth as i32;
            let plies_to_mate = MATE0 - score.abs();
            if beta == alpha + 1 && (ent_depth >= depth || ent_depth >= plies_to_mate) {
                let usable = match ent.bound {
                    Bound::Exact => true,
                    Bound::Lower => score >= beta,
                    Bound::Upper => score <= alpha,
                    Bound::Empty => false,
                };
                if usable {
                    if score >= beta
                        && let Some(mv) = hash_move
                        && self.pos.piece_at(mv.to).is_none()
                    {
                        self.killers.add_killer(ply as usize, mv);
                    }
                    return Ok(score);
                }
            }
        }

        let pos_extend = i32::from(in_check);
        if depth + pos_extend <= 0 {
            self.q0_eval = eval;
            let score = self.quiesce(alpha, beta, ply, 0, in_check);
            let bound = if score <= alpha {
                Bound::Upper
            } else if score >= beta {
                Bound::Lower
            } else {
                Bound::Exact
            };
            self.tt.insert(key, Move::NULL, score, bound, ply, depth, eval);
            return Ok(score);
        }

        // Razoring
        if normal_bound(alpha) && depth < 4 && beta == alpha + 1 {
            eval = self.static_eval(eval);
            if eval < beta - RAZOR_MARGIN {
                self.q0_eval = eval;
                let score = self.quiesce(
                    alpha - RAZOR_MARGIN,
                    beta - RAZOR_MARGIN,
                    ply,
                    0,
                    in_check,
                );
                if score <= alpha - RAZOR_MARGIN {
                    self.tt
                        .insert(key, Move::NULL, score, Bound::Upper, ply, depth, eval);
                    return Ok(score);
                }
            }
        }

        // Reverse futility
        if !in_check
            && depth < 5
            && normal_bound(alpha)
            && normal_bound(beta)
            && self.has_pieces_and_pawns()
        {
            let margin = match depth {
                ..=1 => 204,
                2 => 420,
                3 => 533,
                _ => 788,
            };
            eval = self.static_eval(eval);
            if eval - margin >= beta {
                self.tt
                    .insert(key, Move::NULL, eval - margin, Bound::Lower, ply, depth, eval);
                return Ok(eval - margin);
            }
        }

        // Null move
        if depth >= 3 && !in_check && self.allow_null[ply as usize] && normal_bound(beta) {
            if movegen::can_take_king(&self.pos) {
                return Ok(MATE0 - ply);
            }
            let mut null_ok = self.has_pieces_and_pawns();
            if null_ok {
                eval = self.static_eval(eval);
                null_ok = eval >= beta;
            }
            if null_ok {
                let r = if depth > 6 { 4 } else { 3 };
                let undo = self.pos.make_null_move();
                self.allow_null[ply as usize + 1] = false;
                let result = self.negascout(-beta, -(beta - 1), ply + 1, depth - r, None, false);
                self.allow_null[ply as usize + 1] = true;
                self.pos.unmake_null_move(&undo);
                let mut score = -result?;
                if score >= beta {
                    if score > MATE0 / 2 {
                        score = beta;
                    }
                    self.tt
                        .insert(key, Move::NULL, score, Bound::Lower, ply, depth, eval);
                    return Ok(score);
                }
            }
        }

        // Futility
        let mut futility_prune = false;
        let mut futility_score = alpha;
        if !in_check && depth < 5 && normal_bound(alpha) && normal_bound(beta) {
            let margin = match depth {
                ..=1 => 61,
                2 => 144,
                3 => 268,
                _ => 334,
            };
            eval = self.static_eval(eval);
            futility_score = eval + margin;
            futility_prune = futility_score <= alpha;
        }

        // Internal iterative deepening
        if depth > 4 && hash_move.is_none() {
            let is_pv = beta > alpha + 1;
            if is_pv || depth > 8 {
                let new_depth = if is_pv { depth - 2 } else { depth * 3 / 8 };
                self.negascout(alpha, beta, ply, new_depth, None, in_check)?;
                hash_move = self.tt.peek(key).and_then(|e| e.best_move());
            }
        }

        let mut moves = if in_check {
            movegen::check_evasions(&self.pos)
        } else {
            movegen::pseudo_legal_moves(&self.pos)
        };
        let hash_selected = select_hash_move(&mut moves, hash_move);
        let mut scored = false;
        if !hash_selected {
            self.score_move_list(&mut moves, ply as usize, 0);
            scored = true;
        }

        let us = self.pos.side_to_move();
        let illegal_score = -(MATE0 - (ply + 1));
        let lmp_allowed = self.nominal_depth >= self.params.lmp_min_depth
            && normal_bound(alpha)
            && normal_bound(beta);
        let mut b = beta;
        let mut best_score = illegal_score;
        let mut best_move = None;
        let mut have_legal = false;
        let mut lmr_count = 0;

        for mi in 0..moves.len() {
            if mi == 1 && !scored {
                self.score_move_list(&mut moves, ply as usize, 1);
                scored = true;
            }
            if mi > 0 || !hash_selected {
                moves.select_best(mi);
            }
            let sm = moves.as_slice()[mi];
            let mv = sm.mv;
            let victim = self.pos.piece_at(mv.to).map(|(_, pt)| pt);
            if victim == Some(PieceType::King) {
                return Ok(MATE0 - ply);
            }
            let is_capture = victim.is_some();
            let may_reduce =
                sm.score < 53 && (!is_capture || sm.score < 0) && mv.promotion.is_none();
            let gives_check = movegen::gives_check(&self.pos, mv);
            let quiet_push = !gives_check && !passed_pawn_push(&self.pos, mv);

            if lmp_allowed && may_reduce && have_legal && quiet_push {
                let limit = match depth {
                    ..=1 => 3,
                    2 => 6,
                    3 => 12,
                    4 => 24,
                    _ => MAX_MOVES,
                };
                if mi >= limit {
                    continue;
                }
            }

            let score = if futility_prune && may_reduce && have_legal && quiet_push {
                futility_score
            } else {
                let mut move_extend = 0;
                let mut see_val = None;
                if !in_check {
                    if Some(mv.to) == recapture_sq {
                        let s = see(&self.pos, mv);
                        see_val = Some(s);
                        let victim_val = victim.map_or(0, piece_value);
                        if s > victim_val - PAWN_VALUE / 2 {
                            move_extend = 1;
                        }
                    }
                    let all_pawns =
                        self.pos.pawn_material(Color::White) + self.pos.pawn_material(Color::Black);
                    if move_extend == 0 && all_pawns > PAWN_VALUE {
                        // Extend captures that leave a pure pawn ending.
                        let cap_val = victim.map_or(0, piece_value);
                        let them = !us;
                        if cap_val > PAWN_VALUE
                            && self.pos.material(us) == self.pos.pawn_material(us)
                            && self.pos.material(them) - self.pos.pawn_material(them) == cap_val
                        {
                            move_extend = 1;
                        }
                    }
                }
                let extend = pos_extend.max(move_extend);

                let mut lmr = 0;
                if depth >= 3 && may_reduce && extend == 0 && quiet_push {
                    lmr_count += 1;
                    lmr = if lmr_count > 3 && depth > 3 && !is_capture {
                        2
                    } else {
                        1
                    };
                }
                let new_depth = depth - 1 + extend - lmr;

                let mut next_recapture = None;
                if is_capture && (gives_check || depth + extend > 1) {
                    let (attacker_val, victim_val) = capture_values(&self.pos, mv);
                    if (victim_val - attacker_val).abs() < PAWN_VALUE / 2 {
                        let s = see_val.unwrap_or_else(|| see(&self.pos, mv));
                        if s.abs() < PAWN_VALUE / 2 {
                            next_recapture = Some(mv.to);
                        }
                    }
                }

                self.hash_list.push(key);
                let undo = self.pos.make_move(mv);
                let mut result = self
                    .negascout(-b, -alpha, ply + 1, new_depth, next_recapture, gives_check)
                    .map(|s| -s);
                if let Ok(s) = result
                    && ((lmr > 0 && s > alpha)
                        || (s > alpha && s < beta && b != beta && s != illegal_score))
                {
                    result = self
                        .negascout(
                            -beta,
                            -alpha,
                            ply + 1,
                            new_depth + lmr,
                            next_recapture,
                            gives_check,
                        )
                        .map(|s| -s);
                }
                self.pos.unmake_move(mv, &undo);
                self.hash_list.pop();
                result?
            };

            if score != illegal_score {
                have_legal = true;
            }
            best_score = best_score.max(score);
            if score > alpha {
                alpha = score;
                best_move = Some(mv);
            }
            if alpha >= beta {
                if !is_capture {
                    self.killers.add_killer(ply as usize, mv);
                    self.history.add_success(&self.pos, mv, depth);
                    for prev in &moves.as_slice()[..mi] {
                        if self.pos.piece_at(prev.mv.to).is_none() {
                            self.history.add_fail(&self.pos, prev.mv, depth);
                        }
                    }
                }
                self.tt.insert(key, mv, alpha, Bound::Lower, ply, depth, eval);
                return Ok(alpha);
            }
            b = alpha + 1;
        }

        if !have_legal && !in_check {
            // Stalemate
            self.tt.insert(key, Move::NULL, 0, Bound::Exact, ply, depth, eval);
            return Ok(0);
        }
        match best_move {
            Some(mv) => self.tt.insert(key, mv, best_score, Bound::Exact, ply, depth, eval),
            None => self
                .tt
                .insert(key, Move::NULL, best_score, Bound::Upper, ply, depth, eval),
        }
        Ok(best_score)
    }

    /// Quiescence search. `depth` is 0 on the first ply and negative below.
    fn quiesce(&mut self, mut alpha: i32, beta: i32, ply: i32, depth: i32, in_check: bool) -> i32 {
        self.nodes += 1;
        let mut score = if in_check {
            -(MATE0 - (ply + 1))
        } else if depth == 0 {
            self.static_eval(self.q0_eval)
        } else {
            eval_relative(&self.pos)
        };
        if score >= beta {
            if depth == 0 && score < MATE0 - ply && movegen::can_take_king(&self.pos) {
                // Lets the parent see that its move was illegal.
                score = MATE0 - ply;
            }
            return score;
        }
        let eval = score;
        alpha = alpha.max(score);
        let mut best_score = score;

        let try_checks = depth > -1;
        let mut moves = if in_check {
            movegen::check_evasions(&self.pos)
        } else if try_checks {
            movegen::pseudo_legal_captures_and_checks(&self.pos)
        } else {
            movegen::pseudo_legal_captures(&self.pos)
        };
        self.score_mvv_lva(&mut moves);
        let check_next = depth - 1 > -QS_CHECK_PLIES;

        for mi in 0..moves.len() {
            if mi < 8 {
                moves.select_best(mi);
            }
            let mv = moves.get(mi);
            let victim = self.pos.piece_at(mv.to).map(|(_, pt)| pt);
            if victim == Some(PieceType::King) {
                return MATE0 - ply;
            }
            let mut gives_check = None;
            if !in_check {
                let is_capture = victim.is_some() || movegen::is_en_passant(&self.pos, mv);
                if !is_capture && mv.promotion.is_none() {
                    if !try_checks {
                        continue;
                    }
                    let gc = movegen::gives_check(&self.pos, mv);
                    gives_check = Some(gc);
                    if !gc || neg_see(&self.pos, mv) {
                        continue;
                    }
                } else {
                    if neg_see(&self.pos, mv) {
                        continue;
                    }
                    let capt = if victim.is_none() && is_capture {
                        PAWN_VALUE
                    } else {
                        victim.map_or(0, piece_value)
                    };
                    let prom = mv.promotion.map_or(0, piece_value);
                    let optimistic = eval + capt + prom + DELTA_MARGIN;
                    if optimistic < alpha && self.both_keep_material_after(capt) {
                        let gc = check_next && movegen::gives_check(&self.pos, mv);
                        gives_check = Some(gc);
                        if !gc {
                            best_score = best_score.max(optimistic);
                            continue;
                        }
                    }
                }
            }
            let next_in_check = check_next
                && gives_check.unwrap_or_else(|| movegen::gives_check(&self.pos, mv));

            let undo = self.pos.make_move(mv);
            let score = -self.quiesce(-beta, -alpha, ply + 1, depth - 1, next_in_check);
            self.pos.unmake_move(mv, &undo);

            if score > best_score {
                best_score = score;
                if score > alpha {
                    alpha = score;
                    if alpha >= beta {
                        return alpha;
                    }
                }
            }
        }
        best_score
    }

    /// Both sides keep pawns and more than `capt` worth of pieces.
    fn both_keep_material_after(&self, capt: i32) -> bool {
        [Color::White, Color::Black].into_iter().all(|c| {
            let pawns = self.pos.pawn_material(c);
            pawns > 0 && self.pos.material(c) > capt + pawns
        })
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(name: &str) -> Square {
        Square::from_algebraic(name).unwrap()
    }

    fn pos(fen: &str) -> Position {
        Position::from_fen(fen).unwrap()
    }

    fn search(fen: &str, depth: i32) -> SearchResult {
        let p = pos(fen);
        let mut tt = TranspositionTable::new(16);
        let mut sc = Search::new(&p, &[], &mut tt, SearchParams::depth(depth));
        sc.iterative_deepening(&movegen::legal_moves(&p))
    }

    #[test]
    fn see_simple_exchanges() {
        // Pawn takes an undefended knight.
        let p = pos("4k3/8/8/3n4/4P3/8/8/4K3 w - - 0 1");
        assert_eq!(see(&p, Move::new(sq("e4"), sq("d5"))), 320);
        // Queen takes a pawn defended by a pawn.
        let p = pos("4k3/8/2p5/3p4/8/8/3Q4/4K3 w - - 0 1");
        assert_eq!(see(&p, Move::new(sq("d2"), sq("d5"))), 100 - 900);
        // Rook takes a rook defended once, supported by a second rook behind.
        let p = pos("3rk3/8/8/3r4/8/8/3R4/3RK3 w - - 0 1");
        assert_eq!(see(&p, Move::new(sq("d2"), sq("d5"))), 500);
    }

    #[test]
    fn see_en_passant_and_promotion() {
        let p = pos("4k3/8/8/3pP3/8/8/8/4K3 w - d6 0 1");
        assert_eq!(see(&p, Move::new(sq("e5"), sq("d6"))), 100);
        let p = pos("7k/1P6/8/8/8/8/8/4K3 w - - 0 1");
        let promo = Move::with_promotion(sq("b7"), sq("b8"), PieceType::Queen);
        assert_eq!(see(&p, promo), 800);
    }

    #[test]
    fn see_signs_agree() {
        for fen in [
            "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
            "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
            "r4rk1/1pp1qppp/p1np1n2/2b1p1B1/2B1P1b1/P1NP1N2/1PP1QPPP/R4RK1 w - - 0 10",
        ] {
            let p = pos(fen);
            for mv in movegen::pseudo_legal_moves(&p).iter() {
                let s = see(&p, mv);
                assert_eq!(sign_see(&p, mv), s.signum(), "{fen} {mv}");
                assert_eq!(neg_see(&p, mv), s < 0, "{fen} {mv}");
            }
        }
    }

    #[test]
    fn repetition_counts_search_positions_double() {
        let p = Position::starting();
        let k = p.zobrist_hash();
        let mut p_clock = p.clone();
        p_clock.set_halfmove_clock(8);
        // One earlier occurrence from the game: not enough.
        assert!(!can_claim_draw_rep(&p_clock, &[k, 1, 2, 3], 4));
        // The same occurrence reached inside the search: enough.
        assert!(can_claim_draw_rep(&p_clock, &[k, 1, 2, 3], 0));
        // Two earlier occurrences.
        assert!(can_claim_draw_rep(&p_clock, &[k, 1, k, 1, 2, 3], 6));
        // Outside the halfmove window nothing counts.
        p_clock.set_halfmove_clock(2);
        assert!(!can_claim_draw_rep(&p_clock, &[k, 1, k, 1, 2, 3], 0));
    }

    #[test]
    fn passed_pawn_pushes() {
        let p = pos("4k3/8/8/4P3/8/8/8/4K3 w - - 0 1");
        assert!(passed_pawn_push(&p, Move::new(sq("e5"), sq("e6"))));
        let p = pos("4k3/3p4/8/4P3/8/8/8/4K3 w - - 0 1");
        assert!(!passed_pawn_push(&p, Move::new(sq("e5"), sq("e6"))));
        let p = pos("4k3/8/8/8/4P3/8/8/4K3 w - - 0 1");
        assert!(!passed_pawn_push(&p, Move::new(sq("e4"), sq("e5"))));
        let p = pos("4k3/8/8/8/8/4p3/8/4K2R b - - 0 1");
        assert!(passed_pawn_push(&p, Move::new(sq("e3"), sq("e2"))));
    }

    #[test]
    fn finds_mate_in_one() {
        let r = search("3k4/8/3K2R1/8/8/8/8/8 w - - 0 1", 2);
        assert_eq!(r.best_move, Some(Move::new(sq("g6"), sq("g8"))));
        assert_eq!(r.score, MATE0 - 2);
    }

    #[test]
    fn black_finds_fools_mate() {
        let r = search(
            "rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2",
            3,
        );
        assert_eq!(r.best_move, Some(Move::new(sq("d8"), sq("h4"))));
        assert_eq!(r.score, MATE0 - 2);
    }

    #[test]
    fn avoids_stalemating_promotion() {
        let r = search("8/5P1k/5K2/8/8/8/8/8 w - - 0 1", 5);
        let mv = r.best_move.unwrap();
        assert_ne!(
            mv,
            Move::with_promotion(sq("f7"), sq("f8"), PieceType::Queen)
        );
        assert!(r.score > 0);
    }

    #[test]
    fn captures_hanging_rook() {
        let r = search("4k3/8/8/3r4/8/8/3Q4/4K3 w - - 0 1", 4);
        assert_eq!(r.best_move, Some(Move::new(sq("d2"), sq("d5"))));
    }

    #[test]
    fn no_moves_gives_empty_result() {
        let r = search("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1", 3);
        assert_eq!(r.best_move, None);
    }

    #[test]
    fn single_iteration_limits() {
        let r = search(crate::engine::board::START_FEN, 1);
        assert_eq!(r.depth, 1);
        assert!(r.nodes > 20);
        assert_eq!(r.pv.first().copied(), r.best_move);
    }

    #[test]
    fn stop_flag_keeps_last_completed_iteration() {
        let p = Position::starting();
        let mut tt = TranspositionTable::new(16);
        let flag = Arc::new(AtomicBool::new(true));
        let mut sc = Search::new(&p, &[], &mut tt, SearchParams::depth(30));
        sc.set_stop_flag(flag);
        let legal = movegen::legal_moves(&p);
        let r = sc.iterative_deepening(&legal);
        assert!(r.depth < 30);
        assert!(legal.contains(r.best_move.unwrap()));
        assert_eq!(sc.pos, p);
    }
}
