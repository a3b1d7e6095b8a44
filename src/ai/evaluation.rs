//! Static position evaluation.
//!
//! Returns a score in centipawns from White's perspective.
//! Positive = White advantage, negative = Black advantage.
//!
//! Components:
//!   1. Material balance
//!   2. Piece-square tables, the king's blended from middle-game to endgame
//!      by the remaining non-pawn material
//!   3. Bishop pair
//!
//! Positions where neither side can mate evaluate to exactly 0.

use crate::engine::board::Position;
use crate::engine::game::insufficient_material;
use crate::engine::types::{Color, PieceType, Square};

/// Bonus for owning both bishops.
const BISHOP_PAIR: i32 = 30;

/// Non-pawn material of both sides in the starting position.
const MAX_PHASE: i32 = 2 * (2 * 320 + 2 * 330 + 2 * 500 + 900);

/// Material value in centipawns. The king's value only matters to SEE.
#[inline]
pub const fn piece_value(pt: PieceType) -> i32 {
    pt.value()
}

// =========================================================================
// Piece-Square Tables (from White's perspective)
//
// Indexed by square (LERF: a1=0 .. h8=63).
// Values are centipawn bonuses/penalties.
// =========================================================================

/// Pawn PST: encourages central pawns and advancement.
#[rustfmt::skip]
const PAWN_PST: [i32; 64] = [
     0,  0,  0,  0,  0,  0,  0,  0,   // rank 1 (never occupied)
     5, 10, 10,-20,-20, 10, 10,  5,   // rank 2
     5, -5,-10,  0,  0,-10, -5,  5,   // rank 3
     0,  0,  0, 20, 20,  0,  0,  0,   // rank 4
     5,  5, 10, 25, 25, 10,  5,  5,   // rank 5
    10, 10, 20, 30, 30, 20, 10, 10,   // rank 6
    50, 50, 50, 50, 50, 50, 50, 50,   // rank 7
     0,  0,  0,  0,  0,  0,  0,  0,   // rank 8 (promoted)
];

/// Knight PST: encourages centralization.
#[rustfmt::skip]
const KNIGHT_PST: [i32; 64] = [
    -50,-40,-30,-30,-30,-30,-40,-50,
    -40,-20,  0,  5,  5,  0,-20,-40,
    -30,  5, 10, 15, 15, 10,  5,-30,
    -30,  0, 15, 20, 20, 15,  0,-30,
    -30,  5, 15, 20, 20, 15,  5,-30,
    -30,  0, 10, 15, 15, 10,  0,-30,
    -40,-20,  0,  0,  0,  0,-20,-40,
    -50,-40,-30,-30,-30,-30,-40,-50,
];

/// Bishop PST: encourages long diagonals and avoids corners.
#[rustfmt::skip]
const BISHOP_PST: [i32; 64] = [
    -20,-10,-10,-10,-10,-10,-10,-20,
    -10,  5,  0,  0,  0,  0,  5,-10,
    -10, 10, 10, 10, 10, 10, 10,-10,
    -10,  0, 10, 10, 10, 10,  0,-10,
    -10,  5,  5, 10, 10,  5,  5,-10,
    -10,  0,  5, 10, 10,  5,  0,-10,
    -10,  0,  0,  0,  0,  0,  0,-10,
    -20,-10,-10,-10,-10,-10,-10,-20,
];

/// Rook PST: encourages 7th rank and open files.
#[rustfmt::skip]
const ROOK_PST: [i32; 64] = [
      0,  0,  0,  5,  5,  0,  0,  0,
     -5,  0,  0,  0,  0,  0,  0, -5,
     -5,  0,  0,  0,  0,  0,  0, -5,
     -5,  0,  0,  0,  0,  0,  0, -5,
     -5,  0,  0,  0,  0,  0,  0, -5,
     -5,  0,  0,  0,  0,  0,  0, -5,
      5, 10, 10, 10, 10, 10, 10,  5,
      0,  0,  0,  0,  0,  0,  0,  0,
];

/// Queen PST: minor centralization bonus.
#[rustfmt::skip]
const QUEEN_PST: [i32; 64] = [
    -20,-10,-10, -5, -5,-10,-10,-20,
    -10,  0,  5,  0,  0,  0,  0,-10,
    -10,  5,  5,  5,  5,  5,  0,-10,
      0,  0,  5,  5,  5,  5,  0, -5,
     -5,  0,  5,  5,  5,  5,  0, -5,
    -10,  0,  5,  5,  5,  5,  0,-10,
    -10,  0,  0,  0,  0,  0,  0,-10,
    -20,-10,-10, -5, -5,-10,-10,-20,
];

/// King PST (middle-game): encourages castled position, penalizes center.
#[rustfmt::skip]
const KING_MG_PST: [i32; 64] = [
     20, 30, 10,  0,  0, 10, 30, 20,
     20, 20,  0,  0,  0,  0, 20, 20,
    -10,-20,-20,-20,-20,-20,-20,-10,
    -20,-30,-30,-40,-40,-30,-30,-20,
    -30,-40,-40,-50,-50,-40,-40,-30,
    -30,-40,-40,-50,-50,-40,-40,-30,
    -30,-40,-40,-50,-50,-40,-40,-30,
    -30,-40,-40,-50,-50,-40,-40,-30,
];

/// King PST (endgame): the king belongs in the centre once queens are off.
#[rustfmt::skip]
const KING_EG_PST: [i32; 64] = [
    -50,-30,-30,-30,-30,-30,-30,-50,
    -30,-30,  0,  0,  0,  0,-30,-30,
    -30,-10, 20, 30, 30, 20,-10,-30,
    -30,-10, 30, 40, 40, 30,-10,-30,
    -30,-10, 30, 40, 40, 30,-10,-30,
    -30,-10, 20, 30, 30, 20,-10,-30,
    -30,-20,-10,  0,  0,-10,-20,-30,
    -50,-40,-30,-20,-20,-30,-40,-50,
];

const PST: [[i32; 64]; 5] = [PAWN_PST, KNIGHT_PST, BISHOP_PST, ROOK_PST, QUEEN_PST];

// =========================================================================
// Evaluation
// =========================================================================

/// Evaluate a position. Returns centipawn score from White's perspective.
pub fn eval_white(pos: &Position) -> i32 {
    if insufficient_material(pos) {
        return 0;
    }

    let mut score = pos.material(Color::White) - pos.material(Color::Black);

    for pt in [
        PieceType::Pawn,
        PieceType::Knight,
        PieceType::Bishop,
        PieceType::Rook,
        PieceType::Queen,
    ] {
        let table = &PST[pt.index()];
        for sq in pos.bb(Color::White, pt).iter() {
            score += table[sq.index()];
        }
        for sq in pos.bb(Color::Black, pt).iter() {
            score -= table[mirror_square(sq)];
        }
    }

    let phase = (pos.material(Color::White) - pos.pawn_material(Color::White)
        + pos.material(Color::Black)
        - pos.pawn_material(Color::Black))
    .min(MAX_PHASE);
    score += king_score(pos.king_sq(Color::White).index(), phase);
    score -= king_score(mirror_square(pos.king_sq(Color::Black)), phase);

    if pos.bb(Color::White, PieceType::Bishop).pop_count() >= 2 {
        score += BISHOP_PAIR;
    }
    if pos.bb(Color::Black, PieceType::Bishop).pop_count() >= 2 {
        score -= BISHOP_PAIR;
    }

    score
}

/// Evaluate from the side-to-move's perspective (for negamax).
#[inline]
pub fn eval_relative(pos: &Position) -> i32 {
    let score = eval_white(pos);
    match pos.side_to_move() {
        Color::White => score,
        Color::Black => -score,
    }
}

#[inline]
fn king_score(idx: usize, phase: i32) -> i32 {
    (KING_MG_PST[idx] * phase + KING_EG_PST[idx] * (MAX_PHASE - phase)) / MAX_PHASE
}

/// Mirror a square vertically (flip rank) for Black PST lookup.
#[inline]
fn mirror_square(sq: Square) -> usize {
    (sq.0 ^ 56) as usize
}

// =========================================================================
// Tests
// =========================================================================
