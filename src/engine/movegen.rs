//! Move generation.
//!
//! Generators produce *pseudo-legal* moves into a stack-allocated
//! [`MoveList`]; [`remove_illegal`] filters by making each move and checking
//! the mover's king. If a generator finds a move that captures the enemy
//! king, it returns a list holding only that move: the previous move was
//! illegal and the search refutes it immediately.

use std::fmt;

use crate::engine::attacks;
use crate::engine::board::Position;
use crate::engine::types::{Bitboard, CastlingRights, Color, Move, PieceType, Square};

/// Upper bound on moves in any reachable position (218) plus headroom.
pub const MAX_MOVES: usize = 256;

// =========================================================================
// MoveList
// =========================================================================

/// A move together with its ordering score.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScoredMove {
    pub mv: Move,
    pub score: i32,
}

/// Fixed-capacity move list living on the stack.
#[derive(Clone)]
pub struct MoveList {
    moves: [ScoredMove; MAX_MOVES],
    len: usize,
}

impl MoveList {
    pub fn new() -> Self {
        MoveList {
            moves: [ScoredMove::default(); MAX_MOVES],
            len: 0,
        }
    }

    #[inline]
    pub fn push(&mut self, mv: Move) {
        self.moves[self.len] = ScoredMove { mv, score: 0 };
        self.len += 1;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Move {
        self.as_slice()[idx].mv
    }

    #[inline]
    pub fn as_slice(&self) -> &[ScoredMove] {
        &self.moves[..self.len]
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [ScoredMove] {
        &mut self.moves[..self.len]
    }

    pub fn iter(&self) -> impl Iterator<Item = Move> + '_ {
        self.as_slice().iter().map(|sm| sm.mv)
    }

    pub fn contains(&self, mv: Move) -> bool {
        self.iter().any(|m| m == mv)
    }

    /// Keep only the moves for which `keep` returns true, preserving order.
    pub fn retain(&mut self, mut keep: impl FnMut(Move) -> bool) {
        let mut write = 0;
        for read in 0..self.len {
            if keep(self.moves[read].mv) {
                self.moves[write] = self.moves[read];
                write += 1;
            }
        }
        self.len = write;
    }

    #[inline]
    pub fn swap(&mut self, a: usize, b: usize) {
        self.as_mut_slice().swap(a, b);
    }

    /// Move the highest-scored entry in `start..` to `start`. One step of a
    /// selection sort, so ordering costs nothing for moves never searched.
    pub fn select_best(&mut self, start: usize) {
        let slice = self.as_mut_slice();
        let mut best = start;
        for i in start + 1..slice.len() {
            if slice[i].score > slice[best].score {
                best = i;
            }
        }
        slice.swap(start, best);
    }
}

impl Default for MoveList {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MoveList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(|m| m.to_string())).finish()
    }
}

// =========================================================================
// Public API
// =========================================================================

/// All pseudo-legal moves for the side to move, including castling.
pub fn pseudo_legal_moves(pos: &Position) -> MoveList {
    let mut list = MoveList::new();
    let us = pos.side_to_move();
    let targets = !pos.occupied(us);

    if piece_moves(pos, &mut list, targets) {
        return list;
    }
    if pawn_moves(pos, &mut list, Bitboard::ALL, true, true) {
        return list;
    }
    castling_moves(pos, &mut list);
    list
}

/// Captures (including en passant) and queen/knight promotions.
pub fn pseudo_legal_captures(pos: &Position) -> MoveList {
    let mut list = MoveList::new();
    let targets = pos.occupied(!pos.side_to_move());
    if piece_moves(pos, &mut list, targets) {
        return list;
    }
    pawn_moves(pos, &mut list, Bitboard::EMPTY, true, false);
    list
}

/// Captures and promotions plus every quiet move that gives check.
pub fn pseudo_legal_captures_and_checks(pos: &Position) -> MoveList {
    let mut all = pseudo_legal_moves(pos);
    if all.len() == 1 && is_king_capture(pos, all.get(0)) {
        return all;
    }
    all.retain(|mv| {
        is_capture(pos, mv)
            || matches!(mv.promotion, Some(PieceType::Queen | PieceType::Knight))
            || gives_check(pos, mv)
    });
    all
}

/// Moves that may get the side to move out of check: king steps, captures
/// of a single checker and interpositions. Only king moves in double check.
/// Falls back to [`pseudo_legal_moves`] when not in check.
///
/// The enemy king is always a target, so a position reached by an illegal
/// move yields just the king capture, as the other generators do.
pub fn check_evasions(pos: &Position) -> MoveList {
    let t = attacks::tables();
    let us = pos.side_to_move();
    let them = !us;
    let king = pos.king_sq(us);
    let checkers = attackers_to(pos, king, them, pos.all_occupied());
    if checkers.is_empty() {
        return pseudo_legal_moves(pos);
    }

    let mut list = MoveList::new();
    if add_targets(pos, &mut list, king, t.king_attacks(king) & !pos.occupied(us)) {
        return list;
    }
    let enemy_king = pos.bb(them, PieceType::King);
    if checkers.more_than_one() {
        if !piece_moves_except_king(pos, &mut list, enemy_king) {
            pawn_moves(pos, &mut list, enemy_king, true, true);
        }
        return list;
    }

    let Some(checker) = checkers.lsb() else {
        return list;
    };
    let valid = checkers | t.between(king, checker) | enemy_king;
    if piece_moves_except_king(pos, &mut list, valid) {
        return list;
    }
    pawn_moves(pos, &mut list, valid, true, true);

    // An en-passant capture evades when the checker is the pawn it removes.
    if let Some(ep) = pos.en_passant() {
        let victim = match us {
            Color::White => Square(ep.0 - 8),
            Color::Black => Square(ep.0 + 8),
        };
        if victim == checker && !valid.is_set(ep) {
            for from in (t.pawn_attacks(them, ep) & pos.bb(us, PieceType::Pawn)).iter() {
                list.push(Move::new(from, ep));
            }
        }
    }
    list
}

/// Drop moves that leave the mover's own king attacked.
pub fn remove_illegal(pos: &mut Position, list: &mut MoveList) {
    list.retain(|mv| is_legal(pos, mv));
}

/// Make `mv`, test whether the mover's king survives, unmake.
pub fn is_legal(pos: &mut Position, mv: Move) -> bool {
    let us = pos.side_to_move();
    let undo = pos.make_move(mv);
    let legal = !pos.is_square_attacked(pos.king_sq(us), !us);
    pos.unmake_move(mv, &undo);
    legal
}

/// All legal moves for the side to move.
pub fn legal_moves(pos: &Position) -> MoveList {
    let mut scratch = pos.clone();
    let mut list = pseudo_legal_moves(pos);
    remove_illegal(&mut scratch, &mut list);
    list
}

/// Legal moves starting on `from`.
pub fn legal_moves_from(pos: &Position, from: Square) -> MoveList {
    let mut list = legal_moves(pos);
    list.retain(|mv| mv.from == from);
    list
}

#[inline]
pub fn in_check(pos: &Position) -> bool {
    pos.is_in_check()
}

#[inline]
pub fn sq_attacked(pos: &Position, sq: Square, by: Color) -> bool {
    pos.is_square_attacked(sq, by)
}

/// Can the side to move capture the opponent's king?
#[inline]
pub fn can_take_king(pos: &Position) -> bool {
    let us = pos.side_to_move();
    pos.is_square_attacked(pos.king_sq(!us), us)
}

/// Does `mv` capture something, en passant included?
#[inline]
pub fn is_capture(pos: &Position, mv: Move) -> bool {
    pos.piece_at(mv.to).is_some() || is_en_passant(pos, mv)
}

#[inline]
pub fn is_en_passant(pos: &Position, mv: Move) -> bool {
    pos.en_passant() == Some(mv.to)
        && matches!(pos.piece_at(mv.from), Some((_, PieceType::Pawn)))
}

#[inline]
fn is_king_capture(pos: &Position, mv: Move) -> bool {
    matches!(pos.piece_at(mv.to), Some((_, PieceType::King)))
}

/// Would `mv` attack the enemy king? Evaluated on bitboards without making
/// the move; covers direct, discovered, castling-rook, promotion and
/// en-passant discovered checks.
pub fn gives_check(pos: &Position, mv: Move) -> bool {
    let Some((us, piece)) = pos.piece_at(mv.from) else {
        return false;
    };
    let t = attacks::tables();
    let them = !us;
    let king = pos.king_sq(them);
    let from_bb = Bitboard::from_square(mv.from);
    let to_bb = Bitboard::from_square(mv.to);

    let mut ours = [Bitboard::EMPTY; PieceType::COUNT];
    for pt in PieceType::ALL {
        ours[pt.index()] = pos.bb(us, pt);
    }
    let mut occ = (pos.all_occupied() & !from_bb) | to_bb;
    ours[piece.index()] &= !from_bb;
    ours[mv.promotion.unwrap_or(piece).index()] |= to_bb;

    if is_en_passant(pos, mv) {
        let victim = match us {
            Color::White => Square(mv.to.0 - 8),
            Color::Black => Square(mv.to.0 + 8),
        };
        occ &= !Bitboard::from_square(victim);
    }
    if piece == PieceType::King
        && let Some((rook_from, rook_to)) = castling_rook_squares(mv)
    {
        let rook_bb = Bitboard::from_square(rook_from) | Bitboard::from_square(rook_to);
        ours[PieceType::Rook.index()] ^= rook_bb;
        occ = (occ & !Bitboard::from_square(rook_from)) | Bitboard::from_square(rook_to);
    }

    let rooks = ours[PieceType::Rook.index()] | ours[PieceType::Queen.index()];
    let bishops = ours[PieceType::Bishop.index()] | ours[PieceType::Queen.index()];
    (t.pawn_attacks(them, king) & ours[PieceType::Pawn.index()]).is_not_empty()
        || (t.knight_attacks(king) & ours[PieceType::Knight.index()]).is_not_empty()
        || (t.rook_attacks(king, occ) & rooks).is_not_empty()
        || (t.bishop_attacks(king, occ) & bishops).is_not_empty()
}

/// Clear an en-passant square that no legal capture can use. `make_move`
/// records the square whenever an enemy pawn is adjacent; this second pass
/// rejects captures ruled out by pins or check.
pub fn fixup_ep_square(pos: &mut Position) {
    let Some(ep) = pos.en_passant() else {
        return;
    };
    let us = pos.side_to_move();
    let capturers = attacks::tables().pawn_attacks(!us, ep) & pos.bb(us, PieceType::Pawn);
    let usable = capturers
        .iter()
        .any(|from| is_legal(pos, Move::new(from, ep)));
    if !usable {
        pos.set_en_passant(None);
    }
}

/// Count leaf nodes of the legal move tree to `depth`.
pub fn perft(pos: &mut Position, depth: u32) -> u64 {
    if depth == 0 {
        return 1;
    }
    let mut moves = pseudo_legal_moves(pos);
    remove_illegal(pos, &mut moves);
    if depth == 1 {
        return moves.len() as u64;
    }
    let mut nodes = 0u64;
    for mv in moves.iter() {
        let undo = pos.make_move(mv);
        nodes += perft(pos, depth - 1);
        pos.unmake_move(mv, &undo);
    }
    nodes
}

/// Perft split by root move.
pub fn divide(pos: &mut Position, depth: u32) -> Vec<(Move, u64)> {
    let mut moves = pseudo_legal_moves(pos);
    remove_illegal(pos, &mut moves);
    moves
        .iter()
        .map(|mv| {
            let undo = pos.make_move(mv);
            let nodes = perft(pos, depth.saturating_sub(1));
            pos.unmake_move(mv, &undo);
            (mv, nodes)
        })
        .collect()
}

// =========================================================================
// Internal generators
// =========================================================================

/// All pieces of `by` attacking `sq` under occupancy `occ`.
fn attackers_to(pos: &Position, sq: Square, by: Color, occ: Bitboard) -> Bitboard {
    let t = attacks::tables();
    let rooks = pos.bb(by, PieceType::Rook) | pos.bb(by, PieceType::Queen);
    let bishops = pos.bb(by, PieceType::Bishop) | pos.bb(by, PieceType::Queen);
    (t.pawn_attacks(!by, sq) & pos.bb(by, PieceType::Pawn))
        | (t.knight_attacks(sq) & pos.bb(by, PieceType::Knight))
        | (t.king_attacks(sq) & pos.bb(by, PieceType::King))
        | (t.rook_attacks(sq, occ) & rooks)
        | (t.bishop_attacks(sq, occ) & bishops)
}

/// Push `from → to` for every target. When a target is the enemy king,
/// replace the list with that single capture and return true.
fn add_targets(pos: &Position, list: &mut MoveList, from: Square, targets: Bitboard) -> bool {
    let enemy_king = pos.bb(!pos.side_to_move(), PieceType::King);
    if let Some(king) = (targets & enemy_king).lsb() {
        list.clear();
        list.push(Move::new(from, king));
        return true;
    }
    for to in targets.iter() {
        list.push(Move::new(from, to));
    }
    false
}

/// Knight, slider and king moves restricted to `targets`.
fn piece_moves(pos: &Position, list: &mut MoveList, targets: Bitboard) -> bool {
    if piece_moves_except_king(pos, list, targets) {
        return true;
    }
    let king = pos.king_sq(pos.side_to_move());
    add_targets(pos, list, king, attacks::tables().king_attacks(king) & targets)
}

fn piece_moves_except_king(pos: &Position, list: &mut MoveList, targets: Bitboard) -> bool {
    let t = attacks::tables();
    let us = pos.side_to_move();
    let occ = pos.all_occupied();

    for piece in [PieceType::Queen, PieceType::Rook, PieceType::Bishop, PieceType::Knight] {
        for from in pos.bb(us, piece).iter() {
            let attacks = match piece {
                PieceType::Queen => t.queen_attacks(from, occ),
                PieceType::Rook => t.rook_attacks(from, occ),
                PieceType::Bishop => t.bishop_attacks(from, occ),
                _ => t.knight_attacks(from),
            };
            if add_targets(pos, list, from, attacks & targets) {
                return true;
            }
        }
    }
    false
}

/// Pawn moves. Pushes land only on `push_mask`; captures always hit any
/// enemy piece unless `push_mask` restricts evasions. With `all_promotions`
/// false only queen and knight promotions are generated.
fn pawn_moves(
    pos: &Position,
    list: &mut MoveList,
    push_mask: Bitboard,
    captures: bool,
    all_promotions: bool,
) -> bool {
    let t = attacks::tables();
    let us = pos.side_to_move();
    let them = !us;
    let empty = !pos.all_occupied();
    let enemy = pos.occupied(them);
    let enemy_king = pos.bb(them, PieceType::King);
    // Evasions pass a mask narrower than the whole board; captures then
    // only matter on the checker's square.
    let capture_mask = if push_mask == Bitboard::ALL || push_mask.is_empty() {
        enemy
    } else {
        enemy & push_mask
    };

    let (push_dir, start_rank, promo_rank): (i8, u8, u8) = match us {
        Color::White => (8, 1, 6),
        Color::Black => (-8, 6, 1),
    };

    for from in pos.bb(us, PieceType::Pawn).iter() {
        let from_rank = from.rank();

        if captures {
            let hits = t.pawn_attacks(us, from);
            if let Some(king) = (hits & enemy_king).lsb() {
                list.clear();
                list.push(Move::new(from, king));
                return true;
            }
            for to in (hits & capture_mask).iter() {
                if from_rank == promo_rank {
                    add_promotions(from, to, all_promotions, list);
                } else {
                    list.push(Move::new(from, to));
                }
            }
            if let Some(ep) = pos.en_passant()
                && hits.is_set(ep)
                && (push_mask == Bitboard::ALL || push_mask.is_empty() || push_mask.is_set(ep))
            {
                list.push(Move::new(from, ep));
            }
        }

        let to = Square((from.0 as i8 + push_dir) as u8);
        if !empty.is_set(to) {
            continue;
        }
        if from_rank == promo_rank {
            // Promotions by push count as captures for quiescence.
            if push_mask.is_set(to) || push_mask.is_empty() {
                add_promotions(from, to, all_promotions, list);
            }
            continue;
        }
        if push_mask.is_set(to) {
            list.push(Move::new(from, to));
        }
        if from_rank == start_rank {
            let to2 = Square((from.0 as i8 + push_dir * 2) as u8);
            if empty.is_set(to2) && push_mask.is_set(to2) {
                list.push(Move::new(from, to2));
            }
        }
    }
    false
}

fn add_promotions(from: Square, to: Square, all: bool, list: &mut MoveList) {
    list.push(Move::with_promotion(from, to, PieceType::Queen));
    list.push(Move::with_promotion(from, to, PieceType::Knight));
    if all {
        list.push(Move::with_promotion(from, to, PieceType::Rook));
        list.push(Move::with_promotion(from, to, PieceType::Bishop));
    }
}

fn castling_moves(pos: &Position, list: &mut MoveList) {
    let us = pos.side_to_move();
    let them = !us;
    let king = pos.king_sq(us);
    let occ = pos.all_occupied();
    let rights = pos.castling_rights();

    let (ks_right, qs_right, rank_base) = match us {
        Color::White => (
            CastlingRights::WHITE_KINGSIDE,
            CastlingRights::WHITE_QUEENSIDE,
            0u8,
        ),
        Color::Black => (
            CastlingRights::BLACK_KINGSIDE,
            CastlingRights::BLACK_QUEENSIDE,
            56u8,
        ),
    };
    if !rights.has(ks_right | qs_right) || pos.is_square_attacked(king, them) {
        return;
    }

    // Kingside: f and g empty and not attacked.
    if rights.has(ks_right) {
        let f_sq = Square(rank_base + 5);
        let g_sq = Square(rank_base + 6);
        if !occ.is_set(f_sq)
            && !occ.is_set(g_sq)
            && !pos.is_square_attacked(f_sq, them)
            && !pos.is_square_attacked(g_sq, them)
        {
            list.push(Move::new(king, g_sq));
        }
    }

    // Queenside: b, c, d empty; c and d not attacked.
    if rights.has(qs_right) {
        let b_sq = Square(rank_base + 1);
        let c_sq = Square(rank_base + 2);
        let d_sq = Square(rank_base + 3);
        if !occ.is_set(b_sq)
            && !occ.is_set(c_sq)
            && !occ.is_set(d_sq)
            && !pos.is_square_attacked(c_sq, them)
            && !pos.is_square_attacked(d_sq, them)
        {
            list.push(Move::new(king, c_sq));
        }
    }
}

/// Rook relocation for a king move that castles.
fn castling_rook_squares(mv: Move) -> Option<(Square, Square)> {
    match (mv.from.0, mv.to.0) {
        (4, 6) => Some((Square(7), Square(5))),
        (4, 2) => Some((Square(0), Square(3))),
        (60, 62) => Some((Square(63), Square(61))),
        (60, 58) => Some((Square(56), Square(59))),
        _ => None,
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

    fn count_legal(fen: &str) -> usize {
        legal_moves(&pos(fen)).len()
    }

    fn is_castle(p: &Position, mv: Move) -> bool {
        matches!(p.piece_at(mv.from), Some((_, PieceType::King))) && mv.from.file().abs_diff(mv.to.file()) == 2
    }

    fn sorted(list: &MoveList) -> Vec<String> {
        let mut v: Vec<String> = list.iter().map(|m| m.to_string()).collect();
        v.sort();
        v
    }

    const POSITIONS: [&str; 6] = [
        "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
        "r3k2r/p1ppqpb1/bn2pnp1/3PN3/1p2P3/2N2Q1p/PPPBBPPP/R3K2R w KQkq - 0 1",
        "8/2p5/3p4/KP5r/1R3p1k/8/4P1P1/8 w - - 0 1",
        "r3k2r/Pppp1ppp/1b3nbN/nP6/BBP1P3/q4N2/Pp1P2PP/R2Q1RK1 w kq - 0 1",
        "rnbq1k1r/pp1Pbppp/2p5/8/2B5/8/PPP1NnPP/RNBQK2R w KQ - 1 8",
        "4K3/8/8/R2pP2k/8/8/8/8 w - d6 0 2",
    ];

    // -------------------------------------------------------------------
    // MoveList
    // -------------------------------------------------------------------

    #[test]
    fn move_list_retain_and_select() {
        let mut list = MoveList::new();
        for (i, to) in ["a3", "b3", "c3", "d3"].iter().enumerate() {
            list.push(Move::new(sq("a2"), sq(to)));
            list.as_mut_slice()[i].score = i as i32 * 10;
        }
        list.retain(|m| m.to != sq("b3"));
        assert_eq!(list.len(), 3);
        list.select_best(0);
        assert_eq!(list.get(0).to, sq("d3"));
        assert!(list.contains(Move::new(sq("a2"), sq("c3"))));
        assert!(!list.contains(Move::new(sq("a2"), sq("b3"))));
    }

    // -------------------------------------------------------------------
    // Legal move counts
    // -------------------------------------------------------------------

    #[test]
    fn starting_position_has_20_moves() {
        assert_eq!(count_legal(POSITIONS[0]), 20);
    }

    #[test]
    fn kiwipete_48_moves() {
        assert_eq!(count_legal(POSITIONS[1]), 48);
    }

    #[test]
    fn position_3_14_moves() {
        assert_eq!(count_legal(POSITIONS[2]), 14);
    }

    #[test]
    fn position_4_6_moves() {
        assert_eq!(count_legal(POSITIONS[3]), 6);
    }

    #[test]
    fn position_5_44_moves() {
        assert_eq!(count_legal(POSITIONS[4]), 44);
    }

    // -------------------------------------------------------------------
    // Pawns
    // -------------------------------------------------------------------

    #[test]
    fn pawn_pushes_and_block() {
        let p = pos("4k3/8/8/8/8/8/4P3/4K3 w - - 0 1");
        assert_eq!(legal_moves_from(&p, sq("e2")).len(), 2);
        let p = pos("4k3/8/8/8/8/4p3/4P3/4K3 w - - 0 1");
        assert_eq!(legal_moves_from(&p, sq("e2")).len(), 0);
    }

    #[test]
    fn pawn_promotion_generates_all_four() {
        let p = pos("7k/4P3/8/8/8/8/8/4K3 w - - 0 1");
        let promos = legal_moves_from(&p, sq("e7"));
        assert_eq!(promos.len(), 4);
        assert!(promos.iter().all(|m| m.promotion.is_some()));
    }

    #[test]
    fn en_passant_move_generated() {
        let p = pos("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3");
        let moves = legal_moves(&p);
        let ep: Vec<Move> = moves.iter().filter(|&m| is_en_passant(&p, m)).collect();
        assert_eq!(ep, vec![Move::new(sq("e5"), sq("f6"))]);
    }

    // -------------------------------------------------------------------
    // Castling
    // -------------------------------------------------------------------

    #[test]
    fn castling_both_sides() {
        let p = pos("r3k2r/pppppppp/8/8/8/8/PPPPPPPP/R3K2R w KQkq - 0 1");
        assert_eq!(legal_moves(&p).iter().filter(|&m| is_castle(&p, m)).count(), 2);
    }

    #[test]
    fn castling_blocked() {
        let p = pos("r3k2r/pppppppp/8/8/8/8/PPPPPPPP/RN2K1NR w KQkq - 0 1");
        assert_eq!(legal_moves(&p).iter().filter(|&m| is_castle(&p, m)).count(), 0);
    }

    #[test]
    fn castling_through_check_forbidden() {
        let p = pos("4kr2/8/8/8/8/8/8/R3K2R w KQ - 0 1");
        let castles: Vec<Move> = legal_moves(&p).iter().filter(|&m| is_castle(&p, m)).collect();
        assert_eq!(castles, vec![Move::new(sq("e1"), sq("c1"))]);
    }

    #[test]
    fn no_castling_while_in_check() {
        let p = pos("4k3/8/8/8/8/8/8/R3K2r w Q - 0 1");
        assert_eq!(legal_moves(&p).iter().filter(|&m| is_castle(&p, m)).count(), 0);
    }

    // -------------------------------------------------------------------
    // King capture short circuit
    // -------------------------------------------------------------------

    #[test]
    fn king_capture_short_circuits_generation() {
        let mut p = pos("4k3/8/8/8/8/8/8/4K3 w - - 0 1");
        p.set_piece(sq("e4"), Some((Color::White, PieceType::Rook)));
        assert!(can_take_king(&p));
        let expected = Move::new(sq("e4"), sq("e8"));

        let all = pseudo_legal_moves(&p);
        assert_eq!(all.len(), 1);
        assert_eq!(all.get(0), expected);
        assert_eq!(pseudo_legal_captures(&p).get(0), expected);
        assert_eq!(pseudo_legal_captures_and_checks(&p).len(), 1);
    }

    #[test]
    fn pawn_king_capture_short_circuits() {
        let mut p = pos("8/8/8/3k4/8/8/8/4K3 w - - 0 1");
        p.set_piece(sq("e4"), Some((Color::White, PieceType::Pawn)));
        let all = pseudo_legal_moves(&p);
        assert_eq!(all.len(), 1);
        assert_eq!(all.get(0), Move::new(sq("e4"), sq("d5")));
    }

    // -------------------------------------------------------------------
    // Captures / checks
    // -------------------------------------------------------------------

    #[test]
    fn captures_are_a_subset_of_moves() {
        for fen in POSITIONS {
            let p = pos(fen);
            let all = pseudo_legal_moves(&p);
            for mv in pseudo_legal_captures(&p).iter() {
                assert!(all.contains(mv), "{mv} missing from full list in {fen}");
                assert!(is_capture(&p, mv) || mv.promotion.is_some());
            }
            let captures = all
                .iter()
                .filter(|&m| is_capture(&p, m) && m.promotion.is_none())
                .count();
            let generated = pseudo_legal_captures(&p)
                .iter()
                .filter(|&m| m.promotion.is_none())
                .count();
            assert_eq!(captures, generated, "capture count in {fen}");
        }
    }

    #[test]
    fn captures_and_checks_include_discovered_check() {
        let p = pos("4k3/8/8/8/8/8/4N3/4R1K1 w - - 0 1");
        let list = pseudo_legal_captures_and_checks(&p);
        assert!(list.contains(Move::new(sq("e2"), sq("c3"))));
        assert!(list.contains(Move::new(sq("e2"), sq("g3"))));
        assert!(!list.contains(Move::new(sq("g1"), sq("h1"))));
    }

    #[test]
    fn gives_check_direct_and_discovered() {
        let p = pos("4k3/8/8/8/8/8/8/R3K3 w Q - 0 1");
        assert!(gives_check(&p, Move::new(sq("a1"), sq("a8"))));
        assert!(!gives_check(&p, Move::new(sq("a1"), sq("a7"))));

        let p = pos("4k3/8/8/8/8/8/4N3/4R1K1 w - - 0 1");
        assert!(gives_check(&p, Move::new(sq("e2"), sq("c3"))));
        assert!(!gives_check(&p, Move::new(sq("g1"), sq("h1"))));
    }

    #[test]
    fn gives_check_by_castling() {
        let p = pos("5k2/8/8/8/8/8/8/4K2R w K - 0 1");
        assert!(gives_check(&p, Move::new(sq("e1"), sq("g1"))));
        assert!(!gives_check(&p, Move::new(sq("e1"), sq("f1"))));
    }

    #[test]
    fn gives_check_by_en_passant_discovery() {
        let p = pos("4K3/8/8/R2pP2k/8/8/8/8 w - d6 0 2");
        assert_eq!(p.en_passant(), Some(sq("d6")));
        assert!(gives_check(&p, Move::new(sq("e5"), sq("d6"))));
        assert!(!gives_check(&p, Move::new(sq("e5"), sq("e6"))));
    }

    #[test]
    fn gives_check_by_promotion() {
        let p = pos("1k6/4P3/8/8/8/8/8/4K3 w - - 0 1");
        let promo = |pt| Move::with_promotion(sq("e7"), sq("e8"), pt);
        assert!(gives_check(&p, promo(PieceType::Queen)));
        assert!(gives_check(&p, promo(PieceType::Rook)));
        assert!(!gives_check(&p, promo(PieceType::Bishop)));
        assert!(!gives_check(&p, promo(PieceType::Knight)));
    }

    #[test]
    fn gives_check_agrees_with_make_move() {
        for fen in POSITIONS {
            let p = pos(fen);
            for mv in legal_moves(&p).iter() {
                let mut child = p.clone();
                child.make_move(mv);
                assert_eq!(gives_check(&p, mv), in_check(&child), "{mv} in {fen}");
            }
        }
    }

    // -------------------------------------------------------------------
    // Evasions
    // -------------------------------------------------------------------

    fn legal_evasions(p: &Position) -> MoveList {
        let mut scratch = p.clone();
        let mut list = check_evasions(p);
        remove_illegal(&mut scratch, &mut list);
        list
    }

    #[test]
    fn evasions_match_legal_moves() {
        for fen in [
            "4k3/8/8/8/8/8/8/R3K2q w Q - 0 1",
            "rnbqkbnr/ppp2ppp/8/1B1pp3/4P3/8/PPPP1PPP/RNBQK1NR b KQkq - 1 3",
            "8/8/8/2k5/3Pp3/8/8/4K3 b - d3 0 1",
            "k7/4r3/8/8/8/3n4/8/4K3 w - - 0 1",
            "r3k2r/p1pp1pb1/bn2Qnp1/2qPN3/1p2P3/2N5/PPPBBPPP/R3K2R b KQkq - 3 2",
        ] {
            let p = pos(fen);
            assert!(in_check(&p), "{fen} should be check");
            assert_eq!(sorted(&legal_evasions(&p)), sorted(&legal_moves(&p)), "{fen}");
        }
    }

    #[test]
    fn double_check_allows_only_king_moves() {
        let p = pos("k7/4r3/8/8/8/3n4/8/4K3 w - - 0 1");
        let evasions = check_evasions(&p);
        assert!(evasions.iter().all(|m| m.from == sq("e1")));
        assert_eq!(legal_evasions(&p).len(), 3);
    }

    #[test]
    fn evasions_short_circuit_on_king_capture() {
        // Black's Ng3+ is illegal: the knight was pinned by the e1 rook.
        let mut p = pos("4k3/8/q7/5p2/4n3/8/6PN/Q3R1BK w - - 0 1");
        p.make_move(Move::new(sq("a1"), sq("a6")));
        p.make_move(Move::new(sq("e4"), sq("g3")));
        assert!(in_check(&p));
        assert!(can_take_king(&p));
        assert_eq!(sorted(&check_evasions(&p)), vec!["e1e8"]);
    }

    #[test]
    fn double_check_evasions_short_circuit_on_king_capture() {
        let mut p = pos("k7/4r3/8/8/8/3n4/8/4K3 w - - 0 1");
        p.set_piece(sq("a1"), Some((Color::White, PieceType::Rook)));
        assert!(sq_attacked(&p, sq("a8"), Color::White));
        let evasions = check_evasions(&p);
        assert_eq!(evasions.len(), 1);
        assert_eq!(evasions.get(0), Move::new(sq("a1"), sq("a8")));

        let mut p = pos("8/8/8/8/k7/3n4/4r3/4K3 w - - 0 1");
        p.set_piece(sq("b3"), Some((Color::White, PieceType::Pawn)));
        let evasions = check_evasions(&p);
        assert_eq!(evasions.len(), 1);
        assert_eq!(evasions.get(0), Move::new(sq("b3"), sq("a4")));
    }

    #[test]
    fn en_passant_evades_pawn_check() {
        let p = pos("8/8/8/2k5/3Pp3/8/8/4K3 b - d3 0 1");
        assert_eq!(p.en_passant(), Some(sq("d3")));
        assert!(check_evasions(&p).contains(Move::new(sq("e4"), sq("d3"))));
    }

    // -------------------------------------------------------------------
    // Make / unmake across every legal move
    // -------------------------------------------------------------------

    #[test]
    fn make_unmake_restores_everything() {
        for fen in POSITIONS {
            let p = pos(fen);
            for mv in legal_moves(&p).iter() {
                let mut copy = p.clone();
                let undo = copy.make_move(mv);
                copy.assert_consistent();
                copy.unmake_move(mv, &undo);
                assert_eq!(copy, p, "state mismatch after make/unmake of {mv} in {fen}");
            }
        }
    }

    #[test]
    fn fixup_clears_unusable_ep_square() {
        let mut p = pos("4k3/8/8/8/3P4/8/8/4K3 b - - 0 1");
        p.set_en_passant(Some(sq("d3")));
        fixup_ep_square(&mut p);
        assert_eq!(p.en_passant(), None);
        assert_eq!(p.zobrist_hash(), p.compute_zobrist());
    }

    #[test]
    fn perft_and_divide_agree() {
        let mut p = pos(POSITIONS[1]);
        let split = divide(&mut p, 2);
        assert_eq!(split.len(), 48);
        assert_eq!(split.iter().map(|(_, n)| n).sum::<u64>(), perft(&mut p, 2));
        assert_eq!(perft(&mut p, 2), 2_039);
    }
}
