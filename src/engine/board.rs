//! Bitboard-based chess position representation.
//!
//! `Position` stores piece placement twice: as 12 bitboards (2 colours × 6
//! piece types) with redundant occupancy boards, and as a 64-entry mailbox
//! for O(1) square lookups. Alongside sit side to move, castling rights,
//! en-passant square, move counters, cached king squares and an incremental
//! Zobrist hash.

use crate::engine::attacks;
use crate::engine::movegen;
use crate::engine::types::{Bitboard, CastlingRights, Color, Move, PieceType, Square};
use crate::engine::zobrist;

// ---------------------------------------------------------------------------
// UndoInfo: saved state for reversing a move
// ---------------------------------------------------------------------------

/// State saved by `make_move` and consumed by the matching `unmake_move`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UndoInfo {
    pub captured_piece: Option<PieceType>,
    pub castling_rights: CastlingRights,
    pub en_passant: Option<Square>,
    pub halfmove_clock: u16,
    pub zobrist_hash: u64,
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// A complete chess position.
///
/// Board layout follows LERF (Little-Endian Rank-File) mapping:
/// a1 = 0, b1 = 1, … h1 = 7, a2 = 8, … h8 = 63.
///
/// Full equality (`==`) includes the move counters; use
/// [`Position::draw_rule_equals`] for repetition checks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Position {
    /// Piece bitboards: `pieces[color][piece_type]`.
    pieces: [[Bitboard; PieceType::COUNT]; 2],
    /// Per-colour occupancy.
    occupied: [Bitboard; 2],
    /// Total occupancy.
    all_occupied: Bitboard,
    /// Square-indexed piece lookup, kept in sync with the bitboards.
    mailbox: [Option<(Color, PieceType)>; 64],
    side_to_move: Color,
    castling_rights: CastlingRights,
    /// En-passant target square (the square *behind* the double-pushed pawn).
    en_passant: Option<Square>,
    /// Half-move clock for the 50-move rule (reset on pawn move or capture).
    halfmove_clock: u16,
    /// Full-move number, incremented after Black moves.
    fullmove_number: u16,
    zobrist_hash: u64,
    king_squares: [Option<Square>; 2],
}

// ---------------------------------------------------------------------------
// Construction and accessors
// ---------------------------------------------------------------------------

impl Position {
    /// Create an empty board with no pieces.
    pub fn empty() -> Self {
        Position {
            pieces: [[Bitboard::EMPTY; PieceType::COUNT]; 2],
            occupied: [Bitboard::EMPTY; 2],
            all_occupied: Bitboard::EMPTY,
            mailbox: [None; 64],
            side_to_move: Color::White,
            castling_rights: CastlingRights::NONE,
            en_passant: None,
            halfmove_clock: 0,
            fullmove_number: 1,
            zobrist_hash: 0,
            king_squares: [None; 2],
        }
    }

    /// Standard starting position.
    pub fn starting() -> Self {
        Self::from_fen(START_FEN).expect("starting FEN is always valid")
    }

    #[inline]
    pub fn side_to_move(&self) -> Color {
        self.side_to_move
    }

    #[inline]
    pub fn castling_rights(&self) -> CastlingRights {
        self.castling_rights
    }

    #[inline]
    pub fn en_passant(&self) -> Option<Square> {
        self.en_passant
    }

    #[inline]
    pub fn halfmove_clock(&self) -> u16 {
        self.halfmove_clock
    }

    #[inline]
    pub fn fullmove_number(&self) -> u16 {
        self.fullmove_number
    }

    /// Incrementally maintained Zobrist hash.
    #[inline]
    pub fn zobrist_hash(&self) -> u64 {
        self.zobrist_hash
    }

    /// Bitboard of all pieces of a given colour and type.
    #[inline]
    pub fn bb(&self, color: Color, piece: PieceType) -> Bitboard {
        self.pieces[color.index()][piece.index()]
    }

    /// All pieces of one colour.
    #[inline]
    pub fn occupied(&self, color: Color) -> Bitboard {
        self.occupied[color.index()]
    }

    #[inline]
    pub fn all_occupied(&self) -> Bitboard {
        self.all_occupied
    }

    /// Bitboard of friendly (side-to-move) pieces.
    #[inline]
    pub fn friendly(&self) -> Bitboard {
        self.occupied[self.side_to_move.index()]
    }

    /// Bitboard of enemy pieces.
    #[inline]
    pub fn enemy(&self) -> Bitboard {
        self.occupied[(!self.side_to_move).index()]
    }

    /// What piece (if any) is on a given square?
    #[inline]
    pub fn piece_at(&self, sq: Square) -> Option<(Color, PieceType)> {
        self.mailbox[sq.index()]
    }

    /// Cached king square for the given colour.
    #[inline]
    pub fn king_sq(&self, color: Color) -> Square {
        self.king_squares[color.index()].expect("king must exist")
    }

    /// Non-king material of one side in centipawns.
    pub fn material(&self, color: Color) -> i32 {
        PieceType::ALL[..5]
            .iter()
            .map(|&pt| self.bb(color, pt).pop_count() as i32 * pt.value())
            .sum()
    }

    /// Pawn material of one side in centipawns.
    #[inline]
    pub fn pawn_material(&self, color: Color) -> i32 {
        self.bb(color, PieceType::Pawn).pop_count() as i32 * PieceType::Pawn.value()
    }

    // -----------------------------------------------------------------------
    // Setters that keep the hash in sync
    // -----------------------------------------------------------------------

    /// Put `piece` on `sq`, replacing whatever was there. `None` clears the
    /// square. Updates bitboards, mailbox, hash and king cache.
    pub fn set_piece(&mut self, sq: Square, piece: Option<(Color, PieceType)>) {
        let zk = zobrist::keys();
        if let Some((color, pt)) = self.mailbox[sq.index()] {
            self.remove_piece(sq, color, pt);
            self.zobrist_hash ^= zk.piece_key(color, pt, sq);
        }
        if let Some((color, pt)) = piece {
            self.put_piece(sq, color, pt);
            self.zobrist_hash ^= zk.piece_key(color, pt, sq);
        }
    }

    pub fn set_side_to_move(&mut self, color: Color) {
        if color != self.side_to_move {
            self.zobrist_hash ^= zobrist::keys().side_to_move;
            self.side_to_move = color;
        }
    }

    pub fn set_castling_rights(&mut self, rights: CastlingRights) {
        let zk = zobrist::keys();
        self.zobrist_hash ^= zk.castling_key(self.castling_rights.0);
        self.castling_rights = rights;
        self.zobrist_hash ^= zk.castling_key(rights.0);
    }

    pub fn set_en_passant(&mut self, ep: Option<Square>) {
        let zk = zobrist::keys();
        if let Some(old) = self.en_passant {
            self.zobrist_hash ^= zk.ep_key(old.file());
        }
        self.en_passant = ep;
        if let Some(new) = ep {
            self.zobrist_hash ^= zk.ep_key(new.file());
        }
    }

    pub fn set_halfmove_clock(&mut self, clock: u16) {
        self.halfmove_clock = clock;
    }

    // -----------------------------------------------------------------------
    // Piece manipulation (low-level, hash untouched)
    // -----------------------------------------------------------------------

    #[inline]
    fn put_piece(&mut self, sq: Square, color: Color, piece: PieceType) {
        let bb = Bitboard::from_square(sq);
        self.pieces[color.index()][piece.index()] |= bb;
        self.occupied[color.index()] |= bb;
        self.all_occupied |= bb;
        self.mailbox[sq.index()] = Some((color, piece));
        if piece == PieceType::King {
            self.king_squares[color.index()] = Some(sq);
        }
    }

    #[inline]
    fn remove_piece(&mut self, sq: Square, color: Color, piece: PieceType) {
        let bb = !Bitboard::from_square(sq);
        self.pieces[color.index()][piece.index()] &= bb;
        self.occupied[color.index()] &= bb;
        self.all_occupied &= bb;
        self.mailbox[sq.index()] = None;
        if piece == PieceType::King && self.king_squares[color.index()] == Some(sq) {
            self.king_squares[color.index()] = None;
        }
    }

    /// Like `piece_at` but for a known colour; panics if the square is empty.
    #[inline]
    fn piece_type_at(&self, sq: Square, color: Color) -> PieceType {
        match self.mailbox[sq.index()] {
            Some((c, pt)) if c == color => pt,
            _ => panic!(
                "no {} piece found on {} (board:\n{})",
                color,
                sq,
                self.board_string()
            ),
        }
    }

    // -----------------------------------------------------------------------
    // Zobrist hash computation (full recompute)
    // -----------------------------------------------------------------------

    /// Compute the Zobrist hash from scratch.
    pub fn compute_zobrist(&self) -> u64 {
        let zk = zobrist::keys();
        let mut hash = 0u64;

        for s in 0..64u8 {
            if let Some((color, pt)) = self.mailbox[s as usize] {
                hash ^= zk.piece_key(color, pt, Square(s));
            }
        }
        if self.side_to_move == Color::Black {
            hash ^= zk.side_to_move;
        }
        hash ^= zk.castling_key(self.castling_rights.0);
        if let Some(ep_sq) = self.en_passant {
            hash ^= zk.ep_key(ep_sq.file());
        }
        hash
    }

    /// Verify that every redundant representation agrees.
    #[cfg(any(debug_assertions, test))]
    pub fn assert_consistent(&self) {
        for color in [Color::White, Color::Black] {
            let mut expected = Bitboard::EMPTY;
            for &pt in &PieceType::ALL {
                expected |= self.pieces[color.index()][pt.index()];
            }
            assert_eq!(
                self.occupied[color.index()],
                expected,
                "occupancy mismatch for {color:?}",
            );
            assert_eq!(
                self.king_squares[color.index()],
                self.bb(color, PieceType::King).lsb(),
                "king cache mismatch for {color:?}",
            );
        }
        assert_eq!(
            self.all_occupied,
            self.occupied[0] | self.occupied[1],
            "all_occupied mismatch",
        );
        for s in 0..64u8 {
            let sq = Square(s);
            let from_bitboards = [Color::White, Color::Black].iter().find_map(|&c| {
                PieceType::ALL
                    .iter()
                    .find(|&&pt| self.bb(c, pt).is_set(sq))
                    .map(|&pt| (c, pt))
            });
            assert_eq!(self.mailbox[s as usize], from_bitboards, "mailbox mismatch on {sq}");
        }
        assert_eq!(self.zobrist_hash, self.compute_zobrist(), "hash mismatch");
    }

    // -----------------------------------------------------------------------
    // Attack detection
    // -----------------------------------------------------------------------

    /// Is `sq` attacked by any piece of colour `by`?
    pub fn is_square_attacked(&self, sq: Square, by: Color) -> bool {
        let t = attacks::tables();
        let occ = self.all_occupied;

        // Squares from which a pawn of `by` would attack `sq`.
        if (t.pawn_attacks(!by, sq) & self.bb(by, PieceType::Pawn)).is_not_empty() {
            return true;
        }
        if (t.knight_attacks(sq) & self.bb(by, PieceType::Knight)).is_not_empty() {
            return true;
        }
        if (t.king_attacks(sq) & self.bb(by, PieceType::King)).is_not_empty() {
            return true;
        }
        let rook_queen = self.bb(by, PieceType::Rook) | self.bb(by, PieceType::Queen);
        if (t.rook_attacks(sq, occ) & rook_queen).is_not_empty() {
            return true;
        }
        let bishop_queen = self.bb(by, PieceType::Bishop) | self.bb(by, PieceType::Queen);
        (t.bishop_attacks(sq, occ) & bishop_queen).is_not_empty()
    }

    /// Is the side-to-move's king currently in check?
    #[inline]
    pub fn is_in_check(&self) -> bool {
        let king = self.king_sq(self.side_to_move);
        self.is_square_attacked(king, !self.side_to_move)
    }

    // -----------------------------------------------------------------------
    // Make / unmake
    // -----------------------------------------------------------------------

    /// Apply a pseudo-legal move. Returns the `UndoInfo` that
    /// `unmake_move` needs to reverse it.
    ///
    /// Castling, en passant and captures are recognised from the board. The
    /// new en-passant square is only recorded when an enemy pawn stands next
    /// to the double-pushed pawn; whether that capture is actually legal is
    /// checked later by [`movegen::fixup_ep_square`].
    pub fn make_move(&mut self, mv: Move) -> UndoInfo {
        let zk = zobrist::keys();
        let us = self.side_to_move;
        let them = !us;

        let moving_piece = self.piece_type_at(mv.from, us);
        let captured = self.mailbox[mv.to.index()].map(|(_, pt)| pt);

        let undo = UndoInfo {
            captured_piece: captured,
            castling_rights: self.castling_rights,
            en_passant: self.en_passant,
            halfmove_clock: self.halfmove_clock,
            zobrist_hash: self.zobrist_hash,
        };

        // ---- Clear old en passant and castling from the hash ----
        if let Some(ep) = self.en_passant.take() {
            self.zobrist_hash ^= zk.ep_key(ep.file());
        }
        self.zobrist_hash ^= zk.castling_key(self.castling_rights.0);

        // ---- Captures ----
        if let Some(cap_piece) = captured {
            self.remove_piece(mv.to, them, cap_piece);
            self.zobrist_hash ^= zk.piece_key(them, cap_piece, mv.to);
        } else if moving_piece == PieceType::Pawn && undo.en_passant == Some(mv.to) {
            let cap_sq = ep_victim_square(mv.to, us);
            self.remove_piece(cap_sq, them, PieceType::Pawn);
            self.zobrist_hash ^= zk.piece_key(them, PieceType::Pawn, cap_sq);
        }

        // ---- Move the piece ----
        self.remove_piece(mv.from, us, moving_piece);
        self.zobrist_hash ^= zk.piece_key(us, moving_piece, mv.from);

        let landing_piece = mv.promotion.unwrap_or(moving_piece);
        self.put_piece(mv.to, us, landing_piece);
        self.zobrist_hash ^= zk.piece_key(us, landing_piece, mv.to);

        // ---- Castling: move the rook ----
        if moving_piece == PieceType::King
            && let Some((rook_from, rook_to)) = castling_rook_squares(mv.from, mv.to)
        {
            self.remove_piece(rook_from, us, PieceType::Rook);
            self.zobrist_hash ^= zk.piece_key(us, PieceType::Rook, rook_from);
            self.put_piece(rook_to, us, PieceType::Rook);
            self.zobrist_hash ^= zk.piece_key(us, PieceType::Rook, rook_to);
        }

        // ---- Castling rights ----
        // Moving king or rook, or capturing on a rook's home square.
        self.castling_rights.0 &= CASTLING_MASK[mv.from.index()];
        self.castling_rights.0 &= CASTLING_MASK[mv.to.index()];
        self.zobrist_hash ^= zk.castling_key(self.castling_rights.0);

        // ---- Double pawn push ----
        if moving_piece == PieceType::Pawn && mv.from.0.abs_diff(mv.to.0) == 16 {
            let ep_sq = Square((mv.from.0 + mv.to.0) / 2);
            let adjacent = attacks::tables().pawn_attacks(us, ep_sq) & self.bb(them, PieceType::Pawn);
            if adjacent.is_not_empty() {
                self.en_passant = Some(ep_sq);
                self.zobrist_hash ^= zk.ep_key(ep_sq.file());
            }
        }

        // ---- Clocks ----
        if moving_piece == PieceType::Pawn || captured.is_some() {
            self.halfmove_clock = 0;
        } else {
            self.halfmove_clock = self.halfmove_clock.saturating_add(1);
        }
        if us == Color::Black {
            self.fullmove_number = self.fullmove_number.saturating_add(1);
        }

        self.side_to_move = them;
        self.zobrist_hash ^= zk.side_to_move;

        undo
    }

    /// Reverse a move previously applied with `make_move`. Calls must come
    /// in LIFO order with the exact `UndoInfo` returned by the matching make.
    pub fn unmake_move(&mut self, mv: Move, undo: &UndoInfo) {
        let them = self.side_to_move;
        let us = !them;
        self.side_to_move = us;

        let landing_piece = self.piece_type_at(mv.to, us);
        let original_piece = if mv.promotion.is_some() {
            PieceType::Pawn
        } else {
            landing_piece
        };

        self.remove_piece(mv.to, us, landing_piece);
        self.put_piece(mv.from, us, original_piece);

        if let Some(cap_piece) = undo.captured_piece {
            self.put_piece(mv.to, them, cap_piece);
        } else if original_piece == PieceType::Pawn && undo.en_passant == Some(mv.to) {
            self.put_piece(ep_victim_square(mv.to, us), them, PieceType::Pawn);
        }

        if original_piece == PieceType::King
            && let Some((rook_from, rook_to)) = castling_rook_squares(mv.from, mv.to)
        {
            self.remove_piece(rook_to, us, PieceType::Rook);
            self.put_piece(rook_from, us, PieceType::Rook);
        }

        self.castling_rights = undo.castling_rights;
        self.en_passant = undo.en_passant;
        self.halfmove_clock = undo.halfmove_clock;
        self.zobrist_hash = undo.zobrist_hash;

        if us == Color::Black {
            self.fullmove_number = self.fullmove_number.saturating_sub(1);
        }
    }

    /// Pass the turn without moving (null-move pruning). Clears the
    /// en-passant square.
    pub fn make_null_move(&mut self) -> UndoInfo {
        let zk = zobrist::keys();
        let undo = UndoInfo {
            captured_piece: None,
            castling_rights: self.castling_rights,
            en_passant: self.en_passant,
            halfmove_clock: self.halfmove_clock,
            zobrist_hash: self.zobrist_hash,
        };
        if let Some(ep) = self.en_passant.take() {
            self.zobrist_hash ^= zk.ep_key(ep.file());
        }
        self.side_to_move = !self.side_to_move;
        self.zobrist_hash ^= zk.side_to_move;
        undo
    }

    /// Reverse [`Position::make_null_move`].
    pub fn unmake_null_move(&mut self, undo: &UndoInfo) {
        self.side_to_move = !self.side_to_move;
        self.en_passant = undo.en_passant;
        self.zobrist_hash = undo.zobrist_hash;
    }

    /// Same placement, side to move, castling rights and en-passant square.
    /// Move counters are ignored. This is the equality used for repetition.
    pub fn draw_rule_equals(&self, other: &Position) -> bool {
        self.mailbox == other.mailbox
            && self.side_to_move == other.side_to_move
            && self.castling_rights == other.castling_rights
            && self.en_passant == other.en_passant
    }

    // -----------------------------------------------------------------------
    // Board display (8×8 text grid)
    // -----------------------------------------------------------------------

    /// Render the board as an 8-line string (rank 8 at top), useful for debugging.
    pub fn board_string(&self) -> String {
        let mut s = String::with_capacity(200);
        for rank in (0..8).rev() {
            s.push((b'1' + rank) as char);
            s.push(' ');
            for file in 0..8 {
                let sq = Square::from_file_rank(file, rank);
                let ch = match self.piece_at(sq) {
                    Some((c, p)) => p.to_char(c),
                    None => '.',
                };
                s.push(ch);
                if file < 7 {
                    s.push(' ');
                }
            }
            s.push('\n');
        }
        s.push_str("  a b c d e f g h");
        s
    }
}

// ---------------------------------------------------------------------------
// Castling and en-passant helpers
// ---------------------------------------------------------------------------

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Square of the pawn removed by an en-passant capture landing on `ep`.
#[inline]
fn ep_victim_square(ep: Square, capturer: Color) -> Square {
    match capturer {
        Color::White => Square(ep.0 - 8),
        Color::Black => Square(ep.0 + 8),
    }
}

/// For a castling king move, return (rook_from, rook_to). `None` when the
/// king move is not a castling move.
fn castling_rook_squares(king_from: Square, king_to: Square) -> Option<(Square, Square)> {
    match (king_from.0, king_to.0) {
        (4, 6) => Some((Square(7), Square(5))),
        (4, 2) => Some((Square(0), Square(3))),
        (60, 62) => Some((Square(63), Square(61))),
        (60, 58) => Some((Square(56), Square(59))),
        _ => None,
    }
}

/// Mask table indexed by square index. When a move touches a square, AND the
/// castling rights with this mask.
#[rustfmt::skip]
const CASTLING_MASK: [u8; 64] = {
    let mut mask = [0b1111u8; 64];
    mask[0]  = 0b1111 & !CastlingRights::WHITE_QUEENSIDE;
    mask[4]  = 0b1111 & !(CastlingRights::WHITE_KINGSIDE | CastlingRights::WHITE_QUEENSIDE);
    mask[7]  = 0b1111 & !CastlingRights::WHITE_KINGSIDE;
    mask[56] = 0b1111 & !CastlingRights::BLACK_QUEENSIDE;
    mask[60] = 0b1111 & !(CastlingRights::BLACK_KINGSIDE | CastlingRights::BLACK_QUEENSIDE);
    mask[63] = 0b1111 & !CastlingRights::BLACK_KINGSIDE;
    mask
};

// ---------------------------------------------------------------------------
// FEN errors
// ---------------------------------------------------------------------------

/// What went wrong while reading a FEN string.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum FenErrorKind {
    #[error("expected between 2 and 6 space-separated fields")]
    FieldCount,
    #[error("piece placement is not 8 ranks of 8 squares")]
    BadRankLayout,
    #[error("invalid piece character '{0}'")]
    InvalidPiece(char),
    #[error("side to move must be 'w' or 'b'")]
    InvalidSide,
    #[error("invalid castling flags")]
    InvalidCastling,
    #[error("invalid en passant square")]
    InvalidEnPassant,
    #[error("invalid move counter")]
    InvalidCounter,
    #[error("{0} must have exactly one king")]
    KingCount(Color),
    #[error("{0} has too many pawns")]
    TooManyPawns(Color),
    #[error("{0} has too many pieces")]
    TooManyPieces(Color),
    #[error("pawn on the first or last rank")]
    PawnOnBackRank,
    #[error("the side not to move is in check")]
    KingCapturable,
}

/// FEN parse failure. Once piece placement has been read, the partially
/// built position rides along for callers such as board editors.
#[derive(Debug, thiserror::Error)]
#[error("invalid FEN: {kind}")]
pub struct FenError {
    pub kind: FenErrorKind,
    pub position: Option<Box<Position>>,
}

impl FenError {
    fn bare(kind: FenErrorKind) -> Self {
        FenError {
            kind,
            position: None,
        }
    }

    fn with_position(kind: FenErrorKind, pos: &Position) -> Self {
        let mut partial = pos.clone();
        partial.zobrist_hash = partial.compute_zobrist();
        FenError {
            kind,
            position: Some(Box::new(partial)),
        }
    }
}

// ---------------------------------------------------------------------------
// FEN parsing & generation
// ---------------------------------------------------------------------------

impl Position {
    /// Parse a FEN string into a `Position`.
    ///
    /// Only placement and side to move are mandatory; missing castling,
    /// en-passant and counter fields default to `-`, `-`, `0` and `1`.
    /// Castling flags without the matching king and rook on their home
    /// squares are dropped, and an en-passant square is kept only if an
    /// en-passant capture is actually legal.
    pub fn from_fen(fen: &str) -> Result<Self, FenError> {
        let fields: Vec<&str> = fen.split_whitespace().collect();
        if !(2..=6).contains(&fields.len()) {
            return Err(FenError::bare(FenErrorKind::FieldCount));
        }

        let mut pos = Position::empty();

        // ----- Field 1: Piece placement -----
        let ranks: Vec<&str> = fields[0].split('/').collect();
        if ranks.len() != 8 {
            return Err(FenError::with_position(FenErrorKind::BadRankLayout, &pos));
        }
        for (rank_idx, rank_str) in ranks.iter().enumerate() {
            let rank = 7 - rank_idx as u8;
            let mut file: u8 = 0;
            for ch in rank_str.chars() {
                if let Some(digit) = ch.to_digit(10) {
                    if !(1..=8).contains(&digit) {
                        return Err(FenError::with_position(FenErrorKind::InvalidPiece(ch), &pos));
                    }
                    file += digit as u8;
                } else if let Some((color, piece)) = PieceType::from_char(ch) {
                    if file > 7 {
                        return Err(FenError::with_position(FenErrorKind::BadRankLayout, &pos));
                    }
                    if piece == PieceType::Pawn && (rank == 0 || rank == 7) {
                        return Err(FenError::with_position(FenErrorKind::PawnOnBackRank, &pos));
                    }
                    pos.put_piece(Square::from_file_rank(file, rank), color, piece);
                    file += 1;
                } else {
                    return Err(FenError::with_position(FenErrorKind::InvalidPiece(ch), &pos));
                }
                if file > 8 {
                    return Err(FenError::with_position(FenErrorKind::BadRankLayout, &pos));
                }
            }
            if file != 8 {
                return Err(FenError::with_position(FenErrorKind::BadRankLayout, &pos));
            }
        }

        // ----- Field 2: Side to move -----
        pos.side_to_move = match fields[1] {
            "w" => Color::White,
            "b" => Color::Black,
            _ => return Err(FenError::with_position(FenErrorKind::InvalidSide, &pos)),
        };

        // ----- Field 3: Castling availability -----
        let castling = fields.get(2).copied().unwrap_or("-");
        pos.castling_rights = CastlingRights::from_fen(castling)
            .ok_or_else(|| FenError::with_position(FenErrorKind::InvalidCastling, &pos))?;
        pos.remove_bogus_castle_flags();

        // ----- Field 4: En passant target square -----
        let ep = fields.get(3).copied().unwrap_or("-");
        if ep != "-" {
            let ep_sq = Square::from_algebraic(ep)
                .ok_or_else(|| FenError::with_position(FenErrorKind::InvalidEnPassant, &pos))?;
            if pos.ep_square_plausible(ep_sq) {
                pos.en_passant = Some(ep_sq);
            }
        }

        // ----- Fields 5 and 6: counters -----
        if let Some(clock) = fields.get(4) {
            pos.halfmove_clock = clock
                .parse()
                .map_err(|_| FenError::with_position(FenErrorKind::InvalidCounter, &pos))?;
        }
        if let Some(number) = fields.get(5) {
            pos.fullmove_number = number
                .parse()
                .map_err(|_| FenError::with_position(FenErrorKind::InvalidCounter, &pos))?;
        }

        // ----- Material sanity -----
        for color in [Color::White, Color::Black] {
            if pos.bb(color, PieceType::King).pop_count() != 1 {
                return Err(FenError::with_position(FenErrorKind::KingCount(color), &pos));
            }
        }
        for color in [Color::White, Color::Black] {
            let count = |pt: PieceType| pos.bb(color, pt).pop_count() as i32;
            let pawns = count(PieceType::Pawn);
            if pawns > 8 {
                return Err(FenError::with_position(FenErrorKind::TooManyPawns(color), &pos));
            }
            // Every officer beyond the initial set must come from a promotion.
            let promoted = (count(PieceType::Knight) - 2).max(0)
                + (count(PieceType::Bishop) - 2).max(0)
                + (count(PieceType::Rook) - 2).max(0)
                + (count(PieceType::Queen) - 1).max(0);
            if pawns + promoted > 8 {
                return Err(FenError::with_position(FenErrorKind::TooManyPieces(color), &pos));
            }
        }

        let them = !pos.side_to_move;
        if pos.is_square_attacked(pos.king_sq(them), pos.side_to_move) {
            return Err(FenError::with_position(FenErrorKind::KingCapturable, &pos));
        }

        pos.zobrist_hash = pos.compute_zobrist();
        movegen::fixup_ep_square(&mut pos);

        #[cfg(debug_assertions)]
        pos.assert_consistent();

        Ok(pos)
    }

    /// Drop castling flags whose king or rook is not on its home square.
    fn remove_bogus_castle_flags(&mut self) {
        let has = |sq: u8, color: Color, pt: PieceType| self.mailbox[sq as usize] == Some((color, pt));
        let mut valid = 0u8;
        if has(4, Color::White, PieceType::King) {
            if has(7, Color::White, PieceType::Rook) {
                valid |= CastlingRights::WHITE_KINGSIDE;
            }
            if has(0, Color::White, PieceType::Rook) {
                valid |= CastlingRights::WHITE_QUEENSIDE;
            }
        }
        if has(60, Color::Black, PieceType::King) {
            if has(63, Color::Black, PieceType::Rook) {
                valid |= CastlingRights::BLACK_KINGSIDE;
            }
            if has(56, Color::Black, PieceType::Rook) {
                valid |= CastlingRights::BLACK_QUEENSIDE;
            }
        }
        self.castling_rights.0 &= valid;
    }

    /// An en-passant square read from FEN must be empty, sit on the right
    /// rank, and have the double-pushed enemy pawn in front of it.
    fn ep_square_plausible(&self, ep_sq: Square) -> bool {
        let (rank, pusher) = match self.side_to_move {
            Color::White => (5, Color::Black),
            Color::Black => (2, Color::White),
        };
        ep_sq.rank() == rank
            && self.mailbox[ep_sq.index()].is_none()
            && self.mailbox[ep_victim_square(ep_sq, !pusher).index()]
                == Some((pusher, PieceType::Pawn))
    }

    /// Export the position as a FEN string.
    pub fn to_fen(&self) -> String {
        let mut fen = String::with_capacity(80);

        for rank in (0..8).rev() {
            let mut empty_count = 0u8;
            for file in 0..8 {
                let sq = Square::from_file_rank(file, rank);
                match self.piece_at(sq) {
                    Some((color, piece)) => {
                        if empty_count > 0 {
                            fen.push((b'0' + empty_count) as char);
                            empty_count = 0;
                        }
                        fen.push(piece.to_char(color));
                    }
                    None => {
                        empty_count += 1;
                    }
                }
            }
            if empty_count > 0 {
                fen.push((b'0' + empty_count) as char);
            }
            if rank > 0 {
                fen.push('/');
            }
        }

        fen.push(' ');
        fen.push(match self.side_to_move {
            Color::White => 'w',
            Color::Black => 'b',
        });

        fen.push(' ');
        fen.push_str(&self.castling_rights.to_fen());

        fen.push(' ');
        match self.en_passant {
            Some(sq) => fen.push_str(&sq.to_algebraic()),
            None => fen.push('-'),
        }

        fen.push(' ');
        fen.push_str(&self.halfmove_clock.to_string());
        fen.push(' ');
        fen.push_str(&self.fullmove_number.to_string());

        fen
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.board_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
