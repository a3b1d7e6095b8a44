use std::fmt;

use crate::engine::board::FenError;

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// The two sides in a chess game.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// Index for array lookups: White=0, Black=1.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Color::White => "white",
            Color::Black => "black",
        }
    }
}

impl std::ops::Not for Color {
    type Output = Self;
    fn not(self) -> Self {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PieceType
// ---------------------------------------------------------------------------

/// The six piece kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PieceType {
    Pawn,
    Knight,
    Bishop,
    Rook,
    Queen,
    King,
}

impl PieceType {
    /// All piece types in order.
    pub const ALL: [PieceType; 6] = [
        PieceType::Pawn,
        PieceType::Knight,
        PieceType::Bishop,
        PieceType::Rook,
        PieceType::Queen,
        PieceType::King,
    ];

    /// Promotion choices, strongest first.
    pub const PROMOTIONS: [PieceType; 4] = [
        PieceType::Queen,
        PieceType::Rook,
        PieceType::Bishop,
        PieceType::Knight,
    ];

    /// Number of piece types.
    pub const COUNT: usize = 6;

    /// Index for array lookups: Pawn=0 .. King=5.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Material value in centipawns. The king's value is a sentinel that
    /// only static exchange evaluation looks at.
    #[inline]
    pub const fn value(self) -> i32 {
        match self {
            PieceType::Pawn => 100,
            PieceType::Knight => 320,
            PieceType::Bishop => 330,
            PieceType::Rook => 500,
            PieceType::Queen => 900,
            PieceType::King => 9900,
        }
    }

    /// Lowercase FEN letter, indexed like `ALL`.
    const LETTERS: [u8; 6] = *b"pnbrqk";
    const NAMES: [&'static str; 6] = ["pawn", "knight", "bishop", "rook", "queen", "king"];

    /// FEN letter: uppercase for white, lowercase for black.
    pub fn to_char(self, color: Color) -> char {
        let c = Self::LETTERS[self.index()] as char;
        match color {
            Color::White => c.to_ascii_uppercase(),
            Color::Black => c,
        }
    }

    /// Parse a FEN piece letter. Case selects the colour.
    pub fn from_char(c: char) -> Option<(Color, PieceType)> {
        let lower = c.to_ascii_lowercase();
        let idx = Self::LETTERS.iter().position(|&l| l as char == lower)?;
        let color = if c.is_ascii_uppercase() {
            Color::White
        } else {
            Color::Black
        };
        Some((color, Self::ALL[idx]))
    }

    /// Parse a promotion letter (`q`, `r`, `b`, `n`, either case).
    pub fn from_promotion_char(c: char) -> Option<PieceType> {
        Self::from_char(c)
            .map(|(_, pt)| pt)
            .filter(|pt| Self::PROMOTIONS.contains(pt))
    }
}

impl fmt::Display for PieceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::NAMES[self.index()])
    }
}

// ---------------------------------------------------------------------------
// Square
// ---------------------------------------------------------------------------

/// A square on the chess board (0..63, LERF: a1=0, h8=63).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Square(pub u8);

impl Square {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn file(self) -> u8 {
        self.0 & 7
    }

    #[inline]
    pub fn rank(self) -> u8 {
        self.0 >> 3
    }

    #[inline]
    pub fn from_file_rank(file: u8, rank: u8) -> Self {
        debug_assert!(file < 8 && rank < 8);
        Square(rank * 8 + file)
    }

    /// True for light squares (b1, a2, ...).
    #[inline]
    pub fn is_light(self) -> bool {
        (self.file() + self.rank()) % 2 == 1
    }

    /// Parse a square name like "e4".
    pub fn from_algebraic(s: &str) -> Option<Self> {
        let &[f, r] = s.as_bytes() else {
            return None;
        };
        let (file, rank) = (f.wrapping_sub(b'a'), r.wrapping_sub(b'1'));
        (file < 8 && rank < 8).then(|| Square::from_file_rank(file, rank))
    }

    /// Convert to algebraic notation like "e4".
    pub fn to_algebraic(self) -> String {
        let file = (b'a' + self.file()) as char;
        let rank = (b'1' + self.rank()) as char;
        format!("{file}{rank}")
    }
}

impl fmt::Display for Square {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_algebraic())
    }
}

// ---------------------------------------------------------------------------
// Bitboard
// ---------------------------------------------------------------------------

/// A 64-bit bitboard, one bit per square.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Bitboard(pub u64);

impl Bitboard {
    pub const EMPTY: Bitboard = Bitboard(0);
    pub const ALL: Bitboard = Bitboard(!0u64);
    pub const LIGHT_SQUARES: Bitboard = Bitboard(0x55AA_55AA_55AA_55AA);
    pub const DARK_SQUARES: Bitboard = Bitboard(0xAA55_AA55_AA55_AA55);

    #[inline]
    pub fn from_square(sq: Square) -> Self {
        Bitboard(1u64 << sq.0)
    }

    #[inline]
    pub fn is_set(self, sq: Square) -> bool {
        self.0 & (1u64 << sq.0) != 0
    }

    #[inline]
    pub fn set(&mut self, sq: Square) {
        self.0 |= 1u64 << sq.0;
    }

    #[inline]
    pub fn clear(&mut self, sq: Square) {
        self.0 &= !(1u64 << sq.0);
    }

    #[inline]
    pub fn pop_count(self) -> u32 {
        self.0.count_ones()
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_not_empty(self) -> bool {
        self.0 != 0
    }

    /// More than one bit set.
    #[inline]
    pub fn more_than_one(self) -> bool {
        self.0 & self.0.wrapping_sub(1) != 0
    }

    /// Lowest set square.
    #[inline]
    pub fn lsb(self) -> Option<Square> {
        (self.0 != 0).then(|| Square(self.0.trailing_zeros() as u8))
    }

    /// Remove and return the lowest set square.
    #[inline]
    pub fn pop_lsb(&mut self) -> Option<Square> {
        let sq = self.lsb()?;
        self.0 &= self.0 - 1;
        Some(sq)
    }

    /// Iterate over all set bit positions as `Square`s.
    #[inline]
    pub fn iter(self) -> BitboardIter {
        BitboardIter(self)
    }
}

/// Iterator over set bits in a `Bitboard`.
pub struct BitboardIter(Bitboard);

impl Iterator for BitboardIter {
    type Item = Square;

    #[inline]
    fn next(&mut self) -> Option<Square> {
        self.0.pop_lsb()
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        let count = self.0.pop_count() as usize;
        (count, Some(count))
    }
}

impl ExactSizeIterator for BitboardIter {}

macro_rules! bitboard_ops {
    ($($op:ident::$f:ident, $assign:ident::$fa:ident => $sym:tt;)*) => {$(
        impl std::ops::$op for Bitboard {
            type Output = Self;
            #[inline]
            fn $f(self, rhs: Self) -> Self {
                Bitboard(self.0 $sym rhs.0)
            }
        }

        impl std::ops::$assign for Bitboard {
            #[inline]
            fn $fa(&mut self, rhs: Self) {
                *self = *self $sym rhs;
            }
        }
    )*};
}

bitboard_ops! {
    BitAnd::bitand, BitAndAssign::bitand_assign => &;
    BitOr::bitor, BitOrAssign::bitor_assign => |;
    BitXor::bitxor, BitXorAssign::bitxor_assign => ^;
}

impl std::ops::Not for Bitboard {
    type Output = Self;
    #[inline]
    fn not(self) -> Self {
        Bitboard(!self.0)
    }
}

impl fmt::Debug for Bitboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bitboard(0x{:016x})", self.0)?;
        for rank in (0..8).rev() {
            write!(f, "  {} ", rank + 1)?;
            for file in 0..8 {
                let sq = Square::from_file_rank(file, rank);
                write!(f, "{}", if self.is_set(sq) { '1' } else { '.' })?;
                if file < 7 {
                    write!(f, " ")?;
                }
            }
            writeln!(f)?;
        }
        writeln!(f, "    a b c d e f g h")
    }
}

// ---------------------------------------------------------------------------
// Move
// ---------------------------------------------------------------------------

/// A chess move: from-square, to-square and optional promotion piece.
///
/// Captures, castling and en passant are not flagged; `Position::make_move`
/// derives them from the board. Two moves are equal when all three fields
/// are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Move {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceType>,
}

impl Move {
    /// The a1a1 placeholder. Used by callers above the engine for
    /// "no move" bookkeeping and by the transposition table for entries
    /// that carry a score but no move. It is never made on a board.
    pub const NULL: Move = Move {
        from: Square(0),
        to: Square(0),
        promotion: None,
    };

    #[inline]
    pub const fn new(from: Square, to: Square) -> Self {
        Move {
            from,
            to,
            promotion: None,
        }
    }

    #[inline]
    pub const fn with_promotion(from: Square, to: Square, promotion: PieceType) -> Self {
        Move {
            from,
            to,
            promotion: Some(promotion),
        }
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.from == self.to
    }

    /// Pack into 16 bits: from (6), to (6), promotion piece index (4).
    #[inline]
    pub fn to_u16(self) -> u16 {
        let promo = self.promotion.map_or(0, |p| p.index() as u16);
        self.from.0 as u16 | (self.to.0 as u16) << 6 | promo << 12
    }

    /// Inverse of [`Move::to_u16`].
    #[inline]
    pub fn from_u16(packed: u16) -> Self {
        let promotion = match packed >> 12 {
            1 => Some(PieceType::Knight),
            2 => Some(PieceType::Bishop),
            3 => Some(PieceType::Rook),
            4 => Some(PieceType::Queen),
            _ => None,
        };
        Move {
            from: Square((packed & 63) as u8),
            to: Square(((packed >> 6) & 63) as u8),
            promotion,
        }
    }
}

impl Default for Move {
    fn default() -> Self {
        Move::NULL
    }
}

/// Compact coordinate form: `e2e4`, `e7e8q`.
impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.from, self.to)?;
        if let Some(promo) = self.promotion {
            write!(f, "{}", promo.to_char(Color::Black))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CastlingRights
// ---------------------------------------------------------------------------

/// Castling availability bitfield: bits 0-3 = WK, WQ, BK, BQ.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CastlingRights(pub u8);

impl CastlingRights {
    pub const NONE: CastlingRights = CastlingRights(0);
    pub const WHITE_KINGSIDE: u8 = 1;
    pub const WHITE_QUEENSIDE: u8 = 2;
    pub const BLACK_KINGSIDE: u8 = 4;
    pub const BLACK_QUEENSIDE: u8 = 8;
    pub const ALL: CastlingRights = CastlingRights(0b1111);

    #[inline]
    pub fn has(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    #[inline]
    pub fn remove(&mut self, flag: u8) {
        self.0 &= !flag;
    }

    #[inline]
    pub fn can_castle_kingside(self, color: Color) -> bool {
        match color {
            Color::White => self.has(Self::WHITE_KINGSIDE),
            Color::Black => self.has(Self::BLACK_KINGSIDE),
        }
    }

    #[inline]
    pub fn can_castle_queenside(self, color: Color) -> bool {
        match color {
            Color::White => self.has(Self::WHITE_QUEENSIDE),
            Color::Black => self.has(Self::BLACK_QUEENSIDE),
        }
    }

    /// Parse FEN castling string (e.g. "KQkq", "-", "Kq").
    pub fn from_fen(s: &str) -> Option<Self> {
        if s == "-" {
            return Some(CastlingRights::NONE);
        }
        let mut rights = 0u8;
        for c in s.chars() {
            match c {
                'K' => rights |= Self::WHITE_KINGSIDE,
                'Q' => rights |= Self::WHITE_QUEENSIDE,
                'k' => rights |= Self::BLACK_KINGSIDE,
                'q' => rights |= Self::BLACK_QUEENSIDE,
                _ => return None,
            }
        }
        Some(CastlingRights(rights))
    }

    /// Convert to FEN castling string.
    pub fn to_fen(self) -> String {
        if self.0 == 0 {
            return "-".to_string();
        }
        let mut s = String::with_capacity(4);
        if self.has(Self::WHITE_KINGSIDE) {
            s.push('K');
        }
        if self.has(Self::WHITE_QUEENSIDE) {
            s.push('Q');
        }
        if self.has(Self::BLACK_KINGSIDE) {
            s.push('k');
        }
        if self.has(Self::BLACK_QUEENSIDE) {
            s.push('q');
        }
        s
    }
}

impl fmt::Display for CastlingRights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_fen())
    }
}

// ---------------------------------------------------------------------------
// GameStatus
// ---------------------------------------------------------------------------

/// Current status of a game.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GameStatus {
    Active,
    Check,
    Checkmate,
    Stalemate,
    Draw(DrawReason),
}

impl GameStatus {
    pub fn as_str(&self) -> &str {
        match self {
            GameStatus::Active => "active",
            GameStatus::Check => "check",
            GameStatus::Checkmate => "checkmate",
            GameStatus::Stalemate => "stalemate",
            GameStatus::Draw(reason) => reason.as_str(),
        }
    }

    pub fn is_game_over(&self) -> bool {
        matches!(
            self,
            GameStatus::Checkmate | GameStatus::Stalemate | GameStatus::Draw(_)
        )
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reason for a draw. The first two are only reached through a claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawReason {
    FiftyMoveRule,
    ThreefoldRepetition,
    InsufficientMaterial,
}

impl DrawReason {
    pub fn as_str(&self) -> &str {
        match self {
            DrawReason::FiftyMoveRule => "fifty_move_rule",
            DrawReason::ThreefoldRepetition => "threefold_repetition",
            DrawReason::InsufficientMaterial => "insufficient_material",
        }
    }
}

// ---------------------------------------------------------------------------
// ChessError
// ---------------------------------------------------------------------------

/// Domain errors for the chess engine.
#[derive(Debug, thiserror::Error)]
pub enum ChessError {
    #[error("invalid move {mv}: {reason}")]
    InvalidMove { mv: String, reason: String },

    #[error(transparent)]
    Fen(#[from] FenError),

    #[error("game is already over: {0}")]
    GameOver(String),

    #[error("no moves to undo")]
    NothingToUndo,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sq(name: &str) -> Square {
        Square::from_algebraic(name).unwrap()
    }

    #[test]
    fn color_toggle() {
        assert_eq!(!Color::White, Color::Black);
        assert_eq!(!Color::Black, Color::White);
    }

    #[test]
    fn color_display() {
        assert_eq!(Color::White.to_string(), "white");
        assert_eq!(Color::Black.to_string(), "black");
    }

    #[test]
    fn piece_type_values() {
        assert_eq!(PieceType::Pawn.value(), 100);
        assert_eq!(PieceType::Knight.value(), 320);
        assert_eq!(PieceType::Bishop.value(), 330);
        assert_eq!(PieceType::Rook.value(), 500);
        assert_eq!(PieceType::Queen.value(), 900);
        assert!(PieceType::King.value() > 8 * PieceType::Queen.value());
    }

    #[test]
    fn piece_type_char_round_trip() {
        for pt in PieceType::ALL {
            let wc = pt.to_char(Color::White);
            let bc = pt.to_char(Color::Black);
            assert!(wc.is_ascii_uppercase());
            assert!(bc.is_ascii_lowercase());
            assert_eq!(PieceType::from_char(wc), Some((Color::White, pt)));
            assert_eq!(PieceType::from_char(bc), Some((Color::Black, pt)));
        }
    }

    #[test]
    fn piece_type_from_char_invalid() {
        assert_eq!(PieceType::from_char('x'), None);
        assert_eq!(PieceType::from_char('1'), None);
    }

    #[test]
    fn promotion_char_parsing() {
        assert_eq!(PieceType::from_promotion_char('q'), Some(PieceType::Queen));
        assert_eq!(PieceType::from_promotion_char('N'), Some(PieceType::Knight));
        assert_eq!(PieceType::from_promotion_char('k'), None);
        assert_eq!(PieceType::from_promotion_char('p'), None);
    }

    #[test]
    fn square_from_algebraic() {
        assert_eq!(Square::from_algebraic("a1"), Some(Square(0)));
        assert_eq!(Square::from_algebraic("h1"), Some(Square(7)));
        assert_eq!(Square::from_algebraic("a8"), Some(Square(56)));
        assert_eq!(Square::from_algebraic("h8"), Some(Square(63)));
        assert_eq!(Square::from_algebraic("e4"), Some(Square(28)));
    }

    #[test]
    fn square_algebraic_round_trip() {
        for i in 0..64 {
            let sq = Square(i);
            let alg = sq.to_algebraic();
            assert_eq!(Square::from_algebraic(&alg), Some(sq));
        }
    }

    #[test]
    fn square_file_rank() {
        let e4 = sq("e4");
        assert_eq!(e4.file(), 4);
        assert_eq!(e4.rank(), 3);
    }

    #[test]
    fn square_from_algebraic_invalid() {
        assert_eq!(Square::from_algebraic(""), None);
        assert_eq!(Square::from_algebraic("a"), None);
        assert_eq!(Square::from_algebraic("a9"), None);
        assert_eq!(Square::from_algebraic("i1"), None);
        assert_eq!(Square::from_algebraic("abc"), None);
    }

    #[test]
    fn square_colors_match_masks() {
        assert!(!sq("a1").is_light());
        assert!(sq("h1").is_light());
        assert!(sq("d1").is_light());
        for i in 0..64 {
            let s = Square(i);
            assert_eq!(Bitboard::LIGHT_SQUARES.is_set(s), s.is_light(), "{s}");
            assert_eq!(Bitboard::DARK_SQUARES.is_set(s), !s.is_light(), "{s}");
        }
    }

    #[test]
    fn bitboard_basic_ops() {
        let mut bb = Bitboard::EMPTY;
        assert!(bb.is_empty());
        assert_eq!(bb.pop_count(), 0);

        let e4 = sq("e4");
        bb.set(e4);
        assert!(bb.is_not_empty());
        assert!(bb.is_set(e4));
        assert_eq!(bb.pop_count(), 1);
        assert!(!bb.more_than_one());

        bb.set(sq("a1"));
        assert!(bb.more_than_one());

        bb.clear(e4);
        bb.clear(sq("a1"));
        assert!(bb.is_empty());
    }

    #[test]
    fn bitboard_lsb_pop() {
        let mut bb = Bitboard::from_square(Square(0)) | Bitboard::from_square(Square(5));
        assert_eq!(bb.lsb(), Some(Square(0)));
        assert_eq!(bb.pop_lsb(), Some(Square(0)));
        assert_eq!(bb.pop_lsb(), Some(Square(5)));
        assert_eq!(bb.pop_lsb(), None);
        assert!(bb.is_empty());
    }

    #[test]
    fn bitboard_iter() {
        let bb = Bitboard::from_square(Square(0))
            | Bitboard::from_square(Square(10))
            | Bitboard::from_square(Square(63));
        let squares: Vec<Square> = bb.iter().collect();
        assert_eq!(squares, vec![Square(0), Square(10), Square(63)]);
        assert_eq!(bb.iter().len(), 3);
    }

    #[test]
    fn move_display_compact() {
        assert_eq!(Move::new(sq("e2"), sq("e4")).to_string(), "e2e4");
        let promo = Move::with_promotion(sq("e7"), sq("e8"), PieceType::Queen);
        assert_eq!(promo.to_string(), "e7e8q");
        let under = Move::with_promotion(sq("b2"), sq("a1"), PieceType::Knight);
        assert_eq!(under.to_string(), "b2a1n");
    }

    #[test]
    fn move_equality_is_by_field() {
        let a = Move::new(sq("g1"), sq("f3"));
        let b = Move::new(sq("g1"), sq("f3"));
        assert_eq!(a, b);
        let q = Move::with_promotion(sq("a7"), sq("a8"), PieceType::Queen);
        let r = Move::with_promotion(sq("a7"), sq("a8"), PieceType::Rook);
        assert_ne!(q, r);
    }

    #[test]
    fn move_packing_round_trip() {
        let moves = [
            Move::NULL,
            Move::new(sq("e2"), sq("e4")),
            Move::new(sq("h8"), sq("a1")),
            Move::with_promotion(sq("e7"), sq("e8"), PieceType::Queen),
            Move::with_promotion(sq("b2"), sq("a1"), PieceType::Knight),
            Move::with_promotion(sq("g7"), sq("h8"), PieceType::Rook),
            Move::with_promotion(sq("c2"), sq("c1"), PieceType::Bishop),
        ];
        for mv in moves {
            assert_eq!(Move::from_u16(mv.to_u16()), mv);
        }
    }

    #[test]
    fn null_move() {
        assert!(Move::NULL.is_null());
        assert!(Move::default().is_null());
        assert!(!Move::new(sq("e2"), sq("e4")).is_null());
    }

    #[test]
    fn castling_rights_fen_round_trip() {
        let cases = ["-", "K", "Kq", "KQkq", "kq", "Q"];
        for s in cases {
            let cr = CastlingRights::from_fen(s).unwrap();
            assert_eq!(cr.to_fen(), s);
        }
    }

    #[test]
    fn castling_rights_flags() {
        let mut cr = CastlingRights::ALL;
        assert!(cr.can_castle_kingside(Color::Black));
        cr.remove(CastlingRights::WHITE_KINGSIDE);
        assert!(!cr.can_castle_kingside(Color::White));
        assert!(cr.can_castle_queenside(Color::White));
    }

    #[test]
    fn castling_rights_from_fen_invalid() {
        assert_eq!(CastlingRights::from_fen("X"), None);
        assert_eq!(CastlingRights::from_fen("KZ"), None);
    }

    #[test]
    fn game_status_strings() {
        assert_eq!(GameStatus::Active.as_str(), "active");
        assert_eq!(GameStatus::Checkmate.as_str(), "checkmate");
        assert_eq!(
            GameStatus::Draw(DrawReason::ThreefoldRepetition).as_str(),
            "threefold_repetition"
        );
    }

    #[test]
    fn game_status_is_game_over() {
        assert!(!GameStatus::Active.is_game_over());
        assert!(!GameStatus::Check.is_game_over());
        assert!(GameStatus::Checkmate.is_game_over());
        assert!(GameStatus::Stalemate.is_game_over());
        assert!(GameStatus::Draw(DrawReason::FiftyMoveRule).is_game_over());
    }
}
