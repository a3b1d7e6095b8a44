//! Zobrist hashing for incremental position identification.
//!
//! Each aspect of a position (piece on square, side to move, castling rights,
//! en passant file) gets a random 64-bit key. The position hash is the XOR of
//! all applicable keys, so make/unmake can update it in O(1).

use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::engine::types::{Color, PieceType, Square};

/// 16 possible castling-rights bitmasks (0..15).
const CASTLING_KEYS: usize = 16;
/// 8 en-passant files (a..h). Only the file is hashed.
const EP_KEYS: usize = 8;

/// Fixed seed so hashes are reproducible across runs and processes.
const SEED: u64 = 0x3243_F6A8_885A_308D;

// ---------------------------------------------------------------------------
// ZobristKeys: immutable singleton
// ---------------------------------------------------------------------------

/// Pre-computed Zobrist random keys.
pub struct ZobristKeys {
    /// piece\[color\]\[piece_type\]\[square\]
    pub piece: [[[u64; 64]; 6]; 2],
    /// XOR this when it is Black's turn to move.
    pub side_to_move: u64,
    /// One key per castling bitmask. Mask 0 hashes to 0.
    pub castling: [u64; CASTLING_KEYS],
    /// One key per en-passant file.
    pub en_passant: [u64; EP_KEYS],
}

static ZOBRIST: OnceLock<ZobristKeys> = OnceLock::new();

/// Get a reference to the global Zobrist keys.
pub fn keys() -> &'static ZobristKeys {
    ZOBRIST.get_or_init(ZobristKeys::init)
}

impl ZobristKeys {
    fn init() -> Self {
        let mut rng = StdRng::seed_from_u64(SEED);

        let mut piece = [[[0u64; 64]; 6]; 2];
        for color in &mut piece {
            for pt in color {
                for sq in pt {
                    *sq = rng.next_u64();
                }
            }
        }

        let side_to_move = rng.next_u64();

        let mut castling = [0u64; CASTLING_KEYS];
        for key in castling.iter_mut().skip(1) {
            *key = rng.next_u64();
        }

        let mut en_passant = [0u64; EP_KEYS];
        for key in &mut en_passant {
            *key = rng.next_u64();
        }

        ZobristKeys {
            piece,
            side_to_move,
            castling,
            en_passant,
        }
    }

    /// Key for a specific piece on a specific square.
    #[inline]
    pub fn piece_key(&self, color: Color, piece: PieceType, sq: Square) -> u64 {
        self.piece[color.index()][piece.index()][sq.index()]
    }

    /// Key for a specific en-passant file (0-7).
    #[inline]
    pub fn ep_key(&self, file: u8) -> u64 {
        self.en_passant[file as usize]
    }

    /// Key for a specific castling-rights bitmask.
    #[inline]
    pub fn castling_key(&self, rights: u8) -> u64 {
        self.castling[rights as usize]
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn keys_are_a_singleton() {
        let k1 = keys();
        let k2 = keys();
        assert!(std::ptr::eq(k1, k2));
        assert_ne!(k1.side_to_move, 0);
    }

    #[test]
    fn keys_are_reproducible() {
        let fresh = ZobristKeys::init();
        let k = keys();
        assert_eq!(fresh.side_to_move, k.side_to_move);
        assert_eq!(
            fresh.piece_key(Color::Black, PieceType::Queen, Square(59)),
            k.piece_key(Color::Black, PieceType::Queen, Square(59)),
        );
    }

    #[test]
    fn all_keys_distinct() {
        let k = keys();
        let mut set = HashSet::new();
        for color in [Color::White, Color::Black] {
            for pt in PieceType::ALL {
                for s in 0..64u8 {
                    assert!(set.insert(k.piece_key(color, pt, Square(s))));
                }
            }
        }
        assert!(set.insert(k.side_to_move));
        for i in 1..16u8 {
            assert!(set.insert(k.castling_key(i)), "duplicate castling key {i}");
        }
        for f in 0..8u8 {
            assert!(set.insert(k.ep_key(f)), "duplicate ep key {f}");
        }
        assert_eq!(set.len(), 768 + 1 + 15 + 8);
    }

    #[test]
    fn empty_castling_mask_hashes_to_zero() {
        assert_eq!(keys().castling_key(0), 0);
    }
}
