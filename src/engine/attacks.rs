//! Pre-computed attack tables for fast move generation.
//!
//! All tables are initialised once (via `OnceLock`) and live for the lifetime
//! of the process. They are read-only after construction, so any number of
//! independent searches can share them. Sliding-piece attacks use plain magic
//! bitboards found at start-up from a fixed seed.

use std::sync::OnceLock;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::engine::types::{Bitboard, Color, Square};

// =========================================================================
// Public API
// =========================================================================

/// Get a reference to the global attack tables.
pub fn tables() -> &'static AttackTables {
    static TABLES: OnceLock<AttackTables> = OnceLock::new();
    TABLES.get_or_init(AttackTables::init)
}

/// Pre-computed attack/move tables for every piece type.
pub struct AttackTables {
    pub knight: [Bitboard; 64],
    pub king: [Bitboard; 64],
    /// `pawn_attacks[color][square]`: squares a pawn on `square` attacks.
    pub pawn_attacks: [[Bitboard; 64]; 2],
    /// Rook magic entries (one per square).
    pub rook_magics: [MagicEntry; 64],
    /// Bishop magic entries (one per square).
    pub bishop_magics: [MagicEntry; 64],
    /// Shared attack table backing store for rook magics.
    rook_table: Vec<Bitboard>,
    /// Shared attack table backing store for bishop magics.
    bishop_table: Vec<Bitboard>,
    /// `between[a][b]`: squares strictly between `a` and `b` when they share
    /// a rank, file or diagonal; empty otherwise.
    between: Vec<[Bitboard; 64]>,
}

/// A single magic-bitboard entry for one square.
pub struct MagicEntry {
    pub mask: Bitboard,
    pub magic: u64,
    pub shift: u8,
    /// Offset into the shared attack table.
    pub offset: usize,
}

impl AttackTables {
    // -------------------------------------------------------------------
    // Leaper lookups
    // -------------------------------------------------------------------

    /// Knight attacks from a square.
    #[inline]
    pub fn knight_attacks(&self, sq: Square) -> Bitboard {
        self.knight[sq.0 as usize]
    }

    /// King attacks from a square.
    #[inline]
    pub fn king_attacks(&self, sq: Square) -> Bitboard {
        self.king[sq.0 as usize]
    }

    /// Pawn attack squares for a given colour.
    #[inline]
    pub fn pawn_attacks(&self, color: Color, sq: Square) -> Bitboard {
        self.pawn_attacks[color.index()][sq.0 as usize]
    }

    // -------------------------------------------------------------------
    // Slider lookups (magic bitboards)
    // -------------------------------------------------------------------

    /// Rook attacks from `sq` given current `occupied` bitboard.
    #[inline]
    pub fn rook_attacks(&self, sq: Square, occupied: Bitboard) -> Bitboard {
        let entry = &self.rook_magics[sq.0 as usize];
        let idx = magic_index(entry, occupied);
        self.rook_table[entry.offset + idx]
    }

    /// Bishop attacks from `sq` given current `occupied` bitboard.
    #[inline]
    pub fn bishop_attacks(&self, sq: Square, occupied: Bitboard) -> Bitboard {
        let entry = &self.bishop_magics[sq.0 as usize];
        let idx = magic_index(entry, occupied);
        self.bishop_table[entry.offset + idx]
    }

    /// Queen attacks = rook | bishop.
    #[inline]
    pub fn queen_attacks(&self, sq: Square, occupied: Bitboard) -> Bitboard {
        self.rook_attacks(sq, occupied) | self.bishop_attacks(sq, occupied)
    }

    /// Squares strictly between two aligned squares.
    #[inline]
    pub fn between(&self, a: Square, b: Square) -> Bitboard {
        self.between[a.index()][b.index()]
    }
}

// =========================================================================
// Magic index computation
// =========================================================================

#[inline]
fn magic_index(entry: &MagicEntry, occupied: Bitboard) -> usize {
    let blockers = occupied & entry.mask;
    let hash = blockers.0.wrapping_mul(entry.magic);
    (hash >> entry.shift) as usize
}

// =========================================================================
// Initialisation
// =========================================================================

impl AttackTables {
    fn init() -> Self {
        let (rook_magics, rook_table) = find_magics(&ROOK_DELTAS, 0xABCD_1234_5678_EF01);
        let (bishop_magics, bishop_table) = find_magics(&BISHOP_DELTAS, 0x1234_ABCD_EF01_5678);
        AttackTables {
            knight: leaper_table(&KNIGHT_DELTAS),
            king: leaper_table(&KING_DELTAS),
            pawn_attacks: [
                leaper_table(&[(1, -1), (1, 1)]),
                leaper_table(&[(-1, -1), (-1, 1)]),
            ],
            rook_magics,
            bishop_magics,
            rook_table,
            bishop_table,
            between: init_between(),
        }
    }
}

/// (rank, file) steps.
const KNIGHT_DELTAS: [(i8, i8); 8] = [
    (-2, -1),
    (-2, 1),
    (-1, -2),
    (-1, 2),
    (1, -2),
    (1, 2),
    (2, -1),
    (2, 1),
];
const KING_DELTAS: [(i8, i8); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];
const ROOK_DELTAS: [(i8, i8); 4] = [(-1, 0), (1, 0), (0, -1), (0, 1)];
const BISHOP_DELTAS: [(i8, i8); 4] = [(-1, -1), (-1, 1), (1, -1), (1, 1)];

/// The square one `(dr, df)` step away from `sq`, if it is on the board.
#[inline]
fn step(sq: u8, (dr, df): (i8, i8)) -> Option<u8> {
    let r = (sq >> 3) as i8 + dr;
    let f = (sq & 7) as i8 + df;
    ((0..8).contains(&r) && (0..8).contains(&f)).then(|| (r * 8 + f) as u8)
}

/// Squares reached by repeating `delta` from `sq` until the board edge,
/// nearest first.
fn ray(sq: u8, delta: (i8, i8)) -> impl Iterator<Item = u8> {
    std::iter::successors(step(sq, delta), move |&s| step(s, delta))
}

fn leaper_table(deltas: &[(i8, i8)]) -> [Bitboard; 64] {
    std::array::from_fn(|sq| {
        deltas
            .iter()
            .filter_map(|&d| step(sq as u8, d))
            .fold(Bitboard::EMPTY, |bb, s| bb | Bitboard(1u64 << s))
    })
}

fn init_between() -> Vec<[Bitboard; 64]> {
    let mut table = vec![[Bitboard::EMPTY; 64]; 64];
    for a in 0..64u8 {
        for &delta in ROOK_DELTAS.iter().chain(&BISHOP_DELTAS) {
            let mut passed = 0u64;
            for b in ray(a, delta) {
                table[a as usize][b as usize] = Bitboard(passed);
                passed |= 1u64 << b;
            }
        }
    }
    table
}

// =========================================================================
// Magic bitboards
// =========================================================================

/// Enumerate all subsets of `mask` using the Carry-Rippler trick.
fn enumerate_subsets(mask: u64) -> Vec<u64> {
    let mut subsets = Vec::with_capacity(1 << mask.count_ones());
    let mut subset = 0u64;
    loop {
        subsets.push(subset);
        subset = subset.wrapping_sub(mask) & mask;
        if subset == 0 {
            break;
        }
    }
    subsets
}

/// Slider attacks from `sq`; each ray stops at the first square in `blockers`.
fn sliding_attacks(sq: u8, blockers: u64, deltas: &[(i8, i8)]) -> u64 {
    let mut attacks = 0u64;
    for &delta in deltas {
        for s in ray(sq, delta) {
            attacks |= 1u64 << s;
            if blockers & (1u64 << s) != 0 {
                break;
            }
        }
    }
    attacks
}

/// Squares whose occupancy matters for a slider on `sq`: every ray square
/// except the last one before the edge.
fn relevant_mask(sq: u8, deltas: &[(i8, i8)]) -> u64 {
    let mut mask = 0u64;
    for &delta in deltas {
        let squares: Vec<u8> = ray(sq, delta).collect();
        if let Some((_, inner)) = squares.split_last() {
            mask |= inner.iter().fold(0u64, |m, &s| m | 1u64 << s);
        }
    }
    mask
}

/// Sparse random candidate (few bits set); these are far more likely to be
/// valid magics.
fn sparse_random(rng: &mut StdRng) -> u64 {
    rng.next_u64() & rng.next_u64() & rng.next_u64()
}

/// Find magic numbers at runtime for all 64 squares.
///
/// For each square, trial-and-error with sparse random candidates until a
/// collision-free mapping turns up.
fn find_magics(deltas: &[(i8, i8)], seed: u64) -> ([MagicEntry; 64], Vec<Bitboard>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut all_tables: Vec<Bitboard> = Vec::new();
    let mut entries: [MagicEntry; 64] = std::array::from_fn(|_| MagicEntry {
        mask: Bitboard::EMPTY,
        magic: 0,
        shift: 0,
        offset: 0,
    });

    for sq in 0..64u8 {
        let mask = relevant_mask(sq, deltas);
        let bits = mask.count_ones() as u8;
        let shift = 64 - bits;
        let table_size = 1usize << bits;

        // Pre-compute all blocker subsets and their attack sets.
        let subsets = enumerate_subsets(mask);
        let attacks: Vec<u64> = subsets
            .iter()
            .map(|&b| sliding_attacks(sq, b, deltas))
            .collect();

        // Search for a magic that maps every subset to a unique index
        // (or to the same attack set, a "constructive collision").
        let magic = 'search: loop {
            let candidate = sparse_random(&mut rng);

            // Quick reject: want at least 6 bits in the upper byte of
            // candidate * mask to get good hash distribution.
            if (candidate.wrapping_mul(mask) & 0xFF00_0000_0000_0000).count_ones() < 6 {
                continue;
            }

            let mut table = vec![u64::MAX; table_size]; // sentinel
            let mut ok = true;

            for (i, &blockers) in subsets.iter().enumerate() {
                let idx = (blockers.wrapping_mul(candidate) >> shift) as usize;
                if table[idx] == u64::MAX {
                    table[idx] = attacks[i];
                } else if table[idx] != attacks[i] {
                    ok = false;
                    break;
                }
            }

            if ok {
                break 'search candidate;
            }
        };

        let offset = all_tables.len();
        entries[sq as usize] = MagicEntry {
            mask: Bitboard(mask),
            magic,
            shift,
            offset,
        };

        // Build the final table for this square.
        let mut table = vec![Bitboard::EMPTY; table_size];
        for (i, &blockers) in subsets.iter().enumerate() {
            let idx = (blockers.wrapping_mul(magic) >> shift) as usize;
            table[idx] = Bitboard(attacks[i]);
        }
        all_tables.extend_from_slice(&table);
    }

    (entries, all_tables)
}

// =========================================================================
// Tests
// =========================================================================
