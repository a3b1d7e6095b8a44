//! Transposition table.
//!
//! A fixed-size table of `TTEntry` values addressed by two hash functions.
//! Each key may live in either of its two slots. When both are taken, the
//! less valuable occupant is overwritten, and a valuable occupant is first
//! moved to its own alternate slot (cuckoo displacement) unless that slot
//! holds something better still.
//!
//! Mate scores are stored relative to the node they were found in, so the
//! same entry reads back correctly at any ply.

use tracing::debug;

use crate::engine::board::Position;
use crate::engine::movegen;
use crate::engine::types::Move;

use super::search::MATE0;

/// Scores above this magnitude are mate scores and get ply-adjusted.
const MATE_BOUND: i32 = MATE0 - 1000;

/// What the stored score says about the true value of the position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Bound {
    /// The score is exact.
    Exact,
    /// The true score is at least this (fail high).
    Lower,
    /// The true score is at most this (fail low).
    Upper,
    /// Unused slot.
    #[default]
    Empty,
}

/// One slot of the table. Always read and written as a whole value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TTEntry {
    pub key: u64,
    mv: u16,
    score: i16,
    /// Static evaluation of the position, or `UNKNOWN_SCORE`.
    pub eval: i16,
    pub depth: i16,
    pub generation: u8,
    pub bound: Bound,
}

impl TTEntry {
    /// The stored best move, if any.
    pub fn best_move(&self) -> Option<Move> {
        let mv = Move::from_u16(self.mv);
        (!mv.is_null()).then_some(mv)
    }

    /// Score as seen from a node `ply` plies below the root.
    pub fn score(&self, ply: i32) -> i32 {
        let score = self.score as i32;
        if score > MATE_BOUND {
            score - ply
        } else if score < -MATE_BOUND {
            score + ply
        } else {
            score
        }
    }

    fn set_score(&mut self, score: i32, ply: i32) {
        let stored = if score > MATE_BOUND {
            score + ply
        } else if score < -MATE_BOUND {
            score - ply
        } else {
            score
        };
        self.score = stored as i16;
    }

    pub fn is_empty(&self) -> bool {
        self.bound == Bound::Empty
    }

    /// True if `self` is more worth keeping than `other`.
    ///
    /// Entries from the current search win over stale ones, then the deeper
    /// entry wins, then an exact score beats a bound.
    fn better_than(&self, other: &TTEntry, generation: u8) -> bool {
        if (self.generation == generation) != (other.generation == generation) {
            return self.generation == generation;
        }
        if self.depth != other.depth {
            return self.depth > other.depth;
        }
        self.bound == Bound::Exact && other.bound != Bound::Exact
    }

    /// Worth displacing into the alternate slot instead of dropping.
    fn valuable(&self, generation: u8) -> bool {
        self.generation == generation && (self.bound == Bound::Exact || self.depth > 3)
    }
}

/// Two-slot hash table of search results.
pub struct TranspositionTable {
    table: Vec<TTEntry>,
    mask: usize,
    generation: u8,
}

impl TranspositionTable {
    /// Allocate a table with `2^log2_size` entries.
    pub fn new(log2_size: u32) -> Self {
        let log2_size = log2_size.clamp(4, 30);
        let size = 1usize << log2_size;
        debug!(entries = size, "allocated transposition table");
        TranspositionTable {
            table: vec![TTEntry::default(); size],
            mask: size - 1,
            generation: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn generation(&self) -> u8 {
        self.generation
    }

    #[inline]
    fn h0(&self, key: u64) -> usize {
        (key as usize) & self.mask
    }

    #[inline]
    fn h1(&self, key: u64) -> usize {
        ((key >> 32) as usize) & self.mask
    }

    /// Store a search result.
    ///
    /// A null `mv` keeps whatever move is already stored for the same key.
    #[allow(clippy::too_many_arguments)]
    pub fn insert(
        &mut self,
        key: u64,
        mv: Move,
        score: i32,
        bound: Bound,
        ply: i32,
        depth: i32,
        eval: i32,
    ) {
        let depth = depth.max(0);
        let idx0 = self.h0(key);
        let idx1 = self.h1(key);

        let mut idx = idx0;
        if self.table[idx].key != key || self.table[idx].is_empty() {
            idx = idx1;
        }
        if self.table[idx].key != key || self.table[idx].is_empty() {
            idx = if self.table[idx0].is_empty() {
                idx0
            } else if self.table[idx1].is_empty()
                || self.table[idx0].better_than(&self.table[idx1], self.generation)
            {
                idx1
            } else {
                idx0
            };
            let victim = self.table[idx];
            if victim.valuable(self.generation) {
                let alt = if idx == self.h0(victim.key) {
                    self.h1(victim.key)
                } else {
                    self.h0(victim.key)
                };
                if alt != idx && !self.table[alt].better_than(&victim, self.generation) {
                    self.table[alt] = victim;
                }
            }
        }

        let ent = &mut self.table[idx];
        let same_key = ent.key == key && !ent.is_empty();
        if same_key && ent.depth as i32 > depth && ent.bound == bound {
            let old = ent.score(ply);
            let redundant = match bound {
                Bound::Exact => true,
                Bound::Lower => score <= old,
                Bound::Upper => score >= old,
                Bound::Empty => false,
            };
            if redundant {
                return;
            }
        }

        if !same_key || !mv.is_null() {
            ent.mv = mv.to_u16();
        }
        ent.key = key;
        ent.set_score(score, ply);
        ent.depth = depth as i16;
        ent.generation = self.generation;
        ent.bound = bound;
        ent.eval = eval as i16;
    }

    /// Look up `key`, marking a hit as belonging to the current search.
    pub fn probe(&mut self, key: u64) -> Option<TTEntry> {
        let generation = self.generation;
        for idx in [self.h0(key), self.h1(key)] {
            let ent = &mut self.table[idx];
            if ent.key == key && !ent.is_empty() {
                ent.generation = generation;
                return Some(*ent);
            }
        }
        None
    }

    /// Look up `key` without touching the entry.
    pub fn peek(&self, key: u64) -> Option<TTEntry> {
        [self.h0(key), self.h1(key)]
            .into_iter()
            .map(|idx| self.table[idx])
            .find(|ent| ent.key == key && !ent.is_empty())
    }

    /// Start a new search. Older entries become replaceable first.
    pub fn next_generation(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    pub fn clear(&mut self) {
        self.table.fill(TTEntry::default());
        self.generation = 0;
    }

    /// Permille of sampled slots filled during the current search.
    pub fn hashfull(&self) -> u32 {
        let sample = self.table.len().min(1000);
        let used = self.table[..sample]
            .iter()
            .filter(|e| !e.is_empty() && e.generation == self.generation)
            .count();
        (used * 1000 / sample) as u32
    }

    /// Follow stored best moves from `pos` after playing `first`.
    ///
    /// Stops at a missing or illegal move, a repeated position, or after
    /// `max_len` moves.
    pub fn extract_pv(&self, pos: &Position, first: Move, max_len: usize) -> Vec<Move> {
        let mut pos = pos.clone();
        let mut pv = Vec::new();
        let mut seen = Vec::new();
        let mut next = Some(first);
        while let Some(mv) = next {
            if pv.len() >= max_len || !movegen::legal_moves(&pos).contains(mv) {
                break;
            }
            seen.push(pos.zobrist_hash());
            pos.make_move(mv);
            pv.push(mv);
            if seen.contains(&pos.zobrist_hash()) {
                break;
            }
            next = self.peek(pos.zobrist_hash()).and_then(|e| e.best_move());
        }
        pv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::Square;

    fn sq(name: &str) -> Square {
        Square::from_algebraic(name).unwrap()
    }

    fn pos(fen: &str) -> Position {
        Position::from_fen(fen).unwrap()
    }

    #[test]
    fn insert_then_probe() {
        let mut tt = TranspositionTable::new(10);
        let mv = Move::new(sq("e2"), sq("e4"));
        tt.insert(0xDEAD_BEEF_1234_5678, mv, 35, Bound::Exact, 0, 4, 12);
        let ent = tt.probe(0xDEAD_BEEF_1234_5678).unwrap();
        assert_eq!(ent.best_move(), Some(mv));
        assert_eq!(ent.score(0), 35);
        assert_eq!(ent.depth, 4);
        assert_eq!(ent.eval, 12);
        assert_eq!(ent.bound, Bound::Exact);
        assert!(tt.probe(0x1111).is_none());
    }

    #[test]
    fn mate_scores_are_ply_relative() {
        let mut tt = TranspositionTable::new(10);
        // Mate found 5 plies below a node at ply 3 -> MATE0 - 8 from the root.
        tt.insert(42, Move::NULL, MATE0 - 8, Bound::Exact, 3, 6, 0);
        let ent = tt.probe(42).unwrap();
        assert_eq!(ent.score(3), MATE0 - 8);
        assert_eq!(ent.score(1), MATE0 - 6);

        tt.insert(43, Move::NULL, -(MATE0 - 8), Bound::Exact, 3, 6, 0);
        assert_eq!(tt.probe(43).unwrap().score(5), -(MATE0 - 10));
    }

    #[test]
    fn null_move_keeps_stored_move() {
        let mut tt = TranspositionTable::new(10);
        let mv = Move::new(sq("g1"), sq("f3"));
        tt.insert(7, mv, 10, Bound::Lower, 0, 2, 0);
        tt.insert(7, Move::NULL, 20, Bound::Lower, 0, 3, 0);
        let ent = tt.probe(7).unwrap();
        assert_eq!(ent.best_move(), Some(mv));
        assert_eq!(ent.score(0), 20);
    }

    #[test]
    fn deeper_same_bound_is_not_overwritten_by_weaker_result() {
        let mut tt = TranspositionTable::new(10);
        tt.insert(9, Move::NULL, 50, Bound::Lower, 0, 8, 0);
        // Shallower lower bound that says less: ignored.
        tt.insert(9, Move::NULL, 40, Bound::Lower, 0, 2, 0);
        assert_eq!(tt.probe(9).unwrap().depth, 8);
        // Shallower lower bound that says more: stored.
        tt.insert(9, Move::NULL, 90, Bound::Lower, 0, 2, 0);
        let ent = tt.probe(9).unwrap();
        assert_eq!(ent.depth, 2);
        assert_eq!(ent.score(0), 90);
    }

    #[test]
    fn colliding_keys_use_both_slots() {
        let mut tt = TranspositionTable::new(4);
        // Same low bits, different high bits: same h0, different h1.
        let a = 0x0000_0001_0000_0005u64;
        let b = 0x0000_0002_0000_0005u64;
        tt.insert(a, Move::NULL, 1, Bound::Exact, 0, 5, 0);
        tt.insert(b, Move::NULL, 2, Bound::Exact, 0, 5, 0);
        assert_eq!(tt.probe(a).unwrap().score(0), 1);
        assert_eq!(tt.probe(b).unwrap().score(0), 2);
    }

    #[test]
    fn generation_and_clear() {
        let mut tt = TranspositionTable::new(4);
        tt.insert(3, Move::NULL, 0, Bound::Exact, 0, 1, 0);
        assert!(tt.hashfull() > 0);
        tt.next_generation();
        assert_eq!(tt.generation(), 1);
        assert_eq!(tt.hashfull(), 0);
        tt.clear();
        assert!(tt.probe(3).is_none());
        assert_eq!(tt.generation(), 0);
    }

    #[test]
    fn pv_follows_stored_moves() {
        let start = Position::starting();
        let mut tt = TranspositionTable::new(12);
        let e4 = Move::new(sq("e2"), sq("e4"));
        let e5 = Move::new(sq("e7"), sq("e5"));
        let mut after = start.clone();
        after.make_move(e4);
        tt.insert(after.zobrist_hash(), e5, 0, Bound::Exact, 1, 3, 0);
        assert_eq!(tt.extract_pv(&start, e4, 10), vec![e4, e5]);
        assert_eq!(tt.extract_pv(&start, e4, 1), vec![e4]);
    }

    #[test]
    fn pv_stops_at_illegal_move() {
        let p = pos("4k3/8/8/8/8/8/8/4K2R w K - 0 1");
        let tt = TranspositionTable::new(8);
        assert!(tt.extract_pv(&p, Move::new(sq("h1"), sq("a8")), 5).is_empty());
    }
}
