//! Move-ordering memory shared across the nodes of one search: killer moves
//! per ply and a success/fail history per piece and destination square.

use crate::engine::board::Position;
use crate::engine::types::{Color, Move, PieceType};

/// Deepest ply that keeps killer moves.
pub const MAX_KILLER_PLY: usize = 200;

/// Two most recent quiet cutoff moves per ply.
#[derive(Clone, Debug)]
pub struct KillerTable {
    slots: Vec<[Move; 2]>,
}

impl KillerTable {
    pub fn new() -> Self {
        KillerTable {
            slots: vec![[Move::NULL; 2]; MAX_KILLER_PLY],
        }
    }

    /// Remember `mv` as the newest killer at `ply`.
    pub fn add_killer(&mut self, ply: usize, mv: Move) {
        if let Some(slot) = self.slots.get_mut(ply)
            && slot[0] != mv
        {
            slot[1] = slot[0];
            slot[0] = mv;
        }
    }

    /// Ordering bonus in 0..=4.
    ///
    /// Killers at the same ply score highest, then killers two plies deeper,
    /// then killers two plies up.
    pub fn killer_score(&self, ply: usize, mv: Move) -> i32 {
        if mv.is_null() {
            return 0;
        }
        if let Some(slot) = self.slots.get(ply) {
            if slot[0] == mv {
                return 4;
            }
            if slot[1] == mv {
                return 3;
            }
        }
        if ply >= 2
            && let Some(slot) = self.slots.get(ply - 2)
        {
            if slot[0] == mv {
                return 2;
            }
            if slot[1] == mv {
                return 1;
            }
        }
        if let Some(slot) = self.slots.get(ply + 2) {
            if slot[0] == mv {
                return 3;
            }
            if slot[1] == mv {
                return 2;
            }
        }
        0
    }

    pub fn clear(&mut self) {
        self.slots.fill([Move::NULL; 2]);
    }
}

impl Default for KillerTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters above this are halved together with their partner.
const HISTORY_LIMIT: u32 = 1000;

/// How often a quiet move by a given piece to a given square caused a cutoff.
#[derive(Clone, Debug)]
pub struct History {
    success: [[[u32; 64]; PieceType::COUNT]; 2],
    fail: [[[u32; 64]; PieceType::COUNT]; 2],
}

impl History {
    pub fn new() -> Self {
        History {
            success: [[[0; 64]; PieceType::COUNT]; 2],
            fail: [[[0; 64]; PieceType::COUNT]; 2],
        }
    }

    fn slot(pos: &Position, mv: Move) -> Option<(Color, PieceType)> {
        pos.piece_at(mv.from)
    }

    /// `mv` caused a beta cutoff at `depth`.
    pub fn add_success(&mut self, pos: &Position, mv: Move, depth: i32) {
        let Some((c, pt)) = Self::slot(pos, mv) else {
            return;
        };
        let (ci, pi, to) = (c.index(), pt.index(), mv.to.index());
        let val = self.success[ci][pi][to] + depth.max(1) as u32;
        if val > HISTORY_LIMIT {
            self.success[ci][pi][to] = val / 2;
            self.fail[ci][pi][to] /= 2;
        } else {
            self.success[ci][pi][to] = val;
        }
    }

    /// `mv` was searched before a cutoff move and did not cause one.
    pub fn add_fail(&mut self, pos: &Position, mv: Move, depth: i32) {
        let Some((c, pt)) = Self::slot(pos, mv) else {
            return;
        };
        let (ci, pi, to) = (c.index(), pt.index(), mv.to.index());
        let val = self.fail[ci][pi][to] + depth.max(1) as u32;
        if val > HISTORY_LIMIT {
            self.fail[ci][pi][to] = val / 2;
            self.success[ci][pi][to] /= 2;
        } else {
            self.fail[ci][pi][to] = val;
        }
    }

    /// Success ratio scaled to 0..=49.
    pub fn score(&self, pos: &Position, mv: Move) -> i32 {
        let Some((c, pt)) = Self::slot(pos, mv) else {
            return 0;
        };
        let (ci, pi, to) = (c.index(), pt.index(), mv.to.index());
        let succ = self.success[ci][pi][to];
        let total = succ + self.fail[ci][pi][to];
        if total == 0 {
            0
        } else {
            (succ * 49 / total) as i32
        }
    }

    pub fn clear(&mut self) {
        *self = Self::new();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}
