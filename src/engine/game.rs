//! Stateful game controller wrapping Position.
//!
//! `Game` manages move history, the undo stack, the hash history handed to
//! the search, status detection (checkmate, stalemate, insufficient
//! material) and draw claims. Fifty-move and repetition draws are never
//! declared automatically; a player has to claim them.

use crate::engine::board::{Position, UndoInfo};
use crate::engine::movegen::{self, MoveList};
use crate::engine::san;
use crate::engine::types::{Bitboard, ChessError, Color, DrawReason, GameStatus, Move, PieceType, Square};

// =========================================================================
// MoveRecord
// =========================================================================

/// A recorded move in the game history.
#[derive(Clone, Debug)]
pub struct MoveRecord {
    /// The move that was played.
    pub mv: Move,
    /// SAN for the move, with check or mate suffix.
    pub san: String,
    /// What game status resulted from this move.
    pub status_after: GameStatus,
}

// =========================================================================
// Game
// =========================================================================

/// A chess game with history, undo and status tracking.
#[derive(Clone, Debug)]
pub struct Game {
    position: Position,
    move_history: Vec<MoveRecord>,
    undo_stack: Vec<UndoInfo>,
    /// Zobrist hashes of every position reached, current one last.
    position_hashes: Vec<u64>,
    status: GameStatus,
    starting_fen: String,
}

impl Game {
    // -----------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------

    /// Create a new game from the standard starting position.
    pub fn new() -> Self {
        Self::with_position(Position::starting())
    }

    /// Create a game from a FEN string.
    pub fn from_fen(fen: &str) -> Result<Self, ChessError> {
        Ok(Self::with_position(Position::from_fen(fen)?))
    }

    fn with_position(position: Position) -> Self {
        let mut game = Self {
            position_hashes: vec![position.zobrist_hash()],
            starting_fen: position.to_fen(),
            position,
            move_history: Vec::new(),
            undo_stack: Vec::new(),
            status: GameStatus::Active,
        };
        game.status = game.compute_status();
        game
    }

    /// Load a FEN position, resetting all history.
    pub fn load_fen(&mut self, fen: &str) -> Result<(), ChessError> {
        *self = Self::from_fen(fen)?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn side_to_move(&self) -> Color {
        self.position.side_to_move()
    }

    pub fn move_history(&self) -> &[MoveRecord] {
        &self.move_history
    }

    /// Hashes of all positions so far, oldest first, current last.
    pub fn position_hashes(&self) -> &[u64] {
        &self.position_hashes
    }

    pub fn legal_moves(&self) -> MoveList {
        movegen::legal_moves(&self.position)
    }

    pub fn legal_moves_from(&self, sq: Square) -> MoveList {
        movegen::legal_moves_from(&self.position, sq)
    }

    pub fn is_game_over(&self) -> bool {
        self.status.is_game_over()
    }

    pub fn to_fen(&self) -> String {
        self.position.to_fen()
    }

    pub fn starting_fen(&self) -> &str {
        &self.starting_fen
    }

    pub fn fullmove_number(&self) -> u16 {
        self.position.fullmove_number()
    }

    pub fn halfmove_clock(&self) -> u16 {
        self.position.halfmove_clock()
    }

    // -----------------------------------------------------------------
    // Playing moves
    // -----------------------------------------------------------------

    /// Play a legal move and return its SAN.
    pub fn make_move(&mut self, mv: Move) -> Result<String, ChessError> {
        if self.status.is_game_over() {
            return Err(ChessError::GameOver(self.status.to_string()));
        }

        let legal = self.legal_moves();
        if !legal.contains(mv) {
            return Err(ChessError::InvalidMove {
                mv: mv.to_string(),
                reason: "not a legal move".into(),
            });
        }
        let san = san::move_to_san_with(&self.position, mv, &legal);

        let undo = self.position.make_move(mv);
        movegen::fixup_ep_square(&mut self.position);
        self.undo_stack.push(undo);
        self.position_hashes.push(self.position.zobrist_hash());

        self.status = self.compute_status();
        self.move_history.push(MoveRecord {
            mv,
            san: san.clone(),
            status_after: self.status,
        });
        Ok(san)
    }

    /// Play a move given as compact text or SAN.
    pub fn play_text(&mut self, text: &str) -> Result<String, ChessError> {
        if self.status.is_game_over() {
            return Err(ChessError::GameOver(self.status.to_string()));
        }
        let mv = san::parse_move(&self.position, text).ok_or_else(|| ChessError::InvalidMove {
            mv: text.to_string(),
            reason: "no unique legal move matches".into(),
        })?;
        self.make_move(mv)
    }

    /// Undo the last move. Returns the move that was undone.
    pub fn undo_move(&mut self) -> Result<Move, ChessError> {
        let record = self.move_history.pop().ok_or(ChessError::NothingToUndo)?;
        let undo = self.undo_stack.pop().ok_or(ChessError::NothingToUndo)?;
        self.position_hashes.pop();

        self.position.unmake_move(record.mv, &undo);
        self.status = self.compute_status();
        Ok(record.mv)
    }

    // -----------------------------------------------------------------
    // Draw claims
    // -----------------------------------------------------------------

    /// Would a claim for `reason` succeed, either now or after playing `mv`?
    /// A move that delivers checkmate cannot be combined with a claim.
    pub fn can_claim_draw(&self, reason: DrawReason, mv: Option<Move>) -> bool {
        let mut after = self.position.clone();
        let mut extra = 0;
        if let Some(mv) = mv {
            if !self.legal_moves().contains(mv) {
                return false;
            }
            after.make_move(mv);
            movegen::fixup_ep_square(&mut after);
            extra = 1;
        }
        if movegen::in_check(&after) && movegen::legal_moves(&after).is_empty() {
            return false;
        }
        match reason {
            DrawReason::FiftyMoveRule => after.halfmove_clock() >= 100,
            DrawReason::ThreefoldRepetition => extra + self.repetitions_of(&after) >= 3,
            DrawReason::InsufficientMaterial => insufficient_material(&after),
        }
    }

    /// Claim a draw, optionally together with the move that creates the
    /// claimable position. The move is played whether or not the claim
    /// holds. Returns whether the game is now drawn by claim.
    pub fn claim_draw(&mut self, reason: DrawReason, mv: Option<Move>) -> Result<bool, ChessError> {
        if self.status.is_game_over() {
            return Err(ChessError::GameOver(self.status.to_string()));
        }
        let valid = self.can_claim_draw(reason, mv);
        if let Some(mv) = mv {
            self.make_move(mv)?;
        }
        if valid && !self.status.is_game_over() {
            self.status = GameStatus::Draw(reason);
            if let Some(last) = self.move_history.last_mut() {
                last.status_after = self.status;
            }
        }
        Ok(valid)
    }

    /// Number of positions in the game so far, current included, that are
    /// draw-rule equal to `target`.
    fn repetitions_of(&self, target: &Position) -> usize {
        let mut pos = self.position.clone();
        let mut count = usize::from(pos.draw_rule_equals(target));
        for (record, undo) in self.move_history.iter().zip(&self.undo_stack).rev() {
            pos.unmake_move(record.mv, undo);
            count += usize::from(pos.draw_rule_equals(target));
        }
        count
    }

    // -----------------------------------------------------------------
    // Status detection
    // -----------------------------------------------------------------

    fn compute_status(&self) -> GameStatus {
        let in_check = movegen::in_check(&self.position);
        if self.legal_moves().is_empty() {
            return if in_check {
                GameStatus::Checkmate
            } else {
                GameStatus::Stalemate
            };
        }
        if insufficient_material(&self.position) {
            return GameStatus::Draw(DrawReason::InsufficientMaterial);
        }
        if in_check {
            GameStatus::Check
        } else {
            GameStatus::Active
        }
    }
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

/// Neither side can ever mate: bare kings, a single minor piece, or only
/// bishops that all stand on squares of one colour.
pub fn insufficient_material(pos: &Position) -> bool {
    for color in [Color::White, Color::Black] {
        let heavy = pos.bb(color, PieceType::Pawn) | pos.bb(color, PieceType::Rook) | pos.bb(color, PieceType::Queen);
        if heavy.is_not_empty() {
            return false;
        }
    }
    let knights = pos.bb(Color::White, PieceType::Knight) | pos.bb(Color::Black, PieceType::Knight);
    let bishops = pos.bb(Color::White, PieceType::Bishop) | pos.bb(Color::Black, PieceType::Bishop);
    if (knights | bishops).pop_count() <= 1 {
        return true;
    }
    knights.is_empty()
        && ((bishops & Bitboard::LIGHT_SQUARES).is_empty() || (bishops & Bitboard::DARK_SQUARES).is_empty())
}

// =========================================================================
// Tests
// =========================================================================
