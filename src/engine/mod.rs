pub mod attacks;
pub mod board;
pub mod game;
pub mod movegen;
pub mod san;
pub mod types;
pub mod zobrist;

pub use board::{FenError, FenErrorKind, Position, UndoInfo};
pub use game::Game;
pub use movegen::{MoveList, legal_moves, legal_moves_from};
pub use types::*;
