pub mod evaluation;
pub mod heuristics;
pub mod player;
pub mod search;
pub mod tt;

pub use player::{ComputerPlayer, PlayerAction};
pub use search::{MATE0, Search, SearchParams, SearchResult, StopSearch, is_mate_score};
pub use tt::{Bound, TTEntry, TranspositionTable};
