//! Chess rules core and search engine.
//!
//! `engine` holds the board representation, move generation and move
//! notation; `ai` holds evaluation, the transposition table and the
//! NegaScout search that consumes them.

pub mod ai;
pub mod config;
pub mod engine;
