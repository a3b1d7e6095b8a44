//! Move text: compact coordinate form and Standard Algebraic Notation.
//!
//! Compact: `e2e4`, `e7e8q`. SAN: `e4`, `Nf3`, `Bxe5`, `O-O`, `e8=Q+`,
//! `Raxd1#`.
//!
//! Parsers only ever return a legal move of the given position. Text that
//! is malformed, illegal or matches more than one move yields `None`.

use crate::engine::board::Position;
use crate::engine::movegen::{self, MoveList};
use crate::engine::types::{Color, Move, PieceType, Square};

// =========================================================================
// Compact form
// =========================================================================

/// Parse `e2e4` / `e7e8q` and check it against the legal moves.
pub fn parse_compact(pos: &Position, text: &str) -> Option<Move> {
    let mv = compact_to_move(text)?;
    movegen::legal_moves(pos).contains(mv).then_some(mv)
}

/// Syntax-only conversion. The result may be illegal in any position.
pub fn compact_to_move(text: &str) -> Option<Move> {
    let text = text.trim();
    if !text.is_ascii() || !(4..=5).contains(&text.len()) {
        return None;
    }
    let from = Square::from_algebraic(&text[0..2])?;
    let to = Square::from_algebraic(&text[2..4])?;
    match text[4..].chars().next() {
        None => Some(Move::new(from, to)),
        Some(c) => Some(Move::with_promotion(from, to, PieceType::from_promotion_char(c)?)),
    }
}

// =========================================================================
// SAN generation
// =========================================================================

/// Convert a legal move to SAN, including the `+` / `#` suffix.
pub fn move_to_san(pos: &Position, mv: Move) -> String {
    let legal = movegen::legal_moves(pos);
    move_to_san_with(pos, mv, &legal)
}

/// As [`move_to_san`], reusing an already generated legal move list.
pub fn move_to_san_with(pos: &Position, mv: Move, legal: &MoveList) -> String {
    let Some((us, piece)) = pos.piece_at(mv.from) else {
        return mv.to_string();
    };
    let mut san = String::with_capacity(8);

    if piece == PieceType::King && mv.from.file().abs_diff(mv.to.file()) == 2 {
        san.push_str(if mv.to.file() > mv.from.file() {
            "O-O"
        } else {
            "O-O-O"
        });
    } else if piece == PieceType::Pawn {
        if movegen::is_capture(pos, mv) {
            san.push((b'a' + mv.from.file()) as char);
            san.push('x');
        }
        san.push_str(&mv.to.to_algebraic());
        if let Some(promo) = mv.promotion {
            san.push('=');
            san.push(promo.to_char(Color::White));
        }
    } else {
        san.push(piece.to_char(Color::White));
        san.push_str(&disambiguation(pos, mv, us, piece, legal));
        if movegen::is_capture(pos, mv) {
            san.push('x');
        }
        san.push_str(&mv.to.to_algebraic());
    }

    let mut child = pos.clone();
    child.make_move(mv);
    if movegen::in_check(&child) {
        san.push(if movegen::legal_moves(&child).is_empty() {
            '#'
        } else {
            '+'
        });
    }
    san
}

/// File, rank or both, whichever is needed to tell `mv` apart from other
/// moves of the same piece type to the same square.
fn disambiguation(pos: &Position, mv: Move, us: Color, piece: PieceType, legal: &MoveList) -> String {
    let rivals: Vec<Square> = legal
        .iter()
        .filter(|m| m.to == mv.to && m.from != mv.from && pos.piece_at(m.from) == Some((us, piece)))
        .map(|m| m.from)
        .collect();

    if rivals.is_empty() {
        return String::new();
    }

    let file = (b'a' + mv.from.file()) as char;
    let rank = (b'1' + mv.from.rank()) as char;
    let same_file = rivals.iter().any(|s| s.file() == mv.from.file());
    let same_rank = rivals.iter().any(|s| s.rank() == mv.from.rank());

    match (same_file, same_rank) {
        (false, _) => file.to_string(),
        (true, false) => rank.to_string(),
        (true, true) => format!("{file}{rank}"),
    }
}

// =========================================================================
// SAN parsing
// =========================================================================

/// Parse SAN. Accepts `0-0` for castling, optional `=` before the
/// promotion piece, and ignores trailing `+#!?`. A capture marker on a
/// non-capturing move is rejected.
pub fn parse_san(pos: &Position, text: &str) -> Option<Move> {
    let legal = movegen::legal_moves(pos);
    let san = text.trim().trim_end_matches(['+', '#', '!', '?']);
    if san.is_empty() || !san.is_ascii() {
        return None;
    }

    let us = pos.side_to_move();
    let king = pos.king_sq(us);

    let castle_to = match san {
        "O-O" | "0-0" => Some(king.file() + 2).filter(|&f| f < 8),
        "O-O-O" | "0-0-0" => king.file().checked_sub(2),
        _ => None,
    };
    if let Some(file) = castle_to {
        let mv = Move::new(king, Square::from_file_rank(file, king.rank()));
        return legal.contains(mv).then_some(mv);
    }

    let bytes = san.as_bytes();
    let (piece, mut rest) = match bytes[0] {
        b'N' => (PieceType::Knight, &san[1..]),
        b'B' => (PieceType::Bishop, &san[1..]),
        b'R' => (PieceType::Rook, &san[1..]),
        b'Q' => (PieceType::Queen, &san[1..]),
        b'K' => (PieceType::King, &san[1..]),
        _ => (PieceType::Pawn, san),
    };

    let mut promotion = None;
    if piece == PieceType::Pawn
        && let Some(last) = rest.chars().last()
        && last.is_ascii_alphabetic()
        && !('a'..='h').contains(&last)
    {
        promotion = Some(PieceType::from_promotion_char(last)?);
        rest = rest[..rest.len() - 1].trim_end_matches('=');
    }

    if rest.len() < 2 {
        return None;
    }
    let dest = Square::from_algebraic(&rest[rest.len() - 2..])?;
    let prefix = &rest[..rest.len() - 2];
    let wants_capture = prefix.ends_with('x');
    let hint = prefix.trim_end_matches('x');

    let mut from_file = None;
    let mut from_rank = None;
    for c in hint.chars() {
        match c {
            'a'..='h' if from_file.is_none() => from_file = Some(c as u8 - b'a'),
            '1'..='8' if from_rank.is_none() => from_rank = Some(c as u8 - b'1'),
            _ => return None,
        }
    }

    let mut found = None;
    for m in legal.iter() {
        if m.to != dest
            || m.promotion != promotion
            || pos.piece_at(m.from) != Some((us, piece))
            || from_file.is_some_and(|f| m.from.file() != f)
            || from_rank.is_some_and(|r| m.from.rank() != r)
            || (wants_capture && !movegen::is_capture(pos, m))
        {
            continue;
        }
        if found.is_some() {
            return None;
        }
        found = Some(m);
    }
    found
}

/// Compact form first, then SAN.
pub fn parse_move(pos: &Position, text: &str) -> Option<Move> {
    parse_compact(pos, text).or_else(|| parse_san(pos, text))
}

// =========================================================================
// Tests
// =========================================================================
