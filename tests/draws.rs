//! Draw rules: fifty-move and repetition claims, en-passant fixup in
//! repetition counting, and automatic insufficient-material draws.

use rust_chess_core::engine::game::Game;
use rust_chess_core::engine::types::{ChessError, DrawReason, GameStatus, Move, Square};

fn sq(name: &str) -> Square {
    Square::from_algebraic(name).unwrap()
}

fn play(game: &mut Game, moves: &[&str]) {
    for text in moves {
        game.play_text(text)
            .unwrap_or_else(|e| panic!("{text}: {e}"));
    }
}

// =====================================================================
// Fifty-move rule
// =====================================================================

#[test]
fn fifty_move_claim_with_move_from_clock_99() {
    let game = Game::from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 99 80").unwrap();
    let ra2 = Move::new(sq("a1"), sq("a2"));
    assert!(!game.can_claim_draw(DrawReason::FiftyMoveRule, None));
    assert!(game.can_claim_draw(DrawReason::FiftyMoveRule, Some(ra2)));
}

#[test]
fn fifty_move_claim_fails_from_clock_98() {
    let game = Game::from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 98 80").unwrap();
    let ra2 = Move::new(sq("a1"), sq("a2"));
    assert!(!game.can_claim_draw(DrawReason::FiftyMoveRule, Some(ra2)));
}

#[test]
fn pawn_move_resets_the_clock() {
    let game = Game::from_fen("4k3/8/8/8/8/8/P7/4K3 w - - 99 80").unwrap();
    let a3 = Move::new(sq("a2"), sq("a3"));
    assert!(!game.can_claim_draw(DrawReason::FiftyMoveRule, Some(a3)));
}

#[test]
fn claiming_fifty_moves_ends_the_game() {
    let mut game = Game::from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 99 80").unwrap();
    let ra2 = Move::new(sq("a1"), sq("a2"));
    assert!(game.claim_draw(DrawReason::FiftyMoveRule, Some(ra2)).unwrap());
    assert_eq!(game.status(), GameStatus::Draw(DrawReason::FiftyMoveRule));
    assert_eq!(game.move_history().len(), 1);
    assert!(game.make_move(Move::new(sq("e8"), sq("d8"))).is_err());
    assert!(matches!(game.play_text("Kd8"), Err(ChessError::GameOver(_))));
}

#[test]
fn fifty_move_rule_is_never_automatic() {
    let game = Game::from_fen("4k3/8/8/8/8/8/8/R3K3 w - - 150 120").unwrap();
    assert_eq!(game.status(), GameStatus::Active);
    assert!(game.can_claim_draw(DrawReason::FiftyMoveRule, None));
}

// =====================================================================
// Repetition
// =====================================================================

const SHUFFLE: [&str; 4] = ["Nf3", "Nf6", "Ng1", "Ng8"];

#[test]
fn three_occurrences_can_be_claimed() {
    let mut game = Game::new();
    play(&mut game, &SHUFFLE);
    play(&mut game, &SHUFFLE);
    assert!(game.can_claim_draw(DrawReason::ThreefoldRepetition, None));
    assert!(game.claim_draw(DrawReason::ThreefoldRepetition, None).unwrap());
    assert_eq!(
        game.status(),
        GameStatus::Draw(DrawReason::ThreefoldRepetition)
    );
}

#[test]
fn two_occurrences_cannot_be_claimed() {
    let mut game = Game::new();
    play(&mut game, &SHUFFLE);
    assert!(!game.can_claim_draw(DrawReason::ThreefoldRepetition, None));
    assert!(!game.claim_draw(DrawReason::ThreefoldRepetition, None).unwrap());
    assert_eq!(game.status(), GameStatus::Active);
}

#[test]
fn repetition_claim_with_the_repeating_move() {
    let mut game = Game::new();
    play(&mut game, &SHUFFLE);
    play(&mut game, &["Nf3", "Nf6", "Ng1"]);
    let ng8 = Move::new(sq("f6"), sq("g8"));
    assert!(!game.can_claim_draw(DrawReason::ThreefoldRepetition, None));
    assert!(game.can_claim_draw(DrawReason::ThreefoldRepetition, Some(ng8)));
    assert!(game.claim_draw(DrawReason::ThreefoldRepetition, Some(ng8)).unwrap());
    assert_eq!(game.move_history().len(), 8);
}

#[test]
fn unusable_en_passant_square_does_not_break_repetition() {
    // After e4 the d4 pawn is pinned by the b2 bishop, so e3 is no real
    // en-passant target and the position repeats normally.
    let mut game = Game::from_fen("8/8/5k2/8/3p4/8/1B2P3/6K1 w - - 0 1").unwrap();
    play(&mut game, &["e4"]);
    assert_eq!(game.position().en_passant(), None);
    let after_push = game.position_hashes()[1];

    let cycle = ["Kf7", "Kg2", "Kf6", "Kg1"];
    play(&mut game, &cycle);
    assert!(!game.can_claim_draw(DrawReason::ThreefoldRepetition, None));
    play(&mut game, &cycle);
    assert_eq!(game.position().zobrist_hash(), after_push);
    assert!(game.can_claim_draw(DrawReason::ThreefoldRepetition, None));
}

#[test]
fn usable_en_passant_square_makes_positions_differ() {
    // Same shape without the pin: e3 is a real target the first time only.
    let mut game = Game::from_fen("8/8/5k2/8/3p4/8/4P3/6K1 w - - 0 1").unwrap();
    play(&mut game, &["e4"]);
    assert_eq!(game.position().en_passant(), Some(sq("e3")));
    let cycle = ["Kf7", "Kg2", "Kf6", "Kg1"];
    play(&mut game, &cycle);
    play(&mut game, &cycle);
    assert!(!game.can_claim_draw(DrawReason::ThreefoldRepetition, None));
}

// =====================================================================
// Insufficient material
// =====================================================================

#[test]
fn capture_to_bare_kings_is_drawn() {
    let mut game = Game::from_fen("4k3/8/8/8/8/8/3r4/4K3 w - - 0 1").unwrap();
    play(&mut game, &["Kxd2"]);
    assert_eq!(
        game.status(),
        GameStatus::Draw(DrawReason::InsufficientMaterial)
    );
    assert!(game.is_game_over());
}

#[test]
fn insufficient_material_cases() {
    for (fen, drawn) in [
        ("4k3/8/8/8/8/8/8/4K3 w - - 0 1", true),
        ("4k3/8/8/8/8/8/8/3NK3 w - - 0 1", true),
        ("4k3/8/8/8/8/8/8/3BK3 w - - 0 1", true),
        ("1b2k3/8/8/8/8/8/8/B3K3 w - - 0 1", true),
        ("2b1k3/8/8/8/8/8/8/B3K3 w - - 0 1", false),
        ("4k3/8/8/8/8/8/P7/4K3 w - - 0 1", false),
        ("4k3/8/8/8/8/8/8/3RK3 w - - 0 1", false),
        ("4k3/8/8/8/8/8/8/2NNK3 w - - 0 1", false),
    ] {
        let game = Game::from_fen(fen).unwrap();
        assert_eq!(
            game.status() == GameStatus::Draw(DrawReason::InsufficientMaterial),
            drawn,
            "{fen}"
        );
    }
}
