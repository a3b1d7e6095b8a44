use std::process::ExitCode;

use clap::{Parser, Subcommand};

use rust_chess_core::ai::evaluation::eval_white;
use rust_chess_core::ai::{ComputerPlayer, MATE0, PlayerAction, is_mate_score};
use rust_chess_core::config::EngineConfig;
use rust_chess_core::engine::board::{Position, START_FEN};
use rust_chess_core::engine::game::Game;
use rust_chess_core::engine::movegen;
use rust_chess_core::engine::san::move_to_san;
use rust_chess_core::engine::types::{ChessError, Move};

#[derive(Parser)]
#[command(name = "rust-chess-core", version, about = "Chess rules core and search engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search a position and print the chosen move with its principal variation.
    Search {
        #[arg(long, default_value = START_FEN)]
        fen: String,
        /// Moves to play from the FEN first, in SAN or coordinate notation.
        #[arg(long, num_args = 1.., value_delimiter = ' ')]
        moves: Vec<String>,
        #[arg(long)]
        depth: Option<i32>,
        /// Time budget in milliseconds; 0 searches by depth only.
        #[arg(long)]
        time_ms: Option<u64>,
        #[arg(long)]
        nodes: Option<u64>,
    },
    /// Count leaf nodes of the legal move tree.
    Perft {
        #[arg(long, default_value = START_FEN)]
        fen: String,
        depth: u32,
    },
    /// Perft split by root move.
    Divide {
        #[arg(long, default_value = START_FEN)]
        fen: String,
        depth: u32,
    },
    /// Static evaluation from White's point of view.
    Eval {
        #[arg(long, default_value = START_FEN)]
        fen: String,
    },
}

fn main() -> ExitCode {
    // Initialize tracing (structured logging).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_chess_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), ChessError> {
    match command {
        Command::Search {
            fen,
            moves,
            depth,
            time_ms,
            nodes,
        } => {
            let mut game = Game::from_fen(&fen)?;
            for text in &moves {
                game.play_text(text)?;
            }
            let mut config = EngineConfig::from_env();
            if let Some(depth) = depth {
                config.max_depth = depth;
            }
            if let Some(ms) = time_ms {
                config.min_time_ms = ms;
                config.max_time_ms = ms;
            } else if depth.is_some() {
                config.max_time_ms = 0;
            }
            if nodes.is_some() {
                config.max_nodes = nodes;
            }
            tracing::info!(
                "rust-chess-core v{} searching {}",
                env!("CARGO_PKG_VERSION"),
                game.to_fen()
            );
            let mut player = ComputerPlayer::new(&config);
            let result = player.search(&game);
            println!("score {}", format_score(result.score));
            println!(
                "depth {} nodes {} time {}ms",
                result.depth, result.nodes, result.elapsed_ms
            );
            println!("pv {}", format_pv(game.position(), &result.pv));
            match player.choose_from(&game, &result) {
                PlayerAction::Move(mv) => println!("bestmove {mv}"),
                PlayerAction::ClaimDraw { reason, mv: Some(mv) } => {
                    println!("bestmove {mv} claim {}", reason.as_str())
                }
                PlayerAction::ClaimDraw { reason, mv: None } => {
                    println!("claim {}", reason.as_str())
                }
                PlayerAction::NoMoves => println!("bestmove (none) {}", game.status()),
            }
        }
        Command::Perft { fen, depth } => {
            let mut pos = Position::from_fen(&fen)?;
            let start = std::time::Instant::now();
            let nodes = movegen::perft(&mut pos, depth);
            println!("{nodes} nodes in {}ms", start.elapsed().as_millis());
        }
        Command::Divide { fen, depth } => {
            let mut pos = Position::from_fen(&fen)?;
            let mut total = 0;
            for (mv, count) in movegen::divide(&mut pos, depth) {
                println!("{mv}: {count}");
                total += count;
            }
            println!("\nNodes searched: {total}");
        }
        Command::Eval { fen } => {
            let pos = Position::from_fen(&fen)?;
            println!("{pos}");
            println!("eval {}", eval_white(&pos));
        }
    }
    Ok(())
}

fn format_score(score: i32) -> String {
    if is_mate_score(score) {
        let plies = MATE0 - score.abs();
        let moves = (plies + 1) / 2;
        if score > 0 {
            format!("mate {moves}")
        } else {
            format!("mate -{moves}")
        }
    } else {
        format!("cp {score}")
    }
}

fn format_pv(pos: &Position, pv: &[Move]) -> String {
    let mut pos = pos.clone();
    let mut out = Vec::with_capacity(pv.len());
    for &mv in pv {
        out.push(move_to_san(&pos, mv));
        pos.make_move(mv);
    }
    out.join(" ")
}
