//! Auditor tool: recompute a round's commitment and crash point from its
//! revealed secret.

use clap::Parser;
use crash_engine::fairness::verify;

#[derive(Parser, Debug)]
#[command(name = "verify_round")]
#[command(about = "Verify a crash round from its revealed secret", long_about = None)]
struct Args {
    /// Revealed server secret (hex)
    #[arg(long)]
    secret: String,

    /// Hash published before the round (hex)
    #[arg(long)]
    hash: Option<String>,

    /// Instant-bust modulus the round was played with
    #[arg(long, default_value = "25")]
    modulus: u64,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let verification = verify(&args.secret, args.hash.as_deref(), args.modulus)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&verification)?);
    } else {
        println!("Commitment:  {}", verification.hash);
        println!("Crash point: {:.2}x", verification.crash_point);
        match verification.hash_matches {
            Some(true) => println!("Published hash matches"),
            Some(false) => println!("Published hash DOES NOT match"),
            None => {}
        }
    }

    if verification.hash_matches == Some(false) {
        std::process::exit(1);
    }
    Ok(())
}
