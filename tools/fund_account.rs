//! Operator tool: credit a user's balance directly in the RocksDB store.
//! The server must be stopped; RocksDB holds an exclusive lock on the directory.

use clap::Parser;
use crash_engine::config::StorageConfig;
use crash_engine::store::RocksStore;
use rust_decimal::Decimal;

#[derive(Parser, Debug)]
#[command(name = "fund_account")]
#[command(about = "Credit a user balance in the crash engine database", long_about = None)]
struct Args {
    /// User identifier (wallet address or account id)
    #[arg(long)]
    user: String,

    /// Amount to credit
    #[arg(long)]
    amount: Decimal,

    /// Database directory
    #[arg(long, default_value = "./DB/crash_engine")]
    db_path: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if args.amount <= Decimal::ZERO {
        return Err(format!("amount must be positive, got {}", args.amount).into());
    }

    let store = RocksStore::open(&StorageConfig {
        data_directory: args.db_path.clone(),
        clear_on_start: false,
    })?;

    let balance = store.fund(&args.user, args.amount)?;
    println!("Credited {} to {} (balance: {})", args.amount, args.user, balance);
    Ok(())
}
