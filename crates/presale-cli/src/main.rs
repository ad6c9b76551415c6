//! Presale CLI: Command-line interface for a presale settlement node.
//!
//! Subcommands: init, status, quote, register, pay, payment, cancel,
//! balance, history.

mod commands;

use clap::{Parser, Subcommand};

/// Presale: token sale payments and referral commissions.
#[derive(Parser, Debug)]
#[command(name = "presale", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a starter node configuration.
    Init(commands::init::InitArgs),
    /// Query the status of a running node.
    Status(commands::status::StatusArgs),
    /// Price a purchase without opening a payment.
    Quote(commands::quote::QuoteArgs),
    /// Register a buyer, optionally under a referral code.
    Register(commands::register::RegisterArgs),
    /// Open a payment for a registered buyer.
    Pay(commands::pay::PayArgs),
    /// Show a payment by its gateway transaction id.
    Payment(commands::payment::PaymentArgs),
    /// Cancel a payment that has received no funds.
    Cancel(commands::payment::CancelArgs),
    /// Show a user's credited balance.
    Balance(commands::balance::BalanceArgs),
    /// List a user's credit history.
    History(commands::balance::HistoryArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Init(args) => commands::init::run(args),
        Commands::Status(args) => commands::status::run(args).await,
        Commands::Quote(args) => commands::quote::run(args).await,
        Commands::Register(args) => commands::register::run(args).await,
        Commands::Pay(args) => commands::pay::run(args).await,
        Commands::Payment(args) => commands::payment::run(args).await,
        Commands::Cancel(args) => commands::payment::cancel(args).await,
        Commands::Balance(args) => commands::balance::run(args).await,
        Commands::History(args) => commands::balance::history(args).await,
    }
}
