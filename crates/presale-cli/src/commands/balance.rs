//! `presale balance` and `presale history`.

use clap::Args;
use presale_core::TransactionRecord;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::{get_json, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct BalanceArgs {
    /// User id.
    pub user: Uuid,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    /// User id.
    pub user: Uuid,

    /// Print records as JSON.
    #[arg(long)]
    pub json: bool,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: Decimal,
}

#[derive(Deserialize)]
struct HistoryResponse {
    records: Vec<TransactionRecord>,
}

pub async fn run(args: &BalanceArgs) -> anyhow::Result<()> {
    let resp: BalanceResponse =
        get_json(&args.endpoint, &format!("/users/{}/balance", args.user)).await?;
    println!("Balance for {}: {}", args.user, resp.balance);
    Ok(())
}

pub async fn history(args: &HistoryArgs) -> anyhow::Result<()> {
    let resp: HistoryResponse =
        get_json(&args.endpoint, &format!("/users/{}/history", args.user)).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resp.records)?);
        return Ok(());
    }
    if resp.records.is_empty() {
        println!("No credits for {}", args.user);
        return Ok(());
    }

    println!("{:<28} {:<10} {:>18} {:<6} REFERENCE", "TIME", "KIND", "AMOUNT", "CCY");
    for record in &resp.records {
        println!(
            "{:<28} {:<10} {:>18} {:<6} {}",
            record.created_at.to_rfc3339(),
            record.kind.to_string(),
            record.amount,
            record.currency,
            record.external_ref
        );
    }
    Ok(())
}
