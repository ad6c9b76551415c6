//! `presale quote`: Price a purchase without opening a payment.

use clap::Args;
use presale_core::Quote;
use rust_decimal::Decimal;
use serde::Serialize;

use super::{post_json, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct QuoteArgs {
    /// Purchase amount in the quote currency.
    #[arg(short, long)]
    pub amount: Decimal,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

#[derive(Serialize)]
struct QuoteRequest {
    amount: Decimal,
}

pub async fn run(args: &QuoteArgs) -> anyhow::Result<()> {
    let quote: Quote = post_json(
        &args.endpoint,
        "/quote",
        &QuoteRequest {
            amount: args.amount,
        },
    )
    .await?;

    println!("Quote:");
    println!("  Amount:        {}", quote.target_amount);
    println!("  Base price:    {}", quote.base_price);
    println!("  Supply ratio:  {}", quote.supply_ratio);
    println!("  Price:         {}", quote.effective_price);
    println!("  Tokens:        {}", quote.token_amount);
    Ok(())
}
