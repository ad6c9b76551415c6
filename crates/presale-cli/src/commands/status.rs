//! `presale status`: Query the status of a running node.

use clap::Args;
use presale_core::PricingConfig;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::{get_json, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    version: String,
    gateway: String,
    storage_backend: String,
    uptime_secs: u64,
    open_payments: usize,
    pricing: PricingConfig,
    commission_percent: Decimal,
}

pub async fn run(args: &StatusArgs) -> anyhow::Result<()> {
    let status: StatusResponse = get_json(&args.endpoint, "/status").await?;
    let price = status.pricing.effective_price()?;

    println!("Node Status:");
    println!("  Endpoint:       {}", args.endpoint);
    println!("  Version:        {}", status.version);
    println!("  Gateway:        {}", status.gateway);
    println!("  Storage:        {}", status.storage_backend);
    println!("  Uptime:         {}s", status.uptime_secs);
    println!("  Open payments:  {}", status.open_payments);
    println!(
        "  Supply:         {} / {}",
        status.pricing.current_supply, status.pricing.max_supply
    );
    println!("  Token price:    {}", price);
    println!("  Commission:     {}%", status.commission_percent);
    Ok(())
}
