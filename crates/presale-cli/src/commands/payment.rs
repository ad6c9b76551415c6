//! `presale payment` and `presale cancel`.

use clap::Args;
use presale_core::Payment;
use presale_settlement::SettlementResult;
use serde_json::json;

use super::{get_json, post_json, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct PaymentArgs {
    /// Gateway transaction id.
    pub external_tx_id: String,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Gateway transaction id.
    pub external_tx_id: String,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

pub async fn run(args: &PaymentArgs) -> anyhow::Result<()> {
    let payment: Payment = get_json(
        &args.endpoint,
        &format!("/payments/{}", args.external_tx_id),
    )
    .await?;

    println!("Payment {}:", payment.external_tx_id);
    println!("  Status:      {}", payment.status);
    println!("  Buyer:       {}", payment.user_id);
    println!("  Amount:      {} {}", payment.amount, payment.quote_currency);
    println!("  Pay amount:  {} {}", payment.pay_amount, payment.pay_currency);
    println!("  Received:    {}", payment.received_amount);
    println!("  Tokens:      {}", payment.token_amount);
    println!("  Commission:  {}", payment.referral_commission);
    if let Some(credited) = payment.credited_amount {
        println!("  Credited:    {}", credited);
    }
    if payment.fallback_credit {
        println!("  Note:        gateway reported no amount; requested amount was credited");
    }
    println!("  Created:     {}", payment.created_at);
    if let Some(settled_at) = payment.settled_at {
        println!("  Settled:     {}", settled_at);
    }
    Ok(())
}

pub async fn cancel(args: &CancelArgs) -> anyhow::Result<()> {
    let result: SettlementResult = post_json(
        &args.endpoint,
        &format!("/payments/{}/cancel", args.external_tx_id),
        &json!({}),
    )
    .await?;

    match result {
        SettlementResult::StatusUpdated { status, .. } => {
            println!("Payment {} is now {}", args.external_tx_id, status);
        }
        SettlementResult::AlreadySettled { status, .. } => {
            println!("Payment {} was already {}", args.external_tx_id, status);
        }
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    Ok(())
}
