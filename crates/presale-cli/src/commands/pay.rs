//! `presale pay`: Open a payment for a registered buyer.

use clap::Args;
use presale_settlement::PaymentQuote;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::{post_json, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct PayArgs {
    /// Buyer's user id.
    #[arg(short, long)]
    pub user: Uuid,

    /// Purchase amount in the quote currency.
    #[arg(short, long)]
    pub amount: Decimal,

    /// Currency the buyer pays in (e.g., BTC, ETH).
    #[arg(short, long)]
    pub currency: String,

    /// Currency the purchase is priced in.
    #[arg(short, long, default_value = "USD")]
    pub quote_currency: String,

    /// Buyer name passed to the gateway.
    #[arg(long, default_value = "")]
    pub name: String,

    /// Buyer email passed to the gateway.
    #[arg(long, default_value = "")]
    pub email: String,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

#[derive(Serialize)]
struct CreatePaymentRequest<'a> {
    user_id: Uuid,
    amount: Decimal,
    pay_currency: &'a str,
    quote_currency: &'a str,
    buyer_email: &'a str,
    buyer_name: &'a str,
}

pub async fn run(args: &PayArgs) -> anyhow::Result<()> {
    let body = CreatePaymentRequest {
        user_id: args.user,
        amount: args.amount,
        pay_currency: &args.currency,
        quote_currency: &args.quote_currency,
        buyer_email: &args.email,
        buyer_name: &args.name,
    };

    println!("Opening payment...");
    println!("  Buyer:    {}", args.user);
    println!("  Amount:   {} {}", args.amount, args.quote_currency);
    println!("  Pay in:   {}", args.currency);
    println!();

    let quote: PaymentQuote = post_json(&args.endpoint, "/payments", &body).await?;

    println!("Payment opened!");
    println!("  Transaction:  {}", quote.external_tx_id);
    println!("  Send:         {} {}", quote.pay_amount, quote.pay_currency);
    println!("  To address:   {}", quote.deposit_address);
    println!("  Tokens:       {}", quote.token_amount);
    println!("  Checkout:     {}", quote.checkout_url);
    println!("  Expires at:   {}", quote.expires_at);
    Ok(())
}
