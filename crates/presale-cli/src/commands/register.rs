//! `presale register`: Register a buyer.

use clap::Args;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{post_json, DEFAULT_ENDPOINT};

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Buyer email address.
    #[arg(long)]
    pub email: String,

    /// Referral code of the user who referred this buyer.
    #[arg(short, long)]
    pub referred_by: Option<String>,

    /// API endpoint of the node.
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
}

#[derive(Serialize)]
struct RegisterRequest<'a> {
    email: &'a str,
    referred_by: Option<&'a str>,
}

#[derive(Deserialize)]
struct UserResponse {
    user_id: Uuid,
    email: String,
    referral_code: String,
    referred_by: Option<String>,
    balance: Decimal,
}

pub async fn run(args: &RegisterArgs) -> anyhow::Result<()> {
    let user: UserResponse = post_json(
        &args.endpoint,
        "/users",
        &RegisterRequest {
            email: &args.email,
            referred_by: args.referred_by.as_deref(),
        },
    )
    .await?;

    println!("User registered!");
    println!("  User ID:        {}", user.user_id);
    println!("  Email:          {}", user.email);
    println!("  Referral code:  {}", user.referral_code);
    if let Some(code) = user.referred_by {
        println!("  Referred by:    {}", code);
    }
    println!("  Balance:        {}", user.balance);
    Ok(())
}
