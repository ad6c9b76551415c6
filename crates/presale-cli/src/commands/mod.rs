//! Subcommand implementations and the HTTP helpers they share.

pub mod balance;
pub mod init;
pub mod pay;
pub mod payment;
pub mod quote;
pub mod register;
pub mod status;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9100";

#[derive(Deserialize)]
struct ErrorResponse {
    error: String,
}

/// GET `{endpoint}/api/v1{path}` and decode the JSON body.
pub async fn get_json<T: DeserializeOwned>(endpoint: &str, path: &str) -> anyhow::Result<T> {
    let url = format!("{}/api/v1{}", endpoint.trim_end_matches('/'), path);
    let resp = reqwest::Client::new()
        .get(&url)
        .send()
        .await
        .with_context(|| unreachable_hint(endpoint))?;
    decode(resp).await
}

/// POST a JSON body to `{endpoint}/api/v1{path}` and decode the reply.
pub async fn post_json<B: Serialize, T: DeserializeOwned>(
    endpoint: &str,
    path: &str,
    body: &B,
) -> anyhow::Result<T> {
    let url = format!("{}/api/v1{}", endpoint.trim_end_matches('/'), path);
    let resp = reqwest::Client::new()
        .post(&url)
        .json(body)
        .send()
        .await
        .with_context(|| unreachable_hint(endpoint))?;
    decode(resp).await
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> anyhow::Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    match resp.json::<ErrorResponse>().await {
        Ok(err) => anyhow::bail!("request failed (HTTP {}): {}", status, err.error),
        Err(_) => anyhow::bail!("request failed (HTTP {})", status),
    }
}

fn unreachable_hint(endpoint: &str) -> String {
    format!(
        "could not reach node at {} (is it running? start it with: presale-node)",
        endpoint
    )
}
