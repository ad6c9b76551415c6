//! `presale init`: Write a starter node configuration.

use clap::Args;
use std::path::{Path, PathBuf};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (defaults to current directory).
    #[arg(default_value = ".")]
    pub dir: PathBuf,

    /// Overwrite an existing presale.toml.
    #[arg(long)]
    pub force: bool,
}

const DEFAULT_CONFIG: &str = r#"# Presale Node Configuration

[api]
listen_addr = "127.0.0.1"
port = 9100

[storage]
backend = "rocksdb"
data_dir = "./data"
lock_timeout_ms = 2000

[logging]
level = "info"
format = "text"

[gateway]
# "sandbox" settles against an in-process simulator; "coinpayments" talks
# to the hosted processor and needs the keys below.
kind = "sandbox"
api_url = "https://www.coinpayments.net/api.php"
public_key = ""
private_key = ""
ipn_secret = "change-me"
merchant_id = ""
# ipn_url = "https://presale.example.com/api/v1/ipn"
request_timeout_secs = 15

[pricing]
base_price = "0.1"
current_supply = "0"
max_supply = "100000000"

[referral]
commission_percent = "5"

[settlement]
max_settlement_attempts = 3
retry_backoff_ms = 25

[reconciler]
enabled = true
interval_secs = 60
unavailable_grace_secs = 86400
"#;

pub fn run(args: &InitArgs) -> anyhow::Result<()> {
    let config_path = write_config(&args.dir, args.force)?;
    println!("Initialized presale node at {}", config_path.display());
    println!("Set gateway.ipn_secret before exposing the node to a gateway.");
    println!("Run 'presale-node --config {}' to start it.", config_path.display());
    Ok(())
}

fn write_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    let config_path = dir.join("presale.toml");
    if config_path.exists() && !force {
        anyhow::bail!(
            "configuration file already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    }

    std::fs::create_dir_all(dir)?;
    std::fs::write(&config_path, DEFAULT_CONFIG)?;
    std::fs::create_dir_all(dir.join("data"))?;
    Ok(config_path)
}
