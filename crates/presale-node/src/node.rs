//! The presale node orchestrator.
//!
//! Wires the ledger, gateway, and settlement engine together, then runs the
//! HTTP API and the background reconciler until shutdown.

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use presale_core::StaticSettings;
use presale_gateway::{CoinPaymentsClient, PaymentGateway, SandboxGateway};
use presale_ledger::{LedgerStore, MemoryLedger, RocksLedger};
use presale_settlement::{Reconciler, SettlementEngine};

use crate::config::{GatewayKind, PresaleConfig, StorageBackend};
use crate::state::NodeState;

pub struct PresaleNode {
    config: PresaleConfig,
    engine: Arc<SettlementEngine>,
    node_state: Arc<NodeState>,
    shutdown_tx: watch::Sender<bool>,
    api_task: Option<JoinHandle<Result<()>>>,
    reconciler_task: Option<JoinHandle<()>>,
}

impl PresaleNode {
    /// Open storage and build the engine. Nothing is served until `start`.
    pub fn new(config: PresaleConfig) -> Result<Self> {
        config.validate()?;

        let (store, backend): (Arc<dyn LedgerStore>, &'static str) = match config.storage.backend {
            StorageBackend::Rocksdb => {
                let path = config.storage.data_dir.join("ledger");
                let store = RocksLedger::open_with_lock_timeout(&path, config.storage.lock_timeout_ms)?;
                tracing::info!(path = %path.display(), "ledger opened");
                (Arc::new(store), "rocksdb")
            }
            StorageBackend::Memory => {
                tracing::warn!("using in-memory ledger; balances are lost on exit");
                (Arc::new(MemoryLedger::new()), "memory")
            }
        };

        let gateway: Arc<dyn PaymentGateway> = match config.gateway.kind {
            GatewayKind::Sandbox => {
                tracing::warn!("using sandbox gateway; no real funds are processed");
                Arc::new(SandboxGateway::new(config.gateway.ipn_secret.as_bytes().to_vec()))
            }
            GatewayKind::Coinpayments => Arc::new(CoinPaymentsClient::new(
                config.gateway.client_config(),
                config.gateway.secrets(),
            )?),
        };

        let settings = Arc::new(StaticSettings::new(config.sale_settings()));
        let engine = Arc::new(SettlementEngine::new(
            gateway,
            store,
            settings.clone(),
            config.settlement.clone(),
        ));
        let node_state = Arc::new(NodeState::new(engine.clone(), settings, backend));
        let (shutdown_tx, _) = watch::channel(false);

        tracing::info!(
            gateway = engine.gateway().gateway_id(),
            storage = backend,
            "presale node created"
        );

        Ok(Self {
            config,
            engine,
            node_state,
            shutdown_tx,
            api_task: None,
            reconciler_task: None,
        })
    }

    /// Spawn the HTTP API and, if enabled, the reconciler.
    pub async fn start(&mut self) -> Result<()> {
        let api_addr: SocketAddr = self.config.api_socket_addr()?;
        let listener = tokio::net::TcpListener::bind(api_addr).await?;
        let api_state = self.node_state.clone();
        self.api_task = Some(tokio::spawn(crate::api::serve(listener, api_state)));

        if self.config.reconciler.enabled {
            let reconciler = Reconciler::new(
                self.engine.clone(),
                Duration::from_secs(self.config.reconciler.interval_secs.max(1)),
            )
            .with_unavailable_grace(Duration::from_secs(
                self.config.reconciler.unavailable_grace_secs,
            ));
            let shutdown_rx = self.shutdown_tx.subscribe();
            self.reconciler_task = Some(tokio::spawn(async move {
                reconciler.run(shutdown_rx).await;
            }));
        } else {
            tracing::info!("reconciler disabled");
        }

        Ok(())
    }

    /// Wait for the API server to exit.
    pub async fn run(&mut self) -> Result<()> {
        let task = self
            .api_task
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("node not started"))?;
        let result = task.await;
        self.api_task = None;
        result?
    }

    /// Stop background tasks.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down presale node");

        // Ignore the error: no receivers means the reconciler is already gone.
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.reconciler_task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "reconciler task failed");
            }
        }
        if let Some(task) = self.api_task.take() {
            task.abort();
        }

        tracing::info!("presale node shut down");
        Ok(())
    }
}
