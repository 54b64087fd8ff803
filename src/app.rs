//! Service graph
//!
//! Everything is built from one explicit [`Config`]; there is no global state.

use crate::audit::{AuditEvent, AuditLog};
use crate::balance::BalanceService;
use crate::chains::ChainRegistry;
use crate::config::{Config, RpcConfig};
use crate::flow::{ConfirmationFlow, FlowServices};
use crate::rpc::{RetryPolicy, RpcPool};
use crate::swap::{OdosAggregator, SwapAggregator, SwapQuoteClient};
use crate::tokens::TokenRegistry;
use crate::transaction::{Broadcaster, TransactionBuilder};
use crate::wallet::{KeyCipher, SigningEngine, Wallet, WalletStore};
use crate::{Result, UserId};
use secrecy::SecretString;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct WalletBot {
    config: Config,
    chains: Arc<ChainRegistry>,
    tokens: Arc<TokenRegistry>,
    wallets: Arc<WalletStore>,
    balances: Arc<BalanceService>,
    flow: Arc<ConfirmationFlow>,
    audit: AuditLog,
}

impl WalletBot {
    /// Connect to the configured chains and the Odos aggregator
    pub async fn from_config(
        config: Config,
        rpc: &RpcConfig,
        encryption_key: Option<SecretString>,
    ) -> Result<Self> {
        let retry = RetryPolicy::from(&config.retry);
        let chains = Arc::new(ChainRegistry::from_rpc_config(&config.chains, rpc)?);
        let pool = RpcPool::connect(&chains, &retry)?;
        let aggregator: Arc<dyn SwapAggregator> = Arc::new(OdosAggregator::new()?);
        let cipher = Arc::new(KeyCipher::load(
            encryption_key,
            Path::new(&config.wallet.key_file),
        )?);

        tracing::info!(
            chains = ?config.chains,
            wallet_store = ?config.wallet.store_path,
            "Wallet bot configured"
        );

        Self::with_transports(config, chains, pool, aggregator, cipher).await
    }

    /// Wire the service graph over the given transports
    pub async fn with_transports(
        config: Config,
        chains: Arc<ChainRegistry>,
        pool: RpcPool,
        aggregator: Arc<dyn SwapAggregator>,
        cipher: Arc<KeyCipher>,
    ) -> Result<Self> {
        let retry = RetryPolicy::from(&config.retry);
        let tokens = Arc::new(TokenRegistry::new());

        let wallets = Arc::new(match &config.wallet.store_path {
            Some(path) => WalletStore::open(cipher.clone(), path).await?,
            None => WalletStore::in_memory(cipher.clone()),
        });
        let audit = match &config.audit_log_path {
            Some(path) => AuditLog::new(path),
            None => AuditLog::disabled(),
        };

        let balances = Arc::new(BalanceService::new(
            chains.clone(),
            tokens.clone(),
            pool.clone(),
            retry.clone(),
        ));
        let quotes = Arc::new(SwapQuoteClient::new(
            aggregator,
            retry.clone(),
            Duration::from_secs(config.swap.quote_ttl_secs),
        ));
        let builder = Arc::new(TransactionBuilder::new(
            chains.clone(),
            balances.clone(),
            quotes.clone(),
            pool.clone(),
            retry.clone(),
            config.swap.max_slippage_bps,
        ));
        let broadcaster = Arc::new(Broadcaster::new(
            pool,
            retry,
            config.broadcast.poll_interval(),
            config.broadcast.receipt_timeout(),
        ));

        let flow = Arc::new(ConfirmationFlow::new(
            FlowServices {
                chains: chains.clone(),
                wallets: wallets.clone(),
                balances: balances.clone(),
                quotes,
                builder,
                signer: Arc::new(SigningEngine::new(cipher)),
                broadcaster,
                audit: audit.clone(),
            },
            Duration::from_secs(config.flow.action_ttl_secs),
            config.swap.default_slippage_bps,
        )?);

        Ok(Self {
            config,
            chains,
            tokens,
            wallets,
            balances,
            flow,
            audit,
        })
    }

    /// Start the background expiry sweep
    pub fn start(&self) -> JoinHandle<()> {
        self.flow
            .spawn_expiry_sweeper(Duration::from_secs(self.config.flow.sweep_interval_secs))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn chains(&self) -> &ChainRegistry {
        &self.chains
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub fn balances(&self) -> &BalanceService {
        &self.balances
    }

    pub fn flow(&self) -> &ConfirmationFlow {
        &self.flow
    }

    pub async fn wallet(&self, user_id: UserId) -> Result<Wallet> {
        self.wallets.get(user_id).await
    }

    pub async fn create_wallet(&self, user_id: UserId) -> Result<Wallet> {
        let wallet = self.wallets.create(user_id).await?;
        self.audit
            .record(AuditEvent::new("wallet_created", user_id).address(wallet.address))
            .await;
        Ok(wallet)
    }

    pub async fn import_wallet(&self, user_id: UserId, raw_key: &SecretString) -> Result<Wallet> {
        let wallet = self.wallets.import(user_id, raw_key).await?;
        self.audit
            .record(AuditEvent::new("wallet_imported", user_id).address(wallet.address))
            .await;
        Ok(wallet)
    }

    /// Remove the wallet; `false` if there was none
    pub async fn delete_wallet(&self, user_id: UserId) -> Result<bool> {
        let deleted = self.wallets.delete(user_id).await?;
        if deleted {
            self.audit
                .record(AuditEvent::new("wallet_deleted", user_id))
                .await;
        }
        Ok(deleted)
    }
}
