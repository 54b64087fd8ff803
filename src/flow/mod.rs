//! Per-user confirmation workflow
//!
//! estimate -> confirm -> execute, with at most one active action per user.
//! The action map lock is held for state changes and signing only, never
//! across a network call.

mod state;

pub use state::{ActionKind, ActionStatus, PendingAction};

use crate::amount::Amount;
use crate::audit::{AuditEvent, AuditLog};
use crate::balance::BalanceService;
use crate::chains::{Chain, ChainRegistry};
use crate::swap::SwapQuoteClient;
use crate::tokens::addresses::NATIVE;
use crate::transaction::{Broadcaster, ReceiptStatus, Reconciliation, TransactionBuilder};
use crate::wallet::{SignedTransaction, SigningEngine, WalletStore};
use crate::{Error, Result, UserId};
use alloy::primitives::Address;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use uuid::Uuid;

/// Services the flow drives
pub struct FlowServices {
    pub chains: Arc<ChainRegistry>,
    pub wallets: Arc<WalletStore>,
    pub balances: Arc<BalanceService>,
    pub quotes: Arc<SwapQuoteClient>,
    pub builder: Arc<TransactionBuilder>,
    pub signer: Arc<SigningEngine>,
    pub broadcaster: Arc<Broadcaster>,
    pub audit: AuditLog,
}

pub struct ConfirmationFlow {
    chains: Arc<ChainRegistry>,
    wallets: Arc<WalletStore>,
    balances: Arc<BalanceService>,
    quotes: Arc<SwapQuoteClient>,
    builder: Arc<TransactionBuilder>,
    signer: Arc<SigningEngine>,
    broadcaster: Arc<Broadcaster>,
    audit: AuditLog,
    action_ttl: chrono::Duration,
    default_slippage_bps: u16,
    /// Latest action per user, finished ones included for /status
    actions: Mutex<HashMap<UserId, PendingAction>>,
}

fn nothing_pending() -> Error {
    Error::NotFound("No pending action".to_string())
}

fn conflict(existing: &PendingAction) -> Error {
    Error::Conflict(format!(
        "A {} on {} is already {}",
        existing.kind.name(),
        existing.chain,
        existing.status
    ))
}

impl ConfirmationFlow {
    pub fn new(
        services: FlowServices,
        action_ttl: Duration,
        default_slippage_bps: u16,
    ) -> Result<Self> {
        let action_ttl = chrono::Duration::from_std(action_ttl)
            .map_err(|e| Error::Config(format!("Invalid action TTL: {}", e)))?;
        if default_slippage_bps > services.builder.max_slippage_bps() {
            return Err(Error::Config(format!(
                "Default slippage {} bps exceeds the maximum of {} bps",
                default_slippage_bps,
                services.builder.max_slippage_bps()
            )));
        }

        Ok(Self {
            chains: services.chains,
            wallets: services.wallets,
            balances: services.balances,
            quotes: services.quotes,
            builder: services.builder,
            signer: services.signer,
            broadcaster: services.broadcaster,
            audit: services.audit,
            action_ttl,
            default_slippage_bps,
            actions: Mutex::new(HashMap::new()),
        })
    }

    /// Quote spending `amount` of native currency on `to_token`
    pub async fn intent_buy(
        &self,
        user_id: UserId,
        chain: Chain,
        to_token: Address,
        amount: Amount,
        slippage_bps: Option<u16>,
    ) -> Result<PendingAction> {
        self.ensure_idle(user_id).await?;
        let wallet = self.wallets.get(user_id).await?;

        if amount.is_zero() {
            return Err(Error::Validation("Amount must be greater than 0".to_string()));
        }
        if to_token == NATIVE {
            return Err(Error::Validation(format!(
                "Cannot buy {} with itself",
                chain.native_symbol()
            )));
        }
        let slippage_bps = slippage_bps.unwrap_or(self.default_slippage_bps);
        self.builder.check_slippage(slippage_bps)?;

        let to_decimals = self.balances.token_decimals(chain, to_token).await?;
        let to_symbol = self.balances.token_symbol(chain, to_token);

        // No quote for an amount the wallet cannot cover
        self.builder
            .ensure_native(chain, wallet.address, amount.raw)
            .await?;

        let quote = self
            .quotes
            .quote(chain, NATIVE, to_token, amount.raw, wallet.address)
            .await?;
        let min_out = quote.min_out(slippage_bps);

        let action = PendingAction::new(
            user_id,
            wallet.address,
            ActionKind::Buy {
                to_token,
                to_symbol,
                to_decimals,
                slippage_bps,
                min_out,
            },
            chain,
            amount,
            Some(quote),
            self.action_ttl,
        );
        self.register(action).await
    }

    /// Validate a transfer and estimate its fee; `amount` is decimal text
    pub async fn intent_send(
        &self,
        user_id: UserId,
        chain: Chain,
        recipient: Address,
        amount: &str,
        token: Option<Address>,
    ) -> Result<PendingAction> {
        self.ensure_idle(user_id).await?;
        let wallet = self.wallets.get(user_id).await?;

        let native = self.chains.get(chain)?;
        let native_decimals = native.native_decimals;
        let (decimals, symbol) = match token {
            None => (native_decimals, native.native_symbol.clone()),
            Some(token) => (
                self.balances.token_decimals(chain, token).await?,
                self.balances.token_symbol(chain, token),
            ),
        };
        let amount = Amount::parse_positive(amount, decimals)?;

        let tx = self
            .builder
            .build_transfer(chain, wallet.address, recipient, amount, token)
            .await?;

        let action = PendingAction::new(
            user_id,
            wallet.address,
            ActionKind::Send {
                recipient,
                token,
                symbol,
            },
            chain,
            amount,
            None,
            self.action_ttl,
        )
        .with_fee(Amount::new(tx.max_fee_cost(), native_decimals));
        self.register(action).await
    }

    /// Execute the user's estimated action
    ///
    /// Returns once a receipt arrives or the polling window closes; in the
    /// latter case the action stays Executing and `/status` picks it up.
    pub async fn confirm(&self, user_id: UserId) -> Result<PendingAction> {
        let action = {
            let mut actions = self.actions.lock().await;
            let current = actions.get_mut(&user_id).ok_or_else(nothing_pending)?;

            let expired_now = current.expire_if_due(Utc::now());
            if current.status == ActionStatus::Expired {
                let id = current.id;
                drop(actions);
                if expired_now {
                    self.record_expired(user_id, id).await;
                }
                return Err(Error::QuoteExpired);
            }
            if current.status.is_terminal() {
                return Err(nothing_pending());
            }

            current.transition(ActionStatus::Confirmed, "confirm")?;
            current.transition(ActionStatus::Executing, "confirm")?;
            current.clone()
        };

        tracing::info!(
            user_id,
            action_id = %action.id,
            kind = action.kind.name(),
            chain = %action.chain,
            "Executing confirmed action"
        );
        self.audit
            .record(
                AuditEvent::new("action_confirmed", user_id)
                    .action(action.id)
                    .chain(action.chain),
            )
            .await;

        let signed = match self.prepare(&action).await {
            Ok(Some(signed)) => signed,
            // Cancelled while the transaction was being built
            Ok(None) => return self.current(user_id, action.id).await,
            Err(e) => {
                self.abort(&action, &e).await;
                return Err(e);
            }
        };

        let tx_hash = match self.broadcaster.submit(&signed).await {
            Ok(hash) => hash,
            // The node may have taken the transaction before the connection failed
            Err(Error::Rpc(msg)) => {
                tracing::warn!(
                    user_id,
                    action_id = %action.id,
                    tx_hash = %signed.tx_hash,
                    error = %msg,
                    "Submission outcome unknown; left for reconciliation"
                );
                self.audit
                    .record(
                        AuditEvent::new("submission_uncertain", user_id)
                            .action(action.id)
                            .chain(action.chain)
                            .address(signed.unsigned.from)
                            .tx_hash(signed.tx_hash),
                    )
                    .await;
                return Err(Error::Rpc(format!(
                    "{}; the transaction may still be mined, check /status",
                    msg
                )));
            }
            Err(e) => {
                self.abort(&action, &e).await;
                return Err(e);
            }
        };
        self.audit
            .record(
                AuditEvent::new("transaction_broadcast", user_id)
                    .action(action.id)
                    .chain(action.chain)
                    .address(signed.unsigned.from)
                    .tx_hash(tx_hash),
            )
            .await;

        let replay = signed.unsigned.as_call();
        let receipt = self
            .broadcaster
            .poll_receipt(
                action.chain,
                tx_hash,
                self.broadcaster.receipt_timeout(),
                Some(&replay),
            )
            .await?;
        self.settle(user_id, action.id, receipt).await
    }

    /// Cancel the active action; refused once its transaction is broadcast
    pub async fn cancel(&self, user_id: UserId) -> Result<PendingAction> {
        let (result, expired) = {
            let mut actions = self.actions.lock().await;
            let current = actions.get_mut(&user_id).ok_or_else(nothing_pending)?;
            let expired = current.expire_if_due(Utc::now()).then_some(current.id);

            let result = if current.status == ActionStatus::Executing && current.is_broadcast() {
                Err(Error::InvalidTransition {
                    action: "cancel",
                    status: "broadcast",
                })
            } else {
                current
                    .transition(ActionStatus::Cancelled, "cancel")
                    .map(|_| current.clone())
            };
            (result, expired)
        };

        if let Some(id) = expired {
            self.record_expired(user_id, id).await;
        }
        let cancelled = result?;

        tracing::info!(user_id, action_id = %cancelled.id, "Action cancelled");
        self.audit
            .record(
                AuditEvent::new("action_cancelled", user_id)
                    .action(cancelled.id)
                    .chain(cancelled.chain),
            )
            .await;
        Ok(cancelled)
    }

    /// The user's latest action, reconciled against the chain if in flight
    pub async fn status(&self, user_id: UserId) -> Result<Option<PendingAction>> {
        let (snapshot, expired_now) = {
            let mut actions = self.actions.lock().await;
            let Some(current) = actions.get_mut(&user_id) else {
                return Ok(None);
            };
            let expired_now = current.expire_if_due(Utc::now());
            (current.clone(), expired_now)
        };
        if expired_now {
            self.record_expired(user_id, snapshot.id).await;
        }

        let tx_hash = match (snapshot.status, snapshot.tx_hash, &snapshot.receipt) {
            (ActionStatus::Executing, Some(hash), None) => hash,
            _ => return Ok(Some(snapshot)),
        };

        let replay = snapshot.submitted.as_ref().map(|tx| tx.as_call());
        match self
            .broadcaster
            .reconcile(snapshot.chain, tx_hash, replay.as_ref())
            .await
        {
            Ok(Reconciliation::Mined(receipt)) => {
                self.settle(user_id, snapshot.id, receipt).await.map(Some)
            }
            Ok(Reconciliation::Pending) => Ok(Some(snapshot)),
            Ok(Reconciliation::Dropped) => {
                let updated = {
                    let mut actions = self.actions.lock().await;
                    match actions
                        .get_mut(&user_id)
                        .filter(|a| a.id == snapshot.id)
                    {
                        Some(current) if current.status == ActionStatus::Executing => {
                            current.fail("Transaction was dropped before inclusion")?;
                            current.clone()
                        }
                        Some(current) => current.clone(),
                        None => return Ok(Some(snapshot)),
                    }
                };
                tracing::warn!(user_id, action_id = %updated.id, tx_hash = %tx_hash, "Transaction dropped");
                self.audit
                    .record(
                        AuditEvent::new("transaction_dropped", user_id)
                            .action(updated.id)
                            .chain(updated.chain)
                            .tx_hash(tx_hash),
                    )
                    .await;
                Ok(Some(updated))
            }
            Err(e) => {
                tracing::warn!(user_id, tx_hash = %tx_hash, error = %e, "Reconciliation failed");
                Ok(Some(snapshot))
            }
        }
    }

    /// Expire every action past its deadline; returns how many changed
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<(UserId, Uuid)> = {
            let mut actions = self.actions.lock().await;
            actions
                .values_mut()
                .filter_map(|a| a.expire_if_due(now).then_some((a.user_id, a.id)))
                .collect()
        };
        for (user_id, id) in &expired {
            self.record_expired(*user_id, *id).await;
        }
        expired.len()
    }

    /// Run [`Self::sweep_expired`] every `period` until the flow is dropped
    pub fn spawn_expiry_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let flow = Arc::downgrade(self);
        let period = period.max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(flow) = flow.upgrade() else {
                    break;
                };
                let expired = flow.sweep_expired().await;
                if expired > 0 {
                    tracing::debug!(expired, "Expired stale pending actions");
                }
            }
        })
    }

    async fn ensure_idle(&self, user_id: UserId) -> Result<()> {
        let mut actions = self.actions.lock().await;
        if let Some(existing) = actions.get_mut(&user_id) {
            existing.expire_if_due(Utc::now());
            if existing.is_active() {
                return Err(conflict(existing));
            }
        }
        Ok(())
    }

    /// Store a new action unless another became active meanwhile
    async fn register(&self, action: PendingAction) -> Result<PendingAction> {
        {
            let mut actions = self.actions.lock().await;
            if let Some(existing) = actions.get_mut(&action.user_id) {
                existing.expire_if_due(Utc::now());
                if existing.is_active() {
                    return Err(conflict(existing));
                }
            }
            actions.insert(action.user_id, action.clone());
        }

        tracing::info!(
            user_id = action.user_id,
            action_id = %action.id,
            kind = action.kind.name(),
            chain = %action.chain,
            amount = %action.amount.raw,
            expires_at = %action.expires_at,
            "Pending action estimated"
        );
        self.audit
            .record(
                AuditEvent::new("intent_created", action.user_id)
                    .action(action.id)
                    .chain(action.chain)
                    .details(json!({
                        "kind": action.kind,
                        "amount": action.amount.raw.to_string(),
                        "expires_at": action.expires_at,
                    })),
            )
            .await;
        Ok(action)
    }

    /// Build and sign; `None` if the action was cancelled before signing
    async fn prepare(&self, action: &PendingAction) -> Result<Option<SignedTransaction>> {
        let wallet = self.wallets.get(action.user_id).await?;
        if wallet.address != action.from {
            return Err(Error::Conflict(format!(
                "This {} was estimated for {}, but the wallet is now {}",
                action.kind.name(),
                action.from,
                wallet.address
            )));
        }

        let unsigned = match &action.kind {
            ActionKind::Buy {
                slippage_bps,
                min_out,
                ..
            } => {
                let quote = action
                    .quote_snapshot
                    .as_ref()
                    .ok_or_else(|| Error::Validation("Buy action has no quote".to_string()))?;
                self.builder
                    .build_swap(action.from, quote, *slippage_bps, *min_out)
                    .await?
            }
            ActionKind::Send {
                recipient, token, ..
            } => {
                self.builder
                    .build_transfer(action.chain, action.from, *recipient, action.amount, *token)
                    .await?
            }
        };

        let mut actions = self.actions.lock().await;
        let Some(current) = actions
            .get_mut(&action.user_id)
            .filter(|a| a.id == action.id && a.status == ActionStatus::Executing)
        else {
            tracing::info!(user_id = action.user_id, action_id = %action.id, "Action cancelled before signing");
            return Ok(None);
        };

        let signed = self.signer.sign(&wallet, &unsigned)?;
        current.tx_hash = Some(signed.tx_hash);
        current.submitted = Some(unsigned);
        Ok(Some(signed))
    }

    /// Record a failure that happened before the transaction reached the chain
    async fn abort(&self, action: &PendingAction, error: &Error) {
        {
            let mut actions = self.actions.lock().await;
            if let Some(current) = actions
                .get_mut(&action.user_id)
                .filter(|a| a.id == action.id && a.status == ActionStatus::Executing)
            {
                let result = match error {
                    Error::QuoteExpired => current.transition(ActionStatus::Expired, "expire"),
                    other => current.fail(other.to_string()),
                };
                if let Err(e) = result {
                    tracing::error!(action_id = %action.id, error = %e, "Could not record failure");
                }
            }
        }

        tracing::warn!(
            user_id = action.user_id,
            action_id = %action.id,
            error = %error,
            "Action failed before broadcast"
        );
        self.audit
            .record(
                AuditEvent::new("action_failed", action.user_id)
                    .action(action.id)
                    .chain(action.chain)
                    .error(error),
            )
            .await;
    }

    /// Apply a receipt outcome; a timeout leaves the action Executing
    async fn settle(
        &self,
        user_id: UserId,
        id: Uuid,
        receipt: ReceiptStatus,
    ) -> Result<PendingAction> {
        let updated = {
            let mut actions = self.actions.lock().await;
            let current = actions
                .get_mut(&user_id)
                .filter(|a| a.id == id)
                .ok_or_else(nothing_pending)?;

            if current.status == ActionStatus::Executing && receipt != ReceiptStatus::TimedOut {
                current.transition(ActionStatus::Done, "complete")?;
                current.receipt = Some(receipt.clone());
            }
            current.clone()
        };

        let event = match &receipt {
            ReceiptStatus::Confirmed { .. } => "action_done",
            ReceiptStatus::Reverted { .. } => "action_reverted",
            ReceiptStatus::TimedOut => "receipt_timed_out",
        };
        tracing::info!(user_id, action_id = %id, outcome = event, tx_hash = ?updated.tx_hash, "Receipt processed");

        let mut entry = AuditEvent::new(event, user_id)
            .action(id)
            .chain(updated.chain)
            .details(json!(receipt));
        if let Some(hash) = updated.tx_hash {
            entry = entry.tx_hash(hash);
        }
        self.audit.record(entry).await;

        Ok(updated)
    }

    async fn current(&self, user_id: UserId, id: Uuid) -> Result<PendingAction> {
        self.actions
            .lock()
            .await
            .get(&user_id)
            .filter(|a| a.id == id)
            .cloned()
            .ok_or_else(nothing_pending)
    }

    async fn record_expired(&self, user_id: UserId, id: Uuid) {
        tracing::info!(user_id, action_id = %id, "Pending action expired");
        self.audit
            .record(AuditEvent::new("action_expired", user_id).action(id))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::test_support::registry;
    use crate::rpc::test_support::MockRpc;
    use crate::rpc::{RetryPolicy, RpcFailure, RpcPool};
    use crate::swap::test_support::MockAggregator;
    use crate::tokens::addresses;
    use crate::transaction::test_support::builder;
    use crate::wallet::{EncryptionKey, KeyCipher};
    use alloy::primitives::{address, U256};
    use secrecy::SecretString;
    use std::sync::atomic::Ordering;
    use tokio_test::{assert_err, assert_ok};

    const USER: UserId = 7;
    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const WALLET: Address = address!("f39fd6e51aad88f6f4ce6ab8827279cfffb92266");
    const OTHER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const OTHER_WALLET: Address = address!("70997970c51812dc3a010c7d01b50e0d17dc79c8");
    const RECIPIENT: Address = Address::repeat_byte(0x33);

    struct Harness {
        flow: Arc<ConfirmationFlow>,
        rpc: Arc<MockRpc>,
        aggregator: Arc<MockAggregator>,
    }

    struct Timing {
        quote_ttl: Duration,
        action_ttl: Duration,
        receipt_timeout: Duration,
    }

    impl Default for Timing {
        fn default() -> Self {
            Self {
                quote_ttl: Duration::from_secs(60),
                action_ttl: Duration::from_secs(120),
                receipt_timeout: Duration::from_secs(2),
            }
        }
    }

    fn ether(n: u64) -> U256 {
        U256::from(n) * U256::from(10u64).pow(U256::from(18u64))
    }

    fn funded() -> MockRpc {
        MockRpc::new().with_balance(WALLET, ether(1))
    }

    async fn harness(rpc: MockRpc, timing: Timing) -> Harness {
        let chain = Chain::Base;
        let rpc = Arc::new(rpc);
        let aggregator = Arc::new(MockAggregator::new((3_000, 1)));
        let (builder, balances, quotes) =
            builder(chain, rpc.clone(), aggregator.clone(), timing.quote_ttl);

        let cipher = Arc::new(KeyCipher::new(EncryptionKey::generate()));
        let wallets = Arc::new(WalletStore::in_memory(cipher.clone()));
        wallets
            .import(USER, &SecretString::from(TEST_KEY.to_string()))
            .await
            .unwrap();

        let mut pool = RpcPool::new();
        pool.insert(chain, rpc.clone());
        let broadcaster = Broadcaster::new(
            pool,
            RetryPolicy::immediate(3),
            Duration::from_millis(5),
            timing.receipt_timeout,
        );

        let flow = ConfirmationFlow::new(
            FlowServices {
                chains: registry(&[chain]),
                wallets,
                balances,
                quotes,
                builder: Arc::new(builder),
                signer: Arc::new(SigningEngine::new(cipher)),
                broadcaster: Arc::new(broadcaster),
                audit: AuditLog::disabled(),
            },
            timing.action_ttl,
            100,
        )
        .unwrap();

        Harness {
            flow: Arc::new(flow),
            rpc,
            aggregator,
        }
    }

    /// Mine the first submitted transaction as soon as it shows up
    fn auto_mine(rpc: Arc<MockRpc>, success: bool) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if let Some(hash) = rpc.last_submitted() {
                    rpc.mine(hash, success);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
    }

    async fn buy(h: &Harness, amount: &str) -> Result<PendingAction> {
        h.flow
            .intent_buy(
                USER,
                Chain::Base,
                addresses::USDC_BASE,
                Amount::parse(amount, 18).unwrap(),
                None,
            )
            .await
    }

    #[tokio::test]
    async fn test_buy_intent_records_quote() {
        let h = harness(funded(), Timing::default()).await;
        let action = buy(&h, "0.1").await.unwrap();

        assert_eq!(action.status, ActionStatus::Estimated);
        let quote = action.quote_snapshot.as_ref().unwrap();
        assert_eq!(quote.amount_in, ether(1) / U256::from(10u64));
        assert!(action.expires_at <= quote.valid_until);
        match action.kind {
            ActionKind::Buy {
                ref to_symbol,
                to_decimals,
                slippage_bps,
                min_out,
                ..
            } => {
                assert_eq!(to_symbol, "USDC");
                assert_eq!(to_decimals, 6);
                assert_eq!(slippage_bps, 100);
                assert_eq!(min_out, quote.min_out(100));
            }
            other => panic!("unexpected kind: {:?}", other),
        }
        assert_eq!(h.rpc.submissions(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_confirms_submit_once() {
        let h = harness(funded(), Timing::default()).await;
        buy(&h, "0.1").await.unwrap();
        let miner = auto_mine(h.rpc.clone(), true);

        let (first, second) = tokio::join!(h.flow.confirm(USER), h.flow.confirm(USER));
        miner.await.unwrap();

        let (done, rejected) = match (first, second) {
            (Ok(done), Err(e)) | (Err(e), Ok(done)) => (done, e),
            other => panic!("expected exactly one success, got {:?}", other),
        };
        assert!(matches!(rejected, Error::InvalidTransition { action: "confirm", .. }));
        assert_eq!(done.status, ActionStatus::Done);
        assert!(matches!(done.receipt, Some(ReceiptStatus::Confirmed { .. })));
        assert_eq!(h.rpc.submissions(), 1);
        assert_eq!(h.aggregator.assemble_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_back_to_back_confirms_submit_once() {
        let h = harness(funded(), Timing::default()).await;
        buy(&h, "0.1").await.unwrap();
        let miner = auto_mine(h.rpc.clone(), true);

        h.flow.confirm(USER).await.unwrap();
        miner.await.unwrap();
        let err = h.flow.confirm(USER).await.unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(h.rpc.submissions(), 1);
    }

    #[tokio::test]
    async fn test_buy_exceeding_balance_is_rejected_before_quoting() {
        let rpc = MockRpc::new().with_balance(WALLET, ether(1) / U256::from(1_000u64));
        let h = harness(rpc, Timing::default()).await;

        let err = buy(&h, "0.01").await.unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
        assert_eq!(h.aggregator.quote_calls(), 0);
        assert_eq!(h.rpc.submissions(), 0);
        assert!(h.flow.status(USER).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirm_after_quote_expiry() {
        let h = harness(
            funded(),
            Timing {
                quote_ttl: Duration::ZERO,
                ..Timing::default()
            },
        )
        .await;
        buy(&h, "0.1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let err = h.flow.confirm(USER).await.unwrap_err();
        assert!(matches!(err, Error::QuoteExpired));

        let status = h.flow.status(USER).await.unwrap().unwrap();
        assert_eq!(status.status, ActionStatus::Expired);
        assert_eq!(h.aggregator.assemble_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.rpc.submissions(), 0);

        // Still expired on a second attempt
        assert!(matches!(h.flow.confirm(USER).await, Err(Error::QuoteExpired)));
    }

    #[tokio::test]
    async fn test_second_intent_conflicts() {
        let h = harness(funded(), Timing::default()).await;
        let first = buy(&h, "0.1").await.unwrap();

        let err = h
            .flow
            .intent_send(USER, Chain::Base, RECIPIENT, "0.01", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // The original action is untouched
        let status = h.flow.status(USER).await.unwrap().unwrap();
        assert_eq!(status.id, first.id);
        assert_eq!(status.status, ActionStatus::Estimated);
    }

    #[tokio::test]
    async fn test_cancel_allows_new_intent() {
        let h = harness(funded(), Timing::default()).await;
        buy(&h, "0.1").await.unwrap();

        let cancelled = h.flow.cancel(USER).await.unwrap();
        assert_eq!(cancelled.status, ActionStatus::Cancelled);
        assert!(matches!(h.flow.confirm(USER).await, Err(Error::NotFound(_))));
        assert!(matches!(
            h.flow.cancel(USER).await,
            Err(Error::InvalidTransition { action: "cancel", status: "cancelled" })
        ));

        let next = buy(&h, "0.05").await.unwrap();
        assert_eq!(next.status, ActionStatus::Estimated);
        assert_eq!(h.rpc.submissions(), 0);
    }

    #[tokio::test]
    async fn test_native_send_flow() {
        let h = harness(funded(), Timing::default()).await;
        let action = h
            .flow
            .intent_send(USER, Chain::Base, RECIPIENT, "0.1", None)
            .await
            .unwrap();
        assert_eq!(action.amount.raw, ether(1) / U256::from(10u64));
        // 25_200 gas at 30 gwei
        assert_eq!(
            action.estimated_fee,
            Some(Amount::new(U256::from(25_200u64) * U256::from(30_000_000_000u64), 18))
        );
        assert_eq!(action.from, WALLET);

        let miner = auto_mine(h.rpc.clone(), true);
        let done = h.flow.confirm(USER).await.unwrap();
        miner.await.unwrap();

        assert_eq!(done.status, ActionStatus::Done);
        assert_eq!(done.tx_hash, h.rpc.last_submitted());
    }

    #[tokio::test]
    async fn test_send_rejects_excess_precision() {
        let h = harness(funded(), Timing::default()).await;
        let err = h
            .flow
            .intent_send(USER, Chain::Base, RECIPIENT, "0.1234567", Some(addresses::USDC_BASE))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_reverted_swap_is_done_with_reason() {
        let h = harness(
            funded().with_revert_reason("Too little received"),
            Timing::default(),
        )
        .await;
        buy(&h, "0.1").await.unwrap();
        let miner = auto_mine(h.rpc.clone(), false);

        let done = h.flow.confirm(USER).await.unwrap();
        miner.await.unwrap();

        assert_eq!(done.status, ActionStatus::Done);
        match done.receipt {
            Some(ReceiptStatus::Reverted { reason, .. }) => {
                assert_eq!(reason.as_deref(), Some("Too little received"));
            }
            other => panic!("unexpected receipt: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_receipt_timeout_then_reconcile() {
        let h = harness(
            funded(),
            Timing {
                receipt_timeout: Duration::from_millis(30),
                ..Timing::default()
            },
        )
        .await;
        buy(&h, "0.1").await.unwrap();

        let pending = assert_ok!(h.flow.confirm(USER).await);
        assert_eq!(pending.status, ActionStatus::Executing);
        let hash = pending.tx_hash.unwrap();

        // Broadcast transactions cannot be cancelled
        assert!(matches!(
            h.flow.cancel(USER).await,
            Err(Error::InvalidTransition { action: "cancel", .. })
        ));
        assert!(matches!(
            buy(&h, "0.1").await,
            Err(Error::Conflict(_))
        ));

        let still = h.flow.status(USER).await.unwrap().unwrap();
        assert_eq!(still.status, ActionStatus::Executing);

        h.rpc.mine(hash, true);
        let done = h.flow.status(USER).await.unwrap().unwrap();
        assert_eq!(done.status, ActionStatus::Done);
        assert_eq!(h.rpc.submissions(), 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_fails() {
        let h = harness(
            funded(),
            Timing {
                receipt_timeout: Duration::from_millis(30),
                ..Timing::default()
            },
        )
        .await;
        buy(&h, "0.1").await.unwrap();
        let pending = h.flow.confirm(USER).await.unwrap();

        h.rpc.drop_tx(pending.tx_hash.unwrap());
        let failed = h.flow.status(USER).await.unwrap().unwrap();
        assert_eq!(failed.status, ActionStatus::Failed);
        assert!(failed.failure.is_some());

        assert_ok!(buy(&h, "0.1").await);
    }

    #[tokio::test]
    async fn test_rejected_submission_marks_failed() {
        let h = harness(
            funded().with_submit_error(RpcFailure::Rejected("nonce too low".to_string())),
            Timing::default(),
        )
        .await;
        buy(&h, "0.1").await.unwrap();

        let err = assert_err!(h.flow.confirm(USER).await);
        assert!(matches!(err, Error::RpcRejected(_)));

        let status = h.flow.status(USER).await.unwrap().unwrap();
        assert_eq!(status.status, ActionStatus::Failed);
        assert!(status.failure.unwrap().contains("nonce too low"));
    }

    #[tokio::test]
    async fn test_transient_submit_failure_stays_executing() {
        let h = harness(
            funded().with_submit_error(RpcFailure::Transient("connection reset".to_string())),
            Timing::default(),
        )
        .await;
        buy(&h, "0.1").await.unwrap();

        let err = assert_err!(h.flow.confirm(USER).await);
        assert!(matches!(err, Error::Rpc(_)));

        let hash = {
            let actions = h.flow.actions.lock().await;
            assert_eq!(actions[&USER].status, ActionStatus::Executing);
            actions[&USER].tx_hash.unwrap()
        };
        assert!(matches!(buy(&h, "0.1").await, Err(Error::Conflict(_))));
        assert!(matches!(
            h.flow.cancel(USER).await,
            Err(Error::InvalidTransition { action: "cancel", .. })
        ));

        // It reached the pool after all
        h.rpc.mine(hash, true);
        let done = h.flow.status(USER).await.unwrap().unwrap();
        assert_eq!(done.status, ActionStatus::Done);
    }

    #[tokio::test]
    async fn test_confirm_refuses_replaced_wallet() {
        let h = harness(
            funded().with_balance(OTHER_WALLET, ether(1)),
            Timing::default(),
        )
        .await;
        let action = h
            .flow
            .intent_send(USER, Chain::Base, RECIPIENT, "0.1", None)
            .await
            .unwrap();
        assert_eq!(action.from, WALLET);

        h.flow.wallets.delete(USER).await.unwrap();
        h.flow
            .wallets
            .import(USER, &SecretString::from(OTHER_KEY.to_string()))
            .await
            .unwrap();

        let err = assert_err!(h.flow.confirm(USER).await);
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(h.rpc.submissions(), 0);

        let status = h.flow.status(USER).await.unwrap().unwrap();
        assert_eq!(status.status, ActionStatus::Failed);
    }

    #[tokio::test]
    async fn test_price_drop_before_confirm_expires_buy() {
        let h = harness(funded(), Timing::default()).await;
        buy(&h, "0.1").await.unwrap();
        h.aggregator.set_rate((2_900, 1));

        let err = assert_err!(h.flow.confirm(USER).await);
        assert!(matches!(err, Error::QuoteExpired));

        let status = h.flow.status(USER).await.unwrap().unwrap();
        assert_eq!(status.status, ActionStatus::Expired);
        assert_eq!(h.aggregator.assemble_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.rpc.submissions(), 0);
    }

    #[tokio::test]
    async fn test_reconciled_revert_carries_reason() {
        let h = harness(
            funded().with_revert_reason("Too little received"),
            Timing {
                receipt_timeout: Duration::from_millis(30),
                ..Timing::default()
            },
        )
        .await;
        buy(&h, "0.1").await.unwrap();

        let pending = h.flow.confirm(USER).await.unwrap();
        assert_eq!(pending.status, ActionStatus::Executing);
        assert!(pending.submitted.is_some());

        h.rpc.mine(pending.tx_hash.unwrap(), false);
        let done = h.flow.status(USER).await.unwrap().unwrap();
        match done.receipt {
            Some(ReceiptStatus::Reverted { reason, .. }) => {
                assert_eq!(reason.as_deref(), Some("Too little received"));
            }
            other => panic!("unexpected receipt: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_confirm_without_wallet_or_action() {
        let h = harness(funded(), Timing::default()).await;
        assert!(matches!(h.flow.confirm(USER).await, Err(Error::NotFound(_))));
        assert!(matches!(
            h.flow.intent_send(99, Chain::Base, RECIPIENT, "0.1", None).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sweeper_expires_stale_actions() {
        let h = harness(
            funded(),
            Timing {
                action_ttl: Duration::ZERO,
                ..Timing::default()
            },
        )
        .await;
        buy(&h, "0.1").await.unwrap();

        let sweeper = h.flow.spawn_expiry_sweeper(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(50)).await;

        {
            let actions = h.flow.actions.lock().await;
            assert_eq!(actions[&USER].status, ActionStatus::Expired);
        }
        assert_eq!(h.flow.sweep_expired().await, 0);
        sweeper.abort();
    }
}
