//! Pending action record and its transition table

use crate::amount::Amount;
use crate::chains::Chain;
use crate::swap::SwapQuote;
use crate::transaction::{ReceiptStatus, UnsignedTransaction};
use crate::{Error, Result, UserId};
use alloy::primitives::{Address, B256, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Estimated,
    Confirmed,
    Executing,
    Done,
    Cancelled,
    Expired,
    /// Failed before anything reached the chain, or the node dropped it
    Failed,
}

impl ActionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ActionStatus::Estimated => "estimated",
            ActionStatus::Confirmed => "confirmed",
            ActionStatus::Executing => "executing",
            ActionStatus::Done => "done",
            ActionStatus::Cancelled => "cancelled",
            ActionStatus::Expired => "expired",
            ActionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionStatus::Done | ActionStatus::Cancelled | ActionStatus::Expired | ActionStatus::Failed
        )
    }

    /// Whether the deadline still applies in this state
    pub fn can_expire(&self) -> bool {
        matches!(self, ActionStatus::Estimated | ActionStatus::Confirmed)
    }

    /// The transition table
    pub fn can_transition_to(&self, next: ActionStatus) -> bool {
        use ActionStatus::*;
        matches!(
            (self, next),
            (Estimated, Confirmed)
                | (Estimated, Cancelled)
                | (Estimated, Expired)
                | (Confirmed, Executing)
                | (Confirmed, Cancelled)
                | (Confirmed, Expired)
                | (Confirmed, Failed)
                | (Executing, Done)
                | (Executing, Cancelled)
                | (Executing, Expired)
                | (Executing, Failed)
        )
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the user asked for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKind {
    /// Spend native currency on `to_token`
    Buy {
        to_token: Address,
        to_symbol: String,
        to_decimals: u8,
        slippage_bps: u16,
        min_out: U256,
    },
    /// Transfer native currency (`token == None`) or an ERC-20
    Send {
        recipient: Address,
        token: Option<Address>,
        symbol: String,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Buy { .. } => "buy",
            ActionKind::Send { .. } => "send",
        }
    }
}

/// A user's in-flight (or last finished) buy or send
///
/// Holds public data only; key material is never attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: Uuid,
    pub user_id: UserId,
    /// Wallet the estimate was made for; only this address may sign it
    pub from: Address,
    pub kind: ActionKind,
    pub chain: Chain,
    /// Amount spent: native for buys, the sent asset for sends
    pub amount: Amount,
    pub quote_snapshot: Option<SwapQuote>,
    /// Upper bound on the network fee at estimate time, in native currency
    pub estimated_fee: Option<Amount>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ActionStatus,
    pub tx_hash: Option<B256>,
    /// The transaction behind `tx_hash`, kept to replay a revert
    pub submitted: Option<UnsignedTransaction>,
    pub receipt: Option<ReceiptStatus>,
    pub failure: Option<String>,
}

impl PendingAction {
    pub fn new(
        user_id: UserId,
        from: Address,
        kind: ActionKind,
        chain: Chain,
        amount: Amount,
        quote_snapshot: Option<SwapQuote>,
        ttl: chrono::Duration,
    ) -> Self {
        let created_at = Utc::now();
        let mut expires_at = created_at + ttl;
        if let Some(quote) = &quote_snapshot {
            expires_at = expires_at.min(quote.valid_until);
        }

        Self {
            id: Uuid::new_v4(),
            user_id,
            from,
            kind,
            chain,
            amount,
            quote_snapshot,
            estimated_fee: None,
            created_at,
            expires_at,
            status: ActionStatus::Estimated,
            tx_hash: None,
            submitted: None,
            receipt: None,
            failure: None,
        }
    }

    pub fn with_fee(mut self, fee: Amount) -> Self {
        self.estimated_fee = Some(fee);
        self
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Whether a signed transaction has been handed to the broadcaster
    pub fn is_broadcast(&self) -> bool {
        self.tx_hash.is_some()
    }

    /// Move to `next`, or fail with InvalidTransition naming `action`
    pub fn transition(&mut self, next: ActionStatus, action: &'static str) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                action,
                status: self.status.name(),
            });
        }
        tracing::debug!(
            action_id = %self.id,
            user_id = self.user_id,
            from = %self.status,
            to = %next,
            "Pending action transition"
        );
        self.status = next;
        Ok(())
    }

    /// Mark expired if the deadline passed in a state where it applies
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.can_expire() && self.is_past_deadline(now) {
            self.status = ActionStatus::Expired;
            return true;
        }
        false
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition(ActionStatus::Failed, "fail")?;
        self.failure = Some(reason.into());
        Ok(())
    }
}
