//! Quota checks and top-up payments.
//!
//! ```text
//! Unknown -> {Sufficient, Insufficient} -> ToppingUp -> {Sufficient, Failed}
//! ```
//!
//! A top-up only starts from `Insufficient`, or from `Failed` to retry. A
//! successful top-up only marks the state `Sufficient`. The manager does not
//! re-query the service afterwards; callers about to sign re-check quota
//! themselves.

use crate::error::{Error, Result, TopUpStep};
use crate::service::{AuthContext, QuotaStatus, SignatureService};
use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::{sol, SolCall};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// 0.01 cUSD in wei.
pub const DEFAULT_TOP_UP_AMOUNT: U256 = U256::from_limbs([10_000_000_000_000_000, 0, 0, 0]);

sol! {
    interface IStableToken {
        function allowance(address owner, address spender) external view returns (uint256);
        function increaseAllowance(address spender, uint256 addedValue) external returns (bool);
    }

    interface IOdisPayments {
        function payInCUSD(address account, uint256 value) external;
    }
}

/// Outcome of a mined transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub status: bool,
    pub hash: B256,
}

/// Submits transactions and reads contract state.
///
/// `submit_transaction` resolves once the transaction is mined.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn submit_transaction(
        &self,
        target: Address,
        call: Bytes,
        signer: Address,
    ) -> Result<TransactionReceipt>;

    async fn call_view(&self, target: Address, call: Bytes) -> Result<Bytes>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuotaState {
    Unknown,
    Sufficient,
    Insufficient,
    ToppingUp,
    Failed,
}

/// Contracts and amount used to buy more quota.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopUpConfig {
    /// Token the payment is made in.
    pub stable_token: Address,
    /// Contract that credits quota on payment.
    pub payments: Address,
    pub amount: U256,
}

impl TopUpConfig {
    pub fn new(stable_token: Address, payments: Address) -> Self {
        Self {
            stable_token,
            payments,
            amount: DEFAULT_TOP_UP_AMOUNT,
        }
    }

    pub fn with_amount(mut self, amount: U256) -> Self {
        self.amount = amount;
        self
    }
}

/// Hashes of the transactions a top-up submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopUpReceipt {
    /// `None` when the existing allowance already covered the payment.
    pub allowance_tx: Option<B256>,
    pub payment_tx: B256,
}

/// Quota checks and top-ups for one account.
///
/// The state tracks the account of the latest [`check_quota`](Self::check_quota)
/// call; use one manager per account.
pub struct QuotaManager {
    service: Arc<dyn SignatureService>,
    chain: Arc<dyn ChainClient>,
    config: TopUpConfig,
    state: watch::Sender<QuotaState>,
}

impl QuotaManager {
    pub fn new(
        service: Arc<dyn SignatureService>,
        chain: Arc<dyn ChainClient>,
        config: TopUpConfig,
    ) -> Self {
        let (state, _) = watch::channel(QuotaState::Unknown);
        Self {
            service,
            chain,
            config,
            state,
        }
    }

    pub fn state(&self) -> QuotaState {
        *self.state.borrow()
    }

    /// Observes state transitions.
    pub fn subscribe(&self) -> watch::Receiver<QuotaState> {
        self.state.subscribe()
    }

    pub fn config(&self) -> &TopUpConfig {
        &self.config
    }

    fn transition(&self, next: QuotaState) {
        let prev = self.state.send_replace(next);
        debug!(?prev, ?next, "quota state transition");
    }

    pub(crate) fn mark_failed(&self) {
        self.transition(QuotaState::Failed);
    }

    pub async fn check_quota(&self, auth: &AuthContext) -> Result<QuotaStatus> {
        let status = self.service.quota_status(auth).await?;
        info!(
            account = %auth.account(),
            remaining = status.remaining_quota,
            "identifier service quota"
        );
        self.transition(if status.is_sufficient() {
            QuotaState::Sufficient
        } else {
            QuotaState::Insufficient
        });
        Ok(status)
    }

    /// Raises the payments contract's allowance if needed, then pays for more quota.
    ///
    /// Refused unless the last check found the quota exhausted or a previous
    /// top-up failed.
    pub async fn top_up(&self, auth: &AuthContext) -> Result<TopUpReceipt> {
        let mut refused = None;
        self.state.send_if_modified(|state| match *state {
            QuotaState::Insufficient | QuotaState::Failed => {
                *state = QuotaState::ToppingUp;
                true
            }
            other => {
                refused = Some(other);
                false
            }
        });
        if let Some(state) = refused {
            warn!(?state, "quota top-up refused");
            return Err(Error::TopUpRefused { state });
        }
        debug!(next = ?QuotaState::ToppingUp, "quota state transition");

        match self.run_top_up(auth.account()).await {
            Ok(receipt) => {
                info!(payment_tx = %receipt.payment_tx, "quota top-up confirmed");
                self.transition(QuotaState::Sufficient);
                Ok(receipt)
            }
            Err(err) => {
                warn!(error = %err, "quota top-up failed");
                self.transition(QuotaState::Failed);
                Err(err)
            }
        }
    }

    async fn run_top_up(&self, account: Address) -> Result<TopUpReceipt> {
        let TopUpConfig {
            stable_token,
            payments,
            amount,
        } = self.config;

        let allowance = self.read_allowance(account).await?;
        debug!(%allowance, %amount, "current payments allowance");

        let allowance_tx = if allowance < amount {
            let call = IStableToken::increaseAllowanceCall {
                spender: payments,
                addedValue: amount,
            };
            let receipt = self
                .submit(TopUpStep::IncreaseAllowance, stable_token, call.abi_encode(), account)
                .await?;
            Some(receipt.hash)
        } else {
            debug!("allowance already covers the top-up amount");
            None
        };

        let call = IOdisPayments::payInCUSDCall {
            account,
            value: amount,
        };
        let receipt = self
            .submit(TopUpStep::Payment, payments, call.abi_encode(), account)
            .await?;

        Ok(TopUpReceipt {
            allowance_tx,
            payment_tx: receipt.hash,
        })
    }

    async fn read_allowance(&self, account: Address) -> Result<U256> {
        let call = IStableToken::allowanceCall {
            owner: account,
            spender: self.config.payments,
        };
        let data = self
            .chain
            .call_view(self.config.stable_token, call.abi_encode().into())
            .await
            .map_err(|e| Error::top_up(TopUpStep::ReadAllowance, e))?;
        IStableToken::allowanceCall::abi_decode_returns(&data)
            .map_err(|e| Error::top_up(TopUpStep::ReadAllowance, e))
    }

    async fn submit(
        &self,
        step: TopUpStep,
        target: Address,
        call: Vec<u8>,
        signer: Address,
    ) -> Result<TransactionReceipt> {
        let receipt = self
            .chain
            .submit_transaction(target, call.into(), signer)
            .await
            .map_err(|e| Error::top_up(step, e))?;
        debug!(%step, tx = %receipt.hash, status = receipt.status, "transaction mined");
        if !receipt.status {
            return Err(Error::top_up(
                step,
                format!("transaction {} reverted", receipt.hash),
            ));
        }
        Ok(receipt)
    }
}
