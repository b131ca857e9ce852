//! In-memory collaborators for unit tests.

use crate::blind_sigs::{BlindSignature, BlindSigner, BlindedMessage};
use crate::error::{Error, Result};
use crate::keys::ServicePublicKey;
use crate::quota::{ChainClient, TransactionReceipt};
use crate::service::{AuthContext, AuthMethod, QuotaStatus, SignatureService, StaticAuthorizer};
use alloy_primitives::{address, Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) const ACCOUNT: Address = address!("0xf14790BAdd2638cECB5e885fc7fAD1b6660AAc34");
pub(crate) const STABLE_TOKEN: Address = address!("0x765DE816845861e75A25fCA122bb6898B8B1282a");
pub(crate) const PAYMENTS: Address = address!("0x645170cdB6B5c1bc80847bb728dBa56C50a20a49");

/// Quota credited by one payment.
pub(crate) const QUOTA_PER_PAYMENT: u64 = 10;

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn auth() -> AuthContext {
    AuthContext::new(
        ACCOUNT,
        AuthMethod::EncryptionKey,
        Arc::new(StaticAuthorizer::new("test-token")),
    )
}

pub(crate) fn fixed_signer() -> BlindSigner {
    BlindSigner::try_from(*b"********************************").unwrap()
}

/// Identifier service that signs with a local key and counts quota.
pub(crate) struct LocalSignatureService {
    signer: BlindSigner,
    forger: Option<BlindSigner>,
    remaining: Arc<AtomicU64>,
    sign_requests: AtomicUsize,
    quota_requests: AtomicUsize,
}

impl LocalSignatureService {
    pub(crate) fn new(remaining: u64) -> Self {
        Self {
            signer: fixed_signer(),
            forger: None,
            remaining: Arc::new(AtomicU64::new(remaining)),
            sign_requests: AtomicUsize::new(0),
            quota_requests: AtomicUsize::new(0),
        }
    }

    /// Signs with a key other than the advertised one.
    pub(crate) fn forging(mut self) -> Self {
        self.forger = Some(BlindSigner::new());
        self
    }

    pub(crate) fn public_key(&self) -> ServicePublicKey {
        ServicePublicKey::from(self.signer.public_key())
    }

    pub(crate) fn quota_handle(&self) -> Arc<AtomicU64> {
        self.remaining.clone()
    }

    pub(crate) fn sign_requests(&self) -> usize {
        self.sign_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn quota_requests(&self) -> usize {
        self.quota_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SignatureService for LocalSignatureService {
    async fn request_signature(
        &self,
        blinded: &BlindedMessage,
        _auth: &AuthContext,
    ) -> Result<BlindSignature> {
        self.sign_requests.fetch_add(1, Ordering::SeqCst);
        self.remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |q| q.checked_sub(1))
            .map_err(|_| Error::ServiceRejected("out of quota".to_string()))?;

        let signer = self.forger.as_ref().unwrap_or(&self.signer);
        Ok(BlindSignature::Combined(
            signer.sign_blinded(&blinded.message_bytes())?.to_vec(),
        ))
    }

    async fn quota_status(&self, _auth: &AuthContext) -> Result<QuotaStatus> {
        self.quota_requests.fetch_add(1, Ordering::SeqCst);
        let remaining = self.remaining.load(Ordering::SeqCst);
        Ok(QuotaStatus::from_counts(0, remaining, None))
    }
}

/// Chain with one token allowance and a payments contract that credits quota.
pub(crate) struct MockChain {
    allowance: Mutex<U256>,
    quota: Arc<AtomicU64>,
    submitted: Mutex<Vec<[u8; 4]>>,
    revert: Option<[u8; 4]>,
    fail_views: bool,
    credit_payments: bool,
}

impl MockChain {
    pub(crate) fn new(allowance: U256, quota: Arc<AtomicU64>) -> Self {
        Self {
            allowance: Mutex::new(allowance),
            quota,
            submitted: Mutex::new(Vec::new()),
            revert: None,
            fail_views: false,
            credit_payments: true,
        }
    }

    /// Mines calls with this selector as reverted.
    pub(crate) fn reverting(mut self, selector: [u8; 4]) -> Self {
        self.revert = Some(selector);
        self
    }

    pub(crate) fn failing_views(mut self) -> Self {
        self.fail_views = true;
        self
    }

    /// Payments confirm but the service never sees the credit.
    pub(crate) fn without_credit(mut self) -> Self {
        self.credit_payments = false;
        self
    }

    pub(crate) fn submitted_selectors(&self) -> Vec<[u8; 4]> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn submit_transaction(
        &self,
        target: Address,
        call: Bytes,
        signer: Address,
    ) -> Result<TransactionReceipt> {
        assert_eq!(signer, ACCOUNT);
        let selector: [u8; 4] = call[..4].try_into().unwrap();
        let mut submitted = self.submitted.lock().unwrap();
        submitted.push(selector);
        let hash = B256::repeat_byte(submitted.len() as u8);

        if self.revert == Some(selector) {
            return Ok(TransactionReceipt {
                status: false,
                hash,
            });
        }

        if selector == crate::quota::IStableToken::increaseAllowanceCall::SELECTOR {
            assert_eq!(target, STABLE_TOKEN);
            let added = U256::from_be_slice(&call[call.len() - 32..]);
            *self.allowance.lock().unwrap() += added;
        } else if selector == crate::quota::IOdisPayments::payInCUSDCall::SELECTOR {
            assert_eq!(target, PAYMENTS);
            if self.credit_payments {
                self.quota.fetch_add(QUOTA_PER_PAYMENT, Ordering::SeqCst);
            }
        }

        Ok(TransactionReceipt { status: true, hash })
    }

    async fn call_view(&self, target: Address, _call: Bytes) -> Result<Bytes> {
        if self.fail_views {
            return Err(Error::Network {
                url: "mock://chain".to_string(),
                reason: "connection refused".to_string(),
            });
        }
        assert_eq!(target, STABLE_TOKEN);
        let allowance = *self.allowance.lock().unwrap();
        Ok(Bytes::from(allowance.to_be_bytes::<32>().to_vec()))
    }
}
