use crate::blind_sigs::{BlindingSession, MAX_INPUT_LEN};
use crate::error::{Error, Result, TopUpStep};
use crate::identifier::{self, FinalIdentifier, IdentifierPrefix, Pepper};
use crate::keys::ServicePublicKey;
use crate::quota::{ChainClient, QuotaManager, TopUpConfig};
use crate::service::{AuthContext, SignatureService};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a derivation: the identifier and the pepper it was built with.
///
/// Keeping the pepper lets the caller re-derive the identifier later with
/// [`identifier::derive_with_input`] without another signing round trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedIdentifier {
    pub identifier: FinalIdentifier,
    pub pepper: Pepper,
}

/// Runs one derivation request end to end.
///
/// Requests are sequential: blind, make sure quota is available, request the
/// signature, unblind and verify, derive. Concurrent requests against the same
/// account are not coordinated.
pub struct IdentifierPipeline {
    service: Arc<dyn SignatureService>,
    quota: QuotaManager,
    public_key: ServicePublicKey,
    max_input_len: usize,
}

impl IdentifierPipeline {
    pub fn new(
        service: Arc<dyn SignatureService>,
        chain: Arc<dyn ChainClient>,
        public_key: ServicePublicKey,
        top_up: TopUpConfig,
    ) -> Self {
        Self {
            quota: QuotaManager::new(service.clone(), chain, top_up),
            service,
            public_key,
            max_input_len: MAX_INPUT_LEN,
        }
    }

    pub fn with_max_input_len(mut self, max_input_len: usize) -> Self {
        self.max_input_len = max_input_len;
        self
    }

    pub fn quota(&self) -> &QuotaManager {
        &self.quota
    }

    pub fn public_key(&self) -> &ServicePublicKey {
        &self.public_key
    }

    /// Derives the identifier for `plaintext`.
    ///
    /// Pass a `seed` derived from stable private key material so that retries
    /// of the same request are recognised by the service and do not cost
    /// extra quota.
    pub async fn derive_identifier(
        &self,
        plaintext: &str,
        prefix: &IdentifierPrefix,
        auth: &AuthContext,
        seed: Option<&[u8]>,
    ) -> Result<DerivedIdentifier> {
        prefix.validate(plaintext)?;

        let mut session = BlindingSession::with_max_input_len(self.max_input_len);
        let blinded = session.blind(plaintext.as_bytes(), seed)?;

        self.ensure_quota(auth).await?;

        let blind_signature = self.service.request_signature(&blinded, auth).await?;
        let verified = session.finalize(&blind_signature, &self.public_key)?;

        let pepper = Pepper::from_signature(&verified);
        let identifier = identifier::derive(&verified, &pepper, prefix);
        info!(%identifier, %prefix, "derived identifier");

        Ok(DerivedIdentifier { identifier, pepper })
    }

    /// Checks quota, tops up when exhausted, and re-checks before signing.
    async fn ensure_quota(&self, auth: &AuthContext) -> Result<()> {
        if self.quota.check_quota(auth).await?.is_sufficient() {
            return Ok(());
        }

        let receipt = self.quota.top_up(auth).await?;
        debug!(?receipt, "re-checking quota after top-up");

        let refreshed = self.quota.check_quota(auth).await?;
        if !refreshed.is_sufficient() {
            self.quota.mark_failed();
            return Err(Error::top_up(
                TopUpStep::QuotaRefresh,
                "service still reports no quota after a confirmed payment",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quota::{QuotaState, DEFAULT_TOP_UP_AMOUNT};
    use crate::test_utils::{
        auth, init_tracing, LocalSignatureService, MockChain, PAYMENTS, STABLE_TOKEN,
    };
    use alloy_primitives::{b256, U256};
    use alloy_sol_types::SolCall;

    const PHONE: &str = "+18009099999";
    const SEED: &[u8; 32] = b"dek private key material 0123456";

    fn pipeline(service: &Arc<LocalSignatureService>, chain: MockChain) -> IdentifierPipeline {
        IdentifierPipeline::new(
            service.clone(),
            Arc::new(chain),
            service.public_key(),
            TopUpConfig::new(STABLE_TOKEN, PAYMENTS),
        )
    }

    #[tokio::test]
    async fn derives_the_same_identifier_on_every_run() {
        init_tracing();
        let service = Arc::new(LocalSignatureService::new(5));
        let pipeline = pipeline(&service, MockChain::new(U256::ZERO, service.quota_handle()));

        let first = pipeline
            .derive_identifier(PHONE, &IdentifierPrefix::PhoneNumber, &auth(), Some(SEED))
            .await
            .unwrap();
        let second = pipeline
            .derive_identifier(PHONE, &IdentifierPrefix::PhoneNumber, &auth(), Some(SEED))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first.pepper.as_str().len(), identifier::PEPPER_CHAR_LENGTH);
        assert_eq!(
            first.identifier,
            identifier::derive_with_input(
                &IdentifierPrefix::PhoneNumber,
                PHONE.as_bytes(),
                &first.pepper
            )
        );
    }

    #[tokio::test]
    async fn phone_number_identifier_matches_known_value() {
        let service = Arc::new(LocalSignatureService::new(1));
        let pipeline = pipeline(&service, MockChain::new(U256::ZERO, service.quota_handle()));

        let derived = pipeline
            .derive_identifier(PHONE, &IdentifierPrefix::PhoneNumber, &auth(), Some(SEED))
            .await
            .unwrap();

        assert_eq!(derived.pepper.as_str(), "sckRA/0aCV583");
        assert_eq!(
            derived.identifier.into_inner(),
            b256!("0x7904e3bc5b42d4152472696ed16df18dc4ac743868bc18867cdd31f74530b745")
        );
    }

    #[tokio::test]
    async fn random_seed_still_yields_the_same_identifier() {
        let service = Arc::new(LocalSignatureService::new(5));
        let pipeline = pipeline(&service, MockChain::new(U256::ZERO, service.quota_handle()));

        let seeded = pipeline
            .derive_identifier(PHONE, &IdentifierPrefix::PhoneNumber, &auth(), Some(SEED))
            .await
            .unwrap();
        let unseeded = pipeline
            .derive_identifier(PHONE, &IdentifierPrefix::PhoneNumber, &auth(), None)
            .await
            .unwrap();

        assert_eq!(seeded.identifier, unseeded.identifier);
    }

    #[tokio::test]
    async fn exhausted_quota_is_topped_up_before_signing() {
        let service = Arc::new(LocalSignatureService::new(0));
        let chain = MockChain::new(U256::ZERO, service.quota_handle());
        let pipeline = pipeline(&service, chain);

        pipeline
            .derive_identifier(PHONE, &IdentifierPrefix::PhoneNumber, &auth(), Some(SEED))
            .await
            .unwrap();

        // initial check, then the re-check after payment
        assert_eq!(service.quota_requests(), 2);
        assert_eq!(service.sign_requests(), 1);
        assert_eq!(pipeline.quota().state(), QuotaState::Sufficient);
    }

    #[tokio::test]
    async fn failed_top_up_never_signs() {
        let service = Arc::new(LocalSignatureService::new(0));
        let chain = MockChain::new(DEFAULT_TOP_UP_AMOUNT, service.quota_handle())
            .reverting(crate::quota::IOdisPayments::payInCUSDCall::SELECTOR);
        let pipeline = pipeline(&service, chain);

        let err = pipeline
            .derive_identifier(PHONE, &IdentifierPrefix::PhoneNumber, &auth(), Some(SEED))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::TopUpFailed {
                step: TopUpStep::Payment,
                ..
            }
        ));
        assert_eq!(service.sign_requests(), 0);
        assert_eq!(pipeline.quota().state(), QuotaState::Failed);
    }

    #[tokio::test]
    async fn uncredited_payment_never_signs() {
        let service = Arc::new(LocalSignatureService::new(0));
        let chain = MockChain::new(U256::ZERO, service.quota_handle()).without_credit();
        let pipeline = pipeline(&service, chain);

        let err = pipeline
            .derive_identifier(PHONE, &IdentifierPrefix::PhoneNumber, &auth(), Some(SEED))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::TopUpFailed {
                step: TopUpStep::QuotaRefresh,
                ..
            }
        ));
        assert_eq!(service.sign_requests(), 0);
        assert_eq!(pipeline.quota().state(), QuotaState::Failed);
    }

    #[tokio::test]
    async fn forged_signature_produces_no_identifier() {
        let service = Arc::new(LocalSignatureService::new(5).forging());
        let pipeline = pipeline(&service, MockChain::new(U256::ZERO, service.quota_handle()));

        let err = pipeline
            .derive_identifier(PHONE, &IdentifierPrefix::PhoneNumber, &auth(), Some(SEED))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::SignatureVerification(_)));
    }

    #[tokio::test]
    async fn malformed_phone_number_is_rejected_before_any_request() {
        let service = Arc::new(LocalSignatureService::new(5));
        let pipeline = pipeline(&service, MockChain::new(U256::ZERO, service.quota_handle()));

        let err = pipeline
            .derive_identifier("8009099999", &IdentifierPrefix::PhoneNumber, &auth(), Some(SEED))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(service.quota_requests(), 0);
        assert_eq!(service.sign_requests(), 0);
    }

    #[tokio::test]
    async fn oversized_input_is_rejected_before_any_request() {
        let service = Arc::new(LocalSignatureService::new(5));
        let pipeline = pipeline(&service, MockChain::new(U256::ZERO, service.quota_handle()))
            .with_max_input_len(8);

        let err = pipeline
            .derive_identifier(PHONE, &IdentifierPrefix::PhoneNumber, &auth(), Some(SEED))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(service.quota_requests(), 0);
    }
}
