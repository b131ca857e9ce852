//! Derives unlinkable on-chain identifiers from plaintext identifiers such as
//! phone numbers, using a remote blind-signature service that never sees the
//! plaintext.
//!
//! A request blinds the input, makes sure the account has service quota
//! (paying for more through a [`ChainClient`] if needed), obtains a blind
//! signature, unblinds and verifies it, and hashes the result with a pepper
//! into a 32-byte [`FinalIdentifier`].

mod blind_sigs;
mod config;
mod error;
mod identifier;
mod keys;
mod pipeline;
mod quota;
mod service;
mod shares;
mod utils;

#[cfg(test)]
mod test_utils;

pub use crate::blind_sigs::{
    unblind, verify_signature, BlindSignature, BlindSigner, BlindedMessage, BlindingFactor,
    BlindingSession, RawIdentifierInput, VerifiedSignature, MAX_INPUT_LEN,
};
pub use crate::config::ClientConfig;
pub use crate::error::{BlindIdError, Error, Result, TopUpStep};
pub use crate::identifier::{
    derive, derive_with_input, FinalIdentifier, IdentifierPrefix, Pepper, PEPPER_CHAR_LENGTH,
};
pub use crate::keys::ServicePublicKey;
pub use crate::pipeline::{DerivedIdentifier, IdentifierPipeline};
pub use crate::quota::{
    ChainClient, QuotaManager, QuotaState, TopUpConfig, TopUpReceipt, TransactionReceipt,
    DEFAULT_TOP_UP_AMOUNT,
};
pub use crate::service::{
    AuthContext, AuthMethod, HttpSignatureService, QuotaStatus, RequestAuthorizer,
    SignatureService, StaticAuthorizer, QUOTA_PATH, SIGN_PATH,
};
pub use crate::shares::BlindSignerShare;

pub use alloy_primitives;
pub use blsttc;
