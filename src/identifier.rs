//! Turns a verified signature into the identifier used as an on-chain key.
//!
//! The identifier is
//! `keccak256("{prefix}://" || plaintext || "__" || pepper)`, where the pepper
//! is the first 13 characters of the base64 SHA-256 digest of the unblinded
//! signature.

use crate::blind_sigs::VerifiedSignature;
use crate::error::{Error, Result};
use alloy_primitives::{keccak256, B256};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

/// Number of base64 characters kept from the signature digest.
pub const PEPPER_CHAR_LENGTH: usize = 13;

const PREFIX_SEPARATOR: &str = "://";
const PEPPER_SEPARATOR: &str = "__";
const MAX_E164_DIGITS: usize = 15;

/// Marks which kind of identifier a plaintext is.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum IdentifierPrefix {
    PhoneNumber,
    Email,
    Twitter,
    Custom(String),
}

impl IdentifierPrefix {
    pub fn as_str(&self) -> &str {
        match self {
            Self::PhoneNumber => "tel",
            Self::Email => "mailto",
            Self::Twitter => "twit",
            Self::Custom(prefix) => prefix,
        }
    }

    /// Rejects plaintexts that are not well formed for this prefix.
    pub fn validate(&self, plaintext: &str) -> Result<()> {
        match self {
            Self::PhoneNumber if !is_e164(plaintext) => Err(Error::InvalidInput(
                "phone number is not in E.164 format".to_string(),
            )),
            Self::Custom(prefix) if prefix.is_empty() || prefix.contains(PREFIX_SEPARATOR) => {
                Err(Error::InvalidInput(format!(
                    "custom identifier prefix {:?} is not usable",
                    prefix
                )))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for IdentifierPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_e164(s: &str) -> bool {
    let digits = match s.strip_prefix('+') {
        Some(digits) => digits,
        None => return false,
    };
    !digits.is_empty()
        && digits.len() <= MAX_E164_DIGITS
        && !digits.starts_with('0')
        && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Secret salt mixed into the identifier.
#[derive(Clone, PartialEq, Eq)]
pub struct Pepper(Zeroizing<String>);

impl Pepper {
    /// Wraps a pepper obtained earlier, e.g. from a cache.
    pub fn new(pepper: impl Into<String>) -> Result<Self> {
        let pepper = pepper.into();
        if pepper.is_empty() {
            return Err(Error::InvalidInput("pepper is empty".to_string()));
        }
        Ok(Self(Zeroizing::new(pepper)))
    }

    pub fn from_signature(signature: &VerifiedSignature) -> Self {
        Self::from_signature_bytes(&signature.to_bytes())
    }

    fn from_signature_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut encoded = STANDARD.encode(digest);
        encoded.truncate(PEPPER_CHAR_LENGTH);
        Self(Zeroizing::new(encoded))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Pepper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pepper(<redacted>)")
    }
}

/// 32-byte identifier used as the on-chain lookup key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FinalIdentifier(B256);

impl FinalIdentifier {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0 .0
    }

    pub fn into_inner(self) -> B256 {
        self.0
    }
}

impl fmt::Display for FinalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl From<FinalIdentifier> for B256 {
    fn from(id: FinalIdentifier) -> Self {
        id.0
    }
}

/// Derives the identifier for the input `signature` verified over.
pub fn derive(
    signature: &VerifiedSignature,
    pepper: &Pepper,
    prefix: &IdentifierPrefix,
) -> FinalIdentifier {
    derive_with_input(prefix, signature.input().as_bytes(), pepper)
}

/// Re-derives an identifier from a known pepper without a signing round trip.
pub fn derive_with_input(
    prefix: &IdentifierPrefix,
    raw_input: &[u8],
    pepper: &Pepper,
) -> FinalIdentifier {
    let prefix = prefix.as_str();
    let mut preimage = Zeroizing::new(Vec::with_capacity(
        prefix.len()
            + PREFIX_SEPARATOR.len()
            + raw_input.len()
            + PEPPER_SEPARATOR.len()
            + pepper.as_str().len(),
    ));
    preimage.extend_from_slice(prefix.as_bytes());
    preimage.extend_from_slice(PREFIX_SEPARATOR.as_bytes());
    preimage.extend_from_slice(raw_input);
    preimage.extend_from_slice(PEPPER_SEPARATOR.as_bytes());
    preimage.extend_from_slice(pepper.as_str().as_bytes());

    FinalIdentifier(keccak256(preimage.as_slice()))
}
