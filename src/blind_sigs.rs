use crate::error::{Error, Result};
use crate::keys::ServicePublicKey;
use crate::shares;
use crate::utils::*;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use blsttc::pairing::bls12_381::{Fr, G2};
use blsttc::{PublicKey, SecretKey, Signature};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Longest raw input accepted for blinding, in bytes.
pub const MAX_INPUT_LEN: usize = 128;

const BLINDING_FACTOR_DST: &[u8] = b"BLINDID_BLINDING_FACTOR_V1";

/// Plaintext identifier bytes.
///
/// Held in memory for a single request only. The buffer is zeroized on drop
/// and the `Debug` output never shows the contents.
#[derive(Clone)]
pub struct RawIdentifierInput(Zeroizing<Vec<u8>>);

impl RawIdentifierInput {
    pub fn new(bytes: &[u8], max_len: usize) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidInput("raw input is empty".to_string()));
        }
        if bytes.len() > max_len {
            return Err(Error::InvalidInput(format!(
                "raw input is {} bytes, the service accepts at most {}",
                bytes.len(),
                max_len
            )));
        }
        Ok(Self(Zeroizing::new(bytes.to_vec())))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for RawIdentifierInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawIdentifierInput(<redacted>)")
    }
}

/// Scalar that hides the message from the signer.
///
/// The same seed always yields the same factor. The scalar bytes are zeroized
/// on drop.
#[derive(Clone)]
pub struct BlindingFactor {
    bytes: Zeroizing<[u8; 32]>,
}

impl BlindingFactor {
    /// Derives a factor from caller-held key material.
    pub fn from_seed(seed: &[u8]) -> Self {
        let mut counter: u32 = 0;
        loop {
            let mut hasher = Sha256::new();
            hasher.update(BLINDING_FACTOR_DST);
            hasher.update(counter.to_be_bytes());
            hasher.update(seed);

            let mut bytes = Zeroizing::new([0u8; 32]);
            bytes.copy_from_slice(&hasher.finalize());
            // below 2^254, hence below the scalar field modulus
            bytes[0] &= 0x3f;

            if bytes.iter().any(|b| *b != 0) {
                return Self { bytes };
            }
            counter += 1;
        }
    }

    /// Draws a fresh factor from the OS random source.
    pub fn random() -> Self {
        let mut seed = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut seed[..]);
        Self::from_seed(&seed[..])
    }

    pub(crate) fn scalar(&self) -> Result<Fr> {
        fr_from_be_bytes(*self.bytes)
    }
}

impl fmt::Debug for BlindingFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BlindingFactor(<redacted>)")
    }
}

/// A message blinded for the signer.
///
/// Only `message` goes over the wire. The blinding factor stays local and is
/// required to unblind the signature.
#[derive(Clone)]
pub struct BlindedMessage {
    blinding_factor: BlindingFactor,
    message: G2,
}

impl BlindedMessage {
    pub fn blinding_factor(&self) -> &BlindingFactor {
        &self.blinding_factor
    }

    pub fn message_bytes(&self) -> [u8; G2_BYTES] {
        g2_to_be_bytes(self.message)
    }

    /// The wire encoding sent to the identifier service.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.message_bytes())
    }
}

impl fmt::Debug for BlindedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlindedMessage").finish_non_exhaustive()
    }
}

/// What the identifier service returned for a blinded message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlindSignature {
    /// A single signature already combined by the service.
    Combined(Vec<u8>),
    /// Indexed signature shares from a threshold signer group.
    Shares(Vec<(usize, Vec<u8>)>),
}

/// An unblinded signature that verified under the service public key,
/// together with the input it verified over.
#[derive(Clone)]
pub struct VerifiedSignature {
    signature: Signature,
    input: RawIdentifierInput,
}

impl VerifiedSignature {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn to_bytes(&self) -> [u8; G2_BYTES] {
        self.signature.to_bytes()
    }

    pub(crate) fn input(&self) -> &RawIdentifierInput {
        &self.input
    }
}

impl fmt::Debug for VerifiedSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedSignature")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

struct Pending {
    input: RawIdentifierInput,
    blinding_factor: BlindingFactor,
}

/// Client side of one blind-signature request.
///
/// `blind` records the input and factor, `finalize` consumes the session, so a
/// factor is used for exactly one unblinding.
pub struct BlindingSession {
    max_input_len: usize,
    pending: Option<Pending>,
}

impl BlindingSession {
    pub fn new() -> Self {
        Self::with_max_input_len(MAX_INPUT_LEN)
    }

    pub fn with_max_input_len(max_input_len: usize) -> Self {
        Self {
            max_input_len,
            pending: None,
        }
    }

    /// Blinds `raw_input`. Without a `seed` the factor is random.
    pub fn blind(&mut self, raw_input: &[u8], seed: Option<&[u8]>) -> Result<BlindedMessage> {
        let input = RawIdentifierInput::new(raw_input, self.max_input_len)?;
        let blinding_factor = match seed {
            Some(seed) => BlindingFactor::from_seed(seed),
            None => {
                warn!(
                    "blinding with a random seed: replayed requests will look new to the \
                     identifier service and consume quota; derive the seed from stable \
                     private key material to avoid this"
                );
                BlindingFactor::random()
            }
        };

        let msg_g2 = hash_g2_with_dst(input.as_bytes())?;
        let message = blind(msg_g2, blinding_factor.scalar()?);

        self.pending = Some(Pending {
            input,
            blinding_factor: blinding_factor.clone(),
        });

        Ok(BlindedMessage {
            blinding_factor,
            message,
        })
    }

    /// Unblinds the service's signature and verifies it over the blinded input.
    pub fn finalize(
        self,
        blind_signature: &BlindSignature,
        public_key: &ServicePublicKey,
    ) -> Result<VerifiedSignature> {
        let Pending {
            input,
            blinding_factor,
        } = self.pending.ok_or(Error::Sequence)?;
        let r = blinding_factor.scalar()?;

        let signature = match blind_signature {
            BlindSignature::Combined(bytes) => unblind_signature(bytes, r)?,
            BlindSignature::Shares(shares) => {
                let set = public_key.public_key_set().ok_or_else(|| {
                    Error::SignatureVerification(
                        "service returned signature shares but no public key set is configured"
                            .to_string(),
                    )
                })?;
                debug!(shares = shares.len(), "combining signature shares");
                shares::combine_unblinded(set, shares, r)?
            }
        };

        verify_signature(public_key.public_key(), input.as_bytes(), &signature)?;

        Ok(VerifiedSignature { signature, input })
    }
}

impl Default for BlindingSession {
    fn default() -> Self {
        Self::new()
    }
}

fn unblind_signature(bytes: &[u8], r: Fr) -> Result<Signature> {
    let blinded_sig_g2 = signature_bytes_to_g2(bytes)?;
    let unblinded_bytes = g2_to_be_bytes(crate::utils::unblind(blinded_sig_g2, r)?);
    Signature::from_bytes(unblinded_bytes).map_err(|e| {
        Error::SignatureVerification(format!("unblinded signature is malformed: {:?}", e))
    })
}

/// Removes `blinding_factor` from a blind signature over a message it blinded.
pub fn unblind(blind_signature: &[u8], blinding_factor: &BlindingFactor) -> Result<Signature> {
    unblind_signature(blind_signature, blinding_factor.scalar()?)
}

/// Checks `signature` over `message` under `public_key`.
pub fn verify_signature(
    public_key: &PublicKey,
    message: &[u8],
    signature: &Signature,
) -> Result<()> {
    if verify_signature_on_message(message, signature, public_key)? {
        Ok(())
    } else {
        Err(Error::SignatureVerification(
            "signature does not verify under the service public key".to_string(),
        ))
    }
}

/// The signing half of the protocol.
///
/// Signs blinded G2 points without learning the message behind them. Used to
/// stand up local identifier services.
pub struct BlindSigner {
    sk: SecretKey,
}

impl BlindSigner {
    pub fn new() -> Self {
        Self {
            sk: SecretKey::random(),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.sk.public_key()
    }

    fn sk_bendian(&self) -> Result<Fr> {
        fr_from_be_bytes(self.sk.to_bytes())
    }

    /// Signs a wire-encoded blinded message.
    pub fn sign_blinded(&self, blinded_msg: &[u8]) -> Result<[u8; G2_BYTES]> {
        let bytes: [u8; G2_BYTES] = blinded_msg.try_into()?;
        // Note we are signing a G2, not message bytes, so we can't
        // use blsttc:SecretKey.sign(msg);
        let bs_sig_g2 = sign_g2(be_bytes_to_g2(bytes)?, self.sk_bendian()?);
        Ok(g2_to_be_bytes(bs_sig_g2))
    }
}

impl Default for BlindSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<[u8; 32]> for BlindSigner {
    type Error = Error;

    fn try_from(b: [u8; 32]) -> Result<Self> {
        Ok(Self {
            sk: SecretKey::from_bytes(b)?,
        })
    }
}

impl From<SecretKey> for BlindSigner {
    fn from(sk: SecretKey) -> Self {
        Self { sk }
    }
}
