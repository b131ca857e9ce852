use crate::error::{Error, Result};
use crate::utils::*;
use blsttc::pairing::bls12_381::Fr;
use blsttc::{PublicKeySet, SecretKeyShare, Signature, SignatureShare};

/// Unblinds every share, then combines them into a full signature.
///
/// Lagrange interpolation is linear, so unblinding before combining gives the
/// same signature as combining blinded shares and unblinding once.
pub(crate) fn combine_unblinded(
    set: &PublicKeySet,
    shares: &[(usize, Vec<u8>)],
    blinding_factor: Fr,
) -> Result<Signature> {
    let mut unblinded: Vec<(usize, SignatureShare)> = Vec::with_capacity(shares.len());

    for (index, bytes) in shares {
        let blinded_sig_g2 = signature_bytes_to_g2(bytes)?;
        let unblinded_bytes = g2_to_be_bytes(unblind(blinded_sig_g2, blinding_factor)?);
        let share = SignatureShare::from_bytes(unblinded_bytes).map_err(|e| {
            Error::SignatureVerification(format!("signature share {} is malformed: {:?}", index, e))
        })?;
        unblinded.push((*index, share));
    }

    set.combine_signatures(unblinded.iter().map(|(i, s)| (*i, s)))
        .map_err(|e| {
            Error::SignatureVerification(format!("cannot combine signature shares: {:?}", e))
        })
}

/// One member of a threshold signer group.
///
/// Signs blinded messages with its key share. At least `threshold + 1`
/// members must sign before the shares combine into a signature that verifies
/// under the group public key.
pub struct BlindSignerShare {
    index: usize,
    sks: SecretKeyShare,
}

impl BlindSignerShare {
    pub fn new(index: usize, sks: SecretKeyShare) -> Self {
        Self { index, sks }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    fn sks_bendian(&self) -> Result<Fr> {
        fr_from_be_bytes(self.sks.to_bytes())
    }

    /// Signs a wire-encoded blinded message, returning the indexed share.
    pub fn sign_blinded(&self, blinded_msg: &[u8]) -> Result<(usize, Vec<u8>)> {
        let bytes: [u8; G2_BYTES] = blinded_msg.try_into()?;
        let bs_sig_g2 = sign_g2(be_bytes_to_g2(bytes)?, self.sks_bendian()?);
        Ok((self.index, g2_to_be_bytes(bs_sig_g2).to_vec()))
    }
}
