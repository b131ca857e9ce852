use crate::error::{Error, Result};
use blst::{blst_hash_to_g2, blst_p2, blst_p2_compress};
use blsttc::ff::{Field, PrimeField}; // for Fr trait
use blsttc::group::{CurveAffine, CurveProjective, EncodedPoint};
use blsttc::pairing::bls12_381::{Fr, FrRepr, G2Affine, G2};
use blsttc::{PublicKey, Signature};
use std::borrow::Borrow;

/// Size of a compressed G2 point, which is also the size of a signature.
pub(crate) const G2_BYTES: usize = 96;

const HASH_TO_G2_DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";

pub(crate) fn verify_signature_on_message(
    msg: &[u8],
    sig: &Signature,
    pk: &PublicKey,
) -> Result<bool> {
    // The signer never saw `msg`, only `hash_g2(msg) * r`. Unblinding strips
    // `r`, so the signature must satisfy
    // pair(pk_as_g1, msg_as_g2) == pair(1_as_g1, sig_as_g2)
    let msg_g2 = hash_g2_with_dst(msg)?;
    Ok(pk.verify_g2(sig, msg_g2))
}

// blst equivalent of threshold_crypto hash_g2
pub(crate) fn hash_g2_with_dst(msg: &[u8]) -> Result<G2> {
    let mut msg_hash: blst_p2 = Default::default();
    let aug = b"";
    unsafe {
        blst_hash_to_g2(
            &mut msg_hash,
            msg.as_ptr(),
            msg.len(),
            HASH_TO_G2_DST.as_ptr(),
            HASH_TO_G2_DST.len(),
            aug.as_ptr(),
            aug.len(),
        )
    };
    let mut msg_g2_bytes = [0u8; G2_BYTES];
    unsafe { blst_p2_compress(&mut msg_g2_bytes[0], &msg_hash) }
    be_bytes_to_g2(msg_g2_bytes)
}

// see blsttc util.rs
pub(crate) fn fr_from_be_bytes(bytes: [u8; 32]) -> Result<Fr> {
    let mut le_bytes = bytes;
    le_bytes.reverse();
    let mut fr_u64s = [0u64; 4];
    for (limb, chunk) in fr_u64s.iter_mut().zip(le_bytes.chunks_exact(8)) {
        let mut next_u64_bytes = [0u8; 8];
        next_u64_bytes.copy_from_slice(chunk);
        *limb = u64::from_le_bytes(next_u64_bytes);
    }
    Fr::from_repr(FrRepr(fr_u64s))
        .map_err(|_| Error::InvalidInput("scalar is not below the field modulus".to_string()))
}

// y = x * r
pub(crate) fn blind(g2: G2, r: Fr) -> G2 {
    g2.into_affine().mul(r)
}

// x = y * 1/r
pub(crate) fn unblind(g2: G2, r: Fr) -> Result<G2> {
    let r_inv = r
        .inverse()
        .ok_or_else(|| Error::InvalidInput("blinding factor has no inverse".to_string()))?;
    Ok(g2.into_affine().mul(r_inv))
}

// see blsttc Signature from_bytes
pub(crate) fn be_bytes_to_g2(bytes: [u8; G2_BYTES]) -> Result<G2> {
    let mut compressed: <G2Affine as CurveAffine>::Compressed = EncodedPoint::empty();
    compressed.as_mut().copy_from_slice(bytes.borrow());
    let affine = compressed
        .into_affine()
        .map_err(|_| Error::InvalidInput("bytes are not a valid G2 point".to_string()))?;
    Ok(affine.into_projective())
}

// see blsttc Signature to_bytes
pub(crate) fn g2_to_be_bytes(g2: G2) -> [u8; G2_BYTES] {
    let mut bytes = [0u8; G2_BYTES];
    bytes.copy_from_slice(g2.into_affine().into_compressed().as_ref());
    bytes
}

// Equivalent to blsttc SecretKey::sign_g2, kept separate so the signer side
// works on raw G2 points the same way blinding does.
pub(crate) fn sign_g2(g2: G2, fr: Fr) -> G2 {
    g2.into_affine().mul(fr)
}

/// Parses signer output into a G2 point, reporting failures as verification errors.
pub(crate) fn signature_bytes_to_g2(bytes: &[u8]) -> Result<G2> {
    let bytes: [u8; G2_BYTES] = bytes.try_into().map_err(|_| {
        Error::SignatureVerification(format!(
            "blind signature must be {} bytes, got {}",
            G2_BYTES,
            bytes.len()
        ))
    })?;
    be_bytes_to_g2(bytes).map_err(|_| {
        Error::SignatureVerification("blind signature is not a valid curve point".to_string())
    })
}
