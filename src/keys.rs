use crate::error::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use blsttc::{PublicKey, PublicKeySet};

/// Verification key of the identifier service.
///
/// Provisioned out of band and fixed for the lifetime of a client. When the
/// service is a threshold signer group, the public key set is carried as well
/// so that individual signature shares can be combined locally.
#[derive(Clone, Debug)]
pub struct ServicePublicKey {
    public_key: PublicKey,
    public_key_set: Option<PublicKeySet>,
}

impl ServicePublicKey {
    pub fn from_public_key(public_key: PublicKey) -> Self {
        Self {
            public_key,
            public_key_set: None,
        }
    }

    pub fn from_public_key_set(public_key_set: PublicKeySet) -> Self {
        Self {
            public_key: public_key_set.public_key(),
            public_key_set: Some(public_key_set),
        }
    }

    /// Decodes a base64 compressed G1 public key.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = STANDARD.decode(encoded.trim())?;
        let bytes: [u8; 48] = decoded.as_slice().try_into()?;
        Ok(Self::from_public_key(PublicKey::from_bytes(bytes)?))
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.public_key.to_bytes())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn public_key_set(&self) -> Option<&PublicKeySet> {
        self.public_key_set.as_ref()
    }
}

impl From<PublicKey> for ServicePublicKey {
    fn from(public_key: PublicKey) -> Self {
        Self::from_public_key(public_key)
    }
}
