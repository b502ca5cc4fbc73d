// Identity and signing

use crate::node::NodeId;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use zeroize::{Zeroize, Zeroizing};

/// Who this node is, and how it signs.
pub trait IdentityProvider: Send + Sync {
    fn local_identity(&self) -> NodeId;

    /// Key other nodes use to verify our signatures. Empty if we do not sign.
    fn public_key(&self) -> Vec<u8>;

    fn sign(&self, data: &[u8]) -> Vec<u8>;

    fn verify(&self, data: &[u8], signature: &[u8], public_key: &[u8]) -> bool;
}

/// Ed25519 identity. The node id is the hex Blake3 hash of the public key.
#[derive(Clone)]
pub struct Ed25519Identity {
    signing_key: SigningKey,
}

impl Ed25519Identity {
    /// Generate a new random identity
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut secret_key_bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut secret_key_bytes);
        let signing_key = SigningKey::from_bytes(&secret_key_bytes);
        secret_key_bytes.zeroize();
        Self { signing_key }
    }

    /// Deterministic identity from a 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let mut seed = seed;
        let signing_key = SigningKey::from_bytes(&seed);
        seed.zeroize();
        Self { signing_key }
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Secret key bytes, wiped on drop.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing_key.to_bytes().to_vec())
    }

    /// Stateless verification against a raw 32-byte public key.
    pub fn verify_with(data: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        verifying_key
            .verify(data, &Signature::from_bytes(&sig_bytes))
            .is_ok()
    }
}

impl IdentityProvider for Ed25519Identity {
    fn local_identity(&self) -> NodeId {
        let public_key = self.signing_key.verifying_key().to_bytes();
        hex::encode(blake3::hash(&public_key).as_bytes())
    }

    fn public_key(&self) -> Vec<u8> {
        self.signing_key.verifying_key().to_bytes().to_vec()
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.signing_key.sign(data).to_bytes().to_vec()
    }

    fn verify(&self, data: &[u8], signature: &[u8], public_key: &[u8]) -> bool {
        Self::verify_with(data, signature, public_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_id_is_blake3_of_public_key() {
        let id = Ed25519Identity::generate();
        assert_eq!(id.local_identity().len(), 64);
        assert_eq!(id.public_key_hex().len(), 64);
        assert_eq!(id.public_key().len(), 32);
    }

    #[test]
    fn test_sign_and_verify() {
        let id = Ed25519Identity::generate();
        let sig = id.sign(b"evacuate sector 4");
        assert_eq!(sig.len(), 64);
        assert!(id.verify(b"evacuate sector 4", &sig, &id.public_key()));
        assert!(!id.verify(b"evacuate sector 5", &sig, &id.public_key()));
    }

    #[test]
    fn test_malformed_inputs_fail_verification() {
        let id = Ed25519Identity::generate();
        assert!(!Ed25519Identity::verify_with(b"x", &[0u8; 10], &id.public_key()));
        assert!(!Ed25519Identity::verify_with(b"x", &id.sign(b"x"), &[1u8; 3]));
    }

    #[test]
    fn test_seeded_identity_is_stable() {
        let a = Ed25519Identity::from_seed([7u8; 32]);
        let b = Ed25519Identity::from_seed([7u8; 32]);
        assert_eq!(a.local_identity(), b.local_identity());
        let restored = Ed25519Identity::from_seed(a.to_bytes().as_slice().try_into().unwrap());
        assert_eq!(restored.public_key_hex(), a.public_key_hex());
    }
}
