//! Signing keypair load/generate/persist.

use std::path::Path;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use naptha_core::{Error, Result};
use tracing::info;

/// The caller's signing identity.
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        let seed: [u8; 32] = rand::random();
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Build from a hex-encoded 32-byte secret (as supplied via `PRIVATE_KEY`).
    pub fn from_hex(secret_hex: &str) -> Result<Self> {
        let bytes = hex::decode(secret_hex.trim().trim_start_matches("0x"))
            .map_err(|e| Error::Auth(format!("private key is not valid hex: {}", e)))?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::Auth(format!("private key must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&seed),
        })
    }

    /// Load the key at `path`, creating and persisting a new one if absent.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let text = std::fs::read_to_string(path)?;
            return Self::from_hex(&text);
        }

        let identity = Self::generate();
        identity.save(path)?;
        info!(
            "Generated new identity {} at {}",
            identity.public_key_hex(),
            path.display()
        );
        Ok(identity)
    }

    /// Persist the secret key as hex. The file is owner-only on unix.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.secret_hex())?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Public key, hex encoded. Doubles as the consumer id on nodes.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign `message`, returning the hex-encoded signature.
    pub fn sign(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Verify a hex signature produced by [`Identity::sign`].
pub fn verify(public_key_hex: &str, message: &[u8], signature_hex: &str) -> Result<()> {
    let key_bytes: [u8; 32] = hex::decode(public_key_hex)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::Auth("malformed public key".into()))?;
    let sig_bytes: [u8; 64] = hex::decode(signature_hex)
        .ok()
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| Error::Auth("malformed signature".into()))?;

    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| Error::Auth(format!("invalid public key: {}", e)))?;
    let signature = Signature::from_bytes(&sig_bytes);
    key.verify(message, &signature)
        .map_err(|_| Error::Auth("signature does not match".into()))
}
