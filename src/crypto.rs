use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use ring::{constant_time, pbkdf2};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = aead::NONCE_LEN;
const PBKDF2_ITERATIONS: u32 = 600_000;
// Fixed application salt: the derivation must be reproducible from
// ENCRYPTION_KEY alone across restarts.
const KEY_SALT: &[u8] = b"trialect.credential.v1";

/// Stored-credential prefix, kept for compatibility with pre-existing
/// channel rows.
const ENCRYPTED_PREFIX: &str = "encrypted:";

struct SingleNonce(Option<[u8; NONCE_LEN]>);

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        self.0
            .take()
            .map(Nonce::assume_unique_for_key)
            .ok_or(ring::error::Unspecified)
    }
}

/// AES-256-GCM cipher for channel credentials. Encrypts to
/// `encrypted:<base64(nonce || ciphertext)>`; plaintext values without the
/// prefix decrypt to themselves so legacy rows keep working.
#[derive(Clone)]
pub struct CredentialCipher {
    key: [u8; KEY_LEN],
}

impl CredentialCipher {
    pub fn new(secret: &str) -> Self {
        let mut key = [0u8; KEY_LEN];
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            std::num::NonZeroU32::new(PBKDF2_ITERATIONS).expect("iterations are non-zero"),
            KEY_SALT,
            secret.as_bytes(),
            &mut key,
        );
        Self { key }
    }

    /// Random secret for a fresh install with no ENCRYPTION_KEY configured.
    pub fn generate_secret() -> Result<String, String> {
        let rng = SystemRandom::new();
        let mut bytes = [0u8; KEY_LEN];
        rng.fill(&mut bytes)
            .map_err(|_| "failed to generate random key".to_string())?;
        Ok(BASE64.encode(bytes))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let rng = SystemRandom::new();
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill(&mut nonce)
            .map_err(|_| "failed to generate nonce".to_string())?;
        let unbound = UnboundKey::new(&aead::AES_256_GCM, &self.key)
            .map_err(|_| "failed to build cipher key".to_string())?;
        let mut sealing = SealingKey::new(unbound, SingleNonce(Some(nonce)));
        let mut in_out = plaintext.as_bytes().to_vec();
        sealing
            .seal_in_place_append_tag(Aad::empty(), &mut in_out)
            .map_err(|_| "encryption failed".to_string())?;
        let mut packed = Vec::with_capacity(NONCE_LEN + in_out.len());
        packed.extend_from_slice(&nonce);
        packed.extend_from_slice(&in_out);
        Ok(format!("{ENCRYPTED_PREFIX}{}", BASE64.encode(packed)))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, String> {
        let Some(encoded) = stored.strip_prefix(ENCRYPTED_PREFIX) else {
            // Legacy unencrypted row.
            return Ok(stored.to_string());
        };
        let packed = BASE64
            .decode(encoded)
            .map_err(|_| "invalid credential encoding".to_string())?;
        if packed.len() <= NONCE_LEN {
            return Err("credential ciphertext too short".to_string());
        }
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(&packed[..NONCE_LEN]);
        let unbound = UnboundKey::new(&aead::AES_256_GCM, &self.key)
            .map_err(|_| "failed to build cipher key".to_string())?;
        let mut opening = OpeningKey::new(unbound, SingleNonce(Some(nonce)));
        let mut in_out = packed[NONCE_LEN..].to_vec();
        let plaintext = opening
            .open_in_place(Aad::empty(), &mut in_out)
            .map_err(|_| "decryption failed, wrong encryption key?".to_string())?;
        String::from_utf8(plaintext.to_vec()).map_err(|_| "credential is not UTF-8".to_string())
    }
}

/// Constant-time equality for custom keys. Length mismatch still returns
/// false without inspecting content.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    constant_time::verify_slices_are_equal(a.as_bytes(), b.as_bytes()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = CredentialCipher::new("test-secret");
        let stored = cipher.encrypt("sk-real-upstream-key").unwrap();
        assert!(stored.starts_with("encrypted:"));
        assert_eq!(cipher.decrypt(&stored).unwrap(), "sk-real-upstream-key");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let stored = CredentialCipher::new("key-a").encrypt("secret").unwrap();
        assert!(CredentialCipher::new("key-b").decrypt(&stored).is_err());
    }

    #[test]
    fn plaintext_rows_pass_through() {
        let cipher = CredentialCipher::new("test-secret");
        assert_eq!(cipher.decrypt("legacy-plaintext").unwrap(), "legacy-plaintext");
    }

    #[test]
    fn constant_time_eq_matches_semantics() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
