//! Encrypted forging passphrase handling.
//!
//! Forging passphrases may be stored encrypted in the node configuration.
//! The cipher is AES-192-CBC with a fixed IV; the key derives from the
//! password environment variable through scrypt. This protects credentials
//! at rest in config files, not in memory.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use thiserror::Error;

/// Environment variable holding the passphrase-encryption password.
pub const PASSWORD_ENV_VAR: &str = "LDPOS_PASSWORD";
/// Environment variable overriding the initial forging key index.
pub const FORGING_KEY_INDEX_ENV_VAR: &str = "LDPOS_FORGING_KEY_INDEX";

const KEY_LENGTH: usize = 24;
const SCRYPT_SALT: &[u8] = b"salt";
const FIXED_IV: [u8; 16] = [0u8; 16];

type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;

#[derive(Debug, Error)]
pub enum PassphraseError {
    #[error("the {PASSWORD_ENV_VAR} environment variable is not set")]
    PasswordMissing,

    #[error("encrypted passphrase is not valid hex")]
    NotHex,

    #[error("passphrase decryption failed (wrong password?)")]
    DecryptionFailed,

    #[error("decrypted passphrase is not valid UTF-8")]
    NotUtf8,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

fn derive_key(password: &str) -> Result<[u8; KEY_LENGTH], PassphraseError> {
    let params = scrypt::Params::new(14, 8, 1, KEY_LENGTH)
        .map_err(|err| PassphraseError::KeyDerivation(err.to_string()))?;
    let mut key = [0u8; KEY_LENGTH];
    scrypt::scrypt(password.as_bytes(), SCRYPT_SALT, &params, &mut key)
        .map_err(|err| PassphraseError::KeyDerivation(err.to_string()))?;
    Ok(key)
}

/// Decrypt a hex-encoded encrypted passphrase with `password`.
pub fn decrypt_passphrase(
    encrypted_hex: &str,
    password: &str,
) -> Result<String, PassphraseError> {
    let key = derive_key(password)?;
    let ciphertext = hex::decode(encrypted_hex).map_err(|_| PassphraseError::NotHex)?;
    let plaintext = Aes192CbcDec::new(&key.into(), &FIXED_IV.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| PassphraseError::DecryptionFailed)?;
    String::from_utf8(plaintext).map_err(|_| PassphraseError::NotUtf8)
}

/// Encrypt a passphrase for storage in a config file.
pub fn encrypt_passphrase(
    passphrase: &str,
    password: &str,
) -> Result<String, PassphraseError> {
    let key = derive_key(password)?;
    let ciphertext = Aes192CbcEnc::new(&key.into(), &FIXED_IV.into())
        .encrypt_padded_vec_mut::<Pkcs7>(passphrase.as_bytes());
    Ok(hex::encode(ciphertext))
}

/// Read the encryption password from the environment.
pub fn password_from_env() -> Result<String, PassphraseError> {
    std::env::var(PASSWORD_ENV_VAR).map_err(|_| PassphraseError::PasswordMissing)
}

/// Optional forging key index override from the environment.
pub fn forging_key_index_from_env() -> Option<u64> {
    std::env::var(FORGING_KEY_INDEX_ENV_VAR)
        .ok()
        .and_then(|value| value.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trip() {
        let passphrase = "robot distance glove bar ivory mimic lobster gaze tobacco hill";
        let encrypted = encrypt_passphrase(passphrase, "hunter2").unwrap();
        assert_eq!(decrypt_passphrase(&encrypted, "hunter2").unwrap(), passphrase);
    }

    #[test]
    fn wrong_password_fails() {
        let encrypted = encrypt_passphrase("secret words", "hunter2").unwrap();
        assert!(decrypt_passphrase(&encrypted, "hunter3").is_err());
    }
}
