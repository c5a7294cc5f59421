//! Passphrase-based encryption of secret payloads.
//!
//! Payloads are encrypted with an age scrypt recipient: the passphrase goes
//! through scrypt key derivation (salt and work factor live in the age header)
//! and the payload is sealed with ChaCha20-Poly1305. The binary age file is
//! stored base64-encoded.

use std::fmt;
use std::sync::Arc;

use age::secrecy::{ExposeSecret, SecretString};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Errors from secret encryption and decryption.
#[derive(Debug, Error)]
pub enum CryptoError {
  #[error("failed to encrypt secret: {0}")]
  Encrypt(#[from] age::EncryptError),

  /// Wrong passphrase, corrupt ciphertext or unsupported header.
  #[error("failed to decrypt secret: {0}")]
  Decrypt(#[from] age::DecryptError),

  #[error("secret ciphertext is not valid base64: {0}")]
  Encoding(#[from] base64::DecodeError),

  #[error("decrypted secret is not valid UTF-8")]
  Utf8(#[from] std::string::FromUtf8Error),
}

/// Passphrase used to encrypt secrets of a scope.
#[derive(Clone)]
pub struct Passphrase(Arc<SecretString>);

impl Passphrase {
  pub fn new(passphrase: impl Into<String>) -> Self {
    Self(Arc::new(SecretString::from(passphrase.into())))
  }

  fn to_secret_string(&self) -> SecretString {
    SecretString::from(self.0.expose_secret().to_owned())
  }
}

impl fmt::Debug for Passphrase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Passphrase([REDACTED])")
  }
}

/// Encrypt `plaintext` and return the base64-encoded age ciphertext.
///
/// `work_factor` is the scrypt log2(N); `None` lets age calibrate it (about one
/// second on the current machine).
pub fn encrypt(plaintext: &str, passphrase: &Passphrase, work_factor: Option<u8>) -> Result<String, CryptoError> {
  let mut recipient = age::scrypt::Recipient::new(passphrase.to_secret_string());
  if let Some(log_n) = work_factor {
    recipient.set_work_factor(log_n);
  }
  let ciphertext = age::encrypt(&recipient, plaintext.as_bytes())?;
  Ok(STANDARD.encode(ciphertext))
}

/// Decrypt a payload produced by [`encrypt`].
pub fn decrypt(encoded: &str, passphrase: &Passphrase) -> Result<String, CryptoError> {
  let ciphertext = STANDARD.decode(encoded)?;
  let identity = age::scrypt::Identity::new(passphrase.to_secret_string());
  let plaintext = age::decrypt(&identity, &ciphertext)?;
  Ok(String::from_utf8(plaintext)?)
}
