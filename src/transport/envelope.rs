//! Wire envelopes: one JSON frame per message, plain or encrypted.
//!
//! Encryption is ChaCha20-Poly1305 with a 256-bit key derived from the
//! configured secret via SHA-256. The secret is either a literal string or
//! a `file:`-prefixed path whose trimmed contents are the secret. Both
//! endpoints must carry the same key; with a key configured, plaintext
//! frames from the peer are rejected.

use crate::error::{Result, VoxflowError};
use crate::message::Message;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One frame on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "snake_case")]
pub enum TransportEnvelope {
    Plain {
        message: Message,
    },
    Encrypted {
        /// Base64 of the 96-bit AEAD nonce.
        nonce: String,
        /// Base64 of ciphertext plus authentication tag.
        ciphertext: String,
    },
}

fn transport_err(message: impl Into<String>) -> VoxflowError {
    VoxflowError::Transport {
        message: message.into(),
    }
}

/// Symmetric cipher shared by both endpoints of a link.
pub struct EnvelopeCipher {
    cipher: ChaCha20Poly1305,
}

impl EnvelopeCipher {
    /// Derives the key from a configured secret: a literal string, or
    /// `file:<path>` pointing at a file whose trimmed contents are the
    /// secret.
    pub fn from_secret(secret: &str) -> Result<Self> {
        let material = match secret.strip_prefix("file:") {
            Some(path) => std::fs::read_to_string(path)
                .map_err(|e| transport_err(format!("cannot read key file '{path}': {e}")))?
                .trim()
                .to_string(),
            None => secret.to_string(),
        };
        if material.is_empty() {
            return Err(transport_err("transport key is empty"));
        }
        let digest = Sha256::digest(material.as_bytes());
        let key = Key::from_slice(&digest);
        Ok(Self {
            cipher: ChaCha20Poly1305::new(key),
        })
    }

    fn seal(&self, message: &Message) -> Result<TransportEnvelope> {
        let plaintext = serde_json::to_vec(message)
            .map_err(|e| transport_err(format!("cannot serialize message: {e}")))?;
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| transport_err("encryption failed"))?;
        Ok(TransportEnvelope::Encrypted {
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        })
    }

    fn open(&self, nonce: &str, ciphertext: &str) -> Result<Message> {
        let nonce = BASE64
            .decode(nonce)
            .map_err(|_| transport_err("malformed nonce"))?;
        if nonce.len() != 12 {
            return Err(transport_err("malformed nonce"));
        }
        let ciphertext = BASE64
            .decode(ciphertext)
            .map_err(|_| transport_err("malformed ciphertext"))?;
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| transport_err("decryption failed (key mismatch or corrupt frame)"))?;
        serde_json::from_slice(&plaintext)
            .map_err(|e| transport_err(format!("malformed decrypted frame: {e}")))
    }
}

/// Serializes one message to a frame line (without the trailing newline).
pub fn encode_frame(message: &Message, cipher: Option<&EnvelopeCipher>) -> Result<String> {
    let envelope = match cipher {
        Some(cipher) => cipher.seal(message)?,
        None => TransportEnvelope::Plain {
            message: message.clone(),
        },
    };
    serde_json::to_string(&envelope).map_err(|e| transport_err(format!("cannot encode frame: {e}")))
}

/// Parses one frame line back into a message.
pub fn decode_frame(line: &str, cipher: Option<&EnvelopeCipher>) -> Result<Message> {
    let envelope: TransportEnvelope =
        serde_json::from_str(line).map_err(|e| transport_err(format!("malformed frame: {e}")))?;
    match (envelope, cipher) {
        (TransportEnvelope::Plain { message }, None) => Ok(message),
        (TransportEnvelope::Plain { .. }, Some(_)) => Err(transport_err(
            "peer sent a plaintext frame on an encrypted link",
        )),
        (TransportEnvelope::Encrypted { nonce, ciphertext }, Some(cipher)) => {
            cipher.open(&nonce, &ciphertext)
        }
        (TransportEnvelope::Encrypted { .. }, None) => Err(transport_err(
            "peer sent an encrypted frame but no key is configured",
        )),
    }
}
