//! Incremental AES-256-CBC encryption with PKCS#7 padding.
//!
//! Records arrive one at a time, so the encryptor keeps the trailing
//! partial block and only emits whole blocks until [`StreamEncryptor::finalize`].

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncryptMut, KeyIvInit};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

/// AES block size
pub const BLOCK_LEN: usize = 16;

/// AES-256 key length
pub const KEY_LEN: usize = 32;

/// CBC IV length
pub const IV_LEN: usize = 16;

pub struct StreamEncryptor {
    cipher: Aes256CbcEnc,
    pending: Vec<u8>,
}

impl StreamEncryptor {
    pub fn new(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Self {
        Self {
            cipher: Aes256CbcEnc::new(GenericArray::from_slice(key), GenericArray::from_slice(iv)),
            pending: Vec::with_capacity(BLOCK_LEN),
        }
    }

    /// Encrypt as many whole blocks as are available. May return nothing.
    pub fn update(&mut self, data: &[u8]) -> Vec<u8> {
        self.pending.extend_from_slice(data);
        let whole = self.pending.len() / BLOCK_LEN * BLOCK_LEN;

        let mut out: Vec<u8> = self.pending.drain(..whole).collect();
        for block in out.chunks_exact_mut(BLOCK_LEN) {
            self.cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        out
    }

    /// Pad and encrypt the final block.
    pub fn finalize(mut self) -> Vec<u8> {
        let pad = BLOCK_LEN - self.pending.len();
        let mut last = std::mem::take(&mut self.pending);
        last.resize(BLOCK_LEN, pad as u8);
        self.cipher.encrypt_block_mut(GenericArray::from_mut_slice(&mut last));
        last
    }
}
