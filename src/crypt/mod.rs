//! Crypt Stream
//!
//! Optional AES-128-CFB layer over the record byte stream.
//!
//! CFB feeds ciphertext back into the shift register, so the state after `n`
//! bytes depends only on the IV and the first `n` ciphertext bytes. That lets
//! the store resume encryption at the append cursor after a load, and lets a
//! second process catch up by `advance`-ing over bytes it did not write.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

/// AES-128 key / IV / block length
pub const KEY_LEN: usize = 16;

/// Length of the key check stored in meta info
pub const KEY_CHECK_LEN: usize = 8;

/// A user supplied key, truncated or zero-padded to 16 bytes
#[derive(Clone, PartialEq, Eq)]
pub struct CryptKey {
    raw: Vec<u8>,
    padded: [u8; KEY_LEN],
}

impl CryptKey {
    /// Returns `None` for an empty key (no encryption)
    pub fn new(key: &[u8]) -> Option<Self> {
        if key.is_empty() {
            return None;
        }
        let raw = key[..key.len().min(KEY_LEN)].to_vec();
        let mut padded = [0u8; KEY_LEN];
        padded[..raw.len()].copy_from_slice(&raw);
        Some(Self { raw, padded })
    }

    /// The effective key bytes (at most 16)
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    /// Digest stored next to the IV so a wrong key is detected before decoding
    pub fn check_for(&self, iv: &[u8; KEY_LEN]) -> [u8; KEY_CHECK_LEN] {
        let mut ctx = md5::Context::new();
        ctx.consume(self.padded);
        ctx.consume(iv);
        let digest = ctx.compute();
        let mut check = [0u8; KEY_CHECK_LEN];
        check.copy_from_slice(&digest.0[..KEY_CHECK_LEN]);
        check
    }
}

impl std::fmt::Debug for CryptKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CryptKey(..)")
    }
}

pub fn random_iv() -> [u8; KEY_LEN] {
    rand::random()
}

/// Resumable AES-128-CFB state
#[derive(Clone)]
pub struct AesCfb {
    cipher: Aes128,
    register: [u8; KEY_LEN],
    num: usize,
}

impl AesCfb {
    pub fn new(key: &CryptKey, iv: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes128::new(GenericArray::from_slice(&key.padded)),
            register: *iv,
            num: 0,
        }
    }

    pub fn reset_iv(&mut self, iv: &[u8; KEY_LEN]) {
        self.register = *iv;
        self.num = 0;
    }

    fn next_pad(&mut self) -> &mut u8 {
        if self.num == 0 {
            self.cipher
                .encrypt_block(GenericArray::from_mut_slice(&mut self.register));
        }
        let pad = &mut self.register[self.num];
        self.num = (self.num + 1) % KEY_LEN;
        pad
    }

    pub fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let pad = self.next_pad();
            *byte ^= *pad;
            *pad = *byte;
        }
    }

    pub fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let pad = self.next_pad();
            let cipher_byte = *byte;
            *byte ^= *pad;
            *pad = cipher_byte;
        }
    }

    /// Move the stream past `ciphertext` without producing plaintext
    pub fn advance(&mut self, ciphertext: &[u8]) {
        for &cipher_byte in ciphertext {
            *self.next_pad() = cipher_byte;
        }
    }
}

/// The transform applied between the codec and the log
///
/// `Plain` is the identity; every store without a key uses it.
#[derive(Clone)]
pub enum CryptStream {
    Plain,
    Aes { key: CryptKey, state: AesCfb },
}

impl CryptStream {
    pub fn new(key: Option<&CryptKey>, iv: &[u8; KEY_LEN]) -> Self {
        match key {
            Some(key) => CryptStream::Aes {
                key: key.clone(),
                state: AesCfb::new(key, iv),
            },
            None => CryptStream::Plain,
        }
    }

    pub fn key(&self) -> Option<&CryptKey> {
        match self {
            CryptStream::Plain => None,
            CryptStream::Aes { key, .. } => Some(key),
        }
    }

    pub fn reset_iv(&mut self, iv: &[u8; KEY_LEN]) {
        if let CryptStream::Aes { state, .. } = self {
            state.reset_iv(iv);
        }
    }

    pub fn transform_encode(&mut self, data: &mut [u8]) {
        if let CryptStream::Aes { state, .. } = self {
            state.encrypt(data);
        }
    }

    pub fn transform_decode(&mut self, data: &mut [u8]) {
        if let CryptStream::Aes { state, .. } = self {
            state.decrypt(data);
        }
    }

    pub fn advance(&mut self, ciphertext: &[u8]) {
        if let CryptStream::Aes { state, .. } = self {
            state.advance(ciphertext);
        }
    }
}
