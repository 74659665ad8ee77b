//! NIP-04: encrypted direct message payloads.
//!
//! AES-256-CBC keyed by the x coordinate of the ECDH shared point, serialized as
//! `base64(ciphertext)?iv=base64(iv)`.

use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use base64::{Engine, engine::general_purpose::STANDARD};
use bitcoin::secp256k1::ecdh::shared_secret_point;
use bitcoin::secp256k1::{Parity, PublicKey};
use thiserror::Error;

use crate::nip01::{Nip01Error, parse_public_key, parse_secret_key};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_SEPARATOR: &str = "?iv=";

#[derive(Debug, Error)]
pub enum Nip04Error {
    #[error("key error: {0}")]
    Key(#[from] Nip01Error),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("cipher error: {0}")]
    Cipher(String),

    #[error("plaintext is not valid UTF-8")]
    InvalidUtf8,
}

pub fn encrypt(
    secret_key: &[u8; 32],
    peer_pubkey_hex: &str,
    plaintext: &str,
) -> Result<String, Nip04Error> {
    let key = shared_key(secret_key, peer_pubkey_hex)?;
    let iv: [u8; 16] = rand::random();
    let ciphertext = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|error| Nip04Error::Cipher(error.to_string()))?
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    Ok(format!(
        "{}{}{}",
        STANDARD.encode(ciphertext),
        IV_SEPARATOR,
        STANDARD.encode(iv)
    ))
}

pub fn decrypt(
    secret_key: &[u8; 32],
    peer_pubkey_hex: &str,
    payload: &str,
) -> Result<String, Nip04Error> {
    let (ciphertext_b64, iv_b64) = payload
        .split_once(IV_SEPARATOR)
        .ok_or_else(|| Nip04Error::MalformedPayload("missing iv".to_string()))?;
    let ciphertext = STANDARD
        .decode(ciphertext_b64)
        .map_err(|error| Nip04Error::MalformedPayload(error.to_string()))?;
    let iv = STANDARD
        .decode(iv_b64)
        .map_err(|error| Nip04Error::MalformedPayload(error.to_string()))?;

    let key = shared_key(secret_key, peer_pubkey_hex)?;
    let plaintext = Aes256CbcDec::new_from_slices(&key, &iv)
        .map_err(|error| Nip04Error::Cipher(error.to_string()))?
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|error| Nip04Error::Cipher(error.to_string()))?;

    String::from_utf8(plaintext).map_err(|_| Nip04Error::InvalidUtf8)
}

fn shared_key(secret_key: &[u8; 32], peer_pubkey_hex: &str) -> Result<[u8; 32], Nip04Error> {
    let secret = parse_secret_key(secret_key)?;
    let peer = PublicKey::from_x_only_public_key(parse_public_key(peer_pubkey_hex)?, Parity::Even);
    let point = shared_secret_point(&peer, &secret);

    let mut key = [0_u8; 32];
    key.copy_from_slice(&point[..32]);
    Ok(key)
}
