//! `openssl enc -aes-256-cbc -pbkdf2 -salt` compatible bundles.
//!
//! Layout: `Salted__` magic, 8 byte salt, then AES-256-CBC ciphertext with
//! PKCS#7 padding. Key and IV come from PBKDF2-HMAC-SHA256 over the
//! passphrase and salt, 10000 rounds, 48 bytes (32 key, 16 IV).

use aes::Aes256;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use sha2::Sha256;

use crate::error::DeployError;

const MAGIC: &[u8; 8] = b"Salted__";
const SALT_LEN: usize = 8;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const PBKDF2_ROUNDS: u32 = 10_000;

type Encryptor = cbc::Encryptor<Aes256>;
type Decryptor = cbc::Decryptor<Aes256>;

fn derive(passphrase: &str, salt: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut out = [0u8; KEY_LEN + IV_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ROUNDS, &mut out);

    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&out[..KEY_LEN]);
    iv.copy_from_slice(&out[KEY_LEN..]);
    (key, iv)
}

/// Encrypt with a fresh random salt.
pub fn encrypt(plaintext: &[u8], passphrase: &str) -> Vec<u8> {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt);
    encrypt_with_salt(plaintext, passphrase, &salt)
}

pub fn encrypt_with_salt(plaintext: &[u8], passphrase: &str, salt: &[u8; SALT_LEN]) -> Vec<u8> {
    let (key, iv) = derive(passphrase, salt);
    let body = Encryptor::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut blob = Vec::with_capacity(MAGIC.len() + SALT_LEN + body.len());
    blob.extend_from_slice(MAGIC);
    blob.extend_from_slice(salt);
    blob.extend_from_slice(&body);
    blob
}

/// Decrypt a bundle. A wrong passphrase and a damaged bundle give the same error.
pub fn decrypt(blob: &[u8], passphrase: &str) -> Result<Vec<u8>, DeployError> {
    let header = MAGIC.len() + SALT_LEN;
    if blob.len() < header + IV_LEN || !blob.starts_with(MAGIC) {
        return Err(DeployError::Decrypt(
            "not an OpenSSL salted bundle".to_string(),
        ));
    }

    let (salt, body) = blob[MAGIC.len()..].split_at(SALT_LEN);
    if body.len() % IV_LEN != 0 {
        return Err(DeployError::Decrypt("truncated bundle".to_string()));
    }

    let (key, iv) = derive(passphrase, salt);
    Decryptor::new(&key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .map_err(|_| DeployError::Decrypt("bad passphrase or corrupt bundle".to_string()))
}
