//! RSA private key used by the login handshake.

use crate::error::StageError;
use rustls_pemfile::Item;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Encoding the key was stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    Pkcs1,
    Pkcs8,
}

/// DER bytes of the server's RSA private key.
#[derive(Clone)]
pub struct RsaKey {
    pub format: KeyFormat,
    der: Vec<u8>,
}

impl RsaKey {
    pub fn der(&self) -> &[u8] {
        &self.der
    }
}

// Keeps key material out of logs
impl std::fmt::Debug for RsaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKey")
            .field("format", &self.format)
            .field("len", &self.der.len())
            .finish()
    }
}

fn key_error(path: &Path, reason: impl Into<String>) -> StageError {
    StageError::ResourceLoad {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Reads the first RSA private key from a PEM file. Certificates and other
/// key types in the same file are skipped.
pub fn load_rsa_key(path: &Path) -> Result<RsaKey, StageError> {
    let file = File::open(path).map_err(|e| key_error(path, e.to_string()))?;
    let mut reader = BufReader::new(file);

    loop {
        let item = rustls_pemfile::read_one(&mut reader)
            .map_err(|e| key_error(path, format!("invalid PEM: {}", e)))?;
        match item {
            Some(Item::Pkcs1Key(key)) => {
                return Ok(RsaKey {
                    format: KeyFormat::Pkcs1,
                    der: key.secret_pkcs1_der().to_vec(),
                })
            }
            Some(Item::Pkcs8Key(key)) => {
                return Ok(RsaKey {
                    format: KeyFormat::Pkcs8,
                    der: key.secret_pkcs8_der().to_vec(),
                })
            }
            Some(_) => continue,
            None => return Err(key_error(path, "no RSA private key found")),
        }
    }
}
