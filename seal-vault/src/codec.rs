//! Vault serialization: header + encrypted canonical body.

use std::collections::BTreeMap;

use seal_common::{
    aes::{DecryptError, FieldCipher},
    rng::Crng,
    sha256,
    vaults::{ProcessGroup, VaultSeq, VaultType},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("vault header is malformed: {0}")]
    Header(serde_json::Error),
    #[error("vault body failed decryption: {0}")]
    Crypto(#[from] DecryptError),
    #[error("vault body is not valid JSON: {0}")]
    Body(serde_json::Error),
    #[error("vault content hash mismatch: header {header}, computed {computed}")]
    HashMismatch {
        header: sha256::Hash,
        computed: sha256::Hash,
    },
    #[error("vault entry count mismatch: header {header}, actual {actual}")]
    EntryCountMismatch { header: u64, actual: u64 },
    #[error("vault file is malformed: {0}")]
    Malformed(&'static str),
}

/// The plaintext header prepended to every vault file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultHeader {
    pub seq: VaultSeq,
    #[serde(rename = "type")]
    pub vault_type: VaultType,
    pub pg: ProcessGroup,
    /// Which process produced this file, e.g. `"gm"`.
    pub source: String,
    pub entry_count: u64,
    pub content_hash: sha256::Hash,
}

/// A decoded (or to-be-encoded) vault.
///
/// The mapping is a `BTreeMap` so its JSON serialization is canonical
/// (sorted keys); the content hash is computed over exactly those bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Vault {
    pub vault_type: VaultType,
    pub seq: VaultSeq,
    pub pg: ProcessGroup,
    pub source: String,
    pub entries: BTreeMap<String, String>,
}

impl Vault {
    pub fn new(
        vault_type: VaultType,
        seq: VaultSeq,
        source: impl Into<String>,
        entries: BTreeMap<String, String>,
    ) -> Self {
        Self {
            vault_type,
            seq,
            pg: vault_type.process_group(),
            source: source.into(),
            entries,
        }
    }

    /// The canonical body bytes the content hash commits to.
    pub fn canonical_body(&self) -> Vec<u8> {
        serde_json::to_vec(&self.entries)
            .expect("BTreeMap<String, String> serialization cannot fail")
    }

    pub fn content_hash(&self) -> sha256::Hash {
        sha256::digest(&self.canonical_body())
    }

    /// Serialize and encrypt into the on-disk representation.
    pub fn encode<R: Crng>(
        &self,
        cipher: &FieldCipher,
        rng: &mut R,
    ) -> Vec<u8> {
        let body = self.canonical_body();
        let header = VaultHeader {
            seq: self.seq,
            vault_type: self.vault_type,
            pg: self.pg,
            source: self.source.clone(),
            entry_count: self.entries.len() as u64,
            content_hash: sha256::digest(&body),
        };
        let header_json = serde_json::to_string(&header)
            .expect("VaultHeader serialization cannot fail");
        let encrypted_body = cipher.encrypt(rng, &body);

        let mut out = Vec::with_capacity(
            header_json.len() + 1 + encrypted_body.len(),
        );
        out.extend_from_slice(header_json.as_bytes());
        out.push(b'\n');
        out.extend_from_slice(encrypted_body.as_bytes());
        out
    }

    /// Decrypt and validate the on-disk representation.
    ///
    /// Validation order: header parse, decrypt, hash check, body parse,
    /// entry count check. Any failure means the file must not be promoted.
    pub fn decode(
        cipher: &FieldCipher,
        raw: &[u8],
    ) -> Result<Self, VaultError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| VaultError::Malformed("vault file is not UTF-8"))?;
        let (header_json, encrypted_body) = text
            .split_once('\n')
            .ok_or(VaultError::Malformed("missing header/body separator"))?;

        let header: VaultHeader =
            serde_json::from_str(header_json).map_err(VaultError::Header)?;

        let body = cipher.decrypt(encrypted_body.trim_end())?;

        let computed = sha256::digest(&body);
        if computed != header.content_hash {
            return Err(VaultError::HashMismatch {
                header: header.content_hash,
                computed,
            });
        }

        let entries: BTreeMap<String, String> =
            serde_json::from_slice(&body).map_err(VaultError::Body)?;
        let actual = entries.len() as u64;
        if actual != header.entry_count {
            return Err(VaultError::EntryCountMismatch {
                header: header.entry_count,
                actual,
            });
        }

        Ok(Self {
            vault_type: header.vault_type,
            seq: header.seq,
            pg: header.pg,
            source: header.source,
            entries,
        })
    }

    /// Parse only the plaintext header, without decrypting.
    pub fn decode_header(raw: &[u8]) -> Result<VaultHeader, VaultError> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| VaultError::Malformed("vault file is not UTF-8"))?;
        let (header_json, _) = text
            .split_once('\n')
            .ok_or(VaultError::Malformed("missing header/body separator"))?;
        serde_json::from_str(header_json).map_err(VaultError::Header)
    }
}
