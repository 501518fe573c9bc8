//! On-disk vault storage: atomic writes and valid-latest scans.
//!
//! The GM writes into its transmit directory; an external file-sync facility
//! mirrors files into each edge's receive directory, where the LM reads with
//! the same [`VaultStore`]. Filenames are `<type>-<seq>.vault` with the seq
//! zero-padded so lexical order is seq order.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use seal_common::{
    aes::FieldCipher,
    rng::Crng,
    vaults::{PerVault, VaultSeq, VaultType},
};
use tracing::warn;

use crate::codec::{Vault, VaultError, VaultHeader};

/// Width of the zero-padded seq in filenames.
const SEQ_WIDTH: usize = 10;

#[derive(Clone)]
pub struct VaultStore {
    dir: PathBuf,
    /// Each vault type encrypts under its own key.
    ciphers: PerVault<FieldCipher>,
}

impl VaultStore {
    pub fn new(dir: impl Into<PathBuf>, ciphers: PerVault<FieldCipher>) -> Self {
        Self {
            dir: dir.into(),
            ciphers,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn filename(vault_type: VaultType, seq: VaultSeq) -> String {
        format!("{vault_type}-{:0SEQ_WIDTH$}.vault", seq.to_u64())
    }

    /// Parse `(vault_type, seq)` out of a storage filename.
    fn parse_filename(name: &str) -> Option<(VaultType, VaultSeq)> {
        let stem = name.strip_suffix(".vault")?;
        let (type_str, seq_str) = stem.split_once('-')?;
        let vault_type = type_str.parse().ok()?;
        let seq = seq_str.parse().ok()?;
        Some((vault_type, seq))
    }

    /// Encrypt and atomically write `vault`, returning its filename.
    ///
    /// The write is durable (temp file, fsync, rename) before the filename
    /// is reported to the caller.
    pub fn write<R: Crng>(
        &self,
        rng: &mut R,
        vault: &Vault,
    ) -> Result<String, VaultError> {
        fs::create_dir_all(&self.dir)?;

        let raw = vault.encode(self.ciphers.get(vault.vault_type), rng);
        let filename = Self::filename(vault.vault_type, vault.seq);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&raw)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(&filename))
            .map_err(|e| VaultError::Io(e.error))?;

        Ok(filename)
    }

    /// Load and validate the vault at exactly `(vault_type, seq)`.
    /// Returns `Ok(None)` if no such file exists.
    pub fn load_by_seq(
        &self,
        vault_type: VaultType,
        seq: VaultSeq,
    ) -> Result<Option<Vault>, VaultError> {
        let path = self.dir.join(Self::filename(vault_type, seq));
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound =>
                return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Vault::decode(self.ciphers.get(vault_type), &raw).map(Some)
    }

    /// Seqs of all files present for `vault_type`, ascending. Filenames that
    /// don't parse are ignored.
    pub fn list_versions(
        &self,
        vault_type: VaultType,
    ) -> Result<Vec<VaultSeq>, VaultError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound =>
                return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut seqs = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some((vt, seq)) = Self::parse_filename(name) {
                if vt == vault_type {
                    seqs.push(seq);
                }
            }
        }
        seqs.sort_unstable();
        Ok(seqs)
    }

    /// Scan descending by seq; the first file whose decryption + hash check
    /// succeeds wins. Invalid files are logged and skipped, never fatal.
    pub fn load_latest_valid(
        &self,
        vault_type: VaultType,
    ) -> Result<Option<Vault>, VaultError> {
        let mut seqs = self.list_versions(vault_type)?;
        seqs.reverse();

        for seq in seqs {
            match self.load_by_seq(vault_type, seq) {
                Ok(Some(vault)) => return Ok(Some(vault)),
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        "Skipping invalid vault file {vault_type}-{seq}: {e}"
                    );
                    continue;
                }
            }
        }
        Ok(None)
    }

    /// Header of the newest parseable file, without decrypting. Used by the
    /// GM's startup reconciliation.
    pub fn newest_header(
        &self,
        vault_type: VaultType,
    ) -> Result<Option<VaultHeader>, VaultError> {
        let mut seqs = self.list_versions(vault_type)?;
        seqs.reverse();

        for seq in seqs {
            let path = self.dir.join(Self::filename(vault_type, seq));
            let raw = match fs::read(&path) {
                Ok(raw) => raw,
                Err(_) => continue,
            };
            match Vault::decode_header(&raw) {
                Ok(header) => return Ok(Some(header)),
                Err(e) => {
                    warn!(
                        "Skipping unparseable vault header \
                         {vault_type}-{seq}: {e}"
                    );
                    continue;
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use seal_common::{aes, rng::SmallRng};

    use super::*;

    fn test_store(dir: &Path) -> VaultStore {
        let ciphers = PerVault {
            sma: FieldCipher::new(&[0x01; aes::KEY_LEN]).unwrap(),
            sta: FieldCipher::new(&[0x02; aes::KEY_LEN]).unwrap(),
        };
        VaultStore::new(dir, ciphers)
    }

    fn vault(vt: VaultType, seq: u64, value: &str) -> Vault {
        let mut entries = BTreeMap::new();
        entries.insert("customer:1".to_owned(), value.to_owned());
        Vault::new(vt, VaultSeq(seq), "gm", entries)
    }

    #[test]
    fn filename_roundtrip() {
        let name = VaultStore::filename(VaultType::Sma, VaultSeq(42));
        assert_eq!(name, "sma-0000000042.vault");
        assert_eq!(
            VaultStore::parse_filename(&name),
            Some((VaultType::Sma, VaultSeq(42)))
        );
        assert_eq!(VaultStore::parse_filename("garbage.txt"), None);
    }

    #[test]
    fn write_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let mut rng = SmallRng::from_u64(1);

        let v = vault(VaultType::Sma, 3, "cfg");
        let filename = store.write(&mut rng, &v).unwrap();
        assert!(dir.path().join(&filename).exists());

        let loaded = store
            .load_by_seq(VaultType::Sma, VaultSeq(3))
            .unwrap()
            .unwrap();
        assert_eq!(loaded, v);

        // Vault types are namespaced.
        assert!(store
            .load_by_seq(VaultType::Sta, VaultSeq(3))
            .unwrap()
            .is_none());
    }

    #[test]
    fn latest_valid_skips_corrupted_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let mut rng = SmallRng::from_u64(2);

        store.write(&mut rng, &vault(VaultType::Sma, 1, "old")).unwrap();
        store.write(&mut rng, &vault(VaultType::Sma, 2, "good")).unwrap();

        // Corrupt the newest file (seq 3) on disk.
        let bad_name = VaultStore::filename(VaultType::Sma, VaultSeq(3));
        fs::write(dir.path().join(bad_name), b"{}\nnot-a-ciphertext").unwrap();

        let latest = store
            .load_latest_valid(VaultType::Sma)
            .unwrap()
            .unwrap();
        assert_eq!(latest.seq, VaultSeq(2));
        assert_eq!(latest.entries["customer:1"], "good");

        assert_eq!(
            store.list_versions(VaultType::Sma).unwrap(),
            vec![VaultSeq(1), VaultSeq(2), VaultSeq(3)],
        );
    }

    #[test]
    fn newest_header_reads_without_decrypting() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(dir.path());
        let mut rng = SmallRng::from_u64(3);

        store.write(&mut rng, &vault(VaultType::Sta, 7, "x")).unwrap();
        let header = store.newest_header(VaultType::Sta).unwrap().unwrap();
        assert_eq!(header.seq, VaultSeq(7));
        assert_eq!(header.entry_count, 1);

        assert!(store.newest_header(VaultType::Sma).unwrap().is_none());
    }

    #[test]
    fn empty_dir_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir.path().join("does-not-exist-yet"));
        assert!(store.load_latest_valid(VaultType::Sma).unwrap().is_none());
        assert!(store.list_versions(VaultType::Sma).unwrap().is_empty());
    }
}
