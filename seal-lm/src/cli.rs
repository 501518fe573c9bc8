//! Command line arguments and environment configuration.

use std::path::PathBuf;

use anyhow::Context;
use argh::FromArgs;
use seal_common::{
    aes::FieldCipher,
    constants::DEFAULT_LM_PORT,
    env::DeployEnv,
    vaults::{PerVault, VaultType},
};

/// Seal Local Manager: applies vault versions from the receive directory
/// and serves the health endpoint.
#[derive(Debug, FromArgs)]
pub struct Args {
    /// port to bind the health API to
    #[argh(option, default = "DEFAULT_LM_PORT")]
    pub port: u16,

    /// receive directory the file-sync facility mirrors vault files into
    #[argh(option)]
    pub receive_dir: PathBuf,

    /// vault type to install, e.g. 'sma'; repeat per vault
    #[argh(option)]
    pub vault: Vec<String>,
}

impl Args {
    pub fn vault_types(&self) -> anyhow::Result<Vec<VaultType>> {
        anyhow::ensure!(
            !self.vault.is_empty(),
            "At least one --vault is required"
        );
        self.vault.iter().map(|raw| raw.parse()).collect()
    }
}

/// Configuration read from the environment at startup.
pub struct EnvConfig {
    pub deploy_env: DeployEnv,
    pub vault_keys: PerVault<FieldCipher>,
}

impl EnvConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let deploy_env = DeployEnv::from_env()?;
        let vault_keys = PerVault {
            sma: load_key("SEAL_VAULT_KEY_SMA")?,
            sta: load_key("SEAL_VAULT_KEY_STA")?,
        };
        Ok(Self {
            deploy_env,
            vault_keys,
        })
    }
}

fn load_key(var: &str) -> anyhow::Result<FieldCipher> {
    let value =
        std::env::var(var).with_context(|| format!("{var} was not set"))?;
    FieldCipher::from_base64(&value)
        .with_context(|| format!("{var} is not a valid 32-byte base64 key"))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vault_types_parse() {
        let args = Args {
            port: DEFAULT_LM_PORT,
            receive_dir: PathBuf::from("/tmp/recv"),
            vault: vec!["sma".to_owned(), "sta".to_owned()],
        };
        assert_eq!(
            args.vault_types().unwrap(),
            vec![VaultType::Sma, VaultType::Sta]
        );

        let bad = Args {
            port: DEFAULT_LM_PORT,
            receive_dir: PathBuf::from("/tmp/recv"),
            vault: vec!["xyz".to_owned()],
        };
        assert!(bad.vault_types().is_err());
    }
}
