//! Command line arguments and environment configuration.

use std::{path::PathBuf, str::FromStr};

use anyhow::Context;
use argh::FromArgs;
use base64::Engine;
use seal_common::{
    aes::FieldCipher,
    constants::DEFAULT_GM_PORT,
    env::DeployEnv,
    ids::LmId,
    vaults::PerVault,
};

use crate::poller::LmEndpoint;

/// Seal Global Manager: vault generation, LM polling, control-plane API.
#[derive(Debug, FromArgs)]
pub struct Args {
    /// port to bind the internal API to
    #[argh(option, default = "DEFAULT_GM_PORT")]
    pub port: u16,

    /// transmit directory vault files are written to
    #[argh(option)]
    pub vault_dir: PathBuf,

    /// an LM endpoint as 'id,name,url'; repeat per edge
    #[argh(option)]
    pub lm: Vec<String>,

    /// serve dev-only test endpoints (clock control, mock wallet, faults)
    #[argh(switch)]
    pub test_endpoints: bool,
}

impl Args {
    pub fn lm_endpoints(&self) -> anyhow::Result<Vec<LmEndpoint>> {
        self.lm.iter().map(|raw| parse_lm_endpoint(raw)).collect()
    }
}

/// `'id,name,url'` -> [`LmEndpoint`].
pub fn parse_lm_endpoint(raw: &str) -> anyhow::Result<LmEndpoint> {
    let mut parts = raw.splitn(3, ',');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(id), Some(name), Some(url)) if !id.is_empty() => {
            Ok(LmEndpoint {
                id: LmId(id.to_owned()),
                name: name.to_owned(),
                url: url.trim_end_matches('/').to_owned(),
            })
        }
        _ => anyhow::bail!("Expected 'id,name,url', got '{raw}'"),
    }
}

/// Configuration read from the environment at startup.
pub struct EnvConfig {
    pub deploy_env: DeployEnv,
    pub vault_keys: PerVault<FieldCipher>,
    pub stripe_secret_key: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let deploy_env = DeployEnv::from_env()?;
        let vault_keys = PerVault {
            sma: load_key("SEAL_VAULT_KEY_SMA")?,
            sta: load_key("SEAL_VAULT_KEY_STA")?,
        };
        let stripe_secret_key = std::env::var("STRIPE_SECRET_KEY").ok();
        Ok(Self {
            deploy_env,
            vault_keys,
            stripe_secret_key,
        })
    }

    /// Deterministic dev keys, for tests and local runs without env setup.
    pub fn dev_vault_keys() -> PerVault<FieldCipher> {
        PerVault {
            sma: FieldCipher::new(&[0x5a; 32]).expect("32 bytes"),
            sta: FieldCipher::new(&[0x5b; 32]).expect("32 bytes"),
        }
    }
}

/// Load a 32-byte base64 field cipher key from the environment.
fn load_key(var: &str) -> anyhow::Result<FieldCipher> {
    let value =
        std::env::var(var).with_context(|| format!("{var} was not set"))?;
    FieldCipher::from_base64(&value)
        .with_context(|| format!("{var} is not a valid 32-byte base64 key"))
}

/// Render a key for `SEAL_VAULT_KEY_*` from raw bytes (ops tooling).
pub fn encode_key(key: &[u8; 32]) -> String {
    base64::engine::general_purpose::STANDARD.encode(key)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lm_endpoint_parsing() {
        let ep =
            parse_lm_endpoint("lm-eu-1,Frankfurt,http://10.0.0.7:4071/")
                .unwrap();
        assert_eq!(ep.id, LmId("lm-eu-1".to_owned()));
        assert_eq!(ep.name, "Frankfurt");
        assert_eq!(ep.url, "http://10.0.0.7:4071");

        assert!(parse_lm_endpoint("lm-eu-1,Frankfurt").is_err());
        assert!(parse_lm_endpoint(",x,http://h").is_err());
    }

    #[test]
    fn key_encode_roundtrip() {
        let encoded = encode_key(&[7u8; 32]);
        assert!(FieldCipher::from_base64(&encoded).is_ok());
    }

    #[test]
    fn lm_endpoints_from_args() {
        let args = Args {
            port: DEFAULT_GM_PORT,
            vault_dir: PathBuf::from_str("/tmp/vaults").unwrap(),
            lm: vec!["a,b,http://h1".to_owned(), "c,d,http://h2".to_owned()],
            test_endpoints: false,
        };
        assert_eq!(args.lm_endpoints().unwrap().len(), 2);
    }
}
