//! Deployment environment handling.
//!
//! The deploy environment gates everything dangerous: mock payment providers,
//! the mock clock, and the GM test endpoints are all dev-only, enforced at
//! construction / startup.

use std::{env, fmt, str::FromStr};

use anyhow::{anyhow, ensure, Context};
use serde::Serialize;
use serde_with::DeserializeFromStr;
use strum::VariantArray;

/// Represents a validated `DEPLOY_ENVIRONMENT` configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize)]
#[derive(DeserializeFromStr, VariantArray)]
#[cfg_attr(
    any(test, feature = "test-utils"),
    derive(proptest_derive::Arbitrary)
)]
pub enum DeployEnv {
    /// "dev"
    Dev,
    /// "staging"
    Staging,
    /// "prod"
    Prod,
}

impl DeployEnv {
    /// Read a [`DeployEnv`] from env, or err if it was invalid / didn't exist.
    pub fn from_env() -> anyhow::Result<Self> {
        let value = env::var("DEPLOY_ENVIRONMENT")
            .context("DEPLOY_ENVIRONMENT was not set")?;
        Self::from_str(&value)
    }

    /// Shorthand to check whether this [`DeployEnv`] is dev.
    #[inline]
    pub fn is_dev(self) -> bool {
        matches!(self, Self::Dev)
    }

    /// Shorthand to check whether this [`DeployEnv`] is staging or prod.
    #[inline]
    pub fn is_staging_or_prod(self) -> bool {
        matches!(self, Self::Staging | Self::Prod)
    }

    /// Get a [`str`] containing "dev", "staging", or "prod".
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Prod => "prod",
        }
    }

    /// Validate a request to enable mock payment providers / the mock clock.
    pub fn validate_mock_mode(self, mock_enabled: bool) -> anyhow::Result<()> {
        if mock_enabled {
            ensure!(
                self.is_dev(),
                "Mock mode can only be enabled in a dev environment",
            );
        }
        Ok(())
    }

    /// Validate a request to serve test endpoints. Callers abort at startup
    /// on error; test endpoints must never exist outside dev.
    pub fn validate_test_endpoints(
        self,
        test_endpoints: bool,
    ) -> anyhow::Result<()> {
        if test_endpoints {
            ensure!(
                self.is_dev(),
                "Test endpoints can only be served in a dev environment",
            );
        }
        Ok(())
    }
}

impl FromStr for DeployEnv {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Self::Dev),
            "staging" => Ok(Self::Staging),
            "prod" => Ok(Self::Prod),
            _ => Err(anyhow!(
                "Unrecognized DEPLOY_ENVIRONMENT '{s}': \
                 must be in ['dev', 'staging', 'prod']"
            )),
        }
    }
}

impl fmt::Display for DeployEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn str_roundtrip() {
        for env in DeployEnv::VARIANTS {
            assert_eq!(DeployEnv::from_str(env.as_str()).unwrap(), *env);
        }
        assert!(DeployEnv::from_str("production").is_err());
    }

    #[test]
    fn mock_mode_gating() {
        assert!(DeployEnv::Dev.validate_mock_mode(true).is_ok());
        assert!(DeployEnv::Staging.validate_mock_mode(true).is_err());
        assert!(DeployEnv::Prod.validate_mock_mode(true).is_err());
        assert!(DeployEnv::Prod.validate_mock_mode(false).is_ok());

        assert!(DeployEnv::Prod.validate_test_endpoints(true).is_err());
        assert!(DeployEnv::Dev.validate_test_endpoints(true).is_ok());
    }
}
