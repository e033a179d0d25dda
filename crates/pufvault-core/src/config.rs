//! Layered settings: built-in defaults, then an optional TOML file, then
//! `PUFVAULT_*` environment variables. Command-line flags are applied on
//! top by the caller.

use crate::error::{CoreError, CoreResult};
use crate::splitter::RecordLayout;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file stem looked up in the working directory.
pub const DEFAULT_CONFIG_STEM: &str = "pufvault";

pub const ENV_PREFIX: &str = "PUFVAULT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Multiplier applied to the declared bit length when sizing records.
    /// The CRP generator emits one byte per bit, so 8 bytes per unit.
    pub bytes_per_unit: u64,
    pub challenge_dir: PathBuf,
    pub response_dir: PathBuf,
    pub shard_dir: PathBuf,
    pub cipher_dir: PathBuf,
    pub merge_dir: PathBuf,
    pub decrypt_dir: PathBuf,
    /// JSON snapshot backing the command-line ledger.
    pub ledger_state: PathBuf,
    pub log_level: String,
    /// Worker threads for the derivation batch; 0 lets rayon decide.
    pub jobs: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bytes_per_unit: 8,
            challenge_dir: PathBuf::from("Challenge"),
            response_dir: PathBuf::from("Response"),
            shard_dir: PathBuf::from("1-2Shards"),
            cipher_dir: PathBuf::from("1-1Cipher"),
            merge_dir: PathBuf::from("2-2MergeCipher"),
            decrypt_dir: PathBuf::from("File"),
            ledger_state: PathBuf::from("ledger-state.json"),
            log_level: "info".to_string(),
            jobs: 0,
        }
    }
}

impl Settings {
    /// Load settings. With `path`, that file must exist; without it, an
    /// optional `pufvault.{toml,json,yaml}` in the working directory is used.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let defaults = Config::try_from(&Settings::default()).map_err(config_error)?;
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_STEM).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(defaults)
            .add_source(file)
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(config_error)?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.bytes_per_unit == 0 {
            return Err(CoreError::InvalidConfig(
                "bytes_per_unit must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn layout(&self, bit_length: u64, instances: u64) -> RecordLayout {
        RecordLayout::new(bit_length, self.bytes_per_unit, instances)
    }
}

fn config_error(e: config::ConfigError) -> CoreError {
    CoreError::InvalidConfig(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splitter::CrpKind;

    #[test]
    fn test_defaults_validate() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn test_default_layout_matches_generator_output() {
        let layout = Settings::default().layout(128, 6);
        assert_eq!(layout.chunk_size(CrpKind::Response).unwrap(), 6144);
        assert_eq!(layout.chunk_size(CrpKind::Challenge).unwrap(), 1024);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pufvault.toml");
        std::fs::write(
            &path,
            "bytes_per_unit = 2\nresponse_dir = \"CRPs/Response\"\njobs = 4\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.bytes_per_unit, 2);
        assert_eq!(settings.response_dir, PathBuf::from("CRPs/Response"));
        assert_eq!(settings.jobs, 4);
        // untouched keys keep their defaults
        assert_eq!(settings.challenge_dir, PathBuf::from("Challenge"));
    }

    #[test]
    fn test_zero_bytes_per_unit_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "bytes_per_unit = 0\n").unwrap();

        assert!(matches!(
            Settings::load(Some(&path)),
            Err(CoreError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn test_layout_uses_bytes_per_unit() {
        let settings = Settings {
            bytes_per_unit: 1,
            ..Settings::default()
        };
        assert_eq!(settings.layout(128, 6), RecordLayout::new(128, 1, 6));
    }
}
