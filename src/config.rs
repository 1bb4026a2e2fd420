use std::fs;
use std::path::Path;
use std::time::Duration;

use ckb_types::h256;
use serde::{Deserialize, Serialize};

use crate::address::Network;
use crate::capacity::HumanCapacity;
use crate::error::{Error, Result};
use crate::locks::{ScriptInfo, MULTISIG_TYPE_HASH, SIGHASH_TYPE_HASH};
use crate::model::{CellDep, DepType, OutPoint, ScriptHashType};

pub const DEFAULT_CKB_RPC_URL: &str = "http://127.0.0.1:8114/";

// system script dep groups on the public testnet
const TESTNET_DEP_GROUP_TX: ckb_types::H256 =
    h256!("0xf8de3bb47d055cdf460d93a2a6e1b05f7432f9777c8c474abf4eec1d4aee5d37");

/// Settings read from `lab.toml`. Missing keys take the testnet defaults.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub network: Network,
    pub node_url: String,
    /// Fee paid by every lab transaction, in CKBytes, e.g. `"0.001"`.
    pub tx_fee: String,
    /// Largest fee a transaction may be sealed with, in CKBytes.
    pub fee_ceiling: String,
    pub confirm_timeout_secs: u64,
    pub indexer_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub sighash: ScriptInfo,
    pub multisig: ScriptInfo,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: Network::Testnet,
            node_url: DEFAULT_CKB_RPC_URL.to_string(),
            tx_fee: "0.001".to_string(),
            fee_ceiling: "1".to_string(),
            confirm_timeout_secs: 180,
            indexer_timeout_secs: 60,
            poll_interval_ms: 1000,
            sighash: ScriptInfo {
                code_hash: SIGHASH_TYPE_HASH,
                hash_type: ScriptHashType::Type,
                cell_dep: CellDep::new(OutPoint::new(TESTNET_DEP_GROUP_TX, 0), DepType::DepGroup),
            },
            multisig: ScriptInfo {
                code_hash: MULTISIG_TYPE_HASH,
                hash_type: ScriptHashType::Type,
                cell_dep: CellDep::new(OutPoint::new(TESTNET_DEP_GROUP_TX, 1), DepType::DepGroup),
            },
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|err| Error::Config(format!("{}: {}", path.display(), err)))?;
        config.check()?;
        Ok(config)
    }

    /// Reject values that would only fail later, mid-transaction.
    pub fn check(&self) -> Result<()> {
        let fee = self.tx_fee()?;
        let ceiling = self.fee_ceiling()?;
        if fee > ceiling {
            return Err(Error::Config(format!(
                "tx_fee {} is above fee_ceiling {}",
                self.tx_fee, self.fee_ceiling
            )));
        }
        Ok(())
    }

    pub fn tx_fee(&self) -> Result<u64> {
        parse_capacity("tx_fee", &self.tx_fee)
    }

    pub fn fee_ceiling(&self) -> Result<u64> {
        parse_capacity("fee_ceiling", &self.fee_ceiling)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn indexer_timeout(&self) -> Duration {
        Duration::from_secs(self.indexer_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn parse_capacity(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<HumanCapacity>()
        .map(u64::from)
        .map_err(|err| Error::Config(format!("{}: {}", key, err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::ONE_CKB;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tx_fee().unwrap(), 100_000);
        assert_eq!(config.fee_ceiling().unwrap(), ONE_CKB);
        assert_eq!(config.multisig.cell_dep.out_point.index, 1);
        config.check().unwrap();
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
node_url = "http://10.0.0.2:8114/"
tx_fee = "0.002"

[sighash]
code_hash = "0x9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8"
hash_type = "type"

[sighash.cell_dep]
dep_type = "dep_group"

[sighash.cell_dep.out_point]
tx_hash = "0x0101010101010101010101010101010101010101010101010101010101010101"
index = "0x3"
"#
        )
        .unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.node_url, "http://10.0.0.2:8114/");
        assert_eq!(config.tx_fee().unwrap(), 200_000);
        assert_eq!(config.sighash.cell_dep.out_point.index, 3);
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(config.multisig, Config::default().multisig);
    }

    #[test]
    fn test_load_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "tx_fee = \"2\"").unwrap();
        assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "network = \"devnet\"").unwrap();
        assert!(matches!(Config::load(file.path()), Err(Error::Config(_))));

        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Config::load(dir.path().join("missing.toml")),
            Err(Error::Io(_))
        ));
    }
}
