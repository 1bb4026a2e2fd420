use ckb_crypto::secp::Privkey;
use ckb_types::{bytes::Bytes, H256};

use super::secp256k1::{privkey_from_slice, secp256k1_pubkey, sign_secp256k1};
use super::Signer;
use crate::error::{Error, Result};
use crate::locks::{blake160, MultisigConfig, ScriptInfo};
use crate::model::Script;

/// Signs a multisig lock with `threshold` of its keys held locally.
pub struct MultisigSigner {
    config: MultisigConfig,
    lock: Script,
    // (position in the config, key), sorted by position
    keys: Vec<(usize, Privkey)>,
}

impl MultisigSigner {
    pub fn new(config: MultisigConfig, info: &ScriptInfo, secrets: &[Vec<u8>]) -> Result<Self> {
        let mut keys = Vec::with_capacity(secrets.len());
        for secret in secrets {
            let hash = blake160(&secp256k1_pubkey(secret)?);
            let position = config
                .pubkey_hashes
                .iter()
                .position(|h| *h == hash)
                .ok_or_else(|| Error::Signing("key is not a member of the multisig".to_string()))?;
            if keys.iter().any(|(p, _)| *p == position) {
                continue;
            }
            keys.push((position, privkey_from_slice(secret)?));
        }
        keys.sort_by_key(|(position, _)| *position);
        keys.truncate(usize::from(config.threshold));
        if keys.len() < usize::from(config.threshold) {
            return Err(Error::Signing(format!(
                "multisig needs {} keys, have {}",
                config.threshold,
                keys.len()
            )));
        }
        let first_n = usize::from(config.require_first_n);
        if keys.iter().take(first_n).map(|(p, _)| *p).ne(0..first_n) {
            return Err(Error::Signing(format!(
                "the first {} keys of the multisig must sign",
                first_n
            )));
        }
        Ok(MultisigSigner {
            lock: config.lock(info),
            config,
            keys,
        })
    }

    pub fn lock(&self) -> &Script {
        &self.lock
    }
}

impl Signer for MultisigSigner {
    fn matches(&self, lock: &Script) -> bool {
        lock == &self.lock
    }

    fn placeholder(&self) -> Bytes {
        let mut placeholder = self.config.to_bytes().to_vec();
        placeholder.resize(self.config.placeholder_len(), 0);
        Bytes::from(placeholder)
    }

    /// The multisig script followed by the signatures in key order.
    fn sign(&self, message: &H256) -> Result<Bytes> {
        let mut witness_lock = self.config.to_bytes().to_vec();
        for (_, key) in &self.keys {
            witness_lock.extend_from_slice(&sign_secp256k1(key, message)?);
        }
        Ok(Bytes::from(witness_lock))
    }
}
