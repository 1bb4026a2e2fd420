//! Lock and type script constructors for the system scripts and the
//! custom locks deployed by the labs.

use std::collections::HashMap;

use ckb_hash::{blake2b_256, new_blake2b, Blake2bBuilder};
use ckb_types::{bytes::Bytes, h256, prelude::*, H256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{CellDep, OutPoint, Script, ScriptHashType};

pub const SIGHASH_TYPE_HASH: H256 =
    h256!("0x9bd7e06f3ecf4be0f2fcd2188b23f1b9fcc88e5d4b65a8637b17723bbda3cce8");
pub const MULTISIG_TYPE_HASH: H256 =
    h256!("0x5c5069eb0857efc65e1bca0c07df34c31663b3622fd3876c876320fc9634e2a8");
pub const TYPE_ID_CODE_HASH: H256 =
    h256!("0x00000000000000000000000000000000000000000000000000545950455f4944");

/// Size of a recoverable secp256k1 signature, also used for secp256r1.
pub const SIGNATURE_SIZE: usize = 65;

pub fn blake160(data: &[u8]) -> [u8; 20] {
    let mut hash = [0u8; 20];
    hash.copy_from_slice(&blake2b_256(data)[..20]);
    hash
}

/// Data hash of a binary, the code hash of scripts referencing it with
/// `hash_type = data`.
pub fn code_hash(binary: &[u8]) -> H256 {
    H256::from(blake2b_256(binary))
}

/// A script program deployed on chain and the dep that loads it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptInfo {
    pub code_hash: H256,
    pub hash_type: ScriptHashType,
    pub cell_dep: CellDep,
}

impl ScriptInfo {
    pub fn script(&self, args: Bytes) -> Script {
        Script::new(self.code_hash.clone(), self.hash_type, args)
    }

    pub fn matches(&self, script: &Script) -> bool {
        script.code_hash == self.code_hash && script.hash_type == self.hash_type
    }
}

pub fn sighash_lock(info: &ScriptInfo, pubkey_hash: &[u8; 20]) -> Script {
    info.script(Bytes::from(pubkey_hash.to_vec()))
}

/// An M-of-N multisig: `threshold` signatures out of `pubkey_hashes`, of
/// which the first `require_first_n` keys must always sign.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultisigConfig {
    pub require_first_n: u8,
    pub threshold: u8,
    pub pubkey_hashes: Vec<[u8; 20]>,
}

impl MultisigConfig {
    pub fn new(
        require_first_n: u8,
        threshold: u8,
        pubkey_hashes: Vec<[u8; 20]>,
    ) -> Result<Self> {
        if pubkey_hashes.is_empty() || pubkey_hashes.len() > 255 {
            return Err(Error::Format(format!(
                "multisig needs 1 to 255 keys, got {}",
                pubkey_hashes.len()
            )));
        }
        if threshold == 0 || usize::from(threshold) > pubkey_hashes.len() {
            return Err(Error::Format(format!(
                "multisig threshold {} out of range for {} keys",
                threshold,
                pubkey_hashes.len()
            )));
        }
        if require_first_n > threshold {
            return Err(Error::Format(format!(
                "require_first_n {} exceeds threshold {}",
                require_first_n, threshold
            )));
        }
        Ok(MultisigConfig {
            require_first_n,
            threshold,
            pubkey_hashes,
        })
    }

    /// `reserved | require_first_n | threshold | pubkeys_count | blake160...`
    pub fn to_bytes(&self) -> Bytes {
        let mut bytes = Vec::with_capacity(4 + 20 * self.pubkey_hashes.len());
        bytes.push(0);
        bytes.push(self.require_first_n);
        bytes.push(self.threshold);
        bytes.push(self.pubkey_hashes.len() as u8);
        for hash in &self.pubkey_hashes {
            bytes.extend_from_slice(hash);
        }
        Bytes::from(bytes)
    }

    pub fn lock_args(&self) -> Bytes {
        Bytes::from(blake160(&self.to_bytes()).to_vec())
    }

    pub fn lock(&self, info: &ScriptInfo) -> Script {
        info.script(self.lock_args())
    }

    /// Witness lock size: the multisig script followed by the signatures.
    pub fn placeholder_len(&self) -> usize {
        self.to_bytes().len() + SIGNATURE_SIZE * usize::from(self.threshold)
    }
}

/// Args of a hash lock: plain blake2b-256 of the preimage, no
/// personalization.
pub fn hash_lock_args(preimage: &[u8]) -> Bytes {
    let mut hasher = Blake2bBuilder::new(32).build();
    hasher.update(preimage);
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    Bytes::from(hash.to_vec())
}

/// A lock referencing deployed code by data hash.
pub fn data_lock(code_hash: H256, args: Bytes) -> Script {
    Script::new(code_hash, ScriptHashType::Data, args)
}

/// Args of a secp256r1 lock: blake160 of the compressed public key.
pub fn secp256r1_lock_args(compressed_pubkey: &[u8]) -> Bytes {
    Bytes::from(blake160(compressed_pubkey).to_vec())
}

/// Type id for output `output_index` of a transaction whose first input
/// spends `first_input`.
pub fn type_id_script(first_input: &OutPoint, output_index: u64) -> Script {
    let input = first_input.to_input();
    let mut blake2b = new_blake2b();
    blake2b.update(input.as_slice());
    blake2b.update(&output_index.to_le_bytes());
    let mut ret = [0; 32];
    blake2b.finalize(&mut ret);
    Script::new(
        TYPE_ID_CODE_HASH,
        ScriptHashType::Type,
        Bytes::from(ret.to_vec()),
    )
}

/// Witness lock placeholders of the locks a transaction may need to sign.
///
/// Exact scripts take precedence over code-level registrations, so a
/// multisig lock can carry its own placeholder next to a sighash default.
#[derive(Clone, Debug, Default)]
pub struct LockRegistry {
    by_code: HashMap<(H256, ScriptHashType), Bytes>,
    by_script: HashMap<Script, Bytes>,
}

impl LockRegistry {
    pub fn new() -> Self {
        LockRegistry::default()
    }

    /// Every lock running `code_hash` signs into `size` zero bytes.
    pub fn register_code(
        &mut self,
        code_hash: H256,
        hash_type: ScriptHashType,
        size: usize,
    ) -> &mut Self {
        self.by_code
            .insert((code_hash, hash_type), Bytes::from(vec![0u8; size]));
        self
    }

    pub fn register_script(&mut self, script: Script, placeholder: Bytes) -> &mut Self {
        self.by_script.insert(script, placeholder);
        self
    }

    /// The multisig script stays in the placeholder, only the signatures
    /// are zeroed.
    pub fn register_multisig(&mut self, config: &MultisigConfig, info: &ScriptInfo) -> &mut Self {
        let mut placeholder = config.to_bytes().to_vec();
        placeholder.resize(config.placeholder_len(), 0);
        self.register_script(config.lock(info), Bytes::from(placeholder))
    }

    pub fn placeholder(&self, lock: &Script) -> Option<&Bytes> {
        self.by_script.get(lock).or_else(|| {
            self.by_code
                .get(&(lock.code_hash.clone(), lock.hash_type))
        })
    }

    pub fn placeholder_len(&self, lock: &Script) -> Option<usize> {
        self.placeholder(lock).map(Bytes::len)
    }
}
