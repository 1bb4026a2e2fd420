use ckb_crypto::secp::Privkey;
use ckb_types::{bytes::Bytes, H256};

use super::Signer;
use crate::error::{Error, Result};
use crate::locks::{blake160, sighash_lock, ScriptInfo, SIGNATURE_SIZE};
use crate::model::Script;

pub(super) fn privkey_from_slice(secret: &[u8]) -> Result<Privkey> {
    if secret.len() != 32 {
        return Err(Error::Signing(format!(
            "private key must be 32 bytes, got {}",
            secret.len()
        )));
    }
    Ok(Privkey::from_slice(secret))
}

/// Compressed public key of a secp256k1 private key.
pub fn secp256k1_pubkey(secret: &[u8]) -> Result<Vec<u8>> {
    let privkey = privkey_from_slice(secret)?;
    let pubkey = privkey
        .pubkey()
        .map_err(|err| Error::Signing(err.to_string()))?;
    Ok(pubkey.serialize())
}

/// 65-byte recoverable signature over a 32-byte digest.
pub fn sign_secp256k1(privkey: &Privkey, message: &H256) -> Result<Bytes> {
    let signature = privkey
        .sign_recoverable(message)
        .map_err(|err| Error::Signing(err.to_string()))?;
    Ok(Bytes::from(signature.serialize()))
}

/// Signs for the default secp256k1 blake160 sighash-all lock.
pub struct Secp256k1Signer {
    privkey: Privkey,
    pubkey_hash: [u8; 20],
    lock: Script,
}

impl Secp256k1Signer {
    pub fn new(secret: &[u8], sighash: &ScriptInfo) -> Result<Self> {
        let pubkey_hash = blake160(&secp256k1_pubkey(secret)?);
        Ok(Secp256k1Signer {
            privkey: privkey_from_slice(secret)?,
            pubkey_hash,
            lock: sighash_lock(sighash, &pubkey_hash),
        })
    }

    pub fn pubkey_hash(&self) -> &[u8; 20] {
        &self.pubkey_hash
    }

    pub fn lock(&self) -> &Script {
        &self.lock
    }
}

impl Signer for Secp256k1Signer {
    fn matches(&self, lock: &Script) -> bool {
        lock == &self.lock
    }

    fn placeholder(&self) -> Bytes {
        Bytes::from(vec![0u8; SIGNATURE_SIZE])
    }

    fn sign(&self, message: &H256) -> Result<Bytes> {
        sign_secp256k1(&self.privkey, message)
    }
}
