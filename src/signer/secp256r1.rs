use ckb_types::{bytes::Bytes, H256};
use p256::ecdsa::{SigningKey, VerifyingKey};

use super::Signer;
use crate::error::{Error, Result};
use crate::locks::{secp256r1_lock_args, ScriptInfo, SIGNATURE_SIZE};
use crate::model::Script;

fn signing_key(secret: &[u8]) -> Result<SigningKey> {
    SigningKey::from_slice(secret).map_err(|err| Error::Signing(err.to_string()))
}

/// Compressed public key of a secp256r1 private key.
pub fn secp256r1_pubkey(secret: &[u8]) -> Result<Vec<u8>> {
    let key = signing_key(secret)?;
    Ok(VerifyingKey::from(&key)
        .to_encoded_point(true)
        .as_bytes()
        .to_vec())
}

/// 64-byte `r || s` followed by the recovery id.
pub fn sign_secp256r1(key: &SigningKey, message: &H256) -> Result<Bytes> {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(message.as_bytes())
        .map_err(|err| Error::Signing(err.to_string()))?;
    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte());
    Ok(Bytes::from(bytes))
}

/// Signs for a secp256r1 lock whose args are the blake160 of the
/// compressed public key.
pub struct Secp256r1Signer {
    key: SigningKey,
    lock: Script,
}

impl Secp256r1Signer {
    pub fn new(secret: &[u8], lock_info: &ScriptInfo) -> Result<Self> {
        let args = secp256r1_lock_args(&secp256r1_pubkey(secret)?);
        Ok(Secp256r1Signer {
            key: signing_key(secret)?,
            lock: lock_info.script(args),
        })
    }

    pub fn lock(&self) -> &Script {
        &self.lock
    }
}

impl Signer for Secp256r1Signer {
    fn matches(&self, lock: &Script) -> bool {
        lock == &self.lock
    }

    fn placeholder(&self) -> Bytes {
        Bytes::from(vec![0u8; SIGNATURE_SIZE])
    }

    fn sign(&self, message: &H256) -> Result<Bytes> {
        sign_secp256r1(&self.key, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hex::{bytes_to_hex, hex_to_bytes};
    use crate::model::{CellDep, DepType, OutPoint, ScriptHashType};
    use ecdsa::RecoveryId;
    use p256::ecdsa::Signature;

    const PRIVKEY: &str = "0x67842f5e4fa0edb34c9b4adbe8c3c1f3c737941f7c875d18bc6ec2f80554111d";

    fn r1_info() -> ScriptInfo {
        ScriptInfo {
            code_hash: H256([0x51; 32]),
            hash_type: ScriptHashType::Data1,
            cell_dep: CellDep::new(OutPoint::new(H256([0x52; 32]), 0), DepType::Code),
        }
    }

    #[test]
    fn test_pubkey_and_lock_args() {
        let secret = hex_to_bytes(PRIVKEY).unwrap();
        assert_eq!(
            bytes_to_hex(&secp256r1_pubkey(&secret).unwrap()),
            "0x038e7ea5c3d8f3ac3b7cf15e9d3d33193d15db6d70fa2a98e23e7c2cf07a5f7247"
        );
        let signer = Secp256r1Signer::new(&secret, &r1_info()).unwrap();
        assert_eq!(
            bytes_to_hex(&signer.lock().args),
            "0xc2149bb576c400645e4f66f6a455afb2062d8d65"
        );
    }

    #[test]
    fn test_signature_recovers_key() {
        let secret = hex_to_bytes(PRIVKEY).unwrap();
        let signer = Secp256r1Signer::new(&secret, &r1_info()).unwrap();
        let message = H256([7; 32]);
        let bytes = signer.sign(&message).unwrap();
        assert_eq!(bytes.len(), 65);

        let signature = Signature::from_slice(&bytes[..64]).unwrap();
        let recovery_id = RecoveryId::from_byte(bytes[64]).unwrap();
        let recovered =
            VerifyingKey::recover_from_prehash(message.as_bytes(), &signature, recovery_id)
                .unwrap();
        assert_eq!(
            recovered.to_encoded_point(true).as_bytes(),
            &secp256r1_pubkey(&secret).unwrap()[..]
        );
    }
}
