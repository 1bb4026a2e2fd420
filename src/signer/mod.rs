//! Signing messages and the signers that answer them.

mod multisig;
mod secp256k1;
mod secp256r1;

pub use self::multisig::MultisigSigner;
pub use self::secp256k1::{secp256k1_pubkey, sign_secp256k1, Secp256k1Signer};
pub use self::secp256r1::{secp256r1_pubkey, sign_secp256r1, Secp256r1Signer};

use std::collections::HashSet;

use ckb_hash::{new_blake2b, Blake2b};
use ckb_types::{bytes::Bytes, H256};
use log::debug;

use crate::error::{Error, Result};
use crate::model::{LiveCell, Script};
use crate::skeleton::{SealedTransaction, TransactionSkeleton};

/// The message one lock group has to sign.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningEntry {
    /// First input of the group, where the signature goes.
    pub index: usize,
    pub lock: Script,
    pub message: H256,
}

fn hash_witness(hasher: &mut Blake2b, witness: &[u8]) {
    hasher.update(&(witness.len() as u64).to_le_bytes());
    hasher.update(witness);
}

/// One entry per distinct input lock, in order of first appearance.
///
/// The message commits to the transaction hash, the group's witnesses and
/// every witness past the inputs, each prefixed by its length as u64 LE.
pub fn signing_entries<F>(
    tx_hash: &H256,
    inputs: &[LiveCell],
    witnesses: &[Bytes],
    mut select: F,
) -> Result<Vec<SigningEntry>>
where
    F: FnMut(&Script) -> bool,
{
    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    let group_end = inputs.len().min(witnesses.len());
    for (i, input) in inputs.iter().enumerate() {
        let lock = input.lock();
        if !seen.insert(lock) || !select(lock) {
            continue;
        }
        let witness = witnesses.get(i).ok_or(Error::MissingWitness(i))?;
        let mut hasher = new_blake2b();
        hasher.update(tx_hash.as_bytes());
        hash_witness(&mut hasher, witness);
        for j in (i + 1)..group_end {
            if inputs[j].lock() == lock {
                hash_witness(&mut hasher, &witnesses[j]);
            }
        }
        for witness in witnesses.iter().skip(inputs.len()) {
            hash_witness(&mut hasher, witness);
        }
        let mut message = [0u8; 32];
        hasher.finalize(&mut message);
        entries.push(SigningEntry {
            index: i,
            lock: lock.clone(),
            message: H256::from(message),
        });
    }
    Ok(entries)
}

/// Something that can unlock inputs guarded by particular locks.
pub trait Signer {
    fn matches(&self, lock: &Script) -> bool;

    /// Zeroed witness lock of the size `sign` returns.
    fn placeholder(&self) -> Bytes;

    /// The bytes that go into the witness lock field for `message`.
    fn sign(&self, message: &H256) -> Result<Bytes>;
}

/// Sign every lock group some signer matches, then seal.
///
/// Each matched group first gets a witness lock sized for its signer, so
/// the message covers the same witness length the signature ends up in.
/// Groups no signer matches get no entry, so their witnesses must already
/// hold whatever unlocks them.
pub fn sign_transaction(
    skeleton: &mut TransactionSkeleton,
    signers: &[&dyn Signer],
) -> Result<SealedTransaction> {
    let slots: Vec<(usize, Bytes)> = skeleton
        .lock_groups()
        .into_iter()
        .filter_map(|(index, lock)| {
            signers
                .iter()
                .find(|signer| signer.matches(lock))
                .map(|signer| (index, signer.placeholder()))
        })
        .collect();
    for (index, placeholder) in slots {
        skeleton.reserve_signature(index, placeholder)?;
    }
    let entries = skeleton
        .prepare_signing_entries_for(|lock| signers.iter().any(|signer| signer.matches(lock)))?
        .to_vec();
    let mut signatures = Vec::with_capacity(entries.len());
    for entry in &entries {
        let signer = signers
            .iter()
            .find(|signer| signer.matches(&entry.lock))
            .ok_or_else(|| Error::Signing(format!("no signer for input {}", entry.index)))?;
        debug!("sign input group at {} ({:#x})", entry.index, entry.message);
        signatures.push(signer.sign(&entry.message)?);
    }
    skeleton.seal(signatures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::ONE_CKB;
    use crate::hex::hex_to_bytes;
    use crate::locks::{
        blake160, MultisigConfig, ScriptInfo, MULTISIG_TYPE_HASH, SIGHASH_TYPE_HASH,
        SIGNATURE_SIZE,
    };
    use crate::model::{Cell, CellDep, DepType, OutPoint, ScriptHashType};
    use crate::skeleton::{witness_with_lock, TransactionLike};
    use ckb_crypto::secp::Signature;
    use ckb_types::{packed::WitnessArgs, prelude::*};

    const KEY_A: &str = "0x67842f5e4fa0edb34c9b4adbe8c3c1f3c737941f7c875d18bc6ec2f80554111d";
    const KEY_B: &str = "0xd00c06bfd800d27397002dca6fb0993d5ba6399b4238b2f29ee9deb97593d2bc";

    fn info(code_hash: H256, index: u32) -> ScriptInfo {
        ScriptInfo {
            code_hash,
            hash_type: ScriptHashType::Type,
            cell_dep: CellDep::new(OutPoint::new(H256::default(), index), DepType::DepGroup),
        }
    }

    fn witness_lock(witness: &Bytes) -> Bytes {
        WitnessArgs::from_slice(witness)
            .unwrap()
            .lock()
            .to_opt()
            .unwrap()
            .unpack()
    }

    /// Sign a one-input transaction spending `lock` without registering
    /// any placeholder first.
    fn sign_single(lock: Script, signer: &dyn Signer) -> SealedTransaction {
        let mut skeleton = TransactionSkeleton::new();
        skeleton
            .push_input(input(0, lock))
            .unwrap()
            .push_output(Cell::with_capacity(99 * ONE_CKB, self::lock(2)))
            .unwrap();
        sign_transaction(&mut skeleton, &[signer]).unwrap()
    }

    fn lock(byte: u8) -> Script {
        Script::new(
            SIGHASH_TYPE_HASH,
            ScriptHashType::Type,
            Bytes::from(vec![byte; 20]),
        )
    }

    fn input(index: u32, lock: Script) -> LiveCell {
        LiveCell::new(
            OutPoint::new(H256([9; 32]), index),
            Cell::with_capacity(100 * ONE_CKB, lock),
        )
    }

    fn expected_message(tx_hash: &H256, witnesses: &[&[u8]]) -> H256 {
        let mut hasher = new_blake2b();
        hasher.update(tx_hash.as_bytes());
        for witness in witnesses {
            hasher.update(&(witness.len() as u64).to_le_bytes());
            hasher.update(witness);
        }
        let mut message = [0u8; 32];
        hasher.finalize(&mut message);
        H256::from(message)
    }

    #[test]
    fn test_two_groups_over_four_inputs() {
        let inputs = vec![
            input(0, lock(1)),
            input(1, lock(2)),
            input(2, lock(1)),
            input(3, lock(2)),
        ];
        let witnesses: Vec<Bytes> = (0u8..5).map(|i| Bytes::from(vec![i; 3])).collect();
        let tx_hash = H256([7; 32]);
        let entries = signing_entries(&tx_hash, &inputs, &witnesses, |_| true).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].index, 0);
        assert_eq!(entries[0].lock, lock(1));
        assert_eq!(entries[1].index, 1);
        assert_eq!(
            entries[0].message,
            expected_message(&tx_hash, &[&witnesses[0], &witnesses[2], &witnesses[4]])
        );
        assert_eq!(
            entries[1].message,
            expected_message(&tx_hash, &[&witnesses[1], &witnesses[3], &witnesses[4]])
        );
    }

    #[test]
    fn test_select_and_missing_witness() {
        let inputs = vec![input(0, lock(1)), input(1, lock(2))];
        let witnesses = vec![Bytes::from_static(b"w")];
        let tx_hash = H256::default();

        let entries =
            signing_entries(&tx_hash, &inputs, &witnesses, |lock| lock.args[0] == 1).unwrap();
        assert_eq!(entries.len(), 1);

        let err = signing_entries(&tx_hash, &inputs, &witnesses, |_| true).unwrap_err();
        assert!(matches!(err, Error::MissingWitness(1)));
    }

    #[test]
    fn test_empty_witness_is_hashed_with_zero_length() {
        let inputs = vec![input(0, lock(1))];
        let witnesses = vec![Bytes::new()];
        let tx_hash = H256([3; 32]);
        let entries = signing_entries(&tx_hash, &inputs, &witnesses, |_| true).unwrap();
        assert_eq!(entries[0].message, expected_message(&tx_hash, &[&[]]));
    }

    #[test]
    fn test_signer_sizes_its_own_witness() {
        let secret = hex_to_bytes(KEY_A).unwrap();
        let signer = Secp256k1Signer::new(&secret, &info(SIGHASH_TYPE_HASH, 0)).unwrap();
        let sealed = sign_single(signer.lock().clone(), &signer);

        let signature = witness_lock(&sealed.witnesses()[0]);
        assert_eq!(signature.len(), SIGNATURE_SIZE);
        let placeholder = witness_with_lock(signer.placeholder());
        let entries =
            signing_entries(sealed.hash(), sealed.inputs(), &[placeholder], |_| true).unwrap();
        let recovered = Signature::from_slice(&signature)
            .unwrap()
            .recover(&entries[0].message)
            .unwrap();
        assert_eq!(recovered.serialize(), secp256k1_pubkey(&secret).unwrap());
    }

    #[test]
    fn test_multisig_without_registered_placeholder() {
        let key_a = hex_to_bytes(KEY_A).unwrap();
        let key_b = hex_to_bytes(KEY_B).unwrap();
        let config = MultisigConfig::new(
            0,
            2,
            vec![
                blake160(&secp256k1_pubkey(&key_a).unwrap()),
                blake160(&secp256k1_pubkey(&key_b).unwrap()),
                [0x47; 20],
            ],
        )
        .unwrap();
        let signer = MultisigSigner::new(
            config.clone(),
            &info(MULTISIG_TYPE_HASH, 1),
            &[key_a.clone(), key_b],
        )
        .unwrap();
        let sealed = sign_single(signer.lock().clone(), &signer);

        let witness = witness_lock(&sealed.witnesses()[0]);
        assert_eq!(witness.len(), config.placeholder_len());
        assert_eq!(&witness[..64], &config.to_bytes()[..]);
        let placeholder = witness_with_lock(signer.placeholder());
        let entries =
            signing_entries(sealed.hash(), sealed.inputs(), &[placeholder], |_| true).unwrap();
        let recovered = Signature::from_slice(&witness[64..129])
            .unwrap()
            .recover(&entries[0].message)
            .unwrap();
        assert_eq!(recovered.serialize(), secp256k1_pubkey(&key_a).unwrap());
    }

    #[test]
    fn test_secp256r1_without_registered_placeholder() {
        let secret = hex_to_bytes(KEY_A).unwrap();
        let signer = Secp256r1Signer::new(&secret, &info(H256([0x51; 32]), 2)).unwrap();
        let sealed = sign_single(signer.lock().clone(), &signer);
        assert_eq!(witness_lock(&sealed.witnesses()[0]).len(), SIGNATURE_SIZE);
        // 16 bytes of table header, 4 bytes of length, the signature
        assert_eq!(sealed.witnesses()[0].len(), 85);
    }
}
