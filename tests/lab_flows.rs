use ckb_crypto::secp::Signature;
use ckb_lab::address::Address;
use ckb_lab::capacity::ONE_CKB;
use ckb_lab::collector::{Collector, MemoryCellProvider};
use ckb_lab::hex::{bytes_to_hex, hex_to_bytes};
use ckb_lab::lab::{base_shape, finalize, TxPlanner};
use ckb_lab::locks::{blake160, LockRegistry, MultisigConfig, SIGHASH_TYPE_HASH, SIGNATURE_SIZE};
use ckb_lab::model::{LiveCell, OutPoint, Script, ScriptHashType};
use ckb_lab::signer::{secp256k1_pubkey, signing_entries, MultisigSigner, Secp256k1Signer};
use ckb_lab::skeleton::{witness_with_lock, TransactionLike, TransactionSkeleton};
use ckb_lab::validator::Rule;
use ckb_lab::Config;
use ckb_types::{bytes::Bytes, h256, packed::WitnessArgs, prelude::*, H256};

const KEY_A: &str = "0x67842f5e4fa0edb34c9b4adbe8c3c1f3c737941f7c875d18bc6ec2f80554111d";
const KEY_B: &str = "0xd00c06bfd800d27397002dca6fb0993d5ba6399b4238b2f29ee9deb97593d2bc";

const ADDRESS_A: &str = "ckt1qzda0cr08m85hc8jlnfp3zer7xulejywt49kt2rr0vthywaa50xwsqvc32wruaxqnk4hdj8yr4yp5u056dkhwtc94sy8q";
const ADDRESS_C: &str = "ckt1qyqywrwdchjyqeysjegpzw38fvandtktdhrs0zaxl4";

fn registry(config: &Config) -> LockRegistry {
    let mut registry = LockRegistry::new();
    registry.register_code(
        config.sighash.code_hash.clone(),
        config.sighash.hash_type,
        SIGNATURE_SIZE,
    );
    registry
}

fn witness_lock(witness: &Bytes) -> Bytes {
    WitnessArgs::from_slice(witness)
        .unwrap()
        .lock()
        .to_opt()
        .unwrap()
        .unpack()
}

fn pubkey_hash(key: &str) -> [u8; 20] {
    blake160(&secp256k1_pubkey(&hex_to_bytes(key).unwrap()).unwrap())
}

#[test]
fn transfer_with_change_is_signed_and_balanced() {
    let config = Config::default();
    let signer = Secp256k1Signer::new(&hex_to_bytes(KEY_A).unwrap(), &config.sighash).unwrap();
    let from = signer.lock().clone();
    assert_eq!(from, ADDRESS_A.parse::<Address>().unwrap().lock_script());
    let to = ADDRESS_C.parse::<Address>().unwrap().lock_script();

    let mut provider = MemoryCellProvider::new();
    provider.create_capacity_cell(1000 * ONE_CKB, from.clone());
    let collector = Collector::new();
    let planner = TxPlanner::new(&provider, &collector, &config);
    let skeleton = planner
        .plan_transfer(&from, to.clone(), 500 * ONE_CKB)
        .unwrap();

    let shape = base_shape(&config)
        .unwrap()
        .input_count(1)
        .output_count(2)
        .output_capacity(0, 500 * ONE_CKB)
        .output_lock_hash(
            0,
            h256!("0xc219351b150b900e50a7039f1e448b844110927e5fd9bd30425806cb8ddff1fd"),
        )
        .output_lock_hash(
            1,
            h256!("0x6ee8b1ea3db94183c5e5a47fbe82110101f6f8d3e18d1ecd4d6a5425e648da69"),
        )
        .exact_fee(100_000);
    let sealed = finalize(skeleton, &registry(&config), &[&signer], &shape).unwrap();

    assert_eq!(sealed.outputs()[1].capacity(), 49_999_900_000);
    assert_eq!(
        sealed.outputs_capacity() + u128::from(sealed.sealed_fee()),
        sealed.inputs_capacity()
    );
    let view_hash: H256 = sealed.view().hash().unpack();
    assert_eq!(&view_hash, sealed.hash());

    // the signature covers the transaction with a zeroed placeholder
    let placeholder = witness_with_lock(Bytes::from(vec![0u8; SIGNATURE_SIZE]));
    let entries = signing_entries(sealed.hash(), sealed.inputs(), &[placeholder], |_| true).unwrap();
    assert_eq!(entries.len(), 1);
    let signature = witness_lock(&sealed.witnesses()[0]);
    let recovered = Signature::from_slice(&signature)
        .unwrap()
        .recover(&entries[0].message)
        .unwrap();
    assert_eq!(
        recovered.serialize(),
        secp256k1_pubkey(&hex_to_bytes(KEY_A).unwrap()).unwrap()
    );

    let json = serde_json::to_value(sealed.to_json()).unwrap();
    assert_eq!(json["outputs"][0]["capacity"], "0xba43b7400");
    assert_eq!(json["witnesses"].as_array().unwrap().len(), 1);
}

#[test]
fn multisig_cell_round_trip() {
    let config = Config::default();
    let key_a = hex_to_bytes(KEY_A).unwrap();
    let key_b = hex_to_bytes(KEY_B).unwrap();
    let signer_a = Secp256k1Signer::new(&key_a, &config.sighash).unwrap();
    let from = signer_a.lock().clone();

    let multisig = MultisigConfig::new(
        0,
        2,
        vec![
            pubkey_hash(KEY_A),
            pubkey_hash(KEY_B),
            hex_to_bytes("0x470dcdc5e44064909650113a274b3b36aecb6dc7")
                .unwrap()
                .as_slice()
                .try_into()
                .unwrap(),
        ],
    )
    .unwrap();
    let multisig_lock = multisig.lock(&config.multisig);
    assert_eq!(
        bytes_to_hex(&multisig_lock.args),
        "0x882b0eb01c7b856e274f928f7348f16a28d6c0c2"
    );
    let multisig_lock_hash =
        h256!("0xeb54f17c063cc0dac13daaebc95197562791ad5a91f36907b03d6eccba6c3cc7");
    assert_eq!(multisig_lock.hash(), multisig_lock_hash);

    let mut provider = MemoryCellProvider::new();
    provider.create_capacity_cell(1000 * ONE_CKB, from.clone());
    let collector = Collector::new();
    let create = {
        let planner = TxPlanner::new(&provider, &collector, &config);
        planner
            .plan_transfer(&from, multisig_lock.clone(), 61 * ONE_CKB)
            .unwrap()
    };
    let lab_shape = base_shape(&config)
        .unwrap()
        .min_input_count(1)
        .output_count(2)
        .output_capacity(0, 61 * ONE_CKB)
        .output_lock_hash(0, multisig_lock_hash)
        .output_lock_hash(1, from.hash())
        .rule(Rule::Balanced)
        .max_fee(ONE_CKB)
        .exact_fee(100_000);
    let created = finalize(create, &registry(&config), &[&signer_a], &lab_shape).unwrap();

    let spent: Vec<OutPoint> = created
        .inputs()
        .iter()
        .map(|input| input.out_point.clone())
        .collect();
    provider.consume(&spent);
    for (i, output) in created.outputs().iter().enumerate() {
        provider.insert(LiveCell::new(
            OutPoint::new(created.hash().clone(), i as u32),
            output.clone(),
        ));
    }

    // spend the multisig cell, topped up by A so the change stays above 61 CKB
    let mut spend = TransactionSkeleton::new();
    spend
        .push_input(LiveCell::new(
            OutPoint::new(created.hash().clone(), 0),
            created.outputs()[0].clone(),
        ))
        .unwrap()
        .add_cell_deps(vec![config.multisig.cell_dep.clone()])
        .unwrap();
    {
        let planner = TxPlanner::new(&provider, &collector, &config);
        planner.fund(&mut spend, &from).unwrap();
    }
    assert_eq!(spend.inputs().len(), 2);
    assert_eq!(spend.lock_groups().len(), 2);

    let multisig_signer = MultisigSigner::new(
        multisig.clone(),
        &config.multisig,
        &[key_b, key_a.clone()],
    )
    .unwrap();
    let mut registry = registry(&config);
    registry.register_multisig(&multisig, &config.multisig);
    let shape = base_shape(&config).unwrap().exact_fee(100_000);
    let sealed = finalize(spend, &registry, &[&multisig_signer, &signer_a], &shape).unwrap();

    let multisig_witness = witness_lock(&sealed.witnesses()[0]);
    assert_eq!(multisig_witness.len(), 4 + 20 * 3 + 65 * 2);
    assert_eq!(&multisig_witness[..64], &multisig.to_bytes()[..]);
    assert_eq!(witness_lock(&sealed.witnesses()[1]).len(), SIGNATURE_SIZE);
    assert_eq!(sealed.outputs().len(), 1);
    assert_eq!(
        u128::from(sealed.outputs()[0].capacity()),
        sealed.inputs_capacity() - 100_000
    );
}

#[test]
fn custom_lock_scripts_hash_as_expected() {
    let lock = Script::new(
        SIGHASH_TYPE_HASH,
        ScriptHashType::Type,
        Bytes::from(hex_to_bytes("0x988a9c3e74c09dab76c8e41d481a71f4d36d772f").unwrap()),
    );
    assert_eq!(
        lock.hash(),
        h256!("0x6ee8b1ea3db94183c5e5a47fbe82110101f6f8d3e18d1ecd4d6a5425e648da69")
    );
    let args = bytes_to_hex(&ckb_lab::locks::hash_lock_args(b"Open Sesame"));
    assert!(args.starts_with("0x5552dfb0"));
    assert!(args.ends_with("cc83"));
}
