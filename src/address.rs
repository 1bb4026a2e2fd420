//! CKB addresses: a bech32 encoding of a lock script.

use std::fmt;
use std::str::FromStr;

use bech32::{FromBase32, ToBase32, Variant};
use ckb_types::{bytes::Bytes, H256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::locks::{MULTISIG_TYPE_HASH, SIGHASH_TYPE_HASH};
use crate::model::{Script, ScriptHashType};

#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn to_prefix(self) -> &'static str {
        match self {
            Network::Mainnet => "ckb",
            Network::Testnet => "ckt",
        }
    }

    pub fn from_prefix(value: &str) -> Option<Network> {
        match value {
            "ckb" => Some(Network::Mainnet),
            "ckt" => Some(Network::Testnet),
            _ => None,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        })
    }
}

#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy)]
#[repr(u8)]
pub enum AddressType {
    Full = 0x00,
    Short = 0x01,
    /// Deprecated full format with a data hash type.
    FullData = 0x02,
    /// Deprecated full format with a type hash type.
    FullType = 0x04,
}

impl AddressType {
    pub fn from_u8(value: u8) -> Result<AddressType> {
        match value {
            0x00 => Ok(AddressType::Full),
            0x01 => Ok(AddressType::Short),
            0x02 => Ok(AddressType::FullData),
            0x04 => Ok(AddressType::FullType),
            _ => Err(Error::Address(format!(
                "invalid address type value: {}",
                value
            ))),
        }
    }
}

#[derive(Hash, Eq, PartialEq, Debug, Clone, Copy)]
#[repr(u8)]
pub enum CodeHashIndex {
    // SECP256K1 + blake160
    Sighash = 0x00,
    // SECP256K1 + multisig
    Multisig = 0x01,
}

impl CodeHashIndex {
    pub fn from_u8(value: u8) -> Result<CodeHashIndex> {
        match value {
            0x00 => Ok(CodeHashIndex::Sighash),
            0x01 => Ok(CodeHashIndex::Multisig),
            _ => Err(Error::Address(format!(
                "invalid code hash index value: {}",
                value
            ))),
        }
    }

    fn code_hash(self) -> H256 {
        match self {
            CodeHashIndex::Sighash => SIGHASH_TYPE_HASH,
            CodeHashIndex::Multisig => MULTISIG_TYPE_HASH,
        }
    }
}

#[derive(Hash, Eq, PartialEq, Debug, Clone)]
pub enum AddressPayload {
    Short { index: CodeHashIndex, hash: [u8; 20] },
    Full(Script),
}

impl AddressPayload {
    pub fn ty(&self) -> AddressType {
        match self {
            AddressPayload::Short { .. } => AddressType::Short,
            AddressPayload::Full(_) => AddressType::Full,
        }
    }

    pub fn to_script(&self) -> Script {
        match self {
            AddressPayload::Short { index, hash } => Script::new(
                index.code_hash(),
                ScriptHashType::Type,
                Bytes::from(hash.to_vec()),
            ),
            AddressPayload::Full(script) => script.clone(),
        }
    }

    /// Short payload for the default sighash and multisig locks, full
    /// payload for everything else.
    pub fn short_or_full(script: &Script) -> AddressPayload {
        let index = match (script.hash_type, &script.code_hash) {
            (ScriptHashType::Type, hash) if *hash == SIGHASH_TYPE_HASH => {
                Some(CodeHashIndex::Sighash)
            }
            (ScriptHashType::Type, hash) if *hash == MULTISIG_TYPE_HASH => {
                Some(CodeHashIndex::Multisig)
            }
            _ => None,
        };
        match index {
            Some(index) if script.args.len() == 20 => {
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&script.args);
                AddressPayload::Short { index, hash }
            }
            _ => AddressPayload::Full(script.clone()),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut data = vec![self.ty() as u8];
        match self {
            AddressPayload::Short { index, hash } => {
                data.push(*index as u8);
                data.extend_from_slice(hash);
            }
            AddressPayload::Full(script) => {
                data.extend_from_slice(script.code_hash.as_bytes());
                data.push(script.hash_type.as_byte());
                data.extend_from_slice(&script.args);
            }
        }
        data
    }

    fn from_bytes(data: &[u8], variant: Variant) -> Result<AddressPayload> {
        let (ty, body) = data
            .split_first()
            .ok_or_else(|| Error::Address("empty payload".to_string()))?;
        let ty = AddressType::from_u8(*ty)?;
        let expected_variant = if ty == AddressType::Full {
            Variant::Bech32m
        } else {
            Variant::Bech32
        };
        if variant != expected_variant {
            return Err(Error::Address(format!(
                "{:?} address must be encoded with {:?}",
                ty, expected_variant
            )));
        }
        let code_hash = |body: &[u8]| {
            if body.len() < 32 {
                return Err(Error::Address(format!(
                    "insufficient data length: {}",
                    body.len()
                )));
            }
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&body[..32]);
            Ok(H256(hash))
        };
        match ty {
            AddressType::Short => {
                if body.len() != 21 {
                    return Err(Error::Address(format!(
                        "invalid short payload length {}",
                        body.len()
                    )));
                }
                let index = CodeHashIndex::from_u8(body[0])?;
                let mut hash = [0u8; 20];
                hash.copy_from_slice(&body[1..]);
                Ok(AddressPayload::Short { index, hash })
            }
            AddressType::Full => {
                let code_hash = code_hash(body)?;
                let hash_type = body
                    .get(32)
                    .ok_or_else(|| Error::Address("missing hash type".to_string()))?;
                let hash_type = ScriptHashType::from_byte(*hash_type)
                    .map_err(|err| Error::Address(err.to_string()))?;
                let args = Bytes::from(body[33..].to_vec());
                Ok(AddressPayload::Full(Script::new(code_hash, hash_type, args)))
            }
            AddressType::FullData | AddressType::FullType => {
                let hash_type = if ty == AddressType::FullData {
                    ScriptHashType::Data
                } else {
                    ScriptHashType::Type
                };
                let args = Bytes::from(body[32..].to_vec());
                Ok(AddressPayload::Full(Script::new(
                    code_hash(body)?,
                    hash_type,
                    args,
                )))
            }
        }
    }
}

#[derive(Hash, Eq, PartialEq, Debug, Clone)]
pub struct Address {
    network: Network,
    payload: AddressPayload,
}

impl Address {
    pub fn new(network: Network, payload: AddressPayload) -> Address {
        Address { network, payload }
    }

    /// Full-format address of `script`.
    pub fn from_script(script: &Script, network: Network) -> Address {
        Address::new(network, AddressPayload::Full(script.clone()))
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn payload(&self) -> &AddressPayload {
        &self.payload
    }

    pub fn lock_script(&self) -> Script {
        self.payload.to_script()
    }

    pub fn display_with_network(&self, network: Network) -> Result<String> {
        let variant = if self.payload.ty() == AddressType::Full {
            Variant::Bech32m
        } else {
            Variant::Bech32
        };
        bech32::encode(
            network.to_prefix(),
            self.payload.to_bytes().to_base32(),
            variant,
        )
        .map_err(|err| Error::Address(format!("encode failed: {}", err)))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let value = self.display_with_network(self.network).map_err(|_| fmt::Error)?;
        f.write_str(&value)
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        let (hrp, data, variant) =
            bech32::decode(input).map_err(|err| Error::Address(err.to_string()))?;
        let network = Network::from_prefix(&hrp)
            .ok_or_else(|| Error::Address(format!("invalid hrp: {}", hrp)))?;
        let data = Vec::<u8>::from_base32(&data).map_err(|err| Error::Address(err.to_string()))?;
        let payload = AddressPayload::from_bytes(&data, variant)?;
        Ok(Address { network, payload })
    }
}
