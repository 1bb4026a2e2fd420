//! Cells, scripts and the references between them.
//!
//! These are plain owned values. They convert to and from the molecule
//! entities in `ckb_types::packed` for hashing and serialization, and to and
//! from the node's JSON shapes for RPC and config files.

use std::convert::TryFrom;
use std::fmt;

use ckb_hash::blake2b_256;
use ckb_jsonrpc_types as json_types;
use ckb_types::{bytes::Bytes, packed, prelude::*, H256};
use serde::{Deserialize, Serialize};

use crate::capacity::ONE_CKB;
use crate::error::{Error, Result};
use crate::hex::bytes_to_hex;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ScriptHashType {
    /// Code hash is the data hash of the code cell, run on VM version 0.
    Data,
    /// Code hash is the type script hash of the code cell.
    Type,
    Data1,
    Data2,
}

impl ScriptHashType {
    pub fn as_byte(self) -> u8 {
        match self {
            ScriptHashType::Data => 0,
            ScriptHashType::Type => 1,
            ScriptHashType::Data1 => 2,
            ScriptHashType::Data2 => 4,
        }
    }

    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ScriptHashType::Data),
            1 => Ok(ScriptHashType::Type),
            2 => Ok(ScriptHashType::Data1),
            4 => Ok(ScriptHashType::Data2),
            _ => Err(Error::Format(format!("invalid script hash type {}", value))),
        }
    }
}

impl fmt::Display for ScriptHashType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ScriptHashType::Data => "data",
            ScriptHashType::Type => "type",
            ScriptHashType::Data1 => "data1",
            ScriptHashType::Data2 => "data2",
        };
        f.write_str(name)
    }
}

// config files spell hash types the way the RPC does
impl Serialize for ScriptHashType {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ScriptHashType {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        match value.as_str() {
            "data" => Ok(ScriptHashType::Data),
            "type" => Ok(ScriptHashType::Type),
            "data1" => Ok(ScriptHashType::Data1),
            "data2" => Ok(ScriptHashType::Data2),
            other => Err(serde::de::Error::custom(format!(
                "unknown hash type {:?}",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "json_types::Script", into = "json_types::Script")]
pub struct Script {
    pub code_hash: H256,
    pub hash_type: ScriptHashType,
    pub args: Bytes,
}

impl Script {
    pub fn new(code_hash: H256, hash_type: ScriptHashType, args: Bytes) -> Self {
        Script {
            code_hash,
            hash_type,
            args,
        }
    }

    pub fn to_packed(&self) -> packed::Script {
        packed::Script::new_builder()
            .code_hash(self.code_hash.pack())
            .hash_type(packed::Byte::new(self.hash_type.as_byte()))
            .args(self.args.pack())
            .build()
    }

    /// blake2b-256 of the serialized script, the identity used by lock
    /// groups, validators and addresses.
    pub fn hash(&self) -> H256 {
        H256::from(blake2b_256(self.to_packed().as_slice()))
    }

    /// Bytes the script occupies inside a cell.
    pub fn occupied_bytes(&self) -> usize {
        32 + 1 + self.args.len()
    }
}

impl TryFrom<packed::Script> for Script {
    type Error = Error;

    fn try_from(script: packed::Script) -> Result<Self> {
        let hash_type: u8 = script.hash_type().into();
        Ok(Script {
            code_hash: script.code_hash().unpack(),
            hash_type: ScriptHashType::from_byte(hash_type)?,
            args: script.args().raw_data(),
        })
    }
}

impl TryFrom<json_types::Script> for Script {
    type Error = Error;

    fn try_from(script: json_types::Script) -> Result<Self> {
        Script::try_from(packed::Script::from(script))
    }
}

impl From<Script> for json_types::Script {
    fn from(script: Script) -> Self {
        script.to_packed().into()
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{{ code_hash: {:#x}, hash_type: {}, args: {} }}",
            self.code_hash,
            self.hash_type,
            bytes_to_hex(&self.args)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "json_types::OutPoint", into = "json_types::OutPoint")]
pub struct OutPoint {
    pub tx_hash: H256,
    pub index: u32,
}

impl OutPoint {
    pub fn new(tx_hash: H256, index: u32) -> Self {
        OutPoint { tx_hash, index }
    }

    pub fn to_packed(&self) -> packed::OutPoint {
        packed::OutPoint::new_builder()
            .tx_hash(self.tx_hash.pack())
            .index(self.index.pack())
            .build()
    }

    pub fn to_input(&self) -> packed::CellInput {
        packed::CellInput::new_builder()
            .previous_output(self.to_packed())
            .build()
    }
}

impl From<packed::OutPoint> for OutPoint {
    fn from(out_point: packed::OutPoint) -> Self {
        OutPoint {
            tx_hash: out_point.tx_hash().unpack(),
            index: out_point.index().unpack(),
        }
    }
}

impl From<json_types::OutPoint> for OutPoint {
    fn from(out_point: json_types::OutPoint) -> Self {
        packed::OutPoint::from(out_point).into()
    }
}

impl From<OutPoint> for json_types::OutPoint {
    fn from(out_point: OutPoint) -> Self {
        out_point.to_packed().into()
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}#{}", self.tx_hash, self.index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepType {
    Code,
    DepGroup,
}

impl DepType {
    pub fn as_byte(self) -> u8 {
        match self {
            DepType::Code => 0,
            DepType::DepGroup => 1,
        }
    }

    pub fn from_byte(value: u8) -> Result<Self> {
        match value {
            0 => Ok(DepType::Code),
            1 => Ok(DepType::DepGroup),
            _ => Err(Error::Format(format!("invalid dep type {}", value))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "json_types::CellDep", into = "json_types::CellDep")]
pub struct CellDep {
    pub out_point: OutPoint,
    pub dep_type: DepType,
}

impl CellDep {
    pub fn new(out_point: OutPoint, dep_type: DepType) -> Self {
        CellDep {
            out_point,
            dep_type,
        }
    }

    pub fn to_packed(&self) -> packed::CellDep {
        packed::CellDep::new_builder()
            .out_point(self.out_point.to_packed())
            .dep_type(packed::Byte::new(self.dep_type.as_byte()))
            .build()
    }
}

impl TryFrom<packed::CellDep> for CellDep {
    type Error = Error;

    fn try_from(cell_dep: packed::CellDep) -> Result<Self> {
        let dep_type: u8 = cell_dep.dep_type().into();
        Ok(CellDep {
            out_point: cell_dep.out_point().into(),
            dep_type: DepType::from_byte(dep_type)?,
        })
    }
}

impl TryFrom<json_types::CellDep> for CellDep {
    type Error = Error;

    fn try_from(cell_dep: json_types::CellDep) -> Result<Self> {
        CellDep::try_from(packed::CellDep::from(cell_dep))
    }
}

impl From<CellDep> for json_types::CellDep {
    fn from(cell_dep: CellDep) -> Self {
        cell_dep.to_packed().into()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "json_types::CellOutput", into = "json_types::CellOutput")]
pub struct CellOutput {
    /// Shannons.
    pub capacity: u64,
    pub lock: Script,
    pub type_script: Option<Script>,
}

impl CellOutput {
    pub fn new(capacity: u64, lock: Script) -> Self {
        CellOutput {
            capacity,
            lock,
            type_script: None,
        }
    }

    pub fn with_type(mut self, type_script: Option<Script>) -> Self {
        self.type_script = type_script;
        self
    }

    pub fn to_packed(&self) -> packed::CellOutput {
        packed::CellOutput::new_builder()
            .capacity(self.capacity.pack())
            .lock(self.lock.to_packed())
            .type_(self.type_script.as_ref().map(Script::to_packed).pack())
            .build()
    }
}

impl TryFrom<packed::CellOutput> for CellOutput {
    type Error = Error;

    fn try_from(output: packed::CellOutput) -> Result<Self> {
        let type_script = match output.type_().to_opt() {
            Some(script) => Some(Script::try_from(script)?),
            None => None,
        };
        Ok(CellOutput {
            capacity: output.capacity().unpack(),
            lock: Script::try_from(output.lock())?,
            type_script,
        })
    }
}

impl TryFrom<json_types::CellOutput> for CellOutput {
    type Error = Error;

    fn try_from(output: json_types::CellOutput) -> Result<Self> {
        CellOutput::try_from(packed::CellOutput::from(output))
    }
}

impl From<CellOutput> for json_types::CellOutput {
    fn from(output: CellOutput) -> Self {
        output.to_packed().into()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Cell {
    pub output: CellOutput,
    pub data: Bytes,
}

impl Cell {
    pub fn new(output: CellOutput, data: Bytes) -> Self {
        Cell { output, data }
    }

    /// A cell holding only capacity under `lock`.
    pub fn with_capacity(capacity: u64, lock: Script) -> Self {
        Cell::new(CellOutput::new(capacity, lock), Bytes::new())
    }

    pub fn capacity(&self) -> u64 {
        self.output.capacity
    }

    pub fn lock(&self) -> &Script {
        &self.output.lock
    }

    pub fn type_script(&self) -> Option<&Script> {
        self.output.type_script.as_ref()
    }

    pub fn data_hash(&self) -> H256 {
        H256::from(blake2b_256(&self.data))
    }

    /// Bytes the cell occupies on chain: the capacity field, lock, type and data.
    pub fn occupied_bytes(&self) -> usize {
        8 + self.output.lock.occupied_bytes()
            + self.type_script().map(Script::occupied_bytes).unwrap_or(0)
            + self.data.len()
    }

    /// Minimal capacity in shannons this cell must hold.
    pub fn occupied_capacity(&self) -> Result<u64> {
        (self.occupied_bytes() as u64)
            .checked_mul(ONE_CKB)
            .ok_or_else(|| Error::CapacityOverflow(format!("{} bytes", self.occupied_bytes())))
    }

    /// Cells without a type script and without data are plain capacity.
    pub fn is_plain_capacity(&self) -> bool {
        self.type_script().is_none() && self.data.is_empty()
    }
}

/// A cell that is currently live on chain, addressed by its out point.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LiveCell {
    pub out_point: OutPoint,
    pub cell: Cell,
    pub block_number: Option<u64>,
}

impl LiveCell {
    pub fn new(out_point: OutPoint, cell: Cell) -> Self {
        LiveCell {
            out_point,
            cell,
            block_number: None,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.cell.capacity()
    }

    pub fn lock(&self) -> &Script {
        self.cell.lock()
    }
}
