//! The transaction skeleton: an owned draft that only grows until it is
//! sealed with the final signatures.

use std::collections::HashSet;

use ckb_jsonrpc_types as json_types;
use ckb_types::{
    bytes::Bytes,
    core::{TransactionBuilder, TransactionView},
    packed::{self, WitnessArgs},
    prelude::*,
    H256,
};
use log::debug;

use crate::capacity::{to_u64, HumanCapacity, ONE_CKB};
use crate::error::{Error, Result};
use crate::locks::LockRegistry;
use crate::model::{Cell, CellDep, LiveCell, Script};
use crate::signer::{signing_entries, SigningEntry};

/// Fee above which sealing refuses the transaction: one CKByte.
pub const DEFAULT_FEE_CEILING: u64 = ONE_CKB;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkeletonState {
    Empty,
    Building,
    Sealed,
}

/// Read access shared by drafts and sealed transactions.
pub trait TransactionLike {
    fn cell_deps(&self) -> &[CellDep];
    fn header_deps(&self) -> &[H256];
    fn inputs(&self) -> &[LiveCell];
    fn outputs(&self) -> &[Cell];
    fn witnesses(&self) -> &[Bytes];

    fn inputs_capacity(&self) -> u128 {
        self.inputs()
            .iter()
            .map(|input| u128::from(input.capacity()))
            .sum()
    }

    fn outputs_capacity(&self) -> u128 {
        self.outputs()
            .iter()
            .map(|output| u128::from(output.capacity()))
            .sum()
    }

    /// Inputs minus outputs. Negative while the draft is underfunded.
    fn fee(&self) -> i128 {
        self.inputs_capacity() as i128 - self.outputs_capacity() as i128
    }
}

/// A `WitnessArgs` carrying `lock` and nothing else.
pub fn witness_with_lock(lock: Bytes) -> Bytes {
    WitnessArgs::new_builder()
        .lock(Some(lock).pack())
        .build()
        .as_bytes()
}

/// Replace the lock field of a serialized `WitnessArgs`, keeping its
/// `input_type` and `output_type`. An empty witness counts as default.
fn replace_witness_lock(witness: &Bytes, lock: Bytes) -> Result<Bytes> {
    let witness_args = if witness.is_empty() {
        WitnessArgs::default()
    } else {
        WitnessArgs::from_slice(witness)
            .map_err(|err| Error::Format(format!("witness is not WitnessArgs: {}", err)))?
    };
    Ok(witness_args
        .as_builder()
        .lock(Some(lock).pack())
        .build()
        .as_bytes())
}

/// Length of the lock field of a witness, `None` when empty or unset.
fn witness_lock_len(witness: &Bytes) -> Result<Option<usize>> {
    if witness.is_empty() {
        return Ok(None);
    }
    let witness_args = WitnessArgs::from_slice(witness)
        .map_err(|err| Error::Format(format!("witness is not WitnessArgs: {}", err)))?;
    Ok(witness_args.lock().to_opt().map(|lock| lock.raw_data().len()))
}

fn build_view(
    cell_deps: &[CellDep],
    header_deps: &[H256],
    inputs: &[LiveCell],
    outputs: &[Cell],
    witnesses: &[Bytes],
) -> TransactionView {
    TransactionBuilder::default()
        .cell_deps(cell_deps.iter().map(CellDep::to_packed))
        .header_deps(header_deps.iter().map(|hash| hash.pack()))
        .inputs(inputs.iter().map(|input| input.out_point.to_input()))
        .outputs(outputs.iter().map(|output| output.output.to_packed()))
        .outputs_data(outputs.iter().map(|output| output.data.pack()))
        .witnesses(witnesses.iter().map(|witness| witness.pack()))
        .build()
}

#[derive(Clone, Debug)]
pub struct TransactionSkeleton {
    cell_deps: Vec<CellDep>,
    header_deps: Vec<H256>,
    inputs: Vec<LiveCell>,
    outputs: Vec<Cell>,
    witnesses: Vec<Bytes>,
    signing_entries: Vec<SigningEntry>,
    fee_ceiling: u64,
    sealed: bool,
}

impl Default for TransactionSkeleton {
    fn default() -> Self {
        TransactionSkeleton {
            cell_deps: Vec::new(),
            header_deps: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            witnesses: Vec::new(),
            signing_entries: Vec::new(),
            fee_ceiling: DEFAULT_FEE_CEILING,
            sealed: false,
        }
    }
}

impl TransactionSkeleton {
    pub fn new() -> Self {
        TransactionSkeleton::default()
    }

    pub fn with_fee_ceiling(mut self, fee_ceiling: u64) -> Self {
        self.fee_ceiling = fee_ceiling;
        self
    }

    pub fn fee_ceiling(&self) -> u64 {
        self.fee_ceiling
    }

    pub fn state(&self) -> SkeletonState {
        if self.sealed {
            SkeletonState::Sealed
        } else if self.cell_deps.is_empty()
            && self.header_deps.is_empty()
            && self.inputs.is_empty()
            && self.outputs.is_empty()
            && self.witnesses.is_empty()
        {
            SkeletonState::Empty
        } else {
            SkeletonState::Building
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.sealed {
            Err(Error::AlreadySealed)
        } else {
            Ok(())
        }
    }

    /// Every change to the draft moves the messages to sign, so prepared
    /// entries are dropped.
    fn edit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if !self.signing_entries.is_empty() {
            debug!(
                "draft changed, dropping {} signing entries",
                self.signing_entries.len()
            );
            self.signing_entries.clear();
        }
        Ok(())
    }

    pub fn signing_entries(&self) -> &[SigningEntry] {
        &self.signing_entries
    }

    /// Append the deps a lock program needs. Deps already present are
    /// skipped, so repeating the call changes nothing.
    pub fn add_cell_deps<I>(&mut self, deps: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = CellDep>,
    {
        self.edit()?;
        for dep in deps {
            if !self.cell_deps.contains(&dep) {
                debug!("add cell dep {}", dep.out_point);
                self.cell_deps.push(dep);
            }
        }
        Ok(self)
    }

    pub fn push_cell_dep(&mut self, dep: CellDep) -> Result<&mut Self> {
        self.edit()?;
        self.cell_deps.push(dep);
        Ok(self)
    }

    pub fn push_header_dep(&mut self, block_hash: H256) -> Result<&mut Self> {
        self.edit()?;
        self.header_deps.push(block_hash);
        Ok(self)
    }

    pub fn push_input(&mut self, input: LiveCell) -> Result<&mut Self> {
        self.edit()?;
        debug!(
            "add input {} ({})",
            input.out_point,
            HumanCapacity(input.capacity())
        );
        self.inputs.push(input);
        Ok(self)
    }

    pub fn push_inputs<I>(&mut self, inputs: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = LiveCell>,
    {
        for input in inputs {
            self.push_input(input)?;
        }
        Ok(self)
    }

    pub fn push_output(&mut self, output: Cell) -> Result<&mut Self> {
        self.edit()?;
        debug!("add output ({})", HumanCapacity(output.capacity()));
        self.outputs.push(output);
        Ok(self)
    }

    pub fn push_outputs<I>(&mut self, outputs: I) -> Result<&mut Self>
    where
        I: IntoIterator<Item = Cell>,
    {
        for output in outputs {
            self.push_output(output)?;
        }
        Ok(self)
    }

    pub fn push_witness(&mut self, witness: Bytes) -> Result<&mut Self> {
        self.edit()?;
        self.witnesses.push(witness);
        Ok(self)
    }

    /// Put `witness` at `index`, padding with empty witnesses up to it.
    pub fn set_witness(&mut self, index: usize, witness: Bytes) -> Result<&mut Self> {
        self.edit()?;
        if self.witnesses.len() <= index {
            self.witnesses.resize(index + 1, Bytes::new());
        }
        self.witnesses[index] = witness;
        Ok(self)
    }

    /// First input index of every distinct lock, in order of appearance.
    pub fn lock_groups(&self) -> Vec<(usize, &Script)> {
        let mut seen = HashSet::new();
        self.inputs
            .iter()
            .enumerate()
            .filter(|(_, input)| seen.insert(input.lock()))
            .map(|(i, input)| (i, input.lock()))
            .collect()
    }

    /// Make sure every input has a witness slot and every lock group's
    /// first slot holds the placeholder `registry` reports for its lock.
    /// Slots that already carry data are left alone.
    pub fn add_witness_placeholders(&mut self, registry: &LockRegistry) -> Result<&mut Self> {
        self.edit()?;
        if self.witnesses.len() < self.inputs.len() {
            self.witnesses.resize(self.inputs.len(), Bytes::new());
        }
        let placeholders: Vec<(usize, Bytes)> = self
            .lock_groups()
            .into_iter()
            .filter_map(|(i, lock)| registry.placeholder(lock).map(|p| (i, p.clone())))
            .collect();
        for (i, placeholder) in placeholders {
            if self.witnesses[i].is_empty() {
                debug!("add {}-byte witness placeholder at {}", placeholder.len(), i);
                self.witnesses[i] = witness_with_lock(placeholder);
            }
        }
        Ok(self)
    }

    /// Make the witness at `index` a `WitnessArgs` whose lock is
    /// `placeholder`, unless it already carries a lock of that length.
    /// Type fields already in the witness are kept.
    pub fn reserve_signature(&mut self, index: usize, placeholder: Bytes) -> Result<&mut Self> {
        self.edit()?;
        let slots = self.inputs.len().max(index + 1);
        if self.witnesses.len() < slots {
            self.witnesses.resize(slots, Bytes::new());
        }
        let witness = &self.witnesses[index];
        if witness_lock_len(witness)? != Some(placeholder.len()) {
            debug!("reserve {}-byte signature at {}", placeholder.len(), index);
            self.witnesses[index] = replace_witness_lock(witness, placeholder)?;
        }
        Ok(self)
    }

    /// Append a change output of `remainder` shannons locked by
    /// `change_lock`.
    pub fn compute_change(&mut self, remainder: i128, change_lock: Script) -> Result<u64> {
        self.edit()?;
        if remainder < 0 {
            return Err(Error::InsufficientCapacity {
                shortfall: remainder.unsigned_abs(),
            });
        }
        let change = to_u64(remainder as u128)?;
        self.push_output(Cell::with_capacity(change, change_lock))?;
        Ok(change)
    }

    /// Append the change left after paying `fee`.
    pub fn complete_change(&mut self, fee: u64, change_lock: Script) -> Result<u64> {
        let remainder = self.fee() - i128::from(fee);
        self.compute_change(remainder, change_lock)
    }

    pub fn to_transaction_view(&self) -> TransactionView {
        build_view(
            &self.cell_deps,
            &self.header_deps,
            &self.inputs,
            &self.outputs,
            &self.witnesses,
        )
    }

    /// Hash of the raw transaction, which witnesses do not affect.
    pub fn tx_hash(&self) -> H256 {
        self.to_transaction_view().hash().unpack()
    }

    pub fn prepare_signing_entries(&mut self) -> Result<&[SigningEntry]> {
        self.prepare_signing_entries_for(|_| true)
    }

    /// Compute signing entries for the lock groups `select` accepts.
    pub fn prepare_signing_entries_for<F>(&mut self, select: F) -> Result<&[SigningEntry]>
    where
        F: FnMut(&Script) -> bool,
    {
        self.ensure_open()?;
        let tx_hash = self.tx_hash();
        self.signing_entries = signing_entries(&tx_hash, &self.inputs, &self.witnesses, select)?;
        debug!(
            "prepared {} signing entries for tx {:#x}",
            self.signing_entries.len(),
            tx_hash
        );
        Ok(&self.signing_entries)
    }

    /// Write one signature per signing entry into the witness locks, check
    /// the balance and freeze the skeleton.
    pub fn seal(&mut self, signatures: Vec<Bytes>) -> Result<SealedTransaction> {
        self.ensure_open()?;
        if signatures.len() != self.signing_entries.len() {
            return Err(Error::SignatureCount {
                expected: self.signing_entries.len(),
                actual: signatures.len(),
            });
        }
        let fee = self.fee();
        if fee < 0 {
            return Err(Error::InsufficientCapacity {
                shortfall: fee.unsigned_abs(),
            });
        }
        if fee > i128::from(self.fee_ceiling) {
            return Err(Error::validation(
                "fee",
                format!(
                    "{} exceeds the ceiling of {}",
                    HumanCapacity(to_u64(fee as u128)?),
                    HumanCapacity(self.fee_ceiling)
                ),
            ));
        }
        let mut witnesses = self.witnesses.clone();
        for (entry, signature) in self.signing_entries.iter().zip(signatures) {
            let witness = witnesses
                .get_mut(entry.index)
                .ok_or(Error::MissingWitness(entry.index))?;
            // the message was computed over this slot, a resize breaks it
            let reserved = witness_lock_len(witness)?;
            if reserved != Some(signature.len()) {
                return Err(Error::Signing(format!(
                    "input {} reserves {} witness lock bytes for a {}-byte signature",
                    entry.index,
                    reserved.unwrap_or(0),
                    signature.len()
                )));
            }
            *witness = replace_witness_lock(witness, signature)?;
        }
        let view = build_view(
            &self.cell_deps,
            &self.header_deps,
            &self.inputs,
            &self.outputs,
            &witnesses,
        );
        self.witnesses = witnesses.clone();
        self.sealed = true;
        Ok(SealedTransaction {
            hash: view.hash().unpack(),
            cell_deps: self.cell_deps.clone(),
            header_deps: self.header_deps.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            witnesses,
            fee: fee as u64,
            view,
        })
    }
}

impl TransactionLike for TransactionSkeleton {
    fn cell_deps(&self) -> &[CellDep] {
        &self.cell_deps
    }
    fn header_deps(&self) -> &[H256] {
        &self.header_deps
    }
    fn inputs(&self) -> &[LiveCell] {
        &self.inputs
    }
    fn outputs(&self) -> &[Cell] {
        &self.outputs
    }
    fn witnesses(&self) -> &[Bytes] {
        &self.witnesses
    }
}

/// A signed transaction, ready to submit.
#[derive(Clone, Debug)]
pub struct SealedTransaction {
    hash: H256,
    cell_deps: Vec<CellDep>,
    header_deps: Vec<H256>,
    inputs: Vec<LiveCell>,
    outputs: Vec<Cell>,
    witnesses: Vec<Bytes>,
    fee: u64,
    view: TransactionView,
}

impl SealedTransaction {
    pub fn hash(&self) -> &H256 {
        &self.hash
    }

    pub fn sealed_fee(&self) -> u64 {
        self.fee
    }

    pub fn view(&self) -> &TransactionView {
        &self.view
    }

    pub fn to_packed(&self) -> packed::Transaction {
        self.view.data()
    }

    /// The node's `send_transaction` payload.
    pub fn to_json(&self) -> json_types::Transaction {
        self.view.data().into()
    }
}

impl TransactionLike for SealedTransaction {
    fn cell_deps(&self) -> &[CellDep] {
        &self.cell_deps
    }
    fn header_deps(&self) -> &[H256] {
        &self.header_deps
    }
    fn inputs(&self) -> &[LiveCell] {
        &self.inputs
    }
    fn outputs(&self) -> &[Cell] {
        &self.outputs
    }
    fn witnesses(&self) -> &[Bytes] {
        &self.witnesses
    }
}
