//! The end-to-end flows: fund, deploy, lock and unlock cells, typed
//! cells, transfer.
//!
//! `TxPlanner` drafts transactions against any `CellProvider`, `Lab` runs
//! them against a node.

use ckb_types::{bytes::Bytes, H256};
use log::{debug, info};

use crate::collector::{CellProvider, CellQuery, Collector, DataFilter, TypeFilter};
use crate::config::Config;
use crate::describe::{describe_transaction, DescribeOptions};
use crate::error::{Error, Result};
use crate::hex::u64_from_le_bytes;
use crate::locks::{type_id_script, LockRegistry, ScriptInfo, SIGNATURE_SIZE};
use crate::model::{
    Cell, CellDep, CellOutput, DepType, LiveCell, OutPoint, Script, ScriptHashType,
};
use crate::rpc::{IndexerCellProvider, RpcClient};
use crate::signer::{sign_transaction, Signer};
use crate::skeleton::{SealedTransaction, TransactionLike, TransactionSkeleton};
use crate::validator::{validate, ExpectedShape};

/// A code cell created by `deploy_code`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployedCode {
    pub out_point: OutPoint,
    pub data_hash: H256,
    pub type_id: Option<Script>,
}

impl DeployedCode {
    pub fn cell_dep(&self) -> CellDep {
        CellDep::new(self.out_point.clone(), DepType::Code)
    }

    /// Reference the code by type id when it has one, by data hash
    /// otherwise.
    pub fn script_info(&self) -> ScriptInfo {
        let (code_hash, hash_type) = match &self.type_id {
            Some(type_id) => (type_id.hash(), ScriptHashType::Type),
            None => (self.data_hash.clone(), ScriptHashType::Data),
        };
        ScriptInfo {
            code_hash,
            hash_type,
            cell_dep: self.cell_dep(),
        }
    }
}

/// A drafted deployment; the out point is known once the transaction is
/// sealed.
pub struct DeployPlan {
    pub skeleton: TransactionSkeleton,
    pub output_index: u32,
    pub data_hash: H256,
    pub type_id: Option<Script>,
}

impl DeployPlan {
    pub fn deployed(&self, tx_hash: H256) -> DeployedCode {
        DeployedCode {
            out_point: OutPoint::new(tx_hash, self.output_index),
            data_hash: self.data_hash.clone(),
            type_id: self.type_id.clone(),
        }
    }
}

/// Drafts lab transactions from whatever live cells `provider` reports.
pub struct TxPlanner<'a, P: CellProvider + ?Sized> {
    provider: &'a P,
    collector: &'a Collector,
    config: &'a Config,
}

impl<'a, P: CellProvider + ?Sized> TxPlanner<'a, P> {
    pub fn new(provider: &'a P, collector: &'a Collector, config: &'a Config) -> Self {
        TxPlanner {
            provider,
            collector,
            config,
        }
    }

    fn new_skeleton(&self) -> Result<TransactionSkeleton> {
        Ok(TransactionSkeleton::new().with_fee_ceiling(self.config.fee_ceiling()?))
    }

    fn payer_deps(&self, payer: &Script) -> Vec<CellDep> {
        [&self.config.sighash, &self.config.multisig]
            .iter()
            .filter(|info| info.matches(payer))
            .map(|info| info.cell_dep.clone())
            .collect()
    }

    /// Add capacity-only inputs of `payer` until they cover the outputs,
    /// `planned` more shannons, the fee and a change cell.
    pub fn fund_inputs(
        &self,
        skeleton: &mut TransactionSkeleton,
        payer: &Script,
        planned: u64,
    ) -> Result<()> {
        let change_minimum = Cell::with_capacity(0, payer.clone()).occupied_capacity()?;
        let required = skeleton.outputs_capacity()
            + u128::from(planned)
            + u128::from(self.config.tx_fee()?)
            + u128::from(change_minimum);
        let available = skeleton.inputs_capacity();
        if required > available {
            let query = CellQuery::capacity_only(payer.clone());
            let collected =
                self.collector
                    .collect_capacity(self.provider, &query, required - available)?;
            debug!(
                "fund {} shannons with {} cells",
                required - available,
                collected.cells.len()
            );
            skeleton.push_inputs(collected.cells)?;
        }
        skeleton.add_cell_deps(self.payer_deps(payer))?;
        Ok(())
    }

    /// Fund the skeleton from `payer` and send the rest back as change.
    pub fn fund(&self, skeleton: &mut TransactionSkeleton, payer: &Script) -> Result<u64> {
        self.fund_inputs(skeleton, payer, 0)?;
        skeleton.complete_change(self.config.tx_fee()?, payer.clone())
    }

    pub fn plan_transfer(
        &self,
        from: &Script,
        to: Script,
        capacity: u64,
    ) -> Result<TransactionSkeleton> {
        let mut skeleton = self.new_skeleton()?;
        skeleton.push_output(Cell::with_capacity(capacity, to))?;
        self.fund(&mut skeleton, from)?;
        Ok(skeleton)
    }

    /// A cell holding `binary` at exactly its occupied capacity, owned by
    /// `owner`, with a type id when `type_id` is set.
    pub fn plan_deploy(&self, binary: Bytes, owner: &Script, type_id: bool) -> Result<DeployPlan> {
        let mut skeleton = self.new_skeleton()?;
        // the type id args are always 32 bytes, so a zeroed one sizes the cell
        let sizing_type = if type_id {
            Some(type_id_script(&OutPoint::new(H256::default(), 0), 0))
        } else {
            None
        };
        let sizing = Cell::new(
            CellOutput::new(0, owner.clone()).with_type(sizing_type),
            binary.clone(),
        );
        let capacity = sizing.occupied_capacity()?;
        self.fund_inputs(&mut skeleton, owner, capacity)?;

        let output_index = skeleton.outputs().len();
        let type_script = match (type_id, skeleton.inputs().first()) {
            (false, _) => None,
            (true, Some(first)) => Some(type_id_script(&first.out_point, output_index as u64)),
            (true, None) => {
                return Err(Error::validation("inputs", "type id needs at least one input"));
            }
        };
        let code = Cell::new(
            CellOutput::new(capacity, owner.clone()).with_type(type_script.clone()),
            binary,
        );
        let data_hash = code.data_hash();
        skeleton.push_output(code)?;
        skeleton.complete_change(self.config.tx_fee()?, owner.clone())?;
        Ok(DeployPlan {
            skeleton,
            output_index: output_index as u32,
            data_hash,
            type_id: type_script,
        })
    }

    /// `count` cells under `lock`, each holding `capacity` and `data`, paid
    /// for by `payer`.
    pub fn plan_lock_cells(
        &self,
        payer: &Script,
        lock: &Script,
        capacity: u64,
        count: usize,
        data: Bytes,
    ) -> Result<TransactionSkeleton> {
        let mut skeleton = self.new_skeleton()?;
        for _ in 0..count {
            skeleton.push_output(Cell::new(
                CellOutput::new(capacity, lock.clone()),
                data.clone(),
            ))?;
        }
        self.fund(&mut skeleton, payer)?;
        Ok(skeleton)
    }

    /// Spend every live cell under `lock` into one cell for `receiver`.
    /// `witnesses` are placed verbatim from index 0 and nothing is signed.
    pub fn plan_unlock_cells(
        &self,
        code_dep: CellDep,
        lock: &Script,
        witnesses: Vec<Bytes>,
        receiver: Script,
    ) -> Result<TransactionSkeleton> {
        let collected = self
            .collector
            .collect_all(self.provider, &CellQuery::by_lock(lock.clone()))?;
        if collected.cells.is_empty() {
            return Err(Error::validation("inputs", "no live cells under the lock"));
        }
        let mut skeleton = self.new_skeleton()?;
        skeleton.add_cell_deps(vec![code_dep])?;
        skeleton.push_inputs(collected.cells)?;
        for (i, witness) in witnesses.into_iter().enumerate() {
            skeleton.set_witness(i, witness)?;
        }
        skeleton.complete_change(self.config.tx_fee()?, receiver)?;
        Ok(skeleton)
    }

    fn typed_cells(&self, lock: &Script, type_script: &Script) -> Result<Vec<LiveCell>> {
        let query = CellQuery {
            lock: Some(lock.clone()),
            type_script: TypeFilter::Exact(type_script.clone()),
            data: DataFilter::Any,
        };
        let collected = self.collector.collect_all(self.provider, &query)?;
        if collected.cells.is_empty() {
            return Err(Error::validation(
                "inputs",
                format!("no live cells with type {:#x}", type_script.hash()),
            ));
        }
        Ok(collected.cells)
    }

    /// One cell per entry of `data`, each holding `capacity` under `lock`
    /// and typed by `type_script`, whose code `type_dep` loads.
    pub fn plan_type_cells(
        &self,
        payer: &Script,
        lock: &Script,
        type_script: &Script,
        type_dep: CellDep,
        capacity: u64,
        data: Vec<Bytes>,
    ) -> Result<TransactionSkeleton> {
        let mut skeleton = self.new_skeleton()?;
        skeleton.add_cell_deps(vec![type_dep])?;
        for data in data {
            skeleton.push_output(Cell::new(
                CellOutput::new(capacity, lock.clone()).with_type(Some(type_script.clone())),
                data,
            ))?;
        }
        self.fund(&mut skeleton, payer)?;
        Ok(skeleton)
    }

    /// Rewrite the data of every cell of `owner` typed by `type_script`.
    /// Each cell keeps its position, capacity, lock and type; `owner` pays
    /// the fee.
    pub fn plan_update_type_cells<F>(
        &self,
        owner: &Script,
        type_script: &Script,
        type_dep: CellDep,
        mut update: F,
    ) -> Result<TransactionSkeleton>
    where
        F: FnMut(&Bytes) -> Result<Bytes>,
    {
        let cells = self.typed_cells(owner, type_script)?;
        let mut skeleton = self.new_skeleton()?;
        skeleton.add_cell_deps(vec![type_dep])?;
        for cell in cells {
            let data = update(&cell.cell.data)?;
            let output = Cell::new(cell.cell.output.clone(), data);
            skeleton.push_input(cell)?.push_output(output)?;
        }
        self.fund(&mut skeleton, owner)?;
        Ok(skeleton)
    }

    /// Spend every cell of `owner` typed by `type_script` into one plain
    /// cell for `receiver`.
    pub fn plan_consume_type_cells(
        &self,
        owner: &Script,
        type_script: &Script,
        type_dep: CellDep,
        receiver: Script,
    ) -> Result<TransactionSkeleton> {
        let cells = self.typed_cells(owner, type_script)?;
        let mut skeleton = self.new_skeleton()?;
        skeleton
            .add_cell_deps(vec![type_dep])?
            .add_cell_deps(self.payer_deps(owner))?;
        skeleton.push_inputs(cells)?;
        skeleton.complete_change(self.config.tx_fee()?, receiver)?;
        Ok(skeleton)
    }
}

/// Next state of a double counter: two u64 LE counters, the first
/// stepping by one and the second by two.
pub fn double_counter_step(data: &Bytes) -> Result<Bytes> {
    if data.len() != 16 {
        return Err(Error::Format(format!(
            "double counter holds 16 bytes, got {}",
            data.len()
        )));
    }
    let overflow = || Error::Format("double counter overflow".to_string());
    let first = u64_from_le_bytes(&data[..8])?
        .checked_add(1)
        .ok_or_else(overflow)?;
    let second = u64_from_le_bytes(&data[8..])?
        .checked_add(2)
        .ok_or_else(overflow)?;
    let mut next = first.to_le_bytes().to_vec();
    next.extend_from_slice(&second.to_le_bytes());
    Ok(Bytes::from(next))
}


/// Rules every lab transaction must pass before it is signed.
pub fn base_shape(config: &Config) -> Result<ExpectedShape> {
    Ok(ExpectedShape::new()
        .min_input_count(1)
        .min_output_count(1)
        .max_fee(config.fee_ceiling()?)
        .occupied_capacity()
        .script_deps(vec![config.sighash.clone(), config.multisig.clone()]))
}

pub fn transfer_shape(config: &Config, to: &Script, capacity: u64) -> Result<ExpectedShape> {
    Ok(base_shape(config)?
        .output_capacity(0, capacity)
        .output_lock_hash(0, to.hash()))
}

pub fn deploy_shape(config: &Config, plan: &DeployPlan, owner: &Script) -> Result<ExpectedShape> {
    Ok(base_shape(config)?.output_lock_hash(plan.output_index as usize, owner.hash()))
}

/// `count` new cells followed by the change.
pub fn lock_cells_shape(config: &Config, count: usize) -> Result<ExpectedShape> {
    Ok(base_shape(config)?.output_count(count + 1))
}

/// Everything collapses into one cell for `receiver`.
pub fn sweep_shape(config: &Config, receiver: &Script) -> Result<ExpectedShape> {
    Ok(base_shape(config)?
        .output_count(1)
        .output_lock_hash(0, receiver.hash()))
}

/// Typed cells carrying `data` in order, followed by the change.
pub fn type_cells_shape(config: &Config, data: &[Bytes]) -> Result<ExpectedShape> {
    let shape = lock_cells_shape(config, data.len())?;
    Ok(data
        .iter()
        .enumerate()
        .fold(shape, |shape, (i, data)| shape.output_data(i, data.clone())))
}

/// Validate, place witness placeholders, sign and seal.
pub fn finalize(
    mut skeleton: TransactionSkeleton,
    registry: &LockRegistry,
    signers: &[&dyn Signer],
    shape: &ExpectedShape,
) -> Result<SealedTransaction> {
    validate(&skeleton, shape)?;
    if !signers.is_empty() {
        skeleton.add_witness_placeholders(registry)?;
    }
    sign_transaction(&mut skeleton, signers)
}

/// Asked with the validated draft before anything is signed; `false`
/// cancels the send.
pub type Confirm = Box<dyn FnMut(&TransactionSkeleton) -> Result<bool>>;

/// A node connection plus the cells this process has spent but not yet
/// seen committed.
pub struct Lab {
    config: Config,
    client: RpcClient,
    collector: Collector,
    registry: LockRegistry,
    confirm: Option<Confirm>,
}

impl Lab {
    pub fn new(config: Config) -> Result<Lab> {
        config.check()?;
        let client = RpcClient::new(&config.node_url)?;
        let mut registry = LockRegistry::new();
        registry.register_code(
            config.sighash.code_hash.clone(),
            config.sighash.hash_type,
            SIGNATURE_SIZE,
        );
        Ok(Lab {
            config,
            client,
            collector: Collector::new(),
            registry,
            confirm: None,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    pub fn registry_mut(&mut self) -> &mut LockRegistry {
        &mut self.registry
    }

    pub fn set_confirm<F>(&mut self, confirm: F)
    where
        F: FnMut(&TransactionSkeleton) -> Result<bool> + 'static,
    {
        self.confirm = Some(Box::new(confirm));
    }

    fn sync(&self) -> Result<()> {
        self.client
            .wait_indexer_synced(self.config.indexer_timeout(), self.config.poll_interval())
    }

    /// Run `plan` against the node's indexer.
    pub fn plan<T, F>(&self, plan: F) -> Result<T>
    where
        F: FnOnce(&TxPlanner<IndexerCellProvider>) -> Result<T>,
    {
        self.sync()?;
        let provider = IndexerCellProvider::new(&self.client);
        let planner = TxPlanner::new(&provider, &self.collector, &self.config);
        plan(&planner)
    }

    /// Capacity held by `lock`, in shannons.
    pub fn balance(&self, lock: &Script) -> Result<u128> {
        self.sync()?;
        let provider = IndexerCellProvider::new(&self.client);
        let collected = self
            .collector
            .collect_all(&provider, &CellQuery::by_lock(lock.clone()))?;
        Ok(collected.capacity)
    }

    /// Validate, ask the confirm hook, seal, submit and wait for the
    /// transaction to be committed. The spent inputs stay locked in the
    /// collector.
    pub fn send(
        &mut self,
        skeleton: TransactionSkeleton,
        signers: &[&dyn Signer],
        shape: &ExpectedShape,
    ) -> Result<SealedTransaction> {
        info!(
            "sending transaction\n{}",
            describe_transaction(&skeleton, &DescribeOptions::default())
        );
        validate(&skeleton, shape)?;
        if let Some(confirm) = self.confirm.as_mut() {
            if !confirm(&skeleton)? {
                return Err(Error::Cancelled);
            }
        }
        let sealed = finalize(skeleton, &self.registry, signers, shape)?;
        let hash = self.client.submit(&sealed)?;
        self.collector.lock_cells(sealed.inputs());
        self.client
            .await_confirmation(&hash, self.config.confirm_timeout(), self.config.poll_interval())?;
        Ok(sealed)
    }

    pub fn transfer(
        &mut self,
        signer: &dyn Signer,
        from: &Script,
        to: Script,
        capacity: u64,
    ) -> Result<H256> {
        let shape = transfer_shape(&self.config, &to, capacity)?;
        let skeleton = self.plan(|planner| planner.plan_transfer(from, to, capacity))?;
        let sealed = self.send(skeleton, &[signer], &shape)?;
        Ok(sealed.hash().clone())
    }

    pub fn deploy_code(
        &mut self,
        binary: Bytes,
        signer: &dyn Signer,
        owner: &Script,
        type_id: bool,
    ) -> Result<DeployedCode> {
        let plan = self.plan(|planner| planner.plan_deploy(binary, owner, type_id))?;
        let shape = deploy_shape(&self.config, &plan, owner)?;
        let sealed = self.send(plan.skeleton.clone(), &[signer], &shape)?;
        let deployed = plan.deployed(sealed.hash().clone());
        info!(
            "deployed code at {} with data hash {:#x}",
            deployed.out_point, deployed.data_hash
        );
        Ok(deployed)
    }

    pub fn lock_cells(
        &mut self,
        signer: &dyn Signer,
        payer: &Script,
        lock: &Script,
        capacity: u64,
        count: usize,
        data: Bytes,
    ) -> Result<H256> {
        let shape = lock_cells_shape(&self.config, count)?;
        let skeleton = self.plan(|planner| {
            planner.plan_lock_cells(payer, lock, capacity, count, data)
        })?;
        let sealed = self.send(skeleton, &[signer], &shape)?;
        Ok(sealed.hash().clone())
    }

    /// `witnesses` unlock the cells, so nothing is signed.
    pub fn unlock_cells(
        &mut self,
        code_dep: CellDep,
        lock: &Script,
        witnesses: Vec<Bytes>,
        receiver: Script,
    ) -> Result<H256> {
        let shape = sweep_shape(&self.config, &receiver)?;
        let skeleton = self.plan(|planner| {
            planner.plan_unlock_cells(code_dep, lock, witnesses, receiver)
        })?;
        let sealed = self.send(skeleton, &[], &shape)?;
        Ok(sealed.hash().clone())
    }

    pub fn create_type_cells(
        &mut self,
        signer: &dyn Signer,
        owner: &Script,
        type_script: &Script,
        type_dep: CellDep,
        capacity: u64,
        data: Vec<Bytes>,
    ) -> Result<H256> {
        let shape = type_cells_shape(&self.config, &data)?;
        let skeleton = self.plan(|planner| {
            planner.plan_type_cells(owner, owner, type_script, type_dep, capacity, data)
        })?;
        let sealed = self.send(skeleton, &[signer], &shape)?;
        Ok(sealed.hash().clone())
    }

    pub fn update_type_cells<F>(
        &mut self,
        signer: &dyn Signer,
        owner: &Script,
        type_script: &Script,
        type_dep: CellDep,
        update: F,
    ) -> Result<H256>
    where
        F: FnMut(&Bytes) -> Result<Bytes>,
    {
        let skeleton = self.plan(|planner| {
            planner.plan_update_type_cells(owner, type_script, type_dep, update)
        })?;
        let updated = skeleton
            .outputs()
            .iter()
            .filter(|output| output.type_script() == Some(type_script))
            .count();
        let shape = lock_cells_shape(&self.config, updated)?;
        let sealed = self.send(skeleton, &[signer], &shape)?;
        Ok(sealed.hash().clone())
    }

    pub fn consume_type_cells(
        &mut self,
        signer: &dyn Signer,
        owner: &Script,
        type_script: &Script,
        type_dep: CellDep,
        receiver: Script,
    ) -> Result<H256> {
        let shape = sweep_shape(&self.config, &receiver)?;
        let skeleton = self.plan(|planner| {
            planner.plan_consume_type_cells(owner, type_script, type_dep, receiver)
        })?;
        let sealed = self.send(skeleton, &[signer], &shape)?;
        Ok(sealed.hash().clone())
    }
}
