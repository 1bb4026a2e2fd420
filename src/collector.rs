//! Picking live cells to fund a transaction.

use std::collections::{BTreeMap, HashSet};

use ckb_types::{bytes::Bytes, H256};
use log::{debug, warn};
use rand::{thread_rng, Rng};

use crate::error::{Error, Result};
use crate::model::{Cell, CellOutput, LiveCell, OutPoint, Script};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeFilter {
    Any,
    Empty,
    Exact(Script),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataFilter {
    Any,
    Empty,
}

/// Which live cells a provider should return.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CellQuery {
    pub lock: Option<Script>,
    pub type_script: TypeFilter,
    pub data: DataFilter,
}

impl CellQuery {
    pub fn by_lock(lock: Script) -> Self {
        CellQuery {
            lock: Some(lock),
            type_script: TypeFilter::Any,
            data: DataFilter::Any,
        }
    }

    /// Cells under `lock` with no type and no data, safe to spend for
    /// their capacity alone.
    pub fn capacity_only(lock: Script) -> Self {
        CellQuery {
            lock: Some(lock),
            type_script: TypeFilter::Empty,
            data: DataFilter::Empty,
        }
    }

    pub fn matches(&self, cell: &LiveCell) -> bool {
        let lock_ok = self.lock.as_ref().map_or(true, |lock| cell.lock() == lock);
        let type_ok = match &self.type_script {
            TypeFilter::Any => true,
            TypeFilter::Empty => cell.cell.type_script().is_none(),
            TypeFilter::Exact(script) => cell.cell.type_script() == Some(script),
        };
        let data_ok = match self.data {
            DataFilter::Any => true,
            DataFilter::Empty => cell.cell.data.is_empty(),
        };
        lock_ok && type_ok && data_ok
    }
}

pub type CellIter<'a> = Box<dyn Iterator<Item = Result<LiveCell>> + 'a>;

/// A source of live cells. Each `query` starts a fresh, lazily evaluated
/// scan in the provider's own order.
pub trait CellProvider {
    fn query<'a>(&'a self, query: &CellQuery) -> Result<CellIter<'a>>;
}

/// Result of a collection run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Collected {
    pub cells: Vec<LiveCell>,
    pub capacity: u128,
}

/// Selects inputs first-fit, skipping cells this process already spent in
/// transactions that are not committed yet.
#[derive(Clone, Debug, Default)]
pub struct Collector {
    locked_cells: HashSet<OutPoint>,
}

impl Collector {
    pub fn new() -> Self {
        Collector::default()
    }

    pub fn lock_cell(&mut self, out_point: OutPoint) {
        self.locked_cells.insert(out_point);
    }

    pub fn lock_cells<'a, I>(&mut self, cells: I)
    where
        I: IntoIterator<Item = &'a LiveCell>,
    {
        for cell in cells {
            self.lock_cell(cell.out_point.clone());
        }
    }

    pub fn unlock_cell(&mut self, out_point: &OutPoint) {
        self.locked_cells.remove(out_point);
    }

    pub fn is_live_cell_locked(&self, cell: &LiveCell) -> bool {
        self.locked_cells.contains(&cell.out_point)
    }

    /// Accumulate matching cells in provider order until they hold at least
    /// `threshold` shannons.
    pub fn collect_capacity<P>(
        &self,
        provider: &P,
        query: &CellQuery,
        threshold: u128,
    ) -> Result<Collected>
    where
        P: CellProvider + ?Sized,
    {
        let mut collected = Collected::default();
        if threshold == 0 {
            return Ok(collected);
        }
        for cell in provider.query(query)? {
            let cell = cell?;
            if !query.matches(&cell) {
                continue;
            }
            // cell is in use, but not yet committed
            if self.is_live_cell_locked(&cell) {
                warn!("skip locked cell {}", cell.out_point);
                continue;
            }
            collected.capacity += u128::from(cell.capacity());
            collected.cells.push(cell);
            if collected.capacity >= threshold {
                debug!(
                    "collected {} cells holding {} shannons",
                    collected.cells.len(),
                    collected.capacity
                );
                return Ok(collected);
            }
        }
        Err(Error::InsufficientFunds {
            required: threshold,
            collected: collected.capacity,
        })
    }

    /// Every matching, unlocked cell.
    pub fn collect_all<P>(&self, provider: &P, query: &CellQuery) -> Result<Collected>
    where
        P: CellProvider + ?Sized,
    {
        let mut collected = Collected::default();
        for cell in provider.query(query)? {
            let cell = cell?;
            if !query.matches(&cell) || self.is_live_cell_locked(&cell) {
                continue;
            }
            collected.capacity += u128::from(cell.capacity());
            collected.cells.push(cell);
        }
        Ok(collected)
    }
}

/// Return a random hash
pub fn random_hash() -> H256 {
    let mut rng = thread_rng();
    let mut buf = [0u8; 32];
    rng.fill(&mut buf);
    H256(buf)
}

/// Return a random OutPoint
pub fn random_out_point() -> OutPoint {
    OutPoint::new(random_hash(), 0)
}

/// An ordered, in-memory live cell set, for offline building and tests.
#[derive(Clone, Debug, Default)]
pub struct MemoryCellProvider {
    cells: BTreeMap<u64, LiveCell>,
    next_seq: u64,
}

impl MemoryCellProvider {
    pub fn new() -> Self {
        MemoryCellProvider::default()
    }

    pub fn insert(&mut self, cell: LiveCell) {
        self.cells.insert(self.next_seq, cell);
        self.next_seq += 1;
    }

    /// Create a live cell at a random out point.
    pub fn create_cell(&mut self, cell: Cell) -> LiveCell {
        let live_cell = LiveCell::new(random_out_point(), cell);
        self.insert(live_cell.clone());
        live_cell
    }

    pub fn create_capacity_cell(&mut self, capacity: u64, lock: Script) -> LiveCell {
        self.create_cell(Cell::new(CellOutput::new(capacity, lock), Bytes::new()))
    }

    /// Drop the cells a transaction consumed.
    pub fn consume<'a, I>(&mut self, out_points: I)
    where
        I: IntoIterator<Item = &'a OutPoint>,
    {
        let spent: HashSet<&OutPoint> = out_points.into_iter().collect();
        self.cells.retain(|_, cell| !spent.contains(&cell.out_point));
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl CellProvider for MemoryCellProvider {
    fn query<'a>(&'a self, query: &CellQuery) -> Result<CellIter<'a>> {
        let query = query.clone();
        Ok(Box::new(
            self.cells
                .values()
                .filter(move |cell| query.matches(cell))
                .cloned()
                .map(Ok),
        ))
    }
}
