use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use ckb_jsonrpc_types::{
    BlockNumber, CellOutput, CellWithStatus, JsonBytes, OutPoint, Script, Status, Transaction,
    TxStatus, Uint32, Uint64,
};
use ckb_types::H256;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::collector::{CellIter, CellProvider, CellQuery, DataFilter, TypeFilter};
use crate::error::{Error, Result};
use crate::model::{self, Cell, LiveCell};
use crate::skeleton::SealedTransaction;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub struct IdGenerator {
    state: AtomicU64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        IdGenerator {
            state: AtomicU64::new(1),
        }
    }
}

impl IdGenerator {
    pub fn new() -> IdGenerator {
        IdGenerator::default()
    }

    pub fn next(&self) -> u64 {
        self.state.fetch_add(1, Ordering::SeqCst)
    }
}

fn rpc_error<E: std::fmt::Display>(err: E) -> Error {
    Error::Rpc(err.to_string())
}

macro_rules! jsonrpc {
    (
        $(#[$struct_attr:meta])*
        pub struct $struct_name:ident {$(
            $(#[$attr:meta])*
            pub fn $method:ident(&$selff:ident $(, $arg_name:ident: $arg_ty:ty)*)
                -> $return_ty:ty;
        )*}
    ) => (
        $(#[$struct_attr])*
        pub struct $struct_name {
            client: reqwest::blocking::Client,
            url: reqwest::Url,
            id_generator: $crate::rpc::IdGenerator,
        }

        impl $struct_name {
            pub fn new(uri: &str) -> $crate::error::Result<Self> {
                let url = reqwest::Url::parse(uri).map_err(|err| {
                    Error::Rpc(format!("invalid url {:?}, e.g. \"http://127.0.0.1:8114\": {}", uri, err))
                })?;
                let client = reqwest::blocking::Client::builder()
                    .timeout(REQUEST_TIMEOUT)
                    .build()
                    .map_err(rpc_error)?;
                let id_generator = $crate::rpc::IdGenerator::new();
                Ok($struct_name { url, id_generator, client })
            }

            $(
                $(#[$attr])*
                pub fn $method(&$selff $(, $arg_name: $arg_ty)*) -> $crate::error::Result<$return_ty> {
                    let method = String::from(stringify!($method));
                    let params = serialize_parameters!($($arg_name,)*);
                    let id = $selff.id_generator.next();

                    let mut req_json = serde_json::Map::new();
                    req_json.insert("id".to_owned(), serde_json::json!(id));
                    req_json.insert("jsonrpc".to_owned(), serde_json::json!("2.0"));
                    req_json.insert("method".to_owned(), serde_json::json!(method));
                    req_json.insert("params".to_owned(), params);
                    debug!("rpc request {} #{} to {}", method, id, $selff.url);

                    let resp = $selff
                        .client
                        .post($selff.url.clone())
                        .json(&req_json)
                        .send()
                        .map_err(rpc_error)?;
                    let output = resp
                        .json::<jsonrpc_core::response::Output>()
                        .map_err(rpc_error)?;
                    match output {
                        jsonrpc_core::response::Output::Success(success) => {
                            serde_json::from_value(success.result).map_err(rpc_error)
                        },
                        jsonrpc_core::response::Output::Failure(failure) => {
                            Err(Error::Rpc(format!("{} failed: {}", method, failure.error.message)))
                        }
                    }
                }
            )*
        }
    )
}

macro_rules! serialize_parameters {
    () => ( serde_json::Value::Array(vec![]) );
    ($($arg_name:ident,)+) => ( serde_json::to_value(($($arg_name,)+)).map_err(rpc_error)?)
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    Lock,
    Type,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchKeyFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<Script>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_len_range: Option<[Uint64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_data_len_range: Option<[Uint64; 2]>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchKey {
    pub script: Script,
    pub script_type: ScriptType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<SearchKeyFilter>,
    pub with_data: bool,
}

impl SearchKey {
    /// Search by lock, narrowing by type and data where the query asks.
    pub fn from_query(query: &CellQuery) -> Result<SearchKey> {
        let lock = query
            .lock
            .clone()
            .ok_or_else(|| Error::Rpc("indexer queries need a lock script".to_string()))?;
        let empty = Some([Uint64::from(0u64), Uint64::from(1u64)]);
        let mut filter = SearchKeyFilter::default();
        match &query.type_script {
            TypeFilter::Any => {}
            TypeFilter::Empty => filter.script_len_range = empty.clone(),
            TypeFilter::Exact(script) => filter.script = Some(script.clone().into()),
        }
        if query.data == DataFilter::Empty {
            filter.output_data_len_range = empty;
        }
        let filter = if filter == SearchKeyFilter::default() {
            None
        } else {
            Some(filter)
        };
        Ok(SearchKey {
            script: lock.into(),
            script_type: ScriptType::Lock,
            filter,
            with_data: true,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexerCell {
    pub output: CellOutput,
    pub output_data: Option<JsonBytes>,
    pub out_point: OutPoint,
    pub block_number: BlockNumber,
    pub tx_index: Uint32,
}

impl IndexerCell {
    pub fn into_live_cell(self) -> Result<LiveCell> {
        let output = model::CellOutput::try_from(self.output)?;
        let data = self
            .output_data
            .map(JsonBytes::into_bytes)
            .unwrap_or_default();
        let mut cell = LiveCell::new(self.out_point.into(), Cell::new(output, data));
        cell.block_number = Some(self.block_number.value());
        Ok(cell)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pagination<T> {
    pub objects: Vec<T>,
    pub last_cursor: JsonBytes,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexerTip {
    pub block_hash: H256,
    pub block_number: BlockNumber,
}

/// The part of `get_transaction`'s reply used to follow a submission.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub tx_status: TxStatus,
}

jsonrpc!(pub struct Inner {
    pub fn get_transaction(&self, hash: H256) -> Option<TransactionStatus>;
    pub fn send_transaction(&self, tx: Transaction, outputs_validator: Option<String>) -> H256;
    pub fn get_live_cell(&self, out_point: OutPoint, with_data: bool) -> CellWithStatus;
    pub fn get_tip_block_number(&self) -> BlockNumber;
    pub fn get_indexer_tip(&self) -> Option<IndexerTip>;
    pub fn get_cells(
        &self,
        search_key: SearchKey,
        order: Order,
        limit: Uint32,
        after_cursor: Option<JsonBytes>
    ) -> Pagination<IndexerCell>;
});

/// A node with its built-in indexer.
pub struct RpcClient {
    inner: Inner,
}

impl RpcClient {
    pub fn new(uri: &str) -> Result<Self> {
        Ok(Self {
            inner: Inner::new(uri)?,
        })
    }

    pub fn send_transaction(&self, tx: Transaction) -> Result<H256> {
        self.inner
            .send_transaction(tx, Some("passthrough".to_string()))
    }

    /// Send a sealed transaction and return the hash the node reports.
    pub fn submit(&self, tx: &SealedTransaction) -> Result<H256> {
        let hash = self.send_transaction(tx.to_json())?;
        if &hash != tx.hash() {
            return Err(Error::Rpc(format!(
                "node reported hash {:#x}, expected {:#x}",
                hash,
                tx.hash()
            )));
        }
        info!("sent transaction {:#x}", hash);
        Ok(hash)
    }

    pub fn get_transaction_status(&self, hash: &H256) -> Result<Option<TxStatus>> {
        Ok(self
            .inner
            .get_transaction(hash.clone())?
            .map(|tx| tx.tx_status))
    }

    /// Poll until `hash` is committed, the node rejects it, or `timeout`
    /// passes.
    pub fn await_confirmation(&self, hash: &H256, timeout: Duration, poll: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if let Some(status) = self.get_transaction_status(hash)? {
                match status.status {
                    Status::Committed => {
                        info!("transaction {:#x} committed", hash);
                        return Ok(());
                    }
                    Status::Rejected => {
                        return Err(Error::Rpc(format!(
                            "transaction {:#x} rejected: {}",
                            hash,
                            status.reason.unwrap_or_default()
                        )));
                    }
                    _ => {}
                }
            }
            if start.elapsed() >= timeout {
                return Err(Error::Timeout(format!(
                    "transaction {:#x} not committed after {:?}",
                    hash, timeout
                )));
            }
            thread::sleep(poll);
        }
    }

    pub fn get_tip_block_number(&self) -> Result<u64> {
        Ok(self.inner.get_tip_block_number()?.value())
    }

    /// Poll until the indexer has caught up with the node's tip.
    pub fn wait_indexer_synced(&self, timeout: Duration, poll: Duration) -> Result<()> {
        let start = Instant::now();
        let tip = self.get_tip_block_number()?;
        loop {
            let indexed = self
                .inner
                .get_indexer_tip()?
                .map(|tip| tip.block_number.value());
            if indexed.map_or(false, |indexed| indexed >= tip) {
                debug!("indexer synced to {}", tip);
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(Error::Timeout(format!(
                    "indexer at {:?}, node at {} after {:?}",
                    indexed, tip, timeout
                )));
            }
            thread::sleep(poll);
        }
    }

    pub fn get_live_cell(&self, out_point: &model::OutPoint) -> Result<LiveCell> {
        let reply = self.inner.get_live_cell(out_point.clone().into(), true)?;
        let info = match (reply.status.as_str(), reply.cell) {
            ("live", Some(info)) => info,
            (status, _) => {
                return Err(Error::Rpc(format!("cell {} is {}", out_point, status)));
            }
        };
        let output = model::CellOutput::try_from(info.output)?;
        let data = info
            .data
            .map(|data| data.content.into_bytes())
            .unwrap_or_default();
        Ok(LiveCell::new(out_point.clone(), Cell::new(output, data)))
    }

    pub fn get_cells(
        &self,
        search_key: SearchKey,
        limit: u32,
        after_cursor: Option<JsonBytes>,
    ) -> Result<Pagination<IndexerCell>> {
        self.inner
            .get_cells(search_key, Order::Asc, limit.into(), after_cursor)
    }
}

pub const DEFAULT_PAGE_SIZE: u32 = 64;

/// Live cells from the node's indexer, fetched a page at a time as the
/// collector asks for more.
pub struct IndexerCellProvider<'a> {
    client: &'a RpcClient,
    page_size: u32,
}

impl<'a> IndexerCellProvider<'a> {
    pub fn new(client: &'a RpcClient) -> Self {
        IndexerCellProvider {
            client,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

struct IndexerPages<'a> {
    client: &'a RpcClient,
    search_key: SearchKey,
    page_size: u32,
    cursor: Option<JsonBytes>,
    buffer: VecDeque<IndexerCell>,
    done: bool,
}

impl<'a> IndexerPages<'a> {
    fn fetch(&mut self) -> Result<()> {
        let page = self
            .client
            .get_cells(self.search_key.clone(), self.page_size, self.cursor.take())?;
        debug!("indexer returned {} cells", page.objects.len());
        if page.objects.len() < self.page_size as usize {
            self.done = true;
        }
        self.cursor = Some(page.last_cursor);
        self.buffer.extend(page.objects);
        Ok(())
    }
}

impl<'a> Iterator for IndexerPages<'a> {
    type Item = Result<LiveCell>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.done {
            if let Err(err) = self.fetch() {
                self.done = true;
                return Some(Err(err));
            }
        }
        self.buffer.pop_front().map(IndexerCell::into_live_cell)
    }
}

impl<'a> CellProvider for IndexerCellProvider<'a> {
    fn query<'b>(&'b self, query: &CellQuery) -> Result<CellIter<'b>> {
        Ok(Box::new(IndexerPages {
            client: self.client,
            search_key: SearchKey::from_query(query)?,
            page_size: self.page_size,
            cursor: None,
            buffer: VecDeque::new(),
            done: false,
        }))
    }
}
