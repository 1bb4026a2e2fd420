//! Build, validate and sign CKB cell-model transactions.

pub mod address;
pub mod capacity;
pub mod collector;
pub mod config;
pub mod describe;
pub mod error;
pub mod hex;
pub mod lab;
pub mod locks;
pub mod model;
pub mod rpc;
pub mod signer;
pub mod skeleton;
pub mod validator;

pub use address::{Address, Network};
pub use capacity::{HumanCapacity, ONE_CKB};
pub use collector::{CellProvider, CellQuery, Collector, MemoryCellProvider};
pub use config::Config;
pub use error::{Error, Result, ValidationError};
pub use model::{Cell, CellDep, CellOutput, DepType, LiveCell, OutPoint, Script, ScriptHashType};
pub use signer::{sign_transaction, Signer, SigningEntry};
pub use skeleton::{SealedTransaction, TransactionLike, TransactionSkeleton};
pub use validator::{validate, ExpectedShape};
