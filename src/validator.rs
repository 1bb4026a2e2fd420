//! Structural checks on a transaction before it is signed or sent.
//!
//! These run client-side only. They catch a transaction that does not have
//! the expected shape; whether the scripts accept it is up to the node.

use std::collections::HashSet;

use ckb_types::{bytes::Bytes, H256};

use crate::capacity::HumanCapacity;
use crate::error::{Error, Result, ValidationError};
use crate::hex::bytes_to_hex;
use crate::locks::ScriptInfo;
use crate::model::{Cell, CellDep};
use crate::skeleton::TransactionLike;

type Check = std::result::Result<(), ValidationError>;

/// A single structural rule.
pub trait ValidationRule {
    fn check(&self, tx: &dyn TransactionLike) -> Check;
}

impl<F> ValidationRule for F
where
    F: Fn(&dyn TransactionLike) -> Check,
{
    fn check(&self, tx: &dyn TransactionLike) -> Check {
        self(tx)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Input,
    Output,
}

impl Side {
    fn name(self) -> &'static str {
        match self {
            Side::Input => "input",
            Side::Output => "output",
        }
    }

    fn cells(self, tx: &dyn TransactionLike) -> Vec<&Cell> {
        match self {
            Side::Input => tx.inputs().iter().map(|input| &input.cell).collect(),
            Side::Output => tx.outputs().iter().collect(),
        }
    }

    fn cell(self, tx: &dyn TransactionLike, index: usize) -> std::result::Result<&Cell, ValidationError> {
        let cell = match self {
            Side::Input => tx.inputs().get(index).map(|input| &input.cell),
            Side::Output => tx.outputs().get(index),
        };
        cell.ok_or_else(|| {
            ValidationError::new(
                format!("{}s[{}]", self.name(), index),
                "no such cell",
            )
        })
    }
}

/// The built-in rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rule {
    Count { side: Side, count: usize },
    MinCount { side: Side, count: usize },
    LockHash { side: Side, index: usize, hash: H256 },
    Capacity { side: Side, index: usize, capacity: u64 },
    Data { side: Side, index: usize, data: Bytes },
    /// Outputs must not exceed inputs.
    Balanced,
    MaxFee(u64),
    ExactFee(u64),
    /// Every output holds at least its occupied capacity.
    OccupiedCapacity,
    /// Cells running one of these scripts need its dep in the transaction.
    ScriptDeps(Vec<ScriptInfo>),
}

fn fee_of(tx: &dyn TransactionLike) -> Check {
    if tx.fee() < 0 {
        Err(ValidationError::new(
            "fee",
            "more capacity is required by the outputs than is available in the inputs",
        ))
    } else {
        Ok(())
    }
}

impl ValidationRule for Rule {
    fn check(&self, tx: &dyn TransactionLike) -> Check {
        match self {
            Rule::Count { side, count } => {
                let actual = side.cells(tx).len();
                if actual != *count {
                    return Err(ValidationError::new(
                        format!("{}s", side.name()),
                        format!("expected {} cells, found {}", count, actual),
                    ));
                }
            }
            Rule::MinCount { side, count } => {
                let actual = side.cells(tx).len();
                if actual < *count {
                    return Err(ValidationError::new(
                        format!("{}s", side.name()),
                        format!("expected at least {} cells, found {}", count, actual),
                    ));
                }
            }
            Rule::LockHash { side, index, hash } => {
                let actual = side.cell(tx, *index)?.lock().hash();
                if &actual != hash {
                    return Err(ValidationError::new(
                        format!("{}s[{}].lock", side.name(), index),
                        format!("expected lock hash {:#x}, found {:#x}", hash, actual),
                    ));
                }
            }
            Rule::Capacity {
                side,
                index,
                capacity,
            } => {
                let actual = side.cell(tx, *index)?.capacity();
                if actual != *capacity {
                    return Err(ValidationError::new(
                        format!("{}s[{}].capacity", side.name(), index),
                        format!(
                            "expected {:#}, found {:#}",
                            HumanCapacity(*capacity),
                            HumanCapacity(actual)
                        ),
                    ));
                }
            }
            Rule::Data { side, index, data } => {
                let actual = &side.cell(tx, *index)?.data;
                if actual != data {
                    return Err(ValidationError::new(
                        format!("{}s[{}].data", side.name(), index),
                        format!(
                            "expected {}, found {}",
                            bytes_to_hex(data),
                            bytes_to_hex(actual)
                        ),
                    ));
                }
            }
            Rule::Balanced => fee_of(tx)?,
            Rule::MaxFee(max) => {
                fee_of(tx)?;
                if tx.fee() > i128::from(*max) {
                    return Err(ValidationError::new(
                        "fee",
                        format!("{} shannons exceeds the maximum of {}", tx.fee(), max),
                    ));
                }
            }
            Rule::ExactFee(fee) => {
                if tx.fee() != i128::from(*fee) {
                    return Err(ValidationError::new(
                        "fee",
                        format!("expected exactly {} shannons, found {}", fee, tx.fee()),
                    ));
                }
            }
            Rule::OccupiedCapacity => {
                for (i, output) in tx.outputs().iter().enumerate() {
                    let occupied = output
                        .occupied_capacity()
                        .map_err(|err| ValidationError::new(format!("outputs[{}]", i), err.to_string()))?;
                    if output.capacity() < occupied {
                        return Err(ValidationError::new(
                            format!("outputs[{}].capacity", i),
                            format!(
                                "{:#} is below the occupied capacity {:#}",
                                HumanCapacity(output.capacity()),
                                HumanCapacity(occupied)
                            ),
                        ));
                    }
                }
            }
            Rule::ScriptDeps(scripts) => {
                let deps: HashSet<&CellDep> = tx.cell_deps().iter().collect();
                let input_locks = tx.inputs().iter().map(|input| ("inputs", input.lock()));
                let output_types = tx
                    .outputs()
                    .iter()
                    .filter_map(|output| output.type_script().map(|script| ("outputs", script)));
                let input_types = tx
                    .inputs()
                    .iter()
                    .filter_map(|input| input.cell.type_script().map(|script| ("inputs", script)));
                for (source, script) in input_locks.chain(input_types).chain(output_types) {
                    for info in scripts.iter().filter(|info| info.matches(script)) {
                        if !deps.contains(&info.cell_dep) {
                            return Err(ValidationError::new(
                                "cell_deps",
                                format!(
                                    "missing dep {} for code hash {:#x} used by {}",
                                    info.cell_dep.out_point, info.code_hash, source
                                ),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// The shape a transaction is expected to have.
#[derive(Default)]
pub struct ExpectedShape {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl ExpectedShape {
    pub fn new() -> Self {
        ExpectedShape::default()
    }

    pub fn rule<R: ValidationRule + 'static>(mut self, rule: R) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn input_count(self, count: usize) -> Self {
        self.rule(Rule::Count {
            side: Side::Input,
            count,
        })
    }

    pub fn min_input_count(self, count: usize) -> Self {
        self.rule(Rule::MinCount {
            side: Side::Input,
            count,
        })
    }

    pub fn output_count(self, count: usize) -> Self {
        self.rule(Rule::Count {
            side: Side::Output,
            count,
        })
    }

    pub fn min_output_count(self, count: usize) -> Self {
        self.rule(Rule::MinCount {
            side: Side::Output,
            count,
        })
    }

    pub fn input_lock_hash(self, index: usize, hash: H256) -> Self {
        self.rule(Rule::LockHash {
            side: Side::Input,
            index,
            hash,
        })
    }

    pub fn output_lock_hash(self, index: usize, hash: H256) -> Self {
        self.rule(Rule::LockHash {
            side: Side::Output,
            index,
            hash,
        })
    }

    pub fn input_capacity(self, index: usize, capacity: u64) -> Self {
        self.rule(Rule::Capacity {
            side: Side::Input,
            index,
            capacity,
        })
    }

    pub fn output_capacity(self, index: usize, capacity: u64) -> Self {
        self.rule(Rule::Capacity {
            side: Side::Output,
            index,
            capacity,
        })
    }

    pub fn input_data(self, index: usize, data: Bytes) -> Self {
        self.rule(Rule::Data {
            side: Side::Input,
            index,
            data,
        })
    }

    pub fn output_data(self, index: usize, data: Bytes) -> Self {
        self.rule(Rule::Data {
            side: Side::Output,
            index,
            data,
        })
    }

    pub fn max_fee(self, fee: u64) -> Self {
        self.rule(Rule::MaxFee(fee))
    }

    pub fn exact_fee(self, fee: u64) -> Self {
        self.rule(Rule::ExactFee(fee))
    }

    pub fn occupied_capacity(self) -> Self {
        self.rule(Rule::OccupiedCapacity)
    }

    pub fn script_deps(self, scripts: Vec<ScriptInfo>) -> Self {
        self.rule(Rule::ScriptDeps(scripts))
    }

    /// Every rule the transaction breaks, in rule order.
    pub fn violations(&self, tx: &dyn TransactionLike) -> Vec<ValidationError> {
        self.rules
            .iter()
            .filter_map(|rule| rule.check(tx).err())
            .collect()
    }
}

/// Fail on the first rule `tx` breaks.
pub fn validate(tx: &dyn TransactionLike, shape: &ExpectedShape) -> Result<()> {
    for rule in &shape.rules {
        rule.check(tx).map_err(Error::Validation)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::ONE_CKB;
    use crate::locks::SIGHASH_TYPE_HASH;
    use crate::model::{DepType, LiveCell, OutPoint, Script, ScriptHashType};
    use crate::skeleton::TransactionSkeleton;

    fn lock(byte: u8) -> Script {
        Script::new(
            SIGHASH_TYPE_HASH,
            ScriptHashType::Type,
            Bytes::from(vec![byte; 20]),
        )
    }

    fn sighash_info() -> ScriptInfo {
        ScriptInfo {
            code_hash: SIGHASH_TYPE_HASH,
            hash_type: ScriptHashType::Type,
            cell_dep: CellDep::new(OutPoint::new(H256([0xf8; 32]), 0), DepType::DepGroup),
        }
    }

    fn skeleton() -> TransactionSkeleton {
        let mut skeleton = TransactionSkeleton::new();
        skeleton
            .push_input(LiveCell::new(
                OutPoint::new(H256([1; 32]), 0),
                Cell::with_capacity(1000 * ONE_CKB, lock(1)),
            ))
            .unwrap();
        skeleton
            .push_output(Cell::new(
                crate::model::CellOutput::new(500 * ONE_CKB, lock(2)),
                Bytes::from_static(b"HelloWorld"),
            ))
            .unwrap();
        skeleton
            .push_output(Cell::with_capacity(
                1000 * ONE_CKB - 500 * ONE_CKB - 100_000,
                lock(1),
            ))
            .unwrap();
        skeleton
    }

    #[test]
    fn test_matching_shape() {
        let shape = ExpectedShape::new()
            .input_count(1)
            .min_input_count(1)
            .output_count(2)
            .input_lock_hash(0, lock(1).hash())
            .output_lock_hash(0, lock(2).hash())
            .output_capacity(0, 500 * ONE_CKB)
            .input_capacity(0, 1000 * ONE_CKB)
            .output_data(0, Bytes::from_static(b"HelloWorld"))
            .max_fee(ONE_CKB)
            .exact_fee(100_000)
            .occupied_capacity();
        validate(&skeleton(), &shape).unwrap();
    }

    #[test]
    fn test_reports_field() {
        let shape = ExpectedShape::new().output_count(2).output_capacity(1, 61 * ONE_CKB);
        let err = validate(&skeleton(), &shape).unwrap_err();
        match err {
            Error::Validation(err) => assert_eq!(err.field, "outputs[1].capacity"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_missing_index() {
        let shape = ExpectedShape::new().input_data(3, Bytes::new());
        let violations = shape.violations(&skeleton());
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].field, "inputs[3]");
    }

    #[test]
    fn test_fee_rules() {
        let mut underfunded = TransactionSkeleton::new();
        underfunded
            .push_output(Cell::with_capacity(61 * ONE_CKB, lock(1)))
            .unwrap();
        let shape = ExpectedShape::new().rule(Rule::Balanced).max_fee(ONE_CKB);
        assert_eq!(shape.violations(&underfunded).len(), 2);
        let shape = ExpectedShape::new().exact_fee(200_000);
        assert!(validate(&skeleton(), &shape).is_err());
    }

    #[test]
    fn test_occupied_capacity() {
        let mut skeleton = TransactionSkeleton::new();
        skeleton
            .push_output(Cell::with_capacity(60 * ONE_CKB, lock(1)))
            .unwrap();
        let err = validate(&skeleton, &ExpectedShape::new().occupied_capacity()).unwrap_err();
        assert!(matches!(err, Error::Validation(ref e) if e.field == "outputs[0].capacity"));
    }

    #[test]
    fn test_script_deps() {
        let shape = ExpectedShape::new().script_deps(vec![sighash_info()]);
        let mut skeleton = skeleton();
        assert!(validate(&skeleton, &shape).is_err());
        skeleton
            .add_cell_deps(vec![sighash_info().cell_dep])
            .unwrap();
        validate(&skeleton, &shape).unwrap();
    }

    #[test]
    fn test_custom_rule() {
        let no_header_deps = |tx: &dyn TransactionLike| {
            if tx.header_deps().is_empty() {
                Ok(())
            } else {
                Err(ValidationError::new("header_deps", "must be empty"))
            }
        };
        let shape = ExpectedShape::new().rule(no_header_deps);
        let mut skeleton = skeleton();
        validate(&skeleton, &shape).unwrap();
        skeleton.push_header_dep(H256::default()).unwrap();
        assert!(validate(&skeleton, &shape).is_err());
    }
}
