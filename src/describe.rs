//! Human-readable dumps of a transaction for logs and confirmation prompts.

use std::fmt;

use crate::capacity::HumanCapacity;
use crate::hex::bytes_to_hex;
use crate::model::{Cell, DepType};
use crate::skeleton::TransactionLike;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DescribeOptions {
    pub show_cell_deps: bool,
    pub show_inputs: bool,
    pub show_input_type: bool,
    pub show_input_data: bool,
    pub show_outputs: bool,
    pub show_output_type: bool,
    pub show_output_data: bool,
    pub show_witnesses: bool,
}

impl Default for DescribeOptions {
    fn default() -> Self {
        DescribeOptions {
            show_cell_deps: true,
            show_inputs: true,
            show_input_type: true,
            show_input_data: true,
            show_outputs: true,
            show_output_type: true,
            show_output_data: true,
            show_witnesses: false,
        }
    }
}

impl DescribeOptions {
    /// Everything, witnesses included.
    pub fn all() -> Self {
        DescribeOptions {
            show_witnesses: true,
            ..DescribeOptions::default()
        }
    }
}

struct Describe<'a> {
    tx: &'a dyn TransactionLike,
    options: &'a DescribeOptions,
}

fn write_cell(
    f: &mut fmt::Formatter,
    index: usize,
    cell: &Cell,
    show_type: bool,
    show_data: bool,
) -> fmt::Result {
    write!(
        f,
        "  - #{} capacity: {:#}, lock: {:#x}",
        index,
        HumanCapacity(cell.capacity()),
        cell.lock().hash()
    )?;
    if show_type {
        match cell.type_script() {
            Some(script) => write!(f, ", type: {:#x}", script.hash())?,
            None => write!(f, ", type: none")?,
        }
    }
    if show_data {
        write!(f, ", data: {}", bytes_to_hex(&cell.data))?;
    }
    writeln!(f)
}

impl<'a> fmt::Display for Describe<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (tx, options) = (self.tx, self.options);
        if options.show_cell_deps {
            writeln!(f, "Cell Deps:")?;
            for dep in tx.cell_deps() {
                let dep_type = match dep.dep_type {
                    DepType::Code => "code",
                    DepType::DepGroup => "dep_group",
                };
                writeln!(f, "  - {} {}", dep_type, dep.out_point)?;
            }
        }
        if options.show_inputs {
            writeln!(f, "Inputs:")?;
            for (i, input) in tx.inputs().iter().enumerate() {
                write_cell(
                    f,
                    i,
                    &input.cell,
                    options.show_input_type,
                    options.show_input_data,
                )?;
            }
        }
        if options.show_outputs {
            writeln!(f, "Outputs:")?;
            for (i, output) in tx.outputs().iter().enumerate() {
                write_cell(
                    f,
                    i,
                    output,
                    options.show_output_type,
                    options.show_output_data,
                )?;
            }
        }
        if options.show_witnesses {
            writeln!(f, "Witnesses:")?;
            for (i, witness) in tx.witnesses().iter().enumerate() {
                writeln!(f, "  - #{} {}", i, bytes_to_hex(witness))?;
            }
        }
        let fee = tx.fee();
        if fee >= 0 {
            match u64::try_from(fee) {
                Ok(fee) => write!(f, "Fee: {:#}", HumanCapacity(fee)),
                Err(_) => write!(f, "Fee: {} shannons", fee),
            }
        } else {
            write!(f, "Fee: missing {} shannons", fee.unsigned_abs())
        }
    }
}

pub fn describe_transaction(tx: &dyn TransactionLike, options: &DescribeOptions) -> String {
    Describe { tx, options }.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::ONE_CKB;
    use crate::locks::SIGHASH_TYPE_HASH;
    use crate::model::{CellDep, LiveCell, OutPoint, Script, ScriptHashType};
    use crate::skeleton::TransactionSkeleton;
    use ckb_types::{bytes::Bytes, H256};

    fn skeleton() -> TransactionSkeleton {
        let lock = Script::new(
            SIGHASH_TYPE_HASH,
            ScriptHashType::Type,
            Bytes::from(vec![1; 20]),
        );
        let mut skeleton = TransactionSkeleton::new();
        skeleton
            .add_cell_deps(vec![CellDep::new(
                OutPoint::new(H256([2; 32]), 0),
                DepType::DepGroup,
            )])
            .unwrap()
            .push_input(LiveCell::new(
                OutPoint::new(H256([1; 32]), 0),
                Cell::with_capacity(1000 * ONE_CKB, lock.clone()),
            ))
            .unwrap()
            .push_output(Cell::new(
                crate::model::CellOutput::new(500 * ONE_CKB, lock),
                Bytes::from_static(b"\x01\x02"),
            ))
            .unwrap()
            .push_witness(Bytes::from_static(b"\xff"))
            .unwrap();
        skeleton
    }

    #[test]
    fn test_default_options() {
        let text = describe_transaction(&skeleton(), &DescribeOptions::default());
        assert!(text.contains("Cell Deps:\n  - dep_group 0x0202"));
        assert!(text.contains("  - #0 capacity: 1000.0 (CKB)"));
        assert!(text.contains("type: none, data: 0x0102"));
        assert!(!text.contains("Witnesses:"));
        assert!(text.ends_with("Fee: 500.0 (CKB)"));
    }

    #[test]
    fn test_toggles() {
        let options = DescribeOptions {
            show_cell_deps: false,
            show_output_data: false,
            ..DescribeOptions::all()
        };
        let text = describe_transaction(&skeleton(), &options);
        assert!(!text.contains("Cell Deps:"));
        assert!(!text.contains("data: 0x0102"));
        assert!(text.contains("Witnesses:\n  - #0 0xff"));
    }
}
