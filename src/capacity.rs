use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use crate::error::Error;

/// Shannons per CKByte.
pub const ONE_CKB: u64 = 1_00000000;

pub fn ckbytes_to_shannons(ckbytes: u64) -> u128 {
    u128::from(ckbytes) * u128::from(ONE_CKB)
}

/// Whole CKBytes, truncating the shannon remainder.
pub fn shannons_to_ckbytes(shannons: u128) -> u128 {
    shannons / u128::from(ONE_CKB)
}

/// Narrow an exact capacity sum back to the on-chain `u64`.
pub fn to_u64(shannons: u128) -> Result<u64, Error> {
    u64::try_from(shannons)
        .map_err(|_| Error::CapacityOverflow(format!("{} shannons exceeds u64", shannons)))
}

/// A capacity in shannons that reads and prints as CKBytes, e.g. `100.5`.
#[derive(Default, Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct HumanCapacity(pub u64);

impl From<u64> for HumanCapacity {
    fn from(value: u64) -> HumanCapacity {
        HumanCapacity(value)
    }
}

impl From<HumanCapacity> for u64 {
    fn from(value: HumanCapacity) -> u64 {
        value.0
    }
}

impl Deref for HumanCapacity {
    type Target = u64;
    fn deref(&self) -> &u64 {
        &self.0
    }
}

impl FromStr for HumanCapacity {
    type Err = Error;
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let parts = input
            .trim_end_matches("(CKB)")
            .trim()
            .split('.')
            .collect::<Vec<_>>();
        if parts.len() > 2 {
            return Err(Error::Format(format!("invalid capacity {:?}", input)));
        }
        let whole = parts[0]
            .parse::<u64>()
            .map_err(|err| Error::Format(format!("invalid capacity {:?}: {}", input, err)))?;
        let mut capacity = whole
            .checked_mul(ONE_CKB)
            .ok_or_else(|| Error::CapacityOverflow(format!("{} CKB", whole)))?;
        if let Some(shannon_str) = parts.get(1) {
            let shannon_str = shannon_str.trim();
            if shannon_str.len() > 8 {
                return Err(Error::Format(format!(
                    "decimal part too long: {} {}",
                    shannon_str.len(),
                    shannon_str
                )));
            }
            let mut shannon = shannon_str
                .parse::<u32>()
                .map_err(|err| Error::Format(format!("invalid capacity {:?}: {}", input, err)))?;
            for _ in 0..(8 - shannon_str.len()) {
                shannon *= 10;
            }
            capacity = capacity
                .checked_add(u64::from(shannon))
                .ok_or_else(|| Error::CapacityOverflow(input.to_string()))?;
        }
        Ok(capacity.into())
    }
}

impl fmt::Display for HumanCapacity {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        let ckb_part = self.0 / ONE_CKB;
        let shannon_part = self.0 % ONE_CKB;
        let shannon_part_string = format!("{:0>8}", shannon_part);
        let mut base = 10;
        let mut suffix_zero = 7;
        for i in 0..8 {
            if shannon_part % base > 0 {
                suffix_zero = i;
                break;
            }
            base *= 10;
        }
        let suffix = if f.alternate() { " (CKB)" } else { "" };
        write!(
            f,
            "{}.{}{}",
            ckb_part,
            &shannon_part_string[..(8 - suffix_zero)],
            suffix
        )
    }
}
