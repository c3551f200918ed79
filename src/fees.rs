//! Size-based fee estimation

use crate::types::Amount;
use crate::wire::varint_size;

/// Default relay fee, atoms per kB
pub const DEFAULT_RELAY_FEE_PER_KB: i64 = 10_000;

/// Serialized size of a P2PKH-spending input, prefix + witness with signature
pub const REDEEM_P2PKH_INPUT_SIZE: usize = 32 + 4 + 1 + 4 + 8 + 4 + 4 + 1 + 108;

/// Size of a P2PKH output script
pub const P2PKH_PK_SCRIPT_SIZE: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimator {
    pub relay_fee_per_kb: Amount,
}

impl Default for FeeEstimator {
    fn default() -> Self {
        Self {
            relay_fee_per_kb: Amount(DEFAULT_RELAY_FEE_PER_KB),
        }
    }
}

impl FeeEstimator {
    pub fn new(relay_fee_per_kb: Amount) -> Self {
        Self { relay_fee_per_kb }
    }

    /// Estimated serialized size of a signed transaction
    pub fn estimate_size(&self, input_count: usize, output_script_sizes: &[usize]) -> usize {
        let outputs: usize = output_script_sizes
            .iter()
            .map(|len| 8 + 2 + varint_size(*len as u64) + len)
            .sum();
        12 + 2 * varint_size(input_count as u64)
            + varint_size(output_script_sizes.len() as u64)
            + input_count * REDEEM_P2PKH_INPUT_SIZE
            + outputs
    }

    pub fn estimate_fee(&self, size: usize) -> Amount {
        Amount(size as i64 * self.relay_fee_per_kb.atoms() / 1000)
    }

    /// Fee for `input_count` P2PKH inputs paying `output_count` P2PKH outputs
    pub fn fee_for(&self, input_count: usize, output_count: usize) -> Amount {
        let scripts = vec![P2PKH_PK_SCRIPT_SIZE; output_count];
        self.estimate_fee(self.estimate_size(input_count, &scripts))
    }
}
