//! Transaction wire codec
//!
//! Full (prefix + witness) serialization as used by the wallet backend.
//! Only what the bridge needs is implemented: building unsigned
//! transactions from selected outputs and decoding fee/size for history.

use crate::error::BridgeError;
use crate::types::{Amount, Hash, OutputKey, Tree};

pub const TX_VERSION: u16 = 1;
pub const SER_TYPE_FULL: u16 = 0;
pub const SEQUENCE_FINAL: u32 = u32::MAX;
pub const DEFAULT_SCRIPT_VERSION: u16 = 0;

/// Reference to a previous output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
    pub tree: Tree,
}

impl From<&OutPoint> for OutputKey {
    fn from(op: &OutPoint) -> Self {
        OutputKey::new(op.hash, op.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub previous_outpoint: OutPoint,
    pub sequence: u32,
    pub value_in: Amount,
    pub block_height: u32,
    pub block_index: u32,
    pub signature_script: Vec<u8>,
}

impl TxIn {
    /// Unsigned input spending `outpoint` worth `value_in`
    pub fn new(previous_outpoint: OutPoint, value_in: Amount) -> Self {
        Self {
            previous_outpoint,
            sequence: SEQUENCE_FINAL,
            value_in,
            block_height: 0,
            block_index: u32::MAX,
            signature_script: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    pub value: Amount,
    pub script_version: u16,
    pub pk_script: Vec<u8>,
}

impl TxOut {
    pub fn new(value: Amount, pk_script: Vec<u8>) -> Self {
        Self {
            value,
            script_version: DEFAULT_SCRIPT_VERSION,
            pk_script,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireTx {
    pub version: u16,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
    pub expiry: u32,
}

impl Default for WireTx {
    fn default() -> Self {
        Self {
            version: TX_VERSION,
            inputs: Vec::new(),
            outputs: Vec::new(),
            lock_time: 0,
            expiry: 0,
        }
    }
}

impl WireTx {
    pub fn total_in(&self) -> Amount {
        self.inputs.iter().map(|i| i.value_in).sum()
    }

    pub fn total_out(&self) -> Amount {
        self.outputs.iter().map(|o| o.value).sum()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialize_size());
        let version = (self.version as u32) | ((SER_TYPE_FULL as u32) << 16);
        buf.extend_from_slice(&version.to_le_bytes());

        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            let op = &input.previous_outpoint;
            buf.extend_from_slice(op.hash.as_bytes());
            buf.extend_from_slice(&op.index.to_le_bytes());
            buf.push(op.tree.as_u8());
            buf.extend_from_slice(&input.sequence.to_le_bytes());
        }

        write_varint(&mut buf, self.outputs.len() as u64);
        for output in &self.outputs {
            buf.extend_from_slice(&output.value.atoms().to_le_bytes());
            buf.extend_from_slice(&output.script_version.to_le_bytes());
            write_varint(&mut buf, output.pk_script.len() as u64);
            buf.extend_from_slice(&output.pk_script);
        }

        buf.extend_from_slice(&self.lock_time.to_le_bytes());
        buf.extend_from_slice(&self.expiry.to_le_bytes());

        write_varint(&mut buf, self.inputs.len() as u64);
        for input in &self.inputs {
            buf.extend_from_slice(&input.value_in.atoms().to_le_bytes());
            buf.extend_from_slice(&input.block_height.to_le_bytes());
            buf.extend_from_slice(&input.block_index.to_le_bytes());
            write_varint(&mut buf, input.signature_script.len() as u64);
            buf.extend_from_slice(&input.signature_script);
        }
        buf
    }

    pub fn serialize_size(&self) -> usize {
        let n_in = self.inputs.len() as u64;
        let mut size = 4 + varint_size(n_in) + 4 + 4 + varint_size(n_in);
        size += varint_size(self.outputs.len() as u64);
        for input in &self.inputs {
            size += 32 + 4 + 1 + 4;
            size += 8 + 4 + 4 + varint_size(input.signature_script.len() as u64);
            size += input.signature_script.len();
        }
        for output in &self.outputs {
            size += 8 + 2 + varint_size(output.pk_script.len() as u64) + output.pk_script.len();
        }
        size
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, BridgeError> {
        let mut r = Reader::new(bytes);
        let version = r.u32()?;
        let ser_type = (version >> 16) as u16;
        if ser_type != SER_TYPE_FULL {
            return Err(BridgeError::malformed(format!(
                "unsupported serialization type {}",
                ser_type
            )));
        }

        let n_in = r.count()?;
        let mut inputs = Vec::with_capacity(n_in);
        for _ in 0..n_in {
            let hash = Hash::from_bytes(r.array32()?);
            let index = r.u32()?;
            let tree_byte = r.u8()?;
            let tree = Tree::from_u8(tree_byte)
                .ok_or_else(|| BridgeError::malformed(format!("invalid tree {}", tree_byte)))?;
            let sequence = r.u32()?;
            inputs.push(TxIn {
                previous_outpoint: OutPoint { hash, index, tree },
                sequence,
                value_in: Amount::ZERO,
                block_height: 0,
                block_index: 0,
                signature_script: Vec::new(),
            });
        }

        let n_out = r.count()?;
        let mut outputs = Vec::with_capacity(n_out);
        for _ in 0..n_out {
            let value = Amount(r.i64()?);
            let script_version = r.u16()?;
            let pk_script = r.var_bytes()?;
            outputs.push(TxOut {
                value,
                script_version,
                pk_script,
            });
        }

        let lock_time = r.u32()?;
        let expiry = r.u32()?;

        let n_witness = r.count()?;
        if n_witness != inputs.len() {
            return Err(BridgeError::malformed(format!(
                "witness count {} does not match input count {}",
                n_witness,
                inputs.len()
            )));
        }
        for input in inputs.iter_mut() {
            input.value_in = Amount(r.i64()?);
            input.block_height = r.u32()?;
            input.block_index = r.u32()?;
            input.signature_script = r.var_bytes()?;
        }

        if !r.is_empty() {
            return Err(BridgeError::malformed(format!(
                "{} trailing bytes",
                r.remaining()
            )));
        }

        Ok(Self {
            version: version as u16,
            inputs,
            outputs,
            lock_time,
            expiry,
        })
    }
}

/// Fee, size and fee rate decoded from a serialized transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSizeRate {
    pub fee: Amount,
    pub size: usize,
    /// Atoms per kB
    pub fee_rate: Amount,
}

pub fn fee_size_rate(bytes: &[u8]) -> Result<FeeSizeRate, BridgeError> {
    let tx = WireTx::deserialize(bytes)?;
    let fee = tx.total_in() - tx.total_out();
    let size = bytes.len();
    let fee_rate = if size == 0 {
        Amount::ZERO
    } else {
        Amount(fee.atoms() * 1000 / size as i64)
    };
    Ok(FeeSizeRate { fee, size, fee_rate })
}

// ============================================================================
// Varints and reader
// ============================================================================

pub fn varint_size(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

pub fn write_varint(buf: &mut Vec<u8>, n: u64) {
    match n {
        0..=0xfc => buf.push(n as u8),
        0xfd..=0xffff => {
            buf.push(0xfd);
            buf.extend_from_slice(&(n as u16).to_le_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            buf.push(0xfe);
            buf.extend_from_slice(&(n as u32).to_le_bytes());
        }
        _ => {
            buf.push(0xff);
            buf.extend_from_slice(&n.to_le_bytes());
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], BridgeError> {
        if self.remaining() < n {
            return Err(BridgeError::malformed(format!(
                "truncated: need {} bytes at offset {}, {} left",
                n,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn fixed<const N: usize>(&mut self) -> Result<[u8; N], BridgeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, BridgeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, BridgeError> {
        Ok(u16::from_le_bytes(self.fixed()?))
    }

    fn u32(&mut self) -> Result<u32, BridgeError> {
        Ok(u32::from_le_bytes(self.fixed()?))
    }

    fn i64(&mut self) -> Result<i64, BridgeError> {
        Ok(i64::from_le_bytes(self.fixed()?))
    }

    fn array32(&mut self) -> Result<[u8; 32], BridgeError> {
        self.fixed()
    }

    fn varint(&mut self) -> Result<u64, BridgeError> {
        Ok(match self.u8()? {
            0xfd => u16::from_le_bytes(self.fixed()?) as u64,
            0xfe => u32::from_le_bytes(self.fixed()?) as u64,
            0xff => u64::from_le_bytes(self.fixed()?),
            b => b as u64,
        })
    }

    /// Element count, bounded by the bytes left so a bad prefix can't
    /// trigger a huge allocation
    fn count(&mut self) -> Result<usize, BridgeError> {
        let n = self.varint()?;
        if n > self.remaining() as u64 {
            return Err(BridgeError::malformed(format!("count {} exceeds payload", n)));
        }
        Ok(n as usize)
    }

    fn var_bytes(&mut self) -> Result<Vec<u8>, BridgeError> {
        let len = self.count()?;
        Ok(self.take(len)?.to_vec())
    }
}
