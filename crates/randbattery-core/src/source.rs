//! Bit sources and the fixed-size buffers the execution loop pulls from them.
//!
//! Every source implements the [`BitSource`] trait. A fill that returns
//! fewer bytes than requested is a short read: the source is exhausted and
//! the run ends.

use std::io::{self, BufRead, Read};

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};

/// A stream of bytes to test, consumed front to back.
pub trait BitSource: Send {
    /// Short human-readable identifier, echoed into the report.
    fn name(&self) -> String;

    /// Fill `buf` as far as possible. Returns the number of bytes written;
    /// anything less than `buf.len()` means the source is exhausted.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// One bitstream: the raw bytes plus their MSB-first bit expansion.
///
/// Shared read-only between every configuration that tests it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitBuffer {
    id: usize,
    bytes: Vec<u8>,
    bits: Vec<u8>,
    ones: u64,
}

impl BitBuffer {
    pub fn new(id: usize, bytes: Vec<u8>) -> Self {
        let bits = to_bits(&bytes);
        let ones = bits.iter().map(|&b| b as u64).sum();
        Self {
            id,
            bytes,
            bits,
            ones,
        }
    }

    /// Bitstream sequence index.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// One `u8` per bit, each 0 or 1, most significant bit of each byte first.
    pub fn bits(&self) -> &[u8] {
        &self.bits
    }

    pub fn len_bits(&self) -> usize {
        self.bits.len()
    }

    pub fn ones(&self) -> u64 {
        self.ones
    }

    pub fn zeros(&self) -> u64 {
        self.bits.len() as u64 - self.ones
    }
}

/// Unpack a byte slice into individual bits (MSB first per byte).
pub fn to_bits(data: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(data.len() * 8);
    for &byte in data {
        for shift in (0..8).rev() {
            bits.push((byte >> shift) & 1);
        }
    }
    bits
}

// ---------------------------------------------------------------------------
// Reader-backed sources
// ---------------------------------------------------------------------------

/// Raw binary bytes from any reader (file, stdin, in-memory slice).
pub struct ReaderSource<R> {
    name: String,
    reader: R,
}

impl<R: Read + Send> ReaderSource<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }
}

impl<R: Read + Send> BitSource for ReaderSource<R> {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

/// ASCII text of `'0'`/`'1'` characters; every other byte (whitespace,
/// separators) is skipped. Bits are packed MSB-first.
pub struct AsciiBitSource<R> {
    name: String,
    reader: R,
}

impl<R: BufRead + Send> AsciiBitSource<R> {
    pub fn new(name: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            reader,
        }
    }

    fn next_bit(&mut self) -> io::Result<Option<u8>> {
        loop {
            let (bit, consumed, eof) = {
                let chunk = self.reader.fill_buf()?;
                if chunk.is_empty() {
                    (None, 0, true)
                } else {
                    match chunk.iter().position(|&c| c == b'0' || c == b'1') {
                        Some(pos) => (Some(chunk[pos] - b'0'), pos + 1, false),
                        None => (None, chunk.len(), false),
                    }
                }
            };
            self.reader.consume(consumed);
            if bit.is_some() || eof {
                return Ok(bit);
            }
        }
    }
}

impl<R: BufRead + Send> BitSource for AsciiBitSource<R> {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        for (filled, slot) in buf.iter_mut().enumerate() {
            let mut byte = 0u8;
            for k in 0..8 {
                match self.next_bit()? {
                    Some(bit) => byte = (byte << 1) | bit,
                    None => {
                        if k > 0 {
                            log::warn!("{}: discarding {k} trailing bit(s)", self.name);
                        }
                        return Ok(filled);
                    }
                }
            }
            *slot = byte;
        }
        Ok(buf.len())
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Seed from the OS CSPRNG via the `getrandom` crate.
fn os_seed() -> io::Result<u64> {
    let mut seed = [0u8; 8];
    getrandom::fill(&mut seed).map_err(|e| io::Error::other(format!("OS CSPRNG failed: {e}")))?;
    Ok(u64::from_le_bytes(seed))
}

/// Unbounded pseudo-random bytes from a seeded `StdRng`.
pub struct GeneratorSource {
    seed: u64,
    rng: StdRng,
}

impl GeneratorSource {
    pub fn new(seed: Option<u64>) -> io::Result<Self> {
        let seed = match seed {
            Some(s) => s,
            None => os_seed()?,
        };
        Ok(Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl BitSource for GeneratorSource {
    fn name(&self) -> String {
        format!("stdrng(seed={})", self.seed)
    }

    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.rng.fill_bytes(buf);
        Ok(buf.len())
    }
}

/// Unbounded SHA-256 counter-mode output: block `i` is `SHA-256(seed || i)`.
pub struct Sha256CounterSource {
    seed: u64,
    counter: u64,
    pending: Vec<u8>,
}

impl Sha256CounterSource {
    pub fn new(seed: Option<u64>) -> io::Result<Self> {
        let seed = match seed {
            Some(s) => s,
            None => os_seed()?,
        };
        Ok(Self {
            seed,
            counter: 0,
            pending: Vec::new(),
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    fn next_block(&mut self) -> [u8; 32] {
        let mut h = Sha256::new();
        h.update(self.seed.to_le_bytes());
        h.update(self.counter.to_le_bytes());
        self.counter = self.counter.wrapping_add(1);
        h.finalize().into()
    }
}

impl BitSource for Sha256CounterSource {
    fn name(&self) -> String {
        format!("sha256-counter(seed={})", self.seed)
    }

    fn fill(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            if self.pending.is_empty() {
                let block = self.next_block();
                self.pending.extend_from_slice(&block);
            }
            let take = self.pending.len().min(buf.len() - filled);
            buf[filled..filled + take].copy_from_slice(&self.pending[..take]);
            self.pending.drain(..take);
            filled += take;
        }
        Ok(filled)
    }
}
