use std::collections::BTreeSet;

/// Default size of data memory in bytes.
pub const DEFAULT_MEMORY_SIZE: usize = 2048;

/// Largest memory addressable with a 16-bit address.
pub const MEMORY_MAX: usize = 0x10000;

/// Flat, byte-addressable store for RAM and memory-mapped I/O.
/// Zero-initialised; the assembler never writes here.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Memory {
    data: Box<[u8]>,
    /// Addresses currently holding a non-zero byte
    live: BTreeSet<u16>,
}

impl Memory {
    pub fn new(size: usize) -> Self {
        debug_assert!(size > 0 && size <= MEMORY_MAX);
        Memory {
            data: vec![0; size].into_boxed_slice(),
            live: BTreeSet::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn read(&self, addr: usize) -> Option<u8> {
        self.data.get(addr).copied()
    }

    /// Returns `None` without writing if `addr` is out of range.
    pub fn write(&mut self, addr: usize, val: u8) -> Option<()> {
        let cell = self.data.get_mut(addr)?;
        *cell = val;
        if val == 0 {
            self.live.remove(&(addr as u16));
        } else {
            self.live.insert(addr as u16);
        }
        Some(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Every non-zero byte with its address, in address order.
    pub fn nonzero(&self) -> Vec<(u16, u8)> {
        self.live
            .iter()
            .map(|&addr| (addr, self.data[addr as usize]))
            .collect()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Memory::new(DEFAULT_MEMORY_SIZE)
    }
}
