//! This implements a memory block allocation structure, primarily for java's Unsafe class which
//! allows it to manually allocate memory.
//! Addresses handed out are not real pointers: the upper 32 bits name a block and the lower 32
//! bits are an offset into it. Every access is checked against the block it lands in, so a bad
//! address from guest code is an error rather than undefined behavior.

use std::{collections::HashMap, sync::Arc};

use jade_base::util::{HashWrapper, HashWrapperTrait};
use parking_lot::Mutex;
use usize_cast::IntoUsize;

/// Handles start at 1 so that the address 0 is never valid, same as a null pointer.
const FIRST_HANDLE: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryAllocError {
    /// Blocks are limited to what an offset can address
    TooLarge(u64),
    /// Negative sizes from guest code
    InvalidSize(i64),
    /// Every handle has been used
    OutOfHandles,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryAccessError {
    /// The address does not point into any live block
    InvalidAddress(i64),
    /// The access starts in a block but runs past its end
    OutOfBounds { address: i64, len: u64 },
    /// Freeing or reallocating must be done with the address the block was allocated with
    NotBlockStart(i64),
}

type BlockMap = HashMap<u32, MemoryBlock, <HashWrapper as HashWrapperTrait<u32>>::HashMapHasher>;

#[derive(Debug, Default)]
struct MemoryBlock {
    data: Vec<u8>,
}

#[derive(Debug)]
struct Blocks {
    blocks: BlockMap,
    /// Handles are never reused, so a freed address can't alias a later allocation
    next_handle: u32,
}

#[derive(Debug)]
pub struct MemoryBlocks {
    inner: Mutex<Blocks>,
}
impl Default for MemoryBlocks {
    fn default() -> Self {
        MemoryBlocks {
            inner: Mutex::new(Blocks {
                blocks: BlockMap::default(),
                next_handle: FIRST_HANDLE,
            }),
        }
    }
}

fn split_address(address: i64) -> (u32, u32) {
    let address = address as u64;
    ((address >> 32) as u32, address as u32)
}

fn make_address(handle: u32, offset: u32) -> i64 {
    ((u64::from(handle) << 32) | u64::from(offset)) as i64
}

impl MemoryBlocks {
    /// Allocate a zeroed block.
    /// A zero sized allocation gives back the null address, as Unsafe expects.
    pub fn allocate(&self, size: u64) -> Result<i64, MemoryAllocError> {
        if size == 0 {
            return Ok(0);
        }
        let size = u32::try_from(size).map_err(|_| MemoryAllocError::TooLarge(size))?;

        let mut inner = self.inner.lock();
        let handle = inner.next_handle;
        inner.next_handle = handle
            .checked_add(1)
            .ok_or(MemoryAllocError::OutOfHandles)?;
        inner.blocks.insert(
            handle,
            MemoryBlock {
                data: vec![0; size.into_usize()],
            },
        );

        tracing::trace!("Allocated block {} of {} bytes", handle, size);

        Ok(make_address(handle, 0))
    }

    /// Resize a block, keeping its contents and its address.
    /// Reallocating the null address is an allocation.
    pub fn reallocate(&self, address: i64, size: u64) -> Result<i64, MemoryAllocError> {
        if address == 0 {
            return self.allocate(size);
        }

        let new_size = u32::try_from(size).map_err(|_| MemoryAllocError::TooLarge(size))?;
        let (handle, offset) = split_address(address);
        let mut inner = self.inner.lock();
        match inner.blocks.get_mut(&handle) {
            Some(block) if offset == 0 => {
                block.data.resize(new_size.into_usize(), 0);
                Ok(address)
            }
            // Unsafe's behavior for a bad address is undefined, we just treat it as a fresh
            // allocation after logging it.
            _ => {
                tracing::warn!("Reallocation of invalid address {:#x}", address);
                drop(inner);
                self.allocate(size)
            }
        }
    }

    /// Free a block. Freeing the null address does nothing.
    pub fn free(&self, address: i64) -> Result<(), MemoryAccessError> {
        if address == 0 {
            return Ok(());
        }

        let (handle, offset) = split_address(address);
        if offset != 0 {
            return Err(MemoryAccessError::NotBlockStart(address));
        }

        self.inner
            .lock()
            .blocks
            .remove(&handle)
            .map(|_| ())
            .ok_or(MemoryAccessError::InvalidAddress(address))
    }

    #[must_use]
    pub fn is_live(&self, address: i64) -> bool {
        let (handle, _) = split_address(address);
        self.inner.lock().blocks.contains_key(&handle)
    }

    /// Run a function on the bytes `[address, address + len)`
    fn with_range<R>(
        &self,
        address: i64,
        len: u64,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R, MemoryAccessError> {
        let (handle, offset) = split_address(address);
        let mut inner = self.inner.lock();
        let block = inner
            .blocks
            .get_mut(&handle)
            .ok_or(MemoryAccessError::InvalidAddress(address))?;

        let start = offset.into_usize();
        let end = usize::try_from(len)
            .ok()
            .and_then(|len| start.checked_add(len))
            .filter(|end| *end <= block.data.len())
            .ok_or(MemoryAccessError::OutOfBounds { address, len })?;

        Ok(f(&mut block.data[start..end]))
    }

    fn read_amount<const N: usize>(&self, address: i64) -> Result<[u8; N], MemoryAccessError> {
        self.with_range(address, N as u64, |bytes| {
            let mut result = [0u8; N];
            result.copy_from_slice(bytes);
            result
        })
    }

    fn write_amount<const N: usize>(
        &self,
        address: i64,
        value: [u8; N],
    ) -> Result<(), MemoryAccessError> {
        self.with_range(address, N as u64, |bytes| bytes.copy_from_slice(&value))
    }

    pub fn get_i8_ne(&self, address: i64) -> Result<i8, MemoryAccessError> {
        self.read_amount(address).map(i8::from_ne_bytes)
    }

    pub fn get_i16_ne(&self, address: i64) -> Result<i16, MemoryAccessError> {
        self.read_amount(address).map(i16::from_ne_bytes)
    }

    pub fn get_u16_ne(&self, address: i64) -> Result<u16, MemoryAccessError> {
        self.read_amount(address).map(u16::from_ne_bytes)
    }

    pub fn get_i32_ne(&self, address: i64) -> Result<i32, MemoryAccessError> {
        self.read_amount(address).map(i32::from_ne_bytes)
    }

    pub fn get_i64_ne(&self, address: i64) -> Result<i64, MemoryAccessError> {
        self.read_amount(address).map(i64::from_ne_bytes)
    }

    pub fn get_f32_ne(&self, address: i64) -> Result<f32, MemoryAccessError> {
        self.read_amount(address).map(f32::from_ne_bytes)
    }

    pub fn get_f64_ne(&self, address: i64) -> Result<f64, MemoryAccessError> {
        self.read_amount(address).map(f64::from_ne_bytes)
    }

    pub fn set_i8_ne(&self, address: i64, val: i8) -> Result<(), MemoryAccessError> {
        self.write_amount(address, val.to_ne_bytes())
    }

    pub fn set_i16_ne(&self, address: i64, val: i16) -> Result<(), MemoryAccessError> {
        self.write_amount(address, val.to_ne_bytes())
    }

    pub fn set_u16_ne(&self, address: i64, val: u16) -> Result<(), MemoryAccessError> {
        self.write_amount(address, val.to_ne_bytes())
    }

    pub fn set_i32_ne(&self, address: i64, val: i32) -> Result<(), MemoryAccessError> {
        self.write_amount(address, val.to_ne_bytes())
    }

    pub fn set_i64_ne(&self, address: i64, val: i64) -> Result<(), MemoryAccessError> {
        self.write_amount(address, val.to_ne_bytes())
    }

    pub fn set_f32_ne(&self, address: i64, val: f32) -> Result<(), MemoryAccessError> {
        self.write_amount(address, val.to_ne_bytes())
    }

    pub fn set_f64_ne(&self, address: i64, val: f64) -> Result<(), MemoryAccessError> {
        self.write_amount(address, val.to_ne_bytes())
    }

    /// Atomically replace the i32 at the address if it currently holds `expected`
    pub fn compare_and_set_i32(
        &self,
        address: i64,
        expected: i32,
        new: i32,
    ) -> Result<bool, MemoryAccessError> {
        self.with_range(address, 4, |bytes| {
            let mut current = [0u8; 4];
            current.copy_from_slice(bytes);
            if i32::from_ne_bytes(current) == expected {
                bytes.copy_from_slice(&new.to_ne_bytes());
                true
            } else {
                false
            }
        })
    }

    /// Atomically replace the i64 at the address if it currently holds `expected`
    pub fn compare_and_set_i64(
        &self,
        address: i64,
        expected: i64,
        new: i64,
    ) -> Result<bool, MemoryAccessError> {
        self.with_range(address, 8, |bytes| {
            let mut current = [0u8; 8];
            current.copy_from_slice(bytes);
            if i64::from_ne_bytes(current) == expected {
                bytes.copy_from_slice(&new.to_ne_bytes());
                true
            } else {
                false
            }
        })
    }

    pub fn write_repeat(&self, address: i64, count: u64, val: u8) -> Result<(), MemoryAccessError> {
        if count == 0 {
            return Ok(());
        }
        self.with_range(address, count, |bytes| bytes.fill(val))
    }

    pub fn write_slice(&self, address: i64, slice: &[u8]) -> Result<(), MemoryAccessError> {
        if slice.is_empty() {
            return Ok(());
        }
        self.with_range(address, slice.len() as u64, |bytes| {
            bytes.copy_from_slice(slice);
        })
    }

    pub fn read_slice(&self, address: i64, count: u64) -> Result<Vec<u8>, MemoryAccessError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        self.with_range(address, count, |bytes| bytes.to_vec())
    }

    /// Copy bytes between (possibly the same, possibly overlapping) blocks
    pub fn copy(&self, src: i64, dst: i64, count: u64) -> Result<(), MemoryAccessError> {
        let data = self.read_slice(src, count)?;
        self.write_slice(dst, &data)
    }
}

/// A block owned by a single object.
/// The block is freed when this is dropped, so it lives exactly as long as its owner.
#[derive(Debug)]
pub struct PinnedBlock {
    blocks: Arc<MemoryBlocks>,
    address: i64,
}
impl PinnedBlock {
    pub fn allocate(blocks: Arc<MemoryBlocks>, size: u64) -> Result<PinnedBlock, MemoryAllocError> {
        // Zero sized pins still get a real block so that the address is unique
        let address = blocks.allocate(size.max(1))?;
        Ok(PinnedBlock { blocks, address })
    }

    #[must_use]
    pub fn address(&self) -> i64 {
        self.address
    }
}
impl Drop for PinnedBlock {
    fn drop(&mut self) {
        if let Err(err) = self.blocks.free(self.address) {
            tracing::warn!("Pinned block {:#x} was already freed: {:?}", self.address, err);
        }
    }
}
