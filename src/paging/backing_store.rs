//! Backing Store I/O
//!
//! Whole-page transfers between a frame-sized buffer and the flat backing
//! region. Store `s`, page `p` lives at
//! `BACKING_STORE_BASE + s * BACKING_STORE_UNIT_SIZE + p * PAGE_SIZE`.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use crate::error::{DeviceError, PagingError, Result};
use crate::paging::vm_param::{
    BACKING_STORE_BASE, BACKING_STORE_UNIT_SIZE, MAX_STORES, PAGE_SIZE, STORE_PAGES,
};
use crate::types::StoreId;

/// End of the flat backing region
pub const BACKING_STORE_END: usize = BACKING_STORE_BASE + MAX_STORES * BACKING_STORE_UNIT_SIZE;

/// Byte offset of a store page in the flat backing region
pub const fn store_offset(store: StoreId, page: usize) -> usize {
    BACKING_STORE_BASE + store.0 * BACKING_STORE_UNIT_SIZE + page * PAGE_SIZE
}

// ============================================================================
// Device
// ============================================================================

/// Block device holding the flat backing region
///
/// Offsets are absolute addresses in the region and always page aligned;
/// buffers are exactly one page.
pub trait BackingDevice {
    fn read_block(&mut self, offset: usize, buf: &mut [u8]) -> core::result::Result<(), DeviceError>;

    fn write_block(&mut self, offset: usize, buf: &[u8]) -> core::result::Result<(), DeviceError>;
}

/// In-memory device that only stores pages that were written
///
/// Unwritten pages read back as zeros.
#[derive(Debug, Default)]
pub struct SparseDevice {
    pages: BTreeMap<usize, Box<[u8]>>,
}

impl SparseDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages ever written
    pub fn written_pages(&self) -> usize {
        self.pages.len()
    }

    fn check(offset: usize) -> core::result::Result<(), DeviceError> {
        if !(BACKING_STORE_BASE..BACKING_STORE_END).contains(&offset) || offset % PAGE_SIZE != 0 {
            return Err(DeviceError::OutOfRange(offset));
        }
        Ok(())
    }
}

impl BackingDevice for SparseDevice {
    fn read_block(&mut self, offset: usize, buf: &mut [u8]) -> core::result::Result<(), DeviceError> {
        Self::check(offset)?;
        match self.pages.get(&offset) {
            Some(page) => buf.copy_from_slice(page),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_block(&mut self, offset: usize, buf: &[u8]) -> core::result::Result<(), DeviceError> {
        Self::check(offset)?;
        self.pages.insert(offset, Box::from(buf));
        Ok(())
    }
}

// ============================================================================
// Page Transfers
// ============================================================================

/// Validated page transfers over a backing device
pub struct BackingStore {
    device: Box<dyn BackingDevice>,
}

impl BackingStore {
    pub fn new(device: Box<dyn BackingDevice>) -> Self {
        Self { device }
    }

    /// Swap the device, returning the old one
    pub fn replace_device(&mut self, device: Box<dyn BackingDevice>) -> Box<dyn BackingDevice> {
        core::mem::replace(&mut self.device, device)
    }

    fn validate(buf_len: usize, store: StoreId, page: usize) -> Result<usize> {
        if !store.in_range() {
            return Err(PagingError::BadStore(store.0));
        }
        if page >= STORE_PAGES {
            return Err(PagingError::BadPage(page));
        }
        if buf_len != PAGE_SIZE {
            return Err(PagingError::BadBuffer(buf_len));
        }
        Ok(store_offset(store, page))
    }

    /// Copy one store page into `buf`
    pub fn read_page(&mut self, buf: &mut [u8], store: StoreId, page: usize) -> Result<()> {
        let offset = Self::validate(buf.len(), store, page)?;
        self.device.read_block(offset, buf)?;
        Ok(())
    }

    /// Copy `buf` into one store page
    pub fn write_page(&mut self, buf: &[u8], store: StoreId, page: usize) -> Result<()> {
        let offset = Self::validate(buf.len(), store, page)?;
        self.device.write_block(offset, buf)?;
        Ok(())
    }
}
