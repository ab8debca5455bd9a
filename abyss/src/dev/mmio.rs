// Copyright 2021 Computer Architecture and Systems Lab
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Mmio interface.

use super::DeviceError;
use alloc::boxed::Box;

/// Capability to access a block of 32-bit little-endian device registers.
///
/// Offsets are in bytes from the start of the block.
pub trait Mmio: Send + Sync {
    /// Read the register at `offset`.
    fn read32(&self, offset: usize) -> u32;
    /// Write `value` to the register at `offset`.
    fn write32(&self, offset: usize, value: u32);
}

/// Turns a device base address from the io-map into a register block.
pub trait MmioMapper: Send + Sync {
    /// Map `size` bytes of registers starting at physical address `base`.
    fn map(&self, base: usize, size: usize) -> Result<Box<dyn Mmio>, DeviceError>;
}

/// Representation of Mmio area.
#[repr(transparent)]
#[derive(Debug)]
pub struct MmioArea(core::ops::Range<usize>);

impl MmioArea {
    /// Create a new mmio area.
    ///
    /// # Safety
    /// mmio range should be valid and mapped as device memory.
    #[inline(always)]
    pub const unsafe fn new(n: core::ops::Range<usize>) -> Self {
        Self(n)
    }

    /// Get size of this mmio area.
    #[inline(always)]
    pub const fn size(&self) -> usize {
        self.0.end - self.0.start
    }

    #[inline(always)]
    fn register(&self, offset: usize) -> *mut u32 {
        assert!(
            self.0.start + offset + core::mem::size_of::<u32>() <= self.0.end,
            "{:x} {:x} {:x}",
            self.0.start,
            offset,
            self.0.end,
        );
        (self.0.start + offset) as *mut u32
    }
}

impl Mmio for MmioArea {
    #[inline(always)]
    fn read32(&self, offset: usize) -> u32 {
        unsafe { u32::from_le(core::ptr::read_volatile(self.register(offset))) }
    }

    #[inline(always)]
    fn write32(&self, offset: usize, value: u32) {
        unsafe { core::ptr::write_volatile(self.register(offset), value.to_le()) }
    }
}

/// Mapper for a guest whose device memory is identity mapped.
pub struct IdentityMapper;

impl MmioMapper for IdentityMapper {
    fn map(&self, base: usize, size: usize) -> Result<Box<dyn Mmio>, DeviceError> {
        if base == 0 || base.checked_add(size).is_none() {
            return Err(DeviceError("invalid mmio range"));
        }
        Ok(Box::new(unsafe { MmioArea::new(base..base + size) }))
    }
}
