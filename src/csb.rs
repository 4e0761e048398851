//! Communication Status Block (CSB).
//!
//! The CSB is an array of [`CsbRing`] entries in memory shared between the
//! guest and the host, one entry per ring: TX rings first, then RX rings.
//!
//! # Ownership of fields
//!
//! Every field has exactly one writer:
//!
//! | Field             | Writer | Meaning                                   |
//! |-------------------|--------|-------------------------------------------|
//! | `head`, `cur`     | guest  | guest ring cursors                        |
//! | `guest_need_kick` | guest  | guest wants host->guest interrupts        |
//! | `sync_flags`      | guest  | flags of the sync that requested a kick   |
//! | `hwcur`, `hwtail` | host   | host consumed / produced positions        |
//! | `host_need_kick`  | host   | host wants guest->host kicks              |
//!
//! The fields are private. The guest only reaches them through
//! [`GuestRing`], the host through [`HostRing`], so each side can only store
//! to its own half.
//!
//! Before REGIF the host does not look at ring state. During that window the
//! guest seeds `host_need_kick`, and while handling REGIF the host seeds the
//! initial `head`/`cur`. These are the only cross-writes, and both views mark
//! them explicitly.

use alloc::sync::Arc;
use core::mem::size_of;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};

use axerrno::{AxError, AxResult};
use memory_addr::PhysAddr;

use crate::hal::DmaHal;

/// One CSB entry. 32 bytes, guest half first.
#[repr(C)]
pub struct CsbRing {
    head: AtomicU32,
    cur: AtomicU32,
    guest_need_kick: AtomicU32,
    sync_flags: AtomicU32,
    hwcur: AtomicU32,
    hwtail: AtomicU32,
    host_need_kick: AtomicU32,
    _pad: [u8; 4],
}

/// Size of one CSB entry on the wire.
pub const CSB_RING_SIZE: usize = 32;

const _: () = assert!(size_of::<CsbRing>() == CSB_RING_SIZE);

#[inline]
fn flag(v: bool) -> u32 {
    v as u32
}

/// The guest's view of one CSB entry.
#[derive(Clone, Copy)]
pub struct GuestRing<'a>(&'a CsbRing);

impl<'a> GuestRing<'a> {
    /// Publishes the guest cursors. `head` is stored last: once the host
    /// observes a new `head`, the matching `cur` is already visible.
    #[inline]
    pub fn publish_cursors(&self, head: u32, cur: u32) {
        self.0.cur.store(cur, Ordering::Release);
        self.0.head.store(head, Ordering::Release);
    }

    #[inline]
    pub fn set_guest_need_kick(&self, enable: bool) {
        self.0.guest_need_kick.store(flag(enable), Ordering::SeqCst);
    }

    #[inline]
    pub fn set_sync_flags(&self, flags: u32) {
        self.0.sync_flags.store(flags, Ordering::Release);
    }

    /// Reads the host cursors as `(hwtail, hwcur)`; `hwtail` is loaded first.
    #[inline]
    pub fn host_cursors(&self) -> (u32, u32) {
        let hwtail = self.0.hwtail.load(Ordering::Acquire);
        let hwcur = self.0.hwcur.load(Ordering::Acquire);
        (hwtail, hwcur)
    }

    #[inline]
    pub fn host_need_kick(&self) -> bool {
        self.0.host_need_kick.load(Ordering::SeqCst) != 0
    }

    #[inline]
    pub fn head(&self) -> u32 {
        self.0.head.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn cur(&self) -> u32 {
        self.0.cur.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn guest_need_kick(&self) -> bool {
        self.0.guest_need_kick.load(Ordering::Relaxed) != 0
    }

    /// Seeds the host-owned `host_need_kick` flag.
    ///
    /// Only valid while no REGIF is in effect on the ring set.
    #[inline]
    pub(crate) fn preset_host_need_kick(&self, enable: bool) {
        self.0.host_need_kick.store(flag(enable), Ordering::SeqCst);
    }
}

/// The host's view of one CSB entry.
#[derive(Clone, Copy)]
pub struct HostRing<'a>(&'a CsbRing);

impl<'a> HostRing<'a> {
    /// Publishes the host cursors, `hwtail` last.
    #[inline]
    pub fn publish(&self, hwcur: u32, hwtail: u32) {
        self.0.hwcur.store(hwcur, Ordering::Release);
        self.0.hwtail.store(hwtail, Ordering::Release);
    }

    #[inline]
    pub fn set_host_need_kick(&self, enable: bool) {
        self.0.host_need_kick.store(flag(enable), Ordering::SeqCst);
    }

    /// Reads the guest cursors as `(head, cur)`; `head` is loaded first.
    #[inline]
    pub fn guest_cursors(&self) -> (u32, u32) {
        let head = self.0.head.load(Ordering::Acquire);
        let cur = self.0.cur.load(Ordering::Acquire);
        (head, cur)
    }

    #[inline]
    pub fn guest_need_kick(&self) -> bool {
        self.0.guest_need_kick.load(Ordering::SeqCst) != 0
    }

    #[inline]
    pub fn sync_flags(&self) -> u32 {
        self.0.sync_flags.load(Ordering::Acquire)
    }

    #[inline]
    pub fn hwcur(&self) -> u32 {
        self.0.hwcur.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn hwtail(&self) -> u32 {
        self.0.hwtail.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn host_need_kick(&self) -> bool {
        self.0.host_need_kick.load(Ordering::Relaxed) != 0
    }

    /// Seeds the guest-owned `head`/`cur` cursors.
    ///
    /// Only valid while handling REGIF, before the guest pulls ring state.
    #[inline]
    pub fn init_guest_cursors(&self, head: u32, cur: u32) {
        self.0.cur.store(cur, Ordering::Release);
        self.0.head.store(head, Ordering::Release);
    }
}

/// Host-side access to a CSB the guest installed through CSBBAH/CSBBAL.
pub struct HostCsb<'a> {
    rings: &'a [CsbRing],
}

impl<'a> HostCsb<'a> {
    /// Builds a host view over `num_rings` entries at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to a live CSB of at least `num_rings` entries that
    /// stays mapped for `'a`, and must be 4-byte aligned.
    pub unsafe fn from_raw(base: NonNull<u8>, num_rings: usize) -> Self {
        // SAFETY: upheld by the caller; all fields are atomics or padding.
        let rings =
            unsafe { core::slice::from_raw_parts(base.as_ptr() as *const CsbRing, num_rings) };
        Self { rings }
    }

    pub fn num_rings(&self) -> usize {
        self.rings.len()
    }

    pub fn ring(&self, index: usize) -> Option<HostRing<'a>> {
        self.rings.get(index).map(HostRing)
    }
}

/// The guest-owned CSB allocation.
///
/// Dropping it returns the memory to the [`DmaHal`]. Callers must have told
/// the host to stop referencing the block (zero CSBBAH/CSBBAL) first.
pub struct Csb {
    dma: Arc<dyn DmaHal>,
    paddr: PhysAddr,
    base: NonNull<u8>,
    size: usize,
    num_rings: usize,
}

// SAFETY: the block only holds atomics, shared access is what it is for.
unsafe impl Send for Csb {}
unsafe impl Sync for Csb {}

impl Csb {
    /// Allocates a zeroed CSB with room for `num_rings` entries.
    pub fn alloc(dma: Arc<dyn DmaHal>, num_rings: usize) -> AxResult<Self> {
        if num_rings == 0 {
            return Err(AxError::InvalidInput);
        }
        let size = num_rings
            .checked_mul(CSB_RING_SIZE)
            .ok_or(AxError::NoMemory)?;
        let (paddr, base) = dma.dma_alloc(size).map_err(|e| {
            warn!("CSB allocation of {} bytes failed: {:?}", size, e);
            AxError::NoMemory
        })?;
        if base.as_ptr() as usize % core::mem::align_of::<CsbRing>() != 0 {
            error!("CSB memory at {:p} is misaligned", base.as_ptr());
            // SAFETY: freshly obtained from the same allocator.
            unsafe { dma.dma_dealloc(paddr, base, size) };
            return Err(AxError::InvalidData);
        }
        debug!("CSB: {} rings at {:#x} ({} bytes)", num_rings, paddr.as_usize(), size);
        Ok(Self {
            dma,
            paddr,
            base,
            size,
            num_rings,
        })
    }

    /// Physical address to install through CSBBAH/CSBBAL.
    #[inline]
    pub fn paddr(&self) -> PhysAddr {
        self.paddr
    }

    #[inline]
    pub fn num_rings(&self) -> usize {
        self.num_rings
    }

    fn entries(&self) -> &[CsbRing] {
        // SAFETY: `base` holds `num_rings` zero-initialised entries for the
        // lifetime of `self`, and all fields are atomics or padding.
        unsafe { core::slice::from_raw_parts(self.base.as_ptr() as *const CsbRing, self.num_rings) }
    }

    /// Guest view of entry `index`.
    #[inline]
    pub fn guest(&self, index: usize) -> Option<GuestRing<'_>> {
        self.entries().get(index).map(GuestRing)
    }

    /// Host view of this block, for in-crate tests that play the host.
    #[cfg(test)]
    pub(crate) fn host_view(&self) -> HostCsb<'_> {
        HostCsb { rings: self.entries() }
    }

    /// Iterates guest views over the entries in `range`.
    pub fn guest_range(
        &self,
        range: core::ops::Range<usize>,
    ) -> impl Iterator<Item = GuestRing<'_>> {
        self.entries()[range].iter().map(GuestRing)
    }
}

impl Drop for Csb {
    fn drop(&mut self) {
        debug!("CSB: releasing {:#x}", self.paddr.as_usize());
        // SAFETY: paddr/base/size come from the `dma_alloc` in `Csb::alloc`.
        unsafe { self.dma.dma_dealloc(self.paddr, self.base, self.size) };
    }
}

impl core::fmt::Debug for Csb {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Csb")
            .field("paddr", &self.paddr)
            .field("num_rings", &self.num_rings)
            .finish()
    }
}
