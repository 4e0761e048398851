//! Interfaces to the collaborators around the ptnet core.
//!
//! The core never touches a bus, an interrupt controller or a network stack
//! directly. The OS glue hands in implementations of these traits when it
//! creates a [`PtnetDevice`](crate::PtnetDevice).

use core::ptr::NonNull;

use axerrno::AxResult;
use memory_addr::PhysAddr;

use crate::kring::Direction;
use crate::notify::QueueId;

/// The device I/O window. Every access is a fixed-width 32-bit register
/// access at an offset from [`crate::regs`].
pub trait IoWindow: Send + Sync {
    /// Reads the register at `offset`.
    fn read32(&self, offset: usize) -> u32;
    /// Writes `val` to the register at `offset`.
    fn write32(&self, offset: usize, val: u32);
}

/// Allocation of memory shared with the host.
pub trait DmaHal: Send + Sync {
    /// Allocates `size` bytes of zeroed, physically contiguous memory aligned
    /// to at least 4 KiB.
    ///
    /// Returns the physical address the host will use and the virtual address
    /// the guest will use.
    fn dma_alloc(&self, size: usize) -> AxResult<(PhysAddr, NonNull<u8>)>;

    /// Releases memory obtained from [`DmaHal::dma_alloc`].
    ///
    /// # Safety
    ///
    /// `paddr`, `vaddr` and `size` must come from a single successful
    /// `dma_alloc` call, and the memory must not be used afterwards.
    unsafe fn dma_dealloc(&self, paddr: PhysAddr, vaddr: NonNull<u8>, size: usize);
}

/// Handle returned by [`IrqController::setup_irq`], passed back on teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqCookie(pub usize);

/// The OS interrupt subsystem.
///
/// The core asks for one vector per ring and registers one handler per queue.
/// When a vector fires, the OS glue calls
/// [`PtnetDevice::handle_irq`](crate::PtnetDevice::handle_irq) with the queue
/// identity it was given in `setup_irq`.
pub trait IrqController: Send + Sync {
    /// Number of vectors the device could be given.
    fn max_vectors(&self) -> usize;
    /// Allocates `count` vectors. Returns the number actually allocated.
    fn alloc_vectors(&self, count: usize) -> AxResult<usize>;
    /// Wires `vector` to the handler for `queue`.
    fn setup_irq(&self, vector: usize, queue: QueueId) -> AxResult<IrqCookie>;
    /// Unwires a handler installed by `setup_irq`.
    fn teardown_irq(&self, vector: usize, cookie: IrqCookie);
    /// Releases every vector obtained from `alloc_vectors`.
    fn release_vectors(&self);
}

/// The generic network-interface object above the driver.
pub trait NetStack: Send + Sync {
    /// More work is available on a ring: freed TX slots or filled RX slots.
    fn ring_event(&self, dir: Direction, ring: usize);
    /// RX ring `ring` may hold data that arrived while host interrupts were
    /// suppressed and must be drained without waiting for an interrupt.
    fn schedule_rx_drain(&self, ring: usize);
}
