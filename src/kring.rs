//! Guest-local ring descriptors.
//!
//! A [`Kring`] mirrors one CSB entry into the cursors the network stack and
//! direct-access clients work with. Indices are slot numbers in
//! `[0, num_slots)` and advance modulo the ring size.

use axerrno::{AxError, AxResult};
use bitflags::bitflags;

/// Ring direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Tx,
    Rx,
}

/// Direct-access mode of a ring.
///
/// ```text
///  ┌─────┐ register  ┌───────────┐ REGIF ok ┌────┐
///  │ Off │ ────────> │ PendingOn │ ───────> │ On │
///  └─────┘ <──────── └───────────┘          └────┘
///     ^    REGIF err                          │ unregister
///     │               ┌────────────┐          │
///     └────────────── │ PendingOff │ <────────┘
///       committed     └────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingMode {
    Off,
    PendingOn,
    On,
    PendingOff,
}

bitflags! {
    /// Flags passed to a sync call by its caller.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SyncFlags: u32 {
        /// Reclaim completed TX slots and kick the host unconditionally.
        const FORCE_RECLAIM = 1 << 0;
    }
}

bitflags! {
    /// Per-ring state flags kept by the driver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct KringFlags: u32 {
        /// The owner polls this ring; never re-arm host interrupts for it.
        const NOINTR = 1 << 0;
        /// An interrupt arrived and has not been consumed by an RX sync.
        const PENDINTR = 1 << 1;
    }
}

/// Local descriptor of one TX or RX ring.
#[derive(Debug, Clone)]
pub struct Kring {
    dir: Direction,
    ring_id: usize,
    num_slots: u32,
    pub(crate) rhead: u32,
    pub(crate) rcur: u32,
    pub(crate) rtail: u32,
    pub(crate) nr_hwcur: u32,
    pub(crate) nr_hwtail: u32,
    pub(crate) mode: RingMode,
    pub(crate) kflags: KringFlags,
}

impl Kring {
    /// Creates a ring in its reset state: a TX ring has every slot but one
    /// free, an RX ring has nothing to read.
    pub fn new(dir: Direction, ring_id: usize, num_slots: u32) -> Self {
        let hwtail = match dir {
            Direction::Tx => num_slots.saturating_sub(1),
            Direction::Rx => 0,
        };
        Self {
            dir,
            ring_id,
            num_slots,
            rhead: 0,
            rcur: 0,
            rtail: hwtail,
            nr_hwcur: 0,
            nr_hwtail: hwtail,
            mode: RingMode::Off,
            kflags: KringFlags::empty(),
        }
    }

    #[inline]
    pub fn dir(&self) -> Direction {
        self.dir
    }

    /// Index of the ring within its direction.
    #[inline]
    pub fn ring_id(&self) -> usize {
        self.ring_id
    }

    #[inline]
    pub fn num_slots(&self) -> u32 {
        self.num_slots
    }

    #[inline]
    pub fn head(&self) -> u32 {
        self.rhead
    }

    #[inline]
    pub fn cur(&self) -> u32 {
        self.rcur
    }

    #[inline]
    pub fn tail(&self) -> u32 {
        self.rtail
    }

    #[inline]
    pub fn hwcur(&self) -> u32 {
        self.nr_hwcur
    }

    #[inline]
    pub fn hwtail(&self) -> u32 {
        self.nr_hwtail
    }

    #[inline]
    pub fn mode(&self) -> RingMode {
        self.mode
    }

    #[inline]
    pub fn flags(&self) -> KringFlags {
        self.kflags
    }

    /// Sets or clears [`KringFlags::NOINTR`].
    pub fn set_nointr(&mut self, on: bool) {
        self.kflags.set(KringFlags::NOINTR, on);
    }

    /// Forward distance from slot `from` to slot `to`.
    #[inline]
    pub fn distance(&self, from: u32, to: u32) -> u32 {
        if to >= from {
            to - from
        } else {
            self.num_slots - from + to
        }
    }

    /// Slot preceding `idx`.
    #[inline]
    pub(crate) fn prev(&self, idx: u32) -> u32 {
        if idx == 0 {
            self.num_slots - 1
        } else {
            idx - 1
        }
    }

    /// Slots available to the ring owner between `cur` and `tail`.
    #[inline]
    pub fn avail(&self) -> u32 {
        self.distance(self.rcur, self.rtail)
    }

    /// No free TX slot / no filled RX slot left for the owner.
    #[inline]
    pub fn would_block(&self) -> bool {
        self.rcur == self.nr_hwtail
    }

    #[inline]
    pub(crate) fn valid_index(&self, idx: u32) -> bool {
        idx < self.num_slots
    }

    /// Advances the owner's `head` and `cur`.
    ///
    /// Both may only move forward, and neither may pass `tail`.
    pub fn advance(&mut self, head: u32, cur: u32) -> AxResult {
        if !self.valid_index(head) || !self.valid_index(cur) {
            return Err(AxError::InvalidInput);
        }
        let room = self.distance(self.rhead, self.rtail);
        if self.distance(self.rhead, head) > room {
            warn!(
                "{:?} ring {}: head {} beyond tail {} (old head {})",
                self.dir, self.ring_id, head, self.rtail, self.rhead
            );
            return Err(AxError::InvalidInput);
        }
        if self.distance(head, cur) > self.distance(head, self.rtail) {
            warn!(
                "{:?} ring {}: cur {} outside [{}, {}]",
                self.dir, self.ring_id, cur, head, self.rtail
            );
            return Err(AxError::InvalidInput);
        }
        self.rhead = head;
        self.rcur = cur;
        Ok(())
    }

    /// Overwrites all cursors with the CSB snapshot taken at (un)register.
    pub(crate) fn load(&mut self, head: u32, cur: u32, hwcur: u32, hwtail: u32) {
        self.rhead = head;
        self.rcur = cur;
        self.nr_hwcur = hwcur;
        self.nr_hwtail = hwtail;
        self.rtail = hwtail;
    }

    /// Exposes the synced `hwtail` to the owner.
    #[inline]
    pub(crate) fn finalize(&mut self) {
        self.rtail = self.nr_hwtail;
    }

    pub(crate) fn begin_on(&mut self) {
        if self.mode == RingMode::Off {
            self.mode = RingMode::PendingOn;
        }
    }

    pub(crate) fn begin_off(&mut self) {
        if self.mode == RingMode::On {
            self.mode = RingMode::PendingOff;
        }
    }

    /// Completes a pending transition.
    pub(crate) fn commit_mode(&mut self) {
        self.mode = match self.mode {
            RingMode::PendingOn => RingMode::On,
            RingMode::PendingOff => RingMode::Off,
            m => m,
        };
    }

    /// Abandons a pending transition.
    pub(crate) fn rollback_mode(&mut self) {
        self.mode = match self.mode {
            RingMode::PendingOn => RingMode::Off,
            RingMode::PendingOff => RingMode::On,
            m => m,
        };
    }
}
