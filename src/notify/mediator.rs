//! Notification suppression policy.
//!
//! Two one-bit channels per ring live in the CSB:
//!
//! - `guest_need_kick` (written by the guest): the guest wants an interrupt
//!   when the host makes progress on the ring.
//! - `host_need_kick` (written by the host): the host wants a kick when the
//!   guest publishes new cursors.
//!
//! A side that is polling clears its flag and the peer skips the
//! notification. Skipping is only an optimisation: everything here stays
//! correct if every kick is sent, and if none is ever needed because the peer
//! keeps polling.

use core::sync::atomic::{Ordering, fence};

use crate::config::PtnetConfig;
use crate::csb::{Csb, GuestRing};
use crate::kring::{Direction, Kring, KringFlags, SyncFlags};
use crate::sync::pull_host_cursors;

/// Runs `f` on the CSB entry of every ring of direction `dir`.
pub fn for_each_ring<F>(csb: &Csb, config: &PtnetConfig, dir: Direction, f: F)
where
    F: FnMut(GuestRing<'_>),
{
    csb.guest_range(config.ring_range(dir)).for_each(f);
}

/// Puts every ring in the state expected before REGIF: the host wants kicks
/// on all rings, the guest wants RX interrupts but no TX interrupts until it
/// runs out of TX slots.
pub fn seed_for_regif(csb: &Csb, config: &PtnetConfig) {
    for_each_ring(csb, config, Direction::Tx, |r| {
        r.preset_host_need_kick(true);
        r.set_guest_need_kick(false);
    });
    for_each_ring(csb, config, Direction::Rx, |r| {
        r.preset_host_need_kick(true);
        r.set_guest_need_kick(true);
    });
}

/// Forces host->guest interrupts back on for every ring.
///
/// Used when the last direct-access client leaves: from then on the
/// interrupt-driven stack consumes the rings and it has no polling loop of its
/// own.
pub fn restore_interrupts(csb: &Csb, config: &PtnetConfig) {
    for dir in [Direction::Tx, Direction::Rx] {
        for_each_ring(csb, config, dir, |r| r.set_guest_need_kick(true));
    }
}

/// The guest is about to process the ring, interrupts are not needed.
#[inline]
pub fn suppress_interrupts(ring: GuestRing<'_>) {
    ring.set_guest_need_kick(false);
}

/// Decides whether the host must be kicked after the guest published its
/// cursors.
///
/// A kick is due when there is something for the host to look at (`head`
/// moved past `hwcur`, or the guest is about to block) and the host asked for
/// kicks. `FORCE_RECLAIM` always kicks.
pub fn host_needs_kick(kring: &Kring, ring: GuestRing<'_>, flags: SyncFlags) -> bool {
    if flags.contains(SyncFlags::FORCE_RECLAIM) {
        return true;
    }
    let pending = kring.rhead != kring.nr_hwcur || kring.would_block();
    pending && ring.host_need_kick()
}

/// Re-enables host->guest interrupts when the guest ran out of work, then
/// checks the host cursors once more.
///
/// Without the second look, progress the host made between our last read
/// and the flag store would go unnoticed: the host saw interrupts disabled
/// and the guest goes to sleep. Returns whether interrupts stayed enabled.
pub fn rearm_interrupts(kring: &mut Kring, ring: GuestRing<'_>) -> bool {
    if !kring.would_block() || kring.kflags.contains(KringFlags::NOINTR) {
        return false;
    }
    ring.set_guest_need_kick(true);
    fence(Ordering::SeqCst);
    pull_host_cursors(kring, ring);
    if !kring.would_block() {
        ring.set_guest_need_kick(false);
        return false;
    }
    true
}
