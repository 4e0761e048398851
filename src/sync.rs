//! Ring synchronization engine.
//!
//! [`txsync`] and [`rxsync`] exchange cursors between a [`Kring`] and its CSB
//! entry. They never block and never touch device registers: each returns
//! whether the host must be kicked, and the caller performs the kick.

use crate::csb::GuestRing;
use crate::kring::{Direction, Kring, KringFlags, SyncFlags};
use crate::notify::mediator;

/// Accepts the host's `hwcur` if it is a valid slot that has not passed the
/// guest's `head`.
fn accept_hwcur(kring: &Kring, hwcur: u32) -> bool {
    kring.valid_index(hwcur)
        && kring.distance(kring.nr_hwcur, hwcur) <= kring.distance(kring.nr_hwcur, kring.rhead)
}

/// Reads `hwcur` only.
fn pull_hwcur(kring: &mut Kring, ring: GuestRing<'_>) {
    let (_, hwcur) = ring.host_cursors();
    if accept_hwcur(kring, hwcur) {
        kring.nr_hwcur = hwcur;
    } else {
        error!(
            "{:?} ring {}: host hwcur {} invalid (hwcur {}, head {}, {} slots)",
            kring.dir(),
            kring.ring_id(),
            hwcur,
            kring.nr_hwcur,
            kring.rhead,
            kring.num_slots()
        );
    }
}

/// Accepts the host's `hwtail` if it moved forward without passing the last
/// slot the host may own: `hwcur - 1` on TX, `head - 1` on RX.
fn accept_hwtail(kring: &Kring, hwtail: u32, hwcur: u32) -> bool {
    let limit = match kring.dir() {
        Direction::Tx => kring.prev(hwcur),
        Direction::Rx => kring.prev(kring.rhead),
    };
    kring.valid_index(hwtail)
        && kring.distance(kring.nr_hwtail, hwtail) <= kring.distance(kring.nr_hwtail, limit)
}

/// Reads `hwtail` and `hwcur` published by the host into `kring`.
///
/// Values outside the ring, or an `hwtail` falling back into slots the guest
/// still owns, are an invariant violation on the host side. They are logged
/// and dropped, so the cached cursors only ever move forward. Returns whether
/// the update was accepted.
pub(crate) fn pull_host_cursors(kring: &mut Kring, ring: GuestRing<'_>) -> bool {
    let (hwtail, hwcur) = ring.host_cursors();
    if !accept_hwcur(kring, hwcur) || !accept_hwtail(kring, hwtail, hwcur) {
        error!(
            "{:?} ring {}: bad host cursors hwcur {} hwtail {} (have {}/{}, head {})",
            kring.dir(),
            kring.ring_id(),
            hwcur,
            hwtail,
            kring.nr_hwcur,
            kring.nr_hwtail,
            kring.rhead
        );
        return false;
    }
    kring.nr_hwtail = hwtail;
    kring.nr_hwcur = hwcur;
    true
}

/// Synchronizes a TX ring.
///
/// Publishes the slots the owner queued (`head`/`cur`), reclaims slots the
/// host has transmitted when the owner runs out of room, and re-arms TX
/// interrupts if the ring is still full. Returns whether to kick the host.
pub fn txsync(kring: &mut Kring, ring: GuestRing<'_>, flags: SyncFlags) -> bool {
    mediator::suppress_interrupts(ring);

    pull_hwcur(kring, ring);
    ring.publish_cursors(kring.rhead, kring.rcur);

    let notify = mediator::host_needs_kick(kring, ring, flags);
    if notify {
        ring.set_sync_flags(flags.bits());
    }

    if kring.would_block() || flags.contains(SyncFlags::FORCE_RECLAIM) {
        pull_host_cursors(kring, ring);
    }

    mediator::rearm_interrupts(kring, ring);
    kring.finalize();

    trace!(
        "txsync {}: csb(head {} cur {} hwtail {}) kring(head {} cur {} tail {}) notify {}",
        kring.ring_id(),
        ring.head(),
        ring.cur(),
        ring.host_cursors().0,
        kring.rhead,
        kring.rcur,
        kring.rtail,
        notify
    );
    notify
}

/// Synchronizes an RX ring.
///
/// Imports slots the host filled, returns the slots the owner released, and
/// re-arms RX interrupts if nothing is left to read. Returns whether to kick
/// the host.
pub fn rxsync(kring: &mut Kring, ring: GuestRing<'_>, flags: SyncFlags) -> bool {
    mediator::suppress_interrupts(ring);

    pull_host_cursors(kring, ring);
    kring.kflags.remove(KringFlags::PENDINTR);

    if kring.rhead != kring.nr_hwcur {
        ring.publish_cursors(kring.rhead, kring.rcur);
    }

    mediator::rearm_interrupts(kring, ring);

    let flags = flags - SyncFlags::FORCE_RECLAIM;
    let notify = mediator::host_needs_kick(kring, ring, flags);
    if notify {
        ring.set_sync_flags(flags.bits());
    }
    kring.finalize();

    trace!(
        "rxsync {}: csb(head {} cur {} hwtail {}) kring(head {} cur {} tail {}) notify {}",
        kring.ring_id(),
        ring.head(),
        ring.cur(),
        ring.host_cursors().0,
        kring.rhead,
        kring.rcur,
        kring.rtail,
        notify
    );
    notify
}
