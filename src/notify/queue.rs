//! Per-ring queues and the interrupt demultiplexer.
//!
//! One [`PtnetQueue`] exists per ring index in `[0, num_tx_rings +
//! num_rx_rings)`. It binds the ring's local descriptor, its CSB entry, its
//! notification vector and its kick register.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use axerrno::{AxError, AxResult};
use spin::{Mutex, MutexGuard};

use crate::config::PtnetConfig;
use crate::csb::Csb;
use crate::hal::{IoWindow, NetStack};
use crate::kring::{Direction, Kring, KringFlags, RingMode, SyncFlags};
use crate::regs;
use crate::sync;

/// Global queue index, equal to the ring's CSB entry index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId(pub usize);

/// Per-queue counters.
#[derive(Debug, Default)]
pub struct QueueStats {
    /// Sync calls on the ring.
    pub syncs: AtomicU64,
    /// Kick register writes.
    pub kicks: AtomicU64,
    /// Notifications delivered by the host.
    pub interrupts: AtomicU64,
}

impl QueueStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_sync(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_kick(&self) {
        self.kicks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_interrupt(&self) {
        self.interrupts.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns `(syncs, kicks, interrupts)`.
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.syncs.load(Ordering::Relaxed),
            self.kicks.load(Ordering::Relaxed),
            self.interrupts.load(Ordering::Relaxed),
        )
    }
}

/// A ring bound to its notification source and kick register.
pub struct PtnetQueue {
    id: QueueId,
    dir: Direction,
    ring_id: usize,
    kick: usize,
    /// Present between `create_rings` and `delete_rings`.
    kring: Mutex<Option<Kring>>,
    stats: QueueStats,
}

impl PtnetQueue {
    fn new(id: QueueId, dir: Direction, ring_id: usize) -> Self {
        Self {
            id,
            dir,
            ring_id,
            kick: regs::kick_offset(id.0),
            kring: Mutex::new(None),
            stats: QueueStats::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> QueueId {
        self.id
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

    /// Offset of this queue's kick register.
    #[inline]
    pub fn kick_offset(&self) -> usize {
        self.kick
    }

    #[inline]
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }

    /// Notifies the host that the ring has new work.
    pub fn kick(&self, io: &dyn IoWindow) {
        trace!("kick {:?} ring {} at {:#x}", self.dir, self.ring_id, self.kick);
        io.write32(self.kick, 0);
        self.stats.record_kick();
    }

    pub(crate) fn kring(&self) -> MutexGuard<'_, Option<Kring>> {
        self.kring.lock()
    }
}

impl core::fmt::Debug for PtnetQueue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PtnetQueue")
            .field("id", &self.id)
            .field("dir", &self.dir)
            .field("ring_id", &self.ring_id)
            .field("kick", &self.kick)
            .finish()
    }
}

/// All queues of one device, together with the CSB they mirror.
pub struct QueueSet {
    csb: Arc<Csb>,
    config: PtnetConfig,
    queues: Vec<PtnetQueue>,
}

impl QueueSet {
    /// Allocates one queue per ring, TX rings first.
    pub(crate) fn new(csb: Arc<Csb>, config: PtnetConfig) -> AxResult<Self> {
        let num_rings = config.num_rings();
        if csb.num_rings() < num_rings {
            error!("CSB holds {} rings, {} needed", csb.num_rings(), num_rings);
            return Err(AxError::InvalidInput);
        }
        let mut queues = Vec::new();
        queues.try_reserve_exact(num_rings).map_err(|_| {
            warn!("failed to allocate {} queues", num_rings);
            AxError::NoMemory
        })?;
        for index in 0..num_rings {
            // `locate` covers every index below `num_rings`.
            if let Some((dir, ring_id)) = config.locate(index) {
                queues.push(PtnetQueue::new(QueueId(index), dir, ring_id));
            }
        }
        Ok(Self { csb, config, queues })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queues.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    #[inline]
    pub fn config(&self) -> &PtnetConfig {
        &self.config
    }

    #[inline]
    pub fn csb(&self) -> &Csb {
        &self.csb
    }

    pub fn iter(&self) -> impl Iterator<Item = &PtnetQueue> {
        self.queues.iter()
    }

    pub fn get(&self, id: QueueId) -> Option<&PtnetQueue> {
        self.queues.get(id.0)
    }

    /// The queue of ring `ring` of direction `dir`.
    pub fn queue(&self, dir: Direction, ring: usize) -> AxResult<&PtnetQueue> {
        let index = self.config.global_index(dir, ring)?;
        self.queues.get(index).ok_or(AxError::InvalidInput)
    }

    /// Whether local ring descriptors currently exist.
    pub fn rings_created(&self) -> bool {
        self.queues.first().is_some_and(|q| q.kring().is_some())
    }

    /// Instantiates a local descriptor for every ring that has none.
    pub(crate) fn create_krings(&self) {
        for q in &self.queues {
            let mut slot = q.kring();
            if slot.is_none() {
                *slot = Some(Kring::new(q.dir, q.ring_id, self.config.num_slots(q.dir)));
            }
        }
    }

    pub(crate) fn delete_krings(&self) {
        for q in &self.queues {
            q.kring().take();
        }
    }

    /// Runs `f` on the local descriptor of every ring, with its CSB entry.
    pub(crate) fn for_each_kring<F>(&self, mut f: F)
    where
        F: FnMut(&mut Kring, crate::csb::GuestRing<'_>),
    {
        for q in &self.queues {
            let Some(ring) = self.csb.guest(q.id.0) else {
                continue;
            };
            if let Some(k) = q.kring().as_mut() {
                f(k, ring);
            }
        }
    }

    /// Copies the authoritative ring state from the CSB into every local
    /// descriptor.
    pub(crate) fn pull_from_csb(&self) {
        self.for_each_kring(|k, ring| {
            let (head, cur) = (ring.head(), ring.cur());
            let (hwtail, hwcur) = ring.host_cursors();
            if [head, cur, hwcur, hwtail].iter().any(|&i| !k.valid_index(i)) {
                error!(
                    "{:?} ring {}: CSB state out of range {{head {} cur {} hwcur {} hwtail {}}}",
                    k.dir(),
                    k.ring_id(),
                    head,
                    cur,
                    hwcur,
                    hwtail
                );
                return;
            }
            k.load(head, cur, hwcur, hwtail);
            trace!(
                "{:?} ring {}: pulled {{head {} cur {} hwcur {} hwtail {}}}",
                k.dir(),
                k.ring_id(),
                head,
                cur,
                hwcur,
                hwtail
            );
        });
    }

    /// Synchronizes ring `ring` of direction `dir` with the CSB.
    ///
    /// Returns whether the host must be kicked.
    pub fn sync(&self, dir: Direction, ring: usize, flags: SyncFlags) -> AxResult<bool> {
        let q = self.queue(dir, ring)?;
        let view = self.csb.guest(q.id.0).ok_or(AxError::InvalidInput)?;
        let mut slot = q.kring();
        let kring = slot.as_mut().ok_or(AxError::BadState)?;
        q.stats.record_sync();
        Ok(match dir {
            Direction::Tx => sync::txsync(kring, view, flags),
            Direction::Rx => sync::rxsync(kring, view, flags),
        })
    }

    /// Interrupt demultiplexer: handles a notification delivered on queue
    /// `id`.
    ///
    /// Rings owned by a direct-access client are only flagged and handed to
    /// the stack, the client syncs them itself. Other rings are synced here
    /// (kicking the host if asked) before the stack is told there is work.
    pub fn dispatch_irq(&self, id: QueueId, io: &dyn IoWindow, stack: &dyn NetStack) -> AxResult {
        let q = self.get(id).ok_or_else(|| {
            warn!("interrupt for unknown queue {:?}", id);
            AxError::InvalidInput
        })?;
        q.stats.record_interrupt();

        let notify = {
            let mut slot = q.kring();
            let Some(kring) = slot.as_mut() else {
                debug!("{:?} interrupt #{} before rings exist", q.dir, q.ring_id);
                return Ok(());
            };
            if q.dir == Direction::Rx {
                kring.kflags.insert(KringFlags::PENDINTR);
            }
            match kring.mode() {
                RingMode::On | RingMode::PendingOff => false,
                RingMode::Off | RingMode::PendingOn => {
                    let view = self.csb.guest(id.0).ok_or(AxError::InvalidInput)?;
                    q.stats.record_sync();
                    match q.dir {
                        Direction::Tx => sync::txsync(kring, view, SyncFlags::empty()),
                        Direction::Rx => sync::rxsync(kring, view, SyncFlags::empty()),
                    }
                }
            }
        };
        if notify {
            q.kick(io);
        }
        stack.ring_event(q.dir, q.ring_id);
        Ok(())
    }
}
