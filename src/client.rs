//! Direct-access clients.
//!
//! A [`PtnetClient`] is what a ring framework holds while it drives the
//! rings itself: it sizes them, creates the local descriptors, registers
//! with the host and syncs.

use axerrno::AxResult;

use crate::config::RingGeometry;
use crate::device::PtnetDevice;
use crate::kring::{Direction, Kring, SyncFlags};
use crate::lifecycle::ClientKind;

/// Handle for one direct-access client of a [`PtnetDevice`].
#[derive(Debug, Clone, Copy)]
pub struct PtnetClient<'a> {
    dev: &'a PtnetDevice,
    kind: ClientKind,
}

impl PtnetDevice {
    /// A client that takes the rings over from the network stack.
    pub fn native(&self) -> PtnetClient<'_> {
        PtnetClient {
            dev: self,
            kind: ClientKind::Native,
        }
    }

    /// A client that works alongside the rings' owner.
    pub fn secondary(&self) -> PtnetClient<'_> {
        PtnetClient {
            dev: self,
            kind: ClientKind::Secondary,
        }
    }
}

impl<'a> PtnetClient<'a> {
    #[inline]
    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    #[inline]
    pub fn device(&self) -> &'a PtnetDevice {
        self.dev
    }

    /// Current ring counts and sizes, read from the device.
    pub fn config(&self) -> AxResult<RingGeometry> {
        self.dev.geometry()
    }

    /// Creates the local ring descriptors. No-op while any client is
    /// registered.
    pub fn create_rings(&self) -> AxResult {
        self.dev.create_rings()
    }

    /// Deletes the local ring descriptors. No-op while any client is
    /// registered.
    pub fn delete_rings(&self) -> AxResult {
        self.dev.delete_rings()
    }

    /// Registers (`on == true`) or unregisters this client.
    ///
    /// The first registration makes the host start processing the rings,
    /// the last one stops it. Calls must be balanced per client kind.
    pub fn register(&self, on: bool) -> AxResult {
        self.dev.register(self.kind, on)
    }

    /// Syncs TX ring `ring`. Returns whether the host must be kicked; the
    /// kick is left to the caller.
    pub fn sync_tx(&self, ring: usize, flags: SyncFlags) -> AxResult<bool> {
        self.dev.sync(Direction::Tx, ring, flags)
    }

    /// Syncs RX ring `ring`. Returns whether the host must be kicked.
    pub fn sync_rx(&self, ring: usize, flags: SyncFlags) -> AxResult<bool> {
        self.dev.sync(Direction::Rx, ring, flags)
    }

    /// [`PtnetClient::sync_tx`] followed by the kick if needed.
    pub fn txsync(&self, ring: usize, flags: SyncFlags) -> AxResult<bool> {
        self.dev.sync_and_kick(Direction::Tx, ring, flags)
    }

    /// [`PtnetClient::sync_rx`] followed by the kick if needed.
    pub fn rxsync(&self, ring: usize, flags: SyncFlags) -> AxResult<bool> {
        self.dev.sync_and_kick(Direction::Rx, ring, flags)
    }

    /// Runs `f` on the local descriptor of a ring, e.g. to move its cursors
    /// after filling or consuming slots.
    pub fn with_kring<R>(
        &self,
        dir: Direction,
        ring: usize,
        f: impl FnOnce(&mut Kring) -> R,
    ) -> AxResult<R> {
        self.dev.with_kring(dir, ring, f)
    }
}
