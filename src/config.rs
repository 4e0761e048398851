use alloc::string::String;
use core::ops::Range;

use axerrno::{AxError, AxResult};

use crate::hal::IoWindow;
use crate::kring::Direction;
use crate::regs::{self, PtnetFeatures};

/// Largest ring a device may report.
pub const PTNET_MAX_SLOTS: u32 = 1 << 16;

/// Options supplied by the OS glue when the device is created.
#[derive(Debug, Clone)]
pub struct PtnetOptions {
    /// Name used to prefix log lines, e.g. `ptnet0`.
    pub name: String,
    /// Features the guest asks for. `BASE` is always requested.
    pub wanted_features: PtnetFeatures,
}

impl PtnetOptions {
    pub fn new(name: &str) -> Self {
        Self {
            name: String::from(name),
            wanted_features: PtnetFeatures::BASE,
        }
    }

    pub fn with_features(mut self, features: PtnetFeatures) -> Self {
        self.wanted_features = features | PtnetFeatures::BASE;
        self
    }
}

impl Default for PtnetOptions {
    fn default() -> Self {
        Self::new("ptnet")
    }
}

/// Ring geometry as reported to the networking collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingGeometry {
    pub tx_rings: u32,
    pub rx_rings: u32,
    pub tx_slots: u32,
    pub rx_slots: u32,
}

impl RingGeometry {
    /// Reads the ring count and slot count registers.
    pub fn read(io: &dyn IoWindow) -> Self {
        Self {
            tx_rings: io.read32(regs::PTNET_IO_NUM_TX_RINGS),
            rx_rings: io.read32(regs::PTNET_IO_NUM_RX_RINGS),
            tx_slots: io.read32(regs::PTNET_IO_NUM_TX_SLOTS),
            rx_slots: io.read32(regs::PTNET_IO_NUM_RX_SLOTS),
        }
    }
}

/// Device configuration read after feature negotiation.
///
/// Every later allocation (CSB, queues, vectors) is sized from this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtnetConfig {
    pub num_tx_rings: usize,
    pub num_rx_rings: usize,
    pub num_tx_slots: u32,
    pub num_rx_slots: u32,
    pub mac: [u8; 6],
    pub nifp_offset: u32,
}

impl PtnetConfig {
    /// Reads the device configuration registers.
    pub fn read(io: &dyn IoWindow) -> AxResult<Self> {
        let geo = RingGeometry::read(io);
        if geo.tx_rings == 0 || geo.rx_rings == 0 {
            warn!("device reports {} TX / {} RX rings", geo.tx_rings, geo.rx_rings);
            return Err(AxError::InvalidData);
        }
        let slots_ok = |n: u32| (2..=PTNET_MAX_SLOTS).contains(&n);
        if !slots_ok(geo.tx_slots) || !slots_ok(geo.rx_slots) {
            warn!("device reports {} TX / {} RX slots", geo.tx_slots, geo.rx_slots);
            return Err(AxError::InvalidData);
        }
        let mac = regs::decode_mac(
            io.read32(regs::PTNET_IO_MAC_HI),
            io.read32(regs::PTNET_IO_MAC_LO),
        );
        Ok(Self {
            num_tx_rings: geo.tx_rings as usize,
            num_rx_rings: geo.rx_rings as usize,
            num_tx_slots: geo.tx_slots,
            num_rx_slots: geo.rx_slots,
            mac,
            nifp_offset: io.read32(regs::PTNET_IO_NIFP_OFS),
        })
    }

    /// Total number of rings, TX and RX.
    #[inline]
    pub fn num_rings(&self) -> usize {
        self.num_tx_rings + self.num_rx_rings
    }

    #[inline]
    pub fn num_rings_of(&self, dir: Direction) -> usize {
        match dir {
            Direction::Tx => self.num_tx_rings,
            Direction::Rx => self.num_rx_rings,
        }
    }

    #[inline]
    pub fn num_slots(&self, dir: Direction) -> u32 {
        match dir {
            Direction::Tx => self.num_tx_slots,
            Direction::Rx => self.num_rx_slots,
        }
    }

    /// Global indices (CSB entry, queue, kick register) of the rings of `dir`.
    #[inline]
    pub fn ring_range(&self, dir: Direction) -> Range<usize> {
        match dir {
            Direction::Tx => 0..self.num_tx_rings,
            Direction::Rx => self.num_tx_rings..self.num_rings(),
        }
    }

    /// Global index of ring `ring` of direction `dir`.
    pub fn global_index(&self, dir: Direction, ring: usize) -> AxResult<usize> {
        if ring >= self.num_rings_of(dir) {
            return Err(AxError::InvalidInput);
        }
        Ok(self.ring_range(dir).start + ring)
    }

    /// Inverse of [`PtnetConfig::global_index`].
    pub fn locate(&self, index: usize) -> Option<(Direction, usize)> {
        if index < self.num_tx_rings {
            Some((Direction::Tx, index))
        } else if index < self.num_rings() {
            Some((Direction::Rx, index - self.num_tx_rings))
        } else {
            None
        }
    }

    #[cfg(test)]
    pub(crate) fn for_test(tx: usize, rx: usize, tx_slots: u32, rx_slots: u32) -> Self {
        Self {
            num_tx_rings: tx,
            num_rx_rings: rx,
            num_tx_slots: tx_slots,
            num_rx_slots: rx_slots,
            mac: [0; 6],
            nifp_offset: 0,
        }
    }
}
