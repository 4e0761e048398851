//! Register-level control surface of the ptnet device.
//!
//! All registers are 32 bits wide and live in the device I/O window. Offsets
//! are fixed by the protocol version, the host and the guest never negotiate
//! them.

use bitflags::bitflags;

/// Feature negotiation: the guest writes the wanted mask, then reads back the
/// subset acknowledged by the host.
pub const PTNET_IO_PTFEAT: usize = 0x00;
/// PTCTL opcode register (see [`PtctlCmd`]).
pub const PTNET_IO_PTCTL: usize = 0x04;
/// Result of the last PTCTL command, zero on success.
pub const PTNET_IO_PTSTS: usize = 0x08;
/// Lifecycle opcode register (see [`CtrlCmd`]).
pub const PTNET_IO_CTRL: usize = 0x0c;
/// MAC address bytes 2..6, big-endian.
pub const PTNET_IO_MAC_LO: usize = 0x10;
/// MAC address bytes 0..2 in the low 16 bits, big-endian.
pub const PTNET_IO_MAC_HI: usize = 0x14;
/// High half of the CSB physical address. Written first.
pub const PTNET_IO_CSBBAH: usize = 0x18;
/// Low half of the CSB physical address. Written last, the host acts on it.
pub const PTNET_IO_CSBBAL: usize = 0x1c;
/// Offset of the netmap interface descriptor in the shared memory region.
pub const PTNET_IO_NIFP_OFS: usize = 0x20;
pub const PTNET_IO_NUM_TX_RINGS: usize = 0x24;
pub const PTNET_IO_NUM_RX_RINGS: usize = 0x28;
pub const PTNET_IO_NUM_TX_SLOTS: usize = 0x2c;
pub const PTNET_IO_NUM_RX_SLOTS: usize = 0x30;
/// First per-ring kick register; ring `i` kicks at `KICK_BASE + 4 * i`.
pub const PTNET_IO_KICK_BASE: usize = 0x80;

/// Value of PTSTS when the last PTCTL command succeeded.
pub const PTNET_PTSTS_OK: u32 = 0;

bitflags! {
    /// Passthrough features exchanged through PTFEAT.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PtnetFeatures: u32 {
        /// Mandatory base capability. Without it the device is unusable.
        const BASE = 1 << 0;
        /// Host and guest exchange a virtio-net header in front of frames.
        const VNET_HDR = 1 << 1;
    }
}

impl Default for PtnetFeatures {
    fn default() -> Self {
        Self::BASE
    }
}

/// Commands written to PTCTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PtctlCmd {
    /// Switch the passed-through rings into direct-access mode.
    Regif = 8,
    /// Switch the passed-through rings back out of direct-access mode.
    Unregif = 9,
}

impl PtctlCmd {
    #[inline]
    pub const fn opcode(self) -> u32 {
        self as u32
    }
}

/// Commands written to CTRL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CtrlCmd {
    /// All notification vectors are wired, the host may start using them.
    IrqInit = 1,
    /// Notification vectors are about to be released.
    IrqFini = 2,
}

impl CtrlCmd {
    #[inline]
    pub const fn opcode(self) -> u32 {
        self as u32
    }
}

/// Offset of the kick register of the ring with global index `index`.
#[inline]
pub const fn kick_offset(index: usize) -> usize {
    PTNET_IO_KICK_BASE + 4 * index
}

/// Decodes the device Ethernet address from the MAC_HI/MAC_LO halves.
pub fn decode_mac(hi: u32, lo: u32) -> [u8; 6] {
    let hi = (hi & 0xffff) as u16;
    let [b0, b1] = hi.to_be_bytes();
    let [b2, b3, b4, b5] = lo.to_be_bytes();
    [b0, b1, b2, b3, b4, b5]
}
