#![no_std]

//! # ptnet guest driver core
//!
//! Guest side of a paravirtualized network adapter whose packet rings are
//! shared with the host. Instead of trapping on every ring update, guest and
//! host exchange ring cursors and notification-suppression flags through a
//! shared memory block, the CSB, and fall back to register writes (kicks)
//! and interrupts only when the peer asked for them.
//!
//! It is designed for `no_std` environments and uses the `alloc` crate for
//! dynamic memory allocation.
//!
//! ## Architecture
//!
//! ### Shared state
//! - [`regs`]: register offsets and command codes of the I/O window
//! - [`Csb`]: the shared block, with [`GuestRing`] / [`HostRing`] views
//!   enforcing which side writes which field
//!
//! ### Datapath
//! - [`Kring`]: guest-local ring descriptor
//! - [`sync`]: TX/RX synchronization, returns whether to kick the host
//! - [`notify::mediator`]: when to notify and when to suppress
//! - [`PtnetQueue`] / [`QueueSet`]: per-ring kick register, vector and
//!   interrupt demultiplexing
//!
//! ### Control plane
//! - [`PtnetDevice`]: attach, detach and interrupt entry
//! - [`PtnetClient`]: direct-access clients registering with the host
//! - [`Registrations`] / [`AttachState`]: lifecycle bookkeeping
//!
//! The OS glue supplies the [`IoWindow`], [`DmaHal`], [`IrqController`]
//! and [`NetStack`] implementations.
//!
//! ## Examples
//!
//! ```rust,ignore
//! use alloc::sync::Arc;
//! use ptnet::{Direction, PtnetDevice, PtnetOptions, SyncFlags};
//!
//! let dev = PtnetDevice::new(PtnetOptions::new("ptnet0"), io, dma, irq, stack);
//! dev.attach()?;
//!
//! let client = dev.native();
//! let geo = client.config()?;
//! client.create_rings()?;
//! client.register(true)?;
//!
//! // Queue 3 packets on TX ring 0 and hand them to the host.
//! client.with_kring(Direction::Tx, 0, |k| k.advance(3, 3))??;
//! client.txsync(0, SyncFlags::empty())?;
//!
//! client.register(false)?;
//! client.delete_rings()?;
//! dev.detach();
//! ```

extern crate alloc;
#[macro_use]
extern crate log;

mod client;
mod config;
mod csb;
mod device;
mod hal;
mod kring;
mod lifecycle;
pub mod notify;
pub mod regs;
pub mod sync;

pub use client::PtnetClient;
pub use config::{PTNET_MAX_SLOTS, PtnetConfig, PtnetOptions, RingGeometry};
pub use csb::{CSB_RING_SIZE, Csb, CsbRing, GuestRing, HostCsb, HostRing};
pub use device::PtnetDevice;
pub use hal::{DmaHal, IoWindow, IrqController, IrqCookie, NetStack};
pub use kring::{Direction, Kring, KringFlags, RingMode, SyncFlags};
pub use lifecycle::{AttachState, ClientKind, RegisterPlan, Registrations, UnregisterPlan};
pub use notify::{PtnetQueue, QueueId, QueueSet, QueueStats};
pub use regs::{CtrlCmd, PtctlCmd, PtnetFeatures};
