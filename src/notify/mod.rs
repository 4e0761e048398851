//! Notification plumbing between the guest driver and the host.
//!
//! # Architecture
//!
//! ```text
//!          guest -> host                         host -> guest
//! ┌──────────────────────────┐        ┌──────────────────────────────┐
//! │ sync returns `notify`    │        │ vector fires                 │
//! │   └─> PtnetQueue::kick   │        │   └─> PtnetDevice::handle_irq│
//! │        (KICK_BASE + 4*i) │        │        └─> dispatch_irq      │
//! └──────────────────────────┘        │             └─> NetStack     │
//!                                     └──────────────────────────────┘
//! ```
//!
//! Both directions are gated by the CSB flags managed in [`mediator`]. Kick
//! registers and vectors are indexed by the same global ring index as the CSB
//! entries: TX rings first, then RX rings.

pub mod mediator;

mod irq;
mod queue;

pub(crate) use irq::IrqResources;
pub use queue::{PtnetQueue, QueueId, QueueSet, QueueStats};
