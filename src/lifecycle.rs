//! Attach lifecycle and direct-access registration counting.
//!
//! # Attach states
//!
//! ```text
//! ┌────────────┐ PTFEAT  ┌────────────────────┐
//! │ Unattached │ ──────> │ FeaturesNegotiated │
//! └────────────┘         └────────────────────┘
//!       ^                          │ CSBBAH/CSBBAL
//!       │                          v
//!       │ teardown         ┌──────────────┐ queues+vectors ┌───────┐
//!       │ (any state)      │ CsbInstalled │ ─────────────> │ Ready │
//!       │                  └──────────────┘                └───┬───┘
//!       └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Registrations
//!
//! Orthogonally, the ring set is registered with the host (REGIF) while at
//! least one direct-access client is attached. [`Registrations`] counts the
//! clients per [`ClientKind`] and tells the caller, through a plan, which
//! side effects the next transition owns. Counters only move in `commit_*`,
//! which callers invoke after the host confirmed the transition.

use axerrno::{AxError, AxResult};

/// Attach progress of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AttachState {
    /// Nothing acquired.
    Unattached,
    /// The host acknowledged the base feature.
    FeaturesNegotiated,
    /// The host knows the CSB address.
    CsbInstalled,
    /// Queues and notification vectors are wired.
    Ready,
}

/// Kind of direct-access client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// Takes over the rings from the network stack.
    Native,
    /// Attaches to the rings alongside whoever owns them, e.g. a monitor.
    Secondary,
}

/// Side effects of a register call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterPlan {
    /// 0->1 transition: seed the CSB and issue REGIF.
    pub regif: bool,
    /// Copy ring state from the CSB into the local descriptors (after REGIF).
    pub pull_csb: bool,
    /// First native client: switch rings into direct-access mode.
    pub enter_native: bool,
}

/// Side effects of an unregister call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnregisterPlan {
    /// 1->0 transition: issue UNREGIF.
    pub unregif: bool,
    /// Copy ring state from the CSB into the local descriptors (before UNREGIF).
    pub pull_csb: bool,
    /// Last native client: switch rings back to the network stack.
    pub leave_native: bool,
}

impl UnregisterPlan {
    /// Rings return to the interrupt-driven stack after this transition.
    #[inline]
    pub fn exits_direct_access(&self) -> bool {
        self.unregif || self.leave_native
    }
}

/// Registered direct-access clients.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Registrations {
    native: u32,
    secondary: u32,
}

impl Registrations {
    pub const fn new() -> Self {
        Self {
            native: 0,
            secondary: 0,
        }
    }

    /// All registered clients.
    #[inline]
    pub fn total(&self) -> u32 {
        self.native + self.secondary
    }

    #[inline]
    pub fn count(&self, kind: ClientKind) -> u32 {
        match kind {
            ClientKind::Native => self.native,
            ClientKind::Secondary => self.secondary,
        }
    }

    fn count_mut(&mut self, kind: ClientKind) -> &mut u32 {
        match kind {
            ClientKind::Native => &mut self.native,
            ClientKind::Secondary => &mut self.secondary,
        }
    }

    pub fn plan_register(&self, kind: ClientKind) -> RegisterPlan {
        let first = self.total() == 0;
        let first_native = kind == ClientKind::Native && self.native == 0;
        RegisterPlan {
            regif: first,
            pull_csb: match kind {
                ClientKind::Native => first_native,
                ClientKind::Secondary => first,
            },
            enter_native: first_native,
        }
    }

    pub fn commit_register(&mut self, kind: ClientKind) {
        *self.count_mut(kind) += 1;
    }

    /// Fails with `BadState` if no client of `kind` is registered.
    pub fn plan_unregister(&self, kind: ClientKind) -> AxResult<UnregisterPlan> {
        if self.count(kind) == 0 {
            return Err(AxError::BadState);
        }
        let unregif = self.total() == 1;
        let leave_native = kind == ClientKind::Native && self.native == 1;
        Ok(UnregisterPlan {
            unregif,
            pull_csb: unregif || leave_native,
            leave_native,
        })
    }

    pub fn commit_unregister(&mut self, kind: ClientKind) {
        let count = self.count_mut(kind);
        if *count == 0 {
            error!("{:?} registration count underflow", kind);
            return;
        }
        *count -= 1;
    }

    /// Forgets every client. Used by teardown only.
    pub fn clear(&mut self) {
        *self = Self::new();
    }
}
