//! Notification vector wiring: one vector per queue.

use alloc::vec::Vec;

use axerrno::{AxError, AxResult};

use crate::hal::{IoWindow, IrqController, IrqCookie};
use crate::regs::{self, CtrlCmd};

use super::queue::QueueSet;

/// Interrupt resources held by a device.
///
/// Every field records whether the matching resource was actually obtained,
/// so [`IrqResources::release`] can run on any partially wired state.
#[derive(Debug, Default)]
pub(crate) struct IrqResources {
    vectors_allocated: bool,
    handlers: Vec<(usize, IrqCookie)>,
    host_notified: bool,
}

impl IrqResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates one vector per queue, wires each to its queue and tells the
    /// host. On failure everything obtained so far is released.
    pub fn setup(
        &mut self,
        irq: &dyn IrqController,
        io: &dyn IoWindow,
        queues: &QueueSet,
    ) -> AxResult {
        let res = self.try_setup(irq, io, queues);
        if res.is_err() {
            self.release(irq, io);
        }
        res
    }

    fn try_setup(
        &mut self,
        irq: &dyn IrqController,
        io: &dyn IoWindow,
        queues: &QueueSet,
    ) -> AxResult {
        let nvecs = queues.len();
        if irq.max_vectors() < nvecs {
            warn!("not enough notification vectors: {} < {}", irq.max_vectors(), nvecs);
            return Err(AxError::ResourceBusy);
        }

        let granted = irq.alloc_vectors(nvecs).map_err(|e| {
            warn!("failed to allocate {} vectors: {:?}", nvecs, e);
            AxError::NoMemory
        })?;
        self.vectors_allocated = true;
        if granted < nvecs {
            warn!("only {} of {} vectors granted", granted, nvecs);
            return Err(AxError::ResourceBusy);
        }

        self.handlers.try_reserve_exact(nvecs).map_err(|_| AxError::NoMemory)?;
        for (vector, q) in queues.iter().enumerate() {
            let cookie = irq.setup_irq(vector, q.id()).map_err(|e| {
                warn!(
                    "failed to wire vector {} to {:?} ring {}: {:?}",
                    vector,
                    q.dir(),
                    q.ring_id(),
                    e
                );
                e
            })?;
            self.handlers.push((vector, cookie));
        }
        debug!("allocated {} notification vectors", nvecs);

        io.write32(regs::PTNET_IO_CTRL, CtrlCmd::IrqInit.opcode());
        self.host_notified = true;
        Ok(())
    }

    /// Releases whatever [`IrqResources::setup`] obtained, in reverse order.
    /// Safe to call repeatedly.
    pub fn release(&mut self, irq: &dyn IrqController, io: &dyn IoWindow) {
        if self.host_notified {
            io.write32(regs::PTNET_IO_CTRL, CtrlCmd::IrqFini.opcode());
            self.host_notified = false;
        }
        while let Some((vector, cookie)) = self.handlers.pop() {
            irq.teardown_irq(vector, cookie);
        }
        if self.vectors_allocated {
            irq.release_vectors();
            self.vectors_allocated = false;
        }
    }
}
