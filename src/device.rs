//! The ptnet device: attach, detach, registration and interrupt entry.

use alloc::sync::Arc;

use axerrno::{AxError, AxResult, ax_err};
use spin::{Mutex, RwLock};

use crate::config::{PtnetConfig, PtnetOptions, RingGeometry};
use crate::csb::Csb;
use crate::hal::{DmaHal, IoWindow, IrqController, NetStack};
use crate::kring::{Direction, Kring, SyncFlags};
use crate::lifecycle::{AttachState, ClientKind, Registrations};
use crate::notify::{IrqResources, QueueId, QueueSet, mediator};
use crate::regs::{self, PtctlCmd, PtnetFeatures};

/// Control-plane state, guarded by the device lock.
struct Softc {
    state: AttachState,
    features: PtnetFeatures,
    config: Option<PtnetConfig>,
    csb: Option<Arc<Csb>>,
    csb_installed: bool,
    irqs: IrqResources,
    regs: Registrations,
}

impl Softc {
    fn new() -> Self {
        Self {
            state: AttachState::Unattached,
            features: PtnetFeatures::empty(),
            config: None,
            csb: None,
            csb_installed: false,
            irqs: IrqResources::new(),
            regs: Registrations::new(),
        }
    }
}

/// A ptnet network adapter.
///
/// Control operations (attach, detach, register) serialize on one lock. The
/// datapath (sync, interrupts) only reads the published [`QueueSet`] and
/// takes the lock of the ring it works on.
pub struct PtnetDevice {
    options: PtnetOptions,
    io: Arc<dyn IoWindow>,
    dma: Arc<dyn DmaHal>,
    irq: Arc<dyn IrqController>,
    stack: Arc<dyn NetStack>,
    core: Mutex<Softc>,
    /// Published once attach completes, withdrawn first on teardown.
    queues: RwLock<Option<Arc<QueueSet>>>,
}

impl PtnetDevice {
    pub fn new(
        options: PtnetOptions,
        io: Arc<dyn IoWindow>,
        dma: Arc<dyn DmaHal>,
        irq: Arc<dyn IrqController>,
        stack: Arc<dyn NetStack>,
    ) -> Self {
        Self {
            options,
            io,
            dma,
            irq,
            stack,
            core: Mutex::new(Softc::new()),
            queues: RwLock::new(None),
        }
    }

    /// Device name used in log lines.
    #[inline]
    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn state(&self) -> AttachState {
        self.core.lock().state
    }

    /// Features acknowledged by the host. Empty until attached.
    pub fn features(&self) -> PtnetFeatures {
        self.core.lock().features
    }

    /// Configuration read during attach.
    pub fn config(&self) -> Option<PtnetConfig> {
        self.core.lock().config.clone()
    }

    pub fn mac_address(&self) -> Option<[u8; 6]> {
        self.core.lock().config.as_ref().map(|c| c.mac)
    }

    /// Number of registered clients of `kind`.
    pub fn registrations(&self, kind: ClientKind) -> u32 {
        self.core.lock().regs.count(kind)
    }

    /// Queues of an attached device.
    pub fn queues(&self) -> AxResult<Arc<QueueSet>> {
        self.queues.read().clone().ok_or(AxError::BadState)
    }

    /// Brings the device up.
    ///
    /// On failure every resource obtained so far is released and the device
    /// is back in [`AttachState::Unattached`].
    pub fn attach(&self) -> AxResult {
        let mut sc = self.core.lock();
        if sc.state != AttachState::Unattached {
            warn!("{}: attach in state {:?}", self.name(), sc.state);
            return ax_err!(BadState);
        }
        let res = self.attach_locked(&mut sc);
        if let Err(e) = &res {
            warn!("{}: attach failed: {:?}", self.name(), e);
            self.teardown_locked(&mut sc);
        }
        res
    }

    fn attach_locked(&self, sc: &mut Softc) -> AxResult {
        let wanted = self.options.wanted_features | PtnetFeatures::BASE;
        self.io.write32(regs::PTNET_IO_PTFEAT, wanted.bits());
        let acked = PtnetFeatures::from_bits_truncate(self.io.read32(regs::PTNET_IO_PTFEAT));
        if !acked.contains(PtnetFeatures::BASE) {
            warn!("{}: hypervisor does not support passthrough", self.name());
            return ax_err!(Unsupported);
        }
        sc.features = acked & wanted;
        sc.state = AttachState::FeaturesNegotiated;
        debug!("{}: features {:?}", self.name(), sc.features);

        let config = PtnetConfig::read(&*self.io)?;
        debug!(
            "{}: {} TX rings x {} slots, {} RX rings x {} slots, nifp offset {:#x}",
            self.name(),
            config.num_tx_rings,
            config.num_tx_slots,
            config.num_rx_rings,
            config.num_rx_slots,
            config.nifp_offset
        );

        let csb = Arc::new(Csb::alloc(self.dma.clone(), config.num_rings())?);
        sc.csb = Some(csb.clone());
        let paddr = csb.paddr().as_usize() as u64;
        // The host latches the address on the low half.
        self.io.write32(regs::PTNET_IO_CSBBAH, (paddr >> 32) as u32);
        self.io.write32(regs::PTNET_IO_CSBBAL, paddr as u32);
        sc.csb_installed = true;
        sc.state = AttachState::CsbInstalled;
        debug!("{}: CSB at {:#x}", self.name(), paddr);

        let queues = Arc::new(QueueSet::new(csb, config.clone())?);
        sc.irqs.setup(&*self.irq, &*self.io, &queues)?;

        info!(
            "{}: attached, {} TX / {} RX queues, mac {:02x?}",
            self.name(),
            config.num_tx_rings,
            config.num_rx_rings,
            config.mac
        );
        sc.config = Some(config);
        *self.queues.write() = Some(queues);
        sc.state = AttachState::Ready;
        Ok(())
    }

    /// Releases everything attach obtained, in reverse order. Each step
    /// checks whether its resource exists, so this runs on any partial state.
    fn teardown_locked(&self, sc: &mut Softc) {
        let queues = self.queues.write().take();

        if sc.regs.total() > 0 {
            warn!(
                "{}: tearing down with {} registered clients",
                self.name(),
                sc.regs.total()
            );
            if let Err(e) = self.ptctl(PtctlCmd::Unregif) {
                error!("{}: UNREGIF during teardown failed: {:?}", self.name(), e);
            }
            sc.regs.clear();
        }

        sc.irqs.release(&*self.irq, &*self.io);

        if sc.csb_installed {
            self.io.write32(regs::PTNET_IO_CSBBAH, 0);
            self.io.write32(regs::PTNET_IO_CSBBAL, 0);
            sc.csb_installed = false;
        }

        drop(queues);
        sc.csb = None;
        sc.config = None;
        sc.features = PtnetFeatures::empty();
        sc.state = AttachState::Unattached;
    }

    /// Takes the device down. Safe to call in any state, any number of
    /// times.
    pub fn detach(&self) {
        let mut sc = self.core.lock();
        if sc.state == AttachState::Unattached && sc.csb.is_none() {
            debug!("{}: already detached", self.name());
            return;
        }
        self.teardown_locked(&mut sc);
        info!("{}: detached", self.name());
    }

    /// Sends a control command to the host and returns its verdict.
    pub fn ptctl(&self, cmd: PtctlCmd) -> AxResult {
        self.io.write32(regs::PTNET_IO_PTCTL, cmd.opcode());
        let status = self.io.read32(regs::PTNET_IO_PTSTS);
        if status != regs::PTNET_PTSTS_OK {
            warn!("{}: {:?} failed, status {}", self.name(), cmd, status);
            return ax_err!(Io);
        }
        debug!("{}: {:?} done", self.name(), cmd);
        Ok(())
    }

    /// Interrupt entry point: vector wired to `queue` fired.
    pub fn handle_irq(&self, queue: QueueId) -> AxResult {
        let queues = self.queues().inspect_err(|_| {
            debug!("{}: interrupt on {:?} while not attached", self.name(), queue);
        })?;
        queues.dispatch_irq(queue, &*self.io, &*self.stack)
    }

    fn ready(&self, sc: &Softc) -> AxResult<Arc<QueueSet>> {
        if sc.state != AttachState::Ready {
            return ax_err!(BadState);
        }
        self.queues()
    }

    /// Re-reads the ring geometry from the device registers.
    pub(crate) fn geometry(&self) -> AxResult<RingGeometry> {
        let sc = self.core.lock();
        if sc.state < AttachState::FeaturesNegotiated {
            return ax_err!(BadState);
        }
        let geo = RingGeometry::read(&*self.io);
        debug!("{}: geometry {:?}", self.name(), geo);
        Ok(geo)
    }

    pub(crate) fn create_rings(&self) -> AxResult {
        let sc = self.core.lock();
        let queues = self.ready(&sc)?;
        if sc.regs.total() > 0 {
            // Shared with the registered clients, already present.
            return Ok(());
        }
        queues.create_krings();
        debug!("{}: rings created", self.name());
        Ok(())
    }

    pub(crate) fn delete_rings(&self) -> AxResult {
        let sc = self.core.lock();
        let queues = self.ready(&sc)?;
        if sc.regs.total() > 0 {
            debug!("{}: rings still in use", self.name());
            return Ok(());
        }
        queues.delete_krings();
        debug!("{}: rings deleted", self.name());
        Ok(())
    }

    /// Registers (`on`) or unregisters a direct-access client.
    pub(crate) fn register(&self, kind: ClientKind, on: bool) -> AxResult {
        let drain = {
            let mut sc = self.core.lock();
            let queues = self.ready(&sc)?;
            if !queues.rings_created() {
                warn!("{}: register before rings exist", self.name());
                return ax_err!(BadState);
            }
            if on {
                self.register_locked(&mut sc, &queues, kind)?;
                None
            } else {
                self.unregister_locked(&mut sc, &queues, kind)?
            }
        };
        // Called unlocked: the stack may sync from here.
        if let Some(rx_rings) = drain {
            for ring in 0..rx_rings {
                self.stack.schedule_rx_drain(ring);
            }
        }
        Ok(())
    }

    fn register_locked(&self, sc: &mut Softc, queues: &QueueSet, kind: ClientKind) -> AxResult {
        let plan = sc.regs.plan_register(kind);
        if plan.enter_native {
            queues.for_each_kring(|k, _| k.begin_on());
        }
        if plan.regif {
            mediator::seed_for_regif(queues.csb(), queues.config());
            if let Err(e) = self.ptctl(PtctlCmd::Regif) {
                if plan.enter_native {
                    queues.for_each_kring(|k, _| k.rollback_mode());
                }
                return Err(e);
            }
            info!("{}: rings registered with the host", self.name());
        }
        if plan.pull_csb {
            queues.pull_from_csb();
        }
        if plan.enter_native {
            queues.for_each_kring(|k, _| k.commit_mode());
        }
        sc.regs.commit_register(kind);
        debug!(
            "{}: {:?} client registered, {} total",
            self.name(),
            kind,
            sc.regs.total()
        );
        Ok(())
    }

    /// Returns the number of RX rings to drain if the rings went back to the
    /// stack.
    fn unregister_locked(
        &self,
        sc: &mut Softc,
        queues: &QueueSet,
        kind: ClientKind,
    ) -> AxResult<Option<usize>> {
        let plan = sc.regs.plan_unregister(kind).inspect_err(|_| {
            warn!("{}: unbalanced {:?} unregister", self.name(), kind);
        })?;
        if plan.leave_native {
            queues.for_each_kring(|k, _| k.begin_off());
        }
        if plan.pull_csb {
            queues.pull_from_csb();
        }
        if plan.unregif {
            if let Err(e) = self.ptctl(PtctlCmd::Unregif) {
                if plan.leave_native {
                    queues.for_each_kring(|k, _| k.rollback_mode());
                }
                return Err(e);
            }
            info!("{}: rings unregistered from the host", self.name());
        }
        if plan.leave_native {
            queues.for_each_kring(|k, _| k.commit_mode());
        }
        sc.regs.commit_unregister(kind);
        debug!(
            "{}: {:?} client unregistered, {} left",
            self.name(),
            kind,
            sc.regs.total()
        );

        if !plan.exits_direct_access() {
            return Ok(None);
        }
        // Interrupts may have been off while packets arrived.
        mediator::restore_interrupts(queues.csb(), queues.config());
        Ok(Some(queues.config().num_rx_rings))
    }

    pub(crate) fn sync(&self, dir: Direction, ring: usize, flags: SyncFlags) -> AxResult<bool> {
        self.queues()?.sync(dir, ring, flags)
    }

    /// Syncs and kicks the host if the sync asked for it.
    pub(crate) fn sync_and_kick(
        &self,
        dir: Direction,
        ring: usize,
        flags: SyncFlags,
    ) -> AxResult<bool> {
        let queues = self.queues()?;
        let notify = queues.sync(dir, ring, flags)?;
        if notify {
            queues.queue(dir, ring)?.kick(&*self.io);
        }
        Ok(notify)
    }

    pub(crate) fn with_kring<R>(
        &self,
        dir: Direction,
        ring: usize,
        f: impl FnOnce(&mut Kring) -> R,
    ) -> AxResult<R> {
        let queues = self.queues()?;
        let q = queues.queue(dir, ring)?;
        let mut slot = q.kring();
        let kring = slot.as_mut().ok_or(AxError::BadState)?;
        Ok(f(kring))
    }
}

impl Drop for PtnetDevice {
    fn drop(&mut self) {
        self.detach();
    }
}

impl core::fmt::Debug for PtnetDevice {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PtnetDevice")
            .field("name", &self.options.name)
            .field("state", &self.state())
            .finish()
    }
}
