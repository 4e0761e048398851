//! Mock host, DMA, interrupt controller and network stack shared by the
//! integration tests.

#![allow(dead_code)]

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axerrno::{AxError, AxResult};
use memory_addr::PhysAddr;
use ptnet::regs;
use ptnet::{
    CtrlCmd, Direction, DmaHal, HostCsb, HostRing, IoWindow, IrqController, IrqCookie, NetStack,
    PtctlCmd, PtnetDevice, PtnetFeatures, PtnetOptions, QueueId,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Ring state the mock host leaves in the CSB when REGIF arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPreset {
    pub head: u32,
    pub cur: u32,
    pub hwcur: u32,
    pub hwtail: u32,
}

#[derive(Debug, Default)]
pub struct HostState {
    /// Every register write, in order.
    pub writes: Vec<(usize, u32)>,
    pub ptfeat: u32,
    pub csb_hi: u32,
    pub csb_addr: u64,
    pub regif: u32,
    pub unregif: u32,
    pub registered: bool,
    pub ptsts: u32,
    /// Fail the next `n` PTCTL commands.
    pub fail_ptctl: u32,
    pub ctrl: Vec<u32>,
    pub kicks: Vec<usize>,
    /// `(guest_need_kick, host_need_kick)` of every ring when REGIF arrived.
    pub regif_flags: Vec<(bool, bool)>,
    pub preset: Option<HostPreset>,
}

/// Host side of the I/O window.
pub struct MockHost {
    pub features: PtnetFeatures,
    pub tx_rings: u32,
    pub rx_rings: u32,
    pub tx_slots: u32,
    pub rx_slots: u32,
    pub mac: [u8; 6],
    pub nifp_offset: u32,
    pub state: Mutex<HostState>,
}

impl MockHost {
    pub fn new(tx_rings: u32, rx_rings: u32, slots: u32) -> Self {
        Self {
            features: PtnetFeatures::BASE | PtnetFeatures::VNET_HDR,
            tx_rings,
            rx_rings,
            tx_slots: slots,
            rx_slots: slots,
            mac: [0x00, 0x16, 0x3e, 0x12, 0x34, 0x56],
            nifp_offset: 0x2000,
            state: Mutex::new(HostState::default()),
        }
    }

    pub fn without_passthrough(mut self) -> Self {
        self.features = PtnetFeatures::empty();
        self
    }

    pub fn num_rings(&self) -> usize {
        (self.tx_rings + self.rx_rings) as usize
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state.lock().unwrap()
    }

    /// Runs `f` on the host view of the installed CSB.
    pub fn with_csb<R>(&self, f: impl FnOnce(&HostCsb<'_>) -> R) -> Option<R> {
        let addr = self.state().csb_addr;
        Self::csb_at(addr, self.num_rings()).map(|csb| f(&csb))
    }

    pub fn with_ring<R>(&self, index: usize, f: impl FnOnce(HostRing<'_>) -> R) -> Option<R> {
        self.with_csb(|csb| csb.ring(index).map(f)).flatten()
    }

    fn csb_at<'a>(addr: u64, num_rings: usize) -> Option<HostCsb<'a>> {
        let base = NonNull::new(addr as usize as *mut u8)?;
        // SAFETY: `MockDma` maps physical == virtual and the tests only look
        // at the CSB while the device is attached.
        Some(unsafe { HostCsb::from_raw(base, num_rings) })
    }

    fn handle_ptctl(&self, st: &mut HostState, cmd: u32) {
        if st.fail_ptctl > 0 {
            st.fail_ptctl -= 1;
            st.ptsts = 22;
            return;
        }
        st.ptsts = regs::PTNET_PTSTS_OK;
        let csb = Self::csb_at(st.csb_addr, self.num_rings());
        if cmd == PtctlCmd::Regif.opcode() {
            st.regif += 1;
            st.registered = true;
            if let Some(csb) = csb {
                st.regif_flags = (0..csb.num_rings())
                    .filter_map(|i| csb.ring(i))
                    .map(|r| (r.guest_need_kick(), r.host_need_kick()))
                    .collect();
                match st.preset {
                    Some(p) => {
                        for r in (0..csb.num_rings()).filter_map(|i| csb.ring(i)) {
                            r.init_guest_cursors(p.head, p.cur);
                            r.publish(p.hwcur, p.hwtail);
                        }
                    }
                    None => {
                        // A fresh host hands out every TX slot but one.
                        for r in (0..self.tx_rings as usize).filter_map(|i| csb.ring(i)) {
                            let hwcur = r.hwcur();
                            r.publish(hwcur, (hwcur + self.tx_slots - 1) % self.tx_slots);
                        }
                    }
                }
            }
        } else if cmd == PtctlCmd::Unregif.opcode() {
            st.unregif += 1;
            st.registered = false;
        }
    }
}

impl IoWindow for MockHost {
    fn read32(&self, offset: usize) -> u32 {
        let st = self.state();
        match offset {
            regs::PTNET_IO_PTFEAT => st.ptfeat,
            regs::PTNET_IO_PTSTS => st.ptsts,
            regs::PTNET_IO_MAC_HI => u16::from_be_bytes([self.mac[0], self.mac[1]]) as u32,
            regs::PTNET_IO_MAC_LO => {
                u32::from_be_bytes([self.mac[2], self.mac[3], self.mac[4], self.mac[5]])
            }
            regs::PTNET_IO_CSBBAH => st.csb_hi,
            regs::PTNET_IO_CSBBAL => st.csb_addr as u32,
            regs::PTNET_IO_NIFP_OFS => self.nifp_offset,
            regs::PTNET_IO_NUM_TX_RINGS => self.tx_rings,
            regs::PTNET_IO_NUM_RX_RINGS => self.rx_rings,
            regs::PTNET_IO_NUM_TX_SLOTS => self.tx_slots,
            regs::PTNET_IO_NUM_RX_SLOTS => self.rx_slots,
            _ => 0,
        }
    }

    fn write32(&self, offset: usize, val: u32) {
        let mut st = self.state();
        st.writes.push((offset, val));
        match offset {
            regs::PTNET_IO_PTFEAT => st.ptfeat = val & self.features.bits(),
            regs::PTNET_IO_PTCTL => self.handle_ptctl(&mut st, val),
            regs::PTNET_IO_CTRL => st.ctrl.push(val),
            regs::PTNET_IO_CSBBAH => st.csb_hi = val,
            // The low half latches the full address.
            regs::PTNET_IO_CSBBAL => st.csb_addr = ((st.csb_hi as u64) << 32) | val as u64,
            off if off >= regs::PTNET_IO_KICK_BASE => {
                st.kicks.push((off - regs::PTNET_IO_KICK_BASE) / 4)
            }
            _ => {}
        }
    }
}

/// Heap-backed DMA memory, physical address == virtual address.
#[derive(Default)]
pub struct MockDma {
    pub fail: AtomicBool,
    pub live: AtomicUsize,
    pub allocs: AtomicUsize,
}

impl DmaHal for MockDma {
    fn dma_alloc(&self, size: usize) -> AxResult<(PhysAddr, NonNull<u8>)> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AxError::NoMemory);
        }
        let layout = Layout::from_size_align(size, 4096).map_err(|_| AxError::InvalidInput)?;
        // SAFETY: `size` is non-zero, the device never asks for an empty CSB.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(AxError::NoMemory)?;
        self.live.fetch_add(1, Ordering::SeqCst);
        self.allocs.fetch_add(1, Ordering::SeqCst);
        Ok((PhysAddr::from(ptr.as_ptr() as usize), ptr))
    }

    unsafe fn dma_dealloc(&self, _paddr: PhysAddr, vaddr: NonNull<u8>, size: usize) {
        let layout = Layout::from_size_align(size, 4096).unwrap();
        unsafe { dealloc(vaddr.as_ptr(), layout) };
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockIrq {
    pub max: usize,
    /// Grant this many vectors instead of the number asked for.
    pub grant: Option<usize>,
    pub fail_setup_at: Option<usize>,
    pub allocated: AtomicBool,
    pub wired: Mutex<Vec<(usize, QueueId)>>,
}

impl MockIrq {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            grant: None,
            fail_setup_at: None,
            allocated: AtomicBool::new(false),
            wired: Mutex::new(Vec::new()),
        }
    }

    pub fn wired(&self) -> Vec<(usize, QueueId)> {
        self.wired.lock().unwrap().clone()
    }
}

impl IrqController for MockIrq {
    fn max_vectors(&self) -> usize {
        self.max
    }

    fn alloc_vectors(&self, count: usize) -> AxResult<usize> {
        self.allocated.store(true, Ordering::SeqCst);
        Ok(self.grant.unwrap_or(count))
    }

    fn setup_irq(&self, vector: usize, queue: QueueId) -> AxResult<IrqCookie> {
        if self.fail_setup_at == Some(vector) {
            return Err(AxError::ResourceBusy);
        }
        self.wired.lock().unwrap().push((vector, queue));
        Ok(IrqCookie(vector + 100))
    }

    fn teardown_irq(&self, vector: usize, cookie: IrqCookie) {
        assert_eq!(cookie, IrqCookie(vector + 100));
        self.wired.lock().unwrap().retain(|&(v, _)| v != vector);
    }

    fn release_vectors(&self) {
        self.allocated.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingStack {
    pub events: Mutex<Vec<(Direction, usize)>>,
    pub rx_drains: Mutex<Vec<usize>>,
}

impl RecordingStack {
    pub fn events(&self) -> Vec<(Direction, usize)> {
        self.events.lock().unwrap().clone()
    }

    pub fn rx_drains(&self) -> Vec<usize> {
        self.rx_drains.lock().unwrap().clone()
    }
}

impl NetStack for RecordingStack {
    fn ring_event(&self, dir: Direction, ring: usize) {
        self.events.lock().unwrap().push((dir, ring));
    }

    fn schedule_rx_drain(&self, ring: usize) {
        self.rx_drains.lock().unwrap().push(ring);
    }
}

/// A device wired to fresh mocks.
pub struct Harness {
    pub host: Arc<MockHost>,
    pub dma: Arc<MockDma>,
    pub irq: Arc<MockIrq>,
    pub stack: Arc<RecordingStack>,
    pub dev: PtnetDevice,
}

impl Harness {
    pub fn new(host: MockHost) -> Self {
        Self::with_irq(host, MockIrq::new(64))
    }

    pub fn with_irq(host: MockHost, irq: MockIrq) -> Self {
        init_logger();
        let host = Arc::new(host);
        let dma = Arc::new(MockDma::default());
        let irq = Arc::new(irq);
        let stack = Arc::new(RecordingStack::default());
        let dev = PtnetDevice::new(
            PtnetOptions::new("ptnet0").with_features(PtnetFeatures::VNET_HDR),
            host.clone(),
            dma.clone(),
            irq.clone(),
            stack.clone(),
        );
        Self {
            host,
            dma,
            irq,
            stack,
            dev,
        }
    }

    /// Attached device with local rings created.
    pub fn ready(tx_rings: u32, rx_rings: u32, slots: u32) -> Self {
        let h = Self::new(MockHost::new(tx_rings, rx_rings, slots));
        h.dev.attach().expect("attach failed");
        h.dev.native().create_rings().expect("create_rings failed");
        h
    }

    /// Nothing attach obtained is still held.
    pub fn assert_released(&self) {
        assert_eq!(self.dma.live.load(Ordering::SeqCst), 0, "CSB memory leaked");
        assert!(self.irq.wired().is_empty(), "handlers left wired");
        assert!(!self.irq.allocated.load(Ordering::SeqCst), "vectors not released");
        let st = self.host.state();
        assert_eq!(st.csb_addr, 0, "CSB address left installed");
        let inits = st.ctrl.iter().filter(|&&c| c == CtrlCmd::IrqInit.opcode()).count();
        let finis = st.ctrl.iter().filter(|&&c| c == CtrlCmd::IrqFini.opcode()).count();
        assert_eq!(inits, finis, "IRQINIT without IRQFINI");
    }
}
