//! In-memory virtualization service for tests.

use super::{
    DeathNotifier, EventSink, RuntimeHandle, ServiceError, ServiceResult, StartRequest,
    VirtualizationService,
};
use crate::callback::VmEvent;
use parking_lot::Mutex;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct State {
    fail_initialize: Option<ServiceError>,
    fail_idsig: Option<ServiceError>,
    fail_start: Option<ServiceError>,
    fail_register: Option<ServiceError>,
    fail_link: Option<ServiceError>,
    partitions_initialized: u32,
    idsig_updates: u32,
    starts: u32,
    vms: Vec<Arc<FakeVm>>,
    death_notifiers: Vec<DeathNotifier>,
}

/// Records calls and hands out [`FakeVm`]s.
#[derive(Default)]
pub(crate) struct FakeService {
    state: Mutex<State>,
}

impl FakeService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_next_initialize(&self, err: ServiceError) {
        self.state.lock().fail_initialize = Some(err);
    }

    pub(crate) fn fail_next_idsig(&self, err: ServiceError) {
        self.state.lock().fail_idsig = Some(err);
    }

    pub(crate) fn fail_next_start(&self, err: ServiceError) {
        self.state.lock().fail_start = Some(err);
    }

    /// Fail the listener registration on the next started VM.
    pub(crate) fn fail_next_register(&self, err: ServiceError) {
        self.state.lock().fail_register = Some(err);
    }

    pub(crate) fn fail_next_link(&self, err: ServiceError) {
        self.state.lock().fail_link = Some(err);
    }

    /// Death notifiers currently registered.
    pub(crate) fn death_links(&self) -> usize {
        self.state.lock().death_notifiers.len()
    }

    pub(crate) fn partitions_initialized(&self) -> u32 {
        self.state.lock().partitions_initialized
    }

    pub(crate) fn idsig_updates(&self) -> u32 {
        self.state.lock().idsig_updates
    }

    pub(crate) fn starts(&self) -> u32 {
        self.state.lock().starts
    }

    pub(crate) fn last_vm(&self) -> Option<Arc<FakeVm>> {
        self.state.lock().vms.last().cloned()
    }

    /// Simulate the service process dying.
    pub(crate) fn kill_service(&self) {
        let notifiers = std::mem::take(&mut self.state.lock().death_notifiers);
        for vm in self.state.lock().vms.iter() {
            vm.alive.store(false, Ordering::SeqCst);
        }
        for notify in notifiers {
            notify();
        }
    }
}

fn io_err(e: std::io::Error) -> ServiceError {
    ServiceError::Rejected(e.to_string())
}

impl VirtualizationService for FakeService {
    fn initialize_writable_partition(&self, image: &File, size: u64) -> ServiceResult<()> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_initialize.take() {
            return Err(err);
        }
        state.partitions_initialized += 1;

        // Stand-in for per-instance secret material.
        let secret = format!("secret-{}", state.partitions_initialized);
        image.set_len(size).map_err(io_err)?;
        image.write_at(secret.as_bytes(), 0).map_err(io_err)?;
        Ok(())
    }

    fn create_or_update_idsig(&self, payload: &Path, output: &File) -> ServiceResult<()> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_idsig.take() {
            return Err(err);
        }
        state.idsig_updates += 1;

        let sig = format!("idsig:{}:{}", payload.display(), state.idsig_updates);
        output.set_len(0).map_err(io_err)?;
        output.write_at(sig.as_bytes(), 0).map_err(io_err)?;
        Ok(())
    }

    fn start_vm(&self, request: StartRequest<'_>) -> ServiceResult<Box<dyn RuntimeHandle>> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_start.take() {
            return Err(err);
        }
        state.starts += 1;

        let flags = unsafe { libc::fcntl(request.idsig.as_raw_fd(), libc::F_GETFL) };
        let vm = Arc::new(FakeVm {
            cid: 2 + state.starts,
            alive: AtomicBool::new(true),
            fail_queries: AtomicBool::new(false),
            idsig_read_only: flags >= 0 && (flags & libc::O_ACCMODE) == libc::O_RDONLY,
            console: request.console,
            listener: Mutex::new(None),
            fail_register: Mutex::new(state.fail_register.take()),
        });
        state.vms.push(vm.clone());

        Ok(Box::new(FakeRuntime { vm }))
    }

    fn link_to_death(&self, notifier: DeathNotifier) -> ServiceResult<()> {
        let mut state = self.state.lock();
        if let Some(err) = state.fail_link.take() {
            return Err(err);
        }
        state.death_notifiers.push(notifier);
        Ok(())
    }
}

/// A VM "running" in the fake service.
pub(crate) struct FakeVm {
    cid: u32,
    alive: AtomicBool,
    fail_queries: AtomicBool,
    idsig_read_only: bool,
    console: File,
    listener: Mutex<Option<EventSink>>,
    fail_register: Mutex<Option<ServiceError>>,
}

impl FakeVm {
    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn idsig_read_only(&self) -> bool {
        self.idsig_read_only
    }

    /// Console write end handed to the service.
    pub(crate) fn console(&self) -> File {
        self.console.try_clone().unwrap()
    }

    pub(crate) fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn emit(&self, event: VmEvent) {
        let listener = self.listener.lock().clone();
        if let Some(sink) = listener {
            sink(event);
        }
    }

    /// The VM process exits on its own.
    pub(crate) fn crash(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.emit(VmEvent::Died);
    }
}

struct FakeRuntime {
    vm: Arc<FakeVm>,
}

impl FakeRuntime {
    fn check(&self) -> ServiceResult<()> {
        if self.vm.fail_queries.load(Ordering::SeqCst) {
            return Err(ServiceError::Communication("connection reset".into()));
        }
        Ok(())
    }
}

impl RuntimeHandle for FakeRuntime {
    fn is_running(&self) -> ServiceResult<bool> {
        self.check()?;
        Ok(self.vm.is_alive())
    }

    fn cid(&self) -> ServiceResult<u32> {
        self.check()?;
        Ok(self.vm.cid)
    }

    fn register_listener(&self, sink: EventSink) -> ServiceResult<()> {
        if let Some(err) = self.vm.fail_register.lock().take() {
            return Err(err);
        }
        *self.vm.listener.lock() = Some(sink);
        Ok(())
    }
}

impl Drop for FakeRuntime {
    fn drop(&mut self) {
        self.vm.alive.store(false, Ordering::SeqCst);
    }
}
