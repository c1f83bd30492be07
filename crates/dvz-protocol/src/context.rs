// The context: the owning root of one rendering session. Threads
// together the instance, device, resource manager, dispatcher, id
// counter, frame clock, and the window a presenter drives.
//
// New code (no single teacher module plays this role: `thundr::Thundr`
// in lib.rs came closest, owning one `Renderer` and exposing its methods
// directly, but this protocol's five layers and explicit batch/dispatch
// split don't fit behind one facade the way a single fixed-function
// renderer does). Shaped instead by how `thundr::Thundr::new` sequences
// construction (instance, then device, then the renderer state that
// depends on both) and by `dvz_utils::num_worker_threads` for the
// external `NUM_THREADS` knob described in the protocol's external
// interfaces.

use std::sync::Arc;

use crate::device::Device;
use crate::error::{Error, ErrorCallback, ErrorKind, Result};
use crate::fatal;
use crate::id::IdCounter;
use crate::instance::{CreateInfo, Instance};
use crate::manager::ResourceManager;
use crate::protocol::{Batch, Dispatcher, DownloadResult};
use crate::window::WindowBackend;

use dvz_utils::log;

/// Construction-time knobs for a `Context`: validation toggles plus the
/// worker-thread cap the protocol's external interfaces describe
/// (`NUM_THREADS`, read via `dvz_utils::num_worker_threads` unless
/// overridden here).
#[derive(Default)]
pub struct ContextInfo {
    pub enable_validation: bool,
    pub enable_sync_validation: bool,
    pub num_worker_threads: Option<usize>,
}

/// Owns every long-lived piece of one rendering session: the Vulkan
/// instance/device, the resource manager, the dispatcher (which in turn
/// owns the canvas registry and transfer engine), the id counter, and
/// the monotonic frame clock the graveyard and dispatcher key deletions
/// off of.
pub struct Context {
    pub instance: Arc<Instance>,
    pub device: Device,
    pub manager: ResourceManager,
    pub dispatcher: Dispatcher,
    pub ids: IdCounter,
    frame: u64,
    num_worker_threads: usize,
    error_callback: Option<ErrorCallback>,
}

impl Context {
    /// Builds a context with no window attached (a headless/offscreen
    /// session): every `CreateCanvas` request produces an offscreen
    /// canvas until `attach_window` is called.
    pub fn new(info: &ContextInfo) -> Result<Self> {
        let create_info = CreateInfo {
            enable_validation: info.enable_validation,
            enable_sync_validation: info.enable_sync_validation,
            surface_extensions: Vec::new(),
        };
        Self::build(create_info, info)
    }

    /// Builds a context with a window attached from the start: the
    /// instance is created with the window backend's required surface
    /// extensions, and the dispatcher's surface is set before the caller
    /// submits its first `CreateCanvas`.
    pub fn new_windowed(info: &ContextInfo, window: &dyn WindowBackend) -> Result<Self> {
        let create_info = CreateInfo {
            enable_validation: info.enable_validation,
            enable_sync_validation: info.enable_sync_validation,
            surface_extensions: window.required_extensions(),
        };
        let mut ctx = Self::build(create_info, info)?;
        let surface = window.create_surface(&ctx.instance)?;
        ctx.dispatcher.set_surface(surface);
        Ok(ctx)
    }

    fn build(create_info: CreateInfo, info: &ContextInfo) -> Result<Self> {
        let instance = Arc::new(Instance::new(&create_info)?);
        let device = Device::new(instance.clone(), &create_info)?;
        let manager = ResourceManager::new(&device);
        let num_worker_threads = info.num_worker_threads.unwrap_or_else(dvz_utils::num_worker_threads);
        log::info!("context created with {} worker thread(s)", num_worker_threads);
        Ok(Self {
            instance,
            device,
            manager,
            dispatcher: Dispatcher::new(),
            ids: IdCounter::new(),
            frame: 0,
            num_worker_threads,
            error_callback: None,
        })
    }

    pub fn num_worker_threads(&self) -> usize {
        self.num_worker_threads
    }

    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    /// Installs the error callback every failed request and fatal abort
    /// routes through. Replaces any previously installed callback.
    pub fn set_error_callback(&mut self, cb: ErrorCallback) {
        self.error_callback = Some(cb);
    }

    fn report(&self, err: &Error) {
        match &self.error_callback {
            Some(cb) => cb(err),
            None => log::error!("{}", err),
        }
    }

    /// Submits a batch against this context's device/instance/manager,
    /// advancing no frame counter of its own — the presenter owns frame
    /// advancement during `run`/`frame`; a caller driving requests outside
    /// the present loop (setup-time resource creation) calls this
    /// directly with the context's current frame.
    pub fn submit(&mut self, batch: Batch) -> Vec<DownloadResult> {
        self.dispatcher.submit(&self.device, &self.instance, &mut self.manager, self.frame, batch)
    }

    /// Fails fast on construction errors the protocol's error taxonomy
    /// marks fatal (`ErrorKind::is_fatal`), routing everything else
    /// through the installed callback/log.
    pub fn handle(&self, result: Result<()>) {
        if let Err(e) = result {
            if e.kind.is_fatal() {
                fatal!(e);
            }
            self.report(&e);
        }
    }

    pub unsafe fn destroy(&mut self) {
        self.device.wait_for_latest_timeline();
        self.dispatcher.destroy_all(&self.device);
        self.manager.destroy_all(&self.device);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            self.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_info_defaults_to_auto_worker_threads() {
        let info = ContextInfo::default();
        assert!(info.num_worker_threads.is_none());
    }
}
