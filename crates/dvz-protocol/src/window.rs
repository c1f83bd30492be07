// Windowing: the `WindowBackend` trait the presenter drives, a winit
// implementation behind the `winit-backend` feature, and a headless
// implementation for tests that never touches a real display.
//
// Grounded on `ennis-autograph-ng/src/window.rs`'s per-platform
// `create_surface` (xlib/win32/macOS `vk::*SurfaceCreateInfo` branches
// keyed on `cfg(target_os)`), generalized from a hardcoded `winit::Window`
// parameter to `raw_window_handle::HasRawWindowHandle`, since
// `raw-window-handle` is already in this crate's dependency table for
// exactly this purpose and lets the same surface-creation code serve any
// future second backend without a winit dependency of its own.

use ash::vk;

use crate::error::{Error, ErrorKind, Result};
use crate::instance::Instance;

/// A mouse button/position event, already translated into window-local
/// pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseEvent {
    pub x: f64,
    pub y: f64,
    pub button: Option<MouseButton>,
    pub pressed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Synthesized from a press/move/release sequence by the backend's event
/// router: `Start` the frame a button goes down, `Move` every subsequent
/// cursor position until release, `Stop` on release or on the button
/// going up outside the window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragEvent {
    Start { x: f64, y: f64, button: MouseButton },
    Move { x: f64, y: f64, dx: f64, dy: f64 },
    Stop { x: f64, y: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyEvent {
    pub code: u32,
    pub pressed: bool,
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Mouse(MouseEvent),
    Drag(DragEvent),
    Keyboard(KeyEvent),
    Resize(u32, u32),
}

/// What the presenter needs from a window: events to route, a close
/// flag, the current drawable size, and the ability to hand over a
/// `vk::SurfaceKHR` once a `vk::Instance` exists.
pub trait WindowBackend {
    fn poll_events(&mut self) -> Vec<InputEvent>;
    fn should_close(&self) -> bool;
    fn framebuffer_size(&self) -> (u32, u32);
    fn content_scale(&self) -> f64;
    /// Instance extensions this backend's `create_surface` needs enabled,
    /// fed into `instance::CreateInfo::surface_extensions` before the
    /// instance is created.
    fn required_extensions(&self) -> Vec<String>;
    /// Creates the `vk::SurfaceKHR` this window presents to. Called once,
    /// after the instance exists and before the first canvas is created.
    fn create_surface(&self, instance: &Instance) -> Result<vk::SurfaceKHR>;
}

/// Minimum cursor distance (in window-local pixels) a press must travel
/// before it counts as a drag rather than a click. Squared so `on_move`
/// can compare against it without a `sqrt` per cursor event.
const DRAG_THRESHOLD_SQUARED: f64 = 4.0 * 4.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum DragState {
    Idle,
    /// Button down at `(x, y)`, not yet moved past the threshold.
    Pressed { button: MouseButton, x: f64, y: f64 },
    /// Past the threshold: every further `on_mouse`/`on_move` call emits
    /// `Move`/`Stop` instead of re-checking distance.
    Dragging { button: MouseButton, x: f64, y: f64 },
}

/// Tracks an in-progress drag so raw press/move/release events can be
/// turned into `DragEvent::{Start,Move,Stop}`. A press alone is a click:
/// `Start` only fires once a subsequent move carries the cursor past
/// `DRAG_THRESHOLD_SQUARED` from the press point.
struct DragTracker {
    state: DragState,
}

impl Default for DragTracker {
    fn default() -> Self {
        Self { state: DragState::Idle }
    }
}

impl DragTracker {
    fn on_mouse(&mut self, ev: MouseEvent) -> Option<DragEvent> {
        match (self.state, ev.button, ev.pressed) {
            (DragState::Idle, Some(button), true) => {
                self.state = DragState::Pressed { button, x: ev.x, y: ev.y };
                None
            }
            (DragState::Pressed { button, .. }, Some(b), false) if b == button => {
                // Released before crossing the threshold: a click, not a drag.
                self.state = DragState::Idle;
                None
            }
            (DragState::Dragging { button, .. }, Some(b), false) if b == button => {
                self.state = DragState::Idle;
                Some(DragEvent::Stop { x: ev.x, y: ev.y })
            }
            _ => None,
        }
    }

    fn on_move(&mut self, x: f64, y: f64) -> Option<DragEvent> {
        match self.state {
            DragState::Idle => None,
            DragState::Pressed { button, x: px, y: py } => {
                let (dx, dy) = (x - px, y - py);
                if dx * dx + dy * dy < DRAG_THRESHOLD_SQUARED {
                    return None;
                }
                self.state = DragState::Dragging { button, x, y };
                Some(DragEvent::Start { x, y, button })
            }
            DragState::Dragging { button, x: last_x, y: last_y } => {
                self.state = DragState::Dragging { button, x, y };
                Some(DragEvent::Move { x, y, dx: x - last_x, dy: y - last_y })
            }
        }
    }
}

#[cfg(feature = "winit-backend")]
pub use winit_backend::WinitBackend;

#[cfg(feature = "winit-backend")]
mod winit_backend {
    use super::*;
    use raw_window_handle::{HasRawWindowHandle, RawWindowHandle};
    use winit::dpi::LogicalSize;
    use winit::event::{ElementState, Event, MouseButton as WinitMouseButton, VirtualKeyCode, WindowEvent};
    use winit::event_loop::{ControlFlow, EventLoop};
    use winit::window::{Window, WindowBuilder};

    fn map_button(b: WinitMouseButton) -> Option<MouseButton> {
        match b {
            WinitMouseButton::Left => Some(MouseButton::Left),
            WinitMouseButton::Right => Some(MouseButton::Right),
            WinitMouseButton::Middle => Some(MouseButton::Middle),
            WinitMouseButton::Other(_) => None,
        }
    }

    /// A live winit window plus the instance extensions/surface-creation
    /// logic for whichever platform `raw_window_handle` reports.
    pub struct WinitBackend {
        event_loop: Option<EventLoop<()>>,
        window: Window,
        drag: DragTracker,
        last_cursor: (f64, f64),
        close_requested: bool,
    }

    impl WinitBackend {
        pub fn new(title: &str, width: u32, height: u32) -> Self {
            let event_loop = EventLoop::new();
            let window = WindowBuilder::new()
                .with_title(title)
                .with_inner_size(LogicalSize::new(width, height))
                .build(&event_loop)
                .expect("failed to create window");
            Self {
                event_loop: Some(event_loop),
                window,
                drag: DragTracker::default(),
                last_cursor: (0.0, 0.0),
                close_requested: false,
            }
        }
    }

    impl WindowBackend for WinitBackend {
        fn poll_events(&mut self) -> Vec<InputEvent> {
            let mut out = Vec::new();
            let event_loop = match self.event_loop.take() {
                Some(e) => e,
                None => return out,
            };
            // `run_return` isn't available without the extra platform
            // extension trait, so events are drained with a manual
            // `ControlFlow::Exit` on the first pass; the event loop handle
            // is reconstructed by the caller's next `poll_events` call via
            // `EventLoopBuilder` would be the winit 0.28+ way, but 0.27's
            // only portable option from inside a method is to poll the
            // platform queue directly.
            use winit::platform::run_return::EventLoopExtRunReturn;
            let mut event_loop = event_loop;
            let close_requested = &mut self.close_requested;
            let drag = &mut self.drag;
            let last_cursor = &mut self.last_cursor;
            let window = &self.window;
            event_loop.run_return(|event, _, control_flow| {
                *control_flow = ControlFlow::Poll;
                match event {
                    Event::WindowEvent { event, window_id } if window_id == window.id() => match event {
                        WindowEvent::CloseRequested => *close_requested = true,
                        WindowEvent::Resized(size) => out.push(InputEvent::Resize(size.width, size.height)),
                        WindowEvent::CursorMoved { position, .. } => {
                            *last_cursor = (position.x, position.y);
                            out.push(InputEvent::Mouse(MouseEvent { x: position.x, y: position.y, button: None, pressed: false }));
                            if let Some(d) = drag.on_move(position.x, position.y) {
                                out.push(InputEvent::Drag(d));
                            }
                        }
                        WindowEvent::MouseInput { state, button, .. } => {
                            let ev = MouseEvent {
                                x: last_cursor.0,
                                y: last_cursor.1,
                                button: map_button(button),
                                pressed: state == ElementState::Pressed,
                            };
                            out.push(InputEvent::Mouse(ev));
                            if let Some(d) = drag.on_mouse(ev) {
                                out.push(InputEvent::Drag(d));
                            }
                        }
                        WindowEvent::KeyboardInput { input, .. } => {
                            if let Some(keycode) = input.virtual_keycode {
                                let modifiers = input.modifiers;
                                out.push(InputEvent::Keyboard(KeyEvent {
                                    code: keycode_to_u32(keycode),
                                    pressed: input.state == ElementState::Pressed,
                                    shift: modifiers.shift(),
                                    ctrl: modifiers.ctrl(),
                                    alt: modifiers.alt(),
                                }));
                            }
                        }
                        _ => {}
                    },
                    Event::MainEventsCleared => *control_flow = ControlFlow::Exit,
                    _ => {}
                }
            });
            self.event_loop = Some(event_loop);
            out
        }

        fn should_close(&self) -> bool {
            self.close_requested
        }

        fn framebuffer_size(&self) -> (u32, u32) {
            let size = self.window.inner_size();
            (size.width, size.height)
        }

        fn content_scale(&self) -> f64 {
            self.window.scale_factor()
        }

        fn required_extensions(&self) -> Vec<String> {
            platform_surface_extensions(self.window.raw_window_handle())
        }

        fn create_surface(&self, instance: &Instance) -> Result<vk::SurfaceKHR> {
            unsafe { create_surface_for_handle(instance, self.window.raw_window_handle()) }
        }
    }

    fn keycode_to_u32(code: VirtualKeyCode) -> u32 {
        code as u32
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    fn platform_surface_extensions(handle: raw_window_handle::RawWindowHandle) -> Vec<String> {
        use ash::extensions::khr;
        let mut exts = vec![khr::Surface::name().to_str().unwrap().to_owned()];
        match handle {
            RawWindowHandle::Xlib(_) => exts.push(khr::XlibSurface::name().to_str().unwrap().to_owned()),
            RawWindowHandle::Wayland(_) => exts.push(khr::WaylandSurface::name().to_str().unwrap().to_owned()),
            _ => {}
        }
        exts
    }

    #[cfg(target_os = "macos")]
    fn platform_surface_extensions(_handle: raw_window_handle::RawWindowHandle) -> Vec<String> {
        use ash::extensions::{ext, khr};
        vec![
            khr::Surface::name().to_str().unwrap().to_owned(),
            ext::MetalSurface::name().to_str().unwrap().to_owned(),
        ]
    }

    #[cfg(target_os = "windows")]
    fn platform_surface_extensions(_handle: raw_window_handle::RawWindowHandle) -> Vec<String> {
        use ash::extensions::khr;
        vec![
            khr::Surface::name().to_str().unwrap().to_owned(),
            khr::Win32Surface::name().to_str().unwrap().to_owned(),
        ]
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    unsafe fn create_surface_for_handle(instance: &Instance, handle: raw_window_handle::RawWindowHandle) -> Result<vk::SurfaceKHR> {
        use ash::extensions::khr;
        match handle {
            RawWindowHandle::Xlib(h) => {
                let loader = khr::XlibSurface::new(&instance.loader, &instance.inst);
                let info = vk::XlibSurfaceCreateInfoKHR::builder().dpy(h.display as *mut _).window(h.window);
                loader
                    .create_xlib_surface(&info, None)
                    .map_err(|e| Error::new(ErrorKind::DeviceInit, format!("vkCreateXlibSurfaceKHR failed: {:?}", e)))
            }
            RawWindowHandle::Wayland(h) => {
                let loader = khr::WaylandSurface::new(&instance.loader, &instance.inst);
                let info = vk::WaylandSurfaceCreateInfoKHR::builder().display(h.display).surface(h.surface);
                loader
                    .create_wayland_surface(&info, None)
                    .map_err(|e| Error::new(ErrorKind::DeviceInit, format!("vkCreateWaylandSurfaceKHR failed: {:?}", e)))
            }
            _ => Err(Error::new(ErrorKind::DeviceInit, "unsupported window handle for this platform")),
        }
    }

    #[cfg(target_os = "macos")]
    unsafe fn create_surface_for_handle(instance: &Instance, handle: raw_window_handle::RawWindowHandle) -> Result<vk::SurfaceKHR> {
        use ash::extensions::ext;
        match handle {
            RawWindowHandle::AppKit(h) => {
                let loader = ext::MetalSurface::new(&instance.loader, &instance.inst);
                let info = vk::MetalSurfaceCreateInfoEXT::builder().layer(h.ns_view as *const _);
                loader
                    .create_metal_surface(&info, None)
                    .map_err(|e| Error::new(ErrorKind::DeviceInit, format!("vkCreateMetalSurfaceEXT failed: {:?}", e)))
            }
            _ => Err(Error::new(ErrorKind::DeviceInit, "unsupported window handle for this platform")),
        }
    }

    #[cfg(target_os = "windows")]
    unsafe fn create_surface_for_handle(instance: &Instance, handle: raw_window_handle::RawWindowHandle) -> Result<vk::SurfaceKHR> {
        use ash::extensions::khr;
        match handle {
            RawWindowHandle::Win32(h) => {
                let loader = khr::Win32Surface::new(&instance.loader, &instance.inst);
                let info = vk::Win32SurfaceCreateInfoKHR::builder().hinstance(h.hinstance).hwnd(h.hwnd);
                loader
                    .create_win32_surface(&info, None)
                    .map_err(|e| Error::new(ErrorKind::DeviceInit, format!("vkCreateWin32SurfaceKHR failed: {:?}", e)))
            }
            _ => Err(Error::new(ErrorKind::DeviceInit, "unsupported window handle for this platform")),
        }
    }
}

/// A backend with no real window at all: `poll_events` replays a queue
/// an owner pushed onto with `push_event`, `should_close` is a flag the
/// owner flips, and `create_surface` always fails since there is no
/// presentable surface. Used by the scenario tests (`tests/scenarios.rs`)
/// to drive the presenter against `Canvas::new_offscreen` canvases.
pub struct HeadlessBackend {
    width: u32,
    height: u32,
    queue: Vec<InputEvent>,
    closed: bool,
}

impl HeadlessBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, queue: Vec::new(), closed: false }
    }

    pub fn push_event(&mut self, event: InputEvent) {
        self.queue.push(event);
    }

    pub fn request_close(&mut self) {
        self.closed = true;
    }
}

impl WindowBackend for HeadlessBackend {
    fn poll_events(&mut self) -> Vec<InputEvent> {
        std::mem::take(&mut self.queue)
    }

    fn should_close(&self) -> bool {
        self.closed
    }

    fn framebuffer_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn content_scale(&self) -> f64 {
        1.0
    }

    fn required_extensions(&self) -> Vec<String> {
        Vec::new()
    }

    fn create_surface(&self, _instance: &Instance) -> Result<vk::SurfaceKHR> {
        Err(Error::new(ErrorKind::ValidationFailed, "the headless window backend has no presentable surface"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_backend_replays_pushed_events_once() {
        let mut backend = HeadlessBackend::new(640, 480);
        backend.push_event(InputEvent::Resize(800, 600));
        assert_eq!(backend.poll_events().len(), 1);
        assert!(backend.poll_events().is_empty());
    }

    #[test]
    fn drag_tracker_emits_start_once_past_the_threshold_then_move_then_stop() {
        let mut drag = DragTracker::default();
        let down = MouseEvent { x: 1.0, y: 1.0, button: Some(MouseButton::Left), pressed: true };
        assert_eq!(drag.on_mouse(down), None, "a press alone should not emit Start");

        // A small jitter under the threshold is still a pending click.
        assert_eq!(drag.on_move(2.0, 2.0), None, "movement under the threshold should not emit Start");

        assert!(matches!(drag.on_move(20.0, 20.0), Some(DragEvent::Start { .. })), "movement past the threshold should emit Start");
        assert!(matches!(drag.on_move(25.0, 30.0), Some(DragEvent::Move { .. })));

        let up = MouseEvent { x: 25.0, y: 30.0, button: Some(MouseButton::Left), pressed: false };
        assert!(matches!(drag.on_mouse(up), Some(DragEvent::Stop { .. })));
    }

    #[test]
    fn a_press_and_release_under_the_threshold_is_a_click_not_a_drag() {
        let mut drag = DragTracker::default();
        let down = MouseEvent { x: 5.0, y: 5.0, button: Some(MouseButton::Left), pressed: true };
        assert_eq!(drag.on_mouse(down), None);
        assert_eq!(drag.on_move(6.0, 6.0), None, "movement under the threshold should not emit Start");

        let up = MouseEvent { x: 6.0, y: 6.0, button: Some(MouseButton::Left), pressed: false };
        assert_eq!(drag.on_mouse(up), None, "releasing before crossing the threshold should not emit Stop");
    }

    #[test]
    fn drag_tracker_ignores_move_events_with_no_press_active() {
        let mut drag = DragTracker::default();
        assert_eq!(drag.on_move(10.0, 10.0), None);
    }
}
