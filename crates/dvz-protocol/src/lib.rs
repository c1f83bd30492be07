// The Datoviz rendering protocol: a serializable request/response
// protocol driving a GPU renderer, layered L1 (device wrapper) through
// L5 (presenter/frame loop).
//
// The GPU plumbing L1/L2 layers are grounded on (instance/device/
// platform, the resource wrappers, the canvas/swapchain handling) is
// carried over from this workspace's previous compositor renderer; the
// request/batch/dispatcher protocol layered on top, and the resource
// manager/transfer engine/recorder that bridge the two, are new code
// built to this crate's data model. See DESIGN.md for the full grounding
// ledger.

#[macro_use]
extern crate memoffset;

pub mod alloc;
pub mod canvas;
pub mod context;
pub mod descpool;
pub mod device;
pub mod error;
pub mod graveyard;
pub mod id;
pub mod instance;
pub mod manager;
pub mod platform;
pub mod presenter;
pub mod protocol;
pub mod recorder;
pub mod resources;
pub mod transfer;
pub mod window;

pub use context::{Context, ContextInfo};
pub use error::{Error, ErrorKind, Result};
pub use id::{Id, IdCounter};
pub use presenter::{Presenter, MAX_FRAMES_IN_FLIGHT};
pub use protocol::{Batch, Dispatcher, DownloadResult, ObjectKind, Request, RequestAction, RequestFlags, RequestPayload};
pub use window::{HeadlessBackend, InputEvent, WindowBackend};

#[cfg(feature = "winit-backend")]
pub use window::WinitBackend;
