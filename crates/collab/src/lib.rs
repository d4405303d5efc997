//! Collaboration host for cogrid workbooks.
//!
//! Each open workbook runs as a single-writer actor (`WorkbookHandle`) that
//! applies operations in arrival order, tracks sessions, and fans accepted
//! change sets out to per-session bounded event queues. The `Hub` routes
//! requests to workbooks by id.

pub mod bridge;
pub mod error;
pub mod events;
pub mod handle;
pub mod hub;
pub mod session;
pub mod wire;

pub use bridge::{Connected, Reconnected};
pub use error::{CollabError, HubError, SessionError};
pub use events::{EventReceiver, EventRegistry, SessionEvent};
pub use handle::{options_from_settings, WorkbookHandle};
pub use hub::Hub;
pub use session::{SessionInfo, SessionManager, SessionState};
