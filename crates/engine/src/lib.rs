pub mod cell;
pub mod cell_id;
pub mod conflict;
pub mod dep_graph;
pub mod error;
pub mod events;
pub mod formula;
pub mod oplog;
pub mod recalc;
pub mod sheet;
pub mod workbook;

pub use cell_id::CellId;
pub use conflict::{ConflictPolicy, LastWriterWins, RejectStale};
pub use error::OperationError;
pub use events::{CellChange, Notice, ValueChangeSet};
pub use formula::eval::{ErrorKind, Value};
pub use oplog::{LogError, Operation, SessionId};
pub use recalc::CycleReport;
pub use sheet::SheetId;
pub use workbook::{CellView, Resync, Workbook, WorkbookLimits, WorkbookOptions, WorkbookSnapshot};
