pub mod export;
pub mod session;

pub use export::{ExportError, ExportService};
pub use session::{AnalysisSession, SessionError, SessionOptions, StatusSnapshot};
