pub mod orchestrator;
pub mod registry;
pub mod sink;
pub mod state;

pub use orchestrator::{DownloadRequest, DownloadSession};
pub use registry::{ProcessHandle, SessionRegistry, SessionView, Subscription};
pub use sink::{Commit, ResponseSink};
pub use state::{AbortReason, Attempt, Failure, Lifecycle, SessionState};
