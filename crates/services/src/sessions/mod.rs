mod progress;
mod service;
mod workflow;

// Public API of the form session subsystem.
pub use crate::error::FormSessionError;
pub use progress::FormProgress;
pub use service::{Completion, FormSession, Step};
pub use workflow::FormSessionService;
