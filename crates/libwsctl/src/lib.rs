pub mod backend;
pub mod error;
pub mod store;
pub mod supervisor;
pub mod token;

pub use backend::{BackendError, SessionBackend, SessionSpec};
pub use backend::memory::MemoryBackend;
pub use backend::tmux::TmuxBackend;
pub use error::{TaskError, TaskResult};
pub use store::TaskStore;
pub use supervisor::{SupervisorConfig, TaskSupervisor};
pub use token::TokenAuthority;
