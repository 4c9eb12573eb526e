pub mod state;
pub mod view;

pub use state::{
    JsonWorkspaceState, MemoryWorkspaceState, WorkspaceState, WorkspaceStateError,
    WorkspaceStateStore,
};
pub use view::{SettingsError, TreeSettings};
