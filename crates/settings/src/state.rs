use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MIN_BUILD_COUNTER: u32 = 1;
const MAX_BUILD_COUNTER: u32 = 99;

/// Workspace-scoped state that must survive between sessions.
/// 需要跨工作階段保存的工作區狀態。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceState {
    #[serde(default = "default_build_counter")]
    pub build_counter: u32,
    #[serde(default)]
    pub expanded: BTreeMap<String, bool>,
}

fn default_build_counter() -> u32 {
    MIN_BUILD_COUNTER
}

impl Default for WorkspaceState {
    fn default() -> Self {
        Self {
            build_counter: MIN_BUILD_COUNTER,
            expanded: BTreeMap::new(),
        }
    }
}

impl WorkspaceState {
    /// Clamps the build counter into its persisted range.
    /// 將重建計數器收斂到可保存的範圍內。
    pub fn sanitize(&mut self) {
        if self.build_counter < MIN_BUILD_COUNTER || self.build_counter > MAX_BUILD_COUNTER {
            self.build_counter = MIN_BUILD_COUNTER;
        }
    }

    /// Advances the build counter, wrapping back to the range start after 99.
    /// 遞增重建計數器，超過 99 後回捲到範圍起點。
    pub fn advance_build_counter(&mut self) {
        self.build_counter = if self.build_counter >= MAX_BUILD_COUNTER {
            MIN_BUILD_COUNTER
        } else {
            self.build_counter + 1
        };
    }
}

/// Storage collaborator for [`WorkspaceState`].
/// [`WorkspaceState`] 的儲存協作介面。
pub trait WorkspaceStateStore {
    fn load(&self) -> Result<WorkspaceState, WorkspaceStateError>;
    fn save(&mut self, state: &WorkspaceState) -> Result<(), WorkspaceStateError>;
}

/// In-memory store for tests and hosts with their own persistence.
/// 提供給測試或自行保存狀態的宿主使用的記憶體儲存。
#[derive(Debug, Default)]
pub struct MemoryWorkspaceState {
    state: WorkspaceState,
}

impl MemoryWorkspaceState {
    pub fn new(state: WorkspaceState) -> Self {
        Self { state }
    }
}

impl WorkspaceStateStore for MemoryWorkspaceState {
    fn load(&self) -> Result<WorkspaceState, WorkspaceStateError> {
        Ok(self.state.clone())
    }

    fn save(&mut self, state: &WorkspaceState) -> Result<(), WorkspaceStateError> {
        self.state = state.clone();
        Ok(())
    }
}

/// Persists [`WorkspaceState`] as JSON using atomic writes.
/// 以 JSON 搭配原子寫入方式保存 [`WorkspaceState`]。
#[derive(Debug)]
pub struct JsonWorkspaceState {
    path: PathBuf,
}

impl JsonWorkspaceState {
    /// Constructs a store bound to the provided path.
    /// 建立綁定至指定路徑的儲存器。
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns the backing path used for persistence.
    /// 取得此儲存器使用的檔案路徑。
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl WorkspaceStateStore for JsonWorkspaceState {
    fn load(&self) -> Result<WorkspaceState, WorkspaceStateError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let mut state: WorkspaceState = serde_json::from_str(&contents)
                    .map_err(|err| WorkspaceStateError::Invalid(err.to_string()))?;
                state.sanitize();
                Ok(state)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(WorkspaceState::default()),
            Err(err) => Err(WorkspaceStateError::Io(err)),
        }
    }

    fn save(&mut self, state: &WorkspaceState) -> Result<(), WorkspaceStateError> {
        let payload = serde_json::to_vec_pretty(state)
            .map_err(|err| WorkspaceStateError::Invalid(err.to_string()))?;
        write_atomic(&self.path, &payload).map_err(WorkspaceStateError::Io)
    }
}

/// Errors emitted by workspace state stores.
/// 工作區狀態儲存器可能拋出的錯誤。
#[derive(Debug, Error)]
pub enum WorkspaceStateError {
    #[error("workspace state IO error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid workspace state payload: {0}")]
    Invalid(String),
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}
