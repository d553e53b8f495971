use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use dualstat_common::config::{PersistedState, RuntimeConfig};

/// Data-dir JSON persistence. `runtime.json` is operator-authored
/// configuration read at startup; `state.json` is the restorable control
/// state, rewritten after accepted mode/target/preset changes.
#[derive(Clone)]
pub struct Store {
    runtime_path: Arc<PathBuf>,
    state_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl Store {
    pub fn new() -> Self {
        let data_dir = std::env::var("DUALSTAT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.dualstat"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            state_path: Arc::new(data_dir.join("state.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn load_state(&self) -> anyhow::Result<PersistedState> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.state_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<PersistedState>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(PersistedState::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn save_state(&self, state: &PersistedState) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.state_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(state)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}
