// Copyright (C) 2025 HasX
// Licensed under the GNU AGPL v3.0. See LICENSE file for details.
// Website: https://hasx.dev

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Persisted, process-independent defaults. Analogous to what a real `adb`
/// keeps under `~/.android` - a keypair location and a couple of connection
/// defaults - rather than anything protocol-specific.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub private_key_path: Option<PathBuf>,
    pub default_banner: Option<String>,
    pub connect_timeout_ms: u64,
    pub auth_timeout_ms: u64,
}

impl Default for State {
    fn default() -> Self {
        State {
            private_key_path: None,
            default_banner: None,
            connect_timeout_ms: 10_000,
            auth_timeout_ms: 100,
        }
    }
}

fn config_dir() -> PathBuf {
    if let Some(dir) = dirs_next::config_dir() {
        return dir.join("adbrs");
    }
    PathBuf::from(".adbrs")
}

fn config_path() -> PathBuf {
    config_dir().join("state.json")
}

pub fn default_key_path() -> PathBuf {
    config_dir().join("adbkey")
}

pub fn load_state() -> State {
    let path = config_path();
    if let Ok(bytes) = fs::read(&path) {
        if let Ok(state) = serde_json::from_slice::<State>(&bytes) {
            return state;
        }
    }
    State::default()
}

pub fn save_state(state: &State) -> Result<()> {
    let path = config_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }
    let bytes = serde_json::to_vec_pretty(state)?;
    fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))
}
