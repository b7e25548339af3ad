// src/keeper/state_file.rs

//! C6: the keeper's on-disk state file. A small binary record written
//! atomically via write-to-temp-then-rename, grounded in the teacher's
//! `core/persistence/spldb_saver.rs` snapshot-save pattern (temp file +
//! `fs::rename`).

use crate::error::{PgAutoFailoverError, Result};
use crate::monitor::state::{NodeId, ReplicationState};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Bumped whenever the on-disk layout changes; an older version on disk is
/// refused rather than silently reinterpreted (§4.6).
pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeeperState {
    pub pg_autoctl_state_version: u32,
    pub current_role: ReplicationState,
    pub assigned_role: ReplicationState,
    pub current_node_id: NodeId,
    pub current_group: i32,
    pub pg_is_running: bool,
    pub last_monitor_contact_epoch: u64,
    pub last_secondary_contact_epoch: u64,
}

impl KeeperState {
    pub fn new(node_id: NodeId, group: i32, role: ReplicationState) -> Self {
        Self {
            pg_autoctl_state_version: STATE_VERSION,
            current_role: role,
            assigned_role: role,
            current_node_id: node_id,
            current_group: group,
            pg_is_running: false,
            last_monitor_contact_epoch: 0,
            last_secondary_contact_epoch: 0,
        }
    }

    pub fn touch_monitor_contact(&mut self) {
        self.last_monitor_contact_epoch = now_epoch();
    }
}

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Reads and parses the state file; refuses anything but the current
/// `STATE_VERSION`.
pub fn read(path: &Path) -> Result<KeeperState> {
    let bytes = std::fs::read(path)?;
    let state: KeeperState = decode_state(&bytes)?;
    if state.pg_autoctl_state_version != STATE_VERSION {
        return Err(PgAutoFailoverError::Configuration(format!(
            "state file version {} is incompatible with supported version {STATE_VERSION}",
            state.pg_autoctl_state_version
        )));
    }
    Ok(state)
}

/// Writes the whole state file atomically: serialize to a temp file in the
/// same directory, `fsync`, then `rename` over the destination.
pub fn write(path: &Path, state: &KeeperState) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = dir.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state"),
        std::process::id()
    ));

    let bytes = encode_state(state)?;
    let write_result = (|| -> Result<()> {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = write_result {
        let _ = std::fs::remove_file(&temp_path);
        return Err(e);
    }

    if let Err(e) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(PgAutoFailoverError::Io(e));
    }
    Ok(())
}

/// The record is small and flat; `serde_json` is used as the binary
/// encoding's stand-in so the format stays introspectable with standard
/// tools while keeping the same whole-file read/write shape the keeper
/// depends on.
fn encode_state(state: &KeeperState) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(state)?)
}

fn decode_state(bytes: &[u8]) -> Result<KeeperState> {
    Ok(serde_json::from_slice(bytes)?)
}
