// src/keeper/pg.rs

//! `PgCtl` and `SqlClient`: the two external-collaborator traits the
//! keeper talks to instead of embedding a real Postgres client (§1 names
//! both out of scope as external collaborators — only the trait surface
//! and a lightweight test double are needed here).

use crate::error::Result;
use crate::monitor::state::SyncState;
use async_trait::async_trait;

/// A local Postgres status snapshot, as obtained from a single SQL
/// round-trip (§4.7: "probe Postgres locally").
#[derive(Debug, Clone, Copy, Default)]
pub struct PgStatus {
    pub is_running: bool,
    pub is_in_recovery: bool,
    pub timeline: i32,
    pub lsn: u64,
    pub sync_state: SyncState,
}

/// Controls the local `postgres`/`pg_ctl` process lifecycle and
/// configuration. Grounded in §4.8's handler list: base-backup + recovery
/// setup, `ALTER SYSTEM` + reload, stop-recovery, slot management,
/// `pg_replication_slot_advance`.
#[async_trait]
pub trait PgCtl: Send + Sync {
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn status(&self) -> Result<PgStatus>;

    /// `wait_standby → catchingup`: base-backup + configure recovery from
    /// the primary's connection info.
    async fn setup_standby(&self, primary_conninfo: &str, slot_name: &str) -> Result<()>;

    /// `primary → apply_settings`: write the new `synchronous_standby_names`
    /// and reload configuration.
    async fn set_synchronous_standby_names(&self, value: &str) -> Result<()>;

    /// `prepare_promotion → stop_replication`: end recovery, return once
    /// `pg_is_in_recovery()` is false.
    async fn promote(&self) -> Result<u64>;

    /// `stop_replication → wait_primary`: create a replication slot for a
    /// peer using the canonical slot name pattern.
    async fn create_replication_slot(&self, slot_name: &str) -> Result<()>;

    /// `fast_forward`: advance physical replay to `target_lsn` using
    /// `pg_replication_slot_advance`. Returns an error (refused state) when
    /// unsupported on the running Postgres version.
    async fn fast_forward(&self, slot_name: &str, target_lsn: u64) -> Result<()>;
}

/// A thin wrapper over a single SQL round-trip to the local or remote
/// Postgres instance, used by the keeper to read `pg_stat_replication`
/// and similar system views without embedding a full client.
#[async_trait]
pub trait SqlClient: Send + Sync {
    async fn current_wal_position(&self) -> Result<(i32, u64)>;
    async fn replication_sync_state(&self) -> Result<SyncState>;
}

/// An in-memory double used by keeper tests and the `other_examples`-style
/// local-FSM unit tests, since a real `postgres`/`pg_ctl` binary is outside
/// this crate's scope.
pub mod test_double {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Inner {
        status: PgStatus,
        synchronous_standby_names: String,
        slots: Vec<String>,
        fast_forward_supported: bool,
    }

    pub struct FakePg {
        inner: Mutex<Inner>,
    }

    impl FakePg {
        pub fn new(fast_forward_supported: bool) -> Self {
            Self {
                inner: Mutex::new(Inner {
                    fast_forward_supported,
                    ..Default::default()
                }),
            }
        }

        pub fn set_status(&self, status: PgStatus) {
            self.inner.lock().status = status;
        }

        pub fn synchronous_standby_names(&self) -> String {
            self.inner.lock().synchronous_standby_names.clone()
        }

        pub fn slots(&self) -> Vec<String> {
            self.inner.lock().slots.clone()
        }
    }

    #[async_trait]
    impl PgCtl for FakePg {
        async fn start(&self) -> Result<()> {
            self.inner.lock().status.is_running = true;
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.inner.lock().status.is_running = false;
            Ok(())
        }

        async fn status(&self) -> Result<PgStatus> {
            Ok(self.inner.lock().status)
        }

        async fn setup_standby(&self, _primary_conninfo: &str, _slot_name: &str) -> Result<()> {
            let mut inner = self.inner.lock();
            inner.status.is_running = true;
            inner.status.is_in_recovery = true;
            Ok(())
        }

        async fn set_synchronous_standby_names(&self, value: &str) -> Result<()> {
            self.inner.lock().synchronous_standby_names = value.to_string();
            Ok(())
        }

        async fn promote(&self) -> Result<u64> {
            let mut inner = self.inner.lock();
            inner.status.is_in_recovery = false;
            Ok(inner.status.lsn)
        }

        async fn create_replication_slot(&self, slot_name: &str) -> Result<()> {
            self.inner.lock().slots.push(slot_name.to_string());
            Ok(())
        }

        async fn fast_forward(&self, _slot_name: &str, target_lsn: u64) -> Result<()> {
            let mut inner = self.inner.lock();
            if !inner.fast_forward_supported {
                return Err(crate::error::PgAutoFailoverError::InvariantViolation(
                    "pg_replication_slot_advance unsupported on this Postgres version".into(),
                ));
            }
            inner.status.lsn = target_lsn;
            Ok(())
        }
    }

    #[async_trait]
    impl SqlClient for FakePg {
        async fn current_wal_position(&self) -> Result<(i32, u64)> {
            let status = self.inner.lock().status;
            Ok((status.timeline, status.lsn))
        }

        async fn replication_sync_state(&self) -> Result<SyncState> {
            Ok(self.inner.lock().status.sync_state)
        }
    }
}
