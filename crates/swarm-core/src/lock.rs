//! Single-instance process lock.
//!
//! The lock is a file holding the owner's PID. It counts as held only while
//! that process is alive, so a crashed owner never blocks a restart. Staleness
//! is decided by probing the process table, never by age.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Whether a process with this PID exists.
///
/// A permission error from the probe still means the process exists.
pub fn process_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check
    if unsafe { libc::kill(pid as libc::pid_t, 0) } == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Snapshot of the lock record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    pub held: bool,
    /// PID found in the record, alive or not.
    pub owner_pid: Option<u32>,
}

/// Result of waiting for a stopped instance to exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// The retry budget ran out while the owner was still alive.
    MaybeStillRunning,
}

#[derive(Debug, Clone)]
pub struct ProcessLock {
    path: PathBuf,
    pid: u32,
}

impl ProcessLock {
    /// Lock at `path` on behalf of the current process.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_pid(path, std::process::id())
    }

    /// Lock at `path` on behalf of an arbitrary PID.
    pub fn with_pid(path: impl Into<PathBuf>, pid: u32) -> Self {
        Self {
            path: path.into(),
            pid,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Record this PID as the owner. Fails with `AlreadyHeld` if a live owner exists.
    pub fn acquire(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Second attempt only after reclaiming a stale record.
        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(mut file) => {
                    file.write_all(self.pid.to_string().as_bytes())?;
                    file.sync_all()?;
                    info!(pid = self.pid, "Acquired lock {:?}", self.path);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match self.get_pid()? {
                    Some(owner) if owner == self.pid => return Ok(()),
                    Some(owner) if process_alive(owner) => {
                        return Err(Error::AlreadyHeld { pid: owner });
                    }
                    Some(owner) => {
                        warn!(pid = owner, "Reclaiming stale lock {:?}", self.path);
                        self.reclaim_stale(owner)?;
                    }
                    // Corrupt record was already removed
                    None => {}
                },
                Err(e) => return Err(e.into()),
            }
        }

        match self.get_pid()? {
            Some(owner) => Err(Error::AlreadyHeld { pid: owner }),
            None => Err(Error::Other(format!(
                "could not create lock file {}",
                self.path.display()
            ))),
        }
    }

    /// Remove the record. Fails with `NotOwner` if another PID holds it.
    pub fn release(&self) -> Result<()> {
        match self.get_pid()? {
            None => Ok(()),
            Some(owner) if owner != self.pid => Err(Error::NotOwner {
                owner,
                caller: self.pid,
            }),
            Some(_) => {
                self.remove_record()?;
                info!(pid = self.pid, "Released lock {:?}", self.path);
                Ok(())
            }
        }
    }

    /// PID in the record. A corrupt record is deleted and reported as absent.
    pub fn get_pid(&self) -> Result<Option<u32>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match content.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => Ok(Some(pid)),
            _ => {
                warn!("Removing corrupt lock file {:?}", self.path);
                self.remove_record()?;
                Ok(None)
            }
        }
    }

    /// Whether a live process holds the lock.
    pub fn status(&self) -> LockStatus {
        let owner_pid = match self.get_pid() {
            Ok(pid) => pid,
            Err(e) => {
                debug!("Could not read lock file {:?}: {}", self.path, e);
                None
            }
        };
        LockStatus {
            held: owner_pid.is_some_and(process_alive),
            owner_pid,
        }
    }

    pub fn is_held(&self) -> bool {
        self.status().held
    }

    /// Remove the record if its owner is dead. Returns true if something was removed.
    pub fn clean_stale(&self) -> Result<bool> {
        match self.get_pid()? {
            Some(owner) if !process_alive(owner) => {
                self.remove_record()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Ask the owning process to shut down with SIGTERM. Does not wait.
    pub fn request_stop(&self) -> Result<u32> {
        let owner = self.get_pid()?.ok_or(Error::NotRunning)?;
        if !process_alive(owner) {
            self.remove_record()?;
            return Err(Error::NotRunning);
        }

        // SAFETY: plain signal delivery to a PID we just probed
        if unsafe { libc::kill(owner as libc::pid_t, libc::SIGTERM) } != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        info!(pid = owner, "Sent SIGTERM");
        Ok(owner)
    }

    /// Poll the lock until it is released or the retry budget runs out.
    pub async fn wait_for_shutdown(&self, attempts: u32, delay: Duration) -> StopOutcome {
        for _ in 0..attempts {
            tokio::time::sleep(delay).await;
            if !self.is_held() {
                return StopOutcome::Stopped;
            }
        }
        StopOutcome::MaybeStillRunning
    }

    /// Remove the record only if it still names `stale`.
    ///
    /// The record is renamed aside first so that exactly one contender takes
    /// it. If it turns out to belong to someone else by then, it is put back
    /// unless a newer record has already appeared. Returns true when the
    /// stale record was removed.
    fn reclaim_stale(&self, stale: u32) -> Result<bool> {
        let aside = self.aside_path();
        match fs::rename(&self.path, &aside) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let taken = fs::read_to_string(&aside)
            .ok()
            .and_then(|content| content.trim().parse::<u32>().ok());
        if taken != Some(stale) {
            debug!(pid = ?taken, "Lock changed hands during reclaim, restoring {:?}", self.path);
            match fs::hard_link(&aside, &self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    if let Err(cleanup) = fs::remove_file(&aside) {
                        debug!("Could not remove {:?}: {}", aside, cleanup);
                    }
                    return Err(e.into());
                }
            }
            fs::remove_file(&aside)?;
            return Ok(false);
        }

        fs::remove_file(&aside)?;
        Ok(true)
    }

    fn aside_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.path.with_file_name(format!("{}.{}.stale", name, self.pid))
    }

    fn remove_record(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dead_pid() -> u32 {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_process_alive() {
        assert!(process_alive(std::process::id()));
        assert!(!process_alive(0));
        assert!(!process_alive(dead_pid()));
    }

    #[test]
    fn test_second_acquire_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev-swarm.lock");
        let me = std::process::id();

        let first = ProcessLock::with_pid(&path, me);
        first.acquire().unwrap();

        let second = ProcessLock::with_pid(&path, me + 1);
        match second.acquire() {
            Err(Error::AlreadyHeld { pid }) => assert_eq!(pid, me),
            other => panic!("expected AlreadyHeld, got {:?}", other),
        }
    }

    #[test]
    fn test_release_requires_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev-swarm.lock");
        let me = std::process::id();

        let owner = ProcessLock::with_pid(&path, me);
        owner.acquire().unwrap();

        let other = ProcessLock::with_pid(&path, me + 1);
        assert!(matches!(other.release(), Err(Error::NotOwner { .. })));
        assert!(path.exists());
        assert_eq!(owner.get_pid().unwrap(), Some(me));

        owner.release().unwrap();
        assert!(!path.exists());
        assert!(!owner.status().held);
    }

    #[test]
    fn test_corrupt_record_removed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev-swarm.lock");
        fs::write(&path, "not-a-pid").unwrap();

        let lock = ProcessLock::new(&path);
        let status = lock.status();
        assert!(!status.held);
        assert_eq!(status.owner_pid, None);
        assert!(!path.exists());

        fs::write(&path, "garbage").unwrap();
        assert_eq!(lock.get_pid().unwrap(), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_stale_lock_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev-swarm.lock");
        let stale = dead_pid();
        fs::write(&path, stale.to_string()).unwrap();

        let lock = ProcessLock::new(&path);
        let status = lock.status();
        assert!(!status.held);
        assert_eq!(status.owner_pid, Some(stale));

        lock.acquire().unwrap();
        assert_eq!(lock.get_pid().unwrap(), Some(std::process::id()));
        assert!(lock.is_held());
    }

    #[test]
    fn test_reclaim_leaves_new_owner_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev-swarm.lock");
        let stale = dead_pid();
        let me = std::process::id();
        fs::write(&path, stale.to_string()).unwrap();

        // Both contenders saw the dead owner; the first one wins the race.
        let late = ProcessLock::with_pid(&path, me + 1);
        assert_eq!(late.get_pid().unwrap(), Some(stale));
        let winner = ProcessLock::with_pid(&path, me);
        winner.acquire().unwrap();

        assert!(!late.reclaim_stale(stale).unwrap());
        assert_eq!(winner.get_pid().unwrap(), Some(me));
        assert!(!late.aside_path().exists());

        match late.acquire() {
            Err(Error::AlreadyHeld { pid }) => assert_eq!(pid, me),
            other => panic!("expected AlreadyHeld, got {:?}", other),
        }
        assert_eq!(winner.get_pid().unwrap(), Some(me));
    }

    #[test]
    fn test_reclaim_removes_matching_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev-swarm.lock");
        let stale = dead_pid();
        fs::write(&path, stale.to_string()).unwrap();

        let lock = ProcessLock::new(&path);
        assert!(lock.reclaim_stale(stale).unwrap());
        assert!(!path.exists());
        assert!(!lock.reclaim_stale(stale).unwrap());
    }

    #[test]
    fn test_request_stop_without_owner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev-swarm.lock");
        let lock = ProcessLock::new(&path);
        assert!(matches!(lock.request_stop(), Err(Error::NotRunning)));

        fs::write(&path, dead_pid().to_string()).unwrap();
        assert!(matches!(lock.request_stop(), Err(Error::NotRunning)));
        assert!(!path.exists());
    }

    #[test]
    fn test_wait_for_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev-swarm.lock");
        let lock = ProcessLock::new(&path);
        lock.acquire().unwrap();

        let outcome = tokio_test::block_on(lock.wait_for_shutdown(2, Duration::from_millis(10)));
        assert_eq!(outcome, StopOutcome::MaybeStillRunning);

        lock.release().unwrap();
        let outcome = tokio_test::block_on(lock.wait_for_shutdown(2, Duration::from_millis(10)));
        assert_eq!(outcome, StopOutcome::Stopped);
    }
}
