//! Container status-file protocol and readiness gating.
//!
//! Every container writes a single line to its status file (mounted at
//! a fixed path inside the guest): `started` once the entrypoint is
//! serving, `stopped` when an init phase has finished and the container
//! exited on purpose, or nothing while a transition is in flight. The
//! host polls this file with bounded exponential backoff to gate
//! operations that need a running container.

use std::path::Path;
use std::time::{Duration, Instant};

use ybox_shared::errors::{YboxError, YboxResult};

use crate::interrupt;

/// Contents of a container status file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Entrypoint finished and the container is serving.
    Started,
    /// Container completed an init phase and exited deliberately
    /// (first-boot bootstrap ends this way before the final re-create).
    Stopped,
    /// Empty or missing file: a transition is in progress.
    Transient,
}

impl ContainerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerStatus::Started => "started",
            ContainerStatus::Stopped => "stopped",
            ContainerStatus::Transient => "",
        }
    }

    /// Read the current status from the status file. A missing or
    /// unreadable file is a transient state, not an error: the
    /// entrypoint truncates and rewrites the file while transitioning.
    pub fn read(status_file: &Path) -> ContainerStatus {
        match std::fs::read_to_string(status_file) {
            Ok(content) => match content.trim() {
                "started" => ContainerStatus::Started,
                "stopped" => ContainerStatus::Stopped,
                _ => ContainerStatus::Transient,
            },
            Err(_) => ContainerStatus::Transient,
        }
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Poll `status_file` until it reaches `expected` or the budget runs
/// out. Backoff starts at 500ms and doubles up to 8s.
///
/// Returns the terminal status that was observed. `Stopped` is returned
/// as success even when `Started` was expected since the first-boot
/// sequence legitimately ends with a deliberate stop; callers decide
/// what a `Stopped` result means for them.
pub fn wait_for_status(
    container: &str,
    status_file: &Path,
    expected: ContainerStatus,
    budget: Duration,
) -> YboxResult<ContainerStatus> {
    let start = Instant::now();
    let mut backoff = Duration::from_millis(500);
    let max_backoff = Duration::from_secs(8);
    loop {
        let status = ContainerStatus::read(status_file);
        if status == expected || status == ContainerStatus::Stopped {
            return Ok(status);
        }
        if start.elapsed() >= budget {
            return Err(YboxError::NotReady(
                container.to_string(),
                format!(
                    "status file did not reach '{}' within {} seconds",
                    expected,
                    budget.as_secs()
                ),
            ));
        }
        if interrupt::interrupted() {
            return Err(YboxError::Interrupted);
        }
        std::thread::sleep(backoff.min(budget.saturating_sub(start.elapsed())));
        backoff = (backoff * 2).min(max_backoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_read_status() {
        let temp_dir = TempDir::new().unwrap();
        let status_file = temp_dir.path().join("status");

        assert_eq!(
            ContainerStatus::read(&status_file),
            ContainerStatus::Transient
        );

        std::fs::write(&status_file, "started\n").unwrap();
        assert_eq!(
            ContainerStatus::read(&status_file),
            ContainerStatus::Started
        );

        std::fs::write(&status_file, "stopped").unwrap();
        assert_eq!(
            ContainerStatus::read(&status_file),
            ContainerStatus::Stopped
        );

        std::fs::write(&status_file, "").unwrap();
        assert_eq!(
            ContainerStatus::read(&status_file),
            ContainerStatus::Transient
        );
    }

    #[test]
    fn test_wait_times_out() {
        let temp_dir = TempDir::new().unwrap();
        let status_file = temp_dir.path().join("status");
        std::fs::File::create(&status_file).unwrap();

        let result = wait_for_status(
            "c1",
            &status_file,
            ContainerStatus::Started,
            Duration::from_millis(700),
        );
        match result {
            Err(YboxError::NotReady(name, _)) => assert_eq!(name, "c1"),
            other => panic!("expected NotReady, got {:?}", other.map(|s| s.to_string())),
        }
    }

    #[test]
    fn test_wait_sees_written_status() {
        let temp_dir = TempDir::new().unwrap();
        let status_file = temp_dir.path().join("status");
        let mut file = std::fs::File::create(&status_file).unwrap();
        write!(file, "started").unwrap();

        let status = wait_for_status(
            "c1",
            &status_file,
            ContainerStatus::Started,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(status, ContainerStatus::Started);
    }

    #[test]
    fn test_wait_accepts_deliberate_stop() {
        let temp_dir = TempDir::new().unwrap();
        let status_file = temp_dir.path().join("status");
        std::fs::write(&status_file, "stopped").unwrap();

        let status = wait_for_status(
            "c1",
            &status_file,
            ContainerStatus::Started,
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(status, ContainerStatus::Stopped);
    }
}
