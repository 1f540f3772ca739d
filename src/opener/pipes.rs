//! Registry of helper processes spawned for `pipe:` and handler-backed locators.
//!
//! Each spawned child stays registered until someone takes responsibility for its exit
//! status. The normal owner is the [`PipeTicket`] handed out with the stream: closing
//! the stream waits on the child and reports a nonzero exit as an error for that
//! locator. Children whose ticket was dropped without waiting become orphans and are
//! collected by [`PipeManager::reap`], which callers run before spawning more helpers.

use crate::error::StreamOpenError;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

enum ChildState {
  Running(Child),
  Exited(ExitStatus),
}

struct TrackedChild {
  id: u64,
  command: String,
  state: ChildState,
  orphaned: bool,
}

#[derive(Default)]
struct Registry {
  next_id: u64,
  children: Vec<TrackedChild>,
}

/// Explicit owner of spawned helper processes.
///
/// Cloning is cheap and all clones share one registry.
#[derive(Clone, Default)]
pub struct PipeManager {
  registry: Arc<Mutex<Registry>>,
}

enum PipeEnd {
  Stdout(ChildStdout),
  Stdin(ChildStdin),
}

impl std::fmt::Debug for PipeManager {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PipeManager")
      .field("outstanding", &self.outstanding())
      .finish()
  }
}

impl PipeManager {
  /// Creates an empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, Registry> {
    // A panic while holding the lock leaves the registry consistent.
    self
      .registry
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Runs `command` through `sh -c` with its stdout piped back to us.
  pub fn spawn_reader(&self, command: &str) -> Result<(ChildStdout, PipeTicket), StreamOpenError> {
    let (end, ticket) = self.spawn(command, true)?;
    match end {
      PipeEnd::Stdout(stdout) => Ok((stdout, ticket)),
      PipeEnd::Stdin(_) => unreachable!("reader pipes expose stdout"),
    }
  }

  /// Runs `command` through `sh -c` with its stdin piped from us.
  pub fn spawn_writer(&self, command: &str) -> Result<(ChildStdin, PipeTicket), StreamOpenError> {
    let (end, ticket) = self.spawn(command, false)?;
    match end {
      PipeEnd::Stdin(stdin) => Ok((stdin, ticket)),
      PipeEnd::Stdout(_) => unreachable!("writer pipes expose stdin"),
    }
  }

  fn spawn(&self, command: &str, read: bool) -> Result<(PipeEnd, PipeTicket), StreamOpenError> {
    let mut builder = Command::new("sh");
    builder.arg("-c").arg(command).stderr(Stdio::inherit());
    if read {
      builder.stdout(Stdio::piped()).stdin(Stdio::null());
    } else {
      builder.stdin(Stdio::piped());
    }
    let mut child = builder.spawn().map_err(|source| StreamOpenError::Spawn {
      command: command.to_string(),
      source,
    })?;
    let end = if read {
      child.stdout.take().map(PipeEnd::Stdout)
    } else {
      child.stdin.take().map(PipeEnd::Stdin)
    };
    let Some(end) = end else {
      return Err(StreamOpenError::Spawn {
        command: command.to_string(),
        source: std::io::Error::other("child pipe was not captured"),
      });
    };

    let mut registry = self.lock();
    let id = registry.next_id;
    registry.next_id += 1;
    registry.children.push(TrackedChild {
      id,
      command: command.to_string(),
      state: ChildState::Running(child),
      orphaned: false,
    });
    debug!(command = %command, id, "spawned helper process");

    Ok((
      end,
      PipeTicket {
        id,
        command: command.to_string(),
        manager: self.clone(),
        settled: false,
      },
    ))
  }

  /// Number of children still registered.
  pub fn outstanding(&self) -> usize {
    self.lock().children.len()
  }

  /// Polls every registered child without blocking.
  ///
  /// Children that exited successfully, and orphans that exited at all, are removed.
  /// Orphans that exited unsuccessfully are returned as errors naming their command.
  /// Children that still have a live ticket keep their status until the ticket waits,
  /// so a failure is always reported against its own stream.
  pub fn reap(&self) -> Vec<StreamOpenError> {
    let mut failures = Vec::new();
    let mut registry = self.lock();
    for tracked in registry.children.iter_mut() {
      if let ChildState::Running(child) = &mut tracked.state {
        match child.try_wait() {
          Ok(Some(status)) => tracked.state = ChildState::Exited(status),
          Ok(None) => {}
          Err(source) => failures.push(StreamOpenError::Reap {
            command: tracked.command.clone(),
            source,
          }),
        }
      }
    }
    registry.children.retain(|tracked| match tracked.state {
      ChildState::Running(_) => true,
      ChildState::Exited(status) if status.success() => false,
      ChildState::Exited(status) => {
        if tracked.orphaned {
          failures.push(StreamOpenError::CommandFailed {
            command: tracked.command.clone(),
            status,
          });
          false
        } else {
          true
        }
      }
    });
    failures
  }

  fn take(&self, id: u64) -> Option<TrackedChild> {
    let mut registry = self.lock();
    let index = registry.children.iter().position(|tracked| tracked.id == id)?;
    Some(registry.children.remove(index))
  }

  fn orphan(&self, id: u64) {
    let mut registry = self.lock();
    if let Some(tracked) = registry.children.iter_mut().find(|tracked| tracked.id == id) {
      tracked.orphaned = true;
    }
  }
}

/// Ownership of one spawned child's exit status.
pub struct PipeTicket {
  id: u64,
  command: String,
  manager: PipeManager,
  settled: bool,
}

impl PipeTicket {
  /// The shell command the child runs.
  pub fn command(&self) -> &str {
    &self.command
  }

  /// Waits for the child and turns a nonzero exit into an error.
  ///
  /// The pipe end must have been dropped first, otherwise a child blocked on it never
  /// exits.
  pub async fn wait(mut self) -> Result<(), StreamOpenError> {
    self.settled = true;
    let Some(tracked) = self.manager.take(self.id) else {
      return Ok(());
    };
    let status = match tracked.state {
      ChildState::Exited(status) => status,
      ChildState::Running(mut child) => {
        child.wait().await.map_err(|source| StreamOpenError::Reap {
          command: tracked.command.clone(),
          source,
        })?
      }
    };
    debug!(command = %tracked.command, %status, "helper process exited");
    if status.success() {
      Ok(())
    } else {
      Err(StreamOpenError::CommandFailed {
        command: tracked.command,
        status,
      })
    }
  }
}

impl Drop for PipeTicket {
  fn drop(&mut self) {
    if !self.settled {
      self.manager.orphan(self.id);
    }
  }
}
