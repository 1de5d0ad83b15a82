//! System lock action, invoked on Linked → Unlinked

use std::process::{Command, Stdio};

use tracing::{info, warn};

use crate::error::LockError;
use crate::types::LinkId;

pub trait LockAction: Send + Sync + 'static {
    fn lock(&self, link: &LinkId) -> Result<(), LockError>;
}

/// Runs an external command (e.g. `loginctl lock-session`) without waiting for it
#[derive(Debug, Clone)]
pub struct CommandLock {
    argv: Vec<String>,
}

impl CommandLock {
    pub fn new(argv: Vec<String>) -> Result<Self, LockError> {
        if argv.is_empty() {
            return Err(LockError::Empty);
        }
        Ok(Self { argv })
    }
}

impl LockAction for CommandLock {
    fn lock(&self, link: &LinkId) -> Result<(), LockError> {
        let (program, args) = self.argv.split_first().ok_or(LockError::Empty)?;
        let child = Command::new(program)
            .args(args)
            .env("PROXLOCK_LINK", link.as_str())
            .stdin(Stdio::null())
            .spawn()?;
        info!(link = %link, pid = child.id(), "lock command started");
        Ok(())
    }
}

/// Logs instead of locking
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnlyLock;

impl LockAction for LogOnlyLock {
    fn lock(&self, link: &LinkId) -> Result<(), LockError> {
        warn!(link = %link, "lock requested (no lock command configured)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(CommandLock::new(Vec::new()), Err(LockError::Empty)));
    }

    #[test]
    fn test_log_only_lock_succeeds() {
        assert!(LogOnlyLock.lock(&LinkId::from("phone")).is_ok());
    }
}
