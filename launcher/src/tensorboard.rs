use std::{ffi::OsStr, path::Path};

use log::{info, warn};
use tokio::process::{Child, Command};

const PROGRAM: &str = "tensorboard";

/// A tensorboard process watching the checkpoint directory.
pub struct Tensorboard {
    child: Child,
}

impl Tensorboard {
    /// Starts tensorboard over `logdir`, failures are logged and leave the cluster without one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(logdir: &Path) -> Option<Self> {
        Self::spawn_program(PROGRAM, logdir)
    }

    fn spawn_program<S: AsRef<OsStr>>(program: S, logdir: &Path) -> Option<Self> {
        let spawned = Command::new(program)
            .arg("--logdir")
            .arg(logdir)
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(child) => {
                info!(
                    "tensorboard watching {} (pid {:?})",
                    logdir.display(),
                    child.id()
                );
                Some(Self { child })
            }
            Err(e) => {
                warn!("failed to launch tensorboard: {e}");
                None
            }
        }
    }

    /// Stops the process.
    pub async fn kill(mut self) {
        match self.child.kill().await {
            Ok(()) => info!("tensorboard stopped"),
            Err(e) => warn!("failed to stop tensorboard: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_not_fatal() {
        let logdir = Path::new("mnist_model");
        assert!(Tensorboard::spawn_program("no-such-tensorboard-binary", logdir).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn running_process_is_killed() {
        let child = Command::new("sh")
            .arg("-c")
            .arg("sleep 30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let tensorboard = Tensorboard { child };
        tensorboard.kill().await;
    }
}
