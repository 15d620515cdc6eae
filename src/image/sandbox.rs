//! Isolated execution of image transforms.
//!
//! Transforms are CPU bound and can hang or crash on hostile input, so the
//! bot hands them to an [`ImageWorker`] instead of running them on the
//! runtime. The default worker is a fresh child process per job, talking over
//! stdin/stdout, killed when its deadline passes.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serenity::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::common::{EmoteError, EmoteResult};

use super::worker::INVALID_IMAGE_EXIT_CODE;
use super::{ImageBlob, Operation};

/// Runs an [`Operation`] somewhere other than the calling task.
#[async_trait]
pub trait ImageWorker: Send + Sync {
    async fn submit(
        &self,
        operation: Operation,
        image: ImageBlob,
        timeout: Duration,
    ) -> EmoteResult<ImageBlob>;
}

/// Spawns `program [args..] <operation>` for each job.
#[derive(Debug, Clone)]
pub struct SubprocessWorker {
    program: PathBuf,
    args: Vec<String>,
}

impl SubprocessWorker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Extra arguments placed before the operation name.
    #[cfg(test)]
    pub fn with_args<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Re-invoke the running binary in worker mode.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

#[async_trait]
impl ImageWorker for SubprocessWorker {
    async fn submit(
        &self,
        operation: Operation,
        image: ImageBlob,
        timeout: Duration,
    ) -> EmoteResult<ImageBlob> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(operation.as_arg())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "worker stdin unavailable")
        })?;
        let input = image.into_bytes();

        let feed = async move {
            // The worker may exit before reading everything; its exit code says why.
            if let Err(e) = stdin.write_all(&input).await {
                debug!("worker stopped reading input: {}", e);
            }
            drop(stdin);
        };
        let job = async {
            let (_, output) = tokio::join!(feed, child.wait_with_output());
            output
        };

        // Dropping `job` on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(timeout, job).await {
            Ok(output) => output?,
            Err(_) => {
                warn!("image worker for {} timed out after {:?}", operation, timeout);
                return Err(EmoteError::ProcessingTimeout { operation });
            }
        };

        match output.status.code() {
            Some(0) => ImageBlob::new(output.stdout),
            Some(INVALID_IMAGE_EXIT_CODE) => Err(EmoteError::InvalidImage),
            code => Err(EmoteError::WorkerFailed {
                code,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
        }
    }
}

/// Runs jobs on tokio's blocking pool.
///
/// A timed out job is abandoned rather than killed and keeps its thread until
/// it finishes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadWorker;

#[async_trait]
impl ImageWorker for ThreadWorker {
    async fn submit(
        &self,
        operation: Operation,
        image: ImageBlob,
        timeout: Duration,
    ) -> EmoteResult<ImageBlob> {
        let job = tokio::task::spawn_blocking(move || operation.apply(&image));

        match tokio::time::timeout(timeout, job).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(EmoteError::WorkerFailed {
                code: None,
                stderr: e.to_string(),
            }),
            Err(_) => {
                warn!("image job for {} timed out after {:?}", operation, timeout);
                Err(EmoteError::ProcessingTimeout { operation })
            }
        }
    }
}
