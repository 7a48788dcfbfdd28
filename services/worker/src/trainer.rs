use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use bytes::Bytes;
use registry::ModelId;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("failed to run trainer: {0}")]
    Io(#[from] std::io::Error),

    #[error("trainer rejected input: {0}")]
    Rejected(String),
}

/// Turns a model's input dataset into a trained artifact.
#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(&self, model_id: ModelId, input: Bytes) -> Result<Bytes, TrainError>;
}

/// NDJSON lines the trainer process writes to stdout.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum TrainerEvent {
    #[serde(rename = "start")]
    Start,
    #[serde(rename = "progress")]
    Progress {
        phase: String,
        detail: Option<String>,
    },
    #[serde(rename = "done")]
    Done,
    #[serde(rename = "error")]
    Error { message: String },
}

/// Runs an external training program once per job:
/// `<program> <args..> --model-id <id> --input <file> --output <file>`.
#[derive(Clone, Debug)]
pub struct ProcessTrainer {
    program: String,
    args: Vec<String>,
    work_dir: PathBuf,
}

impl ProcessTrainer {
    pub fn new(program: impl Into<String>, args: Vec<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            work_dir: work_dir.into(),
        }
    }

    /// Split a command line like `python3 workers/trainer.py` on whitespace.
    pub fn from_command_line(command: &str, work_dir: impl Into<PathBuf>) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect(), work_dir))
    }

    async fn run(&self, model_id: ModelId, input_path: &Path, output_path: &Path) -> Result<(), TrainError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("--model-id").arg(model_id.to_string())
            .arg("--input").arg(input_path)
            .arg("--output").arg(output_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(model_id=%model_id, "trainer stderr: {line}");
                }
            });
        }

        let mut last_error: Option<String> = None;
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<TrainerEvent>(line) {
                    Ok(TrainerEvent::Start) => debug!(model_id=%model_id, "trainer: started"),
                    Ok(TrainerEvent::Progress { phase, detail }) => {
                        debug!(model_id=%model_id, phase=%phase, detail=?detail, "trainer: progress")
                    }
                    Ok(TrainerEvent::Done) => info!(model_id=%model_id, "trainer: done"),
                    Ok(TrainerEvent::Error { message }) => {
                        warn!(model_id=%model_id, "trainer: {message}");
                        last_error = Some(message);
                    }
                    Err(_) => debug!(model_id=%model_id, "trainer: non-json stdout line: {line}"),
                }
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(TrainError::Rejected(
                last_error.unwrap_or_else(|| format!("trainer exit status: {status}")),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Trainer for ProcessTrainer {
    async fn train(&self, model_id: ModelId, input: Bytes) -> Result<Bytes, TrainError> {
        let job_dir = self.work_dir.join(format!("{model_id}-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&job_dir).await?;

        let input_path = job_dir.join("input.csv");
        let output_path = job_dir.join("model.bin");
        tokio::fs::write(&input_path, &input).await?;

        let result = match self.run(model_id, &input_path, &output_path).await {
            Ok(()) => tokio::fs::read(&output_path).await.map(Bytes::from).map_err(TrainError::from),
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_dir_all(&job_dir).await {
            warn!(model_id=%model_id, "trainer: failed to clean {}: {e}", job_dir.display());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_command_line() {
        let t = ProcessTrainer::from_command_line("python3 workers/trainer.py --epochs 3", "/tmp").unwrap();
        assert_eq!(t.program, "python3");
        assert_eq!(t.args, vec!["workers/trainer.py", "--epochs", "3"]);
        assert!(ProcessTrainer::from_command_line("   ", "/tmp").is_none());
    }

    #[test]
    fn test_event_lines_decode() {
        let ev: TrainerEvent = serde_json::from_str(r#"{"type":"error","message":"no users"}"#).unwrap();
        assert!(matches!(ev, TrainerEvent::Error { message } if message == "no users"));

        let ev: TrainerEvent = serde_json::from_str(r#"{"type":"progress","phase":"fit"}"#).unwrap();
        assert!(matches!(ev, TrainerEvent::Progress { detail: None, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_program_is_rejected() {
        let dir = std::env::temp_dir().join(format!("trainer-{}", uuid::Uuid::new_v4()));
        let t = ProcessTrainer::new("false", vec![], &dir);

        let err = t.train(uuid::Uuid::new_v4(), Bytes::from_static(b"x")).await.unwrap_err();
        assert!(matches!(err, TrainError::Rejected(_)));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
