use std::path::PathBuf;

use clap::{Parser, Subcommand};
use registry::ModelId;

/// Model worker: runs the train/delete pipeline, or submits and inspects models
#[derive(Parser, Debug)]
#[command(name = "model-worker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Without a subcommand the worker pool runs until Ctrl-C or SIGTERM
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Upload a usage dataset and queue the model for training
    Train {
        model_id: ModelId,
        dataset: PathBuf,
    },
    /// Queue a model for deletion
    Delete { model_id: ModelId },
    /// Print a model's registry entry
    Status { model_id: ModelId },
    /// List every registered model
    List,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_no_subcommand_runs_workers() {
        let cli = Cli::try_parse_from(["model-worker"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_train_takes_id_and_dataset() {
        let id = Uuid::new_v4();
        let cli = Cli::try_parse_from(["model-worker", "train", &id.to_string(), "data/usage.csv"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Train { model_id: id, dataset: PathBuf::from("data/usage.csv") })
        );
    }

    #[test]
    fn test_rejects_bad_model_id() {
        assert!(Cli::try_parse_from(["model-worker", "status", "not-a-uuid"]).is_err());
        assert!(Cli::try_parse_from(["model-worker", "delete"]).is_err());
    }
}
