use action_throttler::Action;
use async_trait::async_trait;
use std::process::ExitStatus;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Failed { program: String, status: ExitStatus },
}

impl CommandError {
    /// Exit code to pass on to our own caller.
    pub fn exit_code(&self) -> i32 {
        match self {
            CommandError::Spawn { .. } => 127,
            CommandError::Failed { status, .. } => status.code().unwrap_or(1),
        }
    }
}

/// External command run as a throttled action. Inherits stdio.
#[derive(Debug)]
pub struct CommandAction {
    group: String,
    program: String,
    args: Vec<String>,
}

impl CommandAction {
    pub fn new(group: impl Into<String>, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            group: group.into(),
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Action for CommandAction {
    type Error = CommandError;

    fn group_id(&self) -> &str {
        &self.group
    }

    async fn run(&self) -> Result<(), CommandError> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .await
            .map_err(|source| CommandError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(CommandError::Failed {
                program: self.program.clone(),
                status,
            });
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_command() {
        let action = CommandAction::new("nightly-job", "true", Vec::new());
        assert_eq!(action.group_id(), "nightly-job");
        assert!(action.run().await.is_ok());
    }

    #[tokio::test]
    async fn test_failing_command_keeps_exit_code() {
        let action = CommandAction::new("nightly-job", "sh", vec!["-c".into(), "exit 3".into()]);
        let err = action.run().await.unwrap_err();
        assert!(matches!(err, CommandError::Failed { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let action = CommandAction::new("nightly-job", "definitely-not-a-real-program-3f9a", Vec::new());
        let err = action.run().await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
        assert_eq!(err.exit_code(), 127);
    }
}
