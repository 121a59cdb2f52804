use async_trait::async_trait;
use policy::ActionParams;
use serde_json::{Value, json};
use tokio::process::Command;

use crate::{Provider, ProviderError};

/// Spawns allow-listed commands and captures their output.
#[derive(Debug, Clone, Default)]
pub struct ProcessProvider {
    allowed_commands: Vec<String>,
}

impl ProcessProvider {
    pub fn new(allowed_commands: Vec<String>) -> Self {
        Self { allowed_commands }
    }

    fn command_allowed(&self, cmd: &str) -> bool {
        self.allowed_commands.iter().any(|allowed| allowed == "*" || allowed == cmd)
    }
}

#[async_trait]
impl Provider for ProcessProvider {
    async fn execute(&self, params: &ActionParams) -> Result<Value, ProviderError> {
        let ActionParams::SpawnProcess { cmd, args, cwd } = params else {
            return Err(ProviderError::Unsupported(params.kind()));
        };
        if !self.command_allowed(cmd) {
            return Err(ProviderError::Refused(format!("command not allowed: {cmd}")));
        }

        let mut command = Command::new(cmd);
        command.args(args).kill_on_drop(true);
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        let output = command
            .output()
            .await
            .map_err(|e| ProviderError::Execution(format!("spawn {cmd}: {e}")))?;

        Ok(json!({
            "exit_code": output.status.code(),
            "success": output.status.success(),
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
        }))
    }
}
