//! Claude CLI provider
//!
//! Uses the installed Claude Code CLI as a subprocess.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::process::Command;

use crate::catalog::{BuiltinModel, ModelDescriptor};
use crate::error::{LlmError, Result};
use crate::facade::ResponseFacade;
use crate::params::EffectiveConfig;
use crate::provider::{FacadeOptions, ProviderAdapter, ProviderContext};
use crate::request::{Message, Role};
use crate::response::Completion;

const CLI_BINARY: &str = "claude";

const MODELS: [BuiltinModel; 3] = [
    BuiltinModel::new("sonnet", 200_000, 8192, 0.0, 0.0),
    BuiltinModel::new("opus", 200_000, 8192, 0.0, 0.0),
    BuiltinModel::new("haiku", 200_000, 8192, 0.0, 0.0),
];

/// Adapter that uses the Claude CLI (subprocess)
pub struct ClaudeCliAdapter {
    name: String,
    models: Vec<ModelDescriptor>,
    cli_path: Option<PathBuf>,
}

impl ClaudeCliAdapter {
    /// Resolve the binary from the `cli_path` option, else from `PATH`
    pub fn new(ctx: &ProviderContext) -> Self {
        let cli_path = match ctx.lookup("cli_path") {
            Some(path) => Some(PathBuf::from(path)),
            None => which::which(CLI_BINARY).ok(),
        };
        Self {
            name: ctx.name.clone(),
            models: ctx.model_set(&MODELS),
            cli_path,
        }
    }
}

impl ProviderAdapter for ClaudeCliAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    fn validate_credentials(&self) -> bool {
        self.cli_path.as_ref().is_some_and(|path| path.exists())
    }

    fn create_facade(
        &self,
        model: &str,
        _options: &FacadeOptions,
    ) -> Result<Arc<dyn ResponseFacade>> {
        if !self.supports_model(model) {
            return Err(self.unknown_model(model));
        }
        let cli_path = match &self.cli_path {
            Some(path) if path.exists() => path.clone(),
            Some(path) => {
                return Err(LlmError::Credential {
                    provider: self.name.clone(),
                    message: format!("Claude CLI not found at specified path: {}", path.display()),
                });
            }
            None => {
                return Err(LlmError::Credential {
                    provider: self.name.clone(),
                    message: "Claude CLI not found. Install from https://docs.anthropic.com/en/docs/claude-code".into(),
                });
            }
        };

        Ok(Arc::new(ClaudeCliFacade {
            provider: self.name.clone(),
            model: model.to_string(),
            cli_path,
        }))
    }
}

/// Facade running `claude --print` for one model
pub struct ClaudeCliFacade {
    provider: String,
    model: String,
    cli_path: PathBuf,
}

/// System prompt and the text passed to `--print`.
///
/// A single user turn is sent as-is; longer conversations are flattened
/// into a transcript.
fn render_prompt(messages: &[Message]) -> (Option<String>, String) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
        .collect();
    let turns: Vec<&Message> = messages.iter().filter(|m| m.role != Role::System).collect();

    let prompt = match turns.as_slice() {
        [only] => only.content.clone(),
        _ => turns
            .iter()
            .map(|m| match m.role {
                Role::Assistant => format!("Assistant: {}", m.content),
                _ => format!("User: {}", m.content),
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
    };

    ((!system.is_empty()).then(|| system.join("\n\n")), prompt)
}

#[async_trait]
impl ResponseFacade for ClaudeCliFacade {
    fn provider_name(&self) -> &str {
        &self.provider
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[Message], _config: &EffectiveConfig) -> Result<Completion> {
        let (system, prompt) = render_prompt(messages);
        let mut cmd = Command::new(&self.cli_path);
        cmd.kill_on_drop(true);

        cmd.args(["--model", &self.model]);

        if let Some(system) = &system {
            cmd.args(["--system-prompt", system]);
        }

        cmd.args(["--print", &prompt]);
        log::debug!("Running {} --model {}", self.cli_path.display(), self.model);

        let output = cmd
            .output()
            .await
            .map_err(|e| LlmError::backend(&self.provider, format!("Failed to execute: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LlmError::backend(
                &self.provider,
                format!("Command failed: {}", stderr.trim()),
            ));
        }

        let content = String::from_utf8(output.stdout)
            .map_err(|e| LlmError::backend(&self.provider, format!("Invalid UTF-8: {}", e)))?
            .trim()
            .to_string();

        Ok(Completion::new(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Credentials;
    use crate::providers::test_context;

    #[test]
    fn test_missing_cli_path_fails_validation() {
        let mut ctx = test_context("claude-cli", &[]);
        ctx.credentials = Credentials::none().with("cli_path", "/nonexistent/claude");
        let adapter = ClaudeCliAdapter::new(&ctx);

        assert!(!adapter.validate_credentials());
        let err = adapter
            .create_facade("sonnet", &FacadeOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, LlmError::Credential { .. }));
    }

    #[test]
    fn test_render_prompt() {
        let (system, prompt) = render_prompt(&[Message::system("terse"), Message::user("hi")]);
        assert_eq!(system.as_deref(), Some("terse"));
        assert_eq!(prompt, "hi");

        let (system, prompt) = render_prompt(&[
            Message::user("a"),
            Message::assistant("b"),
            Message::user("c"),
        ]);
        assert!(system.is_none());
        assert_eq!(prompt, "User: a\n\nAssistant: b\n\nUser: c");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_call_kills_the_cli() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("finished");
        let script = dir.path().join("claude");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nsleep 1\ntouch '{}'\n", marker.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut ctx = test_context("claude-cli", &[]);
        ctx.credentials = Credentials::none().with("cli_path", script.to_str().unwrap());
        let facade = ClaudeCliAdapter::new(&ctx)
            .create_facade("sonnet", &FacadeOptions::default())
            .unwrap();

        let cfg = EffectiveConfig::default();
        let call = facade.generate("hi", &cfg);
        assert!(tokio::time::timeout(Duration::from_millis(200), call).await.is_err());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists());
    }
}
