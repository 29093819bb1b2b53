//! Runs an exec credential plugin.

use std::process::{Output, Stdio};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::process::Command;

use super::{Credential, CredentialSource, ExecPluginError};
use crate::config::ExecConfig;

const EXEC_CREDENTIAL_KIND: &str = "ExecCredential";

/// The document an exec plugin prints on stdout.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecCredential {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    status: Option<ExecCredentialStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecCredentialStatus {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    expiration_timestamp: Option<DateTime<Utc>>,
}

/// Runs the command from a user's `exec` section and parses its output.
#[derive(Debug, Clone)]
pub struct ExecPluginRunner {
    config: ExecConfig,
}

impl ExecPluginRunner {
    pub fn new(config: ExecConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Run the command to completion and parse the credential it prints.
    ///
    /// Output is fully buffered before parsing. The declared environment is
    /// merged over the ambient one.
    pub async fn run(&self) -> Result<Credential, ExecPluginError> {
        tracing::debug!(command = %self.config.command, args = self.config.args.len(), "Running credential command");

        let output = Command::new(&self.config.command)
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| ExecPluginError::Spawn {
                command: self.config.command.clone(),
                source: Arc::new(source),
            })?;

        let result = parse_output(&self.config.command, &output);
        if let Err(err) = &result {
            tracing::warn!(error = %err, "Credential command failed");
        }
        result
    }
}

#[async_trait]
impl CredentialSource for ExecPluginRunner {
    async fn fetch(&self) -> Result<Credential, ExecPluginError> {
        self.run().await
    }
}

fn parse_output(command: &str, output: &Output) -> Result<Credential, ExecPluginError> {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

    if !output.status.success() {
        return Err(ExecPluginError::Failed {
            command: command.to_string(),
            status: output.status.to_string(),
            stderr,
        });
    }

    parse_exec_credential(command, &output.stdout, stderr)
}

fn parse_exec_credential(
    command: &str,
    stdout: &[u8],
    stderr: String,
) -> Result<Credential, ExecPluginError> {
    let envelope: ExecCredential =
        serde_json::from_slice(stdout).map_err(|source| ExecPluginError::InvalidOutput {
            command: command.to_string(),
            stderr: stderr.clone(),
            source: Arc::new(source),
        })?;

    if !envelope.kind.is_empty() && envelope.kind != EXEC_CREDENTIAL_KIND {
        return Err(ExecPluginError::UnexpectedKind {
            command: command.to_string(),
            kind: envelope.kind,
        });
    }

    let status = envelope.status.unwrap_or(ExecCredentialStatus {
        token: None,
        expiration_timestamp: None,
    });
    let token = status
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ExecPluginError::MissingToken {
            command: command.to_string(),
            stderr,
        })?;

    tracing::debug!(
        api_version = %envelope.api_version,
        expires_at = ?status.expiration_timestamp,
        "Parsed exec credential"
    );

    Ok(Credential::new(token, status.expiration_timestamp))
}
