#![allow(dead_code)]

use std::path::{Path, PathBuf};

use anyhow::Result;
use base64::Engine;
use kubebind::config::{Cluster, ExecConfig, ResolvedContext, User};

/// A self-signed certificate and its private key, both PEM.
pub struct TestCert {
    pub cert_pem: String,
    pub key_pem: String,
}

pub fn self_signed(name: &str) -> Result<TestCert> {
    let certified = rcgen::generate_simple_self_signed(vec![name.to_string()])?;
    Ok(TestCert {
        cert_pem: certified.cert.pem(),
        key_pem: certified.key_pair.serialize_pem(),
    })
}

pub fn b64(data: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(data)
}

/// Exec settings for a shell plugin that appends a line to `counter` on every
/// run, sleeps for `sleep_secs`, then prints `token`.
///
/// The run fails with "access denied" unless `gate` exists, when a gate is
/// given.
pub fn counting_plugin(
    counter: &Path,
    gate: Option<&Path>,
    token: &str,
    expiration: &str,
    sleep_secs: &str,
) -> ExecConfig {
    let gate_check = match gate {
        Some(gate) => format!(
            r#"if [ ! -f "{}" ]; then echo 'access denied' >&2; exit 1; fi; "#,
            gate.display()
        ),
        None => String::new(),
    };
    let script = format!(
        r#"echo run >> "{counter}"; sleep {sleep_secs}; {gate_check}printf '{{"kind":"ExecCredential","status":{{"token":"{token}","expirationTimestamp":"{expiration}"}}}}'"#,
        counter = counter.display(),
    );
    ExecConfig {
        command: "sh".to_string(),
        args: vec!["-c".to_string(), script],
        ..Default::default()
    }
}

pub fn run_count(counter: &Path) -> usize {
    std::fs::read_to_string(counter)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

pub fn context(server: &str, user: User) -> ResolvedContext {
    ResolvedContext::new(
        "test",
        Cluster {
            server: server.to_string(),
            ..Default::default()
        },
        user,
    )
}

/// Write a kubeconfig with one context, `dev`, pointing at `server`.
pub fn write_kubeconfig(dir: &Path, server: &str, ca_data: &str, token: &str) -> Result<PathBuf> {
    let path = dir.join("config");
    let content = format!(
        r#"apiVersion: v1
kind: Config
current-context: dev
clusters:
  - name: dev-cluster
    cluster:
      server: {server}
      certificate-authority-data: {ca_data}
users:
  - name: dev-user
    user:
      token: {token}
contexts:
  - name: dev
    context:
      cluster: dev-cluster
      user: dev-user
      namespace: apps
"#
    );
    std::fs::write(&path, content)?;
    Ok(path)
}
