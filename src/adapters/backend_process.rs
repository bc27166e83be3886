//! Launcher for the backend application command.
//!
//! The router never supervises the backend; this only starts the configured
//! command once and kills it when the server stops.
use std::{collections::HashMap, process::Stdio};

use eyre::{Result, WrapErr};
use tokio::process::{Child, Command};

/// Marker exported to the backend so it can tell it runs under the dev router.
pub const APP_ENV: (&str, &str) = ("APP_ENV", "localdev");

/// Placeholder replaced with the backend port in the command line.
const PORT_PLACEHOLDER: &str = "$PORT";

/// Parse a `KEY=VALUE` CLI argument.
pub fn parse_env_var(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, val)) if !key.is_empty() => Ok((key.to_string(), val.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{value}'")),
    }
}

/// A backend command with its environment, ready to launch.
#[derive(Debug, Clone)]
pub struct BackendCommand {
    command: String,
    port: Option<u16>,
    env: HashMap<String, String>,
}

impl BackendCommand {
    /// `overrides` win over `env`; `APP_ENV` is always set.
    pub fn new(
        command: impl Into<String>,
        port: Option<u16>,
        env: &HashMap<String, String>,
        overrides: &[(String, String)],
    ) -> Self {
        let mut merged = env.clone();
        merged.extend(overrides.iter().cloned());
        merged.insert(APP_ENV.0.to_string(), APP_ENV.1.to_string());

        Self {
            command: command.into(),
            port,
            env: merged,
        }
    }

    /// Command line with `$PORT` substituted when a port is known.
    pub fn command_line(&self) -> String {
        match self.port {
            Some(port) => self.command.replace(PORT_PLACEHOLDER, &port.to_string()),
            None => self.command.clone(),
        }
    }

    pub fn env(&self) -> &HashMap<String, String> {
        &self.env
    }

    /// Spawn through `sh -c`, inheriting stdout and stderr.
    pub fn spawn(&self) -> Result<BackendProcess> {
        let command_line = self.command_line();

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&command_line)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(port) = self.port {
            command.env("PORT", port.to_string());
        }

        let child = command
            .spawn()
            .wrap_err_with(|| format!("Failed to start backend command: {command_line}"))?;

        tracing::info!(command = %command_line, pid = child.id(), "Backend process started");
        Ok(BackendProcess { child })
    }
}

/// A running backend child process.
#[derive(Debug)]
pub struct BackendProcess {
    child: Child,
}

impl BackendProcess {
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Resolves when the backend exits on its own.
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        self.child
            .wait()
            .await
            .wrap_err("Failed to wait for backend process")
    }

    /// Kill the backend and reap it.
    pub async fn stop(mut self) -> Result<()> {
        if self.child.id().is_none() {
            return Ok(());
        }
        tracing::info!(pid = self.child.id(), "Stopping backend process");
        self.child
            .kill()
            .await
            .wrap_err("Failed to kill backend process")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::BackendConfig;

    #[test]
    fn test_parse_env_var() {
        assert_eq!(
            parse_env_var("KEY=a=b").unwrap(),
            ("KEY".to_string(), "a=b".to_string())
        );
        assert_eq!(
            parse_env_var("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_env_var("novalue").is_err());
        assert!(parse_env_var("=x").is_err());
    }

    #[test]
    fn test_env_merge_and_port() {
        let mut env = HashMap::new();
        env.insert("A".to_string(), "from-config".to_string());
        env.insert("B".to_string(), "kept".to_string());

        let backend = BackendCommand::new(
            "gunicorn -b :$PORT main:app",
            Some(8090),
            &env,
            &[("A".to_string(), "from-cli".to_string())],
        );

        assert_eq!(backend.command_line(), "gunicorn -b :8090 main:app");
        assert_eq!(backend.env()["A"], "from-cli");
        assert_eq!(backend.env()["B"], "kept");
        assert_eq!(backend.env()["APP_ENV"], "localdev");
    }

    #[test]
    fn test_port_derived_from_backend_target() {
        let config = BackendConfig {
            command: Some("gunicorn -b :$PORT main:app".to_string()),
            ..BackendConfig::default()
        };
        let backend = BackendCommand::new(
            "gunicorn -b :$PORT main:app",
            config.command_port(),
            &config.env,
            &[],
        );
        assert_eq!(backend.command_line(), "gunicorn -b :8090 main:app");
    }

    #[test]
    fn test_command_without_port_is_untouched() {
        let backend = BackendCommand::new("run $PORT", None, &HashMap::new(), &[]);
        assert_eq!(backend.command_line(), "run $PORT");
    }

    #[tokio::test]
    async fn test_spawn_and_stop() {
        let backend = BackendCommand::new("sleep 30", None, &HashMap::new(), &[]);
        let process = backend.spawn().unwrap();
        assert!(process.id().is_some());
        tokio::time::timeout(Duration::from_secs(5), process.stop())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_spawned_command_sees_environment() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("env.txt");
        let backend = BackendCommand::new(
            format!("echo \"$APP_ENV:$PORT\" > {}", out.display()),
            Some(9123),
            &HashMap::new(),
            &[],
        );

        let mut process = backend.spawn().unwrap();
        let status = process.wait().await.unwrap();
        assert!(status.success());
        assert_eq!(std::fs::read_to_string(out).unwrap().trim(), "localdev:9123");
    }
}
