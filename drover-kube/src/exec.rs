//! Command execution inside containers
//!
//! The exec subresource speaks a streaming protocol, so instead of
//! reimplementing it we shell out to kubectl against the same API server.

use tokio::process::Command;
use tracing::debug;

use crate::KubeClient;
use crate::error::{KubeError, Result};
use crate::objects::ExecOutput;

impl KubeClient {
    fn exec_args(&self, namespace: &str, pod: &str, container: &str, command: &[String]) -> Vec<String> {
        let mut args = vec![
            format!("--server={}", self.base_url),
            "--insecure-skip-tls-verify=true".to_string(),
        ];
        if let Some(token) = &self.token {
            args.push(format!("--token={}", token));
        }
        args.extend([
            "exec".to_string(),
            "-n".to_string(),
            namespace.to_string(),
            pod.to_string(),
            "-c".to_string(),
            container.to_string(),
            "--".to_string(),
        ]);
        args.extend(command.iter().cloned());
        args
    }

    /// Run a command in a container and capture its stdout
    ///
    /// A non-zero exit status is reported through [`ExecOutput::success`];
    /// only a failure to launch kubectl is an error.
    pub async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        command: &[String],
    ) -> Result<ExecOutput> {
        if command.is_empty() {
            return Err(KubeError::InvalidRequest("empty exec command".to_string()));
        }
        debug!("Exec in {}/{} ({}): {:?}", namespace, pod, container, command);

        let output = Command::new(&self.kubectl)
            .args(self.exec_args(namespace, pod, container, command))
            .output()
            .await
            .map_err(|e| KubeError::ExecFailed(format!("failed to run {}: {}", self.kubectl, e)))?;

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            success: output.status.success(),
        })
    }
}
