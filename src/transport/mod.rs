//! WF-010: Local script transport — runs generated bash for `git` and `wp`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Output from executing a script.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Trimmed stderr, falling back to stdout, for error messages.
    pub fn failure_detail(&self) -> String {
        let err = self.stderr.trim();
        if err.is_empty() {
            format!("exit code {}: {}", self.exit_code, self.stdout.trim())
        } else {
            format!("exit code {}: {}", self.exit_code, err)
        }
    }
}

/// Execute a script with `bash` (generated scripts use `set -o pipefail`),
/// optionally from a working directory. Interactive git prompts are disabled.
pub fn exec_local(script: &str, cwd: Option<&Path>) -> Result<ExecOutput, String> {
    let mut cmd = Command::new("bash");
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("GIT_TERMINAL_PROMPT", "0");
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    let mut child = cmd
        .spawn()
        .map_err(|e| format!("failed to spawn bash: {}", e))?;

    if let Some(ref mut stdin) = child.stdin {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| format!("stdin write error: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("wait error: {}", e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Run `exec_local` on the blocking pool.
pub async fn exec_script(script: String, cwd: Option<PathBuf>) -> Result<ExecOutput, String> {
    tokio::task::spawn_blocking(move || exec_local(&script, cwd.as_deref()))
        .await
        .map_err(|e| format!("script task failed: {}", e))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wf010_local_echo() {
        let out = exec_local("echo hello", None).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn test_wf010_local_failure() {
        let out = exec_local("exit 42", None).unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, 42);
        assert_eq!(out.failure_detail(), "exit code 42: ");
    }

    #[test]
    fn test_wf010_local_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let out = exec_local("touch marker && ls", Some(dir.path())).unwrap();
        assert!(out.success());
        assert!(dir.path().join("marker").exists());
    }

    #[test]
    fn test_wf010_local_pipefail() {
        let out = exec_local("set -euo pipefail\nfalse | true", None).unwrap();
        assert!(!out.success(), "pipefail should catch false in pipeline");
    }

    #[test]
    fn test_wf010_failure_detail_prefers_stderr() {
        let out = ExecOutput {
            exit_code: 1,
            stdout: "noise".into(),
            stderr: " fatal: bad ref \n".into(),
        };
        assert_eq!(out.failure_detail(), "exit code 1: fatal: bad ref");
    }

    #[tokio::test]
    async fn test_wf010_exec_script_async() {
        let out = exec_script("printf ok".to_string(), None).await.unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "ok");
    }
}
