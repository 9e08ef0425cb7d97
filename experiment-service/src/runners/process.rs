// Process Runner
// Executes task implementations as subprocesses and parses their output line

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long to keep reading output after a process was killed
const KILL_GRACE: Duration = Duration::from_millis(500);

/// Per-invocation settings for a task subprocess
#[derive(Debug, Clone, Default)]
pub struct ProcessConfig {
    /// Working directory of the subprocess
    pub working_dir: PathBuf,
    /// Extra environment variables
    pub env: BTreeMap<String, String>,
    /// Kill the process after this long (None = no timeout)
    pub timeout: Option<Duration>,
}

/// How a subprocess ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessExit {
    /// Exited on its own with the given code (None when killed by a signal)
    Exited(Option<i32>),
    /// Killed after exceeding the configured timeout
    TimedOut(Duration),
    /// Killed because the run was cancelled
    Cancelled,
}

/// Output collected from a finished subprocess
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit: ProcessExit,
}

/// Runs task implementations, choosing an interpreter by file extension
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    interpreters: BTreeMap<String, String>,
}

impl ProcessRunner {
    /// `interpreters` maps a file extension (without the dot) to a program
    pub fn new(interpreters: BTreeMap<String, String>) -> Self {
        Self { interpreters }
    }

    /// Program and leading arguments used to launch `implementation`
    pub fn command_for(&self, implementation: &Path) -> (PathBuf, Vec<OsString>) {
        let interpreter = implementation
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.interpreters.get(ext));

        match interpreter {
            Some(program) => {
                let resolved = which::which(program).unwrap_or_else(|_| PathBuf::from(program));
                (resolved, vec![implementation.as_os_str().to_os_string()])
            }
            None => (implementation.to_path_buf(), Vec::new()),
        }
    }

    /// Run `implementation` with `args`, killing it on timeout or cancellation
    pub async fn run(
        &self,
        implementation: &Path,
        args: &[String],
        config: &ProcessConfig,
        cancel: &CancellationToken,
    ) -> std::io::Result<ProcessOutput> {
        let (program, leading) = self.command_for(implementation);

        let mut cmd = Command::new(&program);
        cmd.args(leading);
        cmd.args(args);
        cmd.current_dir(&config.working_dir);
        cmd.envs(&config.env);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("failed to spawn '{}': {}", program.display(), e),
            )
        })?;

        // Read output streams concurrently
        let stdout_handle = child.stdout.take().map(|s| tokio::spawn(read_all(s)));
        let stderr_handle = child.stderr.take().map(|s| tokio::spawn(read_all(s)));

        let deadline = async {
            match config.timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        let exit = tokio::select! {
            status = child.wait() => ProcessExit::Exited(status?.code()),
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                ProcessExit::Cancelled
            }
            _ = deadline => {
                let _ = child.kill().await;
                // A timeout is only reachable when one is configured
                ProcessExit::TimedOut(config.timeout.unwrap_or_default())
            }
        };

        // A killed process may leave descendants holding the pipes open
        let grace = match exit {
            ProcessExit::Exited(_) => None,
            _ => Some(KILL_GRACE),
        };
        let stdout = collect(stdout_handle, grace).await;
        let stderr = collect(stderr_handle, grace).await;

        Ok(ProcessOutput {
            stdout,
            stderr,
            exit,
        })
    }
}

async fn collect(handle: Option<JoinHandle<String>>, grace: Option<Duration>) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    match grace {
        Some(grace) => match tokio::time::timeout(grace, handle).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => String::new(),
        },
        None => handle.await.unwrap_or_default(),
    }
}

async fn read_all<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Parse the first stdout line into exactly `expected` fields.
///
/// Fields are comma separated and may be wrapped in double quotes, in which
/// case commas inside them are kept and `""` stands for one quote. Whitespace
/// around each field is trimmed. When `expected` is zero any output is
/// accepted and nothing is returned.
pub fn parse_output_line(stdout: &str, expected: usize) -> Result<Vec<String>, String> {
    if expected == 0 {
        return Ok(Vec::new());
    }

    let line = stdout
        .lines()
        .next()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .ok_or_else(|| {
            format!(
                "expected {} output value(s) but the first output line is empty",
                expected
            )
        })?;

    let fields = split_fields(line)?;
    if fields.len() != expected {
        return Err(format!(
            "expected {} output value(s) but got {}: '{}'",
            expected,
            fields.len(),
            line
        ));
    }
    Ok(fields)
}

fn split_fields(line: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    current.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if current.trim().is_empty() && !quoted => {
                current.clear();
                in_quotes = true;
                quoted = true;
            }
            ',' if !in_quotes => {
                fields.push(finish_field(&current, quoted));
                current.clear();
                quoted = false;
            }
            _ => current.push(ch),
        }
    }

    if in_quotes {
        return Err(format!("unterminated quote in output line '{}'", line));
    }
    fields.push(finish_field(&current, quoted));
    Ok(fields)
}

fn finish_field(raw: &str, quoted: bool) -> String {
    if quoted {
        // Only whitespace may follow the closing quote
        raw.trim_end().to_string()
    } else {
        raw.trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn runner() -> ProcessRunner {
        let mut interpreters = BTreeMap::new();
        interpreters.insert("sh".to_string(), "sh".to_string());
        ProcessRunner::new(interpreters)
    }

    #[test]
    fn test_parse_output_line() {
        assert_eq!(
            parse_output_line("1, 2 ,3\nignored", 3).unwrap(),
            vec!["1", "2", "3"]
        );
        assert_eq!(
            parse_output_line("\"a, b\",\"say \"\"hi\"\"\"", 2).unwrap(),
            vec!["a, b", "say \"hi\""]
        );
        assert_eq!(parse_output_line("  \"x\"  ", 1).unwrap(), vec!["x"]);
    }

    #[test]
    fn test_parse_output_line_count_mismatch() {
        let err = parse_output_line("1,2", 3).unwrap_err();
        assert!(err.contains("expected 3"));
        assert!(parse_output_line("", 1).is_err());
        assert!(parse_output_line("\"open,1", 2).is_err());
    }

    #[test]
    fn test_zero_outputs_accept_anything() {
        assert!(parse_output_line("", 0).unwrap().is_empty());
        assert!(parse_output_line("a,b,c", 0).unwrap().is_empty());
    }

    #[test]
    fn test_command_for_extension() {
        let runner = runner();
        let (_, leading) = runner.command_for(Path::new("/tmp/task.sh"));
        assert_eq!(leading, vec![OsString::from("/tmp/task.sh")]);

        let (program, leading) = runner.command_for(Path::new("/tmp/task.bin"));
        assert_eq!(program, PathBuf::from("/tmp/task.bin"));
        assert!(leading.is_empty());
    }

    #[tokio::test]
    async fn test_run_passes_args_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "echo.sh",
            "echo \"$1,$2,$EXPFLOW_TASK_ID,$(basename \"$PWD\")\"\n",
        );

        let mut env = BTreeMap::new();
        env.insert("EXPFLOW_TASK_ID".to_string(), "T1".to_string());
        let config = ProcessConfig {
            working_dir: dir.path().to_path_buf(),
            env,
            timeout: None,
        };

        let output = runner()
            .run(
                &script,
                &["--x".to_string(), "5".to_string()],
                &config,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(output.exit, ProcessExit::Exited(Some(0)));
        let dir_name = dir.path().file_name().unwrap().to_string_lossy();
        assert_eq!(
            output.stdout.trim(),
            format!("--x,5,T1,{}", dir_name)
        );
    }

    #[tokio::test]
    async fn test_run_reports_exit_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "fail.sh", "echo boom >&2\nexit 3\n");
        let config = ProcessConfig {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        let output = runner()
            .run(&script, &[], &config, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.exit, ProcessExit::Exited(Some(3)));
        assert_eq!(output.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn test_run_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "exec sleep 5\n");
        let config = ProcessConfig {
            working_dir: dir.path().to_path_buf(),
            timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        };

        let output = runner()
            .run(&script, &[], &config, &CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(output.exit, ProcessExit::TimedOut(_)));
    }

    #[tokio::test]
    async fn test_run_cancellation_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "slow.sh", "exec sleep 5\n");
        let config = ProcessConfig {
            working_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let output = runner().run(&script, &[], &config, &cancel).await.unwrap();
        assert_eq!(output.exit, ProcessExit::Cancelled);
    }
}
