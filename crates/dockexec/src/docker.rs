// crates/dockexec/src/docker.rs
// Container runtime backed by the docker CLI

use crate::runtime::{ContainerRuntime, RuntimeUnit, UnitSpec};
use async_trait::async_trait;
use dockcore::RuntimeError;
use std::process::{Output, Stdio};
use tokio::process::Command;

/// Settings for the docker-backed runtime
#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Path or name of the docker binary. `DOCKER_HOST` and friends are
    /// honoured by the binary itself.
    pub binary: String,
    /// First segment of every container name.
    pub name_prefix: String,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            name_prefix: crate::adapter::DEFAULT_NAME_PREFIX.to_string(),
        }
    }
}

/// Drives containers through `docker create/start/wait/logs/rm`.
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(config: &DockerConfig) -> Self {
        Self {
            binary: config.binary.clone(),
        }
    }

    /// Check that the daemon answers. Used once at startup.
    pub async fn ping(&self) -> Result<String, RuntimeError> {
        let output = self
            .run(&["version", "--format", "{{.Server.Version}}"], RuntimeError::Unavailable)
            .await?;
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::info!("🐳 Connected to Docker daemon {}", version);
        Ok(version)
    }

    /// Run the docker binary to completion. A spawn failure or non-zero
    /// status is reported through `wrap`.
    async fn run(
        &self,
        args: &[&str],
        wrap: fn(String) -> RuntimeError,
    ) -> Result<Output, RuntimeError> {
        tracing::debug!("{} {}", self.binary, args.join(" "));

        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| wrap(format!("could not run '{}': {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                format!("'{} {}' exited with {}", self.binary, args[0], output.status)
            } else {
                stderr
            };
            return Err(wrap(detail));
        }

        Ok(output)
    }
}

/// Arguments for `docker create`.
fn create_args(spec: &UnitSpec, name: &str) -> Vec<String> {
    let mut args = vec!["create".to_string(), "--name".to_string(), name.to_string()];

    if let Some(ref dir) = spec.working_dir {
        args.push("-w".to_string());
        args.push(dir.clone());
    }

    for var in &spec.env {
        args.push("-e".to_string());
        args.push(format!("{}={}", var.name, var.value));
    }

    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

/// Interleave the two streams of `docker logs --timestamps` by timestamp and
/// strip the timestamps. Docker pads the fraction to nine digits, so the
/// prefixes compare correctly as strings. Ties keep stdout first.
fn merge_timestamped(stdout: &str, stderr: &str) -> String {
    fn split(line: &str) -> (&str, &str) {
        line.split_once(' ').unwrap_or((line.trim_end_matches('\n'), "\n"))
    }

    let mut out = stdout.split_inclusive('\n').map(split).peekable();
    let mut err = stderr.split_inclusive('\n').map(split).peekable();
    let mut merged = String::with_capacity(stdout.len() + stderr.len());

    loop {
        let take_err = match (out.peek(), err.peek()) {
            (None, None) => break,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (Some((out_ts, _)), Some((err_ts, _))) => err_ts < out_ts,
        };
        let next = if take_err { err.next() } else { out.next() };
        if let Some((_, text)) = next {
            merged.push_str(text);
        }
    }
    merged
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn create(&self, spec: &UnitSpec, name: &str) -> Result<RuntimeUnit, RuntimeError> {
        let args = create_args(spec, name);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&args, RuntimeError::Create).await?;
        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            // The name may already be taken by a container we cannot address
            // by id, so remove it by name before giving up.
            if let Err(e) = self.run(&["rm", "-f", name], RuntimeError::Remove).await {
                tracing::warn!("Could not remove container '{}': {}", name, e);
            }
            return Err(RuntimeError::Create(format!(
                "docker returned no container id for '{}'",
                name
            )));
        }

        Ok(RuntimeUnit {
            id,
            name: name.to_string(),
        })
    }

    async fn start(&self, unit: &RuntimeUnit) -> Result<(), RuntimeError> {
        self.run(&["start", unit.id.as_str()], RuntimeError::Start)
            .await?;
        Ok(())
    }

    async fn wait(&self, unit: &RuntimeUnit) -> Result<i64, RuntimeError> {
        let output = self
            .run(&["wait", unit.id.as_str()], RuntimeError::Wait)
            .await?;
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim().parse::<i64>().map_err(|e| {
            RuntimeError::Wait(format!("unexpected exit code '{}': {}", text.trim(), e))
        })
    }

    /// Combined stdout and stderr in the order the container wrote them.
    async fn logs(&self, unit: &RuntimeUnit) -> Result<String, RuntimeError> {
        let output = self
            .run(&["logs", "--timestamps", unit.id.as_str()], RuntimeError::Logs)
            .await?;
        Ok(merge_timestamped(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ))
    }

    async fn remove(&self, unit: &RuntimeUnit) -> Result<(), RuntimeError> {
        self.run(&["rm", "-f", unit.id.as_str()], RuntimeError::Remove)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockcore::EnvVar;

    #[test]
    fn create_args_place_options_before_image() {
        let spec = UnitSpec {
            image: "alpine:3.19".to_string(),
            command: vec!["echo".to_string(), "hi there".to_string()],
            working_dir: Some("/work".to_string()),
            env: vec![EnvVar::new("A", "1"), EnvVar::new("B", "x=y")],
        };

        assert_eq!(
            create_args(&spec, "dockflow-run-main"),
            vec![
                "create",
                "--name",
                "dockflow-run-main",
                "-w",
                "/work",
                "-e",
                "A=1",
                "-e",
                "B=x=y",
                "alpine:3.19",
                "echo",
                "hi there",
            ]
        );
    }

    #[test]
    fn create_args_without_command_use_image_default() {
        let spec = UnitSpec {
            image: "busybox".to_string(),
            command: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        };
        assert_eq!(
            create_args(&spec, "n"),
            vec!["create", "--name", "n", "busybox"]
        );
    }

    #[test]
    fn merged_logs_follow_timestamps_across_streams() {
        let stdout = "2024-05-01T10:00:00.000000001Z first\n\
                      2024-05-01T10:00:00.000000300Z third\n";
        let stderr = "2024-05-01T10:00:00.000000200Z second\n\
                      2024-05-01T10:00:01.000000000Z fourth\n";
        assert_eq!(
            merge_timestamped(stdout, stderr),
            "first\nsecond\nthird\nfourth\n"
        );
    }

    #[test]
    fn merged_logs_keep_blank_lines_and_missing_newline() {
        let stdout = "2024-05-01T10:00:00.000000001Z \n2024-05-01T10:00:00.000000002Z tail";
        assert_eq!(merge_timestamped(stdout, ""), "\ntail");
        assert_eq!(merge_timestamped("", ""), "");
    }

    /// A stand-in docker binary that records its arguments and prints no
    /// container id on create.
    #[cfg(unix)]
    fn fake_docker(test: &str) -> (DockerCli, std::path::PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("dockflow-{}-{}", test, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let calls = dir.join("calls");
        let _ = std::fs::remove_file(&calls);

        let script = format!(
            "#!/bin/sh\n\
             echo \"$*\" >> '{}'\n\
             if [ \"$1\" = logs ]; then\n\
             echo '2024-05-01T10:00:00.000000001Z out one'\n\
             echo '2024-05-01T10:00:00.000000002Z err two' >&2\n\
             echo '2024-05-01T10:00:00.000000003Z out three'\n\
             fi\n\
             exit 0\n",
            calls.display()
        );
        let binary = dir.join("docker");
        std::fs::write(&binary, script).unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let cli = DockerCli::new(&DockerConfig {
            binary: binary.display().to_string(),
            ..Default::default()
        });
        (cli, calls)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn create_without_id_removes_container_by_name() {
        let (cli, calls) = fake_docker("create-no-id");
        let spec = UnitSpec {
            image: "alpine".to_string(),
            command: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        };

        let err = cli.create(&spec, "dockflow-run-main").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Create(_)));

        let recorded = std::fs::read_to_string(&calls).unwrap();
        let lines: Vec<&str> = recorded.lines().collect();
        assert_eq!(
            lines,
            vec!["create --name dockflow-run-main alpine", "rm -f dockflow-run-main"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn logs_interleave_stdout_and_stderr() {
        let (cli, _) = fake_docker("logs-order");
        let unit = RuntimeUnit {
            id: "c1".to_string(),
            name: "dockflow-run-main".to_string(),
        };
        assert_eq!(cli.logs(&unit).await.unwrap(), "out one\nerr two\nout three\n");
    }

    #[tokio::test]
    async fn missing_binary_is_reported_as_unavailable() {
        let cli = DockerCli::new(&DockerConfig {
            binary: "/nonexistent/docker-binary".to_string(),
            ..Default::default()
        });
        let err = cli.ping().await.unwrap_err();
        assert!(matches!(err, RuntimeError::Unavailable(_)));
    }
}
