//! One-shot CLI engine invocations.
//!
//! A CLI engine owns no state beyond its argv and the output file path:
//! the builder is pure (and unit-testable), the runner spawns, waits with a
//! timeout, and reads the produced image back.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use easel_core::status::JobType;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::ModelDescriptor;
use crate::error::EngineError;

/// Upper bound on a single CLI generation.
const CLI_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Stderr capture cap; diagnostics only need the head of the stream.
const MAX_STDERR_BYTES: usize = 256 * 1024;

/// Job-specific inputs for one CLI invocation.
#[derive(Debug, Clone, Default)]
pub struct CliInvocation {
    pub job_type: JobType,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub seed: Option<i64>,
    /// Already resolved via the steps fallback chain (user value, model
    /// default, quality mapping); `None` means the flag is omitted.
    pub steps: Option<u32>,
    pub strength: Option<f64>,
    pub init_img: Option<PathBuf>,
    pub mask: Option<PathBuf>,
    pub output: PathBuf,
}

/// Build the full argument vector: the descriptor's fixed args first, then
/// the job flags.
///
/// Exactly one `--steps` flag ever appears: if the descriptor's fixed args
/// already pin it, the job-level value is dropped. `--strength` is emitted
/// for variation jobs only.
pub fn build_argv(descriptor: &ModelDescriptor, invocation: &CliInvocation) -> Vec<String> {
    let mut argv = descriptor.args.clone();

    if let Some(prompt) = &invocation.prompt {
        argv.push("-p".into());
        argv.push(prompt.clone());
    }
    if let Some(negative) = &invocation.negative_prompt {
        argv.push("-n".into());
        argv.push(negative.clone());
    }
    if let Some(width) = invocation.width {
        argv.push("-W".into());
        argv.push(width.to_string());
    }
    if let Some(height) = invocation.height {
        argv.push("-H".into());
        argv.push(height.to_string());
    }
    if let Some(seed) = invocation.seed {
        argv.push("-s".into());
        argv.push(seed.to_string());
    }
    if let Some(steps) = invocation.steps {
        if !argv.iter().any(|a| a == "--steps") {
            argv.push("--steps".into());
            argv.push(steps.to_string());
        }
    }
    if invocation.job_type == JobType::Variation {
        if let Some(strength) = invocation.strength {
            argv.push("--strength".into());
            argv.push(format_float(strength));
        }
    }
    if let Some(init) = &invocation.init_img {
        argv.push("--init-img".into());
        argv.push(init.display().to_string());
    }
    if let Some(mask) = &invocation.mask {
        argv.push("--mask".into());
        argv.push(mask.display().to_string());
    }

    argv.push("-o".into());
    argv.push(invocation.output.display().to_string());
    argv
}

/// Run the engine once and read back the image it produced.
pub async fn run(
    descriptor: &ModelDescriptor,
    invocation: &CliInvocation,
) -> Result<Vec<u8>, EngineError> {
    let argv = build_argv(descriptor, invocation);

    tracing::debug!(
        model_id = %descriptor.id,
        command = %descriptor.command,
        args = ?argv,
        "running CLI engine",
    );

    let mut child = Command::new(&descriptor.command)
        .args(&argv)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::ModelStartFailure(format!(
            "cannot spawn '{}': {e}",
            descriptor.command
        )))?;

    // Drain stderr concurrently so a chatty engine cannot fill the pipe and
    // deadlock against our wait.
    let stderr_handle = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr_handle {
            let _ = (&mut stderr)
                .take(MAX_STDERR_BYTES as u64)
                .read_to_end(&mut buf)
                .await;
        }
        buf
    });

    let status = match tokio::time::timeout(CLI_TIMEOUT, child.wait()).await {
        Ok(result) => result?,
        Err(_elapsed) => {
            // Dropping the child kills it via kill_on_drop.
            return Err(EngineError::ProcessCrashed(format!(
                "CLI engine '{}' exceeded {}s",
                descriptor.id,
                CLI_TIMEOUT.as_secs(),
            )));
        }
    };

    if !status.success() {
        let stderr_bytes = stderr_task.await.unwrap_or_default();
        return Err(EngineError::CliExitNonZero {
            code: status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&stderr_bytes).trim().to_string(),
        });
    }

    read_output(&invocation.output).await
}

/// Load the produced image, rejecting missing or empty files.
async fn read_output(path: &Path) -> Result<Vec<u8>, EngineError> {
    let bytes = tokio::fs::read(path).await.map_err(|_| {
        EngineError::CliOutputUnparseable(format!(
            "engine produced no output at {}",
            path.display()
        ))
    })?;
    if bytes.is_empty() {
        return Err(EngineError::CliOutputUnparseable(format!(
            "engine output at {} is empty",
            path.display()
        )));
    }
    Ok(bytes)
}

/// Render a float without trailing zero noise (`0.75`, not `0.750000`).
fn format_float(value: f64) -> String {
    let mut s = format!("{value}");
    if !s.contains('.') {
        s.push_str(".0");
    }
    s
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use easel_core::status::{ExecMode, LoadMode};

    fn cli_descriptor(args: Vec<String>) -> ModelDescriptor {
        ModelDescriptor {
            id: "u1".into(),
            name: "upscaler".into(),
            description: None,
            command: "/opt/engines/upscale".into(),
            args,
            api_url: None,
            load_mode: LoadMode::OnDemand,
            exec_mode: ExecMode::Cli,
            port: None,
            startup_timeout_ms: None,
            generation_params: Default::default(),
            capabilities: vec![],
            registry_repo: None,
            registry_files: vec![],
        }
    }

    fn count_flag(argv: &[String], flag: &str) -> usize {
        argv.iter().filter(|a| a.as_str() == flag).count()
    }

    #[test]
    fn upscale_argv_has_init_img_and_no_strength() {
        let invocation = CliInvocation {
            job_type: JobType::Upscale,
            init_img: Some(PathBuf::from("/tmp/in.png")),
            strength: Some(0.75),
            output: PathBuf::from("/tmp/out.png"),
            ..Default::default()
        };
        let argv = build_argv(&cli_descriptor(vec![]), &invocation);

        let init_pos = argv.iter().position(|a| a == "--init-img").unwrap();
        assert_eq!(argv[init_pos + 1], "/tmp/in.png");
        assert_eq!(count_flag(&argv, "--strength"), 0);
        assert_eq!(count_flag(&argv, "--steps"), 0);
    }

    #[test]
    fn upscale_argv_carries_steps_when_provided() {
        let invocation = CliInvocation {
            job_type: JobType::Upscale,
            steps: Some(14),
            init_img: Some(PathBuf::from("/tmp/in.png")),
            output: PathBuf::from("/tmp/out.png"),
            ..Default::default()
        };
        let argv = build_argv(&cli_descriptor(vec![]), &invocation);
        assert_eq!(count_flag(&argv, "--steps"), 1);
        let pos = argv.iter().position(|a| a == "--steps").unwrap();
        assert_eq!(argv[pos + 1], "14");
    }

    #[test]
    fn variation_argv_carries_default_strength() {
        let invocation = CliInvocation {
            job_type: JobType::Variation,
            prompt: Some("p".into()),
            strength: Some(0.75),
            init_img: Some(PathBuf::from("/tmp/in.png")),
            output: PathBuf::from("/tmp/out.png"),
            ..Default::default()
        };
        let argv = build_argv(&cli_descriptor(vec![]), &invocation);
        let pos = argv.iter().position(|a| a == "--strength").unwrap();
        assert_eq!(argv[pos + 1], "0.75");
    }

    #[test]
    fn descriptor_pinned_steps_suppresses_job_steps() {
        let invocation = CliInvocation {
            job_type: JobType::Generate,
            prompt: Some("p".into()),
            steps: Some(30),
            output: PathBuf::from("/tmp/out.png"),
            ..Default::default()
        };
        let fixed = vec!["--steps".to_string(), "8".to_string()];
        let argv = build_argv(&cli_descriptor(fixed), &invocation);
        assert_eq!(count_flag(&argv, "--steps"), 1);
        let pos = argv.iter().position(|a| a == "--steps").unwrap();
        assert_eq!(argv[pos + 1], "8");
    }

    #[test]
    fn full_generate_argv_shape() {
        let invocation = CliInvocation {
            job_type: JobType::Generate,
            prompt: Some("a cat".into()),
            negative_prompt: Some("blurry".into()),
            width: Some(512),
            height: Some(512),
            seed: Some(42),
            steps: Some(25),
            output: PathBuf::from("/tmp/out.png"),
            ..Default::default()
        };
        let argv = build_argv(&cli_descriptor(vec![]), &invocation);
        assert_eq!(
            argv,
            vec![
                "-p", "a cat", "-n", "blurry", "-W", "512", "-H", "512", "-s", "42",
                "--steps", "25", "-o", "/tmp/out.png",
            ]
        );
    }

    #[tokio::test]
    async fn run_reads_engine_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.png");

        // A stand-in engine: write a marker byte to whatever -o points at.
        let mut descriptor = cli_descriptor(vec![
            "-c".into(),
            format!("printf 'PNG' > {}", out.display()),
        ]);
        descriptor.command = "sh".into();

        // sh ignores the generation flags after -c's script argument.
        let invocation = CliInvocation {
            job_type: JobType::Generate,
            output: out.clone(),
            ..Default::default()
        };
        let bytes = run(&descriptor, &invocation).await.unwrap();
        assert_eq!(bytes, b"PNG");
    }

    #[tokio::test]
    async fn non_zero_exit_is_surfaced() {
        let mut descriptor = cli_descriptor(vec!["-c".into(), "echo boom >&2; exit 3".into()]);
        descriptor.command = "sh".into();

        let invocation = CliInvocation {
            job_type: JobType::Generate,
            output: PathBuf::from("/tmp/never-written.png"),
            ..Default::default()
        };
        let err = run(&descriptor, &invocation).await.unwrap_err();
        match err {
            EngineError::CliExitNonZero { code, stderr } => {
                assert_eq!(code, 3);
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected CliExitNonZero, got {other}"),
        }
    }

    #[tokio::test]
    async fn missing_output_is_unparseable() {
        let mut descriptor = cli_descriptor(vec!["-c".into(), "true".into()]);
        descriptor.command = "sh".into();

        let invocation = CliInvocation {
            job_type: JobType::Generate,
            output: PathBuf::from("/tmp/definitely-not-here.png"),
            ..Default::default()
        };
        let err = run(&descriptor, &invocation).await.unwrap_err();
        assert!(matches!(err, EngineError::CliOutputUnparseable(_)));
    }
}
