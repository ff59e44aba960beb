// Engine seams and the shared external-process runner.
//
// Rendering goes through two trait objects: a `SynthesisEngine` that turns a
// MIDI file into a raw WAV, and an `EffectsEngine` that runs the production
// chain over that WAV. The shipped implementations (`fluidsynth`, `ffmpeg`)
// shell out through `run_tool`, which bounds every invocation with a
// timeout and kills the child if the timeout fires. Tests substitute the
// in-process engines from `testing`.

use crate::error::RenderError;
use async_trait::async_trait;
use reverie_music::{Arrangement, EffectStage};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;

/// Timeout for `--version` style availability probes.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Inputs for one synthesis call. The MIDI file is already written and
/// describes exactly `arrangement`.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisRequest<'a> {
    pub arrangement: &'a Arrangement,
    pub midi_path: &'a Path,
    pub output_path: &'a Path,
}

#[async_trait]
pub trait SynthesisEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Fails with `EngineUnavailable` if the engine or its sample library is
    /// missing.
    async fn check(&self) -> Result<(), RenderError>;

    async fn synthesize(&self, request: SynthesisRequest<'_>) -> Result<(), RenderError>;
}

#[async_trait]
pub trait EffectsEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self) -> Result<(), RenderError>;

    /// Apply `stages` in order to `input`, writing 16-bit PCM to `output`.
    async fn process(
        &self,
        input: &Path,
        stages: &[EffectStage],
        output: &Path,
    ) -> Result<(), RenderError>;
}

/// Run an external tool to completion.
///
/// A binary that cannot be spawned maps to `EngineUnavailable`, a run that
/// outlives `limit` to `EngineTimeout` (the child is killed), and a non-zero
/// exit to `EngineFailed` carrying the tail of stderr.
pub(crate) async fn run_tool(
    engine: &str,
    program: &Path,
    args: &[OsString],
    limit: Duration,
) -> Result<Output, RenderError> {
    tracing::debug!(engine, program = %program.display(), ?args, "spawning");
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => RenderError::EngineUnavailable {
                engine: engine.to_string(),
                reason: format!("cannot run {}: {e}", program.display()),
            },
            _ => RenderError::EngineFailed {
                engine: engine.to_string(),
                detail: format!("spawn failed: {e}"),
            },
        })?;

    // Dropping the wait future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
        Err(_) => {
            tracing::warn!(engine, ?limit, "engine timed out");
            return Err(RenderError::EngineTimeout {
                engine: engine.to_string(),
                timeout: limit,
            });
        }
        Ok(Err(e)) => {
            return Err(RenderError::EngineFailed {
                engine: engine.to_string(),
                detail: format!("wait failed: {e}"),
            });
        }
        Ok(Ok(output)) => output,
    };

    if !output.status.success() {
        return Err(RenderError::EngineFailed {
            engine: engine.to_string(),
            detail: format!("{}: {}", output.status, stderr_tail(&output.stderr)),
        });
    }
    Ok(output)
}

/// Probe that a tool starts and exits cleanly with `args`.
pub(crate) async fn probe_tool(
    engine: &str,
    program: &Path,
    args: &[&str],
) -> Result<(), RenderError> {
    let args: Vec<OsString> = args.iter().map(OsString::from).collect();
    run_tool(engine, program, &args, PROBE_TIMEOUT)
        .await
        .map(|_| ())
        .map_err(|e| match e {
            RenderError::EngineFailed { engine, detail } => RenderError::EngineUnavailable {
                engine,
                reason: detail,
            },
            other => other,
        })
}

fn stderr_tail(stderr: &[u8]) -> String {
    const MAX: usize = 400;
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= MAX {
        return text.to_string();
    }
    let mut start = text.len() - MAX;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let err = run_tool(
            "ghost",
            Path::new("/nonexistent/reverie-ghost-binary"),
            &[],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(
            matches!(err, RenderError::EngineUnavailable { .. }),
            "got {err:?}"
        );
        assert!(err.is_resource());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stalled_tool_times_out() {
        let started = std::time::Instant::now();
        let err = run_tool(
            "sleeper",
            Path::new("sleep"),
            &[OsString::from("30")],
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RenderError::EngineTimeout { .. }), "got {err:?}");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_failure() {
        let err = run_tool("false", Path::new("false"), &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::EngineFailed { .. }), "got {err:?}");
    }

    #[test]
    fn test_stderr_tail_truncates() {
        let long = "x".repeat(1000);
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.starts_with("..."));
        assert_eq!(tail.len(), 403);
        assert_eq!(stderr_tail(b"  short \n"), "short");
    }
}
