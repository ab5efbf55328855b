//! Syscall profiling of high-usage processes.
//!
//! When a process crosses a threshold the profiler attaches a tracer for a
//! fixed window, interrupts it, and turns the summary table into
//! `strace_metrics` series. Each attempt runs on its own task so the
//! sampling cycle never waits for it.

mod detector;
mod report;

pub use detector::{Attempt, ProfiledSet, Thresholds, DEFAULT_CPU_THRESHOLD, DEFAULT_MEM_THRESHOLD};
pub use report::{parse_summary, SyscallMetric, REPORT_END};

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::ProfileError;
use crate::metrics::WorkloadMetrics;
use crate::process::Indicator;

/// Default tracing window before the tracer is interrupted.
pub const DEFAULT_ATTACH: Duration = Duration::from_secs(5);

/// How long an interrupted tracer gets to write its summary before SIGKILL.
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

/// Builds the command that attaches a tracer to a process.
pub trait Tracer: Send + Sync {
    /// Command tracing `pid` and writing its summary to `report`.
    fn command(&self, pid: u32, report: &Path) -> Command;
}

/// `strace -c` attached to every thread of the target.
#[derive(Debug, Clone)]
pub struct StraceTracer {
    program: PathBuf,
}

impl StraceTracer {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for StraceTracer {
    fn default() -> Self {
        Self::new("strace")
    }
}

impl Tracer for StraceTracer {
    fn command(&self, pid: u32, report: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-A")
            .arg("-f")
            .arg("-c")
            .args(["-e", "trace=all"])
            .arg("-p")
            .arg(pid.to_string())
            .arg("-o")
            .arg(report);
        cmd
    }
}

/// Verifies that this host can trace other processes.
pub fn check_tracing_support() -> Result<(), ProfileError> {
    if !cfg!(target_os = "linux") {
        return Err(ProfileError::UnsupportedOs {
            os: std::env::consts::OS,
        });
    }
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        return Err(ProfileError::InsufficientPrivilege { euid });
    }
    Ok(())
}

/// Path of the summary file for a pid.
pub fn report_path(dir: &Path, pid: u32) -> PathBuf {
    dir.join(format!("exporter_strace_{pid}.log"))
}

/// Outcome label recorded in `strace_profiles_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOutcome {
    /// The tracer exited on its own before the window ended.
    Completed,
    /// The window ended and the tracer was interrupted.
    Interrupted,
    Failed,
    /// The pid already had a profile.
    Deduplicated,
}

impl ProfileOutcome {
    pub fn label(self) -> &'static str {
        match self {
            ProfileOutcome::Completed => "completed",
            ProfileOutcome::Interrupted => "interrupted",
            ProfileOutcome::Failed => "failed",
            ProfileOutcome::Deduplicated => "deduplicated",
        }
    }
}

/// Result of a finished profiling attempt.
#[derive(Debug, Clone)]
pub struct ProfileReport {
    pub pid: u32,
    pub command: String,
    pub outcome: ProfileOutcome,
    pub syscalls: Vec<SyscallMetric>,
}

#[derive(Debug, Clone)]
pub struct ProfilerOptions {
    pub attach: Duration,
    pub report_dir: PathBuf,
    pub cooldown: Option<Duration>,
}

pub struct Profiler {
    tracer: Arc<dyn Tracer>,
    options: ProfilerOptions,
    profiled: ProfiledSet,
    metrics: WorkloadMetrics,
}

impl Profiler {
    pub fn new(tracer: Arc<dyn Tracer>, options: ProfilerOptions, metrics: WorkloadMetrics) -> Self {
        let profiled = ProfiledSet::new(options.cooldown);
        Self {
            tracer,
            options,
            profiled,
            metrics,
        }
    }

    pub fn profiled(&self) -> &ProfiledSet {
        &self.profiled
    }

    /// Starts a detached profiling task unless `indicator`'s pid already has one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch(
        self: &Arc<Self>,
        indicator: Indicator,
    ) -> Option<JoinHandle<Result<ProfileReport, ProfileError>>> {
        let Some(attempt) = self.profiled.try_mark(indicator.pid) else {
            debug!(pid = indicator.pid, "Process already profiled, skipping");
            self.metrics
                .record_profile(ProfileOutcome::Deduplicated.label());
            return None;
        };

        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let result = this.profile(indicator).await;
            match &result {
                Ok(_) => this.profiled.finish(attempt),
                Err(e) => {
                    error!(pid = attempt.pid, error = %e, "Profiling failed");
                    this.profiled.release(attempt);
                    this.metrics.record_profile(ProfileOutcome::Failed.label());
                }
            }
            result
        }))
    }

    async fn profile(&self, indicator: Indicator) -> Result<ProfileReport, ProfileError> {
        let Indicator { pid, command, .. } = indicator;
        let path = report_path(&self.options.report_dir, pid);
        let report_err = |err| ProfileError::Report {
            path: path.clone(),
            err,
        };

        tokio::fs::create_dir_all(&self.options.report_dir)
            .await
            .map_err(|err| ProfileError::Report {
                path: self.options.report_dir.clone(),
                err,
            })?;
        // The tracer appends, so only bytes past this offset belong to this run.
        let offset = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(report_err)?
            .metadata()
            .await
            .map_err(report_err)?
            .len();

        let mut child = self
            .tracer
            .command(pid, &path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| ProfileError::Spawn { pid, err })?;
        info!(pid, command = %command, report = %path.display(), "Tracer attached");

        let stdout = child.stdout.take();
        let capture = async move {
            let mut buf = String::new();
            if let Some(mut out) = stdout {
                if let Err(e) = out.read_to_string(&mut buf).await {
                    debug!(pid, error = %e, "Failed to read tracer output");
                }
            }
            buf
        };
        let (captured, waited) = tokio::join!(capture, self.supervise(&mut child, pid));
        let (status, interrupted) = waited.map_err(|err| ProfileError::Wait { pid, err })?;

        let text = if captured.trim().is_empty() {
            read_from(&path, offset).await.map_err(report_err)?
        } else {
            captured
        };
        let syscalls = parse_summary(&text, pid, &command);

        if !interrupted && !status.success() && syscalls.is_empty() {
            return Err(ProfileError::Wait {
                pid,
                err: std::io::Error::other(format!("tracer exited with {status}")),
            });
        }

        for m in &syscalls {
            self.metrics
                .set_syscall(m.pid, &m.command, &m.syscall, m.calls, m.seconds);
        }

        let outcome = if interrupted {
            ProfileOutcome::Interrupted
        } else {
            ProfileOutcome::Completed
        };
        self.metrics.record_profile(outcome.label());
        info!(
            pid,
            command = %command,
            syscalls = syscalls.len(),
            outcome = outcome.label(),
            "Profiling finished"
        );

        Ok(ProfileReport {
            pid,
            command,
            outcome,
            syscalls,
        })
    }

    /// Waits out the attach window, then interrupts the tracer and drains it.
    async fn supervise(&self, child: &mut Child, pid: u32) -> std::io::Result<(ExitStatus, bool)> {
        match tokio::time::timeout(self.options.attach, child.wait()).await {
            Ok(status) => Ok((status?, false)),
            Err(_) => {
                if let Some(tracer_pid) = child.id() {
                    debug!(pid, tracer_pid, "Attach window over, interrupting tracer");
                    // SAFETY: the child has not been reaped yet, so its pid is still ours.
                    let rc = unsafe { libc::kill(tracer_pid as libc::pid_t, libc::SIGINT) };
                    if rc != 0 {
                        warn!(pid, error = %std::io::Error::last_os_error(), "Failed to interrupt tracer");
                    }
                }
                match tokio::time::timeout(INTERRUPT_GRACE, child.wait()).await {
                    Ok(status) => Ok((status?, true)),
                    Err(_) => {
                        warn!(pid, "Tracer ignored interrupt, killing it");
                        child.kill().await?;
                        Ok((child.wait().await?, true))
                    }
                }
            }
        }
    }
}

async fn read_from(path: &Path, offset: u64) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut text = String::new();
    file.read_to_string(&mut text).await?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, Registry, TextEncoder};

    const SUMMARY: &str = "% time     seconds  usecs/call     calls    errors syscall\n\
------ ----------- ----------- --------- --------- ----------------\n \
45.00    0.000450          45        10           read\n \
30.00    0.000300          30        12         2 openat\n\
------ ----------- ----------- --------- --------- ----------------\n\
100.00    0.000750                    22         2 total\n";

    /// Runs a shell script with `$REPORT` pointing at the report file.
    struct ScriptTracer {
        script: String,
    }

    impl Tracer for ScriptTracer {
        fn command(&self, pid: u32, report: &Path) -> Command {
            let mut cmd = Command::new("sh");
            cmd.arg("-c")
                .arg(&self.script)
                .env("REPORT", report)
                .env("PID", pid.to_string());
            cmd
        }
    }

    fn indicator(pid: u32) -> Indicator {
        Indicator {
            pid,
            command: format!("httpd,{pid}"),
            cpu_percent: 0.0,
            uss_percent: 55.0,
            pss_percent: 55.0,
            rss_percent: 55.0,
        }
    }

    fn profiler(script: &str, dir: &Path, attach: Duration) -> (Arc<Profiler>, Registry) {
        profiler_with_cooldown(script, dir, attach, None)
    }

    fn profiler_with_cooldown(
        script: &str,
        dir: &Path,
        attach: Duration,
        cooldown: Option<Duration>,
    ) -> (Arc<Profiler>, Registry) {
        let registry = Registry::new();
        let metrics = WorkloadMetrics::new(&registry, 1).unwrap();
        let profiler = Profiler::new(
            Arc::new(ScriptTracer {
                script: script.to_string(),
            }),
            ProfilerOptions {
                attach,
                report_dir: dir.to_path_buf(),
                cooldown,
            },
            metrics,
        );
        (Arc::new(profiler), registry)
    }

    fn encode(registry: &Registry) -> String {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&registry.gather(), &mut buffer)
            .unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_strace_command_line() {
        let cmd = StraceTracer::default().command(51, Path::new("/tmp/r.log"));
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(cmd.as_std().get_program(), "strace");
        assert_eq!(
            args,
            vec!["-A", "-f", "-c", "-e", "trace=all", "-p", "51", "-o", "/tmp/r.log"]
        );
    }

    #[test]
    fn test_report_path() {
        assert_eq!(
            report_path(Path::new("/var/log/herakles"), 51),
            PathBuf::from("/var/log/herakles/exporter_strace_51.log")
        );
    }

    #[tokio::test]
    async fn test_completed_profile_reads_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = dir.path().join("fixture.txt");
        std::fs::write(&fixture, SUMMARY).unwrap();
        // Leftovers from an earlier run must not be parsed again.
        std::fs::write(report_path(dir.path(), 51), "old\nold\n 1 1 1 999 stale\n").unwrap();

        let script = format!("cat {} >> \"$REPORT\"", fixture.display());
        let (profiler, registry) = profiler(&script, dir.path(), Duration::from_secs(10));

        let report = profiler.launch(indicator(51)).unwrap().await.unwrap().unwrap();
        assert_eq!(report.outcome, ProfileOutcome::Completed);
        assert_eq!(report.syscalls.len(), 2);
        assert_eq!(report.syscalls[1].syscall, "openat");
        assert_eq!(report.syscalls[1].calls, 12.0);

        let text = encode(&registry);
        assert!(text.contains(r#"strace_metrics{call_name="read",command="httpd,51",pid="51"} 10"#));
        assert!(!text.contains("stale"));
        assert!(text.contains(r#"strace_profiles_total{outcome="completed"} 1"#));
    }

    #[tokio::test]
    async fn test_tracer_is_interrupted_after_window() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = dir.path().join("fixture.txt");
        std::fs::write(&fixture, SUMMARY).unwrap();

        let script = format!(
            "trap 'cat {} >> \"$REPORT\"; kill $!; exit 0' INT; sleep 30 >/dev/null 2>&1 & wait",
            fixture.display()
        );
        let (profiler, registry) = profiler(&script, dir.path(), Duration::from_millis(300));

        let report = profiler.launch(indicator(52)).unwrap().await.unwrap().unwrap();
        assert_eq!(report.outcome, ProfileOutcome::Interrupted);
        assert_eq!(report.syscalls.len(), 2);
        assert!(encode(&registry).contains(r#"strace_profiles_total{outcome="interrupted"} 1"#));
    }

    #[tokio::test]
    async fn test_stdout_takes_precedence_over_report_file() {
        let dir = tempfile::tempdir().unwrap();
        let fixture = dir.path().join("fixture.txt");
        std::fs::write(&fixture, SUMMARY).unwrap();

        let script = format!("cat {}", fixture.display());
        let (profiler, _registry) = profiler(&script, dir.path(), Duration::from_secs(10));

        let report = profiler.launch(indicator(53)).unwrap().await.unwrap().unwrap();
        assert_eq!(report.syscalls.len(), 2);
    }

    #[tokio::test]
    async fn test_second_launch_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let (profiler, registry) = profiler("true", dir.path(), Duration::from_secs(10));

        let first = profiler.launch(indicator(60)).unwrap();
        assert!(profiler.launch(indicator(60)).is_none());
        let report = first.await.unwrap().unwrap();
        assert!(report.syscalls.is_empty());
        assert!(profiler.profiled().contains(60));
        assert!(encode(&registry).contains(r#"strace_profiles_total{outcome="deduplicated"} 1"#));
    }

    #[tokio::test]
    async fn test_running_attempt_blocks_relaunch_past_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let (profiler, registry) = profiler_with_cooldown(
            "sleep 1",
            dir.path(),
            Duration::from_secs(5),
            Some(Duration::from_millis(100)),
        );

        let first = profiler.launch(indicator(99)).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(profiler.profiled().is_active(99));
        assert!(profiler.launch(indicator(99)).is_none());

        first.await.unwrap().unwrap();
        assert!(profiler.profiled().contains(99));
        assert!(!profiler.profiled().is_active(99));
        assert!(encode(&registry).contains(r#"strace_profiles_total{outcome="deduplicated"} 1"#));

        // The cooldown starts once the first attempt is over.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let second = profiler.launch(indicator(99)).unwrap();
        second.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_releases_pid() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::new();
        let profiler = Arc::new(Profiler::new(
            Arc::new(StraceTracer::new("/nonexistent/strace")),
            ProfilerOptions {
                attach: Duration::from_secs(1),
                report_dir: dir.path().to_path_buf(),
                cooldown: None,
            },
            WorkloadMetrics::new(&registry, 1).unwrap(),
        ));

        let result = profiler.launch(indicator(70)).unwrap().await.unwrap();
        assert!(matches!(result, Err(ProfileError::Spawn { pid: 70, .. })));
        assert!(!profiler.profiled().contains(70));
        assert!(encode(&registry).contains(r#"strace_profiles_total{outcome="failed"} 1"#));
    }

    #[tokio::test]
    async fn test_failing_tracer_without_output_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let (profiler, _registry) = profiler("exit 1", dir.path(), Duration::from_secs(10));

        let result = profiler.launch(indicator(80)).unwrap().await.unwrap();
        assert!(matches!(result, Err(ProfileError::Wait { pid: 80, .. })));
        assert!(!profiler.profiled().contains(80));
    }
}
