// ==============================================================================
// supervisor.rs - StaphScope Process Supervisor
// ==============================================================================
// Description: Builds the StaphScope command line, runs it inside the job's
//              workspace, streams its output to the job log and records the
//              terminal marker
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-14
// Version: 1.0.0
// ==============================================================================
// State machine: PENDING -> COMPLETED | FAILED (both terminal)
//   .done      written iff StaphScope exited 0
//   error.txt  written iff it exited non-zero, timed out, or could not be run
// A run holds the job's claim from the state check to the marker write.
// ==============================================================================

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::job_store::{JobId, JobStore, JobStoreError, JobWorkspace, LogSink};

/// Module name → StaphScope skip flag
pub const SKIP_FLAGS: &[(&str, &str)] = &[
    ("fasta_qc", "--skip-fasta-qc"),
    ("mlst", "--skip-mlst"),
    ("spa", "--skip-spa"),
    ("sccmec", "--skip-sccmec"),
    ("amr", "--skip-amr"),
    ("abricate", "--skip-abricate"),
    ("lineage", "--skip-lineage"),
    ("comprehensive", "--skip-comprehensive"),
    ("visualization", "--skip-visualization"),
];

pub const DEFAULT_THREADS: u32 = 2;
pub const DEFAULT_TIMEOUT_SECS: u64 = 7200;

/// Environment variable pointed at the job's scratch directory
const TMPDIR_ENV: &str = "TMPDIR";

// Lines buffered between the pipe readers and the log writer
const LOG_CHANNEL_CAPACITY: usize = 256;

pub fn skip_flag(module: &str) -> Option<&'static str> {
    SKIP_FLAGS
        .iter()
        .find(|(name, _)| *name == module)
        .map(|(_, flag)| *flag)
}

/// How to invoke the external tool
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub program: PathBuf,
    pub threads: u32,
    /// Force-terminate the run after this long
    pub timeout: Option<Duration>,
}

impl ToolConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            threads: DEFAULT_THREADS,
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
        }
    }

    pub fn with_threads(mut self, threads: u32) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Fully built command line for one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ToolInvocation {
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(|a| a.as_os_str()))
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// `<tool> -i <input>/* -o <output> -t <threads> [skip flags...]`
///
/// Unknown skip selections are dropped; known ones keep their first-seen order.
pub fn build_invocation(
    tool: &ToolConfig,
    workspace: &JobWorkspace,
    skip_modules: &[String],
) -> ToolInvocation {
    let mut args: Vec<OsString> = vec![
        "-i".into(),
        workspace.input.join("*").into_os_string(),
        "-o".into(),
        workspace.output.clone().into_os_string(),
        "-t".into(),
        tool.threads.to_string().into(),
    ];

    let mut flags: Vec<&'static str> = Vec::new();
    for module in skip_modules {
        match skip_flag(module.trim()) {
            Some(flag) if !flags.contains(&flag) => flags.push(flag),
            Some(_) => {}
            None => debug!("Ignoring unknown skip selection {:?}", module),
        }
    }
    args.extend(flags.into_iter().map(OsString::from));

    ToolInvocation {
        program: tool.program.clone(),
        args,
    }
}

/// Result of a supervisor run that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// The job already carried a terminal marker (redelivered message)
    AlreadyTerminal,
    /// Another run holds the job's execution claim
    AlreadyRunning,
}

/// Failures surfaced to the task framework. The display text is what ends
/// up in `error.txt`.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("StaphScope exited with code {0}")]
    ToolFailed(i32),

    #[error("StaphScope terminated by signal")]
    Terminated,

    #[error("StaphScope timed out after {0} seconds")]
    Timeout(u64),

    #[error("Failed to start StaphScope ({program}): {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed while waiting for StaphScope: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Failed to write StaphScope log: {0}")]
    Log(#[source] std::io::Error),

    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Runs StaphScope for one job at a time and finalizes its state
pub struct Supervisor {
    store: Arc<dyn JobStore>,
    tool: ToolConfig,
}

impl Supervisor {
    pub fn new(store: Arc<dyn JobStore>, tool: ToolConfig) -> Self {
        Self { store, tool }
    }

    /// Execute a job to a terminal state.
    ///
    /// A job that already has a terminal marker, or that another run is
    /// executing, is left untouched. Every error returned after the claim
    /// was taken has also been recorded in `error.txt`.
    pub async fn run(
        &self,
        job_id: JobId,
        skip_modules: &[String],
    ) -> Result<RunOutcome, SupervisorError> {
        let Some(_claim) = self.store.claim_run(&job_id).await? else {
            warn!("Job {} is being run elsewhere, skipping duplicate delivery", job_id);
            return Ok(RunOutcome::AlreadyRunning);
        };

        let state = self.store.read_state(&job_id).await?;
        if state.is_terminal() {
            warn!(
                "Job {} is already {}, skipping redelivered run",
                job_id,
                state.as_str()
            );
            return Ok(RunOutcome::AlreadyTerminal);
        }

        info!("Processing job {}", job_id);

        match self.execute(&job_id, skip_modules).await {
            Ok(()) => {
                self.store.mark_completed(&job_id).await?;
                info!("Job {} completed successfully", job_id);
                Ok(RunOutcome::Completed)
            }
            Err(e) => {
                let description = e.to_string();
                error!("Job {} failed: {}", job_id, description);
                if let Err(marker_err) = self.store.mark_failed(&job_id, &description).await {
                    error!(
                        "Failed to record failure marker for job {}: {}",
                        job_id, marker_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, job_id: &JobId, skip_modules: &[String]) -> Result<(), SupervisorError> {
        let workspace = self.store.prepare_workspace(job_id).await?;
        let invocation = build_invocation(&self.tool, &workspace, skip_modules);
        let log = self.store.open_log(job_id).await?;

        info!(
            "Job {} running: {} (log {:?})",
            job_id,
            invocation.display(),
            workspace.log
        );

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .current_dir(&workspace.root)
            .env(TMPDIR_ENV, &workspace.tmp)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so descendants can be signalled together
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| SupervisorError::Spawn {
            program: invocation.program.display().to_string(),
            source,
        })?;

        let pid = child.id();
        debug!("Job {} StaphScope pid {:?}", job_id, pid);

        // stdout and stderr feed one writer so lines never interleave mid-line
        let (tx, rx) = mpsc::channel::<Vec<u8>>(LOG_CHANNEL_CAPACITY);
        let mut readers: Vec<JoinHandle<()>> = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_lines(stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_lines(stderr, tx.clone())));
        }
        drop(tx);
        let writer = tokio::spawn(write_log(rx, log));

        // Exit, then drain. Leftover descendants would hold the pipes open,
        // so the group is killed once the tool itself has exited.
        let supervised = async {
            let status = child.wait().await.map_err(SupervisorError::Wait)?;
            kill_group(job_id, pid);
            for reader in readers.iter_mut() {
                let _ = reader.await;
            }
            Ok::<_, SupervisorError>(status)
        };

        let status = match self.tool.timeout {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, supervised).await;
                match waited {
                    Ok(status) => status?,
                    Err(_elapsed) => {
                        warn!("Job {} exceeded {:?}, killing StaphScope", job_id, limit);
                        kill_group(job_id, pid);
                        if matches!(child.try_wait(), Ok(None)) {
                            if let Err(e) = child.kill().await {
                                warn!("Failed to kill StaphScope for job {}: {}", job_id, e);
                            }
                        }
                        for reader in &readers {
                            reader.abort();
                        }
                        let _ = finish_log(writer).await;
                        return Err(SupervisorError::Timeout(limit.as_secs()));
                    }
                }
            }
            None => supervised.await?,
        };

        let logged = finish_log(writer).await;

        check_exit(status)?;

        let lines = logged.map_err(SupervisorError::Log)?;
        debug!("Job {} wrote {} log line(s)", job_id, lines);
        Ok(())
    }
}

/// SIGKILL every process left in the tool's group
#[cfg(unix)]
fn kill_group(job_id: &JobId, pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!("Failed to signal process group {} of job {}: {}", pgid, job_id, err);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_job_id: &JobId, _pid: Option<u32>) {}

fn check_exit(status: ExitStatus) -> Result<(), SupervisorError> {
    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => Err(SupervisorError::ToolFailed(code)),
        None => Err(SupervisorError::Terminated),
    }
}

/// Forward complete lines from a child pipe. A final unterminated line gets
/// a newline so it still reaches log readers.
async fn forward_lines<R>(pipe: R, tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(pipe);
    loop {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if !line.ends_with(b"\n") {
                    line.push(b'\n');
                }
                if tx.send(line).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to read StaphScope output: {}", e);
                break;
            }
        }
    }
}

/// Append each line to the log and flush it before taking the next one
async fn write_log(mut rx: mpsc::Receiver<Vec<u8>>, mut sink: LogSink) -> std::io::Result<u64> {
    let mut lines = 0u64;
    while let Some(line) = rx.recv().await {
        sink.write_all(&line).await?;
        sink.flush().await?;
        lines += 1;
    }
    sink.shutdown().await?;
    Ok(lines)
}

async fn finish_log(writer: JoinHandle<std::io::Result<u64>>) -> std::io::Result<u64> {
    match writer.await {
        Ok(result) => result,
        Err(join_err) => Err(std::io::Error::other(join_err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_store::{FsJobStore, JobState};
    use std::path::Path;
    use tempfile::TempDir;

    fn workspace(root: &Path) -> JobWorkspace {
        JobWorkspace {
            root: root.to_path_buf(),
            input: root.join("input"),
            output: root.join("output"),
            tmp: root.join("tmp"),
            log: root.join("staphscope.log"),
        }
    }

    #[test]
    fn test_build_invocation() {
        let tool = ToolConfig::new("/opt/staphscope/bin/staphscope");
        let ws = workspace(Path::new("/jobs/abc"));
        let skips = vec![
            "mlst".to_string(),
            "bogus".to_string(),
            "amr".to_string(),
            "mlst".to_string(),
        ];

        let invocation = build_invocation(&tool, &ws, &skips);

        assert_eq!(
            invocation.display(),
            "/opt/staphscope/bin/staphscope -i /jobs/abc/input/* -o /jobs/abc/output -t 2 --skip-mlst --skip-amr"
        );
    }

    #[test]
    fn test_skip_flag_mapping() {
        assert_eq!(skip_flag("fasta_qc"), Some("--skip-fasta-qc"));
        assert_eq!(skip_flag("visualization"), Some("--skip-visualization"));
        assert_eq!(skip_flag("FASTA_QC"), None);
        assert_eq!(SKIP_FLAGS.len(), 9);
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        struct Fixture {
            _dir: TempDir,
            store: Arc<FsJobStore>,
            tool_dir: PathBuf,
        }

        async fn fixture() -> Fixture {
            let dir = TempDir::new().unwrap();
            let store = Arc::new(FsJobStore::init(dir.path().join("jobs")).await.unwrap());
            let tool_dir = dir.path().join("bin");
            std::fs::create_dir_all(&tool_dir).unwrap();
            Fixture {
                _dir: dir,
                store,
                tool_dir,
            }
        }

        fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        async fn staged_job(store: &FsJobStore) -> JobId {
            let job_id = store.create_job().await.unwrap();
            store
                .stage_input(&job_id, "sample.fasta", b">s\nACGT\n")
                .await
                .unwrap();
            job_id
        }

        #[tokio::test]
        async fn test_successful_run_writes_completion_marker() {
            let fx = fixture().await;
            let tool = script(
                &fx.tool_dir,
                "staphscope",
                r#"echo "args: $*"
echo "tmp: $TMPDIR"
echo "warning on stderr" >&2
out="$4"
mkdir -p "$out/mlst_results"
echo "ST8" > "$out/mlst_results/summary.tsv"
printf "no trailing newline""#,
            );
            let job_id = staged_job(&fx.store).await;
            let supervisor = Supervisor::new(fx.store.clone(), ToolConfig::new(&tool));

            let outcome = supervisor
                .run(job_id, &["spa".to_string(), "unknown".to_string()])
                .await
                .unwrap();

            assert_eq!(outcome, RunOutcome::Completed);
            assert_eq!(fx.store.read_state(&job_id).await.unwrap(), JobState::Completed);

            let job_dir = fx.store.job_dir(&job_id);
            assert!(job_dir.join("tmp").is_dir());
            assert_eq!(
                std::fs::read_to_string(job_dir.join("output/mlst_results/summary.tsv")).unwrap(),
                "ST8\n"
            );

            let log = fx.store.tail_log(&job_id, 50).await.unwrap();
            let args_line = log.iter().find(|l| l.starts_with("args:")).unwrap();
            assert!(args_line.ends_with("-t 2 --skip-spa"));
            assert!(args_line.contains(&format!("{}/input/*", job_dir.display())));
            assert!(log.contains(&format!("tmp: {}", job_dir.join("tmp").display())));
            assert!(log.contains(&"warning on stderr".to_string()));
            assert!(log.contains(&"no trailing newline".to_string()));
        }

        #[tokio::test]
        async fn test_non_zero_exit_writes_failure_marker() {
            let fx = fixture().await;
            let tool = script(&fx.tool_dir, "staphscope", "echo 'bad genome'\nexit 17");
            let job_id = staged_job(&fx.store).await;
            let supervisor = Supervisor::new(fx.store.clone(), ToolConfig::new(&tool));

            let err = supervisor.run(job_id, &[]).await.unwrap_err();

            assert!(matches!(err, SupervisorError::ToolFailed(17)));
            match fx.store.read_state(&job_id).await.unwrap() {
                JobState::Failed { error } => {
                    assert_eq!(error, "StaphScope exited with code 17");
                }
                other => panic!("unexpected state {:?}", other),
            }
            assert!(!fx.store.job_dir(&job_id).join(".done").exists());
            assert_eq!(fx.store.tail_log(&job_id, 5).await.unwrap(), vec!["bad genome"]);
        }

        #[tokio::test]
        async fn test_missing_executable_is_recorded_as_fault() {
            let fx = fixture().await;
            let job_id = staged_job(&fx.store).await;
            let missing = fx.tool_dir.join("does-not-exist");
            let supervisor = Supervisor::new(fx.store.clone(), ToolConfig::new(&missing));

            let err = supervisor.run(job_id, &[]).await.unwrap_err();

            assert!(matches!(err, SupervisorError::Spawn { .. }));
            match fx.store.read_state(&job_id).await.unwrap() {
                JobState::Failed { error } => {
                    assert!(error.starts_with("Failed to start StaphScope"));
                    assert!(error.contains("does-not-exist"));
                }
                other => panic!("unexpected state {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_timeout_kills_and_marks_failed() {
            let fx = fixture().await;
            let tool = script(&fx.tool_dir, "staphscope", "echo started\nexec sleep 30");
            let job_id = staged_job(&fx.store).await;
            let config = ToolConfig::new(&tool).with_timeout(Some(Duration::from_millis(300)));
            let supervisor = Supervisor::new(fx.store.clone(), config);

            let err = supervisor.run(job_id, &[]).await.unwrap_err();

            assert!(matches!(err, SupervisorError::Timeout(0)));
            match fx.store.read_state(&job_id).await.unwrap() {
                JobState::Failed { error } => assert!(error.contains("timed out")),
                other => panic!("unexpected state {:?}", other),
            }
        }

        #[tokio::test]
        async fn test_background_descendants_do_not_hold_the_run_open() {
            let fx = fixture().await;
            let tool = script(&fx.tool_dir, "staphscope", "echo started\nsleep 30 &\nexit 0");
            let job_id = staged_job(&fx.store).await;
            let config = ToolConfig::new(&tool).with_timeout(None);
            let supervisor = Supervisor::new(fx.store.clone(), config);

            let started = std::time::Instant::now();
            let outcome = tokio::time::timeout(Duration::from_secs(10), supervisor.run(job_id, &[]))
                .await
                .expect("run should not wait for background children")
                .unwrap();

            assert_eq!(outcome, RunOutcome::Completed);
            assert!(started.elapsed() < Duration::from_secs(5));
            assert_eq!(fx.store.tail_log(&job_id, 5).await.unwrap(), vec!["started"]);
        }

        #[tokio::test]
        async fn test_deadline_covers_output_drain() {
            let fx = fixture().await;
            // The subshell keeps stdout open after the tool process is gone
            let tool = script(
                &fx.tool_dir,
                "staphscope",
                "echo started\n(trap '' TERM; sleep 30) &\nexec sleep 30",
            );
            let job_id = staged_job(&fx.store).await;
            let config = ToolConfig::new(&tool).with_timeout(Some(Duration::from_secs(1)));
            let supervisor = Supervisor::new(fx.store.clone(), config);

            let started = std::time::Instant::now();
            let err = supervisor.run(job_id, &[]).await.unwrap_err();

            assert!(matches!(err, SupervisorError::Timeout(1)));
            assert!(started.elapsed() < Duration::from_secs(5));
            assert!(!fx.store.job_dir(&job_id).join(".done").exists());
        }

        #[tokio::test]
        async fn test_concurrent_deliveries_run_the_tool_once() {
            let fx = fixture().await;
            let counter = fx.tool_dir.join("runs");
            let gate = fx.tool_dir.join("gate");
            let tool = script(
                &fx.tool_dir,
                "staphscope",
                &format!(
                    "echo run >> {}\nwhile [ ! -f {} ]; do sleep 0.05; done",
                    counter.display(),
                    gate.display()
                ),
            );
            let job_id = staged_job(&fx.store).await;
            let first = Arc::new(Supervisor::new(fx.store.clone(), ToolConfig::new(&tool)));
            // Separate store instance, as a second worker would have
            let other_store = Arc::new(FsJobStore::new(fx.store.root()));
            let second = Supervisor::new(other_store, ToolConfig::new(&tool));

            let running = {
                let first = first.clone();
                tokio::spawn(async move { first.run(job_id, &[]).await })
            };
            for _ in 0..100 {
                if counter.exists() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }

            assert_eq!(
                second.run(job_id, &[]).await.unwrap(),
                RunOutcome::AlreadyRunning
            );

            std::fs::write(&gate, b"").unwrap();
            assert_eq!(running.await.unwrap().unwrap(), RunOutcome::Completed);
            assert_eq!(
                second.run(job_id, &[]).await.unwrap(),
                RunOutcome::AlreadyTerminal
            );
            assert_eq!(std::fs::read_to_string(&counter).unwrap(), "run\n");
            assert!(!fx.store.job_dir(&job_id).join("error.txt").exists());
        }

        #[tokio::test]
        async fn test_redelivery_of_terminal_job_is_noop() {
            let fx = fixture().await;
            let counter = fx.tool_dir.join("runs");
            let tool = script(
                &fx.tool_dir,
                "staphscope",
                &format!("echo run >> {}", counter.display()),
            );
            let job_id = staged_job(&fx.store).await;
            let supervisor = Supervisor::new(fx.store.clone(), ToolConfig::new(&tool));

            assert_eq!(supervisor.run(job_id, &[]).await.unwrap(), RunOutcome::Completed);
            assert_eq!(
                supervisor.run(job_id, &[]).await.unwrap(),
                RunOutcome::AlreadyTerminal
            );
            assert_eq!(std::fs::read_to_string(&counter).unwrap(), "run\n");
        }

        #[tokio::test]
        async fn test_unknown_job_leaves_no_markers() {
            let fx = fixture().await;
            let tool = script(&fx.tool_dir, "staphscope", "exit 0");
            let supervisor = Supervisor::new(fx.store.clone(), ToolConfig::new(&tool));
            let job_id = JobId::new();

            let err = supervisor.run(job_id, &[]).await.unwrap_err();

            assert!(matches!(
                err,
                SupervisorError::Store(JobStoreError::NotFound(_))
            ));
            assert!(!fx.store.job_dir(&job_id).exists());
        }

        #[tokio::test]
        async fn test_log_is_readable_while_running() {
            let fx = fixture().await;
            let gate = fx.tool_dir.join("gate");
            let tool = script(
                &fx.tool_dir,
                "staphscope",
                &format!(
                    "echo step-one\nwhile [ ! -f {} ]; do sleep 0.05; done\necho step-two",
                    gate.display()
                ),
            );
            let job_id = staged_job(&fx.store).await;
            let supervisor = Arc::new(Supervisor::new(fx.store.clone(), ToolConfig::new(&tool)));

            let running = {
                let supervisor = supervisor.clone();
                tokio::spawn(async move { supervisor.run(job_id, &[]).await })
            };

            let mut seen = Vec::new();
            for _ in 0..100 {
                seen = fx.store.tail_log(&job_id, 20).await.unwrap();
                if !seen.is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            assert_eq!(seen, vec!["step-one"]);
            assert_eq!(fx.store.read_state(&job_id).await.unwrap(), JobState::Pending);

            std::fs::write(&gate, b"").unwrap();
            assert_eq!(running.await.unwrap().unwrap(), RunOutcome::Completed);
            assert_eq!(
                fx.store.tail_log(&job_id, 20).await.unwrap(),
                vec!["step-one", "step-two"]
            );
        }
    }
}
