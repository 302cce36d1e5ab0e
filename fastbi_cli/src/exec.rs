use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

// Errors from external process execution
#[derive(Debug)]
struct ExecError {
    inner: failure::Context<EErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
enum EErrKind {
    #[fail(display = "Execution failed for command {}: {}", _0, _1)]
    CommandFailed(String, String),

    #[fail(display = "Could not spawn {}", _0)]
    SpawnFailure(String),
}
use failure::{Backtrace, Context, Error, Fail, ResultExt};
use std::fmt::{self, Display};

// boilerplate error wrapping
impl Fail for ExecError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}
impl Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}
impl From<EErrKind> for ExecError {
    fn from(kind: EErrKind) -> ExecError {
        ExecError {
            inner: Context::new(kind),
        }
    }
}
impl From<Context<EErrKind>> for ExecError {
    fn from(inner: Context<EErrKind>) -> ExecError {
        ExecError { inner }
    }
}
type Result<T> = std::result::Result<T, Error>;

static DRY_RUN: AtomicBool = AtomicBool::new(false);

// Tests that flip the global dry-run toggle serialise on this
#[cfg(test)]
pub static DRY_RUN_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Toggle dry-run mode for the whole process
///
/// In dry-run mode every command is logged and reported successful with
/// empty stdout, without spawning anything.
pub fn set_dry_run(enabled: bool) {
    DRY_RUN.store(enabled, Ordering::SeqCst);
}

pub fn is_dry_run() -> bool {
    DRY_RUN.load(Ordering::SeqCst)
}

// Argv values following these flags never reach the logs.
const SENSITIVE_FLAGS: &[&str] = &[
    "--client-secret",
    "--client_secret",
    "--token",
    "--password",
    "--set",
];

/// Render an argv for logging, masking values of sensitive flags
pub fn display_command(cmd: &str, args: &[String]) -> String {
    let mut shown = vec![cmd.to_string()];
    let mut mask_next = false;
    for a in args {
        if mask_next {
            shown.push("****".to_string());
            mask_next = false;
            continue;
        }
        if SENSITIVE_FLAGS.contains(&a.as_str()) {
            mask_next = true;
        }
        shown.push(a.clone());
    }
    shown.join(" ")
}

/// Run a command from an argv array and return its stdout
///
/// Streams are captured; a non-zero exit becomes an error carrying the full
/// command string and stderr. Never goes through a shell.
pub fn run(cmd: &str, args: &[String]) -> Result<String> {
    let shown = display_command(cmd, args);
    if is_dry_run() {
        info!("[DRY-RUN] Would execute: {}", shown);
        return Ok(String::new());
    }
    debug!("Executing command: {}", shown);

    let output = Command::new(cmd)
        .args(args)
        .output()
        .context(EErrKind::SpawnFailure(cmd.to_string()))?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
    if !output.status.success() {
        error!("Command failed: {}", shown);
        error!("Status code: {:?}", output.status.code());
        error!("Output: {}", stdout);
        error!("Error: {}", stderr);
        return Err(EErrKind::CommandFailed(shown, stderr).into());
    }
    trace!("Command output: {}", stdout);
    Ok(stdout)
}

/// Idempotently create a namespace via the client dry-run apply pipeline
///
/// `kubectl create namespace <ns> --save-config --dry-run=client -o=yaml`
/// piped into `kubectl apply -f -`. Modeled as two processes with an explicit
/// stdin hand-off; this is the only piped invocation in the deployer.
pub fn ensure_namespace(namespace: &str, kubeconfig: &Path) -> Result<()> {
    let create_args: Vec<String> = vec![
        "create".into(),
        "namespace".into(),
        namespace.into(),
        "--save-config".into(),
        "--dry-run=client".into(),
        "-o=yaml".into(),
    ];
    let apply_args: Vec<String> = vec![
        format!("--kubeconfig={}", kubeconfig.display()),
        "apply".into(),
        "-f".into(),
        "-".into(),
    ];
    if is_dry_run() {
        info!(
            "[DRY-RUN] Would execute: {} | {}",
            display_command("kubectl", &create_args),
            display_command("kubectl", &apply_args)
        );
        return Ok(());
    }

    let manifest = run("kubectl", &create_args)?;

    let shown = display_command("kubectl", &apply_args);
    debug!("Executing command: {}", shown);
    let mut apply = Command::new("kubectl")
        .args(&apply_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .context(EErrKind::SpawnFailure("kubectl".to_string()))?;
    apply
        .stdin
        .as_mut()
        .expect("stdin was piped")
        .write_all(manifest.as_bytes())
        .context(EErrKind::SpawnFailure("kubectl".to_string()))?;
    let output = apply
        .wait_with_output()
        .context(EErrKind::SpawnFailure("kubectl".to_string()))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        error!("Kubectl command failed: {}", shown);
        return Err(EErrKind::CommandFailed(shown, stderr).into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{display_command, run, set_dry_run};

    #[test]
    fn redacts_sensitive_argv_values() {
        let args: Vec<String> = vec![
            "login".into(),
            "--client_secret".into(),
            "hunter2".into(),
            "--namespace".into(),
            "vault".into(),
        ];
        let shown = display_command("helm", &args);
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("--client_secret ****"));
        assert!(shown.contains("--namespace vault"));
    }

    #[test]
    fn run_captures_failures_and_honours_dry_run() {
        let _guard = super::DRY_RUN_TEST_LOCK.lock().unwrap();
        let out = run("echo", &["hello".to_string()]).unwrap();
        assert_eq!(out.trim(), "hello");

        let err = run("ls", &["/definitely/not/a/path".to_string()]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Execution failed for command ls /definitely/not/a/path"));

        set_dry_run(true);
        let out = run("definitely-not-a-binary", &[]).unwrap();
        assert_eq!(out, "");
        set_dry_run(false);
    }
}
