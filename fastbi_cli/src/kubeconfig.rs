use std::env::consts::ARCH;
use std::path::{Path, PathBuf};
use std::process::Command;

// Kubeconfig repair errors
#[derive(Debug)]
struct FixerError {
    inner: failure::Context<KErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
enum KErrKind {
    #[fail(display = "Could not find gke-gcloud-auth-plugin on this host")]
    PluginNotFound,

    #[fail(display = "Could not parse kubeconfig {} as YAML or JSON", _0)]
    Unparseable(String),

    #[fail(display = "Could not read kubeconfig {}", _0)]
    Unreadable(String),
}
use failure::{Backtrace, Context, Error, Fail, ResultExt};
use std::fmt::{self, Display};

// boilerplate error wrapping
impl Fail for FixerError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}
impl Display for FixerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}
impl From<KErrKind> for FixerError {
    fn from(kind: KErrKind) -> FixerError {
        FixerError {
            inner: Context::new(kind),
        }
    }
}
impl From<Context<KErrKind>> for FixerError {
    fn from(inner: Context<KErrKind>) -> FixerError {
        FixerError { inner }
    }
}
type Result<T> = std::result::Result<T, Error>;

const PLUGIN: &str = "gke-gcloud-auth-plugin";

/// What fix_kubeconfig ended up doing
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum FixOutcome {
    /// Command rewritten to the absolute plugin path
    Patched(PathBuf),
    /// A concrete path (or no exec section) was already in place
    AlreadyConfigured,
}

// The kubeconfig is parsed as YAML with a JSON fallback and rewritten in
// the format it was read.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FileFormat {
    Yaml,
    Json,
}

/// Candidate install locations per platform
///
/// Homebrew prefixes differ by macOS architecture; Linux covers the system
/// sdk locations plus the WSL mounts of the Windows installer.
fn candidate_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();
    if cfg!(target_os = "macos") {
        if ARCH == "aarch64" {
            paths.push(PathBuf::from(
                "/opt/homebrew/Caskroom/google-cloud-sdk/latest/google-cloud-sdk/bin/gke-gcloud-auth-plugin",
            ));
        } else {
            paths.push(PathBuf::from(
                "/usr/local/Caskroom/google-cloud-sdk/latest/google-cloud-sdk/bin/gke-gcloud-auth-plugin",
            ));
        }
        paths.push(PathBuf::from(
            "/opt/homebrew/share/google-cloud-sdk/bin/gke-gcloud-auth-plugin",
        ));
        paths.push(PathBuf::from("/opt/homebrew/bin/gke-gcloud-auth-plugin"));
        paths.push(PathBuf::from("/usr/local/bin/gke-gcloud-auth-plugin"));
    } else if cfg!(target_os = "windows") {
        paths.push(PathBuf::from(
            "C:\\Program Files (x86)\\Google\\Cloud SDK\\google-cloud-sdk\\bin\\gke-gcloud-auth-plugin.exe",
        ));
        paths.push(PathBuf::from(
            "C:\\Program Files\\Google\\Cloud SDK\\google-cloud-sdk\\bin\\gke-gcloud-auth-plugin.exe",
        ));
    } else {
        paths.push(PathBuf::from("/usr/bin/gke-gcloud-auth-plugin"));
        paths.push(PathBuf::from("/usr/local/bin/gke-gcloud-auth-plugin"));
        paths.push(PathBuf::from("/snap/bin/gke-gcloud-auth-plugin"));
        paths.push(PathBuf::from(
            "/opt/google-cloud-sdk/bin/gke-gcloud-auth-plugin",
        ));
        paths.push(PathBuf::from(
            "/usr/lib/google-cloud-sdk/bin/gke-gcloud-auth-plugin",
        ));
        // WSL mounts of a Windows-side installation
        paths.push(PathBuf::from(
            "/mnt/c/Program Files (x86)/Google/Cloud SDK/google-cloud-sdk/bin/gke-gcloud-auth-plugin",
        ));
        paths.push(PathBuf::from(
            "/mnt/c/Program Files/Google/Cloud SDK/google-cloud-sdk/bin/gke-gcloud-auth-plugin",
        ));
    }
    paths
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match path.metadata() {
        Ok(meta) => meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.exists()
}

// Run `<path> --help` and look for a recognisable usage string. Exit code 2
// is fine, go binaries use it for flag errors.
fn validate_plugin(path: &Path) -> bool {
    if !path.exists() || !is_executable(path) {
        return false;
    }
    match Command::new(path).arg("--help").output() {
        Ok(out) => {
            let combined = format!(
                "{}{}",
                String::from_utf8_lossy(&out.stdout),
                String::from_utf8_lossy(&out.stderr)
            );
            let code = out.status.code().unwrap_or(-1);
            (code == 0 || code == 2)
                && (combined.contains(PLUGIN) || combined.contains("Usage of"))
        }
        // executable but uncooperative; accept on the file name
        Err(_) => path
            .file_name()
            .map(|n| n.to_string_lossy().contains(PLUGIN))
            .unwrap_or(false),
    }
}

fn find_via_system_command() -> Option<PathBuf> {
    let finder = if cfg!(target_os = "windows") {
        "where"
    } else {
        "which"
    };
    let out = Command::new(finder).arg(PLUGIN).output().ok()?;
    if !out.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&out.stdout);
    let first = stdout.lines().next()?.trim();
    let path = PathBuf::from(first);
    if validate_plugin(&path) {
        Some(path)
    } else {
        None
    }
}

/// Locate a working gke-gcloud-auth-plugin on this host
pub fn find_auth_plugin() -> Option<PathBuf> {
    for path in candidate_paths() {
        if validate_plugin(&path) {
            return Some(path);
        }
    }
    find_via_system_command()
}

fn parse(content: &str, path: &Path) -> Result<(serde_json::Value, FileFormat)> {
    // JSON first so the original format is knowable; any JSON document would
    // also parse as YAML
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(content) {
        return Ok((v, FileFormat::Json));
    }
    match serde_yaml::from_str::<serde_json::Value>(content) {
        Ok(v) => Ok((v, FileFormat::Yaml)),
        Err(_) => Err(KErrKind::Unparseable(path.display().to_string()).into()),
    }
}

/// Patch the exec plugin command inside a kubeconfig
///
/// Rewrites `users[0].user.exec.command` when it names the bare binary,
/// using a located and validated plugin. No-op when the command is already
/// a concrete path; the file keeps the format it was read in.
pub fn fix_kubeconfig(kubeconfig: &Path) -> Result<FixOutcome> {
    fix_kubeconfig_with(kubeconfig, find_auth_plugin)
}

// Separated so the locator can be faked in tests
fn fix_kubeconfig_with<F>(kubeconfig: &Path, locate: F) -> Result<FixOutcome>
where
    F: Fn() -> Option<PathBuf>,
{
    let content = std::fs::read_to_string(kubeconfig)
        .context(KErrKind::Unreadable(kubeconfig.display().to_string()))?;
    let (mut doc, format) = parse(&content, kubeconfig)?;

    let exec_command = doc
        .pointer("/users/0/user/exec/command")
        .and_then(|c| c.as_str())
        .map(|c| c.to_string());
    match exec_command {
        None => {
            info!("No exec configuration found in kubeconfig");
            return Ok(FixOutcome::AlreadyConfigured);
        }
        Some(ref cmd) if cmd != PLUGIN => {
            info!("Kubeconfig already has custom command: {}", cmd);
            return Ok(FixOutcome::AlreadyConfigured);
        }
        Some(_) => {}
    }

    let plugin = match locate() {
        Some(p) => p,
        None => return Err(KErrKind::PluginNotFound.into()),
    };
    info!("Found {} at: {}", PLUGIN, plugin.display());

    if let Some(slot) = doc.pointer_mut("/users/0/user/exec/command") {
        *slot = serde_json::Value::String(plugin.display().to_string());
    }

    let serialized = match format {
        FileFormat::Json => serde_json::to_string_pretty(&doc)?,
        FileFormat::Yaml => serde_yaml::to_string(&doc)?,
    };
    std::fs::write(kubeconfig, serialized)
        .context(KErrKind::Unreadable(kubeconfig.display().to_string()))?;
    info!("Updated kubeconfig with plugin path: {}", plugin.display());
    Ok(FixOutcome::Patched(plugin))
}

#[cfg(test)]
mod tests {
    use super::{fix_kubeconfig_with, FixOutcome};
    use std::fs;
    use std::path::PathBuf;

    const KUBECONFIG_YAML: &str = r#"apiVersion: v1
kind: Config
clusters:
- name: fast-bi-acme-platform
  cluster:
    server: https://10.0.0.1
users:
- name: gke-user
  user:
    exec:
      apiVersion: client.authentication.k8s.io/v1beta1
      command: gke-gcloud-auth-plugin
      provideClusterInfo: true
"#;

    fn fake_locator() -> Option<PathBuf> {
        Some(PathBuf::from(
            "/opt/homebrew/Caskroom/google-cloud-sdk/latest/google-cloud-sdk/bin/gke-gcloud-auth-plugin",
        ))
    }

    #[test]
    fn patches_yaml_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubeconfig.yaml");
        fs::write(&path, KUBECONFIG_YAML).unwrap();

        let outcome = fix_kubeconfig_with(&path, fake_locator).unwrap();
        assert!(matches!(outcome, FixOutcome::Patched(_)));
        let patched = fs::read_to_string(&path).unwrap();
        assert!(patched.contains(
            "/opt/homebrew/Caskroom/google-cloud-sdk/latest/google-cloud-sdk/bin/gke-gcloud-auth-plugin"
        ));
        // still YAML, not JSON
        assert!(!patched.trim_start().starts_with('{'));
        let parsed: serde_json::Value = serde_yaml::from_str(&patched).unwrap();
        assert_eq!(
            parsed["users"][0]["user"]["exec"]["provideClusterInfo"],
            true
        );

        // second run finds a concrete path and does nothing
        let outcome = fix_kubeconfig_with(&path, fake_locator).unwrap();
        assert_eq!(outcome, FixOutcome::AlreadyConfigured);
    }

    #[test]
    fn preserves_json_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubeconfig.json");
        let doc = serde_json::json!({
            "apiVersion": "v1",
            "users": [
                { "name": "gke-user",
                  "user": { "exec": { "command": "gke-gcloud-auth-plugin" } } }
            ]
        });
        fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        fix_kubeconfig_with(&path, fake_locator).unwrap();
        let patched = fs::read_to_string(&path).unwrap();
        // rewritten as JSON
        let parsed: serde_json::Value = serde_json::from_str(&patched).unwrap();
        assert!(parsed["users"][0]["user"]["exec"]["command"]
            .as_str()
            .unwrap()
            .ends_with("gke-gcloud-auth-plugin"));
    }

    #[test]
    fn no_exec_section_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubeconfig.yaml");
        fs::write(&path, "apiVersion: v1\nusers:\n- name: x\n  user: {}\n").unwrap();
        let outcome = fix_kubeconfig_with(&path, fake_locator).unwrap();
        assert_eq!(outcome, FixOutcome::AlreadyConfigured);
    }

    #[test]
    fn missing_plugin_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubeconfig.yaml");
        fs::write(&path, KUBECONFIG_YAML).unwrap();
        let err = fix_kubeconfig_with(&path, || None).unwrap_err();
        assert!(err.to_string().contains("Could not find"));
    }

    #[test]
    fn garbage_is_unparseable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kubeconfig.yaml");
        fs::write(&path, "{ this is not valid").unwrap();
        assert!(fix_kubeconfig_with(&path, fake_locator).is_err());
    }
}
