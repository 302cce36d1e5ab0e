use std::path::Path;

use super::exec;

// Helm invocation errors
#[derive(Debug)]
struct HelmError {
    inner: failure::Context<HErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
enum HErrKind {
    #[fail(display = "Helm repo add of '{}' failed", _0)]
    RepoAddFailure(String),

    #[fail(display = "Helm repo update of '{}' failed", _0)]
    RepoUpdateFailure(String),

    #[fail(display = "Helm upgrade of '{}' failed", _0)]
    UpgradeFailure(String),
}
use failure::{Backtrace, Context, Error, Fail, ResultExt};
use std::fmt::{self, Display};

// boilerplate error wrapping
impl Fail for HelmError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}
impl Display for HelmError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}
impl From<HErrKind> for HelmError {
    fn from(kind: HErrKind) -> HelmError {
        HelmError {
            inner: Context::new(kind),
        }
    }
}
impl From<Context<HErrKind>> for HelmError {
    fn from(inner: Context<HErrKind>) -> HelmError {
        HelmError { inner }
    }
}
type Result<T> = std::result::Result<T, Error>;

/// Add a chart repository, tolerating re-adds
pub fn repo_add(name: &str, url: &str) -> Result<()> {
    let args: Vec<String> = vec!["repo".into(), "add".into(), name.into(), url.into()];
    exec::run("helm", &args).context(HErrKind::RepoAddFailure(name.to_string()))?;
    Ok(())
}

/// Refresh one chart repository before an upgrade
pub fn repo_update(name: &str) -> Result<()> {
    let args: Vec<String> = vec!["repo".into(), "update".into(), name.into()];
    exec::run("helm", &args).context(HErrKind::RepoUpdateFailure(name.to_string()))?;
    Ok(())
}

/// Everything one `helm upgrade -i` needs
#[derive(Clone, Debug)]
pub struct Upgrade<'a> {
    pub release: &'a str,
    pub chart: &'a str,
    pub version: &'a str,
    pub namespace: &'a str,
    pub values: &'a Path,
    pub kubeconfig: &'a Path,
    pub wait: bool,
    pub timeout: Option<&'a str>,
}

/// The argv of an upgrade, without the leading binary name
///
/// Kept pure so argv shape is testable without a cluster.
pub fn upgrade_args(u: &Upgrade) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "upgrade".into(),
        "-i".into(),
        u.release.into(),
        u.chart.into(),
        "--version".into(),
        u.version.into(),
        "--namespace".into(),
        u.namespace.into(),
        "--create-namespace".into(),
    ];
    if u.wait {
        args.push("--wait".into());
    }
    if let Some(t) = u.timeout {
        args.push("--timeout".into());
        args.push(t.into());
    }
    args.push("--values".into());
    args.push(u.values.display().to_string());
    args.push("--kubeconfig".into());
    args.push(u.kubeconfig.display().to_string());
    args
}

/// Install or upgrade a release
pub fn upgrade(u: &Upgrade) -> Result<()> {
    exec::run("helm", &upgrade_args(u))
        .context(HErrKind::UpgradeFailure(u.release.to_string()))?;
    Ok(())
}

// helm ls row, as far as the version query is concerned
#[derive(Deserialize)]
struct LsEntry {
    #[serde(default)]
    app_version: Option<String>,
}

/// App version of a deployed release
///
/// Runs `helm ls --deployed -f <release> -n <ns> --output json` and extracts
/// `[0].app_version`. Falls back to descriptive strings instead of failing,
/// since version retrieval is best effort.
pub fn deployed_app_version(release: &str, namespace: &str, kubeconfig: &Path) -> String {
    info!(
        "Getting deployed version for {} in namespace {}",
        release, namespace
    );
    let args: Vec<String> = vec![
        "ls".into(),
        "--deployed".into(),
        "-f".into(),
        release.into(),
        "-n".into(),
        namespace.into(),
        "--kubeconfig".into(),
        kubeconfig.display().to_string(),
        "--output".into(),
        "json".into(),
    ];
    let stdout = match exec::run("helm", &args) {
        Ok(out) => out,
        Err(e) => {
            error!("Error getting deployed version: {}", e);
            return "Error getting version".to_string();
        }
    };
    parse_app_version(&stdout)
}

fn parse_app_version(stdout: &str) -> String {
    if stdout.trim().is_empty() {
        return "No deployed version found".to_string();
    }
    match serde_json::from_str::<Vec<LsEntry>>(stdout) {
        Ok(entries) => match entries.into_iter().next().and_then(|e| e.app_version) {
            Some(v) => {
                info!("Found app version: {}", v);
                v
            }
            None => {
                warn!("No deployments found");
                "No deployed version found".to_string()
            }
        },
        Err(e) => {
            error!("Failed to parse Helm output as JSON: {}", e);
            "Error parsing version".to_string()
        }
    }
}
