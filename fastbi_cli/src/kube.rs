use std::path::Path;

use super::exec;
use super::Result;

/// Apply one manifest file into a namespace
pub fn apply(manifest: &Path, namespace: &str, kubeconfig: &Path) -> Result<()> {
    if !manifest.exists() {
        bail!("Manifest file not found: {}", manifest.display());
    }
    let args: Vec<String> = vec![
        "apply".into(),
        "-f".into(),
        manifest.display().to_string(),
        "--namespace".into(),
        namespace.into(),
        "--kubeconfig".into(),
        kubeconfig.display().to_string(),
    ];
    exec::run("kubectl", &args)?;
    Ok(())
}

/// Block until pods matching a label selector are Ready
///
/// `kubectl wait --for=condition=ready pod -l <selector> -n <ns>
/// --timeout=<secs>s`. Timeout propagates as an error to the owning step.
pub fn wait_ready(selector: &str, namespace: &str, timeout_secs: u32, kubeconfig: &Path) -> Result<()> {
    info!(
        "Waiting up to {}s for pods matching {} in {}",
        timeout_secs, selector, namespace
    );
    let args: Vec<String> = vec![
        "wait".into(),
        "--for=condition=ready".into(),
        "pod".into(),
        "-l".into(),
        selector.into(),
        "-n".into(),
        namespace.into(),
        format!("--timeout={}s", timeout_secs),
        "--kubeconfig".into(),
        kubeconfig.display().to_string(),
    ];
    exec::run("kubectl", &args)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::apply;
    use std::path::Path;

    #[test]
    fn apply_requires_the_manifest_on_disk() {
        let err = apply(
            Path::new("/no/such/values_extra.yaml"),
            "cert-manager",
            Path::new("/tmp/kubeconfig.yaml"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Manifest file not found"));
    }
}
