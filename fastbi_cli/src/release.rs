use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tera::Context;

use super::{helm, kube, template};
use super::Result;

/// Where a chart comes from
///
/// `oci://` chart references resolve directly and skip `helm repo
/// add`/`update`; plain references go through the named repository.
#[derive(Clone, Debug)]
pub struct ChartRef {
    pub repo_name: String,
    pub repo_url: String,
    pub chart: String,
    pub version: String,
}

impl ChartRef {
    pub fn new(repo_name: &str, repo_url: &str, chart: &str, version: &str) -> ChartRef {
        ChartRef {
            repo_name: repo_name.into(),
            repo_url: repo_url.into(),
            chart: chart.into(),
            version: version.into(),
        }
    }

    pub fn is_oci(&self) -> bool {
        self.chart.starts_with("oci://")
    }
}

/// A pod readiness gate after an upgrade
#[derive(Clone, Debug)]
pub struct PodWait {
    pub selector: String,
    /// Namespace override; defaults to the step namespace
    pub namespace: Option<String>,
    pub timeout_secs: u32,
}

impl PodWait {
    pub fn new(selector: &str) -> PodWait {
        PodWait {
            selector: selector.into(),
            namespace: None,
            timeout_secs: 300,
        }
    }
}

/// One template render feeding a step
#[derive(Debug)]
pub struct RenderSpec {
    pub template: PathBuf,
    pub output: PathBuf,
    pub context: Context,
}

impl RenderSpec {
    pub fn new(template: &str, output: &str, context: Context) -> RenderSpec {
        RenderSpec {
            template: PathBuf::from(template),
            output: PathBuf::from(output),
            context,
        }
    }
}

/// Step lifecycle; every failure is terminal for the owning service
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StepState {
    Pending,
    Rendering,
    ApplyingRepo,
    Upgrading,
    Waiting,
    PostApplying,
    Done,
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            StepState::Pending => "pending",
            StepState::Rendering => "rendering",
            StepState::ApplyingRepo => "applying_repo",
            StepState::Upgrading => "upgrading",
            StepState::Waiting => "waiting",
            StepState::PostApplying => "post_applying",
            StepState::Done => "done",
            StepState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// The atomic unit of the deployment engine
///
/// A step renders its value documents, reconciles one helm release and runs
/// its gates and post-apply manifests, in the declared order.
#[derive(Debug)]
pub struct ReleaseStep {
    pub name: String,
    pub chart: ChartRef,
    pub namespace: String,
    pub values_path: PathBuf,
    pub renders: Vec<RenderSpec>,
    pub wait_for_helm: bool,
    pub timeout: Option<String>,
    pub wait: Option<PodWait>,
    pub post_apply: Vec<PathBuf>,
}

impl ReleaseStep {
    pub fn new(name: &str, chart: ChartRef, namespace: &str, values_path: &str) -> ReleaseStep {
        ReleaseStep {
            name: name.into(),
            chart,
            namespace: namespace.into(),
            values_path: PathBuf::from(values_path),
            renders: Vec::new(),
            wait_for_helm: true,
            timeout: None,
            wait: None,
            post_apply: Vec::new(),
        }
    }

    pub fn with_render(mut self, spec: RenderSpec) -> ReleaseStep {
        self.renders.push(spec);
        self
    }

    pub fn with_timeout(mut self, timeout: &str) -> ReleaseStep {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn with_wait(mut self, wait: PodWait) -> ReleaseStep {
        self.wait = Some(wait);
        self
    }

    pub fn with_post_apply(mut self, manifest: &str) -> ReleaseStep {
        self.post_apply.push(PathBuf::from(manifest));
        self
    }

    fn transition(&self, from: StepState, to: StepState) -> StepState {
        debug!("{}: {} -> {}", self.name, from, to);
        to
    }

    /// Drive the step to `done`, or return the error that made it `failed`
    pub fn execute(&self, kubeconfig: &Path) -> Result<()> {
        let mut state = StepState::Pending;
        let result = self.try_execute(kubeconfig, &mut state);
        match &result {
            Ok(()) => debug!("{}: {} -> {}", self.name, state, StepState::Done),
            Err(e) => {
                error!("{}: {} -> {}: {}", self.name, state, StepState::Failed, e);
            }
        }
        result
    }

    fn try_execute(&self, kubeconfig: &Path, state: &mut StepState) -> Result<()> {
        info!("Deploying {} in namespace {}", self.name, self.namespace);

        *state = self.transition(*state, StepState::Rendering);
        for r in &self.renders {
            template::render_file(&r.template, &r.output, &r.context)?;
        }
        self.verify_values()?;

        if !self.chart.is_oci() {
            *state = self.transition(*state, StepState::ApplyingRepo);
            helm::repo_add(&self.chart.repo_name, &self.chart.repo_url)?;
            helm::repo_update(&self.chart.repo_name)?;
        }

        *state = self.transition(*state, StepState::Upgrading);
        helm::upgrade(&helm::Upgrade {
            release: &self.name,
            chart: &self.chart.chart,
            version: &self.chart.version,
            namespace: &self.namespace,
            values: &self.values_path,
            kubeconfig,
            wait: self.wait_for_helm,
            timeout: self.timeout.as_deref(),
        })?;

        if let Some(w) = &self.wait {
            *state = self.transition(*state, StepState::Waiting);
            let ns = w.namespace.as_deref().unwrap_or(&self.namespace);
            kube::wait_ready(&w.selector, ns, w.timeout_secs, kubeconfig)?;
        }

        if !self.post_apply.is_empty() {
            *state = self.transition(*state, StepState::PostApplying);
            for manifest in &self.post_apply {
                kube::apply(manifest, &self.namespace, kubeconfig)?;
            }
        }

        info!(
            "Successfully deployed {} in namespace {}",
            self.name, self.namespace
        );
        Ok(())
    }

    // The values document must exist and be non-empty before helm runs
    fn verify_values(&self) -> Result<()> {
        let meta = fs::metadata(&self.values_path)
            .map_err(|_| format_err!("Values file not found: {}", self.values_path.display()))?;
        if meta.len() == 0 {
            bail!("Values file is empty: {}", self.values_path.display());
        }
        Ok(())
    }
}

/// Query the deployed app version for a step's release
pub fn app_version(step_name: &str, namespace: &str, kubeconfig: &Path) -> String {
    helm::deployed_app_version(step_name, namespace, kubeconfig)
}

#[cfg(test)]
mod tests {
    use super::{ChartRef, PodWait, ReleaseStep, RenderSpec};
    use std::path::Path;
    use tera::Context;

    fn chart() -> ChartRef {
        ChartRef::new(
            "jetstack",
            "https://charts.jetstack.io",
            "jetstack/cert-manager",
            "v1.13.0",
        )
    }

    #[test]
    fn oci_detection() {
        let oci = ChartRef::new(
            "bitnami",
            "https://charts.bitnami.com/bitnami",
            "oci://registry-1.docker.io/bitnamicharts/keycloak",
            "21.0.0",
        );
        assert!(oci.is_oci());
        assert!(!chart().is_oci());
    }

    #[test]
    fn values_must_exist_before_upgrade() {
        let step = ReleaseStep::new(
            "cert-manager",
            chart(),
            "cert-manager",
            "/no/such/values.yaml",
        );
        let err = step
            .execute(Path::new("/tmp/kubeconfig.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("Values file not found"));
    }

    #[test]
    fn rendering_failure_fails_the_step() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("values.yaml");
        let step = ReleaseStep::new("cert-manager", chart(), "cert-manager", "ignored.yaml")
            .with_render(RenderSpec {
                template: dir.path().join("missing_template.yaml"),
                output: out,
                context: Context::new(),
            });
        let err = step
            .execute(Path::new("/tmp/kubeconfig.yaml"))
            .unwrap_err();
        assert!(err.to_string().contains("Template file not found"));
    }

    #[test]
    fn pod_wait_defaults() {
        let w = PodWait::new("fastbi=data-replication");
        assert_eq!(w.timeout_secs, 300);
        assert_eq!(w.namespace, None);
    }
}
