use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::release::{PodWait, ReleaseStep, RenderSpec};
use super::{exec, helm, kube, template};
use super::{
    AppVersions, DeployEnvironment, DeploymentRecord, Journal, RecordValue, Result, Tenant,
};

/// One unit of observable work inside a service deployment
///
/// Services are data: an ordered action list consumed strictly sequentially.
/// Releases dominate; the other variants cover the glue the platform needs
/// around them (pre-applied manifests, namespace bootstrap, secret material).
#[derive(Debug)]
pub enum Action {
    /// Render a template outside any release (e.g. realm documents)
    Render(RenderSpec),
    /// Reconcile one helm release through the step state machine
    Release(ReleaseStep),
    /// Apply a rendered manifest with kubectl
    Apply { manifest: PathBuf, namespace: String },
    /// Idempotently create a namespace via the dry-run apply pipeline
    EnsureNamespace { namespace: String },
    /// Block on a pod readiness gate outside any release
    WaitPods { wait: PodWait, namespace: String },
    /// Wrap a local file into an Opaque Secret and apply it
    SecretMaterial {
        source: PathBuf,
        secret_name: String,
        namespace: String,
    },
}

/// Where a journal version entry comes from
#[derive(Debug)]
pub enum VersionSource {
    /// `helm ls` against a deployed release
    Release { release: String, namespace: String },
    /// A version the caller already knows (e.g. an image tag flag)
    Fixed(String),
    /// Recorded as null (e.g. a local database that was not deployed)
    Absent,
}

/// Scalar for single-release services, keyed map for aggregates
#[derive(Debug)]
pub enum RecordVersions {
    Single { release: String, namespace: String },
    Map(Vec<(String, VersionSource)>),
}

/// Everything needed to append the service's deployment record
#[derive(Debug)]
pub struct RecordSpec {
    pub deployment_name: String,
    pub chart_name: RecordValue,
    pub chart_version: RecordValue,
    pub app_name: RecordValue,
    pub versions: RecordVersions,
}

/// A fully resolved service deployment plan
#[derive(Debug)]
pub struct Deployment {
    /// Human label used in logs
    pub service: &'static str,
    pub environment: DeployEnvironment,
    pub actions: Vec<Action>,
    pub record: RecordSpec,
}

/// Run a deployment plan to completion and journal the outcome
///
/// Any failing action aborts the service; nothing is retried or compensated.
/// Re-runs are safe because `helm upgrade -i` is idempotent per release.
pub fn execute(plan: Deployment, tenant: &Tenant, journal: &Journal) -> Result<()> {
    info!(
        "Starting {} deployment for customer: {}",
        plan.service, tenant.customer
    );
    let kubeconfig = &tenant.kubeconfig;

    for action in &plan.actions {
        match action {
            Action::Render(r) => template::render_file(&r.template, &r.output, &r.context)?,
            Action::Release(step) => step.execute(kubeconfig)?,
            Action::Apply {
                manifest,
                namespace,
            } => kube::apply(manifest, namespace, kubeconfig)?,
            Action::EnsureNamespace { namespace } => {
                exec::ensure_namespace(namespace, kubeconfig)?
            }
            Action::WaitPods { wait, namespace } => {
                let ns = wait.namespace.as_deref().unwrap_or(namespace);
                kube::wait_ready(&wait.selector, ns, wait.timeout_secs, kubeconfig)?
            }
            Action::SecretMaterial {
                source,
                secret_name,
                namespace,
            } => apply_secret_material(source, secret_name, namespace, kubeconfig)?,
        }
    }

    let app_version = collect_versions(&plan.record.versions, kubeconfig);
    let record = DeploymentRecord {
        customer: tenant.customer.clone(),
        customer_main_domain: tenant.root_domain(),
        customer_vault_slug: tenant.slug.clone(),
        deployment_environment: plan.environment,
        deployment_name: plan.record.deployment_name.clone(),
        chart_name: plan.record.chart_name.clone(),
        chart_version: plan.record.chart_version.clone(),
        app_name: plan.record.app_name.clone(),
        app_version,
        deploy_date: DeploymentRecord::today(),
    };
    info!("Adding deployment record to metadata journal");
    journal.append(record)?;
    info!("{} deployment completed successfully", plan.service);
    Ok(())
}

fn collect_versions(versions: &RecordVersions, kubeconfig: &Path) -> AppVersions {
    match versions {
        RecordVersions::Single { release, namespace } => {
            AppVersions::One(helm::deployed_app_version(release, namespace, kubeconfig))
        }
        RecordVersions::Map(entries) => {
            let mut map = BTreeMap::new();
            for (key, source) in entries {
                let value = match source {
                    VersionSource::Release { release, namespace } => {
                        Some(helm::deployed_app_version(release, namespace, kubeconfig))
                    }
                    VersionSource::Fixed(v) => Some(v.clone()),
                    VersionSource::Absent => None,
                };
                map.insert(key.clone(), value);
            }
            AppVersions::Many(map)
        }
    }
}

// Wrap a local file as an Opaque Secret manifest and apply it. The manifest
// carries its own namespace; the temp copy never outlives the apply.
fn apply_secret_material(
    source: &Path,
    secret_name: &str,
    namespace: &str,
    kubeconfig: &Path,
) -> Result<()> {
    let content =
        fs::read(source).map_err(|e| format_err!("{}: {}", source.display(), e))?;
    let manifest = secret_manifest(secret_name, namespace, &content);
    let tmp = PathBuf::from(format!("/tmp/{}-{}.yaml", secret_name, namespace));
    fs::write(&tmp, manifest)?;

    let args: Vec<String> = vec![
        "apply".into(),
        "-f".into(),
        tmp.display().to_string(),
        "--kubeconfig".into(),
        kubeconfig.display().to_string(),
    ];
    let result = exec::run("kubectl", &args);
    if tmp.exists() {
        let _ = fs::remove_file(&tmp);
    }
    result?;
    Ok(())
}

fn secret_manifest(secret_name: &str, namespace: &str, content: &[u8]) -> String {
    format!(
        r#"
apiVersion: v1
kind: Secret
metadata:
  name: {name}
  namespace: {ns}
type: Opaque
data:
  {name}.json: {data}
"#,
        name = secret_name,
        ns = namespace,
        data = base64::encode(content)
    )
}

#[cfg(test)]
mod tests {
    use super::{execute, secret_manifest, Action, Deployment, RecordSpec, RecordVersions};
    use crate::release::{ChartRef, ReleaseStep, RenderSpec};
    use crate::services::testutil;
    use crate::{exec, CloudProvider, DeployEnvironment, Journal};
    use std::fs;
    use tera::Context;

    #[test]
    fn secret_material_is_base64_wrapped() {
        let manifest = secret_manifest("vault-secrets", "vault", b"{\"a\": 1}");
        assert!(manifest.contains("name: vault-secrets"));
        assert!(manifest.contains("namespace: vault"));
        assert!(manifest.contains(&format!(
            "vault-secrets.json: {}",
            base64::encode(b"{\"a\": 1}")
        )));
    }

    // End to end through the engine with the executor in dry-run: values are
    // rendered for real, nothing spawns, and a record still lands.
    #[test]
    fn dry_run_deployment_renders_and_journals() {
        let _guard = exec::DRY_RUN_TEST_LOCK.lock().unwrap();
        exec::set_dry_run(true);

        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template_values.yaml");
        fs::write(&template, "replicaCount: {{ replicas }}\n").unwrap();
        let values = dir.path().join("values.yaml");
        let mut ctx = Context::new();
        ctx.insert("replicas", &2);

        let step = ReleaseStep::new(
            "cert-manager",
            ChartRef::new(
                "jetstack",
                "https://charts.jetstack.io",
                "jetstack/cert-manager",
                "v1.13.0",
            ),
            "cert-manager",
            values.to_str().unwrap(),
        )
        .with_render(RenderSpec {
            template: template.clone(),
            output: values.clone(),
            context: ctx,
        });

        let plan = Deployment {
            service: "Cert Manager",
            environment: DeployEnvironment::Infrastructure,
            actions: vec![Action::Release(step)],
            record: RecordSpec {
                deployment_name: "cert-manager".into(),
                chart_name: "jetstack/cert-manager".into(),
                chart_version: "v1.13.0".into(),
                app_name: "cert-manager".into(),
                versions: RecordVersions::Single {
                    release: "cert-manager".into(),
                    namespace: "cert-manager".into(),
                },
            },
        };

        let tenant = testutil::tenant(CloudProvider::Gcp);
        let journal_path = dir.path().join("deployment_metadata.json");
        execute(plan, &tenant, &Journal::file(journal_path.clone())).unwrap();
        exec::set_dry_run(false);

        assert_eq!(
            fs::read_to_string(&values).unwrap(),
            "replicaCount: 2\n"
        );
        let records: Vec<serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(&journal_path).unwrap()).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["deployment_name"], "cert-manager");
        assert_eq!(records[0]["customer_main_domain"], "acme.fast.bi");
        // nothing deployed under dry-run, the fallback string is recorded
        assert_eq!(records[0]["app_version"], "No deployed version found");
    }
}
