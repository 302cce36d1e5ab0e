//! Certificate manager with cloud-conditioned issuer identity.

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions};
use crate::release::{ChartRef, ReleaseStep, RenderSpec};
use crate::services::{insert_opt, method_name};
use crate::{CloudProvider, DeployEnvironment, Result, SecretStore, Tenant};

const CHART_REPO_NAME: &str = "jetstack";
const CHART_REPO: &str = "https://charts.jetstack.io";
const CHART_NAME: &str = "jetstack/cert-manager";
const CSI_DRIVER_CHART_NAME: &str = "jetstack/cert-manager-csi-driver";
const CSI_DRIVER_CHART_VERSION: &str = "v0.10.2";

const VALUES: &str = "charts/infra_services_charts/cert_manager/values.yaml";
const VALUES_TEMPLATE: &str = "charts/infra_services_charts/cert_manager/template_values.yaml";
const VALUES_EXTRA: &str = "charts/infra_services_charts/cert_manager/values_extra.yaml";
const VALUES_EXTRA_TEMPLATE: &str =
    "charts/infra_services_charts/cert_manager/template_values_extra.yaml";
const CSI_DRIVER_VALUES: &str = "charts/infra_services_charts/cert_manager/csi_driver_values.yaml";

pub struct Opts {
    pub chart_version: String,
    pub user_email: String,
    pub namespace: String,
}

pub fn plan(tenant: &Tenant, store: &SecretStore, opts: &Opts) -> Result<Deployment> {
    let sa = tenant.service_account("cert-manager");

    let mut values = Context::new();
    values.insert("chart_name", CHART_NAME);
    values.insert("chart_repo", CHART_REPO);
    values.insert("chart_version", &opts.chart_version);
    insert_opt(&mut values, "cert_manager_k8s_sa", &sa);
    values.insert("cloud_provider", &tenant.cloud_provider.to_string());

    let mut extra = Context::new();
    extra.insert("chart_name", CHART_NAME);
    extra.insert("chart_repo", CHART_REPO);
    extra.insert("chart_version", &opts.chart_version);
    extra.insert("cloud_provider", &tenant.cloud_provider.to_string());
    extra.insert("user_email", &opts.user_email);
    insert_opt(&mut extra, "project_id", &tenant.project_id);
    extra.insert("customer", &tenant.customer);
    extra.insert("method", method_name(store));
    // region only matters for DNS01 solvers on AWS
    let aws_region = match tenant.cloud_provider {
        CloudProvider::Aws => tenant.region.clone(),
        _ => None,
    };
    insert_opt(&mut extra, "aws_region", &aws_region);

    let main = ReleaseStep::new(
        "cert-manager",
        ChartRef::new(CHART_REPO_NAME, CHART_REPO, CHART_NAME, &opts.chart_version),
        &opts.namespace,
        VALUES,
    )
    .with_render(RenderSpec::new(VALUES_TEMPLATE, VALUES, values))
    .with_render(RenderSpec::new(VALUES_EXTRA_TEMPLATE, VALUES_EXTRA, extra))
    .with_post_apply(VALUES_EXTRA);

    let mut actions = vec![Action::Release(main)];

    // self-managed clusters need the csi driver for pod certificates
    if tenant.cloud_provider == CloudProvider::SelfManaged {
        actions.push(Action::Release(ReleaseStep::new(
            "cert-manager-csi-driver",
            ChartRef::new(
                CHART_REPO_NAME,
                CHART_REPO,
                CSI_DRIVER_CHART_NAME,
                CSI_DRIVER_CHART_VERSION,
            ),
            &opts.namespace,
            CSI_DRIVER_VALUES,
        )));
    }

    Ok(Deployment {
        service: "Cert Manager",
        environment: DeployEnvironment::Infrastructure,
        actions,
        record: RecordSpec {
            deployment_name: "cert-manager".into(),
            chart_name: CHART_NAME.into(),
            chart_version: opts.chart_version.clone().into(),
            app_name: "cert-manager".into(),
            versions: RecordVersions::Single {
                release: "cert-manager".into(),
                namespace: opts.namespace.clone(),
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::{plan, Opts};
    use crate::orchestrator::Action;
    use crate::services::testutil;
    use crate::CloudProvider;

    fn opts() -> Opts {
        Opts {
            chart_version: "v1.13.0".into(),
            user_email: "ops@acme.fast.bi".into(),
            namespace: "cert-manager".into(),
        }
    }

    #[test]
    fn gcp_plan_carries_the_issuer_service_account() {
        let (_d, store) = testutil::store(serde_json::json!({}));
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let plan = plan(&tenant, &store, &opts()).unwrap();
        assert_eq!(plan.actions.len(), 1);
        let step = match &plan.actions[0] {
            Action::Release(s) => s,
            _ => panic!("expected a release"),
        };
        assert_eq!(step.name, "cert-manager");
        assert_eq!(step.renders.len(), 2);
        let values = step.renders[0].context.clone().into_json();
        assert_eq!(
            values["cert_manager_k8s_sa"],
            "cert-manager-k8s-sa@fast-bi-acme.iam.gserviceaccount.com"
        );
        let extra = step.renders[1].context.clone().into_json();
        assert_eq!(extra["user_email"], "ops@acme.fast.bi");
        assert_eq!(extra["project_id"], "fast-bi-acme");
        assert_eq!(extra["aws_region"], "");
    }

    #[test]
    fn self_managed_plan_adds_the_csi_driver() {
        let (_d, store) = testutil::store(serde_json::json!({}));
        let tenant = testutil::tenant(CloudProvider::SelfManaged);
        let plan = plan(&tenant, &store, &opts()).unwrap();
        assert_eq!(plan.actions.len(), 2);
        match &plan.actions[1] {
            Action::Release(s) => {
                assert_eq!(s.name, "cert-manager-csi-driver");
                assert_eq!(s.chart.version, "v0.10.2");
                assert!(s.renders.is_empty());
            }
            _ => panic!("expected a release"),
        }
        // no identity off GCP
        match &plan.actions[0] {
            Action::Release(s) => {
                let values = s.renders[0].context.clone().into_json();
                assert_eq!(values["cert_manager_k8s_sa"], "");
            }
            _ => panic!("expected a release"),
        }
    }
}
