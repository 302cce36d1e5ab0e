//! Shared PostgreSQL operator and the global cluster resources.

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions};
use crate::release::{ChartRef, PodWait, ReleaseStep, RenderSpec};
use crate::services::{insert_opt, vault_context};
use crate::{DeployEnvironment, Result, SecretStore, Tenant};

const CHART_REPO_NAME: &str = "stackgres-charts";
const CHART_REPO: &str = "https://stackgres.io/downloads/stackgres-k8s/stackgres/helm/";
const CHART_NAME: &str = "stackgres-charts/stackgres-operator";

const VALUES: &str = "charts/infra_services_charts/stackgres_postgres_db/values.yaml";
const VALUES_TEMPLATE: &str =
    "charts/infra_services_charts/stackgres_postgres_db/template_op_values.yaml";
const VALUES_EXTRA: &str =
    "charts/infra_services_charts/stackgres_postgres_db/values_extra.yaml";
const VALUES_EXTRA_TEMPLATE: &str =
    "charts/infra_services_charts/stackgres_postgres_db/template_values_extra.yaml";

pub struct Opts {
    pub chart_version: String,
    pub namespace: String,
}

pub fn plan(tenant: &Tenant, store: &SecretStore, opts: &Opts) -> Result<Deployment> {
    let mut values = Context::new();
    values.insert("chart_name", CHART_NAME);
    values.insert("chart_repo", CHART_REPO);
    values.insert("chart_version", &opts.chart_version);
    values.insert("cloud_provider", &tenant.cloud_provider.to_string());
    insert_opt(&mut values, "project_id", &tenant.project_id);
    values.insert("namespace", &opts.namespace);

    // cluster CRs pull their credentials through the secret operator
    let mut extra = values.clone();
    vault_context(&mut extra, store, tenant);

    let operator = ReleaseStep::new(
        "stackgres-postgresql-operator",
        ChartRef::new(CHART_REPO_NAME, CHART_REPO, CHART_NAME, &opts.chart_version),
        &opts.namespace,
        VALUES,
    )
    .with_render(RenderSpec::new(VALUES_TEMPLATE, VALUES, values))
    .with_wait(PodWait::new("app=stackgres-postgresql-operator"));

    let actions = vec![
        Action::Release(operator),
        Action::Render(RenderSpec::new(VALUES_EXTRA_TEMPLATE, VALUES_EXTRA, extra)),
        Action::Apply {
            manifest: VALUES_EXTRA.into(),
            namespace: opts.namespace.clone(),
        },
        Action::WaitPods {
            wait: PodWait::new("app=StackGresCluster"),
            namespace: opts.namespace.clone(),
        },
    ];

    Ok(Deployment {
        service: "StackGres PostgreSQL",
        environment: DeployEnvironment::Infrastructure,
        actions,
        record: RecordSpec {
            deployment_name: "stackgres-postgresql-operator".into(),
            chart_name: CHART_NAME.into(),
            chart_version: opts.chart_version.clone().into(),
            app_name: "stackgres-operator".into(),
            versions: RecordVersions::Single {
                release: "stackgres-postgresql-operator".into(),
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

    #[test]
    fn operator_then_clusters_with_readiness_gates() {
        let (_d, store) = testutil::store(serde_json::json!({}));
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let plan = plan(
            &tenant,
            &store,
            &Opts {
                chart_version: "1.10.0".into(),
                namespace: "global-postgresql".into(),
            },
        )
        .unwrap();
        assert_eq!(plan.actions.len(), 4);
        match &plan.actions[0] {
            Action::Release(s) => {
                assert_eq!(s.name, "stackgres-postgresql-operator");
                let w = s.wait.as_ref().unwrap();
                assert_eq!(w.selector, "app=stackgres-postgresql-operator");
                assert_eq!(w.timeout_secs, 300);
            }
            _ => panic!("expected the operator release first"),
        }
        match &plan.actions[3] {
            Action::WaitPods { wait, .. } => {
                assert_eq!(wait.selector, "app=StackGresCluster")
            }
            _ => panic!("expected the cluster readiness gate last"),
        }
    }

    #[test]
    fn cluster_resources_carry_the_vault_wiring() {
        let (_d, store) = testutil::store(serde_json::json!({}));
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let plan = plan(
            &tenant,
            &store,
            &Opts {
                chart_version: "1.10.0".into(),
                namespace: "global-postgresql".into(),
            },
        )
        .unwrap();
        let extra = match &plan.actions[1] {
            Action::Render(r) => r.context.clone().into_json(),
            _ => panic!("expected the extra render"),
        };
        assert_eq!(extra["method"], "local_vault");
        assert_eq!(extra["project_slug"], "acme");
        assert_eq!(extra["infisical_environment"], "prod");
    }
}
