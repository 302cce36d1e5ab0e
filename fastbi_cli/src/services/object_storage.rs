//! Object storage: minio operator plus the tenant's storage tenant.

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions};
use crate::release::{ChartRef, PodWait, ReleaseStep, RenderSpec};
use crate::services::method_name;
use crate::{DeployEnvironment, Result, SecretStore, Tenant};

const CHART_REPO_NAME: &str = "minio";
const CHART_REPO: &str = "https://operator.min.io/";
const TENANT_CHART_NAME: &str = "minio/tenant";
const OPERATOR_CHART_NAME: &str = "minio/operator";

const VALUES: &str = "charts/data_services_charts/object_storage_operator/values.yaml";
const VALUES_TEMPLATE: &str =
    "charts/data_services_charts/object_storage_operator/template_values.yaml";
const OPERATOR_VALUES: &str =
    "charts/data_services_charts/object_storage_operator/operator_values.yaml";
const OPERATOR_VALUES_TEMPLATE: &str =
    "charts/data_services_charts/object_storage_operator/operator_template_values.yaml";

pub struct Opts {
    pub chart_version: String,
    pub operator_chart_version: String,
    pub namespace: String,
}

pub fn plan(tenant: &Tenant, store: &SecretStore, opts: &Opts) -> Result<Deployment> {
    let root_user = store.get("MINIO_ROOT_USER", "/data-platform-storage/root-minio-secrets/")?;
    let root_password = store.get(
        "MINIO_ROOT_PASSWORD",
        "/data-platform-storage/root-minio-secrets/",
    )?;
    let oauth_client_id = store.get(
        "MINIO_IDENTITY_OPENID_CLIENT_ID",
        "/data-platform-storage/sso-clients-secrets/",
    )?;
    let oauth_client_secret = store.get(
        "MINIO_IDENTITY_OPENID_CLIENT_SECRET",
        "/data-platform-storage/sso-clients-secrets/",
    )?;

    let oidc = tenant.oidc();
    let mut values = Context::new();
    values.insert("chart_name", TENANT_CHART_NAME);
    values.insert("chart_repo", CHART_REPO);
    values.insert("chart_version", &opts.chart_version);
    values.insert("ingress_host", &tenant.ingress("minio"));
    values.insert("api_ingress_host", &tenant.ingress("s3"));
    values.insert("minio_root_user", &root_user);
    values.insert("minio_root_password", &root_password);
    values.insert("oauth_client_id", &oauth_client_id);
    values.insert("oauth_client_secret", &oauth_client_secret);
    values.insert("oauth_end_point_host", &oidc.well_known_url());
    values.insert(
        "oauth_redirect_url",
        &format!("https://{}/oauth_callback", tenant.ingress("minio")),
    );
    values.insert("cloud_provider", &tenant.cloud_provider.to_string());
    values.insert("method", method_name(store));
    values.insert("customer", &tenant.customer);

    let mut operator_values = Context::new();
    operator_values.insert("chart_name", OPERATOR_CHART_NAME);
    operator_values.insert("chart_repo", CHART_REPO);
    operator_values.insert("chart_version", &opts.operator_chart_version);
    operator_values.insert("namespace", &opts.namespace);
    operator_values.insert("cloud_provider", &tenant.cloud_provider.to_string());
    operator_values.insert("method", method_name(store));
    operator_values.insert("customer", &tenant.customer);

    let operator = ReleaseStep::new(
        "object-storage-operator",
        ChartRef::new(
            CHART_REPO_NAME,
            CHART_REPO,
            OPERATOR_CHART_NAME,
            &opts.operator_chart_version,
        ),
        &opts.namespace,
        OPERATOR_VALUES,
    )
    .with_render(RenderSpec::new(
        OPERATOR_VALUES_TEMPLATE,
        OPERATOR_VALUES,
        operator_values,
    ))
    .with_wait(PodWait::new("fastbi=object-storage-operator"));

    let storage_tenant = ReleaseStep::new(
        "object-storage",
        ChartRef::new(
            CHART_REPO_NAME,
            CHART_REPO,
            TENANT_CHART_NAME,
            &opts.chart_version,
        ),
        &opts.namespace,
        VALUES,
    )
    .with_render(RenderSpec::new(VALUES_TEMPLATE, VALUES, values))
    .with_wait(PodWait::new("fastbi=object-storage-tenant"));

    Ok(Deployment {
        service: "Platform Object Storage",
        environment: DeployEnvironment::DataServices,
        actions: vec![
            Action::Release(operator),
            Action::Release(storage_tenant),
        ],
        record: RecordSpec {
            deployment_name: "object-storage".into(),
            chart_name: TENANT_CHART_NAME.into(),
            chart_version: opts.chart_version.clone().into(),
            app_name: "tenant".into(),
            versions: RecordVersions::Single {
                release: "object-storage".into(),
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

    fn vault() -> serde_json::Value {
        serde_json::json!({
            "data-platform-storage": {
                "root-minio-secrets": {
                    "MINIO_ROOT_USER": "minio-root", "MINIO_ROOT_PASSWORD": "pw" },
                "sso-clients-secrets": {
                    "MINIO_IDENTITY_OPENID_CLIENT_ID": "cid",
                    "MINIO_IDENTITY_OPENID_CLIENT_SECRET": "csec" }
            }
        })
    }

    #[test]
    fn operator_precedes_the_tenant_and_both_gate_on_pods() {
        let (_d, store) = testutil::store(vault());
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let plan = plan(
            &tenant,
            &store,
            &Opts {
                chart_version: "5.0.0".into(),
                operator_chart_version: "5.0.15".into(),
                namespace: "minio".into(),
            },
        )
        .unwrap();
        assert_eq!(plan.actions.len(), 2);
        match (&plan.actions[0], &plan.actions[1]) {
            (Action::Release(op), Action::Release(ten)) => {
                assert_eq!(op.name, "object-storage-operator");
                assert_eq!(op.chart.chart, "minio/operator");
                assert_eq!(
                    op.wait.as_ref().unwrap().selector,
                    "fastbi=object-storage-operator"
                );
                assert_eq!(ten.name, "object-storage");
                let values = ten.renders[0].context.clone().into_json();
                assert_eq!(values["ingress_host"], "minio.acme.fast.bi");
                assert_eq!(values["api_ingress_host"], "s3.acme.fast.bi");
                assert_eq!(
                    values["oauth_redirect_url"],
                    "https://minio.acme.fast.bi/oauth_callback"
                );
                assert_eq!(
                    values["oauth_end_point_host"],
                    "https://login.acme.fast.bi/realms/acme/.well-known/openid-configuration"
                );
            }
            _ => panic!("expected two releases"),
        }
    }
}
