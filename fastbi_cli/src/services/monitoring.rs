//! Platform monitoring: grafana against the platform databases, SSO gated.

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions};
use crate::release::{ChartRef, ReleaseStep, RenderSpec};
use crate::services::{insert_opt, method_name, psql_host};
use crate::{DeployEnvironment, Result, SecretStore, Tenant};

const CHART_REPO_NAME: &str = "grafana";
const CHART_REPO: &str = "https://grafana.github.io/helm-charts";
const CHART_NAME: &str = "grafana/grafana";

const VALUES: &str = "charts/infra_services_charts/services_monitoring/values.yaml";
const VALUES_TEMPLATE: &str =
    "charts/infra_services_charts/services_monitoring/template_values.yaml";
const DASHBOARD_CM: &str = "charts/infra_services_charts/services_monitoring/dashboard_cm.yaml";
const DASHBOARD_CM_TEMPLATE: &str =
    "charts/infra_services_charts/services_monitoring/template_dashboard_cm.yaml";
const ALERTS_CM: &str = "charts/infra_services_charts/services_monitoring/alerts_cm.yaml";
const ALERTS_CM_TEMPLATE: &str =
    "charts/infra_services_charts/services_monitoring/template_alerts_cm.yaml";

const REPLICATION_LOCAL_DB: &str =
    "data-replication-db-airbyte-read.data-replication.svc.cluster.local";
const ORCHESTRATION_LOCAL_DB: &str =
    "data-orchestration-postgresql-read.data-orchestration.svc.cluster.local";

pub struct Opts {
    pub chart_version: String,
    pub namespace: String,
}

pub fn plan(tenant: &Tenant, store: &SecretStore, opts: &Opts) -> Result<Deployment> {
    // monitoring reads the other services' databases directly
    let repl_db_username = store.get("username", "/data-replication/database-secrets/")?;
    let repl_db_password = store.get("password", "/data-replication/database-secrets/")?;
    let repl_db_database = store.get("database", "/data-replication/database-secrets/")?;
    let orch_db_username = store.get("username", "/data-orchestration/database-secrets/")?;
    let orch_db_password = store.get("password", "/data-orchestration/database-secrets/")?;
    let orch_db_database = store.get("database", "/data-orchestration/database-secrets/")?;
    let oauth_client_id =
        store.get("CLIENT_ID", "/data-platform-monitoring/sso-clients-secrets/")?;
    let oauth_client_secret =
        store.get("CLIENT_SECRET", "/data-platform-monitoring/sso-clients-secrets/")?;

    let repl_db_url = format!("{}:5432", psql_host(REPLICATION_LOCAL_DB));
    let orch_db_url = format!("{}:5432", psql_host(ORCHESTRATION_LOCAL_DB));

    let root = tenant.root_domain();
    let oidc = tenant.oidc();
    let mut values = Context::new();
    values.insert("chart_name", CHART_NAME);
    values.insert("chart_repo", CHART_REPO);
    values.insert("chart_version", &opts.chart_version);
    values.insert("customer", &tenant.customer);
    values.insert("ingress_host", &tenant.ingress("monitoring"));
    values.insert("cloud_provider", &tenant.cloud_provider.to_string());
    values.insert("method", method_name(store));
    insert_opt(&mut values, "project_slug", &tenant.slug);
    insert_opt(
        &mut values,
        "monitoring_k8s_sa",
        &tenant.service_account("monitoring"),
    );
    values.insert("data_replication_db_username", &repl_db_username);
    values.insert("data_replication_db_password", &repl_db_password);
    values.insert("data_replication_db_database", &repl_db_database);
    values.insert("data_orchestration_db_username", &orch_db_username);
    values.insert("data_orchestration_db_password", &orch_db_password);
    values.insert("data_orchestration_db_database", &orch_db_database);
    values.insert("oauth_client_id", &oauth_client_id);
    values.insert("oauth_client_secret", &oauth_client_secret);
    values.insert("oauth_auth_url", &oidc.auth_url());
    values.insert("oauth_token_url", &oidc.token_url());
    values.insert("oauth_api_url", &oidc.userinfo_url());
    values.insert("oauth_signout_redirect_url", &oidc.logout_url(&root));
    values.insert("monitoring_agent_email", &format!("no-reply@{}", root));
    values.insert("data_replication_db_url", &repl_db_url);
    values.insert("data_orchestration_db_url", &orch_db_url);

    // dashboards and alert rules only template the project id
    let mut cm = Context::new();
    insert_opt(&mut cm, "project_id", &tenant.project_id);

    let release = ReleaseStep::new(
        "monitoring",
        ChartRef::new(CHART_REPO_NAME, CHART_REPO, CHART_NAME, &opts.chart_version),
        &opts.namespace,
        VALUES,
    )
    .with_render(RenderSpec::new(VALUES_TEMPLATE, VALUES, values));

    let actions = vec![
        Action::Render(RenderSpec::new(
            DASHBOARD_CM_TEMPLATE,
            DASHBOARD_CM,
            cm.clone(),
        )),
        Action::Render(RenderSpec::new(ALERTS_CM_TEMPLATE, ALERTS_CM, cm)),
        // config maps land before the chart, so the namespace may not exist yet
        Action::EnsureNamespace {
            namespace: opts.namespace.clone(),
        },
        Action::Apply {
            manifest: DASHBOARD_CM.into(),
            namespace: opts.namespace.clone(),
        },
        Action::Apply {
            manifest: ALERTS_CM.into(),
            namespace: opts.namespace.clone(),
        },
        Action::Release(release),
    ];

    Ok(Deployment {
        service: "Platform Monitoring",
        environment: DeployEnvironment::Infrastructure,
        actions,
        record: RecordSpec {
            deployment_name: "monitoring".into(),
            chart_name: CHART_NAME.into(),
            chart_version: opts.chart_version.clone().into(),
            app_name: "grafana".into(),
            versions: RecordVersions::Single {
                release: "monitoring".into(),
                namespace: opts.namespace.clone(),
            },
        },
    })
}
