//! Data replication: oauth proxy plus the airbyte deployment.

use std::collections::BTreeMap;

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions, VersionSource};
use crate::release::{ChartRef, PodWait, ReleaseStep, RenderSpec};
use crate::services::{insert_opt, method_name, LOCAL_POSTGRESQL};
use crate::{DeployEnvironment, RecordValue, Result, SecretStore, Tenant};

const CHART_REPO_NAME: &str = "airbyte";
const CHART_REPO: &str = "https://airbytehq.github.io/helm-charts";
const CHART_NAME: &str = "airbyte/airbyte";

const OAUTH_CHART_REPO_NAME: &str = "oauth2-proxy";
const OAUTH_CHART_REPO: &str = "https://oauth2-proxy.github.io/manifests";
const OAUTH_CHART_NAME: &str = "oauth2-proxy/oauth2-proxy";
const OAUTH_CHART_VERSION_DEFAULT: &str = "7.18.0";

const PSQL_CHART_REPO_NAME: &str = "bitnami";
const PSQL_CHART_REPO: &str = "https://charts.bitnami.com/bitnami";
const PSQL_CHART_NAME: &str = "oci://registry-1.docker.io/bitnamicharts/postgresql";
const PSQL_CHART_VERSION: &str = "16.6.7";

const VALUES: &str = "charts/data_services_charts/data_replication/values.yaml";
const VALUES_TEMPLATE: &str =
    "charts/data_services_charts/data_replication/template_values.yaml";
const OAUTH_VALUES: &str =
    "charts/data_services_charts/data_replication/oauth2proxy_values.yaml";
const OAUTH_VALUES_TEMPLATE: &str =
    "charts/data_services_charts/data_replication/template_oauth2proxy_values.yaml";
const PSQL_VALUES: &str =
    "charts/data_services_charts/data_replication/postgresql_values.yaml";
const PSQL_VALUES_TEMPLATE: &str =
    "charts/data_services_charts/data_replication/template_postgresql_values.yaml";

pub struct Opts {
    pub chart_version: String,
    pub app_version: Option<String>,
    pub oauth_chart_version: Option<String>,
    pub namespace: String,
    /// Warehouse the replication lands in; falls back to the tenant's CI
    /// variable in the vault
    pub destination_type: Option<String>,
}

fn psql_context(
    tenant: &Tenant,
    store: &SecretStore,
    opts: &Opts,
    db_username: &str,
    db_name: &str,
    db_repl_username: &str,
    tls_update: bool,
) -> Context {
    let mut ctx = Context::new();
    ctx.insert("chart_name", PSQL_CHART_REPO_NAME);
    ctx.insert("chart_repo", PSQL_CHART_REPO);
    ctx.insert("chart_version", PSQL_CHART_VERSION);
    ctx.insert("username", db_username);
    ctx.insert("database", db_name);
    ctx.insert("replicationUsername", db_repl_username);
    ctx.insert("namespace", &opts.namespace);
    insert_opt(&mut ctx, "project_slug", &tenant.slug);
    ctx.insert("method", method_name(store));
    ctx.insert("postgresql_tls_update", &tls_update.to_string());
    ctx
}

pub fn plan(tenant: &Tenant, store: &SecretStore, opts: &Opts) -> Result<Deployment> {
    let db_username = store.get("username", "/data-replication/database-secrets/")?;
    let db_name = store.get("database", "/data-replication/database-secrets/")?;
    let db_repl_username =
        store.get("replicationUsername", "/data-replication/database-secrets/")?;
    let destination = match &opts.destination_type {
        Some(d) => d.clone(),
        None => store.get(
            "DATA_WAREHOUSE_PLATFORM",
            "/data-cicd-workflows/customer-cicd-variables/",
        )?,
    };

    let oauth_chart_version = opts
        .oauth_chart_version
        .clone()
        .unwrap_or_else(|| OAUTH_CHART_VERSION_DEFAULT.to_string());
    let root = tenant.root_domain();
    let ingress_host = tenant.ingress("airbyte");
    let oidc = tenant.oidc();
    let sa = tenant.service_account("data-replication");
    let base_api_url = format!(
        "http://data-replication-airbyte-server-svc.{}.svc.cluster.local:8001/api/public",
        opts.namespace
    );
    let base_webapp_url = format!(
        "http://data-replication-airbyte-webapp-svc.{}.svc.cluster.local",
        opts.namespace
    );

    let mut actions = Vec::new();

    // local development only: an in-namespace postgres, deployed twice to
    // flip TLS on once the cluster certificates exist
    if LOCAL_POSTGRESQL {
        for tls_update in &[false, true] {
            let ctx = psql_context(
                tenant,
                store,
                opts,
                &db_username,
                &db_name,
                &db_repl_username,
                *tls_update,
            );
            actions.push(Action::Release(
                ReleaseStep::new(
                    "data-replication-db-psql",
                    ChartRef::new(
                        PSQL_CHART_REPO_NAME,
                        PSQL_CHART_REPO,
                        PSQL_CHART_NAME,
                        PSQL_CHART_VERSION,
                    ),
                    &opts.namespace,
                    PSQL_VALUES,
                )
                .with_render(RenderSpec::new(PSQL_VALUES_TEMPLATE, PSQL_VALUES, ctx))
                .with_wait(PodWait::new(
                    "app.kubernetes.io/instance=data-replication-db-psql",
                )),
            ));
        }
    }

    let mut oauth = Context::new();
    oauth.insert("chart_name", OAUTH_CHART_REPO_NAME);
    oauth.insert("chart_repo", OAUTH_CHART_REPO);
    oauth.insert("chart_version", &oauth_chart_version);
    oauth.insert("oauth_auth_url", &oidc.auth_url());
    oauth.insert("oauth_realm_url", &oidc.realm_url());
    oauth.insert("oauth_certs_url", &oidc.certs_url());
    oauth.insert("oauth_token_url", &oidc.token_url());
    oauth.insert(
        "oauth_callback_url",
        &format!("https://{}/oauth2/callback", ingress_host),
    );
    oauth.insert("customer_root_domain", &root);
    oauth.insert("ingress_host", &ingress_host);
    insert_opt(&mut oauth, "project_slug", &tenant.slug);
    oauth.insert("namespace", &opts.namespace);
    oauth.insert("data_services_admin_email", &format!("admin@{}", root));
    oauth.insert("customer", &tenant.customer);
    insert_opt(&mut oauth, "data_replication_k8s_sa", &sa);
    oauth.insert("data_replication_service_base_api_url", &base_api_url);
    oauth.insert("data_replication_service_base_webapp_url", &base_webapp_url);
    oauth.insert("data_replication_default_destination_type", &destination);
    oauth.insert("gcp_project_region", &tenant.gcp_region());
    insert_opt(&mut oauth, "gcp_project_id", &tenant.project_id);
    oauth.insert("cloud_provider", &tenant.cloud_provider.to_string());
    oauth.insert("method", method_name(store));
    oauth.insert("local_postgresql", &LOCAL_POSTGRESQL.to_string());

    let mut values = Context::new();
    values.insert("chart_name", CHART_REPO_NAME);
    values.insert("chart_repo", CHART_REPO);
    values.insert("chart_version", &opts.chart_version);
    insert_opt(&mut values, "data_replication_k8s_sa", &sa);
    values.insert("username", &db_username);
    values.insert("database", &db_name);
    insert_opt(&mut values, "app_version", &opts.app_version);
    insert_opt(&mut values, "project_slug", &tenant.slug);
    values.insert("namespace", &opts.namespace);
    values.insert("cloud_provider", &tenant.cloud_provider.to_string());
    values.insert("method", method_name(store));
    values.insert("customer", &tenant.customer);
    values.insert("local_postgresql", &LOCAL_POSTGRESQL.to_string());
    values.insert("data_replication_default_destination_type", &destination);
    values.insert("gcp_project_region", &tenant.gcp_region());
    insert_opt(&mut values, "gcp_project_id", &tenant.project_id);

    actions.push(Action::Release(
        ReleaseStep::new(
            "data-replication-oauth",
            ChartRef::new(
                OAUTH_CHART_REPO_NAME,
                OAUTH_CHART_REPO,
                OAUTH_CHART_NAME,
                &oauth_chart_version,
            ),
            &opts.namespace,
            OAUTH_VALUES,
        )
        .with_render(RenderSpec::new(OAUTH_VALUES_TEMPLATE, OAUTH_VALUES, oauth))
        .with_timeout("30m"),
    ));
    actions.push(Action::Release(
        ReleaseStep::new(
            "data-replication",
            ChartRef::new(CHART_REPO_NAME, CHART_REPO, CHART_NAME, &opts.chart_version),
            &opts.namespace,
            VALUES,
        )
        .with_render(RenderSpec::new(VALUES_TEMPLATE, VALUES, values))
        .with_timeout("30m"),
    ));
    actions.push(Action::WaitPods {
        wait: PodWait::new("fastbi=data-replication"),
        namespace: opts.namespace.clone(),
    });
    actions.push(Action::WaitPods {
        wait: PodWait::new("app=oauth2-proxy"),
        namespace: opts.namespace.clone(),
    });

    let mut chart_names = BTreeMap::new();
    chart_names.insert("data_replication".to_string(), CHART_NAME.to_string());
    chart_names.insert(
        "data_replication_oauth".to_string(),
        OAUTH_CHART_NAME.to_string(),
    );
    let mut chart_versions = BTreeMap::new();
    chart_versions.insert("data_replication".to_string(), opts.chart_version.clone());
    chart_versions.insert("data_replication_oauth".to_string(), oauth_chart_version);
    let mut app_names = BTreeMap::new();
    app_names.insert("data_replication".to_string(), "airbyte".to_string());
    app_names.insert(
        "data_replication_oauth".to_string(),
        "oauth2-proxy".to_string(),
    );

    Ok(Deployment {
        service: "Platform Data Replication",
        environment: DeployEnvironment::DataServices,
        actions,
        record: RecordSpec {
            deployment_name: "data-replication".into(),
            chart_name: RecordValue::Many(chart_names),
            chart_version: RecordValue::Many(chart_versions),
            app_name: RecordValue::Many(app_names),
            versions: RecordVersions::Map(vec![
                (
                    "data_replication".to_string(),
                    VersionSource::Release {
                        release: "data-replication".into(),
                        namespace: opts.namespace.clone(),
                    },
                ),
                (
                    "data_replication_oauth".to_string(),
                    VersionSource::Release {
                        release: "data-replication-oauth".into(),
                        namespace: opts.namespace.clone(),
                    },
                ),
            ]),
        },
    })
}
