//! Data modeling IDE: jupyterhub behind the tenant realm.

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions, VersionSource};
use crate::release::{ChartRef, PodWait, ReleaseStep, RenderSpec};
use crate::services::{insert_opt, method_name, psql_host, LOCAL_POSTGRESQL};
use crate::{DeployEnvironment, RecordValue, Result, SecretStore, Tenant};

const CHART_REPO_NAME: &str = "jupyterhub";
const CHART_REPO: &str = "https://jupyterhub.github.io/helm-chart/";
const CHART_NAME: &str = "jupyterhub/jupyterhub";

const PSQL_CHART_REPO_NAME: &str = "bitnami";
const PSQL_CHART_REPO: &str = "https://charts.bitnami.com/bitnami";
const PSQL_CHART_NAME: &str = "oci://registry-1.docker.io/bitnamicharts/postgresql";
const PSQL_CHART_VERSION: &str = "16.6.7";

const APP_NAME: &str = "4fastbi/data-modeling-ide-core";

const VALUES: &str = "charts/data_services_charts/data_modeling/values.yaml";
const VALUES_TEMPLATE: &str = "charts/data_services_charts/data_modeling/template_values.yaml";
const VALUES_EXTRA: &str = "charts/data_services_charts/data_modeling/values_extra.yaml";
const VALUES_EXTRA_TEMPLATE: &str =
    "charts/data_services_charts/data_modeling/template_extra_values.yaml";
const PSQL_VALUES: &str = "charts/data_services_charts/data_modeling/postgresql_values.yaml";
const PSQL_VALUES_TEMPLATE: &str =
    "charts/data_services_charts/data_modeling/template_postgresql_values.yaml";

const LOCAL_DB_HOST: &str = "data-modeling-db-psql.data-modeling.svc.cluster.local";

pub struct Opts {
    pub chart_version: String,
    pub app_version: Option<String>,
    pub namespace: String,
}

pub fn plan(tenant: &Tenant, store: &SecretStore, opts: &Opts) -> Result<Deployment> {
    let oauth_client_id = store.get("client_id", "/data-modeling/sso-clients-secrets/")?;
    let oauth_client_secret = store.get("client_secret", "/data-modeling/sso-clients-secrets/")?;
    let oauth_client_secret_token =
        store.get("secret_token", "/data-modeling/sso-clients-secrets/")?;
    let db_username = store.get("username", "/data-modeling/database-secrets/")?;
    let db_name = store.get("database", "/data-modeling/database-secrets/")?;
    let db_repl_username =
        store.get("replicationUsername", "/data-modeling/database-secrets/")?;
    let db_password = store.get("password", "/data-modeling/database-secrets/")?;

    let app_version = opts
        .app_version
        .clone()
        .unwrap_or_else(|| "latest".to_string());
    let root = tenant.root_domain();
    let ingress_host = tenant.ingress("ide");
    let oidc = tenant.oidc();
    let db_host = psql_host(LOCAL_DB_HOST);

    let mut actions = Vec::new();

    if LOCAL_POSTGRESQL {
        let mut psql = Context::new();
        psql.insert("chart_name", PSQL_CHART_REPO_NAME);
        psql.insert("chart_repo", PSQL_CHART_REPO);
        psql.insert("chart_version", PSQL_CHART_VERSION);
        psql.insert("username", &db_username);
        psql.insert("database", &db_name);
        psql.insert("replication_username", &db_repl_username);
        psql.insert("namespace", &opts.namespace);
        insert_opt(&mut psql, "project_slug", &tenant.slug);
        psql.insert("method", method_name(store));
        actions.push(Action::Release(
            ReleaseStep::new(
                "data-modeling-hub-db",
                ChartRef::new(
                    PSQL_CHART_REPO_NAME,
                    PSQL_CHART_REPO,
                    PSQL_CHART_NAME,
                    PSQL_CHART_VERSION,
                ),
                &opts.namespace,
                PSQL_VALUES,
            )
            .with_render(RenderSpec::new(PSQL_VALUES_TEMPLATE, PSQL_VALUES, psql))
            .with_wait(PodWait::new(
                "app.kubernetes.io/instance=data-modeling-db-psql",
            )),
        ));
    }

    let mut extra = Context::new();
    extra.insert("chart_name", CHART_REPO_NAME);
    extra.insert("chart_repo", CHART_REPO);
    extra.insert("chart_version", &opts.chart_version);
    extra.insert("namespace", &opts.namespace);
    insert_opt(&mut extra, "project_slug", &tenant.slug);
    extra.insert("method", method_name(store));
    extra.insert("customer", &tenant.customer);
    extra.insert("domain_name", &tenant.domain);
    extra.insert("cloud_provider", &tenant.cloud_provider.to_string());

    let mut values = Context::new();
    values.insert("customer", &tenant.customer);
    values.insert("customer_root_domain", &root);
    values.insert("domain_name", &tenant.domain);
    values.insert("cloud_provider", &tenant.cloud_provider.to_string());
    values.insert("chart_name", CHART_REPO_NAME);
    values.insert("chart_repo", CHART_REPO);
    values.insert("chart_version", &opts.chart_version);
    values.insert("oauth_client_id", &oauth_client_id);
    values.insert("oauth_client_secret", &oauth_client_secret);
    values.insert(
        "oauth_callback_url",
        &format!("https://{}/hub/oauth_callback", ingress_host),
    );
    values.insert("oauth_auth_url", &oidc.auth_url());
    values.insert("oauth_token_url", &oidc.token_url());
    values.insert("oauth_userinfo_url", &oidc.userinfo_url());
    values.insert("oauth_client_secret_token", &oauth_client_secret_token);
    values.insert("data_modeling_psql_username", &db_username);
    values.insert("data_modeling_psql_database", &db_name);
    values.insert("data_modeling_psql_password", &db_password);
    values.insert("data_modeling_psql_host", &db_host);
    values.insert("data_modeling_psql_port", "5432");
    values.insert("data_modeling_app_name", APP_NAME);
    values.insert("data_modeling_app_version", &app_version);
    values.insert(
        "git_user_mail",
        &format!("root-fastbi-ide-admin@{}", root),
    );
    values.insert("ingress_host", &ingress_host);

    actions.push(Action::Render(RenderSpec::new(
        VALUES_EXTRA_TEMPLATE,
        VALUES_EXTRA,
        extra,
    )));
    actions.push(Action::Apply {
        manifest: VALUES_EXTRA.into(),
        namespace: opts.namespace.clone(),
    });
    actions.push(Action::Release(
        ReleaseStep::new(
            "data-modeling-hub",
            ChartRef::new(CHART_REPO_NAME, CHART_REPO, CHART_NAME, &opts.chart_version),
            &opts.namespace,
            VALUES,
        )
        .with_render(RenderSpec::new(VALUES_TEMPLATE, VALUES, values)),
    ));
    actions.push(Action::WaitPods {
        wait: PodWait::new("fastbi=data-modeling"),
        namespace: opts.namespace.clone(),
    });

    Ok(Deployment {
        service: "Platform Data Modeling",
        environment: DeployEnvironment::DataServices,
        actions,
        record: RecordSpec {
            deployment_name: "data-modeling-hub".into(),
            chart_name: RecordValue::One(CHART_NAME.into()),
            chart_version: opts.chart_version.clone().into(),
            app_name: APP_NAME.into(),
            versions: RecordVersions::Map(vec![(
                "data_modeling".to_string(),
                VersionSource::Release {
                    release: "data-modeling-hub".into(),
                    namespace: opts.namespace.clone(),
                },
            )]),
        },
    })
}
