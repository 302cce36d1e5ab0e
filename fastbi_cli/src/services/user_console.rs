//! Tenant user console: the platform UI wired to every other service.

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions, VersionSource};
use crate::release::{ChartRef, PodWait, ReleaseStep, RenderSpec};
use crate::services::{
    insert_opt, method_name, psql_host, LOCAL_POSTGRESQL, RAW_CHART_NAME, RAW_CHART_REPO,
    RAW_CHART_REPO_NAME,
};
use crate::{DeployEnvironment, RecordValue, Result, SecretStore, Tenant};

const VALUES: &str = "charts/data_services_charts/user_console/values.yaml";
const VALUES_TEMPLATE: &str = "charts/data_services_charts/user_console/template_values.yaml";

const WEB_CORE_IMAGE: &str = "4fastbi/data-platform-ui-core";
const INIT_CORE_IMAGE: &str = "4fastbi/data-platform-init-core";
const EMBEDDED_GRAFANA_IMAGE: &str = "grafana/grafana:11.6.2";

const LOCAL_DB_HOST: &str =
    "data-platform-user-console-psql.user-console.svc.cluster.local";
const REPLICATION_LOCAL_DB: &str = "data-replication-db-psql.data-replication.svc.cluster.local";
const ORCHESTRATION_LOCAL_DB: &str =
    "data-orchestration-db-psql.data-orchestration.svc.cluster.local";

pub struct Opts {
    pub chart_version: String,
    pub web_core_image_version: String,
    pub init_core_image_version: String,
    pub bi_system: Option<String>,
    pub destination_type: Option<String>,
    pub fast_bi_statistics_id: Option<String>,
    pub namespace: String,
}

pub fn plan(tenant: &Tenant, store: &SecretStore, opts: &Opts) -> Result<Deployment> {
    let data_model_repo_url = store.get(
        "data_repo_url",
        "/data-platform-runner/git_provider_repo_urls",
    )?;
    let dag_repo_url = store.get(
        "dag_repo_url",
        "/data-platform-runner/git_provider_repo_urls",
    )?;
    let repl_db_database = store.get("database", "/data-replication/database-secrets")?;
    let repl_db_password = store.get("password", "/data-replication/database-secrets")?;
    let repl_db_username = store.get("username", "/data-replication/database-secrets")?;
    let orch_db_database = store.get("database", "/data-orchestration/database-secrets")?;
    let orch_db_password = store.get("password", "/data-orchestration/database-secrets")?;
    let orch_db_username = store.get("username", "/data-orchestration/database-secrets")?;
    let console_db_username = store.get("username", "/user-console/database-secrets")?;
    let console_db_database = store.get("database", "/user-console/database-secrets")?;
    let console_db_repl_username =
        store.get("replicationUsername", "/user-console/database-secrets")?;
    let sso_client_id = store.get("client_id", "/user-console/sso-clients-secrets")?;
    let sso_client_secret = store.get("client_secret", "/user-console/sso-clients-secrets")?;

    let bi_system = match &opts.bi_system {
        Some(b) => b.clone(),
        None => store.get(
            "DATA_ANALYSIS_PLATFORM",
            "/data-cicd-workflows/customer-cicd-variables",
        )?,
    };
    let destination = match &opts.destination_type {
        Some(d) => d.clone(),
        None => store.get(
            "DATA_WAREHOUSE_PLATFORM",
            "/data-cicd-workflows/customer-cicd-variables",
        )?,
    };
    // the psql chart consumes the replication user when deployed locally
    let _ = console_db_repl_username;

    // warehouse identity is only derived for bigquery tenants
    let (gcp_project_id, bq_project_id, gcp_sa_impersonate_email) = match destination.as_str() {
        "bigquery" => {
            let bq = match store.get("BQ_PROJECT_ID", "/user-console/root-secrets") {
                Ok(p) => Some(p),
                Err(_) => tenant.project_id.clone(),
            };
            let sa = bq
                .as_ref()
                .map(|p| format!("dbt-sa@{}.iam.gserviceaccount.com", p));
            (bq.clone(), bq, sa)
        }
        "snowflake" | "redshift" => (None, None, None),
        other => bail!("Unsupported data platform warehouse: {}", other),
    };

    let root = tenant.root_domain();
    let ingress_host = root.clone();
    let oidc = tenant.oidc();
    let app_version = format!(
        "FastBI-{}-FastBI-API-{}",
        opts.web_core_image_version, opts.init_core_image_version
    );
    let console_db_host = psql_host(LOCAL_DB_HOST);
    let repl_db_host = psql_host(REPLICATION_LOCAL_DB);
    let orch_db_host = psql_host(ORCHESTRATION_LOCAL_DB);

    let airbyte_svc = "data-replication-airbyte-webapp-svc.data-replication.svc.cluster.local";
    let bi_endpoint = if bi_system == "superset" {
        format!("https://bi.{}/login/FastBI-SSO?next=", root)
    } else {
        format!("https://bi.{}", root)
    };

    let mut values = Context::new();
    values.insert("customer", &tenant.customer);
    values.insert("domain", &tenant.domain);
    values.insert("chart_name", RAW_CHART_NAME);
    values.insert("chart_repo", RAW_CHART_REPO);
    values.insert("chart_version", &opts.chart_version);
    values.insert("namespace", &opts.namespace);
    values.insert("cloud_provider", &tenant.cloud_provider.to_string());
    values.insert("data_platform_user_console_app_name", "data-platform-user-console");
    values.insert("data_platform_user_console_app_version", &app_version);
    values.insert("method", method_name(store));
    values.insert("local_postgresql", &LOCAL_POSTGRESQL.to_string());
    insert_opt(&mut values, "project_slug", &tenant.slug);
    values.insert("data_platform_warehouse", &destination);
    values.insert("bi_system", &bi_system);
    insert_opt(&mut values, "bq_project_id", &bq_project_id);
    insert_opt(&mut values, "gcp_project_id", &gcp_project_id);
    insert_opt(
        &mut values,
        "gcp_sa_impersonate_email",
        &gcp_sa_impersonate_email,
    );
    values.insert("airbyte_local_k8s_svc_url", airbyte_svc);
    values.insert("airbyte_api_link", &format!("http://{}", airbyte_svc));
    values.insert(
        "data_replication_endpoint",
        &format!("https://airbyte.{}/oauth2/start", root),
    );
    values.insert(
        "data_orchestration_endpoint",
        &format!("https://airflow.{}/login/FastBI-SSO?next=/", root),
    );
    values.insert("data_model_repo_url", &data_model_repo_url);
    values.insert(
        "data_catalog_endpoint",
        &format!("https://data-catalog.{}/", root),
    );
    values.insert(
        "data_quality_endpoint",
        &format!("https://data-quality.{}/", root),
    );
    values.insert(
        "data_governance_endpoint",
        &format!("https://datahub.{}/", root),
    );
    values.insert("ide_endpoint", &format!("https://ide.{}/", root));
    values.insert("bi_endpoint", &bi_endpoint);
    values.insert("main_endpoint", &format!("https://{}", root));
    values.insert(
        "monitoring_endpoint",
        &format!("https://monitoring.{}", root),
    );
    values.insert("s3_link", &format!("https://minio.{}", root));
    values.insert("sso_console_link", &format!("https://login.{}/", root));
    values.insert("wiki_fastbi_endpoint", "https://wiki.fast.bi/");
    values.insert(
        "sso_idp_platform_admin_endpoint",
        &format!("https://login.{}/admin/{}/console/", root, tenant.customer),
    );
    values.insert(
        "sso_idp_platform_users_endpoint",
        &format!("https://login.{}/realms/{}/account", root, tenant.customer),
    );
    values.insert("dbt_project_archive_bucket", "dbt-project-archive");
    values.insert("bucket_s3_link", &format!("s3.{}", root));
    values.insert(
        "data_orchestration_internal_k8s_web_svc",
        "http://data-orchestration-webserver.data-orchestration.svc.cluster.local",
    );
    values.insert("data_orchestration_repo_url", &dag_repo_url);
    values.insert(
        "data_dcdq_metacollect_internal_k8s_web_svc",
        "http://data-dcdq-metacollect.data-dcdq-metacollect.svc.cluster.local",
    );
    values.insert(
        "data_workflows_endpoint",
        &format!(
            "https://workflows.{root}/oauth2/redirect?redirect=https://workflows.{root}/workflows",
            root = root
        ),
    );
    values.insert("sso_idp_platform_realm_endoint", &oidc.realm_url());
    values.insert("user_console_sso_idp_platform_client_id", &sso_client_id);
    values.insert(
        "user_console_sso_idp_platform_client_secret",
        &sso_client_secret,
    );
    values.insert("ingress_host", &ingress_host);
    values.insert("embeded_grafana_image_version", EMBEDDED_GRAFANA_IMAGE);
    values.insert("tsb_dbt_init_core_image", INIT_CORE_IMAGE);
    values.insert(
        "tsb_dbt_init_core_image_version",
        &opts.init_core_image_version,
    );
    values.insert("tsb_fastbi_web_core_image", WEB_CORE_IMAGE);
    values.insert(
        "tsb_fastbi_web_core_image_version",
        &opts.web_core_image_version,
    );
    values.insert("mail_default_sender", &format!("no-reply@{}", root));
    values.insert("user_console_db_host", &console_db_host);
    values.insert("user_console_db_port", "5432");
    values.insert("data_replication_db_database", &repl_db_database);
    values.insert("data_replication_db_password", &repl_db_password);
    values.insert("data_replication_db_username", &repl_db_username);
    values.insert("data_replication_db_host", &repl_db_host);
    values.insert("data_replication_db_port", "5432");
    values.insert("data_orchestration_db_database", &orch_db_database);
    values.insert("data_orchestration_db_password", &orch_db_password);
    values.insert("data_orchestration_db_username", &orch_db_username);
    values.insert("data_orchestration_db_host", &orch_db_host);
    values.insert("data_orchestration_db_port", "5432");
    insert_opt(
        &mut values,
        "fast_bi_statistics_id",
        &opts.fast_bi_statistics_id,
    );

    let actions = vec![
        Action::Release(
            ReleaseStep::new(
                "data-platform-user-console",
                ChartRef::new(
                    RAW_CHART_REPO_NAME,
                    RAW_CHART_REPO,
                    RAW_CHART_NAME,
                    &opts.chart_version,
                ),
                &opts.namespace,
                VALUES,
            )
            .with_render(RenderSpec::new(VALUES_TEMPLATE, VALUES, values)),
        ),
        Action::WaitPods {
            wait: PodWait::new("fastbi=data-platform-user-console"),
            namespace: opts.namespace.clone(),
        },
    ];

    let mut versions: Vec<(String, VersionSource)> = Vec::new();
    versions.push((
        "data_platform_user_console_deployment".to_string(),
        VersionSource::Release {
            release: "data-platform-user-console".into(),
            namespace: opts.namespace.clone(),
        },
    ));
    versions.push((
        "data_platform_user_console_core".to_string(),
        VersionSource::Fixed(opts.web_core_image_version.clone()),
    ));
    versions.push((
        "data_platform_user_console_grafana".to_string(),
        VersionSource::Fixed(EMBEDDED_GRAFANA_IMAGE.to_string()),
    ));
    versions.push((
        "data_platform_user_console_api".to_string(),
        VersionSource::Fixed(opts.init_core_image_version.clone()),
    ));

    Ok(Deployment {
        service: "Platform User Console",
        environment: DeployEnvironment::DataServices,
        actions,
        record: RecordSpec {
            deployment_name: "data-platform-user-console".into(),
            chart_name: RecordValue::One(RAW_CHART_NAME.into()),
            chart_version: opts.chart_version.clone().into(),
            app_name: "raw".into(),
            versions: RecordVersions::Map(versions),
        },
    })
}
