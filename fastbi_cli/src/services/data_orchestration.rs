//! Data orchestration: airflow, its connection secrets and the dbt server
//! prerequisites.

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions, VersionSource};
use crate::release::{ChartRef, PodWait, ReleaseStep, RenderSpec};
use crate::services::{
    insert_opt, method_name, psql_host, LOCAL_POSTGRESQL, RAW_CHART_NAME, RAW_CHART_REPO,
    RAW_CHART_REPO_NAME, RAW_CHART_VERSION,
};
use crate::{CloudProvider, DeployEnvironment, RecordValue, Result, SecretStore, Tenant};

const CHART_REPO_NAME: &str = "apache-airflow";
const CHART_REPO: &str = "https://airflow.apache.org";
const CHART_NAME: &str = "apache-airflow/airflow";

const VALUES: &str = "charts/data_services_charts/data_orchestration/values.yaml";
const VALUES_TEMPLATE: &str =
    "charts/data_services_charts/data_orchestration/template_values.yaml";
const VALUES_EXTRA: &str = "charts/data_services_charts/data_orchestration/values_extra.yaml";
const VALUES_EXTRA_TEMPLATE: &str =
    "charts/data_services_charts/data_orchestration/template_extra_values.yaml";

const DBT_SERVER_VALUES: &str = "charts/data_services_charts/data_dbt_server/values.yaml";
const DBT_SERVER_VALUES_TEMPLATE: &str =
    "charts/data_services_charts/data_dbt_server/template_values.yaml";
const DBT_SERVER_NAMESPACE: &str = "dbt-server";

const LOCAL_DB_HOST: &str = "data-orchestration-db-psql.data-orchestration.svc.cluster.local";

pub struct Opts {
    pub chart_version: String,
    /// Platform image version recorded next to the chart's app version
    pub app_version: Option<String>,
    pub namespace: String,
}

// dbt impersonates a plain per-project service account, not the workload
// identity pattern
fn dbt_service_account(tenant: &Tenant) -> Option<String> {
    match (tenant.cloud_provider, &tenant.project_id) {
        (CloudProvider::Gcp, Some(project)) => {
            Some(format!("dbt-sa@{}.iam.gserviceaccount.com", project))
        }
        _ => None,
    }
}

pub fn plan(tenant: &Tenant, store: &SecretStore, opts: &Opts) -> Result<Deployment> {
    let log_bucket = store.get("bucket", "/data-orchestration/buckets-secrets/")?;
    let dag_repo_https = store.get(
        "data-orchestration-dag_repo_url",
        "/data-orchestration/git-secrets/",
    )?;
    let default_git_branch = store.get(
        "GIT_BRANCH_MAIN",
        "/data-cicd-workflows/customer-cicd-variables/",
    )?;
    let db_username = store.get("username", "/data-orchestration/database-secrets/")?;
    let db_password = store.get("password", "/data-orchestration/database-secrets/")?;
    let db_name = store.get("database", "/data-orchestration/database-secrets/")?;
    let redis_password = store.get("password", "/data-orchestration/cache-secrets/")?;

    let dag_repo_ssh = dag_repo_https.replace("https://", "git@");
    let remote_log_folder = format!("s3://{}/airflow/logs/", log_bucket);
    let db_connection = format!(
        "postgresql://{}:{}@{}:5432/{}?sslmode=prefer",
        db_username,
        db_password,
        psql_host(LOCAL_DB_HOST),
        db_name
    );
    let redis_connection = format!(
        "redis://:{}@data-orchestration-redis.{}.svc.cluster.local:6379/0",
        redis_password, opts.namespace
    );

    let root = tenant.root_domain();
    let oidc = tenant.oidc();
    let sa = tenant.service_account("data-orchestration");
    let dbt_sa = dbt_service_account(tenant);

    let mut values = Context::new();
    values.insert("chart_name", CHART_REPO_NAME);
    values.insert("chart_repo", CHART_REPO);
    values.insert("chart_version", &opts.chart_version);
    insert_opt(
        &mut values,
        "data_orchestration_app_version",
        &opts.app_version,
    );
    values.insert("ingress_host", &tenant.ingress("airflow"));
    insert_opt(&mut values, "data_orchestration_k8s_sa", &sa);
    insert_opt(&mut values, "data_orchestration_dbt_server_k8s_sa", &dbt_sa);
    values.insert("oauth_realm_url", &oidc.realm_url());
    insert_opt(&mut values, "project_slug", &tenant.slug);
    values.insert("namespace", &opts.namespace);
    values.insert("remote_base_log_folder", &remote_log_folder);
    values.insert("customer_dags_git_repo", &dag_repo_ssh);
    values.insert(
        "data_services_admin_email",
        &format!("root-fastbi-airflow-admin@{}", root),
    );
    values.insert("data_orchestration_basic_user_name", "Administrator");
    values.insert("data_orchestration_basic_user_last_name", "Data-Orchestrator");
    values.insert("data_orchestration_basic_user_role", "Admin");
    values.insert("cloud_provider", &tenant.cloud_provider.to_string());
    values.insert("method", method_name(store));
    values.insert("customer", &tenant.customer);
    values.insert("local_postgresql", &LOCAL_POSTGRESQL.to_string());
    values.insert("default_git_branch", &default_git_branch);

    // connection strings ship base64 wrapped inside opaque secrets
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
    insert_opt(&mut extra, "data_orchestration_dbt_server_k8s_sa", &dbt_sa);
    extra.insert(
        "airflow_database_metadata_connection",
        &base64::encode(&db_connection),
    );
    extra.insert(
        "airflow_redis_metadata_connection",
        &base64::encode(&redis_connection),
    );

    let mut dbt_server = Context::new();
    dbt_server.insert("chart_name", RAW_CHART_REPO_NAME);
    dbt_server.insert("chart_repo", RAW_CHART_REPO);
    dbt_server.insert("chart_version", RAW_CHART_VERSION);
    dbt_server.insert("namespace", DBT_SERVER_NAMESPACE);
    insert_opt(&mut dbt_server, "project_slug", &tenant.slug);
    dbt_server.insert("method", method_name(store));
    dbt_server.insert("customer", &tenant.customer);
    dbt_server.insert("domain_name", &tenant.domain);
    dbt_server.insert("cloud_provider", &tenant.cloud_provider.to_string());

    let actions = vec![
        Action::Render(RenderSpec::new(VALUES_EXTRA_TEMPLATE, VALUES_EXTRA, extra)),
        Action::Apply {
            manifest: VALUES_EXTRA.into(),
            namespace: opts.namespace.clone(),
        },
        Action::Release(
            ReleaseStep::new(
                "data-orchestration",
                ChartRef::new(CHART_REPO_NAME, CHART_REPO, CHART_NAME, &opts.chart_version),
                &opts.namespace,
                VALUES,
            )
            .with_render(RenderSpec::new(VALUES_TEMPLATE, VALUES, values))
            .with_timeout("30m"),
        ),
        Action::WaitPods {
            wait: PodWait::new("fastbi=data-orchestration"),
            namespace: opts.namespace.clone(),
        },
        Action::Release(
            ReleaseStep::new(
                "data-dbt-server-prerequisites",
                ChartRef::new(
                    RAW_CHART_REPO_NAME,
                    RAW_CHART_REPO,
                    RAW_CHART_NAME,
                    RAW_CHART_VERSION,
                ),
                DBT_SERVER_NAMESPACE,
                DBT_SERVER_VALUES,
            )
            .with_render(RenderSpec::new(
                DBT_SERVER_VALUES_TEMPLATE,
                DBT_SERVER_VALUES,
                dbt_server,
            )),
        ),
    ];

    let platform_version = match &opts.app_version {
        Some(v) => VersionSource::Fixed(v.clone()),
        None => VersionSource::Absent,
    };
    Ok(Deployment {
        service: "Platform Data Orchestration",
        environment: DeployEnvironment::DataServices,
        actions,
        record: RecordSpec {
            deployment_name: "data-orchestration".into(),
            chart_name: RecordValue::One(CHART_NAME.into()),
            chart_version: opts.chart_version.clone().into(),
            app_name: "airflow".into(),
            versions: RecordVersions::Map(vec![
                (
                    "data_orchestration".to_string(),
                    VersionSource::Release {
                        release: "data-orchestration".into(),
                        namespace: opts.namespace.clone(),
                    },
                ),
                ("fastbi_data_orchestration".to_string(), platform_version),
            ]),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::{plan, Opts};
    use crate::orchestrator::Action;
    use crate::services::{testutil, GLOBAL_PSQL_HOST};
    use crate::CloudProvider;

    fn vault() -> serde_json::Value {
        serde_json::json!({
            "data-orchestration": {
                "buckets-secrets": { "bucket": "acme-airflow-logs" },
                "git-secrets": {
                    "data-orchestration-dag_repo_url": "https://gitlab.fast.bi/acme/dags.git" },
                "database-secrets": {
                    "username": "airflow", "password": "pw", "database": "airflow-db" },
                "cache-secrets": { "password": "redis-pw" }
            },
            "data-cicd-workflows": { "customer-cicd-variables": { "GIT_BRANCH_MAIN": "master" } }
        })
    }

    fn opts() -> Opts {
        Opts {
            chart_version: "1.11.0".into(),
            app_version: Some("v2.1.0".into()),
            namespace: "data-orchestration".into(),
        }
    }

    #[test]
    fn secrets_manifest_lands_before_airflow() {
        let (_d, store) = testutil::store(vault());
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let plan = plan(&tenant, &store, &opts()).unwrap();
        assert_eq!(plan.actions.len(), 5);
        assert!(matches!(plan.actions[0], Action::Render(_)));
        assert!(matches!(plan.actions[1], Action::Apply { .. }));
        match &plan.actions[2] {
            Action::Release(s) => {
                assert_eq!(s.name, "data-orchestration");
                assert_eq!(s.timeout.as_deref(), Some("30m"));
            }
            _ => panic!("expected the airflow release"),
        }
        match &plan.actions[4] {
            Action::Release(s) => {
                assert_eq!(s.name, "data-dbt-server-prerequisites");
                assert_eq!(s.namespace, "dbt-server");
            }
            _ => panic!("expected the dbt server release"),
        }
    }

    #[test]
    fn derived_connection_material() {
        let (_d, store) = testutil::store(vault());
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let plan = plan(&tenant, &store, &opts()).unwrap();
        let extra = match &plan.actions[0] {
            Action::Render(r) => r.context.clone().into_json(),
            _ => panic!("expected the extra render"),
        };
        let db = base64::decode(
            extra["airflow_database_metadata_connection"].as_str().unwrap(),
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(db).unwrap(),
            format!(
                "postgresql://airflow:pw@{}:5432/airflow-db?sslmode=prefer",
                GLOBAL_PSQL_HOST
            )
        );

        match &plan.actions[2] {
            Action::Release(s) => {
                let values = s.renders[0].context.clone().into_json();
                assert_eq!(
                    values["customer_dags_git_repo"],
                    "git@gitlab.fast.bi/acme/dags.git"
                );
                assert_eq!(
                    values["remote_base_log_folder"],
                    "s3://acme-airflow-logs/airflow/logs/"
                );
                assert_eq!(
                    values["data_orchestration_dbt_server_k8s_sa"],
                    "dbt-sa@fast-bi-acme.iam.gserviceaccount.com"
                );
                assert_eq!(values["default_git_branch"], "master");
            }
            _ => panic!("expected the airflow release"),
        }
    }
}
