//! Data analysis hub: one of four BI systems plus its glue resources.

use std::str::FromStr;

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions, VersionSource};
use crate::release::{ChartRef, PodWait, ReleaseStep, RenderSpec};
use crate::services::{
    insert_opt, method_name, psql_host, LOCAL_POSTGRESQL, RAW_CHART_NAME, RAW_CHART_REPO,
    RAW_CHART_REPO_NAME, RAW_CHART_VERSION,
};
use crate::{DeployEnvironment, RecordValue, Result, SecretStore, Tenant};

const PSQL_CHART_REPO_NAME: &str = "bitnami";
const PSQL_CHART_REPO: &str = "https://charts.bitnami.com/bitnami";
const PSQL_CHART_NAME: &str = "bitnami/postgresql";
const PSQL_CHART_VERSION: &str = "16.6.2";

const EXTRA_VALUES: &str = "charts/data_services_charts/data_analysis/values.yaml";
const EXTRA_VALUES_TEMPLATE: &str =
    "charts/data_services_charts/data_analysis/template_values.yaml";
const PSQL_VALUES: &str = "charts/data_services_charts/data_analysis/postgresql_values.yaml";
const PSQL_VALUES_TEMPLATE: &str =
    "charts/data_services_charts/data_analysis/template_postgresql_values.yaml";

const LOCAL_DB_HOST: &str = "data-analysis-bi-psql.data-analysis.svc.cluster.local";
const S3_ENDPOINT: &str = "http://minio.minio.svc.cluster.local";

/// The supported BI backends
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BiSystem {
    Superset,
    Lightdash,
    Metabase,
    Looker,
}

impl FromStr for BiSystem {
    type Err = failure::Error;

    fn from_str(s: &str) -> Result<BiSystem> {
        match s {
            "superset" => Ok(BiSystem::Superset),
            "lightdash" => Ok(BiSystem::Lightdash),
            "metabase" => Ok(BiSystem::Metabase),
            "looker" => Ok(BiSystem::Looker),
            _ => bail!("Unsupported BI system: {}", s),
        }
    }
}

impl BiSystem {
    pub fn name(&self) -> &'static str {
        match self {
            BiSystem::Superset => "superset",
            BiSystem::Lightdash => "lightdash",
            BiSystem::Metabase => "metabase",
            BiSystem::Looker => "looker",
        }
    }

    fn release(&self) -> &'static str {
        match self {
            BiSystem::Looker => "data-analysis-looker",
            _ => "data-analysis-hub",
        }
    }

    fn chart(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            BiSystem::Superset => (
                "superset",
                "https://apache.github.io/superset",
                "superset/superset",
            ),
            BiSystem::Lightdash => (
                "lightdash",
                "https://lightdash.github.io/helm-charts",
                "lightdash/lightdash",
            ),
            BiSystem::Metabase => (
                "metabase",
                "https://pmint93.github.io/helm-charts",
                "metabase/metabase",
            ),
            BiSystem::Looker => ("looker", "https://looker.github.io/helm-charts", "looker"),
        }
    }

    fn values(&self) -> (String, String) {
        let dir = self.name();
        (
            format!("charts/data_services_charts/data_analysis/{}/values.yaml", dir),
            format!(
                "charts/data_services_charts/data_analysis/{}/template_values.yaml",
                dir
            ),
        )
    }
}

pub struct Opts {
    pub chart_version: String,
    pub app_version: Option<String>,
    pub bi_system: BiSystem,
    pub namespace: String,
}

struct SharedSecrets {
    smtp_host: String,
    smtp_port: String,
    smtp_user: String,
    smtp_password: String,
    redis_password: String,
    psql_username: String,
    psql_password: String,
    psql_database: String,
    psql_repl_username: String,
    cookie_secret: String,
    oauth_client_id: String,
    oauth_client_secret: String,
}

// One context shape for both renders; the extra release passes every
// secret-bearing value as absent and the template branches on emptiness.
#[allow(clippy::too_many_arguments)]
fn analysis_context(
    tenant: &Tenant,
    store: &SecretStore,
    opts: &Opts,
    chart: (&str, &str, &str),
    chart_version: &str,
    secrets: Option<&SharedSecrets>,
    admin_password: Option<&str>,
    jwt_secret: Option<&str>,
    psql_host: &str,
) -> Context {
    let (_, chart_repo, chart_name) = chart;
    let root = tenant.root_domain();
    let oidc = tenant.oidc();
    let app_name = chart_name.split('/').last().unwrap_or(chart_name);

    let mut ctx = Context::new();
    ctx.insert("bi_system", opts.bi_system.name());
    ctx.insert("data_analysis_deployment_name", opts.bi_system.release());
    ctx.insert("data_analysis_app_name", app_name);
    insert_opt(&mut ctx, "data_analysis_app_version", &opts.app_version);
    ctx.insert("namespace", &opts.namespace);
    ctx.insert("customer", &tenant.customer);
    ctx.insert("customer_root_domain", &root);
    ctx.insert("domain_name", &tenant.domain);
    ctx.insert("cloud_provider", &tenant.cloud_provider.to_string());
    ctx.insert("method", method_name(store));
    insert_opt(&mut ctx, "project_slug", &tenant.slug);
    ctx.insert("local_postgresql", &LOCAL_POSTGRESQL.to_string());
    ctx.insert("chart_name", chart_name);
    ctx.insert("chart_repo", chart_repo);
    ctx.insert("chart_version", chart_version);
    ctx.insert("ingress_host", &tenant.ingress("bi"));
    ctx.insert("oauth_real_well_known_url", &oidc.well_known_url());
    ctx.insert("oauth_protocol_url", &oidc.protocol_url());
    ctx.insert("oauth_realm_url", &oidc.realm_url());
    ctx.insert("bi_smtp_mail_from", &format!("noreply@{}", root));
    insert_opt(
        &mut ctx,
        "bi_data_k8s_sa",
        &tenant.service_account("bi-data"),
    );
    ctx.insert("bi_psql_host", psql_host);
    ctx.insert("bi_psql_port", "5432");
    ctx.insert("s3_enpoint", S3_ENDPOINT);

    match secrets {
        Some(s) => {
            ctx.insert("bi_smtp_host", &s.smtp_host);
            ctx.insert("bi_smtp_port", &s.smtp_port);
            ctx.insert("bi_smtp_user", &s.smtp_user);
            ctx.insert("bi_smtp_password", &s.smtp_password);
            ctx.insert("bi_cache_redis_password", &s.redis_password);
            ctx.insert("bi_psql_username", &s.psql_username);
            ctx.insert("bi_psql_database", &s.psql_database);
            ctx.insert("bi_psql_repl_username", &s.psql_repl_username);
            ctx.insert("bi_psql_password", &s.psql_password);
            ctx.insert("bi_cookie_secret", &s.cookie_secret);
            ctx.insert("oauth_client_id", &s.oauth_client_id);
            ctx.insert("oauth_client_secret", &s.oauth_client_secret);
            ctx.insert("oauth_client_secret_token", &s.cookie_secret);
            ctx.insert("bi_basic_user", "root-fastbi-bi-admin");
            ctx.insert("bi_basic_user_name", "Administrator");
            ctx.insert(
                "bi_basic_user_last_name",
                &format!("{}_FastBI", tenant.customer),
            );
            ctx.insert("bi_admin_email", &format!("root-fastbi-bi-admin@{}", root));
            ctx.insert("bi_admin_password", &admin_password.unwrap_or(""));
            ctx.insert("jwt_secret", &jwt_secret.unwrap_or(""));
        }
        None => {
            for key in &[
                "bi_smtp_host",
                "bi_smtp_port",
                "bi_smtp_user",
                "bi_smtp_password",
                "bi_cache_redis_password",
                "bi_psql_username",
                "bi_psql_database",
                "bi_psql_repl_username",
                "bi_psql_password",
                "bi_cookie_secret",
                "oauth_client_id",
                "oauth_client_secret",
                "oauth_client_secret_token",
                "bi_basic_user",
                "bi_basic_user_name",
                "bi_basic_user_last_name",
                "bi_admin_email",
                "bi_admin_password",
                "jwt_secret",
            ] {
                ctx.insert(*key, "");
            }
        }
    }
    insert_opt(&mut ctx, "bi_app_version", &opts.app_version);
    ctx
}

pub fn plan(tenant: &Tenant, store: &SecretStore, opts: &Opts) -> Result<Deployment> {
    let secrets = SharedSecrets {
        smtp_host: store.get("smtp_host", "/data-analysis/smtp-secrets/")?,
        smtp_port: store.get("smtp_port", "/data-analysis/smtp-secrets/")?,
        smtp_user: store.get("smtp_username", "/data-analysis/smtp-secrets/")?,
        smtp_password: store.get("password", "/data-analysis/smtp-secrets/")?,
        redis_password: store.get("password", "/data-analysis/redis-secrets/")?,
        psql_username: store.get("username", "/data-analysis/database-secrets/")?,
        psql_password: store.get("password", "/data-analysis/database-secrets/")?,
        psql_database: store.get("database", "/data-analysis/database-secrets/")?,
        psql_repl_username: store.get("replicationUsername", "/data-analysis/database-secrets/")?,
        cookie_secret: store.get("COOKIE_SECRET", "/data-analysis/sso-clients-secrets/")?,
        oauth_client_id: store.get("CLIENT_ID", "/data-analysis/sso-clients-secrets/")?,
        oauth_client_secret: store.get("CLIENT_SECRET", "/data-analysis/sso-clients-secrets/")?,
    };

    let (admin_password, jwt_secret) = match opts.bi_system {
        BiSystem::Superset => (
            store.get("password", "/data-analysis/superset/root-secrets/")?,
            Some(store.get("SUPERSET_SECRET_KEY", "/data-analysis/superset/root-secrets/")?),
        ),
        BiSystem::Metabase => (
            store.get("METABASE_PASSWORD", "/data-analysis/metabase/root-secrets/")?,
            None,
        ),
        BiSystem::Lightdash => (
            store.get("adminPassword", "/data-analysis/lightdash/root-secrets/")?,
            None,
        ),
        BiSystem::Looker => bail!("Unsupported BI system: looker"),
    };

    let db_host = psql_host(LOCAL_DB_HOST);
    let chart = opts.bi_system.chart();
    let (values_path, values_template) = opts.bi_system.values();

    let mut actions = Vec::new();

    if LOCAL_POSTGRESQL {
        let mut psql = Context::new();
        psql.insert("chart_name", PSQL_CHART_REPO_NAME);
        psql.insert("chart_repo", PSQL_CHART_REPO);
        psql.insert("chart_version", PSQL_CHART_VERSION);
        psql.insert("username", &secrets.psql_username);
        psql.insert("database", &secrets.psql_database);
        psql.insert("replication_username", &secrets.psql_repl_username);
        psql.insert("namespace", &opts.namespace);
        insert_opt(&mut psql, "project_slug", &tenant.slug);
        psql.insert("method", method_name(store));
        actions.push(Action::Release(
            ReleaseStep::new(
                "data-analysis-bi-psql",
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
                "app.kubernetes.io/instance=data-analysis-bi-psql",
            )),
        ));
    }

    // glue resources first, rendered from the same shape with absent values
    let extra_ctx = analysis_context(
        tenant,
        store,
        opts,
        (RAW_CHART_REPO_NAME, RAW_CHART_REPO, RAW_CHART_NAME),
        RAW_CHART_VERSION,
        None,
        None,
        None,
        &db_host,
    );
    actions.push(Action::Release(
        ReleaseStep::new(
            "data-analysis-hub-extra",
            ChartRef::new(
                RAW_CHART_REPO_NAME,
                RAW_CHART_REPO,
                RAW_CHART_NAME,
                RAW_CHART_VERSION,
            ),
            &opts.namespace,
            EXTRA_VALUES,
        )
        .with_render(RenderSpec::new(
            EXTRA_VALUES_TEMPLATE,
            EXTRA_VALUES,
            extra_ctx,
        )),
    ));

    let bi_ctx = analysis_context(
        tenant,
        store,
        opts,
        chart,
        &opts.chart_version,
        Some(&secrets),
        Some(&admin_password),
        jwt_secret.as_deref(),
        &db_host,
    );
    let (repo_name, repo_url, chart_name) = chart;
    actions.push(Action::Release(
        ReleaseStep::new(
            opts.bi_system.release(),
            ChartRef::new(repo_name, repo_url, chart_name, &opts.chart_version),
            &opts.namespace,
            &values_path,
        )
        .with_render(RenderSpec::new(&values_template, &values_path, bi_ctx))
        .with_timeout("30m"),
    ));
    actions.push(Action::WaitPods {
        wait: PodWait::new("fastbi=data-analysis-hub"),
        namespace: opts.namespace.clone(),
    });

    let psql_version = if LOCAL_POSTGRESQL {
        VersionSource::Release {
            release: "data-analysis-bi-psql".into(),
            namespace: opts.namespace.clone(),
        }
    } else {
        VersionSource::Absent
    };
    let app_name = chart_name.split('/').last().unwrap_or(chart_name);
    Ok(Deployment {
        service: "Platform Data Analysis",
        environment: DeployEnvironment::DataServices,
        actions,
        record: RecordSpec {
            deployment_name: opts.bi_system.release().into(),
            chart_name: RecordValue::One(chart_name.into()),
            chart_version: opts.chart_version.clone().into(),
            app_name: app_name.into(),
            versions: RecordVersions::Map(vec![
                ("data_analysis_psql".to_string(), psql_version),
                (
                    "data_analysis".to_string(),
                    VersionSource::Release {
                        release: opts.bi_system.release().into(),
                        namespace: opts.namespace.clone(),
                    },
                ),
            ]),
        },
    })
}
