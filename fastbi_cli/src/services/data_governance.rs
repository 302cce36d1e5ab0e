//! Data governance: the datahub stack (glue, ES operator, ES, prerequisites,
//! datahub itself) as one ordered plan.

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions, VersionSource};
use crate::release::{ChartRef, PodWait, ReleaseStep, RenderSpec};
use crate::services::{
    insert_opt, method_name, psql_host, LOCAL_POSTGRESQL, RAW_CHART_NAME, RAW_CHART_REPO,
    RAW_CHART_REPO_NAME, RAW_CHART_VERSION,
};
use crate::{DeployEnvironment, RecordValue, Result, SecretStore, Tenant};

const DH_CHART_REPO_NAME: &str = "datahub";
const DH_CHART_REPO: &str = "https://helm.datahubproject.io/";
const DH_CHART_NAME: &str = "datahub/datahub";
const DH_PREREQ_CHART_NAME: &str = "datahub/datahub-prerequisites";

const ES_CHART_REPO_NAME: &str = "elastic";
const ES_CHART_REPO: &str = "https://helm.elastic.co";
const ES_OP_CHART_NAME: &str = "elastic/eck-operator";
const ES_CHART_NAME: &str = "elastic/eck-elasticsearch";

const DIR: &str = "charts/data_services_charts/data_governance";

const LOCAL_DB_HOST: &str = "data-governance-psql.data-governance.svc.cluster.local";

pub struct Opts {
    pub chart_version: String,
    pub app_version: Option<String>,
    pub eck_es_app_version: Option<String>,
    pub prerequest_chart_version: Option<String>,
    pub eck_es_chart_version: Option<String>,
    pub eck_es_op_chart_version: Option<String>,
    pub bi_system: Option<String>,
    pub destination_type: Option<String>,
    pub namespace: String,
}

/// Values shared by all five renders; per-release keys are filled by the
/// caller and everything else stays empty.
struct GovernanceValues<'a> {
    chart_name: &'a str,
    chart_repo: &'a str,
    chart_version: &'a str,
    app_name: Option<&'a str>,
    app_version: Option<&'a str>,
    eck_es_app_version: Option<&'a str>,
    ingress_host: Option<&'a str>,
    ingress_host_gsm: Option<&'a str>,
    admin_user: Option<&'a str>,
    root_user: Option<&'a str>,
    root_password: Option<&'a str>,
    viewer_user: Option<&'a str>,
    viewer_password: Option<&'a str>,
    db_username: Option<&'a str>,
    db_name: Option<&'a str>,
    db_url: Option<&'a str>,
    db_host: Option<&'a str>,
    db_host_for_client: Option<&'a str>,
    db_port: Option<&'a str>,
    bi_system: Option<&'a str>,
    destination_type: Option<&'a str>,
}

fn insert_str(ctx: &mut Context, key: &str, value: Option<&str>) {
    ctx.insert(key.to_string(), value.unwrap_or(""));
}

fn governance_context(
    tenant: &Tenant,
    store: &SecretStore,
    opts: &Opts,
    v: &GovernanceValues,
) -> Context {
    let oidc = tenant.oidc();
    let mut ctx = Context::new();
    ctx.insert("namespace", &opts.namespace);
    ctx.insert("customer", &tenant.customer);
    ctx.insert("customer_root_domain", &tenant.root_domain());
    ctx.insert("domain_name", &tenant.domain);
    ctx.insert("cloud_provider", &tenant.cloud_provider.to_string());
    insert_opt(
        &mut ctx,
        "monitoring_k8s_sa",
        &tenant.service_account("monitoring"),
    );
    insert_opt(
        &mut ctx,
        "data_governance_k8s_sa",
        &tenant.service_account("data-governance"),
    );
    ctx.insert("method", method_name(store));
    insert_opt(&mut ctx, "project_slug", &tenant.slug);
    ctx.insert("local_postgresql", &LOCAL_POSTGRESQL.to_string());
    ctx.insert("chart_name", v.chart_name);
    ctx.insert("chart_repo", v.chart_repo);
    ctx.insert("chart_version", v.chart_version);
    insert_str(&mut ctx, "bi_system", v.bi_system);
    insert_str(
        &mut ctx,
        "data_replication_default_destination_type",
        v.destination_type,
    );
    ctx.insert("vault_secrets", "");
    ctx.insert("data_governance_deployment_name", "data-governance");
    insert_str(&mut ctx, "data_governance_app_name", v.app_name);
    insert_str(&mut ctx, "data_governance_app_version", v.app_version);
    insert_str(
        &mut ctx,
        "data_governance_eck_es_app_version",
        v.eck_es_app_version,
    );
    insert_str(&mut ctx, "ingress_host_gsm", v.ingress_host_gsm);
    insert_str(&mut ctx, "ingress_host", v.ingress_host);
    insert_str(&mut ctx, "data_governance_default_admin_user", v.admin_user);
    insert_str(&mut ctx, "data_governance_root_user", v.root_user);
    insert_str(&mut ctx, "data_governance_root_password", v.root_password);
    insert_str(&mut ctx, "data_governance_viewer_user", v.viewer_user);
    insert_str(&mut ctx, "data_governance_viewer_password", v.viewer_password);
    ctx.insert("oauth_realm_url", &oidc.well_known_url());
    insert_str(&mut ctx, "data_governance_db_username", v.db_username);
    insert_str(&mut ctx, "data_governance_db_name", v.db_name);
    insert_str(&mut ctx, "data_governance_db_url", v.db_url);
    insert_str(&mut ctx, "data_governance_db_host", v.db_host);
    insert_str(
        &mut ctx,
        "data_governance_db_host_for_client",
        v.db_host_for_client,
    );
    insert_str(&mut ctx, "data_governance_db_port", v.db_port);
    ctx
}

pub fn plan(tenant: &Tenant, store: &SecretStore, opts: &Opts) -> Result<Deployment> {
    let admin_user = store.get("default_admin_user", "/data-governance/root-secrets")?;
    let root_user = store.get("adminUser", "/data-governance/root-secrets")?;
    let root_password = store.get("adminPassword", "/data-governance/root-secrets")?;
    let viewer_user = store.get("viewerUser", "/data-governance/root-secrets")?;
    let viewer_password = store.get("viewerPassword", "/data-governance/root-secrets")?;
    let db_username = store.get("username", "/data-governance/database-secrets")?;
    let db_repl_username =
        store.get("replicationUsername", "/data-governance/database-secrets")?;
    let db_name = store.get("database", "/data-governance/database-secrets")?;

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
    // replication user participates in the cluster CRs only
    let _ = db_repl_username;

    let app_version = opts.app_version.clone().unwrap_or_else(|| "v1.0.0".into());
    let eck_es_app_version = opts
        .eck_es_app_version
        .clone()
        .unwrap_or_else(|| "8.13.0".into());
    let prereq_version = opts.prerequest_chart_version.clone().unwrap_or_default();
    let es_version = opts.eck_es_chart_version.clone().unwrap_or_default();
    let es_op_version = opts.eck_es_op_chart_version.clone().unwrap_or_default();

    let db_host_base = psql_host(LOCAL_DB_HOST);
    let db_port = "5432";
    let db_host = format!("{}:{}", db_host_base, db_port);
    let db_url = format!("jdbc:postgresql://{}:5432/datahub?sslmode=prefer", db_host_base);
    let db_host_for_client = if LOCAL_POSTGRESQL {
        "data-governance-psql".to_string()
    } else {
        db_host_base.clone()
    };
    let ingress_host = tenant.ingress("datahub");
    let ingress_host_gsm = tenant.ingress("datahub-gsm");

    // glue resources know the stack layout and root password
    let mut extra_values = empty(RAW_CHART_NAME, RAW_CHART_REPO, RAW_CHART_VERSION);
    extra_values.app_name = Some("datahub");
    extra_values.app_version = Some(&app_version);
    extra_values.root_password = Some(&root_password);
    extra_values.bi_system = Some(&bi_system);
    extra_values.destination_type = Some(&destination);

    let mut es_values = empty(ES_CHART_NAME, ES_CHART_REPO, &es_version);
    es_values.eck_es_app_version = Some(&eck_es_app_version);

    let mut dh_values = empty(DH_CHART_NAME, DH_CHART_REPO, &opts.chart_version);
    dh_values.app_name = Some("datahub");
    dh_values.app_version = Some(&app_version);
    dh_values.eck_es_app_version = Some(&eck_es_app_version);
    dh_values.ingress_host = Some(&ingress_host);
    dh_values.ingress_host_gsm = Some(&ingress_host_gsm);
    dh_values.admin_user = Some(&admin_user);
    dh_values.root_user = Some(&root_user);
    dh_values.root_password = Some(&root_password);
    dh_values.viewer_user = Some(&viewer_user);
    dh_values.viewer_password = Some(&viewer_password);
    dh_values.db_username = Some(&db_username);
    dh_values.db_name = Some(&db_name);
    dh_values.db_url = Some(&db_url);
    dh_values.db_host = Some(&db_host);
    dh_values.db_host_for_client = Some(&db_host_for_client);
    dh_values.db_port = Some(db_port);

    let steps: Vec<(&str, &str, &str, &str, &str, &str, &str, GovernanceValues)> = vec![
        (
            "data-governance-extra",
            RAW_CHART_REPO_NAME,
            RAW_CHART_REPO,
            RAW_CHART_NAME,
            RAW_CHART_VERSION,
            "template_values.yaml",
            "values.yaml",
            extra_values,
        ),
        (
            "data-governance-eck-es-operator",
            ES_CHART_REPO_NAME,
            ES_CHART_REPO,
            ES_OP_CHART_NAME,
            &es_op_version,
            "template_eck_operator_values.yaml",
            "eck_operator_values.yaml",
            empty(ES_OP_CHART_NAME, ES_CHART_REPO, &es_op_version),
        ),
        (
            "data-governance-eck-es",
            ES_CHART_REPO_NAME,
            ES_CHART_REPO,
            ES_CHART_NAME,
            &es_version,
            "template_eck_es_values.yaml",
            "eck_es_values.yaml",
            es_values,
        ),
        (
            "data-governance-sys",
            DH_CHART_REPO_NAME,
            DH_CHART_REPO,
            DH_PREREQ_CHART_NAME,
            &prereq_version,
            "template_dh_prerequisites_values.yaml",
            "dh_prerequisites_values.yaml",
            empty(DH_PREREQ_CHART_NAME, DH_CHART_REPO, &prereq_version),
        ),
        (
            "data-governance",
            DH_CHART_REPO_NAME,
            DH_CHART_REPO,
            DH_CHART_NAME,
            &opts.chart_version,
            "template_dh_values.yaml",
            "dh_values.yaml",
            dh_values,
        ),
    ];

    let mut actions = Vec::new();
    for (release, repo_name, repo_url, chart_name, version, template, output, values) in steps {
        let template = format!("{}/{}", DIR, template);
        let output = format!("{}/{}", DIR, output);
        let ctx = governance_context(tenant, store, opts, &values);
        actions.push(Action::Release(
            ReleaseStep::new(
                release,
                ChartRef::new(repo_name, repo_url, chart_name, version),
                &opts.namespace,
                &output,
            )
            .with_render(RenderSpec::new(&template, &output, ctx))
            .with_timeout("30m"),
        ));
    }
    actions.push(Action::WaitPods {
        wait: PodWait::new("fastbi=data-governance"),
        namespace: opts.namespace.clone(),
    });

    let release_version = |release: &str| VersionSource::Release {
        release: release.into(),
        namespace: opts.namespace.clone(),
    };
    Ok(Deployment {
        service: "Platform Data Governance",
        environment: DeployEnvironment::DataServices,
        actions,
        record: RecordSpec {
            deployment_name: "data-governance".into(),
            chart_name: RecordValue::One(DH_CHART_NAME.into()),
            chart_version: opts.chart_version.clone().into(),
            app_name: "datahub".into(),
            versions: RecordVersions::Map(vec![
                (
                    "data_governance_eck_es_op".to_string(),
                    release_version("data-governance-eck-es-operator"),
                ),
                (
                    "data_governance_eck_es".to_string(),
                    release_version("data-governance-eck-es"),
                ),
                ("data_governance_psql".to_string(), VersionSource::Absent),
                (
                    "data_governance_dh_prerequest".to_string(),
                    release_version("data-governance-sys"),
                ),
                (
                    "data_governance_dh".to_string(),
                    release_version("data-governance"),
                ),
            ]),
        },
    })
}

// A context shell with every tenant-facing value absent
fn empty<'a>(chart_name: &'a str, chart_repo: &'a str, version: &'a str) -> GovernanceValues<'a> {
    GovernanceValues {
        chart_name,
        chart_repo,
        chart_version: version,
        app_name: None,
        app_version: None,
        eck_es_app_version: None,
        ingress_host: None,
        ingress_host_gsm: None,
        admin_user: None,
        root_user: None,
        root_password: None,
        viewer_user: None,
        viewer_password: None,
        db_username: None,
        db_name: None,
        db_url: None,
        db_host: None,
        db_host_for_client: None,
        db_port: None,
        bi_system: None,
        destination_type: None,
    }
}

#[cfg(test)]
mod tests {
    use super::{plan, Opts};
    use crate::orchestrator::Action;
    use crate::services::{testutil, GLOBAL_PSQL_HOST};
    use crate::CloudProvider;

    fn vault() -> serde_json::Value {
        serde_json::json!({
            "data-governance": {
                "root-secrets": {
                    "default_admin_user": "datahub", "adminUser": "root",
                    "adminPassword": "root-pw", "viewerUser": "viewer",
                    "viewerPassword": "viewer-pw" },
                "database-secrets": {
                    "username": "dh", "replicationUsername": "dh-repl",
                    "database": "datahub" }
            },
            "data-cicd-workflows": { "customer-cicd-variables": {
                "DATA_ANALYSIS_PLATFORM": "lightdash",
                "DATA_WAREHOUSE_PLATFORM": "bigquery" } }
        })
    }

    fn opts() -> Opts {
        Opts {
            chart_version: "0.4.8".into(),
            app_version: None,
            eck_es_app_version: None,
            prerequest_chart_version: Some("0.1.12".into()),
            eck_es_chart_version: Some("0.10.0".into()),
            eck_es_op_chart_version: Some("2.12.1".into()),
            bi_system: None,
            destination_type: None,
            namespace: "data-governance".into(),
        }
    }

    #[test]
    fn five_releases_in_stack_order() {
        let (_d, store) = testutil::store(vault());
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let plan = plan(&tenant, &store, &opts()).unwrap();
        let names: Vec<&str> = plan
            .actions
            .iter()
            .filter_map(|a| match a {
                Action::Release(s) => Some(s.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(
            names,
            vec![
                "data-governance-extra",
                "data-governance-eck-es-operator",
                "data-governance-eck-es",
                "data-governance-sys",
                "data-governance",
            ]
        );
        assert!(matches!(
            plan.actions.last().unwrap(),
            Action::WaitPods { .. }
        ));
    }

    #[test]
    fn main_release_values_carry_the_database_wiring() {
        let (_d, store) = testutil::store(vault());
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let plan = plan(&tenant, &store, &opts()).unwrap();
        let dh = match &plan.actions[4] {
            Action::Release(s) => s,
            _ => panic!("expected the datahub release"),
        };
        assert_eq!(dh.timeout.as_deref(), Some("30m"));
        let values = dh.renders[0].context.clone().into_json();
        assert_eq!(
            values["data_governance_db_url"],
            format!(
                "jdbc:postgresql://{}:5432/datahub?sslmode=prefer",
                GLOBAL_PSQL_HOST
            )
        );
        assert_eq!(values["data_governance_root_user"], "root");
        assert_eq!(values["ingress_host"], "datahub.acme.fast.bi");
        assert_eq!(values["ingress_host_gsm"], "datahub-gsm.acme.fast.bi");
        assert_eq!(values["bi_system"], "");
        // intermediate releases leave the tenant-facing values empty
        let prereq = match &plan.actions[3] {
            Action::Release(s) => s,
            _ => panic!(),
        };
        let pv = prereq.renders[0].context.clone().into_json();
        assert_eq!(pv["ingress_host"], "");
        assert_eq!(pv["data_governance_root_user"], "");
    }

    #[test]
    fn bi_system_falls_back_to_cicd_variables() {
        let (_d, store) = testutil::store(vault());
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let plan = plan(&tenant, &store, &opts()).unwrap();
        let extra = match &plan.actions[0] {
            Action::Release(s) => s,
            _ => panic!(),
        };
        let values = extra.renders[0].context.clone().into_json();
        assert_eq!(values["bi_system"], "lightdash");
        assert_eq!(
            values["data_replication_default_destination_type"],
            "bigquery"
        );
    }
}
