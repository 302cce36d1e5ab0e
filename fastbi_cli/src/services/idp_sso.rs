//! SSO identity provider: keycloak plus the tenant realm document.

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions};
use crate::realm;
use crate::release::{ChartRef, ReleaseStep, RenderSpec};
use crate::services::{insert_opt, method_name, LOCAL_POSTGRESQL};
use crate::{DeployEnvironment, Result, SecretStore, Tenant};

const CHART_REPO_NAME: &str = "bitnami";
const CHART_REPO: &str = "https://charts.bitnami.com/bitnami";
const CHART_NAME: &str = "oci://registry-1.docker.io/bitnamicharts/keycloak";

const VALUES: &str = "charts/infra_services_charts/idp_sso_manager/values.yaml";
const VALUES_TEMPLATE: &str =
    "charts/infra_services_charts/idp_sso_manager/template_values.yaml";

pub struct Opts {
    pub chart_version: String,
    pub namespace: String,
}

/// Admin credentials surfaced to the operator after a successful deploy
#[derive(Debug)]
pub struct AdminCredentials {
    pub username: String,
    pub password: String,
}

pub fn plan(
    tenant: &Tenant,
    store: &SecretStore,
    opts: &Opts,
) -> Result<(Deployment, AdminCredentials)> {
    let root_username = store.get("adminUser", "/idp-sso/root-secrets/")?;
    let root_password = store.get("adminPassword", "/idp-sso/root-secrets/")?;
    let database = store.get("database", "/idp-sso/database-secrets/")?;
    let username = store.get("username", "/idp-sso/database-secrets/")?;
    let replication_username = store.get("replicationUsername", "/idp-sso/database-secrets/")?;

    // the realm document is rendered before the chart so its import hook
    // finds every tenant client enumerated
    let realm_render = realm::realm_render(store, tenant)?;

    let mut values = Context::new();
    values.insert("chart_name", CHART_NAME);
    values.insert("chart_repo", CHART_REPO);
    values.insert("chart_version", &opts.chart_version);
    values.insert("ingress_host", &tenant.ingress("login"));
    values.insert("database", &database);
    values.insert("username", &username);
    values.insert("adminUser", &root_username);
    values.insert("replicationUsername", &replication_username);
    values.insert("cloud_provider", &tenant.cloud_provider.to_string());
    values.insert("method", method_name(store));
    values.insert("namespace", &opts.namespace);
    insert_opt(&mut values, "project_slug", &tenant.slug);
    values.insert("local_postgresql", &LOCAL_POSTGRESQL.to_string());

    let release = ReleaseStep::new(
        "idp-sso-manager",
        ChartRef::new(CHART_REPO_NAME, CHART_REPO, CHART_NAME, &opts.chart_version),
        &opts.namespace,
        VALUES,
    )
    .with_render(RenderSpec::new(VALUES_TEMPLATE, VALUES, values))
    .with_timeout("15m");

    let deployment = Deployment {
        service: "IDP SSO Manager",
        environment: DeployEnvironment::Infrastructure,
        actions: vec![Action::Render(realm_render), Action::Release(release)],
        record: RecordSpec {
            deployment_name: "idp-sso-manager".into(),
            chart_name: CHART_NAME.into(),
            chart_version: opts.chart_version.clone().into(),
            app_name: "keycloak".into(),
            versions: RecordVersions::Single {
                release: "idp-sso-manager".into(),
                namespace: opts.namespace.clone(),
            },
        },
    };
    Ok((
        deployment,
        AdminCredentials {
            username: root_username,
            password: root_password,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::{plan, Opts};
    use crate::orchestrator::Action;
    use crate::realm::CLIENTS;
    use crate::services::testutil;
    use crate::CloudProvider;

    fn vault() -> serde_json::Value {
        let mut clients = serde_json::Map::new();
        for c in CLIENTS {
            clients.insert(
                c.logical.replace('_', "-"),
                serde_json::json!({"ClientID": "id", "ClientSecret": "sec"}),
            );
        }
        serde_json::json!({
            "idp-sso": {
                "root-secrets": { "adminUser": "admin", "adminPassword": "pw" },
                "database-secrets": {
                    "database": "keycloak", "username": "kc", "replicationUsername": "repl" },
                "sso-clients-secrets": clients
            }
        })
    }

    fn opts() -> Opts {
        Opts {
            chart_version: "21.0.0".into(),
            namespace: "sso-keycloak".into(),
        }
    }

    #[test]
    fn realm_precedes_an_oci_release_with_its_timeout() {
        let (_d, store) = testutil::store(vault());
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let (plan, creds) = plan(&tenant, &store, &opts()).unwrap();
        assert_eq!(creds.username, "admin");
        assert_eq!(creds.password, "pw");
        match &plan.actions[0] {
            Action::Render(r) => {
                assert!(r
                    .output
                    .to_string_lossy()
                    .ends_with("acme_realm.json"));
            }
            _ => panic!("expected the realm render first"),
        }
        match &plan.actions[1] {
            Action::Release(s) => {
                assert!(s.chart.is_oci());
                assert_eq!(s.timeout.as_deref(), Some("15m"));
                assert_eq!(s.namespace, "sso-keycloak");
                let values = s.renders[0].context.clone().into_json();
                assert_eq!(values["ingress_host"], "login.acme.fast.bi");
                assert_eq!(values["adminUser"], "admin");
                assert_eq!(values["local_postgresql"], "false");
            }
            _ => panic!("expected the keycloak release"),
        }
    }

    #[test]
    fn missing_database_secret_aborts_before_any_release() {
        let (_d, store) = testutil::store(serde_json::json!({
            "idp-sso": {
                "root-secrets": { "adminUser": "admin", "adminPassword": "pw" },
                "database-secrets": { "database": "keycloak" }
            }
        }));
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let err = plan(&tenant, &store, &opts()).unwrap_err();
        assert!(err.to_string().contains("username"));
    }
}
