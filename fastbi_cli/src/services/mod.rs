use tera::Context;

use super::{Backend, SecretStore, Tenant};

/// Infrastructure layer
pub mod cert_manager;
pub mod idp_sso;
pub mod monitoring;
pub mod secret_operator;
pub mod stackgres;
pub mod traefik;

/// Data-services layer
pub mod cicd_runner;
pub mod data_analysis;
pub mod data_governance;
pub mod data_modeling;
pub mod data_orchestration;
pub mod data_replication;
pub mod object_storage;
pub mod user_console;

/// In-namespace PostgreSQL is for local development only; deployed tenants
/// always target the shared operator-managed instance.
pub const LOCAL_POSTGRESQL: bool = false;

/// Service host of the shared PostgreSQL
pub const GLOBAL_PSQL_HOST: &str = "fastbi-global-psql.global-postgresql.svc.cluster.local";

/// Shared chart used for raw-manifest releases
pub const RAW_CHART_REPO_NAME: &str = "kube-core";
pub const RAW_CHART_REPO: &str = "https://kube-core.github.io/helm-charts";
pub const RAW_CHART_NAME: &str = "kube-core/raw";
pub const RAW_CHART_VERSION: &str = "0.1.1";

/// Database host for a service, by postgres topology
pub fn psql_host(local_host: &str) -> String {
    if LOCAL_POSTGRESQL {
        local_host.to_string()
    } else {
        GLOBAL_PSQL_HOST.to_string()
    }
}

/// The vault method name as the value templates expect it
pub fn method_name(store: &SecretStore) -> &'static str {
    if store.is_remote() {
        "external_infisical"
    } else {
        "local_vault"
    }
}

/// Insert an optional value, empty when absent
///
/// Value templates branch on emptiness; absent values are still inserted so
/// every rendered document carries its full variable set.
pub fn insert_opt(ctx: &mut Context, key: &str, value: &Option<String>) {
    match value {
        Some(v) => ctx.insert(key.to_string(), v),
        None => ctx.insert(key.to_string(), ""),
    }
}

/// Inject the secret-backend wiring the operator charts consume
pub fn vault_context(ctx: &mut Context, store: &SecretStore, tenant: &Tenant) {
    ctx.insert("method", method_name(store));
    insert_opt(ctx, "project_slug", &tenant.slug);
    ctx.insert("infisical_environment", "prod");
    match store.backend() {
        Backend::Remote {
            host,
            workspace,
            client_id,
            client_secret,
            ..
        } => {
            ctx.insert("external_infisical_host", host);
            ctx.insert("vault_project_id", workspace);
            ctx.insert("secret_manager_client_id", client_id);
            ctx.insert("secret_manager_client_secret", client_secret);
        }
        Backend::Local { .. } => {
            ctx.insert("external_infisical_host", "");
            ctx.insert("vault_project_id", "");
            ctx.insert("secret_manager_client_id", "");
            ctx.insert("secret_manager_client_secret", "");
        }
    }
}

#[cfg(test)]
pub mod testutil {
    use crate::{CloudProvider, SecretStore, Tenant};
    use fastbi_definitions::tenant::TenantOpts;

    pub fn tenant(cloud: CloudProvider) -> Tenant {
        Tenant::new(TenantOpts {
            customer: "acme".into(),
            domain: "fast.bi".into(),
            cloud_provider: cloud,
            region: Some("europe-west1".into()),
            slug: Some("acme".into()),
            ..Default::default()
        })
        .unwrap()
    }

    /// Local store over an arbitrary JSON tree
    pub fn store(tree: serde_json::Value) -> (tempfile::TempDir, SecretStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        std::fs::write(&path, tree.to_string()).unwrap();
        let store = SecretStore::local_file(path).unwrap();
        (dir, store)
    }
}

#[cfg(test)]
mod tests {
    use super::{method_name, psql_host, testutil, GLOBAL_PSQL_HOST};

    #[test]
    fn deployed_topology_targets_the_global_psql() {
        assert_eq!(
            psql_host("data-analysis-bi-psql.data-analysis.svc.cluster.local"),
            GLOBAL_PSQL_HOST
        );
    }

    #[test]
    fn method_names_follow_the_backend() {
        let (_d, local) = testutil::store(serde_json::json!({}));
        assert_eq!(method_name(&local), "local_vault");
        let remote =
            crate::SecretStore::remote("https://inf.example", "ws", "id", "sec").unwrap();
        assert_eq!(method_name(&remote), "external_infisical");
    }
}
