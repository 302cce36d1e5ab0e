use tera::Context;

use super::release::RenderSpec;
use super::{Result, SecretStore, Tenant};

/// One OAuth client of the tenant realm
pub struct OauthClient {
    /// Logical service name, also the secret folder name in kebab form
    pub logical: &'static str,
    /// Template variable override where the realm template predates a rename
    pub template_var: Option<&'static str>,
    /// Subdomain the client's UI lives on; `None` for the bare root domain
    pub url_prefix: Option<&'static str>,
    pub callback_path: Option<&'static str>,
    pub signout_path: Option<&'static str>,
}

impl OauthClient {
    fn var(&self) -> &'static str {
        self.template_var.unwrap_or(self.logical)
    }

    fn secret_path(&self) -> String {
        format!(
            "/idp-sso/sso-clients-secrets/{}/",
            self.logical.replace('_', "-")
        )
    }
}

/// Every OAuth client the platform provisions, in realm order
pub const CLIENTS: &[OauthClient] = &[
    OauthClient {
        logical: "data_cicd_workflows",
        // the realm template still calls this client argo_workflows
        template_var: Some("argo_workflows"),
        url_prefix: Some("workflows"),
        callback_path: Some("/oauth2/callback"),
        signout_path: None,
    },
    OauthClient {
        logical: "data_replication",
        template_var: None,
        url_prefix: Some("airbyte"),
        callback_path: Some("/oauth2/callback"),
        signout_path: None,
    },
    OauthClient {
        logical: "data_orchestration",
        template_var: None,
        url_prefix: Some("airflow"),
        callback_path: Some("/oauth-authorized/FastBI-SSO"),
        signout_path: None,
    },
    OauthClient {
        logical: "bi",
        template_var: None,
        url_prefix: None,
        callback_path: None,
        signout_path: None,
    },
    OauthClient {
        logical: "data_catalog",
        template_var: None,
        url_prefix: Some("dc-auth"),
        callback_path: Some("/oauth2/callback"),
        signout_path: Some("/oauth2/sign_out"),
    },
    OauthClient {
        logical: "data_quality",
        template_var: None,
        url_prefix: Some("dq-auth"),
        callback_path: Some("/oauth2/callback"),
        signout_path: Some("/oauth2/sign_out"),
    },
    OauthClient {
        logical: "data_governance",
        template_var: None,
        url_prefix: Some("datahub"),
        callback_path: Some("/callback/oidc"),
        signout_path: None,
    },
    OauthClient {
        logical: "data_modeling",
        template_var: None,
        url_prefix: Some("ide"),
        callback_path: Some("/hub/oauth_callback"),
        signout_path: None,
    },
    OauthClient {
        logical: "platform_monitoring",
        template_var: None,
        url_prefix: Some("monitoring"),
        callback_path: Some("/login/generic_oauth"),
        signout_path: None,
    },
    OauthClient {
        logical: "platform_object_storage",
        template_var: None,
        url_prefix: Some("minio"),
        callback_path: Some("/oauth_callback"),
        signout_path: None,
    },
    OauthClient {
        logical: "user_console",
        template_var: None,
        url_prefix: None,
        callback_path: Some("/oidc/callback"),
        signout_path: None,
    },
];

pub const REALM_TEMPLATE: &str =
    "charts/infra_services_charts/idp_sso_manager/realm_teamplate.json";

/// Path of the rendered realm document for a customer
pub fn realm_output(customer: &str) -> String {
    format!(
        "charts/infra_services_charts/idp_sso_manager/{}_realm.json",
        customer
    )
}

/// Assemble the full realm template context
///
/// Fetches every client's id/secret from the store and derives its redirect
/// URLs against the tenant root domain. A missing client secret aborts the
/// whole realm.
pub fn client_context(store: &SecretStore, tenant: &Tenant) -> Result<Context> {
    let root = tenant.root_domain();
    let mut ctx = Context::new();
    ctx.insert("realm_name", &tenant.customer);
    ctx.insert("customer", &tenant.customer);

    for client in CLIENTS {
        let path = client.secret_path();
        let client_id = store.get("ClientID", &path)?;
        let client_secret = store.get("ClientSecret", &path)?;
        let var = client.var();
        ctx.insert(format!("{}_client_id", var), &client_id);
        ctx.insert(format!("{}_client_secret", var), &client_secret);

        if let Some(prefix) = client.url_prefix {
            let callback = client.callback_path.unwrap_or("");
            let redirect = format!("https://{}.{}{}", prefix, root, callback);
            ctx.insert(format!("{}_redirect_url", var), &redirect);
            if let Some(signout) = client.signout_path {
                let signout_url = format!("https://{}.{}{}", prefix, root, signout);
                ctx.insert(format!("{}_signout_redirect_url", var), &signout_url);
            }
        } else if client.logical == "user_console" {
            let callback = client.callback_path.unwrap_or("");
            let redirect = format!("https://{}{}", root, callback);
            ctx.insert(format!("{}_redirect_url", var), &redirect);
            ctx.insert(format!("{}_root_url", var), &format!("https://{}", root));
        }
    }
    Ok(ctx)
}

/// The render producing `<customer>_realm.json`
pub fn realm_render(store: &SecretStore, tenant: &Tenant) -> Result<RenderSpec> {
    let ctx = client_context(store, tenant)?;
    Ok(RenderSpec::new(
        REALM_TEMPLATE,
        &realm_output(&tenant.customer),
        ctx,
    ))
}

#[cfg(test)]
mod tests {
    use super::{client_context, realm_output, CLIENTS};
    use crate::{CloudProvider, SecretStore, Tenant};
    use fastbi_definitions::tenant::TenantOpts;
    use std::io::Write;

    fn tenant() -> Tenant {
        Tenant::new(TenantOpts {
            customer: "acme".into(),
            domain: "fast.bi".into(),
            cloud_provider: CloudProvider::Gcp,
            ..Default::default()
        })
        .unwrap()
    }

    fn store_with_all_clients() -> (tempfile::TempDir, SecretStore) {
        let mut clients = serde_json::Map::new();
        for c in CLIENTS {
            let mut leaf = serde_json::Map::new();
            leaf.insert(
                "ClientID".to_string(),
                format!("{}-id", c.logical).into(),
            );
            leaf.insert(
                "ClientSecret".to_string(),
                format!("{}-secret", c.logical).into(),
            );
            clients.insert(c.logical.replace('_', "-"), leaf.into());
        }
        let tree = serde_json::json!({
            "idp-sso": { "sso-clients-secrets": clients }
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(tree.to_string().as_bytes()).unwrap();
        let store = SecretStore::local_file(path).unwrap();
        (dir, store)
    }

    #[test]
    fn every_catalog_entry_gets_id_and_secret() {
        let (_d, store) = store_with_all_clients();
        let ctx = client_context(&store, &tenant()).unwrap();
        let json = ctx.into_json();
        for c in CLIENTS {
            let var = c.template_var.unwrap_or(c.logical);
            assert!(
                json.get(&format!("{}_client_id", var)).is_some(),
                "missing {}_client_id",
                var
            );
            assert!(json.get(&format!("{}_client_secret", var)).is_some());
        }
        // the rename is total: no data_cicd_workflows keys leak through
        assert!(json.get("data_cicd_workflows_client_id").is_none());
        assert_eq!(json["argo_workflows_client_id"], "data_cicd_workflows-id");
    }

    #[test]
    fn redirect_urls_follow_the_catalog() {
        let (_d, store) = store_with_all_clients();
        let ctx = client_context(&store, &tenant()).unwrap();
        let json = ctx.into_json();
        assert_eq!(
            json["argo_workflows_redirect_url"],
            "https://workflows.acme.fast.bi/oauth2/callback"
        );
        assert_eq!(
            json["data_orchestration_redirect_url"],
            "https://airflow.acme.fast.bi/oauth-authorized/FastBI-SSO"
        );
        assert_eq!(
            json["data_governance_redirect_url"],
            "https://datahub.acme.fast.bi/callback/oidc"
        );
        assert_eq!(
            json["data_catalog_signout_redirect_url"],
            "https://dc-auth.acme.fast.bi/oauth2/sign_out"
        );
        // bi has no URLs at all
        assert!(json.get("bi_redirect_url").is_none());
        // user_console binds to the bare root domain
        assert_eq!(
            json["user_console_redirect_url"],
            "https://acme.fast.bi/oidc/callback"
        );
        assert_eq!(json["user_console_root_url"], "https://acme.fast.bi");
    }

    #[test]
    fn missing_client_secret_aborts_the_realm() {
        let tree = serde_json::json!({
            "idp-sso": { "sso-clients-secrets": { "bi": { "ClientID": "only-id" } } }
        });
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        std::fs::write(&path, tree.to_string()).unwrap();
        let store = SecretStore::local_file(path).unwrap();
        assert!(client_context(&store, &tenant()).is_err());
    }

    #[test]
    fn realm_file_is_keyed_by_customer() {
        assert_eq!(
            realm_output("acme"),
            "charts/infra_services_charts/idp_sso_manager/acme_realm.json"
        );
    }
}
