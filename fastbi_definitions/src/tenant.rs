use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use regex::Regex;

use super::Result;

/// Cloud provider the tenant cluster runs on
///
/// Only GCP currently derives extra identities (project id and workload
/// service accounts); the other providers deploy with cluster-local identity.
#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum CloudProvider {
    Gcp,
    Aws,
    Azure,
    SelfManaged,
}

impl FromStr for CloudProvider {
    type Err = failure::Error;

    fn from_str(s: &str) -> Result<CloudProvider> {
        match s {
            "gcp" => Ok(CloudProvider::Gcp),
            "aws" => Ok(CloudProvider::Aws),
            "azure" => Ok(CloudProvider::Azure),
            "self-managed" => Ok(CloudProvider::SelfManaged),
            _ => bail!("Unsupported cloud provider: {}", s),
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            CloudProvider::Gcp => "gcp",
            CloudProvider::Aws => "aws",
            CloudProvider::Azure => "azure",
            CloudProvider::SelfManaged => "self-managed",
        };
        f.write_str(s)
    }
}

/// Tenant identity for one platform deployment
///
/// Constructed once per orchestrator run from CLI flags and immutable
/// thereafter. All derived names (root domain, cluster, kubeconfig path,
/// service accounts) hang off this struct.
#[derive(Serialize, Clone, Debug)]
pub struct Tenant {
    /// Customer tenant name
    ///
    /// Must satisfy `^[0-9a-z-]+$`; it becomes the subdomain of every
    /// platform URL and the realm name in the IdP.
    pub customer: String,

    /// Base domain the customer subdomain is attached to (e.g. `fast.bi`)
    pub domain: String,

    /// Cloud provider of the target cluster
    pub cloud_provider: CloudProvider,

    /// Cloud project id
    ///
    /// Defaults to `fast-bi-<customer>` on GCP, absent on other providers.
    pub project_id: Option<String>,

    /// Cloud region, used for warehouse placement on GCP
    pub region: Option<String>,

    /// Cluster name, defaulting to `fast-bi-<customer>-platform`
    pub cluster_name: String,

    /// Kubeconfig path passed to every helm/kubectl invocation
    pub kubeconfig: PathBuf,

    /// Vault project slug for this tenant
    pub slug: Option<String>,
}

/// Raw tenant inputs as they arrive from the CLI
#[derive(Default, Clone, Debug)]
pub struct TenantOpts {
    pub customer: String,
    pub domain: String,
    pub cloud_provider: CloudProvider,
    pub project_id: Option<String>,
    pub region: Option<String>,
    pub cluster_name: Option<String>,
    pub kubeconfig: Option<PathBuf>,
    pub slug: Option<String>,
}

impl Default for CloudProvider {
    fn default() -> Self {
        CloudProvider::Gcp
    }
}

impl Tenant {
    /// Build a verified tenant identity, filling in the platform defaults
    pub fn new(opts: TenantOpts) -> Result<Tenant> {
        let re = Regex::new(r"^[0-9a-z-]+$").unwrap();
        if !re.is_match(&opts.customer) {
            bail!(
                "Please use a lower case customer name with dashes (got {})",
                opts.customer
            );
        }
        if opts.customer.starts_with('-') || opts.customer.ends_with('-') {
            bail!("Please use dashes to separate words only");
        }
        ensure!(!opts.domain.is_empty(), "domain name must not be empty");

        let project_id = match opts.cloud_provider {
            CloudProvider::Gcp => match opts.project_id {
                Some(ref p) if !p.trim().is_empty() => {
                    info!("Using provided project_id: {}", p);
                    Some(p.clone())
                }
                _ => {
                    let fallback = format!("fast-bi-{}", opts.customer);
                    warn!("No project_id provided, using default: {}", fallback);
                    Some(fallback)
                }
            },
            _ => None,
        };

        let cluster_name = opts
            .cluster_name
            .clone()
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| format!("fast-bi-{}-platform", opts.customer));

        let kubeconfig = opts
            .kubeconfig
            .unwrap_or_else(|| PathBuf::from(format!("/tmp/{}-kubeconfig.yaml", cluster_name)));
        if !kubeconfig.exists() {
            warn!(
                "Kubeconfig file not found at {}. Deployment may fail.",
                kubeconfig.display()
            );
        }

        Ok(Tenant {
            customer: opts.customer,
            domain: opts.domain,
            cloud_provider: opts.cloud_provider,
            project_id,
            region: opts.region,
            cluster_name,
            kubeconfig,
            slug: opts.slug,
        })
    }

    /// Root domain of the tenant, `<customer>.<domain>`
    pub fn root_domain(&self) -> String {
        format!("{}.{}", self.customer, self.domain)
    }

    /// Ingress host for a platform service, `<prefix>.<root_domain>`
    pub fn ingress(&self, prefix: &str) -> String {
        format!("{}.{}", prefix, self.root_domain())
    }

    /// Workload service account identity for a logical service
    ///
    /// Only produced on GCP where a project id exists:
    /// `<logical>-k8s-sa@<project_id>.iam.gserviceaccount.com`.
    pub fn service_account(&self, logical: &str) -> Option<String> {
        match (self.cloud_provider, &self.project_id) {
            (CloudProvider::Gcp, Some(project)) => Some(format!(
                "{}-k8s-sa@{}.iam.gserviceaccount.com",
                logical, project
            )),
            _ => None,
        }
    }

    /// GCP region with the warehouse default applied
    pub fn gcp_region(&self) -> String {
        self.region
            .clone()
            .unwrap_or_else(|| "europe-central2".to_string())
    }

    /// The OIDC endpoint family for this tenant's realm
    pub fn oidc(&self) -> OidcUrls {
        OidcUrls {
            realm: format!("https://login.{}/realms/{}", self.root_domain(), self.customer),
        }
    }
}

/// URLs of the tenant realm on the SSO IdP
///
/// All endpoints live under `https://login.<root_domain>/realms/<customer>`.
#[derive(Clone, Debug)]
pub struct OidcUrls {
    realm: String,
}

impl OidcUrls {
    pub fn realm_url(&self) -> String {
        self.realm.clone()
    }

    pub fn well_known_url(&self) -> String {
        format!("{}/.well-known/openid-configuration", self.realm)
    }

    pub fn auth_url(&self) -> String {
        format!("{}/protocol/openid-connect/auth", self.realm)
    }

    pub fn token_url(&self) -> String {
        format!("{}/protocol/openid-connect/token", self.realm)
    }

    pub fn certs_url(&self) -> String {
        format!("{}/protocol/openid-connect/certs", self.realm)
    }

    pub fn userinfo_url(&self) -> String {
        format!("{}/protocol/openid-connect/userinfo", self.realm)
    }

    pub fn introspection_url(&self) -> String {
        format!("{}/protocol/openid-connect/token/introspect", self.realm)
    }

    pub fn protocol_url(&self) -> String {
        format!("{}/protocol/", self.realm)
    }

    /// Logout endpoint bouncing the user back to the root domain
    pub fn logout_url(&self, root_domain: &str) -> String {
        format!(
            "{}/protocol/openid-connect/logout?post_logout_redirect_uri=https%3A%2F%2F{}",
            self.realm, root_domain
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{CloudProvider, Tenant, TenantOpts};
    use std::path::PathBuf;

    fn opts(customer: &str, cloud: CloudProvider) -> TenantOpts {
        TenantOpts {
            customer: customer.into(),
            domain: "fast.bi".into(),
            cloud_provider: cloud,
            ..Default::default()
        }
    }

    #[test]
    fn gcp_defaults() {
        let t = Tenant::new(opts("acme", CloudProvider::Gcp)).unwrap();
        assert_eq!(t.root_domain(), "acme.fast.bi");
        assert_eq!(t.project_id.as_deref(), Some("fast-bi-acme"));
        assert_eq!(t.cluster_name, "fast-bi-acme-platform");
        assert_eq!(
            t.kubeconfig,
            PathBuf::from("/tmp/fast-bi-acme-platform-kubeconfig.yaml")
        );
        assert_eq!(
            t.service_account("cert-manager").as_deref(),
            Some("cert-manager-k8s-sa@fast-bi-acme.iam.gserviceaccount.com")
        );
    }

    #[test]
    fn whitespace_project_id_falls_back() {
        let mut o = opts("acme", CloudProvider::Gcp);
        o.project_id = Some("   ".into());
        let t = Tenant::new(o).unwrap();
        assert_eq!(t.project_id.as_deref(), Some("fast-bi-acme"));
    }

    #[test]
    fn non_gcp_has_no_identities() {
        let mut o = opts("acme", CloudProvider::Aws);
        o.project_id = Some("fast-bi-acme".into());
        let t = Tenant::new(o).unwrap();
        assert_eq!(t.project_id, None);
        assert_eq!(t.service_account("data-replication"), None);
    }

    #[test]
    fn rejects_bad_customer_names() {
        assert!(Tenant::new(opts("Acme", CloudProvider::Gcp)).is_err());
        assert!(Tenant::new(opts("acme_corp", CloudProvider::Gcp)).is_err());
        assert!(Tenant::new(opts("-acme", CloudProvider::Gcp)).is_err());
        assert!(Tenant::new(opts("", CloudProvider::Gcp)).is_err());
    }

    #[test]
    fn oidc_urls() {
        let t = Tenant::new(opts("acme", CloudProvider::Gcp)).unwrap();
        let oidc = t.oidc();
        assert_eq!(
            oidc.realm_url(),
            "https://login.acme.fast.bi/realms/acme"
        );
        assert_eq!(
            oidc.auth_url(),
            "https://login.acme.fast.bi/realms/acme/protocol/openid-connect/auth"
        );
        assert_eq!(
            oidc.well_known_url(),
            "https://login.acme.fast.bi/realms/acme/.well-known/openid-configuration"
        );
        assert_eq!(
            oidc.logout_url(&t.root_domain()),
            "https://login.acme.fast.bi/realms/acme/protocol/openid-connect/logout?post_logout_redirect_uri=https%3A%2F%2Facme.fast.bi"
        );
    }
}
