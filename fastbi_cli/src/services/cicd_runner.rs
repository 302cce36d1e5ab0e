//! CI/CD workload runner, conditioned on the tenant's git provider.

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions};
use crate::release::{ChartRef, PodWait, ReleaseStep, RenderSpec};
use crate::services::{
    vault_context, RAW_CHART_NAME, RAW_CHART_REPO, RAW_CHART_REPO_NAME, RAW_CHART_VERSION,
};
use crate::{DeployEnvironment, Result, SecretStore, Tenant};

const VALUES: &str = "charts/data_services_charts/cicd_workload_runner/values.yaml";
const VALUES_EXTRA: &str = "charts/data_services_charts/cicd_workload_runner/values_extra.yaml";

const DEFAULT_PROVIDER_URL: &str = "https://gitlab.fast.bi";

/// Supported CI runner providers
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GitProvider {
    /// The platform-hosted gitlab
    FastBi,
    Gitlab,
    Github,
    Gitea,
    Bitbucket,
}

impl GitProvider {
    /// Infer the provider from a git host URL; absent means platform-hosted
    pub fn detect(url: Option<&str>) -> GitProvider {
        let url = match url {
            Some(u) => u.to_lowercase(),
            None => return GitProvider::FastBi,
        };
        if url.contains("gitlab") {
            GitProvider::Gitlab
        } else if url.contains("github") {
            GitProvider::Github
        } else if url.contains("gitea") {
            GitProvider::Gitea
        } else if url.contains("bitbucket") {
            GitProvider::Bitbucket
        } else {
            GitProvider::FastBi
        }
    }

    pub fn parse(name: &str) -> Result<GitProvider> {
        match name {
            "fastbi" => Ok(GitProvider::FastBi),
            "gitlab" => Ok(GitProvider::Gitlab),
            "github" => Ok(GitProvider::Github),
            "gitea" => Ok(GitProvider::Gitea),
            "bitbucket" => Ok(GitProvider::Bitbucket),
            _ => bail!("Unsupported git provider: {}", name),
        }
    }

    fn chart(&self) -> (&'static str, &'static str, &'static str) {
        match self {
            GitProvider::FastBi | GitProvider::Gitlab => (
                "gitlab",
                "https://charts.gitlab.io/",
                "gitlab/gitlab-runner",
            ),
            GitProvider::Github => (
                "github",
                "https://actions-runner-controller.github.io/actions-runner-controller",
                "actions-runner-controller/actions-runner-controller",
            ),
            GitProvider::Gitea => (
                "gitea",
                "https://gitea.com/marketplace/actions/gitea-actions-runner-controller",
                "gitea-actions-runner-controller/gitea-actions-runner-controller",
            ),
            GitProvider::Bitbucket => (
                "bitbucket",
                "https://bitbucket.org/marketplace/actions/bitbucket-actions-runner-controller",
                "bitbucket-actions-runner-controller/bitbucket-actions-runner-controller",
            ),
        }
    }

    fn template_dir(&self) -> &'static str {
        match self {
            GitProvider::FastBi | GitProvider::Gitlab => "gitlab",
            GitProvider::Github => "github",
            GitProvider::Gitea => "gitea",
            GitProvider::Bitbucket => "bitbucket",
        }
    }
}

pub struct Opts {
    pub chart_version: String,
    pub namespace: String,
    pub git_provider: Option<String>,
    pub git_provider_url: Option<String>,
    /// Overrides for secrets otherwise read from the vault
    pub git_runner_access_token: Option<String>,
    pub git_runner_private_key: Option<String>,
    pub git_repo_url: Option<String>,
}

/// Scheme and host of a repository URL, with the platform default
fn provider_url(repo_url: &str) -> String {
    let url = repo_url.replace(".git", "");
    if url.starts_with("http://") || url.starts_with("https://") {
        let parts: Vec<&str> = url.split('/').collect();
        if parts.len() >= 3 {
            return format!("{}//{}", parts[0], parts[2]);
        }
    }
    DEFAULT_PROVIDER_URL.to_string()
}

/// Repository reference as the runner chart wants it
///
/// Github keeps `org/repo`; everyone else takes the bare repository name.
fn repo_reference(provider: GitProvider, repo_url: &str) -> String {
    let clean = repo_url
        .replace("http://", "")
        .replace("https://", "")
        .replace(".git", "");
    if provider == GitProvider::Github {
        let parts: Vec<&str> = clean.split('/').collect();
        if parts.len() >= 3 {
            return parts[1..].join("/");
        }
        return clean;
    }
    clean.split('/').last().unwrap_or(&clean).to_string()
}

pub fn plan(tenant: &Tenant, store: &SecretStore, opts: &Opts) -> Result<Deployment> {
    let provider = match &opts.git_provider {
        Some(p) => GitProvider::parse(p)?,
        None => GitProvider::detect(opts.git_provider_url.as_deref()),
    };
    let (repo_name, repo_url, chart_name) = provider.chart();

    let runner_token = match &opts.git_runner_access_token {
        Some(t) => t.clone(),
        None => store.get(
            "RUNNER-REGISTRATION-TOKEN",
            "/data-platform-runner/ci-access-tokens/",
        )?,
    };
    let private_key = match &opts.git_runner_private_key {
        Some(k) => k.clone(),
        None => store.get(
            "private",
            "/data-platform-runner/ssh-keys-data-model-repo/",
        )?,
    };
    let git_repo = match &opts.git_repo_url {
        Some(r) => r.clone(),
        None => store.get(
            "data_repo_url",
            "/data-platform-runner/git_provider_repo_urls/",
        )?,
    };

    let git_provider_url = provider_url(&git_repo);
    let repo_ref = repo_reference(provider, &git_repo);

    let dir = provider.template_dir();
    let values_template = format!(
        "charts/data_services_charts/cicd_workload_runner/{}/template_{}_values.yaml",
        dir, dir
    );
    let values_extra_template = format!(
        "charts/data_services_charts/cicd_workload_runner/{}/template_{}_values_extra.yaml",
        dir, dir
    );

    let mut values = Context::new();
    values.insert("chart_name", chart_name);
    values.insert("chart_repo", repo_url);
    values.insert("chart_version", &opts.chart_version);
    values.insert("git_runner_token", &runner_token);
    values.insert("git_runner_private_key", &private_key);
    values.insert("git_provider_url", &git_provider_url);
    values.insert("ingress_host", &tenant.ingress("gitwebhook"));
    values.insert("git_repo", &repo_ref);
    values.insert("domain_name", &tenant.domain);
    values.insert("cloud_provider", &tenant.cloud_provider.to_string());
    vault_context(&mut values, store, tenant);

    let runner = ReleaseStep::new(
        "fastbi-cicd-trigger-runner",
        ChartRef::new(repo_name, repo_url, chart_name, &opts.chart_version),
        &opts.namespace,
        VALUES,
    )
    .with_render(RenderSpec::new(&values_template, VALUES, values.clone()))
    .with_render(RenderSpec::new(
        &values_extra_template,
        VALUES_EXTRA,
        values,
    ));

    let mut actions = vec![Action::Release(runner)];

    // the actions controller needs the runner pods up before its scale set
    if provider == GitProvider::Github {
        actions.push(Action::WaitPods {
            wait: PodWait::new("fastbi=cicd-workload-runner"),
            namespace: opts.namespace.clone(),
        });
        actions.push(Action::Release(ReleaseStep::new(
            "fastbi-cicd-trigger-runner-extra",
            ChartRef::new(
                RAW_CHART_REPO_NAME,
                RAW_CHART_REPO,
                RAW_CHART_NAME,
                RAW_CHART_VERSION,
            ),
            &opts.namespace,
            VALUES_EXTRA,
        )));
    }

    let app_name = chart_name.split('/').last().unwrap_or(chart_name);
    Ok(Deployment {
        service: "CICD Workload Runner",
        environment: DeployEnvironment::DataServices,
        actions,
        record: RecordSpec {
            deployment_name: "fastbi-cicd-trigger-runner".into(),
            chart_name: chart_name.into(),
            chart_version: opts.chart_version.clone().into(),
            app_name: app_name.into(),
            versions: RecordVersions::Single {
                release: "fastbi-cicd-trigger-runner".into(),
                namespace: opts.namespace.clone(),
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::{plan, provider_url, repo_reference, GitProvider, Opts};
    use crate::orchestrator::Action;
    use crate::services::testutil;
    use crate::CloudProvider;

    fn vault() -> serde_json::Value {
        serde_json::json!({
            "data-platform-runner": {
                "ci-access-tokens": { "RUNNER-REGISTRATION-TOKEN": "reg-tok" },
                "ssh-keys-data-model-repo": { "private": "ssh-key" },
                "git_provider_repo_urls": {
                    "data_repo_url": "https://gitlab.fast.bi/acme/acme-data-models.git"
                }
            }
        })
    }

    fn opts() -> Opts {
        Opts {
            chart_version: "0.60.0".into(),
            namespace: "cicd-workload-trigger".into(),
            git_provider: None,
            git_provider_url: None,
            git_runner_access_token: None,
            git_runner_private_key: None,
            git_repo_url: None,
        }
    }

    #[test]
    fn provider_detection() {
        assert_eq!(GitProvider::detect(None), GitProvider::FastBi);
        assert_eq!(
            GitProvider::detect(Some("https://gitlab.example.com")),
            GitProvider::Gitlab
        );
        assert_eq!(
            GitProvider::detect(Some("https://github.com")),
            GitProvider::Github
        );
        assert!(GitProvider::parse("svn").is_err());
    }

    #[test]
    fn provider_url_extraction() {
        assert_eq!(
            provider_url("https://gitlab.fast.bi/acme/models.git"),
            "https://gitlab.fast.bi"
        );
        assert_eq!(provider_url("not-a-url"), "https://gitlab.fast.bi");
    }

    #[test]
    fn repo_reference_per_provider() {
        assert_eq!(
            repo_reference(
                GitProvider::Github,
                "https://github.com/acme-org/data-models.git"
            ),
            "acme-org/data-models"
        );
        assert_eq!(
            repo_reference(
                GitProvider::Gitlab,
                "https://gitlab.fast.bi/acme/data-models.git"
            ),
            "data-models"
        );
    }

    #[test]
    fn default_provider_deploys_the_gitlab_runner() {
        let (_d, store) = testutil::store(vault());
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let plan = plan(&tenant, &store, &opts()).unwrap();
        assert_eq!(plan.actions.len(), 1);
        match &plan.actions[0] {
            Action::Release(s) => {
                assert_eq!(s.chart.chart, "gitlab/gitlab-runner");
                let values = s.renders[0].context.clone().into_json();
                assert_eq!(values["git_runner_token"], "reg-tok");
                assert_eq!(values["git_repo"], "acme-data-models");
                assert_eq!(values["git_provider_url"], "https://gitlab.fast.bi");
                assert_eq!(values["ingress_host"], "gitwebhook.acme.fast.bi");
            }
            _ => panic!("expected the runner release"),
        }
    }

    #[test]
    fn github_provider_adds_the_scale_set_release() {
        let (_d, store) = testutil::store(vault());
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let mut o = opts();
        o.git_provider = Some("github".into());
        o.git_repo_url = Some("https://github.com/acme-org/data-models.git".into());
        let plan = plan(&tenant, &store, &o).unwrap();
        assert_eq!(plan.actions.len(), 3);
        assert!(matches!(plan.actions[1], Action::WaitPods { .. }));
        match &plan.actions[2] {
            Action::Release(s) => {
                assert_eq!(s.name, "fastbi-cicd-trigger-runner-extra");
                assert_eq!(s.chart.chart, "kube-core/raw");
            }
            _ => panic!("expected the extra release"),
        }
    }
}
