//! Secret operator bootstrap, with a vault server when running off the
//! local vault file.

use std::path::PathBuf;

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions};
use crate::release::{ChartRef, ReleaseStep, RenderSpec};
use crate::services::vault_context;
use crate::{Backend, DeployEnvironment, Result, SecretStore, Tenant};

const HC_VAULT_CHART_REPO_NAME: &str = "hashicorp";
const HC_VAULT_CHART_REPO: &str = "https://helm.releases.hashicorp.com";
const HC_VAULT_CHART_NAME: &str = "hashicorp/vault";

const ESO_CHART_REPO_NAME: &str = "external-secrets";
const ESO_CHART_REPO: &str = "https://charts.external-secrets.io";
const ESO_CHART_NAME: &str = "external-secrets/external-secrets";

const INFISICAL_CHART_REPO_NAME: &str = "infisical";
const INFISICAL_CHART_REPO: &str =
    "https://dl.cloudsmith.io/public/infisical/helm-charts/helm/charts/";
const INFISICAL_CHART_NAME: &str = "infisical/secrets-operator";

const HC_VAULT_VALUES: &str = "charts/infra_services_charts/secret_manager/values.yaml";
const HC_VAULT_VALUES_TEMPLATE: &str =
    "charts/infra_services_charts/secret_manager/template_values.yaml";
const HC_VAULT_VALUES_EXTRA: &str =
    "charts/infra_services_charts/secret_manager/values_extra.yaml";
const HC_VAULT_VALUES_EXTRA_TEMPLATE: &str =
    "charts/infra_services_charts/secret_manager/template_values_extra.yaml";

const OPERATOR_VALUES: &str =
    "charts/infra_services_charts/secret_manager_operator/values.yaml";
const OPERATOR_VALUES_TEMPLATE: &str =
    "charts/infra_services_charts/secret_manager_operator/template_values.yaml";
const OPERATOR_VALUES_EXTRA: &str =
    "charts/infra_services_charts/secret_manager_operator/values_extra.yaml";
const OPERATOR_VALUES_EXTRA_TEMPLATE: &str =
    "charts/infra_services_charts/secret_manager_operator/template_values_extra.yaml";

pub struct Opts {
    pub chart_version: String,
    /// Required with the local vault backend
    pub hc_vault_chart_version: Option<String>,
    pub namespace: String,
}

pub fn plan(tenant: &Tenant, store: &SecretStore, opts: &Opts) -> Result<Deployment> {
    let mut actions = Vec::new();

    // the local backend bootstraps an in-cluster vault seeded with the
    // customer vault structure before the operator goes in
    if let Backend::Local { file } = store.backend() {
        let hc_version = match &opts.hc_vault_chart_version {
            Some(v) => v.clone(),
            None => bail!("--hc_vault_chart_version is required for the local_vault method"),
        };
        let mut vault_values = Context::new();
        vault_values.insert("chart_name", HC_VAULT_CHART_NAME);
        vault_values.insert("chart_repo", HC_VAULT_CHART_REPO);
        vault_values.insert("chart_version", &hc_version);

        let vault_release = ReleaseStep::new(
            "vault",
            ChartRef::new(
                HC_VAULT_CHART_REPO_NAME,
                HC_VAULT_CHART_REPO,
                HC_VAULT_CHART_NAME,
                &hc_version,
            ),
            &opts.namespace,
            HC_VAULT_VALUES,
        )
        .with_render(RenderSpec::new(
            HC_VAULT_VALUES_TEMPLATE,
            HC_VAULT_VALUES,
            vault_values.clone(),
        ))
        .with_render(RenderSpec::new(
            HC_VAULT_VALUES_EXTRA_TEMPLATE,
            HC_VAULT_VALUES_EXTRA,
            vault_values,
        ));
        actions.push(Action::Release(vault_release));
        actions.push(Action::EnsureNamespace {
            namespace: opts.namespace.clone(),
        });
        actions.push(Action::SecretMaterial {
            source: file.clone(),
            secret_name: "vault-secrets".into(),
            namespace: opts.namespace.clone(),
        });
        actions.push(Action::Apply {
            manifest: PathBuf::from(HC_VAULT_VALUES_EXTRA),
            namespace: opts.namespace.clone(),
        });
    }

    let (repo_name, repo_url, chart_name) = if store.is_remote() {
        (
            INFISICAL_CHART_REPO_NAME,
            INFISICAL_CHART_REPO,
            INFISICAL_CHART_NAME,
        )
    } else {
        (ESO_CHART_REPO_NAME, ESO_CHART_REPO, ESO_CHART_NAME)
    };

    let mut operator_values = Context::new();
    operator_values.insert("chart_name", chart_name);
    operator_values.insert("chart_repo", repo_url);
    operator_values.insert("chart_version", &opts.chart_version);
    operator_values.insert("namespace", &opts.namespace);
    vault_context(&mut operator_values, store, tenant);

    let operator = ReleaseStep::new(
        "secret-operator",
        ChartRef::new(repo_name, repo_url, chart_name, &opts.chart_version),
        &opts.namespace,
        OPERATOR_VALUES,
    )
    .with_render(RenderSpec::new(
        OPERATOR_VALUES_TEMPLATE,
        OPERATOR_VALUES,
        operator_values.clone(),
    ))
    .with_render(RenderSpec::new(
        OPERATOR_VALUES_EXTRA_TEMPLATE,
        OPERATOR_VALUES_EXTRA,
        operator_values,
    ))
    .with_post_apply(OPERATOR_VALUES_EXTRA);
    actions.push(Action::Release(operator));

    let app_name = chart_name.split('/').last().unwrap_or(chart_name);
    Ok(Deployment {
        service: "Secret Manager",
        environment: DeployEnvironment::InfrastructureServices,
        actions,
        record: RecordSpec {
            deployment_name: "secret-operator".into(),
            chart_name: chart_name.into(),
            chart_version: opts.chart_version.clone().into(),
            app_name: app_name.into(),
            versions: RecordVersions::Single {
                release: "secret-operator".into(),
                namespace: opts.namespace.clone(),
            },
        },
    })
}
