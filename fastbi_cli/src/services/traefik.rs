//! Ingress load balancer with tenant IP allowlisting.

use tera::Context;

use crate::orchestrator::{Action, Deployment, RecordSpec, RecordVersions};
use crate::release::{ChartRef, ReleaseStep, RenderSpec};
use crate::services::insert_opt;
use crate::{DeployEnvironment, Result, Tenant};

const CHART_REPO_NAME: &str = "traefik";
const CHART_REPO: &str = "https://helm.traefik.io/traefik";
const CHART_NAME: &str = "traefik/traefik";

const VALUES: &str = "charts/infra_services_charts/traefik_lb/values.yaml";
const VALUES_TEMPLATE: &str = "charts/infra_services_charts/traefik_lb/template_values.yaml";

pub struct Opts {
    pub chart_version: String,
    pub namespace: String,
    /// CIDRs allowed through the LB firewall
    pub whitelisted_ips: Vec<String>,
    /// Pre-allocated LB address, when the cloud provides one
    pub external_ip: Option<String>,
}

pub fn plan(tenant: &Tenant, opts: &Opts) -> Result<Deployment> {
    let mut values = Context::new();
    values.insert("chart_name", CHART_NAME);
    values.insert("chart_repo", CHART_REPO);
    values.insert("chart_version", &opts.chart_version);
    insert_opt(&mut values, "project_id", &tenant.project_id);
    values.insert("loadBalancerSourceRanges", &opts.whitelisted_ips);
    insert_opt(&mut values, "loadBalancerIP", &opts.external_ip);
    values.insert("customer", &tenant.customer);
    values.insert("cloud_provider", &tenant.cloud_provider.to_string());
    values.insert("customer_main_domain", &tenant.root_domain());

    let step = ReleaseStep::new(
        "traefik-ingress",
        ChartRef::new(CHART_REPO_NAME, CHART_REPO, CHART_NAME, &opts.chart_version),
        &opts.namespace,
        VALUES,
    )
    .with_render(RenderSpec::new(VALUES_TEMPLATE, VALUES, values));

    Ok(Deployment {
        service: "Traefik Ingress",
        environment: DeployEnvironment::Infrastructure,
        actions: vec![Action::Release(step)],
        record: RecordSpec {
            deployment_name: "traefik-ingress".into(),
            chart_name: CHART_NAME.into(),
            chart_version: opts.chart_version.clone().into(),
            app_name: "traefik".into(),
            versions: RecordVersions::Single {
                release: "traefik-ingress".into(),
                namespace: opts.namespace.clone(),
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::{plan, Opts};
    use crate::orchestrator::Action;
    use crate::services::testutil;
    use crate::CloudProvider;

    #[test]
    fn allowlist_and_lb_address_reach_the_values() {
        let tenant = testutil::tenant(CloudProvider::Gcp);
        let plan = plan(
            &tenant,
            &Opts {
                chart_version: "26.0.0".into(),
                namespace: "traefik-ingress".into(),
                whitelisted_ips: vec!["1.2.3.4/32".into(), "5.6.7.0/24".into()],
                external_ip: Some("34.0.0.1".into()),
            },
        )
        .unwrap();
        let step = match &plan.actions[0] {
            Action::Release(s) => s,
            _ => panic!("expected a release"),
        };
        assert_eq!(step.name, "traefik-ingress");
        assert_eq!(step.namespace, "traefik-ingress");
        let values = step.renders[0].context.clone().into_json();
        assert_eq!(
            values["loadBalancerSourceRanges"],
            serde_json::json!(["1.2.3.4/32", "5.6.7.0/24"])
        );
        assert_eq!(values["loadBalancerIP"], "34.0.0.1");
        assert_eq!(values["customer_main_domain"], "acme.fast.bi");
    }
}
