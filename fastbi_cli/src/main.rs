#[macro_use]
extern crate clap;
extern crate fastbi;
extern crate fastbi_definitions;
#[macro_use]
extern crate log;
extern crate loggerv;

use std::path::{Path, PathBuf};
use std::process;
use std::str::FromStr;

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};

use fastbi::services::data_analysis::BiSystem;
use fastbi::services::{
    cert_manager, cicd_runner, data_analysis, data_governance, data_modeling,
    data_orchestration, data_replication, idp_sso, monitoring, object_storage, secret_operator,
    stackgres, traefik, user_console,
};
use fastbi::{exec, kubeconfig, orchestrator, CloudProvider, Journal, Result, SecretStore, Tenant};
use fastbi_definitions::tenant::TenantOpts;

fn common_args<'a, 'b>() -> Vec<Arg<'a, 'b>> {
    vec![
        Arg::with_name("customer")
            .long("customer")
            .takes_value(true)
            .required(true)
            .help("Customer tenant name (lowercase letters, numbers, and hyphens only)"),
        Arg::with_name("chart_version")
            .long("chart_version")
            .takes_value(true)
            .required(true)
            .help("Chart version to deploy"),
        Arg::with_name("cloud_provider")
            .long("cloud_provider")
            .takes_value(true)
            .possible_values(&["gcp", "aws", "azure", "self-managed"])
            .default_value("gcp")
            .help("Cloud provider where the cluster is running"),
        Arg::with_name("domain_name")
            .long("domain_name")
            .takes_value(true)
            .default_value("fast.bi")
            .help("Base domain name for the customer"),
        Arg::with_name("project_id")
            .long("project_id")
            .takes_value(true)
            .help("Cloud provider project ID (default: fast-bi-{customer} on GCP)"),
        Arg::with_name("region")
            .long("region")
            .takes_value(true)
            .help("Cloud region used for warehouse placement"),
        Arg::with_name("cluster_name")
            .long("cluster_name")
            .takes_value(true)
            .help("Kubernetes cluster name (default: fast-bi-{customer}-platform)"),
        Arg::with_name("kube_config_path")
            .long("kube_config_path")
            .takes_value(true)
            .help("Path to kubeconfig file (default: /tmp/{cluster_name}-kubeconfig.yaml)"),
        Arg::with_name("metadata_file")
            .long("metadata_file")
            .takes_value(true)
            .default_value("deployment_metadata.json")
            .help("Path to the deployment metadata journal"),
        Arg::with_name("skip_metadata")
            .long("skip_metadata")
            .help("Skip metadata collection"),
        Arg::with_name("dry-run")
            .long("dry-run")
            .help("Log commands without executing them"),
        Arg::with_name("debug")
            .long("debug")
            .help("Enable debug logging"),
    ]
}

fn vault_args<'a, 'b>() -> Vec<Arg<'a, 'b>> {
    vec![
        Arg::with_name("method")
            .long("method")
            .takes_value(true)
            .possible_values(&["local_vault", "external_infisical"])
            .default_value("local_vault")
            .help("Secret backend: the local vault file or the external service"),
        Arg::with_name("external_infisical_host")
            .long("external_infisical_host")
            .takes_value(true)
            .help("External secret service host (required for external_infisical)"),
        Arg::with_name("slug")
            .long("slug")
            .takes_value(true)
            .help("Vault project slug for this tenant"),
        Arg::with_name("vault_project_id")
            .long("vault_project_id")
            .takes_value(true)
            .help("Secret service workspace id (required for external_infisical)"),
        Arg::with_name("client_id")
            .long("client_id")
            .takes_value(true)
            .help("Secret service client id (required for external_infisical)"),
        Arg::with_name("client_secret")
            .long("client_secret")
            .takes_value(true)
            .help("Secret service client secret (required for external_infisical)"),
    ]
}

fn namespace_arg<'a, 'b>(default: &'a str) -> Arg<'a, 'b> {
    Arg::with_name("namespace")
        .long("namespace")
        .takes_value(true)
        .default_value(default)
        .help("Kubernetes namespace for the deployment")
}

fn app_version_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("app_version")
        .long("app_version")
        .takes_value(true)
        .help("Platform application version for this service")
}

fn bi_system_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("bi_system")
        .long("bi_system")
        .takes_value(true)
        .possible_values(&["superset", "lightdash", "metabase", "looker"])
        .help("BI system of this tenant")
}

fn destination_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("data_replication_default_destination_type")
        .long("data_replication_default_destination_type")
        .takes_value(true)
        .possible_values(&["bigquery", "snowflake", "redshift", "fabric"])
        .help("Default warehouse destination of the tenant")
}

fn service<'a, 'b>(name: &'static str, about: &'a str, ns: &'a str) -> App<'a, 'b> {
    SubCommand::with_name(name)
        .about(about)
        .args(&common_args())
        .args(&vault_args())
        .arg(namespace_arg(ns))
}

fn build_cli() -> App<'static, 'static> {
    App::new("fastbi-deploy")
        .version(crate_version!())
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .setting(AppSettings::VersionlessSubcommands)
        .setting(AppSettings::DeriveDisplayOrder)
        .about("Deploy the fast.bi data platform onto a tenant cluster")
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Increase logging verbosity"),
        )
        .subcommand(
            service(
                "secret-operator",
                "Deploy the secret operator (and local vault server)",
                "vault",
            )
            .arg(
                Arg::with_name("hc_vault_chart_version")
                    .long("hc_vault_chart_version")
                    .takes_value(true)
                    .help("HashiCorp Vault chart version (required for local_vault)"),
            ),
        )
        .subcommand(
            service("cert-manager", "Deploy the certificate manager", "cert-manager").arg(
                Arg::with_name("user_email")
                    .long("user_email")
                    .takes_value(true)
                    .required(true)
                    .help("Email address for ACME registration"),
            ),
        )
        .subcommand(
            service("traefik-lb", "Deploy the ingress load balancer", "traefik-ingress")
                .arg(
                    Arg::with_name("whitelisted_environment_ips")
                        .long("whitelisted_environment_ips")
                        .takes_value(true)
                        .multiple(true)
                        .help("CIDRs allowed through the load balancer"),
                )
                .arg(
                    Arg::with_name("external_ip")
                        .long("external_ip")
                        .takes_value(true)
                        .help("Pre-allocated load balancer address"),
                ),
        )
        .subcommand(service(
            "stackgres-postgresql",
            "Deploy the shared PostgreSQL operator and clusters",
            "global-postgresql",
        ))
        .subcommand(service(
            "services-monitoring",
            "Deploy platform monitoring",
            "monitoring",
        ))
        .subcommand(service(
            "idp-sso-manager",
            "Deploy the SSO identity provider with the tenant realm",
            "sso-keycloak",
        ))
        .subcommand(
            service(
                "cicd-workload-runner",
                "Deploy the CI/CD workload runner",
                "cicd-workload-trigger",
            )
            .arg(
                Arg::with_name("git_provider")
                    .long("git_provider")
                    .takes_value(true)
                    .possible_values(&["fastbi", "gitlab", "github", "gitea", "bitbucket"])
                    .help("Git provider hosting the tenant repositories"),
            )
            .arg(
                Arg::with_name("git_provider_url")
                    .long("git_provider_url")
                    .takes_value(true)
                    .help("Git provider URL, used to infer the provider"),
            )
            .arg(
                Arg::with_name("git_runner_access_token")
                    .long("git_runner_access_token")
                    .takes_value(true)
                    .help("Runner registration token override"),
            )
            .arg(
                Arg::with_name("git_runner_private_key")
                    .long("git_runner_private_key")
                    .takes_value(true)
                    .help("Deploy key override for the data model repository"),
            )
            .arg(
                Arg::with_name("git_repo_url")
                    .long("git_repo_url")
                    .takes_value(true)
                    .help("Data model repository URL override"),
            ),
        )
        .subcommand(
            service(
                "object-storage-operator",
                "Deploy the object storage operator and tenant",
                "minio",
            )
            .arg(
                Arg::with_name("operator_chart_version")
                    .long("operator_chart_version")
                    .takes_value(true)
                    .required(true)
                    .help("Chart version of the storage operator"),
            ),
        )
        .subcommand(
            service("data-replication", "Deploy data replication", "data-replication")
                .arg(app_version_arg())
                .arg(
                    Arg::with_name("oauth_chart_version")
                        .long("oauth_chart_version")
                        .takes_value(true)
                        .help("Chart version of the oauth proxy (default 7.18.0)"),
                )
                .arg(destination_arg()),
        )
        .subcommand(
            service(
                "data-orchestration",
                "Deploy data orchestration",
                "data-orchestration",
            )
            .arg(app_version_arg()),
        )
        .subcommand(
            service("data-modeling", "Deploy the data modeling IDE", "data-modeling")
                .arg(app_version_arg()),
        )
        .subcommand(
            service("data-analysis", "Deploy the data analysis hub", "data-analysis")
                .arg(app_version_arg())
                .arg(bi_system_arg()),
        )
        .subcommand(
            service("data-governance", "Deploy data governance", "data-governance")
                .arg(app_version_arg())
                .arg(
                    Arg::with_name("eck_es_app_version")
                        .long("eck_es_app_version")
                        .takes_value(true)
                        .help("Elasticsearch version managed by the operator"),
                )
                .arg(
                    Arg::with_name("prerequest_chart_version")
                        .long("prerequest_chart_version")
                        .takes_value(true)
                        .help("Chart version of the datahub prerequisites"),
                )
                .arg(
                    Arg::with_name("eck_es_chart_version")
                        .long("eck_es_chart_version")
                        .takes_value(true)
                        .help("Chart version of eck-elasticsearch"),
                )
                .arg(
                    Arg::with_name("eck_es_op_chart_version")
                        .long("eck_es_op_chart_version")
                        .takes_value(true)
                        .help("Chart version of eck-operator"),
                )
                .arg(bi_system_arg())
                .arg(destination_arg()),
        )
        .subcommand(
            service("user-console", "Deploy the tenant user console", "user-console")
                .arg(
                    Arg::with_name("tsb_fastbi_web_core_image_version")
                        .long("tsb_fastbi_web_core_image_version")
                        .takes_value(true)
                        .required(true)
                        .help("Image version of the web core"),
                )
                .arg(
                    Arg::with_name("tsb_dbt_init_core_image_version")
                        .long("tsb_dbt_init_core_image_version")
                        .takes_value(true)
                        .required(true)
                        .help("Image version of the init core"),
                )
                .arg(bi_system_arg())
                .arg(destination_arg())
                .arg(
                    Arg::with_name("fast_bi_statistics_id")
                        .long("fast_bi_statistics_id")
                        .takes_value(true)
                        .help("Opt-in anonymous statistics id"),
                ),
        )
        .subcommand(
            SubCommand::with_name("kubeconfig-fix")
                .about("Patch the gke auth plugin path inside a kubeconfig")
                .arg(
                    Arg::with_name("kubeconfig")
                        .required(true)
                        .help("Path to the kubeconfig file"),
                ),
        )
}

fn tenant_from(args: &ArgMatches) -> Result<Tenant> {
    let cloud = CloudProvider::from_str(args.value_of("cloud_provider").unwrap())?;
    Tenant::new(TenantOpts {
        customer: args.value_of("customer").unwrap().to_string(),
        domain: args.value_of("domain_name").unwrap().to_string(),
        cloud_provider: cloud,
        project_id: args.value_of("project_id").map(String::from),
        region: args.value_of("region").map(String::from),
        cluster_name: args.value_of("cluster_name").map(String::from),
        kubeconfig: args.value_of("kube_config_path").map(PathBuf::from),
        slug: args.value_of("slug").map(String::from),
    })
}

fn store_from(args: &ArgMatches) -> Result<SecretStore> {
    match args.value_of("method").unwrap() {
        "external_infisical" => {
            let mut store = SecretStore::remote(
                args.value_of("external_infisical_host").unwrap_or(""),
                args.value_of("vault_project_id").unwrap_or(""),
                args.value_of("client_id").unwrap_or(""),
                args.value_of("client_secret").unwrap_or(""),
            )?;
            store.authenticate()?;
            Ok(store)
        }
        _ => SecretStore::local(args.value_of("customer").unwrap()),
    }
}

fn journal_from(args: &ArgMatches) -> Journal {
    if args.is_present("skip_metadata") {
        info!("Metadata collection is disabled");
        Journal::null()
    } else {
        Journal::file(PathBuf::from(args.value_of("metadata_file").unwrap()))
    }
}

fn chart_version(args: &ArgMatches) -> String {
    args.value_of("chart_version").unwrap().to_string()
}

fn namespace(args: &ArgMatches) -> String {
    args.value_of("namespace").unwrap().to_string()
}

fn dispatch(name: &str, args: &ArgMatches) -> Result<String> {
    if args.is_present("dry-run") {
        exec::set_dry_run(true);
    }
    let tenant = tenant_from(args)?;
    let journal = journal_from(args);

    info!("Deploying {} for customer: {}", name, tenant.customer);
    info!("Cloud provider: {}", tenant.cloud_provider);

    // the ingress LB is the one service with no secret fan-out at all
    if name == "traefik-lb" {
        let opts = traefik::Opts {
            chart_version: chart_version(args),
            namespace: namespace(args),
            whitelisted_ips: args
                .values_of("whitelisted_environment_ips")
                .map(|v| v.map(String::from).collect())
                .unwrap_or_default(),
            external_ip: args.value_of("external_ip").map(String::from),
        };
        let plan = traefik::plan(&tenant, &opts)?;
        orchestrator::execute(plan, &tenant, &journal)?;
        return Ok("Traefik Ingress deployed successfully".into());
    }

    let store = store_from(args)?;

    match name {
        "secret-operator" => {
            let opts = secret_operator::Opts {
                chart_version: chart_version(args),
                hc_vault_chart_version: args
                    .value_of("hc_vault_chart_version")
                    .map(String::from),
                namespace: namespace(args),
            };
            let plan = secret_operator::plan(&tenant, &store, &opts)?;
            orchestrator::execute(plan, &tenant, &journal)?;
            Ok("Secret Manager and Operator deployed successfully".into())
        }
        "cert-manager" => {
            let opts = cert_manager::Opts {
                chart_version: chart_version(args),
                user_email: args.value_of("user_email").unwrap().to_string(),
                namespace: namespace(args),
            };
            let plan = cert_manager::plan(&tenant, &store, &opts)?;
            orchestrator::execute(plan, &tenant, &journal)?;
            Ok("Cert Manager and Cluster Issuer deployed successfully".into())
        }
        "stackgres-postgresql" => {
            let opts = stackgres::Opts {
                chart_version: chart_version(args),
                namespace: namespace(args),
            };
            let plan = stackgres::plan(&tenant, &store, &opts)?;
            orchestrator::execute(plan, &tenant, &journal)?;
            Ok("StackGres PostgreSQL deployed successfully".into())
        }
        "services-monitoring" => {
            let opts = monitoring::Opts {
                chart_version: chart_version(args),
                namespace: namespace(args),
            };
            let plan = monitoring::plan(&tenant, &store, &opts)?;
            orchestrator::execute(plan, &tenant, &journal)?;
            Ok("Platform Monitoring deployed successfully".into())
        }
        "idp-sso-manager" => {
            let opts = idp_sso::Opts {
                chart_version: chart_version(args),
                namespace: namespace(args),
            };
            let (plan, credentials) = idp_sso::plan(&tenant, &store, &opts)?;
            orchestrator::execute(plan, &tenant, &journal)?;
            Ok(format!(
                "IDP SSO Manager deployed successfully.\nAdmin username: {}\nAdmin password: {}",
                credentials.username, credentials.password
            ))
        }
        "cicd-workload-runner" => {
            let opts = cicd_runner::Opts {
                chart_version: chart_version(args),
                namespace: namespace(args),
                git_provider: args.value_of("git_provider").map(String::from),
                git_provider_url: args.value_of("git_provider_url").map(String::from),
                git_runner_access_token: args
                    .value_of("git_runner_access_token")
                    .map(String::from),
                git_runner_private_key: args
                    .value_of("git_runner_private_key")
                    .map(String::from),
                git_repo_url: args.value_of("git_repo_url").map(String::from),
            };
            let plan = cicd_runner::plan(&tenant, &store, &opts)?;
            orchestrator::execute(plan, &tenant, &journal)?;
            Ok("CICD Workload Runner deployed successfully".into())
        }
        "object-storage-operator" => {
            let opts = object_storage::Opts {
                chart_version: chart_version(args),
                operator_chart_version: args
                    .value_of("operator_chart_version")
                    .unwrap()
                    .to_string(),
                namespace: namespace(args),
            };
            let plan = object_storage::plan(&tenant, &store, &opts)?;
            orchestrator::execute(plan, &tenant, &journal)?;
            Ok("Platform Object Storage deployed successfully".into())
        }
        "data-replication" => {
            let opts = data_replication::Opts {
                chart_version: chart_version(args),
                app_version: args.value_of("app_version").map(String::from),
                oauth_chart_version: args.value_of("oauth_chart_version").map(String::from),
                namespace: namespace(args),
                destination_type: args
                    .value_of("data_replication_default_destination_type")
                    .map(String::from),
            };
            let plan = data_replication::plan(&tenant, &store, &opts)?;
            orchestrator::execute(plan, &tenant, &journal)?;
            Ok("Platform Data Replication deployed successfully".into())
        }
        "data-orchestration" => {
            let opts = data_orchestration::Opts {
                chart_version: chart_version(args),
                app_version: args.value_of("app_version").map(String::from),
                namespace: namespace(args),
            };
            let plan = data_orchestration::plan(&tenant, &store, &opts)?;
            orchestrator::execute(plan, &tenant, &journal)?;
            Ok("Platform Data Orchestration deployed successfully".into())
        }
        "data-modeling" => {
            let opts = data_modeling::Opts {
                chart_version: chart_version(args),
                app_version: args.value_of("app_version").map(String::from),
                namespace: namespace(args),
            };
            let plan = data_modeling::plan(&tenant, &store, &opts)?;
            orchestrator::execute(plan, &tenant, &journal)?;
            Ok("Platform Data Modeling deployed successfully".into())
        }
        "data-analysis" => {
            let bi = BiSystem::from_str(args.value_of("bi_system").unwrap_or("lightdash"))?;
            let opts = data_analysis::Opts {
                chart_version: chart_version(args),
                app_version: args.value_of("app_version").map(String::from),
                bi_system: bi,
                namespace: namespace(args),
            };
            let plan = data_analysis::plan(&tenant, &store, &opts)?;
            orchestrator::execute(plan, &tenant, &journal)?;
            Ok("Platform Data Analysis deployed successfully".into())
        }
        "data-governance" => {
            let opts = data_governance::Opts {
                chart_version: chart_version(args),
                app_version: args.value_of("app_version").map(String::from),
                eck_es_app_version: args.value_of("eck_es_app_version").map(String::from),
                prerequest_chart_version: args
                    .value_of("prerequest_chart_version")
                    .map(String::from),
                eck_es_chart_version: args.value_of("eck_es_chart_version").map(String::from),
                eck_es_op_chart_version: args
                    .value_of("eck_es_op_chart_version")
                    .map(String::from),
                bi_system: args.value_of("bi_system").map(String::from),
                destination_type: args
                    .value_of("data_replication_default_destination_type")
                    .map(String::from),
                namespace: namespace(args),
            };
            let plan = data_governance::plan(&tenant, &store, &opts)?;
            orchestrator::execute(plan, &tenant, &journal)?;
            Ok("Platform Data Governance deployed successfully".into())
        }
        "user-console" => {
            let opts = user_console::Opts {
                chart_version: chart_version(args),
                web_core_image_version: args
                    .value_of("tsb_fastbi_web_core_image_version")
                    .unwrap()
                    .to_string(),
                init_core_image_version: args
                    .value_of("tsb_dbt_init_core_image_version")
                    .unwrap()
                    .to_string(),
                bi_system: args.value_of("bi_system").map(String::from),
                destination_type: args
                    .value_of("data_replication_default_destination_type")
                    .map(String::from),
                fast_bi_statistics_id: args.value_of("fast_bi_statistics_id").map(String::from),
                namespace: namespace(args),
            };
            let plan = user_console::plan(&tenant, &store, &opts)?;
            orchestrator::execute(plan, &tenant, &journal)?;
            Ok("Platform User Console deployed successfully".into())
        }
        _ => bail_unknown(name),
    }
}

fn bail_unknown(name: &str) -> Result<String> {
    Err(failure::format_err!("Unhandled subcommand: {}", name))
}

fn run(matches: &ArgMatches) -> Result<String> {
    if let ("kubeconfig-fix", Some(args)) = matches.subcommand() {
        let path = Path::new(args.value_of("kubeconfig").unwrap());
        if !path.exists() {
            return Err(failure::format_err!(
                "Kubeconfig file not found: {}",
                path.display()
            ));
        }
        return match kubeconfig::fix_kubeconfig(path)? {
            kubeconfig::FixOutcome::Patched(plugin) => Ok(format!(
                "Kubeconfig fixed successfully (plugin at {})",
                plugin.display()
            )),
            kubeconfig::FixOutcome::AlreadyConfigured => {
                Ok("Kubeconfig already configured".into())
            }
        };
    }

    let (name, args) = match matches.subcommand() {
        (n, Some(a)) => (n, a),
        _ => unreachable!("SubcommandRequiredElseHelp is set"),
    };
    dispatch(name, args)
}

fn main() {
    let app = build_cli();
    let matches = app.get_matches();

    let mut verbosity = 2 + matches.occurrences_of("verbose");
    if matches
        .subcommand()
        .1
        .map(|a| a.is_present("debug"))
        .unwrap_or(false)
    {
        verbosity += 1;
    }
    loggerv::init_with_verbosity(verbosity).expect("logger initialises once");

    if let Err(e) = fastbi::init() {
        eprintln!("{}", e);
        process::exit(1);
    }

    match run(&matches) {
        Ok(result) => {
            println!("Execution Result:");
            println!("{}", result);
        }
        Err(e) => {
            error!("Deployment failed: {}", e);
            eprintln!("{}", e);
            process::exit(1);
        }
    }
}
