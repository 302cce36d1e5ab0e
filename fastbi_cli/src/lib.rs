#![recursion_limit = "1024"]
#![allow(renamed_and_removed_lints)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;
extern crate serde_yaml;

extern crate base64;
extern crate openssl_probe;
extern crate tera;

#[macro_use]
extern crate log;

#[macro_use]
extern crate failure;

pub use failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

extern crate fastbi_definitions;
pub use fastbi_definitions::journal::{
    AppVersions, DeployEnvironment, DeploymentRecord, Journal, RecordValue,
};
pub use fastbi_definitions::template;
pub use fastbi_definitions::{Backend, CloudProvider, SecretStore, Tenant};

/// External process execution with captured streams and a dry-run switch
pub mod exec;

/// A small CLI helm interface
pub mod helm;

/// A small CLI kubernetes interface
pub mod kube;

/// Release steps and their state machine
pub mod release;

/// Per-service deployment plans driven through the release engine
pub mod orchestrator;

/// The tenant OAuth client catalog and realm document builder
pub mod realm;

/// Locator/patcher for the gke auth plugin inside kubeconfigs
pub mod kubeconfig;

/// One module per platform service
pub mod services;

/// Process wide initialisation for the CLI
pub fn init() -> Result<()> {
    openssl_probe::init_ssl_cert_env_vars(); // prerequisite for https clients
    Ok(())
}
