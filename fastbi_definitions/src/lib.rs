#![recursion_limit = "1024"]
#![allow(renamed_and_removed_lints)]

#[macro_use]
extern crate serde_derive;
extern crate serde;
extern crate serde_json;

extern crate tera;

#[macro_use]
extern crate log;

extern crate chrono;
extern crate regex;
extern crate reqwest;

#[macro_use]
extern crate failure;

pub use failure::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Tenant identity and cloud specific composition
pub mod tenant;
pub use tenant::{CloudProvider, OidcUrls, Tenant};

/// A secret resolver over the local vault file or the remote secret service
pub mod vault;
pub use vault::{Backend, SecretStore};

/// A renderer of `tera` templates (jinja style)
///
/// Used for the per-release values documents fed to helm.
pub mod template;

/// Append-only deployment metadata journal
pub mod journal;
pub use journal::{DeploymentRecord, Journal};
