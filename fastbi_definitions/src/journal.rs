use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::Utc;

use crate::template::write_atomically;

// Journal IO errors
#[derive(Debug)]
struct JournalError {
    inner: failure::Context<JErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
enum JErrKind {
    #[fail(display = "Failed to write metadata to {}", _0)]
    WriteFailure(String),
}
use failure::{Backtrace, Context, Error, Fail, ResultExt};
use std::fmt::{self, Display};

// boilerplate error wrapping
impl Fail for JournalError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}
impl Display for JournalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}
impl From<JErrKind> for JournalError {
    fn from(kind: JErrKind) -> JournalError {
        JournalError {
            inner: Context::new(kind),
        }
    }
}
impl From<Context<JErrKind>> for JournalError {
    fn from(inner: Context<JErrKind>) -> JournalError {
        JournalError { inner }
    }
}
type Result<T> = std::result::Result<T, Error>;

/// A record value that is a scalar for single-release services and a map for
/// services that aggregate sub-releases
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum RecordValue {
    One(String),
    Many(BTreeMap<String, String>),
}

impl From<&str> for RecordValue {
    fn from(s: &str) -> RecordValue {
        RecordValue::One(s.to_string())
    }
}
impl From<String> for RecordValue {
    fn from(s: String) -> RecordValue {
        RecordValue::One(s)
    }
}

/// App versions observed after deployment
///
/// Sub-release entries can be absent (e.g. a local database that was not
/// deployed), which serializes as `null` to match the journal format.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum AppVersions {
    One(String),
    Many(BTreeMap<String, Option<String>>),
}

/// Which platform layer a deployment belongs to
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeployEnvironment {
    #[serde(rename = "infrastructure")]
    Infrastructure,
    #[serde(rename = "infrastructure-services")]
    InfrastructureServices,
    #[serde(rename = "data-services")]
    DataServices,
}

/// One deployment record, appended after every successful service run
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct DeploymentRecord {
    pub customer: String,
    pub customer_main_domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_vault_slug: Option<String>,
    pub deployment_environment: DeployEnvironment,
    pub deployment_name: String,
    pub chart_name: RecordValue,
    pub chart_version: RecordValue,
    pub app_name: RecordValue,
    pub app_version: AppVersions,
    pub deploy_date: String,
}

impl DeploymentRecord {
    /// Today's date in the journal's `YYYY-MM-DD` format
    pub fn today() -> String {
        Utc::now().format("%Y-%m-%d").to_string()
    }
}

/// Append-only journal of deployment records
///
/// `File` reads the JSON array if present, appends, and rewrites atomically.
/// `Null` is the opt-out used by `--skip_metadata`.
pub enum Journal {
    File(PathBuf),
    Null,
}

impl Journal {
    pub fn file(path: PathBuf) -> Journal {
        Journal::File(path)
    }

    pub fn null() -> Journal {
        Journal::Null
    }

    /// Append one record
    pub fn append(&self, record: DeploymentRecord) -> Result<()> {
        let path = match self {
            Journal::Null => {
                info!("Metadata collection skipped");
                return Ok(());
            }
            Journal::File(p) => p,
        };

        let mut records: Vec<serde_json::Value> = if path.exists() {
            let body = fs::read_to_string(path)
                .context(JErrKind::WriteFailure(path.display().to_string()))?;
            match serde_json::from_str(&body) {
                Ok(existing) => existing,
                Err(_) => {
                    warn!(
                        "Could not parse {}, starting with empty records",
                        path.display()
                    );
                    Vec::new()
                }
            }
        } else {
            info!(
                "Metadata file {} not found, will create new file",
                path.display()
            );
            Vec::new()
        };

        records.push(serde_json::to_value(&record)?);
        let body = serde_json::to_string_pretty(&records)?;
        write_atomically(path, &body)
            .context(JErrKind::WriteFailure(path.display().to_string()))?;
        info!("Deployment record added to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{AppVersions, DeployEnvironment, DeploymentRecord, Journal, RecordValue};
    use std::collections::BTreeMap;
    use std::fs;

    fn record(name: &str) -> DeploymentRecord {
        DeploymentRecord {
            customer: "acme".into(),
            customer_main_domain: "acme.fast.bi".into(),
            customer_vault_slug: Some("acme".into()),
            deployment_environment: DeployEnvironment::Infrastructure,
            deployment_name: name.into(),
            chart_name: "jetstack/cert-manager".into(),
            chart_version: "v1.13.0".into(),
            app_name: "cert-manager".into(),
            app_version: AppVersions::One("v1.13.0".into()),
            deploy_date: DeploymentRecord::today(),
        }
    }

    #[test]
    fn appends_one_record_per_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta/deployment_metadata.json");
        let journal = Journal::file(path.clone());

        journal.append(record("cert-manager")).unwrap();
        journal.append(record("cert-manager")).unwrap();

        let body = fs::read_to_string(&path).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0]["deployment_name"], "cert-manager");
        assert_eq!(parsed[0]["deployment_environment"], "infrastructure");
        assert_eq!(parsed[0]["customer_main_domain"], "acme.fast.bi");
    }

    #[test]
    fn unparseable_journal_restarts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployment_metadata.json");
        fs::write(&path, "not json").unwrap();
        let journal = Journal::file(path.clone());
        journal.append(record("monitoring")).unwrap();
        let parsed: Vec<serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn null_journal_is_a_noop() {
        Journal::null().append(record("cert-manager")).unwrap();
    }

    #[test]
    fn sub_release_versions_serialize_as_a_map() {
        let mut versions = BTreeMap::new();
        versions.insert("data_replication".to_string(), Some("1.4.1".to_string()));
        versions.insert("data_replication_psql".to_string(), None);
        let mut rec = record("data-replication");
        rec.app_version = AppVersions::Many(versions);
        rec.chart_name = RecordValue::Many(
            vec![
                ("data_replication".to_string(), "airbyte/airbyte".to_string()),
                (
                    "data_replication_oauth".to_string(),
                    "oauth2-proxy/oauth2-proxy".to_string(),
                ),
            ]
            .into_iter()
            .collect(),
        );
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["app_version"]["data_replication"], "1.4.1");
        assert!(v["app_version"]["data_replication_psql"].is_null());
        assert_eq!(v["chart_name"]["data_replication"], "airbyte/airbyte");
    }
}
