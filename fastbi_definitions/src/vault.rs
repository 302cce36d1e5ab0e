use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

// All main errors that can happen during secret resolution
#[derive(Debug)]
struct SecretError {
    inner: Context<SErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
enum SErrKind {
    #[fail(display = "Secret {} not found at path {}", _0, _1)]
    SecretNotFound(String, String),

    #[fail(display = "Path {} not found in vault structure (missing segment '{}')", _0, _1)]
    PathNotFound(String, String),

    #[fail(display = "secret '{}' at '{}' could not be reached or accessed", _0, _1)]
    SecretNotAccessible(String, String),

    #[fail(display = "vault structure file not found: {}", _0)]
    VaultFileMissing(String),

    #[fail(display = "authentication against the secret service was rejected")]
    CredentialsRejected,

    #[fail(display = "secret service call attempted before authentication")]
    NotAuthenticated,

    #[fail(display = "Unexpected HTTP status {} from {}", _0, _1)]
    UnexpectedHttpStatus(reqwest::StatusCode, String),

    #[fail(display = "could not access URL '{}'", _0)]
    Url(String),
}
use failure::{Backtrace, Context, Error, Fail, ResultExt};
use std::fmt::{self, Display};

// boilerplate error wrapping
impl Fail for SecretError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}
impl Display for SecretError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}
impl From<SErrKind> for SecretError {
    fn from(kind: SErrKind) -> SecretError {
        SecretError {
            inner: Context::new(kind),
        }
    }
}
impl From<Context<SErrKind>> for SecretError {
    fn from(inner: Context<SErrKind>) -> SecretError {
        SecretError { inner }
    }
}
type Result<T> = std::result::Result<T, Error>;

/// Secrets in the local vault tree can be integers or strings
///
/// If they are integers, we coerce them to strings. This is mostly a
/// convenience because quoting integers in generated vault files is easy
/// to get wrong without them ending up double quoted.
#[derive(Debug, Deserialize, Clone)]
#[serde(untagged)]
enum SecretValue {
    S(String),
    I(i64),
}
impl From<SecretValue> for String {
    fn from(sv: SecretValue) -> String {
        match sv {
            SecretValue::I(i) => i.to_string(),
            SecretValue::S(s) => s,
        }
    }
}

/// Token response from the universal-auth login endpoint
#[derive(Debug, Deserialize)]
struct AuthResponse {
    #[serde(rename = "accessToken")]
    access_token: String,
}

/// Raw secret envelope returned by the secret service
#[derive(Debug, Deserialize)]
struct RawSecret {
    secret: RawSecretInner,
}
#[derive(Debug, Deserialize)]
struct RawSecretInner {
    #[serde(rename = "secretValue")]
    secret_value: String,
}

/// Where secrets come from for one orchestrator run
#[derive(Clone, Debug)]
pub enum Backend {
    /// Decrypted JSON tree on local disk
    Local { file: PathBuf },
    /// Token-authenticated secret service
    Remote {
        host: String,
        workspace: String,
        client_id: String,
        client_secret: String,
        environment: String,
    },
}

/// Uniform secret resolver over the two backends
///
/// Stateless apart from the access token, which is acquired once per run via
/// `authenticate` and never refreshed.
pub struct SecretStore {
    backend: Backend,
    client: reqwest::blocking::Client,
    token: Option<String>,
}

impl SecretStore {
    /// Local backend for a customer, using the conventional vault file path
    pub fn local(customer: &str) -> Result<SecretStore> {
        let file = PathBuf::from(format!("/tmp/{}_customer_vault_structure.json", customer));
        SecretStore::local_file(file)
    }

    /// Local backend from an explicit vault structure file
    ///
    /// The file must exist at construction time.
    pub fn local_file(file: PathBuf) -> Result<SecretStore> {
        if !file.exists() {
            return Err(SErrKind::VaultFileMissing(file.display().to_string()).into());
        }
        Ok(SecretStore {
            backend: Backend::Local { file },
            client: reqwest::blocking::Client::new(),
            token: None,
        })
    }

    /// Remote backend against the external secret service
    ///
    /// Requires the full credential tuple; the environment is always `prod`.
    pub fn remote(
        host: &str,
        workspace: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Result<SecretStore> {
        ensure!(!host.is_empty(), "external secret service host is required");
        ensure!(
            !workspace.is_empty() && !client_id.is_empty() && !client_secret.is_empty(),
            "vault_project_id, client_id and client_secret are required for the external secret service"
        );
        Ok(SecretStore {
            backend: Backend::Remote {
                host: host.trim_end_matches('/').to_string(),
                workspace: workspace.to_string(),
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
                environment: "prod".to_string(),
            },
            client: reqwest::blocking::Client::new(),
            token: None,
        })
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// True when the store talks to the remote secret service
    pub fn is_remote(&self) -> bool {
        match self.backend {
            Backend::Remote { .. } => true,
            Backend::Local { .. } => false,
        }
    }

    /// Acquire an access token from the secret service
    ///
    /// No-op for the local backend. Called once per orchestrator run.
    pub fn authenticate(&mut self) -> Result<()> {
        let (host, client_id, client_secret) = match &self.backend {
            Backend::Local { .. } => return Ok(()),
            Backend::Remote {
                host,
                client_id,
                client_secret,
                ..
            } => (host.clone(), client_id.clone(), client_secret.clone()),
        };
        let url = format!("{}/api/v1/auth/universal-auth/login", host);
        debug!("POST {}", url);
        let res = self
            .client
            .post(&url)
            .form(&[("clientId", client_id), ("clientSecret", client_secret)])
            .send()
            .context(SErrKind::Url(url.clone()))?;
        if !res.status().is_success() {
            if res.status().is_client_error() {
                return Err(SErrKind::CredentialsRejected.into());
            }
            return Err(SErrKind::UnexpectedHttpStatus(res.status(), url).into());
        }
        let auth: AuthResponse = res.json().context(SErrKind::Url(url))?;
        self.token = Some(auth.access_token);
        Ok(())
    }

    /// Read one secret by name from a slash-delimited path
    pub fn get(&self, name: &str, path: &str) -> Result<String> {
        self.get_with(name, path, "prod", None, "shared", false)
    }

    /// Read one secret with the full remote parameter set
    pub fn get_with(
        &self,
        name: &str,
        path: &str,
        environment: &str,
        version: Option<u32>,
        secret_type: &str,
        include_imports: bool,
    ) -> Result<String> {
        match &self.backend {
            Backend::Local { file } => self.get_local(file, name, path),
            Backend::Remote {
                host, workspace, ..
            } => self.get_remote(
                host,
                workspace,
                name,
                path,
                environment,
                version,
                secret_type,
                include_imports,
            ),
        }
    }

    fn get_local(&self, file: &PathBuf, name: &str, path: &str) -> Result<String> {
        let mut f = File::open(file)
            .context(SErrKind::VaultFileMissing(file.display().to_string()))?;
        let mut body = String::new();
        f.read_to_string(&mut body)?;
        let tree: serde_json::Value = serde_json::from_str(&body)?;

        // Descend the JSON structure by slash separated path segments
        let mut current = &tree;
        for segment in path.trim_matches('/').split('/').filter(|s| !s.is_empty()) {
            current = match current.get(segment) {
                Some(next) => next,
                None => {
                    return Err(
                        SErrKind::PathNotFound(path.to_string(), segment.to_string()).into(),
                    )
                }
            };
        }
        match current.get(name) {
            Some(v) => {
                let sv: SecretValue = serde_json::from_value(v.clone()).context(
                    SErrKind::SecretNotAccessible(name.to_string(), path.to_string()),
                )?;
                Ok(sv.into())
            }
            None => Err(SErrKind::SecretNotFound(name.to_string(), path.to_string()).into()),
        }
    }

    fn get_remote(
        &self,
        host: &str,
        workspace: &str,
        name: &str,
        path: &str,
        environment: &str,
        version: Option<u32>,
        secret_type: &str,
        include_imports: bool,
    ) -> Result<String> {
        let token = match &self.token {
            Some(t) => t.clone(),
            None => return Err(SErrKind::NotAuthenticated.into()),
        };
        let url = format!("{}/api/v3/secrets/raw/{}", host, name);
        let mut params = vec![
            ("workspaceId", workspace.to_string()),
            ("environment", environment.to_string()),
            ("secretPath", path.to_string()),
            ("type", secret_type.to_string()),
            ("include_imports", include_imports.to_string()),
        ];
        if let Some(v) = version {
            params.push(("version", v.to_string()));
        }
        debug!("GET {} (secretPath={})", url, path);
        let res = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&params)
            .send()
            .context(SErrKind::Url(url.clone()))?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(SErrKind::SecretNotFound(name.to_string(), path.to_string()).into());
        }
        if !res.status().is_success() {
            return Err(SErrKind::UnexpectedHttpStatus(res.status(), url).into());
        }
        let raw: RawSecret = res
            .json()
            .context(SErrKind::SecretNotAccessible(name.to_string(), path.to_string()))?;
        Ok(raw.secret.secret_value)
    }
}

#[cfg(test)]
mod tests {
    use super::SecretStore;
    use std::io::Write;

    fn local_store(json: &str) -> (tempfile::TempDir, SecretStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.json");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(json.as_bytes()).unwrap();
        let store = SecretStore::local_file(path).unwrap();
        (dir, store)
    }

    #[test]
    fn local_descends_nested_paths() {
        let (_d, store) = local_store(
            r#"{"idp-sso": {"database-secrets": {"username": "keycloak", "port": 5432}}}"#,
        );
        assert_eq!(
            store.get("username", "/idp-sso/database-secrets/").unwrap(),
            "keycloak"
        );
        // integers coerced to strings
        assert_eq!(
            store.get("port", "/idp-sso/database-secrets/").unwrap(),
            "5432"
        );
    }

    #[test]
    fn local_missing_name_names_the_secret() {
        let (_d, store) = local_store(r#"{"a": {"b": {"x": "1"}}}"#);
        let err = store.get("X", "/a/b").unwrap_err();
        assert_eq!(err.to_string(), "Secret X not found at path /a/b");
    }

    #[test]
    fn local_missing_path_names_the_segment() {
        let (_d, store) = local_store(r#"{"a": {"b": {"x": "1"}}}"#);
        let err = store.get("x", "/a/missing/").unwrap_err();
        assert!(err.to_string().contains("missing segment 'missing'"));
    }

    #[test]
    fn local_backend_requires_the_file() {
        let res = SecretStore::local("no-such-customer-xyz");
        assert!(res.is_err());
    }

    #[test]
    fn remote_backend_requires_full_credentials() {
        assert!(SecretStore::remote("https://inf.example", "", "id", "sec").is_err());
        assert!(SecretStore::remote("", "w", "id", "sec").is_err());
        assert!(SecretStore::remote("https://inf.example", "w", "id", "sec").is_ok());
    }

    #[test]
    fn remote_roundtrip_against_mock() {
        let _auth = mockito::mock("POST", "/api/v1/auth/universal-auth/login")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken": "tok-123"}"#)
            .create();
        let _secret = mockito::mock("GET", "/api/v3/secrets/raw/adminUser")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("workspaceId".into(), "ws-1".into()),
                mockito::Matcher::UrlEncoded("environment".into(), "prod".into()),
                mockito::Matcher::UrlEncoded("secretPath".into(), "/idp-sso/root-secrets/".into()),
                mockito::Matcher::UrlEncoded("type".into(), "shared".into()),
                mockito::Matcher::UrlEncoded("include_imports".into(), "false".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"secret": {"secretValue": "root"}}"#)
            .create();

        let mut store =
            SecretStore::remote(&mockito::server_url(), "ws-1", "cid", "csec").unwrap();
        store.authenticate().unwrap();
        let v = store.get("adminUser", "/idp-sso/root-secrets/").unwrap();
        assert_eq!(v, "root");
    }

    #[test]
    fn remote_get_before_authenticate_fails() {
        let store = SecretStore::remote("https://inf.example", "w", "id", "sec").unwrap();
        assert!(store.get("x", "/a/").is_err());
    }
}
