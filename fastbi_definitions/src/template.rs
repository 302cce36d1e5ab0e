use std::error::Error as StdError;
use std::fs;
use std::path::Path;

use regex::Regex;
use tera::Tera;
pub use tera::Context;

// Errors a values render can produce
#[derive(Debug)]
struct TemplateError {
    inner: FailureContext<TErrKind>,
}

#[derive(Clone, Eq, PartialEq, Debug, Fail)]
enum TErrKind {
    #[fail(display = "Template file not found: {}", _0)]
    TemplateMissing(String),

    #[fail(display = "Failed to render template {}: {}", _0, _1)]
    RenderFailure(String, String),

    #[fail(display = "Failed to write rendered output to {}", _0)]
    WriteFailure(String),
}
use failure::{Backtrace, Context as FailureContext, Error, Fail, ResultExt};
use std::fmt::{self, Display};

// boilerplate error wrapping
impl Fail for TemplateError {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }
    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}
impl Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.inner, f)
    }
}
impl From<TErrKind> for TemplateError {
    fn from(kind: TErrKind) -> TemplateError {
        TemplateError {
            inner: FailureContext::new(kind),
        }
    }
}
impl From<FailureContext<TErrKind>> for TemplateError {
    fn from(inner: FailureContext<TErrKind>) -> TemplateError {
        TemplateError { inner }
    }
}
type Result<T> = std::result::Result<T, Error>;

// Flatten a tera error chain into one line so the failing expression
// survives into our error message.
fn describe(e: &tera::Error) -> String {
    let mut msg = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

// Value templates reference flat identifiers. Identifiers the call site did
// not provide render as empty strings, matching the lenient semantics of the
// templating environment the charts were written against.
fn default_missing_variables(content: &str, ctx: &Context) -> Context {
    let provided = ctx.clone().into_json();
    let re = Regex::new(r"\{\{-?\s*([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    let mut filled = ctx.clone();
    for caps in re.captures_iter(content) {
        let ident = &caps[1];
        if provided.get(ident).is_none() {
            trace!("Template variable {} not provided, rendering empty", ident);
            filled.insert(ident.to_string(), "");
        }
    }
    filled
}

/// Render a template file into an output file with the given variables
///
/// The template must exist. Variables absent from the context pass through
/// as empty strings. The output is written atomically (temp file then
/// rename) and parent directories are created as needed.
pub fn render_file(template_path: &Path, output_path: &Path, ctx: &Context) -> Result<()> {
    if !template_path.exists() {
        return Err(TErrKind::TemplateMissing(template_path.display().to_string()).into());
    }
    debug!(
        "Rendering template {} to {}",
        template_path.display(),
        output_path.display()
    );

    let content = fs::read_to_string(template_path)
        .context(TErrKind::TemplateMissing(template_path.display().to_string()))?;

    let name = template_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "template".to_string());
    let mut tera = Tera::default();
    tera.add_raw_template(&name, &content).map_err(|e| {
        TemplateError::from(TErrKind::RenderFailure(
            template_path.display().to_string(),
            describe(&e),
        ))
    })?;
    let filled = default_missing_variables(&content, ctx);
    let rendered = tera.render(&name, &filled).map_err(|e| {
        TemplateError::from(TErrKind::RenderFailure(
            template_path.display().to_string(),
            describe(&e),
        ))
    })?;

    write_atomically(output_path, &rendered)
}

/// Write a file via a temp file and rename in the target directory
pub fn write_atomically(output_path: &Path, content: &str) -> Result<()> {
    if let Some(dir) = output_path.parent() {
        if !dir.as_os_str().is_empty() && !dir.exists() {
            info!("Creating output directory: {}", dir.display());
            fs::create_dir_all(dir)
                .context(TErrKind::WriteFailure(output_path.display().to_string()))?;
        }
    }
    let file_name = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    let tmp = output_path.with_file_name(format!(".{}.tmp", file_name));
    fs::write(&tmp, content)
        .context(TErrKind::WriteFailure(output_path.display().to_string()))?;
    fs::rename(&tmp, output_path)
        .context(TErrKind::WriteFailure(output_path.display().to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{render_file, Context};
    use std::fs;
    use std::path::Path;

    fn write(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
    }

    #[test]
    fn renders_with_variables() {
        let dir = tempfile::tempdir().unwrap();
        let tpl = dir.path().join("template_values.yaml");
        write(&tpl, "serviceAccount: {{ cert_manager_k8s_sa }}\n");
        let out = dir.path().join("generated/values.yaml");

        let mut ctx = Context::new();
        ctx.insert(
            "cert_manager_k8s_sa",
            "cert-manager-k8s-sa@fast-bi-acme.iam.gserviceaccount.com",
        );
        render_file(&tpl, &out, &ctx).unwrap();

        let rendered = fs::read_to_string(&out).unwrap();
        assert_eq!(
            rendered,
            "serviceAccount: cert-manager-k8s-sa@fast-bi-acme.iam.gserviceaccount.com\n"
        );
        // no temp file left behind
        assert!(!dir.path().join("generated/.values.yaml.tmp").exists());
    }

    #[test]
    fn missing_template_is_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let err = render_file(
            &dir.path().join("nope.yaml"),
            &dir.path().join("out.yaml"),
            &Context::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("Template file not found"));
    }

    #[test]
    fn undefined_variable_renders_empty() {
        let dir = tempfile::tempdir().unwrap();
        let tpl = dir.path().join("t.yaml");
        write(&tpl, "provided: {{ chart_version }}\nabsent: {{ not_provided }}\n");
        let out = dir.path().join("out.yaml");
        let mut ctx = Context::new();
        ctx.insert("chart_version", "v1.13.0");
        render_file(&tpl, &out, &ctx).unwrap();
        assert_eq!(
            fs::read_to_string(&out).unwrap(),
            "provided: v1.13.0\nabsent: \n"
        );
    }

    #[test]
    fn malformed_template_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let tpl = dir.path().join("t.yaml");
        write(&tpl, "value: {{ unclosed\n");
        let out = dir.path().join("out.yaml");
        let err = render_file(&tpl, &out, &Context::new()).unwrap_err();
        assert!(err.to_string().contains("Failed to render template"));
        // nothing written on failure
        assert!(!out.exists());
    }
}
