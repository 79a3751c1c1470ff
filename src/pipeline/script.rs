//! Suite script materialization
//!
//! Execute and restore bodies run as `bash <tempfile>`. The file starts with
//! strict-mode settings and diagnostic traps, and wraps the product command so
//! everything it prints is also appended to the product's own log files
//! while still reaching the script's captured output.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Renders suite bodies into runnable scripts
#[derive(Debug, Clone)]
pub struct SuiteScript {
    product: String,
    product_stdout: PathBuf,
    product_stderr: PathBuf,
}

impl SuiteScript {
    pub fn new(
        product: impl Into<String>,
        product_stdout: impl Into<PathBuf>,
        product_stderr: impl Into<PathBuf>,
    ) -> Self {
        Self {
            product: product.into(),
            product_stdout: product_stdout.into(),
            product_stderr: product_stderr.into(),
        }
    }

    /// Product log files live directly under `logs_dir`
    pub fn in_logs_dir(product: &str, logs_dir: &Path) -> Self {
        Self::new(
            product,
            logs_dir.join(format!("{}.stdout.log", product)),
            logs_dir.join(format!("{}.stderr.log", product)),
        )
    }

    pub fn render(&self, body: &str) -> String {
        let mut script = String::from(
            r#"#!/usr/bin/env bash
set -Eeuo pipefail
__runner_on_err() { echo "❌ suite script failed at line $1: $2" >&2; }
__runner_on_exit() { local ec=$?; if [ "$ec" -ne 0 ]; then echo "❌ suite script exited with code $ec" >&2; fi; }
trap '__runner_on_err "$LINENO" "$BASH_COMMAND"' ERR
trap __runner_on_exit EXIT
"#,
        );

        if is_function_name(&self.product) {
            script.push_str(&format!(
                "__RUNNER_PRODUCT_STDOUT={}\n__RUNNER_PRODUCT_STDERR={}\n",
                quote(&self.product_stdout),
                quote(&self.product_stderr)
            ));
            script.push_str(&format!(
                "{p}() {{ command {p} \"$@\" > >(tee -a \"$__RUNNER_PRODUCT_STDOUT\") 2> >(tee -a \"$__RUNNER_PRODUCT_STDERR\" >&2); }}\n",
                p = self.product
            ));
        } else if !self.product.is_empty() {
            tracing::warn!(product = %self.product, "product command is not a valid shell function name; output will not be teed");
        }

        script.push('\n');
        script.push_str(body);
        if !body.ends_with('\n') {
            script.push('\n');
        }
        script
    }

    /// Write the rendered script to a private temporary file, removed on drop
    pub fn materialize(&self, body: &str) -> io::Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("suite-")
            .suffix(".sh")
            .tempfile()?;
        file.write_all(self.render(body).as_bytes())?;
        file.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(file)
    }
}

fn is_function_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    shlex::try_quote(&raw)
        .map(|q| q.into_owned())
        .unwrap_or_else(|_| format!("'{}'", raw.replace('\'', "'\\''")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_wraps_product() {
        let script = SuiteScript::new("oxidizr-arch", "/p/logs/o.out", "/p/logs/o.err");
        let text = script.render("oxidizr-arch --assume-yes enable");
        assert!(text.starts_with("#!/usr/bin/env bash\nset -Eeuo pipefail\n"));
        assert!(text.contains("oxidizr-arch() { command oxidizr-arch \"$@\""));
        assert!(text.contains("__RUNNER_PRODUCT_STDOUT="));
        assert!(text.contains("/p/logs/o.out"));
        assert!(text.ends_with("oxidizr-arch --assume-yes enable\n"));
    }

    #[test]
    fn test_unsafe_product_name_is_not_wrapped() {
        let script = SuiteScript::new("rm -rf", "/a", "/b");
        let text = script.render("true");
        assert!(!text.contains("command rm"));
    }

    #[test]
    fn test_paths_with_spaces_are_quoted() {
        let script = SuiteScript::new("tool", "/p/my logs/o.out", "/p/e");
        let text = script.render("true");
        let value = text
            .lines()
            .find_map(|l| l.strip_prefix("__RUNNER_PRODUCT_STDOUT="))
            .unwrap();
        assert_eq!(shlex::split(value).unwrap(), vec!["/p/my logs/o.out"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_materialized_file_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let script = SuiteScript::in_logs_dir("tool", Path::new("/tmp"));
        let file = script.materialize("echo hi").unwrap();
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
    }
}
