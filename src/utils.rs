//! Utility functions

use std::path::{Path, PathBuf};

/// Reduce a value to a filesystem-safe token: anything outside
/// `[A-Za-z0-9_-]` becomes `_`, runs are collapsed, and the result falls back
/// to `default` when nothing survives
pub fn sanitize_filename(value: &str, default: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_was_sep = true;
    for c in value.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Deterministic artifact path for a case: `processo_<case number>.pdf`
/// under the target directory
pub fn artifact_path(target_dir: &Path, case_number: &str) -> PathBuf {
    let safe = sanitize_filename(case_number, "processo");
    target_dir.join(format!("processo_{safe}.pdf"))
}

/// Extract a query parameter from a portal URL (absolute or relative)
pub fn query_param(href: &str, name: &str) -> Option<String> {
    let parsed = url::Url::parse(href).or_else(|_| {
        url::Url::parse("https://portal.invalid/")
            .and_then(|base| base.join(href.trim_start_matches('/')))
    });
    let parsed = parsed.ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_case_numbers_into_filenames() {
        assert_eq!(
            sanitize_filename("1500.01.0098765/2023-42", "processo"),
            "1500_01_0098765_2023-42"
        );
        assert_eq!(sanitize_filename("///", "processo"), "processo");
    }

    #[test]
    fn artifact_path_is_deterministic() {
        let path = artifact_path(Path::new("/tmp/out"), "1500.01.0098765/2023-42");
        assert_eq!(
            path,
            PathBuf::from("/tmp/out/processo_1500_01_0098765_2023-42.pdf")
        );
    }

    #[test]
    fn extracts_query_params_from_relative_hrefs() {
        let href = "controlador.php?acao=procedimento_trabalhar&id_procedimento=410&infra_hash=abc123";
        assert_eq!(query_param(href, "id_procedimento").as_deref(), Some("410"));
        assert_eq!(query_param(href, "infra_hash").as_deref(), Some("abc123"));
        assert_eq!(query_param(href, "missing"), None);
    }
}
