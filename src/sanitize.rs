//! Post-processing of model output into a test file.
//!
//! - [`clean_test_code`] extracts the body of a fenced code block.
//! - [`prepend_module_import`] adds a best-effort wildcard import for Python.
//! - [`test_file_name`] derives the output file name from the source path.

use std::path::{Component, Path};

use crate::scanner::extension_for;

const FENCE: &str = "```";

/// Extract the interior of the first fenced code block, dropping the info
/// string (` ```python `). Text without a fence is returned trimmed but
/// otherwise verbatim. Stray fence markers left in the extracted text are
/// removed.
pub fn clean_test_code(raw: &str) -> String {
    let text = raw.trim();
    let Some(open) = text.find(FENCE) else {
        return text.to_string();
    };

    let after_open = &text[open + FENCE.len()..];
    // Skip the info string up to the end of the opening line.
    let body = match after_open.find('\n') {
        Some(nl) => &after_open[nl + 1..],
        None => after_open,
    };
    let interior = match body.find(FENCE) {
        Some(close) => &body[..close],
        None => body,
    };

    interior.replace(FENCE, "").trim().to_string()
}

/// Python module path for a repository-relative file: separators become
/// dots, hyphens become underscores, the extension is dropped.
pub fn module_path(relative: &Path) -> String {
    relative
        .with_extension("")
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().replace('-', "_")),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// For Python sources that are not themselves tests, prefix the generated
/// code with `from <module> import *`. Other languages pass through.
///
/// Package layouts with a `src/` root or namespace packages will get an
/// import that does not resolve; that is accepted.
pub fn prepend_module_import(language: &str, relative: &Path, code: &str) -> String {
    if !language.eq_ignore_ascii_case("python") {
        return code.to_string();
    }

    let base = relative
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if base.contains("test_") {
        return code.to_string();
    }

    format!("from {} import *\n\n{}", module_path(relative), code)
}

/// `test_<sanitised relative path>.<ext>`.
///
/// The extension is stripped, then every character outside
/// `[A-Za-z0-9_.-]` (path separators included) becomes `_`.
pub fn test_file_name(language: &str, relative: &Path) -> String {
    let stem = relative.with_extension("").to_string_lossy().to_string();
    let safe: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("test_{}.{}", safe, extension_for(language))
}
