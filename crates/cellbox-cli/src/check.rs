//! Check command implementation: lint every cell of a notebook.
//!
//! Cells share one namespace, so a name defined by any cell is known to
//! all of them.

use std::collections::HashSet;

use cellbox_core::{Diagnostic, Severity, analyze, lint};

use crate::colors;
use crate::notebook::Notebook;

/// A diagnostic placed in the notebook file.
#[derive(Debug, serde::Serialize)]
struct Finding {
    cell: String,
    #[serde(flatten)]
    diagnostic: Diagnostic,
}

fn collect(notebook: &Notebook) -> Vec<Finding> {
    let known: HashSet<String> = notebook
        .cells
        .iter()
        .flat_map(|cell| analyze(&cell.source).definitions)
        .collect();

    notebook
        .cells
        .iter()
        .flat_map(|cell| {
            lint(&cell.source, false, |name| known.contains(name))
                .diagnostics
                .into_iter()
                .map(move |mut diagnostic| {
                    diagnostic.line += cell.line - 1;
                    Finding {
                        cell: cell.name.clone(),
                        diagnostic,
                    }
                })
        })
        .collect()
}

/// Lint a notebook. Fails if anything was reported.
pub fn execute(notebook_path: &str, json: bool) -> anyhow::Result<()> {
    let notebook = Notebook::load(notebook_path)?;
    let findings = collect(&notebook);

    if json {
        println!("{}", serde_json::to_string_pretty(&findings)?);
    } else {
        for Finding { cell, diagnostic } in &findings {
            let color = match diagnostic.severity {
                Severity::Error => colors::RED,
                Severity::Warning => colors::YELLOW,
            };
            println!(
                "{}:{}:{}: {color}{}{} {} {}[{cell}]{}",
                notebook.path.display(),
                diagnostic.line,
                diagnostic.col,
                diagnostic.code,
                colors::RESET,
                diagnostic.message,
                colors::DIM,
                colors::RESET,
            );
        }
    }

    if findings.is_empty() {
        if !json {
            println!("{}All checks passed!{}", colors::GREEN, colors::RESET);
        }
        return Ok(());
    }
    anyhow::bail!("Found {} problem(s)", findings.len())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_cross_cell_names_are_known() {
        let notebook = Notebook::parse(
            Path::new("nb.py"),
            "# %% a\nprint(later)\n# %% b\nlater = 1\nprint(missing)\n",
        );
        let findings = collect(&notebook);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].cell, "b");
        assert_eq!(findings[0].diagnostic.code, "F821");
        assert_eq!(findings[0].diagnostic.line, 5);
    }

    #[test]
    fn test_syntax_error_line_in_file() {
        let notebook = Notebook::parse(Path::new("nb.py"), "# %% ok\nx = 1\n# %% bad\n\ndef f(:\n");
        let findings = collect(&notebook);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].diagnostic.code, "E999");
        assert_eq!(findings[0].diagnostic.severity, Severity::Error);
        assert_eq!(findings[0].diagnostic.line, 5);
    }
}
