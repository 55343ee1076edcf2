//! Analyze command implementation.
//!
//! Prints each cell's definitions and references, the order cells run in,
//! and optionally which cells a change would invalidate.

use cellbox_core::{GraphEngine, UnitIndex};
use serde::Serialize;

use crate::colors;
use crate::notebook::Notebook;

#[derive(Debug, Serialize)]
struct CellReport {
    name: String,
    line: u32,
    definitions: Vec<String>,
    references: Vec<String>,
    dependencies: Vec<String>,
    unresolved: Vec<String>,
}

#[derive(Debug, Serialize)]
struct GraphReport {
    cells: Vec<CellReport>,
    order: Vec<String>,
    levels: Vec<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    invalidated: Option<Vec<String>>,
}

fn names(graph: &GraphEngine, ids: impl IntoIterator<Item = UnitIndex>) -> Vec<String> {
    ids.into_iter()
        .filter_map(|id| graph.get_unit(id))
        .map(|unit| unit.name.clone())
        .collect()
}

fn build_report(notebook: &Notebook, changed: Option<&str>) -> anyhow::Result<GraphReport> {
    let graph = notebook.graph()?;
    let cells = graph
        .units()
        .zip(&notebook.cells)
        .map(|((id, unit), cell)| CellReport {
            name: unit.name.clone(),
            line: cell.line,
            definitions: unit.definitions.clone(),
            references: unit.references.clone(),
            dependencies: names(&graph, graph.dependencies(id)),
            unresolved: graph.unresolved(id).to_vec(),
        })
        .collect();
    let invalidated = match changed {
        Some(name) => Some(names(&graph, graph.invalidated_units(graph.find(name)?))),
        None => None,
    };
    Ok(GraphReport {
        cells,
        order: names(&graph, graph.topological_order()?),
        levels: graph
            .topological_levels()
            .into_iter()
            .map(|level| names(&graph, level))
            .collect(),
        invalidated,
    })
}

/// Analyze a notebook's dependency graph.
pub fn execute(notebook_path: &str, changed: Option<&str>, json: bool) -> anyhow::Result<()> {
    let notebook = Notebook::load(notebook_path)?;
    let report = build_report(&notebook, changed)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "\n{}Analyzing{} {} ({} cells)\n",
        colors::BOLD,
        colors::RESET,
        notebook.path.display(),
        report.cells.len()
    );
    for cell in &report.cells {
        println!("{}{}{} (line {})", colors::CYAN, cell.name, colors::RESET, cell.line);
        println!("  defines:    {}", cell.definitions.join(", "));
        println!("  references: {}", cell.references.join(", "));
        if !cell.dependencies.is_empty() {
            println!("  after:      {}", cell.dependencies.join(", "));
        }
        if !cell.unresolved.is_empty() {
            println!(
                "  {}unresolved: {}{}",
                colors::YELLOW,
                cell.unresolved.join(", "),
                colors::RESET
            );
        }
    }

    println!("\n{}Execution order:{} {}", colors::BOLD, colors::RESET, report.order.join(" → "));
    for (depth, level) in report.levels.iter().enumerate() {
        println!("  level {depth}: {}", level.join(", "));
    }
    if let (Some(changed), Some(invalidated)) = (changed, &report.invalidated) {
        println!(
            "\n{}Changing {changed} re-runs:{} {}",
            colors::BOLD,
            colors::RESET,
            invalidated.join(" → ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn test_report() {
        let notebook = Notebook::parse(
            Path::new("nb.py"),
            "# %% load\nimport math\nr = 2\n# %% area\na = math.pi * r ** 2\n# %% show\nprint(a, extra)\n# %% other\nz = 0\n",
        );
        let report = build_report(&notebook, Some("load")).unwrap();
        assert_eq!(report.order, ["load", "area", "show", "other"]);
        assert_eq!(report.levels, [vec!["load", "other"], vec!["area"], vec!["show"]]);
        assert_eq!(report.cells[1].dependencies, ["load"]);
        assert_eq!(report.cells[2].unresolved, ["extra"]);
        assert_eq!(report.invalidated.as_deref(), Some(&["load".to_string(), "area".into(), "show".into()][..]));
    }

    #[test]
    fn test_unknown_changed_cell() {
        let notebook = Notebook::parse(Path::new("nb.py"), "x = 1\n");
        let err = build_report(&notebook, Some("nope")).unwrap_err();
        assert!(err.to_string().contains("unit not found"));
    }
}
