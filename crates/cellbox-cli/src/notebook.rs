//! Notebook files.
//!
//! A notebook is a plain source file split into cells by `# %%` marker
//! lines. Text after the marker names the cell; unnamed cells are called
//! `cell_<n>`. Anything before the first marker is a cell of its own.

use std::path::{Path, PathBuf};

use cellbox_core::{GraphEngine, UnitInfo};

const CELL_MARKER: &str = "# %%";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub name: String,
    pub source: String,
    /// File line (1-indexed) of the first source line.
    pub line: u32,
}

#[derive(Debug)]
pub struct Notebook {
    pub path: PathBuf,
    pub cells: Vec<Cell>,
}

impl Notebook {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let path = PathBuf::from(path);
        if !path.exists() {
            anyhow::bail!("Notebook not found: {}", path.display());
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(Self::parse(&path, &text))
    }

    pub fn parse(path: &Path, text: &str) -> Self {
        let mut cells = Vec::new();
        let mut pending: Option<(Option<String>, u32)> = Some((None, 1));
        let mut body: Vec<&str> = Vec::new();

        for (index, line) in text.lines().enumerate() {
            let line_no = index as u32 + 1;
            if let Some(rest) = line.trim_start().strip_prefix(CELL_MARKER) {
                if let Some((name, start)) = pending.take() {
                    push_cell(&mut cells, name, start, &body);
                }
                body.clear();
                let name = rest.trim();
                pending = Some(((!name.is_empty()).then(|| name.to_string()), line_no + 1));
            } else {
                body.push(line);
            }
        }
        if let Some((name, start)) = pending {
            push_cell(&mut cells, name, start, &body);
        }

        Self {
            path: path.to_path_buf(),
            cells,
        }
    }

    pub fn cell(&self, name: &str) -> Option<&Cell> {
        self.cells.iter().find(|cell| cell.name == name)
    }

    /// The reactive graph over this notebook's cells, in file order.
    pub fn graph(&self) -> cellbox_core::Result<GraphEngine> {
        let mut graph = GraphEngine::new();
        for cell in &self.cells {
            graph.add_unit(UnitInfo::from_source(cell.name.clone(), &cell.source));
        }
        graph.resolve_dependencies()?;
        Ok(graph)
    }
}

/// Blank cells are dropped.
fn push_cell(cells: &mut Vec<Cell>, name: Option<String>, line: u32, body: &[&str]) {
    let source = body.join("\n");
    if source.trim().is_empty() {
        return;
    }
    let name = name.unwrap_or_else(|| format!("cell_{}", cells.len() + 1));
    cells.push(Cell {
        name,
        source: source.trim_end().to_string(),
        line,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Notebook {
        Notebook::parse(Path::new("nb.py"), text)
    }

    #[test]
    fn test_split_on_markers() {
        let nb = parse("# %% setup\nx = 1\n\n# %%\ny = x + 1\n# %% show\nprint(y)\n");
        let names: Vec<&str> = nb.cells.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["setup", "cell_2", "show"]);
        assert_eq!(nb.cells[0].source, "x = 1");
        assert_eq!(nb.cells[0].line, 2);
        assert_eq!(nb.cells[1].line, 5);
        assert_eq!(nb.cell("show").unwrap().source, "print(y)");
    }

    #[test]
    fn test_preamble_and_blank_cells() {
        let nb = parse("import math\n# %% empty\n\n   \n# %%\nmath.pi\n");
        assert_eq!(nb.cells.len(), 2);
        assert_eq!(nb.cells[0].name, "cell_1");
        assert_eq!(nb.cells[0].line, 1);
        assert_eq!(nb.cells[1].name, "cell_2");
        assert_eq!(nb.cells[1].line, 6);
    }

    #[test]
    fn test_no_markers_is_one_cell() {
        let nb = parse("a = 1\nb = 2");
        assert_eq!(nb.cells.len(), 1);
        assert_eq!(nb.cells[0].source, "a = 1\nb = 2");
        assert!(parse("").cells.is_empty());
    }

    #[test]
    fn test_graph_follows_names() {
        let order = |nb: &Notebook| -> Vec<String> {
            let graph = nb.graph().unwrap();
            graph
                .topological_order()
                .unwrap()
                .into_iter()
                .map(|id| graph.get_unit(id).unwrap().name.clone())
                .collect()
        };
        assert_eq!(order(&parse("# %% c\nprint(y)\n# %% b\ny = x * 2\n# %% a\nx = 1\n")), ["a", "b", "c"]);

        let cyclic = parse("# %% a\nx = y + 1\n# %% b\ny = x * 2\n");
        assert!(matches!(cyclic.graph(), Err(cellbox_core::Error::CyclicDependency(_))));
    }
}
