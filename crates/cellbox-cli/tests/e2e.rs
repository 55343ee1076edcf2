//! End-to-end tests for cellbox CLI commands.
//!
//! These tests verify that the CLI produces expected output
//! when run against real notebook files.

#![allow(deprecated)] // Allow deprecated Command::cargo_bin for tests

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test Helpers
// =============================================================================

/// Create a temporary directory with a test notebook.
struct TestNotebook {
    _temp_dir: TempDir,
    notebook_path: PathBuf,
}

impl TestNotebook {
    fn new(filename: &str, source: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let notebook_path = temp_dir.path().join(filename);
        fs::write(&notebook_path, source).expect("Failed to write notebook");

        Self {
            _temp_dir: temp_dir,
            notebook_path,
        }
    }

    fn path(&self) -> &str {
        self.notebook_path.to_str().unwrap()
    }
}

fn cellbox() -> Command {
    Command::cargo_bin("cellbox").expect("Failed to find cellbox binary")
}

/// Three cells, written out of order on purpose.
fn simple_notebook() -> &'static str {
    "\
# %% report
print('total', total)

# %% base
base = 21

# %% doubled
total = base * 2
total
"
}

// =============================================================================
// cellbox run Tests
// =============================================================================

#[test]
fn test_run_nonexistent_notebook() {
    cellbox()
        .args(["run", "/nonexistent/notebook.py"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_run_simple_notebook() {
    let notebook = TestNotebook::new("simple.py", simple_notebook());

    let output = cellbox()
        .args(["run", notebook.path()])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "cellbox run should succeed. stderr: {stderr}");

    assert!(stdout.contains("3 cells"), "Should report 3 cells. stdout: {stdout}");
    assert!(stdout.contains("Out: 42"), "Should show the value. stdout: {stdout}");
    assert!(stdout.contains("total 42"), "Should show printed output. stdout: {stdout}");
    assert!(stdout.contains("Completed"), "Should show completion. stdout: {stdout}");

    // Dependency order, not file order.
    let base = stdout.find("▶ base").unwrap();
    let report = stdout.find("▶ report").unwrap();
    assert!(base < report, "base should run before report. stdout: {stdout}");
}

#[test]
fn test_run_specific_cell() {
    let notebook = TestNotebook::new("specific.py", simple_notebook());

    cellbox()
        .args(["run", notebook.path(), "--cell", "doubled"])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 cells in"))
        .stdout(predicate::str::contains("▶ report").not());
}

#[test]
fn test_run_nonexistent_cell() {
    let notebook = TestNotebook::new("nonexistent_cell.py", simple_notebook());

    cellbox()
        .args(["run", notebook.path(), "--cell", "nonexistent"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_run_empty_notebook() {
    let notebook = TestNotebook::new("empty.py", "# %%\n\n# %%\n   \n");

    cellbox()
        .args(["run", notebook.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains("No cells found"));
}

#[test]
fn test_run_failure_skips_dependents() {
    let source = "# %% a\nx = 1 / 0\n# %% b\ny = x + 1\n# %% c\nprint('independent')\n";
    let notebook = TestNotebook::new("failing.py", source);

    cellbox()
        .args(["run", notebook.path()])
        .assert()
        .failure()
        .stdout(predicate::str::contains("skipped"))
        .stdout(predicate::str::contains("independent"))
        .stderr(predicate::str::contains("ZeroDivisionError"));
}

#[test]
fn test_run_startup_file() {
    let notebook = TestNotebook::new("uses_startup.py", "# %%\ngreeting\n");
    let startup = notebook._temp_dir.path().join("startup.py");
    fs::write(&startup, "greeting = 'hi'\n").unwrap();

    cellbox()
        .args(["run", notebook.path(), "--startup", startup.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Out: 'hi'"));
}

#[test]
fn test_run_failing_startup() {
    let notebook = TestNotebook::new("bad_startup.py", "# %%\n1\n");
    let startup = notebook._temp_dir.path().join("startup.py");
    fs::write(&startup, "raise ValueError('broken')\n").unwrap();

    cellbox()
        .args(["run", notebook.path(), "--startup", startup.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bootstrap failed"))
        .stderr(predicate::str::contains("hint"));
}

// =============================================================================
// cellbox analyze Tests
// =============================================================================

#[test]
fn test_analyze_json() {
    let notebook = TestNotebook::new("graph.py", simple_notebook());

    let output = cellbox()
        .args(["analyze", notebook.path(), "--json", "--changed", "base"])
        .output()
        .expect("Failed to execute command");
    assert!(output.status.success());

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("analyze --json should print JSON");
    assert_eq!(report["order"], serde_json::json!(["base", "doubled", "report"]));
    assert_eq!(report["invalidated"], serde_json::json!(["base", "doubled", "report"]));
    assert_eq!(report["cells"][0]["references"], serde_json::json!(["total"]));
}

#[test]
fn test_analyze_cycle() {
    let notebook = TestNotebook::new("cycle.py", "# %% a\nx = y + 1\n# %% b\ny = x + 1\n");

    cellbox()
        .args(["analyze", notebook.path()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cyclic dependency"));
}

// =============================================================================
// cellbox check Tests
// =============================================================================

#[test]
fn test_check_clean_notebook() {
    let notebook = TestNotebook::new("clean.py", simple_notebook());

    cellbox()
        .args(["check", notebook.path()])
        .assert()
        .success()
        .stdout(predicate::str::contains("All checks passed"));
}

#[test]
fn test_check_reports_problems() {
    let source = "# %% a\nprint(undefined_thing)\n# %% b\nif 1 is 1:\n    pass\n";
    let notebook = TestNotebook::new("lint.py", source);

    cellbox()
        .args(["check", notebook.path()])
        .assert()
        .failure()
        .stdout(predicate::str::contains(":2:7: "))
        .stdout(predicate::str::contains("F821"))
        .stdout(predicate::str::contains("F632"))
        .stderr(predicate::str::contains("Found 2 problem(s)"));
}
