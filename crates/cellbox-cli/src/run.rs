//! Run command implementation.
//!
//! Executes a notebook headlessly: cells run one at a time in dependency
//! order against a single sandbox, either on a thread of this process or in
//! a `cellbox-worker` child process.

use std::collections::HashSet;
use std::io::Write;
use std::time::Instant;

use cellbox_core::{
    Error, HostMessage, Outcome, SandboxConfig, SandboxEvent, SandboxHandle, StreamKind, UnitId,
    UnitIndex, WorkerProcess,
};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::colors;
use crate::notebook::Notebook;

/// A sandbox the CLI can feed cells to.
enum Session {
    Local {
        handle: SandboxHandle,
        events: UnboundedReceiver<SandboxEvent>,
    },
    Worker(WorkerProcess),
}

impl Session {
    async fn start(config: SandboxConfig, isolated: bool) -> cellbox_core::Result<Self> {
        if isolated {
            return WorkerProcess::spawn(&config).map(Session::Worker);
        }
        let (handle, mut events) = SandboxHandle::spawn(config)?;
        handle.send(HostMessage::Init)?;
        loop {
            match events.recv().await {
                Some(SandboxEvent::Ready) => return Ok(Session::Local { handle, events }),
                Some(SandboxEvent::FatalError { message }) => return Err(Error::Bootstrap(message)),
                Some(other) => tracing::debug!(?other, "Ignoring event before ready"),
                None => return Err(Error::Ipc("sandbox thread has stopped".to_string())),
            }
        }
    }

    async fn run(
        &mut self,
        unit_id: &UnitId,
        code: &str,
        mut on_event: impl FnMut(SandboxEvent),
    ) -> cellbox_core::Result<Outcome> {
        match self {
            Session::Worker(worker) => worker.run(unit_id, code, on_event),
            Session::Local { handle, events } => {
                handle.send(HostMessage::Run {
                    unit_id: unit_id.clone(),
                    code: code.to_string(),
                })?;
                loop {
                    match events.recv().await {
                        Some(SandboxEvent::Result { unit_id: done, outcome }) if &done == unit_id => {
                            return Ok(outcome);
                        }
                        Some(other) => on_event(other),
                        None => return Err(Error::Ipc("sandbox thread has stopped".to_string())),
                    }
                }
            }
        }
    }

    fn shutdown(self) -> cellbox_core::Result<()> {
        match self {
            Session::Local { handle, .. } => handle.shutdown(),
            Session::Worker(worker) => worker.shutdown(),
        }
    }
}

/// Execute a notebook.
pub async fn execute(
    notebook_path: &str,
    cell_filter: Option<&str>,
    isolated: bool,
    config: SandboxConfig,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let notebook = Notebook::load(notebook_path)?;
    println!(
        "\n{}Running{} {} ({} cells)",
        colors::BOLD,
        colors::RESET,
        notebook.path.display(),
        notebook.cells.len()
    );

    if notebook.cells.is_empty() {
        println!(
            "\n{}No cells found in notebook.{}",
            colors::YELLOW,
            colors::RESET
        );
        println!("Cells start at lines beginning with `# %%`");
        return Ok(());
    }

    let graph = notebook.graph()?;
    let mut order = graph.topological_order()?;
    if let Some(name) = cell_filter {
        let target = graph.find(name)?;
        let needed = ancestors(&graph, target);
        order.retain(|id| needed.contains(id));
    }

    let mut session = Session::start(config, isolated).await?;
    println!("{}", "─".repeat(50));

    let mut failed: HashSet<UnitIndex> = HashSet::new();
    let mut skipped = 0usize;
    let mut executed = 0usize;
    let exec_start = Instant::now();

    for id in order {
        let Some(cell) = graph.get_unit(id).and_then(|unit| notebook.cell(&unit.name)) else {
            continue;
        };
        if graph.dependencies(id).iter().any(|dep| failed.contains(dep)) {
            println!(
                "{}○ {}{} skipped (a dependency failed)",
                colors::DIM,
                cell.name,
                colors::RESET
            );
            failed.insert(id);
            skipped += 1;
            continue;
        }

        println!("{}▶ {}{}", colors::CYAN, cell.name, colors::RESET);
        let unit_id = UnitId::new(cell.name.clone());
        let outcome = session.run(&unit_id, &cell.source, print_event).await?;
        executed += 1;
        if !print_outcome(&outcome) {
            failed.insert(id);
        }
    }
    let execution_time = exec_start.elapsed();
    session.shutdown()?;

    let total_time = start.elapsed();
    println!("\n{}", "─".repeat(50));
    let errors = failed.len() - skipped;
    if errors > 0 {
        println!(
            "{}Failed{} {} of {} cells ({} skipped) in {:.2}s",
            colors::RED,
            colors::RESET,
            errors,
            executed,
            skipped,
            total_time.as_secs_f64()
        );
        anyhow::bail!("{errors} cell(s) raised an exception");
    }
    println!(
        "{}Completed{} {} cells in {:.2}s (execution: {:.2}s)",
        colors::GREEN,
        colors::RESET,
        executed,
        total_time.as_secs_f64(),
        execution_time.as_secs_f64()
    );
    Ok(())
}

/// `target` and everything it transitively reads from.
fn ancestors(graph: &cellbox_core::GraphEngine, target: UnitIndex) -> HashSet<UnitIndex> {
    let mut seen = HashSet::from([target]);
    let mut stack = vec![target];
    while let Some(id) = stack.pop() {
        for dep in graph.dependencies(id) {
            if seen.insert(dep) {
                stack.push(dep);
            }
        }
    }
    seen
}

fn print_event(event: SandboxEvent) {
    match event {
        SandboxEvent::Output { stream: StreamKind::Out, text, .. } => {
            print!("{text}");
            std::io::stdout().flush().ok();
        }
        SandboxEvent::Output { stream: StreamKind::Err, text, .. } => eprint!("{text}"),
        other => tracing::debug!(?other, "Unhandled event"),
    }
}

/// Print a cell's outcome. Returns whether it succeeded.
fn print_outcome(outcome: &Outcome) -> bool {
    match outcome {
        Outcome::Success { value, render } => {
            if let Some(render) = render {
                println!("{}[{}]{}", colors::DIM, render.mime_type, colors::RESET);
            } else if let Some(value) = value {
                println!("{}Out: {}{}", colors::DIM, value, colors::RESET);
            }
            true
        }
        Outcome::Failure {
            ename,
            evalue,
            traceback,
        } => {
            // The last traceback line is the exception itself.
            let frames = traceback.split_last().map_or(&[][..], |(_, frames)| frames);
            for line in frames {
                eprintln!("{}{}{}", colors::DIM, line.trim_end(), colors::RESET);
            }
            eprintln!("{}{ename}: {evalue}{}", colors::RED, colors::RESET);
            false
        }
    }
}
