//! Cellbox worker process.
//!
//! Hosts one sandbox and speaks newline-delimited JSON: host messages on
//! stdin, sandbox events on stdout. Logs go to stderr so stdout stays a
//! clean protocol stream.
//!
//! Settings come from `CELLBOX_*` environment variables, see
//! [`SandboxConfig::from_env`]. Log filtering follows `RUST_LOG`.

use std::io::BufReader;
use std::pin::pin;
use std::time::Duration;

use cellbox_core::interp::{AbortHandle, EVAL_STACK_SIZE};
use cellbox_core::ipc::read_message;
use cellbox_core::sandbox::{HostMessage, Sandbox, SandboxEvent, protocol::encode_line, serve};
use cellbox_core::{Error, SandboxConfig};
use tokio::io::{AsyncWriteExt, Stdout};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// How often in-flight units are polled for completion at exit.
const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = SandboxConfig::from_env();
    tracing::debug!(?config, "Worker starting");

    let (message_tx, message_rx) = unbounded_channel();
    spawn_stdin_reader(message_tx)?;

    // Guest evaluation needs a deeper stack than the main thread has.
    std::thread::Builder::new()
        .name("cellbox-sandbox".to_string())
        .stack_size(EVAL_STACK_SIZE)
        .spawn(move || -> anyhow::Result<()> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()?;
            runtime.block_on(run_sandbox(config, message_rx))
        })?
        .join()
        .map_err(|_| anyhow::anyhow!("sandbox thread panicked"))?
}

/// Forward stdin lines to the sandbox on a plain thread.
///
/// A blocking reader thread never holds up process exit the way a pending
/// async stdin read would. Undecodable lines are logged and skipped.
fn spawn_stdin_reader(messages: UnboundedSender<HostMessage>) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("cellbox-stdin".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(std::io::stdin().lock());
            loop {
                match read_message::<_, HostMessage>(&mut reader) {
                    Ok(message) => {
                        if messages.send(message).is_err() {
                            break;
                        }
                    }
                    Err(Error::Serialization(e)) => {
                        tracing::warn!(error = %e, "Skipping malformed host message");
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Host input closed");
                        break;
                    }
                }
            }
        })?;
    Ok(())
}

async fn run_sandbox(
    config: SandboxConfig,
    messages: UnboundedReceiver<HostMessage>,
) -> anyhow::Result<()> {
    let (event_tx, mut events) = unbounded_channel();
    let sandbox = Sandbox::new(config, event_tx, AbortHandle::new());
    let mut stdout = tokio::io::stdout();

    // Driving the task set here, around `serve`, keeps runs accepted
    // before the loop ended going until their results are out.
    let result = sandbox
        .run_until(async {
            let mut serving = pin!(serve(sandbox.clone(), messages));
            loop {
                tokio::select! {
                    () = &mut serving => break,
                    Some(event) = events.recv() => write_event(&mut stdout, &event).await?,
                }
            }

            tokio::task::yield_now().await;
            while sandbox.in_flight() > 0 {
                tokio::select! {
                    Some(event) = events.recv() => write_event(&mut stdout, &event).await?,
                    () = tokio::time::sleep(DRAIN_INTERVAL) => {}
                }
            }
            while let Ok(event) = events.try_recv() {
                write_event(&mut stdout, &event).await?;
            }
            anyhow::Ok(())
        })
        .await;
    sandbox.tasks().close();
    tracing::debug!(dropped = sandbox.output().dropped_count(), "Worker exiting");
    result
}

async fn write_event(stdout: &mut Stdout, event: &SandboxEvent) -> anyhow::Result<()> {
    let mut line = encode_line(event)?;
    line.push('\n');
    stdout.write_all(line.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
