//! Dispatches five squaring tasks, stops the loop and prints the results.
//!
//! Set `RUST_LOG=evq_run=debug` to watch the loop wake up, and the `EVQ_*`
//! variables to configure the runtime.

use std::process::ExitCode;

use evq_run::{Builder, DispatchHandle};
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let runtime = Builder::from_env()?.build()?;

    let handles = (0..5)
        .map(|i| {
            runtime.dispatch(move || {
                println!("Hello from task {i:3}");
                i * i
            })
        })
        .collect::<Result<Vec<DispatchHandle<i32>>, _>>()?;

    println!("joining event loop...");
    let stats = runtime.shutdown()?;
    println!("complete ({} tasks run)", stats.completed);

    for handle in handles {
        println!("Res: {:3}", handle.wait()?);
    }
    Ok(())
}
