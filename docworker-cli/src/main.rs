use std::process::ExitCode;

use tracing::error;

use docworker::logging::init_fallback_tracing;
use docworker::{initialize, run_worker, InitializationError, WorkerExit};

#[tokio::main]
async fn main() -> ExitCode {
    let (context, handle) = match initialize(std::env::args_os()) {
        Ok(initialized) => initialized,
        Err(InitializationError::Argument(e)) => {
            // Help and version requests are not failures
            let _ = e.print();
            return if e.use_stderr() {
                WorkerExit::StartupFailure.into()
            } else {
                ExitCode::SUCCESS
            };
        }
        Err(e) => {
            if !e.logging_ready() {
                init_fallback_tracing();
            }
            error!("document worker failed to initialize, exit: {}", e);
            return WorkerExit::StartupFailure.into();
        }
    };

    run_worker(context, handle).await.into()
}
