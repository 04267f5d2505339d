use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    packsync::cli::run().await
}
