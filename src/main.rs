use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    jobmill::boot::boot().await
}
