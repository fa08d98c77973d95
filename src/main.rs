use clap::Parser;
use whisper_aloud::app;
use whisper_aloud::cli::Cli;
use whisper_aloud::error::WhisperAloudError;

// Exit codes: 0 success, 1 user/operational error, 130 interrupt.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = app::run(cli).await {
        if matches!(e, WhisperAloudError::Interrupted) {
            std::process::exit(130);
        }
        eprintln!("whisper-aloud: {}", e);
        std::process::exit(1);
    }
}
