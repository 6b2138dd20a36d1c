#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use query_gateway::{config::Config, run_server, telemetry, AppState};

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "query-gateway", version, about = "Answer questions from the web or a private database")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve,
    /// Answer one question and print the result
    Ask {
        question: String,
        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,
    },
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = Config::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(cfg).await,
        Command::Ask { question, conversation } => {
            telemetry::init_tracing("warn");
            let state = AppState::from_config(cfg)?;
            let store = &state.history.conversations;
            let convo = store.get_or_create(conversation.as_deref())?;
            let output = state
                .orchestrator
                .handle(&question, &convo.id, state.shutdown.child_token())
                .await;
            store.add_messages(&convo.id, &[("user", question.as_str()), ("assistant", output.as_str())])?;
            println!("{}", output);
            eprintln!("conversation: {}", convo.id);
            Ok(())
        }
    }
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
