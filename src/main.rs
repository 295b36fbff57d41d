//! Math Agent - interactive entry point.
//!
//! Reads one query per line and prints the answer. `exit` quits. Arguments
//! given on the command line are answered once instead.

use math_agent::{config, config::Config, repl, MathAgent};
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Before logging, so RUST_LOG may come from the file
    let env_file = config::load_dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "math_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match env_file {
        Ok(Some(path)) => info!("Loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => warn!("{}", e),
    }

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, policy={}, tool={} {}",
        config.default_model,
        config.policy_version,
        config.tool_server.command,
        config.tool_server.args.join(" ")
    );

    let agent = MathAgent::from_config(&config)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        let query = args.join(" ");
        println!("{}", agent.answer(query.trim()).await);
        agent.flush_events().await;
        return Ok(());
    }

    let answered = repl::run_interactive(
        &agent,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;
    info!("Session ended after {} queries", answered);
    agent.flush_events().await;

    Ok(())
}
