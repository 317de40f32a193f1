use aiterm::config::Config;
use aiterm::provider;
use aiterm::session::Session;
use clap::Command;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    Command::new("aiterm")
        .version(env!("CARGO_PKG_VERSION"))
        .about("AI assistant for the terminal")
        .long_about(
            "aiterm turns natural-language requests into shell scripts, shows them, \
             and runs them on confirmation.\n\n\
             Inside the prompt:\n  \
             $<command>  run a shell command directly\n  \
             clear       reset the conversation\n  \
             config      edit ~/.aiterm with $EDITOR\n  \
             exit        quit",
        )
        .get_matches();

    let config = Config::load()?;
    info!("Starting with model {}", config.model);

    let provider = provider::build(&config)?;
    let mut session = Session::new(provider)?;
    session.run().await
}
