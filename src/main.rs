use clap::Parser;
use snyk_issues::{Cli, run};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();
    let config = match cli.into_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    log::info!("filing issues against {}", config.repo);
    run(&config).await.unwrap();
}
