use anyhow::{Result, anyhow};
use log_override::{cli, config::Config};

fn main() -> Result<()> {
    let matches = cli::build_cli().get_matches();
    let config = Config::from_args(&matches)?;

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Cannot install the rustls crypto provider"))?;

    log_override::run(config)
}
