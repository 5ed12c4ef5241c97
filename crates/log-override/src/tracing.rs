use anyhow::{Result, anyhow};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

// Setup the tracing system. This MUST be done inside of a tokio Runtime
// because the kube client emits events while being built.
pub fn setup_tracing(log_level: &str, log_fmt: &str, log_no_color: bool) -> Result<()> {
    // some of our dependencies generate trace events too, but we don't care about them ->
    // let's filter them
    let mut filter_layer = EnvFilter::new(log_level);
    for directive in ["h2=off", "hyper=off", "rustls=off", "tower=off"] {
        filter_layer = filter_layer.add_directive(
            directive
                .parse()
                .map_err(|e| anyhow!("invalid tracing directive {directive}: {e}"))?,
        );
    }

    match log_fmt {
        "json" => tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt::layer().json())
            .try_init()?,
        "text" => {
            let fmt_layer = fmt::layer().with_ansi(!log_no_color);

            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .try_init()?
        }
        _ => return Err(anyhow!("Unknown log message format")),
    };

    Ok(())
}
