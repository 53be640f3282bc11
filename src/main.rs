//! authstore - persistence layer for user accounts and login sessions

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<()> {
    // SQL statements are traced under `authstore::sql`, hidden at this level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authstore=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::debug!("Starting authstore v{}", env!("CARGO_PKG_VERSION"));

    authstore::cli::run()
}
