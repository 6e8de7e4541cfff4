use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// Logs go to stderr so that stdout stays free for command output. `RUST_LOG` takes
/// precedence over `default_filter`. sqlx logs every statement at `info`,
/// which drowns out ledger logs, so it is lowered to `warn` unless `RUST_LOG` says otherwise.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)?.add_directive("sqlx=warn".parse()?),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .try_init()?;
    Ok(())
}
