use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` picks the filter, `info`
/// otherwise; the `tracing_json` and `tracing_noansi` features pick the
/// output format.
pub fn setup_tracing() {
    let filter =
        || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if cfg!(feature = "tracing_json") {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter())
                .finish(),
        )
    } else {
        tracing::subscriber::set_global_default(
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_ansi(!cfg!(feature = "tracing_noansi"))
                .finish(),
        )
    };

    if let Err(e) = result {
        eprintln!("Couldn't set global tracing subscriber: {}", e);
    }
}
