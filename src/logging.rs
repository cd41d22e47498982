use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "trezor_provider=info";

/// Install a `fmt` subscriber filtered by `RUST_LOG`, or `trezor_provider=info`
/// when it is unset. Records from the `log` macros are forwarded as well.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init() {
    init_with_default(DEFAULT_FILTER);
}

pub fn init_with_default(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Try to initialize tracing, ignore if already initialized
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_is_idempotent() {
        super::init();
        super::init_with_default("debug");
        tracing::info!("logging initialised twice without panicking");
    }
}
