use tracing_subscriber::EnvFilter;

/// Installs a global tracing subscriber honouring `RUST_LOG`. Later calls
/// are no-ops so every binary can call it unconditionally.
pub fn init_tracing() {
    init_tracing_with_default("text2model_core=info");
}

/// Same as [`init_tracing`] with a caller-chosen fallback filter. Output
/// goes to stderr so stdout stays usable for machine-readable replies.
pub fn init_tracing_with_default(default_filter: &str) {
    let env_filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
