use tracing_subscriber::EnvFilter;

/// Log targets under this crate.
const OUR_CRATE: &str = "qol_daemon";

/// Filter directive used when `RUST_LOG` is unset.
fn default_spec(debug: bool) -> String {
    if debug {
        format!("info,{OUR_CRATE}=debug")
    } else {
        "info".to_string()
    }
}

/// Picks the filter directive: an explicit `RUST_LOG` wins, then `--debug`,
/// then plain `info`.
fn filter_spec(env: Option<&str>, debug: bool) -> String {
    match env.map(str::trim) {
        Some(spec) if !spec.is_empty() => spec.to_string(),
        _ => default_spec(debug),
    }
}

/// Installs the global `fmt` subscriber. Safe to call once per process; later
/// calls are ignored.
pub fn init(debug: bool) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let spec = filter_spec(env.as_deref(), debug);
    let filter = EnvFilter::try_new(&spec).unwrap_or_else(|e| {
        eprintln!("invalid log filter {spec:?} ({e}), using defaults");
        EnvFilter::new(default_spec(debug))
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
