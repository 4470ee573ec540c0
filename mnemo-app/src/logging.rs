use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "warn";

/// Picks the filter directive: `MNEMO_LOG`, then `RUST_LOG`, then the configured level.
fn filter_directive(mnemo_log: Option<String>, rust_log: Option<String>, configured: Option<&str>) -> String {
    [mnemo_log, rust_log, configured.map(str::to_owned)]
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_FILTER.to_owned())
}

/// Installs the stderr subscriber. Stdout stays reserved for command output.
pub fn init(configured: Option<&str>) {
    let directive = filter_directive(
        std::env::var("MNEMO_LOG").ok(),
        std::env::var("RUST_LOG").ok(),
        configured,
    );
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_wins_over_config() {
        assert_eq!(filter_directive(Some("debug".into()), Some("info".into()), Some("error")), "debug");
        assert_eq!(filter_directive(None, Some("info".into()), Some("error")), "info");
        assert_eq!(filter_directive(Some(" ".into()), None, Some("error")), "error");
        assert_eq!(filter_directive(None, None, None), "warn");
    }
}
