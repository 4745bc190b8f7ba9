use tracing_subscriber::EnvFilter;

/// Log level for the keeper crates given `-v`/`-q`.
fn level(verbose: u8, quiet: bool) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    }
}

/// `RUST_LOG` wins when set and valid; otherwise keeper's own crates log at
/// the level picked on the command line and everything else stays at `warn`.
fn build_env_filter(verbose: u8, quiet: bool) -> EnvFilter {
    let level = level(verbose, quiet);
    let default = format!(
        "warn,keeper={level},keeper_config={level},keeper_policy={level},keeper_rotation={level},keeper_storage={level}"
    );
    match std::env::var("RUST_LOG") {
        Ok(env_filter) => EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new(&default)),
        Err(_) => EnvFilter::new(default),
    }
}

pub fn init(verbose: u8, quiet: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(verbose, quiet))
        .with_writer(std::io::stderr)
        .with_target(verbose > 1)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, false, "info")]
    #[case(1, false, "debug")]
    #[case(3, false, "trace")]
    #[case(0, true, "error")]
    #[case(2, true, "error")]
    fn test_level(#[case] verbose: u8, #[case] quiet: bool, #[case] expected: &str) {
        assert_eq!(level(verbose, quiet), expected);
    }
}
