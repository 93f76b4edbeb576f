//! Bootstrap utilities for the rabbit-bridge binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the RABBIT_BRIDGE_LOG environment variable.
///
/// Defaults to "info" level if RABBIT_BRIDGE_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Extract `--config <path>` / `-c <path>` / `--config=<path>` from process arguments.
pub fn parse_config_path() -> Option<String> {
    config_path_from_args(std::env::args().skip(1))
}

fn config_path_from_args<I>(args: I) -> Option<String>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" || arg == "-c" {
            return args.next();
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(path.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_config_path_flag() {
        assert_eq!(
            config_path_from_args(args(&["--config", "bridge.yaml"])),
            Some("bridge.yaml".to_string())
        );
        assert_eq!(
            config_path_from_args(args(&["-v", "-c", "x.yaml"])),
            Some("x.yaml".to_string())
        );
    }

    #[test]
    fn test_config_path_equals_form() {
        assert_eq!(
            config_path_from_args(args(&["--config=/etc/bridge.yaml"])),
            Some("/etc/bridge.yaml".to_string())
        );
    }

    #[test]
    fn test_config_path_absent() {
        assert_eq!(config_path_from_args(args(&["--verbose"])), None);
        assert_eq!(config_path_from_args(args(&["--config"])), None);
    }
}
