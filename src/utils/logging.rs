use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::prelude::*;

pub fn init() {
    let fmt_layer = fmt::layer().with_target(true);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,statement_proxy=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

/// Shortens a secret for log output, keeping only the first `keep` characters.
pub fn preview(secret: &str, keep: usize) -> String {
    let head: String = secret.chars().take(keep).collect();
    if head.len() < secret.len() {
        format!("{head}...")
    } else {
        head
    }
}
