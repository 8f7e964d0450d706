use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Pre/post notification around every outbound call.
///
/// The gateway (or anything embedding the core) can attach hooks to collect
/// timing data without wrapping the clients themselves.
pub trait CallHook: Send + Sync {
    fn on_start(&self, _operation: &'static str) {}

    fn on_finish(&self, _operation: &'static str, _elapsed: Duration, _success: bool) {}
}

/// Logs call durations at debug level.
#[derive(Debug, Clone, Default)]
pub struct TracingHook;

impl CallHook for TracingHook {
    fn on_finish(&self, operation: &'static str, elapsed: Duration, success: bool) {
        debug!(
            operation,
            elapsed_ms = elapsed.as_millis() as u64,
            success,
            "upstream call finished"
        );
    }
}

pub type Hooks = Vec<Arc<dyn CallHook>>;

/// Runs `fut`, notifying every hook before and after.
pub async fn timed<T, E, F>(hooks: &[Arc<dyn CallHook>], operation: &'static str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    for hook in hooks {
        hook.on_start(operation);
    }
    let started = Instant::now();
    let result = fut.await;
    let elapsed = started.elapsed();
    for hook in hooks {
        hook.on_finish(operation, elapsed, result.is_ok());
    }
    result
}
