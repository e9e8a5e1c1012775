//! Opaque timing-observer interface: the engine reports span timings to
//! whatever sink the caller supplies, rather than owning one telemetry
//! backend itself.

mod span;
pub use span::Span;

use std::fmt;
use std::time::Duration;

/// Implemented by anything the engine should report span timings to. The
/// engine calls this from the lock manager (acquisition/release) and the
/// database (split/merge, snapshot write); it never assumes a concrete
/// backend.
pub trait Observer: fmt::Debug + Send + Sync {
    fn record(&self, name: &str, tags: &[(&str, String)], elapsed: Duration);
}

/// The default observer: discards everything. Cheapest possible choice when
/// no caller has opted into diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn record(&self, _name: &str, _tags: &[(&str, String)], _elapsed: Duration) {}
}

/// Emits a `log::trace!` record per span, streaming rather than buffering
/// for later inspection.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl Observer for LoggingObserver {
    fn record(&self, name: &str, tags: &[(&str, String)], elapsed: Duration) {
        let mut tag_str = String::new();
        for (k, v) in tags {
            tag_str.push_str(&format!("[{}={}]", k, v));
        }
        log::trace!("{}{} took {:?}", name, tag_str, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct CountingObserver {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl Observer for CountingObserver {
        fn record(&self, _name: &str, _tags: &[(&str, String)], _elapsed: Duration) {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[test]
    fn span_reports_exactly_once_on_finish() {
        let observer = CountingObserver::default();
        let span = Span::start("lock_acquire").tag("resource", "page#1");
        span.finish(&observer);
        assert_eq!(observer.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn noop_observer_never_panics() {
        NoopObserver.record("x", &[], Duration::from_millis(1));
    }
}
