use std::sync::Once;

static INIT: Once = Once::new();

/// Shared setup for the integration tests in this directory: turn on
/// `env_logger` exactly once per test binary. Mirrors the teacher's
/// `test_utils::init_log` convention, but lives here instead of in the
/// library itself — the library's own log setup is test-only and not
/// reachable from outside its crate.
pub fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
