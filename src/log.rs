use env_logger::Builder;
use std::io::Write;

/// Turn on `env_logger` for this test binary. Unit tests run as parallel
/// threads in one process, so — unlike a one-shot CLI's `main` — this must
/// tolerate being called from more than one test; `try_init` swallows the
/// "already initialized" case instead of panicking.
pub fn init_log() {
    let mut builder = Builder::from_default_env();
    let _ = builder
        .format_timestamp_secs()
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} - {}] [{}:{}] {}",
                record.level(),
                record.target(),
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .try_init();
}
