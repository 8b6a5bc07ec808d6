pub mod error;
pub mod traffic;

pub use error::{CommonError, Result};
pub use traffic::{TrafficCounters, TrafficSnapshot};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `log_level` when set. With a `log_dir` the output goes
/// to a daily rolling file and the returned guard must be kept alive for the
/// lifetime of the process, otherwise buffered lines are lost.
pub fn init_tracing(
    log_dir: Option<&str>,
    log_file: &str,
    log_level: &str,
    console_port: Option<u16>,
) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let (writer, guard, ansi) = match log_dir {
        Some(log_dir) => {
            let file_appender = tracing_appender::rolling::daily(log_dir, log_file);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (BoxMakeWriter::new(non_blocking), Some(guard), false)
        }
        None => (BoxMakeWriter::new(std::io::stdout), None, true),
    };

    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(ansi)
        .with_filter(filter);

    #[cfg(feature = "console")]
    {
        let console_layer = console_port.map(|port| {
            console_subscriber::ConsoleLayer::builder()
                .server_addr((std::net::Ipv4Addr::LOCALHOST, port))
                .spawn()
        });
        tracing_subscriber::registry()
            .with(console_layer)
            .with(fmt_layer)
            .init();
    }

    #[cfg(not(feature = "console"))]
    {
        if console_port.is_some() {
            eprintln!(
                "console_port is configured but meter is not built with --features console; tokio-console is disabled"
            );
        }
        tracing_subscriber::registry().with(fmt_layer).init();
    }

    guard
}
