use tracing_subscriber::fmt::MakeWriter;

/// Mirrors every log line onto a broadcast channel so API consumers can tail
/// the live log, while still writing to stdout.
#[derive(Clone)]
pub struct BroadcastMakeWriter {
    pub sender: tokio::sync::broadcast::Sender<String>,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            sender: self.sender.clone(),
        }
    }
}

pub struct BroadcastWriter {
    sender: tokio::sync::broadcast::Sender<String>,
}

impl std::io::Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(msg); // Ignored if no receivers
        std::io::stdout().write(buf)?;
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are no-ops (relevant under the test harness).
pub fn init(log_tx: tokio::sync::broadcast::Sender<String>) {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(BroadcastMakeWriter { sender: log_tx })
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
