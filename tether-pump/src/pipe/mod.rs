//! Pump thread that drains a subprocess's output into a channel.

mod decoder;
mod lines;

pub use decoder::StreamDecoder;
pub use lines::LineAssembler;

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

/// `EIO` is what a PTY master reads once every slave handle has closed.
const EIO: i32 = 5;

/// What the pump thread delivers to the consumer.
#[derive(Debug)]
pub enum PumpMessage {
    /// Decoded, non-empty text in arrival order.
    Chunk(String),
    /// The subprocess closed its side of the stream.
    Closed,
    /// Reading failed for a reason other than end of stream.
    Failed(io::Error),
}

/// A dedicated reader that continuously drains output.
///
/// The thread owns the reader and exits at end of stream, on a read error, or
/// once the consumer drops the receiving end.
pub struct Pump {
    /// Handle to the pump thread.
    handle: Option<JoinHandle<()>>,

    /// Signal to stop forwarding.
    stop: Arc<AtomicBool>,
}

impl Pump {
    /// Spawn a new pump thread.
    pub fn spawn(
        reader: Box<dyn Read + Send>,
        strip_ansi: bool,
    ) -> (Self, Receiver<PumpMessage>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let stop = Arc::new(AtomicBool::new(false));

        let stop_clone = stop.clone();
        let handle = thread::Builder::new()
            .name("tether-pump".into())
            .spawn(move || pump_loop(reader, StreamDecoder::new(strip_ansi), tx, stop_clone))
            .ok();

        if handle.is_none() {
            tracing::error!("failed to start pump thread");
        }

        (Self { handle, stop }, rx)
    }

    /// Stop forwarding output.
    ///
    /// A blocked `read` cannot be interrupted, so the thread is detached; it
    /// exits as soon as the stream ends, which teardown guarantees by killing
    /// the subprocess.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.handle.take();
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The main pump loop.
fn pump_loop(
    mut reader: Box<dyn Read + Send>,
    mut decoder: StreamDecoder,
    tx: Sender<PumpMessage>,
    stop: Arc<AtomicBool>,
) {
    let mut buffer = [0u8; 8192];
    let mut total_bytes = 0u64;

    while !stop.load(Ordering::SeqCst) {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                total_bytes += n as u64;
                let text = decoder.push(&buffer[..n]);
                if !text.is_empty() && tx.send(PumpMessage::Chunk(text)).is_err() {
                    return;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(std::time::Duration::from_millis(1));
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(ref e) if e.raw_os_error() == Some(EIO) => break,
            Err(e) => {
                tracing::debug!("pump read error after {} bytes: {}", total_bytes, e);
                let _ = tx.send(PumpMessage::Failed(e));
                return;
            }
        }
    }

    let held_back = decoder.pending_len();
    let tail = decoder.finish();
    if !tail.is_empty() {
        let _ = tx.send(PumpMessage::Chunk(tail));
    }
    tracing::debug!(
        "pump reached end of stream after {} bytes, flushed {} held back",
        total_bytes,
        held_back
    );
    let _ = tx.send(PumpMessage::Closed);
}
