//! Dedicated writer task for the host serial link.
//!
//! Every producer (wireless forwarding, system replies, heartbeat, logs)
//! hands already byte-stuffed frames to the writer task through a bounded
//! mpsc channel. The task owns the write half of the serial stream, so no
//! lock is taken around it.
//!
//! ```text
//! SerialApi ─┐
//! Heartbeat ─┼─► mpsc::Sender<Bytes> ─► Writer Task ─► serial port
//! System    ─┘
//! ```
//!
//! Frames that arrive together are written back to back and flushed once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::DEFAULT_SERIAL_QUEUE_CAPACITY;
use crate::error::{DongleError, Result};

/// Maximum frames written before a flush.
const MAX_BATCH_SIZE: usize = 8;

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Frames that may wait for the serial port before sends are refused.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_SERIAL_QUEUE_CAPACITY,
        }
    }
}

/// Handle for queueing frames on the writer task.
///
/// Cheap to clone; every clone feeds the same task.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    tx: mpsc::Sender<Bytes>,
    /// Frames queued but not yet written.
    pending: Arc<AtomicUsize>,
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<Bytes>, pending: Arc<AtomicUsize>) -> Self {
        Self { tx, pending }
    }

    /// Queue an encoded frame without waiting.
    ///
    /// Returns `QueueFull` if the writer is behind.
    pub fn try_send(&self, frame: Bytes) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.try_send(frame).map_err(|e| {
            self.pending.fetch_sub(1, Ordering::Release);
            match e {
                mpsc::error::TrySendError::Full(_) => DongleError::QueueFull("serial tx"),
                mpsc::error::TrySendError::Closed(_) => DongleError::ConnectionClosed,
            }
        })
    }

    /// Frames queued but not yet written.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends cleanly once every handle is dropped, or with an error if
/// the serial stream fails.
pub fn spawn_writer_task<W>(writer: W, config: WriterConfig) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));
    let handle = WriterHandle::new(tx, pending.clone());
    let task = tokio::spawn(writer_loop(rx, writer, pending));
    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<Bytes>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    loop {
        let first = match rx.recv().await {
            Some(frame) => frame,
            None => {
                tracing::debug!("Serial writer channel closed");
                return Ok(());
            }
        };

        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let count = batch.len();
        for frame in batch.drain(..) {
            writer.write_all(&frame).await?;
        }
        writer.flush().await?;
        pending.fetch_sub(count, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_writer_config_default() {
        assert_eq!(WriterConfig::default().channel_capacity, DEFAULT_SERIAL_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn test_writer_handle_try_send() {
        let (client, mut server) = duplex(1024);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle.try_send(Bytes::from_static(&[0x12, 0x01, 0x13])).unwrap();

        let mut buf = [0u8; 16];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x12, 0x01, 0x13]);
    }

    #[tokio::test]
    async fn test_writer_preserves_order() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        for i in 0..5u8 {
            handle.try_send(Bytes::copy_from_slice(&[0x12, i, 0x13])).unwrap();
        }

        let mut buf = vec![0u8; 15];
        server.read_exact(&mut buf).await.unwrap();
        let expected: Vec<u8> = (0..5u8).flat_map(|i| [0x12, i, 0x13]).collect();
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_try_send_full() {
        let (tx, _rx) = mpsc::channel::<Bytes>(1);
        let handle = WriterHandle::new(tx, Arc::new(AtomicUsize::new(0)));

        handle.try_send(Bytes::from_static(b"a")).unwrap();
        let result = handle.try_send(Bytes::from_static(b"b"));
        assert!(matches!(result, Err(DongleError::QueueFull(_))));
        assert_eq!(handle.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_try_send_closed() {
        let (tx, rx) = mpsc::channel::<Bytes>(1);
        drop(rx);
        let handle = WriterHandle::new(tx, Arc::new(AtomicUsize::new(0)));
        assert!(matches!(
            handle.try_send(Bytes::from_static(b"a")),
            Err(DongleError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(64);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());
        drop(handle);
        assert!(task.await.unwrap().is_ok());
    }
}
