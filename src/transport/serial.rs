//! Serial receive task.
//!
//! Reads raw bytes from the host link, runs them through the byte-stuffing
//! decoder one at a time, and hands every completed frame body to the
//! multiplexer's bounded receive queue. Frames arriving while that queue is
//! full are dropped.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;

use crate::error::{DongleError, Result};
use crate::serial::{SerialApi, SerialDecoder, RX_BUFFER_SIZE};

/// Callback told when a frame starts (`true`) and ends (`false`).
///
/// The dongle drives its serial activity LED with it.
pub type ActivityIndicator = Arc<dyn Fn(bool) + Send + Sync>;

/// Spawn the serial receive task.
///
/// The task ends with `Ok(())` when the stream reaches end of file.
pub fn spawn_reader_task<R>(
    reader: R,
    api: Arc<SerialApi>,
    indicator: Option<ActivityIndicator>,
) -> JoinHandle<Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(read_loop(reader, api, indicator))
}

async fn read_loop<R>(
    mut reader: R,
    api: Arc<SerialApi>,
    indicator: Option<ActivityIndicator>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = SerialDecoder::new();
    let mut buf = vec![0u8; RX_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                tracing::debug!("Serial stream closed");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) => return Err(DongleError::Io(e)),
        };

        for &byte in &buf[..n] {
            let was_active = decoder.is_active();
            let frame = decoder.push_byte(byte);
            if let Some(indicator) = &indicator {
                if was_active != decoder.is_active() {
                    indicator(decoder.is_active());
                }
            }
            if let Some(body) = frame {
                tracing::trace!("Serial rx frame of {} bytes", body.len());
                if !api.deliver_frame(body) {
                    tracing::debug!("Serial rx queue full, frame dropped");
                }
            }
        }
    }
}
