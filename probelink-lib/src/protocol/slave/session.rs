use std::time::Instant;

use anyhow::Result;
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::timeout;

use super::{dispatch, Device};
use crate::protocol::{Framer, FramerConfig, HandlerError, Response, ResponseFrame};

pub const QUEUE_DEPTH: usize = 64;

pub fn byte_queue() -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
    mpsc::channel(QUEUE_DEPTH)
}

/// Forwards everything read from `reader` into the session queue until the
/// reader hits end of file or the session goes away.
pub async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) -> Result<()> {
    let mut buf = [0u8; 256];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            debug!("transport closed");
            return Ok(());
        }
        debug!("read {} bytes: {:02X?}", n, &buf[..n]);
        if tx.send(buf[..n].to_vec()).await.is_err() {
            return Ok(());
        }
    }
}

/// Device side of a link: the single consumer of the byte queue. Each turn
/// first drains every queued chunk through the framer, then answers the
/// requests that completed.
pub struct Session<D, W> {
    framer: Framer,
    device: D,
    writer: W,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl<D, W> Session<D, W>
where
    D: Device,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(config: FramerConfig, device: D, writer: W, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            framer: Framer::new(config),
            device,
            writer,
            rx,
        }
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn into_device(self) -> D {
        self.device
    }

    /// Serves requests until the queue is closed.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            let chunk = match self.framer.config().frame_timeout {
                Some(limit) => match timeout(limit, self.rx.recv()).await {
                    Ok(chunk) => chunk,
                    Err(_) => {
                        self.framer.poll_timeout(Instant::now());
                        continue;
                    }
                },
                None => self.rx.recv().await,
            };

            let chunk = match chunk {
                Some(chunk) => chunk,
                None => break,
            };
            self.framer.ingest(chunk);
            let open = self.drain();

            self.answer_pending().await?;

            if !open {
                break;
            }
        }

        info!("session closed, {:?}", self.framer.stats());
        Ok(())
    }

    /// Feeds all chunks queued right now, never waits. Returns `false` once
    /// the sending side is gone.
    pub fn drain(&mut self) -> bool {
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => {
                    self.framer.ingest(chunk);
                }
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    /// Dispatches every request the framer has queued and writes the answers.
    pub async fn answer_pending(&mut self) -> Result<()> {
        let with_checksum = self.framer.config().checksum;

        while let Some(request) = self.framer.pop_request() {
            let response = dispatch(&mut self.device, request).await;
            let frame = ResponseFrame::new(request.opcode(), response);

            let bytes = match frame.encode(with_checksum) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!("cannot answer {}: {}", request, e);
                    ResponseFrame::new(
                        request.opcode(),
                        Response::Failure(HandlerError::Unencodable),
                    )
                    .encode(with_checksum)?
                }
            };

            debug!("write: {:02X?}", bytes);
            self.writer.write_all(&bytes).await?;
            self.writer.flush().await?;
        }
        Ok(())
    }
}
