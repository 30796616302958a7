//! Split I/O connection.
//!
//! The transport is split into read and write halves at construction.
//! Requests and responses strictly alternate at the message level, but
//! cancellation is out of band: a cancel packet must go out while the
//! current response is still being read. The write half therefore sits
//! behind a mutex shared with every [`CancelHandle`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::{Bytes, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tds_wire::packet::{
    MIN_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType,
};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify};

use crate::error::CodecError;
use crate::framed::{PacketReader, PacketWriter};
use crate::message::{Message, MessageAssembler};
use crate::packet_codec::Packet;

/// A TDS connection reading whole messages and writing chunked requests.
pub struct Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    reader: PacketReader<ReadHalf<T>>,
    writer: Arc<Mutex<PacketWriter<WriteHalf<T>>>>,
    assembler: MessageAssembler,
    /// Negotiated packet size; outgoing messages are chunked at this.
    packet_size: usize,
    cancel_notify: Arc<Notify>,
    cancelling: Arc<AtomicBool>,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    /// Create a connection from a transport, chunking at `packet_size`.
    pub fn new(transport: T, packet_size: usize) -> Self {
        let (read_half, write_half) = tokio::io::split(transport);

        Self {
            reader: PacketReader::new(read_half),
            writer: Arc::new(Mutex::new(PacketWriter::new(write_half))),
            assembler: MessageAssembler::new(),
            packet_size: packet_size.max(MIN_PACKET_SIZE),
            cancel_notify: Arc::new(Notify::new()),
            cancelling: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A handle that can cancel the in-progress request from another task.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle<T> {
        CancelHandle {
            writer: Arc::clone(&self.writer),
            notify: Arc::clone(&self.cancel_notify),
            cancelling: Arc::clone(&self.cancelling),
        }
    }

    /// Whether a cancel has been sent and not yet acknowledged.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::Acquire)
    }

    /// Record that the server acknowledged the cancel (the session layer
    /// sees the acknowledgement inside the token stream).
    pub fn cancel_acknowledged(&self) {
        self.cancelling.store(false, Ordering::Release);
        self.cancel_notify.notify_waiters();
    }

    /// The current negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    /// Apply a renegotiated packet size to subsequent sends.
    pub fn set_packet_size(&mut self, size: usize) {
        self.packet_size = size.max(MIN_PACKET_SIZE);
        tracing::debug!(packet_size = self.packet_size, "packet size renegotiated");
    }

    /// Read the next complete message, reassembling across packets.
    ///
    /// Returns `None` on a clean end of stream; a stream that ends with a
    /// partial message buffered is an error.
    pub async fn read_message(&mut self) -> Result<Option<Message>, CodecError> {
        loop {
            match self.reader.next().await {
                Some(Ok(packet)) => {
                    if let Some(message) = self.assembler.push(packet) {
                        return Ok(Some(message));
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    if self.assembler.has_partial() {
                        return Err(CodecError::ConnectionClosed);
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Send a complete message, fragmenting at the negotiated packet size.
    ///
    /// The final fragment carries the end-of-message bit; an empty payload
    /// still goes out as one header-only packet.
    pub async fn send_message(
        &mut self,
        packet_type: PacketType,
        payload: Bytes,
    ) -> Result<(), CodecError> {
        let max_payload = self.packet_size - PACKET_HEADER_SIZE;
        let mut writer = self.writer.lock().await;
        writer.codec_mut().reset_packet_id();

        let total = payload.len().div_ceil(max_payload).max(1);
        for i in 0..total {
            let chunk = &payload[i * max_payload..payload.len().min((i + 1) * max_payload)];
            let status = if i + 1 == total {
                PacketStatus::END_OF_MESSAGE
            } else {
                PacketStatus::NORMAL
            };
            let header = PacketHeader::new(packet_type, status, 0);
            writer.send(Packet::new(header, BytesMut::from(chunk))).await?;
        }

        writer.flush().await?;
        Ok(())
    }

    /// Flush the write half.
    pub async fn flush(&mut self) -> Result<(), CodecError> {
        let mut writer = self.writer.lock().await;
        writer.flush().await
    }

    /// Close the write half, signalling end of session to the server.
    pub async fn shutdown(&mut self) -> Result<(), CodecError> {
        let mut writer = self.writer.lock().await;
        writer.close().await
    }
}

impl<T> std::fmt::Debug for Connection<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("packet_size", &self.packet_size)
            .field("cancelling", &self.is_cancelling())
            .field("has_partial_message", &self.assembler.has_partial())
            .finish_non_exhaustive()
    }
}

/// Cancels the in-progress request from any task.
///
/// Cloneable; every clone shares the connection's write half and cancel
/// state.
pub struct CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    writer: Arc<Mutex<PacketWriter<WriteHalf<T>>>>,
    notify: Arc<Notify>,
    cancelling: Arc<AtomicBool>,
}

impl<T> CancelHandle<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Send the out-of-band cancel packet.
    ///
    /// The request is only cancelled once the server acknowledges it in
    /// the token stream; use [`CancelHandle::wait_acknowledged`] to block
    /// until then.
    pub async fn cancel(&self) -> Result<(), CodecError> {
        self.cancelling.store(true, Ordering::Release);

        tracing::debug!("sending cancel packet");

        let mut writer = self.writer.lock().await;
        let header = PacketHeader::new(
            PacketType::Cancel,
            PacketStatus::END_OF_MESSAGE,
            PACKET_HEADER_SIZE as u16,
        );
        writer.send(Packet::new(header, BytesMut::new())).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Wait until the server has acknowledged a pending cancel.
    pub async fn wait_acknowledged(&self) {
        if self.cancelling.load(Ordering::Acquire) {
            self.notify.notified().await;
        }
    }

    /// Whether a cancel is pending acknowledgement.
    #[must_use]
    pub fn is_cancelling(&self) -> bool {
        self.cancelling.load(Ordering::Acquire)
    }
}

impl<T> Clone for CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
            notify: Arc::clone(&self.notify),
            cancelling: Arc::clone(&self.cancelling),
        }
    }
}

impl<T> std::fmt::Debug for CancelHandle<T>
where
    T: AsyncRead + AsyncWrite,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelling", &self.cancelling.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
