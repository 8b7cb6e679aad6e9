//! Length-prefixed JSON transport over a pair of byte pipes.
//!
//! Every frame is a 4-byte little-endian length followed by that many bytes of
//! UTF-8 JSON. The transport splits into a sender half (owned by the
//! connection's writer task) and a receiver half (owned by the reader task),
//! which forwards each decoded frame through an unbounded channel.

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Upper bound on a single frame, guarding against corrupted length prefixes.
const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

/// Sending half of a transport.
pub trait Transport: Send {
	/// Writes one message as a frame.
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>>;
}

/// Receiving half of a transport.
pub trait TransportReceiver: Send {
	/// Reads frames until the pipe closes, forwarding each decoded message.
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// The pieces a [`Connection`](crate::Connection) is built from.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Transport over the driver's stdin (writes) and stdout (reads).
pub struct PipeTransport<W, R> {
	stdin: W,
	stdout: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport and the receiver that yields decoded messages.
	pub fn new(stdin: W, stdout: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		(
			Self {
				stdin,
				stdout,
				message_tx,
			},
			message_rx,
		)
	}

	/// Writes one frame without splitting. For tests.
	#[cfg(test)]
	pub(crate) async fn send(&mut self, message: Value) -> Result<()> {
		write_frame(&mut self.stdin, &message).await
	}

	/// Runs the read loop until the pipe closes or the receiver is dropped.
	/// For tests.
	#[cfg(test)]
	pub(crate) async fn run(&mut self) -> Result<()> {
		read_frames(&mut self.stdout, &self.message_tx).await
	}

	/// Splits into independently owned halves.
	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
		(
			PipeTransportSender { stdin: self.stdin },
			PipeTransportReceiver {
				stdout: self.stdout,
				message_tx: self.message_tx,
			},
		)
	}

	/// Splits into boxed halves ready for [`Connection::new`](crate::Connection::new).
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		let (sender, receiver) = self.into_parts();
		TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		}
	}
}

/// Writing half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
	stdin: W,
}

impl<W: AsyncWrite + Unpin + Send + 'static> Transport for PipeTransportSender<W> {
	fn send(&mut self, message: Value) -> BoxFuture<'_, Result<()>> {
		Box::pin(async move { write_frame(&mut self.stdin, &message).await })
	}
}

/// Reading half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	stdout: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<R: AsyncRead + Unpin + Send + 'static> TransportReceiver for PipeTransportReceiver<R> {
	fn run(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
		let PipeTransportReceiver {
			mut stdout,
			message_tx,
		} = *self;
		Box::pin(async move { read_frames(&mut stdout, &message_tx).await })
	}
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) -> Result<()> {
	let bytes = serde_json::to_vec(message)?;
	let length = u32::try_from(bytes.len())
		.map_err(|_| Error::TransportError(format!("Frame too large: {} bytes", bytes.len())))?;

	writer
		.write_all(&length.to_le_bytes())
		.await
		.map_err(|e| Error::TransportError(format!("Failed to write length prefix: {e}")))?;
	writer
		.write_all(&bytes)
		.await
		.map_err(|e| Error::TransportError(format!("Failed to write message: {e}")))?;
	writer
		.flush()
		.await
		.map_err(|e| Error::TransportError(format!("Failed to flush: {e}")))?;

	tracing::trace!(len = length, "frame sent");
	Ok(())
}

async fn read_frames<R: AsyncRead + Unpin>(
	reader: &mut R,
	message_tx: &mpsc::UnboundedSender<Value>,
) -> Result<()> {
	loop {
		let mut len_buf = [0u8; 4];
		reader
			.read_exact(&mut len_buf)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read length prefix: {e}")))?;

		let length = u32::from_le_bytes(len_buf) as usize;
		if length > MAX_FRAME_LEN {
			return Err(Error::TransportError(format!(
				"Frame length {length} exceeds limit of {MAX_FRAME_LEN} bytes"
			)));
		}

		let mut buf = vec![0u8; length];
		reader
			.read_exact(&mut buf)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read message body: {e}")))?;

		match serde_json::from_slice::<Value>(&buf) {
			Ok(message) => {
				if message_tx.send(message).is_err() {
					tracing::debug!("Message receiver dropped, stopping transport reader");
					return Ok(());
				}
			}
			Err(e) => {
				tracing::error!("Dropping malformed frame ({length} bytes): {e}");
			}
		}
	}
}
