//! Duplex pipe channel.
//!
//! A channel owns one transport and runs it with two pumps:
//!
//! ```text
//! transport ─► read pump ─► inbound buffer ─► filter ─► ObjectQueue ─► PackageReader
//! send()/send_package() ─► send lock ─► mpsc ─► write pump ─► transport
//!
//! supervisor: join(read pump, write pump) ─► shutdown transport ─► closed()
//! ```
//!
//! Either pump ending requests a close, which cancels the other. The
//! supervisor joins both before the transport is released and the close
//! notification fires, so observers never see a half-closed channel.
//!
//! Every transport read, write and flush races the cancel signal. Chunks
//! queued before a close get [`WRITE_DRAIN_TIMEOUT`] to reach the peer; a
//! peer that stopped reading cannot hold `close()` open.

use bytes::{Buf, Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::channel::encoder::PackageEncoder;
use crate::channel::error::{ChannelError, ChannelState, CloseReason};
use crate::channel::options::ChannelOptions;
use crate::channel::queue::ObjectQueue;
use crate::net::connection::ConnectionId;
use crate::net::transport::{Transport, TransportError};
use crate::observability::metrics;
use crate::pipeline::{FilterError, PipelineFilter, SequenceReader};

/// How long queued chunks may take to drain once a close was requested.
pub const WRITE_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

type ErrorHandler = Arc<dyn Fn(&ChannelError) + Send + Sync>;
type CloseHandler = Box<dyn FnOnce(CloseReason) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    Closed(CloseReason),
    Detached,
}

/// The transport and any bytes read but not yet consumed by a filter,
/// handed back by [`PipeChannel::detach`].
pub struct Detached<T> {
    pub transport: T,
    pub unconsumed: Bytes,
}

struct Startup<T, F> {
    transport: T,
    filter: F,
    outbound: mpsc::Receiver<Bytes>,
}

struct Inner<T, F> {
    id: ConnectionId,
    options: ChannelOptions,
    state: AtomicU8,
    close_reason: OnceLock<CloseReason>,
    cancel: watch::Sender<bool>,
    lifecycle: watch::Sender<Lifecycle>,
    outbound: mpsc::Sender<Bytes>,
    /// Serializes encode-and-enqueue so frames never interleave.
    send_lock: tokio::sync::Mutex<BytesMut>,
    startup: Mutex<Option<Startup<T, F>>>,
    detaching: AtomicBool,
    detached: Mutex<Option<Detached<T>>>,
    error_handler: Mutex<Option<ErrorHandler>>,
    close_handlers: Mutex<Vec<CloseHandler>>,
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<T, F> Inner<T, F> {
    fn state(&self) -> ChannelState {
        ChannelState::from(self.state.load(Ordering::Acquire))
    }

    /// Record `reason` if none is set yet and cancel both pumps.
    fn request_close(&self, reason: CloseReason) {
        if self.close_reason.set(reason).is_ok() {
            debug!(channel_id = %self.id, reason = %reason, "Channel close requested");
        }
        let _ = self.state.compare_exchange(
            ChannelState::Running as u8,
            ChannelState::Closing as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.cancel.send_replace(true);
    }

    fn fail(&self, err: ChannelError) {
        let reason = err.close_reason();
        if err.is_ignorable() {
            debug!(channel_id = %self.id, error = %err, "Channel transport ended");
        } else {
            warn!(channel_id = %self.id, error = %err, reason = %reason, "Channel error");
            let handler = lock(&self.error_handler).clone();
            if let Some(handler) = handler {
                handler(&err);
            }
        }
        self.request_close(reason);
    }

    fn finish(&self, lifecycle: Lifecycle) {
        self.state.store(ChannelState::Closed as u8, Ordering::Release);
        self.lifecycle.send_replace(lifecycle);

        if let Lifecycle::Closed(reason) = lifecycle {
            let handlers = std::mem::take(&mut *lock(&self.close_handlers));
            for handler in handlers {
                handler(reason);
            }
        }
    }
}

/// A channel bound to one transport and one pipeline filter.
///
/// Cloning is cheap and every clone drives the same channel.
pub struct PipeChannel<T, F> {
    inner: Arc<Inner<T, F>>,
}

impl<T, F> Clone for PipeChannel<T, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, F> std::fmt::Debug for PipeChannel<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeChannel")
            .field("id", &self.inner.id)
            .field("state", &self.inner.state())
            .field("close_reason", &self.inner.close_reason.get())
            .finish()
    }
}

impl<T, F> PipeChannel<T, F>
where
    T: Transport,
    F: PipelineFilter,
{
    pub fn new(transport: T, filter: F, options: ChannelOptions) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(options.send_queue_capacity.max(1));
        let (cancel, _) = watch::channel(false);
        let (lifecycle, _) = watch::channel(Lifecycle::Running);

        Self {
            inner: Arc::new(Inner {
                id: ConnectionId::new(),
                options,
                state: AtomicU8::new(ChannelState::Created as u8),
                close_reason: OnceLock::new(),
                cancel,
                lifecycle,
                outbound: outbound_tx,
                send_lock: tokio::sync::Mutex::new(BytesMut::new()),
                startup: Mutex::new(Some(Startup {
                    transport,
                    filter,
                    outbound: outbound_rx,
                })),
                detaching: AtomicBool::new(false),
                detached: Mutex::new(None),
                error_handler: Mutex::new(None),
                close_handlers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.inner.options
    }

    pub fn state(&self) -> ChannelState {
        self.inner.state()
    }

    /// The reason recorded by the first close request, if any.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.get().copied()
    }

    /// Called for every non-ignorable error raised by the pumps.
    pub fn on_error(&self, handler: impl Fn(&ChannelError) + Send + Sync + 'static) {
        *lock(&self.inner.error_handler) = Some(Arc::new(handler));
    }

    /// Called once after the channel has closed. Runs immediately when the
    /// channel is already closed. Not called for a detached channel.
    pub fn on_closed(&self, handler: impl FnOnce(CloseReason) + Send + 'static) {
        let current = *self.inner.lifecycle.borrow();
        match current {
            Lifecycle::Closed(reason) => handler(reason),
            Lifecycle::Detached => {}
            Lifecycle::Running => {
                let mut handlers = lock(&self.inner.close_handlers);
                // Recheck under the lock; finish() drains after publishing.
                let current = *self.inner.lifecycle.borrow();
                match current {
                    Lifecycle::Closed(reason) => {
                        drop(handlers);
                        handler(reason);
                    }
                    Lifecycle::Detached => {}
                    Lifecycle::Running => handlers.push(Box::new(handler)),
                }
            }
        }
    }

    /// Start both pumps and return the consumer side of the package queue.
    pub fn start(&self) -> Result<PackageReader<F::Package>, ChannelError> {
        let startup = {
            let mut slot = lock(&self.inner.startup);
            let Some(startup) = slot.take() else {
                return Err(match self.inner.state() {
                    ChannelState::Created | ChannelState::Running => ChannelError::AlreadyStarted,
                    _ => ChannelError::Closed,
                });
            };
            self.inner
                .state
                .store(ChannelState::Running as u8, Ordering::Release);
            startup
        };

        let (reader, writer) = tokio::io::split(startup.transport);
        let queue = Arc::new(ObjectQueue::new());

        let read_task = tokio::spawn(read_pump(
            Arc::clone(&self.inner),
            reader,
            startup.filter,
            Arc::clone(&queue),
        ));
        let write_task = tokio::spawn(write_pump(
            Arc::clone(&self.inner),
            writer,
            startup.outbound,
        ));
        tokio::spawn(supervise(Arc::clone(&self.inner), read_task, write_task));

        metrics::record_channel_opened();
        debug!(channel_id = %self.inner.id, "Channel started");

        Ok(PackageReader { queue })
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        match self.inner.state() {
            ChannelState::Created | ChannelState::Running => Ok(()),
            ChannelState::Closing | ChannelState::Closed => Err(ChannelError::Closed),
        }
    }

    /// Queue raw bytes for the write pump.
    pub async fn send(&self, data: &[u8]) -> Result<(), ChannelError> {
        let _guard = self.inner.send_lock.lock().await;
        self.ensure_open()?;
        self.inner
            .outbound
            .send(Bytes::copy_from_slice(data))
            .await
            .map_err(|_| ChannelError::Closed)
    }

    /// Queue raw bytes without waiting for room in the send queue.
    ///
    /// Fails with [`ChannelError::SendQueueFull`] when the write pump is
    /// behind by `send_queue_capacity` chunks. Each chunk is written whole,
    /// so this never interleaves with a concurrent [`send_package`](Self::send_package).
    pub fn try_send(&self, data: &[u8]) -> Result<(), ChannelError> {
        self.ensure_open()?;
        match self.inner.outbound.try_send(Bytes::copy_from_slice(data)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(ChannelError::SendQueueFull),
            Err(TrySendError::Closed(_)) => Err(ChannelError::Closed),
        }
    }

    /// Encode `package` and queue the result as one contiguous write.
    ///
    /// Concurrent senders are serialized so encoded packages never interleave.
    pub async fn send_package<P, E>(
        &self,
        encoder: &mut E,
        package: &P,
    ) -> Result<usize, ChannelError>
    where
        P: ?Sized,
        E: PackageEncoder<P>,
    {
        let mut buffer = self.inner.send_lock.lock().await;
        self.ensure_open()?;

        let written = match encoder.encode(&mut buffer, package) {
            Ok(written) => written,
            Err(err) => {
                buffer.clear();
                return Err(err.into());
            }
        };
        let chunk = buffer.split().freeze();
        self.inner
            .outbound
            .send(chunk)
            .await
            .map_err(|_| ChannelError::Closed)?;
        Ok(written)
    }

    /// Request a close and wait until both pumps have finished.
    ///
    /// Returns the effective reason, which is an earlier reason if one was
    /// already recorded.
    pub async fn close(&self, reason: CloseReason) -> CloseReason {
        {
            let mut slot = lock(&self.inner.startup);
            if slot.take().is_some() {
                let _ = self.inner.close_reason.set(reason);
                drop(slot);
                let effective = self.close_reason().unwrap_or(reason);
                debug!(channel_id = %self.inner.id, reason = %effective, "Channel closed before start");
                self.inner.finish(Lifecycle::Closed(effective));
                return effective;
            }
        }

        self.inner.request_close(reason);
        self.closed().await.unwrap_or(reason)
    }

    /// Ask both pumps to stop without waiting for them. The first recorded
    /// reason still wins; [`closed`](Self::closed) reports completion.
    pub fn request_close(&self, reason: CloseReason) {
        self.inner.request_close(reason);
    }

    /// Wait for the channel to close. Returns `None` if it was detached.
    pub async fn closed(&self) -> Option<CloseReason> {
        let mut rx = self.inner.lifecycle.subscribe();
        let lifecycle = rx
            .wait_for(|lifecycle| !matches!(lifecycle, Lifecycle::Running))
            .await
            .map(|lifecycle| *lifecycle);
        match lifecycle {
            Ok(Lifecycle::Closed(reason)) => Some(reason),
            _ => None,
        }
    }

    /// Stop both pumps and take back the transport without closing it.
    ///
    /// The close notification does not fire for a detached channel.
    pub async fn detach(&self) -> Result<Detached<T>, ChannelError> {
        {
            let mut slot = lock(&self.inner.startup);
            if let Some(startup) = slot.take() {
                drop(slot);
                self.inner.finish(Lifecycle::Detached);
                return Ok(Detached {
                    transport: startup.transport,
                    unconsumed: Bytes::new(),
                });
            }
        }

        self.inner.detaching.store(true, Ordering::Release);
        self.inner.request_close(CloseReason::LocalClosing);

        let mut rx = self.inner.lifecycle.subscribe();
        let _ = rx
            .wait_for(|lifecycle| !matches!(lifecycle, Lifecycle::Running))
            .await;

        lock(&self.inner.detached)
            .take()
            .ok_or(ChannelError::Closed)
    }
}

/// Consumer side of a started channel's package queue.
///
/// There is exactly one per channel; `next` takes `&mut self`, so two
/// consumers can never wait at once.
pub struct PackageReader<P> {
    queue: Arc<ObjectQueue<P>>,
}

impl<P> PackageReader<P> {
    /// Next decoded package, or `None` once the channel stopped reading and
    /// every queued package was delivered.
    pub async fn next(&mut self) -> Option<P> {
        self.queue.read().await.ok().flatten()
    }

    /// Packages decoded but not yet consumed.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

async fn read_pump<T, F>(
    inner: Arc<Inner<T, F>>,
    mut reader: ReadHalf<T>,
    mut filter: F,
    queue: Arc<ObjectQueue<F::Package>>,
) -> (ReadHalf<T>, BytesMut)
where
    T: Transport,
    F: PipelineFilter,
{
    let mut cancel = inner.cancel.subscribe();
    let mut inbound = BytesMut::with_capacity(inner.options.receive_buffer_size);
    let mut pending = 0usize;

    loop {
        if *cancel.borrow() {
            break;
        }
        inbound.reserve(inner.options.receive_buffer_size);

        let result = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => break,
            result = reader.read_buf(&mut inbound) => result,
        };

        match result {
            Ok(0) => {
                debug!(channel_id = %inner.id, "Peer closed the connection");
                inner.request_close(CloseReason::RemoteClosing);
                break;
            }
            Ok(n) => {
                trace!(channel_id = %inner.id, bytes = n, "Received");
                metrics::record_bytes_received(n);
            }
            Err(err) => {
                inner.fail(TransportError::from(err).into());
                break;
            }
        }

        if let Err(err) = apply_filter(
            &mut filter,
            &mut inbound,
            &mut pending,
            inner.options.max_package_length,
            &queue,
        ) {
            inner.fail(err);
            break;
        }
    }

    queue.complete();
    (reader, inbound)
}

/// Run the filter over `inbound` until it needs more data, queueing every
/// package it yields. `pending` carries the bytes already consumed toward
/// the package in progress.
///
/// The filter only ever sees as many bytes as the package in progress may
/// still grow by, so an oversized package is rejected before the filter
/// copies anything past the limit.
fn apply_filter<F: PipelineFilter>(
    filter: &mut F,
    inbound: &mut BytesMut,
    pending: &mut usize,
    max_package_length: usize,
    queue: &ObjectQueue<F::Package>,
) -> Result<usize, ChannelError> {
    let mut produced = 0;

    while !inbound.is_empty() {
        let window = if max_package_length > 0 {
            inbound.len().min(max_package_length.saturating_sub(*pending))
        } else {
            inbound.len()
        };
        let truncated = window < inbound.len();

        let (result, consumed) = {
            let mut reader = SequenceReader::new(&inbound[..window]);
            let result = filter.filter(&mut reader);
            (result, reader.consumed())
        };
        let package = result?;

        let switched = match filter.next_filter() {
            Some(next) => {
                *filter = next;
                true
            }
            None => false,
        };

        inbound.advance(consumed);
        *pending += consumed;

        match package {
            Some(package) => {
                if consumed == 0 {
                    return Err(FilterError::malformed(
                        "filter produced a package without consuming input",
                    )
                    .into());
                }
                if queue.write(package).is_err() {
                    return Err(ChannelError::Closed);
                }
                metrics::record_package_received();
                filter.reset();
                // Control packages may be emitted while a larger package is
                // still being assembled; its bytes keep counting.
                *pending = filter.retained();
                produced += 1;
            }
            None if switched => {}
            None if truncated => {
                return Err(ChannelError::PackageTooLarge {
                    size: *pending + inbound.len(),
                    max: max_package_length,
                });
            }
            None => break,
        }
    }

    Ok(produced)
}

async fn write_pump<T, F>(
    inner: Arc<Inner<T, F>>,
    mut writer: WriteHalf<T>,
    mut outbound: mpsc::Receiver<Bytes>,
) -> WriteHalf<T>
where
    T: Transport,
{
    let mut cancel = inner.cancel.subscribe();
    // Unwritten tail of a chunk interrupted by the cancel signal.
    let mut interrupted = None;

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancelled(&mut cancel) => None,
            chunk = outbound.recv() => chunk,
        };
        let Some(mut chunk) = chunk else { break };

        let result = tokio::select! {
            biased;
            result = write_chunk(&mut writer, &mut chunk) => result,
            _ = cancelled(&mut cancel) => {
                interrupted = Some(chunk);
                break;
            }
        };
        if let Err(err) = result {
            inner.fail(err.into());
            outbound.close();
            return writer;
        }
    }

    // Flush what was queued before the close, within the drain deadline.
    outbound.close();
    let drain = async {
        if let Some(mut chunk) = interrupted {
            write_chunk(&mut writer, &mut chunk).await?;
        }
        while let Ok(mut chunk) = outbound.try_recv() {
            write_chunk(&mut writer, &mut chunk).await?;
        }
        Ok::<_, TransportError>(())
    };
    match tokio::time::timeout(WRITE_DRAIN_TIMEOUT, drain).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => inner.fail(err.into()),
        Err(_) => {
            debug!(
                channel_id = %inner.id,
                timeout_ms = WRITE_DRAIN_TIMEOUT.as_millis() as u64,
                "Peer stopped reading, dropping unsent chunks"
            );
        }
    }
    writer
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

/// Write and flush one chunk. `chunk` is advanced past every byte the
/// transport accepted, so an interrupted write can resume where it stopped.
async fn write_chunk<W>(writer: &mut W, chunk: &mut Bytes) -> Result<(), TransportError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let len = chunk.len();
    writer.write_all_buf(chunk).await?;
    writer.flush().await?;
    trace!(bytes = len, "Sent");
    metrics::record_bytes_sent(len);
    Ok(())
}

async fn supervise<T, F>(
    inner: Arc<Inner<T, F>>,
    read_task: JoinHandle<(ReadHalf<T>, BytesMut)>,
    write_task: JoinHandle<WriteHalf<T>>,
) where
    T: Transport,
{
    // A failed pump must still stop its sibling.
    let (read, write) = tokio::join!(
        async {
            let read = read_task.await;
            if read.is_err() {
                inner.request_close(CloseReason::InternalError);
            }
            read
        },
        async {
            let write = write_task.await;
            if write.is_err() {
                inner.request_close(CloseReason::InternalError);
            }
            write
        }
    );

    let halves = match (read, write) {
        (Ok((reader, unconsumed)), Ok(writer)) => Some((reader.unsplit(writer), unconsumed)),
        (read, write) => {
            for err in [read.err(), write.err()].into_iter().flatten() {
                error!(channel_id = %inner.id, error = %err, "Channel pump failed");
                let err = ChannelError::Internal(err.to_string());
                let handler = lock(&inner.error_handler).clone();
                if let Some(handler) = handler {
                    handler(&err);
                }
            }
            inner.request_close(CloseReason::InternalError);
            None
        }
    };

    if inner.detaching.load(Ordering::Acquire) {
        if let Some((transport, unconsumed)) = halves {
            *lock(&inner.detached) = Some(Detached {
                transport,
                unconsumed: unconsumed.freeze(),
            });
        }
        debug!(channel_id = %inner.id, "Channel detached");
        inner.finish(Lifecycle::Detached);
        return;
    }

    if let Some((mut transport, _)) = halves {
        let _ = tokio::time::timeout(WRITE_DRAIN_TIMEOUT, transport.shutdown()).await;
    }

    let reason = inner
        .close_reason
        .get()
        .copied()
        .unwrap_or(CloseReason::Unknown);
    metrics::record_channel_closed(reason);
    debug!(channel_id = %inner.id, reason = %reason, "Channel closed");
    inner.finish(Lifecycle::Closed(reason));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::encoder::TerminatorEncoder;
    use crate::pipeline::{FixedHeaderFilter, TerminatorFilter};
    use crate::websocket::{DataFilter, Role, WebSocketContext, WebSocketFilter};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn options(max_package_length: usize) -> ChannelOptions {
        ChannelOptions {
            max_package_length,
            receive_buffer_size: 64,
            send_queue_capacity: 8,
        }
    }

    fn line_channel(max: usize) -> (PipeChannel<DuplexStream, TerminatorFilter>, DuplexStream) {
        let (local, remote) = duplex(4096);
        let channel = PipeChannel::new(local, TerminatorFilter::lines(), options(max));
        (channel, remote)
    }

    #[tokio::test]
    async fn test_receives_packages_in_order() {
        let (channel, mut remote) = line_channel(1024);
        let mut packages = channel.start().unwrap();

        remote.write_all(b"first\r\nsec").await.unwrap();
        remote.write_all(b"ond\r\nthird\r\n").await.unwrap();

        assert_eq!(packages.next().await.unwrap(), "first");
        assert_eq!(packages.next().await.unwrap(), "second");
        assert_eq!(packages.next().await.unwrap(), "third");
    }

    #[tokio::test]
    async fn test_remote_close_ends_stream() {
        let (channel, mut remote) = line_channel(1024);
        let mut packages = channel.start().unwrap();

        remote.write_all(b"last\r\n").await.unwrap();
        drop(remote);

        assert_eq!(packages.next().await.unwrap(), "last");
        assert!(packages.next().await.is_none());
        assert_eq!(channel.closed().await, Some(CloseReason::RemoteClosing));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_send_reaches_peer() {
        let (channel, mut remote) = line_channel(1024);
        let _packages = channel.start().unwrap();

        let mut encoder = TerminatorEncoder::lines();
        channel.send_package(&mut encoder, b"hello".as_slice()).await.unwrap();
        channel.send(b"raw").await.unwrap();

        let mut buf = [0u8; 10];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello\r\nraw");
    }

    #[tokio::test]
    async fn test_oversized_package_closes_with_protocol_error() {
        let (channel, mut remote) = line_channel(16);
        let mut packages = channel.start().unwrap();

        remote.write_all(&[b'x'; 40]).await.unwrap();

        assert!(packages.next().await.is_none());
        assert_eq!(channel.closed().await, Some(CloseReason::ProtocolError));
    }

    #[tokio::test]
    async fn test_oversized_complete_package_rejected() {
        let (local, mut remote) = duplex(4096);
        let channel = PipeChannel::new(local, FixedHeaderFilter::new(1).unwrap(), options(8));
        let mut packages = channel.start().unwrap();

        let mut frame = vec![20u8];
        frame.extend_from_slice(&[b'y'; 20]);
        remote.write_all(&frame).await.unwrap();

        assert!(packages.next().await.is_none());
        assert_eq!(channel.closed().await, Some(CloseReason::ProtocolError));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_first_reason_wins() {
        let (channel, _remote) = line_channel(1024);
        let _packages = channel.start().unwrap();

        let (first, second) = tokio::join!(
            channel.close(CloseReason::LocalClosing),
            channel.close(CloseReason::ServerShutdown)
        );
        assert_eq!(first, second);
        assert_eq!(channel.close_reason(), Some(first));
        assert_eq!(channel.close(CloseReason::TimeOut).await, first);
    }

    #[tokio::test]
    async fn test_closed_notification_fires_once() {
        let (channel, remote) = line_channel(1024);
        let _packages = channel.start().unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        channel.on_closed(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drop(remote);
        channel.closed().await;
        channel.close(CloseReason::LocalClosing).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (channel, _remote) = line_channel(1024);
        let _packages = channel.start().unwrap();
        channel.close(CloseReason::LocalClosing).await;

        assert!(matches!(channel.send(b"late").await, Err(ChannelError::Closed)));
        assert!(matches!(channel.start(), Err(ChannelError::Closed)));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let (channel, _remote) = line_channel(1024);
        let _packages = channel.start().unwrap();
        assert!(matches!(channel.start(), Err(ChannelError::AlreadyStarted)));
    }

    #[tokio::test]
    async fn test_close_before_start() {
        let (channel, _remote) = line_channel(1024);
        assert_eq!(channel.close(CloseReason::TimeOut).await, CloseReason::TimeOut);
        assert_eq!(channel.closed().await, Some(CloseReason::TimeOut));
    }

    #[tokio::test]
    async fn test_detach_returns_transport_and_unconsumed_bytes() {
        let (channel, mut remote) = line_channel(1024);
        let mut packages = channel.start().unwrap();

        remote.write_all(b"done\r\npartial").await.unwrap();
        assert_eq!(packages.next().await.unwrap(), "done");
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();
        channel.on_closed(move |_| flag.store(true, Ordering::SeqCst));

        let detached = channel.detach().await.unwrap();
        assert_eq!(&detached.unconsumed[..], b"partial");
        assert!(channel.closed().await.is_none());
        assert!(!fired.load(Ordering::SeqCst));

        let mut transport = detached.transport;
        transport.write_all(b"still open").await.unwrap();
        let mut buf = [0u8; 10];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"still open");
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let (channel, mut remote) = line_channel(1024);
        let _packages = channel.start().unwrap();

        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let channel = channel.clone();
            tasks.push(tokio::spawn(async move {
                let mut encoder = TerminatorEncoder::lines();
                let line = vec![b'a' + i; 100];
                channel.send_package(&mut encoder, line.as_slice()).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut buf = vec![0u8; 8 * 102];
        remote.read_exact(&mut buf).await.unwrap();
        for line in buf.chunks(102) {
            assert!(line[..100].iter().all(|b| *b == line[0]));
            assert_eq!(&line[100..], b"\r\n");
        }
    }

    #[test]
    fn test_apply_filter_counts_partial_package() {
        let queue = ObjectQueue::new();
        let mut filter = TerminatorFilter::lines();
        let mut pending = 0;

        let mut inbound = BytesMut::from(&b"abc\r\ndefgh"[..]);
        let produced = apply_filter(&mut filter, &mut inbound, &mut pending, 8, &queue).unwrap();
        assert_eq!(produced, 1);
        assert_eq!(&inbound[..], b"defgh");

        inbound.extend_from_slice(b"ijkl");
        let err = apply_filter(&mut filter, &mut inbound, &mut pending, 8, &queue).unwrap_err();
        assert!(matches!(err, ChannelError::PackageTooLarge { size: 9, max: 8 }));
    }

    #[tokio::test]
    async fn test_close_completes_when_peer_stops_reading() {
        let (local, _remote) = duplex(64);
        let channel = PipeChannel::new(local, TerminatorFilter::lines(), options(1024));
        let _packages = channel.start().unwrap();

        channel.send(&[b'z'; 4096]).await.unwrap();
        channel.send(&[b'z'; 4096]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let closed =
            tokio::time::timeout(Duration::from_secs(2), channel.close(CloseReason::TimeOut)).await;
        assert_eq!(closed.ok(), Some(CloseReason::TimeOut));
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn test_close_flushes_queued_chunks() {
        let (channel, mut remote) = line_channel(1024);
        let _packages = channel.start().unwrap();

        channel.send(b"bye\r\n").await.unwrap();
        channel.close(CloseReason::LocalClosing).await;

        let mut received = Vec::new();
        remote.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"bye\r\n");
    }

    #[tokio::test]
    async fn test_try_send_reports_full_queue() {
        let (local, _remote) = duplex(64);
        let options = ChannelOptions {
            send_queue_capacity: 1,
            ..options(1024)
        };
        let channel = PipeChannel::new(local, TerminatorFilter::lines(), options);
        let _packages = channel.start().unwrap();

        let mut full = false;
        for _ in 0..4 {
            match channel.try_send(&[b'q'; 1024]) {
                Ok(()) => tokio::time::sleep(Duration::from_millis(5)).await,
                Err(ChannelError::SendQueueFull) => {
                    full = true;
                    break;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(full);

        channel.request_close(CloseReason::LocalClosing);
        assert_eq!(channel.closed().await, Some(CloseReason::LocalClosing));
        assert!(matches!(channel.try_send(b"late"), Err(ChannelError::Closed)));
    }

    fn data_filter() -> (WebSocketFilter, Arc<WebSocketContext>) {
        let context = Arc::new(WebSocketContext::for_tests(Role::Server, true));
        let filter = WebSocketFilter::Data(DataFilter::new(Arc::clone(&context)));
        (filter, context)
    }

    /// A masked client frame with a payload shorter than 126 bytes.
    fn masked_frame(first: u8, payload: &[u8]) -> Vec<u8> {
        let key = [0x5a, 0x17, 0x80, 0x3c];
        let mut out = vec![first, 0x80 | payload.len() as u8];
        out.extend_from_slice(&key);
        out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        out
    }

    fn fragments_with_pings(count: usize, size: usize) -> BytesMut {
        let mut inbound = BytesMut::new();
        for i in 0..count {
            let first = match i {
                0 => 0x02,
                i if i == count - 1 => 0x80,
                _ => 0x00,
            };
            inbound.extend_from_slice(&masked_frame(first, &vec![b'x'; size]));
            inbound.extend_from_slice(&masked_frame(0x89, b"p"));
        }
        inbound
    }

    #[test]
    fn test_control_frames_do_not_reset_message_length() {
        let queue = ObjectQueue::new();
        let (mut filter, _context) = data_filter();
        let mut pending = 0;
        let mut inbound = fragments_with_pings(11, 100);

        let err = apply_filter(&mut filter, &mut inbound, &mut pending, 200, &queue).unwrap_err();
        assert!(matches!(err, ChannelError::PackageTooLarge { max: 200, .. }));
        assert_eq!(queue.len(), 1, "only the first ping gets through");
    }

    #[test]
    fn test_interleaved_control_frames_within_limit() {
        let queue = ObjectQueue::new();
        let (mut filter, _context) = data_filter();
        let mut pending = 0;
        let mut inbound = fragments_with_pings(11, 100);

        let produced =
            apply_filter(&mut filter, &mut inbound, &mut pending, 2048, &queue).unwrap();
        assert_eq!(produced, 12);
        assert_eq!(pending, 0);
        assert!(inbound.is_empty());
    }

    #[test]
    fn test_tiny_fragments_hold_few_blocks() {
        let queue = ObjectQueue::new();
        let (mut filter, context) = data_filter();
        let mut pending = 0;
        let count = 1000;

        let mut inbound = BytesMut::new();
        for i in 0..count - 1 {
            let first = if i == 0 { 0x02 } else { 0x00 };
            inbound.extend_from_slice(&masked_frame(first, &[i as u8]));
        }
        let produced = apply_filter(&mut filter, &mut inbound, &mut pending, 0, &queue).unwrap();
        assert_eq!(produced, 0);

        let block_size = context.pool.block_size();
        assert!(context.pool.rented() <= count / block_size + 1);
        assert_eq!(filter.retained(), (count - 1) * 7);
    }

    /// Never completes a package; remembers the most input it was shown.
    struct WidestInput {
        widest: usize,
    }

    impl PipelineFilter for WidestInput {
        type Package = Bytes;

        fn filter(&mut self, reader: &mut SequenceReader<'_>) -> Result<Option<Bytes>, FilterError> {
            self.widest = self.widest.max(reader.remaining());
            Ok(None)
        }
    }

    #[test]
    fn test_filter_never_sees_past_the_limit() {
        let queue = ObjectQueue::new();
        let mut filter = WidestInput { widest: 0 };
        let mut pending = 0;
        let mut inbound = BytesMut::from(&[0u8; 1000][..]);

        let err = apply_filter(&mut filter, &mut inbound, &mut pending, 64, &queue).unwrap_err();
        assert!(matches!(err, ChannelError::PackageTooLarge { size: 1000, max: 64 }));
        assert_eq!(filter.widest, 64);
    }
}
