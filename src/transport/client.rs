//! Connection dispatcher: one stream, one decode loop, correlated callbacks.

use std::fmt;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, instrument, trace, warn};

use crate::protocol::codec;
use crate::protocol::metrics::{DiscardReason, FrameDirection, Metrics};
use crate::protocol::{
    CorrelationId, Decoded, Envelope, Error, MAX_PAYLOAD_SIZE, Result, TypeRegistry,
};

use super::pending::PendingTable;
use super::request::Request;
use super::stream::SplitStream;

/// Client configuration options.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Name of the thread running the decode loop.
    pub reader_thread_name: String,
    /// Name given to each thread running a response callback.
    pub callback_thread_name: String,
    /// Largest inbound payload accepted; a bigger frame kills the connection.
    pub max_payload_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reader_thread_name: "typewire-reader".to_owned(),
            callback_thread_name: "typewire-callback".to_owned(),
            max_payload_len: MAX_PAYLOAD_SIZE,
        }
    }
}

/// Lifecycle of a client's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The decode loop is reading frames.
    Running,
    /// A read failed; the decode loop has exited for good.
    Dead,
}

/// Typed message client over one byte stream.
///
/// Construction spawns a background thread that reads frames for as long as
/// the stream lives. Envelopes are routed by correlation id and inner type
/// code to callbacks attached through [`Request::on_response`]; every
/// callback runs on its own thread, so a slow callback never stalls the
/// decode loop. Plain (non-envelope) inbound values have no consumer and are
/// dropped.
///
/// Sends are serialized by a write lock, so frames from concurrent senders
/// never interleave. There are no timeouts: a request that is never answered
/// keeps its pending entry until [`forget`](Self::forget) is called.
///
/// The decode loop owns the read half until a read fails. To tear a
/// connection down, shut the stream down through a handle kept by the caller
/// (e.g. a [`TcpStream::try_clone`](std::net::TcpStream::try_clone)).
///
/// Cloning a client is cheap; clones share the connection.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

/// State shared between a client, its requests and its decode loop.
pub(crate) struct Shared {
    registry: Arc<TypeRegistry>,
    writer: Mutex<Box<dyn Write + Send>>,
    pending: Mutex<PendingTable>,
    next_id: AtomicU16,
    death: DeathSignal,
    callback_thread_name: String,
}

/// One-shot record of why the decode loop stopped.
///
/// Waiters park on the condvar, never while holding the lock, so a blocked
/// `wait_dead` does not stall `try_dead` on another clone.
#[derive(Default)]
struct DeathSignal {
    slot: Mutex<DeathSlot>,
    fired: Condvar,
}

#[derive(Default)]
struct DeathSlot {
    dead: bool,
    error: Option<Error>,
}

impl DeathSignal {
    fn lock(&self) -> MutexGuard<'_, DeathSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, err: Error) {
        let mut slot = self.lock();
        if slot.dead {
            return;
        }
        slot.dead = true;
        slot.error = Some(err);
        drop(slot);
        self.fired.notify_all();
    }

    fn is_dead(&self) -> bool {
        self.lock().dead
    }

    fn take(&self) -> Option<Error> {
        self.lock().error.take()
    }

    fn wait(&self) -> Option<Error> {
        let mut slot = self
            .fired
            .wait_while(self.lock(), |slot| !slot.dead)
            .unwrap_or_else(PoisonError::into_inner);
        slot.error.take()
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<Error> {
        let (mut slot, _) = self
            .fired
            .wait_timeout_while(self.lock(), timeout, |slot| !slot.dead)
            .unwrap_or_else(PoisonError::into_inner);
        slot.error.take()
    }
}

impl Client {
    /// Create a client with the default configuration.
    pub fn new<S: SplitStream>(stream: S, registry: Arc<TypeRegistry>) -> Result<Self> {
        Self::with_config(stream, registry, ClientConfig::default())
    }

    /// Create a client and start its decode loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be split or the decode thread
    /// cannot be spawned.
    #[instrument(level = "debug", skip(stream, registry))]
    pub fn with_config<S: SplitStream>(
        stream: S,
        registry: Arc<TypeRegistry>,
        config: ClientConfig,
    ) -> Result<Self> {
        let (reader, writer) = stream.split()?;

        let shared = Arc::new(Shared {
            registry,
            writer: Mutex::new(Box::new(writer)),
            pending: Mutex::new(PendingTable::new()),
            next_id: AtomicU16::new(1),
            death: DeathSignal::default(),
            callback_thread_name: config.callback_thread_name,
        });

        let loop_shared = Arc::clone(&shared);
        let max_payload_len = config.max_payload_len;
        Metrics::record_connection_open();
        let spawned = thread::Builder::new()
            .name(config.reader_thread_name)
            .spawn(move || decode_loop(reader, &loop_shared, max_payload_len));
        if let Err(err) = spawned {
            Metrics::record_connection_close();
            return Err(Error::Io(err));
        }

        Ok(Self { shared })
    }

    /// Send a plain, uncorrelated value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredType`] without writing anything if `T`
    /// was never registered, or [`Error::Io`] if the write fails.
    #[instrument(level = "trace", skip_all)]
    pub fn send<T>(&self, value: &T) -> Result<()>
    where
        T: Serialize + 'static,
    {
        let frame = codec::encode(value, &self.shared.registry)?;
        self.shared.write_frame(&frame)
    }

    /// Send `value` as a correlated request and return its handle.
    ///
    /// The pending entry for the new correlation id exists before the frame
    /// is written, so a reply can never overtake it. Attach callbacks to the
    /// returned [`Request`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnregisteredType`] without writing anything if `T`
    /// was never registered, or [`Error::Io`] if the write fails. A failed
    /// write removes the pending entry again.
    #[instrument(level = "trace", skip_all)]
    pub fn request<T>(&self, value: &T) -> Result<Request>
    where
        T: Serialize + 'static,
    {
        let (type_code, payload) = codec::inner_payload(value, &self.shared.registry)?;
        let correlation_id = self.shared.next_correlation_id();

        if self.shared.lock_pending().open(correlation_id) {
            warn!(correlation_id, "correlation id wrapped onto a pending request; replacing it");
        }

        let envelope = Envelope::new(correlation_id, type_code, payload.clone());
        let sent = codec::encode(&envelope, &self.shared.registry)
            .and_then(|frame| self.shared.write_frame(&frame));
        if let Err(err) = sent {
            self.shared.lock_pending().forget(correlation_id);
            return Err(err);
        }

        trace!(correlation_id, type_code, "request sent");
        Ok(Request::new(
            Arc::clone(&self.shared),
            correlation_id,
            type_code,
            payload,
        ))
    }

    /// Answer a request: send `value` wrapped in an envelope carrying the
    /// requester's correlation id.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    #[instrument(level = "trace", skip(self, value))]
    pub fn respond<T>(&self, correlation_id: CorrelationId, value: &T) -> Result<()>
    where
        T: Serialize + 'static,
    {
        let frame = codec::encode_envelope(value, &self.shared.registry, correlation_id)?;
        self.shared.write_frame(&frame)
    }

    /// Remove the pending entry for `correlation_id` and all its callbacks.
    ///
    /// Entries are never removed otherwise. Returns false if there was no
    /// entry.
    pub fn forget(&self, correlation_id: CorrelationId) -> bool {
        self.shared.lock_pending().forget(correlation_id)
    }

    /// Number of requests whose pending entry is still resident.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.lock_pending().len()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.shared.death.is_dead() {
            ConnectionState::Dead
        } else {
            ConnectionState::Running
        }
    }

    /// Registry shared with this client.
    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.shared.registry
    }

    /// Block until the connection dies and take the error that killed it.
    ///
    /// The error is handed out once across all clones; later calls return
    /// `None` as soon as the connection is dead.
    pub fn wait_dead(&self) -> Option<Error> {
        self.shared.death.wait()
    }

    /// Take the death error if the connection has already died.
    ///
    /// Never blocks, even while another clone waits in
    /// [`wait_dead`](Self::wait_dead).
    pub fn try_dead(&self) -> Option<Error> {
        self.shared.death.take()
    }

    /// Like [`wait_dead`](Self::wait_dead), giving up after `timeout`.
    pub fn wait_dead_timeout(&self, timeout: Duration) -> Option<Error> {
        self.shared.death.wait_timeout(timeout)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

impl Shared {
    pub(crate) fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub(crate) fn lock_pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next correlation id. Wraps silently at 16 bits.
    fn next_correlation_id(&self) -> CorrelationId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn write_frame(&self, frame: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let started = Instant::now();

        let written = writer.write_all(frame).and_then(|()| writer.flush());
        if let Err(err) = written {
            Metrics::record_error();
            return Err(Error::Io(err));
        }

        Metrics::record_send_latency(started.elapsed());
        Metrics::record_frame(FrameDirection::Sent, frame.len());
        Ok(())
    }

    /// Hand a decoded inbound value to whoever is waiting for it.
    fn route(&self, decoded: &Decoded) {
        let Some(envelope) = decoded.downcast_ref::<Envelope>() else {
            debug!(code = decoded.code(), "dropping plain inbound value");
            Metrics::record_discard(DiscardReason::NotEnvelope);
            return;
        };

        let correlation_id = envelope.correlation_id();
        let code = envelope.inner_type_code();
        let Some(inner) = self.registry.decode(code, envelope.inner_data().as_bytes()) else {
            debug!(correlation_id, code, "dropping undecodable envelope");
            Metrics::record_discard(DiscardReason::Undecodable);
            return;
        };

        let callbacks = self.lock_pending().callbacks(correlation_id, code);
        let Some(callbacks) = callbacks else {
            debug!(correlation_id, code, "dropping unclaimed response");
            Metrics::record_discard(DiscardReason::Unclaimed);
            return;
        };

        Metrics::record_routed(callbacks.len());
        let value = inner.into_any();
        for callback in callbacks {
            let value = Arc::clone(&value);
            let spawned = thread::Builder::new()
                .name(self.callback_thread_name.clone())
                .spawn(move || callback(value));
            if let Err(err) = spawned {
                Metrics::record_error();
                warn!(correlation_id, code, error = %err, "failed to spawn callback");
            }
        }
    }
}

fn decode_loop<R: Read>(
    mut reader: R,
    shared: &Shared,
    max_payload_len: usize,
) {
    loop {
        match codec::read_next_limited(&mut reader, &shared.registry, max_payload_len) {
            Ok(Some(decoded)) => shared.route(&decoded),
            Ok(None) => {}
            Err(err) => {
                Metrics::record_error();
                Metrics::record_connection_close();
                debug!(error = %err, "connection died");
                shared.death.fire(err);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::{self, Cursor};
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);
    const QUIET: Duration = Duration::from_millis(200);

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        id: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Unregistered {
        value: u8,
    }

    /// Writer that records everything and can be told to fail.
    #[derive(Clone, Default)]
    struct Recorder {
        bytes: Arc<Mutex<Vec<u8>>>,
        fail: bool,
    }

    impl Write for Recorder {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.bytes.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn registry() -> Arc<TypeRegistry> {
        let registry = TypeRegistry::new();
        registry.register::<Item>().unwrap();
        Arc::new(registry)
    }

    fn item(name: &str, id: i64) -> Item {
        Item {
            name: name.into(),
            id,
        }
    }

    /// Feed a reply envelope straight into the router.
    fn deliver(client: &Client, correlation_id: CorrelationId, value: &Item) {
        let frame = codec::encode_envelope(value, client.registry(), correlation_id).unwrap();
        let decoded = codec::read_next(&mut Cursor::new(frame), client.registry())
            .unwrap()
            .unwrap();
        client.shared.route(&decoded);
    }

    #[test]
    fn test_empty_stream_dies_once() {
        let client = Client::new((io::empty(), Recorder::default()), registry()).unwrap();

        let err = client.wait_dead_timeout(WAIT).unwrap();
        assert!(err.is_io());
        assert_eq!(client.state(), ConnectionState::Dead);
        assert!(client.try_dead().is_none());
    }

    #[test]
    fn test_correlation_ids_start_at_one_and_increase() {
        let recorder = Recorder::default();
        let client = Client::new((io::empty(), recorder.clone()), registry()).unwrap();

        let first = client.request(&item("a", 1)).unwrap();
        let second = client.request(&item("b", 2)).unwrap();
        assert_eq!(first.correlation_id(), 1);
        assert_eq!(second.correlation_id(), 2);
        assert_eq!(client.pending_len(), 2);

        let written = recorder.bytes.lock().unwrap().clone();
        let mut cursor = Cursor::new(written);
        let decoded = codec::read_next(&mut cursor, client.registry()).unwrap().unwrap();
        let envelope = decoded.downcast_ref::<Envelope>().unwrap();
        assert_eq!(envelope.correlation_id(), 1);
        assert_eq!(envelope.inner_type_code(), 1);
    }

    #[test]
    fn test_unregistered_type_writes_nothing() {
        let recorder = Recorder::default();
        let client = Client::new((io::empty(), recorder.clone()), registry()).unwrap();

        let sent = client.send(&Unregistered { value: 1 });
        assert!(matches!(sent, Err(Error::UnregisteredType { .. })));
        let requested = client.request(&Unregistered { value: 1 });
        assert!(matches!(requested, Err(Error::UnregisteredType { .. })));

        assert!(recorder.bytes.lock().unwrap().is_empty());
        assert_eq!(client.pending_len(), 0);
    }

    #[test]
    fn test_failed_write_surfaces_and_cleans_up() {
        let recorder = Recorder {
            fail: true,
            ..Recorder::default()
        };
        let client = Client::new((io::empty(), recorder), registry()).unwrap();

        assert!(client.send(&item("a", 1)).unwrap_err().is_io());
        assert!(client.request(&item("a", 1)).unwrap_err().is_io());
        assert_eq!(client.pending_len(), 0);
    }

    #[test]
    fn test_forget_removes_entry() {
        let client = Client::new((io::empty(), Recorder::default()), registry()).unwrap();
        let request = client.request(&item("a", 1)).unwrap();

        assert!(client.forget(request.correlation_id()));
        assert!(!client.forget(request.correlation_id()));
        assert_eq!(client.pending_len(), 0);
    }

    #[test]
    fn test_correlation_counter_wraps() {
        let client = Client::new((io::empty(), Recorder::default()), registry()).unwrap();
        client.shared.next_id.store(u16::MAX, Ordering::Relaxed);

        assert_eq!(client.shared.next_correlation_id(), u16::MAX);
        assert_eq!(client.shared.next_correlation_id(), 0);
    }

    #[test]
    fn test_wrapped_id_replaces_stale_entry() {
        let client = Client::new((io::empty(), Recorder::default()), registry()).unwrap();
        let (tx, rx) = mpsc::channel();

        let stale = client.request(&item("old", 1)).unwrap();
        let stale_tx = tx.clone();
        stale.on_response::<Item, _>(move |_| stale_tx.send("stale").unwrap());

        client
            .shared
            .next_id
            .store(stale.correlation_id(), Ordering::Relaxed);
        let fresh = client.request(&item("new", 2)).unwrap();
        assert_eq!(fresh.correlation_id(), stale.correlation_id());
        assert_eq!(client.pending_len(), 1);
        fresh.on_response::<Item, _>(move |_| tx.send("fresh").unwrap());

        deliver(&client, fresh.correlation_id(), &item("pong", 3));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "fresh");
        assert!(rx.recv_timeout(QUIET).is_err());
    }

    #[test]
    fn test_alias_subscription_is_skipped() {
        let registry = registry();
        let code = registry.code_for::<Item>().unwrap();
        registry.alias::<Box<Item>>(code).unwrap();
        let client = Client::new((io::empty(), Recorder::default()), registry).unwrap();
        let (tx, rx) = mpsc::channel();

        let request = client.request(&item("ping", 1)).unwrap();
        let alias_tx = tx.clone();
        request
            .on_response::<Box<Item>, _>(move |_| alias_tx.send("alias").unwrap())
            .on_response::<Item, _>(move |_| tx.send("item").unwrap());

        let subscribed = client
            .shared
            .lock_pending()
            .callbacks(request.correlation_id(), code)
            .map(|callbacks| callbacks.len());
        assert_eq!(subscribed, Some(1));

        deliver(&client, request.correlation_id(), &item("pong", 2));
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "item");
        assert!(rx.recv_timeout(QUIET).is_err());
    }
}
