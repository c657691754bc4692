//! RX/TX pairing over one transport.
//!
//! An [`Endpoint`] owns an [`RxEngine`] and a [`TxAssembler`] bound to the
//! same transport, plus a single dispatch worker thread that serialises
//! delivery of completed frames to the user callback. The engine's
//! completion hook only hands snapshots over: a waiting [`request`] is
//! fulfilled directly, everything else goes through a bounded queue that
//! drops its oldest entry on overflow.
//!
//! [`request`]: Endpoint::request

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::crc::{Crc32Soft, CrcAlgorithm};
use crate::error::{FrameError, Result};
use crate::layout::FieldLayout;
use crate::rx::{RxEngine, Subscription};
use crate::snapshot::FrameSnapshot;
use crate::transport::{ReceiveSubscription, Transport};
use crate::tx::{PacketField, TxAssembler};

/// Default capacity of the dispatch queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// User callback receiving dispatched frames on the worker thread.
pub type ReceiveCallback = Box<dyn Fn(FrameSnapshot) + Send>;

struct DispatchQueue {
    items: VecDeque<FrameSnapshot>,
    capacity: usize,
    dropped: u64,
    running: bool,
}

impl DispatchQueue {
    fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::new(),
            capacity: capacity.max(1),
            dropped: 0,
            running: true,
        }
    }

    /// Enqueue a snapshot; returns true when the oldest entry was dropped.
    fn push(&mut self, snapshot: FrameSnapshot) -> bool {
        let mut overflowed = false;
        if self.items.len() >= self.capacity {
            self.items.pop_front();
            self.dropped += 1;
            overflowed = true;
        }
        self.items.push_back(snapshot);
        overflowed
    }
}

struct Reply {
    waiting: bool,
    snapshot: Option<FrameSnapshot>,
}

struct Shared {
    queue: Mutex<DispatchQueue>,
    queue_cv: Condvar,
    reply: Mutex<Reply>,
    reply_cv: Condvar,
    callback: Mutex<Option<ReceiveCallback>>,
    shutdown: AtomicBool,
}

/// Builder for [`Endpoint`].
pub struct EndpointBuilder {
    rx_layout: Option<Arc<FieldLayout>>,
    tx_layout: Option<Arc<FieldLayout>>,
    transport: Option<Arc<dyn Transport>>,
    crc_factory: Box<dyn Fn() -> Box<dyn CrcAlgorithm>>,
    queue_capacity: usize,
    debug: bool,
}

impl EndpointBuilder {
    fn new() -> Self {
        Self {
            rx_layout: None,
            tx_layout: None,
            transport: None,
            crc_factory: Box::new(|| Box::new(Crc32Soft::new())),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            debug: false,
        }
    }

    /// Use one layout for both directions.
    pub fn layout(mut self, layout: FieldLayout) -> Self {
        let layout = Arc::new(layout);
        self.rx_layout = Some(Arc::clone(&layout));
        self.tx_layout = Some(layout);
        self
    }

    /// Layout of inbound frames.
    pub fn rx_layout(mut self, layout: FieldLayout) -> Self {
        self.rx_layout = Some(Arc::new(layout));
        self
    }

    /// Layout of outbound frames.
    pub fn tx_layout(mut self, layout: FieldLayout) -> Self {
        self.tx_layout = Some(Arc::new(layout));
        self
    }

    /// The transport both directions share.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// CRC algorithm factory, called once per direction. Defaults to
    /// [`Crc32Soft`].
    pub fn crc(mut self, factory: impl Fn() -> Box<dyn CrcAlgorithm> + 'static) -> Self {
        self.crc_factory = Box::new(factory);
        self
    }

    /// Capacity of the dispatch queue (oldest entries drop on overflow).
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Enable RX mismatch diagnostics.
    pub fn debug(mut self, on: bool) -> Self {
        self.debug = on;
        self
    }

    /// Wire everything together and start the dispatch worker.
    pub fn build(self) -> Result<Endpoint> {
        let rx_layout = self
            .rx_layout
            .ok_or_else(|| FrameError::Layout("endpoint requires an RX layout".into()))?;
        let tx_layout = self
            .tx_layout
            .ok_or_else(|| FrameError::Layout("endpoint requires a TX layout".into()))?;
        let transport = self.transport.ok_or(FrameError::NoTransport)?;

        let mut rx = RxEngine::new(rx_layout, (self.crc_factory)());
        rx.set_debug(self.debug);
        let mut tx = TxAssembler::new(tx_layout, (self.crc_factory)());
        tx.set_transport(Arc::clone(&transport));

        let shared = Arc::new(Shared {
            queue: Mutex::new(DispatchQueue::new(self.queue_capacity)),
            queue_cv: Condvar::new(),
            reply: Mutex::new(Reply {
                waiting: false,
                snapshot: None,
            }),
            reply_cv: Condvar::new(),
            callback: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        });

        // Completion hook: fulfil a waiting request, otherwise enqueue.
        let hook_shared = Arc::clone(&shared);
        let rx_subscription = rx.subscribe(move |snapshot: &FrameSnapshot| {
            {
                let mut reply = hook_shared.reply.lock().unwrap();
                if reply.waiting && reply.snapshot.is_none() {
                    reply.snapshot = Some(snapshot.clone());
                    drop(reply);
                    hook_shared.reply_cv.notify_all();
                    return;
                }
            }
            let overflowed = {
                let mut queue = hook_shared.queue.lock().unwrap();
                queue.push(snapshot.clone())
            };
            if overflowed {
                tracing::warn!(
                    target: "framewire::endpoint",
                    "dispatch queue overflow, oldest frame dropped"
                );
            }
            hook_shared.queue_cv.notify_one();
        });

        let rx = Arc::new(Mutex::new(rx));
        let rx_for_transport = Arc::clone(&rx);
        let transport_subscription: ReceiveSubscription = Arc::new(move |bytes: &[u8]| {
            rx_for_transport.lock().unwrap().fill(bytes);
            bytes.len()
        });
        transport.subscribe_on_received(Arc::clone(&transport_subscription));

        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("framewire-dispatch".into())
            .spawn(move || dispatch_loop(worker_shared))
            .map_err(FrameError::Transport)?;

        Ok(Endpoint {
            rx,
            tx: Mutex::new(tx),
            shared,
            request_lock: Mutex::new(()),
            worker: Some(worker),
            _rx_subscription: rx_subscription,
            _transport_subscription: transport_subscription,
        })
    }
}

/// Pops queued snapshots and hands them to the user callback, draining the
/// queue before exiting on shutdown.
fn dispatch_loop(shared: Arc<Shared>) {
    let mut queue = shared.queue.lock().unwrap();
    loop {
        if let Some(snapshot) = queue.items.pop_front() {
            drop(queue);
            if let Some(callback) = shared.callback.lock().unwrap().as_ref() {
                callback(snapshot);
            }
            queue = shared.queue.lock().unwrap();
            continue;
        }
        if !queue.running {
            break;
        }
        queue = shared.queue_cv.wait(queue).unwrap();
    }
}

/// A protocol endpoint: RX engine + TX assembler + dispatch worker.
pub struct Endpoint {
    rx: Arc<Mutex<RxEngine>>,
    tx: Mutex<TxAssembler>,
    shared: Arc<Shared>,
    request_lock: Mutex<()>,
    worker: Option<JoinHandle<()>>,
    _rx_subscription: Subscription,
    _transport_subscription: ReceiveSubscription,
}

impl Endpoint {
    /// Start building an endpoint.
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::new()
    }

    /// Assemble and send a frame (fire-and-forget).
    pub fn send(&self, fields: &[PacketField<'_>]) -> Result<usize> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(FrameError::Shutdown);
        }
        self.tx.lock().unwrap().send_packet(fields)
    }

    /// Send a frame and wait for the next completed inbound frame.
    ///
    /// At most one request is in flight; concurrent callers are serialised.
    /// On timeout the late response, if it ever arrives, is delivered to the
    /// queued receive callback instead.
    pub fn request(&self, fields: &[PacketField<'_>], timeout: Duration) -> Result<FrameSnapshot> {
        if self.shared.shutdown.load(Ordering::SeqCst) {
            return Err(FrameError::Shutdown);
        }
        let _serialised = self.request_lock.lock().unwrap();

        {
            let mut reply = self.shared.reply.lock().unwrap();
            reply.waiting = true;
            reply.snapshot = None;
        }

        if let Err(err) = self.tx.lock().unwrap().send_packet(fields) {
            let mut reply = self.shared.reply.lock().unwrap();
            reply.waiting = false;
            reply.snapshot = None;
            return Err(err);
        }

        let reply = self.shared.reply.lock().unwrap();
        let (mut reply, _) = self
            .shared
            .reply_cv
            .wait_timeout_while(reply, timeout, |r| {
                r.snapshot.is_none() && !self.shared.shutdown.load(Ordering::SeqCst)
            })
            .unwrap();
        reply.waiting = false;
        match reply.snapshot.take() {
            Some(snapshot) => Ok(snapshot),
            None => {
                drop(reply);
                if self.shared.shutdown.load(Ordering::SeqCst) {
                    Err(FrameError::Shutdown)
                } else {
                    Err(FrameError::Timeout)
                }
            }
        }
    }

    /// Feed bytes into the RX engine directly, bypassing the transport.
    /// Useful when input arrives through a side channel.
    pub fn receive(&self, bytes: &[u8]) {
        self.rx.lock().unwrap().fill(bytes);
    }

    /// Install the user callback invoked from the dispatch worker.
    pub fn set_receive_callback(&self, callback: impl Fn(FrameSnapshot) + Send + 'static) {
        *self.shared.callback.lock().unwrap() = Some(Box::new(callback));
    }

    /// Number of frames dropped by the dispatch queue so far.
    pub fn dropped_count(&self) -> u64 {
        self.shared.queue.lock().unwrap().dropped
    }

    /// Handle to the RX engine, e.g. for extra subscriptions or debug hooks.
    pub fn rx_engine(&self) -> Arc<Mutex<RxEngine>> {
        Arc::clone(&self.rx)
    }

    /// Enable RX mismatch diagnostics.
    pub fn set_debug(&self, on: bool) {
        self.rx.lock().unwrap().set_debug(on);
    }

    /// Stop accepting work and let the worker drain its queue. Subsequent
    /// `send`/`request` calls return [`FrameError::Shutdown`].
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.running = false;
        }
        self.shared.queue_cv.notify_all();
        self.shared.reply_cv.notify_all();
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldFlags, FieldName, FieldSpec};
    use crate::transport::{EchoTransport, Transport as _};

    fn loop_layout() -> FieldLayout {
        FieldLayout::new(vec![
            FieldSpec::constant(FieldName::Id, &[0xA5]),
            FieldSpec::uint(FieldName::Len, 1)
                .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC),
            FieldSpec::var(FieldName::Data, 32)
                .with_flags(FieldFlags::IS_IN_LEN | FieldFlags::IS_IN_CRC),
            FieldSpec::uint(FieldName::Crc, 2),
        ])
        .unwrap()
    }

    fn echo_endpoint() -> Endpoint {
        let transport = Arc::new(EchoTransport::new());
        transport.open().unwrap();
        Endpoint::builder()
            .layout(loop_layout())
            .transport(transport)
            .build()
            .unwrap()
    }

    #[test]
    fn test_build_requires_layout_and_transport() {
        assert!(matches!(
            Endpoint::builder().build(),
            Err(FrameError::Layout(_))
        ));
        assert!(matches!(
            Endpoint::builder().layout(loop_layout()).build(),
            Err(FrameError::NoTransport)
        ));
    }

    #[test]
    fn test_queue_drop_oldest_on_overflow() {
        let mut queue = DispatchQueue::new(2);
        let empty = FrameSnapshot::new(Vec::new());
        assert!(!queue.push(empty.clone()));
        assert!(!queue.push(empty.clone()));
        assert!(queue.push(empty));
        assert_eq!(queue.items.len(), 2);
        assert_eq!(queue.dropped, 1);
    }

    #[test]
    fn test_request_via_echo_loopback() {
        let endpoint = echo_endpoint();
        let snapshot = endpoint
            .request(
                &[PacketField::bytes(FieldName::Data, b"ping")],
                Duration::from_secs(1),
            )
            .unwrap();
        assert_eq!(
            snapshot.get(FieldName::Data).unwrap().as_bytes(),
            Some(&b"ping"[..])
        );
    }

    #[test]
    fn test_send_then_callback_delivery() {
        let endpoint = echo_endpoint();
        let (sender, receiver) = std::sync::mpsc::channel();
        endpoint.set_receive_callback(move |snapshot| {
            let _ = sender.send(snapshot);
        });

        endpoint
            .send(&[PacketField::bytes(FieldName::Data, b"event")])
            .unwrap();

        let snapshot = receiver.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(
            snapshot.get(FieldName::Data).unwrap().as_bytes(),
            Some(&b"event"[..])
        );
    }

    #[test]
    fn test_shutdown_rejects_further_work() {
        let endpoint = echo_endpoint();
        endpoint.shutdown();
        assert!(matches!(
            endpoint.send(&[PacketField::bytes(FieldName::Data, b"x")]),
            Err(FrameError::Shutdown)
        ));
        assert!(matches!(
            endpoint.request(
                &[PacketField::bytes(FieldName::Data, b"x")],
                Duration::from_millis(10)
            ),
            Err(FrameError::Shutdown)
        ));
    }

    #[test]
    fn test_drop_joins_worker() {
        let endpoint = echo_endpoint();
        endpoint
            .send(&[PacketField::bytes(FieldName::Data, b"bye")])
            .unwrap();
        drop(endpoint); // must not hang
    }
}
