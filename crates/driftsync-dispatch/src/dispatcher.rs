//! Worker pool and operation queue
//!
//! A [`Dispatcher`] owns an unbounded queue of closures and a fixed-size
//! pool of workers, each holding one persistent connection produced by an
//! [`IConnectionFactory`]. Operations are executed in submission order
//! across the pool; two workers mean at most two operations in flight.
//!
//! ## Design
//!
//! - The pool starts lazily: no connection is opened until the first
//!   operation is submitted, and each worker connects on its own first
//!   work item.
//! - Every submission returns an [`OpHandle`] resolving to that single
//!   operation's outcome. A failed operation never tears down its worker
//!   or cancels queued siblings.
//! - [`shutdown`](Dispatcher::shutdown) closes the queue, drains what was
//!   already accepted, then hands every live connection back to the
//!   factory for disconnect. Submissions after shutdown resolve to
//!   [`BackendError::QueueClosed`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use driftsync_core::domain::errors::BackendError;

use crate::retry::RetryPolicy;

/// Produces and releases the persistent connections a worker pool runs on
#[async_trait]
pub trait IConnectionFactory<C>: Send + Sync + 'static {
    /// Opens a fresh connection.
    async fn connect(&self) -> Result<C, BackendError>;

    /// Closes a connection previously returned by [`connect`](Self::connect).
    async fn disconnect(&self, conn: C) -> Result<(), BackendError>;
}

/// Boxed operation: borrows the worker's connection for one execution.
type WorkFn<C> =
    Box<dyn for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<(), BackendError>> + Send>;

struct WorkItem<C> {
    run: WorkFn<C>,
    done: oneshot::Sender<Result<(), BackendError>>,
}

/// Future outcome of one submitted operation
///
/// Await it with [`wait`](OpHandle::wait), or drop it to detach the
/// operation; detached operations still run to completion.
pub struct OpHandle {
    done: oneshot::Receiver<Result<(), BackendError>>,
}

impl OpHandle {
    /// Resolves to the operation's outcome.
    pub async fn wait(self) -> Result<(), BackendError> {
        match self.done.await {
            Ok(result) => result,
            // Sender dropped without a result: the queue went away.
            Err(_) => Err(BackendError::QueueClosed),
        }
    }

    fn resolved(result: Result<(), BackendError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { done: rx }
    }
}

enum Pool<C> {
    /// No operation submitted yet; no workers, no connections.
    Idle,
    Running {
        tx: mpsc::UnboundedSender<WorkItem<C>>,
        handles: Vec<JoinHandle<Option<C>>>,
    },
    Closed,
}

/// Serializes operations onto a bounded pool of persistent connections
pub struct Dispatcher<C> {
    factory: Arc<dyn IConnectionFactory<C>>,
    retry: RetryPolicy,
    workers: usize,
    pool: Mutex<Pool<C>>,
}

impl<C: Send + 'static> Dispatcher<C> {
    /// Creates an idle dispatcher. `workers` is clamped to at least 1.
    pub fn new(
        factory: Arc<dyn IConnectionFactory<C>>,
        workers: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            factory,
            retry,
            workers: workers.max(1),
            pool: Mutex::new(Pool::Idle),
        }
    }

    /// Queues one operation and returns its handle.
    ///
    /// The first submission spins up the worker pool. After
    /// [`shutdown`](Self::shutdown) the handle resolves immediately to
    /// [`BackendError::QueueClosed`].
    pub async fn submit<F>(&self, op: F) -> OpHandle
    where
        F: for<'a> FnOnce(&'a mut C) -> BoxFuture<'a, Result<(), BackendError>> + Send + 'static,
    {
        let mut pool = self.pool.lock().await;

        if matches!(*pool, Pool::Idle) {
            *pool = self.start_pool();
        }

        let tx = match &*pool {
            Pool::Running { tx, .. } => tx,
            Pool::Closed => return OpHandle::resolved(Err(BackendError::QueueClosed)),
            // Replaced just above.
            Pool::Idle => return OpHandle::resolved(Err(BackendError::QueueClosed)),
        };

        let (done_tx, done_rx) = oneshot::channel();
        let item = WorkItem {
            run: Box::new(op),
            done: done_tx,
        };

        if tx.send(item).is_err() {
            return OpHandle::resolved(Err(BackendError::QueueClosed));
        }

        OpHandle { done: done_rx }
    }

    fn start_pool(&self) -> Pool<C> {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));

        info!(workers = self.workers, "Starting dispatcher worker pool");

        let handles = (0..self.workers)
            .map(|id| {
                let factory = self.factory.clone();
                let retry = self.retry;
                let rx = rx.clone();
                tokio::spawn(worker_loop(id, factory, retry, rx))
            })
            .collect();

        Pool::Running { tx, handles }
    }

    /// Closes the queue, waits for accepted operations to finish, and
    /// disconnects every connection the pool opened.
    ///
    /// Idempotent; later calls are no-ops.
    pub async fn shutdown(&self) -> Result<(), BackendError> {
        let handles = {
            let mut pool = self.pool.lock().await;
            match std::mem::replace(&mut *pool, Pool::Closed) {
                Pool::Running { tx, handles } => {
                    // Dropping the sender closes the queue; workers drain
                    // what is already buffered and exit.
                    drop(tx);
                    handles
                }
                Pool::Idle | Pool::Closed => return Ok(()),
            }
        };

        info!(workers = handles.len(), "Draining dispatcher worker pool");

        for handle in handles {
            match handle.await {
                Ok(Some(conn)) => {
                    if let Err(err) = self.factory.disconnect(conn).await {
                        warn!(error = %err, "Error disconnecting pooled connection");
                    }
                }
                Ok(None) => {}
                Err(err) => error!(error = %err, "Dispatcher worker panicked"),
            }
        }

        Ok(())
    }
}

/// One worker: pulls items off the shared queue until it closes, lazily
/// opening its connection on the first item. Returns the connection (if
/// any) so shutdown can hand it back to the factory.
async fn worker_loop<C: Send + 'static>(
    id: usize,
    factory: Arc<dyn IConnectionFactory<C>>,
    retry: RetryPolicy,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem<C>>>>,
) -> Option<C> {
    let mut conn: Option<C> = None;

    loop {
        // Hold the receiver lock only for the dequeue, never across an
        // operation, so the other workers keep draining the queue.
        let item = { rx.lock().await.recv().await };
        let Some(item) = item else { break };

        if conn.is_none() {
            let attempt = retry
                .run(|| {
                    let factory = factory.clone();
                    async move { factory.connect().await }
                })
                .await;
            match attempt {
                Ok(c) => {
                    debug!(worker = id, "Worker connected");
                    conn = Some(c);
                }
                Err(err) => {
                    warn!(worker = id, error = %err, "Worker failed to connect");
                    let _ = item.done.send(Err(err));
                    continue;
                }
            }
        }
        let Some(connected) = conn.as_mut() else { continue };

        let result = (item.run)(connected).await;
        if let Err(err) = &result {
            debug!(worker = id, error = %err, "Operation failed");
        }
        // The caller may have detached; a dropped handle is fine.
        let _ = item.done.send(result);
    }

    debug!(worker = id, "Worker exiting, queue closed");
    conn
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::FutureExt;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    use super::*;

    struct FakeConn {
        id: usize,
    }

    #[derive(Default)]
    struct FakeFactory {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
        fail_connects: AtomicUsize,
    }

    #[async_trait]
    impl IConnectionFactory<FakeConn> for FakeFactory {
        async fn connect(&self) -> Result<FakeConn, BackendError> {
            if self.fail_connects.load(Ordering::SeqCst) > 0 {
                self.fail_connects.fetch_sub(1, Ordering::SeqCst);
                return Err(BackendError::Connect("refused".into()));
            }
            let id = self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConn { id })
        }

        async fn disconnect(&self, _conn: FakeConn) -> Result<(), BackendError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn dispatcher(factory: Arc<FakeFactory>, workers: usize) -> Dispatcher<FakeConn> {
        Dispatcher::new(
            factory,
            workers,
            RetryPolicy::new(2, Duration::from_millis(1)),
        )
    }

    #[tokio::test]
    async fn submitted_operation_runs_and_resolves() {
        let factory = Arc::new(FakeFactory::default());
        let d = dispatcher(factory.clone(), 2);

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let handle = d
            .submit(move |_conn| {
                async move {
                    r.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })
            .await;

        handle.wait().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pool_is_lazy_until_first_submit() {
        let factory = Arc::new(FakeFactory::default());
        let d = dispatcher(factory.clone(), 2);

        assert_eq!(factory.connects.load(Ordering::SeqCst), 0);

        d.submit(|_conn| async { Ok(()) }.boxed())
            .await
            .wait()
            .await
            .unwrap();

        assert!(factory.connects.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn operation_failure_does_not_kill_the_worker() {
        let factory = Arc::new(FakeFactory::default());
        let d = dispatcher(factory.clone(), 1);

        let failing = d
            .submit(|_conn| {
                async { Err(BackendError::Remote("permission denied".into())) }.boxed()
            })
            .await;
        assert!(matches!(
            failing.wait().await,
            Err(BackendError::Remote(_))
        ));

        let ok = d.submit(|_conn| async { Ok(()) }.boxed()).await;
        assert!(ok.wait().await.is_ok());
    }

    #[tokio::test]
    async fn submit_after_shutdown_resolves_queue_closed() {
        let factory = Arc::new(FakeFactory::default());
        let d = dispatcher(factory.clone(), 2);

        d.submit(|_conn| async { Ok(()) }.boxed())
            .await
            .wait()
            .await
            .unwrap();
        d.shutdown().await.unwrap();

        let handle = d.submit(|_conn| async { Ok(()) }.boxed()).await;
        assert!(matches!(
            handle.wait().await,
            Err(BackendError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn shutdown_disconnects_every_opened_connection() {
        let factory = Arc::new(FakeFactory::default());
        let d = dispatcher(factory.clone(), 2);

        // Two slow operations force both workers to connect.
        let gate = Arc::new(Notify::new());
        let mut handles = Vec::new();
        for _ in 0..2 {
            let g = gate.clone();
            handles.push(
                d.submit(move |_conn| {
                    async move {
                        g.notified().await;
                        Ok(())
                    }
                    .boxed()
                })
                .await,
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.notify_waiters();
        for h in handles {
            h.wait().await.unwrap();
        }

        d.shutdown().await.unwrap();

        let connects = factory.connects.load(Ordering::SeqCst);
        assert_eq!(connects, 2);
        assert_eq!(factory.disconnects.load(Ordering::SeqCst), connects);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let factory = Arc::new(FakeFactory::default());
        let d = dispatcher(factory.clone(), 2);

        d.shutdown().await.unwrap();
        d.shutdown().await.unwrap();
        assert_eq!(factory.disconnects.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn connect_failure_fails_the_item_not_the_pool() {
        let factory = Arc::new(FakeFactory::default());
        // Connect errors are not transient, so the first item's connect
        // gives up immediately; the next item triggers a fresh
        // (successful) connect.
        factory.fail_connects.store(1, Ordering::SeqCst);
        let d = dispatcher(factory.clone(), 1);

        let first = d.submit(|_conn| async { Ok(()) }.boxed()).await;
        assert!(matches!(
            first.wait().await,
            Err(BackendError::Connect(_))
        ));

        let second = d.submit(|_conn| async { Ok(()) }.boxed()).await;
        assert!(second.wait().await.is_ok());
    }

    #[tokio::test]
    async fn two_workers_run_operations_concurrently() {
        let factory = Arc::new(FakeFactory::default());
        let d = dispatcher(factory.clone(), 2);

        // A blocks until B has run; only possible with two live workers.
        let b_ran = Arc::new(Notify::new());

        let signal = b_ran.clone();
        let a = d
            .submit(move |_conn| {
                async move {
                    signal.notified().await;
                    Ok(())
                }
                .boxed()
            })
            .await;

        let signal = b_ran.clone();
        let b = d
            .submit(move |_conn| {
                async move {
                    // notify_one stores a permit, so B finishing before A
                    // starts waiting cannot lose the wakeup.
                    signal.notify_one();
                    Ok(())
                }
                .boxed()
            })
            .await;

        let both = async {
            a.wait().await.unwrap();
            b.wait().await.unwrap();
        };
        timeout(Duration::from_secs(5), both)
            .await
            .expect("operations deadlocked on a single worker");
    }

    #[tokio::test]
    async fn connections_are_reused_across_operations() {
        let factory = Arc::new(FakeFactory::default());
        let d = dispatcher(factory.clone(), 1);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        for _ in 0..5 {
            let seen = seen.clone();
            d.submit(move |conn: &mut FakeConn| {
                let id = conn.id;
                async move {
                    seen.lock().unwrap().push(id);
                    Ok(())
                }
                .boxed()
            })
            .await
            .wait()
            .await
            .unwrap();
        }

        assert_eq!(factory.connects.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![0, 0, 0, 0, 0]);
    }
}
