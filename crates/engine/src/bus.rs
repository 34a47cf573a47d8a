//! Named, typed in-process events with async fan-out.
//!
//! An [`Event`] is a cheaply cloneable handle; every clone shares the same
//! listener set. Emission never blocks the caller: the current listeners run
//! in registration order on one spawned task, each receiving its own clone of
//! the payload so listener mutations cannot leak back. A listener error is
//! caught, logged, and re-emitted on the event's error channel; it never
//! aborts sibling listeners.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type Callback<T> = Arc<dyn Fn(T) -> BoxFuture + Send + Sync>;
type ErrorCallback<T> = Arc<dyn Fn(Arc<anyhow::Error>, T) -> BoxFuture + Send + Sync>;

/// Handle returned by [`Event::bind`], usable with [`Event::unbind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

struct Registered<T> {
    id: u64,
    once: bool,
    callback: Callback<T>,
}

struct Inner<T> {
    name: String,
    listeners: Mutex<Vec<Registered<T>>>,
    error_listeners: Mutex<Vec<ErrorCallback<T>>>,
    next_id: AtomicU64,
}

/// A named event carrying payloads of type `T`.
pub struct Event<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Event<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Event<T> {
    /// Create a new event channel with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                listeners: Mutex::new(Vec::new()),
                error_listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// The event name, used in logs.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn register(&self, callback: Callback<T>, once: bool) -> ListenerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .expect("bus listener lock poisoned")
            .push(Registered { id, once, callback });
        ListenerId(id)
    }

    /// Subscribe a listener. It runs for every subsequent emission.
    pub fn bind<F, Fut>(&self, callback: F) -> ListenerId
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(Arc::new(move |payload| Box::pin(callback(payload))), false)
    }

    /// Subscribe a listener that is removed after its first invocation.
    pub fn bind_once<F, Fut>(&self, callback: F) -> ListenerId
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(Arc::new(move |payload| Box::pin(callback(payload))), true)
    }

    /// Remove a listener. Returns whether it was still registered.
    pub fn unbind(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .inner
            .listeners
            .lock()
            .expect("bus listener lock poisoned");
        let before = listeners.len();
        listeners.retain(|l| l.id != id.0);
        listeners.len() != before
    }

    /// Subscribe to listener failures on this event.
    pub fn bind_error<F, Fut>(&self, callback: F)
    where
        F: Fn(Arc<anyhow::Error>, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner
            .error_listeners
            .lock()
            .expect("bus listener lock poisoned")
            .push(Arc::new(move |err, payload| Box::pin(callback(err, payload))));
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .expect("bus listener lock poisoned")
            .len()
    }

    /// Deliver `payload` to all current listeners without awaiting them.
    ///
    /// Returns `true` when at least one listener was registered.
    pub fn emit(&self, payload: T) -> bool {
        let batch: Vec<Callback<T>> = {
            let mut listeners = self
                .inner
                .listeners
                .lock()
                .expect("bus listener lock poisoned");
            let batch = listeners.iter().map(|l| l.callback.clone()).collect();
            listeners.retain(|l| !l.once);
            batch
        };
        if batch.is_empty() {
            return false;
        }

        let event = self.clone();
        tokio::spawn(async move {
            for callback in batch {
                if let Err(err) = callback(payload.clone()).await {
                    tracing::warn!(
                        event = event.name(),
                        error = format!("{err:#}"),
                        "event listener failed"
                    );
                    event.emit_error(Arc::new(err), payload.clone());
                }
            }
        });
        true
    }

    /// Fan `err` out on this event's error channel.
    pub fn emit_error(&self, err: Arc<anyhow::Error>, payload: T) -> bool {
        let batch: Vec<ErrorCallback<T>> = self
            .inner
            .error_listeners
            .lock()
            .expect("bus listener lock poisoned")
            .clone();
        if batch.is_empty() {
            return false;
        }

        let name = self.inner.name.clone();
        tokio::spawn(async move {
            for callback in batch {
                if let Err(inner) = callback(err.clone(), payload.clone()).await {
                    tracing::warn!(
                        event = %name,
                        error = format!("{inner:#}"),
                        "error listener failed"
                    );
                }
            }
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn emit_reaches_all_listeners() {
        let event: Event<u32> = Event::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            event.bind(move |n| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(n as usize, Ordering::SeqCst);
                    Ok(())
                }
            });
        }
        assert!(event.emit(2));
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn emit_without_listeners_returns_false() {
        let event: Event<u32> = Event::new("test");
        assert!(!event.emit(1));
    }

    #[tokio::test]
    async fn once_listener_fires_a_single_time() {
        let event: Event<()> = Event::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = hits.clone();
            event.bind_once(move |()| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }
        event.emit(());
        event.emit(());
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(event.listener_count(), 0);
    }

    #[tokio::test]
    async fn unbind_removes_the_listener() {
        let event: Event<()> = Event::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        let id = {
            let hits = hits.clone();
            event.bind(move |()| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        assert!(event.unbind(id));
        assert!(!event.unbind(id));
        event.emit(());
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn listener_error_reaches_error_channel_and_spares_siblings() {
        let event: Event<u32> = Event::new("test");
        let hits = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        event.bind(|_| async { Err(anyhow::anyhow!("boom")) });
        {
            let hits = hits.clone();
            event.bind(move |_| {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }
        {
            let errors = errors.clone();
            event.bind_error(move |err, payload| {
                let errors = errors.clone();
                async move {
                    assert_eq!(err.to_string(), "boom");
                    assert_eq!(payload, 9);
                    errors.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        event.emit(9);
        settle().await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn payload_mutations_do_not_leak_between_listeners() {
        let event: Event<Vec<u32>> = Event::new("test");
        let seen = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..2 {
            let seen = seen.clone();
            event.bind(move |mut payload| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(payload.clone());
                    payload.push(99);
                    Ok(())
                }
            });
        }
        event.emit(vec![1]);
        settle().await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[vec![1], vec![1]]);
    }
}
