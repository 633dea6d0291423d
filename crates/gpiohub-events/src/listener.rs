//! Callback targets invoked by the bus.
//!
//! A target is either immediate (a plain function) or deferred (a function
//! returning a future). The bus awaits both the same way, so a listener can
//! pick whichever fits without the bus caring.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use gpiohub_core::Event;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

type ImmediateFn<A> = dyn Fn(A) -> anyhow::Result<()> + Send + Sync;
type DeferredFn<A> = dyn Fn(A) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Callback taking an argument of type `A`.
pub enum Target<A> {
    /// Runs to completion when called.
    Immediate(Arc<ImmediateFn<A>>),
    /// Returns a future the bus awaits.
    Deferred(Arc<DeferredFn<A>>),
}

/// Listener for events of one (category, entity id).
pub type EventTarget = Target<Arc<Event>>;

/// Listener ticked once per wall-clock second.
pub type TickTarget = Target<Tick>;

/// Job run once at a scheduled instant; receives that instant.
pub type JobTarget = Target<DateTime<Utc>>;

/// Shutdown or online hook.
pub type HookTarget = Target<()>;

/// Argument passed to every-second listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Regular tick at this wall-clock instant.
    At(DateTime<Utc>),
    /// The bus is shutting down; no further ticks follow.
    Shutdown,
}

impl<A: Send + 'static> Target<A> {
    /// Wrap a plain function.
    pub fn immediate<F>(f: F) -> Self
    where
        F: Fn(A) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::Immediate(Arc::new(f))
    }

    /// Wrap a function returning a future.
    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self::Deferred(Arc::new(move |arg| f(arg).boxed()))
    }

    /// Invoke the target.
    ///
    /// A panic inside the target is caught and reported as an error, so one
    /// broken listener cannot take down the task calling it.
    pub async fn invoke(&self, arg: A) -> anyhow::Result<()> {
        let outcome = match self {
            Self::Immediate(f) => std::panic::catch_unwind(AssertUnwindSafe(|| f(arg))),
            Self::Deferred(f) => {
                match std::panic::catch_unwind(AssertUnwindSafe(|| f(arg))) {
                    Ok(future) => AssertUnwindSafe(future).catch_unwind().await,
                    Err(panic) => Err(panic),
                }
            }
        };

        outcome.unwrap_or_else(|panic| Err(anyhow::anyhow!("panicked: {}", panic_message(&*panic))))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

impl<A> Clone for Target<A> {
    fn clone(&self) -> Self {
        match self {
            Self::Immediate(f) => Self::Immediate(Arc::clone(f)),
            Self::Deferred(f) => Self::Deferred(Arc::clone(f)),
        }
    }
}

impl<A> fmt::Debug for Target<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate(_) => f.write_str("Target::Immediate"),
            Self::Deferred(_) => f.write_str("Target::Deferred"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_immediate_and_deferred_invoke() {
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let immediate = Target::immediate(move |n: usize| {
            counter.fetch_add(n, Ordering::SeqCst);
            Ok(())
        });

        let counter = Arc::clone(&calls);
        let deferred = Target::deferred(move |n: usize| {
            let counter = Arc::clone(&counter);
            async move {
                tokio::task::yield_now().await;
                counter.fetch_add(n * 10, Ordering::SeqCst);
                Ok::<_, anyhow::Error>(())
            }
        });

        immediate.invoke(1).await.unwrap();
        deferred.clone().invoke(2).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 21);
    }

    #[tokio::test]
    async fn test_errors_are_returned() {
        let target: HookTarget = Target::immediate(|()| anyhow::bail!("relay stuck"));
        let err = target.invoke(()).await.unwrap_err();
        assert_eq!(err.to_string(), "relay stuck");
    }

    #[tokio::test]
    async fn test_panics_become_errors() {
        let immediate: HookTarget = Target::immediate(|()| panic!("boom"));
        let err = immediate.invoke(()).await.unwrap_err();
        assert!(err.to_string().contains("boom"));

        async fn explode() -> anyhow::Result<()> {
            panic!("late boom")
        }
        let deferred: HookTarget = Target::deferred(|()| explode());
        let err = deferred.invoke(()).await.unwrap_err();
        assert!(err.to_string().contains("late boom"));
    }
}
