//! # baler-hooks
//!
//! Typed plugin hook pipeline for the baler compilation core.
//!
//! A hook is a named extension point that plugins tap into. Four invocation
//! styles cover everything the core needs:
//!
//! - [`SyncHook`] - every tap runs in registration order, return values are
//!   discarded.
//! - [`SyncBailHook`] - taps run in order; the first tap returning `Some`
//!   short-circuits the remaining taps and its value is returned.
//! - [`SyncWaterfallHook`] - each tap receives the previous tap's return
//!   value (or the seed) and produces the next one.
//! - [`AsyncSeriesHook`] - taps run sequentially and may suspend; the first
//!   error short-circuits.
//!
//! Handler contracts are typed per hook rather than funneled through a
//! single untyped dispatcher, so a plugin that taps the wrong phase fails to
//! compile instead of failing at runtime.
//!
//! Most hooks carry a primary context argument `A` (for baler this is the
//! compilation) and an optional secondary argument `B` for phases that hand
//! a narrower object to plugins (a chunk and its hasher, an emitted file
//! name). Hooks with no secondary argument use the `()` default and the
//! plain `call` method.

use futures::future::BoxFuture;
use std::fmt;

/// A registered handler with the name of the plugin that installed it.
struct Tap<F: ?Sized> {
    name: &'static str,
    callback: Box<F>,
}

type SyncFn<A, B> = dyn Fn(&mut A, &mut B) + Send + Sync;
type BailFn<A, R, B> = dyn Fn(&mut A, &mut B) -> Option<R> + Send + Sync;
type WaterfallFn<T, A> = dyn Fn(T, &A) -> T + Send + Sync;
type AsyncFn<A, E> = dyn for<'a> Fn(&'a mut A) -> BoxFuture<'a, Result<(), E>> + Send + Sync;

/// All taps run in registration order; return values are discarded.
pub struct SyncHook<A, B = ()> {
    taps: Vec<Tap<SyncFn<A, B>>>,
}

impl<A, B> SyncHook<A, B> {
    pub fn new() -> Self {
        Self { taps: Vec::new() }
    }

    /// Register a handler under a plugin name.
    pub fn tap(&mut self, name: &'static str, f: impl Fn(&mut A, &mut B) + Send + Sync + 'static) {
        self.taps.push(Tap {
            name,
            callback: Box::new(f),
        });
    }

    /// Invoke every tap with both arguments.
    pub fn call_with(&self, a: &mut A, b: &mut B) {
        for tap in &self.taps {
            (tap.callback)(a, b);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }
}

impl<A> SyncHook<A, ()> {
    /// Invoke every tap. Shorthand for hooks without a secondary argument.
    pub fn call(&self, a: &mut A) {
        self.call_with(a, &mut ());
    }
}

/// Taps run in order; the first `Some` return value short-circuits.
///
/// An empty hook returns `None`, which callers treat as "no plugin had an
/// opinion".
pub struct SyncBailHook<A, R, B = ()> {
    taps: Vec<Tap<BailFn<A, R, B>>>,
}

impl<A, R, B> SyncBailHook<A, R, B> {
    pub fn new() -> Self {
        Self { taps: Vec::new() }
    }

    pub fn tap(
        &mut self,
        name: &'static str,
        f: impl Fn(&mut A, &mut B) -> Option<R> + Send + Sync + 'static,
    ) {
        self.taps.push(Tap {
            name,
            callback: Box::new(f),
        });
    }

    pub fn call_with(&self, a: &mut A, b: &mut B) -> Option<R> {
        for tap in &self.taps {
            if let Some(value) = (tap.callback)(a, b) {
                return Some(value);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }
}

impl<A, R> SyncBailHook<A, R, ()> {
    pub fn call(&self, a: &mut A) -> Option<R> {
        self.call_with(a, &mut ())
    }
}

/// Each tap receives the previous return value (or the seed) and a shared
/// context, and produces the next value. The final value is returned.
pub struct SyncWaterfallHook<T, A = ()> {
    taps: Vec<Tap<WaterfallFn<T, A>>>,
}

impl<T, A> SyncWaterfallHook<T, A> {
    pub fn new() -> Self {
        Self { taps: Vec::new() }
    }

    pub fn tap(&mut self, name: &'static str, f: impl Fn(T, &A) -> T + Send + Sync + 'static) {
        self.taps.push(Tap {
            name,
            callback: Box::new(f),
        });
    }

    pub fn call(&self, seed: T, a: &A) -> T {
        let mut value = seed;
        for tap in &self.taps {
            value = (tap.callback)(value, a);
        }
        value
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }
}

/// Taps run sequentially; each may suspend. The first error short-circuits
/// the series. An empty hook completes immediately with `Ok(())`.
///
/// Taps return a boxed future borrowing the context:
///
/// ```
/// use baler_hooks::AsyncSeriesHook;
///
/// let mut hook: AsyncSeriesHook<Vec<u32>, String> = AsyncSeriesHook::new();
/// hook.tap("collect", |v| {
///     Box::pin(async move {
///         v.push(1);
///         Ok(())
///     })
/// });
/// ```
pub struct AsyncSeriesHook<A, E> {
    taps: Vec<Tap<AsyncFn<A, E>>>,
}

impl<A, E> AsyncSeriesHook<A, E> {
    pub fn new() -> Self {
        Self { taps: Vec::new() }
    }

    pub fn tap(
        &mut self,
        name: &'static str,
        f: impl for<'a> Fn(&'a mut A) -> BoxFuture<'a, Result<(), E>> + Send + Sync + 'static,
    ) {
        self.taps.push(Tap {
            name,
            callback: Box::new(f),
        });
    }

    pub async fn call(&self, a: &mut A) -> Result<(), E> {
        for tap in &self.taps {
            (tap.callback)(a).await?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.taps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.taps.len()
    }
}

macro_rules! impl_hook_common {
    ($hook:ident < $($param:ident),* >) => {
        impl<$($param),*> Default for $hook<$($param),*> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<$($param),*> fmt::Debug for $hook<$($param),*> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_list()
                    .entries(self.taps.iter().map(|t| t.name))
                    .finish()
            }
        }
    };
}

impl_hook_common!(SyncHook<A, B>);
impl_hook_common!(SyncBailHook<A, R, B>);
impl_hook_common!(SyncWaterfallHook<T, A>);
impl_hook_common!(AsyncSeriesHook<A, E>);
