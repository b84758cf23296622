//! Handler trait and type erasure.
//!
//! The router holds handlers of *different* types in one map, so each one is
//! hidden behind a trait object (`dyn ErasedHandler`):
//!
//! ```text
//! async fn profile(req: Request) -> impl IntoResponse { … }  ← user writes this
//!        ↓ Route::new(profile)
//! profile.into_boxed_handler()                              ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(profile))                              ← stored as BoxedHandler
//!        ↓
//! handler.call(req) at request time                         ← one vtable dispatch
//!        ↓
//! Box::pin(async { profile(req).await.into_response() })    ← BoxFuture
//! ```
//!
//! Per request that is one `Arc` clone of the [`Route`](crate::Route) and
//! one virtual call. Guards and the enrichment stage declared on the route
//! run before the call; the handler only ever sees a request that passed
//! them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A heap-allocated, type-erased future that resolves to a [`Response`].
///
/// Boxed because every handler's future has its own anonymous type. Pinned
/// because an `async` block may hold references into itself and must not
/// move once polled. `Send + 'static` so the connection task can be moved
/// between runtime workers while a handler is suspended, e.g. waiting on an
/// enrichment source.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)`: it shows up in the return
/// type of [`Handler::into_boxed_handler`], which is public.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
///
/// One allocation at registration time; each request clones the `Arc`
/// rather than the handler.
#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid route handler.
///
/// Satisfied automatically by any `async fn` (or closure) of the shape
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// Sealed: only the blanket impl below can satisfy it.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete handler `F` to the trait-object world.
///
/// `call` invokes `F` eagerly, then boxes the resulting future together with
/// the `IntoResponse` conversion, so every handler yields the same
/// [`BoxFuture`] type.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
