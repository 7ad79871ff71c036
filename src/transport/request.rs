//! Handle for a correlated request.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::protocol::registry::AnyValue;
use crate::protocol::{CorrelationId, TypeCode};

use super::client::Shared;
use super::pending::Callback;

/// A sent request, used to subscribe to its responses.
///
/// The handle is an immutable snapshot of what was sent. Dropping it does
/// not remove the pending entry; use [`Client::forget`](super::Client::forget)
/// for that.
pub struct Request {
    client: Arc<Shared>,
    correlation_id: CorrelationId,
    type_code: TypeCode,
    payload: String,
}

impl Request {
    pub(crate) fn new(
        client: Arc<Shared>,
        correlation_id: CorrelationId,
        type_code: TypeCode,
        payload: String,
    ) -> Self {
        Self {
            client,
            correlation_id,
            type_code,
            payload,
        }
    }

    /// Correlation id the request was sent under
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Type code of the request value
    #[must_use]
    pub const fn type_code(&self) -> TypeCode {
        self.type_code
    }

    /// Encoded request value
    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Call `callback` with every response of type `T` to this request.
    ///
    /// Each invocation runs on its own thread; there is no ordering between
    /// callbacks and nothing waits for them. If `T` is not registered, or is
    /// only an [alias](crate::TypeRegistry::alias) that responses never
    /// decode to, the subscription is silently skipped.
    pub fn on_response<T, F>(&self, callback: F) -> &Self
    where
        T: Any + Send + Sync,
        F: Fn(Arc<T>) + Send + Sync + 'static,
    {
        let Some(code) = self.client.registry().decoded_code_for::<T>() else {
            debug!(
                correlation_id = self.correlation_id,
                type_name = type_name::<T>(),
                "responses never decode to this type; subscription skipped"
            );
            return self;
        };

        let callback: Callback = Arc::new(move |value: AnyValue| {
            if let Ok(value) = value.downcast::<T>() {
                callback(value);
            }
        });

        if !self
            .client
            .lock_pending()
            .subscribe(self.correlation_id, code, callback)
        {
            debug!(
                correlation_id = self.correlation_id,
                "request was forgotten; subscription skipped"
            );
        }
        self
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("correlation_id", &self.correlation_id)
            .field("type_code", &self.type_code)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}
