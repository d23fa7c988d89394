//! Request/response access to the dashboard backend.
//!
//! The store only sees the [`Transport`] trait: four JSON verbs addressed by
//! [`Locator`], failing with a [`TransportError`] that callers classify via
//! [`TransportError::failure_kind`]. [`HttpTransport`] is the reqwest-backed
//! implementation; tests substitute their own.

mod error;
mod http;
mod locator;
pub mod retry;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

pub use error::{FailureKind, TransportError};
pub use http::{HttpSettings, HttpTransport};
pub use locator::{ApiRoute, Locator};

pub type TransportFut<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// JSON request/response capability.
pub trait Transport: Send + Sync {
    fn get<'a>(&'a self, locator: &'a Locator) -> TransportFut<'a, Value>;

    fn post<'a>(&'a self, locator: &'a Locator, body: Value) -> TransportFut<'a, Value>;

    fn patch<'a>(&'a self, locator: &'a Locator, body: Value) -> TransportFut<'a, Value>;

    fn delete<'a>(&'a self, locator: &'a Locator) -> TransportFut<'a, ()>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn get<'a>(&'a self, locator: &'a Locator) -> TransportFut<'a, Value> {
        (**self).get(locator)
    }

    fn post<'a>(&'a self, locator: &'a Locator, body: Value) -> TransportFut<'a, Value> {
        (**self).post(locator, body)
    }

    fn patch<'a>(&'a self, locator: &'a Locator, body: Value) -> TransportFut<'a, Value> {
        (**self).patch(locator, body)
    }

    fn delete<'a>(&'a self, locator: &'a Locator) -> TransportFut<'a, ()> {
        (**self).delete(locator)
    }
}
