//! Service adapters: one call shape per dependency, backed by either the real
//! remote endpoint or a local deterministic substitute.
//!
//! A `real` route that fails for any reason is served by the substitute for
//! the same call. Callers never see a dependency failure, only the route that
//! was actually used.

pub mod mail;
pub mod scanner;

pub use mail::{HttpMailer, MailAdapter, MockMailer, SendOutcome, SendRequest, mail_adapter};
pub use scanner::{HttpScanner, MockScanner, ScanAdapter, ScanOutcome, ScanRequest, scan_adapter};

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::DependencyError;
use crate::routing::{Dependency, Route};

/// A remote backend that may fail.
#[async_trait]
pub trait RealBackend<Req, Out>: Send + Sync
where
    Req: Sync,
    Out: Send,
{
    async fn call(&self, request: &Req) -> Result<Out, DependencyError>;
}

/// A local substitute that always produces an outcome.
pub trait Substitute<Req, Out>: Send + Sync {
    fn substitute(&self, request: &Req) -> Out;
}

/// An outcome annotated with the route that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Routed<T> {
    pub outcome: T,
    pub used: Route,
}

/// Real-with-fallback composite for one dependency.
pub struct ServiceAdapter<Req, Out> {
    dependency: Dependency,
    real: Option<Arc<dyn RealBackend<Req, Out>>>,
    mock: Arc<dyn Substitute<Req, Out>>,
}

impl<Req, Out> ServiceAdapter<Req, Out>
where
    Req: Sync,
    Out: Send,
{
    pub fn new(
        dependency: Dependency,
        real: Option<Arc<dyn RealBackend<Req, Out>>>,
        mock: Arc<dyn Substitute<Req, Out>>,
    ) -> Self {
        Self {
            dependency,
            real,
            mock,
        }
    }

    /// Adapter with no real backend; every call is served by the substitute.
    pub fn mock_only(dependency: Dependency, mock: Arc<dyn Substitute<Req, Out>>) -> Self {
        Self::new(dependency, None, mock)
    }

    /// Serve `request` on `route`, falling back to the substitute when the
    /// real backend fails or is not configured.
    pub async fn call(&self, route: Route, request: &Req) -> Routed<Out> {
        match route {
            Route::Mock => self.substitute(request),
            Route::Real => self.real_with_fallback(request).await,
        }
    }

    fn substitute(&self, request: &Req) -> Routed<Out> {
        Routed {
            outcome: self.mock.substitute(request),
            used: Route::Mock,
        }
    }

    async fn real_with_fallback(&self, request: &Req) -> Routed<Out> {
        let Some(real) = &self.real else {
            let err = DependencyError::NotConfigured {
                dependency: self.dependency,
            };
            warn!(dependency = %self.dependency, error = %err, "Falling back to mock");
            return self.substitute(request);
        };

        match real.call(request).await {
            Ok(outcome) => {
                debug!(dependency = %self.dependency, "Real backend call succeeded");
                Routed {
                    outcome,
                    used: Route::Real,
                }
            }
            Err(err) => {
                warn!(dependency = %self.dependency, error = %err, "Real backend failed; falling back to mock");
                self.substitute(request)
            }
        }
    }
}
