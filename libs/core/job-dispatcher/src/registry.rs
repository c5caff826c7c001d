//! Worker registry
//!
//! Maps job names to handlers. The registry is filled during setup and
//! read by every loop iteration; registering while the dispatcher runs is
//! not supported.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

/// Trait for job handlers.
///
/// A handler receives the job's `args` rendered as a string (see
/// [`ParsedJob`](crate::ParsedJob)) and reports success or failure.
///
/// # Example
///
/// ```rust,ignore
/// use job_dispatcher::JobHandler;
///
/// struct SendEmail {
///     mailer: Arc<dyn Mailer>,
/// }
///
/// #[async_trait]
/// impl JobHandler for SendEmail {
///     async fn handle(&self, args: &str) -> eyre::Result<()> {
///         let email: Email = serde_json::from_str(args)?;
///         self.mailer.send(email).await
///     }
/// }
/// ```
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job.
    async fn handle(&self, args: &str) -> eyre::Result<()>;
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure taking the job arguments.
///
/// ```rust,ignore
/// registry.register("ping", handler_fn(|args| async move {
///     tracing::info!(%args, "pong");
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = eyre::Result<()>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(String) -> Fut + Send + Sync,
    Fut: Future<Output = eyre::Result<()>> + Send,
{
    async fn handle(&self, args: &str) -> eyre::Result<()> {
        (self.f)(args.to_string()).await
    }
}

/// A name/handler pair for batch registration.
#[derive(Clone)]
pub struct Registration {
    pub name: String,
    pub handler: Arc<dyn JobHandler>,
}

impl Registration {
    pub fn new(name: impl Into<String>, handler: impl JobHandler + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }
}

/// Thread-safe map from job name to handler.
#[derive(Default)]
pub struct WorkerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. A later registration under the same name wins.
    pub fn register(&self, name: impl Into<String>, handler: impl JobHandler + 'static) {
        self.register_arc(name, Arc::new(handler));
    }

    /// Register an already shared handler.
    pub fn register_arc(&self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.write().unwrap().insert(name.into(), handler);
    }

    /// Register several handlers in order.
    pub fn register_batch(&self, registrations: impl IntoIterator<Item = Registration>) {
        for registration in registrations {
            self.register_arc(registration.name, registration.handler);
        }
    }

    /// Find the handler for `name`.
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.read().unwrap().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().unwrap().contains_key(name)
    }

    /// Registered job names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
