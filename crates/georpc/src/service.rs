use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::RpcError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

type HandlerFn = Arc<dyn Fn(&[u8]) -> BoxFuture<'static, Result<Vec<u8>, RpcError>> + Send + Sync>;

struct MethodDescriptor {
    handler: HandlerFn,
    calls: AtomicU64,
}

/// A handler object registered under a name, catalogued by eligible method
///. Argument and reply marshaling happens at the method
/// boundary, via `serde_json`, independent of whichever wire codec the
/// connection negotiated — see `codec::CodecWriter`'s doc comment.
pub struct Service {
    name: String,
    methods: HashMap<String, MethodDescriptor>,
}

impl Service {
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Number of times `method` has been invoked, or `None` if unregistered.
    pub fn num_calls(&self, method: &str) -> Option<u64> {
        self.methods
            .get(method)
            .map(|m| m.calls.load(Ordering::Relaxed))
    }

    pub(crate) async fn call(&self, method: &str, args: &[u8]) -> Result<Vec<u8>, RpcError> {
        let descriptor = self
            .methods
            .get(method)
            .ok_or_else(|| RpcError::MethodNotFound(format!("{}.{}", self.name, method)))?;
        descriptor.calls.fetch_add(1, Ordering::Relaxed);
        (descriptor.handler)(args).await
    }
}

/// Builds a [`Service`] from typed async method handlers.
///
/// There is no reflection-based method discovery here: each `method()` call
/// supplies a closure whose `Args`/`Reply` types the compiler checks right
/// there, enforcing the one-arg-in/one-reply-out/errors-propagate shape at
/// compile time rather than at registration time.
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, MethodDescriptor>,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    pub fn method<Args, Reply, F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        Args: DeserializeOwned + Send + 'static,
        Reply: Serialize + Send + 'static,
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, RpcError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let wrapped: HandlerFn = Arc::new(move |bytes: &[u8]| {
            let handler = handler.clone();
            let bytes = bytes.to_vec();
            Box::pin(async move {
                let args: Args = serde_json::from_slice(&bytes)
                    .map_err(|e| RpcError::DecodeBody(e.to_string()))?;
                let reply = handler(args).await?;
                serde_json::to_vec(&reply).map_err(|e| RpcError::Encode(e.to_string()))
            })
        });
        self.methods.insert(
            name.to_string(),
            MethodDescriptor {
                handler: wrapped,
                calls: AtomicU64::new(0),
            },
        );
        self
    }

    /// Validates the service name and produces the [`Service`].
    ///
    /// Requires the name start with an uppercase ASCII letter — an exported
    /// name, by convention, the way a type intended for external use would
    /// be named.
    pub fn build(self) -> Result<Service, RpcError> {
        if !self.name.starts_with(|c: char| c.is_ascii_uppercase()) {
            return Err(RpcError::InvalidServiceName(self.name));
        }
        Ok(Service {
            name: self.name,
            methods: self.methods,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Args {
        a: i64,
        b: i64,
    }

    #[derive(Serialize)]
    struct Reply {
        c: i64,
    }

    #[tokio::test]
    async fn calls_registered_method_and_counts_invocations() {
        let service = Service::builder("Arith")
            .method("Sum", |args: Args| async move { Ok(Reply { c: args.a + args.b }) })
            .build()
            .unwrap();

        let args = serde_json::to_vec(&serde_json::json!({"a": 1, "b": 2})).unwrap();
        let reply_bytes = service.call("Sum", &args).await.unwrap();
        let reply: serde_json::Value = serde_json::from_slice(&reply_bytes).unwrap();
        assert_eq!(reply["c"], 3);
        assert_eq!(service.num_calls("Sum"), Some(1));
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let service = Service::builder("Arith").build().unwrap();
        let err = service.call("Missing", &[]).await.unwrap_err();
        assert!(matches!(err, RpcError::MethodNotFound(_)));
    }

    #[test]
    fn lowercase_service_name_is_rejected() {
        let err = Service::builder("arith").build().unwrap_err();
        assert!(matches!(err, RpcError::InvalidServiceName(_)));
    }
}
