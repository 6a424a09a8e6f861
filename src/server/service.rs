//! Services and their callable methods.
//!
//! A [`Service`] is a receiver value plus the methods registered on it. Each
//! method is type-erased behind [`Method`] so the dispatcher can:
//! 1. Allocate and decode the argument from a request body (`decode_argv`)
//! 2. Run the method with a fresh default reply and encode the reply (`invoke`)
//!
//! # Example
//!
//! ```ignore
//! use callwire::Service;
//!
//! struct Foo;
//!
//! let service = Service::builder(Foo)
//!     .method("Sum", |_: &Foo, args: (i64, i64), reply: &mut i64| {
//!         *reply = args.0 + args.1;
//!         Ok(())
//!     })
//!     .method_async("Sleep", |_foo, millis: u64| async move {
//!         tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
//!         Ok(millis)
//!     })
//!     .build()?;
//! ```

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::codec::CodecType;
use crate::error::{Result, RpcError};

/// Error returned by a method. Its `Display` text is sent to the caller.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for method bodies.
pub type HandlerResult<T = ()> = std::result::Result<T, HandlerError>;

/// Boxed future for method results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A decoded argument waiting to be handed to its method.
pub(crate) type Argv = Box<dyn Any + Send>;

/// Type-erased method.
pub(crate) trait Method: Send + Sync + 'static {
    /// Decode a request body into this method's argument type.
    fn decode_argv(&self, codec: CodecType, body: &[u8]) -> Result<Argv>;

    /// Run the method and encode its reply. Errors are already in wire form.
    fn invoke(&self, argv: Argv, codec: CodecType)
        -> BoxFuture<'static, std::result::Result<Bytes, String>>;
}

fn downcast_argv<A: 'static>(argv: Argv) -> std::result::Result<A, String> {
    argv.downcast::<A>().map(|a| *a).map_err(|_| {
        RpcError::Internal(format!("argument is not a {}", type_name::<A>())).to_string()
    })
}

fn encode_reply<R: Serialize>(codec: CodecType, reply: &R) -> std::result::Result<Bytes, String> {
    codec
        .encode(reply)
        .map(Bytes::from)
        .map_err(|e| e.to_string())
}

/// Method that fills a default reply in place.
struct SyncMethod<T, F, A, R> {
    receiver: Arc<T>,
    handler: Arc<F>,
    _phantom: PhantomData<fn(A) -> R>,
}

impl<T, F, A, R> Method for SyncMethod<T, F, A, R>
where
    T: Send + Sync + 'static,
    F: Fn(&T, A, &mut R) -> HandlerResult + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Default + Send + 'static,
{
    fn decode_argv(&self, codec: CodecType, body: &[u8]) -> Result<Argv> {
        let args: A = codec.decode(body)?;
        Ok(Box::new(args))
    }

    fn invoke(
        &self,
        argv: Argv,
        codec: CodecType,
    ) -> BoxFuture<'static, std::result::Result<Bytes, String>> {
        let receiver = Arc::clone(&self.receiver);
        let handler = Arc::clone(&self.handler);

        Box::pin(async move {
            let args = downcast_argv::<A>(argv)?;
            let mut reply = R::default();
            handler(receiver.as_ref(), args, &mut reply).map_err(|e| e.to_string())?;
            encode_reply(codec, &reply)
        })
    }
}

/// Method returning its reply from a future.
struct AsyncMethod<T, F, A, R, Fut> {
    receiver: Arc<T>,
    handler: Arc<F>,
    _phantom: PhantomData<fn(A) -> (R, Fut)>,
}

impl<T, F, A, R, Fut> Method for AsyncMethod<T, F, A, R, Fut>
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    Fut: Future<Output = HandlerResult<R>> + Send + 'static,
{
    fn decode_argv(&self, codec: CodecType, body: &[u8]) -> Result<Argv> {
        let args: A = codec.decode(body)?;
        Ok(Box::new(args))
    }

    fn invoke(
        &self,
        argv: Argv,
        codec: CodecType,
    ) -> BoxFuture<'static, std::result::Result<Bytes, String>> {
        let receiver = Arc::clone(&self.receiver);
        let handler = Arc::clone(&self.handler);

        Box::pin(async move {
            let args = downcast_argv::<A>(argv)?;
            let reply = handler(receiver, args).await.map_err(|e| e.to_string())?;
            encode_reply(codec, &reply)
        })
    }
}

/// One callable method of a service.
pub struct MethodType {
    name: String,
    arg_type: &'static str,
    reply_type: &'static str,
    num_calls: AtomicU64,
    method: Box<dyn Method>,
}

impl MethodType {
    /// Method name (the part after the `.`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rust type name of the argument.
    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }

    /// Rust type name of the reply.
    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }

    /// How many times this method has been invoked.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn decode_argv(&self, codec: CodecType, body: &[u8]) -> Result<Argv> {
        self.method.decode_argv(codec, body)
    }
}

impl fmt::Debug for MethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodType")
            .field("name", &self.name)
            .field("arg_type", &self.arg_type)
            .field("reply_type", &self.reply_type)
            .field("num_calls", &self.num_calls())
            .finish()
    }
}

/// A named receiver and its methods.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodType>>,
}

impl Service {
    /// Start building a service around `receiver`.
    pub fn builder<T: Send + Sync + 'static>(receiver: T) -> ServiceBuilder<T> {
        ServiceBuilder::new(receiver)
    }

    /// Service name (the part before the `.`).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<Arc<MethodType>> {
        self.methods.get(name).cloned()
    }

    /// Names of all registered methods, sorted.
    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Count the invocation and run `method` with a decoded argument.
    ///
    /// A method's own error comes back verbatim as its `Display` text.
    pub(crate) fn call(
        method: &MethodType,
        argv: Argv,
        codec: CodecType,
    ) -> BoxFuture<'static, std::result::Result<Bytes, String>> {
        method.num_calls.fetch_add(1, Ordering::Relaxed);
        method.method.invoke(argv, codec)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.method_names())
            .finish()
    }
}

/// Builder for a [`Service`].
pub struct ServiceBuilder<T> {
    receiver: Arc<T>,
    name: String,
    methods: HashMap<String, Arc<MethodType>>,
}

impl<T: Send + Sync + 'static> ServiceBuilder<T> {
    fn new(receiver: T) -> Self {
        Self {
            receiver: Arc::new(receiver),
            name: receiver_name::<T>(),
            methods: HashMap::new(),
        }
    }

    /// Override the name derived from the receiver's type.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Register a method that writes its reply into a default-initialized slot.
    pub fn method<F, A, R>(self, name: &str, handler: F) -> Self
    where
        F: Fn(&T, A, &mut R) -> HandlerResult + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + Send + 'static,
    {
        let method = SyncMethod {
            receiver: Arc::clone(&self.receiver),
            handler: Arc::new(handler),
            _phantom: PhantomData,
        };
        self.insert::<A, R>(name, Box::new(method))
    }

    /// Register a method that returns its reply from a future.
    pub fn method_async<F, A, R, Fut>(self, name: &str, handler: F) -> Self
    where
        F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        Fut: Future<Output = HandlerResult<R>> + Send + 'static,
    {
        let method = AsyncMethod {
            receiver: Arc::clone(&self.receiver),
            handler: Arc::new(handler),
            _phantom: PhantomData,
        };
        self.insert::<A, R>(name, Box::new(method))
    }

    fn insert<A, R>(mut self, name: &str, method: Box<dyn Method>) -> Self {
        if !is_public(name) {
            tracing::debug!(service = %self.name, method = name, "skipping non-public method");
            return self;
        }

        let method = MethodType {
            name: name.to_string(),
            arg_type: type_name::<A>(),
            reply_type: type_name::<R>(),
            num_calls: AtomicU64::new(0),
            method,
        };
        self.methods.insert(name.to_string(), Arc::new(method));
        self
    }

    /// Finish the service.
    ///
    /// Fails with [`RpcError::InvalidServiceName`] if the name is not public.
    pub fn build(self) -> Result<Service> {
        if !is_public(&self.name) {
            return Err(RpcError::InvalidServiceName(self.name));
        }

        for method in self.methods.values() {
            tracing::debug!(
                service = %self.name,
                method = %method.name,
                arg = method.arg_type,
                reply = method.reply_type,
                "registered method"
            );
        }

        Ok(Service {
            name: self.name,
            methods: self.methods,
        })
    }
}

/// `my_crate::foo::Bar<Baz>` becomes `Bar`.
fn receiver_name<T>() -> String {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Exported names start with an uppercase ASCII letter.
fn is_public(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize)]
    struct Args {
        num1: i64,
        num2: i64,
    }

    struct Foo;

    struct Wrapper<T>(T);

    fn foo_service() -> Service {
        Service::builder(Foo)
            .method("Sum", |_: &Foo, args: Args, reply: &mut i64| {
                *reply = args.num1 + args.num2;
                Ok(())
            })
            .method("sum", |_: &Foo, args: Args, reply: &mut i64| {
                *reply = args.num1 - args.num2;
                Ok(())
            })
            .method("Fail", |_: &Foo, _: (), _: &mut ()| Err("bad input".into()))
            .build()
            .unwrap()
    }

    #[test]
    fn test_receiver_name() {
        assert_eq!(receiver_name::<Foo>(), "Foo");
        assert_eq!(receiver_name::<Wrapper<Foo>>(), "Wrapper");
    }

    #[test]
    fn test_non_public_methods_skipped() {
        let service = foo_service();
        assert_eq!(service.name(), "Foo");
        assert_eq!(service.method_names(), vec!["Fail", "Sum"]);
        assert!(service.method("sum").is_none());
    }

    #[test]
    fn test_non_public_service_rejected() {
        let result = Service::builder(Foo).name("foo").build();
        assert!(matches!(result, Err(RpcError::InvalidServiceName(n)) if n == "foo"));
    }

    #[test]
    fn test_method_type_names() {
        let service = foo_service();
        let sum = service.method("Sum").unwrap();
        assert!(sum.arg_type().ends_with("Args"));
        assert_eq!(sum.reply_type(), "i64");
    }

    #[tokio::test]
    async fn test_call_counts_and_encodes_reply() {
        let codec = CodecType::MsgPack;
        let service = foo_service();
        let sum = service.method("Sum").unwrap();

        let body = codec.encode(&Args { num1: 1, num2: 3 }).unwrap();
        let argv = sum.decode_argv(codec, &body).unwrap();
        let reply = Service::call(&sum, argv, codec).await.unwrap();

        let reply: i64 = codec.decode(&reply).unwrap();
        assert_eq!(reply, 4);
        assert_eq!(sum.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_business_error_verbatim() {
        let codec = CodecType::Json;
        let service = foo_service();
        let fail = service.method("Fail").unwrap();

        let argv = fail.decode_argv(codec, b"null").unwrap();
        let err = Service::call(&fail, argv, codec).await.unwrap_err();
        assert_eq!(err, "bad input");
        assert_eq!(fail.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_async_method() {
        let codec = CodecType::Json;
        let service = Service::builder(Foo)
            .method_async("Double", |_foo: Arc<Foo>, n: u32| async move { Ok(n * 2) })
            .build()
            .unwrap();

        let double = service.method("Double").unwrap();
        let argv = double.decode_argv(codec, b"21").unwrap();
        let reply = Service::call(&double, argv, codec).await.unwrap();
        assert_eq!(&reply[..], b"42");
    }

    #[test]
    fn test_decode_argv_rejects_wrong_shape() {
        let service = foo_service();
        let sum = service.method("Sum").unwrap();
        assert!(sum.decode_argv(CodecType::Json, b"\"nope\"").is_err());
    }
}
