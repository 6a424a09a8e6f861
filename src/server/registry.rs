//! Service registry for dispatching `"Service.Method"` names.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::service::{MethodType, Service};
use crate::error::{Result, RpcError};
use crate::protocol::split_service_method;

/// Registry mapping service names to services.
///
/// Written at configuration time, read by every request.
#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, Arc<Service>>>,
}

impl ServiceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service. An existing service with the same name is kept.
    pub fn register(&self, service: Service) -> Result<()> {
        let mut services = self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if services.contains_key(service.name()) {
            return Err(RpcError::ServiceAlreadyDefined(service.name().to_string()));
        }

        tracing::info!(service = service.name(), methods = ?service.method_names(), "service registered");
        services.insert(service.name().to_string(), Arc::new(service));
        Ok(())
    }

    /// Resolve `"Service.Method"` (split on the last `.`).
    pub fn find_service(&self, service_method: &str) -> Result<(Arc<Service>, Arc<MethodType>)> {
        let (service_name, method_name) = split_service_method(service_method)
            .ok_or_else(|| RpcError::MalformedServiceMethod(service_method.to_string()))?;

        let service = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service_name)
            .cloned()
            .ok_or_else(|| RpcError::ServiceNotFound(service_name.to_string()))?;

        let method = service
            .method(method_name)
            .ok_or_else(|| RpcError::MethodNotFound(method_name.to_string()))?;

        Ok((service, method))
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Check if no service is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Foo;
    struct Bar;

    fn foo() -> Service {
        Service::builder(Foo)
            .method("Sum", |_: &Foo, args: (i64, i64), reply: &mut i64| {
                *reply = args.0 + args.1;
                Ok(())
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_find_service() {
        let registry = ServiceRegistry::new();
        registry.register(foo()).unwrap();

        let (service, method) = registry.find_service("Foo.Sum").unwrap();
        assert_eq!(service.name(), "Foo");
        assert_eq!(method.name(), "Sum");
    }

    #[test]
    fn test_find_service_error_kinds() {
        let registry = ServiceRegistry::new();
        registry.register(foo()).unwrap();

        assert!(matches!(
            registry.find_service("FooSum"),
            Err(RpcError::MalformedServiceMethod(_))
        ));
        assert!(matches!(
            registry.find_service("Baz.Sum"),
            Err(RpcError::ServiceNotFound(name)) if name == "Baz"
        ));
        assert!(matches!(
            registry.find_service("Foo.Product"),
            Err(RpcError::MethodNotFound(name)) if name == "Product"
        ));
    }

    #[test]
    fn test_duplicate_service_rejected() {
        let registry = ServiceRegistry::new();
        registry.register(foo()).unwrap();

        let other = Service::builder(Bar).name("Foo").build().unwrap();
        assert!(matches!(
            registry.register(other),
            Err(RpcError::ServiceAlreadyDefined(name)) if name == "Foo"
        ));

        // The original registration survives.
        assert_eq!(registry.len(), 1);
        assert!(registry.find_service("Foo.Sum").is_ok());
    }
}
