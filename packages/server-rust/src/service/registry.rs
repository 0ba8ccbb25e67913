use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nexus_core::{Content, HandlerError, OperationInfo, SerializerChain};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::operation::{
    GetOperationResultOptions, HandlerContext, OperationError, OperationResult,
    StartOperationOptions, StartOperationResult,
};
use crate::traits::Handler;

/// Name under which an operation of a service is addressed on the wire.
#[must_use]
pub fn routing_key(service: &str, operation: &str) -> String {
    format!("{service}/{operation}")
}

// ---------------------------------------------------------------------------
// RegistryError
// ---------------------------------------------------------------------------

/// Errors raised while assembling services.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("service name must not be empty")]
    EmptyServiceName,

    #[error("service name must not contain '/': {0}")]
    InvalidServiceName(String),

    #[error("operation name must not be empty (service {service})")]
    EmptyOperationName { service: String },

    #[error("duplicate operation {operation} in service {service}")]
    DuplicateOperation { service: String, operation: String },

    #[error("duplicate service: {0}")]
    DuplicateService(String),

    #[error("service {0} has no operations")]
    EmptyService(String),
}

// ---------------------------------------------------------------------------
// OperationHandler trait
// ---------------------------------------------------------------------------

/// A single named operation with typed input and output.
///
/// The registry decodes inbound content into `Input` and encodes `Output`
/// through its serializer chain. Only `start` is required; the other calls
/// default to `501 Not Implemented`, which suits synchronous operations.
#[async_trait]
pub trait OperationHandler: Send + Sync + 'static {
    type Input: DeserializeOwned + Send + 'static;
    type Output: Serialize + Send + Sync + 'static;

    /// Operation name within its service.
    fn name(&self) -> &str;

    async fn start(
        &self,
        ctx: &HandlerContext,
        input: Self::Input,
        options: &StartOperationOptions,
    ) -> Result<StartOperationResult<Self::Output>, OperationError>;

    async fn get_result(
        &self,
        _ctx: &HandlerContext,
        _operation_id: &str,
        _options: &GetOperationResultOptions,
    ) -> Result<OperationResult<Self::Output>, OperationError> {
        Err(unsupported(self.name(), "get result"))
    }

    async fn get_info(
        &self,
        _ctx: &HandlerContext,
        _operation_id: &str,
    ) -> Result<OperationInfo, OperationError> {
        Err(unsupported(self.name(), "get info"))
    }

    async fn cancel(&self, _ctx: &HandlerContext, _operation_id: &str) -> Result<(), OperationError> {
        Err(unsupported(self.name(), "cancel"))
    }
}

fn unsupported(operation: &str, call: &str) -> OperationError {
    HandlerError::not_implemented(format!("operation {operation} does not support {call}")).into()
}

// ---------------------------------------------------------------------------
// SyncOperation
// ---------------------------------------------------------------------------

/// An operation that always completes within the start call.
///
/// Wraps an async closure receiving an owned context, the decoded input, and
/// the start options.
pub struct SyncOperation<I, O, F> {
    name: String,
    handler: F,
    _types: PhantomData<fn(I) -> O>,
}

impl<I, O, F, Fut> SyncOperation<I, O, F>
where
    F: Fn(HandlerContext, I, StartOperationOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, OperationError>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
            _types: PhantomData,
        }
    }
}

#[async_trait]
impl<I, O, F, Fut> OperationHandler for SyncOperation<I, O, F>
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + Sync + 'static,
    F: Fn(HandlerContext, I, StartOperationOptions) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<O, OperationError>> + Send + 'static,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn start(
        &self,
        ctx: &HandlerContext,
        input: I,
        options: &StartOperationOptions,
    ) -> Result<StartOperationResult<O>, OperationError> {
        let output = (self.handler)(ctx.clone(), input, options.clone()).await?;
        Ok(StartOperationResult::Sync(output))
    }
}

// ---------------------------------------------------------------------------
// Type erasure
// ---------------------------------------------------------------------------

/// Content-level view of an [`OperationHandler`], so a service can hold
/// operations with different input and output types.
#[async_trait]
trait RegisteredOperation: Send + Sync {
    async fn start_erased(
        &self,
        ctx: &HandlerContext,
        input: Content,
        options: &StartOperationOptions,
        serializer: &SerializerChain,
    ) -> Result<StartOperationResult, OperationError>;

    async fn get_result_erased(
        &self,
        ctx: &HandlerContext,
        operation_id: &str,
        options: &GetOperationResultOptions,
        serializer: &SerializerChain,
    ) -> Result<OperationResult, OperationError>;

    async fn get_info_erased(
        &self,
        ctx: &HandlerContext,
        operation_id: &str,
    ) -> Result<OperationInfo, OperationError>;

    async fn cancel_erased(&self, ctx: &HandlerContext, operation_id: &str) -> Result<(), OperationError>;
}

#[async_trait]
impl<H: OperationHandler> RegisteredOperation for H {
    async fn start_erased(
        &self,
        ctx: &HandlerContext,
        input: Content,
        options: &StartOperationOptions,
        serializer: &SerializerChain,
    ) -> Result<StartOperationResult, OperationError> {
        let input = serializer
            .deserialize::<H::Input>(&input)
            .map_err(|err| HandlerError::bad_request(format!("invalid operation input: {err}")))?;
        self.start(ctx, input, options)
            .await?
            .try_map(|output| encode(serializer, &output))
    }

    async fn get_result_erased(
        &self,
        ctx: &HandlerContext,
        operation_id: &str,
        options: &GetOperationResultOptions,
        serializer: &SerializerChain,
    ) -> Result<OperationResult, OperationError> {
        self.get_result(ctx, operation_id, options)
            .await?
            .try_map(|output| encode(serializer, &output))
    }

    async fn get_info_erased(
        &self,
        ctx: &HandlerContext,
        operation_id: &str,
    ) -> Result<OperationInfo, OperationError> {
        self.get_info(ctx, operation_id).await
    }

    async fn cancel_erased(&self, ctx: &HandlerContext, operation_id: &str) -> Result<(), OperationError> {
        self.cancel(ctx, operation_id).await
    }
}

fn encode<T: Serialize + 'static>(serializer: &SerializerChain, value: &T) -> Result<Content, OperationError> {
    serializer
        .serialize(value)
        .map_err(|err| OperationError::Internal(anyhow::Error::new(err).context("failed to encode operation output")))
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// A named group of operations.
pub struct Service {
    name: String,
    operations: HashMap<String, Arc<dyn RegisteredOperation>>,
}

impl Service {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operations: HashMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds an operation to the service.
    ///
    /// # Errors
    ///
    /// Returns an error for an empty operation name or a name already registered.
    pub fn register<H: OperationHandler>(&mut self, operation: H) -> Result<(), RegistryError> {
        let name = operation.name().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyOperationName {
                service: self.name.clone(),
            });
        }
        if self.operations.contains_key(&name) {
            return Err(RegistryError::DuplicateOperation {
                service: self.name.clone(),
                operation: name,
            });
        }
        self.operations.insert(name, Arc::new(operation));
        Ok(())
    }

    /// Builder-style [`Service::register`].
    ///
    /// # Errors
    ///
    /// Same as [`Service::register`].
    pub fn with_operation<H: OperationHandler>(mut self, operation: H) -> Result<Self, RegistryError> {
        self.register(operation)?;
        Ok(self)
    }

    /// Names of the registered operations, sorted.
    #[must_use]
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// ---------------------------------------------------------------------------
// ServiceRegistry
// ---------------------------------------------------------------------------

/// Registry of services, routing `"{service}/{operation}"` names to typed
/// operation handlers.
pub struct ServiceRegistry {
    services: DashMap<String, Arc<Service>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// Registers a service.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid or duplicate service name, or a
    /// service without operations.
    pub fn register(&self, service: Service) -> Result<(), RegistryError> {
        if service.name.is_empty() {
            return Err(RegistryError::EmptyServiceName);
        }
        if service.name.contains('/') {
            return Err(RegistryError::InvalidServiceName(service.name));
        }
        if service.operations.is_empty() {
            return Err(RegistryError::EmptyService(service.name));
        }
        match self.services.entry(service.name.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateService(service.name)),
            Entry::Vacant(entry) => {
                debug!(service = %service.name, operations = service.operations.len(), "registered service");
                entry.insert(Arc::new(service));
                Ok(())
            }
        }
    }

    /// Retrieve a service by its name.
    pub fn get(&self, name: &str) -> Option<Arc<Service>> {
        self.services.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Builds a [`Handler`] dispatching to the registered services.
    #[must_use]
    pub fn new_handler(self: &Arc<Self>, serializer: SerializerChain) -> RegistryHandler {
        RegistryHandler {
            registry: Arc::clone(self),
            serializer,
        }
    }

    fn resolve(&self, operation: &str) -> Result<Arc<dyn RegisteredOperation>, OperationError> {
        let not_found = || HandlerError::not_found(format!("operation not found: {operation}"));
        let (service, name) = operation.split_once('/').ok_or_else(not_found)?;
        let service = self.get(service).ok_or_else(not_found)?;
        let found = service.operations.get(name).cloned().ok_or_else(not_found)?;
        Ok(found)
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// RegistryHandler
// ---------------------------------------------------------------------------

/// [`Handler`] backed by a [`ServiceRegistry`].
///
/// Unknown operations are `404`, inputs the chain cannot decode are `400`,
/// and outputs it cannot encode are a generic `500`.
pub struct RegistryHandler {
    registry: Arc<ServiceRegistry>,
    serializer: SerializerChain,
}

#[async_trait]
impl Handler for RegistryHandler {
    async fn start_operation(
        &self,
        ctx: &HandlerContext,
        operation: &str,
        input: Content,
        options: &StartOperationOptions,
    ) -> Result<StartOperationResult, OperationError> {
        self.registry
            .resolve(operation)?
            .start_erased(ctx, input, options, &self.serializer)
            .await
    }

    async fn get_operation_result(
        &self,
        ctx: &HandlerContext,
        operation: &str,
        operation_id: &str,
        options: &GetOperationResultOptions,
    ) -> Result<OperationResult, OperationError> {
        self.registry
            .resolve(operation)?
            .get_result_erased(ctx, operation_id, options, &self.serializer)
            .await
    }

    async fn get_operation_info(
        &self,
        ctx: &HandlerContext,
        operation: &str,
        operation_id: &str,
    ) -> Result<OperationInfo, OperationError> {
        self.registry
            .resolve(operation)?
            .get_info_erased(ctx, operation_id)
            .await
    }

    async fn cancel_operation(
        &self,
        ctx: &HandlerContext,
        operation: &str,
        operation_id: &str,
    ) -> Result<(), OperationError> {
        self.registry
            .resolve(operation)?
            .cancel_erased(ctx, operation_id)
            .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
