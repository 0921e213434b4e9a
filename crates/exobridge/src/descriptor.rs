//! # Service Descriptor
//!
//! The function table of a service interface: the single source of truth for
//! which function lives at which wire index.
//!
//! ## Philosophy
//!
//! - **Positional Addressing**: Calls name functions by index. The table is
//!   the declared members in declaration order, then the baseline `close`
//!   member, always last.
//! - **Link-Time Safety**: Every serializer is resolved while the table is
//!   built, so a missing type fails startup instead of the first call.
//! - **Immutable**: A built descriptor is never mutated; calls on any thread
//!   only read it.

use std::any::Any;
use std::any::type_name;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use neowire::ServiceSchema;
use neowire::Value;

use crate::error::Error;
use crate::error::Result;
use crate::outbound::OutboundCallHandler;
use crate::serializer::AnyValue;
use crate::serializer::Serializer;
use crate::serializer::SerializersModule;
use crate::serializer::pack;
use crate::signature::FunctionSignature;
use crate::types::TypeBindings;
use crate::types::TypeRef;

/// Baseline members every bridged service carries.
pub trait BridgeService: Send + Sync {
    /// Releases the instance. Always the last entry of the function table.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Decoded arguments of a call, in parameter order.
pub struct Args {
    values: Vec<Option<AnyValue>>,
}

impl Args {
    pub fn new(values: Vec<AnyValue>) -> Self {
        Self { values: values.into_iter().map(Some).collect() }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Moves argument `index` out as a `T`.
    pub fn take<T: Any>(&mut self, index: usize) -> Result<T> {
        let value = self
            .values
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| Error::Serialization(format!("argument {} is missing", index)))?;
        value
            .downcast::<T>()
            .map(|v| *v)
            .map_err(|_| Error::Serialization(format!("argument {} is not a {}", index, type_name::<T>())))
    }
}

pub type ReturningFn<S> = Arc<dyn Fn(&S, Args) -> Result<AnyValue> + Send + Sync>;
pub type SuspendingFn<S> = Arc<dyn Fn(Arc<S>, Args) -> BoxFuture<'static, Result<AnyValue>> + Send + Sync>;

/// How a function table entry reaches the implementation.
pub enum Invoke<S: ?Sized> {
    Returning(ReturningFn<S>),
    Suspending(SuspendingFn<S>),
}

/// A declared member of a service interface, before its types are resolved.
pub struct FunctionDecl<S: ?Sized> {
    name: String,
    params: Vec<TypeRef>,
    result: TypeRef,
    invoke: Invoke<S>,
}

impl<S: ?Sized + 'static> FunctionDecl<S> {
    /// Declares an ordinary member.
    pub fn returning<F>(name: impl Into<String>, params: Vec<TypeRef>, result: TypeRef, invoke: F) -> Self
    where
        F: Fn(&S, Args) -> Result<AnyValue> + Send + Sync + 'static,
    {
        Self { name: name.into(), params, result, invoke: Invoke::Returning(Arc::new(invoke)) }
    }

    /// Declares a suspending member.
    pub fn suspending<F, Fut>(name: impl Into<String>, params: Vec<TypeRef>, result: TypeRef, invoke: F) -> Self
    where
        F: Fn(Arc<S>, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AnyValue>> + Send + 'static,
    {
        let invoke: SuspendingFn<S> = Arc::new(move |service, args| invoke(service, args).boxed());
        Self { name: name.into(), params, result, invoke: Invoke::Suspending(invoke) }
    }

    fn is_suspending(&self) -> bool {
        matches!(self.invoke, Invoke::Suspending(_))
    }

    fn signature(&self) -> FunctionSignature {
        FunctionSignature::new(&self.name, &self.params, &self.result, self.is_suspending())
    }
}

/// One resolved function table entry.
pub struct FunctionEntry<S: ?Sized> {
    signature: FunctionSignature,
    arg_serializers: Vec<Arc<dyn Serializer>>,
    result_serializer: Arc<dyn Serializer>,
    invoke: Invoke<S>,
}

impl<S: ?Sized> FunctionEntry<S> {
    pub fn signature(&self) -> &FunctionSignature {
        &self.signature
    }

    pub fn arg_serializers(&self) -> &[Arc<dyn Serializer>] {
        &self.arg_serializers
    }

    pub fn result_serializer(&self) -> &Arc<dyn Serializer> {
        &self.result_serializer
    }

    pub fn is_suspending(&self) -> bool {
        matches!(self.invoke, Invoke::Suspending(_))
    }

    pub(crate) fn invoke(&self) -> &Invoke<S> {
        &self.invoke
    }

    /// Encodes native arguments with the entry's argument serializers.
    pub fn encode_args(&self, args: &[&dyn Any]) -> Result<Vec<Value>> {
        if args.len() != self.arg_serializers.len() {
            return Err(Error::Serialization(format!(
                "`{}` takes {} arguments, got {}",
                self.signature,
                self.arg_serializers.len(),
                args.len()
            )));
        }
        args.iter()
            .zip(&self.arg_serializers)
            .map(|(arg, serializer)| serializer.encode(*arg))
            .collect()
    }

    /// Decodes portable arguments with the entry's argument serializers.
    pub fn decode_args(&self, args: Vec<Value>) -> Result<Args> {
        let values = args
            .into_iter()
            .zip(&self.arg_serializers)
            .enumerate()
            .map(|(i, (arg, serializer))| {
                serializer
                    .decode(arg)
                    .map_err(|e| Error::Serialization(format!("argument {} of `{}`: {}", i, self.signature, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Args::new(values))
    }
}

/// The contract an interface adapter fulfils, whether written by hand or by a
/// code generator.
pub trait ServiceAdapter: Send + Sync + 'static {
    /// The service interface, usually `dyn SomeService`.
    type Service: ?Sized + BridgeService + 'static;

    /// Identifies the interface across the boundary.
    fn serial_name(&self) -> &str;

    /// Concrete types bound to the interface's type parameters.
    fn type_bindings(&self) -> TypeBindings {
        TypeBindings::new()
    }

    /// Contributes the serializers for the concrete types the interface mentions.
    fn register_serializers(&self, _module: &mut SerializersModule) {}

    /// Declared members, in declaration order. `close` is appended by the descriptor.
    fn functions(&self) -> Vec<FunctionDecl<Self::Service>>;

    /// Wraps a call handler in a proxy implementing the interface.
    fn outbound_service(&self, handler: OutboundCallHandler<Self::Service>) -> Arc<Self::Service>;
}

pub struct ServiceDescriptor<S: ?Sized> {
    serial_name: String,
    functions: Vec<FunctionEntry<S>>,
}

impl<S: ?Sized + BridgeService + 'static> ServiceDescriptor<S> {
    /// Builds the function table for `adapter`.
    ///
    /// `module` is cloned and extended with the adapter's own serializers.
    ///
    /// # Errors
    /// - `UnresolvedType` if any parameter or result type has no serializer.
    /// - `ProtocolMismatch` if two members render the same signature.
    pub fn build<A>(adapter: &A, module: &SerializersModule) -> Result<Self>
    where
        A: ServiceAdapter<Service = S> + ?Sized,
    {
        let serial_name = adapter.serial_name().to_string();
        let bindings = adapter.type_bindings();
        let mut module = module.clone();
        adapter.register_serializers(&mut module);
        module.register_default::<()>();

        let mut decls = adapter.functions();
        decls.push(FunctionDecl::returning("close", Vec::new(), TypeRef::unit(), |service: &S, _| {
            service.close()?;
            Ok(pack(()))
        }));

        let mut functions: Vec<FunctionEntry<S>> = Vec::with_capacity(decls.len());
        for decl in decls {
            let signature = decl.signature();
            if functions.iter().any(|f| f.signature == signature) {
                return Err(Error::ProtocolMismatch {
                    service: serial_name,
                    detail: format!("`{}` is declared twice", signature),
                });
            }

            let resolve = |ty: &TypeRef| {
                module.resolve(ty, &bindings).map_err(|e| match e {
                    Error::UnresolvedType(ty) => {
                        Error::UnresolvedType(format!("{} in `{}` of {}", ty, signature, serial_name))
                    }
                    other => other,
                })
            };
            let arg_serializers = decl.params.iter().map(resolve).collect::<Result<Vec<_>>>()?;
            let result_serializer = resolve(&decl.result)?;

            functions.push(FunctionEntry {
                signature,
                arg_serializers,
                result_serializer,
                invoke: decl.invoke,
            });
        }

        Ok(Self { serial_name, functions })
    }
}

impl<S: ?Sized> ServiceDescriptor<S> {
    pub fn serial_name(&self) -> &str {
        &self.serial_name
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    pub fn functions(&self) -> &[FunctionEntry<S>] {
        &self.functions
    }

    /// Looks up the entry at wire index `index`.
    ///
    /// # Errors
    /// Returns `UnknownFunctionIndex` with the table size if `index` is out of bounds.
    pub fn function(&self, index: u32) -> Result<&FunctionEntry<S>> {
        self.functions.get(index as usize).ok_or_else(|| Error::UnknownFunctionIndex {
            service: self.serial_name.clone(),
            index,
            table_len: self.functions.len(),
        })
    }

    /// Wire index of a member, by signature text.
    pub fn index_of(&self, signature: &str) -> Option<u32> {
        self.functions
            .iter()
            .position(|f| f.signature.text() == signature)
            .map(|i| i as u32)
    }

    /// Wire index of the baseline `close` member.
    pub fn close_index(&self) -> u32 {
        (self.functions.len() - 1) as u32
    }

    pub fn signatures(&self) -> Vec<String> {
        self.functions.iter().map(|f| f.signature.text().to_string()).collect()
    }

    pub fn schema(&self) -> ServiceSchema {
        ServiceSchema {
            serial_name: self.serial_name.clone(),
            signatures: self.signatures(),
        }
    }

    /// Compares this table against the remote end's, index by index.
    ///
    /// # Errors
    /// Returns `ProtocolMismatch` naming the first differing index, both
    /// signature texts and both table sizes.
    pub fn check_compatible(&self, remote: &ServiceSchema) -> Result<()> {
        let mismatch = |detail: String| Error::ProtocolMismatch {
            service: self.serial_name.clone(),
            detail,
        };

        if remote.serial_name != self.serial_name {
            return Err(mismatch(format!(
                "remote serves '{}', local expects '{}'",
                remote.serial_name, self.serial_name
            )));
        }

        let local_len = self.functions.len();
        let remote_len = remote.signatures.len();
        for index in 0..local_len.max(remote_len) {
            let local = self.functions.get(index).map(|f| f.signature.text());
            let remote_sig = remote.signatures.get(index).map(String::as_str);
            if local != remote_sig {
                return Err(mismatch(format!(
                    "function {}: local `{}`, remote `{}` (local table has {} entries, remote has {})",
                    index,
                    local.unwrap_or("<none>"),
                    remote_sig.unwrap_or("<none>"),
                    local_len,
                    remote_len
                )));
            }
        }

        Ok(())
    }
}
