//! # Serializer Resolver
//!
//! Maps declared types to serializers at adapter-construction time.
//!
//! ## Philosophy
//!
//! - **Explicit Registry**: There is no runtime reflection. Serializers are
//!   registered under the rendered form of their declared type (`List<i64>`),
//!   and generic declarations are substituted with the adapter's bindings before lookup.
//! - **Fail Early**: A type that cannot be resolved fails descriptor
//!   construction, never the first call.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Error;
use crate::error::Result;
use crate::types::Portable;
use crate::types::TypeBindings;
use crate::types::TypeRef;

/// A native value whose type is known only to the function table entry that holds it.
pub type AnyValue = Box<dyn Any + Send>;

/// Boxes a native value for the function table.
pub fn pack<T: Any + Send>(value: T) -> AnyValue {
    Box::new(value)
}

/// Converts values of one declared type to and from their portable form.
pub trait Serializer: Send + Sync {
    /// The concrete type this serializer handles.
    fn type_ref(&self) -> &TypeRef;

    /// Encodes a native value. Fails if `value` is not of the handled type.
    fn encode(&self, value: &dyn Any) -> Result<Value>;

    /// Decodes a portable value into a boxed native value.
    fn decode(&self, value: Value) -> Result<AnyValue>;
}

/// `serde_json` backed serializer for `T`.
pub struct SerdeSerializer<T> {
    ty: TypeRef,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeSerializer<T> {
    pub fn new(ty: TypeRef) -> Self {
        Self { ty, _marker: PhantomData }
    }
}

impl<T> Serializer for SerdeSerializer<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn type_ref(&self) -> &TypeRef {
        &self.ty
    }

    fn encode(&self, value: &dyn Any) -> Result<Value> {
        let value = value.downcast_ref::<T>().ok_or_else(|| {
            Error::Serialization(format!("value is not a {}", self.ty))
        })?;
        serde_json::to_value(value).map_err(|e| Error::Serialization(format!("encoding {}: {}", self.ty, e)))
    }

    fn decode(&self, value: Value) -> Result<AnyValue> {
        serde_json::from_value::<T>(value)
            .map(pack)
            .map_err(|e| Error::Serialization(format!("decoding {}: {}", self.ty, e)))
    }
}

/// Registry of serializers, keyed by rendered concrete type.
///
/// Contextual serializers live in their own table: a type declared
/// `@Contextual` is only ever resolved from there.
#[derive(Clone, Default)]
pub struct SerializersModule {
    serializers: HashMap<String, Arc<dyn Serializer>>,
    contextual: HashMap<String, Arc<dyn Serializer>>,
}

impl SerializersModule {
    /// Creates an empty module.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a module that knows the primitive types, `String` and `Unit`.
    pub fn with_builtins() -> Self {
        let mut module = Self::new();
        module
            .register::<bool>()
            .register::<i8>()
            .register::<i16>()
            .register::<i32>()
            .register::<i64>()
            .register::<u8>()
            .register::<u16>()
            .register::<u32>()
            .register::<u64>()
            .register::<f32>()
            .register::<f64>()
            .register::<char>()
            .register::<String>()
            .register::<()>();
        module
    }

    /// Registers `T` under its declared type, replacing any previous entry.
    pub fn register<T: Portable>(&mut self) -> &mut Self {
        self.register_as::<T>(T::type_ref())
    }

    /// Registers `T` under an explicit declared type.
    pub fn register_as<T>(&mut self, ty: TypeRef) -> &mut Self
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.serializers.insert(ty.to_string(), Arc::new(SerdeSerializer::<T>::new(ty)));
        self
    }

    /// Registers `T` as the contextual serializer for `ty`.
    pub fn register_contextual<T>(&mut self, ty: TypeRef) -> &mut Self
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.contextual.insert(ty.to_string(), Arc::new(SerdeSerializer::<T>::new(ty)));
        self
    }

    /// Registers an arbitrary serializer under its own type.
    pub fn register_serializer(&mut self, serializer: Arc<dyn Serializer>) -> &mut Self {
        self.serializers.insert(serializer.type_ref().to_string(), serializer);
        self
    }

    /// Registers `T` only if its declared type has no serializer yet.
    ///
    /// Adapters use this for the concrete types they mention, so that entries
    /// supplied by the host take precedence.
    pub fn register_default<T: Portable>(&mut self) -> &mut Self {
        let ty = T::type_ref();
        self.serializers
            .entry(ty.to_string())
            .or_insert_with(|| Arc::new(SerdeSerializer::<T>::new(ty)));
        self
    }

    pub fn contains(&self, ty: &TypeRef) -> bool {
        match ty {
            TypeRef::Contextual(inner) => self.contextual.contains_key(&inner.to_string()),
            _ => self.serializers.contains_key(&ty.to_string()),
        }
    }

    /// Resolves a declared type, substituting the adapter's type parameters first.
    ///
    /// # Errors
    /// Returns `Error::UnresolvedType` if a type parameter is unbound or no
    /// serializer is registered for the concrete type.
    pub fn resolve(&self, declared: &TypeRef, bindings: &TypeBindings) -> Result<Arc<dyn Serializer>> {
        let concrete = bindings.substitute(declared);
        if let Some(param) = concrete.free_param() {
            return Err(Error::UnresolvedType(format!("{} (type parameter {} is unbound)", declared, param)));
        }

        match &concrete {
            TypeRef::Contextual(inner) => self
                .contextual
                .get(&inner.to_string())
                .cloned()
                .ok_or_else(|| Error::UnresolvedType(format!("{} (no contextual serializer registered)", concrete))),
            _ => self
                .serializers
                .get(&concrete.to_string())
                .cloned()
                .ok_or_else(|| Error::UnresolvedType(concrete.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    crate::portable!(Point => "Point");

    #[test]
    fn test_resolve_generic_after_substitution() {
        let mut module = SerializersModule::with_builtins();
        module.register::<Vec<i64>>();
        let bindings = TypeBindings::new().bind_type::<i64>("T");

        let serializer = module.resolve(&TypeRef::list(TypeRef::param("T")), &bindings).unwrap();
        assert_eq!(serializer.type_ref().to_string(), "List<i64>");

        let value = serializer.encode(&vec![1i64, 2, 3]).unwrap();
        assert_eq!(value, serde_json::json!([1, 2, 3]));
        let back = serializer.decode(value).unwrap();
        assert_eq!(*back.downcast::<Vec<i64>>().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_resolution_is_stable() {
        let mut module = SerializersModule::new();
        module.register::<Point>();
        let a = module.resolve(&TypeRef::named("Point"), &TypeBindings::new()).unwrap();
        let b = module.resolve(&TypeRef::named("Point"), &TypeBindings::new()).unwrap();

        let p = Point { x: 1, y: -4 };
        assert_eq!(a.encode(&p).unwrap(), b.encode(&p).unwrap());
    }

    #[test]
    fn test_unregistered_type_is_unresolved() {
        let module = SerializersModule::with_builtins();
        let err = module.resolve(&TypeRef::named("Point"), &TypeBindings::new()).err().unwrap();
        assert!(matches!(err, Error::UnresolvedType(ref t) if t == "Point"), "got {:?}", err);
    }

    #[test]
    fn test_unbound_param_is_unresolved() {
        let module = SerializersModule::with_builtins();
        let err = module.resolve(&TypeRef::param("T"), &TypeBindings::new()).err().unwrap();
        assert!(matches!(err, Error::UnresolvedType(_)));
    }

    #[test]
    fn test_contextual_only_from_contextual_table() {
        let mut module = SerializersModule::new();
        module.register::<Point>();
        let declared = TypeRef::contextual(TypeRef::named("Point"));

        // A regular registration does not satisfy a contextual declaration.
        assert!(module.resolve(&declared, &TypeBindings::new()).is_err());

        module.register_contextual::<Point>(TypeRef::named("Point"));
        assert!(module.contains(&declared));
        let serializer = module.resolve(&declared, &TypeBindings::new()).unwrap();
        assert_eq!(serializer.encode(&Point { x: 0, y: 9 }).unwrap()["y"], 9);
    }

    #[test]
    fn test_register_default_does_not_override() {
        let mut module = SerializersModule::new();
        // Host decides Point travels as a tuple.
        module.register_as::<(i32, i32)>(TypeRef::named("Point"));
        module.register_default::<Point>();

        let serializer = module.resolve(&TypeRef::named("Point"), &TypeBindings::new()).unwrap();
        assert_eq!(serializer.encode(&(3i32, 4i32)).unwrap(), serde_json::json!([3, 4]));
    }

    #[test]
    fn test_wrong_native_type_is_serialization_error() {
        let serializer = SerdeSerializer::<String>::new(TypeRef::named("String"));
        let err = serializer.encode(&42u8).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_malformed_portable_value_is_serialization_error() {
        let serializer = SerdeSerializer::<Point>::new(TypeRef::named("Point"));
        let err = serializer.decode(serde_json::json!({"x": "one"})).err().unwrap();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
