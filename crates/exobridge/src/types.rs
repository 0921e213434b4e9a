//! # Declared Types
//!
//! A `TypeRef` is a type as written in an interface declaration: possibly
//! generic over the interface's type parameters, possibly marked contextual.
//! Both the signature encoder and the serializer resolver work from it.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A declared type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    /// A concrete type constructor with its arguments, e.g. `List<T>`.
    Named { name: String, args: Vec<TypeRef> },
    /// A type parameter of the owning interface, e.g. `T`.
    Param(String),
    /// A type whose serializer must be supplied by the serializers module.
    Contextual(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named { name: name.into(), args: Vec::new() }
    }

    pub fn generic(name: impl Into<String>, args: Vec<TypeRef>) -> Self {
        Self::Named { name: name.into(), args }
    }

    pub fn param(name: impl Into<String>) -> Self {
        Self::Param(name.into())
    }

    pub fn contextual(inner: TypeRef) -> Self {
        Self::Contextual(Box::new(inner))
    }

    pub fn unit() -> Self {
        Self::named("Unit")
    }

    pub fn list(element: TypeRef) -> Self {
        Self::generic("List", vec![element])
    }

    pub fn option(inner: TypeRef) -> Self {
        Self::generic("Option", vec![inner])
    }

    pub fn is_contextual(&self) -> bool {
        matches!(self, Self::Contextual(_))
    }

    /// Returns the first type parameter that is still unbound, if any.
    pub fn free_param(&self) -> Option<&str> {
        match self {
            Self::Param(name) => Some(name),
            Self::Named { args, .. } => args.iter().find_map(|a| a.free_param()),
            Self::Contextual(inner) => inner.free_param(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named { name, args } => {
                write!(f, "{}", name)?;
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Self::Param(name) => write!(f, "{}", name),
            Self::Contextual(inner) => write!(f, "@Contextual {}", inner),
        }
    }
}

/// Concrete types bound to an interface's type parameters.
///
/// Bindings are kept in insertion order; binding the same name twice keeps
/// the later type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeBindings {
    params: Vec<(String, TypeRef)>,
}

impl TypeBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        let name = name.into();
        self.params.retain(|(n, _)| *n != name);
        self.params.push((name, ty));
        self
    }

    /// Binds `name` to the declared type of `T`.
    pub fn bind_type<T: Portable>(self, name: impl Into<String>) -> Self {
        self.bind(name, T::type_ref())
    }

    pub fn get(&self, name: &str) -> Option<&TypeRef> {
        self.params.iter().find(|(n, _)| n == name).map(|(_, ty)| ty)
    }

    /// Replaces every bound type parameter in `ty`. Unbound parameters are left in place.
    pub fn substitute(&self, ty: &TypeRef) -> TypeRef {
        match ty {
            TypeRef::Param(name) => self.get(name).cloned().unwrap_or_else(|| ty.clone()),
            TypeRef::Named { name, args } => TypeRef::Named {
                name: name.clone(),
                args: args.iter().map(|a| self.substitute(a)).collect(),
            },
            TypeRef::Contextual(inner) => TypeRef::Contextual(Box::new(self.substitute(inner))),
        }
    }
}

/// A Rust type that can cross the bridge and knows its declared name.
pub trait Portable: Serialize + DeserializeOwned + Send + 'static {
    fn type_ref() -> TypeRef;
}

/// Implements `Portable` for plain types under the given declared names.
///
/// ```ignore
/// portable!(SampleRequest => "SampleRequest", SampleResponse => "SampleResponse");
/// ```
#[macro_export]
macro_rules! portable {
    ($($ty:ty => $name:expr),+ $(,)?) => {
        $(
            impl $crate::types::Portable for $ty {
                fn type_ref() -> $crate::types::TypeRef {
                    $crate::types::TypeRef::named($name)
                }
            }
        )+
    };
}

portable!(
    bool => "bool",
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    f32 => "f32",
    f64 => "f64",
    char => "char",
    String => "String",
    () => "Unit",
);

impl<T: Portable> Portable for Vec<T> {
    fn type_ref() -> TypeRef {
        TypeRef::list(T::type_ref())
    }
}

impl<T: Portable> Portable for Option<T> {
    fn type_ref() -> TypeRef {
        TypeRef::option(T::type_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_generic_and_contextual() {
        let ty = TypeRef::generic("Map", vec![TypeRef::named("String"), TypeRef::list(TypeRef::param("T"))]);
        assert_eq!(ty.to_string(), "Map<String, List<T>>");
        assert_eq!(TypeRef::contextual(TypeRef::named("SampleRequest")).to_string(), "@Contextual SampleRequest");
    }

    #[test]
    fn test_substitute_nested_params() {
        let bindings = TypeBindings::new().bind_type::<i64>("T");
        let declared = TypeRef::option(TypeRef::list(TypeRef::param("T")));
        let concrete = bindings.substitute(&declared);

        assert_eq!(concrete, <Option<Vec<i64>>>::type_ref());
        assert_eq!(concrete.free_param(), None);
        assert_eq!(declared.free_param(), Some("T"));
    }

    #[test]
    fn test_unbound_param_survives_substitution() {
        let bindings = TypeBindings::new().bind_type::<String>("K");
        let substituted = bindings.substitute(&TypeRef::param("V"));
        assert_eq!(substituted, TypeRef::param("V"));
    }

    #[test]
    fn test_rebinding_keeps_latest() {
        let bindings = TypeBindings::new().bind_type::<i32>("T").bind_type::<u64>("T");
        assert_eq!(bindings.get("T"), Some(&TypeRef::named("u64")));
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(<()>::type_ref().to_string(), "Unit");
        assert_eq!(<Vec<String>>::type_ref().to_string(), "List<String>");
    }
}
