//! # Signature Encoder
//!
//! Canonical text for a function: `fun name(P1, P2): R`, prefixed with
//! `suspend ` for suspending functions. Rendered from declared types, so two
//! ends agree regardless of which concrete type each binds to `T`.

use std::fmt;

use crate::types::TypeRef;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSignature {
    text: String,
}

impl FunctionSignature {
    pub fn new(name: &str, params: &[TypeRef], result: &TypeRef, suspending: bool) -> Self {
        let params = params
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let prefix = if suspending { "suspend " } else { "" };
        Self {
            text: format!("{prefix}fun {name}({params}): {result}"),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_suspending(&self) -> bool {
        self.text.starts_with("suspend ")
    }
}

impl fmt::Display for FunctionSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returning_signature() {
        let sig = FunctionSignature::new(
            "ping",
            &[TypeRef::named("SampleRequest")],
            &TypeRef::named("SampleResponse"),
            false,
        );
        assert_eq!(sig.text(), "fun ping(SampleRequest): SampleResponse");
        assert!(!sig.is_suspending());
    }

    #[test]
    fn test_suspending_signature_keeps_params_unbound() {
        let sig = FunctionSignature::new("reduce", &[TypeRef::list(TypeRef::param("T"))], &TypeRef::param("T"), true);
        assert_eq!(sig.text(), "suspend fun reduce(List<T>): T");
        assert!(sig.is_suspending());
    }

    #[test]
    fn test_no_params() {
        let sig = FunctionSignature::new("close", &[], &TypeRef::unit(), false);
        assert_eq!(sig.to_string(), "fun close(): Unit");
    }

    #[test]
    fn test_deterministic_and_distinct() {
        let a = FunctionSignature::new("put", &[TypeRef::named("String"), TypeRef::named("i64")], &TypeRef::unit(), false);
        let b = FunctionSignature::new("put", &[TypeRef::named("String"), TypeRef::named("i64")], &TypeRef::unit(), false);
        let c = FunctionSignature::new("put", &[TypeRef::named("i64"), TypeRef::named("String")], &TypeRef::unit(), false);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
