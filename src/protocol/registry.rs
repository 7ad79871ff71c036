//! Type registry mapping Rust types to wire type codes
//!
//! Codes are allocated sequentially and are only meaningful inside one
//! registry instance. Code 0 is bound to [`Envelope`] at construction; every
//! other type gets the next free code when it is registered. Nothing is ever
//! unregistered, so a code stays valid for the lifetime of the registry.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};

use super::{ENVELOPE_CODE, Envelope, Error, Result};

/// Small integer identifying a registered value's wire shape
pub type TypeCode = u16;

pub(crate) type AnyValue = Arc<dyn Any + Send + Sync>;

type Decoder = Arc<dyn Fn(&[u8]) -> Option<AnyValue> + Send + Sync>;

/// A value decoded from the wire, tagged with its type code.
///
/// Cloning is cheap: the value itself is shared.
#[derive(Clone)]
pub struct Decoded {
    code: TypeCode,
    value: AnyValue,
}

impl Decoded {
    /// Type code the value was decoded under
    #[must_use]
    pub const fn code(&self) -> TypeCode {
        self.code
    }

    /// Check whether the value is a `T`
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Borrow the value as a `T`
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Get a shared handle to the value as a `T`
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast::<T>().ok()
    }

    pub(crate) fn into_any(self) -> AnyValue {
        self.value
    }
}

impl fmt::Debug for Decoded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoded")
            .field("code", &self.code)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct RegistryInner {
    codes: HashMap<TypeId, TypeCode>,
    decoders: Vec<Decoder>,
    // Type each code decodes to, indexed like `decoders`.
    decoded_as: Vec<TypeId>,
}

/// Bidirectional mapping between Rust types and wire type codes.
///
/// Registration takes `&self`, so a registry can be shared behind an [`Arc`]
/// and still grow; lookups only take a read lock.
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
}

impl TypeRegistry {
    /// Create a registry with [`Envelope`] pre-registered at code 0
    #[must_use]
    pub fn new() -> Self {
        let mut inner = RegistryInner::default();
        inner.codes.insert(TypeId::of::<Envelope>(), ENVELOPE_CODE);
        inner.decoders.push(decoder_for::<Envelope>());
        inner.decoded_as.push(TypeId::of::<Envelope>());

        Self {
            inner: RwLock::new(inner),
        }
    }

    /// Register `T` and return its code.
    ///
    /// Registering a type twice returns the code it already has.
    pub fn register<T>(&self) -> Result<TypeCode>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(&code) = inner.codes.get(&TypeId::of::<T>()) {
            return Ok(code);
        }

        let code = TypeCode::try_from(inner.decoders.len()).map_err(|_| Error::RegistryFull)?;
        inner.decoders.push(decoder_for::<T>());
        inner.decoded_as.push(TypeId::of::<T>());
        inner.codes.insert(TypeId::of::<T>(), code);

        debug!(code, type_name = type_name::<T>(), "registered type");
        Ok(code)
    }

    /// Bind another type identity to an already allocated code.
    ///
    /// Values of `A` encode under `code`; inbound frames with `code` still
    /// decode with the decoder of the type the code was allocated for, so
    /// [`decoded_code_for`](Self::decoded_code_for) does not see `A`.
    pub fn alias<A: 'static>(&self, code: TypeCode) -> Result<()> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if usize::from(code) >= inner.decoders.len() {
            return Err(Error::UnknownCode { code });
        }

        inner.codes.insert(TypeId::of::<A>(), code);
        debug!(code, type_name = type_name::<A>(), "registered alias");
        Ok(())
    }

    /// Look up the code for `T`
    #[must_use]
    pub fn code_for<T: 'static>(&self) -> Option<TypeCode> {
        self.code_for_id(TypeId::of::<T>())
    }

    /// Look up the code for a raw type identity
    #[must_use]
    pub fn code_for_id(&self, id: TypeId) -> Option<TypeCode> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.codes.get(&id).copied()
    }

    /// Look up the code whose inbound values decode to a `T`.
    ///
    /// Unlike [`code_for`](Self::code_for) this is `None` for an alias, since
    /// frames under an aliased code never decode to the alias type.
    #[must_use]
    pub fn decoded_code_for<T: 'static>(&self) -> Option<TypeCode> {
        let id = TypeId::of::<T>();
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        let code = inner.codes.get(&id).copied()?;
        (inner.decoded_as.get(usize::from(code)) == Some(&id)).then_some(code)
    }

    pub(crate) fn require_code<T: 'static>(&self) -> Result<TypeCode> {
        self.code_for::<T>().ok_or(Error::UnregisteredType {
            type_name: type_name::<T>(),
        })
    }

    /// Decode `bytes` with the decoder registered for `code`.
    ///
    /// Returns `None` when the code is unknown or the bytes do not parse into
    /// the registered shape. The caller decides whether that matters.
    #[must_use]
    pub fn decode(&self, code: TypeCode, bytes: &[u8]) -> Option<Decoded> {
        let decoder = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            inner.decoders.get(usize::from(code)).cloned()
        };

        let Some(decoder) = decoder else {
            trace!(code, "no decoder for type code");
            return None;
        };

        let value = decoder(bytes);
        if value.is_none() {
            trace!(code, len = bytes.len(), "payload did not decode");
        }
        value.map(|value| Decoded { code, value })
    }

    /// Number of allocated codes, including the envelope
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.decoders.len()
    }

    /// Check whether no codes are allocated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("codes", &self.len())
            .finish()
    }
}

fn decoder_for<T>() -> Decoder
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    Arc::new(|bytes: &[u8]| {
        serde_json::from_slice::<T>(bytes)
            .ok()
            .map(|value| Arc::new(value) as AnyValue)
    })
}
