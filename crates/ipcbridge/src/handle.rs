//! Type-safe handles for server-side resources.
//!
//! On the wire a handle is a bare `u64`, and the same integer can name unrelated
//! resources in two tables. `Handle<K>` carries the resource kind in its type so a
//! `Handle<Scene>` cannot be looked up in the `Source` table by accident.

use std::marker::PhantomData;

use ipcrpc::Value;

/// The raw wire representation of a handle.
pub type RawHandle = u64;

/// Reserved raw value meaning "no handle". Never allocated.
pub const INVALID_HANDLE: RawHandle = u64::MAX;

/// A kind of native resource that gets its own handle table.
///
/// Usually declared with [`resource_kind!`](crate::resource_kind).
pub trait Kind: 'static {
    /// What the table stores for each handle.
    type Ref: Send + 'static;

    /// Human-readable kind name, used in logs and error messages.
    const NAME: &'static str;
}

/// Declares a marker type implementing [`Kind`].
///
/// ```
/// use std::sync::Arc;
/// ipcbridge::resource_kind!(pub Source => Arc<String>);
/// ```
#[macro_export]
macro_rules! resource_kind {
    ($(#[$meta:meta])* $vis:vis $name:ident => $target:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis struct $name;

        impl $crate::Kind for $name {
            type Ref = $target;
            const NAME: &'static str = stringify!($name);
        }
    };
}

/// A handle into the table of resource kind `K`.
pub struct Handle<K> {
    raw: RawHandle,
    _kind: PhantomData<fn() -> K>,
}

impl<K> Handle<K> {
    pub const fn from_raw(raw: RawHandle) -> Self {
        Self { raw, _kind: PhantomData }
    }

    /// The sentinel handle.
    pub const fn invalid() -> Self {
        Self::from_raw(INVALID_HANDLE)
    }

    pub const fn raw(self) -> RawHandle {
        self.raw
    }

    pub const fn is_valid(self) -> bool {
        self.raw != INVALID_HANDLE
    }

    /// Reads a handle from a `UInt64` argument.
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_u64().map(Self::from_raw)
    }
}

impl<K> Clone for Handle<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Handle<K> {}

impl<K> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<K> Eq for Handle<K> {}

impl<K> PartialOrd for Handle<K> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Handle<K> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<K> std::hash::Hash for Handle<K> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<K: Kind> std::fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "Handle<{}>({})", K::NAME, self.raw)
        } else {
            write!(f, "Handle<{}>(invalid)", K::NAME)
        }
    }
}

impl<K: Kind> std::fmt::Display for Handle<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", K::NAME.to_lowercase(), self.raw)
    }
}

impl<K> From<Handle<K>> for Value {
    fn from(handle: Handle<K>) -> Self {
        Value::UInt64(handle.raw)
    }
}
