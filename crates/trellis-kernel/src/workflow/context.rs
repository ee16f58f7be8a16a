//! Typed Context Store
//!
//! An immutable key/value side channel that travels with the workflow
//! payload. Values are held as JSON so a whole state snapshot stays
//! serializable; every slot is guarded by the declared [`ValueType`] of its
//! [`ContextKey`], and incompatible values are rejected at insertion.
//!
//! ```rust,ignore
//! let amount = ContextKey::<f64>::new("amount")?;
//! let ctx = WorkflowContext::empty().with(&amount, 1500.0)?;
//! assert_eq!(ctx.get(&amount), Some(1500.0));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Context store error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ContextError {
    /// Keys must carry a non-empty name.
    #[error("Context key name must not be empty")]
    EmptyKey,

    /// Value is not assignable to the key's declared type.
    #[error("Type mismatch for context key '{key}': expected {expected}, found {actual}")]
    TypeMismatch {
        key: String,
        expected: ValueType,
        actual: String,
    },

    /// Value could not be turned into JSON.
    #[error("Failed to encode value for context key '{key}': {message}")]
    Encode { key: String, message: String },

    /// Stored JSON could not be read back as the requested type.
    #[error("Failed to decode context key '{key}': {message}")]
    Decode { key: String, message: String },
}

/// Declared type of a context slot.
///
/// Forms a small lattice: `Any` accepts everything, `Number` accepts
/// `Integer`, every other type accepts only itself. JSON `null` is accepted
/// by `Any` alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Any,
    Bool,
    Number,
    Integer,
    String,
    Array,
    Object,
}

impl ValueType {
    /// Most specific type of a JSON value, `None` for `null`.
    pub fn of(value: &Value) -> Option<ValueType> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(ValueType::Integer),
            Value::Number(_) => Some(ValueType::Number),
            Value::String(_) => Some(ValueType::String),
            Value::Array(_) => Some(ValueType::Array),
            Value::Object(_) => Some(ValueType::Object),
        }
    }

    /// Whether a slot of this type may hold a value of type `other`.
    pub fn is_assignable_from(self, other: ValueType) -> bool {
        self == other
            || self == ValueType::Any
            || (self == ValueType::Number && other == ValueType::Integer)
    }

    /// Whether a slot of this type may hold `value`.
    pub fn accepts(self, value: &Value) -> bool {
        match ValueType::of(value) {
            Some(actual) => self.is_assignable_from(actual),
            None => self == ValueType::Any,
        }
    }

    fn describe(value: &Value) -> String {
        ValueType::of(value)
            .map(|t| t.to_string())
            .unwrap_or_else(|| "null".to_string())
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Any => "any",
            ValueType::Bool => "bool",
            ValueType::Number => "number",
            ValueType::Integer => "integer",
            ValueType::String => "string",
            ValueType::Array => "array",
            ValueType::Object => "object",
        };
        f.write_str(name)
    }
}

/// A Rust type that can occupy a context slot.
///
/// Implement this for domain structs stored in the context (usually with
/// `VALUE_TYPE = ValueType::Object`).
pub trait ContextValue: Serialize + DeserializeOwned + Send + Sync + 'static {
    const VALUE_TYPE: ValueType;
}

macro_rules! context_value {
    ($value_type:expr => $($ty:ty),+ $(,)?) => {
        $(impl ContextValue for $ty {
            const VALUE_TYPE: ValueType = $value_type;
        })+
    };
}

context_value!(ValueType::Bool => bool);
context_value!(ValueType::String => String);
context_value!(ValueType::Number => f32, f64);
context_value!(ValueType::Integer => i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
context_value!(ValueType::Any => Value);
context_value!(ValueType::Object => serde_json::Map<String, Value>);

impl<T: ContextValue> ContextValue for Vec<T> {
    const VALUE_TYPE: ValueType = ValueType::Array;
}

impl<T: ContextValue> ContextValue for HashMap<String, T> {
    const VALUE_TYPE: ValueType = ValueType::Object;
}

impl<T: ContextValue> ContextValue for BTreeMap<String, T> {
    const VALUE_TYPE: ValueType = ValueType::Object;
}

/// Type-erased identity of a context slot: a name plus a declared type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnyContextKey {
    name: String,
    #[serde(rename = "type")]
    value_type: ValueType,
}

impl AnyContextKey {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Result<Self, ContextError> {
        let name = name.into();
        if name.is_empty() {
            return Err(ContextError::EmptyKey);
        }
        Ok(Self { name, value_type })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    fn check(&self, value: &Value) -> Result<(), ContextError> {
        if self.value_type.accepts(value) {
            Ok(())
        } else {
            Err(ContextError::TypeMismatch {
                key: self.name.clone(),
                expected: self.value_type,
                actual: ValueType::describe(value),
            })
        }
    }
}

impl fmt::Display for AnyContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.value_type)
    }
}

/// A typed slot in the context store.
///
/// Two keys are equal iff their names and declared types match.
pub struct ContextKey<T> {
    erased: AnyContextKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ContextValue> ContextKey<T> {
    /// Create a key; the declared type comes from `T`.
    pub fn new(name: impl Into<String>) -> Result<Self, ContextError> {
        Ok(Self {
            erased: AnyContextKey::new(name, T::VALUE_TYPE)?,
            _marker: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        self.erased.name()
    }

    pub fn value_type(&self) -> ValueType {
        self.erased.value_type()
    }

    /// The type-erased slot this key addresses.
    pub fn erased(&self) -> &AnyContextKey {
        &self.erased
    }

    /// Whether `value` may occupy this slot.
    pub fn is_compatible(&self, value: &Value) -> bool {
        self.erased.value_type.accepts(value)
    }

    /// Read `value` as `T`, enforcing the slot's declared type first.
    pub fn cast(&self, value: &Value) -> Result<T, ContextError> {
        self.erased.check(value)?;
        serde_json::from_value(value.clone()).map_err(|e| ContextError::Decode {
            key: self.erased.name.clone(),
            message: e.to_string(),
        })
    }

    fn encode(&self, value: T) -> Result<Value, ContextError> {
        serde_json::to_value(value).map_err(|e| ContextError::Encode {
            key: self.erased.name.clone(),
            message: e.to_string(),
        })
    }
}

impl<T> Clone for ContextKey<T> {
    fn clone(&self) -> Self {
        Self {
            erased: self.erased.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for ContextKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.erased == other.erased
    }
}

impl<T> Eq for ContextKey<T> {}

impl<T> Hash for ContextKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.erased.hash(state);
    }
}

impl<T> fmt::Debug for ContextKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextKey")
            .field("name", &self.erased.name)
            .field("type", &self.erased.value_type)
            .finish()
    }
}

/// Serialized form of one context entry.
#[doc(hidden)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextEntry {
    #[serde(flatten)]
    key: AnyContextKey,
    value: Value,
}

/// Immutable, type-checked context map.
///
/// Cloning is cheap (the map is shared); `with`/`without`/`merge` return new
/// contexts and never touch the receiver. When an operation is a no-op the
/// returned context shares storage with its input, observable via
/// [`WorkflowContext::ptr_eq`].
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<ContextEntry>", into = "Vec<ContextEntry>")]
pub struct WorkflowContext {
    entries: Arc<HashMap<AnyContextKey, Value>>,
}

impl WorkflowContext {
    /// The empty context, identity element for [`merge`](Self::merge).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Context holding a single entry.
    pub fn of<T: ContextValue>(key: &ContextKey<T>, value: T) -> Result<Self, ContextError> {
        Self::empty().with(key, value)
    }

    /// Build a context from raw entries, checking each against its key.
    pub fn from_entries<I>(entries: I) -> Result<Self, ContextError>
    where
        I: IntoIterator<Item = (AnyContextKey, Value)>,
    {
        let mut map = HashMap::new();
        for (key, value) in entries {
            key.check(&value)?;
            map.insert(key, value);
        }
        Ok(Self {
            entries: Arc::new(map),
        })
    }

    /// Typed lookup. A stored value that no longer decodes as `T` is logged
    /// and reported as absent.
    pub fn get<T: ContextValue>(&self, key: &ContextKey<T>) -> Option<T> {
        let raw = self.entries.get(key.erased())?;
        match key.cast(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = key.name(), error = %e, "context value could not be decoded");
                None
            }
        }
    }

    /// Raw JSON stored in a slot.
    pub fn get_raw(&self, key: &AnyContextKey) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_or_default<T: ContextValue>(&self, key: &ContextKey<T>, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn contains<T: ContextValue>(&self, key: &ContextKey<T>) -> bool {
        self.entries.contains_key(key.erased())
    }

    pub fn contains_key(&self, key: &AnyContextKey) -> bool {
        self.entries.contains_key(key)
    }

    /// New context with `key` bound to `value`.
    pub fn with<T: ContextValue>(&self, key: &ContextKey<T>, value: T) -> Result<Self, ContextError> {
        let encoded = key.encode(value)?;
        self.with_raw(key.erased().clone(), encoded)
    }

    /// New context with `key` bound to a raw JSON value, type-checked.
    pub fn with_value<T: ContextValue>(
        &self,
        key: &ContextKey<T>,
        value: Value,
    ) -> Result<Self, ContextError> {
        self.with_raw(key.erased().clone(), value)
    }

    /// New context with an erased key bound to a raw JSON value, type-checked.
    pub fn with_raw(&self, key: AnyContextKey, value: Value) -> Result<Self, ContextError> {
        key.check(&value)?;
        let mut map = (*self.entries).clone();
        map.insert(key, value);
        Ok(Self {
            entries: Arc::new(map),
        })
    }

    /// New context without `key`; returns a shared copy when `key` is absent.
    pub fn without<T: ContextValue>(&self, key: &ContextKey<T>) -> Self {
        self.without_raw(key.erased())
    }

    pub fn without_raw(&self, key: &AnyContextKey) -> Self {
        if !self.entries.contains_key(key) {
            return self.clone();
        }
        let mut map = (*self.entries).clone();
        map.remove(key);
        Self {
            entries: Arc::new(map),
        }
    }

    /// Union of both contexts; `other` wins on overlapping keys.
    ///
    /// Returns a shared copy of `self` when `other` is empty and of `other`
    /// when `self` is empty.
    pub fn merge(&self, other: &WorkflowContext) -> Self {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut map = (*self.entries).clone();
        map.extend(other.entries.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self {
            entries: Arc::new(map),
        }
    }

    /// Keys present in both contexts with different values, sorted.
    pub fn conflicts_with(&self, other: &WorkflowContext) -> Vec<AnyContextKey> {
        let mut conflicts: Vec<AnyContextKey> = self
            .entries
            .iter()
            .filter(|(key, value)| other.entries.get(*key).is_some_and(|theirs| theirs != *value))
            .map(|(key, _)| key.clone())
            .collect();
        conflicts.sort();
        conflicts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &AnyContextKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AnyContextKey, &Value)> {
        self.entries.iter()
    }

    /// Whether both contexts share the same storage.
    pub fn ptr_eq(&self, other: &WorkflowContext) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl PartialEq for WorkflowContext {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.entries == other.entries
    }
}

impl fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        f.debug_map()
            .entries(entries.into_iter().map(|(k, v)| (k.to_string(), v)))
            .finish()
    }
}

impl TryFrom<Vec<ContextEntry>> for WorkflowContext {
    type Error = ContextError;

    fn try_from(entries: Vec<ContextEntry>) -> Result<Self, Self::Error> {
        Self::from_entries(entries.into_iter().map(|e| (e.key, e.value)))
    }
}

impl From<WorkflowContext> for Vec<ContextEntry> {
    fn from(ctx: WorkflowContext) -> Self {
        let mut entries: Vec<ContextEntry> = ctx
            .entries
            .iter()
            .map(|(key, value)| ContextEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn amount() -> ContextKey<f64> {
        ContextKey::new("amount").unwrap()
    }

    fn status() -> ContextKey<String> {
        ContextKey::new("status").unwrap()
    }

    #[test]
    fn test_empty_key_name_rejected() {
        assert_eq!(
            ContextKey::<bool>::new("").unwrap_err(),
            ContextError::EmptyKey
        );
    }

    #[test]
    fn test_key_equality_uses_name_and_type() {
        let a = ContextKey::<f64>::new("amount").unwrap();
        let b = ContextKey::<f32>::new("amount").unwrap();
        assert_eq!(a.erased(), b.erased());

        let c = ContextKey::<String>::new("amount").unwrap();
        assert_ne!(a.erased(), c.erased());
    }

    #[test]
    fn test_with_and_get() {
        let ctx = WorkflowContext::of(&amount(), 1500.0).unwrap();
        assert_eq!(ctx.get(&amount()), Some(1500.0));
        assert!(ctx.contains(&amount()));
        assert!(!ctx.contains(&status()));
        assert_eq!(ctx.get_or_default(&status(), "new".to_string()), "new");
    }

    #[test]
    fn test_with_does_not_mutate_receiver() {
        let base = WorkflowContext::empty();
        let next = base.with(&status(), "open".to_string()).unwrap();
        assert!(base.is_empty());
        assert_eq!(next.len(), 1);
    }

    #[test]
    fn test_incompatible_value_is_type_mismatch() {
        let err = WorkflowContext::empty()
            .with_value(&amount(), json!("a lot"))
            .unwrap_err();
        assert_eq!(
            err,
            ContextError::TypeMismatch {
                key: "amount".into(),
                expected: ValueType::Number,
                actual: "string".into(),
            }
        );
    }

    #[test]
    fn test_numeric_slot_accepts_integer_subtype() {
        let ctx = WorkflowContext::empty()
            .with_value(&amount(), json!(1500))
            .unwrap();
        assert_eq!(ctx.get(&amount()), Some(1500.0));
        assert_eq!(ctx.get_raw(amount().erased()), Some(&json!(1500)));
    }

    #[test]
    fn test_integer_slot_rejects_float() {
        let retries = ContextKey::<u32>::new("retries").unwrap();
        assert!(retries.is_compatible(&json!(3)));
        assert!(!retries.is_compatible(&json!(3.5)));
        assert!(WorkflowContext::empty().with_value(&retries, json!(3.5)).is_err());
    }

    #[test]
    fn test_null_only_fits_any() {
        let raw = ContextKey::<Value>::new("raw").unwrap();
        assert!(raw.is_compatible(&Value::Null));
        assert!(!amount().is_compatible(&Value::Null));
        assert!(WorkflowContext::empty().with(&amount(), f64::NAN).is_err());
    }

    #[test]
    fn test_from_entries_validates_every_entry() {
        let good = AnyContextKey::new("status", ValueType::String).unwrap();
        let bad = AnyContextKey::new("amount", ValueType::Number).unwrap();

        assert!(WorkflowContext::from_entries([(good.clone(), json!("open"))]).is_ok());
        let err = WorkflowContext::from_entries([(good, json!("open")), (bad, json!(true))])
            .unwrap_err();
        assert!(matches!(err, ContextError::TypeMismatch { .. }));
    }

    #[test]
    fn test_without_absent_key_shares_storage() {
        let ctx = WorkflowContext::of(&status(), "open".to_string()).unwrap();
        let same = ctx.without(&amount());
        assert!(same.ptr_eq(&ctx));

        let removed = ctx.without(&status());
        assert!(removed.is_empty());
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_merge_identity_and_bias() {
        let c1 = WorkflowContext::of(&status(), "open".to_string())
            .unwrap()
            .with(&amount(), 10.0)
            .unwrap();
        let c2 = WorkflowContext::of(&status(), "closed".to_string()).unwrap();
        let empty = WorkflowContext::empty();

        assert!(c1.merge(&empty).ptr_eq(&c1));
        assert!(empty.merge(&c1).ptr_eq(&c1));

        let merged = c1.merge(&c2);
        assert_eq!(merged.get(&status()), Some("closed".to_string()));
        assert_eq!(merged.get(&amount()), Some(10.0));
    }

    #[test]
    fn test_conflicts_with_reports_differing_values_only() {
        let c1 = WorkflowContext::of(&status(), "open".to_string())
            .unwrap()
            .with(&amount(), 10.0)
            .unwrap();
        let c2 = WorkflowContext::of(&status(), "closed".to_string())
            .unwrap()
            .with(&amount(), 10.0)
            .unwrap();

        let conflicts = c1.conflicts_with(&c2);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].name(), "status");
    }

    #[test]
    fn test_serde_roundtrip_revalidates() {
        let ctx = WorkflowContext::of(&amount(), 99.5).unwrap();
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json, json!([{ "name": "amount", "type": "number", "value": 99.5 }]));

        let back: WorkflowContext = serde_json::from_value(json).unwrap();
        assert_eq!(back, ctx);

        let tampered = json!([{ "name": "amount", "type": "number", "value": "x" }]);
        assert!(serde_json::from_value::<WorkflowContext>(tampered).is_err());
    }
}
