//! Static description of the methods a client can call.
//!
//! A [`MethodTable`] is built once, up front, and maps a [`MethodIndex`] to
//! everything the correlator needs: the wire name, how each argument is
//! converted, how the result is converted, and whether the method is a
//! notification.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::CallError;
use crate::jsonrpc::Params;

/// Failure converting a value to or from its wire form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ConversionError {
    message: String,
}

impl ConversionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for ConversionError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(error.to_string())
    }
}

/// Converts between caller-side values and wire values.
pub trait ValueConverter: Send + Sync + fmt::Debug {
    /// Convert an argument into its wire form.
    fn to_wire(&self, value: Value) -> Result<Value, ConversionError>;

    /// Convert a wire result into the caller's form.
    fn from_wire(&self, value: Value) -> Result<Value, ConversionError>;
}

/// Identity converter.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConverter;

impl ValueConverter for JsonConverter {
    fn to_wire(&self, value: Value) -> Result<Value, ConversionError> {
        Ok(value)
    }

    fn from_wire(&self, value: Value) -> Result<Value, ConversionError> {
        Ok(value)
    }
}

/// Converter that requires values to have the shape of `T`.
///
/// Values are deserialized into `T` and serialized back, so the wire form is
/// `T`'s canonical representation.
pub struct TypedConverter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedConverter<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedConverter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedConverter<{}>", std::any::type_name::<T>())
    }
}

impl<T> TypedConverter<T>
where
    T: Serialize + DeserializeOwned,
{
    fn round_trip(value: Value) -> Result<Value, ConversionError> {
        let typed: T = serde_json::from_value(value).map_err(|e| {
            ConversionError::new(format!(
                "expected {}: {e}",
                std::any::type_name::<T>()
            ))
        })?;
        Ok(serde_json::to_value(typed)?)
    }
}

impl<T> ValueConverter for TypedConverter<T>
where
    T: Serialize + DeserializeOwned,
{
    fn to_wire(&self, value: Value) -> Result<Value, ConversionError> {
        Self::round_trip(value)
    }

    fn from_wire(&self, value: Value) -> Result<Value, ConversionError> {
        Self::round_trip(value)
    }
}

/// Position of a method in its [`MethodTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodIndex(pub usize);

/// How arguments are laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParameterStyle {
    /// `"params": [a, b]`
    #[default]
    Positional,
    /// `"params": {"a": .., "b": ..}`
    Named,
}

/// One declared parameter.
#[derive(Debug, Clone)]
pub struct ParameterDescriptor {
    pub name: String,
    pub converter: Arc<dyn ValueConverter>,
}

/// Declared return type.
#[derive(Debug, Clone)]
pub enum ReturnDescriptor {
    /// No value; whatever the peer returns is discarded.
    Void,
    /// A value converted with the given converter.
    Value(Arc<dyn ValueConverter>),
}

/// Everything the correlator needs to call one method.
#[derive(Debug, Clone)]
pub struct MethodTableEntry {
    pub name: String,
    pub parameters: Vec<ParameterDescriptor>,
    pub style: ParameterStyle,
    pub returns: ReturnDescriptor,
    pub notification: bool,
}

impl MethodTableEntry {
    /// A request method returning an unconverted JSON value.
    pub fn request(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            style: ParameterStyle::Positional,
            returns: ReturnDescriptor::Value(Arc::new(JsonConverter)),
            notification: false,
        }
    }

    /// A notification method. Notifications never return a value.
    pub fn notification(name: impl Into<String>) -> Self {
        Self {
            notification: true,
            returns: ReturnDescriptor::Void,
            ..Self::request(name)
        }
    }

    /// Append a parameter.
    #[must_use]
    pub fn param(mut self, name: impl Into<String>, converter: impl ValueConverter + 'static) -> Self {
        self.parameters.push(ParameterDescriptor {
            name: name.into(),
            converter: Arc::new(converter),
        });
        self
    }

    /// Send arguments as a named object instead of an array.
    #[must_use]
    pub fn named(mut self) -> Self {
        self.style = ParameterStyle::Named;
        self
    }

    /// Convert results with `converter`.
    #[must_use]
    pub fn returns(mut self, converter: impl ValueConverter + 'static) -> Self {
        self.returns = ReturnDescriptor::Value(Arc::new(converter));
        self
    }

    /// Discard results.
    #[must_use]
    pub fn returns_void(mut self) -> Self {
        self.returns = ReturnDescriptor::Void;
        self
    }

    /// Convert `args` into wire params, in declaration order.
    pub fn marshal(&self, args: Vec<Value>) -> Result<Option<Params>, CallError> {
        if args.len() != self.parameters.len() {
            return Err(CallError::contract(format!(
                "method '{}' takes {} argument(s), got {}",
                self.name,
                self.parameters.len(),
                args.len()
            )));
        }
        if args.is_empty() {
            return Ok(None);
        }

        let mut converted = Vec::with_capacity(args.len());
        for (param, value) in self.parameters.iter().zip(args) {
            let wire = param.converter.to_wire(value).map_err(|e| {
                CallError::contract(format!(
                    "argument '{}' of '{}': {e}",
                    param.name, self.name
                ))
            })?;
            converted.push(wire);
        }

        Ok(Some(match self.style {
            ParameterStyle::Positional => Params::Positional(converted),
            ParameterStyle::Named => Params::Named(
                self.parameters
                    .iter()
                    .map(|p| p.name.clone())
                    .zip(converted)
                    .collect::<Map<String, Value>>(),
            ),
        }))
    }
}

/// Errors building a [`MethodTable`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MethodTableError {
    #[error("method '{name}' declared more than once")]
    DuplicateMethod { name: String },
}

/// Immutable table of callable methods.
#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    entries: Vec<MethodTableEntry>,
    by_name: HashMap<String, MethodIndex>,
}

impl MethodTable {
    pub fn builder() -> MethodTableBuilder {
        MethodTableBuilder::default()
    }

    /// Index of the method named `name`.
    pub fn index_of(&self, name: &str) -> Option<MethodIndex> {
        self.by_name.get(name).copied()
    }

    /// Entry at `index`.
    pub fn get(&self, index: MethodIndex) -> Option<&MethodTableEntry> {
        self.entries.get(index.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for [`MethodTable`]. Indices follow declaration order.
#[derive(Debug, Default)]
pub struct MethodTableBuilder {
    entries: Vec<MethodTableEntry>,
}

impl MethodTableBuilder {
    #[must_use]
    pub fn method(mut self, entry: MethodTableEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn build(self) -> Result<MethodTable, MethodTableError> {
        let mut by_name = HashMap::with_capacity(self.entries.len());
        for (i, entry) in self.entries.iter().enumerate() {
            if by_name.insert(entry.name.clone(), MethodIndex(i)).is_some() {
                return Err(MethodTableError::DuplicateMethod {
                    name: entry.name.clone(),
                });
            }
        }
        Ok(MethodTable {
            entries: self.entries,
            by_name,
        })
    }
}
