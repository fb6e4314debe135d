//! Schema declarations: what the caller wants extracted.
//!
//! A [`Schema`] is an explicit, pre-built description of a structured type.
//! It plays the role a class definition with field annotations plays in
//! dynamic languages, without relying on runtime reflection: every field
//! names its [`TypeDescriptor`] up front, and the
//! [`crate::contract::Contract`] compiler visits that descriptor tree.
//!
//! Schemas are plain data (`Serialize`/`Deserialize`), so they can be built
//! in code or loaded from a JSON file.
//!
//! # Required vs optional
//!
//! A field is **optional** only when its type is [`TypeDescriptor::Optional`]
//! *and* it carries an explicit `null` default ([`Field::default_null`]).
//! Anything else is **required**, and a required field the server cannot
//! extract confidently triggers the costlier fallback tier:
//!
//! ```rust
//! use parsefy::{Field, Schema, TypeDescriptor};
//!
//! let invoice = Schema::new("Invoice")
//!     .field(
//!         Field::new("invoice_number", TypeDescriptor::string())
//!             .description("The invoice number"),
//!     )
//!     .field(Field::new("total", TypeDescriptor::number()).description("Total amount"))
//!     // Optional: nullable type AND explicit null default.
//!     .field(
//!         Field::new("po_number", TypeDescriptor::optional(TypeDescriptor::string()))
//!             .default_null()
//!             .description("PO number"),
//!     );
//! # let _ = invoice;
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scalar kinds with a direct JSON representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    String,
    Integer,
    Number,
    Boolean,
}

impl PrimitiveKind {
    /// JSON Schema `type` keyword for this kind.
    pub fn json_type(&self) -> &'static str {
        match self {
            PrimitiveKind::String => "string",
            PrimitiveKind::Integer => "integer",
            PrimitiveKind::Number => "number",
            PrimitiveKind::Boolean => "boolean",
        }
    }
}

/// The declared type of a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypeDescriptor {
    Primitive { primitive: PrimitiveKind },
    List { items: Box<TypeDescriptor> },
    /// Reference by name to the root schema or one of its definitions.
    Nested { schema: String },
    /// Admits an explicit "no value" (`null`).
    Optional { inner: Box<TypeDescriptor> },
    /// A host type with no wire representation; never compiles.
    Opaque { type_name: String },
}

impl TypeDescriptor {
    pub fn primitive(kind: PrimitiveKind) -> Self {
        TypeDescriptor::Primitive { primitive: kind }
    }

    pub fn string() -> Self {
        Self::primitive(PrimitiveKind::String)
    }

    pub fn integer() -> Self {
        Self::primitive(PrimitiveKind::Integer)
    }

    pub fn number() -> Self {
        Self::primitive(PrimitiveKind::Number)
    }

    pub fn boolean() -> Self {
        Self::primitive(PrimitiveKind::Boolean)
    }

    pub fn list(items: TypeDescriptor) -> Self {
        TypeDescriptor::List {
            items: Box::new(items),
        }
    }

    pub fn nested(schema: impl Into<String>) -> Self {
        TypeDescriptor::Nested {
            schema: schema.into(),
        }
    }

    pub fn optional(inner: TypeDescriptor) -> Self {
        TypeDescriptor::Optional {
            inner: Box::new(inner),
        }
    }

    pub fn opaque(type_name: impl Into<String>) -> Self {
        TypeDescriptor::Opaque {
            type_name: type_name.into(),
        }
    }

    /// True when the type itself admits `null`.
    pub fn is_nullable(&self) -> bool {
        matches!(self, TypeDescriptor::Optional { .. })
    }
}

/// One declared field of a [`Schema`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeDescriptor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Explicit default. `None` means no default was declared; `Some(Null)`
    /// is the explicit no-value default.
    #[serde(
        default,
        deserialize_with = "deserialize_explicit_default",
        skip_serializing_if = "Option::is_none"
    )]
    pub default: Option<Value>,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            ty,
            description: None,
            default: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    /// Shorthand for `default_value(Value::Null)`.
    pub fn default_null(self) -> Self {
        self.default_value(Value::Null)
    }

    /// The cost-relevant rule: optional iff nullable type *and* explicit null default.
    pub fn is_required(&self) -> bool {
        !(self.ty.is_nullable() && matches!(self.default, Some(Value::Null)))
    }
}

/// `"default": null` in JSON must stay distinguishable from a missing key.
fn deserialize_explicit_default<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A named structured type plus the sub-schemas it references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<Field>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub definitions: Vec<Schema>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: Vec::new(),
            definitions: Vec::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    /// Register a sub-schema that fields can reach via [`TypeDescriptor::nested`].
    pub fn define(mut self, schema: Schema) -> Self {
        self.definitions.push(schema);
        self
    }

    /// Load a schema from its JSON form.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
