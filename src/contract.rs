//! Contract compilation: schema declaration → ordered field contract.
//!
//! The compiler is a pure function of the [`Schema`]: no I/O, no network.
//! Build a [`Contract`] once per distinct schema and reuse it for every
//! extraction; it is immutable, `Send + Sync` and cheap to clone behind an
//! `Arc`.
//!
//! ## Recursion
//!
//! Nested schemas are expanded in place. A schema that reaches itself again
//! is legal only when a list or optional wrapper sits somewhere on the path
//! back to itself; the back-reference then compiles to
//! [`ContractType::Ref`] and the referenced fields are stored once in
//! [`Contract::definitions`]. Without such a wrapper the value could never be
//! finite and compilation fails with [`ContractError::CyclicSchema`].
//!
//! The uploaded contract is self-contained: the first `ref` node for each
//! recursive schema carries that schema's fields, and later `ref` nodes
//! point back to it by name.

use crate::error::ContractError;
use crate::schema::{Field, PrimitiveKind, Schema, TypeDescriptor};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Coarse shape of a contract type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Primitive,
    List,
    Nested,
    OptionalWrapped,
}

/// Wire-ready type of a compiled field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContractType {
    Primitive { primitive: PrimitiveKind },
    /// Multiplicity marker around the element contract.
    List { items: Box<ContractType> },
    Nested {
        schema: String,
        fields: Vec<FieldContract>,
    },
    Optional { inner: Box<ContractType> },
    /// Recursive back-reference; fields live in [`Contract::definitions`].
    Ref { schema: String },
}

impl ContractType {
    pub fn kind(&self) -> TypeKind {
        match self {
            ContractType::Primitive { .. } => TypeKind::Primitive,
            ContractType::List { .. } => TypeKind::List,
            ContractType::Nested { .. } | ContractType::Ref { .. } => TypeKind::Nested,
            ContractType::Optional { .. } => TypeKind::OptionalWrapped,
        }
    }
}

/// One compiled field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldContract {
    pub name: String,
    pub json_path: String,
    #[serde(rename = "type")]
    pub ty: ContractType,
    pub required: bool,
    pub description: Option<String>,
}

impl FieldContract {
    pub fn kind(&self) -> TypeKind {
        self.ty.kind()
    }

    /// Nested field contracts, looking through list and optional wrappers.
    pub fn nested(&self) -> Option<&[FieldContract]> {
        let mut ty = &self.ty;
        loop {
            match ty {
                ContractType::Nested { fields, .. } => return Some(fields),
                ContractType::List { items } => ty = items,
                ContractType::Optional { inner } => ty = inner,
                _ => return None,
            }
        }
    }
}

/// Compiled, immutable field contract for one root schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contract {
    root: String,
    fields: Vec<FieldContract>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    definitions: BTreeMap<String, Vec<FieldContract>>,
    #[serde(skip)]
    wire: String,
}

impl Contract {
    /// Compile `schema` into a field contract.
    pub fn compile(schema: &Schema) -> Result<Contract, ContractError> {
        let mut compiler = Compiler::new(schema)?;
        compiler.stack.push(Frame {
            schema: schema.name.clone(),
            via_indirection: false,
        });
        let fields = compiler.compile_fields(schema, "$")?;
        compiler.stack.clear();

        // Expand every schema reached through a back-reference, including
        // ones first seen while expanding another definition.
        let mut definitions = BTreeMap::new();
        while let Some(name) = compiler.pending_refs.pop_first() {
            if definitions.contains_key(&name) {
                continue;
            }
            let target = compiler.lookup(&name, "$")?;
            compiler.stack.push(Frame {
                schema: name.clone(),
                via_indirection: false,
            });
            let defined = compiler.compile_fields(target, "$")?;
            compiler.stack.clear();
            definitions.insert(name, defined);
        }

        tracing::debug!(
            schema = %schema.name,
            fields = fields.len(),
            definitions = definitions.len(),
            "compiled field contract"
        );

        let wire = render_wire(&fields, &definitions).map_err(|e| ContractError::Serialization {
            schema: schema.name.clone(),
            detail: e.to_string(),
        })?;

        Ok(Contract {
            root: schema.name.clone(),
            fields,
            definitions,
            wire,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn fields(&self) -> &[FieldContract] {
        &self.fields
    }

    pub fn definition(&self, schema: &str) -> Option<&[FieldContract]> {
        self.definitions.get(schema).map(Vec::as_slice)
    }

    pub fn definitions(&self) -> &BTreeMap<String, Vec<FieldContract>> {
        &self.definitions
    }

    /// Top-level fields that must be present in every successful extraction.
    pub fn required_fields(&self) -> impl Iterator<Item = &FieldContract> {
        self.fields.iter().filter(|f| f.required)
    }

    /// The `contract` multipart part: JSON array of top-level field
    /// contracts, with each recursive definition inlined at its first `ref`.
    pub fn wire_json(&self) -> &str {
        &self.wire
    }

    /// Title-free JSON Schema equivalent, sent as `output_schema`.
    pub fn to_json_schema(&self) -> Value {
        let mut root = object_schema(&self.fields);
        if !self.definitions.is_empty() {
            let defs: Map<String, Value> = self
                .definitions
                .iter()
                .map(|(name, fields)| (name.clone(), Value::Object(object_schema(fields))))
                .collect();
            root.insert("$defs".into(), Value::Object(defs));
        }
        Value::Object(root)
    }
}

// ── Compiler internals ───────────────────────────────────────────────────────

struct Frame {
    schema: String,
    /// Whether the edge that entered this schema passed a list/optional wrapper.
    via_indirection: bool,
}

struct Compiler<'a> {
    schemas: HashMap<&'a str, &'a Schema>,
    stack: Vec<Frame>,
    pending_refs: BTreeSet<String>,
}

impl<'a> Compiler<'a> {
    /// Index the root and every schema defined beneath it by name. A name
    /// may repeat only if every declaration under it is identical.
    fn new(root: &'a Schema) -> Result<Self, ContractError> {
        let mut schemas: HashMap<&'a str, &'a Schema> = HashMap::new();
        let mut queue = vec![root];
        while let Some(schema) = queue.pop() {
            match schemas.entry(schema.name.as_str()) {
                Entry::Occupied(known) if *known.get() != schema => {
                    return Err(ContractError::DuplicateSchema {
                        name: schema.name.clone(),
                    });
                }
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(schema);
                }
            }
            queue.extend(schema.definitions.iter());
        }
        Ok(Self {
            schemas,
            stack: Vec::new(),
            pending_refs: BTreeSet::new(),
        })
    }

    fn lookup(&self, name: &str, path: &str) -> Result<&'a Schema, ContractError> {
        self.schemas
            .get(name)
            .copied()
            .ok_or_else(|| ContractError::UnknownSchema {
                path: path.to_string(),
                name: name.to_string(),
            })
    }

    fn compile_fields(
        &mut self,
        schema: &Schema,
        base: &str,
    ) -> Result<Vec<FieldContract>, ContractError> {
        if schema.fields.is_empty() {
            return Err(ContractError::EmptySchema {
                schema: schema.name.clone(),
            });
        }

        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(schema.fields.len());
        for field in &schema.fields {
            if !seen.insert(field.name.as_str()) {
                return Err(ContractError::DuplicateField {
                    schema: schema.name.clone(),
                    field: field.name.clone(),
                });
            }
            out.push(self.compile_field(field, base)?);
        }
        Ok(out)
    }

    fn compile_field(&mut self, field: &Field, base: &str) -> Result<FieldContract, ContractError> {
        let json_path = format!("{base}.{}", field.name);
        let ty = self.compile_type(&field.ty, &json_path, false)?;
        Ok(FieldContract {
            name: field.name.clone(),
            json_path,
            ty,
            required: field.is_required(),
            description: field.description.clone(),
        })
    }

    fn compile_type(
        &mut self,
        desc: &TypeDescriptor,
        path: &str,
        indirect: bool,
    ) -> Result<ContractType, ContractError> {
        match desc {
            TypeDescriptor::Primitive { primitive } => Ok(ContractType::Primitive {
                primitive: *primitive,
            }),
            TypeDescriptor::List { items } => Ok(ContractType::List {
                items: Box::new(self.compile_type(items, &format!("{path}[*]"), true)?),
            }),
            TypeDescriptor::Optional { inner } => Ok(ContractType::Optional {
                inner: Box::new(self.compile_type(inner, path, true)?),
            }),
            TypeDescriptor::Opaque { type_name } => Err(ContractError::UnsupportedType {
                path: path.to_string(),
                type_name: type_name.clone(),
            }),
            TypeDescriptor::Nested { schema: name } => {
                let target = self.lookup(name, path)?;

                if let Some(pos) = self.stack.iter().position(|f| &f.schema == name) {
                    let broken =
                        indirect || self.stack[pos + 1..].iter().any(|f| f.via_indirection);
                    if !broken {
                        let mut cycle: Vec<String> =
                            self.stack[pos..].iter().map(|f| f.schema.clone()).collect();
                        cycle.push(name.clone());
                        return Err(ContractError::CyclicSchema { cycle });
                    }
                    self.pending_refs.insert(name.clone());
                    return Ok(ContractType::Ref {
                        schema: name.clone(),
                    });
                }

                self.stack.push(Frame {
                    schema: name.clone(),
                    via_indirection: indirect,
                });
                let fields = self.compile_fields(target, path);
                self.stack.pop();
                Ok(ContractType::Nested {
                    schema: name.clone(),
                    fields: fields?,
                })
            }
        }
    }
}

// ── Wire rendering ───────────────────────────────────────────────────────────

fn render_wire(
    fields: &[FieldContract],
    definitions: &BTreeMap<String, Vec<FieldContract>>,
) -> serde_json::Result<String> {
    let mut wire = serde_json::to_value(fields)?;
    if !definitions.is_empty() {
        let defs = definitions
            .iter()
            .map(|(name, fields)| serde_json::to_value(fields).map(|v| (name.as_str(), v)))
            .collect::<serde_json::Result<HashMap<_, _>>>()?;
        inline_refs(&mut wire, &defs, &mut HashSet::new());
    }
    serde_json::to_string(&wire)
}

/// Pre-order walk that gives the first `ref` node of each schema a `fields`
/// array holding that schema's definition.
fn inline_refs(node: &mut Value, defs: &HashMap<&str, Value>, inlined: &mut HashSet<String>) {
    match node {
        Value::Array(items) => {
            for item in items {
                inline_refs(item, defs, inlined);
            }
        }
        Value::Object(map) if map.get("kind").and_then(Value::as_str) == Some("ref") => {
            let (name, mut fields) = match map.get("schema").and_then(Value::as_str) {
                Some(name) if !inlined.contains(name) => match defs.get(name) {
                    Some(def) => (name.to_string(), def.clone()),
                    None => return,
                },
                _ => return,
            };
            inlined.insert(name);
            inline_refs(&mut fields, defs, inlined);
            map.insert("fields".into(), fields);
        }
        Value::Object(map) => {
            for value in map.values_mut() {
                inline_refs(value, defs, inlined);
            }
        }
        _ => {}
    }
}

// ── JSON Schema rendering ────────────────────────────────────────────────────

fn object_schema(fields: &[FieldContract]) -> Map<String, Value> {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in fields {
        let mut prop = match type_schema(&field.ty) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(desc) = &field.description {
            prop.insert("description".into(), Value::String(desc.clone()));
        }
        if field.required {
            required.push(Value::String(field.name.clone()));
        } else {
            prop.insert("default".into(), Value::Null);
        }
        properties.insert(field.name.clone(), Value::Object(prop));
    }

    let mut schema = Map::new();
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), Value::Object(properties));
    schema.insert("required".into(), Value::Array(required));
    schema
}

fn type_schema(ty: &ContractType) -> Value {
    match ty {
        ContractType::Primitive { primitive } => json!({ "type": primitive.json_type() }),
        ContractType::List { items } => json!({ "type": "array", "items": type_schema(items) }),
        ContractType::Nested { fields, .. } => Value::Object(object_schema(fields)),
        ContractType::Optional { inner } => {
            json!({ "anyOf": [type_schema(inner), { "type": "null" }] })
        }
        ContractType::Ref { schema } => json!({ "$ref": format!("#/$defs/{schema}") }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use serde_json::json;

    fn invoice() -> Schema {
        Schema::new("Invoice")
            .field(
                Field::new("invoice_number", TypeDescriptor::string())
                    .description("The invoice number"),
            )
            .field(Field::new("total", TypeDescriptor::number()).description("Total amount"))
            .field(
                Field::new("po_number", TypeDescriptor::optional(TypeDescriptor::string()))
                    .default_null()
                    .description("PO number"),
            )
            .field(Field::new(
                "line_items",
                TypeDescriptor::list(TypeDescriptor::nested("LineItem")),
            ))
            .define(
                Schema::new("LineItem")
                    .field(Field::new("description", TypeDescriptor::string()))
                    .field(Field::new("amount", TypeDescriptor::number())),
            )
    }

    #[test]
    fn required_and_optional_fields() {
        let contract = Contract::compile(&invoice()).unwrap();
        let by_name: HashMap<_, _> =
            contract.fields().iter().map(|f| (f.name.as_str(), f)).collect();

        assert!(by_name["total"].required);
        assert!(!by_name["po_number"].required);
        assert_eq!(by_name["po_number"].kind(), TypeKind::OptionalWrapped);
        assert_eq!(
            contract.required_fields().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            vec!["invoice_number", "total", "line_items"]
        );
    }

    #[test]
    fn field_order_is_declaration_order() {
        let contract = Contract::compile(&invoice()).unwrap();
        let names: Vec<_> = contract.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["invoice_number", "total", "po_number", "line_items"]);
    }

    #[test]
    fn list_of_nested_paths() {
        let contract = Contract::compile(&invoice()).unwrap();
        let items = &contract.fields()[3];
        assert_eq!(items.kind(), TypeKind::List);
        let nested = items.nested().unwrap();
        assert_eq!(nested[1].json_path, "$.line_items[*].amount");
    }

    #[test]
    fn opaque_type_is_rejected() {
        let schema = Schema::new("Receipt")
            .field(Field::new("issued_at", TypeDescriptor::opaque("datetime")));
        let err = Contract::compile(&schema).unwrap_err();
        assert_eq!(
            err,
            ContractError::UnsupportedType {
                path: "$.issued_at".into(),
                type_name: "datetime".into()
            }
        );
    }

    #[test]
    fn direct_self_reference_is_cyclic() {
        let schema = Schema::new("Node")
            .field(Field::new("value", TypeDescriptor::integer()))
            .field(Field::new("next", TypeDescriptor::nested("Node")));
        let err = Contract::compile(&schema).unwrap_err();
        assert_eq!(
            err,
            ContractError::CyclicSchema {
                cycle: vec!["Node".into(), "Node".into()]
            }
        );
    }

    #[test]
    fn mutual_reference_without_indirection_is_cyclic() {
        let schema = Schema::new("A")
            .field(Field::new("b", TypeDescriptor::nested("B")))
            .define(Schema::new("B").field(Field::new("a", TypeDescriptor::nested("A"))));
        let err = Contract::compile(&schema).unwrap_err();
        assert_eq!(err.code(), "CYCLIC_SCHEMA");
    }

    #[test]
    fn list_indirection_breaks_cycle() {
        let schema = Schema::new("Category")
            .field(Field::new("name", TypeDescriptor::string()))
            .field(Field::new(
                "children",
                TypeDescriptor::list(TypeDescriptor::nested("Category")),
            ));
        let contract = Contract::compile(&schema).unwrap();
        assert_eq!(
            contract.fields()[1].ty,
            ContractType::List {
                items: Box::new(ContractType::Ref {
                    schema: "Category".into()
                })
            }
        );
        assert_eq!(contract.definition("Category").unwrap().len(), 2);
    }

    #[test]
    fn indirection_earlier_in_cycle_breaks_it() {
        let schema = Schema::new("A")
            .field(Field::new("bs", TypeDescriptor::list(TypeDescriptor::nested("B"))))
            .define(Schema::new("B").field(Field::new("a", TypeDescriptor::nested("A"))));
        let contract = Contract::compile(&schema).unwrap();
        assert!(contract.definition("A").is_some());
    }

    #[test]
    fn optional_indirection_breaks_cycle() {
        let schema = Schema::new("Node")
            .field(Field::new("value", TypeDescriptor::integer()))
            .field(
                Field::new("next", TypeDescriptor::optional(TypeDescriptor::nested("Node")))
                    .default_null(),
            );
        let contract = Contract::compile(&schema).unwrap();
        let next = &contract.fields()[1];
        assert!(!next.required);
        assert_eq!(
            next.ty,
            ContractType::Optional {
                inner: Box::new(ContractType::Ref {
                    schema: "Node".into()
                })
            }
        );
        assert_eq!(contract.definition("Node").unwrap()[0].json_path, "$.value");
    }

    #[test]
    fn conflicting_schema_definitions_rejected() {
        let schema = Schema::new("A")
            .field(Field::new("b", TypeDescriptor::nested("B")))
            .define(Schema::new("B").field(Field::new("x", TypeDescriptor::string())))
            .define(Schema::new("B").field(Field::new("y", TypeDescriptor::integer())));
        assert_eq!(
            Contract::compile(&schema).unwrap_err(),
            ContractError::DuplicateSchema { name: "B".into() }
        );
    }

    #[test]
    fn definition_shadowing_root_rejected() {
        let schema = Schema::new("A")
            .field(Field::new("b", TypeDescriptor::nested("B")))
            .define(
                Schema::new("B")
                    .field(Field::new("a", TypeDescriptor::list(TypeDescriptor::nested("A")))),
            )
            .define(Schema::new("A").field(Field::new("other", TypeDescriptor::string())));
        assert_eq!(Contract::compile(&schema).unwrap_err().code(), "DUPLICATE_SCHEMA");
    }

    #[test]
    fn identical_repeated_definition_is_accepted() {
        let line = Schema::new("Line").field(Field::new("amount", TypeDescriptor::number()));
        let schema = Schema::new("Doc")
            .field(Field::new("lines", TypeDescriptor::list(TypeDescriptor::nested("Line"))))
            .define(line.clone())
            .define(line);
        assert!(Contract::compile(&schema).is_ok());
    }

    #[test]
    fn unknown_and_empty_schemas() {
        let unknown = Schema::new("A").field(Field::new("x", TypeDescriptor::nested("Missing")));
        assert_eq!(Contract::compile(&unknown).unwrap_err().code(), "UNKNOWN_SCHEMA");

        let empty = Schema::new("Empty");
        assert_eq!(Contract::compile(&empty).unwrap_err().code(), "EMPTY_SCHEMA");
    }

    #[test]
    fn duplicate_field_names_rejected() {
        let schema = Schema::new("A")
            .field(Field::new("x", TypeDescriptor::string()))
            .field(Field::new("x", TypeDescriptor::integer()));
        assert_eq!(Contract::compile(&schema).unwrap_err().code(), "DUPLICATE_FIELD");
    }

    #[test]
    fn wire_json_shape() {
        let contract = Contract::compile(&invoice()).unwrap();
        let wire: Value = serde_json::from_str(contract.wire_json()).unwrap();
        assert_eq!(
            wire[1],
            json!({
                "name": "total",
                "json_path": "$.total",
                "type": {"kind": "primitive", "primitive": "number"},
                "required": true,
                "description": "Total amount"
            })
        );
        assert_eq!(wire[2]["type"]["kind"], "optional");
        assert_eq!(wire[2]["required"], false);
    }

    fn collect_refs<'v>(node: &'v Value, out: &mut Vec<&'v Map<String, Value>>) {
        match node {
            Value::Array(items) => items.iter().for_each(|item| collect_refs(item, out)),
            Value::Object(map) => {
                if map.get("kind") == Some(&json!("ref")) {
                    out.push(map);
                }
                map.values().for_each(|value| collect_refs(value, out));
            }
            _ => {}
        }
    }

    /// Every `ref` in `wire` names a schema whose fields travel in the same document.
    fn assert_refs_resolve(wire: &Value) {
        let mut refs = Vec::new();
        collect_refs(wire, &mut refs);
        assert!(!refs.is_empty());
        for r in &refs {
            let name = &r["schema"];
            let carriers = refs
                .iter()
                .filter(|other| &other["schema"] == name && other.contains_key("fields"))
                .count();
            assert_eq!(carriers, 1, "schema {name} inlined {carriers} times");
        }
    }

    #[test]
    fn recursive_wire_carries_definitions() {
        let schema = Schema::new("Category")
            .field(Field::new("name", TypeDescriptor::string()))
            .field(Field::new(
                "children",
                TypeDescriptor::list(TypeDescriptor::nested("Category")),
            ));
        let contract = Contract::compile(&schema).unwrap();
        let wire: Value = serde_json::from_str(contract.wire_json()).unwrap();
        assert!(wire.is_array());
        assert_refs_resolve(&wire);

        let inlined = &wire[1]["type"]["items"];
        assert_eq!(inlined["kind"], "ref");
        assert_eq!(inlined["schema"], "Category");
        assert_eq!(inlined["fields"][0]["name"], "name");
        assert_eq!(inlined["fields"][0]["required"], true);
        // The copy inside the definition points back without repeating it.
        assert_eq!(
            inlined["fields"][1]["type"]["items"],
            json!({"kind": "ref", "schema": "Category"})
        );
    }

    #[test]
    fn mutually_recursive_wire_carries_definitions() {
        let schema = Schema::new("A")
            .field(Field::new("bs", TypeDescriptor::list(TypeDescriptor::nested("B"))))
            .define(
                Schema::new("B")
                    .field(Field::new("a", TypeDescriptor::nested("A")))
                    .field(Field::new("label", TypeDescriptor::string())),
            );
        let contract = Contract::compile(&schema).unwrap();
        let wire: Value = serde_json::from_str(contract.wire_json()).unwrap();
        assert_refs_resolve(&wire);
        assert_eq!(wire[0]["type"]["items"]["fields"][0]["type"]["fields"][0]["name"], "bs");
    }

    #[test]
    fn plain_wire_has_no_refs() {
        let contract = Contract::compile(&invoice()).unwrap();
        assert!(!contract.wire_json().contains("\"ref\""));
    }

    #[test]
    fn json_schema_required_list_and_no_titles() {
        let contract = Contract::compile(&invoice()).unwrap();
        let schema = contract.to_json_schema();
        assert_eq!(schema["required"], json!(["invoice_number", "total", "line_items"]));
        assert_eq!(schema["properties"]["po_number"]["default"], Value::Null);
        assert_eq!(
            schema["properties"]["line_items"]["items"]["required"],
            json!(["description", "amount"])
        );
        assert!(!schema.to_string().contains("\"title\""));
    }

    #[test]
    fn recursive_json_schema_uses_defs() {
        let schema = Schema::new("Category")
            .field(Field::new("name", TypeDescriptor::string()))
            .field(Field::new(
                "children",
                TypeDescriptor::list(TypeDescriptor::nested("Category")),
            ));
        let json_schema = Contract::compile(&schema).unwrap().to_json_schema();
        assert_eq!(
            json_schema["properties"]["children"]["items"],
            json!({"$ref": "#/$defs/Category"})
        );
        assert_eq!(json_schema["$defs"]["Category"]["type"], "object");
        assert_eq!(json_schema["$defs"]["Category"]["required"], json!(["name", "children"]));
    }
}
