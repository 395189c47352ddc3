//! Record type metadata: fields, custom fields, relation and property types.
//!
//! A [`Schema`] is built once at start-up and handed by reference to the
//! condition builder, the compiler and the searcher. Nothing here is global.

use crate::error::{FilterError, Result, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Separator of the components of a field path (`image__name`).
pub const FIELD_SEPARATOR: &str = "__";

/// Record type every other type is assignable to.
pub const BASE_ENTITY_TYPE: &str = "creme_core.cremeentity";

pub type CustomFieldId = u32;
pub type EnumValueId = u64;

/// Concrete type of a regular field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "target")]
pub enum FieldKind {
    String,
    Text,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    /// Foreign key to another record type
    ForeignKey(String),
    User,
    Choices,
    Year,
    /// Id of a custom field enum value
    EnumValue,
}

/// Abstract type tag used to decide which operators apply to a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    String,
    Number,
    Date,
    Boolean,
    Fk,
    User,
    Enum,
    Year,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Date => "date",
            FieldType::Boolean => "boolean",
            FieldType::Fk => "fk",
            FieldType::User => "user",
            FieldType::Enum => "enum",
            FieldType::Year => "year",
        }
    }
}

/// A field type tag plus its nullability (`fk` vs `fk__null`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeTag {
    pub field_type: FieldType,
    pub nullable: bool,
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nullable {
            write!(f, "{}__null", self.field_type.as_str())
        } else {
            f.write_str(self.field_type.as_str())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    #[serde(default)]
    pub nullable: bool,
    /// Values only make sense as a whole (e-mail addresses...)
    #[serde(default)]
    pub exact_match: bool,
    /// Hidden by the fields configuration
    #[serde(default)]
    pub hidden: bool,
}

impl FieldDescriptor {
    pub fn new(name: &str, label: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind,
            nullable: false,
            exact_match: false,
            hidden: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn exact_match(mut self) -> Self {
        self.exact_match = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn type_tag(&self) -> TypeTag {
        let field_type = match &self.kind {
            FieldKind::String | FieldKind::Text => FieldType::String,
            FieldKind::Integer | FieldKind::Decimal => FieldType::Number,
            FieldKind::Boolean => FieldType::Boolean,
            FieldKind::Date | FieldKind::DateTime => FieldType::Date,
            FieldKind::ForeignKey(_) => FieldType::Fk,
            FieldKind::User => FieldType::User,
            FieldKind::Choices | FieldKind::EnumValue => FieldType::Enum,
            FieldKind::Year => FieldType::Year,
        };
        TypeTag {
            field_type,
            nullable: self.nullable,
        }
    }

    /// Store column holding the value; foreign keys follow the `<name>_id`
    /// convention.
    pub fn column(&self) -> String {
        match self.kind {
            FieldKind::ForeignKey(_) | FieldKind::User => format!("{}_id", self.name),
            _ => self.name.clone(),
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self.kind, FieldKind::Date | FieldKind::DateTime)
    }

    pub fn is_text(&self) -> bool {
        matches!(self.kind, FieldKind::String | FieldKind::Text)
    }

    /// Whether operand placeholders (`__currentuser__`) can replace a value.
    pub fn supports_operands(&self) -> bool {
        matches!(self.kind, FieldKind::User)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordType {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

impl RecordType {
    pub fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationType {
    pub id: String,
    pub label: String,
    /// Id of the inverse relation type
    pub symmetric: String,
    /// Allowed subject types; empty means any
    #[serde(default)]
    pub subject_types: Vec<String>,
    /// Allowed object types; empty means any
    #[serde(default)]
    pub object_types: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RelationType {
    pub fn accepts_subject(&self, schema: &Schema, record_type: &str) -> bool {
        self.subject_types.is_empty()
            || self
                .subject_types
                .iter()
                .any(|t| schema.is_assignable(record_type, t))
    }

    pub fn accepts_object(&self, schema: &Schema, record_type: &str) -> bool {
        self.object_types.is_empty()
            || self
                .object_types
                .iter()
                .any(|t| {
                    schema.is_assignable(record_type, t) || schema.is_assignable(t, record_type)
                })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyType {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub subject_types: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomFieldType {
    Int,
    Float,
    Bool,
    String,
    DateTime,
    Date,
    Enum,
    MultiEnum,
}

impl CustomFieldType {
    /// Name of the side table holding values of this type.
    pub fn value_table(&self) -> &'static str {
        match self {
            CustomFieldType::Int => "customfieldinteger",
            CustomFieldType::Float => "customfieldfloat",
            CustomFieldType::Bool => "customfieldboolean",
            CustomFieldType::String => "customfieldstring",
            CustomFieldType::DateTime => "customfielddatetime",
            CustomFieldType::Date => "customfielddate",
            CustomFieldType::Enum => "customfieldenum",
            CustomFieldType::MultiEnum => "customfieldmultienum",
        }
    }

    pub fn type_tag(&self) -> TypeTag {
        // custom fields are always optional
        let field_type = match self {
            CustomFieldType::Int | CustomFieldType::Float => FieldType::Number,
            CustomFieldType::Bool => FieldType::Boolean,
            CustomFieldType::String => FieldType::String,
            CustomFieldType::DateTime | CustomFieldType::Date => FieldType::Date,
            CustomFieldType::Enum | CustomFieldType::MultiEnum => FieldType::Enum,
        };
        TypeTag {
            field_type,
            nullable: true,
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, CustomFieldType::Date | CustomFieldType::DateTime)
    }

    pub fn is_enum(&self) -> bool {
        matches!(self, CustomFieldType::Enum | CustomFieldType::MultiEnum)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomField {
    pub id: CustomFieldId,
    pub record_type: String,
    pub name: String,
    pub field_type: CustomFieldType,
    #[serde(default)]
    pub is_deleted: bool,
}

impl CustomField {
    /// Regular-field view of the custom field, so that operators can
    /// validate values against it.
    pub fn as_field(&self) -> FieldDescriptor {
        let kind = match self.field_type {
            CustomFieldType::Int => FieldKind::Integer,
            CustomFieldType::Float => FieldKind::Decimal,
            CustomFieldType::Bool => FieldKind::Boolean,
            CustomFieldType::String => FieldKind::String,
            CustomFieldType::DateTime => FieldKind::DateTime,
            CustomFieldType::Date => FieldKind::Date,
            CustomFieldType::Enum | CustomFieldType::MultiEnum => FieldKind::EnumValue,
        };
        FieldDescriptor {
            name: self.id.to_string(),
            label: self.name.clone(),
            kind,
            nullable: true,
            exact_match: false,
            hidden: self.is_deleted,
        }
    }

    /// Abstract tag; enum-valued custom fields are compared by value id.
    pub fn type_tag(&self) -> TypeTag {
        self.field_type.type_tag()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomFieldEnumValue {
    pub id: EnumValueId,
    pub custom_field: CustomFieldId,
    pub value: String,
}

/// A field path resolved against the schema: the foreign keys to follow,
/// then the final field.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath<'a> {
    /// (foreign key field, record type it points to)
    pub hops: Vec<(&'a FieldDescriptor, &'a RecordType)>,
    pub field: &'a FieldDescriptor,
}

impl ResolvedPath<'_> {
    pub fn is_subfield(&self) -> bool {
        !self.hops.is_empty()
    }

    pub fn label(&self) -> String {
        self.hops
            .iter()
            .map(|(f, _)| f.label.as_str())
            .chain(std::iter::once(self.field.label.as_str()))
            .collect::<Vec<_>>()
            .join(" - ")
    }
}

/// Everything the engine knows about record types.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub record_types: BTreeMap<String, RecordType>,
    #[serde(default)]
    pub relation_types: BTreeMap<String, RelationType>,
    #[serde(default)]
    pub property_types: BTreeMap<String, PropertyType>,
    #[serde(default)]
    pub custom_fields: BTreeMap<CustomFieldId, CustomField>,
    #[serde(default)]
    pub enum_values: Vec<CustomFieldEnumValue>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_record_type(&mut self, record_type: RecordType) -> &mut Self {
        self.record_types.insert(record_type.id.clone(), record_type);
        self
    }

    pub fn add_relation_type(&mut self, relation_type: RelationType) -> &mut Self {
        self.relation_types
            .insert(relation_type.id.clone(), relation_type);
        self
    }

    pub fn add_property_type(&mut self, property_type: PropertyType) -> &mut Self {
        self.property_types
            .insert(property_type.id.clone(), property_type);
        self
    }

    pub fn add_custom_field(&mut self, custom_field: CustomField) -> &mut Self {
        self.custom_fields.insert(custom_field.id, custom_field);
        self
    }

    pub fn add_enum_value(&mut self, value: CustomFieldEnumValue) -> &mut Self {
        self.enum_values.push(value);
        self
    }

    pub fn record_type(&self, id: &str) -> Result<&RecordType> {
        self.record_types
            .get(id)
            .ok_or_else(|| FilterError::not_found("record type", id))
    }

    pub fn relation_type(&self, id: &str) -> Result<&RelationType> {
        self.relation_types
            .get(id)
            .ok_or_else(|| FilterError::not_found("relation type", id))
    }

    pub fn property_type(&self, id: &str) -> Result<&PropertyType> {
        self.property_types
            .get(id)
            .ok_or_else(|| FilterError::not_found("property type", id))
    }

    pub fn custom_field(&self, id: CustomFieldId) -> Result<&CustomField> {
        self.custom_fields
            .get(&id)
            .ok_or_else(|| FilterError::not_found("custom field", id))
    }

    pub fn enum_values_of(
        &self,
        custom_field: CustomFieldId,
    ) -> impl Iterator<Item = &CustomFieldEnumValue> {
        self.enum_values
            .iter()
            .filter(move |v| v.custom_field == custom_field)
    }

    /// Can a record of type `from` be used where `to` is expected?
    pub fn is_assignable(&self, from: &str, to: &str) -> bool {
        from == to || to == BASE_ENTITY_TYPE
    }

    /// Resolve `a__b__c` on a record type, following foreign keys.
    pub fn resolve_path<'a>(
        &'a self,
        record_type: &str,
        path: &str,
        max_depth: usize,
    ) -> Result<ResolvedPath<'a>> {
        let parts: Vec<&str> = path.split(FIELD_SEPARATOR).collect();
        if parts.len() > max_depth {
            return Err(ValidationError::FieldTooDeep {
                field: path.to_string(),
                max: max_depth,
            }
            .into());
        }

        let mut current = self.record_type(record_type)?;
        let mut hops = Vec::new();
        let last = parts.len() - 1;

        for (i, part) in parts.iter().enumerate() {
            let field = current.field(part).ok_or_else(|| {
                FilterError::not_found("field", format!("{}.{}", current.id, path))
            })?;

            if i == last {
                return Ok(ResolvedPath { hops, field });
            }

            match &field.kind {
                FieldKind::ForeignKey(target) => {
                    current = self.record_type(target)?;
                    hops.push((field, current));
                }
                _ => {
                    return Err(ValidationError::NotAForeignKey {
                        field: part.to_string(),
                    }
                    .into())
                }
            }
        }

        // `split` always yields at least one part
        Err(FilterError::not_found("field", path))
    }
}
