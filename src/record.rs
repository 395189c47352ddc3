//! In-memory records for the "accept" path: a record not yet persisted, or
//! a dry run of a filter against a handful of known records.

use crate::schema::{CustomFieldId, FIELD_SEPARATOR};
use crate::value::FieldValue;
use std::collections::{BTreeSet, HashMap};

pub type RecordId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationLink {
    pub relation_type: String,
    pub object: RecordId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub record_type: String,
    /// Regular fields by name; foreign keys hold a `FieldValue::Ref`
    pub fields: HashMap<String, FieldValue>,
    pub properties: BTreeSet<String>,
    /// Relations where this record is the subject
    pub relations: Vec<RelationLink>,
    pub custom_values: HashMap<CustomFieldId, FieldValue>,
}

impl Record {
    pub fn new(id: RecordId, record_type: &str) -> Self {
        Self {
            id,
            record_type: record_type.to_string(),
            fields: HashMap::new(),
            properties: BTreeSet::new(),
            relations: Vec::new(),
            custom_values: HashMap::new(),
        }
    }

    pub fn with(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    pub fn with_property(mut self, property_type: &str) -> Self {
        self.properties.insert(property_type.to_string());
        self
    }

    pub fn with_relation(mut self, relation_type: &str, object: RecordId) -> Self {
        self.relations.push(RelationLink {
            relation_type: relation_type.to_string(),
            object,
        });
        self
    }

    pub fn with_custom(
        mut self,
        custom_field: CustomFieldId,
        value: impl Into<FieldValue>,
    ) -> Self {
        self.custom_values.insert(custom_field, value.into());
        self
    }

    pub fn get(&self, field: &str) -> FieldValue {
        self.fields.get(field).cloned().unwrap_or(FieldValue::Null)
    }

    pub fn custom(&self, custom_field: CustomFieldId) -> FieldValue {
        self.custom_values
            .get(&custom_field)
            .cloned()
            .unwrap_or(FieldValue::Null)
    }

    /// Value at the end of a field path, following foreign keys through
    /// `source`. A broken or empty link yields `Null`.
    pub fn lookup(&self, path: &str, source: &dyn RecordSource) -> FieldValue {
        let mut parts = path.split(FIELD_SEPARATOR).peekable();
        let mut current = self;

        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                return current.get(part);
            }
            current = match current.fields.get(part) {
                Some(FieldValue::Ref(id)) => match source.record(*id) {
                    Some(next) => next,
                    None => return FieldValue::Null,
                },
                _ => return FieldValue::Null,
            };
        }
        FieldValue::Null
    }

    pub fn related(&self, relation_type: &str) -> impl Iterator<Item = RecordId> + '_ {
        let relation_type = relation_type.to_string();
        self.relations
            .iter()
            .filter(move |r| r.relation_type == relation_type)
            .map(|r| r.object)
    }
}

/// Where related records are fetched from during in-memory evaluation.
pub trait RecordSource {
    fn record(&self, id: RecordId) -> Option<&Record>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: HashMap<RecordId, Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: Record) -> &mut Self {
        self.records.insert(record.id, record);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records of a type, in id order.
    pub fn of_type<'a>(&'a self, record_type: &'a str) -> Vec<&'a Record> {
        let mut records: Vec<_> = self
            .records
            .values()
            .filter(|r| r.record_type == record_type)
            .collect();
        records.sort_by_key(|r| r.id);
        records
    }
}

impl RecordSource for MemoryStore {
    fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .insert(Record::new(1, "documents.folder").with("title", "Evangelion"))
            .insert(
                Record::new(2, "documents.document")
                    .with("title", "Unit 01")
                    .with("folder", FieldValue::Ref(1)),
            )
            .insert(
                Record::new(3, "persons.contact")
                    .with("last_name", "Ikari")
                    .with("image", FieldValue::Ref(2)),
            );
        store
    }

    #[test]
    fn test_lookup_follows_foreign_keys() {
        let store = store();
        let shinji = store.record(3).unwrap();
        assert_eq!(shinji.lookup("last_name", &store), FieldValue::text("Ikari"));
        assert_eq!(shinji.lookup("image__title", &store), FieldValue::text("Unit 01"));
        assert_eq!(shinji.lookup("image__folder__title", &store), FieldValue::text("Evangelion"));
    }

    #[test]
    fn test_lookup_broken_links_are_null() {
        let store = store();
        let orphan = Record::new(4, "persons.contact").with("image", FieldValue::Ref(99));
        assert_eq!(orphan.lookup("image__title", &store), FieldValue::Null);
        assert_eq!(orphan.lookup("first_name", &store), FieldValue::Null);
    }

    #[test]
    fn test_of_type_is_sorted() {
        let mut store = store();
        store.insert(Record::new(0, "persons.contact"));
        let ids: Vec<_> = store.of_type("persons.contact").iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![0, 3]);
    }
}
