use entity_filter::record::{MemoryStore, Record};
use entity_filter::schema::{
    CustomField, CustomFieldType, FieldDescriptor, FieldKind, RecordType, RelationType, Schema,
};
use entity_filter::users::{Directory, User};
use entity_filter::value::{parse_date, parse_datetime, FieldValue};
use entity_filter::{
    Condition, ConditionKind, EngineConfig, EvalContext, FilterError, FilterPayload, FilterStore,
    OperatorId, SqlCompiler, StoredCondition, ValidationError,
};
use serde_json::{json, Value as Json};

const EMPLOYED_BY: &str = "persons-subject_employed_by";
const CUSTOMER_OF: &str = "persons-subject_customer_supplier";

fn schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .add_record_type(
            RecordType::new("persons.contact", "Contact")
                .with_field(FieldDescriptor::new("first_name", "First name", FieldKind::String))
                .with_field(FieldDescriptor::new("last_name", "Last name", FieldKind::String))
                .with_field(
                    FieldDescriptor::new("creation_year", "Creation year", FieldKind::Year)
                        .nullable(),
                )
                .with_field(
                    FieldDescriptor::new("birthday", "Birthday", FieldKind::Date).nullable(),
                ),
        )
        .add_record_type(
            RecordType::new("persons.organisation", "Organisation")
                .with_field(FieldDescriptor::new("name", "Name", FieldKind::String))
                .with_field(
                    FieldDescriptor::new("capital", "Capital", FieldKind::Integer).nullable(),
                ),
        )
        .add_relation_type(RelationType {
            id: EMPLOYED_BY.into(),
            label: "is an employee of".into(),
            symmetric: "persons-object_employed_by".into(),
            subject_types: vec!["persons.contact".into()],
            object_types: vec!["persons.organisation".into()],
            enabled: true,
        })
        .add_relation_type(RelationType {
            id: CUSTOMER_OF.into(),
            label: "is a customer of".into(),
            symmetric: "persons-object_customer_supplier".into(),
            subject_types: vec![],
            object_types: vec![],
            enabled: true,
        })
        .add_custom_field(CustomField {
            id: 1,
            record_type: "persons.contact".into(),
            name: "Height".into(),
            field_type: CustomFieldType::Int,
            is_deleted: false,
        })
        .add_custom_field(CustomField {
            id: 2,
            record_type: "persons.contact".into(),
            name: "First contact".into(),
            field_type: CustomFieldType::Date,
            is_deleted: false,
        });
    schema
}

fn directory() -> Directory {
    let mut directory = Directory::new();
    directory
        .add(User::new(1, "misato"))
        .add(User::new(2, "ritsuko"))
        .add(User::team(10, "operations", &[1]))
        .add(User::team(11, "science", &[2]));
    directory
}

fn ctx() -> EvalContext {
    EvalContext::new(parse_datetime("2024-06-15T10:00:00").unwrap())
}

fn field(name: &str, operator: OperatorId, values: Json) -> StoredCondition {
    StoredCondition::new(
        ConditionKind::Field,
        name,
        json!({"operator": operator.as_u8(), "values": values}),
    )
}

fn payload(id: &str, record_type: &str, conditions: Vec<StoredCondition>) -> FilterPayload {
    FilterPayload {
        id: id.to_string(),
        name: format!("Filter {}", id),
        record_type: record_type.to_string(),
        is_custom: true,
        is_private: false,
        owner: None,
        use_or: false,
        conditions,
    }
}

fn date(s: &str) -> FieldValue {
    FieldValue::Date(parse_date(s).unwrap())
}

fn contact(id: u64) -> Record {
    Record::new(id, "persons.contact")
}

fn organisation(id: u64, name: &str) -> Record {
    Record::new(id, "persons.organisation").with("name", name)
}

/// Ids of the records of the filter's type it accepts.
fn matching(store: &FilterStore<'_>, records: &MemoryStore, filter_id: &str) -> Vec<u64> {
    let filter = store.get(filter_id).unwrap();
    records
        .of_type(&filter.record_type)
        .into_iter()
        .filter(|r| store.evaluate_in_memory(filter, r, records, &ctx()).unwrap())
        .map(|r| r.id)
        .collect()
}

#[test]
fn test_iequals_on_last_name() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    store
        .create(&payload(
            "ikari",
            "persons.contact",
            vec![field("last_name", OperatorId::IEquals, json!(["Ikari"]))],
        ))
        .unwrap();

    let mut records = MemoryStore::new();
    records
        .insert(contact(1).with("last_name", "Ikari"))
        .insert(contact(2).with("last_name", "IKARI"))
        .insert(contact(3).with("last_name", "Ikarie"))
        .insert(contact(4).with("last_name", "Katsuragi"));

    assert_eq!(matching(&store, &records, "ikari"), vec![1, 2]);

    let compiler = SqlCompiler::new(&config, &store);
    let sql = compiler.compile_sql(store.get("ikari").unwrap(), &ctx()).unwrap().sql;
    assert!(sql.ends_with(r#"WHERE LOWER("base"."last_name") = 'ikari'"#), "{}", sql);
}

#[test]
fn test_use_or_against_use_and() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    let conditions = vec![
        field("capital", OperatorId::Gt, json!([10000])),
        field("name", OperatorId::Contains, json!(["NERV"])),
    ];
    let mut any = payload("any", "persons.organisation", conditions.clone());
    any.use_or = true;
    store.create(&any).unwrap();
    store.create(&payload("all", "persons.organisation", conditions)).unwrap();

    let mut records = MemoryStore::new();
    records
        .insert(organisation(1, "NERV").with("capital", 50000i64))
        .insert(organisation(2, "NERV Japan").with("capital", 100i64))
        .insert(organisation(3, "SEELE").with("capital", 90000i64))
        .insert(organisation(4, "Wille"))
        .insert(organisation(5, "nerv").with("capital", 10000i64));

    assert_eq!(matching(&store, &records, "any"), vec![1, 2, 3]);
    assert_eq!(matching(&store, &records, "all"), vec![1]);
}

#[test]
fn test_relation_subfilter_next_to_another_relation() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    store
        .create(&payload(
            "rich",
            "persons.organisation",
            vec![field("capital", OperatorId::Gt, json!([10000]))],
        ))
        .unwrap();
    store
        .create(&payload(
            "employees",
            "persons.contact",
            vec![
                StoredCondition::new(
                    ConditionKind::RelationSubfilter,
                    EMPLOYED_BY,
                    json!({"has": true, "filter_id": "rich"}),
                ),
                StoredCondition::new(
                    ConditionKind::Relation,
                    CUSTOMER_OF,
                    json!({"has": true}),
                ),
            ],
        ))
        .unwrap();

    let mut records = MemoryStore::new();
    records
        .insert(organisation(10, "NERV").with("capital", 50000i64))
        .insert(organisation(11, "Ramen shop").with("capital", 500i64))
        // employed by a rich organisation and customer of another one
        .insert(
            contact(1)
                .with_relation(EMPLOYED_BY, 11)
                .with_relation(EMPLOYED_BY, 10)
                .with_relation(CUSTOMER_OF, 11),
        )
        // only the relation to the poor organisation
        .insert(
            contact(2)
                .with_relation(EMPLOYED_BY, 11)
                .with_relation(CUSTOMER_OF, 10),
        )
        // not a customer of anybody
        .insert(contact(3).with_relation(EMPLOYED_BY, 10));

    assert_eq!(matching(&store, &records, "employees"), vec![1]);

    let compiler = SqlCompiler::new(&config, &store);
    let sql = compiler.compile_sql(store.get("employees").unwrap(), &ctx()).unwrap().sql;
    assert!(!sql.contains("JOIN"), "{}", sql);
    assert_eq!(sql.matches("EXISTS").count(), 2, "{}", sql);
    assert_eq!(sql.matches(r#"FROM "creme_core_relation""#).count(), 2, "{}", sql);
}

#[test]
fn test_current_year_plus() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    store
        .create(&payload(
            "soon",
            "persons.contact",
            vec![field("creation_year", OperatorId::CurrentYearPlus, json!([2]))],
        ))
        .unwrap();

    let mut records = MemoryStore::new();
    records
        .insert(contact(1).with("creation_year", 2025i64))
        .insert(contact(2).with("creation_year", 2026i64))
        .insert(contact(3).with("creation_year", 2027i64))
        .insert(contact(4));

    assert_eq!(matching(&store, &records, "soon"), vec![2]);

    let compiler = SqlCompiler::new(&config, &store);
    let sql = compiler.compile_sql(store.get("soon").unwrap(), &ctx()).unwrap().sql;
    assert!(sql.ends_with(r#"WHERE "base"."creation_year" = 2026"#), "{}", sql);
}

#[test]
fn test_cycles_are_rejected() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    let last_name = field("last_name", OperatorId::Equals, json!(["Ikari"]));
    let sub = |id: &str| StoredCondition::new(ConditionKind::Subfilter, id, Json::Null);

    store.create(&payload("f3", "persons.contact", vec![last_name.clone()])).unwrap();
    store.create(&payload("f2", "persons.contact", vec![sub("f3")])).unwrap();
    store.create(&payload("f1", "persons.contact", vec![sub("f2")])).unwrap();

    let err = store.set_conditions("f3", &[last_name, sub("f1")]).unwrap_err();
    assert!(matches!(err, FilterError::Validation(ValidationError::Cycle { .. })), "{:?}", err);
    // nothing changed
    assert_eq!(store.get("f3").unwrap().conditions.len(), 1);
}

#[test]
fn test_private_subfilter_of_another_team() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    let mut science = payload(
        "science",
        "persons.contact",
        vec![field("last_name", OperatorId::Equals, json!(["Akagi"]))],
    );
    science.is_private = true;
    science.owner = Some(11);
    store.create(&science).unwrap();

    let mut operations = payload(
        "operations",
        "persons.contact",
        vec![field("last_name", OperatorId::Equals, json!(["Katsuragi"]))],
    );
    operations.is_private = true;
    operations.owner = Some(10);
    store.create(&operations).unwrap();

    let err = store
        .set_conditions(
            "operations",
            &[StoredCondition::new(ConditionKind::Subfilter, "science", Json::Null)],
        )
        .unwrap_err();
    match err {
        FilterError::Validation(ValidationError::PrivateSubfilter { subfilter, .. }) => {
            assert_eq!(subfilter, "science")
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn test_set_conditions_is_idempotent() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    store
        .create(&payload(
            "f",
            "persons.contact",
            vec![field("first_name", OperatorId::Equals, json!(["Shinji"]))],
        ))
        .unwrap();
    let conditions = [
        field("last_name", OperatorId::IStartsWith, json!(["ika"])),
        StoredCondition::new(
            ConditionKind::Relation,
            EMPLOYED_BY,
            json!({"has": false}),
        ),
    ];

    let mut compiled = Vec::new();
    for _ in 0..2 {
        store.set_conditions("f", &conditions).unwrap();
        let compiler = SqlCompiler::new(&config, &store);
        compiled.push(compiler.compile_sql(store.get("f").unwrap(), &ctx()).unwrap().sql);
    }
    assert_eq!(compiled[0], compiled[1]);
}

#[test]
fn test_stored_conditions_round_trip() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    store
        .create(&payload(
            "rich",
            "persons.organisation",
            vec![field("capital", OperatorId::Gte, json!([1]))],
        ))
        .unwrap();
    let stored = vec![
        field("first_name", OperatorId::IContains, json!(["shin", "ji"])),
        StoredCondition::new(ConditionKind::Relation, CUSTOMER_OF, json!({"has": true})),
        StoredCondition::new(
            ConditionKind::RelationSubfilter,
            EMPLOYED_BY,
            json!({"has": false, "filter_id": "rich"}),
        ),
    ];
    let filter = store.create(&payload("f", "persons.contact", stored)).unwrap().clone();

    let ctx = store.build_context("persons.contact");
    for condition in &filter.conditions {
        let decoded = Condition::from_stored(&ctx, &condition.to_stored()).unwrap();
        assert_eq!(&decoded, condition);
    }
    let json = serde_json::to_string(&filter.to_payload()).unwrap();
    let payload: FilterPayload = serde_json::from_str(&json).unwrap();
    assert_eq!(payload, filter.to_payload());
}

#[test]
fn test_evaluation_of_a_missing_field_is_null() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    store
        .create(&payload(
            "not_ikari",
            "persons.contact",
            vec![field("last_name", OperatorId::EqualsNot, json!(["Ikari"]))],
        ))
        .unwrap();

    let mut records = MemoryStore::new();
    records
        .insert(contact(1).with("last_name", FieldValue::text("Ikari")))
        .insert(contact(2).with("last_name", "Soryu"));
    assert_eq!(matching(&store, &records, "not_ikari"), vec![2]);
}

#[test]
fn test_relation_subfilter_ignores_objects_of_other_types() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    store
        .create(&payload(
            "nerv",
            "persons.organisation",
            vec![field("name", OperatorId::Equals, json!(["NERV"]))],
        ))
        .unwrap();
    store
        .create(&payload(
            "nerv_customers",
            "persons.contact",
            vec![StoredCondition::new(
                ConditionKind::RelationSubfilter,
                CUSTOMER_OF,
                json!({"has": true, "filter_id": "nerv"}),
            )],
        ))
        .unwrap();

    let mut records = MemoryStore::new();
    records
        .insert(organisation(10, "NERV"))
        // a contact carrying the same value is not an organisation
        .insert(contact(20).with("name", "NERV"))
        .insert(contact(1).with_relation(CUSTOMER_OF, 20))
        .insert(contact(2).with_relation(CUSTOMER_OF, 10));

    assert_eq!(matching(&store, &records, "nerv_customers"), vec![2]);

    let compiler = SqlCompiler::new(&config, &store);
    let sql = compiler.compile_sql(store.get("nerv_customers").unwrap(), &ctx()).unwrap().sql;
    assert!(
        sql.contains(concat!(
            r#""sub_1"."object_entity_id" IN "#,
            r#"(SELECT "sub_2"."id" FROM "persons_organisation" AS "sub_2""#,
        )),
        "{}",
        sql
    );
}

#[test]
fn test_custom_field_condition() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    store
        .create(&payload(
            "tall",
            "persons.contact",
            vec![StoredCondition::new(
                ConditionKind::CustomField,
                "1",
                json!({"operator": OperatorId::Gt.as_u8(), "values": [150]}),
            )],
        ))
        .unwrap();

    let mut records = MemoryStore::new();
    records
        .insert(contact(1).with_custom(1, 180i64))
        .insert(contact(2).with_custom(1, 150i64))
        .insert(contact(3))
        .insert(contact(4).with_custom(1, 151i64));

    assert_eq!(matching(&store, &records, "tall"), vec![1, 4]);

    let compiler = SqlCompiler::new(&config, &store);
    let sql = compiler.compile_sql(store.get("tall").unwrap(), &ctx()).unwrap().sql;
    assert!(
        sql.contains(r#"EXISTS (SELECT 1 FROM "creme_core_customfieldinteger" AS "sub_1""#),
        "{}",
        sql
    );
    assert!(sql.contains(r#""sub_1"."entity_id" = "base"."id""#), "{}", sql);
    assert!(sql.contains(r#""sub_1"."custom_field_id" = 1"#), "{}", sql);
    assert!(sql.contains(r#""sub_1"."value" > 150"#), "{}", sql);
}

#[test]
fn test_date_custom_field_condition() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    store
        .create(&payload(
            "met_this_year",
            "persons.contact",
            vec![StoredCondition::new(
                ConditionKind::DateCustomField,
                "2",
                json!({"name": "current_year"}),
            )],
        ))
        .unwrap();

    let mut records = MemoryStore::new();
    records
        .insert(contact(1).with_custom(2, date("2024-01-01")))
        .insert(contact(2).with_custom(2, date("2023-12-31")))
        .insert(contact(3).with_custom(2, date("2024-12-31")))
        .insert(contact(4));

    assert_eq!(matching(&store, &records, "met_this_year"), vec![1, 3]);

    let compiler = SqlCompiler::new(&config, &store);
    let sql = compiler.compile_sql(store.get("met_this_year").unwrap(), &ctx()).unwrap().sql;
    assert!(sql.contains(r#"FROM "creme_core_customfielddate" AS "sub_1""#), "{}", sql);
    assert!(sql.contains(r#""sub_1"."custom_field_id" = 2"#), "{}", sql);
    assert!(sql.contains(r#""sub_1"."value" >= '2024-01-01'"#), "{}", sql);
    assert!(sql.contains(r#""sub_1"."value" <= '2024-12-31'"#), "{}", sql);
}

#[test]
fn test_date_field_condition() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    store
        .create(&payload(
            "june",
            "persons.contact",
            vec![StoredCondition::new(
                ConditionKind::DateField,
                "birthday",
                json!({"start": "2024-06-01", "end": "2024-06-30"}),
            )],
        ))
        .unwrap();
    store
        .create(&payload(
            "no_birthday",
            "persons.contact",
            vec![StoredCondition::new(
                ConditionKind::DateField,
                "birthday",
                json!({"name": "empty"}),
            )],
        ))
        .unwrap();

    let mut records = MemoryStore::new();
    records
        .insert(contact(1).with("birthday", date("2024-06-06")))
        .insert(contact(2).with("birthday", date("2024-06-30")))
        .insert(contact(3).with("birthday", date("2024-07-01")))
        .insert(contact(4));

    assert_eq!(matching(&store, &records, "june"), vec![1, 2]);
    assert_eq!(matching(&store, &records, "no_birthday"), vec![4]);

    let compiler = SqlCompiler::new(&config, &store);
    let sql = compiler.compile_sql(store.get("june").unwrap(), &ctx()).unwrap().sql;
    assert!(sql.contains(r#""base"."birthday" >= '2024-06-01'"#), "{}", sql);
    assert!(sql.contains(r#""base"."birthday" <= '2024-06-30'"#), "{}", sql);
    let sql = compiler.compile_sql(store.get("no_birthday").unwrap(), &ctx()).unwrap().sql;
    assert!(sql.ends_with(r#"WHERE "base"."birthday" IS NULL"#), "{}", sql);
}

#[test]
fn test_relation_to_an_entity_or_a_record_type() {
    let (schema, directory, config) = (schema(), directory(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    let relation = |value: Json| StoredCondition::new(ConditionKind::Relation, CUSTOMER_OF, value);
    store
        .create(&payload(
            "of_nerv",
            "persons.contact",
            vec![relation(json!({"has": true, "entity_id": 10}))],
        ))
        .unwrap();
    store
        .create(&payload(
            "of_organisations",
            "persons.contact",
            vec![relation(json!({"has": true, "ct": "persons.organisation"}))],
        ))
        .unwrap();
    store
        .create(&payload(
            "not_of_nerv",
            "persons.contact",
            vec![relation(json!({"has": false, "entity_id": 10}))],
        ))
        .unwrap();

    let mut records = MemoryStore::new();
    records
        .insert(organisation(10, "NERV"))
        .insert(organisation(11, "SEELE"))
        .insert(contact(1).with_relation(CUSTOMER_OF, 10))
        .insert(contact(2).with_relation(CUSTOMER_OF, 11))
        .insert(contact(3).with_relation(CUSTOMER_OF, 1))
        .insert(contact(4));

    assert_eq!(matching(&store, &records, "of_nerv"), vec![1]);
    assert_eq!(matching(&store, &records, "of_organisations"), vec![1, 2]);
    assert_eq!(matching(&store, &records, "not_of_nerv"), vec![2, 3, 4]);

    let compiler = SqlCompiler::new(&config, &store);
    let sql = compiler.compile_sql(store.get("of_nerv").unwrap(), &ctx()).unwrap().sql;
    assert!(sql.contains(r#""sub_1"."type_id" = 'persons-subject_customer_supplier'"#), "{}", sql);
    assert!(sql.contains(r#""sub_1"."object_entity_id" = 10"#), "{}", sql);

    let sql = compiler.compile_sql(store.get("of_organisations").unwrap(), &ctx()).unwrap().sql;
    assert!(sql.contains(r#"FROM "creme_core_cremeentity" AS "sub_2""#), "{}", sql);
    assert!(sql.contains(r#""sub_2"."id" = "sub_1"."object_entity_id""#), "{}", sql);
    assert!(sql.contains(r#""sub_2"."entity_type" = 'persons.organisation'"#), "{}", sql);

    let sql = compiler.compile_sql(store.get("not_of_nerv").unwrap(), &ctx()).unwrap().sql;
    assert!(sql.contains("WHERE NOT EXISTS"), "{}", sql);
}
