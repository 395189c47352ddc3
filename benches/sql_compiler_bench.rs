use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use entity_filter::schema::{
    CustomField, CustomFieldType, FieldDescriptor, FieldKind, PropertyType, RecordType,
    RelationType, Schema,
};
use entity_filter::users::Directory;
use entity_filter::{
    Cell, ConditionKind, EngineConfig, EvalContext, FilterPayload, FilterStore, SearchConfigItem,
    Searcher, SqlCompiler, StoredCondition,
};
use serde_json::json;
use std::hint::black_box;

fn schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .add_record_type(
            RecordType::new("persons.contact", "Contact")
                .with_field(FieldDescriptor::new("first_name", "First name", FieldKind::String))
                .with_field(FieldDescriptor::new("last_name", "Last name", FieldKind::String))
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
            id: "persons-subject_employed_by".into(),
            label: "is an employee of".into(),
            symmetric: "persons-object_employed_by".into(),
            subject_types: vec!["persons.contact".into()],
            object_types: vec!["persons.organisation".into()],
            enabled: true,
        })
        .add_property_type(PropertyType {
            id: "persons-is_vip".into(),
            text: "is a VIP".into(),
            subject_types: vec![],
            enabled: true,
        })
        .add_custom_field(CustomField {
            id: 1,
            record_type: "persons.contact".into(),
            name: "Hobby".into(),
            field_type: CustomFieldType::String,
            is_deleted: false,
        });
    schema
}

fn payload(id: &str, record_type: &str, conditions: Vec<StoredCondition>) -> FilterPayload {
    FilterPayload {
        id: id.to_string(),
        name: id.to_string(),
        record_type: record_type.to_string(),
        is_custom: true,
        is_private: false,
        owner: None,
        use_or: false,
        conditions,
    }
}

fn filters() -> Vec<(&'static str, FilterPayload)> {
    vec![
        (
            "simple",
            payload(
                "simple",
                "persons.contact",
                vec![StoredCondition::new(
                    ConditionKind::Field,
                    "last_name",
                    json!({"operator": 1, "values": ["Ikari"]}),
                )],
            ),
        ),
        (
            "or_to_in",
            payload(
                "or_to_in",
                "persons.contact",
                vec![StoredCondition::new(
                    ConditionKind::Field,
                    "last_name",
                    json!({
                        "operator": 1,
                        "values": ["Ikari", "Soryu", "Ayanami", "Katsuragi", "Akagi", "Suzuhara"],
                    }),
                )],
            ),
        ),
        (
            "relations",
            payload(
                "relations",
                "persons.contact",
                vec![
                    StoredCondition::new(
                        ConditionKind::RelationSubfilter,
                        "persons-subject_employed_by",
                        json!({"has": true, "filter_id": "big"}),
                    ),
                    StoredCondition::new(ConditionKind::Property, "persons-is_vip", json!(true)),
                    StoredCondition::new(
                        ConditionKind::CustomField,
                        "1",
                        json!({"operator": 6, "values": ["golf"]}),
                    ),
                    StoredCondition::new(
                        ConditionKind::DateField,
                        "birthday",
                        json!({"name": "current_year"}),
                    ),
                ],
            ),
        ),
    ]
}

fn benchmark_filter_compilation(c: &mut Criterion) {
    let (schema, directory, config) = (schema(), Directory::new(), EngineConfig::default());
    let mut store = FilterStore::new(&schema, &directory, &config);
    store
        .create(&payload(
            "big",
            "persons.organisation",
            vec![StoredCondition::new(
                ConditionKind::Field,
                "capital",
                json!({"operator": 9, "values": [10000]}),
            )],
        ))
        .expect("sub-filter");
    let cases = filters();
    for (_, p) in &cases {
        store.create(p).expect("benchmark filter");
    }

    let compiler = SqlCompiler::new(&config, &store);
    let ctx = EvalContext::now();
    let mut group = c.benchmark_group("filter_compilation");

    for (name, p) in &cases {
        let filter = store.get(&p.id).expect("created above");
        group.bench_with_input(BenchmarkId::new("compile_sql", name), filter, |b, filter| {
            b.iter(|| black_box(compiler.compile_sql(black_box(filter), &ctx).expect("compiles")))
        });
    }

    group.finish();
}

fn benchmark_filter_building(c: &mut Criterion) {
    let (schema, directory, config) = (schema(), Directory::new(), EngineConfig::default());
    let store = FilterStore::new(&schema, &directory, &config);
    let (_, simple) = &filters()[0];

    c.bench_function("validate_and_build", |b| {
        b.iter(|| black_box(store.validate_and_build(black_box(simple)).expect("valid")))
    });
}

fn benchmark_search(c: &mut Criterion) {
    let (schema, directory, config) = (schema(), Directory::new(), EngineConfig::default());
    let mut searcher = Searcher::new(&schema, &directory, &config);
    searcher.add_item(SearchConfigItem::new(
        "persons.contact",
        vec![
            Cell::RegularField("first_name".into()),
            Cell::RegularField("last_name".into()),
            Cell::CustomField(1),
            Cell::Relation("persons-subject_employed_by".into()),
        ],
    ));

    let queries = vec![
        ("one_word", "ikari"),
        ("three_words", "shinji ikari nerv"),
        ("phrase", r#""tokyo 3" nerv"#),
    ];

    let mut group = c.benchmark_group("search");
    for (name, query) in queries {
        group.bench_with_input(BenchmarkId::new("search_sql", name), &query, |b, &query| {
            b.iter(|| {
                let sql = searcher.search_sql("persons.contact", black_box(query), None);
                black_box(sql.expect("searchable"))
            })
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    benchmark_filter_compilation,
    benchmark_filter_building,
    benchmark_search
);
criterion_main!(benches);
