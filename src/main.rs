use anyhow::{Context, Result};
use entity_filter::schema::{
    CustomField, CustomFieldType, FieldDescriptor, FieldKind, PropertyType, RecordType,
    RelationType, Schema,
};
use entity_filter::users::Directory;
use entity_filter::{EngineConfig, EvalContext, FilterPayload, FilterStore, Searcher, SqlCompiler};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const HELP: &str = "\
  <words>            search the current record type
  {...}              create a filter from a JSON payload and print its SQL
  :type <id>         change the record type searched
  :filters           list the filters created so far
  :quit              leave";

/// Engine configuration from the first argument, or the default one.
fn load_config() -> EngineConfig {
    let Some(path) = std::env::args().nth(1) else {
        return EngineConfig::default();
    };
    match EngineConfig::from_json_file(&path) {
        Ok(config) => {
            info!(%path, "configuration loaded");
            config
        }
        Err(e) => {
            warn!(%path, error = %e, "cannot load configuration, using defaults");
            EngineConfig::default()
        }
    }
}

/// Schema from the second argument, or a small built-in one.
fn load_schema() -> Result<Schema> {
    match std::env::args().nth(2) {
        Some(path) => {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading schema {}", path))?;
            serde_json::from_str(&content).with_context(|| format!("parsing schema {}", path))
        }
        None => Ok(demo_schema()),
    }
}

fn demo_schema() -> Schema {
    let mut schema = Schema::new();
    schema
        .add_record_type(
            RecordType::new("persons.contact", "Contact")
                .with_field(FieldDescriptor::new("first_name", "First name", FieldKind::String))
                .with_field(FieldDescriptor::new("last_name", "Last name", FieldKind::String))
                .with_field(FieldDescriptor::new("email", "Email", FieldKind::String).nullable())
                .with_field(
                    FieldDescriptor::new("birthday", "Birthday", FieldKind::Date).nullable(),
                )
                .with_field(FieldDescriptor::new("user", "Owner", FieldKind::User)),
        )
        .add_record_type(
            RecordType::new("persons.organisation", "Organisation")
                .with_field(FieldDescriptor::new("name", "Name", FieldKind::String))
                .with_field(
                    FieldDescriptor::new("capital", "Capital", FieldKind::Integer).nullable(),
                )
                .with_field(FieldDescriptor::new("user", "Owner", FieldKind::User)),
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

fn create_filter(store: &mut FilterStore<'_>, config: &EngineConfig, line: &str) -> Result<()> {
    let payload: FilterPayload = serde_json::from_str(line).context("invalid filter payload")?;
    let id = store.create(&payload)?.id.clone();
    let store: &FilterStore<'_> = store;
    let filter = store.get(&id)?;
    let compiler = SqlCompiler::new(config, store);
    let result = compiler.compile_sql(filter, &EvalContext::now())?;

    println!("{}", result.sql);
    for opt in &result.optimizations {
        println!("  optimization: {:?}", opt);
    }
    for dropped in &result.dropped {
        println!("  dropped: {}", dropped);
    }
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = load_config();
    let schema = load_schema()?;
    let directory = Directory::new();
    let mut store = FilterStore::new(&schema, &directory, &config);
    let searcher = Searcher::new(&schema, &directory, &config);
    let mut record_type = String::from("persons.contact");

    println!("--- entity filters: search strings and filter payloads to SQL ---");
    println!("{}", HELP);

    let mut rl = DefaultEditor::new()?;
    loop {
        let line = match rl.readline(&format!("{}> ", record_type)) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        if line == ":quit" {
            break;
        } else if line == ":filters" {
            for filter in store.filters() {
                println!(
                    "  {} ({}): {} condition(s)",
                    filter.id,
                    filter.record_type,
                    filter.conditions.len()
                );
            }
        } else if let Some(id) = line.strip_prefix(":type") {
            let id = id.trim();
            match schema.record_type(id) {
                Ok(_) => record_type = id.to_string(),
                Err(e) => println!("error: {}", e),
            }
        } else if line.starts_with('{') {
            if let Err(e) = create_filter(&mut store, &config, line) {
                println!("error: {:#}", e);
            }
        } else {
            match searcher.search_sql(&record_type, line, None) {
                Ok(Some(sql)) => println!("{}", sql),
                Ok(None) => println!("{} cannot be searched", record_type),
                Err(e) => println!("error: {}", e),
            }
        }
    }
    Ok(())
}
