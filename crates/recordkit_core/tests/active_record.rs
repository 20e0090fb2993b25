//! End-to-end coverage of the settings/context/repository stack.

use std::collections::BTreeMap;
use std::fs;
use std::sync::{Arc, OnceLock};

use recordkit_core::record::Meta;
use recordkit_core::{
    Context, CoreError, CoreResult, FieldRegistry, Record, RecordId, Repository, Settings,
    Timestamp, Value, ENGINE_PATH_KEY,
};

#[derive(Debug, Clone, Default)]
struct Order {
    meta: Meta,
    status: String,
    note: Option<String>,
    total: i64,
}

impl Record for Order {
    const ENTITY: &'static str = "order";

    fn meta(&self) -> &Meta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut Meta {
        &mut self.meta
    }

    fn registry() -> &'static FieldRegistry<Self> {
        static REGISTRY: OnceLock<FieldRegistry<Order>> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            FieldRegistry::builder(Order::ENTITY)
                .field(
                    "status",
                    |o: &Order| o.status.clone(),
                    |o, v: String| o.status = v,
                )
                .field(
                    "note",
                    |o: &Order| o.note.clone(),
                    |o, v: Option<String>| o.note = v,
                )
                .field("total", |o: &Order| o.total, |o, v: i64| o.total = v)
                .build()
        })
    }
}

fn memory_context(dir: &tempfile::TempDir) -> Arc<Context> {
    let engine_props = dir.path().join("engine.properties");
    fs::write(&engine_props, "engine.kind = memory\nengine.entities = order\n").unwrap();

    let mut map = BTreeMap::new();
    map.insert(
        ENGINE_PATH_KEY.to_owned(),
        engine_props.display().to_string(),
    );
    Arc::new(Context::new(Settings::from_map(map)))
}

#[test]
fn settings_explicit_path_wins_over_workdir() {
    let dir = tempfile::tempdir().unwrap();
    let explicit = dir.path().join("explicit.properties");
    fs::write(&explicit, "flavor = vanilla\n").unwrap();

    let settings = Settings::builder()
        .override_path(&explicit)
        .file_name("no-such-file.properties")
        .embedded("flavor = chocolate\n")
        .load();
    assert_eq!(settings.get("flavor").as_deref(), Some("vanilla"));
}

#[test]
fn settings_fall_through_to_embedded_defaults() {
    let settings = Settings::builder()
        .env_var("RECORDKIT_TEST_UNSET_VAR")
        .file_name("no-such-file.properties")
        .embedded("flavor = chocolate\nretries = 3\n")
        .load();
    assert_eq!(settings.get("flavor").as_deref(), Some("chocolate"));
    assert_eq!(settings.get_int("retries", 0), 3);
}

#[test]
fn settings_reload_after_delete_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.properties");
    fs::write(&path, "flavor = vanilla\n").unwrap();

    let settings = Settings::builder()
        .override_path(&path)
        .env_var("RECORDKIT_TEST_UNSET_VAR")
        .file_name("no-such-file.properties")
        .load();
    assert_eq!(settings.get("flavor").as_deref(), Some("vanilla"));

    fs::remove_file(&path).unwrap();
    settings.reload();
    assert!(settings.get("flavor").is_none());
    assert!(settings.is_empty());
}

#[test]
fn context_builds_engine_from_settings_file() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = memory_context(&dir);
    let engine = ctx.engine().unwrap();
    assert_eq!(engine.entities(), vec!["order".to_owned()]);
    // The engine is built once and shared afterwards.
    assert!(Arc::ptr_eq(&engine, &ctx.engine().unwrap()));
}

#[test]
fn context_without_engine_settings_is_a_config_error() {
    let ctx = Context::new(Settings::from_map(BTreeMap::new()));
    assert!(matches!(ctx.engine(), Err(CoreError::Config { .. })));
}

#[test]
fn save_assigns_id_and_equal_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let repo: Repository<Order> = Repository::new(memory_context(&dir));

    let mut order = Order {
        status: "OPEN".to_owned(),
        total: 100,
        ..Order::default()
    };
    assert!(order.id().is_none());

    let id = repo.save(&mut order).unwrap();
    assert_eq!(order.id(), Some(id));
    assert_eq!(order.created(), order.changed());

    let loaded = repo.by_id(Some(id)).unwrap().unwrap();
    assert_eq!(loaded.status, "OPEN");
    assert_eq!(loaded.created(), order.created());
}

#[test]
fn update_moves_changed_but_not_created() {
    let dir = tempfile::tempdir().unwrap();
    let repo: Repository<Order> = Repository::new(memory_context(&dir));

    let mut order = Order {
        status: "OPEN".to_owned(),
        ..Order::default()
    };
    let id = repo.save(&mut order).unwrap();

    // Back-date the row so second-resolution clocks cannot mask the move.
    order.meta_mut().created = Some(Timestamp::from_secs(1_000));
    order.status = "SHIPPED".to_owned();
    repo.update(&mut order).unwrap();

    let loaded = repo.by_id(Some(id)).unwrap().unwrap();
    assert_eq!(loaded.status, "SHIPPED");
    assert_eq!(loaded.created(), Some(Timestamp::from_secs(1_000)));
    assert!(loaded.changed().unwrap().as_secs() > 1_000);
}

#[test]
fn update_fields_touches_exactly_the_named_fields() {
    let dir = tempfile::tempdir().unwrap();
    let repo: Repository<Order> = Repository::new(memory_context(&dir));

    let mut order = Order {
        status: "OPEN".to_owned(),
        total: 7,
        ..Order::default()
    };
    let id = repo.save(&mut order).unwrap();

    let touched = repo
        .update_fields(
            &mut order,
            &[
                ("status", Value::Text("PAID".into())),
                ("note", Value::Text("ok".into())),
            ],
        )
        .unwrap();
    assert_eq!(touched, 1);

    let loaded = repo.by_id(Some(id)).unwrap().unwrap();
    assert_eq!(loaded.status, "PAID");
    assert_eq!(loaded.note.as_deref(), Some("ok"));
    assert_eq!(loaded.total, 7);
}

#[test]
fn failed_unit_of_work_leaves_no_rows() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = memory_context(&dir);
    let repo: Repository<Order> = Repository::new(Arc::clone(&ctx));

    let result: CoreResult<()> = ctx.transaction(|unit| {
        let mut order = Order {
            status: "OPEN".to_owned(),
            ..Order::default()
        };
        let id = repo.save_in(unit, &mut order)?;
        assert!(id.as_i64() > 0);
        Err(CoreError::invalid_operation("deliberate failure"))
    });
    assert!(result.is_err());
    assert_eq!(repo.count().unwrap(), 0);

    // The context stays usable and later units commit normally.
    let mut order = Order {
        status: "OPEN".to_owned(),
        ..Order::default()
    };
    repo.save(&mut order).unwrap();
    assert_eq!(repo.count().unwrap(), 1);
}

#[test]
fn queries_compose_over_a_shared_context() {
    let dir = tempfile::tempdir().unwrap();
    let repo: Repository<Order> = Repository::new(memory_context(&dir));

    for (status, total) in [("OPEN", 30), ("PAID", 10), ("OPEN", 20), ("VOID", 5)] {
        let mut order = Order {
            status: status.to_owned(),
            total,
            ..Order::default()
        };
        repo.save(&mut order).unwrap();
    }

    assert_eq!(repo.count().unwrap(), 4);
    assert_eq!(
        repo.count_where("status = ?", &[Value::Text("OPEN".into())])
            .unwrap(),
        2
    );

    let big_open = repo
        .find(
            "status = ? and total >= ?",
            &[Value::Text("OPEN".into()), Value::Int(25)],
        )
        .unwrap();
    assert_eq!(big_open.len(), 1);
    assert_eq!(big_open[0].total, 30);

    let ordered = repo.find_all_ordered("order by total desc").unwrap();
    let totals: Vec<i64> = ordered.iter().map(|o| o.total).collect();
    assert_eq!(totals, [30, 20, 10, 5]);
}

#[test]
fn lazy_references_resolve_through_the_repository() {
    let dir = tempfile::tempdir().unwrap();
    let repo: Repository<Order> = Repository::new(memory_context(&dir));

    let mut order = Order {
        status: "OPEN".to_owned(),
        ..Order::default()
    };
    let id = repo.save(&mut order).unwrap();

    let mut reference = repo.load(Some(id));
    assert_eq!(reference.id(), Some(id));
    assert!(!reference.is_loaded());

    let resolved = repo.lazy(&mut reference).unwrap().unwrap();
    assert_eq!(resolved.status, "OPEN");

    let mut dangling = repo.load(Some(RecordId::new(9_999)));
    assert!(repo.lazy(&mut dangling).is_err());
}
