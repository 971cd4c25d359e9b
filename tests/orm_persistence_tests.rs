/// ORM persistence tests
///
/// Unit of work, optimistic locking, lazy loading and relations.
/// Run with: cargo test --test orm_persistence_tests

use serde_json::json;
use umi::config::CollectionConfig;
use umi::storage::{Assignment, Condition, SelectQuery};
use umi::{ObjectState, Orm, UmiError, Value};

fn collections() -> Vec<CollectionConfig> {
    serde_json::from_value(json!([
        {
            "name": "rubric",
            "fields": [
                {"name": "title", "type": "string"},
                {"name": "news", "type": "hasMany", "target": "news", "targetField": "rubric"}
            ],
            "types": {"base": {"fields": ["title"]}}
        },
        {
            "name": "news",
            "fields": [
                {"name": "title", "type": "string", "validators": [{"type": "required"}]},
                {"name": "views", "type": "integer", "default": 0},
                {"name": "rubric", "type": "belongsTo", "target": "rubric"},
                {"name": "created", "type": "created"},
                {"name": "updated", "type": "updated"},
                {"name": "link", "type": "formula", "expression": "/news/{id}"}
            ],
            "types": {
                "base": {"fields": ["title", "views", "rubric", "created", "updated", "link"]}
            }
        }
    ]))
    .unwrap()
}

fn setup() -> Orm {
    let mut orm = Orm::new("en-US");
    orm.load_collections(collections()).unwrap();
    assert_eq!(orm.install().unwrap(), 2);
    orm
}

fn stored_count(orm: &Orm, table: &str) -> usize {
    orm.connections()
        .get("default")
        .unwrap()
        .count(&SelectQuery::new(table))
        .unwrap()
}

#[test]
fn test_insert_assigns_identity_and_system_values() {
    let mut orm = setup();
    let key = orm.add("news", "base").unwrap();
    orm.set(key, "title", "Hello").unwrap();
    assert_eq!(orm.object(key).unwrap().state(), ObjectState::New);

    let report = orm.commit().unwrap();
    assert_eq!(report.inserted, 1);

    let object = orm.object(key).unwrap();
    let id = object.id().unwrap();
    assert_eq!(object.state(), ObjectState::Persisted);
    assert_eq!(object.version(), 1);
    assert_eq!(orm.get(key, "link").unwrap(), Value::from(format!("/news/{}", id)));
    assert!(!orm.get(key, "created").unwrap().is_null());
    assert_eq!(orm.get(key, "views").unwrap(), Value::Integer(0));
    assert_eq!(stored_count(&orm, "news"), 1);
}

#[test]
fn test_commit_increments_version_and_clears_modified() {
    let mut orm = setup();
    let key = orm.add("news", "base").unwrap();
    orm.set(key, "title", "Hello").unwrap();
    orm.commit().unwrap();

    orm.set(key, "title", "Hello again").unwrap();
    assert!(orm.object(key).unwrap().is_modified());
    assert!(orm.persister().modified_objects().contains(&key));

    let report = orm.commit().unwrap();
    assert_eq!(report.updated, 1);

    let object = orm.object(key).unwrap();
    assert_eq!(object.version(), 2);
    assert!(!object.is_modified());
    assert!(!object.property("title").unwrap().is_modified());
    assert!(orm.persister().is_empty());

    let mut session = orm.session();
    let id = orm.object(key).unwrap().id().unwrap();
    let reloaded = session.get_by_id("news", id).unwrap();
    assert_eq!(session.get(reloaded, "title").unwrap(), Value::from("Hello again"));
    assert_eq!(session.object(reloaded).unwrap().version(), 2);
}

#[test]
fn test_setting_the_same_value_back_is_not_a_change() {
    let mut orm = setup();
    let key = orm.add("news", "base").unwrap();
    orm.set(key, "title", "Hello").unwrap();
    orm.commit().unwrap();

    orm.set(key, "title", "Changed").unwrap();
    orm.set(key, "title", "Hello").unwrap();
    assert!(!orm.object(key).unwrap().property("title").unwrap().is_modified());
}

#[test]
fn test_stale_version_fails_with_out_of_date() {
    let mut orm = setup();
    let key = orm.add("news", "base").unwrap();
    orm.set(key, "title", "Original").unwrap();
    orm.commit().unwrap();
    let id = orm.object(key).unwrap().id().unwrap();

    // another writer bumps the stored version
    let affected = orm
        .connections()
        .get("default")
        .unwrap()
        .update(
            "news",
            &[("version".to_string(), Assignment::Increment(1))],
            &Condition::equals("id", id),
        )
        .unwrap();
    assert_eq!(affected, 1);

    orm.set(key, "title", "Mine").unwrap();
    let err = orm.commit().unwrap_err();
    assert!(err.is_out_of_date(), "unexpected error: {err}");

    let object = orm.object(key).unwrap();
    assert_eq!(object.version(), 1);
    assert!(object.is_modified());
    assert_eq!(object.value("title").unwrap(), &Value::from("Mine"));
    assert!(orm.persister().modified_objects().contains(&key));

    let mut session = orm.session();
    let stored = session.get_by_id("news", id).unwrap();
    assert_eq!(session.get(stored, "title").unwrap(), Value::from("Original"));
    assert_eq!(session.object(stored).unwrap().version(), 2);
}

#[test]
fn test_concurrent_sessions_second_writer_loses() {
    let mut first = setup();
    let key = first.add("news", "base").unwrap();
    first.set(key, "title", "Original").unwrap();
    first.commit().unwrap();
    let id = first.object(key).unwrap().id().unwrap();

    let mut second = first.session();
    let theirs = second.get_by_id("news", id).unwrap();
    second.set(theirs, "views", 10).unwrap();
    second.commit().unwrap();

    first.set(key, "views", 20).unwrap();
    assert!(matches!(first.commit(), Err(UmiError::OutOfDate(_))));

    first.rollback().unwrap();
    first.unload(key).unwrap();
    let fresh = first.get_by_id("news", id).unwrap();
    assert_eq!(first.get(fresh, "views").unwrap(), Value::Integer(10));
    first.set(fresh, "views", 20).unwrap();
    first.commit().unwrap();
    assert_eq!(first.object(fresh).unwrap().version(), 3);
}

#[test]
fn test_failed_commit_writes_nothing() {
    let mut orm = setup();
    let valid = orm.add("news", "base").unwrap();
    orm.set(valid, "title", "Fine").unwrap();
    let invalid = orm.add("news", "base").unwrap();

    match orm.commit() {
        Err(UmiError::InvalidObjects(guids)) => {
            assert_eq!(guids, vec![orm.object(invalid).unwrap().guid().to_string()]);
        }
        other => panic!("expected invalid objects, got {other:?}"),
    }
    assert!(orm.object(invalid).unwrap().errors().contains_key("title"));
    assert_eq!(stored_count(&orm, "news"), 0);
    assert!(orm.object(valid).unwrap().is_new());

    orm.set(invalid, "title", "Now valid").unwrap();
    assert_eq!(orm.commit().unwrap().inserted, 2);
}

#[test]
fn test_rollback_restores_loaded_values() {
    let mut orm = setup();
    let key = orm.add("news", "base").unwrap();
    orm.set(key, "title", "Kept").unwrap();
    orm.commit().unwrap();

    orm.set(key, "title", "Dropped").unwrap();
    let new_key = orm.add("news", "base").unwrap();
    orm.rollback().unwrap();

    assert_eq!(orm.get(key, "title").unwrap(), Value::from("Kept"));
    assert!(!orm.object(key).unwrap().is_modified());
    assert!(!orm.contains(new_key));
    assert!(orm.persister().is_empty());
}

#[test]
fn test_lazy_loading_of_unselected_properties() {
    let mut orm = setup();
    let key = orm.add("news", "base").unwrap();
    orm.set(key, "title", "Lazy").unwrap();
    orm.set(key, "views", 7).unwrap();
    orm.commit().unwrap();

    let mut session = orm.session();
    let found = session
        .select("news")
        .unwrap()
        .fields(&["title"])
        .result(&mut session)
        .unwrap()
        .fetch(&mut session)
        .unwrap()
        .unwrap();
    let object = session.object(found).unwrap();
    assert!(object.property("title").unwrap().is_loaded());
    assert!(!object.property("views").unwrap().is_loaded());
    assert!(object.value("views").is_err());

    assert_eq!(session.get(found, "views").unwrap(), Value::Integer(7));
    assert!(session.object(found).unwrap().property("views").unwrap().is_loaded());
}

#[test]
fn test_identity_map_returns_the_same_object() {
    let mut orm = setup();
    let key = orm.add("news", "base").unwrap();
    orm.set(key, "title", "Once").unwrap();
    orm.commit().unwrap();
    let id = orm.object(key).unwrap().id().unwrap();
    let guid = orm.object(key).unwrap().guid().to_string();

    assert_eq!(orm.get_by_id("news", id).unwrap(), key);
    assert_eq!(orm.get_by_guid("news", &guid).unwrap(), key);
    assert!(matches!(
        orm.get_by_guid("rubric", &guid),
        Err(UmiError::NotAllowedOperation(_))
    ));
    assert!(matches!(
        orm.get_by_id("news", id + 100),
        Err(UmiError::NonexistentEntity(_))
    ));
}

#[test]
fn test_relations_between_new_objects() {
    let mut orm = setup();
    let rubric = orm.add("rubric", "base").unwrap();
    orm.set(rubric, "title", "Sport").unwrap();
    let first = orm.add("news", "base").unwrap();
    orm.set(first, "title", "Match").unwrap();
    orm.set_related(first, "rubric", Some(rubric)).unwrap();
    let second = orm.add("news", "base").unwrap();
    orm.set(second, "title", "Transfer").unwrap();
    orm.set_related(second, "rubric", Some(rubric)).unwrap();
    orm.commit().unwrap();

    let rubric_id = orm.object(rubric).unwrap().id().unwrap();
    assert_eq!(orm.get(first, "rubric").unwrap(), Value::Integer(rubric_id));

    let mut session = orm.session();
    let news_id = orm.object(first).unwrap().id().unwrap();
    let news = session.get_by_id("news", news_id).unwrap();
    let target = session.related(news, "rubric").unwrap().unwrap();
    assert_eq!(session.get(target, "title").unwrap(), Value::from("Sport"));
    assert_eq!(session.has_many(target, "news").unwrap().len(), 2);

    assert!(matches!(
        orm.set_related(first, "rubric", Some(second)),
        Err(UmiError::NotAllowedOperation(_))
    ));
}

#[test]
fn test_relation_target_created_after_referrer() {
    let mut orm = setup();
    let news = orm.add("news", "base").unwrap();
    orm.set(news, "title", "Early bird").unwrap();
    let rubric = orm.add("rubric", "base").unwrap();
    orm.set(rubric, "title", "Late").unwrap();
    orm.set_related(news, "rubric", Some(rubric)).unwrap();

    let report = orm.commit().unwrap();
    assert_eq!(report.inserted, 2);

    let rubric_id = orm.object(rubric).unwrap().id().unwrap();
    assert_eq!(orm.get(news, "rubric").unwrap(), Value::Integer(rubric_id));

    let mut session = orm.session();
    let stored = session.get_by_id("news", orm.object(news).unwrap().id().unwrap()).unwrap();
    let target = session.related(stored, "rubric").unwrap().unwrap();
    assert_eq!(session.get(target, "title").unwrap(), Value::from("Late"));
}

#[test]
fn test_delete_removes_the_row() {
    let mut orm = setup();
    let key = orm.add("news", "base").unwrap();
    orm.set(key, "title", "Short lived").unwrap();
    orm.commit().unwrap();
    let id = orm.object(key).unwrap().id().unwrap();

    assert!(matches!(
        orm.delete("rubric", key),
        Err(UmiError::NotAllowedOperation(_))
    ));
    orm.delete("news", key).unwrap();
    assert!(orm.object(key).unwrap().is_deleted());
    assert!(matches!(
        orm.set(key, "title", "Too late"),
        Err(UmiError::NotAllowedOperation(_))
    ));

    assert_eq!(orm.commit().unwrap().deleted, 1);
    assert!(!orm.contains(key));
    assert_eq!(stored_count(&orm, "news"), 0);
    assert!(orm.get_by_id("news", id).is_err());
}

#[test]
fn test_deleting_a_new_object_forgets_it() {
    let mut orm = setup();
    let key = orm.add("news", "base").unwrap();
    orm.delete("news", key).unwrap();
    assert!(!orm.contains(key));
    assert!(orm.persister().is_empty());
}

#[test]
fn test_read_only_and_type_checked_properties() {
    let mut orm = setup();
    let key = orm.add("news", "base").unwrap();
    assert!(matches!(
        orm.set(key, "version", 5),
        Err(UmiError::ReadOnlyEntity(_))
    ));
    assert!(matches!(
        orm.set(key, "views", "many"),
        Err(UmiError::UnexpectedValue(_))
    ));
    assert!(orm.set(key, "missing", 1).is_err());
}

#[test]
fn test_unload_requires_committed_state() {
    let mut orm = setup();
    let key = orm.add("news", "base").unwrap();
    assert!(matches!(orm.unload(key), Err(UmiError::NotAllowedOperation(_))));
    assert!(orm.unload_all().is_err());

    orm.set(key, "title", "Saved").unwrap();
    orm.commit().unwrap();
    orm.unload_all().unwrap();
    assert!(!orm.contains(key));
}
