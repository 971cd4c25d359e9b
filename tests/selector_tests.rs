/// Selector tests
///
/// Filtering, grouping, paging, type restriction, localization and joins.
/// Run with: cargo test --test selector_tests

use serde_json::json;
use umi::config::CollectionConfig;
use umi::storage::Condition;
use umi::{Direction, GroupMode, ObjectKey, Orm, UmiError, Value};

fn collections() -> Vec<CollectionConfig> {
    serde_json::from_value(json!([
        {
            "name": "rubric",
            "fields": [{"name": "title", "type": "string"}],
            "types": {"base": {"fields": ["title"]}}
        },
        {
            "name": "news",
            "fields": [
                {
                    "name": "title",
                    "type": "string",
                    "localizations": {
                        "en-US": {"column": "title_en"},
                        "ru-RU": {"column": "title_ru"}
                    }
                },
                {"name": "subtitle", "type": "string"},
                {"name": "views", "type": "integer", "default": 0},
                {"name": "rubric", "type": "belongsTo", "target": "rubric"}
            ],
            "types": {
                "base": {"fields": ["title", "subtitle", "views", "rubric"]},
                "base.article": {"fields": []},
                "base.article.longread": {"fields": []}
            }
        }
    ]))
    .unwrap()
}

/// Five news items over two rubrics:
///
/// | title  | views | type                  | subtitle | rubric |
/// |--------|-------|-----------------------|----------|--------|
/// | Rust 1 | 5     | base                  | intro    | Tech   |
/// | Go     | 15    | base.article          |          | Life   |
/// | Rust 2 | 25    | base.article          | deep     | Tech   |
/// | Python | 35    | base.article.longread |          | Tech   |
/// | Rust 3 | 45    | base.article.longread |          | Tech   |
fn setup() -> Orm {
    let mut orm = Orm::new("en-US");
    orm.load_collections(collections()).unwrap();
    orm.install().unwrap();

    let tech = orm.add("rubric", "base").unwrap();
    orm.set(tech, "title", "Tech").unwrap();
    let life = orm.add("rubric", "base").unwrap();
    orm.set(life, "title", "Life").unwrap();

    let rows = [
        ("Rust 1", 5, "base", Some("intro"), tech),
        ("Go", 15, "base.article", None, life),
        ("Rust 2", 25, "base.article", Some("deep"), tech),
        ("Python", 35, "base.article.longread", None, tech),
        ("Rust 3", 45, "base.article.longread", None, tech),
    ];
    for (title, views, type_name, subtitle, rubric) in rows {
        let key = orm.add("news", type_name).unwrap();
        orm.set(key, "title", title).unwrap();
        orm.set(key, "views", views).unwrap();
        orm.set(key, "subtitle", subtitle).unwrap();
        orm.set_related(key, "rubric", Some(rubric)).unwrap();
    }
    let first = orm.select("news").unwrap().filter("views").equals(5);
    let first = first.result(&mut orm).unwrap().fetch(&mut orm).unwrap();
    assert!(first.is_none(), "nothing is stored before commit");
    orm.commit().unwrap();
    orm
}

fn titles(orm: &mut Orm, keys: &[ObjectKey]) -> Vec<String> {
    keys.iter()
        .map(|key| orm.get(*key, "title").unwrap().to_string())
        .collect()
}

#[test]
fn test_field_conditions() {
    let orm = setup();
    let count = |selector: umi::Selector| selector.total(&orm).unwrap();

    assert_eq!(count(orm.select("news").unwrap()), 5);
    assert_eq!(count(orm.select("news").unwrap().filter("views").more(20)), 3);
    assert_eq!(count(orm.select("news").unwrap().filter("views").equals_or_less(15)), 2);
    assert_eq!(count(orm.select("news").unwrap().filter("title").like("Rust%")), 3);
    assert_eq!(count(orm.select("news").unwrap().filter("views").in_([5, 45, 99])), 2);
    assert_eq!(count(orm.select("news").unwrap().filter("views").between(10, 30)), 2);
    assert_eq!(count(orm.select("news").unwrap().filter("subtitle").is_null()), 3);
    assert_eq!(count(orm.select("news").unwrap().filter("subtitle").is_not_null()), 2);
    assert_eq!(
        count(
            orm.select("news")
                .unwrap()
                .filter("title")
                .like("Rust%")
                .filter("views")
                .not_equals(25)
        ),
        2
    );
}

#[test]
fn test_or_group_inside_and() {
    let mut orm = setup();
    let selector = orm
        .select("news")
        .unwrap()
        .filter("title")
        .like("Rust%")
        .begin(GroupMode::Or)
        .filter("views")
        .less(10)
        .filter("views")
        .more(40)
        .end()
        .order_by("views", Direction::Asc);

    assert_eq!(selector.total(&orm).unwrap(), 2);
    let keys = selector.result(&mut orm).unwrap().keys(&mut orm).unwrap();
    assert_eq!(titles(&mut orm, &keys), vec!["Rust 1", "Rust 3"]);
}

#[test]
fn test_order_limit_offset() {
    let mut orm = setup();
    let selector = orm
        .select("news")
        .unwrap()
        .order_by("views", Direction::Desc)
        .limit(2)
        .offset(1);

    let mut result = selector.result(&mut orm).unwrap();
    assert_eq!(result.len(), 2);
    let keys = result.keys(&mut orm).unwrap();
    assert_eq!(titles(&mut orm, &keys), vec!["Python", "Rust 2"]);
    assert_eq!(selector.total(&orm).unwrap(), 5, "total ignores paging");

    assert!(result.fetch(&mut orm).unwrap().is_none());
    result.rewind();
    assert_eq!(result.fetch(&mut orm).unwrap(), Some(keys[0]));
}

#[test]
fn test_type_restriction() {
    let orm = setup();
    let count = |types: &[&str]| orm.select("news").unwrap().types(types).total(&orm).unwrap();

    assert_eq!(count(&["base"]), 1);
    assert_eq!(count(&["base.article"]), 2);
    assert_eq!(count(&["base.article*"]), 4);
    assert_eq!(count(&["base*"]), 5);
    assert_eq!(count(&["base", "base.article.longread"]), 3);
}

#[test]
fn test_selected_objects_share_the_identity_map() {
    let mut orm = setup();
    let by_title = orm
        .select("news")
        .unwrap()
        .filter("title")
        .equals("Go")
        .result(&mut orm)
        .unwrap()
        .fetch(&mut orm)
        .unwrap()
        .unwrap();
    let by_views = orm
        .select("news")
        .unwrap()
        .filter("views")
        .equals(15)
        .result(&mut orm)
        .unwrap()
        .fetch(&mut orm)
        .unwrap()
        .unwrap();
    assert_eq!(by_title, by_views);
}

#[test]
fn test_localized_field_follows_current_locale() {
    let mut orm = setup();
    let rust = orm
        .select("news")
        .unwrap()
        .filter("title")
        .equals("Rust 1")
        .result(&mut orm)
        .unwrap()
        .fetch(&mut orm)
        .unwrap()
        .unwrap();
    orm.set(rust, "title#ru-RU", "Раст 1").unwrap();
    orm.commit().unwrap();

    let mut russian = orm.session();
    russian.set_current_locale("ru-RU");
    let selector = russian.select("news").unwrap().filter("title").equals("Раст 1");
    assert_eq!(selector.total(&russian).unwrap(), 1);
    let key = selector
        .result(&mut russian)
        .unwrap()
        .fetch(&mut russian)
        .unwrap()
        .unwrap();
    assert_eq!(russian.get(key, "title").unwrap(), Value::from("Раст 1"));
    assert_eq!(russian.get(key, "title#en-US").unwrap(), Value::from("Rust 1"));

    let mut english = orm.session();
    let key = english.get_by_id("news", orm.object(rust).unwrap().id().unwrap()).unwrap();
    assert_eq!(english.get(key, "title").unwrap(), Value::from("Rust 1"));
    assert!(matches!(
        english.get(key, "title#de-DE"),
        Err(UmiError::NonexistentEntity(_))
    ));
}

#[test]
fn test_with_joins_the_relation() {
    let orm = setup();
    let rubric_id = {
        let mut session = orm.session();
        let go = session
            .select("news")
            .unwrap()
            .filter("title")
            .equals("Go")
            .result(&mut session)
            .unwrap()
            .fetch(&mut session)
            .unwrap()
            .unwrap();
        let rubric = session.related(go, "rubric").unwrap().unwrap();
        session.object(rubric).unwrap().id().unwrap()
    };

    let mut eager = orm.session();
    let go = eager
        .select("news")
        .unwrap()
        .filter("title")
        .equals("Go")
        .with("rubric")
        .result(&mut eager)
        .unwrap()
        .fetch(&mut eager)
        .unwrap()
        .unwrap();
    let mut lazy = orm.session();
    let lazy_go = lazy.get_by_id("news", eager.object(go).unwrap().id().unwrap()).unwrap();

    // Only the eager session already holds the rubric once the row is gone.
    orm.connections()
        .get("default")
        .unwrap()
        .delete("rubric", &Condition::equals("id", rubric_id))
        .unwrap();

    let rubric = eager.related(go, "rubric").unwrap().unwrap();
    assert!(eager.contains(rubric));
    assert_eq!(eager.get(rubric, "title").unwrap(), Value::from("Life"));
    assert!(matches!(
        lazy.related(lazy_go, "rubric"),
        Err(UmiError::NonexistentEntity(_))
    ));
}

#[test]
fn test_builder_errors_surface_on_execution() {
    let mut orm = setup();

    let unknown_field = orm.select("news").unwrap().filter("nope").equals(1).limit(3);
    assert!(matches!(
        unknown_field.result(&mut orm),
        Err(UmiError::NonexistentEntity(_))
    ));
    assert!(matches!(
        unknown_field.total(&orm),
        Err(UmiError::NonexistentEntity(_))
    ));

    let unknown_type = orm.select("news").unwrap().types(&["gallery"]);
    assert!(unknown_type.total(&orm).is_err());

    let unclosed = orm.select("news").unwrap().begin(GroupMode::Or);
    assert!(matches!(unclosed.total(&orm), Err(UmiError::UnexpectedValue(_))));

    let unopened = orm.select("news").unwrap().end();
    assert!(matches!(unopened.total(&orm), Err(UmiError::UnexpectedValue(_))));

    let not_relation = orm.select("news").unwrap().with("views");
    assert!(matches!(
        not_relation.total(&orm),
        Err(UmiError::NotAllowedOperation(_))
    ));

    assert!(matches!(
        orm.select("gallery"),
        Err(UmiError::NonexistentEntity(_))
    ));
}
