use graft_orm::prelude::*;
use graft_orm::test_utils::{count_rows, scalar_i64};

#[derive(Model, Debug, Default, Clone, PartialEq)]
struct Classroom {
    id: i64,
    name: String,
    #[has_many(Student, on_delete = cascade)]
    students: Option<Vec<Student>>,
}

#[derive(Model, Debug, Default, Clone, PartialEq)]
struct Student {
    id: i64,
    name: String,
    age: i32,
    score: f64,
    active: bool,
    #[belongs_to(Classroom)]
    classroom: Option<Box<Classroom>>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("graft_core=debug")
        .with_test_writer()
        .try_init();
}

async fn setup() -> Graft {
    init_tracing();
    let db = Graft::memory().await.expect("db");
    db.sync::<Classroom>().await.expect("sync");
    db.sync::<Student>().await.expect("sync");
    db
}

fn student(name: &str, age: i32, score: f64) -> Student {
    Student {
        name: name.to_owned(),
        age,
        score,
        active: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn save_find_delete_round_trip() {
    let db = setup().await;
    let mut tom = student("Tom", 14, 3.5);
    tom.save(&db).await.expect("save");
    assert!(tom.id > 0);

    let found = Student::find(&db, tom.id).await.expect("find").expect("row");
    assert_eq!(found.name, "Tom");
    assert_eq!(found.age, 14);
    assert!(found.active);
    assert!(found.classroom.is_none());

    assert_eq!(tom.delete(&db).await.expect("delete"), 1);
    assert_eq!(tom.id, 0);
    assert!(db.find::<Student>(found.id).await.expect("find").is_none());
}

#[tokio::test]
async fn update_skips_defaults_unless_requested() {
    let db = setup().await;
    let mut tom = student("Tom", 14, 3.5);
    tom.save(&db).await.expect("save");

    let patch = Student {
        name: "Thomas".to_owned(),
        ..Default::default()
    };
    assert_eq!(db.update(&patch, tom.id).await.expect("update"), 1);
    let row = db.find::<Student>(tom.id).await.expect("find").expect("row");
    assert_eq!(row.name, "Thomas");
    assert_eq!(row.age, 14);
    assert!(row.active);

    let affected = db
        .update_with(&Student::default(), tom.id, Changeset::new().set_to_default("age"))
        .await
        .expect("update");
    assert_eq!(affected, 1);
    let row = db.find::<Student>(tom.id).await.expect("find").expect("row");
    assert_eq!(row.age, 0);
    assert_eq!(row.name, "Thomas");

    assert_eq!(db.update(&Student::default(), tom.id).await.expect("noop"), 0);
}

#[tokio::test]
async fn update_rejects_unknown_default_fields() {
    let db = setup().await;
    let err = db
        .update_with(&Student::default(), 1, Changeset::new().set_to_default("nickname"))
        .await
        .expect_err("unknown field");
    assert!(matches!(err, GraftError::ModelShape(_)));
}

#[tokio::test]
async fn update_all_touches_every_match() {
    let db = setup().await;
    let mut students = vec![student("a", 10, 1.0), student("b", 11, 2.0), student("c", 12, 3.0)];
    db.save_all(&mut students).await.expect("save_all");

    let patch = Student {
        score: 9.5,
        ..Default::default()
    };
    let affected = patch
        .update_all(&db, Conditions::new("age >= ?").arg(11))
        .await
        .expect("update_all");
    assert_eq!(affected, 2);

    let affected = db
        .update_all_values::<Student>(
            serde_json::json!({ "active": false }),
            Conditions::new("name = ?").arg("a"),
        )
        .await
        .expect("update_all_values");
    assert_eq!(affected, 1);
    assert_eq!(
        db.query::<Student>().filter_eq("active", false).count().await.expect("count"),
        1
    );
}

#[tokio::test]
async fn update_values_checks_columns() {
    let db = setup().await;
    let mut tom = student("Tom", 14, 3.5);
    tom.save(&db).await.expect("save");

    let affected = db
        .update_values::<Student>(serde_json::json!({ "age": 15, "name": "Tommy" }), tom.id)
        .await
        .expect("update_values");
    assert_eq!(affected, 1);
    let row = db.find::<Student>(tom.id).await.expect("find").expect("row");
    assert_eq!((row.name.as_str(), row.age), ("Tommy", 15));

    for bad in [
        serde_json::json!({ "id": 3 }),
        serde_json::json!({ "nickname": "x" }),
        serde_json::json!({ "classroom_id": 1 }),
        serde_json::json!(["age", 1]),
    ] {
        let err = db
            .update_values::<Student>(bad, tom.id)
            .await
            .expect_err("rejected");
        assert!(matches!(err, GraftError::ModelShape(_)));
    }
}

#[tokio::test]
async fn update_table_values_is_raw() {
    let db = setup().await;
    let mut room = Classroom {
        name: "7A".to_owned(),
        students: Some(vec![student("Tom", 14, 1.0)]),
        ..Default::default()
    };
    room.save(&db).await.expect("save");

    let affected = db
        .update_table_values(
            "students",
            serde_json::json!({ "classroom_id": null }),
            Conditions::all(),
        )
        .await
        .expect("raw update");
    assert_eq!(affected, 1);
    let linked = scalar_i64(&db, "SELECT COUNT(classroom_id) FROM students", Vec::new())
        .await
        .expect("count");
    assert_eq!(linked, 0);

    assert!(
        db.update_table_values("students; DROP TABLE x", serde_json::json!({ "age": 1 }), Conditions::all())
            .await
            .is_err()
    );
}

#[tokio::test]
async fn save_or_update_matches_or_inserts() {
    let db = setup().await;
    let mut tom = student("Tom", 14, 1.0);
    db.save_or_update(&mut tom, Conditions::new("name = ?").arg("Tom"))
        .await
        .expect("insert");
    assert!(tom.id > 0);
    let first_id = tom.id;

    let mut again = student("Tom", 15, 1.0);
    db.save_or_update(&mut again, Conditions::new("name = ?").arg("Tom"))
        .await
        .expect("update");
    assert_eq!(again.id, first_id);
    assert_eq!(db.count::<Student>().await.expect("count"), 1);
    let row = db.find::<Student>(first_id).await.expect("find").expect("row");
    assert_eq!(row.age, 15);

    let mut broken = student("Ann", 9, 0.0);
    assert!(
        !db.save_or_update_quiet(&mut broken, Conditions::new("name = ? AND age = ?").arg("Ann"))
            .await
    );
    assert_eq!(broken.id, 0);
}

#[tokio::test]
async fn save_or_update_writes_every_match() {
    let db = setup().await;
    let mut batch = vec![
        student("Tom", 14, 1.0),
        student("Ann", 14, 2.0),
        student("Bob", 12, 3.0),
    ];
    db.save_all(&mut batch).await.expect("save_all");
    let matched = [batch[0].id, batch[1].id];

    let mut renamed = student("Zed", 14, 9.5);
    db.save_or_update(&mut renamed, Conditions::new("age = ?").arg(14))
        .await
        .expect("update");

    assert!(matched.contains(&renamed.id));
    assert_eq!(db.count::<Student>().await.expect("count"), 3);
    for id in matched {
        let row = db.find::<Student>(id).await.expect("find").expect("row");
        assert_eq!(row.name, "Zed");
        assert_eq!(row.score, 9.5);
    }
    let bob = db.find::<Student>(batch[2].id).await.expect("find").expect("row");
    assert_eq!(bob.name, "Bob");
}

#[tokio::test]
async fn save_all_is_all_or_nothing() {
    let db = setup().await;
    let mut rooms = vec![
        Classroom {
            name: "A".to_owned(),
            ..Default::default()
        },
        Classroom {
            name: "B".to_owned(),
            ..Default::default()
        },
    ];
    db.save_all(&mut rooms).await.expect("save_all");
    assert!(rooms.iter().all(|r| r.id > 0));

    graft_orm::test_utils::execute_raw(
        &db,
        "CREATE TRIGGER no_c BEFORE INSERT ON classrooms WHEN NEW.name = 'C' \
         BEGIN SELECT RAISE(ABORT, 'no C'); END",
    )
    .await
    .expect("trigger");

    let mut batch = vec![
        Classroom {
            name: "D".to_owned(),
            ..Default::default()
        },
        Classroom {
            name: "C".to_owned(),
            ..Default::default()
        },
    ];
    assert!(!db.save_all_quiet(&mut batch).await);
    assert!(batch.iter().all(|r| r.id == 0));
    assert_eq!(count_rows(&db, "classrooms").await.expect("count"), 2);
}

#[tokio::test]
async fn malformed_conditions_are_rejected_before_sql() {
    let db = setup().await;
    let err = db
        .delete_all::<Student>(Conditions::new("age > ? AND name = ?").arg(3))
        .await
        .expect_err("malformed");
    assert!(matches!(
        err,
        GraftError::MalformedConditions {
            placeholders: 2,
            arguments: 1
        }
    ));

    let err = db
        .query::<Student>()
        .conditions(Conditions::new("age > ?"))
        .all()
        .await
        .expect_err("malformed");
    assert!(matches!(err, GraftError::MalformedConditions { .. }));
}

#[tokio::test]
async fn query_builder_filters_orders_and_aggregates() {
    let db = setup().await;
    let mut students = vec![
        student("a", 10, 1.0),
        student("b", 12, 2.0),
        student("c", 14, 4.0),
        student("d", 16, 5.0),
    ];
    db.save_all(&mut students).await.expect("save_all");

    let older = Student::query(&db)
        .filter_gt("age", 11)
        .order("age desc")
        .limit(2)
        .all()
        .await
        .expect("all");
    let names: Vec<&str> = older.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["d", "c"]);

    let page = db
        .query::<Student>()
        .order("name")
        .offset(1)
        .limit(2)
        .all()
        .await
        .expect("page");
    assert_eq!(page.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);

    let narrow = db
        .query::<Student>()
        .select(["name"])
        .filter_eq("name", "b")
        .one()
        .await
        .expect("one")
        .expect("row");
    assert_eq!(narrow.name, "b");
    assert!(narrow.id > 0);
    assert_eq!(narrow.age, 0);

    let q = || db.query::<Student>();
    assert_eq!(q().count().await.expect("count"), 4);
    assert!(q().filter_lt("age", 11).exists().await.expect("exists"));
    assert!(!q().filter_gt("age", 99).exists().await.expect("exists"));
    assert_eq!(q().average("score").await.expect("avg"), 3.0);
    assert_eq!(q().filter_gt("age", 99).average("score").await.expect("avg"), 0.0);
    assert_eq!(q().sum::<i64>("age").await.expect("sum"), Some(52));
    assert_eq!(q().max::<i64>("age").await.expect("max"), Some(16));
    assert_eq!(q().min::<f64>("score").await.expect("min"), Some(1.0));
    assert_eq!(q().filter_gt("age", 99).max::<i64>("age").await.expect("max"), None);

    assert_eq!(db.find_first::<Student>().await.expect("first").expect("row").name, "a");
    assert_eq!(db.find_last::<Student>().await.expect("last").expect("row").name, "d");

    let err = q().one().await.expect_err("four rows");
    assert!(matches!(err, GraftError::AmbiguousRow { matches: 4, .. }));
    let err = q().order("nickname").all().await.expect_err("unknown column");
    assert!(matches!(err, GraftError::ModelShape(_)));
}

#[tokio::test]
async fn find_all_and_find_by_sql() {
    let db = setup().await;
    let mut students = vec![student("a", 10, 1.0), student("b", 12, 2.0), student("c", 14, 4.0)];
    db.save_all(&mut students).await.expect("save_all");
    let ids: Vec<i64> = students.iter().map(|s| s.id).collect();

    let found = db
        .find_all::<Student>(&[ids[2], ids[0], 9_999])
        .await
        .expect("find_all");
    assert_eq!(found.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ids[0], ids[2]]);
    assert!(db.find_all::<Student>(&[]).await.expect("empty").is_empty());

    let rows = db
        .find_by_sql::<Student>(
            Conditions::new("SELECT * FROM students WHERE age BETWEEN ? AND ? ORDER BY age DESC")
                .arg(11)
                .arg(20),
        )
        .await
        .expect("find_by_sql");
    assert_eq!(rows.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(), vec!["c", "b"]);
}

#[tokio::test]
async fn marking_as_deleted_reinserts_on_next_save() {
    let db = setup().await;
    let mut students = vec![student("a", 10, 1.0)];
    db.save_all(&mut students).await.expect("save");
    let first = students[0].id;

    mark_as_deleted(&mut students);
    assert_eq!(students[0].id, 0);
    students[0].save(&db).await.expect("save");
    assert_ne!(students[0].id, first);
    assert_eq!(db.count::<Student>().await.expect("count"), 2);
}

#[tokio::test]
async fn deleting_unsaved_or_missing_rows_is_a_noop() {
    let db = setup().await;
    let mut ghost = student("ghost", 1, 0.0);
    assert_eq!(ghost.delete(&db).await.expect("delete"), 0);
    assert_eq!(db.delete_by_id::<Student>(42).await.expect("delete"), 0);
    assert_eq!(
        db.delete_all::<Student>(Conditions::all()).await.expect("delete_all"),
        0
    );
}

#[tokio::test]
async fn use_database_switches_every_clone() {
    let db = setup().await;
    let clone = db.clone();
    let mut tom = student("Tom", 14, 1.0);
    tom.save(&db).await.expect("save");

    let config = GraftConfig::from_json(r#"{"url": "sqlite::memory:", "busy_timeout_ms": 250}"#)
        .expect("config");
    clone.use_database(config.clone()).await.expect("switch");
    assert_eq!(db.config().await, config);
    assert!(db.describe("students").await.expect("describe").is_none());

    db.sync::<Classroom>().await.expect("sync");
    db.sync::<Student>().await.expect("sync");
    assert_eq!(clone.count::<Student>().await.expect("count"), 0);
}

#[tokio::test]
async fn invalid_urls_are_config_errors() {
    let err = Graft::open("postgres://nope").await.expect_err("not sqlite");
    assert!(matches!(err, GraftError::Config(_)));
}
