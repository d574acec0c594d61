use crate::relation::Relation;
use crate::{BindValue, Conditions, Graft, Record};

struct Tag {
    id: i64,
    label: String,
}

impl Record for Tag {
    fn table(&self) -> &'static str {
        "tags"
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn column_values(&self) -> Vec<(&'static str, BindValue)> {
        vec![("label", BindValue::from(&self.label))]
    }

    fn default_values(&self) -> Vec<(&'static str, BindValue)> {
        vec![("label", BindValue::String(String::new()))]
    }

    fn associations(&self) -> Vec<Relation> {
        Vec::new()
    }

    fn associated_mut(&mut self, _field: &str) -> Option<Vec<&mut dyn Record>> {
        None
    }
}

fn assert_send<T: Send>(_: T) {}

#[test]
fn engine_futures_are_send() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let db = runtime.block_on(Graft::memory()).unwrap();
    let mut tag = Tag {
        id: 0,
        label: "rust".to_owned(),
    };

    assert_send(db.save(&mut tag));
    assert_send(db.update(&tag, 1));
    assert_send(db.delete(&mut tag));
    assert_send(db.update_table_values("tags", serde_json::json!({}), Conditions::all()));
    assert_send(db.delete_all_in_table("tags", Conditions::all()));
    assert_send(db.describe("tags"));
    assert_send(db.tables());
}
