use nobix_api::{
    domain, query::Direction, AppError, Commit, Filter, Manager, MemoryStore, ModelRegistry, QueryParams, Record,
    Sort, Store,
};
use serde_json::{json, Value};
use std::sync::Arc;

fn record(v: Value) -> Record {
    match v {
        Value::Object(m) => m,
        _ => panic!("expected object"),
    }
}

struct Fixture {
    store: MemoryStore,
    banks: Manager,
}

fn fixture(debug: bool) -> Fixture {
    let models: Arc<ModelRegistry> = Arc::new(domain::models().unwrap());
    let bank = models.get("bank").unwrap().clone();
    Fixture {
        store: MemoryStore::new(models.clone()),
        banks: Manager::new("banks", bank, models, None, debug).unwrap(),
    }
}

#[tokio::test]
async fn create_then_read_round_trips() {
    let f = fixture(false);
    let mut s = f.store.session().await.unwrap();
    let created = f
        .banks
        .create(s.as_mut(), record(json!({"name": "Banco X", "cuit": "20123456786"})), Commit::Now)
        .await
        .unwrap();
    assert_eq!(created["id"], 1);

    let mut s = f.store.session().await.unwrap();
    let read = f.banks.read(s.as_mut(), 1).await.unwrap();
    assert_eq!(read, created);
}

#[tokio::test]
async fn deferred_create_is_invisible_until_commit() {
    let f = fixture(false);
    let mut writer = f.store.session().await.unwrap();
    f.banks
        .create(writer.as_mut(), record(json!({"name": "Banco X"})), Commit::Deferred)
        .await
        .unwrap();

    let mut reader = f.store.session().await.unwrap();
    assert!(f.banks.instances(reader.as_mut(), &[], &[]).await.unwrap().is_empty());

    f.banks.commit(writer.as_mut()).await.unwrap();
    let mut reader = f.store.session().await.unwrap();
    assert_eq!(f.banks.instances(reader.as_mut(), &[], &[]).await.unwrap().len(), 1);
}

#[tokio::test]
async fn update_without_changes_returns_item() {
    let f = fixture(false);
    let mut s = f.store.session().await.unwrap();
    let item = f
        .banks
        .create(s.as_mut(), record(json!({"name": "Banco X"})), Commit::Now)
        .await
        .unwrap();
    let same = f
        .banks
        .update(s.as_mut(), &item, record(json!({"name": "Banco X"})), Commit::Now)
        .await
        .unwrap();
    assert_eq!(same, item);

    let err = f
        .banks
        .update(s.as_mut(), &item, record(json!({"logo": "x"})), Commit::Now)
        .await
        .unwrap_err();
    let AppError::Validation(messages) = err else {
        panic!("expected validation error");
    };
    assert_eq!(messages["logo"], json!(["Unknown field."]));
}

#[tokio::test]
async fn empty_filters_mean_everything() {
    let f = fixture(false);
    let mut s = f.store.session().await.unwrap();
    for name in ["B", "A", "C"] {
        f.banks
            .create(s.as_mut(), record(json!({ "name": name })), Commit::Now)
            .await
            .unwrap();
    }
    let all = f.banks.instances(s.as_mut(), &[], &[]).await.unwrap();
    let ids: Vec<&Value> = all.iter().map(|r| &r["id"]).collect();
    assert_eq!(ids, vec![&json!(1), &json!(2), &json!(3)]);

    let sort = [Sort {
        direction: Direction::Desc,
        field: "name".into(),
    }];
    let sorted = f.banks.instances(s.as_mut(), &[], &sort).await.unwrap();
    assert_eq!(sorted[0]["name"], "C");

    let unknown_sort = [Sort {
        direction: Direction::Desc,
        field: "nope".into(),
    }];
    let fallback = f.banks.instances(s.as_mut(), &[], &unknown_sort).await.unwrap();
    assert_eq!(fallback[0]["id"], 1);
}

#[tokio::test]
async fn bad_filters_are_rejected() {
    let f = fixture(false);
    let mut s = f.store.session().await.unwrap();
    let err = f
        .banks
        .instances(s.as_mut(), &[Filter::new("name", "approx", Some("x"))], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::UnknownOperator(op) if op == "approx"));

    let err = f
        .banks
        .instances(s.as_mut(), &[Filter::new("colour", "eq", Some("x"))], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidQuery(_)));
}

#[tokio::test]
async fn pages_past_bigint_are_rejected() {
    let f = fixture(false);
    let mut s = f.store.session().await.unwrap();
    let params = QueryParams {
        page: Some(3),
        per_page: Some(i64::MAX as u64),
        ..QueryParams::default()
    };
    let err = f.banks.paginate(s.as_mut(), &params).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidQuery(_)));

    let params = QueryParams {
        page: Some(2),
        per_page: Some(10),
        ..QueryParams::default()
    };
    let (rows, total) = f.banks.paginate(s.as_mut(), &params).await.unwrap();
    assert!(rows.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn first_without_match_is_not_found() {
    let f = fixture(false);
    let mut s = f.store.session().await.unwrap();
    let filters = [Filter::new("name", "eq", Some("Nowhere"))];
    let err = f.banks.first(s.as_mut(), &filters, &[]).await.unwrap_err();
    assert_eq!(
        err.as_json()["item"],
        json!({"$type": "banks", "$where": {"name": {"$eq": "Nowhere"}}})
    );
}

#[tokio::test]
async fn conflicts_roll_back_and_carry_detail_in_debug() {
    let f = fixture(true);
    let mut s = f.store.session().await.unwrap();
    f.banks
        .create(s.as_mut(), record(json!({"name": "Banco X"})), Commit::Now)
        .await
        .unwrap();
    let err = f
        .banks
        .create(s.as_mut(), record(json!({"name": "Banco X"})), Commit::Now)
        .await
        .unwrap_err();
    let AppError::BackendConflict { debug_info: Some(info) } = err else {
        panic!("expected conflict with detail");
    };
    assert_eq!(info.params, vec![json!("Banco X")]);
    assert_eq!(f.store.rows("bank").unwrap().len(), 1);
}

#[tokio::test]
async fn relation_operations() {
    let f = fixture(false);
    let mut s = f.store.session().await.unwrap();
    let bank = f
        .banks
        .create(s.as_mut(), record(json!({"name": "Banco X"})), Commit::Now)
        .await
        .unwrap();
    let other = f
        .banks
        .create(s.as_mut(), record(json!({"name": "Banco Y"})), Commit::Now)
        .await
        .unwrap();

    let account = f
        .banks
        .relation_add(s.as_mut(), &bank, "accounts", record(json!({"number": "1"})))
        .await
        .unwrap();
    assert_eq!(account["bank_id"], bank["id"]);
    f.banks.commit(s.as_mut()).await.unwrap();

    let listed = f.banks.relation_instances(s.as_mut(), &bank, "accounts").await.unwrap();
    assert_eq!(listed, vec![account.clone()]);

    // belongs to another bank
    let id = account["id"].as_i64().unwrap();
    let err = f
        .banks
        .relation_remove(s.as_mut(), &other, "accounts", id)
        .await
        .unwrap_err();
    assert_eq!(err.as_json()["item"], json!({"$type": "bank_account", "$id": id}));

    let err = f
        .banks
        .relation_instances(s.as_mut(), &bank, "branches")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));

    f.banks.relation_remove(s.as_mut(), &bank, "accounts", id).await.unwrap();
    f.banks.commit(s.as_mut()).await.unwrap();
    assert!(f.store.rows("bank_account").unwrap().is_empty());
}
