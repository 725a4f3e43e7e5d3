use pricehound_core::AppError;
use pricehound_core::models::{NewScrape, PlaceholderOutcome};
use pricehound_core::traits::ProductStore;
use rust_decimal::Decimal;

use crate::common::{new_retailer, setup_test_db};

fn scrape(url: &str, retailer_id: i64, price: Decimal) -> NewScrape {
    NewScrape {
        product_url: url.into(),
        retailer_id,
        name: "Espresso Machine".into(),
        price,
        image_url: Some("https://shop.test/img/1.jpg".into()),
    }
}

#[tokio::test]
async fn create_and_fetch_retailer() {
    let (db, _container) = setup_test_db().await;
    let store = db.store();

    let created = store
        .create_retailer(&new_retailer("Acme", true))
        .await
        .unwrap();
    let fetched = store.get_retailer(created.id).await.unwrap().unwrap();

    assert_eq!(fetched, created);
    assert_eq!(fetched.price_selector.as_deref(), Some(".price"));
    assert!(store.get_retailer(created.id + 1000).await.unwrap().is_none());
}

#[tokio::test]
async fn duplicate_retailer_name_is_integrity_error() {
    let (db, _container) = setup_test_db().await;
    let store = db.store();

    store
        .create_retailer(&new_retailer("Acme", true))
        .await
        .unwrap();
    let err = store
        .create_retailer(&new_retailer("Acme", false))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::IntegrityError(_)));
}

#[tokio::test]
async fn save_scrape_tracks_old_price_and_history() {
    let (db, _container) = setup_test_db().await;
    let store = db.store();
    let retailer = store
        .create_retailer(&new_retailer("Acme", true))
        .await
        .unwrap();
    let url = "https://shop.test/p/espresso";

    let first = store
        .save_scrape(&scrape(url, retailer.id, Decimal::new(24999, 2)))
        .await
        .unwrap();
    assert!(first.is_new);
    assert_eq!(first.old_price, None);

    let second = store
        .save_scrape(&scrape(url, retailer.id, Decimal::new(19999, 2)))
        .await
        .unwrap();
    assert!(!second.is_new);
    assert_eq!(second.old_price, Some(Decimal::new(24999, 2)));
    assert_eq!(second.product.id, first.product.id);
    assert_eq!(second.product.price, Decimal::new(19999, 2));
    assert!(second.product.last_scraped_at >= first.product.last_scraped_at);

    let history = store
        .get_price_history(first.product.id, 10)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].price, Decimal::new(19999, 2));
    assert_eq!(history[1].price, Decimal::new(24999, 2));

    let limited = store.get_price_history(first.product.id, 1).await.unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, history[0].id);
}

#[tokio::test]
async fn failed_save_scrape_leaves_nothing_behind() {
    let (db, _container) = setup_test_db().await;
    let store = db.store();

    // Unknown retailer: the upsert violates the foreign key and the
    // transaction rolls back. Constraint violations are not worth retrying.
    let err = store
        .save_scrape(&scrape("https://shop.test/p/ghost", 9999, Decimal::ONE))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::IntegrityError(_)));
    assert!(!err.is_retryable());

    let (products,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM products")
        .fetch_one(db.pool())
        .await
        .unwrap();
    let (history,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM price_history")
        .fetch_one(db.pool())
        .await
        .unwrap();
    assert_eq!((products, history), (0, 0));
}

async fn reject_history_inserts(db: &pricehound_db::Database) {
    sqlx::query(
        "CREATE FUNCTION reject_history() RETURNS trigger AS $$ \
         BEGIN RAISE EXCEPTION 'price_history is read-only'; END \
         $$ LANGUAGE plpgsql",
    )
    .execute(db.pool())
    .await
    .unwrap();
    sqlx::query(
        "CREATE TRIGGER price_history_read_only BEFORE INSERT ON price_history \
         FOR EACH ROW EXECUTE FUNCTION reject_history()",
    )
    .execute(db.pool())
    .await
    .unwrap();
}

#[tokio::test]
async fn history_insert_failure_rolls_back_product_write() {
    let (db, _container) = setup_test_db().await;
    let store = db.store();
    let retailer = store
        .create_retailer(&new_retailer("Acme", true))
        .await
        .unwrap();
    let known = "https://shop.test/p/known";
    let fresh = "https://shop.test/p/fresh";
    store
        .save_scrape(&scrape(known, retailer.id, Decimal::new(10000, 2)))
        .await
        .unwrap();

    reject_history_inserts(&db).await;

    // The product upsert succeeds inside the transaction, then the history
    // insert fails and takes it back.
    let err = store
        .save_scrape(&scrape(known, retailer.id, Decimal::new(12000, 2)))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DatabaseError(_)), "{err:?}");
    store
        .save_scrape(&scrape(fresh, retailer.id, Decimal::new(500, 2)))
        .await
        .unwrap_err();

    let product = store.find_product(known, retailer.id).await.unwrap().unwrap();
    assert_eq!(product.price, Decimal::new(10000, 2));
    assert!(store.find_product(fresh, retailer.id).await.unwrap().is_none());
    assert_eq!(store.get_price_history(product.id, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn oversized_price_is_rejected_before_writing() {
    let (db, _container) = setup_test_db().await;
    let store = db.store();
    let retailer = store
        .create_retailer(&new_retailer("Acme", true))
        .await
        .unwrap();
    let url = "https://shop.test/p/ref-12345678";

    // "Ref 12345678 $10.00" parses to 1234567810.00.
    let err = store
        .save_scrape(&scrape(url, retailer.id, Decimal::new(123_456_781_000, 2)))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ValidationError(_)));
    assert!(!err.is_retryable());
    assert!(store.find_product(url, retailer.id).await.unwrap().is_none());
}

#[tokio::test]
async fn numeric_overflow_from_postgres_is_terminal() {
    let (db, _container) = setup_test_db().await;
    let store = db.store();
    let retailer = store
        .create_retailer(&new_retailer("Acme", true))
        .await
        .unwrap();

    // upsert_product skips the save_scrape guard, so Postgres reports the overflow.
    let err = store
        .upsert_product(
            "https://shop.test/p/huge",
            retailer.id,
            "Huge",
            Decimal::new(123_456_781_000, 2),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::ValidationError(_)), "{err:?}");
}

#[tokio::test]
async fn listing_covers_all_retailers_and_products() {
    let (db, _container) = setup_test_db().await;
    let store = db.store();
    let active = store
        .create_retailer(&new_retailer("Active", true))
        .await
        .unwrap();
    let paused = store
        .create_retailer(&new_retailer("Paused", false))
        .await
        .unwrap();
    store
        .upsert_product("https://shop.test/p/1", active.id, "One", Decimal::ONE, None)
        .await
        .unwrap();
    store
        .upsert_product("https://shop.test/p/2", paused.id, "Two", Decimal::TWO, None)
        .await
        .unwrap();

    let retailers = db.retailer_repo().list().await.unwrap();
    assert_eq!(
        retailers.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![active.id, paused.id]
    );

    assert_eq!(db.product_repo().list(10).await.unwrap().len(), 2);
    assert_eq!(db.product_repo().list(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn placeholder_created_once_then_refreshed() {
    let (db, _container) = setup_test_db().await;
    let store = db.store();
    let retailer = store
        .create_retailer(&new_retailer("Acme", true))
        .await
        .unwrap();
    let url = "https://shop.test/p/new";

    let created = store.ensure_placeholder(url, retailer.id).await.unwrap();
    let PlaceholderOutcome::Created(id) = created else {
        panic!("expected a new placeholder, got {created:?}");
    };
    let placeholder = store.find_product(url, retailer.id).await.unwrap().unwrap();
    assert_eq!(placeholder.name, "Unknown");
    assert_eq!(placeholder.price, Decimal::ZERO);

    let again = store.ensure_placeholder(url, retailer.id).await.unwrap();
    assert_eq!(again, PlaceholderOutcome::Refreshed(id));
    let refreshed = store.find_product(url, retailer.id).await.unwrap().unwrap();
    assert!(refreshed.last_seen_at >= placeholder.last_seen_at);
    assert_eq!(store.get_products_for_retailer(retailer.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn placeholder_keeps_scraped_fields() {
    let (db, _container) = setup_test_db().await;
    let store = db.store();
    let retailer = store
        .create_retailer(&new_retailer("Acme", true))
        .await
        .unwrap();
    let url = "https://shop.test/p/known";
    store
        .save_scrape(&scrape(url, retailer.id, Decimal::new(999, 2)))
        .await
        .unwrap();

    store.ensure_placeholder(url, retailer.id).await.unwrap();

    let product = store.find_product(url, retailer.id).await.unwrap().unwrap();
    assert_eq!(product.name, "Espresso Machine");
    assert_eq!(product.price, Decimal::new(999, 2));
}

#[tokio::test]
async fn active_filter_excludes_inactive_retailers() {
    let (db, _container) = setup_test_db().await;
    let store = db.store();
    let active = store
        .create_retailer(&new_retailer("Active", true))
        .await
        .unwrap();
    let paused = store
        .create_retailer(&new_retailer("Paused", false))
        .await
        .unwrap();

    store
        .upsert_product("https://shop.test/p/1", active.id, "One", Decimal::ONE, None)
        .await
        .unwrap();
    store
        .upsert_product("https://shop.test/p/2", paused.id, "Two", Decimal::TWO, None)
        .await
        .unwrap();

    let retailers = store.get_active_retailers().await.unwrap();
    assert_eq!(retailers.len(), 1);
    assert_eq!(retailers[0].id, active.id);

    let products = store.get_products_from_active_retailers().await.unwrap();
    assert_eq!(products.len(), 1);
    assert_eq!(products[0].name, "One");
}

#[tokio::test]
async fn record_price_appends_history() {
    let (db, _container) = setup_test_db().await;
    let store = db.store();
    let retailer = store
        .create_retailer(&new_retailer("Acme", true))
        .await
        .unwrap();
    let product = store
        .upsert_product("https://shop.test/p/1", retailer.id, "One", Decimal::ONE, None)
        .await
        .unwrap();

    let entry = store
        .record_price(product.id, retailer.id, Decimal::new(150, 2))
        .await
        .unwrap();

    assert_eq!(entry.product_id, product.id);
    assert_eq!(entry.price, Decimal::new(150, 2));
    db.health_check().await.unwrap();
}
