use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use pos_sync::db::{self, Store};
use pos_sync::model::{
    CachedMenu, Channel, Customer, LineItem, MenuCategory, ModifierSelection, OrderSyncState,
    QueuedOrder, SelectedOption,
};
use pos_sync::StoreError;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// Millisecond precision, as persisted.
fn at(offset: Duration) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis((Utc::now() - offset).timestamp_millis()).unwrap()
}

fn order(id: &str, tenant: &str, status: OrderSyncState, age: Duration) -> QueuedOrder {
    QueuedOrder {
        id: id.into(),
        tenant_id: tenant.into(),
        store_id: "store-1".into(),
        channel: Channel::DineIn,
        table_number: Some("4".into()),
        customer: Some(Customer {
            name: Some("Rafa".into()),
            phone: None,
            address: None,
        }),
        items: vec![LineItem {
            product_id: "p-burger".into(),
            product_name: "Double Smash".into(),
            quantity: 2,
            unit_price: dec("31.90"),
            notes: Some("no pickles".into()),
            modifiers: vec![ModifierSelection {
                modifier_id: "m-cheese".into(),
                modifier_name: "Cheese".into(),
                options: vec![SelectedOption {
                    option_id: "o-cheddar".into(),
                    option_name: "Cheddar".into(),
                    price_delta: dec("3.00"),
                }],
            }],
        }],
        subtotal: dec("69.80"),
        discount: Decimal::ZERO,
        service_fee: dec("6.98"),
        total: dec("76.78"),
        status,
        sync_attempts: 0,
        created_at: at(age),
        last_error: None,
    }
}

fn open(dir: &tempfile::TempDir) -> Store {
    Store::new(db::default_database_url(&dir.path().to_string_lossy()))
}

#[tokio::test]
async fn orders_round_trip_with_their_snapshots() {
    let td = tempfile::tempdir().unwrap();
    let store = open(&td);
    let original = order("o-1", "tenant-a", OrderSyncState::PendingSync, Duration::zero());

    store.put_order(&original).await.unwrap();
    let loaded = store.get_order("o-1").await.unwrap().unwrap();
    assert_eq!(loaded, original);
    assert_eq!(store.get_order("missing").await.unwrap(), None);
}

#[tokio::test]
async fn put_order_replaces_by_id() {
    let td = tempfile::tempdir().unwrap();
    let store = open(&td);
    let mut o = order("o-1", "tenant-a", OrderSyncState::PendingSync, Duration::zero());
    store.put_order(&o).await.unwrap();
    o.total = dec("1.00");
    store.put_order(&o).await.unwrap();

    let orders = store.list_orders_by_tenant("tenant-a").await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].total, dec("1.00"));
}

#[tokio::test]
async fn listings_filter_by_tenant_and_status() {
    let td = tempfile::tempdir().unwrap();
    let store = open(&td);
    store
        .put_order(&order("a-new", "tenant-a", OrderSyncState::PendingSync, Duration::seconds(1)))
        .await
        .unwrap();
    store
        .put_order(&order("a-old", "tenant-a", OrderSyncState::PendingSync, Duration::seconds(60)))
        .await
        .unwrap();
    store
        .put_order(&order("a-done", "tenant-a", OrderSyncState::Synced, Duration::seconds(30)))
        .await
        .unwrap();
    store
        .put_order(&order("b-1", "tenant-b", OrderSyncState::PendingSync, Duration::seconds(10)))
        .await
        .unwrap();

    let mut tenant_a: Vec<String> = store
        .list_orders_by_tenant("tenant-a")
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.id)
        .collect();
    tenant_a.sort();
    assert_eq!(tenant_a, vec!["a-done", "a-new", "a-old"]);

    let pending: Vec<String> = store
        .list_orders_by_status(OrderSyncState::PendingSync)
        .await
        .unwrap()
        .into_iter()
        .map(|o| o.id)
        .collect();
    assert_eq!(pending, vec!["a-old", "b-1", "a-new"]);
    assert_eq!(store.count_orders_by_status(OrderSyncState::PendingSync).await.unwrap(), 3);
    assert_eq!(store.count_orders_by_status(OrderSyncState::Error).await.unwrap(), 0);
}

#[tokio::test]
async fn status_updates_and_missing_orders() {
    let td = tempfile::tempdir().unwrap();
    let store = open(&td);
    store
        .put_order(&order("o-1", "tenant-a", OrderSyncState::PendingSync, Duration::zero()))
        .await
        .unwrap();

    store
        .update_order_status("o-1", OrderSyncState::Syncing, Some(1))
        .await
        .unwrap();
    store
        .record_sync_failure("o-1", OrderSyncState::PendingSync, 1, "timeout")
        .await
        .unwrap();
    let o = store.get_order("o-1").await.unwrap().unwrap();
    assert_eq!((o.status, o.sync_attempts), (OrderSyncState::PendingSync, 1));
    assert_eq!(o.last_error.as_deref(), Some("timeout"));

    // Attempts are kept when not given; success clears the last error.
    store
        .update_order_status("o-1", OrderSyncState::Synced, None)
        .await
        .unwrap();
    let o = store.get_order("o-1").await.unwrap().unwrap();
    assert_eq!((o.status, o.sync_attempts), (OrderSyncState::Synced, 1));
    assert_eq!(o.last_error, None);

    store
        .update_order_status("gone", OrderSyncState::Synced, Some(1))
        .await
        .unwrap();
    assert_eq!(store.get_order("gone").await.unwrap(), None);
}

#[tokio::test]
async fn retention_removes_only_old_synced_orders() {
    let td = tempfile::tempdir().unwrap();
    let store = open(&td);
    for (id, status, age) in [
        ("synced-old", OrderSyncState::Synced, Duration::days(8)),
        ("error-old", OrderSyncState::Error, Duration::days(8)),
        ("pending-old", OrderSyncState::PendingSync, Duration::days(8)),
        ("synced-new", OrderSyncState::Synced, Duration::days(6)),
    ] {
        store.put_order(&order(id, "tenant-a", status, age)).await.unwrap();
    }

    assert_eq!(store.purge_synced_older_than(7).await.unwrap(), 1);
    assert_eq!(store.get_order("synced-old").await.unwrap(), None);
    for id in ["error-old", "pending-old", "synced-new"] {
        assert!(store.get_order(id).await.unwrap().is_some(), "{id} was purged");
    }
}

#[tokio::test]
async fn stranded_and_failed_orders_can_be_recovered() {
    let td = tempfile::tempdir().unwrap();
    let store = open(&td);
    let mut syncing = order("o-syncing", "tenant-a", OrderSyncState::Syncing, Duration::zero());
    syncing.sync_attempts = 2;
    let mut failed = order("o-failed", "tenant-a", OrderSyncState::Error, Duration::zero());
    failed.sync_attempts = 3;
    failed.last_error = Some("rejected".into());
    store.put_order(&syncing).await.unwrap();
    store.put_order(&failed).await.unwrap();

    assert_eq!(
        store.failed_order_errors().await.unwrap(),
        vec![("o-failed".to_string(), Some("rejected".to_string()))]
    );

    assert_eq!(store.requeue_stranded().await.unwrap(), 1);
    let o = store.get_order("o-syncing").await.unwrap().unwrap();
    assert_eq!((o.status, o.sync_attempts), (OrderSyncState::PendingSync, 2));

    assert!(!store.reset_failed_order("o-syncing").await.unwrap());
    assert!(store.reset_failed_order("o-failed").await.unwrap());
    let o = store.get_order("o-failed").await.unwrap().unwrap();
    assert_eq!((o.status, o.sync_attempts), (OrderSyncState::PendingSync, 0));
}

#[tokio::test]
async fn menu_is_replaced_wholesale_per_tenant() {
    let td = tempfile::tempdir().unwrap();
    let store = open(&td);
    let first = CachedMenu {
        tenant_id: "tenant-a".into(),
        categories: vec![
            MenuCategory {
                id: "c1".into(),
                name: "Burgers".into(),
                sort_order: 1,
                products: vec![],
            },
            MenuCategory {
                id: "c2".into(),
                name: "Drinks".into(),
                sort_order: 2,
                products: vec![],
            },
        ],
        last_updated: at(Duration::hours(1)),
    };
    store.put_menu(&first).await.unwrap();
    assert_eq!(store.get_menu("tenant-a").await.unwrap(), Some(first));

    let second = CachedMenu {
        tenant_id: "tenant-a".into(),
        categories: vec![MenuCategory {
            id: "c3".into(),
            name: "Desserts".into(),
            sort_order: 1,
            products: vec![],
        }],
        last_updated: at(Duration::zero()),
    };
    store.put_menu(&second).await.unwrap();
    assert_eq!(store.get_menu("tenant-a").await.unwrap(), Some(second));
    assert_eq!(store.get_menu("tenant-b").await.unwrap(), None);
}

#[tokio::test]
async fn settings_are_last_write_wins() {
    let td = tempfile::tempdir().unwrap();
    let store = open(&td);
    assert_eq!(store.get_setting(db::LAST_SYNC_KEY).await.unwrap(), None);
    store.set_setting(db::LAST_SYNC_KEY, "a").await.unwrap();
    store.set_setting(db::LAST_SYNC_KEY, "b").await.unwrap();
    assert_eq!(store.get_setting(db::LAST_SYNC_KEY).await.unwrap().as_deref(), Some("b"));
}

#[tokio::test]
async fn queued_orders_survive_reopening() {
    let td = tempfile::tempdir().unwrap();
    {
        let store = open(&td);
        store
            .put_order(&order("o-1", "tenant-a", OrderSyncState::PendingSync, Duration::zero()))
            .await
            .unwrap();
        store.close().await;
    }

    let store = open(&td);
    let pending = store.list_orders_by_status(OrderSyncState::PendingSync).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "o-1");
}

#[tokio::test]
async fn malformed_rows_are_reported() {
    let td = tempfile::tempdir().unwrap();
    let pool = db::init_pool(&db::default_database_url(&td.path().to_string_lossy()))
        .await
        .unwrap();
    db::run_migrations(&pool).await.unwrap();
    sqlx::query(
        "INSERT INTO orders (id, tenant_id, store_id, channel, items, subtotal, discount, service_fee, total, status, created_at) \
         VALUES ('o-bad', 't', 's', 'takeout', 'not json', '1', '0', '0', '1', 'pending_sync', 0)",
    )
    .execute(&pool)
    .await
    .unwrap();

    let store = Store::from_pool(pool);
    let err = store.get_order("o-bad").await.unwrap_err();
    assert!(matches!(err, StoreError::Malformed { kind: "order", .. }), "got {err:?}");
}
