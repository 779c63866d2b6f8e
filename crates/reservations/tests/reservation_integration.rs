//! Concurrency tests for the reservation lifecycle.
//!
//! These run on a multi-threaded runtime against the in-memory store so
//! that reserve, cancel, complete and sweep calls genuinely interleave.

use std::sync::Arc;

use chrono::{Duration, Utc};
use common::{BundleId, SessionId, StockTarget, TenantId};
use reservations::{
    Availability, BundleCoordinator, ExpirySweeper, ReservationEngine, ReservationError,
    ReservationStatus, ReserveStock,
};
use stock_store::{Bundle, BundleItem, InMemoryStockStore};

async fn engine_with_stock(
    units: Option<i64>,
) -> (Arc<ReservationEngine<InMemoryStockStore>>, TenantId) {
    let store = InMemoryStockStore::new();
    let tenant_id = TenantId::new();
    store.put_product(tenant_id, "sku-1", units).await;
    (Arc::new(ReservationEngine::new(store)), tenant_id)
}

fn sku() -> StockTarget {
    StockTarget::product("sku-1")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_reserves_never_oversell() {
    let (engine, tenant_id) = engine_with_stock(Some(10)).await;

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .reserve(ReserveStock::new(tenant_id, sku(), 1, format!("cs_{i}")))
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(ReservationError::InsufficientStock { available, .. }) => {
                assert_eq!(available, 0);
                rejected += 1;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(succeeded, 10);
    assert_eq!(rejected, 40);
    assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(0));
    assert_eq!(engine.store().reservation_count().await, 10);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_units_scenario() {
    let (engine, tenant_id) = engine_with_stock(Some(3)).await;

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .reserve(ReserveStock::new(tenant_id, sku(), 2, "cs_a"))
                .await
        })
    };
    let second = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .reserve(ReserveStock::new(tenant_id, sku(), 2, "cs_b"))
                .await
        })
    };
    let results = [first.await.unwrap(), second.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(ReservationError::InsufficientStock {
            requested: 2,
            available: 1,
            ..
        })
    )));
    assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(1));

    engine
        .reserve(ReserveStock::new(tenant_id, sku(), 1, "cs_c"))
        .await
        .unwrap();
    assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(0));

    let fourth = engine
        .reserve(ReserveStock::new(tenant_id, sku(), 1, "cs_d"))
        .await;
    assert!(matches!(
        fourth,
        Err(ReservationError::InsufficientStock { available: 0, .. })
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_cancel_returns_stock_for_other_shoppers() {
    let (engine, tenant_id) = engine_with_stock(Some(5)).await;

    let held: Vec<_> = reserve_many(&engine, tenant_id, 5).await;
    assert_eq!(held.len(), 5);
    assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(0));

    let cancels: Vec<_> = held
        .iter()
        .map(|id| {
            let engine = engine.clone();
            let id = *id;
            tokio::spawn(async move { engine.cancel(tenant_id, id).await })
        })
        .collect();
    for handle in cancels {
        assert!(handle.await.unwrap().unwrap());
    }

    assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(5));
    assert_eq!(
        engine.get_available_stock(tenant_id, &sku()).await.unwrap(),
        Availability::Units(5)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_racing_resolutions_apply_once() {
    let (engine, tenant_id) = engine_with_stock(Some(4)).await;
    let reservation = engine
        .reserve(ReserveStock::new(tenant_id, sku(), 4, "cs_1"))
        .await
        .unwrap();
    let reservation_id = reservation.id;

    // Payment confirmation, a user cancel and a retried cancel all race.
    let complete = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.complete(tenant_id, reservation_id).await })
    };
    let cancels: Vec<_> = (0..4)
        .map(|_| {
            let engine = engine.clone();
            tokio::spawn(async move { engine.cancel(tenant_id, reservation_id).await })
        })
        .collect();

    let completed = complete.await.unwrap().unwrap();
    let mut cancelled = 0;
    for handle in cancels {
        if handle.await.unwrap().unwrap() {
            cancelled += 1;
        }
    }

    let stored = engine
        .get_reservation(tenant_id, reservation_id)
        .await
        .unwrap()
        .unwrap();
    if completed {
        assert_eq!(cancelled, 0);
        assert_eq!(stored.status, ReservationStatus::Completed);
        assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(0));
    } else {
        assert_eq!(cancelled, 1);
        assert_eq!(stored.status, ReservationStatus::Cancelled);
        assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(4));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bundle_is_all_or_nothing() {
    let store = InMemoryStockStore::new();
    let tenant_id = TenantId::new();
    store.put_product(tenant_id, "A", Some(5)).await;
    store.put_product(tenant_id, "B", Some(0)).await;
    store
        .put_bundle(Bundle::new(
            tenant_id,
            "STARTER",
            vec![BundleItem::new("A", 2), BundleItem::new("B", 1)],
        ))
        .await;
    let coordinator = BundleCoordinator::new(store);
    let bundle_id = BundleId::new("STARTER");

    let purchased = coordinator
        .decrement_bundle_stock(tenant_id, &bundle_id, 1)
        .await
        .unwrap();

    assert!(!purchased);
    assert_eq!(
        coordinator
            .store()
            .units(tenant_id, &StockTarget::product("A"))
            .await,
        Some(5)
    );

    let report = coordinator
        .get_bundle_availability(tenant_id, &bundle_id, 1)
        .await
        .unwrap();
    assert!(!report.available);
    assert_eq!(report.unavailable_items.len(), 1);
    assert_eq!(report.unavailable_items[0].product_id.as_str(), "B");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_concurrent_bundles_share_products_without_oversell() {
    let store = InMemoryStockStore::new();
    let tenant_id = TenantId::new();
    store.put_product(tenant_id, "A", Some(6)).await;
    store.put_product(tenant_id, "B", Some(100)).await;
    store
        .put_bundle(Bundle::new(
            tenant_id,
            "AB",
            vec![BundleItem::new("A", 2), BundleItem::new("B", 1)],
        ))
        .await;
    store
        .put_bundle(Bundle::new(
            tenant_id,
            "BA",
            vec![BundleItem::new("B", 1), BundleItem::new("A", 1)],
        ))
        .await;
    let coordinator = Arc::new(BundleCoordinator::new(store));

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let coordinator = coordinator.clone();
            let bundle_id = BundleId::new(if i % 2 == 0 { "AB" } else { "BA" });
            tokio::spawn(async move {
                let ok = coordinator
                    .decrement_bundle_stock(tenant_id, &bundle_id, 1)
                    .await
                    .unwrap();
                (bundle_id, ok)
            })
        })
        .collect();

    let mut a_used = 0;
    let mut b_used = 0;
    for handle in handles {
        let (bundle_id, ok) = handle.await.unwrap();
        if ok {
            a_used += if bundle_id.as_str() == "AB" { 2 } else { 1 };
            b_used += 1;
        }
    }

    let store = coordinator.store();
    let a_left = store.units(tenant_id, &StockTarget::product("A")).await.unwrap();
    let b_left = store.units(tenant_id, &StockTarget::product("B")).await.unwrap();
    assert!(a_left >= 0);
    assert_eq!(a_left, 6 - a_used);
    assert_eq!(b_left, 100 - b_used);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unlimited_stock_never_blocks() {
    let (engine, tenant_id) = engine_with_stock(None).await;

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .reserve(ReserveStock::new(tenant_id, sku(), 1_000, format!("cs_{i}")))
                    .await
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(
        engine.get_available_stock(tenant_id, &sku()).await.unwrap(),
        Availability::Unlimited
    );
    assert_eq!(engine.store().units(tenant_id, &sku()).await, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_sweeper_converges_without_double_restore() {
    let (engine, tenant_id) = engine_with_stock(Some(30)).await;
    let held = reserve_many(&engine, tenant_id, 12).await;
    assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(18));

    // A previous sweep died after reclaiming a few holds.
    for id in held.iter().take(3) {
        assert!(engine.cancel(tenant_id, *id).await.unwrap());
    }

    let later = Utc::now() + Duration::hours(1);
    let first = ExpirySweeper::new(engine.clone()).with_batch_size(4);
    let second = ExpirySweeper::new(engine.clone()).with_batch_size(5);
    let (a, b) = tokio::join!(first.sweep_at(later), second.sweep_at(later));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.reclaimed + b.reclaimed, 9);
    assert_eq!(a.failed + b.failed, 0);

    let rerun = first.sweep_at(later).await.unwrap();
    assert_eq!(rerun.reclaimed, 0);

    assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(30));
    for id in held {
        let reservation = engine.get_reservation(tenant_id, id).await.unwrap().unwrap();
        assert_eq!(reservation.status, ReservationStatus::Cancelled);
    }
}

#[tokio::test]
async fn test_failed_insert_leaves_ledger_untouched() {
    let (engine, tenant_id) = engine_with_stock(Some(3)).await;
    engine.store().fail_reservation_inserts(true).await;

    let result = engine
        .reserve(ReserveStock::new(tenant_id, sku(), 2, "cs_1"))
        .await;

    let err = result.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(3));
    assert_eq!(engine.store().reservation_count().await, 0);

    engine.store().fail_reservation_inserts(false).await;
    engine
        .reserve(ReserveStock::new(tenant_id, sku(), 2, "cs_1"))
        .await
        .unwrap();
    assert_eq!(engine.store().units(tenant_id, &sku()).await, Some(1));
}

#[tokio::test]
async fn test_session_checkout_flow() {
    let store = InMemoryStockStore::new();
    let tenant_id = TenantId::new();
    store.put_product(tenant_id, "shirt", None).await;
    store.put_variant(tenant_id, "shirt", "m-blue", Some(2)).await;
    store.put_variant(tenant_id, "shirt", "l-blue", Some(1)).await;
    let engine = ReservationEngine::new(store);
    let session = SessionId::new("cs_cart");

    let medium = StockTarget::variant("shirt", "m-blue");
    let large = StockTarget::variant("shirt", "l-blue");
    engine
        .reserve(ReserveStock::new(tenant_id, medium.clone(), 2, session.clone()))
        .await
        .unwrap();
    engine
        .reserve(ReserveStock::new(tenant_id, large.clone(), 1, session.clone()))
        .await
        .unwrap();

    assert!(engine.complete(tenant_id, session.clone()).await.unwrap());
    assert_eq!(engine.cancel_session(tenant_id, &session).await.unwrap(), 0);
    assert_eq!(
        engine.get_available_stock(tenant_id, &medium).await.unwrap(),
        Availability::Units(0)
    );
    assert_eq!(
        engine.get_available_stock(tenant_id, &large).await.unwrap(),
        Availability::Units(0)
    );
}

async fn reserve_many(
    engine: &Arc<ReservationEngine<InMemoryStockStore>>,
    tenant_id: TenantId,
    count: usize,
) -> Vec<common::ReservationId> {
    let handles: Vec<_> = (0..count)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .reserve(ReserveStock::new(tenant_id, sku(), 1, format!("cs_{i}")))
                    .await
            })
        })
        .collect();

    let mut ids = Vec::with_capacity(count);
    for handle in handles {
        ids.push(handle.await.unwrap().unwrap().id);
    }
    ids
}
