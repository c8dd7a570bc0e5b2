use super::*;
use crawly::{JobStatus, PriceScheduler, PriceStore, TrackedTarget};

const PRICE_XPATH: &str = "//span[@class='price']";

fn target(name: &str, url: &str, minutes: i64) -> TrackedTarget {
    TrackedTarget::unsaved(name, url, PRICE_XPATH, "", minutes)
}

#[tokio::test]
async fn test_scheduler_loads_active_targets_from_store() -> anyhow::Result<()> {
    let (store, _dir) = create_test_store().await?;
    let driver = Arc::new(FakeDriver::new(vec![]));
    let executor = create_test_executor(store.clone(), driver);

    let kettle = store.insert_target(&target("Kettle", "https://shop.example.com/kettle", 5)).await?;
    let mut inactive = target("Toaster", "https://shop.example.com/toaster", 5);
    inactive.is_active = false;
    store.insert_target(&inactive).await?;

    let scheduler = PriceScheduler::new(store.clone(), executor, get_test_config().scheduler);
    assert_eq!(scheduler.load_targets().await?, 1);

    let jobs = scheduler.list_jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].target_id, kettle);
    assert_eq!(jobs[0].target_name, "Kettle");
    assert_eq!(jobs[0].interval_secs, 300);
    assert_eq!(jobs[0].status, JobStatus::Active);

    let stats = scheduler.get_stats().await;
    assert_eq!(stats.total_jobs, 1);
    assert_eq!(stats.running_jobs, 0);
    Ok(())
}

#[tokio::test]
async fn test_running_scheduler_records_first_price_immediately() -> anyhow::Result<()> {
    let (store, _dir) = create_test_store().await?;
    let driver = Arc::new(FakeDriver::new(vec![(
        "https://shop.example.com/kettle",
        FakePage::default().with_xpath(PRICE_XPATH, "€ 34,95"),
    )]));
    let executor = create_test_executor(store.clone(), driver.clone());
    let id = store.insert_target(&target("Kettle", "https://shop.example.com/kettle", 60)).await?;

    let mut config = get_test_config().scheduler;
    config.tick_interval_ms = 50;
    let scheduler = PriceScheduler::new(store.clone(), executor, config);
    scheduler.load_targets().await?;
    scheduler.start().await?;

    let recorded = wait_for_condition(
        || {
            let store = store.clone();
            async move { store.price_history(&[id]).await.map(|h| !h.is_empty()).unwrap_or(false) }
        },
        5,
    )
    .await;
    assert!(recorded, "no price recorded by the first tick");

    let job = scheduler.get_job_info(id).await.expect("job registered");
    assert!(wait_for_condition(
        || {
            let scheduler = scheduler.clone();
            async move {
                scheduler
                    .get_job_info(id)
                    .await
                    .map(|j| j.success_count == 1)
                    .unwrap_or(false)
            }
        },
        5,
    )
    .await);
    assert_eq!(job.error_count, 0);

    scheduler.shutdown().await;

    let history = store.price_history(&[id]).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].price, 34.95);
    assert_eq!(driver.opened(), driver.closed());
    Ok(())
}

#[tokio::test]
async fn test_sync_follows_store_edits() -> anyhow::Result<()> {
    let (store, _dir) = create_test_store().await?;
    let driver = Arc::new(FakeDriver::new(vec![]));
    let executor = create_test_executor(store.clone(), driver);

    let kettle = store.insert_target(&target("Kettle", "https://shop.example.com/kettle", 5)).await?;
    let scheduler = PriceScheduler::new(store.clone(), executor, get_test_config().scheduler);
    scheduler.load_targets().await?;

    // Added, deactivated and deleted targets are picked up by the next sync
    let lamp = store.insert_target(&target("Lamp", "https://shop.example.com/lamp", 10)).await?;
    scheduler.sync_with_store().await?;
    assert!(scheduler.get_job_info(lamp).await.is_some());

    let mut deactivated = store.get_target(kettle).await?.expect("kettle exists");
    deactivated.is_active = false;
    store.update_target(&deactivated).await?;
    scheduler.sync_with_store().await?;
    assert!(scheduler.get_job_info(kettle).await.is_none());

    store.delete_target(lamp).await?;
    scheduler.sync_with_store().await?;
    assert!(scheduler.list_jobs().await.is_empty());
    Ok(())
}
