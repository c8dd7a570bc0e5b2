use super::*;
use crawly::{ExtractionOutcome, NoPriceReason, PriceExtractor, PriceStore, TrackedTarget, UNSAVED_TARGET_ID};

const LAMP_URL: &str = "https://shop.example.com/lamp";
const PRICE_XPATH: &str = "//span[@id='price']";

fn lamp(selector: &str) -> TrackedTarget {
    TrackedTarget::unsaved("Desk lamp", LAMP_URL, selector, "", 60)
}

#[tokio::test]
async fn test_trial_end_to_end() -> anyhow::Result<()> {
    let (store, _dir) = create_test_store().await?;
    let driver = Arc::new(FakeDriver::new(vec![(
        LAMP_URL,
        FakePage::default().with_xpath(PRICE_XPATH, "Price: 1,299.00 €"),
    )]));
    let executor = create_test_executor(store.clone(), driver.clone());

    let outcome = executor.execute(UNSAVED_TARGET_ID, Some(lamp(PRICE_XPATH))).await;

    let ExtractionOutcome::Price { target_id, price, .. } = outcome else {
        panic!("expected a price, got {:?}", outcome);
    };
    assert_eq!(price, 1299.0);

    let stored = store.find_target_by_name("Desk lamp").await?.expect("target committed");
    assert_eq!(stored.id, target_id);

    let history = store.price_history(&[target_id]).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].price, 1299.0);

    assert_eq!(driver.opened(), 1);
    assert_eq!(driver.closed(), 1);
    Ok(())
}

#[tokio::test]
async fn test_css_fallback_after_xpath_miss() -> anyhow::Result<()> {
    let (store, _dir) = create_test_store().await?;
    let driver = Arc::new(FakeDriver::new(vec![(
        LAMP_URL,
        FakePage::default().with_css("span.price", "69,99 €"),
    )]));
    let executor = create_test_executor(store.clone(), driver);

    let outcome = executor.execute(UNSAVED_TARGET_ID, Some(lamp("span.price"))).await;

    assert_eq!(outcome.price(), Some(69.99));
    Ok(())
}

#[tokio::test]
async fn test_unsaved_target_without_price_is_never_persisted() -> anyhow::Result<()> {
    let (store, _dir) = create_test_store().await?;
    let driver = Arc::new(FakeDriver::new(vec![
        (LAMP_URL, FakePage::default().with_xpath(PRICE_XPATH, "Currently unavailable")),
        ("https://shop.example.com/empty", FakePage::default()),
    ]));
    let executor = create_test_executor(store.clone(), driver.clone());

    let no_match = executor.execute(UNSAVED_TARGET_ID, Some(lamp(PRICE_XPATH))).await;
    assert_eq!(no_match, ExtractionOutcome::NoPrice(NoPriceReason::NoMatch));

    let mut missing = lamp(PRICE_XPATH);
    missing.url = "https://shop.example.com/empty".to_string();
    let not_found = executor.execute(UNSAVED_TARGET_ID, Some(missing)).await;
    assert_eq!(not_found, ExtractionOutcome::NoPrice(NoPriceReason::ElementNotFound));

    let mut offline = lamp(PRICE_XPATH);
    offline.url = "https://offline.example.com/".to_string();
    let fetch_failed = executor.execute(UNSAVED_TARGET_ID, Some(offline)).await;
    assert!(matches!(
        fetch_failed,
        ExtractionOutcome::NoPrice(NoPriceReason::Fetch(ref msg)) if msg.contains("ERR_NAME_NOT_RESOLVED")
    ));

    assert!(store.list_targets().await?.is_empty());
    // Every session is closed, whichever way the fetch ended
    assert_eq!(driver.opened(), 3);
    assert_eq!(driver.closed(), 3);
    Ok(())
}

#[tokio::test]
async fn test_concurrent_trials_insert_target_once() -> anyhow::Result<()> {
    let (store, _dir) = create_test_store().await?;
    let driver = Arc::new(FakeDriver::new(vec![(
        LAMP_URL,
        FakePage::default().with_xpath(PRICE_XPATH, "EUR 49,90"),
    )]));
    let executor = create_test_executor(store.clone(), driver);

    let trials = (0..8).map(|_| executor.execute(UNSAVED_TARGET_ID, Some(lamp(PRICE_XPATH))));
    let outcomes = futures::future::join_all(trials).await;

    assert!(outcomes.iter().all(ExtractionOutcome::is_price));

    let targets = store.list_targets().await?;
    assert_eq!(targets.len(), 1);

    let history = store.price_history(&[targets[0].id]).await?;
    assert_eq!(history.len(), 8);
    Ok(())
}

#[tokio::test]
async fn test_scheduled_firing_reads_latest_definition() -> anyhow::Result<()> {
    let (store, _dir) = create_test_store().await?;
    let driver = Arc::new(FakeDriver::new(vec![
        (LAMP_URL, FakePage::default().with_xpath(PRICE_XPATH, "10,00")),
        (
            "https://other-shop.example.com/lamp",
            FakePage::default().with_xpath(PRICE_XPATH, "8,50"),
        ),
    ]));
    let executor = create_test_executor(store.clone(), driver);
    let id = store.insert_target(&lamp(PRICE_XPATH)).await?;

    assert_eq!(executor.execute(id, None).await.price(), Some(10.0));

    let mut edited = store.get_target(id).await?.expect("target exists");
    edited.url = "https://other-shop.example.com/lamp".to_string();
    store.update_target(&edited).await?;

    assert_eq!(executor.execute(id, None).await.price(), Some(8.5));

    let prices: Vec<f64> = store.price_history(&[id]).await?.iter().map(|o| o.price).collect();
    assert_eq!(prices, vec![10.0, 8.5]);
    Ok(())
}

#[tokio::test]
async fn test_deleted_target_is_missing() -> anyhow::Result<()> {
    let (store, _dir) = create_test_store().await?;
    let driver = Arc::new(FakeDriver::new(vec![]));
    let executor = create_test_executor(store.clone(), driver.clone());
    let id = store.insert_target(&lamp(PRICE_XPATH)).await?;
    store.delete_target(id).await?;

    let outcome = executor.execute(id, None).await;

    assert_eq!(outcome, ExtractionOutcome::NoPrice(NoPriceReason::TargetMissing));
    assert_eq!(driver.opened(), 0);
    Ok(())
}

#[tokio::test]
async fn test_custom_pattern_is_applied() -> anyhow::Result<()> {
    let (store, _dir) = create_test_store().await?;
    let driver = Arc::new(FakeDriver::new(vec![(
        LAMP_URL,
        FakePage::default().with_xpath(PRICE_XPATH, "was 99,00 now 79,00"),
    )]));
    let executor = create_test_executor(store.clone(), driver);

    let mut target = lamp(PRICE_XPATH);
    target.pattern = r"\d+,\d{2}$".to_string();
    let outcome = executor.execute(UNSAVED_TARGET_ID, Some(target)).await;
    assert_eq!(outcome.price(), Some(79.0));

    // The whole match is parsed, capture groups are not used
    let mut target = lamp(PRICE_XPATH);
    target.name = "Desk lamp (sale)".to_string();
    target.pattern = r"now (\d+)".to_string();
    let outcome = executor.execute(UNSAVED_TARGET_ID, Some(target)).await;
    assert!(matches!(outcome, ExtractionOutcome::NoPrice(NoPriceReason::Parse(_))));

    assert_eq!(store.list_targets().await?.len(), 1);
    Ok(())
}
