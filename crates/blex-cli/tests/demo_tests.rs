//! End-to-end runs of the loopback demos behind `blex ping|battery|time`.

use blex_cli::{run_battery, run_ping, run_time, AppConfig};
use blex_gatt::profiles::time;

fn quick_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.demo.ping_interval_ms = 1;
    config
}

#[tokio::test]
async fn test_ping_demo_exchanges() {
    let exchanges = run_ping(&quick_config(), 2, Some(100)).await.unwrap();
    assert_eq!(exchanges.len(), 2);
    for (sent, reply) in &exchanges {
        assert!(sent.starts_with("This is a Ping message#"));
        assert_eq!(reply, &format!("ACK{{{}}}", sent));
    }
    assert_ne!(exchanges[0].0, exchanges[1].0);
}

#[tokio::test]
async fn test_ping_demo_zero_count() {
    let exchanges = run_ping(&quick_config(), 0, None).await.unwrap();
    assert!(exchanges.is_empty());
}

#[tokio::test]
async fn test_battery_demo_reads_both_instances() {
    let mut levels = run_battery(&quick_config()).await.unwrap();
    levels.sort();
    assert_eq!(levels.len(), 2);

    let (instance, level) = levels[0];
    assert_eq!(instance, 0);
    assert!(level >= 2 && level <= 100 && level % 2 == 0);

    let (instance, level) = levels[1];
    assert_eq!(instance, 1);
    assert!(level >= 1 && level <= 99 && level % 2 == 1);
}

#[tokio::test]
async fn test_time_demo_notifies_subscriber() {
    let report = run_time(&quick_config()).await.unwrap();
    assert!(report.current.to_naive().is_some());

    let notified = report.notified.unwrap();
    assert_eq!(notified.adjust_reason, time::ADJUST_MANUAL);
}
