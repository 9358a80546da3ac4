use app_config::AppConfig;
use std::time::Duration;

#[test]
fn test_load_default_config() {
    let cfg = AppConfig::load().unwrap();
    assert_eq!(cfg.db_port, 5432);
    assert_eq!(cfg.gateway_timeout, Duration::from_secs(15));
    assert_eq!(cfg.gateway_currency, "usd");
}
