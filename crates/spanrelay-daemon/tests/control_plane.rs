//! Control-plane HTTP tests against a config-built daemon.

mod common;

use std::io::Write as _;
use std::time::Duration;

use spanrelay_core::sampling::{SamplingStrategy, StrategyResponse};
use spanrelay_daemon::DaemonConfig;

use common::assert_eventually_refused;

/// Writes a strategies file plus a daemon config referencing it and returns
/// the parsed config. The temp files must outlive the returned config.
fn config_with_strategies() -> (DaemonConfig, tempfile::NamedTempFile, tempfile::NamedTempFile) {
    let mut strategies = tempfile::NamedTempFile::new().expect("strategies file");
    write!(
        strategies,
        r#"{{
            "default_strategy": {{"type": "probabilistic", "sampling_rate": 0.01}},
            "service_strategies": [
                {{"service": "checkout", "strategy": {{"type": "rate_limiting", "max_traces_per_second": 100}}}}
            ]
        }}"#
    )
    .expect("write strategies");

    let mut config_file = tempfile::NamedTempFile::new().expect("config file");
    write!(
        config_file,
        r#"{{
            "control": {{
                "bind_addr": "127.0.0.1:0",
                "sampling": {{ "strategies_file": {path:?} }}
            }},
            "ingest": [ {{ "bind_addr": "127.0.0.1:0" }} ],
            "collector": {{ "addr": "127.0.0.1:14250" }}
        }}"#,
        path = strategies.path()
    )
    .expect("write config");

    let config = DaemonConfig::from_file(config_file.path()).expect("load config");
    (config, strategies, config_file)
}

#[tokio::test]
async fn test_sampling_endpoint_serves_overrides_and_default() {
    let (config, _strategies, _config_file) = config_with_strategies();
    let orchestrator = config.build().expect("build");
    orchestrator.start().await.expect("start");
    let addr = orchestrator.control_addr();

    let overridden: StrategyResponse =
        reqwest::get(format!("http://{addr}/sampling?service=checkout"))
            .await
            .expect("request")
            .json()
            .await
            .expect("body");
    assert_eq!(overridden.service, "checkout");
    assert_eq!(overridden.strategy, SamplingStrategy::rate_limiting(100));

    let fallback: StrategyResponse =
        reqwest::get(format!("http://{addr}/sampling?service=unlisted"))
            .await
            .expect("request")
            .json()
            .await
            .expect("body");
    assert_eq!(
        fallback.strategy,
        SamplingStrategy::probabilistic(0.01).expect("rate")
    );

    orchestrator.stop();
}

#[tokio::test]
async fn test_sampling_endpoint_requires_service_parameter() {
    let (config, _strategies, _config_file) = config_with_strategies();
    let orchestrator = config.build().expect("build");
    orchestrator.start().await.expect("start");
    let addr = orchestrator.control_addr();

    let response = reqwest::get(format!("http://{addr}/sampling"))
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = reqwest::get(format!("http://{addr}/sampling?service="))
        .await
        .expect("request");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    orchestrator.stop();
}

#[tokio::test]
async fn test_healthz_and_post_stop_refusal() {
    let (config, _strategies, _config_file) = config_with_strategies();
    let orchestrator = config.build().expect("build");
    orchestrator.start().await.expect("start");
    let addr = orchestrator.control_addr();
    let socket_addr = orchestrator.control_socket_addr().expect("addr");

    let body = reqwest::get(format!("http://{addr}/healthz"))
        .await
        .expect("request")
        .text()
        .await
        .expect("body");
    assert_eq!(body, "ok");

    orchestrator.stop();
    assert_eventually_refused(socket_addr).await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .expect("client");
    assert!(
        client
            .get(format!("http://{addr}/healthz"))
            .send()
            .await
            .is_err(),
        "control plane must be unreachable after stop"
    );
}
