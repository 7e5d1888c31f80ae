//! ---
//! wq_section: "15-testing-qa-runbook"
//! wq_subsection: "integration-tests"
//! wq_type: "source"
//! wq_scope: "code"
//! wq_description: "Node and monitor runtimes talking over loopback."
//! wq_version: "v0.1.0"
//! wq_owner: "tbd"
//! ---
use std::io::Write;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::sleep;
use wq_common::AppConfig;
use wq_core::{MonitorRuntime, NodeRuntime};
use wq_msg::{ReadingSet, WireFormat};
use wq_sim::SimulatedProducer;
use wq_testharness::{loopback_config, RecordingSink, ScriptedProducer};

const PERIOD: Duration = Duration::from_millis(20);

async fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn near(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 0.006
}

#[tokio::test]
async fn monitor_mirrors_the_node_and_turns_away_an_intruder() {
    let monitor_sink = RecordingSink::new();
    let monitor = MonitorRuntime::bind(
        &loopback_config("127.0.0.1:9".parse().unwrap(), PERIOD),
        Box::new(monitor_sink.clone()),
    )
    .await
    .unwrap();
    let monitor_addr = monitor.local_addr();
    let monitor_stop = monitor.shutdown_handle();

    let producer = ScriptedProducer::new()
        .turbidity([Ok(0), Ok(255)])
        .ph([Ok(0)])
        .temperature([Ok(12.0)]);
    let node = NodeRuntime::start(
        &loopback_config(monitor_addr, PERIOD),
        Box::new(producer),
        Box::new(RecordingSink::new()),
    )
    .await
    .unwrap();
    let node_stop = node.shutdown_handle();
    let probe = monitor_sink.clone();

    let (node_summary, monitor_summary, notice) = tokio::join!(node.run(), monitor.run(), async move {
        wait_for("merged frames", || probe.updates().len() >= 4).await;

        let mut intruder = TcpStream::connect(monitor_addr).await.unwrap();
        let mut notice = String::new();
        intruder.read_to_string(&mut notice).await.unwrap();

        let seen = probe.updates().len();
        wait_for("frames after the rejection", || probe.updates().len() > seen + 1).await;
        node_stop.stop();
        monitor_stop.stop();
        notice
    });
    let node_summary = node_summary.unwrap();
    let monitor_summary = monitor_summary.unwrap();

    assert_eq!(notice, "Another client is already connected!");
    assert_eq!(monitor_summary.sessions, 1);
    assert_eq!(monitor_summary.rejections, 1);
    assert_eq!(monitor_summary.parse_errors, 0);
    assert!(monitor_summary.frames_decoded <= node_summary.frames_sent);

    let merged = monitor_summary.final_readings;
    assert!(near(merged.turbidity(), 49.80), "{:?}", merged);
    assert!(near(merged.temperature(), 25.0), "{:?}", merged);
    assert!(near(merged.ph(), 6.97), "{:?}", merged);
    assert_eq!(monitor_sink.last_readings(), Some(merged));
}

#[tokio::test]
async fn shared_config_file_drives_both_roles() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
[node]
monitor_address = "127.0.0.1"
sampling_interval_ms = 10
publish_interval_ms = 20
temperature_failure = "sentinel"

[node.simulation]
seed = 7
temperature_failure_every = 2

[monitor]
listen = "127.0.0.1:0"

[connect]
retry_delay_ms = 20

[wire]
format = "quoted"
"#
    )
    .unwrap();
    let mut config = AppConfig::from_path(file.path()).unwrap();
    assert_eq!(config.wire.format, WireFormat::Quoted);

    let monitor_sink = RecordingSink::new();
    let monitor = MonitorRuntime::bind(&config, Box::new(monitor_sink.clone()))
        .await
        .unwrap();
    config.node.port = monitor.local_addr().port();
    let monitor_stop = monitor.shutdown_handle();

    let producer = SimulatedProducer::new(&config.node.simulation).unwrap();
    let node = NodeRuntime::start(&config, Box::new(producer), Box::new(RecordingSink::new()))
        .await
        .unwrap();
    let node_stop = node.shutdown_handle();
    let probe = monitor_sink.clone();

    let (node_summary, monitor_summary, ()) = tokio::join!(node.run(), monitor.run(), async move {
        wait_for("quoted frames", || probe.updates().len() >= 5).await;
        node_stop.stop();
        monitor_stop.stop();
    });
    let node_summary = node_summary.unwrap();
    let monitor_summary = monitor_summary.unwrap();

    assert!(node_summary.sampling_ticks >= 5);
    assert_eq!(monitor_summary.parse_errors, 0);
    assert!(monitor_summary.frames_decoded >= 5);
    assert_ne!(monitor_summary.final_readings, ReadingSet::default());
    for update in monitor_sink.updates() {
        let temperature = update.temperature.unwrap();
        assert!(temperature == -1.0 || (-5.0..=40.0).contains(&temperature));
        assert!((0.0..=100.0).contains(&update.turbidity.unwrap()));
        assert!((0.0..=14.0).contains(&update.ph.unwrap()));
    }
}
