// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Supervisor loop behaviors: interval enforcement under overrun, graceful
//! (and idempotent) shutdown on SIGTERM, and the churn kill-switch.

use serde_json::json;
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use stoker_daemon::{
    method_fn, App, Daemon, DaemonConfig, DaemonError, PoolConfig, ProcessError, Supervisor,
    WorkerPool,
};
use tempfile::TempDir;

/// Sleeps past the interval every tick, recording observed idle stats.
struct OverrunApp {
    ticks: usize,
    idles: Arc<Mutex<Vec<f64>>>,
}

impl App for OverrunApp {
    fn execute(&mut self, supervisor: &mut Supervisor) -> Result<(), DaemonError> {
        self.ticks += 1;
        if let Some(stat) = supervisor.stats().last() {
            self.idles.lock().unwrap().push(stat.idle);
        }
        if self.ticks >= 4 {
            supervisor.request_shutdown();
            return Ok(());
        }
        // 150ms of "work" against a 100ms interval
        std::thread::sleep(Duration::from_millis(150));
        Ok(())
    }
}

#[tokio::test]
#[serial(daemon)]
async fn overrunning_execute_records_negative_idle() {
    let dir = TempDir::new().unwrap();
    let idles = Arc::new(Mutex::new(Vec::new()));
    let app = OverrunApp {
        ticks: 0,
        idles: Arc::clone(&idles),
    };
    let config = DaemonConfig::new()
        .loop_interval(Duration::from_millis(100))
        .runtime_dir(dir.path());

    Daemon::new(config, app).run().await.unwrap();

    let idles = idles.lock().unwrap();
    assert!(!idles.is_empty());
    assert!(
        idles.iter().any(|idle| *idle < 0.0),
        "overrun ticks should record negative idle, got {idles:?}"
    );
}

/// Runs quietly until shut down from outside.
struct QuietApp;

impl App for QuietApp {
    fn execute(&mut self, _supervisor: &mut Supervisor) -> Result<(), DaemonError> {
        Ok(())
    }
}

#[tokio::test]
#[serial(daemon)]
async fn sigterm_twice_shuts_down_once_and_cleanly() {
    let dir = TempDir::new().unwrap();
    let config = DaemonConfig::new()
        .loop_interval(Duration::from_millis(50))
        .pid_file(dir.path().join("daemon.pid"))
        .runtime_dir(dir.path());
    let pid_path = dir.path().join("daemon.pid");

    let killer = tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(250)).await;
        let pid = std::process::id().to_string();
        for _ in 0..2 {
            let _ = std::process::Command::new("kill")
                .args(["-TERM", &pid])
                .status();
        }
    });

    Daemon::new(config, QuietApp).run().await.unwrap();
    killer.await.unwrap();

    // Clean shutdown removed the pid file it owned
    assert!(!pid_path.exists());
}

/// Counts ticks; gives up via shutdown if churn never trips.
struct FailsafeApp {
    started: Instant,
}

impl App for FailsafeApp {
    fn execute(&mut self, supervisor: &mut Supervisor) -> Result<(), DaemonError> {
        if self.started.elapsed() > Duration::from_secs(30) {
            supervisor.request_shutdown();
        }
        Ok(())
    }
}

#[tokio::test]
#[serial(daemon)]
async fn continuously_failing_workers_are_fatal() {
    let dir = TempDir::new().unwrap();
    // Zero interval: busy loop, eager forking
    let config = DaemonConfig::new()
        .loop_interval(Duration::ZERO)
        .runtime_dir(dir.path());

    let mut pool = WorkerPool::new(
        PoolConfig::new("boom")
            .runtime_dir(dir.path())
            .max_workers(2),
    );
    pool.register("execute", method_fn(|_| Ok(json!(null))));

    let reaps = Arc::new(AtomicUsize::new(0));
    let reap_count = Arc::clone(&reaps);
    let daemon = Daemon::new(config, FailsafeApp { started: Instant::now() })
        .pool(pool)
        .on(stoker_core::EventKind::Reap, move |_| {
            reap_count.fetch_add(1, Ordering::SeqCst);
        })
        .configure(|supervisor| {
            // Workers that die instantly, well under their minimum TTL
            supervisor.manager_mut().set_worker_launcher(|_| {
                tokio::process::Command::new("false")
            });
        });

    let err = daemon.run().await.unwrap_err();
    match err {
        DaemonError::Process(ProcessError::Churn { count, .. }) => {
            assert!(count > 5, "churn window had {count} premature exits");
        }
        other => panic!("expected churn error, got {other}"),
    }
    // The supervisor observed reaps before declaring churn
    assert!(reaps.load(Ordering::SeqCst) > 0);
}
