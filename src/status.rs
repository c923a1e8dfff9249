use crate::backend::BackendSupervisor;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tauri::{AppHandle, Emitter};

/// Fixed poll cadence; no backoff, no circuit breaking.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Per-probe request timeout, well under the poll interval.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for the backend to come up before giving up and
/// surfacing a failure state.
pub const READY_DEADLINE: Duration = Duration::from_secs(30);

const READY_POLL_INTERVAL: Duration = Duration::from_millis(300);

/// Event carrying an [`IndicatorReport`] to the page on every committed poll.
pub const STATUS_EVENT: &str = "backend-status";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndicatorState {
    Online,
    Offline,
    Unknown,
}

/// Snapshot of both indicators as shown in the page footer. The host
/// indicator reports online whenever the shell itself is running.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorReport {
    pub backend: IndicatorState,
    pub host: IndicatorState,
}

#[derive(Deserialize)]
struct StatusBody {
    status: Option<String>,
}

/// Indicator state shared between the poll loop and the `backend_status`
/// command. Commits are ordered by a generation counter so a slow probe
/// that resolves late cannot overwrite a newer result.
pub struct StatusBoard {
    inner: Mutex<BoardInner>,
    next_generation: AtomicU64,
}

struct BoardInner {
    backend: IndicatorState,
    committed_generation: u64,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BoardInner {
                backend: IndicatorState::Unknown,
                committed_generation: 0,
            }),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Reserve a generation for a probe about to be issued.
    pub fn begin_probe(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Apply a probe result unless a later probe already resolved.
    /// Returns whether the result was taken.
    pub fn commit(&self, generation: u64, state: IndicatorState) -> bool {
        let mut inner = self.inner.lock();
        if generation <= inner.committed_generation {
            return false;
        }
        inner.committed_generation = generation;
        inner.backend = state;
        true
    }

    pub fn report(&self) -> IndicatorReport {
        IndicatorReport {
            backend: self.inner.lock().backend,
            host: IndicatorState::Online,
        }
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify a 2xx response body. Only an explicit `status: "running"` counts
/// as online; anything else, including a missing field or unparseable body,
/// does not verify the backend.
fn classify_body(body: &[u8]) -> IndicatorState {
    match serde_json::from_slice::<StatusBody>(body) {
        Ok(parsed) if parsed.status.as_deref() == Some("running") => IndicatorState::Online,
        Ok(_) => IndicatorState::Offline,
        Err(_) => IndicatorState::Offline,
    }
}

/// One liveness probe. Every failure mode degrades to offline; nothing here
/// propagates as an application fault.
pub async fn probe_once(client: &reqwest::Client, status_url: &str) -> IndicatorState {
    probe_with_timeout(client, status_url, PROBE_TIMEOUT).await
}

async fn probe_with_timeout(
    client: &reqwest::Client,
    status_url: &str,
    timeout: Duration,
) -> IndicatorState {
    let response = client.get(status_url).timeout(timeout).send().await;

    match response {
        Ok(resp) if resp.status().is_success() => match resp.bytes().await {
            Ok(body) => classify_body(&body),
            Err(e) => {
                log::debug!("status body read failed: {}", e);
                IndicatorState::Offline
            }
        },
        Ok(resp) => {
            log::debug!("status probe returned {}", resp.status());
            IndicatorState::Offline
        }
        Err(e) => {
            log::debug!("status probe failed: {}", e);
            IndicatorState::Offline
        }
    }
}

/// Bounded readiness wait: poll the liveness endpoint until the backend
/// answers `running` or the deadline expires. Used once, between spawn and
/// the first page load.
pub async fn wait_for_ready(
    client: &reqwest::Client,
    status_url: &str,
    deadline: Duration,
) -> Result<(), String> {
    let started = Instant::now();
    loop {
        let Some(remaining) = remaining_budget(started, deadline) else {
            return Err(format!(
                "backend not reachable at {} after {:?}",
                status_url, deadline
            ));
        };
        // a probe against a black-holing endpoint must not run past the
        // deadline, so its timeout is capped to what is left of the budget
        let probe_timeout = PROBE_TIMEOUT.min(remaining);
        if probe_with_timeout(client, status_url, probe_timeout).await == IndicatorState::Online {
            return Ok(());
        }
        tokio::time::sleep(READY_POLL_INTERVAL.min(remaining)).await;
    }
}

/// Budget left before the deadline expires; `None` once it has.
fn remaining_budget(started: Instant, deadline: Duration) -> Option<Duration> {
    deadline
        .checked_sub(started.elapsed())
        .filter(|left| !left.is_zero())
}

/// Fixed-interval liveness loop. Each cycle also reaps a crashed child so
/// the exit code lands in the log close to the indicator flip. Runs until
/// the page context is torn down with the application.
pub async fn run_poll_loop(
    app: AppHandle,
    board: Arc<StatusBoard>,
    supervisor: Arc<BackendSupervisor>,
    client: reqwest::Client,
    status_url: String,
) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        ticker.tick().await;
        supervisor.poll_exit();

        let generation = board.begin_probe();
        let state = probe_once(&client, &status_url).await;
        if board.commit(generation, state) {
            if let Err(e) = app.emit(STATUS_EVENT, board.report()) {
                log::debug!("failed to emit status event: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_status_maps_to_online() {
        let body = br#"{"status": "running", "app": "Engineering/Drafting Tools", "version": "1.0.0"}"#;
        assert_eq!(classify_body(body), IndicatorState::Online);
    }

    #[test]
    fn other_status_values_map_to_offline() {
        assert_eq!(
            classify_body(br#"{"status": "starting"}"#),
            IndicatorState::Offline
        );
        assert_eq!(
            classify_body(br#"{"status": ""}"#),
            IndicatorState::Offline
        );
    }

    #[test]
    fn missing_or_malformed_body_maps_to_offline() {
        assert_eq!(classify_body(br#"{}"#), IndicatorState::Offline);
        assert_eq!(classify_body(br#"{"ok": true}"#), IndicatorState::Offline);
        assert_eq!(classify_body(b"not json"), IndicatorState::Offline);
        assert_eq!(classify_body(b""), IndicatorState::Offline);
    }

    #[test]
    fn board_starts_unknown_with_host_online() {
        let board = StatusBoard::new();
        let report = board.report();
        assert_eq!(report.backend, IndicatorState::Unknown);
        assert_eq!(report.host, IndicatorState::Online);
    }

    #[test]
    fn latest_resolution_wins_over_stale_probe() {
        let board = StatusBoard::new();

        // first probe issued, then a second one; the second resolves first
        let first = board.begin_probe();
        let second = board.begin_probe();

        assert!(board.commit(second, IndicatorState::Online));
        assert_eq!(board.report().backend, IndicatorState::Online);

        // the stale result must not be taken
        assert!(!board.commit(first, IndicatorState::Offline));
        assert_eq!(board.report().backend, IndicatorState::Online);
    }

    #[test]
    fn in_order_commits_apply() {
        let board = StatusBoard::new();
        let first = board.begin_probe();
        assert!(board.commit(first, IndicatorState::Offline));
        let second = board.begin_probe();
        assert!(board.commit(second, IndicatorState::Online));
        assert_eq!(board.report().backend, IndicatorState::Online);
    }

    #[tokio::test]
    async fn unreachable_backend_times_out_without_panicking() {
        // nothing listens here; probes fail fast with connection refused
        let client = reqwest::Client::new();
        let result = wait_for_ready(
            &client,
            "http://127.0.0.1:59999/api/status",
            Duration::from_millis(200),
        )
        .await;
        assert!(result.is_err());
    }

    #[test]
    fn budget_is_capped_by_deadline_and_expires() {
        let started = Instant::now();
        let remaining = remaining_budget(started, Duration::from_secs(30)).expect("fresh budget");
        assert!(remaining <= Duration::from_secs(30));
        assert!(remaining > Duration::from_secs(29));
        // probe timeout never exceeds what is left
        assert!(PROBE_TIMEOUT.min(remaining) <= remaining);

        let long_ago = Instant::now() - Duration::from_secs(60);
        assert!(remaining_budget(long_ago, Duration::from_secs(30)).is_none());
    }

    #[tokio::test]
    async fn readiness_wait_does_not_overshoot_its_deadline() {
        let client = reqwest::Client::new();
        let started = Instant::now();
        let result = wait_for_ready(
            &client,
            "http://127.0.0.1:59997/api/status",
            Duration::from_millis(200),
        )
        .await;
        assert!(result.is_err());
        // the final sleep and probe are capped to the remaining budget
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn probe_against_closed_port_is_offline() {
        let client = reqwest::Client::new();
        let state = probe_once(&client, "http://127.0.0.1:59998/api/status").await;
        assert_eq!(state, IndicatorState::Offline);
    }
}
