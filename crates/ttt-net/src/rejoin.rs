//! Rejoining the last match after a dropped connection.
//!
//! An attempt polls at a fixed interval until it succeeds, its time budget
//! runs out, or it is cancelled. Each iteration restores the socket if needed
//! and then tries to join the persisted match id.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tokio::time::Instant;
use ttt_config::RejoinConfig;

use crate::events::{ClientEvent, EventSink};
use crate::match_channel::MatchChannel;
use crate::session::TransportSession;

/// Drives rejoin attempts. At most one attempt runs at a time.
pub struct RejoinCoordinator {
    session: Arc<TransportSession>,
    channel: Arc<MatchChannel>,
    config: RejoinConfig,
    events: EventSink,
    in_flight: AtomicBool,
    /// Bumped by every `cancel`; an attempt stops once it differs from the
    /// value read before the attempt claimed `in_flight`.
    cancel_tx: watch::Sender<u64>,
}

/// Clears `in_flight` when the attempt ends, including when its future is
/// dropped.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RejoinCoordinator {
    pub fn new(
        session: Arc<TransportSession>,
        channel: Arc<MatchChannel>,
        config: RejoinConfig,
        events: EventSink,
    ) -> Self {
        let (cancel_tx, _) = watch::channel(0);
        Self {
            session,
            channel,
            config,
            events,
            in_flight: AtomicBool::new(false),
            cancel_tx,
        }
    }

    /// Try to get back into the last match.
    ///
    /// Emits [`ClientEvent::RejoinResult`] unless another attempt is already
    /// running, in which case this returns `false` straight away.
    pub async fn try_rejoin(&self) -> bool {
        if !self.config.enabled {
            tracing::debug!("Rejoin disabled");
            self.events.emit(ClientEvent::RejoinResult(false));
            return false;
        }
        let Some(match_id) = self.channel.last_match_id() else {
            tracing::debug!("No previous match to rejoin");
            self.events.emit(ClientEvent::RejoinResult(false));
            return false;
        };
        let epoch = *self.cancel_tx.borrow();
        if self.in_flight.swap(true, Ordering::AcqRel) {
            tracing::debug!("Rejoin already in progress");
            return false;
        }

        let guard = InFlight(&self.in_flight);
        let joined = self.poll(&match_id, epoch).await;
        drop(guard);

        self.events.emit(ClientEvent::RejoinResult(joined));
        joined
    }

    /// Stop the running attempt at its next iteration.
    pub fn cancel(&self) {
        if self.in_flight.load(Ordering::Acquire) {
            tracing::info!("Cancelling rejoin");
            self.cancel_tx.send_modify(|epoch| *epoch = epoch.wrapping_add(1));
        }
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    async fn poll(&self, match_id: &str, epoch: u64) -> bool {
        let budget = self.config.budget();
        let interval = self.config.poll_interval();
        let deadline = Instant::now() + budget;
        let mut cancel_rx = self.cancel_tx.subscribe();
        let mut attempt = 0u32;

        tracing::info!("Rejoining {match_id} for up to {budget:?}");
        while Instant::now() < deadline {
            if *cancel_rx.borrow_and_update() != epoch {
                tracing::info!("Rejoin of {match_id} cancelled");
                return false;
            }
            attempt += 1;

            let ready = if self.session.is_connected() {
                true
            } else {
                match self.session.reconnect_socket().await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::debug!("Rejoin attempt {attempt}: reconnect failed: {e}");
                        false
                    }
                }
            };

            if ready {
                match self.channel.join_by_id(match_id).await {
                    Ok(_) => {
                        tracing::info!("Rejoined {match_id} on attempt {attempt}");
                        return true;
                    }
                    Err(e) => tracing::debug!("Rejoin attempt {attempt}: join failed: {e}"),
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel_rx.changed() => {}
            }
        }

        tracing::warn!("Rejoin of {match_id} gave up after {attempt} attempts");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetError;
    use crate::mock::Harness;
    use std::time::Duration;
    use ttt_config::{Config, LAST_MATCH_ID_KEY, Prefs};

    fn config(timeout_seconds: f32, poll_interval_ms: u64) -> Config {
        let mut config = Config::default();
        config.rejoin.timeout_seconds = timeout_seconds;
        config.rejoin.poll_interval_ms = poll_interval_ms;
        config.rejoin.on_drop = false;
        config
    }

    fn with_last_match(config: Config, match_id: &str) -> Harness {
        let prefs = Arc::new(Prefs::in_memory());
        prefs.set(LAST_MATCH_ID_KEY, match_id).unwrap();
        Harness::with_prefs(config, prefs)
    }

    #[tokio::test]
    async fn test_no_last_match_fails_without_network() {
        let mut h = Harness::new();
        assert!(!h.shell.try_rejoin().await);
        assert_eq!(h.drain_events(), vec![ClientEvent::RejoinResult(false)]);
        assert_eq!(h.backend.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_disabled_fails_without_network() {
        let mut cfg = config(6.0, 300);
        cfg.rejoin.enabled = false;
        let mut h = with_last_match(cfg, "M1");

        assert!(!h.shell.try_rejoin().await);
        assert_eq!(h.drain_events(), vec![ClientEvent::RejoinResult(false)]);
        assert_eq!(h.backend.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_rejoin_after_drop_survives_failed_reconnects() {
        let mut h = Harness::with_config(config(6.0, 50));
        h.shell.connect("h").await.unwrap();
        h.shell.channel().join_by_id("M1").await.unwrap();

        h.backend.last_socket().drop_connection();
        h.pump().await;
        assert!(!h.shell.session().is_connected());
        assert_eq!(h.shell.channel().current_match(), None);

        h.backend.fail_connects(2, "refused");
        h.drain_events();
        let started = std::time::Instant::now();
        assert!(h.shell.try_rejoin().await);
        assert!(started.elapsed() < Duration::from_secs(6));

        assert_eq!(h.backend.connect_calls(), 4);
        assert_eq!(
            h.shell.channel().current_match().map(|m| m.match_id),
            Some("M1".to_string())
        );
        let events = h.drain_events();
        assert_eq!(events.last(), Some(&ClientEvent::RejoinResult(true)));
        let errors = events
            .iter()
            .filter(|e| matches!(e, ClientEvent::ConnectionError(_)))
            .count();
        assert_eq!(errors, 2);
    }

    #[tokio::test]
    async fn test_join_failures_are_retried() {
        let mut h = with_last_match(config(6.0, 50), "M1");
        h.shell.session().connect("h").await.unwrap();
        h.backend
            .fail_joins(2, NetError::Rejected("not_found: match not found".to_string()));

        assert!(h.shell.try_rejoin().await);
        assert_eq!(h.backend.count_calls("join:M1"), 3);
        assert_eq!(h.drain_events().last(), Some(&ClientEvent::RejoinResult(true)));
    }

    #[tokio::test]
    async fn test_budget_floor_is_one_second() {
        let mut h = with_last_match(config(0.2, 100), "M1");
        h.shell.session().connect("h").await.unwrap();
        h.backend.fail_joins(100, NetError::Socket("gone".to_string()));

        let started = std::time::Instant::now();
        assert!(!h.shell.try_rejoin().await);
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(1), "gave up after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
        assert_eq!(h.drain_events().last(), Some(&ClientEvent::RejoinResult(false)));
    }

    #[tokio::test]
    async fn test_overlapping_attempt_returns_immediately() {
        let mut h = with_last_match(config(2.0, 50), "M1");
        h.shell.session().connect("h").await.unwrap();
        h.backend.fail_joins(1000, NetError::Socket("gone".to_string()));

        let rejoin = h.shell.rejoin();
        let first = tokio::spawn(async move { rejoin.try_rejoin().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.shell.rejoin().is_running());

        let joins_before = h.backend.count_calls("join:");
        assert!(!h.shell.try_rejoin().await);
        assert!(h.backend.count_calls("join:") <= joins_before + 1);

        assert!(!first.await.unwrap());
        let results = h
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, ClientEvent::RejoinResult(_)))
            .count();
        assert_eq!(results, 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_attempt() {
        let h = with_last_match(config(6.0, 300), "M1");
        h.shell.session().connect("h").await.unwrap();
        h.backend.fail_joins(1000, NetError::Socket("gone".to_string()));

        let rejoin = h.shell.rejoin();
        let started = std::time::Instant::now();
        let attempt = tokio::spawn(async move { rejoin.try_rejoin().await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.shell.rejoin().cancel();

        assert!(!attempt.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!h.shell.rejoin().is_running());
    }

    #[tokio::test]
    async fn test_timeout_when_every_reconnect_fails() {
        let mut h = Harness::with_config(config(1.0, 300));
        h.shell.connect("h").await.unwrap();
        h.shell.channel().join_by_id("M1").await.unwrap();
        h.backend.last_socket().drop_connection();
        h.pump().await;
        h.backend.fail_connects(100, "refused");
        h.drain_events();

        let started = std::time::Instant::now();
        assert!(!h.shell.try_rejoin().await);
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(1), "gave up after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(2500), "took {elapsed:?}");
        assert_eq!(h.backend.count_calls("join:"), 1);
        assert_eq!(h.drain_events().last(), Some(&ClientEvent::RejoinResult(false)));
        assert_eq!(h.shell.channel().last_match_id().as_deref(), Some("M1"));
    }

    #[tokio::test]
    async fn test_attempts_are_spaced_by_default_interval() {
        let mut h = Harness::with_config(config(6.0, 300));
        h.shell.connect("h").await.unwrap();
        h.shell.channel().join_by_id("M1").await.unwrap();
        h.backend.last_socket().drop_connection();
        h.pump().await;
        h.backend.fail_connects(2, "refused");
        h.drain_events();

        let started = std::time::Instant::now();
        assert!(h.shell.try_rejoin().await);
        assert!(started.elapsed() >= Duration::from_millis(600));

        let times = h.backend.connect_times();
        let attempts = &times[times.len() - 3..];
        for pair in attempts.windows(2) {
            let gap = pair[1] - pair[0];
            assert!(gap >= Duration::from_millis(290), "attempts {gap:?} apart");
            assert!(gap < Duration::from_millis(600), "attempts {gap:?} apart");
        }
        assert_eq!(h.drain_events().last(), Some(&ClientEvent::RejoinResult(true)));
    }

    #[tokio::test]
    async fn test_cleared_cache_makes_no_network_calls() {
        let mut h = with_last_match(config(6.0, 300), "M1");
        h.shell.channel().clear_last_match_cache();

        assert!(!h.shell.try_rejoin().await);
        assert_eq!(h.backend.connect_calls(), 0);
        assert_eq!(h.backend.count_calls("join:"), 0);
        assert_eq!(h.drain_events(), vec![ClientEvent::RejoinResult(false)]);
    }

    #[tokio::test]
    async fn test_dropped_attempt_releases_in_flight() {
        let h = with_last_match(config(6.0, 50), "M1");
        h.shell.session().connect("h").await.unwrap();
        h.backend.fail_joins(2, NetError::Socket("gone".to_string()));

        let rejoin = h.shell.rejoin();
        let dropped = tokio::time::timeout(Duration::from_millis(20), rejoin.try_rejoin()).await;
        assert!(dropped.is_err());
        assert!(!rejoin.is_running());

        assert!(rejoin.try_rejoin().await);
        assert_eq!(h.backend.count_calls("join:M1"), 3);
    }

    #[tokio::test]
    async fn test_cancel_while_idle_does_not_stop_next_attempt() {
        let h = with_last_match(config(6.0, 50), "M1");
        h.shell.session().connect("h").await.unwrap();
        h.shell.rejoin().cancel();
        h.backend.fail_joins(1, NetError::Socket("gone".to_string()));

        assert!(h.shell.try_rejoin().await);
        assert_eq!(h.backend.count_calls("join:M1"), 2);
    }

    #[tokio::test]
    async fn test_cancel_right_after_start_is_not_lost() {
        let h = with_last_match(config(6.0, 300), "M1");
        h.shell.session().connect("h").await.unwrap();
        h.backend.fail_joins(1000, NetError::Socket("gone".to_string()));

        let rejoin = h.shell.rejoin();
        let started = std::time::Instant::now();
        let attempt = tokio::spawn(async move { rejoin.try_rejoin().await });
        while !h.shell.rejoin().is_running() {
            tokio::task::yield_now().await;
        }
        h.shell.rejoin().cancel();

        assert!(!attempt.await.unwrap());
        assert!(started.elapsed() < Duration::from_millis(250));
        assert_eq!(h.backend.count_calls("join:M1"), 1);
    }
}
