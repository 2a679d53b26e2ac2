//! Main scanning engine implementation

use crate::error::ScanError;
use crate::network::Target;
use crate::scanner::{Probe, ScanOutcome, ScanPolicy, ScanReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

/// Sweeps a port range on one host with a bounded number of probes in flight
pub struct PortScanner<P> {
    host: String,
    probe: Arc<P>,
    policy: ScanPolicy,
}

impl<P: Probe + 'static> PortScanner<P> {
    pub fn new(host: impl Into<String>, probe: P, policy: ScanPolicy) -> Self {
        Self {
            host: host.into(),
            probe: Arc::new(probe),
            policy,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn policy(&self) -> &ScanPolicy {
        &self.policy
    }

    pub fn set_port_range(&mut self, start: u16, end: u16) {
        self.policy.start_port = start;
        self.policy.end_port = end;
    }

    pub fn set_concurrency(&mut self, concurrency: usize) {
        self.policy.concurrency = concurrency;
    }

    pub fn set_scan_delay(&mut self, scan_delay: Duration) {
        self.policy.scan_delay = scan_delay;
    }

    pub fn set_probe_timeout(&mut self, probe_timeout: Duration) {
        self.policy.probe_timeout = probe_timeout;
    }

    /// Probe every port in the range and collect the outcomes, sorted by port
    pub async fn scan(&self, cancel: &CancellationToken) -> crate::Result<ScanReport> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut report = self.scan_into(tx, cancel).await?;

        // Every sender is gone once the join barrier has passed
        while let Some(outcome) = rx.recv().await {
            report.outcomes.push(outcome);
        }
        report.sort_outcomes();
        Ok(report)
    }

    /// Probe every port, emitting each outcome on `sink` as it completes
    ///
    /// The returned report carries counts, duration and cancellation but no
    /// outcomes; those went to `sink`. Completion order is unspecified.
    pub async fn scan_into(
        &self,
        sink: mpsc::UnboundedSender<ScanOutcome>,
        cancel: &CancellationToken,
    ) -> crate::Result<ScanReport> {
        self.policy.validate()?;
        if self.host.trim().is_empty() {
            return Err(ScanError::InvalidTarget("Host cannot be empty".to_string()));
        }
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        let network = self.probe.network();
        if !network.is_tcp() {
            log::warn!(
                "{} probes only show that a connect succeeded; no response is not proof of a closed port",
                network
            );
        }

        let start_time = Instant::now();
        let ScanPolicy {
            start_port,
            end_port,
            concurrency,
            scan_delay,
            probe_timeout,
        } = self.policy.clone();

        log::info!(
            "Scanning {} ports {}-{} over {} ({} concurrent)",
            self.host,
            start_port,
            end_port,
            network,
            concurrency
        );

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut handles = Vec::with_capacity(self.policy.port_count());
        let mut report = ScanReport::new(self.host.clone());
        report.network = network;

        for port in start_port..=end_port {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    break;
                }
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let target = Target {
                host: self.host.clone(),
                port,
            };
            let probe = self.probe.clone();
            let sink = sink.clone();
            let token = cancel.clone();

            handles.push(tokio::spawn(async move {
                // Released on every exit path
                let _permit = permit;
                let started = Instant::now();

                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => return None,
                    result = timeout(probe_timeout, probe.probe(&target)) => result,
                };

                let outcome = match result {
                    Ok(Ok(message)) => {
                        log::info!("Connected to {}", target);
                        let outcome = ScanOutcome::reachable(target, started.elapsed());
                        match message {
                            Some(message) => outcome.with_message(message),
                            None => outcome,
                        }
                    }
                    Ok(Err(e)) => {
                        log::debug!("Failed to connect to {}: {}", target, e);
                        ScanOutcome::unreachable(target, e.to_string(), started.elapsed())
                    }
                    Err(_) => {
                        log::debug!("Probe of {} timed out", target);
                        ScanOutcome::unreachable(target, "probe timed out", started.elapsed())
                    }
                };

                let reachable = outcome.reachable;
                // A dropped receiver only means nobody is listening any more
                let _ = sink.send(outcome);
                Some(reachable)
            }));

            if !scan_delay.is_zero() && port < end_port {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        break;
                    }
                    _ = sleep(scan_delay) => {}
                }
            }
        }
        drop(sink);

        // Join barrier
        for handle in handles {
            match handle.await {
                Ok(Some(true)) => report.reachable += 1,
                Ok(Some(false)) => report.unreachable += 1,
                Ok(None) => report.cancelled = true,
                Err(e) => log::error!("Probe task failed: {}", e),
            }
        }

        report.duration = start_time.elapsed();
        if report.cancelled {
            log::warn!(
                "Scan of {} cancelled after {} of {} ports",
                self.host,
                report.total(),
                self.policy.port_count()
            );
        } else {
            log::info!(
                "Scan of {} finished in {:?}: {} reachable, {} unreachable",
                self.host,
                report.duration,
                report.reachable,
                report.unreachable
            );
        }
        if report.all_failed() {
            log::warn!("No port on {} was reachable", self.host);
        }

        Ok(report)
    }
}
