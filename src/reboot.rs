//! Reboot and watch the router come back
//!
//! The run is a strict sequence of phases, each with its own polling budget:
//!
//! 1. send the reboot form
//! 2. keep logging in until a login *fails*: the router answers normally for
//!    a while after accepting the reboot, so a success here means nothing
//! 3. keep logging in until one succeeds again
//! 4. follow DOCSIS provisioning up to registration
//! 5. follow GRE tunnel negotiation, when the router has a tunnel account
//! 6. ping from the router until a test passes
//!
//! Nothing here returns an error. Every run ends in a [`RebootOutcome`] and a
//! timestamped narration of how it got there.

use crate::config::{RebootConfig, RecoveryMode};
use crate::diag::DiagnosticProbe;
use crate::error::DeviceError;
use crate::poll::{Narration, NarrationEntry, Poller};
use crate::session::Session;
use crate::telemetry;
use crate::utils::human_time;
use std::time::Duration;

pub const REBOOT_PATH: &str = "goform/Reboot";
const REBOOT_MODEL: &str = r#"{"reboot":"1"}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Triggered,
    AwaitingDowntime,
    Reconnecting,
    AwaitingRegistration,
    AwaitingTunnel,
    VerifyingReachability,
    Complete,
    PartialFailure,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// No CSRF token could be obtained to sign the reboot form
    RebootNotSent,
    /// Logins kept succeeding; the router never restarted
    NeverWentDown,
    /// The router went down and did not accept a login again
    NeverReconnected,
    /// Lost the session again before any ping test passed
    Unreachable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootOutcome {
    /// A ping test passed after the restart
    Complete,
    /// Back up and logged in, but nothing gets through: likely a line fault
    PartialFailure,
    Failed(FailureReason),
}

#[derive(Debug, Clone)]
pub struct RebootReport {
    pub outcome: RebootOutcome,
    pub elapsed: Duration,
    pub tunnel_expected: bool,
    /// Every phase entered, in order
    pub phases: Vec<Phase>,
    pub narration: Vec<NarrationEntry>,
}

impl RebootReport {
    pub fn succeeded(&self) -> bool {
        self.outcome == RebootOutcome::Complete
    }
}

/// Trigger the reboot with a fresh CSRF token
pub async fn trigger(session: &mut Session) -> Result<(), DeviceError> {
    session.post_signed(REBOOT_PATH, REBOOT_MODEL).await
}

/// One reboot-and-recover run. Owns the session exclusively until it ends.
pub struct RebootOrchestrator<'a> {
    session: &'a mut Session,
    probe: &'a DiagnosticProbe,
    config: &'a RebootConfig,
    phases: Vec<Phase>,
    log: Narration,
    tunnel_expected: bool,
}

impl<'a> RebootOrchestrator<'a> {
    pub fn new(session: &'a mut Session, probe: &'a DiagnosticProbe, config: &'a RebootConfig) -> Self {
        Self {
            session,
            probe,
            config,
            phases: Vec::new(),
            log: Narration::start(),
            tunnel_expected: false,
        }
    }

    pub async fn run(mut self, target: &str) -> RebootReport {
        if self.config.mode == RecoveryMode::Full {
            self.tunnel_expected = match telemetry::tunnel_configured(self.session).await {
                Ok(configured) => configured,
                Err(e) => {
                    tracing::debug!("Could not read tunnel account, assuming none: {}", e);
                    false
                }
            };
        }

        self.enter(Phase::Triggered, "Requesting reboot");
        let token = self.session.csrf().await;
        let token = match token {
            Ok(token) => token,
            Err(e) => {
                return self.finish(
                    RebootOutcome::Failed(FailureReason::RebootNotSent),
                    format!("Unable to request reboot: {}", e),
                )
            }
        };
        let sent = self.session.submit(REBOOT_PATH, REBOOT_MODEL, token).await;
        match sent {
            Ok(()) => {}
            // The router may drop the connection as it starts restarting
            Err(DeviceError::Connectivity(e)) => {
                self.log.warn(format!("No reply to reboot request ({}), watching for downtime anyway", e));
            }
            Err(e) => {
                return self.finish(
                    RebootOutcome::Failed(FailureReason::RebootNotSent),
                    format!("Router rejected reboot request: {}", e),
                )
            }
        }

        self.enter(Phase::AwaitingDowntime, "Reboot requested, waiting for router to go down");
        if let Err(reason) = self.await_restart().await {
            let message = match reason {
                FailureReason::NeverWentDown => {
                    "Router does not appear to be rebooting, try manually removing power to device"
                }
                _ => "Unable to reach router after reboot, try manually removing power to device",
            };
            return self.finish(RebootOutcome::Failed(reason), message);
        }

        match self.config.mode {
            RecoveryMode::Full => {
                self.enter(Phase::AwaitingRegistration, "Logged in after reboot");
                self.await_registration().await;
                if self.tunnel_expected {
                    self.enter(
                        Phase::AwaitingTunnel,
                        "VMB GRE tunnel configured, testing that it comes online",
                    );
                    self.await_tunnel().await;
                }
                self.enter(Phase::VerifyingReachability, format!("Testing connectivity to {}", target));
            }
            RecoveryMode::Basic => {
                self.enter(Phase::VerifyingReachability, "Logged in after reboot");
            }
        }

        self.verify(target).await
    }

    /// Downtime then reconnect, sharing one login budget
    async fn await_restart(&mut self) -> Result<(), FailureReason> {
        let mut poller = Poller::new("reconnect", self.config.reconnect_policy());
        let mut went_down = false;

        while let Some(attempt) = poller.next().await {
            match self.session.attempt().await {
                Ok(()) if went_down => return Ok(()),
                Ok(()) => {
                    if attempt > self.config.abort_after {
                        return Err(FailureReason::NeverWentDown);
                    }
                    if self.config.narrate {
                        self.log.say_if_changed("Router still accepting logins");
                    }
                }
                Err(e) if !went_down => {
                    tracing::debug!("First failed login after reboot: {}", e);
                    went_down = true;
                    self.enter(Phase::Reconnecting, "Confirmed router has gone down for reboot");
                    let grace = self.config.boot_grace();
                    if !grace.is_zero() {
                        self.log.say(format!(
                            "Reboot normally takes ~{}, waiting to begin testing",
                            human_time(grace.as_secs())
                        ));
                        tokio::time::sleep(grace).await;
                    }
                }
                Err(e) => {
                    tracing::debug!("Login attempt {} failed: {}", attempt, e);
                    if self.config.narrate {
                        self.log.say_if_changed("Not logged in yet");
                    }
                }
            }
        }

        Err(if went_down {
            FailureReason::NeverReconnected
        } else {
            FailureReason::NeverWentDown
        })
    }

    async fn await_registration(&mut self) {
        let mut poller = Poller::new("DOCSIS registration", self.config.registration_policy());

        while poller.next().await.is_some() {
            let (registered, message) = match telemetry::docsis_state(self.session).await {
                Ok(state) => (state.registered(), state.message().to_string()),
                Err(e) => (false, format!("DOCSIS status unavailable: {}", e)),
            };
            if self.config.narrate || registered {
                self.log.say_if_changed(message);
            }
            if registered {
                return;
            }
        }

        self.log.warn(format!("{}, testing connectivity anyway", poller.exhausted()));
    }

    async fn await_tunnel(&mut self) {
        let mut poller = Poller::new("GRE tunnel", self.config.tunnel_policy());

        while poller.next().await.is_some() {
            let (up, message) = match telemetry::tunnel_state(self.session).await {
                Ok(state) => (state.up(), state.message()),
                Err(e) => (false, format!("Tunnel status unavailable: {}", e)),
            };
            if self.config.narrate || up {
                self.log.say_if_changed(message);
            }
            if up {
                return;
            }
        }

        self.log.warn(format!("{}, testing connectivity anyway", poller.exhausted()));
    }

    async fn verify(mut self, target: &str) -> RebootReport {
        let mut poller = Poller::new("reachability", self.config.verify_policy());

        while let Some(attempt) = poller.next().await {
            let tested = self.probe.run(self.session, target).await;
            let failure = match tested {
                Ok(result) if result.passed => {
                    return self.finish(
                        RebootOutcome::Complete,
                        format!(
                            "Reboot completed and connectivity appears to be restored ({}% packet loss to {})",
                            result.loss, target
                        ),
                    );
                }
                Ok(result) => format!("{}% packet loss", result.loss),
                Err(e) => e.to_string(),
            };
            if self.config.narrate {
                self.log.say(format!(
                    "Failed to ping {} (attempt {}/{}): {}",
                    target, attempt, self.config.verify_attempts, failure
                ));
            }
        }

        if self.session.logged_in() {
            self.finish(
                RebootOutcome::PartialFailure,
                format!(
                    "Reboot completed but unable to ping {} - investigate a potential line fault!",
                    target
                ),
            )
        } else {
            self.finish(
                RebootOutcome::Failed(FailureReason::Unreachable),
                "Unable to reach router after reboot, try manually removing power to device",
            )
        }
    }

    fn enter(&mut self, phase: Phase, message: impl Into<String>) {
        tracing::debug!("Entering {:?}", phase);
        self.phases.push(phase);
        self.log.phase(message);
    }

    fn finish(mut self, outcome: RebootOutcome, message: impl Into<String>) -> RebootReport {
        let phase = match outcome {
            RebootOutcome::Complete => Phase::Complete,
            RebootOutcome::PartialFailure => Phase::PartialFailure,
            RebootOutcome::Failed(_) => Phase::Failed,
        };
        self.phases.push(phase);
        if outcome == RebootOutcome::Complete {
            self.log.phase(message);
        } else {
            self.log.warn(message);
        }

        RebootReport {
            outcome,
            elapsed: self.log.elapsed(),
            tunnel_expected: self.tunnel_expected,
            phases: self.phases,
            narration: self.log.into_entries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RebootConfig;
    use crate::diag::{ADMIN_DIAG_PATH, TEST_DIAG_PATH};
    use crate::models::{Credentials, DocsisStage};
    use crate::poll::PollPolicy;
    use crate::telemetry::{DOCSIS_PATH, TUNNEL_ACCOUNT_PATH, TUNNEL_STATUS_PATH};
    use crate::testing::{FakeDevice, Login};
    use serde_json::json;

    const CSRF_PATH: &str = "data/getCsrf.asp";

    fn fast_config() -> RebootConfig {
        RebootConfig {
            reconnect_interval_ms: 0,
            boot_grace_secs: 0,
            registration_interval_ms: 0,
            tunnel_interval_ms: 0,
            ..RebootConfig::default()
        }
    }

    fn ping_text(received: u32, loss: u32) -> String {
        format!(
            "PING 8.8.8.8 (8.8.8.8): 56 data bytes#--- 8.8.8.8 ping statistics ---#\
             #4 packets transmitted, {} packets received, {}% packet loss#\
             round-trip min/avg/max = 11.8/11.9/12.1 ms",
            received, loss
        )
    }

    fn healthy_device() -> FakeDevice {
        let device = FakeDevice::new();
        device.respond(CSRF_PATH, json!({"Csrf_token": "tok"}));
        device.respond(TUNNEL_ACCOUNT_PATH, json!([{"Username": ""}]));
        device.respond(DOCSIS_PATH, json!([{"registration": "Success"}]));
        device.respond(ADMIN_DIAG_PATH, json!([{"testresult": ping_text(4, 0)}]));
        device
    }

    fn session(device: &FakeDevice) -> Session {
        Session::new(
            Box::new(device.clone()),
            Credentials {
                username: "admin".into(),
                password: "password".into(),
            },
            2,
            Duration::from_secs(3),
        )
    }

    fn probe() -> DiagnosticProbe {
        DiagnosticProbe::new(30, PollPolicy::new(8, Duration::ZERO))
    }

    fn count(report: &RebootReport, message: &str) -> usize {
        report
            .narration
            .iter()
            .filter(|e| e.message == message)
            .count()
    }

    #[tokio::test]
    async fn test_reboot_and_recover_end_to_end() {
        let device = healthy_device();
        device.script_logins([Login::Unreachable; 5]);
        device.clear(DOCSIS_PATH);
        device.respond(DOCSIS_PATH, json!([{"hwInit": "Success"}]));
        device.respond(DOCSIS_PATH, json!([{"hwInit": "Success"}]));
        device.respond(DOCSIS_PATH, json!([{"hwInit": "Success", "findDownstream": "Success"}]));
        device.respond(DOCSIS_PATH, json!([{"hwInit": "Success", "findDownstream": "Success", "ranging": "Success"}]));
        device.respond(DOCSIS_PATH, json!([{"ranging": "Success", "dhcp": "Success"}]));
        device.respond(DOCSIS_PATH, json!([{"dhcp": "Success", "downloadCfg": "Success"}]));
        device.respond(DOCSIS_PATH, json!([{"downloadCfg": "Success", "registration": "Success"}]));

        let mut session = session(&device);
        let probe = probe();
        let config = fast_config();
        let report = RebootOrchestrator::new(&mut session, &probe, &config)
            .run("8.8.8.8")
            .await;

        assert_eq!(report.outcome, RebootOutcome::Complete);
        assert!(report.succeeded());
        assert!(!report.tunnel_expected);
        assert_eq!(
            report.phases,
            vec![
                Phase::Triggered,
                Phase::AwaitingDowntime,
                Phase::Reconnecting,
                Phase::AwaitingRegistration,
                Phase::VerifyingReachability,
                Phase::Complete,
            ]
        );
        assert_eq!(count(&report, "Confirmed router has gone down for reboot"), 1);
        assert_eq!(count(&report, "Logged in after reboot"), 1);
        assert_eq!(count(&report, "Not logged in yet"), 1);

        let docsis: Vec<&str> = report
            .narration
            .iter()
            .map(|e| e.message.as_str())
            .filter(|m| DocsisStage::LADDER.iter().any(|s| s.message() == *m))
            .collect();
        assert_eq!(
            docsis,
            vec![
                "DOCSIS modem alive, searching downstream channels for CMTS broadcast",
                "Downstream DOCSIS channel locked, ranging transmit power",
                "DOCSIS ranging complete, requesting time slot to broadcast for DHCP",
                "Obtained DHCP, downloading DOCSIS config file",
                "Config file downloaded, registering on network and bonding channels",
                "Modem registered, service online",
            ]
        );

        assert_eq!(device.posts_to(REBOOT_PATH).len(), 1);
        assert_eq!(device.posts_to("goform/login").len(), 6);
        assert!(report
            .narration
            .windows(2)
            .all(|w| w[0].elapsed <= w[1].elapsed));
        assert!(report.elapsed >= report.narration.last().unwrap().elapsed);
    }

    #[tokio::test]
    async fn test_first_success_after_reboot_is_not_recovery() {
        let device = healthy_device();
        device.script_logins([Login::Accept, Login::Accept, Login::Unreachable, Login::Accept]);

        let mut session = session(&device);
        let probe = probe();
        let config = fast_config();
        let report = RebootOrchestrator::new(&mut session, &probe, &config)
            .run("8.8.8.8")
            .await;

        assert_eq!(report.outcome, RebootOutcome::Complete);
        assert_eq!(device.posts_to("goform/login").len(), 4);
        assert_eq!(count(&report, "Router still accepting logins"), 1);
        let down = report
            .narration
            .iter()
            .position(|e| e.message == "Confirmed router has gone down for reboot")
            .unwrap();
        let up = report
            .narration
            .iter()
            .position(|e| e.message == "Logged in after reboot")
            .unwrap();
        assert!(down < up);
    }

    #[tokio::test]
    async fn test_router_that_never_goes_down() {
        let device = healthy_device();
        let mut session = session(&device);
        let probe = probe();
        let config = fast_config();

        let report = RebootOrchestrator::new(&mut session, &probe, &config)
            .run("8.8.8.8")
            .await;

        assert_eq!(report.outcome, RebootOutcome::Failed(FailureReason::NeverWentDown));
        assert_eq!(report.phases.last(), Some(&Phase::Failed));
        assert_eq!(
            device.posts_to("goform/login").len() as u32,
            config.abort_after + 1
        );
        assert_eq!(device.posts_to(TEST_DIAG_PATH).len(), 0);
    }

    #[tokio::test]
    async fn test_router_that_never_comes_back() {
        let device = healthy_device();
        device.script_logins([Login::Unreachable; 20]);
        let mut session = session(&device);
        let probe = probe();
        let config = RebootConfig {
            reconnect_budget: 20,
            ..fast_config()
        };

        let report = RebootOrchestrator::new(&mut session, &probe, &config)
            .run("8.8.8.8")
            .await;

        assert_eq!(report.outcome, RebootOutcome::Failed(FailureReason::NeverReconnected));
        assert_eq!(device.posts_to("goform/login").len(), 20);
        assert_eq!(
            report.narration.last().unwrap().message,
            "Unable to reach router after reboot, try manually removing power to device"
        );
    }

    #[tokio::test]
    async fn test_line_fault_is_partial_failure() {
        let device = healthy_device();
        device.script_logins([Login::Unreachable]);
        device.clear(ADMIN_DIAG_PATH);
        device.respond(ADMIN_DIAG_PATH, json!([{"testresult": ping_text(0, 100)}]));
        let mut session = session(&device);
        let probe = probe();
        let config = RebootConfig {
            verify_attempts: 3,
            ..fast_config()
        };

        let report = RebootOrchestrator::new(&mut session, &probe, &config)
            .run("8.8.8.8")
            .await;

        assert_eq!(report.outcome, RebootOutcome::PartialFailure);
        assert_eq!(device.posts_to(TEST_DIAG_PATH).len(), 3);
        let attempts = report
            .narration
            .iter()
            .filter(|e| e.message.starts_with("Failed to ping 8.8.8.8"))
            .count();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_tunnel_phase_when_configured() {
        let device = healthy_device();
        device.script_logins([Login::Unreachable]);
        device.clear(TUNNEL_ACCOUNT_PATH);
        device.respond(TUNNEL_ACCOUNT_PATH, json!([{"Username": "vmb-1"}]));
        device.respond(TUNNEL_STATUS_PATH, json!([{"Radius": "Init"}]));
        device.respond(TUNNEL_STATUS_PATH, json!([{"Radius": "Init"}]));
        device.respond(TUNNEL_STATUS_PATH, json!([{"Radius": "Authentication Start"}]));
        device.respond(
            TUNNEL_STATUS_PATH,
            json!([{"Radius": "Authentication Success", "GRETunnel": "Established"}]),
        );
        device.respond(
            TUNNEL_STATUS_PATH,
            json!([{"Radius": "Authentication Success", "GRETunnel": "DHCP Success", "WanIp": "81.2.3.0/29"}]),
        );
        let mut session = session(&device);
        let probe = probe();
        let config = fast_config();

        let report = RebootOrchestrator::new(&mut session, &probe, &config)
            .run("8.8.8.8")
            .await;

        assert!(report.tunnel_expected);
        assert!(report.phases.contains(&Phase::AwaitingTunnel));
        let tunnel: Vec<&str> = report
            .narration
            .iter()
            .map(|e| e.message.as_str())
            .filter(|m| m.starts_with("Tunnel"))
            .collect();
        assert_eq!(
            tunnel,
            vec![
                "Tunnel is attempting to start RADIUS authentication",
                "Tunnel is currently negotiating RADIUS",
                "Tunnel established, awaiting DHCP message",
                "Tunnel has IP range 81.2.3.0/29",
            ]
        );
        assert_eq!(report.outcome, RebootOutcome::Complete);
    }

    #[tokio::test]
    async fn test_basic_mode_skips_docsis_and_tunnel() {
        let device = healthy_device();
        device.script_logins([Login::Unreachable]);
        device.respond(TUNNEL_ACCOUNT_PATH, json!([{"Username": "vmb-1"}]));
        let mut session = session(&device);
        let probe = probe();
        let config = RebootConfig {
            mode: RecoveryMode::Basic,
            ..fast_config()
        };

        let report = RebootOrchestrator::new(&mut session, &probe, &config)
            .run("8.8.8.8")
            .await;

        assert_eq!(report.outcome, RebootOutcome::Complete);
        assert!(!report.tunnel_expected);
        assert!(!report.phases.contains(&Phase::AwaitingRegistration));
        assert_eq!(device.gets(DOCSIS_PATH), 0);
        assert_eq!(device.gets(TUNNEL_ACCOUNT_PATH), 0);
    }

    #[tokio::test]
    async fn test_registration_timeout_still_verifies() {
        let device = healthy_device();
        device.script_logins([Login::Unreachable]);
        device.clear(DOCSIS_PATH);
        device.respond(DOCSIS_PATH, json!([{"ranging": "Success"}]));
        let mut session = session(&device);
        let probe = probe();
        let config = RebootConfig {
            registration_budget: 5,
            ..fast_config()
        };

        let report = RebootOrchestrator::new(&mut session, &probe, &config)
            .run("8.8.8.8")
            .await;

        assert_eq!(device.gets(DOCSIS_PATH), 5);
        assert!(report
            .narration
            .iter()
            .any(|e| e.message.starts_with("DOCSIS registration not reached after 5 attempts")));
        assert_eq!(report.outcome, RebootOutcome::Complete);
    }

    #[tokio::test]
    async fn test_quiet_run_records_only_transitions() {
        let device = healthy_device();
        device.script_logins([Login::Unreachable; 3]);
        let mut session = session(&device);
        let probe = probe();
        let config = RebootConfig {
            narrate: false,
            ..fast_config()
        };

        let report = RebootOrchestrator::new(&mut session, &probe, &config)
            .run("8.8.8.8")
            .await;

        assert_eq!(report.outcome, RebootOutcome::Complete);
        assert_eq!(count(&report, "Not logged in yet"), 0);
        assert_eq!(count(&report, "Modem registered, service online"), 1);
    }

    #[tokio::test]
    async fn test_no_csrf_means_no_reboot() {
        let device = healthy_device();
        device.clear(CSRF_PATH);
        device.respond(CSRF_PATH, json!({}));
        device.script_logins([Login::Refuse; 8]);
        let mut session = session(&device);
        let probe = probe();
        let config = fast_config();

        let report = RebootOrchestrator::new(&mut session, &probe, &config)
            .run("8.8.8.8")
            .await;

        assert_eq!(report.outcome, RebootOutcome::Failed(FailureReason::RebootNotSent));
        assert_eq!(device.posts_to(REBOOT_PATH).len(), 0);
        assert_eq!(report.phases, vec![Phase::Triggered, Phase::Failed]);
    }
}
