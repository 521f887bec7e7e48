//! On-device ping test
//!
//! The router runs the test itself: we submit a descriptor, then poll a
//! separate endpoint until the output text has its summary line.

use crate::config::ProbeConfig;
use crate::error::{DeviceError, DeviceResult};
use crate::models::{AdminDiag, DiagnosticResult};
use crate::parser::{self, PingOutput};
use crate::poll::{PollPolicy, Poller};
use crate::session::Session;
use serde::Serialize;
use serde_json::Value;

pub const TEST_DIAG_PATH: &str = "goform/TestDiag";
pub const ADMIN_DIAG_PATH: &str = "data/getAdminDiag.asp";

/// Test descriptor submitted as the `model` form field
#[derive(Debug, Serialize)]
struct PingTest<'a> {
    testtype: &'static str,
    testflag: u8,
    testmode: u8,
    testurl: &'static str,
    testipaddr: &'a str,
}

#[derive(Debug, Clone)]
pub struct DiagnosticProbe {
    loss_threshold: u32,
    policy: PollPolicy,
}

impl DiagnosticProbe {
    pub fn new(loss_threshold: u32, policy: PollPolicy) -> Self {
        Self {
            loss_threshold,
            policy,
        }
    }

    pub fn from_config(config: &ProbeConfig) -> Self {
        Self::new(config.loss_threshold, config.poll_policy())
    }

    /// Loss strictly below the threshold passes
    pub fn passes(&self, loss: u32) -> bool {
        loss < self.loss_threshold
    }

    /// Ping `target` from the router. The router only accepts IP addresses.
    ///
    /// A finished test with too much loss is `Ok` with `passed == false`;
    /// errors mean the test never produced a usable result.
    pub async fn run(&self, session: &mut Session, target: &str) -> DeviceResult<DiagnosticResult> {
        let model = serde_json::to_string(&PingTest {
            testtype: "IPv4",
            testflag: 1,
            testmode: 1,
            testurl: "",
            testipaddr: target,
        })
        .map_err(|e| DeviceError::protocol(TEST_DIAG_PATH, e.to_string()))?;

        session.post_signed(TEST_DIAG_PATH, &model).await?;

        let mut poller = Poller::new("ping result", self.policy).delay_first();
        while let Some(attempt) = poller.next().await {
            let text = match session.fetch_first(ADMIN_DIAG_PATH).await? {
                Some(record) => {
                    serde_json::from_value::<AdminDiag>(Value::Object(record))
                        .map_err(|e| DeviceError::protocol(ADMIN_DIAG_PATH, e.to_string()))?
                        .testresult
                }
                None => String::new(),
            };

            match parser::decode_ping_output(&text)? {
                PingOutput::Loss(loss) => {
                    let passed = self.passes(loss);
                    tracing::info!(
                        "{}% packet loss to {} ({})",
                        loss,
                        target,
                        if passed { "pass" } else { "fail" }
                    );
                    return Ok(DiagnosticResult {
                        target: target.to_string(),
                        loss,
                        passed,
                    });
                }
                PingOutput::NotReady => {
                    tracing::trace!("Ping result not ready (poll {})", attempt);
                }
            }
        }

        Err(poller.exhausted())
    }

    /// `run` collapsed to pass/fail; any error is a fail
    pub async fn check(&self, session: &mut Session, target: &str) -> bool {
        match self.run(session, target).await {
            Ok(result) => result.passed,
            Err(e) => {
                tracing::debug!("Ping test to {} failed: {}", target, e);
                false
            }
        }
    }
}
