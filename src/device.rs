//! Hitron router facade
//!
//! Bundles the session, the ping probe and the reboot budgets behind the
//! handful of operations the command line needs.

use crate::config::{Config, RebootConfig};
use crate::diag::DiagnosticProbe;
use crate::error::DeviceResult;
use crate::http::{HttpTransport, Transport};
use crate::models::{
    Credentials, DiagnosticResult, DocsisFields, DocsisState, StatusSummary, SystemInfo, TunnelState,
};
use crate::reboot::{self, RebootOrchestrator, RebootReport};
use crate::session::Session;
use crate::telemetry;
use std::time::Duration;

pub struct Device {
    host: String,
    session: Session,
    probe: DiagnosticProbe,
    target: String,
    reboot: RebootConfig,
}

impl Device {
    /// Device reached over HTTP(S) at `config.device.host`
    pub fn new(config: &Config) -> DeviceResult<Self> {
        let transport = HttpTransport::new(&config.transport_settings())?;
        Ok(Self::with_transport(Box::new(transport), config))
    }

    pub fn with_transport(transport: Box<dyn Transport>, config: &Config) -> Self {
        let credentials = Credentials {
            username: config.device.username.clone(),
            password: config.device.password.clone(),
        };
        let session = Session::new(
            transport,
            credentials,
            config.device.retry,
            Duration::from_secs(config.device.login_timeout),
        );

        Self {
            host: config.device.host.clone(),
            session,
            probe: DiagnosticProbe::from_config(&config.probe),
            target: config.probe.target.clone(),
            reboot: config.reboot.clone(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Log in, retrying up to the configured budget
    pub async fn connect(&mut self) -> DeviceResult<()> {
        tracing::debug!("Logging in to {}", self.host);
        self.session.connect().await
    }

    /// Address checked after a reboot when the caller names none
    pub fn default_target(&self) -> &str {
        &self.target
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.logged_in()
    }

    pub async fn system_info(&self) -> DeviceResult<SystemInfo> {
        telemetry::system_info(&self.session).await
    }

    /// One field of the system info dashboard, `None` if absent or empty
    pub async fn sys_field(&self, name: &str) -> DeviceResult<Option<String>> {
        Ok(self.system_info().await?.field(name))
    }

    /// Seconds since the router booted
    pub async fn uptime(&self) -> DeviceResult<Option<u64>> {
        Ok(self.system_info().await?.uptime_secs())
    }

    pub async fn docsis_info(&self) -> DeviceResult<DocsisFields> {
        telemetry::docsis_info(&self.session).await
    }

    pub async fn docsis_status(&self) -> DeviceResult<DocsisState> {
        telemetry::docsis_state(&self.session).await
    }

    pub async fn tunnel_configured(&self) -> DeviceResult<bool> {
        telemetry::tunnel_configured(&self.session).await
    }

    pub async fn tunnel_status(&self) -> DeviceResult<TunnelState> {
        telemetry::tunnel_state(&self.session).await
    }

    /// Everything `--status` reports. Unreadable parts are left empty.
    pub async fn status(&self) -> StatusSummary {
        let info = self.system_info().await;
        if let Err(ref e) = info {
            tracing::warn!("Unable to read system info: {}", e);
        }
        let info = info.unwrap_or_default();

        let docsis = match self.docsis_status().await {
            Ok(state) => Some(state),
            Err(e) => {
                tracing::warn!("Error reading DOCSIS status: {}", e);
                None
            }
        };

        let tunnel = match self.tunnel_configured().await {
            Ok(true) => Some(self.tunnel_status().await.unwrap_or_else(|e| {
                tracing::warn!("Error reading tunnel status: {}", e);
                TunnelState::down()
            })),
            Ok(false) => None,
            Err(e) => {
                tracing::debug!("Unable to read tunnel account: {}", e);
                None
            }
        };

        StatusSummary {
            uptime_secs: info.uptime_secs(),
            docsis,
            wan_ip: info.wan_ip(),
            tunnel,
        }
    }

    /// Run one on-device ping test
    pub async fn ping(&mut self, target: &str) -> DeviceResult<DiagnosticResult> {
        self.probe.run(&mut self.session, target).await
    }

    /// Request a reboot without waiting for the router to return
    pub async fn reboot(&mut self) -> DeviceResult<()> {
        tracing::info!("Requesting reboot of {}", self.host);
        reboot::trigger(&mut self.session).await
    }

    /// Reboot, follow the router back up and confirm `target` is reachable.
    /// Without a target the configured `[probe].target` is pinged.
    pub async fn reboot_and_recover(&mut self, target: Option<&str>) -> RebootReport {
        let target = target.unwrap_or(self.target.as_str());
        RebootOrchestrator::new(&mut self.session, &self.probe, &self.reboot)
            .run(target)
            .await
    }
}
