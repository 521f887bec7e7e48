//! Data models for Hitron router telemetry

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Admin account on the router
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Stages of DOCSIS network attachment, least to most advanced
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocsisStage {
    HwInit,
    FindDownstream,
    Ranging,
    Dhcp,
    DownloadCfg,
    Registration,
}

pub const NO_DOCSIS_INFO: &str = "No DOCSIS information to report";

impl DocsisStage {
    /// Most advanced first; the order the ladder is evaluated in
    pub const LADDER: [DocsisStage; 6] = [
        DocsisStage::Registration,
        DocsisStage::DownloadCfg,
        DocsisStage::Dhcp,
        DocsisStage::Ranging,
        DocsisStage::FindDownstream,
        DocsisStage::HwInit,
    ];

    /// Field name in `getCMInit.asp`
    pub fn field(self) -> &'static str {
        match self {
            DocsisStage::HwInit => "hwInit",
            DocsisStage::FindDownstream => "findDownstream",
            DocsisStage::Ranging => "ranging",
            DocsisStage::Dhcp => "dhcp",
            DocsisStage::DownloadCfg => "downloadCfg",
            DocsisStage::Registration => "registration",
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            DocsisStage::HwInit => {
                "DOCSIS modem alive, searching downstream channels for CMTS broadcast"
            }
            DocsisStage::FindDownstream => {
                "Downstream DOCSIS channel locked, ranging transmit power"
            }
            DocsisStage::Ranging => {
                "DOCSIS ranging complete, requesting time slot to broadcast for DHCP"
            }
            DocsisStage::Dhcp => "Obtained DHCP, downloading DOCSIS config file",
            DocsisStage::DownloadCfg => {
                "Config file downloaded, registering on network and bonding channels"
            }
            DocsisStage::Registration => "Modem registered, service online",
        }
    }
}

/// A normalized `getCMInit.asp` value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Flag(bool),
    /// Firmware text with no known meaning; never counts as a reached stage
    Text(String),
}

pub type DocsisFields = BTreeMap<String, FieldValue>;

/// Highest DOCSIS stage the modem reports having reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocsisState {
    pub stage: Option<DocsisStage>,
}

impl DocsisState {
    pub fn registered(&self) -> bool {
        self.stage == Some(DocsisStage::Registration)
    }

    pub fn message(&self) -> &'static str {
        self.stage.map(DocsisStage::message).unwrap_or(NO_DOCSIS_INFO)
    }
}

/// GRE tunnel negotiation, least to most advanced
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TunnelStage {
    Down,
    RadiusInit,
    RadiusNegotiating,
    RadiusAuthenticated,
    Established,
    DhcpSuccess,
    Verified,
}

pub const TUNNEL_DOWN: &str = "Tunnel appears to be down";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelState {
    pub stage: TunnelStage,
    /// Assigned range, only present when the tunnel is up
    pub address: Option<String>,
}

impl TunnelState {
    pub fn down() -> Self {
        Self {
            stage: TunnelStage::Down,
            address: None,
        }
    }

    pub fn up(&self) -> bool {
        matches!(self.stage, TunnelStage::DhcpSuccess | TunnelStage::Verified)
    }

    pub fn message(&self) -> String {
        let address = self.address.as_deref().unwrap_or_default();
        match self.stage {
            TunnelStage::Down => TUNNEL_DOWN.to_string(),
            TunnelStage::RadiusInit => "Tunnel is attempting to start RADIUS authentication".into(),
            TunnelStage::RadiusNegotiating => "Tunnel is currently negotiating RADIUS".into(),
            TunnelStage::RadiusAuthenticated => {
                "Tunnel has authenticated, bringing up connectivity".into()
            }
            TunnelStage::Established => "Tunnel established, awaiting DHCP message".into(),
            TunnelStage::DhcpSuccess => format!("Tunnel has IP range {}", address),
            TunnelStage::Verified => {
                format!("Tunnel is testing online with IP range {}", address)
            }
        }
    }
}

/// Outcome of one on-device ping test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticResult {
    pub target: String,
    /// Packet loss percentage, 0-100
    pub loss: u32,
    pub passed: bool,
}

/// Flat field map from `/data/getSysInfo.asp`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemInfo {
    pub fields: Map<String, Value>,
}

impl SystemInfo {
    /// A field rendered as text; empty strings count as absent
    pub fn field(&self, name: &str) -> Option<String> {
        match self.fields.get(name)? {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn wan_ip(&self) -> Option<String> {
        self.field("wanIp")
    }

    /// Seconds since boot, from `systemUptime`
    pub fn uptime_secs(&self) -> Option<u64> {
        crate::parser::parse_uptime(&self.field("systemUptime")?)
    }
}

/// Everything `--status` reports
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSummary {
    pub uptime_secs: Option<u64>,
    pub docsis: Option<DocsisState>,
    pub wan_ip: Option<String>,
    /// `None` when no tunnel is configured
    pub tunnel: Option<TunnelState>,
}

/// Response from `/data/getCsrf.asp`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CsrfResponse {
    #[serde(rename = "Csrf_token", default)]
    pub csrf_token: Option<String>,
}

/// Element 0 of `/data/getVMBAccountInfo.asp`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TunnelAccount {
    #[serde(rename = "Username", default)]
    pub username: Option<String>,
}

/// Element 0 of `/data/vmb_service_info.asp`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TunnelService {
    #[serde(rename = "Radius", default)]
    pub radius: Option<String>,

    #[serde(rename = "GRETunnel", default)]
    pub gre_tunnel: Option<String>,

    #[serde(rename = "WanIp", default)]
    pub wan_ip: Option<String>,
}

/// Element 0 of `/data/getAdminDiag.asp`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminDiag {
    #[serde(default)]
    pub testresult: String,
}
