//! Interpretation of router telemetry payloads
//!
//! Everything here is pure: raw JSON or text in, semantic state out.

use crate::error::{DeviceError, DeviceResult};
use crate::models::{
    DocsisFields, DocsisStage, DocsisState, FieldValue, TunnelService, TunnelStage, TunnelState,
};
use regex::Regex;
use serde_json::{Map, Value};

/// `getCMInit.asp` fields that say nothing about attachment progress
const IGNORED_DOCSIS_FIELDS: [&str; 4] = ["eaeStatus", "networkAccess", "timeOfday", "trafficStatus"];

/// Column where the loss figure starts in busybox's ping summary line
const LOSS_OFFSET: usize = 42;

/// Drop irrelevant DOCSIS fields and map firmware wording onto flags
pub fn normalize_docsis(raw: &Map<String, Value>) -> DocsisFields {
    raw.iter()
        .filter(|(name, _)| !IGNORED_DOCSIS_FIELDS.contains(&name.as_str()))
        .map(|(name, value)| {
            let value = match value {
                Value::Bool(b) => FieldValue::Flag(*b),
                Value::String(s) => match s.as_str() {
                    "Enable" | "Permitted" | "Success" => FieldValue::Flag(true),
                    "" | "Processing..." => FieldValue::Flag(false),
                    other => FieldValue::Text(other.to_string()),
                },
                Value::Null => FieldValue::Flag(false),
                other => FieldValue::Text(other.to_string()),
            };
            (name.clone(), value)
        })
        .collect()
}

/// Most advanced DOCSIS stage flagged true, if any
pub fn interpret_docsis(raw: &Map<String, Value>) -> DocsisState {
    let fields = normalize_docsis(raw);
    let stage = DocsisStage::LADDER
        .into_iter()
        .find(|stage| fields.get(stage.field()) == Some(&FieldValue::Flag(true)));
    DocsisState { stage }
}

/// Resolve RADIUS and GRE phase fields to a tunnel stage.
///
/// Checks run in the firmware's own precedence, which is not the ladder order:
/// an early RADIUS phase wins over a stale GRE value.
pub fn interpret_tunnel(service: &TunnelService) -> TunnelState {
    let radius = service.radius.as_deref();
    let gre = service.gre_tunnel.as_deref();

    let stage = if radius == Some("Init") {
        TunnelStage::RadiusInit
    } else if radius == Some("Authentication Start") {
        TunnelStage::RadiusNegotiating
    } else if gre == Some("Established") {
        TunnelStage::Established
    } else if gre == Some("DHCP Success") {
        TunnelStage::DhcpSuccess
    } else if gre == Some("PING Success") {
        TunnelStage::Verified
    } else if radius == Some("Authentication Success") {
        TunnelStage::RadiusAuthenticated
    } else {
        TunnelStage::Down
    };

    let mut state = TunnelState {
        stage,
        address: None,
    };
    if state.up() {
        state.address = Some(service.wan_ip.clone().unwrap_or_default());
    }
    state
}

/// Parse `"3 Days, 4 Hours, 5 Minutes, 6 Seconds"` into total seconds
pub fn parse_uptime(text: &str) -> Option<u64> {
    let re = Regex::new(r"(?i)(\d+)\s*(day|hour|minute|second)s?").ok()?;

    let mut total = 0u64;
    let mut matched = false;
    for caps in re.captures_iter(text) {
        let count: u64 = caps[1].parse().ok()?;
        let unit = match caps[2].to_ascii_lowercase().as_str() {
            "day" => 86_400,
            "hour" => 3_600,
            "minute" => 60,
            _ => 1,
        };
        total = total.checked_add(count.checked_mul(unit)?)?;
        matched = true;
    }

    matched.then_some(total)
}

/// Shape of the diagnostic result text at one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutput {
    /// Empty, still running, or too short to hold a summary
    NotReady,
    /// Finished with this packet loss percentage
    Loss(u32),
}

/// Decode `testresult` from `getAdminDiag.asp`.
///
/// Lines are `#`-delimited. The test is finished once there are more than three
/// lines and the second-to-last carries `packet loss`. A finished summary whose
/// loss figure cannot be read is an error, not "not ready", so format drift
/// surfaces here instead of as a silent poll timeout.
pub fn decode_ping_output(text: &str) -> DeviceResult<PingOutput> {
    let text = text.replace('#', "\n");
    let lines: Vec<&str> = text.trim().lines().collect();
    if lines.len() <= 3 {
        return Ok(PingOutput::NotReady);
    }

    let summary = lines[lines.len() - 2];
    if !summary.contains("packet loss") {
        return Ok(PingOutput::NotReady);
    }

    let tail: String = summary.chars().skip(LOSS_OFFSET).collect();
    let figure = tail.split('%').next().unwrap_or_default();
    let digits: String = figure.chars().filter(|c| c.is_ascii_digit()).collect();

    match digits.parse::<u32>() {
        Ok(loss) if loss <= 100 => Ok(PingOutput::Loss(loss)),
        _ => Err(DeviceError::Malformed(summary.to_string())),
    }
}
