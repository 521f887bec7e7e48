//! Read-only status endpoints
//!
//! None of these need a CSRF token; they just fetch and interpret.

use crate::error::{DeviceError, DeviceResult};
use crate::models::{DocsisFields, DocsisState, SystemInfo, TunnelAccount, TunnelService, TunnelState};
use crate::parser;
use crate::session::Session;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub const SYS_INFO_PATH: &str = "data/getSysInfo.asp";
pub const DOCSIS_PATH: &str = "data/getCMInit.asp";
pub const TUNNEL_ACCOUNT_PATH: &str = "data/getVMBAccountInfo.asp";
pub const TUNNEL_STATUS_PATH: &str = "data/vmb_service_info.asp";

fn decode<T: DeserializeOwned>(path: &str, record: Map<String, Value>) -> DeviceResult<T> {
    serde_json::from_value(Value::Object(record)).map_err(|e| DeviceError::protocol(path, e.to_string()))
}

pub async fn system_info(session: &Session) -> DeviceResult<SystemInfo> {
    let fields = session.fetch_record(SYS_INFO_PATH).await?;
    Ok(SystemInfo { fields })
}

/// Raw DOCSIS provisioning fields, normalized to flags
pub async fn docsis_info(session: &Session) -> DeviceResult<DocsisFields> {
    let raw = session.fetch_record(DOCSIS_PATH).await?;
    Ok(parser::normalize_docsis(&raw))
}

pub async fn docsis_state(session: &Session) -> DeviceResult<DocsisState> {
    let raw = session.fetch_record(DOCSIS_PATH).await?;
    Ok(parser::interpret_docsis(&raw))
}

/// Whether a GRE tunnel account is provisioned on the router
pub async fn tunnel_configured(session: &Session) -> DeviceResult<bool> {
    let Some(record) = session.fetch_first(TUNNEL_ACCOUNT_PATH).await? else {
        return Ok(false);
    };
    let account: TunnelAccount = decode(TUNNEL_ACCOUNT_PATH, record)?;
    Ok(account.username.is_some_and(|u| !u.is_empty()))
}

pub async fn tunnel_state(session: &Session) -> DeviceResult<TunnelState> {
    let Some(record) = session.fetch_first(TUNNEL_STATUS_PATH).await? else {
        return Ok(TunnelState::down());
    };
    let service: TunnelService = decode(TUNNEL_STATUS_PATH, record)?;
    Ok(parser::interpret_tunnel(&service))
}
