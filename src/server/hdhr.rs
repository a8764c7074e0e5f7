//! HDHomeRun emulation endpoints (§4.7, §6): `discover.json`,
//! `lineup.json`, `lineup_status.json`, and the UPnP `device.xml` /
//! `service.xml` stubs that let Plex/Emby/Jellyfin auto-detect us as a
//! tuner.

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use super::common::enabled_channels;
use super::state::AppState;

#[derive(Serialize)]
pub struct DiscoverResponse {
    #[serde(rename = "FriendlyName")]
    friendly_name: String,
    #[serde(rename = "ModelNumber")]
    model_number: String,
    #[serde(rename = "FirmwareName")]
    firmware_name: String,
    #[serde(rename = "FirmwareVersion")]
    firmware_version: String,
    #[serde(rename = "DeviceID")]
    device_id: String,
    #[serde(rename = "DeviceAuth")]
    device_auth: String,
    #[serde(rename = "BaseURL")]
    base_url: String,
    #[serde(rename = "LineupURL")]
    lineup_url: String,
    #[serde(rename = "TunerCount")]
    tuner_count: u32,
    #[serde(rename = "EPGURL")]
    epg_url: String,
}

#[derive(Serialize)]
pub struct LineupEntry {
    #[serde(rename = "GuideNumber")]
    guide_number: String,
    #[serde(rename = "GuideName")]
    guide_name: String,
    #[serde(rename = "URL")]
    url: String,
    #[serde(rename = "HD")]
    hd: u8,
}

#[derive(Serialize)]
pub struct LineupStatus {
    #[serde(rename = "ScanInProgress")]
    scan_in_progress: u8,
    #[serde(rename = "ScanPossible")]
    scan_possible: u8,
    #[serde(rename = "Source")]
    source: String,
    #[serde(rename = "SourceList")]
    source_list: Vec<String>,
}

pub async fn discover_json(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let base = base_url(&state, &headers);
    let hdhr = &state.config().hdhr;
    Json(DiscoverResponse {
        friendly_name: hdhr.friendly_name.clone(),
        model_number: "HDTC-2US".to_string(),
        firmware_name: format!("streamtv-{}", env!("CARGO_PKG_VERSION")),
        firmware_version: env!("CARGO_PKG_VERSION").to_string(),
        device_id: hdhr.device_id.clone(),
        device_auth: "streamtv".to_string(),
        base_url: base.clone(),
        lineup_url: format!("{base}/lineup.json"),
        tuner_count: hdhr.tuner_count,
        epg_url: format!("{base}/iptv/xmltv.xml"),
    })
}

pub async fn lineup_json(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let base = base_url(&state, &headers);
    let channels = enabled_channels(state.pool());

    let entries: Vec<LineupEntry> = channels
        .into_iter()
        .map(|channel| LineupEntry {
            guide_number: channel.number.clone(),
            guide_name: groom_guide_name(&channel.number, &channel.name),
            url: format!("{base}/hdhomerun/auto/v{}", channel.number),
            hd: 1,
        })
        .collect();

    Json(entries)
}

pub async fn lineup_status_json() -> impl IntoResponse {
    Json(LineupStatus {
        scan_in_progress: 0,
        scan_possible: 1,
        source: "Antenna".to_string(),
        source_list: vec!["Antenna".to_string(), "Cable".to_string()],
    })
}

pub async fn device_xml(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let base = base_url(&state, &headers);
    let device_id = state.config().hdhr.device_id.clone();
    let friendly_name = state.config().hdhr.friendly_name.clone();
    let body = format!(
        r#"<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <URLBase>{base}</URLBase>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
    <friendlyName>{friendly_name}</friendlyName>
    <manufacturer>Silicondust</manufacturer>
    <modelName>HDTC-2US</modelName>
    <modelNumber>HDTC-2US</modelNumber>
    <serialNumber>{device_id}</serialNumber>
    <UDN>uuid:{device_id}</UDN>
  </device>
</root>"#
    );
    ([(header::CONTENT_TYPE, "text/xml")], body)
}

pub async fn service_xml() -> impl IntoResponse {
    let body = r#"<scpd xmlns="urn:schemas-upnp-org:service-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <actionList/>
  <serviceStateTable/>
</scpd>"#;
    ([(header::CONTENT_TYPE, "text/xml")], body)
}

fn base_url(state: &AppState, headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok());
    state.base_url(host)
}

/// Strip a leading copy of the channel number plus a separator from a
/// channel's display name, per spec scenario 5: `{"2000", "2000's
/// Movies"}` -> `"Movies"`.
pub fn groom_guide_name(number: &str, name: &str) -> String {
    let Some(rest) = name.strip_prefix(number) else {
        return name.to_string();
    };
    let separators = ["'s ", "-", ".", "_", " "];
    for sep in separators {
        if let Some(stripped) = rest.strip_prefix(sep) {
            return stripped.to_string();
        }
    }
    rest.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grooms_apostrophe_s_prefix() {
        assert_eq!(groom_guide_name("2000", "2000's Movies"), "Movies");
    }

    #[test]
    fn grooms_dash_prefix() {
        assert_eq!(groom_guide_name("5", "5-News"), "News");
    }

    #[test]
    fn leaves_unprefixed_name_untouched() {
        assert_eq!(groom_guide_name("5", "News Channel"), "News Channel");
    }
}
