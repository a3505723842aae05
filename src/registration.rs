//! Device identity and pairing helpers.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a pairing code
pub const REGISTRATION_CODE_LEN: usize = 6;

/// Render a 48-bit hardware address as the 12-hex-digit device id
pub fn device_id_from_mac(mac: u64) -> String {
    format!("{:04X}{:08X}", (mac >> 32) as u16, mac as u32)
}

/// A fresh pairing code from `rng`
pub fn generate_registration_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..REGISTRATION_CODE_LEN)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

/// A fresh pairing code from the thread-local generator
pub fn registration_code() -> String {
    generate_registration_code(&mut rand::thread_rng())
}

/// Payload published on the registration topic
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    /// Device id
    pub device_id: String,
    /// Pairing code shown on the display
    pub registration_code: String,
}

impl RegistrationRequest {
    /// JSON payload
    pub fn to_payload(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkStatus {
    is_linked: bool,
}

/// Parse a link-check answer `{"isLinked": bool}`
pub fn parse_link_status(body: &str) -> Result<bool> {
    let status: LinkStatus = serde_json::from_str(body)?;
    Ok(status.is_linked)
}

/// Asks the backend whether this device has been paired
#[derive(Clone, Debug)]
pub struct LinkChecker {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl LinkChecker {
    /// Checker for `endpoint`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the endpoint is not a valid URL.
    pub fn new(client: reqwest::Client, endpoint: &str) -> Result<Self> {
        let endpoint = url::Url::parse(endpoint)
            .map_err(|e| Error::config("link_check_endpoint", e.to_string()))?;
        Ok(Self { client, endpoint })
    }

    /// Whether `device_id` is linked. Any non-200 answer counts as not linked.
    ///
    /// # Errors
    ///
    /// Fails on transport errors and unparseable bodies.
    pub async fn is_linked(&self, device_id: &str) -> Result<bool> {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("deviceId", device_id);

        let response = self.client.get(url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            tracing::warn!(status = response.status().as_u16(), device_id, "Link check failed");
            return Ok(false);
        }
        parse_link_status(&response.text().await?)
    }
}
