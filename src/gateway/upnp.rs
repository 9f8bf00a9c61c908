//! UPnP Internet Gateway Device client.
//!
//! Speaks SOAP over HTTP to the `WANIPConnection` control URL of the
//! router.  Finding that URL (SSDP discovery and the device description)
//! is left to configuration.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Url;

use super::{GatewayClient, GatewayError};
use crate::types::{MappingRule, Protocol};

pub const DEFAULT_SERVICE_TYPE: &str = "urn:schemas-upnp-org:service:WANIPConnection:2";

/// `NoSuchEntryInArray`: the mapping to delete does not exist.
const NO_SUCH_ENTRY_IN_ARRAY: u16 = 714;

/// Mappings never expire.
const INFINITE_LEASE: u32 = 0;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct UpnpGateway {
    http: reqwest::Client,
    control_url: Url,
    service_type: String,
    credentials: Option<(String, String)>,
}

impl UpnpGateway {
    pub fn new(
        control_url: Url,
        service_type: impl Into<String>,
        credentials: Option<(String, String)>,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            control_url,
            service_type: service_type.into(),
            credentials,
        })
    }

    async fn call(&self, action: &str, args: &[(&str, String)]) -> Result<(), GatewayError> {
        let body = envelope(&self.service_type, action, args);
        debug!("SOAP {} -> {}: {}", action, self.control_url, body);

        let mut request = self
            .http
            .post(self.control_url.clone())
            .header("Content-Type", "text/xml; charset=\"utf-8\"")
            .header("SOAPAction", format!("\"{}#{}\"", self.service_type, action))
            .body(body);
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let text = response.text().await?;
        Err(parse_fault(&text).unwrap_or(GatewayError::UnexpectedResponse {
            status: status.as_u16(),
        }))
    }
}

#[async_trait]
impl GatewayClient for UpnpGateway {
    async fn add_port_mapping(&self, rule: &MappingRule) -> Result<(), GatewayError> {
        debug!("Adding port mapping {}", rule);
        self.call(
            "AddPortMapping",
            &[
                ("NewRemoteHost", String::new()),
                ("NewExternalPort", rule.external_port.to_string()),
                ("NewProtocol", rule.protocol.as_str().to_string()),
                ("NewInternalPort", rule.internal_port.to_string()),
                ("NewInternalClient", rule.internal_host.clone()),
                ("NewEnabled", "1".to_string()),
                ("NewPortMappingDescription", rule.description.clone()),
                ("NewLeaseDuration", INFINITE_LEASE.to_string()),
            ],
        )
        .await
    }

    async fn delete_port_mapping(
        &self,
        external_port: u16,
        protocol: Protocol,
    ) -> Result<(), GatewayError> {
        debug!("Deleting port mapping {}/{}", external_port, protocol);
        let result = self
            .call(
                "DeletePortMapping",
                &[
                    ("NewRemoteHost", String::new()),
                    ("NewExternalPort", external_port.to_string()),
                    ("NewProtocol", protocol.as_str().to_string()),
                ],
            )
            .await;
        match result {
            Err(GatewayError::Upnp { code, .. }) if code == NO_SUCH_ENTRY_IN_ARRAY => {
                debug!("Port mapping {}/{} was already absent", external_port, protocol);
                Ok(())
            }
            other => other,
        }
    }
}

fn envelope(service_type: &str, action: &str, args: &[(&str, String)]) -> String {
    let mut body = String::from(
        "<?xml version=\"1.0\"?>\
         <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
         s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\"><s:Body>",
    );
    body.push_str(&format!("<u:{} xmlns:u=\"{}\">", action, escape(service_type)));
    for (name, value) in args {
        body.push_str(&format!("<{0}>{1}</{0}>", name, escape(value)));
    }
    body.push_str(&format!("</u:{}></s:Body></s:Envelope>", action));
    body
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Extracts the `UPnPError` details from a SOAP fault body.
fn parse_fault(body: &str) -> Option<GatewayError> {
    let code = element_text(body, "errorCode")?.trim().parse().ok()?;
    let description = element_text(body, "errorDescription")
        .unwrap_or_default()
        .trim()
        .to_string();
    Some(GatewayError::Upnp { code, description })
}

fn element_text<'a>(body: &'a str, name: &str) -> Option<&'a str> {
    let open = format!("{}>", name);
    let start = body.find(&open)? + open.len();
    let len = body[start..].find('<')?;
    Some(&body[start..start + len])
}
