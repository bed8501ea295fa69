//! Network-security-group ingress rewrite.
//!
//! The transition always lists the current ingress rules, adds the
//! replacement set, and only then removes the superseded rules, so inbound
//! connectivity never passes through a zero-rule window.

use crate::error::{Result, ShieldError};
use crate::firewall::IngressPolicy;
use crate::oci::signer::ApiSigner;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const API_VERSION: &str = "20160918";
const GAME_PORT_MIN: u16 = 27015;
const GAME_PORT_MAX: u16 = 27020;

/// Identity of the security group this node manages.
#[derive(Debug, Clone)]
pub struct NsgParameters {
    pub compartment_id: String,
    pub vcn_id: String,
    pub nsg_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSecurityGroup {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRule {
    pub id: String,
    pub direction: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddSecurityRuleDetails {
    pub direction: String,
    pub source: String,
    pub source_type: String,
    pub protocol: String,
    pub is_stateless: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_options: Option<PortOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_options: Option<PortOptions>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortOptions {
    pub destination_port_range: PortRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

/// Low-level security-group operations, one call per API request.
#[async_trait]
pub trait NsgApi: Send + Sync {
    async fn list_groups(&self, params: &NsgParameters) -> Result<Vec<NetworkSecurityGroup>>;
    async fn list_rules(&self, nsg_id: &str) -> Result<Vec<SecurityRule>>;
    async fn add_rules(&self, nsg_id: &str, rules: Vec<AddSecurityRuleDetails>) -> Result<()>;
    async fn remove_rules(&self, nsg_id: &str, rule_ids: Vec<String>) -> Result<()>;
}

/// [`IngressPolicy`] over an OCI network security group.
pub struct NsgFirewall {
    api: Box<dyn NsgApi>,
    params: NsgParameters,
}

impl NsgFirewall {
    pub fn new(api: Box<dyn NsgApi>, params: NsgParameters) -> Self {
        Self { api, params }
    }

    async fn nsg_id(&self) -> Result<String> {
        let groups = self.api.list_groups(&self.params).await?;
        groups
            .into_iter()
            .next()
            .map(|group| group.id)
            .ok_or_else(|| {
                ShieldError::Firewall(format!(
                    "no network security group named '{}'",
                    self.params.nsg_name
                ))
            })
    }

    async fn current_ingress_rule_ids(&self, nsg_id: &str) -> Result<Vec<String>> {
        let rules = self.api.list_rules(nsg_id).await?;
        Ok(rules
            .into_iter()
            .filter(|rule| rule.direction == "INGRESS")
            .map(|rule| rule.id)
            .collect())
    }

    /// Replace the group's ingress rules: add first, remove after.
    async fn swap_ingress_rules(
        &self,
        nsg_id: &str,
        replacement: Vec<AddSecurityRuleDetails>,
    ) -> Result<()> {
        let superseded = self.current_ingress_rule_ids(nsg_id).await?;

        if !replacement.is_empty() {
            debug!(count = replacement.len(), "Adding replacement ingress rules");
            self.api.add_rules(nsg_id, replacement).await?;
        }

        if !superseded.is_empty() {
            debug!(count = superseded.len(), "Removing superseded ingress rules");
            self.api.remove_rules(nsg_id, superseded).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl IngressPolicy for NsgFirewall {
    async fn restrict_ingress_to(&self, ips: &[String]) -> Result<()> {
        info!(
            nsg = %self.params.nsg_name,
            allowed = ips.len(),
            "Restricting security group ingress to player addresses"
        );

        let nsg_id = self.nsg_id().await?;
        let rules = ips.iter().map(|ip| allow_all_from(ip)).collect();
        self.swap_ingress_rules(&nsg_id, rules).await?;

        info!(nsg = %self.params.nsg_name, "Ingress restriction enabled");
        Ok(())
    }

    async fn restore_default_ingress(&self) -> Result<()> {
        info!(
            nsg = %self.params.nsg_name,
            "Restoring default ingress (game ports open to everyone)"
        );

        let nsg_id = self.nsg_id().await?;
        self.swap_ingress_rules(&nsg_id, default_ingress_rules())
            .await?;

        info!(nsg = %self.params.nsg_name, "Default ingress restored");
        Ok(())
    }
}

/// Stateful allow-everything rule for one source address.
fn allow_all_from(ip: &str) -> AddSecurityRuleDetails {
    let cidr = if ip.contains('/') {
        ip.to_string()
    } else {
        format!("{ip}/32")
    };

    AddSecurityRuleDetails {
        direction: "INGRESS".to_string(),
        source: cidr,
        source_type: "CIDR_BLOCK".to_string(),
        protocol: "all".to_string(),
        is_stateless: false,
        tcp_options: None,
        udp_options: None,
    }
}

/// The steady-state policy: game ports reachable from anywhere over TCP
/// and UDP.
fn default_ingress_rules() -> Vec<AddSecurityRuleDetails> {
    let range = PortRange {
        min: GAME_PORT_MIN,
        max: GAME_PORT_MAX,
    };
    let base = AddSecurityRuleDetails {
        direction: "INGRESS".to_string(),
        source: "0.0.0.0/0".to_string(),
        source_type: "CIDR_BLOCK".to_string(),
        protocol: String::new(),
        is_stateless: false,
        tcp_options: None,
        udp_options: None,
    };

    vec![
        AddSecurityRuleDetails {
            // TCP
            protocol: "6".to_string(),
            tcp_options: Some(PortOptions {
                destination_port_range: range.clone(),
            }),
            ..base.clone()
        },
        AddSecurityRuleDetails {
            // UDP
            protocol: "17".to_string(),
            udp_options: Some(PortOptions {
                destination_port_range: range,
            }),
            ..base
        },
    ]
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AddSecurityRulesBody {
    security_rules: Vec<AddSecurityRuleDetails>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RemoveSecurityRulesBody {
    security_rule_ids: Vec<String>,
}

/// Signed REST client for the virtual-network service.
pub struct OciNsgApi {
    http: reqwest::Client,
    base_url: String,
    signer: ApiSigner,
}

impl OciNsgApi {
    pub fn new(region: &str, signer: ApiSigner) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("https://iaas.{region}.oraclecloud.com/{API_VERSION}"),
            signer,
        }
    }

    fn signed_headers(
        &self,
        method: &str,
        url: &reqwest::Url,
        body: Option<&[u8]>,
    ) -> Result<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        for (name, value) in self.signer.sign(method, url, body)? {
            let name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ShieldError::Firewall(format!("bad header name: {e}")))?;
            let value = reqwest::header::HeaderValue::from_str(&value)
                .map_err(|e| ShieldError::Firewall(format!("bad header value: {e}")))?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: reqwest::Url) -> Result<T> {
        let headers = self.signed_headers("GET", &url, None)?;
        let response = self.http.get(url.clone()).headers(headers).send().await?;

        if !response.status().is_success() {
            return Err(ShieldError::Firewall(format!(
                "GET {} failed with {}",
                url.path(),
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    async fn post_json(&self, url: reqwest::Url, body: Vec<u8>) -> Result<()> {
        let headers = self.signed_headers("POST", &url, Some(&body))?;
        let response = self
            .http
            .post(url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ShieldError::Firewall(format!(
                "POST {} failed with {}",
                url.path(),
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl NsgApi for OciNsgApi {
    async fn list_groups(&self, params: &NsgParameters) -> Result<Vec<NetworkSecurityGroup>> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/networkSecurityGroups", self.base_url),
            &[
                ("compartmentId", params.compartment_id.as_str()),
                ("vcnId", params.vcn_id.as_str()),
                ("displayName", params.nsg_name.as_str()),
            ],
        )
        .map_err(|e| ShieldError::Firewall(format!("bad list URL: {e}")))?;

        self.get_json(url).await
    }

    async fn list_rules(&self, nsg_id: &str) -> Result<Vec<SecurityRule>> {
        let url = reqwest::Url::parse(&format!(
            "{}/networkSecurityGroups/{nsg_id}/securityRules",
            self.base_url
        ))
        .map_err(|e| ShieldError::Firewall(format!("bad rules URL: {e}")))?;

        self.get_json(url).await
    }

    async fn add_rules(&self, nsg_id: &str, rules: Vec<AddSecurityRuleDetails>) -> Result<()> {
        let url = reqwest::Url::parse(&format!(
            "{}/networkSecurityGroups/{nsg_id}/securityRules/actions/addSecurityRules",
            self.base_url
        ))
        .map_err(|e| ShieldError::Firewall(format!("bad add URL: {e}")))?;

        let body = serde_json::to_vec(&AddSecurityRulesBody {
            security_rules: rules,
        })?;
        self.post_json(url, body).await
    }

    async fn remove_rules(&self, nsg_id: &str, rule_ids: Vec<String>) -> Result<()> {
        let url = reqwest::Url::parse(&format!(
            "{}/networkSecurityGroups/{nsg_id}/securityRules/actions/removeSecurityRules",
            self.base_url
        ))
        .map_err(|e| ShieldError::Firewall(format!("bad remove URL: {e}")))?;

        let body = serde_json::to_vec(&RemoveSecurityRulesBody {
            security_rule_ids: rule_ids,
        })?;
        self.post_json(url, body).await
    }
}
