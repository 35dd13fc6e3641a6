// src/core/rds.rs

//! Endpoint classification for managed-cluster DNS names: writer/reader
//! cluster endpoints, instance endpoints, custom clusters, Blue/Green "green"
//! suffixes and cluster-id extraction.

use once_cell::sync::Lazy;
use regex::Regex;

/// The shape of a host name as understood by the wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdsUrlType {
    ClusterWriterDns,
    ClusterReaderDns,
    ClusterCustomDns,
    InstanceDns,
    ProxyDns,
    IpAddress,
    Other,
}

impl RdsUrlType {
    pub fn is_rds_dns(&self) -> bool {
        matches!(
            self,
            RdsUrlType::ClusterWriterDns
                | RdsUrlType::ClusterReaderDns
                | RdsUrlType::ClusterCustomDns
                | RdsUrlType::InstanceDns
                | RdsUrlType::ProxyDns
        )
    }

    pub fn is_cluster_dns(&self) -> bool {
        matches!(
            self,
            RdsUrlType::ClusterWriterDns | RdsUrlType::ClusterReaderDns
        )
    }
}

static RDS_DNS_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?P<instance>[a-z0-9-]+)\.(?P<prefix>cluster-ro-|cluster-custom-|cluster-|proxy-)?(?P<hash>[a-z0-9]+)\.(?P<region>[a-z0-9-]+)\.rds\.amazonaws\.com\.?$",
    )
    .expect("valid RDS DNS pattern")
});

static IPV4_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3}\.){3}\d{1,3}$").expect("valid IPv4 pattern"));

static IPV6_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9a-fA-F:]+:[0-9a-fA-F:]*$").expect("valid IPv6 pattern"));

static GREEN_INSTANCE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<base>.+)-green-[0-9a-z]{6}$").expect("valid green-instance pattern")
});

/// Classifies a bare host name.
pub fn identify_rds_url_type(host: &str) -> RdsUrlType {
    if host.is_empty() {
        return RdsUrlType::Other;
    }
    if is_ip_address(host) {
        return RdsUrlType::IpAddress;
    }
    let Some(captures) = RDS_DNS_PATTERN.captures(host) else {
        return RdsUrlType::Other;
    };
    match captures.name("prefix").map(|m| m.as_str().to_lowercase()) {
        Some(prefix) if prefix == "cluster-" => RdsUrlType::ClusterWriterDns,
        Some(prefix) if prefix == "cluster-ro-" => RdsUrlType::ClusterReaderDns,
        Some(prefix) if prefix == "cluster-custom-" => RdsUrlType::ClusterCustomDns,
        Some(prefix) if prefix == "proxy-" => RdsUrlType::ProxyDns,
        _ => RdsUrlType::InstanceDns,
    }
}

pub fn is_ip_address(host: &str) -> bool {
    IPV4_PATTERN.is_match(host) || IPV6_PATTERN.is_match(host)
}

/// The first DNS label: the cluster name for cluster endpoints, the instance
/// name for instance endpoints.
pub fn host_id(host: &str) -> Option<String> {
    RDS_DNS_PATTERN
        .captures(host)
        .map(|captures| captures["instance"].to_lowercase())
}

/// A stable cluster identifier for cache sharing: the cluster DNS name with
/// the reader/custom markers normalized away, so the writer and reader
/// endpoints of one cluster map to the same id.
pub fn cluster_id_of(host: &str, port: i32) -> Option<String> {
    let captures = RDS_DNS_PATTERN.captures(host)?;
    captures.name("prefix")?;
    let suffix = if port > 0 {
        format!(":{port}")
    } else {
        String::new()
    };
    Some(format!(
        "{}.cluster-{}.{}.rds.amazonaws.com{}",
        captures["instance"].to_lowercase(),
        captures["hash"].to_lowercase(),
        captures["region"].to_lowercase(),
        suffix
    ))
}

/// Builds the `?`-templated instance endpoint for a cluster member, derived
/// from any RDS DNS name of the same cluster.
pub fn instance_template(host: &str) -> Option<String> {
    let captures = RDS_DNS_PATTERN.captures(host)?;
    Some(format!(
        "?.{}.{}.rds.amazonaws.com",
        captures["hash"].to_lowercase(),
        captures["region"].to_lowercase()
    ))
}

pub fn region_of(host: &str) -> Option<String> {
    RDS_DNS_PATTERN
        .captures(host)
        .map(|captures| captures["region"].to_lowercase())
}

/// True when the host's first label carries a Blue/Green "green" suffix
/// (`name-green-abc123`).
pub fn is_green_instance(host: &str) -> bool {
    match host.split('.').next() {
        Some(label) => GREEN_INSTANCE_PATTERN.is_match(label),
        None => false,
    }
}

/// Removes the green suffix from the host's first label, returning the blue
/// name. Hosts without the suffix come back unchanged.
pub fn strip_green_suffix(host: &str) -> String {
    let mut labels = host.split('.');
    let Some(first) = labels.next() else {
        return host.to_string();
    };
    let stripped = match GREEN_INSTANCE_PATTERN.captures(first) {
        Some(captures) => captures["base"].to_string(),
        None => first.to_string(),
    };
    let rest: Vec<&str> = labels.collect();
    if rest.is_empty() {
        stripped
    } else {
        format!("{}.{}", stripped, rest.join("."))
    }
}

/// Substitutes the topology row's host id into a `?` template.
pub fn apply_instance_template(template: &str, host_id: &str) -> String {
    template.replacen('?', host_id, 1)
}
