//! Maps workers onto node endpoints.

use std::{collections::BTreeSet, net::IpAddr, path::Path};

use tracing::{debug, info};
use url::Url;

use crate::{
    config::RunConfig,
    error::{BenchError, BenchResult},
};

/// Returns one RPC URL per worker, `count` in total.
///
/// With a single endpoint each worker adds `i % nodes` to the base port. With
/// a static node list worker `i` targets entry `i % nodes`. Single node mode,
/// or a node count of one, sends everything to the first node. `nodes`
/// defaults to `count`.
pub async fn resolve_worker_urls(config: &RunConfig, count: usize) -> BenchResult<Vec<String>> {
    let endpoint = &config.endpoint;
    let nodes = endpoint.nodes.unwrap_or(count).max(1);
    let spread = !endpoint.single_node && nodes > 1;

    let urls = match (&endpoint.eth, &endpoint.static_nodes) {
        (Some(eth), None) => {
            let mut base: Url = eth
                .parse()
                .map_err(|e| BenchError::config(format!("invalid eth endpoint {eth}: {e}")))?;
            let port = match endpoint.base_port {
                Some(port) => port,
                None => base.port_or_known_default().ok_or_else(|| {
                    BenchError::config(format!("eth endpoint {eth} has no port"))
                })?,
            };
            if let Some(host) = base.host_str().map(str::to_string) {
                let host = resolve_host(&host, endpoint.resolve_hosts).await?;
                set_host(&mut base, &host)?;
            }
            port_offset_urls(&base, port, count, if spread { nodes } else { 1 })?
        }
        (None, Some(path)) => {
            let path = config.resolve_path(path);
            let hosts = load_static_nodes(&path)?;
            if nodes > hosts.len() {
                return Err(BenchError::config(format!(
                    "too few nodes in {}. need {nodes}, have {}",
                    path.display(),
                    hosts.len()
                )));
            }
            let port = endpoint.static_node_port();
            let mut node_urls = Vec::with_capacity(hosts.len());
            for host in &hosts {
                let host = resolve_host(host, endpoint.resolve_hosts).await?;
                node_urls.push(http_url(&host, port)?);
            }
            round_robin(&node_urls, count, if spread { nodes } else { 1 })
        }
        _ => return Err(BenchError::config("set exactly one of eth endpoint or static nodes")),
    };

    for (worker, url) in urls.iter().enumerate() {
        debug!(worker, url = %url, "Worker endpoint");
    }
    info!(workers = count, nodes = if spread { nodes } else { 1 }, "Endpoints resolved");
    Ok(urls)
}

/// `count` copies of `base`, worker `i` on port `port + i % nodes`.
fn port_offset_urls(
    base: &Url,
    port: u16,
    count: usize,
    nodes: usize,
) -> BenchResult<Vec<String>> {
    (0..count)
        .map(|i| {
            let port = u16::try_from(i % nodes)
                .ok()
                .and_then(|offset| port.checked_add(offset))
                .ok_or_else(|| BenchError::config(format!("port for worker {i} is out of range")))?;
            let mut url = base.clone();
            url.set_port(Some(port))
                .map_err(|()| BenchError::config(format!("cannot set port on {base}")))?;
            Ok(url.to_string())
        })
        .collect()
}

fn round_robin(urls: &[Url], count: usize, nodes: usize) -> Vec<String> {
    (0..count).map(|i| urls[i % nodes].to_string()).collect()
}

/// Reads a static-nodes.json style file: a JSON array of enode or URL strings.
/// Only the host of each entry is kept.
pub fn load_static_nodes(path: &Path) -> BenchResult<Vec<String>> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        BenchError::config(format!("loading static nodes {}: {e}", path.display()))
    })?;
    parse_static_nodes(&contents)
}

fn parse_static_nodes(json: &str) -> BenchResult<Vec<String>> {
    let entries: Vec<String> = serde_json::from_str(json)
        .map_err(|e| BenchError::config(format!("parsing static nodes: {e}")))?;
    entries
        .iter()
        .map(|entry| {
            let url: Url = entry
                .parse()
                .map_err(|e| BenchError::config(format!("invalid static node {entry}: {e}")))?;
            url.host_str()
                .map(|host| host.trim_start_matches('[').trim_end_matches(']').to_string())
                .ok_or_else(|| BenchError::config(format!("static node {entry} has no host")))
        })
        .collect()
}

/// Resolves `host` to its single IP address when `enabled`. IP literals are
/// returned as is; a name with more than one address is ambiguous.
pub async fn resolve_host(host: &str, enabled: bool) -> BenchResult<String> {
    if !enabled || host.parse::<IpAddr>().is_ok() {
        return Ok(host.to_string());
    }
    let addrs: BTreeSet<IpAddr> = tokio::net::lookup_host((host, 0))
        .await
        .map_err(|e| BenchError::connection(format!("resolving {host}: {e}")))?
        .map(|addr| addr.ip())
        .collect();
    let addrs: Vec<IpAddr> = addrs.into_iter().collect();
    match addrs.as_slice() {
        [ip] => Ok(ip.to_string()),
        [] => Err(BenchError::connection(format!("{host} did not resolve"))),
        _ => Err(BenchError::connection(format!(
            "can't resolve ambiguous host {host}. could be any of: {addrs:?}"
        ))),
    }
}

fn set_host(url: &mut Url, host: &str) -> BenchResult<()> {
    match host.parse::<IpAddr>() {
        Ok(ip) => url
            .set_ip_host(ip)
            .map_err(|()| BenchError::config(format!("cannot set host on {url}"))),
        Err(_) => url
            .set_host(Some(host))
            .map_err(|e| BenchError::config(format!("invalid host {host}: {e}"))),
    }
}

fn http_url(host: &str, port: u16) -> BenchResult<Url> {
    let host = match host.parse::<IpAddr>() {
        Ok(IpAddr::V6(ip)) => format!("[{ip}]"),
        _ => host.to_string(),
    };
    format!("http://{host}:{port}")
        .parse()
        .map_err(|e| BenchError::config(format!("invalid node host {host}: {e}")))
}
