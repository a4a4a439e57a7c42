//! Docker daemon selection for build jobs

use rand::seq::IndexedRandom;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{PluginError, Result};

/// Qualifies the service host of `tcp://svc:port` with `namespace`
pub fn qualify_host(host: &str, namespace: &str) -> String {
    match host.split(':').collect::<Vec<_>>().as_slice() {
        [scheme, service, port] => format!("{}:{}.{}:{}", scheme, service, namespace, port),
        _ => host.to_string(),
    }
}

fn api_url(host: &str) -> Option<String> {
    let rest = host.strip_prefix("tcp://").or_else(|| host.strip_prefix("http://"))?;
    Some(format!("http://{}/containers/json", rest.trim_end_matches('/')))
}

async fn count_containers(client: &Client, host: &str) -> anyhow::Result<usize> {
    let Some(url) = api_url(host) else {
        anyhow::bail!("unsupported docker host {}", host);
    };
    let containers: Vec<serde_json::Value> = client
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(containers.len())
}

/// Hosts sharing the lowest container count
pub fn least_loaded(counts: &[(String, usize)]) -> Vec<&str> {
    let Some(min) = counts.iter().map(|(_, c)| *c).min() else {
        return Vec::new();
    };
    counts
        .iter()
        .filter(|(_, c)| *c == min)
        .map(|(h, _)| h.as_str())
        .collect()
}

/// Picks the docker host running the fewest containers
///
/// Unreachable hosts are skipped; ties are broken at random. When
/// `namespace` is set, service hosts are qualified with it first.
pub async fn best_docker_host(
    client: &Client,
    hosts: &[String],
    namespace: Option<&str>,
) -> Result<String> {
    let mut counts = Vec::new();
    for host in hosts.iter().filter(|h| !h.is_empty()) {
        let host = match namespace {
            Some(ns) => qualify_host(host, ns),
            None => host.clone(),
        };
        match count_containers(client, &host).await {
            Ok(count) => {
                debug!("Docker host {} runs {} containers", host, count);
                counts.push((host, count));
            }
            Err(e) => warn!("[{}]list container error: {:#}", host, e),
        }
    }

    least_loaded(&counts)
        .choose(&mut rand::rng())
        .map(|h| h.to_string())
        .ok_or(PluginError::NoDockerHost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_qualify_host() {
        assert_eq!(
            qualify_host("tcp://dind-0.dind:2375", "zadig"),
            "tcp://dind-0.dind.zadig:2375"
        );
        assert_eq!(qualify_host("unix:///var/run/docker.sock", "zadig"), "unix:///var/run/docker.sock");
    }

    #[test]
    fn test_least_loaded_keeps_ties() {
        let counts = vec![
            ("a".to_string(), 3),
            ("b".to_string(), 1),
            ("c".to_string(), 1),
        ];
        assert_eq!(least_loaded(&counts), vec!["b", "c"]);
        assert!(least_loaded(&[]).is_empty());
    }

    async fn daemon(containers: usize) -> MockServer {
        let server = MockServer::start().await;
        let body: Vec<_> = (0..containers)
            .map(|i| serde_json::json!({ "Id": format!("c{}", i) }))
            .collect();
        Mock::given(method("GET"))
            .and(path("/containers/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_best_docker_host_picks_fewest() {
        let busy = daemon(5).await;
        let idle = daemon(1).await;
        let hosts = vec![
            String::new(),
            busy.uri().replace("http://", "tcp://"),
            idle.uri().replace("http://", "tcp://"),
            "unix:///var/run/docker.sock".to_string(),
        ];

        let best = best_docker_host(&Client::new(), &hosts, None).await.unwrap();
        assert_eq!(best, idle.uri().replace("http://", "tcp://"));
    }

    #[tokio::test]
    async fn test_no_reachable_host() {
        let err = best_docker_host(&Client::new(), &["unix:///x".to_string()], None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no docker host found");
    }
}
