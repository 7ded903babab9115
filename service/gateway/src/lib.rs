#[macro_use]
extern crate rocket;

#[macro_use]
extern crate lazy_static;

pub mod auth;
pub mod compute;
pub mod config;
pub mod daemon;
pub mod identity;
pub mod preset;
pub mod proxy;
pub mod routes;

/// Cluster connectivity is verified before the rest of start-up proceeds, matching the
/// `--enable-teardown`/cluster-dependent flags' expectation that CPC is reachable once the
/// process is serving traffic. Exit code 2 surfaces a connectivity failure distinctly from
/// a configuration failure (exit code 1).
pub async fn probe_cluster_connectivity() -> result::Result<()> {
    k8s::list_pods_by_preset("__startup_probe__").await.map(|_| ())
}

/// Parses the `--listen` flag's `:PORT` (or `HOST:PORT`) form down to the port, since the
/// bind address is always `0.0.0.0` when the service is launched in a container.
pub fn parse_listen_port(listen: &str) -> u16 {
    listen
        .rsplit(':')
        .next()
        .and_then(|port| port.parse().ok())
        .unwrap_or(8000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_port_from_colon_prefixed_listen_address() {
        assert_eq!(parse_listen_port(":8443"), 8443);
        assert_eq!(parse_listen_port("0.0.0.0:9000"), 9000);
        assert_eq!(parse_listen_port("garbage"), 8000);
    }
}
