use crate::error::AppError;
use config::{Config as Cfg, Environment, File};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Listener settings common to every service.
///
/// HTTP (health, readiness, metrics) binds `port`; gRPC binds `port + 1`.
/// A port of 0 asks the OS for ephemeral ports on both listeners.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn grpc_addr(&self) -> SocketAddr {
        let port = if self.port == 0 { 0 } else { self.port + 1 };
        SocketAddr::new(self.host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grpc_listens_next_to_http() {
        let cfg = Config {
            port: 3000,
            ..Config::default()
        };
        assert_eq!(cfg.http_addr().port(), 3000);
        assert_eq!(cfg.grpc_addr().port(), 3001);
    }

    #[test]
    fn ephemeral_port_stays_ephemeral() {
        let cfg = Config {
            port: 0,
            ..Config::default()
        };
        assert_eq!(cfg.grpc_addr().port(), 0);
    }
}
