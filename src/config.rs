//! Process configuration: CLI flags (`cmdline`) overlaid with environment
//! variables, as described in spec.md §6 "Environment / config".

use std::env;
use std::net::IpAddr;

use crate::cmdline::Run;

#[derive(Debug, Clone)]
pub struct IceServerConfig {
    pub stun_urls: Vec<String>,
    pub turn_url: Option<String>,
    pub turn_username: Option<String>,
    pub turn_credential: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub cors_origin: Option<String>,

    pub rtc_ip: IpAddr,
    pub rtc_announce_ip: Option<IpAddr>,
    pub rtc_port: u16,
    pub num_workers: usize,

    pub ice: IceServerConfig,
    pub invidious_instances: Vec<String>,
}

impl Config {
    pub fn from_cli(run: Run) -> Self {
        let port = env::var("PORT").ok();
        let listen_addr = match port {
            Some(p) => format!("0.0.0.0:{}", p),
            None => run.listen_addr,
        };

        let rtc_announce_ip = env::var("MEDIASOUP_ANNOUNCED_IP")
            .ok()
            .and_then(|s| s.parse().ok())
            .or_else(|| run.rtc_announce_ip.and_then(|s| s.parse().ok()));

        let rtc_port = env::var("MEDIASOUP_PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(run.rtc_port);

        let num_workers = env::var("MEDIASOUP_NUM_WORKERS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(run.num_workers.max(1));

        let invidious_instances = env::var("INVIDIOUS_INSTANCES")
            .map(|csv| csv.split(',').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_else(|_| vec!["https://invidious.io".to_owned()]);

        Self {
            listen_addr,
            cert_path: run.cert_path,
            key_path: run.key_path,
            cors_origin: env::var("CORS_ORIGIN").ok(),
            rtc_ip: run.rtc_ip.parse().unwrap_or(IpAddr::from([127, 0, 0, 1])),
            rtc_announce_ip,
            rtc_port,
            num_workers,
            ice: IceServerConfig {
                stun_urls: vec![
                    "stun:stun.l.google.com:19302".to_owned(),
                    "stun:stun1.l.google.com:19302".to_owned(),
                ],
                turn_url: env::var("TURN_URL").ok(),
                turn_username: env::var("TURN_USERNAME").ok(),
                turn_credential: env::var("TURN_CREDENTIAL").ok(),
            },
            invidious_instances,
        }
    }
}

impl IceServerConfig {
    /// Build the `{iceServers: [...]}` payload served at `GET /ice-servers`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut servers: Vec<serde_json::Value> = self
            .stun_urls
            .iter()
            .map(|url| serde_json::json!({ "urls": url }))
            .collect();
        if let Some(turn_url) = &self.turn_url {
            servers.push(serde_json::json!({
                "urls": turn_url,
                "username": self.turn_username.clone().unwrap_or_default(),
                "credential": self.turn_credential.clone().unwrap_or_default(),
            }));
        }
        serde_json::json!({ "iceServers": servers })
    }
}
