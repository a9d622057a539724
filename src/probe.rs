use log::debug;
use serde::Serialize;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

// Tried in this order; the first port accepting a connection wins.
pub const DEFAULT_PORTS: [(u16, &str); 5] = [
    (3389, "RDP"),
    (22, "SSH"),
    (80, "HTTP"),
    (443, "HTTPS"),
    (5938, "TeamViewer"),
];

pub trait Connector {
    fn connect(&self, host: &str, port: u16, timeout: Duration) -> io::Result<()>;
}

pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, host: &str, port: u16, timeout: Duration) -> io::Result<()> {
        let mut last_err = io::Error::new(
            io::ErrorKind::NotFound,
            format!("no addresses found for {}", host),
        );
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_) => return Ok(()),
                Err(err) => last_err = err,
            }
        }
        Err(last_err)
    }
}

#[derive(Serialize, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub is_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub err_str: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_port: Option<u16>,
}

pub struct HostProbe {
    connector: Box<dyn Connector + Send + Sync>,
    ports: Vec<(u16, &'static str)>,
    timeout: Duration,
}

impl HostProbe {
    pub fn new() -> Self {
        Self::with_connector(Box::new(TcpConnector))
    }

    pub fn with_connector(connector: Box<dyn Connector + Send + Sync>) -> Self {
        Self {
            connector,
            ports: DEFAULT_PORTS.to_vec(),
            timeout: PROBE_TIMEOUT,
        }
    }

    pub fn with_ports(mut self, ports: Vec<(u16, &'static str)>) -> Self {
        self.ports = ports;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Blocks for up to `timeout` per port tried. If nothing answers, the
    /// error of the last port tried is reported.
    pub fn check(&self, host: &str) -> ProbeResult {
        let mut result = ProbeResult::default();
        for &(port, label) in &self.ports {
            match self.connector.connect(host, port, self.timeout) {
                Ok(()) => {
                    debug!("{} is up on port {} ({})", host, port, label);
                    return ProbeResult {
                        is_up: true,
                        info: Some(format!("{} ({})", port, label)),
                        ..Default::default()
                    };
                }
                Err(err) => {
                    debug!("{} did not answer on port {}: {}", host, port, err);
                    result.err_code = Some(err.raw_os_error().unwrap_or(0));
                    result.err_str = Some(err.to_string());
                    result.error_port = Some(port);
                }
            }
        }
        result
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use crate::probe::*;
    use std::net::TcpListener;
    use std::sync::{Arc, Mutex};

    struct FakeConnector {
        open: Vec<u16>,
        attempts: Arc<Mutex<Vec<u16>>>,
    }

    impl Connector for FakeConnector {
        fn connect(&self, _: &str, port: u16, _: Duration) -> io::Result<()> {
            self.attempts.lock().unwrap().push(port);
            if self.open.contains(&port) {
                Ok(())
            } else {
                Err(io::Error::from_raw_os_error(111))
            }
        }
    }

    fn fake_probe(open: Vec<u16>) -> (HostProbe, Arc<Mutex<Vec<u16>>>) {
        let attempts: Arc<Mutex<Vec<u16>>> = Default::default();
        let conn = FakeConnector {
            open,
            attempts: attempts.clone(),
        };
        (HostProbe::with_connector(Box::new(conn)), attempts)
    }

    #[test]
    fn test_first_open_port_wins() {
        let (probe, attempts) = fake_probe(vec![443, 5938]);
        let result = probe.check("pc.lan");
        assert_eq!(
            result,
            ProbeResult {
                is_up: true,
                info: Some("443 (HTTPS)".to_string()),
                ..Default::default()
            }
        );
        assert_eq!(*attempts.lock().unwrap(), vec![3389, 22, 80, 443]);
    }

    #[test]
    fn test_all_closed_reports_last_port() {
        let (probe, attempts) = fake_probe(vec![]);
        let result = probe.check("pc.lan");
        assert!(!result.is_up);
        assert_eq!(result.info, None);
        assert_eq!(result.error_port, Some(5938));
        assert_eq!(result.err_code, Some(111));
        assert_eq!(attempts.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(PROBE_TIMEOUT, Duration::from_secs(3));
        assert_eq!(HostProbe::new().timeout, PROBE_TIMEOUT);
        let probe = HostProbe::new().with_timeout(Duration::from_millis(200));
        assert_eq!(probe.timeout, Duration::from_millis(200));
    }

    #[test]
    fn test_timeout_is_passed_to_connector() {
        struct SeenTimeout(Arc<Mutex<Vec<Duration>>>);
        impl Connector for SeenTimeout {
            fn connect(&self, _: &str, _: u16, timeout: Duration) -> io::Result<()> {
                self.0.lock().unwrap().push(timeout);
                Err(io::Error::from(io::ErrorKind::TimedOut))
            }
        }
        let seen: Arc<Mutex<Vec<Duration>>> = Default::default();
        let result = HostProbe::with_connector(Box::new(SeenTimeout(seen.clone()))).check("pc.lan");
        assert_eq!(*seen.lock().unwrap(), vec![PROBE_TIMEOUT; 5]);
        assert_eq!(result.err_code, Some(0));
    }

    #[test]
    fn test_serialized_shape() {
        let up = ProbeResult {
            is_up: true,
            info: Some("22 (SSH)".to_string()),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&up).unwrap(),
            serde_json::json!({"isUp": true, "info": "22 (SSH)"})
        );
        let down = ProbeResult {
            is_up: false,
            err_code: Some(110),
            err_str: Some("timed out".to_string()),
            error_port: Some(5938),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&down).unwrap(),
            serde_json::json!({"isUp": false, "errCode": 110, "errStr": "timed out", "errorPort": 5938})
        );
    }

    #[test]
    fn test_tcp_probe_on_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let open = listener.local_addr().unwrap().port();
        let closed = {
            let tmp = TcpListener::bind("127.0.0.1:0").unwrap();
            tmp.local_addr().unwrap().port()
        };

        let probe = HostProbe::new()
            .with_ports(vec![(closed, "closed"), (open, "open")])
            .with_timeout(Duration::from_millis(500));
        let result = probe.check("127.0.0.1");
        assert!(result.is_up);
        assert_eq!(result.info, Some(format!("{} (open)", open)));

        let probe = HostProbe::new()
            .with_ports(vec![(closed, "closed")])
            .with_timeout(Duration::from_millis(500));
        let result = probe.check("127.0.0.1");
        assert!(!result.is_up);
        assert_eq!(result.error_port, Some(closed));
    }
}
