use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::str::FromStr;
use thiserror::Error;

const SYNC_LEN: usize = 6;
const SYNCHRONIZATION_SCHEME: [u8; SYNC_LEN] = [0xff; SYNC_LEN];
const MAC_REPETITIONS: usize = 16;
pub const MAGIC_PACKET_LEN: usize = SYNC_LEN + 6 * MAC_REPETITIONS;
// Port used by the web client when a host has none configured.
pub const DEFAULT_PORT: u16 = 9;

lazy_static! {
    static ref MAC_PATTERN: Regex = Regex::new("^([0-9A-F]{2}-){5}[0-9A-F]{2}$").unwrap();
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Error: Invalid MAC-address: {0}")]
    InvalidMac(String),
    #[error("Error: Cannot resolve hostname \"{0}\".")]
    Unresolvable(String),
    #[error("Error: Invalid subnet size of {0}. CIDR must be between 0 and 32.")]
    InvalidCidr(String),
    #[error("Error: Invalid port value of {0}. Port must be between 1 and 65535.")]
    InvalidPort(String),
    #[error("Error: Cannot create UDP socket: {}", os_error(.0))]
    Socket(io::Error),
    #[error("Error: Cannot enable broadcast on socket: {}", os_error(.0))]
    BroadcastOption(io::Error),
    #[error("Error: Cannot send magic packet: {}", os_error(.0))]
    Send(io::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Resolution,
    Transport,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Resolution => "resolution",
            Self::Transport => "transport",
        }
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidMac(_) | Self::InvalidCidr(_) | Self::InvalidPort(_) => {
                ErrorKind::Validation
            }
            Self::Unresolvable(_) => ErrorKind::Resolution,
            Self::Socket(_) | Self::BroadcastOption(_) | Self::Send(_) => ErrorKind::Transport,
        }
    }
}

fn os_error(err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(code) => format!("{} - {}", code, err),
        None => err.to_string(),
    }
}

/// Uppercases a MAC address and rewrites it into `AA-BB-CC-DD-EE-FF` form.
///
/// `:` separators become `-`, and a bare run of 12 hex digits is split into
/// pairs. Anything else is returned as-is for the caller to reject.
pub fn normalize_mac(mac: &str) -> String {
    let mac = mac.trim().to_uppercase().replace(':', "-");
    if mac.len() == 12 && mac.chars().all(|c| c.is_ascii_hexdigit()) {
        return (0..6)
            .map(|i| &mac[2 * i..2 * i + 2])
            .collect::<Vec<&str>>()
            .join("-");
    }
    mac
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize_mac(s);
        if !MAC_PATTERN.is_match(&normalized) {
            return Err(Error::InvalidMac(normalized));
        }
        let bytes = hex::decode(normalized.replace('-', ""))
            .map_err(|_| Error::InvalidMac(normalized.clone()))?;
        let octets: [u8; 6] = bytes
            .try_into()
            .map_err(|_| Error::InvalidMac(normalized.clone()))?;
        Ok(Self(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let o = &self.0;
        write!(
            f,
            "{:02X}-{:02X}-{:02X}-{:02X}-{:02X}-{:02X}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

pub struct MagicPacket([u8; MAGIC_PACKET_LEN]);

impl MagicPacket {
    pub fn new(mac: MacAddress) -> Self {
        let mut data = [0u8; MAGIC_PACKET_LEN];
        data[..SYNC_LEN].copy_from_slice(&SYNCHRONIZATION_SCHEME);
        for chunk in data[SYNC_LEN..].chunks_exact_mut(6) {
            chunk.copy_from_slice(&mac.0);
        }
        Self(data)
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Network and directed broadcast address of the subnet an address lives in.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BroadcastTarget {
    pub netmask: Ipv4Addr,
    pub network: Ipv4Addr,
    pub size: u64,
    pub broadcast: Ipv4Addr,
}

impl BroadcastTarget {
    /// `cidr` must already be validated to lie in `0..=32`.
    pub fn new(ip: Ipv4Addr, cidr: u8) -> Self {
        debug_assert!(cidr <= 32);
        let host_bits = 32 - u32::from(cidr);
        // A shift by 32 is out of range for u32; /0 has an empty mask.
        let mask = u32::MAX.checked_shl(host_bits).unwrap_or(0);
        let network = u32::from(ip) & mask;
        let size = 1u64 << host_bits;
        let broadcast = u64::from(network) + size - 1;
        Self {
            netmask: Ipv4Addr::from(mask),
            network: Ipv4Addr::from(network),
            size,
            broadcast: Ipv4Addr::from(broadcast as u32),
        }
    }
}

/// Parses an optional subnet prefix length. Empty input means "no subnet".
pub fn parse_cidr(cidr: &str) -> Result<Option<u8>, Error> {
    let cidr = cidr.trim();
    if cidr.is_empty() {
        return Ok(None);
    }
    match cidr.parse::<u8>() {
        Ok(n) if n <= 32 => Ok(Some(n)),
        _ => Err(Error::InvalidCidr(cidr.to_string())),
    }
}

/// Parses an optional UDP port. Empty input means "use the default".
pub fn parse_port(port: &str) -> Result<Option<u16>, Error> {
    let port = port.trim();
    if port.is_empty() {
        return Ok(None);
    }
    match port.parse::<u16>() {
        Ok(n) if n >= 1 => Ok(Some(n)),
        _ => Err(Error::InvalidPort(port.to_string())),
    }
}

/// Human readable log of every decision taken while sending a packet.
#[derive(Default, Debug)]
pub struct Trace {
    lines: Vec<String>,
}

impl Trace {
    pub fn new() -> Self {
        Default::default()
    }
    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        debug!("{}", line);
        self.lines.push(line);
    }
    pub fn lines(&self) -> &[String] {
        &self.lines
    }
    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

pub trait Resolver {
    fn resolve(&self, host: &str) -> Option<Ipv4Addr>;
}

pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn resolve(&self, host: &str) -> Option<Ipv4Addr> {
        (host, 0)
            .to_socket_addrs()
            .ok()?
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
    }
}

pub trait Transport {
    fn send_to(&self, payload: &[u8], dest: SocketAddrV4, trace: &mut Trace) -> Result<(), Error>;
}

pub struct UdpTransport;

impl Transport for UdpTransport {
    fn send_to(&self, payload: &[u8], dest: SocketAddrV4, trace: &mut Trace) -> Result<(), Error> {
        trace.push("Creating UDP socket on 0.0.0.0:0");
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(Error::Socket)?;
        trace.push("Enabling SO_BROADCAST on socket");
        socket.set_broadcast(true).map_err(Error::BroadcastOption)?;
        trace.push(format!("Sending {} bytes to {}", payload.len(), dest));
        socket.send_to(payload, dest).map_err(Error::Send)?;
        Ok(())
    }
}

pub struct LogOnlyTransport;

impl Transport for LogOnlyTransport {
    fn send_to(&self, payload: &[u8], dest: SocketAddrV4, trace: &mut Trace) -> Result<(), Error> {
        info!("faking magic packet of {} bytes to {}", payload.len(), dest);
        trace.push(format!("Dry run, not sending {} bytes to {}", payload.len(), dest));
        Ok(())
    }
}

/// Validates a wake request, derives its destination and sends one magic
/// packet. The first failing step aborts the send.
pub struct Sender {
    resolver: Box<dyn Resolver + Send + Sync>,
    transport: Box<dyn Transport + Send + Sync>,
}

impl Sender {
    pub fn new(
        resolver: Box<dyn Resolver + Send + Sync>,
        transport: Box<dyn Transport + Send + Sync>,
    ) -> Self {
        Self {
            resolver,
            transport,
        }
    }

    pub fn system() -> Self {
        Self::new(Box::new(SystemResolver), Box::new(UdpTransport))
    }

    pub fn send(
        &self,
        mac: &str,
        host: &str,
        cidr: &str,
        port: &str,
        trace: &mut Trace,
    ) -> Result<SocketAddrV4, Error> {
        trace.push(format!(
            "wake(mac='{}', host='{}', cidr='{}', port='{}')",
            mac, host, cidr, port
        ));
        let result = self.run(mac, host, cidr, port, trace);
        match &result {
            Ok(dest) => trace.push(format!("Done. Magic packet sent to {}", dest)),
            Err(err) => trace.push(err.to_string()),
        }
        result
    }

    fn run(
        &self,
        mac: &str,
        host: &str,
        cidr: &str,
        port: &str,
        trace: &mut Trace,
    ) -> Result<SocketAddrV4, Error> {
        trace.push(format!("Validating MAC address: {}", mac));
        let mac: MacAddress = mac.parse()?;
        trace.push(format!("MAC = {}", mac));

        trace.push("Creating the magic packet");
        let packet = MagicPacket::new(mac);

        let mut ip = self.resolve(host, trace)?;

        if !cidr.trim().is_empty() {
            trace.push(format!(
                "CIDR is set to {}. Will use broadcast address.",
                cidr
            ));
        }
        if let Some(cidr) = parse_cidr(cidr)? {
            let target = BroadcastTarget::new(ip, cidr);
            trace.push(format!("netmask = {}", target.netmask));
            trace.push(format!("network address = {}", target.network));
            trace.push(format!("network size = {}", target.size));
            trace.push(format!("broadcast address = {}", target.broadcast));
            ip = target.broadcast;
        }

        let port = match parse_port(port)? {
            Some(port) => port,
            None => {
                trace.push(format!("No port given, using {}", DEFAULT_PORT));
                DEFAULT_PORT
            }
        };

        let dest = SocketAddrV4::new(ip, port);
        self.transport.send_to(packet.as_bytes(), dest, trace)?;
        Ok(dest)
    }

    fn resolve(&self, host: &str, trace: &mut Trace) -> Result<Ipv4Addr, Error> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(ip);
        }
        trace.push(format!("Resolving host: {}", host));
        let ip = self
            .resolver
            .resolve(host)
            .ok_or_else(|| Error::Unresolvable(host.to_string()))?;
        trace.push(format!("{} resolved to {}", host, ip));
        Ok(ip)
    }
}
