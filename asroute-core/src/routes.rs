//! Route entries and the text files they are loaded from.
//!
//! One route per line, fields separated by spaces. Two layouts exist:
//!
//! ```text
//! # PortRange: destination, inclusive port range, next hop, optional MTU
//! 127.0.0.1 8882 8884 127.0.0.1 8882 1000
//! # AsPath: destination, AS path (origin first), next hop, MTU
//! 127.0.0.1 8883 8882 8881 127.0.0.1 8882 1000
//! ```
//!
//! In the AS path layout the destination port is the path's origin. Derived
//! tables written after path-vector convergence use the AS path layout.

use crate::{
    as_path::{AsId, AsPath},
    fragmentation::Mtu,
};
use nom::{
    bytes::complete::take_till1,
    character::complete::space1,
    combinator::all_consuming,
    error::VerboseError,
    multi::separated_list1,
    IResult,
};
use std::{
    fmt::{self, Display, Formatter},
    fs, io,
    net::{Ipv4Addr, SocketAddrV4},
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error as ThisError;

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

/// The number of fields after the AS path in the AS path layout
const AS_PATH_SUFFIX: usize = 3;

/// An inclusive range of destination ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortRange {
    pub low: u16,
    pub high: u16,
}

impl PortRange {
    pub fn new(low: u16, high: u16) -> Self {
        Self { low, high }
    }

    /// A range holding a single port.
    pub fn exact(port: u16) -> Self {
        Self::new(port, port)
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.low..=self.high).contains(&port)
    }
}

/// Where to send packets for a destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteEntry {
    /// The destination address this route serves
    pub destination: Ipv4Addr,
    /// The destination ports this route serves
    pub ports: PortRange,
    /// The AS path the route was learned over, for AS path layout routes
    pub as_path: Option<AsPath>,
    /// The neighbor to hand packets to
    pub next_hop: SocketAddrV4,
    /// The MTU of the link to the next hop, if it limits packet size
    pub mtu: Option<Mtu>,
}

impl RouteEntry {
    /// Creates a route in the AS path layout. The destination port is the
    /// path's origin.
    pub fn with_as_path(
        destination: Ipv4Addr,
        as_path: AsPath,
        next_hop: SocketAddrV4,
        mtu: Mtu,
    ) -> Self {
        Self {
            destination,
            ports: PortRange::exact(as_path.origin().port()),
            as_path: Some(as_path),
            next_hop,
            mtu: Some(mtu),
        }
    }

    /// Creates a route in the port range layout.
    pub fn with_port_range(
        destination: Ipv4Addr,
        ports: PortRange,
        next_hop: SocketAddrV4,
        mtu: Option<Mtu>,
    ) -> Self {
        Self {
            destination,
            ports,
            as_path: None,
            next_hop,
            mtu,
        }
    }

    /// The first identifier of the route's AS path.
    pub fn origin(&self) -> Option<AsId> {
        self.as_path.as_ref().map(AsPath::origin)
    }
}

impl Display for RouteEntry {
    /// Writes the entry as a route file line.
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.as_path {
            Some(as_path) => write!(
                f,
                "{} {} {} {} {}",
                self.destination,
                as_path,
                self.next_hop.ip(),
                self.next_hop.port(),
                self.mtu.unwrap_or_default()
            ),
            None => {
                write!(
                    f,
                    "{} {} {} {} {}",
                    self.destination,
                    self.ports.low,
                    self.ports.high,
                    self.next_hop.ip(),
                    self.next_hop.port()
                )?;
                if let Some(mtu) = self.mtu {
                    write!(f, " {mtu}")?;
                }
                Ok(())
            }
        }
    }
}

/// The layout of the lines in a route file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteFormat {
    /// `DEST_IP PORT_LOW PORT_HIGH HOP_IP HOP_PORT [MTU]`
    PortRange,
    /// `DEST_IP AS_1 .. AS_n HOP_IP HOP_PORT MTU`
    AsPath,
}

impl FromStr for RouteFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "port-range" => Ok(RouteFormat::PortRange),
            "as-path" => Ok(RouteFormat::AsPath),
            other => Err(format!("unknown route format '{other}'")),
        }
    }
}

/// Splits a line into its space separated fields.
fn tokens(line: &str) -> Res<Vec<&str>> {
    all_consuming(separated_list1(
        space1,
        take_till1(|c: char| c.is_whitespace()),
    ))(line)
}

fn field<T: FromStr>(token: &str, name: &str) -> Result<T, String> {
    token
        .parse()
        .or_else(|_| Err(format!("invalid {name} '{token}'")))
}

fn parse_port_range_line(fields: &[&str]) -> Result<RouteEntry, String> {
    let mtu = match fields {
        [_, _, _, _, _] => None,
        [_, _, _, _, _, mtu] => Some(field(mtu, "MTU")?),
        _ => Err(format!("expected 5 or 6 fields, found {}", fields.len()))?,
    };
    let ports = PortRange::new(field(fields[1], "low port")?, field(fields[2], "high port")?);
    if ports.low > ports.high {
        Err(format!("port range {}-{} is empty", ports.low, ports.high))?
    }
    Ok(RouteEntry::with_port_range(
        field(fields[0], "destination address")?,
        ports,
        SocketAddrV4::new(
            field(fields[3], "next hop address")?,
            field(fields[4], "next hop port")?,
        ),
        mtu,
    ))
}

fn parse_as_path_line(fields: &[&str]) -> Result<RouteEntry, String> {
    if fields.len() < AS_PATH_SUFFIX + 2 {
        Err(format!(
            "expected at least {} fields, found {}",
            AS_PATH_SUFFIX + 2,
            fields.len()
        ))?
    }
    let (head, suffix) = fields.split_at(fields.len() - AS_PATH_SUFFIX);
    let ids = head[1..]
        .iter()
        .map(|token| field(token, "AS identifier").map(AsId))
        .collect::<Result<Vec<_>, _>>()?;
    let as_path = AsPath::new(ids).ok_or("missing AS path")?;
    Ok(RouteEntry::with_as_path(
        field(head[0], "destination address")?,
        as_path,
        SocketAddrV4::new(
            field(suffix[0], "next hop address")?,
            field(suffix[1], "next hop port")?,
        ),
        field(suffix[2], "MTU")?,
    ))
}

/// Parses route file contents. Blank lines are skipped.
pub fn parse_routes(text: &str, format: RouteFormat) -> Result<Vec<RouteEntry>, RouteFileError> {
    let mut routes = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let error = |reason: String| RouteFileError::Line {
            line: index + 1,
            reason,
        };
        let (_, fields) = tokens(line).or_else(|e| Err(error(e.to_string())))?;
        let route = match format {
            RouteFormat::PortRange => parse_port_range_line(&fields),
            RouteFormat::AsPath => parse_as_path_line(&fields),
        }
        .map_err(error)?;
        routes.push(route);
    }
    Ok(routes)
}

/// Writes routes one per line in their own layout.
pub fn write_routes(path: &Path, routes: &[RouteEntry]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let lines: Vec<String> = routes.iter().map(RouteEntry::to_string).collect();
    fs::write(path, lines.join("\n"))
}

/// Anything that yields a router's initial, ordered route entries.
pub trait RouteSource {
    fn routes(&self) -> Result<Vec<RouteEntry>, RouteFileError>;
}

impl RouteSource for Vec<RouteEntry> {
    fn routes(&self) -> Result<Vec<RouteEntry>, RouteFileError> {
        Ok(self.clone())
    }
}

/// A route file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFile {
    pub path: PathBuf,
    pub format: RouteFormat,
}

impl RouteFile {
    pub fn new(path: impl Into<PathBuf>, format: RouteFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }
}

impl RouteSource for RouteFile {
    fn routes(&self) -> Result<Vec<RouteEntry>, RouteFileError> {
        let text = fs::read_to_string(&self.path).map_err(|source| RouteFileError::Io {
            path: self.path.clone(),
            source,
        })?;
        parse_routes(&text, self.format)
    }
}

#[derive(Debug, ThisError)]
pub enum RouteFileError {
    #[error("Could not read route file {path:?}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("Route file line {line}: {reason}")]
    Line { line: usize, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(port: u16) -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::LOCALHOST, port)
    }

    #[test]
    fn port_range_lines() {
        let text = "10.0.0.5 5000 5010 10.0.0.9 6000 500\n\n127.0.0.1 8882 8882 127.0.0.1 8882\n";
        let routes = parse_routes(text, RouteFormat::PortRange).unwrap();
        assert_eq!(
            routes,
            vec![
                RouteEntry::with_port_range(
                    Ipv4Addr::new(10, 0, 0, 5),
                    PortRange::new(5000, 5010),
                    SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 9), 6000),
                    Some(500)
                ),
                RouteEntry::with_port_range(
                    Ipv4Addr::LOCALHOST,
                    PortRange::exact(8882),
                    hop(8882),
                    None
                ),
            ]
        );
    }

    #[test]
    fn as_path_lines() {
        let text = "127.0.0.1 8882 8881 127.0.0.1 8882 1000\r\n127.0.0.1 8884 8883 8881 127.0.0.1 8883 700";
        let routes = parse_routes(text, RouteFormat::AsPath).unwrap();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].ports, PortRange::exact(8882));
        assert_eq!(routes[0].origin(), Some(AsId(8882)));
        assert_eq!(routes[0].next_hop, hop(8882));
        assert_eq!(routes[1].as_path, Some("8884 8883 8881".parse().unwrap()));
        assert_eq!(routes[1].next_hop, hop(8883));
        assert_eq!(routes[1].mtu, Some(700));
    }

    #[test]
    fn lines_round_trip() {
        let text = "127.0.0.1 8884 8883 8881 127.0.0.1 8883 1000";
        let routes = parse_routes(text, RouteFormat::AsPath).unwrap();
        assert_eq!(routes[0].to_string(), text);

        let text = "10.0.0.5 5000 5010 10.0.0.9 6000";
        let routes = parse_routes(text, RouteFormat::PortRange).unwrap();
        assert_eq!(routes[0].to_string(), text);
    }

    #[test]
    fn reports_line_numbers() {
        let text = "10.0.0.5 5000 5010 10.0.0.9 6000\n10.0.0.5 5000 10.0.0.9 6000";
        match parse_routes(text, RouteFormat::PortRange) {
            Err(RouteFileError::Line { line, .. }) => assert_eq!(line, 2),
            other => panic!("Expected a line error, got {other:?}"),
        }

        match parse_routes("127.0.0.1 r2 127.0.0.1 8882 1000", RouteFormat::AsPath) {
            Err(RouteFileError::Line { line, reason }) => {
                assert_eq!(line, 1);
                assert!(reason.contains("r2"));
            }
            other => panic!("Expected a line error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(parse_routes("10.0.0.5 5010 5000 10.0.0.9 6000", RouteFormat::PortRange).is_err());
    }

    #[test]
    fn writes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rutas").join("BGP_8881.txt");
        let routes = vec![RouteEntry::with_as_path(
            Ipv4Addr::LOCALHOST,
            "8883 8882 8881".parse().unwrap(),
            hop(8882),
            1000,
        )];
        write_routes(&path, &routes).unwrap();
        assert_eq!(RouteFile::new(&path, RouteFormat::AsPath).routes().unwrap(), routes);
    }
}
