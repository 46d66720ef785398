// Connection Endpoint Domain Model

use serde::{Deserialize, Serialize};

/// Address at which one office process accepts bridge connections.
///
/// One endpoint per pool entry. The connect string is the canonical identity of
/// the endpoint: it is used for the office `--accept` argument, for finding a
/// stale process from a previous run, and for naming the instance profile dir.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionEndpoint {
    Socket { host: String, port: u16 },
    Pipe { name: String },
}

impl ConnectionEndpoint {
    pub fn socket(host: impl Into<String>, port: u16) -> Self {
        ConnectionEndpoint::Socket {
            host: host.into(),
            port,
        }
    }

    pub fn pipe(name: impl Into<String>) -> Self {
        ConnectionEndpoint::Pipe { name: name.into() }
    }

    /// Canonical connect string, e.g. `socket,host=127.0.0.1,port=2002,tcpNoDelay=1`
    pub fn connect_string(&self) -> String {
        match self {
            ConnectionEndpoint::Socket { host, port } => {
                format!("socket,host={},port={},tcpNoDelay=1", host, port)
            }
            ConnectionEndpoint::Pipe { name } => format!("pipe,name={}", name),
        }
    }

    /// Value of the office `--accept=` command line flag
    pub fn accept_argument(&self) -> String {
        format!("{};urp;", self.connect_string())
    }

    /// Full UNO url of the component context exposed by the process
    pub fn uno_url(&self) -> String {
        format!(
            "uno:{};urp;StarOffice.ComponentContext",
            self.connect_string()
        )
    }

    /// Directory name of the per-endpoint office user profile
    pub fn profile_dir_name(&self) -> String {
        let sanitized: String = self
            .connect_string()
            .chars()
            .map(|c| match c {
                ',' => '_',
                '=' => '-',
                other => other,
            })
            .collect();
        format!(".officepool_{}", sanitized)
    }
}

impl std::fmt::Display for ConnectionEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionEndpoint::Socket { host, port } => write!(f, "{}:{}", host, port),
            ConnectionEndpoint::Pipe { name } => write!(f, "pipe:{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_connect_string() {
        let endpoint = ConnectionEndpoint::socket("127.0.0.1", 2002);
        assert_eq!(
            endpoint.connect_string(),
            "socket,host=127.0.0.1,port=2002,tcpNoDelay=1"
        );
        assert_eq!(
            endpoint.uno_url(),
            "uno:socket,host=127.0.0.1,port=2002,tcpNoDelay=1;urp;StarOffice.ComponentContext"
        );
    }

    #[test]
    fn test_pipe_connect_string() {
        let endpoint = ConnectionEndpoint::pipe("office_0");
        assert_eq!(endpoint.connect_string(), "pipe,name=office_0");
        assert_eq!(endpoint.accept_argument(), "pipe,name=office_0;urp;");
        assert_eq!(endpoint.to_string(), "pipe:office_0");
    }

    #[test]
    fn test_profile_dir_name_is_filesystem_safe() {
        let endpoint = ConnectionEndpoint::socket("localhost", 2006);
        let name = endpoint.profile_dir_name();

        assert_eq!(
            name,
            ".officepool_socket_host-localhost_port-2006_tcpNoDelay-1"
        );
        assert!(!name.contains(','));
        assert!(!name.contains('='));
    }
}
