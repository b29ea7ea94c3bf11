//! `f5-vpn://` deep links
//!
//! Browsers launch the client with a link like
//! `f5-vpn://vpn.example.com?server=vpn.example.com&port=443&sid=abc123`.

use super::EngineError;
use crate::options::Options;
use std::collections::HashMap;
use url::Url;

pub const SCHEME: &str = "f5-vpn";

/// Session parameters carried by a deep link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeepLink {
    /// `host` or `host:port`
    pub server: String,
    pub session_id: Option<String>,
}

impl DeepLink {
    pub fn parse(link: &str) -> Result<Self, EngineError> {
        let url = Url::parse(link)?;
        if url.scheme() != SCHEME {
            return Err(EngineError::InvalidLink(format!(
                "unexpected scheme {:?}",
                url.scheme()
            )));
        }

        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let param = |name: &str| params.get(name).filter(|v| !v.is_empty());

        let host = param("server")
            .ok_or_else(|| EngineError::InvalidLink("missing server parameter".to_string()))?;

        if let Some(protocol) = param("protocol") {
            if protocol != "https" {
                return Err(EngineError::InvalidLink(format!(
                    "unsupported protocol {:?}",
                    protocol
                )));
            }
        }

        let server = match param("port") {
            Some(port) if port != "443" => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| EngineError::InvalidLink(format!("invalid port {:?}", port)))?;
                format!("{}:{}", host, port)
            }
            _ => host.clone(),
        };

        Ok(Self {
            server,
            session_id: param("sid").cloned(),
        })
    }

    pub fn apply(self, options: &mut Options) {
        options.server = self.server;
        if let Some(session_id) = self.session_id {
            options.session_id = session_id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_link() {
        let link = DeepLink::parse(
            "f5-vpn://vpn.example.com?server=vpn.example.com&resourcename=/Common/corp&sid=abc123",
        )
        .unwrap();

        assert_eq!(link.server, "vpn.example.com");
        assert_eq!(link.session_id.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_custom_port() {
        let link =
            DeepLink::parse("f5-vpn://x?server=vpn.example.com&protocol=https&port=8443").unwrap();
        assert_eq!(link.server, "vpn.example.com:8443");

        let link = DeepLink::parse("f5-vpn://x?server=vpn.example.com&port=443").unwrap();
        assert_eq!(link.server, "vpn.example.com");
    }

    #[test]
    fn test_rejected_links() {
        assert!(matches!(
            DeepLink::parse("https://vpn.example.com?server=vpn.example.com"),
            Err(EngineError::InvalidLink(_))
        ));
        assert!(matches!(
            DeepLink::parse("f5-vpn://vpn.example.com?sid=abc"),
            Err(EngineError::InvalidLink(_))
        ));
        assert!(matches!(
            DeepLink::parse("f5-vpn://x?server=vpn.example.com&protocol=http"),
            Err(EngineError::InvalidLink(_))
        ));
        assert!(matches!(
            DeepLink::parse("f5-vpn://x?server=vpn.example.com&port=none"),
            Err(EngineError::InvalidLink(_))
        ));
        assert!(matches!(
            DeepLink::parse("not a link"),
            Err(EngineError::Url(_))
        ));
    }

    #[test]
    fn test_apply_keeps_session_without_sid() {
        let mut options = Options {
            server: "old.example.com".to_string(),
            session_id: "keep".to_string(),
            ..Options::default()
        };

        DeepLink::parse("f5-vpn://x?server=new.example.com")
            .unwrap()
            .apply(&mut options);

        assert_eq!(options.server, "new.example.com");
        assert_eq!(options.session_id, "keep");
    }
}
