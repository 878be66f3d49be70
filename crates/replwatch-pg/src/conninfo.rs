//! libpq connection strings.
//!
//! Subscriptions store the publisher's connection string; discovery parses
//! it back to find which configured endpoint a subscription points at.

use std::collections::HashMap;

use replwatch_state::DatabaseEndpoint;

use crate::credentials::Credentials;

/// The address parts of a connection string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnInfo {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub user: Option<String>,
}

impl ConnInfo {
    /// Parse either `key=value` pairs or a `postgres://` URI.
    pub fn parse(raw: &str) -> ConnInfo {
        let raw = raw.trim();
        if raw.starts_with("postgres://") || raw.starts_with("postgresql://") {
            parse_uri(raw)
        } else {
            parse_pairs(raw)
        }
    }

    /// Whether this address names `endpoint`. Missing port means 5432.
    pub fn points_at(&self, endpoint: &DatabaseEndpoint) -> bool {
        let host_matches = self
            .host
            .as_deref()
            .is_some_and(|h| h.eq_ignore_ascii_case(&endpoint.host));
        let port_matches = self.port.unwrap_or(5432) == endpoint.port;
        let db_matches = self
            .dbname
            .as_deref()
            .is_none_or(|db| db == endpoint.database);
        host_matches && port_matches && db_matches
    }
}

fn parse_pairs(raw: &str) -> ConnInfo {
    let mut values: HashMap<String, String> = HashMap::new();
    let mut chars = raw.chars().peekable();
    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let key: String = chars
            .by_ref()
            .take_while(|c| *c != '=')
            .collect::<String>()
            .trim()
            .to_string();
        if key.is_empty() {
            break;
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        let mut value = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '\'' => break,
                    other => value.push(other),
                }
            }
        } else {
            while let Some(c) = chars.peek().copied() {
                if c.is_whitespace() {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        values.insert(key, value);
    }
    ConnInfo {
        host: values.remove("host").or_else(|| values.remove("hostaddr")),
        port: values.get("port").and_then(|p| p.parse().ok()),
        dbname: values.remove("dbname"),
        user: values.remove("user"),
    }
}

fn parse_uri(raw: &str) -> ConnInfo {
    let rest = raw.split_once("://").map(|(_, r)| r).unwrap_or(raw);
    let rest = rest.split('?').next().unwrap_or(rest);
    let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
    let (userinfo, hostport) = match authority.rsplit_once('@') {
        Some((u, h)) => (Some(u), h),
        None => (None, authority),
    };
    let user = userinfo
        .map(|u| u.split(':').next().unwrap_or(u).to_string())
        .filter(|u| !u.is_empty());
    let (host, port) = match hostport.rsplit_once(':') {
        Some((h, p)) if p.parse::<u16>().is_ok() => (h.to_string(), p.parse().ok()),
        _ => (hostport.to_string(), None),
    };
    ConnInfo {
        host: Some(host.trim_matches(|c| c == '[' || c == ']').to_string())
            .filter(|h| !h.is_empty()),
        port,
        dbname: Some(path.to_string()).filter(|d| !d.is_empty()),
        user,
    }
}

fn escape_value(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Connection string a subscriber uses to reach `endpoint`.
pub fn build(endpoint: &DatabaseEndpoint, credentials: &Credentials) -> String {
    let mut parts = vec![
        format!("host={}", escape_value(&endpoint.host)),
        format!("port={}", endpoint.port),
        format!("dbname={}", escape_value(&endpoint.database)),
        format!("user={}", escape_value(&credentials.username)),
        format!("password={}", escape_value(&credentials.password)),
    ];
    if endpoint.use_iam_auth {
        parts.push("sslmode=require".to_string());
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use replwatch_state::{DatabaseRole, EndpointSpec};

    fn endpoint(host: &str, port: u16, db: &str) -> DatabaseEndpoint {
        DatabaseEndpoint::create(EndpointSpec {
            name: "src".into(),
            host: host.into(),
            port,
            database: db.into(),
            role: DatabaseRole::Primary,
            environment: "test".into(),
            cloud_provider: "aws".into(),
            credential_ref: "ref".into(),
            use_iam_auth: false,
        })
        .unwrap()
    }

    #[test]
    fn parses_keyword_pairs() {
        let info = ConnInfo::parse("host=db1.internal port=5433 dbname=orders user=repl password='a b'");
        assert_eq!(info.host.as_deref(), Some("db1.internal"));
        assert_eq!(info.port, Some(5433));
        assert_eq!(info.dbname.as_deref(), Some("orders"));
        assert_eq!(info.user.as_deref(), Some("repl"));
    }

    #[test]
    fn parses_quoted_values_with_escapes() {
        let info = ConnInfo::parse(r"host='my host' dbname='it\'s'");
        assert_eq!(info.host.as_deref(), Some("my host"));
        assert_eq!(info.dbname.as_deref(), Some("it's"));
    }

    #[test]
    fn parses_uri() {
        let info = ConnInfo::parse("postgresql://repl:pw@db1.internal:5433/orders?sslmode=require");
        assert_eq!(info.host.as_deref(), Some("db1.internal"));
        assert_eq!(info.port, Some(5433));
        assert_eq!(info.dbname.as_deref(), Some("orders"));
        assert_eq!(info.user.as_deref(), Some("repl"));

        let bare = ConnInfo::parse("postgres://db1.internal/orders");
        assert_eq!(bare.port, None);
        assert_eq!(bare.dbname.as_deref(), Some("orders"));
    }

    #[test]
    fn matches_endpoint_with_default_port() {
        let info = ConnInfo::parse("host=DB1.internal dbname=orders");
        assert!(info.points_at(&endpoint("db1.internal", 5432, "orders")));
        assert!(!info.points_at(&endpoint("db1.internal", 5433, "orders")));
        assert!(!info.points_at(&endpoint("db1.internal", 5432, "billing")));
        assert!(!info.points_at(&endpoint("db2.internal", 5432, "orders")));
    }

    #[test]
    fn build_round_trips_through_parse() {
        let ep = endpoint("db1.internal", 5433, "orders");
        let raw = build(&ep, &Credentials::new("repl", "p'w"));
        let info = ConnInfo::parse(&raw);
        assert!(info.points_at(&ep));
        assert_eq!(info.user.as_deref(), Some("repl"));
    }
}
