//! Plain text datagram protocol spoken between discovery clients and
//! responders.
//!
//! | message      | payload                         |
//! |--------------|---------------------------------|
//! | hello        | `<name>`                        |
//! | hello reply  | `<name> <hostname>`             |
//! | search       | `search <name> <pattern>`       |
//! | search reply | `<pattern>:<relative path>`     |

/// Largest plaintext datagram either side sends or expects.
pub const MAX_DATAGRAM: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Hello,
    /// The pattern exactly as it was sent, echoed back in every reply.
    Search { pattern: String },
}

/// Why a datagram could not be understood.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Neither a hello nor a search for this network.
    Unknown,
    /// A search whose pattern is not valid UTF-8.
    Undecodable,
}

impl Request {
    pub fn parse(payload: &[u8], network_name: &str) -> Result<Self, ParseError> {
        if payload == network_name.as_bytes() {
            return Ok(Request::Hello);
        }

        let prefix = search_prefix(network_name);
        let rest = payload
            .strip_prefix(prefix.as_bytes())
            .ok_or(ParseError::Unknown)?;
        let pattern = std::str::from_utf8(rest).map_err(|_| ParseError::Undecodable)?;
        Ok(Request::Search {
            pattern: pattern.to_string(),
        })
    }
}

fn search_prefix(network_name: &str) -> String {
    format!("search {} ", network_name)
}

pub fn hello(network_name: &str) -> Vec<u8> {
    network_name.as_bytes().to_vec()
}

pub fn hello_reply(network_name: &str, hostname: &str) -> Vec<u8> {
    format!("{} {}", network_name, hostname).into_bytes()
}

pub fn search_request(network_name: &str, pattern: &str) -> Vec<u8> {
    format!("{}{}", search_prefix(network_name), pattern).into_bytes()
}

pub fn search_reply(pattern: &str, relative_path: &str) -> Vec<u8> {
    format!("{}:{}", pattern, relative_path).into_bytes()
}

/// Host name announced in a hello reply, if `payload` is one.
pub fn parse_hello_reply<'a>(payload: &'a str, network_name: &str) -> Option<&'a str> {
    let rest = payload.strip_prefix(network_name)?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Relative path carried by a reply to a search for `pattern`.
pub fn parse_search_reply<'a>(payload: &'a str, pattern: &str) -> Option<&'a str> {
    payload.strip_prefix(pattern)?.strip_prefix(':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests() {
        assert_eq!(Request::parse(b"HELO", "HELO"), Ok(Request::Hello));
        assert_eq!(
            Request::parse(b"search HELO fo+ o", "HELO"),
            Ok(Request::Search {
                pattern: "fo+ o".to_string()
            })
        );
        assert_eq!(Request::parse(b"HELO ", "HELO"), Err(ParseError::Unknown));
        assert_eq!(Request::parse(b"search OTHER x", "HELO"), Err(ParseError::Unknown));
        assert_eq!(
            Request::parse(b"search HELO \xff\xfe", "HELO"),
            Err(ParseError::Undecodable)
        );
    }

    #[test]
    fn test_replies() {
        let reply = String::from_utf8(hello_reply("HELO", "box")).unwrap();
        assert_eq!(parse_hello_reply(&reply, "HELO"), Some("box"));
        assert_eq!(parse_hello_reply("NOPE box", "HELO"), None);

        let reply = String::from_utf8(search_reply("fo.", "Foo/bar/spam")).unwrap();
        assert_eq!(reply, "fo.:Foo/bar/spam");
        assert_eq!(parse_search_reply(&reply, "fo."), Some("Foo/bar/spam"));
        assert_eq!(parse_search_reply(&reply, "f"), None);
        assert_eq!(search_request("HELO", "x y"), b"search HELO x y");
    }
}
