//! Protocol version negotiation for `server.version`: a client offers a
//! single version or a `[min, max]` range, and the negotiated version is
//! the minimum of the client's maximum and this server's maximum.

use crate::error::RpcError;

pub type ProtocolVersion = (u32, u32);

pub const MIN_SUPPORTED: ProtocolVersion = (1, 4);
pub const MAX_SUPPORTED: ProtocolVersion = (1, 5);

pub fn parse(s: &str) -> Result<ProtocolVersion, RpcError> {
    let mut parts = s.splitn(2, '.');
    let major: u32 = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or_else(|| RpcError::bad_request(format!("invalid protocol version: {}", s)))?;
    let minor: u32 = match parts.next() {
        Some(p) => p
            .parse()
            .map_err(|_| RpcError::bad_request(format!("invalid protocol version: {}", s)))?,
        None => 0,
    };
    Ok((major, minor))
}

pub fn format(v: ProtocolVersion) -> String {
    format!("{}.{}", v.0, v.1)
}

/// Accepts either a single version string or a `[min, max]` pair (both
/// shapes are legal per the client-side protocol, which can offer a range).
/// Returns the negotiated `min(client_max, server_max)`, or an error if that
/// floor is below `server_min`.
pub fn negotiate(client_versions: &[String]) -> Result<ProtocolVersion, RpcError> {
    let (client_min, client_max) = match client_versions.len() {
        1 => {
            let v = parse(&client_versions[0])?;
            (v, v)
        }
        2 => (parse(&client_versions[0])?, parse(&client_versions[1])?),
        _ => {
            return Err(RpcError::bad_request(
                "protocol_version must be a string or a [min, max] pair",
            ))
        }
    };
    if client_min > client_max {
        return Err(RpcError::bad_request("protocol_version min exceeds max"));
    }
    let negotiated_max = client_max.min(MAX_SUPPORTED);
    if negotiated_max < MIN_SUPPORTED || negotiated_max < client_min {
        return Err(RpcError::bad_request(format!(
            "unsupported protocol version range [{}, {}]",
            format(client_min),
            format(client_max)
        )));
    }
    Ok(negotiated_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_version_string_negotiates_itself() {
        assert_eq!(negotiate(&["1.4".to_string()]).unwrap(), (1, 4));
    }

    #[test]
    fn range_negotiates_the_server_max_when_in_range() {
        assert_eq!(
            negotiate(&["1.4".to_string(), "1.5".to_string()]).unwrap(),
            (1, 5)
        );
    }

    #[test]
    fn below_minimum_is_rejected() {
        assert!(negotiate(&["1.0".to_string()]).is_err());
    }

    #[test]
    fn future_only_range_is_rejected() {
        assert!(negotiate(&["1.6".to_string(), "1.9".to_string()]).is_err());
    }
}
