//! Client IP extraction utilities.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request};

/// Where the client IP of a request is read from.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IpSource {
    /// Socket peer address
    #[default]
    Socket,
    /// First entry of `X-Forwarded-For`, set by a trusted reverse proxy
    XForwardedFor,
}

/// Extract the client IP address based on configuration.
///
/// With `IpSource::XForwardedFor` the header is required and there is no
/// fallback to the socket peer. Otherwise the header is ignored entirely.
pub fn extract_client_ip(request: &Request, source: IpSource) -> Option<String> {
    match source {
        IpSource::XForwardedFor => {
            let value = request.headers().get("x-forwarded-for")?.to_str().ok()?;
            let ip = value.split(',').next()?.trim();
            (!ip.is_empty()).then(|| ip.to_string())
        }
        IpSource::Socket => request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_from(peer: &str, forwarded_for: Option<&str>) -> Request {
        let mut builder = Request::builder();
        if let Some(value) = forwarded_for {
            builder = builder.header("x-forwarded-for", value);
        }
        let mut request = builder.body(Body::empty()).unwrap();
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[test]
    fn test_socket_source_ignores_forwarded_for() {
        let request = request_from("192.0.2.1:4000", Some("203.0.113.7"));
        assert_eq!(
            extract_client_ip(&request, IpSource::Socket),
            Some("192.0.2.1".to_string())
        );
    }

    #[test]
    fn test_forwarded_for_first_entry() {
        let request = request_from("192.0.2.1:4000", Some("203.0.113.7, 10.0.0.1"));
        assert_eq!(
            extract_client_ip(&request, IpSource::XForwardedFor),
            Some("203.0.113.7".to_string())
        );
    }

    #[test]
    fn test_forwarded_for_required_when_configured() {
        let request = request_from("192.0.2.1:4000", None);
        assert_eq!(extract_client_ip(&request, IpSource::XForwardedFor), None);

        let request = request_from("192.0.2.1:4000", Some(" "));
        assert_eq!(extract_client_ip(&request, IpSource::XForwardedFor), None);
    }

    #[test]
    fn test_no_source() {
        let request = Request::builder().body(Body::empty()).unwrap();
        assert_eq!(extract_client_ip(&request, IpSource::Socket), None);
    }
}
