pub mod certbot;

use std::net::ToSocketAddrs;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::redirect::Policy;

use crate::error::{ProvisionError, ProvisionResult};

const CHALLENGE_TIMEOUT: Duration = Duration::from_secs(10);

/// External ACME client plus the network checks run before it.
pub trait CertificateClient {
    /// Check that the client can be invoked.
    fn check_prerequisites(&self) -> ProvisionResult<()>;

    /// Whether `domain` resolves to at least one address.
    fn domain_resolves(&self, domain: &str) -> bool {
        (domain, 80)
            .to_socket_addrs()
            .is_ok_and(|mut addrs| addrs.next().is_some())
    }

    /// HTTP status code returned for `url`, fetched over plain HTTP.
    /// Redirects are not followed.
    fn probe_challenge(&self, url: &str) -> ProvisionResult<u16> {
        let client = Client::builder()
            .timeout(CHALLENGE_TIMEOUT)
            .redirect(Policy::none())
            .build()
            .map_err(|e| ProvisionError::Probe(format!("http client build failed: {e}")))?;
        let response = client
            .get(url)
            .send()
            .map_err(|e| ProvisionError::Probe(format!("GET {url}: {e}")))?;
        Ok(response.status().as_u16())
    }

    /// Obtain a certificate for `domain` using the webroot under `root`.
    fn obtain(&self, domain: &str, email: &str, root: &Path) -> ProvisionResult<()>;
}

/// Operator guidance printed when issuance fails.
#[must_use]
pub fn diagnostics(domain: &str) -> Vec<String> {
    vec![
        format!("Check that the DNS A record for {domain} points at this host."),
        format!("Check that http://{domain}/ is reachable from the internet on port 80."),
        "Check that no firewall or cloud security group blocks ports 80 and 443.".to_string(),
        "Re-run `stackwright secure` once the above is fixed.".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    struct Defaults;

    impl CertificateClient for Defaults {
        fn check_prerequisites(&self) -> ProvisionResult<()> {
            Ok(())
        }

        fn obtain(&self, _domain: &str, _email: &str, _root: &Path) -> ProvisionResult<()> {
            Ok(())
        }
    }

    fn serve_once(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0_u8; 1024];
            let _ = stream.read(&mut buf);
            let response = format!("{status_line}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
            stream.write_all(response.as_bytes()).unwrap();
        });
        format!("http://{addr}/.well-known/acme-challenge/token")
    }

    #[test]
    fn challenge_status_is_returned() {
        let url = serve_once("HTTP/1.1 200 OK");
        assert_eq!(Defaults.probe_challenge(&url).unwrap(), 200);
    }

    #[test]
    fn redirects_are_reported_not_followed() {
        let url = serve_once("HTTP/1.1 301 Moved Permanently\r\nLocation: https://example.com/");
        assert_eq!(Defaults.probe_challenge(&url).unwrap(), 301);
    }

    #[test]
    fn unreachable_host_is_a_probe_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = Defaults.probe_challenge(&format!("http://{addr}/")).unwrap_err();
        assert!(matches!(err, ProvisionError::Probe(_)));
    }

    #[test]
    fn diagnostics_name_the_domain() {
        let hints = diagnostics("example.com");
        assert!(hints.iter().any(|h| h.contains("A record for example.com")));
    }
}
