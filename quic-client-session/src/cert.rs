//! Certificate verification results and the TLS summary derived from them
// (c) 2025 Ross Younger

use wildmatch::WildMatch;

/// TLS 1.2, as encoded in [`SslInfo::connection_status`]
pub const SSL_CONNECTION_VERSION_TLS1_2: u32 = 3;
/// Shift of the version within [`SslInfo::connection_status`]
pub const SSL_CONNECTION_VERSION_SHIFT: u32 = 20;
/// Mask of the version within [`SslInfo::connection_status`]
pub const SSL_CONNECTION_VERSION_MASK: u32 = 7;
/// Mask of the cipher suite within [`SslInfo::connection_status`]
pub const SSL_CONNECTION_CIPHERSUITE_MASK: u32 = 0xffff;
/// Shift of the cipher suite within [`SslInfo::connection_status`]
pub const SSL_CONNECTION_CIPHERSUITE_SHIFT: u32 = 0;

/// QUIC crypto does not negotiate a TLS cipher suite, so sessions report
/// `TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256`.
const REPORTED_CIPHER_SUITE: u32 = 0xc02f;
const REPORTED_SECURITY_BITS: u16 = 256;

/// A verified server certificate
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Certificate {
    /// DNS names the certificate is valid for (subject alternative names).
    /// The leftmost label may be `*`.
    pub dns_names: Vec<String>,
}

impl Certificate {
    /// Whether this certificate is valid for `hostname`.
    ///
    /// Matching is case insensitive; a `*` only stands for the whole leftmost label.
    #[must_use]
    pub fn verify_name_match(&self, hostname: &str) -> bool {
        let hostname = hostname.trim_end_matches('.').to_ascii_lowercase();
        self.dns_names.iter().any(|name| {
            let name = name.trim_end_matches('.').to_ascii_lowercase();
            match (name.split_once('.'), hostname.split_once('.')) {
                (Some((pattern, name_rest)), Some((label, host_rest))) if pattern.contains('*') => {
                    // the wildcard must not swallow dots, and must not match a bare domain
                    name_rest == host_rest
                        && name_rest.contains('.')
                        && WildMatch::new(pattern).matches(label)
                }
                _ => name == hostname,
            }
        })
    }
}

/// Outcome of verifying the server's proof
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertVerifyResult {
    /// The verified certificate, if any
    pub verified_cert: Option<Certificate>,
    /// Certificate status flags
    pub cert_status: u32,
    /// Whether the chain ends in a well-known root
    pub is_issued_by_known_root: bool,
    /// Hashes of the public keys in the chain
    pub public_key_hashes: Vec<Vec<u8>>,
}

/// How the handshake was performed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HandshakeType {
    /// Not known
    #[default]
    Unknown,
    /// A full handshake
    Full,
}

/// Summary of the security properties of a session
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SslInfo {
    /// The server certificate
    pub cert: Option<Certificate>,
    /// Certificate status flags
    pub cert_status: u32,
    /// Packed version and cipher suite
    pub connection_status: u32,
    /// Whether the chain ends in a well-known root
    pub is_issued_by_known_root: bool,
    /// Hashes of the public keys in the chain
    pub public_key_hashes: Vec<Vec<u8>>,
    /// Always false for QUIC sessions
    pub client_cert_sent: bool,
    /// Always false for QUIC sessions
    pub channel_id_sent: bool,
    /// Effective key strength
    pub security_bits: u16,
    /// Handshake type
    pub handshake_type: HandshakeType,
}

impl SslInfo {
    /// Derives the TLS summary of a session from its certificate verification result
    #[must_use]
    pub fn from_verify_result(result: &CertVerifyResult) -> Self {
        let connection_status = ((REPORTED_CIPHER_SUITE & SSL_CONNECTION_CIPHERSUITE_MASK)
            << SSL_CONNECTION_CIPHERSUITE_SHIFT)
            | ((SSL_CONNECTION_VERSION_TLS1_2 & SSL_CONNECTION_VERSION_MASK)
                << SSL_CONNECTION_VERSION_SHIFT);
        Self {
            cert: result.verified_cert.clone(),
            cert_status: result.cert_status,
            connection_status,
            is_issued_by_known_root: result.is_issued_by_known_root,
            public_key_hashes: result.public_key_hashes.clone(),
            client_cert_sent: false,
            channel_id_sent: false,
            security_bits: REPORTED_SECURITY_BITS,
            handshake_type: HandshakeType::Full,
        }
    }

    /// The cipher suite packed into [`connection_status`](Self::connection_status)
    #[must_use]
    pub fn cipher_suite(&self) -> u32 {
        (self.connection_status >> SSL_CONNECTION_CIPHERSUITE_SHIFT)
            & SSL_CONNECTION_CIPHERSUITE_MASK
    }

    /// The TLS version packed into [`connection_status`](Self::connection_status)
    #[must_use]
    pub fn version(&self) -> u32 {
        (self.connection_status >> SSL_CONNECTION_VERSION_SHIFT) & SSL_CONNECTION_VERSION_MASK
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::{CertVerifyResult, Certificate, HandshakeType, SSL_CONNECTION_VERSION_TLS1_2, SslInfo};
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn cert(names: &[&str]) -> Certificate {
        Certificate {
            dns_names: names.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    #[rstest]
    #[case("www.example.org", true)]
    #[case("WWW.Example.ORG", true)]
    #[case("mail.example.org", true)]
    #[case("example.org", false)]
    #[case("a.b.example.org", false)]
    #[case("www.example.com", true)]
    #[case("mail.example.com", false)]
    fn name_matching(#[case] host: &str, #[case] expected: bool) {
        let c = cert(&["*.example.org", "www.example.com"]);
        assert_eq!(c.verify_name_match(host), expected);
    }

    #[test]
    fn wildcard_needs_two_labels_after_it() {
        let c = cert(&["*.org"]);
        assert!(!c.verify_name_match("example.org"));
    }

    #[test]
    fn ssl_info_fields() {
        let result = CertVerifyResult {
            verified_cert: Some(cert(&["example.org"])),
            cert_status: 4,
            is_issued_by_known_root: true,
            public_key_hashes: vec![vec![1, 2, 3]],
        };
        let info = SslInfo::from_verify_result(&result);
        assert_eq!(info.cipher_suite(), 0xc02f);
        assert_eq!(info.version(), SSL_CONNECTION_VERSION_TLS1_2);
        assert_eq!(info.security_bits, 256);
        assert_eq!(info.handshake_type, HandshakeType::Full);
        assert_eq!(info.cert_status, 4);
        assert!(info.is_issued_by_known_root);
        assert!(!info.client_cert_sent);
    }
}
