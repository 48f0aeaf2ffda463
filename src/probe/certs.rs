//! Certificate chain extraction for TLS probes

use chrono::{DateTime, Utc};
use tokio_rustls::rustls::pki_types::CertificateDer;
use tracing::warn;
use x509_parser::prelude::{FromDer, X509Certificate, X509Name};
use x509_parser::time::ASN1Time;

use crate::CertificateInfo;

/// Convert a peer chain (leaf first) into certificate records
///
/// Certificates that fail to parse are skipped, the rest of the chain is kept.
pub fn chain_info(chain: &[CertificateDer<'_>], now: DateTime<Utc>) -> Vec<CertificateInfo> {
    chain
        .iter()
        .enumerate()
        .filter_map(|(position, der)| match X509Certificate::from_der(der.as_ref()) {
            Ok((_, cert)) => Some(certificate_info(&cert, position == 0, now)),
            Err(e) => {
                warn!("skipping unparsable certificate at chain position {position}: {e}");
                None
            }
        })
        .collect()
}

fn certificate_info(cert: &X509Certificate<'_>, primary: bool, now: DateTime<Utc>) -> CertificateInfo {
    let validity = cert.validity();
    let valid_from = asn1_to_utc(&validity.not_before);
    let valid_until = asn1_to_utc(&validity.not_after);

    CertificateInfo {
        primary,
        valid_from,
        valid_until,
        issuer: common_name(cert.issuer()),
        subject: common_name(cert.subject()),
        expired: now > valid_until,
    }
}

fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn asn1_to_utc(time: &ASN1Time) -> DateTime<Utc> {
    DateTime::from_timestamp(time.timestamp(), 0).unwrap_or_default()
}
