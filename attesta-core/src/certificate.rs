//! Certificate chain validation and PEM trust anchor loading

use std::path::Path;

use openssl::nid::Nid;
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::verify::X509VerifyFlags;
use openssl::x509::{X509StoreContext, X509VerifyResult, X509};

use crate::error::{Fido2Error, Result};

/// Validates a certificate chain against a set of trust anchors.
pub trait CertificateValidator: Send + Sync {
    /// `chain[0]` is the leaf. Returns the validated leaf.
    fn verify(&self, chain: &[X509], anchors: &[X509]) -> Result<X509>;
}

/// openssl-backed chain validation.
///
/// Anchors may be intermediates, so partial chains are accepted as long as
/// they terminate in one of the anchors.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpensslCertificateValidator;

impl CertificateValidator for OpensslCertificateValidator {
    fn verify(&self, chain: &[X509], anchors: &[X509]) -> Result<X509> {
        let leaf = chain
            .first()
            .ok_or_else(|| Fido2Error::trust("empty certificate chain"))?;
        if anchors.is_empty() {
            return Err(Fido2Error::trust("no trust anchors to validate against"));
        }

        let mut store = X509StoreBuilder::new()?;
        for anchor in anchors {
            store.add_cert(anchor.clone())?;
        }
        store.set_flags(X509VerifyFlags::PARTIAL_CHAIN)?;
        let store = store.build();

        let mut intermediates = Stack::new()?;
        for cert in &chain[1..] {
            intermediates.push(cert.clone())?;
        }

        let mut ctx = X509StoreContext::new()?;
        let result = ctx.init(&store, leaf, &intermediates, |ctx| {
            ctx.verify_cert()?;
            Ok(ctx.error())
        })?;

        if result != X509VerifyResult::OK {
            tracing::debug!(
                subject = ?leaf.subject_name(),
                error = %result,
                "Certificate chain rejected"
            );
            return Err(Fido2Error::trust(format!(
                "certificate chain not trusted: {result}"
            )));
        }
        Ok(leaf.clone())
    }
}

/// Decode a DER certificate list (`x5c`).
pub fn parse_der_chain(chain: &[Vec<u8>]) -> Result<Vec<X509>> {
    chain
        .iter()
        .map(|der| {
            X509::from_der(der)
                .map_err(|e| Fido2Error::trust(format!("invalid certificate in chain: {e}")))
        })
        .collect()
}

/// Load every PEM certificate found in the files of `folder`.
///
/// A missing folder yields no anchors. Unreadable files are skipped with a
/// warning.
pub fn load_pem_folder(folder: &Path) -> Vec<X509> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!(folder = %folder.display(), error = %e, "Certificate folder not readable");
            return Vec::new();
        }
    };

    let mut certs = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match std::fs::read(&path).map_err(|e| e.to_string()).and_then(|pem| {
            X509::stack_from_pem(&pem).map_err(|e| e.to_string())
        }) {
            Ok(found) => certs.extend(found),
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable certificate file")
            }
        }
    }
    tracing::debug!(folder = %folder.display(), count = certs.len(), "Loaded certificates");
    certs
}

/// Subject common name, if any.
pub fn common_name(cert: &X509) -> Option<String> {
    cert.subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().to_string().ok())
}

/// Raw value of the extension with the given dotted OID.
pub fn extension_value(cert: &X509, oid: &str) -> Result<Option<Vec<u8>>> {
    let der = cert.to_der()?;
    let (_, parsed) = x509_parser::parse_x509_certificate(&der)
        .map_err(|e| Fido2Error::trust(format!("unable to parse certificate: {e}")))?;

    Ok(parsed
        .extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == oid)
        .map(|ext| ext.value.to_vec()))
}
