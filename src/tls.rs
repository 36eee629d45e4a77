use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use tokio_rustls::rustls::{
    pki_types::{CertificateDer, PrivateKeyDer},
    ServerConfig,
};

use crate::error::{TlsError, TlsResult};

fn load_certs(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|source| TlsError::CertificateLoad {
        path: path.to_path_buf(),
        source,
    })?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::CertificateLoad {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }

    Ok(certs)
}

fn load_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let key_error = |reason: String| TlsError::KeyLoad {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = BufReader::new(File::open(path).map_err(|e| key_error(e.to_string()))?);

    loop {
        match rustls_pemfile::read_one(&mut reader).map_err(|e| key_error(e.to_string()))? {
            Some(rustls_pemfile::Item::Pkcs1Key(key)) => return Ok(PrivateKeyDer::Pkcs1(key)),
            Some(rustls_pemfile::Item::Pkcs8Key(key)) => return Ok(PrivateKeyDer::Pkcs8(key)),
            Some(rustls_pemfile::Item::Sec1Key(key)) => return Ok(PrivateKeyDer::Sec1(key)),
            // Certificates bundled into the key file are skipped.
            Some(_) => {}
            None => {
                return Err(key_error(
                    "Unable to determine key file format (expected PKCS1, PKCS8, or SEC1)"
                        .to_string(),
                ))
            }
        }
    }
}

/// Build a server configuration from a PEM certificate chain and private key.
///
/// # Errors
///
/// Fails if either file cannot be read, contains nothing usable, or the key
/// does not match the certificate.
pub fn load_server_config(
    certificate: impl AsRef<Path>,
    key: impl AsRef<Path>,
) -> TlsResult<Arc<ServerConfig>> {
    let certs = load_certs(certificate.as_ref())?;
    let key = load_key(key.as_ref())?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(Arc::new(config))
}

#[cfg(test)]
mod test {
    use std::io::Write;

    use super::load_server_config;
    use crate::error::TlsError;

    fn write_temp(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_generated_pair() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = write_temp(&certified.cert.pem());
        let key = write_temp(&certified.signing_key.serialize_pem());

        assert!(load_server_config(cert.path(), key.path()).is_ok());
    }

    #[test]
    fn missing_certificate() {
        let err = load_server_config("/nonexistent/cert.pem", "/nonexistent/key.pem").unwrap_err();
        assert!(matches!(err, TlsError::CertificateLoad { .. }));
    }

    #[test]
    fn key_file_without_key() {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let cert = write_temp(&certified.cert.pem());

        let err = load_server_config(cert.path(), cert.path()).unwrap_err();
        assert!(matches!(err, TlsError::KeyLoad { .. }));
    }

    #[test]
    fn empty_certificate_file() {
        let cert = write_temp("");
        let err = load_server_config(cert.path(), cert.path()).unwrap_err();
        assert!(matches!(err, TlsError::NoCertificates(_)));
    }
}
