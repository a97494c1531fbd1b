//! Hand-rolled `multipart/related` body construction for STOW-RS requests.
//!
//! `reqwest`'s `multipart::Form` targets the `multipart/form-data` convention
//! (named fields), not the single-part `multipart/related` envelope STOW-RS
//! requires with a precise `Content-Disposition: attachment` header, so the
//! body is assembled by hand instead.

use ulid::Ulid;

/// A STOW-RS `multipart/related` request body: the boundary token used to
/// delimit it, and the bytes to POST.
pub struct StowBody {
    pub boundary: String,
    pub bytes: Vec<u8>,
}

/// The `Content-Type` header value to send alongside a [StowBody].
pub fn content_type_header(boundary: &str) -> String {
    format!(r#"multipart/related; type="application/dicom"; boundary={boundary}"#)
}

/// Wrap a single DICOM instance's bytes in a `multipart/related` envelope
/// with a freshly generated, per-request boundary.
pub fn wrap_dicom_instance(filename: &str, dicom_bytes: &[u8]) -> StowBody {
    let boundary = format!("stowrs-{}", Ulid::new());

    let mut body = Vec::with_capacity(dicom_bytes.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Type: application/dicom\r\n");
    body.extend_from_slice(
        format!("Content-Disposition: attachment; filename=\"{filename}\"\r\n").as_bytes(),
    );
    body.extend_from_slice(b"\r\n");
    body.extend_from_slice(dicom_bytes);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    StowBody {
        boundary,
        bytes: body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_includes_required_headers_and_payload() {
        let payload = b"not-really-dicom-bytes";
        let stow = wrap_dicom_instance("img.dcm", payload);
        let text = String::from_utf8_lossy(&stow.bytes);

        assert!(text.starts_with(&format!("--{}\r\n", stow.boundary)));
        assert!(text.contains("Content-Type: application/dicom\r\n"));
        assert!(text.contains("Content-Disposition: attachment; filename=\"img.dcm\"\r\n"));
        assert!(text.ends_with(&format!("--{}--\r\n", stow.boundary)));
        assert!(stow
            .bytes
            .windows(payload.len())
            .any(|window| window == payload));
    }

    #[test]
    fn test_boundary_is_unique_per_call() {
        let a = wrap_dicom_instance("a.dcm", b"x");
        let b = wrap_dicom_instance("b.dcm", b"x");
        assert_ne!(a.boundary, b.boundary);
    }

    #[test]
    fn test_content_type_header_embeds_boundary() {
        let header = content_type_header("abc123");
        assert_eq!(
            header,
            r#"multipart/related; type="application/dicom"; boundary=abc123"#
        );
    }
}
