//! Content-type header parsing and body dispatch.

use super::DecodeError;
use super::attrs::{attr, parse_attr_list};

/// A parsed content-type value: primary type, sub type, and parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentType {
    pub primary: String,
    pub sub: String,
    pub params: Vec<(String, String)>,
}

impl ContentType {
    /// Parse a content-type header value.
    ///
    /// A declared `charset` parameter must be exactly `utf-8`
    /// (case-insensitive); anything else is a decode failure.
    pub fn parse(value: &str) -> Result<Self, DecodeError> {
        let mut segments = value.split(';');
        let mime = segments.next().unwrap_or("").trim();

        let Some((primary, sub)) = mime.split_once('/') else {
            return Err(DecodeError::BadContentType(value.to_string()));
        };
        let (primary, sub) = (primary.trim(), sub.trim());
        if primary.is_empty() || sub.is_empty() {
            return Err(DecodeError::BadContentType(value.to_string()));
        }

        let rest = segments.collect::<Vec<_>>().join(";");
        let params = parse_attr_list(&rest);

        if let Some(charset) = attr(&params, "charset")
            && !charset.eq_ignore_ascii_case("utf-8")
        {
            return Err(DecodeError::UnsupportedCharset(charset.to_string()));
        }

        Ok(Self {
            primary: primary.to_ascii_lowercase(),
            sub: sub.to_ascii_lowercase(),
            params,
        })
    }

    /// The boundary parameter, when present.
    pub fn boundary(&self) -> Option<&str> {
        attr(&self.params, "boundary").filter(|b| !b.is_empty())
    }

    fn matches(&self, primary: &str, sub: &str) -> bool {
        self.primary == primary && self.sub == sub
    }
}

/// How the body of a write-class request is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyKind {
    FormUrlencoded,
    Json,
    Multipart { boundary: String },
    /// text/plain and text/xml: the raw body is captured as a string.
    Plain,
}

/// Map a parsed content type onto a body decoding strategy.
///
/// Matching is exact, case-insensitive primary/sub equality; anything
/// outside the table is a decode failure.
pub fn classify(ct: &ContentType) -> Result<BodyKind, DecodeError> {
    if ct.matches("application", "x-www-form-urlencoded") {
        Ok(BodyKind::FormUrlencoded)
    } else if ct.matches("application", "json") {
        Ok(BodyKind::Json)
    } else if ct.matches("multipart", "form-data") {
        let boundary = ct.boundary().ok_or(DecodeError::MissingBoundary)?;
        Ok(BodyKind::Multipart {
            boundary: boundary.to_string(),
        })
    } else if ct.matches("text", "plain") || ct.matches("text", "xml") {
        Ok(BodyKind::Plain)
    } else {
        Err(DecodeError::UnsupportedContentType(format!(
            "{}/{}",
            ct.primary, ct.sub
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_mime() {
        let ct = ContentType::parse("application/json").unwrap();
        assert_eq!(ct.primary, "application");
        assert_eq!(ct.sub, "json");
        assert!(ct.params.is_empty());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let ct = ContentType::parse("Application/JSON").unwrap();
        assert_eq!(classify(&ct).unwrap(), BodyKind::Json);
    }

    #[test]
    fn test_parse_boundary_param() {
        let ct =
            ContentType::parse("multipart/form-data; boundary=----abc123").unwrap();
        assert_eq!(ct.boundary(), Some("----abc123"));
        assert_eq!(
            classify(&ct).unwrap(),
            BodyKind::Multipart {
                boundary: "----abc123".to_string()
            }
        );
    }

    #[test]
    fn test_multipart_without_boundary_fails() {
        let ct = ContentType::parse("multipart/form-data").unwrap();
        assert!(matches!(
            classify(&ct),
            Err(DecodeError::MissingBoundary)
        ));
    }

    #[test]
    fn test_charset_utf8_accepted() {
        let ct = ContentType::parse("text/plain; charset=UTF-8").unwrap();
        assert_eq!(classify(&ct).unwrap(), BodyKind::Plain);
    }

    #[test]
    fn test_charset_other_rejected() {
        let err = ContentType::parse("text/plain; charset=latin-1").unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedCharset(_)));
    }

    #[test]
    fn test_unsupported_subtype_is_exact_match_failure() {
        // application/xml is outside the dispatch table; the historical
        // substring shortcut must not let it through.
        let ct = ContentType::parse("application/xml").unwrap();
        assert!(matches!(
            classify(&ct),
            Err(DecodeError::UnsupportedContentType(_))
        ));

        let ct = ContentType::parse("multipart/mixed; boundary=x").unwrap();
        assert!(matches!(
            classify(&ct),
            Err(DecodeError::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn test_text_xml_treated_as_plain_capture() {
        let ct = ContentType::parse("text/xml").unwrap();
        assert_eq!(classify(&ct).unwrap(), BodyKind::Plain);
    }

    #[test]
    fn test_missing_slash_is_bad() {
        assert!(matches!(
            ContentType::parse("textplain"),
            Err(DecodeError::BadContentType(_))
        ));
        assert!(matches!(
            ContentType::parse(""),
            Err(DecodeError::BadContentType(_))
        ));
    }
}
