//! Parse HTTP response header lines into HeadResult.

use super::HeadResult;

/// Parse collected header lines into HeadResult. Status lines and blank
/// lines are skipped; unknown headers are ignored.
pub(crate) fn parse_headers(lines: &[String]) -> HeadResult {
    let mut result = HeadResult::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            result.content_length = value.parse::<u64>().ok();
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            result.accept_ranges = value.eq_ignore_ascii_case("bytes");
        } else if name.eq_ignore_ascii_case("etag") {
            result.etag = Some(value.trim_matches('"').to_string());
        } else if name.eq_ignore_ascii_case("last-modified") {
            result.last_modified = Some(value.to_string());
        } else if name.eq_ignore_ascii_case("content-disposition") {
            result.content_disposition = Some(value.to_string());
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn content_length_and_ranges() {
        let r = parse_headers(&lines(&[
            "HTTP/1.1 200 OK",
            "Content-Length: 12345",
            "Accept-Ranges: bytes",
        ]));
        assert_eq!(r.content_length, Some(12345));
        assert!(r.accept_ranges);
        assert!(r.etag.is_none());
    }

    #[test]
    fn missing_or_garbled_length_is_unknown() {
        let r = parse_headers(&lines(&["HTTP/1.1 200 OK", "Transfer-Encoding: chunked"]));
        assert_eq!(r.content_length, None);
        let r = parse_headers(&lines(&["content-length: lots"]));
        assert_eq!(r.content_length, None);
    }

    #[test]
    fn etag_and_last_modified() {
        let r = parse_headers(&lines(&[
            "ETag: \"abc-123\"",
            "Last-Modified: Wed, 21 Oct 2015 07:28:00 GMT",
        ]));
        assert_eq!(r.etag.as_deref(), Some("abc-123"));
        assert_eq!(r.last_modified.as_deref(), Some("Wed, 21 Oct 2015 07:28:00 GMT"));
    }

    #[test]
    fn content_disposition_kept_verbatim() {
        let r = parse_headers(&lines(&["Content-Disposition: attachment; filename=\"report.pdf\""]));
        assert_eq!(
            r.content_disposition.as_deref(),
            Some("attachment; filename=\"report.pdf\"")
        );
    }
}
