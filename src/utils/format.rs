use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};

/// Characters left untouched when quoting a URL path.
const PATH: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];

/// Format a byte count with binary units, e.g. `1.00 KiB`.
pub fn byteformat(n: u64) -> String {
    let mut exponent = 0;
    let mut scaled = n;
    while scaled >= 1024 && exponent < UNITS.len() - 1 {
        scaled /= 1024;
        exponent += 1;
    }
    let value = n as f64 / 1024f64.powi(exponent as i32);
    format!("{:.2} {}", value, UNITS[exponent])
}

/// Percent-encode a relative or absolute URL path, keeping `/`.
pub fn quote_path(path: &str) -> String {
    utf8_percent_encode(path, PATH).to_string()
}

/// Percent-decode a URL path. Invalid UTF-8 sequences are replaced.
pub fn unquote_path(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byteformat() {
        let cases = [
            (0, "0.00 B"),
            (999, "999.00 B"),
            (1024, "1.00 KiB"),
            (1025, "1.00 KiB"),
            (1024u64.pow(2), "1.00 MiB"),
            (1024u64.pow(3), "1.00 GiB"),
            (1024u64.pow(4), "1.00 TiB"),
            (1024u64.pow(5), "1024.00 TiB"),
        ];
        for (n, expected) in cases {
            assert_eq!(byteformat(n), expected);
        }
    }

    #[test]
    fn test_quote_path() {
        assert_eq!(quote_path("Foo/bar baz.txt"), "Foo/bar%20baz.txt");
        assert_eq!(quote_path("fooö"), "foo%C3%B6");
        assert_eq!(unquote_path("foo%C3%B6/a%20b"), "fooö/a b");
        assert_eq!(unquote_path(&quote_path("x?#%y")), "x?#%y");
    }
}
