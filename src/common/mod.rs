//! Common utilities shared by the library and the CLI

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Parse a `file:line` location (1-based line)
///
/// The last `:` followed only by digits separates the line, so Windows paths
/// like `C:\src\app.py:10` keep their drive letter.
pub fn parse_file_line(s: &str) -> Result<(String, u32)> {
    if let Some(colon_idx) = s.rfind(':') {
        let (file_part, line_part) = s.split_at(colon_idx);
        let line_str = &line_part[1..];
        if !file_part.is_empty()
            && !line_str.is_empty()
            && line_str.chars().all(|c| c.is_ascii_digit())
        {
            let line: u32 = line_str
                .parse()
                .map_err(|_| Error::InvalidLocation(format!("invalid line number: {}", line_str)))?;
            if line == 0 {
                return Err(Error::InvalidLocation(format!("{}: lines start at 1", s)));
            }
            return Ok((file_part.to_string(), line));
        }
    }
    Err(Error::InvalidLocation(format!("expected file:line, got '{}'", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_file_line() {
        assert_eq!(
            parse_file_line("app/main.py:42").unwrap(),
            ("app/main.py".to_string(), 42)
        );
    }

    #[test]
    fn test_parse_windows_path() {
        assert_eq!(
            parse_file_line(r"C:\proj\main.py:7").unwrap(),
            (r"C:\proj\main.py".to_string(), 7)
        );
    }

    #[test]
    fn test_rejects_missing_or_zero_line() {
        assert!(parse_file_line("main.py").is_err());
        assert!(parse_file_line("main.py:").is_err());
        assert!(parse_file_line("main.py:0").is_err());
        assert!(parse_file_line(":3").is_err());
    }
}
