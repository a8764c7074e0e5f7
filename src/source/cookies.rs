//! Minimal Netscape cookie-jar file reader, the format yt-dlp and
//! curl's `--cookie-jar` both emit and that Archive.org/YouTube auth
//! cookie exports use. We only need enough of it to build a `Cookie:`
//! header value for the resolver's HTTP requests.

use std::path::Path;

#[derive(Debug, Clone)]
pub struct CookieJar {
    pairs: Vec<(String, String)>,
}

impl CookieJar {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(Self::parse(&raw))
    }

    pub fn parse(raw: &str) -> Self {
        let mut pairs = Vec::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 7 {
                continue;
            }
            let name = fields[5];
            let value = fields[6];
            pairs.push((name.to_string(), value.to_string()));
        }
        Self { pairs }
    }

    /// Render as a single `Cookie:` header value (`name=value; name2=value2`).
    pub fn header_value(&self) -> Option<String> {
        if self.pairs.is_empty() {
            return None;
        }
        Some(
            self.pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "# Netscape HTTP Cookie File\n\
        .archive.org\tTRUE\t/\tTRUE\t1999999999\tlogged-in-user\tperson%40example.com\n\
        .archive.org\tTRUE\t/\tTRUE\t1999999999\tlogged-in-sig\tabc123\n";

    #[test]
    fn parses_netscape_format_and_renders_header() {
        let jar = CookieJar::parse(SAMPLE);
        let header = jar.header_value().unwrap();
        assert!(header.contains("logged-in-user=person%40example.com"));
        assert!(header.contains("logged-in-sig=abc123"));
    }

    #[test]
    fn empty_file_produces_no_header() {
        let jar = CookieJar::parse("# Netscape HTTP Cookie File\n");
        assert!(jar.header_value().is_none());
    }
}
