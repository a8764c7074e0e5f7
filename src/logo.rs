//! Shared channel logo resolution rule (§4.8 "Logo resolution rule
//! (shared with M3U)"). Some stored `logo_path` values embed the row's
//! primary key rather than the channel number and are therefore wrong;
//! this validates the embedded number before trusting the path, per the
//! design note in §9.

/// Resolve a channel's logo to an absolute URL the client can fetch.
pub fn resolve_logo_url(base_url: &str, channel_number: &str, logo_path: Option<&str>) -> String {
    let base = base_url.trim_end_matches('/');

    if let Some(path) = logo_path {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if let Some(embedded) = embedded_channel_number(path) {
            if embedded == channel_number {
                return format!("{base}/{}", path.trim_start_matches('/'));
            }
        } else if path.contains("/channel_icons/") || path.starts_with("/static/") {
            return format!("{base}/{}", path.trim_start_matches('/'));
        }
    }

    format!("{base}/static/channel_icons/channel_{channel_number}.png")
}

/// Extract `N` from a `.../channel_<N>.png`-shaped path.
fn embedded_channel_number(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next()?;
    let stem = file_name.strip_prefix("channel_")?;
    let stem = stem.strip_suffix(".png")?;
    if !stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit()) {
        Some(stem)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_url_is_used_verbatim() {
        assert_eq!(
            resolve_logo_url("http://host:8080", "5", Some("https://cdn.example.com/x.png")),
            "https://cdn.example.com/x.png"
        );
    }

    #[test]
    fn matching_embedded_number_is_trusted() {
        assert_eq!(
            resolve_logo_url("http://host:8080", "5", Some("/logos/channel_5.png")),
            "http://host:8080/logos/channel_5.png"
        );
    }

    #[test]
    fn mismatched_embedded_number_falls_back() {
        assert_eq!(
            resolve_logo_url("http://host:8080", "5", Some("/logos/channel_999.png")),
            "http://host:8080/static/channel_icons/channel_5.png"
        );
    }

    #[test]
    fn channel_icons_path_is_trusted_without_number_check() {
        assert_eq!(
            resolve_logo_url("http://host:8080", "5", Some("/media/channel_icons/custom.png")),
            "http://host:8080/media/channel_icons/custom.png"
        );
    }

    #[test]
    fn missing_logo_falls_back_to_default() {
        assert_eq!(
            resolve_logo_url("http://host:8080", "5", None),
            "http://host:8080/static/channel_icons/channel_5.png"
        );
    }
}
