//! Static HTML index of uploaded recordings (`uploads.html`).
//! Every link points at the CDN copy of the recording or one of its sidecars.

use crate::models::entry::{Entry, SidecarKind};

/// One `<li>` of the index.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexItem {
    pub title: String,
    pub filename: String,
    pub cdn_url: String,
    pub size_gb: f64,
    pub has_mediainfo: bool,
}

impl IndexItem {
    /// `None` for entries that never got a public URL.
    pub fn from_entry(entry: &Entry, has_mediainfo: bool) -> Option<Self> {
        let cdn_url = entry.cdn_url.clone().or_else(|| entry.origin_url.clone())?;
        Some(Self {
            title: entry.title().to_string(),
            filename: entry.filename.clone(),
            cdn_url,
            size_gb: entry.size_gb(),
            has_mediainfo,
        })
    }
}

pub fn render_index(items: &[IndexItem]) -> String {
    let mut html = String::from("<html>\n<meta charset=\"utf-8\">\n<ul>\n");
    for item in items {
        let url = html_escape(&item.cdn_url);
        html.push_str("<li>\n");
        html.push_str(&format!(
            "  <a href=\"{}\">{}</a>:&nbsp;\n",
            url,
            html_escape(&item.title)
        ));
        html.push_str(&format!(
            "  <a href=\"{}{}\">details</a>&nbsp;|&nbsp;\n",
            url,
            SidecarKind::Metadata.suffix()
        ));
        html.push_str(&format!(
            "  <a href=\"{}{}\">log/crc</a>\n",
            url,
            SidecarKind::Log.suffix()
        ));
        if item.has_mediainfo {
            html.push_str(&format!(
                "  &nbsp;|&nbsp;<a href=\"{}{}\">MediaInfo</a>\n",
                url,
                SidecarKind::MediaInfo.suffix()
            ));
        }
        html.push_str(&format!(
            "  Size: {:.2}GB, Filename: {}\n",
            item.size_gb,
            html_escape(&item.filename)
        ));
        html.push_str("</li>\n");
    }
    html.push_str("</ul>\n</html>\n");
    html
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
