//! Caption resolution from the request host
//!
//! Every label left of the registrable domain becomes one poster line:
//! `xn--` labels are Punycode-decoded, everything is upper-cased and hyphens
//! become spaces. A fixed trailer is always the last line.

use crate::error::PosterError;
use std::fmt;
use tracing::warn;

/// ASCII Compatible Encoding prefix for internationalized labels
const ACE_PREFIX: &str = "xn--";

/// Number of trailing segments treated as domain + TLD
const DOMAIN_SEGMENTS: usize = 2;

/// Lines of text composited onto the poster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    lines: Vec<String>,
}

impl Caption {
    /// Build the caption for `host`, ending with `trailer`.
    ///
    /// Labels with broken Punycode are kept verbatim rather than failing the request.
    pub fn resolve(host: &str, trailer: &str) -> Self {
        let mut lines: Vec<String> = subdomain_labels(host)
            .iter()
            .map(|label| {
                let decoded = decode_label(label).unwrap_or_else(|e| {
                    warn!(label = %label, error = %e, "Falling back to raw label");
                    (*label).to_string()
                });
                normalize_label(&decoded)
            })
            .collect();
        lines.push(trailer.to_string());

        Self { lines }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Newline-joined text handed to the render tool
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }
}

impl fmt::Display for Caption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Segments of `host` left of the domain and TLD, in order
pub fn subdomain_labels(host: &str) -> Vec<&str> {
    let segments: Vec<&str> = host.split('.').collect();
    let keep = segments.len().saturating_sub(DOMAIN_SEGMENTS);
    segments[..keep].to_vec()
}

/// Decode one label, turning `xn--` Punycode back into Unicode
pub fn decode_label(label: &str) -> Result<String, PosterError> {
    match label.strip_prefix(ACE_PREFIX) {
        Some(encoded) => idna::punycode::decode_to_string(encoded).ok_or_else(|| {
            PosterError::Decode {
                label: label.to_string(),
            }
        }),
        None => Ok(label.to_string()),
    }
}

/// Poster styling: upper case, hyphens become spaces
pub fn normalize_label(label: &str) -> String {
    label.to_uppercase().replace('-', " ")
}
