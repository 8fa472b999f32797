//! Postal address parts.

use super::patterns::{COUNTRY, IDENTIFIER_LINE, POSTAL_CITY, STREET, STREET_NO_NUMBER};
use super::{lines_with_offsets, ExtractionMatch};

/// Address parts found in a text region.
#[derive(Debug, Clone, Default)]
pub struct AddressParts {
    pub street: Option<ExtractionMatch<String>>,
    pub postal_code: Option<ExtractionMatch<String>>,
    pub city: Option<ExtractionMatch<String>>,
    pub country: Option<ExtractionMatch<String>>,
}

impl AddressParts {
    pub fn is_empty(&self) -> bool {
        self.street.is_none() && self.postal_code.is_none() && self.city.is_none() && self.country.is_none()
    }
}

/// Reads the first street, postal code/city and country in a region.
pub struct AddressExtractor;

impl AddressExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, text: &str) -> AddressParts {
        let mut parts = AddressParts::default();

        for (line_start, line) in lines_with_offsets(text) {
            // Registration and contact lines mention cities too ("RCS Paris")
            if IDENTIFIER_LINE.is_match(line) {
                continue;
            }

            for segment_start in segment_starts(line) {
                let segment = segment_at(line, segment_start);
                let base = line_start + segment_start;
                self.scan_segment(segment, base, &mut parts);
            }
        }

        parts
    }

    fn scan_segment(&self, segment: &str, base: usize, parts: &mut AddressParts) {
        let postal = POSTAL_CITY.captures(segment);

        if parts.street.is_none() {
            let street = STREET
                .captures(segment)
                .or_else(|| STREET_NO_NUMBER.captures(segment))
                .and_then(|caps| caps.get(1));
            if let Some(m) = street {
                // "12 rue de la Paix, 75002 Paris" keeps only the street part
                let end = match postal.as_ref().and_then(|c| c.get(0)) {
                    Some(p) if p.start() > m.start() && p.start() < m.end() => p.start(),
                    _ => m.end(),
                };
                let value = segment[m.start()..end].trim_end_matches([',', ' ', '-']).trim();
                if !value.is_empty() {
                    let value_end = m.start() + value.len();
                    parts.street = Some(
                        ExtractionMatch::new(value.to_string(), 0.85, value)
                            .with_position(base + m.start(), base + value_end),
                    );
                }
            }
        }

        if parts.postal_code.is_none() {
            if let Some(caps) = &postal {
                if let (Some(code), Some(city)) = (caps.get(1), caps.get(2)) {
                    parts.postal_code = Some(
                        ExtractionMatch::new(code.as_str().to_string(), 0.85, code.as_str())
                            .with_position(base + code.start(), base + code.end()),
                    );

                    let city_text = strip_country(city.as_str());
                    parts.city = Some(
                        ExtractionMatch::new(city_text.to_string(), 0.85, city_text)
                            .with_position(base + city.start(), base + city.start() + city_text.len()),
                    );
                }
            }
        }

        if parts.country.is_none() {
            if let Some(m) = COUNTRY.find(segment) {
                parts.country = Some(
                    ExtractionMatch::new(canonical_country(m.as_str()), 0.85, m.as_str())
                        .with_position(base + m.start(), base + m.end()),
                );
            }
        }
    }
}

impl Default for AddressExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offsets of the tab-separated segments of a line.
fn segment_starts(line: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(line.match_indices('\t').map(|(i, _)| i + 1))
        .collect()
}

fn segment_at(line: &str, start: usize) -> &str {
    let rest = &line[start..];
    rest.split('\t').next().unwrap_or(rest)
}

fn strip_country(city: &str) -> &str {
    match COUNTRY.find(city) {
        Some(m) if m.start() > 0 => city[..m.start()].trim_end_matches([' ', ',', '-']),
        _ => city,
    }
}

fn canonical_country(name: &str) -> String {
    match name.to_lowercase().as_str() {
        "suisse" | "switzerland" => "Suisse".to_string(),
        "belgium" | "belgique" => "Belgique".to_string(),
        "germany" | "allemagne" => "Allemagne".to_string(),
        "spain" | "espagne" => "Espagne".to_string(),
        "italy" | "italie" => "Italie".to_string(),
        "royaume-uni" => "Royaume-Uni".to_string(),
        "france" => "France".to_string(),
        _ => name.to_string(),
    }
}
