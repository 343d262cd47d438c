//! Deterministic assembly of recognized regions into one label reading.
//!
//! Production-date labels carry a small fixed vocabulary: the label token
//! `生产日期`, a date, a station code, a status keyword. Single-region OCR
//! frequently returns these out of visual reading order, so ordering is
//! semantic first and spatial second: regions sort by the priority class of
//! their text, and regions of equal class fall back to reading order
//! (top-to-bottom, then left-to-right).

use crate::labelocr::result::TextRegion;

/// Priority class of a region's text. Lower sorts first.
fn region_priority(text: &str) -> u8 {
    if text.contains("生产日期") {
        1
    } else if is_date_shaped(text) {
        2
    } else if text.contains("CH") {
        3
    } else if text.contains("合格") {
        4
    } else {
        5
    }
}

/// Whether any whitespace-separated token is three numeric groups joined by
/// `/` or `-`.
fn is_date_shaped(text: &str) -> bool {
    text.split_whitespace().any(|token| {
        ['/', '-'].iter().any(|&separator| {
            let groups: Vec<&str> = token.split(separator).collect();
            groups.len() == 3
                && groups
                    .iter()
                    .all(|group| !group.is_empty() && group.bytes().all(|b| b.is_ascii_digit()))
        })
    })
}

/// Orders recognized regions and folds them into one reading.
///
/// Regions whose text is empty after trimming are not accepted: they appear
/// in neither the combined text, the aggregate confidence, nor the returned
/// region list. The aggregate confidence is the minimum over accepted
/// regions, a pessimistic bound. An empty input yields `("", 0.0, [])`.
pub fn assemble(regions: Vec<TextRegion>) -> (String, f32, Vec<TextRegion>) {
    let mut accepted: Vec<TextRegion> = regions
        .into_iter()
        .filter(|region| !region.text.trim().is_empty())
        .collect();

    if accepted.is_empty() {
        return (String::new(), 0.0, Vec::new());
    }

    // Stable sort: equal-priority regions keep reading order, and exact ties
    // keep input order.
    accepted.sort_by(|a, b| {
        region_priority(&a.text)
            .cmp(&region_priority(&b.text))
            .then_with(|| a.quad.center().y.total_cmp(&b.quad.center().y))
            .then_with(|| a.quad.center().x.total_cmp(&b.quad.center().x))
    });

    let text = accepted
        .iter()
        .map(|region| region.text.trim())
        .collect::<Vec<_>>()
        .join(" ");
    let confidence = accepted
        .iter()
        .map(|region| region.confidence)
        .fold(f32::INFINITY, f32::min);

    (text, confidence, accepted)
}
