//! Field extraction from a navigated product page.

use rust_decimal::Decimal;
use url::Url;

use crate::error::AppError;
use crate::models::{ExtractedProduct, ExtractionQuality, ScrapingProfile, UNKNOWN_NAME};
use crate::traits::PageSession;

/// Read name, price and image from an already-navigated page.
///
/// Missing fields fall back to their defaults ("Unknown", `0.00`, no image)
/// and are flagged in [`ExtractionQuality`] rather than failing the scrape.
pub async fn extract_fields<P: PageSession>(
    page: &mut P,
    profile: &ScrapingProfile,
) -> Result<ExtractedProduct, AppError> {
    let mut quality = ExtractionQuality::default();

    let name = match page.visible_text(&profile.name_selector).await? {
        Some(text) if !text.trim().is_empty() => normalize_whitespace(&text),
        _ => {
            quality.name_missing = true;
            UNKNOWN_NAME.to_string()
        }
    };

    let price = match page.visible_text(&profile.price_selector).await? {
        Some(text) => match parse_price(&text) {
            Some(price) => price,
            None => {
                tracing::debug!(raw = %text, "Price text has no parsable number");
                quality.price_fallback = true;
                Decimal::ZERO
            }
        },
        None => {
            quality.price_fallback = true;
            Decimal::ZERO
        }
    };

    let image_url = match &profile.image_selector {
        Some(selector) => page
            .visible_attribute(selector, "src")
            .await?
            .and_then(|src| resolve_url(&profile.base_url, &src)),
        None => None,
    };

    Ok(ExtractedProduct {
        name,
        price,
        image_url,
        quality,
    })
}

/// Parse a displayed price such as `"$1,234.56"` or `"12,99 €"`.
///
/// Commas become periods, everything except digits and periods is dropped,
/// and when several periods remain only the last one is kept as the decimal
/// point. Returns `None` when no number is left.
pub fn parse_price(text: &str) -> Option<Decimal> {
    let cleaned: String = text
        .replace(',', ".")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let normalized = match cleaned.rfind('.') {
        Some(last) => {
            let (int_part, frac_part) = cleaned.split_at(last);
            format!("{}{}", int_part.replace('.', ""), frac_part)
        }
        None => cleaned,
    };

    if !normalized.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    normalized
        .parse::<Decimal>()
        .ok()
        .map(|price| price.round_dp(2))
}

/// [`parse_price`] with the `0.00` fallback applied.
pub fn parse_price_or_zero(text: &str) -> Decimal {
    parse_price(text).unwrap_or(Decimal::ZERO)
}

/// Resolve a possibly-relative link against the retailer base URL.
///
/// Fragments are dropped; only http(s) targets are returned.
pub fn resolve_url(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let mut resolved = base.join(href).ok()?;
    if !matches!(resolved.scheme(), "http" | "https") {
        return None;
    }
    resolved.set_fragment(None);
    Some(resolved.into())
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
