//! Text support for rendered maps.
//!
//! plotters draws text through ab_glyph, which only knows fonts registered
//! at runtime. DejaVu Sans ships in `assets/` and is registered once as
//! "sans-serif".

use plotters::style::{register_font, FontStyle};
use std::sync::OnceLock;

/// Font family name every map label uses.
pub const FONT_FAMILY: &str = "sans-serif";

static DEJAVU_SANS: &[u8] = include_bytes!("../../assets/DejaVuSans.ttf");
static REGISTERED: OnceLock<bool> = OnceLock::new();

/// Registers the embedded font with plotters. Returns false if it could not
/// be parsed, in which case text drawing fails and callers skip labels.
pub fn ensure_registered() -> bool {
    *REGISTERED.get_or_init(|| {
        let ok = register_font(FONT_FAMILY, FontStyle::Normal, DEJAVU_SANS).is_ok();
        if !ok {
            crate::log("Failed to register embedded map font; labels disabled");
        }
        ok
    })
}
