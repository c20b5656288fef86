use crate::foundation::core::{Canvas, Point, Rect};

/// Width of the reference design all other measurements are expressed in.
pub const REFERENCE_WIDTH: f64 = 1280.0;

pub const CARD_COUNT: usize = 5;
pub const CARD_WIDTH: f64 = 220.0;
pub const CARD_GAP: f64 = 24.0;
pub const CARD_HEIGHT: f64 = 200.0;
pub const CARD_TOP: f64 = 280.0;
pub const CARD_RADIUS: f64 = 18.0;
pub const CARD_ACCENT_HEIGHT: f64 = 6.0;

pub const AVATAR_DIAMETER: f64 = 112.0;
pub const HEADER_LEFT: f64 = 64.0;
pub const HEADER_TOP: f64 = 72.0;
pub const HEADER_NAME_GAP: f64 = 28.0;

pub const BADGE_WIDTH: f64 = 132.0;
pub const BADGE_HEIGHT: f64 = 46.0;
pub const BADGE_MARGIN: f64 = 48.0;

/// Font sizes in reference pixels.
pub const NAME_SIZE: f64 = 44.0;
pub const VALUE_SIZE: f64 = 50.0;
pub const LABEL_SIZE: f64 = 22.0;
pub const BADGE_TEXT_SIZE: f64 = 24.0;

/// Resolved geometry of every overlay element for one canvas size.
#[derive(Clone, Debug, PartialEq)]
pub struct OverlayLayout {
    pub scale: f64,
    pub canvas: Canvas,
    pub avatar: Rect,
    /// Left edge and vertical centre of the channel name.
    pub name_anchor: Point,
    pub badge: Rect,
    pub cards: [Rect; CARD_COUNT],
}

impl OverlayLayout {
    pub fn new(canvas: Canvas) -> Self {
        let scale = f64::from(canvas.width) / REFERENCE_WIDTH;
        let s = |v: f64| v * scale;

        let avatar = Rect::new(
            s(HEADER_LEFT),
            s(HEADER_TOP),
            s(HEADER_LEFT + AVATAR_DIAMETER),
            s(HEADER_TOP + AVATAR_DIAMETER),
        );
        let name_anchor = Point::new(
            avatar.x1 + s(HEADER_NAME_GAP),
            avatar.y0 + avatar.height() / 2.0,
        );

        let badge_x1 = f64::from(canvas.width) - s(BADGE_MARGIN);
        let badge_cy = avatar.y0 + avatar.height() / 2.0;
        let badge = Rect::new(
            badge_x1 - s(BADGE_WIDTH),
            badge_cy - s(BADGE_HEIGHT) / 2.0,
            badge_x1,
            badge_cy + s(BADGE_HEIGHT) / 2.0,
        );

        Self {
            scale,
            canvas,
            avatar,
            name_anchor,
            badge,
            cards: card_row(f64::from(canvas.width), scale),
        }
    }

    /// Scale a reference measurement to this canvas.
    pub fn px(&self, reference: f64) -> f64 {
        reference * self.scale
    }

    /// Avatar diameter in output pixels, for decoding.
    pub fn avatar_diameter(&self) -> u32 {
        self.avatar.width().round().max(1.0) as u32
    }
}

/// Five fixed-width cards in a horizontally centred row.
pub fn card_row(canvas_width: f64, scale: f64) -> [Rect; CARD_COUNT] {
    let w = CARD_WIDTH * scale;
    let gap = CARD_GAP * scale;
    let total = w * CARD_COUNT as f64 + gap * (CARD_COUNT as f64 - 1.0);
    let x0 = (canvas_width - total) / 2.0;
    let y0 = CARD_TOP * scale;
    let h = CARD_HEIGHT * scale;
    std::array::from_fn(|i| {
        let left = x0 + i as f64 * (w + gap);
        Rect::new(left, y0, left + w, y0 + h)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cards_are_centred_with_fixed_gap() {
        let cards = card_row(1280.0, 1.0);
        let left_margin = cards[0].x0;
        let right_margin = 1280.0 - cards[CARD_COUNT - 1].x1;
        assert!((left_margin - right_margin).abs() < 1e-9);
        assert!((left_margin - 42.0).abs() < 1e-9);
        for pair in cards.windows(2) {
            assert!((pair[1].x0 - pair[0].x1 - CARD_GAP).abs() < 1e-9);
            assert!((pair[0].width() - CARD_WIDTH).abs() < 1e-9);
        }
    }

    #[test]
    fn layout_scales_with_canvas() {
        let small = OverlayLayout::new(Canvas::new(640, 360).unwrap());
        let big = OverlayLayout::new(Canvas::new(1920, 1080).unwrap());
        assert!((small.scale - 0.5).abs() < 1e-9);
        assert_eq!(small.avatar_diameter(), 56);
        assert_eq!(big.avatar_diameter(), 168);
        assert!(big.badge.x1 <= 1920.0);
        assert!(big.cards[4].y1 <= 1080.0);
    }

    #[test]
    fn badge_sits_inside_the_canvas() {
        let l = OverlayLayout::new(Canvas::new(1280, 720).unwrap());
        assert!(l.badge.x0 > l.name_anchor.x);
        assert!(l.badge.y0 >= 0.0);
        assert!((l.badge.x1 - (1280.0 - BADGE_MARGIN)).abs() < 1e-9);
    }
}
