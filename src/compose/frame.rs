use crate::{
    animator::CounterKey,
    compose::{
        format::format_count,
        layout::{self, OverlayLayout},
        paint::{
            affine_to_cpu, circle_path, color, fill_layout, premul_bytes_to_image,
            prepared_to_image, rect_to_cpu, rounded_rect_path, vertical_gradient_bytes,
        },
        text::{TextBrushRgba8, TextLayoutEngine},
    },
    foundation::core::{Affine, Canvas, FrameRGBA, Rect, Rgba8},
    overlay::OverlayState,
};

/// Phase increment per composed frame; pulse speed follows the render rate.
pub const PULSE_STEP: f64 = 0.12;
/// Peak relative growth of the LIVE badge.
pub const PULSE_AMPLITUDE: f64 = 0.06;

pub const BACKGROUND_TOP: Rgba8 = Rgba8::rgb(15, 12, 41);
pub const BACKGROUND_BOTTOM: Rgba8 = Rgba8::rgb(48, 43, 99);
const BADGE_COLOR: Rgba8 = Rgba8::rgb(230, 33, 23);
const CARD_COLOR: Rgba8 = Rgba8::rgba(255, 255, 255, 22);
const PLACEHOLDER_COLOR: Rgba8 = Rgba8::rgba(255, 255, 255, 40);
const WHITE: Rgba8 = Rgba8::rgb(255, 255, 255);
const LABEL_COLOR: Rgba8 = Rgba8::rgb(184, 184, 204);

/// Label and accent color of the card showing `key`.
pub fn card_style(key: CounterKey) -> (&'static str, Rgba8) {
    match key {
        CounterKey::Subscribers => ("Subscribers", Rgba8::rgb(255, 78, 69)),
        CounterKey::TotalViews => ("Total Views", Rgba8::rgb(62, 166, 255)),
        CounterKey::Videos => ("Videos", Rgba8::rgb(46, 204, 113)),
        CounterKey::LiveViewers => ("Watching Now", Rgba8::rgb(241, 196, 15)),
        CounterKey::Likes => ("Likes", Rgba8::rgb(224, 86, 253)),
    }
}

fn brush(c: Rgba8) -> TextBrushRgba8 {
    TextBrushRgba8 {
        r: c.r,
        g: c.g,
        b: c.b,
        a: c.a,
    }
}

/// Renders overlay frames from [`OverlayState`].
///
/// Composition never fails: anything that cannot be drawn (no font, a broken avatar) is left
/// out of the frame and logged once.
pub struct FrameComposer {
    layout: OverlayLayout,
    text: Option<TextLayoutEngine>,
    background: Option<vello_cpu::Image>,
    avatar: Option<vello_cpu::Image>,
    phase: f64,
    pixmap: vello_cpu::Pixmap,
    warned_text: bool,
}

impl FrameComposer {
    /// `canvas` must come from [`Canvas::new`], which bounds it to `u16`.
    pub fn new(canvas: Canvas, text: Option<TextLayoutEngine>) -> Self {
        let layout = OverlayLayout::new(canvas);
        let background = premul_bytes_to_image(
            &vertical_gradient_bytes(BACKGROUND_TOP, BACKGROUND_BOTTOM, canvas.width, canvas.height),
            canvas.width,
            canvas.height,
        )
        .map_err(|e| tracing::warn!(error = %e, "background gradient unavailable"))
        .ok();

        Self {
            layout,
            text,
            background,
            avatar: None,
            phase: 0.0,
            pixmap: vello_cpu::Pixmap::new(canvas.width as u16, canvas.height as u16),
            warned_text: false,
        }
    }

    pub fn layout(&self) -> &OverlayLayout {
        &self.layout
    }

    pub fn canvas(&self) -> Canvas {
        self.layout.canvas
    }

    /// Current badge pulse phase in radians.
    pub fn phase(&self) -> f64 {
        self.phase
    }

    /// Scale factor the LIVE badge is drawn at for the current phase.
    pub fn badge_scale(&self) -> f64 {
        1.0 + PULSE_AMPLITUDE * self.phase.sin()
    }

    /// Render one frame and advance the pulse phase.
    pub fn compose(&mut self, state: &OverlayState) -> FrameRGBA {
        let canvas = self.layout.canvas;
        let (w, h) = (canvas.width as u16, canvas.height as u16);
        let mut ctx = vello_cpu::RenderContext::new(w, h);

        self.draw_background(&mut ctx);
        self.draw_header(&mut ctx, state);
        self.draw_badge(&mut ctx);
        self.draw_cards(&mut ctx, state);

        ctx.flush();
        clear_pixmap(&mut self.pixmap);
        ctx.render_to_pixmap(&mut self.pixmap);
        self.phase = (self.phase + PULSE_STEP) % std::f64::consts::TAU;

        FrameRGBA {
            width: canvas.width,
            height: canvas.height,
            data: self.pixmap.data_as_u8_slice().to_vec(),
            premultiplied: true,
        }
    }

    fn draw_background(&self, ctx: &mut vello_cpu::RenderContext) {
        let full = Rect::new(
            0.0,
            0.0,
            f64::from(self.layout.canvas.width),
            f64::from(self.layout.canvas.height),
        );
        ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
        ctx.set_paint_transform(vello_cpu::kurbo::Affine::IDENTITY);
        match &self.background {
            Some(img) => ctx.set_paint(img.clone()),
            None => ctx.set_paint(color(BACKGROUND_TOP)),
        }
        ctx.fill_rect(&rect_to_cpu(full));
    }

    fn draw_header(&mut self, ctx: &mut vello_cpu::RenderContext, state: &OverlayState) {
        let avatar_rect = self.layout.avatar;
        self.sync_avatar(state);

        ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
        match &self.avatar {
            Some(img) => {
                ctx.set_transform(affine_to_cpu(Affine::translate((
                    avatar_rect.x0,
                    avatar_rect.y0,
                ))));
                ctx.set_paint(img.clone());
                ctx.fill_rect(&vello_cpu::kurbo::Rect::new(
                    0.0,
                    0.0,
                    avatar_rect.width(),
                    avatar_rect.height(),
                ));
            }
            None => {
                let c = avatar_rect.center();
                ctx.set_paint(color(PLACEHOLDER_COLOR));
                ctx.fill_path(&circle_path(c.x, c.y, avatar_rect.width() / 2.0));
            }
        }

        let anchor = self.layout.name_anchor;
        let size = self.layout.px(layout::NAME_SIZE) as f32;
        if let Some((layout, font)) = self.shape(&state.profile.name, size, WHITE) {
            let y = anchor.y - f64::from(layout.height()) / 2.0;
            ctx.set_transform(affine_to_cpu(Affine::translate((anchor.x, y))));
            fill_layout(ctx, &font, &layout);
        }
    }

    fn draw_badge(&mut self, ctx: &mut vello_cpu::RenderContext) {
        let badge = self.layout.badge;
        let c = badge.center();
        let pulse = Affine::translate((c.x, c.y))
            * Affine::scale(self.badge_scale())
            * Affine::translate((-c.x, -c.y));

        ctx.set_transform(affine_to_cpu(pulse));
        ctx.set_paint(color(BADGE_COLOR));
        ctx.fill_path(&rounded_rect_path(badge, badge.height() / 2.0));

        let dot_r = self.layout.px(6.0);
        let dot_cx = badge.x0 + self.layout.px(24.0);
        ctx.set_paint(color(WHITE));
        ctx.fill_path(&circle_path(dot_cx, c.y, dot_r));

        let size = self.layout.px(layout::BADGE_TEXT_SIZE) as f32;
        if let Some((layout, font)) = self.shape("LIVE", size, WHITE) {
            let text_left = dot_cx + dot_r + self.layout.px(10.0);
            let y = c.y - f64::from(layout.height()) / 2.0;
            ctx.set_transform(affine_to_cpu(pulse * Affine::translate((text_left, y))));
            fill_layout(ctx, &font, &layout);
        }
    }

    fn draw_cards(&mut self, ctx: &mut vello_cpu::RenderContext, state: &OverlayState) {
        let radius = self.layout.px(layout::CARD_RADIUS);
        let accent_h = self.layout.px(layout::CARD_ACCENT_HEIGHT);
        let value_size = self.layout.px(layout::VALUE_SIZE) as f32;
        let label_size = self.layout.px(layout::LABEL_SIZE) as f32;

        for (key, card) in CounterKey::ALL.into_iter().zip(self.layout.cards) {
            let (label, accent) = card_style(key);

            ctx.set_transform(vello_cpu::kurbo::Affine::IDENTITY);
            ctx.set_paint(color(CARD_COLOR));
            ctx.fill_path(&rounded_rect_path(card, radius));

            let bar = Rect::new(card.x0 + radius, card.y0, card.x1 - radius, card.y0 + accent_h);
            ctx.set_paint(color(accent));
            ctx.fill_path(&rounded_rect_path(bar, accent_h / 2.0));

            let value = format_count(state.counters.displayed(key));
            let cx = card.x0 + card.width() / 2.0;
            if let Some((layout, font)) = self.shape(&value, value_size, WHITE) {
                let x = cx - f64::from(layout.width()) / 2.0;
                let y = card.y0 + card.height() * 0.42 - f64::from(layout.height()) / 2.0;
                ctx.set_transform(affine_to_cpu(Affine::translate((x, y))));
                fill_layout(ctx, &font, &layout);
            }
            if let Some((layout, font)) = self.shape(label, label_size, LABEL_COLOR) {
                let x = cx - f64::from(layout.width()) / 2.0;
                let y = card.y0 + card.height() * 0.74 - f64::from(layout.height()) / 2.0;
                ctx.set_transform(affine_to_cpu(Affine::translate((x, y))));
                fill_layout(ctx, &font, &layout);
            }
        }
    }

    fn shape(
        &mut self,
        text: &str,
        size_px: f32,
        fill: Rgba8,
    ) -> Option<(parley::Layout<TextBrushRgba8>, vello_cpu::peniko::FontData)> {
        if text.is_empty() {
            return None;
        }
        let engine = self.text.as_mut()?;
        match engine.layout_line(text, size_px, brush(fill)) {
            Ok(layout) => Some((layout, engine.font().clone())),
            Err(e) => {
                if !self.warned_text {
                    tracing::warn!(error = %e, "text shaping failed; drawing frame without it");
                    self.warned_text = true;
                }
                None
            }
        }
    }

    fn sync_avatar(&mut self, state: &OverlayState) {
        if self.avatar.is_some() {
            return;
        }
        let Some(prepared) = state.profile.avatar.as_ref() else {
            return;
        };
        match prepared_to_image(prepared) {
            Ok(img) => self.avatar = Some(img),
            Err(e) => tracing::warn!(error = %e, "cached avatar could not be converted"),
        }
    }
}

fn clear_pixmap(pixmap: &mut vello_cpu::Pixmap) {
    pixmap.data_as_u8_slice_mut().fill(0);
}
