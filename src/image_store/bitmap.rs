//! Per-image render-state bitmaps ("trimaps").
//!
//! Two variants share one trait so the executor does not need to know which
//! is active — selected once, up front, via [`crate::config::TrimapPolicy`].

use crate::geom::RectI;

/// One pixel's render status within an image's bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelState {
    Unrendered,
    Rendering,
    Rendered,
}

/// Outcome of [`RectBitmap::claim`]: the pixels this call just staked out
/// for rendering, and separately, the pixels some other in-flight render
/// already owns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Claim {
    /// Bounding box of previously-unrendered pixels now marked `Rendering`
    /// by this call. The caller owns these and must eventually
    /// `mark_rendered` or `clear` them.
    pub to_render: Option<RectI>,
    /// Bounding box of pixels another thread is already rendering. The
    /// caller must wait for this region to clear before re-claiming.
    pub wait_for: Option<RectI>,
}

/// Operations the executor needs from a trimap, regardless of backing
/// representation.
pub trait RectBitmap {
    /// Returns the smallest sub-rectangle of `query` that is not fully
    /// rendered, or `None` if `query` is already entirely rendered. Used to
    /// shrink a tile request down to only the pixels actually missing
    /// before dispatching work.
    fn minimal_rect(&self, query: RectI) -> Option<RectI>;

    /// Atomically splits `query` into "mine to render" and "someone else's
    /// in-flight render" — pixels in the former are marked `Rendering` as
    /// part of this call, so two concurrent claims over overlapping regions
    /// never both walk away believing they own the same pixel.
    fn claim(&mut self, query: RectI) -> Claim;

    /// Marks `rect` as currently being rendered by this thread.
    fn mark_rendering(&mut self, rect: RectI);

    /// Marks `rect` as rendered.
    fn mark_rendered(&mut self, rect: RectI);

    /// Resets `rect` back to unrendered, e.g. after a failed render.
    fn clear(&mut self, rect: RectI);

    fn state_at(&self, x: i32, y: i32) -> PixelState;
}

/// Grows `acc` to cover pixel `(x, y)`, treating `None` as an empty box.
fn grow(acc: Option<(i32, i32, i32, i32)>, x: i32, y: i32) -> Option<(i32, i32, i32, i32)> {
    Some(match acc {
        None => (x, y, x + 1, y + 1),
        Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x + 1), y1.max(y + 1)),
    })
}

/// Packed 2-bit-per-pixel trimap: distinguishes "someone else is rendering
/// this region" from "unrendered", letting the executor wait on overlapping
/// in-flight renders instead of redoing them.
#[derive(Clone, Debug)]
pub struct BitmapTrimap {
    bounds: RectI,
    // 2 bits per pixel, packed 4 pixels per byte.
    bits: Vec<u8>,
}

impl BitmapTrimap {
    #[must_use]
    pub fn new(bounds: RectI) -> Self {
        let n = bounds.area().max(0) as usize;
        Self { bounds, bits: vec![0u8; n.div_ceil(4)] }
    }

    fn index(&self, x: i32, y: i32) -> usize {
        let row = (y - self.bounds.y0) as i64;
        let col = (x - self.bounds.x0) as i64;
        (row * i64::from(self.bounds.width()) + col) as usize
    }

    fn get_raw(&self, x: i32, y: i32) -> u8 {
        let i = self.index(x, y);
        (self.bits[i / 4] >> ((i % 4) * 2)) & 0b11
    }

    fn set_raw(&mut self, x: i32, y: i32, value: u8) {
        let i = self.index(x, y);
        let shift = (i % 4) * 2;
        let byte = &mut self.bits[i / 4];
        *byte = (*byte & !(0b11 << shift)) | ((value & 0b11) << shift);
    }

    fn set_rect(&mut self, rect: RectI, value: u8) {
        let r = self.bounds.intersect(&rect);
        for y in r.y0..r.y1 {
            for x in r.x0..r.x1 {
                self.set_raw(x, y, value);
            }
        }
    }
}

const RAW_UNRENDERED: u8 = 0;
const RAW_RENDERING: u8 = 1;
const RAW_RENDERED: u8 = 2;

impl RectBitmap for BitmapTrimap {
    fn minimal_rect(&self, query: RectI) -> Option<RectI> {
        let r = self.bounds.intersect(&query);
        if r.is_null() {
            return None;
        }
        let mut min_x = i32::MAX;
        let mut min_y = i32::MAX;
        let mut max_x = i32::MIN;
        let mut max_y = i32::MIN;
        for y in r.y0..r.y1 {
            for x in r.x0..r.x1 {
                if self.get_raw(x, y) != RAW_RENDERED {
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x + 1);
                    max_y = max_y.max(y + 1);
                }
            }
        }
        if min_x > max_x {
            None
        } else {
            Some(RectI::new(min_x, min_y, max_x, max_y))
        }
    }

    fn claim(&mut self, query: RectI) -> Claim {
        let r = self.bounds.intersect(&query);
        if r.is_null() {
            return Claim::default();
        }
        let mut render_box = None;
        let mut wait_box = None;
        for y in r.y0..r.y1 {
            for x in r.x0..r.x1 {
                match self.get_raw(x, y) {
                    RAW_UNRENDERED => render_box = grow(render_box, x, y),
                    RAW_RENDERING => wait_box = grow(wait_box, x, y),
                    _ => {}
                }
            }
        }
        let to_render = render_box.map(|(x0, y0, x1, y1)| RectI::new(x0, y0, x1, y1));
        if let Some(rect) = to_render {
            self.set_rect(rect, RAW_RENDERING);
        }
        Claim { to_render, wait_for: wait_box.map(|(x0, y0, x1, y1)| RectI::new(x0, y0, x1, y1)) }
    }

    fn mark_rendering(&mut self, rect: RectI) {
        self.set_rect(rect, RAW_RENDERING);
    }

    fn mark_rendered(&mut self, rect: RectI) {
        self.set_rect(rect, RAW_RENDERED);
    }

    fn clear(&mut self, rect: RectI) {
        self.set_rect(rect, RAW_UNRENDERED);
    }

    fn state_at(&self, x: i32, y: i32) -> PixelState {
        match self.get_raw(x, y) {
            RAW_RENDERING => PixelState::Rendering,
            RAW_RENDERED => PixelState::Rendered,
            _ => PixelState::Unrendered,
        }
    }
}

/// Two-state bitmap used when [`crate::config::TrimapPolicy`] disables the
/// "rendering" state, e.g. during interactive abort-heavy scrubbing, where
/// tracking in-flight renders is not worth the bookkeeping.
#[derive(Clone, Debug)]
pub struct PlainBitmap {
    bounds: RectI,
    rendered: Vec<bool>,
}

impl PlainBitmap {
    #[must_use]
    pub fn new(bounds: RectI) -> Self {
        let n = bounds.area().max(0) as usize;
        Self { bounds, rendered: vec![false; n] }
    }

    fn index(&self, x: i32, y: i32) -> usize {
        let row = (y - self.bounds.y0) as i64;
        let col = (x - self.bounds.x0) as i64;
        (row * i64::from(self.bounds.width()) + col) as usize
    }
}

impl RectBitmap for PlainBitmap {
    fn minimal_rect(&self, query: RectI) -> Option<RectI> {
        let r = self.bounds.intersect(&query);
        if r.is_null() {
            return None;
        }
        let all_rendered = (r.y0..r.y1).all(|y| (r.x0..r.x1).all(|x| self.rendered[self.index(x, y)]));
        if all_rendered { None } else { Some(r) }
    }

    fn claim(&mut self, query: RectI) -> Claim {
        // No `Rendering` state to track here, so the caller that observes
        // missing pixels always gets to render them immediately. Racing
        // claims over the same region both proceed — the documented
        // tradeoff of `TrimapPolicy::Plain`.
        Claim { to_render: self.minimal_rect(query), wait_for: None }
    }

    fn mark_rendering(&mut self, _rect: RectI) {}

    fn mark_rendered(&mut self, rect: RectI) {
        let r = self.bounds.intersect(&rect);
        for y in r.y0..r.y1 {
            for x in r.x0..r.x1 {
                let i = self.index(x, y);
                self.rendered[i] = true;
            }
        }
    }

    fn clear(&mut self, rect: RectI) {
        let r = self.bounds.intersect(&rect);
        for y in r.y0..r.y1 {
            for x in r.x0..r.x1 {
                let i = self.index(x, y);
                self.rendered[i] = false;
            }
        }
    }

    fn state_at(&self, x: i32, y: i32) -> PixelState {
        if self.rendered[self.index(x, y)] { PixelState::Rendered } else { PixelState::Unrendered }
    }
}

/// Either trimap representation, selected at image-creation time.
#[derive(Clone, Debug)]
pub enum Trimap {
    Full(BitmapTrimap),
    Plain(PlainBitmap),
}

impl RectBitmap for Trimap {
    fn minimal_rect(&self, query: RectI) -> Option<RectI> {
        match self {
            Trimap::Full(b) => b.minimal_rect(query),
            Trimap::Plain(b) => b.minimal_rect(query),
        }
    }

    fn claim(&mut self, query: RectI) -> Claim {
        match self {
            Trimap::Full(b) => b.claim(query),
            Trimap::Plain(b) => b.claim(query),
        }
    }

    fn mark_rendering(&mut self, rect: RectI) {
        match self {
            Trimap::Full(b) => b.mark_rendering(rect),
            Trimap::Plain(b) => b.mark_rendering(rect),
        }
    }

    fn mark_rendered(&mut self, rect: RectI) {
        match self {
            Trimap::Full(b) => b.mark_rendered(rect),
            Trimap::Plain(b) => b.mark_rendered(rect),
        }
    }

    fn clear(&mut self, rect: RectI) {
        match self {
            Trimap::Full(b) => b.clear(rect),
            Trimap::Plain(b) => b.clear(rect),
        }
    }

    fn state_at(&self, x: i32, y: i32) -> PixelState {
        match self {
            Trimap::Full(b) => b.state_at(x, y),
            Trimap::Plain(b) => b.state_at(x, y),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fully_rendered_region_reports_no_minimal_rect() {
        let mut bm = BitmapTrimap::new(RectI::new(0, 0, 4, 4));
        bm.mark_rendered(RectI::new(0, 0, 4, 4));
        assert_eq!(bm.minimal_rect(RectI::new(0, 0, 4, 4)), None);
    }

    #[test]
    fn partially_rendered_shrinks_to_remaining_pixels() {
        let mut bm = BitmapTrimap::new(RectI::new(0, 0, 4, 4));
        bm.mark_rendered(RectI::new(0, 0, 4, 2));
        let remaining = bm.minimal_rect(RectI::new(0, 0, 4, 4)).unwrap();
        assert_eq!(remaining, RectI::new(0, 2, 4, 4));
    }

    #[test]
    fn rendering_state_is_distinguishable_from_rendered() {
        let mut bm = BitmapTrimap::new(RectI::new(0, 0, 2, 2));
        bm.mark_rendering(RectI::new(0, 0, 1, 1));
        assert_eq!(bm.state_at(0, 0), PixelState::Rendering);
        bm.mark_rendered(RectI::new(0, 0, 1, 1));
        assert_eq!(bm.state_at(0, 0), PixelState::Rendered);
    }

    #[test]
    fn plain_bitmap_has_no_rendering_state() {
        let mut bm = PlainBitmap::new(RectI::new(0, 0, 2, 2));
        bm.mark_rendering(RectI::new(0, 0, 1, 1));
        assert_eq!(bm.state_at(0, 0), PixelState::Unrendered);
        bm.mark_rendered(RectI::new(0, 0, 1, 1));
        assert_eq!(bm.state_at(0, 0), PixelState::Rendered);
    }

    #[test]
    fn claim_on_fresh_region_takes_everything_and_marks_it_rendering() {
        let mut bm = BitmapTrimap::new(RectI::new(0, 0, 4, 4));
        let claim = bm.claim(RectI::new(0, 0, 4, 4));
        assert_eq!(claim.to_render, Some(RectI::new(0, 0, 4, 4)));
        assert_eq!(claim.wait_for, None);
        assert_eq!(bm.state_at(0, 0), PixelState::Rendering);
    }

    #[test]
    fn claim_separates_in_flight_pixels_from_unclaimed_ones() {
        let mut bm = BitmapTrimap::new(RectI::new(0, 0, 4, 4));
        // Simulate another thread's in-flight render over the left half.
        bm.mark_rendering(RectI::new(0, 0, 2, 4));
        let claim = bm.claim(RectI::new(0, 0, 4, 4));
        assert_eq!(claim.to_render, Some(RectI::new(2, 0, 4, 4)));
        assert_eq!(claim.wait_for, Some(RectI::new(0, 0, 2, 4)));
        // The claimed half is now ours, marked Rendering too.
        assert_eq!(bm.state_at(3, 0), PixelState::Rendering);
    }

    #[test]
    fn claim_over_fully_rendered_region_yields_nothing() {
        let mut bm = BitmapTrimap::new(RectI::new(0, 0, 4, 4));
        bm.mark_rendered(RectI::new(0, 0, 4, 4));
        let claim = bm.claim(RectI::new(0, 0, 4, 4));
        assert_eq!(claim, Claim::default());
    }

    #[test]
    fn plain_bitmap_claim_never_reports_a_wait() {
        let mut bm = PlainBitmap::new(RectI::new(0, 0, 2, 2));
        let claim = bm.claim(RectI::new(0, 0, 2, 2));
        assert_eq!(claim.to_render, Some(RectI::new(0, 0, 2, 2)));
        assert_eq!(claim.wait_for, None);
    }
}
