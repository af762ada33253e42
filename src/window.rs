//! Windowed rendering for long uniform-height lists.
//!
//! `compute_window` maps scroll geometry to the slice of items that has to be
//! mounted. The slice always covers the on-screen viewport plus `overscan`
//! items on each side, and is clamped so that
//! `0 <= start_index <= end_index <= item_count`.

use std::ops::Range;

use serde::Serialize;

pub const DEFAULT_OVERSCAN: usize = 3;
pub const DEFAULT_END_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowState {
    pub start_index: usize,
    pub end_index: usize,
    pub offset_pixels: f64,
    pub total_pixels: f64,
}

impl WindowState {
    pub const EMPTY: WindowState = WindowState {
        start_index: 0,
        end_index: 0,
        offset_pixels: 0.0,
        total_pixels: 0.0,
    };

    pub fn range(&self) -> Range<usize> {
        self.start_index..self.end_index
    }

    pub fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute the mounted slice for a scroll position.
///
/// Non-finite or negative scroll offsets and viewport heights are treated as
/// zero. A non-positive item height yields an empty window.
pub fn compute_window(
    item_count: usize,
    item_height: f64,
    viewport_height: f64,
    scroll_top: f64,
    overscan: usize,
) -> WindowState {
    if !item_height.is_finite() || item_height <= 0.0 {
        return WindowState::EMPTY;
    }

    let scroll_top = non_negative(scroll_top);
    let viewport_height = non_negative(viewport_height);

    let first_visible = (scroll_top / item_height).floor() as usize;
    let last_visible = ((scroll_top + viewport_height) / item_height).ceil() as usize;

    let start_index = first_visible.saturating_sub(overscan).min(item_count);
    let end_index = last_visible
        .saturating_add(overscan)
        .min(item_count)
        .max(start_index);

    WindowState {
        start_index,
        end_index,
        offset_pixels: start_index as f64 * item_height,
        total_pixels: item_count as f64 * item_height,
    }
}

/// True once the bottom edge of the viewport has passed `threshold` of the
/// list height. An empty list never reports its end.
pub fn is_end_reached(
    scroll_top: f64,
    viewport_height: f64,
    total_pixels: f64,
    threshold: f64,
) -> bool {
    if !total_pixels.is_finite() || total_pixels <= 0.0 {
        return false;
    }
    (non_negative(scroll_top) + non_negative(viewport_height)) / total_pixels >= threshold
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() { value.max(0.0) } else { 0.0 }
}

/// One mounted item with its absolute top offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleItem<'a, T> {
    pub index: usize,
    pub item: &'a T,
    pub top: f64,
}

pub fn visible_items<'a, T>(
    items: &'a [T],
    window: &WindowState,
    item_height: f64,
) -> impl Iterator<Item = VisibleItem<'a, T>> {
    let end = window.end_index.min(items.len());
    let start = window.start_index.min(end);
    items[start..end]
        .iter()
        .enumerate()
        .map(move |(offset, item)| {
            let index = start + offset;
            VisibleItem {
                index,
                item,
                top: index as f64 * item_height,
            }
        })
}

/// Output of `VirtualViewport::render`.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedWindow<R> {
    pub window: WindowState,
    pub rendered: Vec<R>,
}

/// Result of a scroll update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollUpdate {
    pub window: WindowState,
    /// Fires once per list length; it re-arms when the list grows.
    pub end_reached: bool,
}

/// Scroll-tracking wrapper around `compute_window` for one list container.
#[derive(Debug, Clone)]
pub struct VirtualViewport {
    item_height: f64,
    viewport_height: f64,
    overscan: usize,
    end_threshold: f64,
    scroll_top: f64,
    end_fired_at: Option<usize>,
}

impl VirtualViewport {
    pub fn new(item_height: f64, viewport_height: f64) -> Self {
        Self {
            item_height,
            viewport_height,
            overscan: DEFAULT_OVERSCAN,
            end_threshold: DEFAULT_END_THRESHOLD,
            scroll_top: 0.0,
            end_fired_at: None,
        }
    }

    pub fn from_settings(
        settings: &crate::config::WindowSettings,
        item_height: f64,
        viewport_height: f64,
    ) -> Self {
        Self::new(item_height, viewport_height)
            .with_overscan(settings.overscan)
            .with_end_threshold(settings.end_threshold)
    }

    pub fn with_overscan(mut self, overscan: usize) -> Self {
        self.overscan = overscan;
        self
    }

    pub fn with_end_threshold(mut self, threshold: f64) -> Self {
        self.end_threshold = threshold;
        self
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    pub fn resize(&mut self, viewport_height: f64) {
        self.viewport_height = viewport_height;
    }

    pub fn window(&self, item_count: usize) -> WindowState {
        compute_window(
            item_count,
            self.item_height,
            self.viewport_height,
            self.scroll_top,
            self.overscan,
        )
    }

    pub fn on_scroll(&mut self, scroll_top: f64, item_count: usize) -> ScrollUpdate {
        self.scroll_top = non_negative(scroll_top);
        let window = self.window(item_count);

        let reached = is_end_reached(
            self.scroll_top,
            self.viewport_height,
            window.total_pixels,
            self.end_threshold,
        );
        let already_fired = self
            .end_fired_at
            .is_some_and(|fired_at| fired_at >= item_count);
        let end_reached = reached && !already_fired;
        if end_reached {
            self.end_fired_at = Some(item_count);
        }

        ScrollUpdate {
            window,
            end_reached,
        }
    }

    pub fn render<'a, T, R>(
        &self,
        items: &'a [T],
        mut render_item: impl FnMut(&'a T, usize) -> R,
    ) -> RenderedWindow<R> {
        let window = self.window(items.len());
        let rendered = visible_items(items, &window, self.item_height)
            .map(|visible| render_item(visible.item, visible.index))
            .collect();
        RenderedWindow { window, rendered }
    }
}
