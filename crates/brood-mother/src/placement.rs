use serde::{Deserialize, Serialize};

use crate::collaborators::CanvasImage;

pub const PLACEMENT_GAP: f64 = 16.0;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> f64 {
        self.x + self.w
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.h
    }

    /// Edge contact does not count as overlap.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum Placement {
    Replace { target: String, bounds: Rect },
    Adjacent { anchor: String, bounds: Rect },
    Grid { row: u32, col: u32, bounds: Rect },
}

impl Placement {
    pub fn policy(&self) -> &'static str {
        match self {
            Self::Replace { .. } => "replace",
            Self::Adjacent { .. } => "adjacent",
            Self::Grid { .. } => "grid",
        }
    }

    pub fn bounds(&self) -> Rect {
        match self {
            Self::Replace { bounds, .. }
            | Self::Adjacent { bounds, .. }
            | Self::Grid { bounds, .. } => *bounds,
        }
    }
}

fn is_free(slot: &Rect, images: &[CanvasImage], canvas: &Rect) -> bool {
    canvas.contains(slot) && !images.iter().any(|image| image.bounds.intersects(slot))
}

/// Picks where a committed artifact lands, sized like the anchor (first) image.
///
/// Tries beside the anchor (right, below, left, above), then the first free grid cell,
/// and finally replaces the anchor when the canvas is full.
pub fn choose_placement(images: &[CanvasImage], canvas: Rect) -> Placement {
    let Some(anchor) = images.first() else {
        return Placement::Grid {
            row: 0,
            col: 0,
            bounds: canvas,
        };
    };
    let size = anchor.bounds;
    let beside = [
        Rect::new(size.right() + PLACEMENT_GAP, size.y, size.w, size.h),
        Rect::new(size.x, size.bottom() + PLACEMENT_GAP, size.w, size.h),
        Rect::new(size.x - PLACEMENT_GAP - size.w, size.y, size.w, size.h),
        Rect::new(size.x, size.y - PLACEMENT_GAP - size.h, size.w, size.h),
    ];
    if let Some(slot) = beside.iter().find(|slot| is_free(slot, images, &canvas)) {
        return Placement::Adjacent {
            anchor: anchor.id.clone(),
            bounds: *slot,
        };
    }

    if size.w > 0.0 && size.h > 0.0 {
        let step_x = size.w + PLACEMENT_GAP;
        let step_y = size.h + PLACEMENT_GAP;
        let cols = ((canvas.w + PLACEMENT_GAP) / step_x).floor().max(0.0) as u32;
        let rows = ((canvas.h + PLACEMENT_GAP) / step_y).floor().max(0.0) as u32;
        for row in 0..rows {
            for col in 0..cols {
                let slot = Rect::new(
                    canvas.x + f64::from(col) * step_x,
                    canvas.y + f64::from(row) * step_y,
                    size.w,
                    size.h,
                );
                if is_free(&slot, images, &canvas) {
                    return Placement::Grid {
                        row,
                        col,
                        bounds: slot,
                    };
                }
            }
        }
    }

    Placement::Replace {
        target: anchor.id.clone(),
        bounds: anchor.bounds,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{choose_placement, Placement, Rect};
    use crate::collaborators::CanvasImage;

    fn image(id: &str, x: f64, y: f64, w: f64, h: f64) -> CanvasImage {
        CanvasImage::new(id, Rect::new(x, y, w, h))
    }

    #[test]
    fn prefers_the_slot_right_of_the_anchor() {
        let images = vec![image("a", 0.0, 0.0, 100.0, 100.0)];
        let placement = choose_placement(&images, Rect::new(0.0, 0.0, 1000.0, 1000.0));
        assert_eq!(
            placement,
            Placement::Adjacent {
                anchor: "a".into(),
                bounds: Rect::new(116.0, 0.0, 100.0, 100.0),
            }
        );
    }

    #[test]
    fn avoids_occupied_neighbours() {
        let images = vec![
            image("a", 0.0, 0.0, 100.0, 100.0),
            image("b", 120.0, 0.0, 100.0, 100.0),
        ];
        let placement = choose_placement(&images, Rect::new(0.0, 0.0, 1000.0, 1000.0));
        assert_eq!(placement.policy(), "adjacent");
        assert_eq!(placement.bounds(), Rect::new(0.0, 116.0, 100.0, 100.0));
    }

    #[test]
    fn falls_back_to_grid_then_replace() {
        // Anchor boxed in on all four sides, one free cell further out.
        let images = vec![
            image("a", 116.0, 116.0, 100.0, 100.0),
            image("r", 232.0, 116.0, 100.0, 100.0),
            image("d", 116.0, 232.0, 100.0, 100.0),
            image("l", 0.0, 116.0, 100.0, 100.0),
            image("u", 116.0, 0.0, 100.0, 100.0),
        ];
        let canvas = Rect::new(0.0, 0.0, 340.0, 340.0);
        let placement = choose_placement(&images, canvas);
        assert_eq!(
            placement,
            Placement::Grid {
                row: 0,
                col: 0,
                bounds: Rect::new(0.0, 0.0, 100.0, 100.0),
            }
        );

        let full = vec![image("only", 0.0, 0.0, 100.0, 100.0)];
        let placement = choose_placement(&full, Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(placement.policy(), "replace");
    }

    #[test]
    fn placement_serializes_with_policy_tag() -> anyhow::Result<()> {
        let placement = Placement::Replace {
            target: "a".into(),
            bounds: Rect::new(0.0, 0.0, 1.0, 1.0),
        };
        let value = serde_json::to_value(&placement)?;
        assert_eq!(value["policy"], json!("replace"));
        assert_eq!(value["target"], json!("a"));
        Ok(())
    }
}
