//! View/light half-vector and flip tracking

use glam::{Mat4, Vec3};

/// Anything that can supply the viewer's orientation each frame
pub trait ViewSource {
    /// Unit vector the viewer looks along
    fn view_direction(&self) -> Vec3;
    fn view_matrix(&self) -> Mat4;
}

/// Blend order used by the viewer pass
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlendOrder {
    /// Particles arrive nearest first; composite under what is already drawn
    FrontToBack,
    /// Particles arrive farthest first; composite over what is already drawn
    BackToFront,
}

impl BlendOrder {
    pub fn from_flipped(flipped: bool) -> Self {
        if flipped {
            BlendOrder::BackToFront
        } else {
            BlendOrder::FrontToBack
        }
    }
}

/// Result of one per-frame view update
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ViewUpdate {
    pub half_vector: Vec3,
    pub flipped: bool,
    pub flipped_this_frame: bool,
}

impl ViewUpdate {
    pub fn blend_order(&self) -> BlendOrder {
        BlendOrder::from_flipped(self.flipped)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ViewState {
    flipped: bool,
}

impl ViewState {
    pub fn flipped(&self) -> bool {
        self.flipped
    }

    /// Pick the half-vector for this frame.
    ///
    /// When viewer and light face the same hemisphere the sort axis is the
    /// half-vector of the two, otherwise the viewer direction is negated and
    /// the viewer pass must composite back to front.
    pub fn update(&mut self, view_direction: Vec3, light_direction: Vec3) -> ViewUpdate {
        let facing = view_direction.dot(light_direction) > 0.0;
        let (half_vector, now_flipped) = if facing {
            ((light_direction + view_direction).normalize_or_zero(), false)
        } else {
            ((light_direction - view_direction).normalize_or_zero(), true)
        };

        let flipped_this_frame = now_flipped != self.flipped;
        self.flipped = now_flipped;

        ViewUpdate {
            half_vector,
            flipped: now_flipped,
            flipped_this_frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIGHT: Vec3 = Vec3::NEG_Y;

    #[test]
    fn facing_light_uses_sum() {
        let mut state = ViewState::default();
        let view = Vec3::new(0.0, -1.0, 1.0).normalize();
        let update = state.update(view, LIGHT);

        assert!(!update.flipped);
        assert!(!update.flipped_this_frame);
        assert!((update.half_vector - (LIGHT + view).normalize()).length() < 1e-6);
        assert_eq!(update.blend_order(), BlendOrder::FrontToBack);
    }

    #[test]
    fn facing_away_flips_and_uses_difference() {
        let mut state = ViewState::default();
        let view = Vec3::new(0.0, 1.0, 1.0).normalize();
        let update = state.update(view, LIGHT);

        assert!(update.flipped);
        assert!(update.flipped_this_frame);
        assert!((update.half_vector - (LIGHT - view).normalize()).length() < 1e-6);
        assert_eq!(update.blend_order(), BlendOrder::BackToFront);
    }

    #[test]
    fn flip_is_reported_once_per_crossing() {
        let mut state = ViewState::default();
        let toward = Vec3::new(0.0, -0.5, 1.0).normalize();
        let away = Vec3::new(0.0, 0.5, 1.0).normalize();

        assert!(!state.update(toward, LIGHT).flipped_this_frame);
        assert!(state.update(away, LIGHT).flipped_this_frame);
        assert!(!state.update(away, LIGHT).flipped_this_frame);
        assert!(state.update(toward, LIGHT).flipped_this_frame);
        assert!(!state.flipped());
    }

    #[test]
    fn perpendicular_view_counts_as_flipped() {
        let mut state = ViewState::default();
        let update = state.update(Vec3::Z, LIGHT);
        assert!(update.flipped);
        assert!(update.half_vector.is_normalized());
    }
}
