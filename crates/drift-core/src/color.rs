//! Colour helpers

/// Convert HSV (all components in [0, 1]) to linear RGB.
///
/// Hue wraps, so `1.25` and `0.25` give the same colour.
pub fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> [f32; 3] {
    let h = hue.rem_euclid(1.0);
    let c = value * saturation;
    let h_dash = h * 6.0;
    let x = c * (1.0 - ((h_dash % 2.0) - 1.0).abs());

    let (r, g, b) = match h_dash.floor() as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };

    let m = value - c;
    [r + m, g + m, b + m]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: [f32; 3], b: [f32; 3]) -> bool {
        a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-5)
    }

    #[test]
    fn primary_hues() {
        assert!(approx(hsv_to_rgb(0.0, 1.0, 1.0), [1.0, 0.0, 0.0]));
        assert!(approx(hsv_to_rgb(1.0 / 3.0, 1.0, 1.0), [0.0, 1.0, 0.0]));
        assert!(approx(hsv_to_rgb(2.0 / 3.0, 1.0, 1.0), [0.0, 0.0, 1.0]));
    }

    #[test]
    fn hue_wraps() {
        assert!(approx(hsv_to_rgb(1.25, 0.75, 1.0), hsv_to_rgb(0.25, 0.75, 1.0)));
        assert!(approx(hsv_to_rgb(-0.75, 0.75, 1.0), hsv_to_rgb(0.25, 0.75, 1.0)));
    }

    #[test]
    fn zero_saturation_is_grey() {
        assert!(approx(hsv_to_rgb(0.4, 0.0, 0.6), [0.6, 0.6, 0.6]));
    }
}
