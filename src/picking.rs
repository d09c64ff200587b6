// Color-id codec for the off-screen picking pass.
//
// Every cell is drawn with the RGB encoding of `id + 1`. Black (0) is the cleared
// background and decodes to -1, "nothing hit".

/// Largest value that fits in 24 bits of color.
pub const MAX_ENCODED: u32 = 0x00ff_ffff;

/// Cleared background of the picking target.
pub const BACKGROUND: [u8; 3] = [0, 0, 0];

pub fn encode(value: u32) -> [u8; 3] {
    debug_assert!(value <= MAX_ENCODED);
    [(value >> 16) as u8, (value >> 8) as u8, value as u8]
}

pub fn decode(rgb: [u8; 3]) -> u32 {
    (rgb[0] as u32) << 16 | (rgb[1] as u32) << 8 | rgb[2] as u32
}

/// Color a cell is drawn with in the picking pass.
pub fn color_of(cell: usize) -> [u8; 3] {
    encode(cell as u32 + 1)
}

/// Same color, as the normalized floats stored in the instance buffer.
pub fn color_of_normalized(cell: usize) -> [f32; 3] {
    let [r, g, b] = color_of(cell);
    [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]
}

/// Decoded value minus one: -1 for the background.
pub fn decode_id(rgb: [u8; 3]) -> i64 {
    decode(rgb) as i64 - 1
}

/// Resolves a read-back pixel to a cell of a collection of `cell_count` items.
pub fn resolve(rgb: [u8; 3], cell_count: usize) -> Option<usize> {
    let id = decode_id(rgb);
    if id < 0 || id as usize >= cell_count {
        return None;
    }
    Some(id as usize)
}

/// Turns raw pointer presses and releases into clicks.
///
/// A click is a release on the exact physical pixel of the preceding press, inside the
/// surface. Anything else is a drag and is ignored.
#[derive(Debug, Default)]
pub struct ClickTracker {
    pressed_at: Option<(u32, u32)>,
}

impl ClickTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&mut self, position: (f64, f64), surface: (u32, u32)) {
        self.pressed_at = Self::pixel(position, surface);
    }

    pub fn release(&mut self, position: (f64, f64), surface: (u32, u32)) -> Option<(u32, u32)> {
        let pressed = self.pressed_at.take()?;
        let released = Self::pixel(position, surface)?;
        (pressed == released).then_some(released)
    }

    fn pixel(position: (f64, f64), surface: (u32, u32)) -> Option<(u32, u32)> {
        let (x, y) = position;
        if x < 0.0 || y < 0.0 {
            return None;
        }
        let (x, y) = (x.floor() as u32, y.floor() as u32);
        (x < surface.0 && y < surface.1).then_some((x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_survive_the_color_round_trip() {
        for id in (0..200_000usize).chain([1 << 16, (1 << 24) - 2]) {
            assert_eq!(decode_id(color_of(id)), id as i64);
        }
    }

    #[test]
    fn background_is_no_hit() {
        assert_eq!(decode_id(BACKGROUND), -1);
        assert_eq!(resolve(BACKGROUND, 10), None);
        assert_eq!(resolve(color_of(9), 10), Some(9));
        assert_eq!(resolve(color_of(10), 10), None);
    }

    #[test]
    fn encoding_uses_all_three_channels() {
        assert_eq!(encode(1), [0, 0, 1]);
        assert_eq!(encode(256), [0, 1, 0]);
        assert_eq!(encode(65536 + 2), [1, 0, 2]);
        assert_eq!(color_of_normalized(0), [0.0, 0.0, 1.0 / 255.0]);
    }

    #[test]
    fn clicks_need_press_and_release_on_the_same_pixel() {
        let surface = (800, 600);
        let mut clicks = ClickTracker::new();

        clicks.press((10.2, 20.7), surface);
        assert_eq!(clicks.release((10.9, 20.1), surface), Some((10, 20)));

        clicks.press((10.0, 20.0), surface);
        assert_eq!(clicks.release((14.0, 20.0), surface), None);

        // release without press
        assert_eq!(clicks.release((10.0, 20.0), surface), None);

        clicks.press((900.0, 20.0), surface);
        assert_eq!(clicks.release((900.0, 20.0), surface), None);
    }
}
