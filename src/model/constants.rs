/// The color layout is an RGB image.
pub const INPUT_CHANNELS: usize = 3;

pub const DEFAULT_CATEGORY_CHANNELS: usize = 10;
pub const DEFAULT_ROTATION_CHANNELS: usize = 2;

/// Room width must be a multiple of this: the generator halves it three times.
pub const WIDTH_DIVISOR: usize = 8;

pub const LEAKY_RELU_SLOPE: f64 = 0.2;

/// Pixels per grid cell in exported images.
pub const CELL_SCALE: u32 = 8;

/// Category colors, indexed by category modulo the palette length.
/// Category 0 is empty space.
pub const PALETTE: [[u8; 3]; 12] = [
    [255, 255, 255],
    [230, 25, 75],
    [60, 180, 75],
    [255, 225, 25],
    [0, 130, 200],
    [245, 130, 48],
    [145, 30, 180],
    [70, 240, 240],
    [240, 50, 230],
    [210, 245, 60],
    [250, 190, 190],
    [0, 128, 128],
];
