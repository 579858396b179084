use ratatui::style::Color;

// Muted hacker palette
pub const NEON_GREEN: Color = Color::Rgb(0, 160, 50);
pub const NEON_CYAN: Color = Color::Rgb(0, 150, 160);
pub const NEON_MAGENTA: Color = Color::Rgb(160, 60, 160);
pub const NEON_YELLOW: Color = Color::Rgb(180, 160, 60);
pub const NEON_RED: Color = Color::Rgb(180, 60, 60);
pub const DARK_BG: Color = Color::Rgb(15, 15, 25);
pub const GAUGE_BG: Color = Color::Rgb(20, 20, 30);
pub const MATRIX_GREEN: Color = Color::Rgb(30, 130, 30);
pub const CYBER_BLUE: Color = Color::Rgb(60, 130, 180);
pub const DIM: Color = Color::DarkGray;

pub fn util_color(pct: f64) -> Color {
    if pct > 90.0 {
        NEON_RED
    } else if pct > 50.0 {
        NEON_YELLOW
    } else {
        NEON_GREEN
    }
}

pub fn temp_color(celsius: f64) -> Color {
    if celsius > 80.0 {
        NEON_RED
    } else if celsius > 60.0 {
        NEON_YELLOW
    } else {
        NEON_CYAN
    }
}

/// Power below the guard threshold is what the guard exists to catch.
pub fn power_color(watts: f64, threshold: f64) -> Color {
    if watts < threshold {
        NEON_RED
    } else {
        NEON_YELLOW
    }
}
