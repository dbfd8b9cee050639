//! ASCII plotting for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks of a scan in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - profile points: `o`
//! - straight segments between neighbouring points: `-`
//! - the minimum: `*`

use crate::report::Profile;

/// Render the profile (min llh vs. one scanned parameter).
pub fn render_profile_plot(profile: &Profile, width: usize, height: usize) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let points = &profile.points;
    if points.is_empty() {
        return format!("Profile of {}: no successful points\n", profile.param);
    }

    let (x_min, x_max) = pad_if_flat(range(points.iter().map(|p| p.0)));
    let (y_min, y_max) = range(points.iter().map(|p| p.1));
    let (y_min, y_max) = pad_range(y_min, y_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Segments first so markers overlay them.
    let cells: Vec<(usize, usize)> = points
        .iter()
        .map(|&(x, y)| {
            (
                map_x(x, x_min, x_max, width),
                map_y(y, y_min, y_max, height),
            )
        })
        .collect();
    for pair in cells.windows(2) {
        draw_line(&mut grid, pair[0], pair[1], '-');
    }

    let best = points
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.1.total_cmp(&b.1.1))
        .map(|(i, _)| i);
    for (i, &(x, y)) in cells.iter().enumerate() {
        grid[y][x] = if Some(i) == best { '*' } else { 'o' };
    }

    let mut out = String::new();
    out.push_str(&format!(
        "Profile: {}=[{x_min:.4}, {x_max:.4}] | min llh=[{y_min:.3}, {y_max:.3}]\n",
        profile.param
    ));
    for row in grid {
        out.push_str(row.into_iter().collect::<String>().trim_end());
        out.push('\n');
    }
    out
}

fn range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn pad_if_flat((min, max): (f64, f64)) -> (f64, f64) {
    if max > min {
        (min, max)
    } else {
        (min - 0.5, max + 0.5)
    }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let span = (max - min).abs();
    let pad = (span * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(x: f64, x_min: f64, x_max: f64, width: usize) -> usize {
    let width = width.max(2);
    let u = ((x - x_min) / (x_max - x_min)).clamp(0.0, 1.0);
    (u * (width as f64 - 1.0)).round() as usize
}

fn map_y(y: f64, y_min: f64, y_max: f64, height: usize) -> usize {
    let height = height.max(2);
    let u = ((y - y_min) / (y_max - y_min)).clamp(0.0, 1.0);
    // y=top is max -> row 0
    (height as f64 - 1.0 - (u * (height as f64 - 1.0))).round() as usize
}

/// Integer line drawing (Bresenham-ish).
fn draw_line(grid: &mut [Vec<char>], from: (usize, usize), to: (usize, usize), ch: char) {
    let (mut x0, mut y0) = (from.0 as isize, from.1 as isize);
    let (x1, y1) = (to.0 as isize, to.1 as isize);

    let dx = (x1 - x0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let dy = -(y1 - y0).abs();
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        if y0 >= 0
            && (y0 as usize) < grid.len()
            && x0 >= 0
            && (x0 as usize) < grid[0].len()
            && grid[y0 as usize][x0 as usize] == ' '
        {
            grid[y0 as usize][x0 as usize] = ch;
        }

        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}
