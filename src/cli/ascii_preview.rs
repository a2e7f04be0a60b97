use crate::core::detector::FaceBox;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent},
    terminal::{self, ClearType},
};
use image::{DynamicImage, imageops::{self, FilterType}};
use std::io::{self, Write};

const ASCII_RAMP: &[char] = &[' ', '.', '·', ':', ';', '+', '=', 'x', 'X', '#', '@'];
const DEFAULT_WIDTH: usize = 80;
const DEFAULT_HEIGHT: usize = 30;

pub struct AsciiRenderer {
    width: usize,
    height: usize,
}

impl AsciiRenderer {
    pub fn new(width: Option<usize>, height: Option<usize>) -> Self {
        let (term_width, term_height) = terminal::size()
            .map(|(w, h)| (w as usize, h as usize))
            .unwrap_or((DEFAULT_WIDTH, DEFAULT_HEIGHT));

        // Half resolution keeps redraws cheap at frame rate.
        Self {
            width: width.unwrap_or((term_width / 2).min(DEFAULT_WIDTH / 2)).max(1),
            height: height
                .unwrap_or((term_height.saturating_sub(5) / 2).min(DEFAULT_HEIGHT / 2))
                .max(1),
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Frame as ASCII art with the subject's box and a status line above it.
    pub fn render_frame(&self, image: &DynamicImage, face: Option<&FaceBox>, status: &str) -> String {
        let mut grid = self.shade(image);
        let scale = CellScale::new(image, self.width, self.height);

        match face {
            Some(face) => {
                let (left, top) = scale.cell(face.x1, face.y1);
                let (right, _) = scale.cell(face.x2, face.y2);
                self.overlay_text(&mut grid, status, (left + right) / 2, top.saturating_sub(1));
                self.draw_face_box(&mut grid, face, &scale);
            }
            None => self.overlay_text(&mut grid, status, self.width / 2, self.height / 2),
        }

        self.grid_to_string(&grid)
    }

    /// One character per cell, from a downsampled grayscale copy.
    fn shade(&self, image: &DynamicImage) -> Vec<Vec<char>> {
        if image.width() == 0 || image.height() == 0 {
            return vec![vec![' '; self.width]; self.height];
        }

        let small = imageops::resize(&image.to_luma8(), self.width as u32, self.height as u32, FilterType::Triangle);
        small
            .rows()
            .map(|row| {
                row.map(|p| ASCII_RAMP[(p[0] as usize * (ASCII_RAMP.len() - 1)) / 255])
                    .collect()
            })
            .collect()
    }

    fn overlay_text(&self, grid: &mut [Vec<char>], text: &str, center_x: usize, y: usize) {
        if y >= self.height {
            return;
        }

        let start_x = center_x.saturating_sub(text.chars().count() / 2);
        for (i, ch) in text.chars().enumerate() {
            let x = start_x + i;
            if x < self.width {
                grid[y][x] = ch;
            }
        }
    }

    fn draw_face_box(&self, grid: &mut [Vec<char>], face: &FaceBox, scale: &CellScale) {
        let (x1, y1) = scale.cell(face.x1, face.y1);
        let (x2, y2) = scale.cell(face.x2, face.y2);
        if x2 <= x1 || y2 <= y1 {
            return;
        }

        for x in (x1 + 1)..x2 {
            grid[y1][x] = '─';
            grid[y2][x] = '─';
        }
        for row in &mut grid[(y1 + 1)..y2] {
            row[x1] = '│';
            row[x2] = '│';
        }
        grid[y1][x1] = '┌';
        grid[y1][x2] = '┐';
        grid[y2][x1] = '└';
        grid[y2][x2] = '┘';
    }

    fn grid_to_string(&self, grid: &[Vec<char>]) -> String {
        grid.iter()
            .map(|row| row.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("\r\n") // raw mode needs an explicit carriage return
    }
}

/// Maps image coordinates onto grid cells, clamped to the grid.
struct CellScale {
    x: f32,
    y: f32,
    max_col: usize,
    max_row: usize,
}

impl CellScale {
    fn new(image: &DynamicImage, width: usize, height: usize) -> Self {
        Self {
            x: width as f32 / image.width().max(1) as f32,
            y: height as f32 / image.height().max(1) as f32,
            max_col: width - 1,
            max_row: height - 1,
        }
    }

    fn cell(&self, x: f32, y: f32) -> (usize, usize) {
        (
            ((x.max(0.0) * self.x) as usize).min(self.max_col),
            ((y.max(0.0) * self.y) as usize).min(self.max_row),
        )
    }
}

/// Raw-mode terminal for live previews. Restores the terminal when dropped.
pub struct TerminalPreview {
    renderer: AsciiRenderer,
}

impl TerminalPreview {
    pub fn start() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        clear_screen()?;
        crossterm::execute!(io::stdout(), cursor::Hide)?;
        Ok(Self {
            renderer: AsciiRenderer::new(None, None),
        })
    }

    pub fn show(&self, image: &DynamicImage, face: Option<&FaceBox>, status: &str, footer: &str) {
        let ascii = self.renderer.render_frame(image, face, status);
        crossterm::execute!(
            io::stdout(),
            cursor::MoveTo(0, 0),
            crossterm::style::Print(&ascii),
            cursor::MoveTo(0, (self.renderer.height() + 2) as u16),
            crossterm::style::Print(footer)
        )
        .ok();
    }
}

impl Drop for TerminalPreview {
    fn drop(&mut self) {
        crossterm::execute!(io::stdout(), cursor::Show).ok();
        terminal::disable_raw_mode().ok();
        println!();
    }
}

pub fn clear_screen() -> io::Result<()> {
    crossterm::execute!(io::stdout(), terminal::Clear(ClearType::All), cursor::MoveTo(0, 0))?;
    io::stdout().flush()
}

pub fn check_for_escape() -> io::Result<bool> {
    if event::poll(std::time::Duration::from_millis(0))? {
        if let Event::Key(KeyEvent { code, .. }) = event::read()? {
            return Ok(code == KeyCode::Esc);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn renders_fixed_grid_with_box() {
        let renderer = AsciiRenderer::new(Some(20), Some(10));
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 50, Luma([255])));
        let face = FaceBox::new(25.0, 10.0, 75.0, 40.0, 0.9);

        let out = renderer.render_frame(&image, Some(&face), "ok");
        let lines: Vec<&str> = out.split("\r\n").collect();

        assert_eq!(lines.len(), 10);
        assert!(lines.iter().all(|l| l.chars().count() == 20));
        assert!(out.contains('┌') && out.contains('┘'));
        assert!(out.contains("ok"));
    }

    #[test]
    fn dark_frame_without_face_shows_status_centered() {
        let renderer = AsciiRenderer::new(Some(20), Some(10));
        let image = DynamicImage::ImageLuma8(GrayImage::new(40, 40));
        let out = renderer.render_frame(&image, None, "no face");
        assert!(out.split("\r\n").nth(5).unwrap().contains("no face"));
    }
}
