pub mod ascii_preview;

pub use ascii_preview::{AsciiRenderer, TerminalPreview, check_for_escape, clear_screen};
