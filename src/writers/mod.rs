pub mod colormap;
pub mod map_renderer;

pub use colormap::{color_scale, default_color_stops, Colormap};
pub use map_renderer::{MapRenderer, PngRenderer};
